//! Node inventory
//!
//! Counts the nodes seen during a time window and compares them with a set
//! of target nodes, a target OTAP sequence or a target frequency.

mod runner;

pub use runner::*;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::messages::NodeAddress;

/// A single appearance of a node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeEvent {
    pub rss: Vec<f64>,
    pub otap: Vec<u32>,
    pub otap_min: Option<u32>,
    pub otap_max: Option<u32>,
}

/// Everything known about a node in the current round
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRecord {
    pub count: u64,
    pub last_seen: Option<DateTime<Utc>>,
    pub events: Vec<NodeEvent>,
}

#[derive(Debug, Clone)]
pub struct Inventory {
    target_nodes: BTreeSet<NodeAddress>,
    target_otap_sequence: Option<u32>,
    target_frequency: Option<u64>,
    start_delay: Duration,
    maximum_duration: Duration,
    sequence: u32,
    nodes: BTreeSet<NodeAddress>,
    index: BTreeMap<NodeAddress, NodeRecord>,
    start: Option<DateTime<Utc>>,
    deadline: Option<DateTime<Utc>>,
    finish: Option<DateTime<Utc>>,
}

impl Inventory {
    pub fn new(start_delay: Duration, maximum_duration: Duration) -> Self {
        Self {
            target_nodes: BTreeSet::new(),
            target_otap_sequence: None,
            target_frequency: None,
            start_delay,
            maximum_duration,
            sequence: 0,
            nodes: BTreeSet::new(),
            index: BTreeMap::new(),
            start: None,
            deadline: None,
            finish: None,
        }
    }

    pub fn with_target_nodes(mut self, nodes: BTreeSet<NodeAddress>) -> Self {
        self.target_nodes = nodes;
        self
    }

    pub fn with_target_otap(mut self, sequence: Option<u32>) -> Self {
        self.target_otap_sequence = sequence;
        self
    }

    pub fn with_target_frequency(mut self, frequency: Option<u64>) -> Self {
        self.target_frequency = frequency;
        self
    }

    pub fn set_start_delay(&mut self, delay: Duration) {
        self.start_delay = delay;
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn set_sequence(&mut self, sequence: u32) {
        self.sequence = sequence;
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.start
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finish
    }

    pub fn target_nodes(&self) -> &BTreeSet<NodeAddress> {
        &self.target_nodes
    }

    pub fn target_otap_sequence(&self) -> Option<u32> {
        self.target_otap_sequence
    }

    pub fn target_frequency(&self) -> Option<u64> {
        self.target_frequency
    }

    /// Unique nodes observed so far
    pub fn nodes(&self) -> &BTreeSet<NodeAddress> {
        &self.nodes
    }

    pub fn node(&self, address: NodeAddress) -> Option<&NodeRecord> {
        self.index.get(&address)
    }

    /// Seconds since the start of the round, up to its finish when finished
    pub fn elapsed(&self) -> f64 {
        let Some(start) = self.start else {
            return 0.0;
        };
        let end = self.finish.unwrap_or_else(Utc::now);
        seconds(end - start)
    }

    /// Seconds left until `deadline`, negative once it has passed
    pub fn until(deadline: DateTime<Utc>) -> f64 {
        seconds(deadline - Utc::now())
    }

    pub fn finish(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        self.finish = Some(now);
        now
    }

    /// Forget everything observed so far
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.index.clear();
        self.start = None;
        self.deadline = None;
        self.finish = None;
    }

    /// Reset and compute the start and deadline of the next round.
    ///
    /// Returns how long to wait before the round starts.
    pub fn schedule(&mut self) -> Duration {
        self.reset();

        let delay = clamp_window(self.start_delay, "start delay");
        let duration = clamp_window(self.maximum_duration, "round duration");

        let start = later(Utc::now(), delay);
        self.start = Some(start);
        self.deadline = Some(later(start, duration));

        debug!(
            sequence = self.sequence,
            "waiting {} seconds to start",
            delay.as_secs_f64()
        );
        delay
    }

    /// Schedule the next round and sleep until it starts
    pub async fn wait(&mut self) {
        let delay = self.schedule();
        tokio::time::sleep(delay).await;
    }

    /// Record an appearance of `address`
    pub fn add(
        &mut self,
        address: NodeAddress,
        rss: &[f64],
        otap_sequence: &[u32],
        timestamp: Option<DateTime<Utc>>,
    ) {
        self.nodes.insert(address);

        let has_rss = rss.iter().any(|value| *value != 0.0);
        let (otap_min, otap_max) = if otap_sequence.is_empty() {
            (None, None)
        } else {
            (
                otap_sequence.iter().min().copied(),
                otap_sequence.iter().max().copied(),
            )
        };

        let event = NodeEvent {
            rss: if has_rss || otap_min.is_none() {
                rss.to_vec()
            } else {
                Vec::new()
            },
            otap: otap_sequence.to_vec(),
            otap_min,
            otap_max,
        };

        match self.index.get_mut(&address) {
            Some(record) => {
                record.count += 1;
                record.last_seen = timestamp;
                record.events.push(event);
            }
            None => {
                debug!(sequence = self.sequence, "adding node: {} / {:?}", address, event);
                self.index.insert(
                    address,
                    NodeRecord {
                        count: 1,
                        last_seen: timestamp,
                        events: vec![event],
                    },
                );
            }
        }
    }

    /// Forget a node. Returns whether it was known.
    pub fn remove(&mut self, address: NodeAddress) -> bool {
        self.index.remove(&address);
        self.nodes.remove(&address)
    }

    pub fn is_out_of_time(&self) -> bool {
        let Some(deadline) = self.deadline else {
            return false;
        };
        let time_left = Self::until(deadline);
        debug!(sequence = self.sequence, "time left {}s ...", time_left);
        time_left <= 0.0
    }

    /// Every target node has been seen.
    ///
    /// Never true without target nodes, or while a frequency or OTAP target
    /// decides completion instead.
    pub fn is_complete(&self) -> bool {
        if self.target_nodes.is_empty() || self.target_frequency.is_some() {
            return false;
        }

        if !self.nodes.is_superset(&self.target_nodes) {
            debug!(
                sequence = self.sequence,
                "elapsed {} - missing {:?}",
                self.elapsed(),
                self.difference()
            );
            return false;
        }

        self.target_otap_sequence.is_none()
    }

    /// Every target node reports the target OTAP sequence
    pub fn is_otaped(&self) -> bool {
        let Some(_) = self.target_otap_sequence else {
            return false;
        };
        if self.target_nodes.is_empty() {
            return false;
        }

        let otaped = self.otaped_nodes();
        if !otaped.is_superset(&self.target_nodes) {
            debug!(
                sequence = self.sequence,
                "elapsed {} - otap missing {:?}",
                self.elapsed(),
                otaped
                    .symmetric_difference(&self.target_nodes)
                    .collect::<Vec<_>>()
            );
            return false;
        }

        true
    }

    /// Every target node was seen at least the target number of times
    pub fn is_frequency_reached(&self) -> bool {
        let Some(target) = self.target_frequency else {
            return false;
        };
        if self.target_nodes.is_empty() {
            return false;
        }

        self.frequency()
            .iter()
            .filter(|(address, _)| self.target_nodes.contains(address))
            .all(|(_, value)| *value >= target)
    }

    /// Symmetric difference between seen and target nodes
    pub fn difference(&self) -> BTreeSet<NodeAddress> {
        self.nodes
            .symmetric_difference(&self.target_nodes)
            .copied()
            .collect()
    }

    /// Nodes whose latest event carries the target OTAP sequence
    pub fn otaped_nodes(&self) -> BTreeSet<NodeAddress> {
        let Some(target) = self.target_otap_sequence else {
            return BTreeSet::new();
        };

        self.index
            .iter()
            .filter(|(_, record)| {
                record.events.last().is_some_and(|event| {
                    event.otap_min == Some(target) || event.otap_max == Some(target)
                })
            })
            .map(|(address, _)| *address)
            .collect()
    }

    /// Per node value: times seen, or the latest OTAP sequence when an OTAP
    /// target is set. Target nodes never seen report 0.
    pub fn frequency(&self) -> BTreeMap<NodeAddress, u64> {
        let mut frequency: BTreeMap<NodeAddress, u64> = self
            .index
            .iter()
            .map(|(address, record)| (*address, self.value_of(record)))
            .collect();

        for node in &self.target_nodes {
            frequency.entry(*node).or_insert(0);
        }
        frequency
    }

    /// Nodes grouped by their frequency value, in ascending order
    pub fn frequency_by_value(&self) -> BTreeMap<u64, BTreeSet<NodeAddress>> {
        let mut grouped: BTreeMap<u64, BTreeSet<NodeAddress>> = BTreeMap::new();
        for (address, record) in &self.index {
            grouped
                .entry(self.value_of(record))
                .or_default()
                .insert(*address);
        }
        grouped
    }

    fn value_of(&self, record: &NodeRecord) -> u64 {
        if self.target_otap_sequence.is_some() {
            record
                .events
                .last()
                .and_then(|event| event.otap_max)
                .map(u64::from)
                .unwrap_or(0)
        } else {
            record.count
        }
    }
}

/// Label used for a frequency bucket
pub fn frequency_label(value: u64) -> String {
    format!("frequency_{:03}", value)
}

impl fmt::Display for Inventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buckets: Vec<String> = self
            .frequency_by_value()
            .iter()
            .map(|(value, nodes)| format!("{}: {:?}", frequency_label(*value), nodes))
            .collect();
        write!(f, "{{{}}}", buckets.join(", "))
    }
}

/// Longest start delay or round duration honoured by `schedule`
pub const MAX_WINDOW: Duration = Duration::from_secs(3650 * 24 * 3600);

fn clamp_window(duration: Duration, what: &str) -> Duration {
    if duration > MAX_WINDOW {
        warn!(
            "{} of {} seconds capped to {} seconds",
            what,
            duration.as_secs(),
            MAX_WINDOW.as_secs()
        );
        MAX_WINDOW
    } else {
        duration
    }
}

fn later(time: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| time.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn seconds(delta: chrono::Duration) -> f64 {
    delta.num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(nodes: &[NodeAddress]) -> BTreeSet<NodeAddress> {
        nodes.iter().copied().collect()
    }

    fn inventory() -> Inventory {
        Inventory::new(Duration::ZERO, Duration::from_secs(60))
    }

    #[test]
    fn test_add_counts_appearances() {
        let mut inventory = inventory();
        inventory.add(1, &[], &[], None);
        inventory.add(1, &[-70.0], &[], None);
        inventory.add(2, &[], &[], None);

        assert_eq!(inventory.nodes(), &targets(&[1, 2]));
        assert_eq!(inventory.node(1).unwrap().count, 2);
        assert_eq!(inventory.node(1).unwrap().events[1].rss, vec![-70.0]);
        assert_eq!(inventory.frequency(), BTreeMap::from([(1, 2), (2, 1)]));
    }

    #[test]
    fn test_remove_forgets_node() {
        let mut inventory = inventory();
        inventory.add(5, &[], &[], None);
        assert!(inventory.remove(5));
        assert!(!inventory.remove(5));
        assert!(inventory.node(5).is_none());
    }

    #[test]
    fn test_complete_requires_all_targets() {
        let mut inventory = inventory().with_target_nodes(targets(&[1, 2]));
        assert!(!inventory.is_complete());

        inventory.add(1, &[], &[], None);
        assert!(!inventory.is_complete());
        assert_eq!(inventory.difference(), targets(&[2]));

        inventory.add(2, &[], &[], None);
        inventory.add(3, &[], &[], None);
        assert!(inventory.is_complete());
        assert_eq!(inventory.difference(), targets(&[3]));
    }

    #[test]
    fn test_complete_is_never_true_without_targets_or_with_frequency() {
        let mut inventory = inventory();
        inventory.add(1, &[], &[], None);
        assert!(!inventory.is_complete());

        let mut inventory = inventory
            .with_target_nodes(targets(&[1]))
            .with_target_frequency(Some(1));
        inventory.add(1, &[], &[], None);
        assert!(!inventory.is_complete());
        assert!(inventory.is_frequency_reached());
    }

    #[test]
    fn test_frequency_reached_counts_missing_targets_as_zero() {
        let mut inventory = inventory()
            .with_target_nodes(targets(&[1, 2]))
            .with_target_frequency(Some(2));

        inventory.add(1, &[], &[], None);
        inventory.add(1, &[], &[], None);
        assert_eq!(inventory.frequency().get(&2), Some(&0));
        assert!(!inventory.is_frequency_reached());

        inventory.add(2, &[], &[], None);
        inventory.add(2, &[], &[], None);
        assert!(inventory.is_frequency_reached());
    }

    #[test]
    fn test_otaped_nodes_use_latest_event() {
        let mut inventory = inventory()
            .with_target_nodes(targets(&[1, 2]))
            .with_target_otap(Some(7));

        inventory.add(1, &[], &[5, 7], None);
        inventory.add(2, &[], &[7], None);
        inventory.add(2, &[], &[6], None);

        assert_eq!(inventory.otaped_nodes(), targets(&[1]));
        assert!(!inventory.is_otaped());
        assert!(!inventory.is_complete());

        inventory.add(2, &[], &[7, 8], None);
        assert!(inventory.is_otaped());
        assert_eq!(inventory.frequency(), BTreeMap::from([(1, 7), (2, 8)]));
    }

    #[test]
    fn test_frequency_by_value_groups_nodes() {
        let mut inventory = inventory();
        inventory.add(1, &[], &[], None);
        inventory.add(2, &[], &[], None);
        inventory.add(2, &[], &[], None);
        inventory.add(3, &[], &[], None);

        let grouped = inventory.frequency_by_value();
        assert_eq!(grouped.get(&1), Some(&targets(&[1, 3])));
        assert_eq!(grouped.get(&2), Some(&targets(&[2])));
        assert_eq!(
            inventory.to_string(),
            "{frequency_001: {1, 3}, frequency_002: {2}}"
        );
    }

    #[test]
    fn test_schedule_sets_window_and_resets() {
        let mut inventory = Inventory::new(Duration::from_secs(2), Duration::from_secs(10));
        inventory.add(1, &[], &[], None);

        let delay = inventory.schedule();
        assert_eq!(delay, Duration::from_secs(2));
        assert!(inventory.nodes().is_empty());

        let start = inventory.start().unwrap();
        let deadline = inventory.deadline().unwrap();
        assert_eq!((deadline - start).num_seconds(), 10);
        assert!(!inventory.is_out_of_time());
    }

    #[test]
    fn test_schedule_caps_huge_windows() {
        let mut inventory = Inventory::new(
            Duration::from_secs(10_000_000_000_000),
            Duration::from_secs(u64::MAX),
        );

        let delay = inventory.schedule();
        assert_eq!(delay, MAX_WINDOW);

        let start = inventory.start().unwrap();
        let deadline = inventory.deadline().unwrap();
        assert_eq!(
            (deadline - start).num_seconds() as u64,
            MAX_WINDOW.as_secs()
        );
        assert!(!inventory.is_out_of_time());
    }

    #[test]
    fn test_out_of_time_after_deadline() {
        let mut inventory = Inventory::new(Duration::ZERO, Duration::ZERO);
        assert!(!inventory.is_out_of_time());
        inventory.schedule();
        assert!(inventory.is_out_of_time());

        inventory.finish();
        assert!(inventory.elapsed() >= 0.0);
        assert!(inventory.finished_at().is_some());
    }
}
