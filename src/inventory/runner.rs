//! Inventory rounds fed by received gateway packets

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::messages::{GatewayEvent, NodeAddress};
use crate::settings::TestSettings;
use crate::shutdown::ShutdownListener;

use super::{frequency_label, Inventory};

/// Why a round ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundOutcome {
    Complete,
    FrequencyReached,
    Otaped,
    OutOfTime,
    Interrupted,
    SourceClosed,
}

/// Summary of a finished round
#[derive(Debug, Clone, Serialize)]
pub struct InventoryReport {
    pub sequence: u32,
    pub outcome: RoundOutcome,
    pub start: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub finish: Option<DateTime<Utc>>,
    pub elapsed: f64,
    pub nodes_seen: usize,
    pub target_nodes: usize,
    pub difference: Vec<NodeAddress>,
    pub frequency: BTreeMap<String, Vec<NodeAddress>>,
}

impl InventoryReport {
    pub fn from_inventory(inventory: &Inventory, outcome: RoundOutcome) -> Self {
        Self {
            sequence: inventory.sequence(),
            outcome,
            start: inventory.start(),
            deadline: inventory.deadline(),
            finish: inventory.finished_at(),
            elapsed: inventory.elapsed(),
            nodes_seen: inventory.nodes().len(),
            target_nodes: inventory.target_nodes().len(),
            difference: inventory.difference().into_iter().collect(),
            frequency: inventory
                .frequency_by_value()
                .into_iter()
                .map(|(value, nodes)| (frequency_label(value), nodes.into_iter().collect()))
                .collect(),
        }
    }
}

/// Read node addresses separated by whitespace or commas; `#` starts a comment.
///
/// A missing file means there are no target nodes.
pub fn load_target_nodes(path: &Path) -> Result<BTreeSet<NodeAddress>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Nodes file {} not found, observing every node", path.display());
            return Ok(BTreeSet::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut nodes = BTreeSet::new();
    for line in content.lines() {
        let line = line.split('#').next().unwrap_or_default();
        for token in line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty())
        {
            let address = token.parse().map_err(|_| {
                Error::Config(format!(
                    "invalid node address '{}' in {}",
                    token,
                    path.display()
                ))
            })?;
            nodes.insert(address);
        }
    }
    Ok(nodes)
}

/// Delay before a round: the configured delay, or a random pick in the
/// jitter range when unset
pub fn start_delay(settings: &TestSettings) -> Duration {
    if let Some(delay) = settings.delay {
        return Duration::from_secs(delay);
    }

    let low = settings.jitter_minimum.min(settings.jitter_maximum);
    let high = settings.jitter_minimum.max(settings.jitter_maximum);
    if low == high {
        return Duration::from_secs(low);
    }
    Duration::from_secs(rand::random_range(low..=high))
}

/// Output path, with a UTC timestamp before the extension when requested
pub fn report_path(path: &Path, with_time: bool, now: DateTime<Utc>) -> PathBuf {
    if !with_time {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stamp = now.format("%Y%m%dT%H%M%SZ");
    let name = match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, stamp, ext.to_string_lossy()),
        None => format!("{}_{}", stem, stamp),
    };
    path.with_file_name(name)
}

/// Write every round report as a JSON array
pub fn write_reports(path: &Path, reports: &[InventoryReport]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, serde_json::to_string_pretty(reports)?)?;
    Ok(())
}

/// Run one round: wait for the start, then count packet sources until a
/// target is met, time runs out or shutdown is requested
pub async fn run_round(
    inventory: &mut Inventory,
    rx: &mut mpsc::Receiver<GatewayEvent>,
    shutdown: &mut ShutdownListener,
) -> RoundOutcome {
    let delay = inventory.schedule();
    tokio::select! {
        _ = shutdown.wait() => {
            inventory.finish();
            return RoundOutcome::Interrupted;
        }
        _ = tokio::time::sleep(delay) => {}
    }

    // anything queued before the start belongs to no round
    while rx.try_recv().is_ok() {}

    let outcome = loop {
        if inventory.is_complete() {
            break RoundOutcome::Complete;
        }
        if inventory.is_frequency_reached() {
            break RoundOutcome::FrequencyReached;
        }
        if inventory.is_otaped() {
            break RoundOutcome::Otaped;
        }
        if inventory.is_out_of_time() {
            break RoundOutcome::OutOfTime;
        }

        let remaining = inventory
            .deadline()
            .map(|deadline| Inventory::until(deadline).max(0.0))
            .unwrap_or(0.0);

        tokio::select! {
            _ = shutdown.wait() => break RoundOutcome::Interrupted,
            _ = tokio::time::sleep(Duration::from_secs_f64(remaining)) => {}
            event = rx.recv() => match event {
                Some(GatewayEvent::Packet(packet)) => {
                    inventory.add(packet.source_address, &[], &[], Some(packet.rx_time));
                }
                Some(GatewayEvent::Status(_)) => {}
                None => break RoundOutcome::SourceClosed,
            },
        }
    };

    inventory.finish();
    outcome
}

/// Run every configured round and return their reports
pub async fn run_inventory(
    settings: &TestSettings,
    rx: &mut mpsc::Receiver<GatewayEvent>,
    mut shutdown: ShutdownListener,
) -> Result<Vec<InventoryReport>> {
    let targets = load_target_nodes(&settings.nodes)?;
    info!("Observing {} target nodes", targets.len());

    let mut inventory = Inventory::new(Duration::ZERO, Duration::from_secs(settings.duration))
        .with_target_nodes(targets)
        .with_target_otap(settings.target_otap)
        .with_target_frequency(settings.target_frequency);

    let mut reports = Vec::new();
    for sequence in 1..=settings.number_of_runs {
        inventory.set_sequence(sequence);
        inventory.set_start_delay(start_delay(settings));

        let outcome = run_round(&mut inventory, rx, &mut shutdown).await;
        info!(
            sequence,
            "Round finished ({:?}) after {:.1}s: {} nodes seen {}",
            outcome,
            inventory.elapsed(),
            inventory.nodes().len(),
            inventory
        );
        reports.push(InventoryReport::from_inventory(&inventory, outcome));

        if matches!(outcome, RoundOutcome::Interrupted | RoundOutcome::SourceClosed) {
            break;
        }
    }

    if let Some(output) = &settings.output {
        let path = report_path(output, settings.output_time, Utc::now());
        write_reports(&path, &reports)?;
        info!("Inventory report written to {}", path.display());
    }

    Ok(reports)
}
