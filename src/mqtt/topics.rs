//! Wirepas gateway topic scheme
//!
//! ```text
//! gw-request/<method>/<gw_id>[/<sink_id>]
//! gw-response/<method>/<gw_id>[/<sink_id>]
//! gw-event/status/<gw_id>
//! gw-event/received_data/<gw_id>/<sink_id>/<network_id>/<src_ep>/<dst_ep>
//! ```

use serde::Serialize;
use std::fmt;

use crate::error::{Error, Result};
use crate::settings::{MqttSettings, DEFAULT_MQTT_TOPIC};

pub const REQUEST_PREFIX: &str = "gw-request";
pub const RESPONSE_PREFIX: &str = "gw-response";
pub const EVENT_PREFIX: &str = "gw-event";
pub const STATUS_EVENT: &str = "status";
pub const RECEIVED_DATA_EVENT: &str = "received_data";

/// A classified gateway topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Topic {
    Status {
        gw_id: String,
    },
    ReceivedData {
        gw_id: String,
        sink_id: String,
        network_id: u64,
        source_endpoint: u8,
        destination_endpoint: u8,
    },
    Request {
        method: String,
        gw_id: String,
        sink_id: Option<String>,
    },
    Response {
        method: String,
        gw_id: String,
        sink_id: Option<String>,
    },
}

impl Topic {
    /// Classify a topic received from the broker
    pub fn parse(topic: &str) -> Result<Self> {
        let levels: Vec<&str> = topic.split('/').collect();
        let invalid = || Error::InvalidTopic(topic.to_string());

        if levels.iter().any(|level| level.is_empty()) {
            return Err(invalid());
        }

        match levels.as_slice() {
            [EVENT_PREFIX, STATUS_EVENT, gw_id] => Ok(Topic::Status {
                gw_id: gw_id.to_string(),
            }),
            [EVENT_PREFIX, RECEIVED_DATA_EVENT, gw_id, sink_id, network, src, dst] => {
                Ok(Topic::ReceivedData {
                    gw_id: gw_id.to_string(),
                    sink_id: sink_id.to_string(),
                    network_id: network.parse().map_err(|_| invalid())?,
                    source_endpoint: src.parse().map_err(|_| invalid())?,
                    destination_endpoint: dst.parse().map_err(|_| invalid())?,
                })
            }
            [prefix @ (REQUEST_PREFIX | RESPONSE_PREFIX), method, gw_id, rest @ ..]
                if rest.len() <= 1 =>
            {
                let method = method.to_string();
                let gw_id = gw_id.to_string();
                let sink_id = rest.first().map(|s| s.to_string());
                if *prefix == REQUEST_PREFIX {
                    Ok(Topic::Request {
                        method,
                        gw_id,
                        sink_id,
                    })
                } else {
                    Ok(Topic::Response {
                        method,
                        gw_id,
                        sink_id,
                    })
                }
            }
            _ => Err(invalid()),
        }
    }

    /// Gateway the topic belongs to
    pub fn gw_id(&self) -> &str {
        match self {
            Topic::Status { gw_id }
            | Topic::ReceivedData { gw_id, .. }
            | Topic::Request { gw_id, .. }
            | Topic::Response { gw_id, .. } => gw_id,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Status { gw_id } => f.write_str(&Topics::status(gw_id)),
            Topic::ReceivedData {
                gw_id,
                sink_id,
                network_id,
                source_endpoint,
                destination_endpoint,
            } => f.write_str(&Topics::received_data(
                gw_id,
                sink_id,
                &network_id.to_string(),
                &source_endpoint.to_string(),
                &destination_endpoint.to_string(),
            )),
            Topic::Request {
                method,
                gw_id,
                sink_id,
            } => f.write_str(&Topics::request(method, gw_id, sink_id.as_deref())),
            Topic::Response {
                method,
                gw_id,
                sink_id,
            } => f.write_str(&Topics::response(method, gw_id, sink_id.as_deref())),
        }
    }
}

/// Topic builders. Any level may be an MQTT wildcard.
pub struct Topics;

impl Topics {
    pub fn status(gw_id: &str) -> String {
        format!("{}/{}/{}", EVENT_PREFIX, STATUS_EVENT, gw_id)
    }

    pub fn received_data(
        gw_id: &str,
        sink_id: &str,
        network_id: &str,
        source_endpoint: &str,
        destination_endpoint: &str,
    ) -> String {
        format!(
            "{}/{}/{}/{}/{}/{}/{}",
            EVENT_PREFIX,
            RECEIVED_DATA_EVENT,
            gw_id,
            sink_id,
            network_id,
            source_endpoint,
            destination_endpoint
        )
    }

    pub fn request(method: &str, gw_id: &str, sink_id: Option<&str>) -> String {
        with_sink(format!("{}/{}/{}", REQUEST_PREFIX, method, gw_id), sink_id)
    }

    pub fn response(method: &str, gw_id: &str, sink_id: Option<&str>) -> String {
        with_sink(format!("{}/{}/{}", RESPONSE_PREFIX, method, gw_id), sink_id)
    }
}

fn with_sink(topic: String, sink_id: Option<&str>) -> String {
    match sink_id {
        Some(sink) => format!("{}/{}", topic, sink),
        None => topic,
    }
}

/// Topic filters to subscribe to for the given settings.
///
/// A custom `mqtt_topic` is used as is; the default `#` is narrowed to the
/// gateway event topics selected by the `mqtt_subscribe_*` settings.
pub fn subscriptions(settings: &MqttSettings) -> Vec<String> {
    if settings.mqtt_topic != DEFAULT_MQTT_TOPIC {
        return vec![settings.mqtt_topic.clone()];
    }

    vec![
        Topics::received_data(
            &settings.mqtt_subscribe_gateway_id,
            &settings.mqtt_subscribe_sink_id,
            &settings.mqtt_subscribe_network_id,
            &settings.mqtt_subscribe_source_endpoint,
            &settings.mqtt_subscribe_destination_endpoint,
        ),
        Topics::status(&settings.mqtt_subscribe_gateway_id),
    ]
}
