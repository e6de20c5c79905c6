//! Gateway events decoded from MQTT publishes

pub mod proto;

use chrono::{DateTime, TimeZone, Utc};
use prost::Message;
use serde::{Serialize, Serializer};
use std::fmt;

use crate::error::{Error, Result};
use crate::mqtt::Topic;

use proto::{GenericMessage, OnOff};

/// Wirepas node address
pub type NodeAddress = u32;

/// Application classes recognised from the endpoint pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    TrafficDiagnostics,
    NeighborDiagnostics,
    NodeDiagnostics,
    BootDiagnostics,
    Advertiser,
    TestNetwork,
    Data,
}

impl MessageKind {
    pub const DIAGNOSTICS_DESTINATION: u8 = 255;

    /// Classify a packet by its source and destination endpoints
    pub fn classify(source_endpoint: u8, destination_endpoint: u8) -> Self {
        match (source_endpoint, destination_endpoint) {
            (251, Self::DIAGNOSTICS_DESTINATION) => MessageKind::TrafficDiagnostics,
            (252, Self::DIAGNOSTICS_DESTINATION) => MessageKind::NeighborDiagnostics,
            (253, Self::DIAGNOSTICS_DESTINATION) => MessageKind::NodeDiagnostics,
            (254, Self::DIAGNOSTICS_DESTINATION) => MessageKind::BootDiagnostics,
            (200, 200) => MessageKind::Advertiser,
            (10, 10) => MessageKind::TestNetwork,
            _ => MessageKind::Data,
        }
    }

    pub fn is_diagnostics(&self) -> bool {
        matches!(
            self,
            MessageKind::TrafficDiagnostics
                | MessageKind::NeighborDiagnostics
                | MessageKind::NodeDiagnostics
                | MessageKind::BootDiagnostics
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::TrafficDiagnostics => "traffic_diagnostics",
            MessageKind::NeighborDiagnostics => "neighbor_diagnostics",
            MessageKind::NodeDiagnostics => "node_diagnostics",
            MessageKind::BootDiagnostics => "boot_diagnostics",
            MessageKind::Advertiser => "advertiser",
            MessageKind::TestNetwork => "test_network",
            MessageKind::Data => "data",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A data packet forwarded by a sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceivedPacket {
    pub gw_id: String,
    pub sink_id: String,
    pub event_id: u64,
    pub network_address: u64,
    pub source_address: NodeAddress,
    pub destination_address: NodeAddress,
    pub source_endpoint: u8,
    pub destination_endpoint: u8,
    pub travel_time_ms: u32,
    pub rx_time: DateTime<Utc>,
    pub qos: Option<u32>,
    pub hop_count: Option<u32>,
    #[serde(serialize_with = "serialize_hex")]
    pub payload: Vec<u8>,
    pub kind: MessageKind,
}

/// Gateway connection state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayStatus {
    pub gw_id: String,
    pub online: bool,
    pub version: u32,
    pub event_id: u64,
    pub time: DateTime<Utc>,
}

/// Decoded gateway event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    Status(GatewayStatus),
    Packet(ReceivedPacket),
}

impl GatewayEvent {
    pub fn gw_id(&self) -> &str {
        match self {
            GatewayEvent::Status(status) => &status.gw_id,
            GatewayEvent::Packet(packet) => &packet.gw_id,
        }
    }
}

/// Decode a publish received on `topic`.
///
/// Routing information carried by the topic takes precedence over the copy
/// inside the payload.
pub fn decode(topic: &str, payload: &[u8]) -> Result<GatewayEvent> {
    let topic = Topic::parse(topic)?;
    let message = GenericMessage::decode(payload)?
        .wirepas
        .ok_or_else(|| Error::Decode("message carries no gateway content".to_string()))?;

    match topic {
        Topic::Status { gw_id } => {
            let event = message
                .status_event
                .ok_or_else(|| Error::Decode(format!("no status event for {}", gw_id)))?;

            Ok(GatewayEvent::Status(GatewayStatus {
                gw_id,
                online: event.state() == OnOff::On,
                version: event.version,
                event_id: event.header.event_id,
                time: event
                    .header
                    .time_ms_epoch
                    .and_then(from_epoch_ms)
                    .unwrap_or_else(Utc::now),
            }))
        }
        Topic::ReceivedData {
            gw_id,
            sink_id,
            network_id,
            source_endpoint,
            destination_endpoint,
        } => {
            let event = message
                .packet_received_event
                .ok_or_else(|| Error::Decode(format!("no received packet for {}", gw_id)))?;

            Ok(GatewayEvent::Packet(ReceivedPacket {
                gw_id,
                sink_id,
                event_id: event.header.event_id,
                network_address: network_id,
                source_address: event.source_address,
                destination_address: event.destination_address,
                source_endpoint,
                destination_endpoint,
                travel_time_ms: event.travel_time_ms,
                rx_time: from_epoch_ms(event.rx_time_ms_epoch).unwrap_or_else(Utc::now),
                qos: event.qos,
                hop_count: event.hop_count,
                payload: event.payload.unwrap_or_default(),
                kind: MessageKind::classify(source_endpoint, destination_endpoint),
            }))
        }
        other => Err(Error::Decode(format!(
            "topic {} does not carry a gateway event",
            other
        ))),
    }
}

fn from_epoch_ms(ms: u64) -> Option<DateTime<Utc>> {
    i64::try_from(ms)
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

/// Lowercase hex rendering of a payload
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn serialize_hex<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&to_hex(bytes))
}

#[cfg(test)]
mod tests {
    use super::proto::*;
    use super::*;

    fn header(gw_id: &str) -> EventHeader {
        EventHeader {
            gw_id: gw_id.to_string(),
            sink_id: Some("sink0".to_string()),
            event_id: 42,
            time_ms_epoch: Some(1_600_000_000_000),
        }
    }

    fn packet_payload(source: u32) -> Vec<u8> {
        GenericMessage {
            wirepas: Some(WirepasMessage {
                status_event: None,
                packet_received_event: Some(PacketReceivedEvent {
                    header: header("gw-1"),
                    source_address: source,
                    destination_address: 1,
                    source_endpoint: 1,
                    destination_endpoint: 1,
                    travel_time_ms: 15,
                    rx_time_ms_epoch: 1_600_000_000_500,
                    qos: Some(1),
                    payload: Some(vec![0xde, 0xad]),
                    payload_size: Some(2),
                    hop_count: Some(3),
                    network_address: Some(99),
                }),
            }),
        }
        .encode_to_vec()
    }

    #[test]
    fn test_classify_endpoints() {
        assert_eq!(MessageKind::classify(253, 255), MessageKind::NodeDiagnostics);
        assert_eq!(MessageKind::classify(200, 200), MessageKind::Advertiser);
        assert_eq!(MessageKind::classify(1, 1), MessageKind::Data);
        assert!(MessageKind::classify(251, 255).is_diagnostics());
        assert!(!MessageKind::classify(10, 10).is_diagnostics());
    }

    #[test]
    fn test_decode_packet_prefers_topic_routing() {
        let event = decode(
            "gw-event/received_data/gw-1/sink1/1234/252/255",
            &packet_payload(1001),
        )
        .unwrap();

        let GatewayEvent::Packet(packet) = event else {
            panic!("expected a packet");
        };
        assert_eq!(packet.source_address, 1001);
        assert_eq!(packet.sink_id, "sink1");
        assert_eq!(packet.network_address, 1234);
        assert_eq!(packet.source_endpoint, 252);
        assert_eq!(packet.kind, MessageKind::NeighborDiagnostics);
        assert_eq!(packet.rx_time.timestamp_millis(), 1_600_000_000_500);
        assert_eq!(to_hex(&packet.payload), "dead");
    }

    #[test]
    fn test_decode_status() {
        let payload = GenericMessage {
            wirepas: Some(WirepasMessage {
                status_event: Some(StatusEvent {
                    header: header("gw-2"),
                    version: 2,
                    state: OnOff::Off as i32,
                }),
                packet_received_event: None,
            }),
        }
        .encode_to_vec();

        let event = decode("gw-event/status/gw-2", &payload).unwrap();
        match event {
            GatewayEvent::Status(status) => {
                assert_eq!(status.gw_id, "gw-2");
                assert!(!status.online);
                assert_eq!(status.version, 2);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_mismatched_payload() {
        let result = decode("gw-event/status/gw-1", &packet_payload(5));
        assert!(matches!(result, Err(Error::Decode(_))));

        let result = decode("gw-event/status/gw-1", &[0xff, 0xff, 0xff]);
        assert!(result.is_err());

        let result = decode("gw-request/get_configs/gw-1", &packet_payload(5));
        assert!(matches!(result, Err(Error::Decode(_))));
    }
}
