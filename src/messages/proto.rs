//! Protobuf envelope of the Wirepas gateway API
//!
//! Only the event messages consumed by the client are declared. Unknown
//! fields are skipped by the decoder, so newer gateways stay compatible.

#[derive(Clone, PartialEq, prost::Message)]
pub struct GenericMessage {
    #[prost(message, optional, tag = "1")]
    pub wirepas: Option<WirepasMessage>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WirepasMessage {
    #[prost(message, optional, tag = "1")]
    pub status_event: Option<StatusEvent>,

    #[prost(message, optional, tag = "8")]
    pub packet_received_event: Option<PacketReceivedEvent>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EventHeader {
    #[prost(string, required, tag = "1")]
    pub gw_id: String,

    #[prost(string, optional, tag = "2")]
    pub sink_id: Option<String>,

    #[prost(uint64, required, tag = "3")]
    pub event_id: u64,

    #[prost(uint64, optional, tag = "4")]
    pub time_ms_epoch: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum OnOff {
    On = 0,
    Off = 1,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StatusEvent {
    #[prost(message, required, tag = "1")]
    pub header: EventHeader,

    #[prost(uint32, required, tag = "2")]
    pub version: u32,

    #[prost(enumeration = "OnOff", required, tag = "3")]
    pub state: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PacketReceivedEvent {
    #[prost(message, required, tag = "1")]
    pub header: EventHeader,

    #[prost(uint32, required, tag = "2")]
    pub source_address: u32,

    #[prost(uint32, required, tag = "3")]
    pub destination_address: u32,

    #[prost(uint32, required, tag = "4")]
    pub source_endpoint: u32,

    #[prost(uint32, required, tag = "5")]
    pub destination_endpoint: u32,

    #[prost(uint32, required, tag = "6")]
    pub travel_time_ms: u32,

    #[prost(uint64, required, tag = "7")]
    pub rx_time_ms_epoch: u64,

    #[prost(uint32, optional, tag = "8")]
    pub qos: Option<u32>,

    #[prost(bytes = "vec", optional, tag = "9")]
    pub payload: Option<Vec<u8>>,

    #[prost(uint32, optional, tag = "10")]
    pub payload_size: Option<u32>,

    #[prost(uint32, optional, tag = "11")]
    pub hop_count: Option<u32>,

    #[prost(uint64, optional, tag = "12")]
    pub network_address: Option<u64>,
}
