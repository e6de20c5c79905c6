use criterion::{black_box, criterion_group, criterion_main, Criterion};
use prost::Message;
use wm_gw_cli::messages::proto::{EventHeader, GenericMessage, PacketReceivedEvent, WirepasMessage};
use wm_gw_cli::messages::{decode, MessageKind};
use wm_gw_cli::mqtt::{subscriptions, Topic};
use wm_gw_cli::settings::MqttSettings;

const DATA_TOPIC: &str = "gw-event/received_data/gw-1/sink0/4660/253/255";

fn packet_payload() -> Vec<u8> {
    GenericMessage {
        wirepas: Some(WirepasMessage {
            status_event: None,
            packet_received_event: Some(PacketReceivedEvent {
                header: EventHeader {
                    gw_id: "gw-1".to_string(),
                    sink_id: Some("sink0".to_string()),
                    event_id: 1,
                    time_ms_epoch: Some(1_700_000_000_000),
                },
                source_address: 1001,
                destination_address: 1,
                source_endpoint: 253,
                destination_endpoint: 255,
                travel_time_ms: 20,
                rx_time_ms_epoch: 1_700_000_000_000,
                qos: Some(1),
                payload: Some(vec![0u8; 64]),
                payload_size: Some(64),
                hop_count: Some(2),
                network_address: Some(4660),
            }),
        }),
    }
    .encode_to_vec()
}

fn bench_topic_parsing(c: &mut Criterion) {
    c.bench_function("topic_parse_received_data", |b| {
        b.iter(|| Topic::parse(black_box(DATA_TOPIC)))
    });

    c.bench_function("topic_parse_status", |b| {
        b.iter(|| Topic::parse(black_box("gw-event/status/gw-1")))
    });

    let settings = MqttSettings::default();
    c.bench_function("topic_subscriptions", |b| {
        b.iter(|| subscriptions(black_box(&settings)))
    });
}

fn bench_event_decoding(c: &mut Criterion) {
    let payload = packet_payload();

    c.bench_function("decode_received_packet", |b| {
        b.iter(|| decode(black_box(DATA_TOPIC), black_box(&payload)))
    });

    c.bench_function("classify_endpoints", |b| {
        b.iter(|| MessageKind::classify(black_box(253), black_box(255)))
    });
}

criterion_group!(benches, bench_topic_parsing, bench_event_decoding);
criterion_main!(benches);
