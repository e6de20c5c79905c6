//! MySQL storage integration tests
//!
//! Run with: cargo test --test storage_tests
//! Note: tests marked #[ignore] need a MySQL server configured through the
//! WM_SERVICES_MYSQL_* environment variables

use chrono::Utc;
use wm_gw_cli::messages::{GatewayEvent, GatewayStatus, MessageKind, ReceivedPacket};
use wm_gw_cli::settings::{DatabaseSettings, Settings};
use wm_gw_cli::storage::{store_event, MySql, PacketStore};

fn database_settings() -> DatabaseSettings {
    let (settings, _) = Settings::load(["wm-gw-cli"]).unwrap();
    settings.database
}

#[test]
fn test_mysql_requires_credentials() {
    let settings = DatabaseSettings {
        db_database: Some("wirepas".to_string()),
        db_username: Some("wirepas".to_string()),
        ..DatabaseSettings::default()
    };

    match MySql::new(&settings) {
        Err(wm_gw_cli::Error::MissingSettings(missing)) => {
            assert_eq!(missing, vec!["db_password".to_string()]);
        }
        _ => panic!("expected missing db_password"),
    }
    println!("✓ MySQL store refuses incomplete credentials");
}

#[tokio::test]
async fn test_unreachable_database_fails_fast() {
    let settings = DatabaseSettings {
        db_hostname: "127.0.0.1".to_string(),
        db_port: 1,
        db_database: Some("wirepas".to_string()),
        db_username: Some("wirepas".to_string()),
        db_password: Some("wirepas".to_string()),
        db_connection_timeout: 2,
    };

    let mut store = MySql::new(&settings).unwrap();
    assert!(store.connect(false).await.is_err());
    println!("✓ Unreachable database reports an error");
}

#[tokio::test]
#[ignore]
async fn test_store_events_in_live_database() {
    let mut store = MySql::new(&database_settings()).unwrap();
    store.connect(true).await.unwrap();
    store.ping().await.unwrap();

    let packet = ReceivedPacket {
        gw_id: "it-gw".to_string(),
        sink_id: "sink0".to_string(),
        event_id: 1,
        network_address: 0x1234,
        source_address: 42,
        destination_address: 1,
        source_endpoint: 253,
        destination_endpoint: 255,
        travel_time_ms: 12,
        rx_time: Utc::now(),
        qos: Some(0),
        hop_count: Some(1),
        payload: vec![0xca, 0xfe],
        kind: MessageKind::classify(253, 255),
    };
    store_event(&mut store, &GatewayEvent::Packet(packet)).await.unwrap();

    let status = GatewayStatus {
        gw_id: "it-gw".to_string(),
        online: true,
        version: 2,
        event_id: 2,
        time: Utc::now(),
    };
    store_event(&mut store, &GatewayEvent::Status(status)).await.unwrap();

    store.close().await;
    println!("✓ Events stored in the live database");
}
