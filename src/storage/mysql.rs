//! MySQL connection and inserts

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Connection};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::messages::{GatewayStatus, ReceivedPacket};
use crate::settings::DatabaseSettings;

use super::PacketStore;

/// A single MySQL connection
pub struct MySql {
    options: MySqlConnectOptions,
    connect_timeout: Duration,
    connection: Option<MySqlConnection>,
}

impl MySql {
    pub fn new(settings: &DatabaseSettings) -> Result<Self> {
        let missing: Vec<String> = [
            ("db_database", &settings.db_database),
            ("db_username", &settings.db_username),
            ("db_password", &settings.db_password),
        ]
        .iter()
        .filter(|(_, value)| value.is_none())
        .map(|(name, _)| name.to_string())
        .collect();
        if !missing.is_empty() {
            return Err(Error::MissingSettings(missing));
        }

        let options = MySqlConnectOptions::new()
            .host(&settings.db_hostname)
            .port(settings.db_port)
            .database(settings.db_database.as_deref().unwrap_or_default())
            .username(settings.db_username.as_deref().unwrap_or_default())
            .password(settings.db_password.as_deref().unwrap_or_default());

        Ok(Self {
            options,
            connect_timeout: Duration::from_secs(settings.db_connection_timeout),
            connection: None,
        })
    }

    /// Validate `settings` once and hand out unconnected stores sharing them
    pub fn factory(
        settings: &DatabaseSettings,
    ) -> Result<impl Fn() -> Self + Send + Sync + 'static> {
        let Self {
            options,
            connect_timeout,
            ..
        } = Self::new(settings)?;

        Ok(move || Self {
            options: options.clone(),
            connect_timeout,
            connection: None,
        })
    }

    fn connection(&mut self) -> Result<&mut MySqlConnection> {
        self.connection
            .as_mut()
            .ok_or_else(|| Error::Config("database connection is not open".to_string()))
    }

    async fn create_tables(&mut self) -> Result<()> {
        let conn = self.connection()?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS received_packets (
                id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
                logged_time TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
                gw_id VARCHAR(64) NOT NULL,
                sink_id VARCHAR(64) NOT NULL,
                event_id BIGINT UNSIGNED NOT NULL,
                network_address BIGINT UNSIGNED NOT NULL,
                source_address INT UNSIGNED NOT NULL,
                destination_address INT UNSIGNED NOT NULL,
                source_endpoint TINYINT UNSIGNED NOT NULL,
                destination_endpoint TINYINT UNSIGNED NOT NULL,
                travel_time_ms INT UNSIGNED NOT NULL,
                rx_time DATETIME(3) NOT NULL,
                qos INT UNSIGNED NULL,
                hop_count INT UNSIGNED NULL,
                payload BLOB NOT NULL,
                INDEX idx_received_packets_source (source_address),
                INDEX idx_received_packets_rx_time (rx_time)
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS diagnostics (
                id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
                logged_time TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
                kind VARCHAR(32) NOT NULL,
                gw_id VARCHAR(64) NOT NULL,
                sink_id VARCHAR(64) NOT NULL,
                network_address BIGINT UNSIGNED NOT NULL,
                source_address INT UNSIGNED NOT NULL,
                travel_time_ms INT UNSIGNED NOT NULL,
                rx_time DATETIME(3) NOT NULL,
                payload BLOB NOT NULL,
                INDEX idx_diagnostics_kind (kind, source_address)
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS gateway_status (
                id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
                logged_time TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
                gw_id VARCHAR(64) NOT NULL,
                online BOOLEAN NOT NULL,
                version INT UNSIGNED NOT NULL,
                event_id BIGINT UNSIGNED NOT NULL,
                event_time DATETIME(3) NOT NULL,
                INDEX idx_gateway_status_gw (gw_id)
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        tracing::debug!("Database tables are in place");
        Ok(())
    }
}

#[async_trait]
impl PacketStore for MySql {
    async fn connect(&mut self, create_tables: bool) -> Result<()> {
        let connection = tokio::time::timeout(self.connect_timeout, self.options.connect())
            .await
            .map_err(|_| {
                Error::Database(sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "timed out connecting to MySQL",
                )))
            })??;
        self.connection = Some(connection);

        if create_tables {
            self.create_tables().await?;
        }
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        self.connection()?.ping().await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                tracing::debug!("Error closing MySQL connection: {}", e);
            }
        }
    }

    async fn put_received_packet(&mut self, packet: &ReceivedPacket) -> Result<()> {
        let conn = self.connection()?;
        sqlx::query(
            r#"
            INSERT INTO received_packets (
                gw_id, sink_id, event_id, network_address, source_address,
                destination_address, source_endpoint, destination_endpoint,
                travel_time_ms, rx_time, qos, hop_count, payload
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&packet.gw_id)
        .bind(&packet.sink_id)
        .bind(packet.event_id)
        .bind(packet.network_address)
        .bind(packet.source_address)
        .bind(packet.destination_address)
        .bind(packet.source_endpoint)
        .bind(packet.destination_endpoint)
        .bind(packet.travel_time_ms)
        .bind(packet.rx_time)
        .bind(packet.qos)
        .bind(packet.hop_count)
        .bind(&packet.payload)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn put_diagnostics(&mut self, packet: &ReceivedPacket) -> Result<()> {
        let conn = self.connection()?;
        sqlx::query(
            r#"
            INSERT INTO diagnostics (
                kind, gw_id, sink_id, network_address, source_address,
                travel_time_ms, rx_time, payload
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(packet.kind.as_str())
        .bind(&packet.gw_id)
        .bind(&packet.sink_id)
        .bind(packet.network_address)
        .bind(packet.source_address)
        .bind(packet.travel_time_ms)
        .bind(packet.rx_time)
        .bind(&packet.payload)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn put_gateway_status(&mut self, status: &GatewayStatus) -> Result<()> {
        let conn = self.connection()?;
        sqlx::query(
            r#"
            INSERT INTO gateway_status (gw_id, online, version, event_id, event_time)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&status.gw_id)
        .bind(status.online)
        .bind(status.version)
        .bind(status.event_id)
        .bind(status.time)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}
