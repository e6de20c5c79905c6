//! MQTT broker connection and gateway event observer

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use std::fs;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::messages::{self, GatewayEvent};
use crate::settings::MqttSettings;
use crate::shutdown::ShutdownListener;

use super::topics::subscriptions;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 32;
const MAX_PACKET_SIZE: usize = 256 * 1024;

/// Build the client options for the configured broker
pub fn mqtt_options(settings: &MqttSettings) -> Result<MqttOptions> {
    let hostname = settings
        .mqtt_hostname
        .clone()
        .ok_or_else(|| Error::MissingSettings(vec!["mqtt_hostname".to_string()]))?;

    let client_id = format!("wm-gw-cli-{}", uuid::Uuid::new_v4().simple());
    let mut options = MqttOptions::new(client_id, hostname, settings.mqtt_port);
    options
        .set_keep_alive(KEEP_ALIVE)
        .set_clean_session(!settings.mqtt_persist_session)
        .set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

    if let Some(username) = &settings.mqtt_username {
        options.set_credentials(
            username.clone(),
            settings.mqtt_password.clone().unwrap_or_default(),
        );
    }

    if settings.mqtt_force_unsecure {
        debug!("TLS disabled for the MQTT connection");
    } else {
        options.set_transport(tls_transport(settings)?);
    }

    Ok(options)
}

fn tls_transport(settings: &MqttSettings) -> Result<Transport> {
    if settings.mqtt_allow_untrusted {
        warn!("mqtt_allow_untrusted is not supported, the broker certificate is still verified");
    }

    let client_auth = match (&settings.mqtt_certfile, &settings.mqtt_keyfile) {
        (Some(cert), Some(key)) => Some((fs::read(cert)?, fs::read(key)?)),
        (None, None) => None,
        _ => {
            return Err(Error::Config(
                "mqtt_certfile and mqtt_keyfile must be given together".to_string(),
            ))
        }
    };

    match &settings.mqtt_ca_certs {
        Some(ca) => Ok(Transport::tls_with_config(TlsConfiguration::Simple {
            ca: fs::read(ca)?,
            alpn: None,
            client_auth,
        })),
        None if client_auth.is_some() => Err(Error::Config(
            "client certificates require mqtt_ca_certs".to_string(),
        )),
        None => Ok(Transport::tls_with_default_config()),
    }
}

/// Subscribes to the gateway topics and forwards decoded events
pub struct MqttObserver {
    settings: MqttSettings,
    topics: Vec<String>,
}

impl MqttObserver {
    pub fn new(settings: MqttSettings) -> Self {
        let topics = subscriptions(&settings);
        Self { settings, topics }
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Run until shutdown or until the receiving side of `tx` is gone
    pub async fn run(
        self,
        tx: mpsc::Sender<GatewayEvent>,
        mut shutdown: ShutdownListener,
    ) -> Result<()> {
        let options = mqtt_options(&self.settings)?;
        info!(
            "Connecting to MQTT broker {}:{}",
            options.broker_address().0,
            options.broker_address().1
        );

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        loop {
            if shutdown.is_triggered() {
                break;
            }

            tokio::select! {
                _ = shutdown.wait() => break,
                polled = eventloop.poll() => match polled {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected, subscribing to {:?}", self.topics);
                        for topic in &self.topics {
                            client.try_subscribe(topic.clone(), QoS::AtLeastOnce)?;
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        match messages::decode(&publish.topic, &publish.payload) {
                            Ok(event) => tokio::select! {
                                _ = shutdown.wait() => break,
                                sent = tx.send(event) => {
                                    if sent.is_err() {
                                        debug!("Event receiver closed");
                                        break;
                                    }
                                }
                            },
                            Err(e) => debug!(topic = %publish.topic, "Skipping message: {}", e),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT connection error: {}", e);
                        tokio::select! {
                            _ = shutdown.wait() => break,
                            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                        }
                    }
                }
            }
        }

        if let Err(e) = client.try_disconnect() {
            debug!("Disconnect request failed: {}", e);
        }
        info!("MQTT observer stopped");
        Ok(())
    }
}
