//! CLI command implementations

use anyhow::Result;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cli::{
    error, format_event, info, print_gateway_table, print_inventory_table, success, warn,
    Commands, EventFormat, OutputFormat,
};
use crate::inventory;
use crate::messages::{GatewayEvent, GatewayStatus};
use crate::mqtt::MqttObserver;
use crate::settings::{seed_settings, Settings};
use crate::shutdown::Shutdown;
use crate::storage::{MySql, StorageObserver};

/// Queue between the MQTT observer and its consumer
const EVENT_QUEUE_SIZE: usize = 1024;

/// Refuse to run `command` while one of its mandatory settings is unset
pub fn check_settings(settings: &Settings, command: &Commands) -> Result<()> {
    let required = command.required_settings();
    let missing = settings.sanity(required);
    if missing.is_empty() {
        return Ok(());
    }

    error(&format!("Missing mandatory settings: {}", missing.join(", ")));
    eprint!("{}", settings.describe(required, None));
    Err(crate::error::Error::MissingSettings(missing).into())
}

/// Write the default settings file
pub async fn init(settings: &Settings, force: bool) -> Result<()> {
    let Some(path) = &settings.framework.settings else {
        anyhow::bail!("init needs --settings <path>");
    };

    if seed_settings(path, force)? {
        success(&format!("Created {}", path.display()));
        info("Edit the settings file and run 'wm-gw-cli --settings <path>' to start listening");
    } else {
        warn(&format!(
            "{} already exists, use --force to overwrite it",
            path.display()
        ));
    }

    Ok(())
}

/// Print or dump the resolved settings
pub async fn show_settings(settings: &Settings, dump: Option<&std::path::Path>) -> Result<()> {
    match dump {
        Some(path) => {
            settings.dump(path)?;
            success(&format!("Settings written to {}", path.display()));
        }
        None => print!("{}", settings),
    }
    Ok(())
}

/// Print gateway events until interrupted
pub async fn listen(settings: &Settings, format: EventFormat) -> Result<()> {
    let shutdown = Shutdown::new();
    shutdown.trigger_on_ctrl_c();

    let (mut rx, observer) = spawn_observer(settings, &shutdown);
    let mut listener = shutdown.listener();

    loop {
        let event = tokio::select! {
            _ = listener.wait() => break,
            event = rx.recv() => event,
        };
        let Some(event) = event else {
            break;
        };

        match format {
            EventFormat::Text => println!("{}", format_event(&event)),
            EventFormat::Json => println!("{}", serde_json::to_string(&event)?),
        }
    }

    shutdown.trigger();
    drop(rx);
    join_observer(observer).await
}

/// Collect gateway states for `duration` seconds and print them
pub async fn gateways(settings: &Settings, format: OutputFormat) -> Result<()> {
    let shutdown = Shutdown::new();
    shutdown.trigger_on_ctrl_c();

    let (mut rx, observer) = spawn_observer(settings, &shutdown);
    let mut listener = shutdown.listener();
    let deadline = tokio::time::sleep(Duration::from_secs(settings.test.duration));
    tokio::pin!(deadline);

    info(&format!(
        "Collecting gateway status for {} seconds",
        settings.test.duration
    ));

    let mut gateways: BTreeMap<String, GatewayStatus> = BTreeMap::new();
    loop {
        tokio::select! {
            _ = listener.wait() => break,
            _ = &mut deadline => break,
            event = rx.recv() => match event {
                Some(GatewayEvent::Status(status)) => {
                    gateways.insert(status.gw_id.clone(), status);
                }
                Some(GatewayEvent::Packet(_)) => {}
                None => break,
            },
        }
    }

    shutdown.trigger();
    drop(rx);
    join_observer(observer).await?;

    let gateways: Vec<GatewayStatus> = gateways.into_values().collect();
    match format {
        OutputFormat::Table => print_gateway_table(&gateways),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&gateways)?),
        OutputFormat::Yaml => println!("{}", serde_yaml::to_string(&gateways)?),
    }

    Ok(())
}

/// Store gateway events into MySQL until interrupted or a worker dies
pub async fn store(settings: &Settings, workers: usize) -> Result<()> {
    let factory = MySql::factory(&settings.database)?;

    let shutdown = Shutdown::new();
    shutdown.trigger_on_ctrl_c();

    let (rx, observer) = spawn_observer(settings, &shutdown);

    let storage = StorageObserver::new(factory, workers)
        .with_heartbeat(Duration::from_secs(settings.framework.heartbeat.max(1)));
    let stored = storage.run(rx, shutdown.clone()).await;

    shutdown.trigger();
    join_observer(observer).await?;
    stored?;

    success("Storage stopped");
    Ok(())
}

/// Run the inventory rounds on the received packets
pub async fn inventory(settings: &Settings) -> Result<()> {
    let shutdown = Shutdown::new();
    shutdown.trigger_on_ctrl_c();

    let (mut rx, observer) = spawn_observer(settings, &shutdown);
    let reports = inventory::run_inventory(&settings.test, &mut rx, shutdown.listener()).await;

    shutdown.trigger();
    drop(rx);
    join_observer(observer).await?;

    print_inventory_table(&reports?);
    Ok(())
}

// Helper functions

fn spawn_observer(
    settings: &Settings,
    shutdown: &Shutdown,
) -> (
    mpsc::Receiver<GatewayEvent>,
    JoinHandle<crate::error::Result<()>>,
) {
    let (tx, rx) = mpsc::channel(EVENT_QUEUE_SIZE);
    let observer = MqttObserver::new(settings.mqtt.clone());
    tracing::debug!("Subscribing to {:?}", observer.topics());

    let handle = tokio::spawn(observer.run(tx, shutdown.listener()));
    (rx, handle)
}

async fn join_observer(handle: JoinHandle<crate::error::Result<()>>) -> Result<()> {
    handle.await??;
    Ok(())
}
