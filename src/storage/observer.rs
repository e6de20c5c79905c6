//! Storage workers draining the gateway event queue
//!
//! The main connection creates the schema, then either drains the queue
//! itself or hands it to a pool of workers that each own a connection. A
//! supervisor checks the workers every heartbeat and stops everything as
//! soon as one of them dies.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::messages::GatewayEvent;
use crate::shutdown::{Shutdown, ShutdownListener};

use super::{store_event, PacketStore};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(10);

type Queue = Arc<Mutex<mpsc::Receiver<GatewayEvent>>>;

/// Drains gateway events into a [`PacketStore`]
pub struct StorageObserver<S, F>
where
    S: PacketStore,
    F: Fn() -> S + Send + Sync + 'static,
{
    factory: F,
    workers: usize,
    heartbeat: Duration,
    reconnect_delay: Duration,
}

impl<S, F> StorageObserver<S, F>
where
    S: PacketStore,
    F: Fn() -> S + Send + Sync + 'static,
{
    /// `factory` creates one unconnected store per connection
    pub fn new(factory: F, workers: usize) -> Self {
        Self {
            factory,
            workers: workers.max(1),
            heartbeat: DEFAULT_HEARTBEAT,
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Run until shutdown or until the queue is closed and drained
    pub async fn run(self, rx: mpsc::Receiver<GatewayEvent>, shutdown: Shutdown) -> Result<()> {
        let mut main = (self.factory)();
        if let Err(e) = main.connect(true).await {
            error!("Error connecting to database: {}", e);
            shutdown.trigger();
            return Err(e);
        }

        let queue: Queue = Arc::new(Mutex::new(rx));

        if self.workers == 1 {
            info!("Starting single threaded storage");
            let result = consume(0, &mut main, queue, shutdown, self.reconnect_delay).await;
            main.close().await;
            return result;
        }

        info!("Starting parallel storage. Number of workers is {}", self.workers);
        let factory = Arc::new(self.factory);
        let mut handles = Vec::with_capacity(self.workers);
        for id in 1..=self.workers {
            let factory = factory.clone();
            let queue = queue.clone();
            let shutdown = shutdown.clone();
            let reconnect_delay = self.reconnect_delay;
            let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
                let mut store = (*factory)();
                store.connect(false).await?;
                info!(worker = id, "Starting storage worker");
                let result = consume(id, &mut store, queue, shutdown, reconnect_delay).await;
                store.close().await;
                warn!(worker = id, "Exiting storage worker");
                result
            });
            handles.push((id, handle));
        }

        supervise(handles, self.heartbeat, &shutdown).await;
        main.close().await;
        Ok(())
    }
}

/// Drain the queue into `store` until shutdown or until the queue is closed
async fn consume<S: PacketStore>(
    id: usize,
    store: &mut S,
    queue: Queue,
    shutdown: Shutdown,
    reconnect_delay: Duration,
) -> Result<()> {
    let mut listener = shutdown.listener();

    loop {
        let event = {
            let mut rx = queue.lock().await;
            tokio::select! {
                _ = listener.wait() => None,
                event = rx.recv() => event,
            }
        };

        let Some(event) = event else {
            break;
        };

        if let Err(e) = store.ping().await {
            warn!(worker = id, "Database connection lost: {}", e);
            if !reconnect(id, store, &mut listener, reconnect_delay).await {
                break;
            }
        }

        if let Err(e) = store_event(store, &event).await {
            warn!(
                worker = id,
                gw_id = event.gw_id(),
                "Failed to store event, reconnecting: {}",
                e
            );
            if !reconnect(id, store, &mut listener, reconnect_delay).await {
                break;
            }
            if let Err(e) = store_event(store, &event).await {
                error!(worker = id, gw_id = event.gw_id(), "Failed to store event: {}", e);
            }
        }
    }

    Ok(())
}

/// Reopen the connection of `store`, retrying until it succeeds.
///
/// Returns `false` when shutdown was requested first.
async fn reconnect<S: PacketStore>(
    id: usize,
    store: &mut S,
    listener: &mut ShutdownListener,
    reconnect_delay: Duration,
) -> bool {
    store.close().await;

    while !listener.is_triggered() {
        match store.connect(false).await {
            Ok(()) => {
                info!(worker = id, "Database connection restored");
                return true;
            }
            Err(e) => {
                error!(worker = id, "Database connection restart failed: {}", e);
                tokio::select! {
                    _ = listener.wait() => {}
                    _ = tokio::time::sleep(reconnect_delay) => {}
                }
            }
        }
    }
    false
}

/// Watch the workers every `heartbeat`, stopping everything when one dies
async fn supervise(handles: Vec<(usize, JoinHandle<Result<()>>)>, heartbeat: Duration, shutdown: &Shutdown) {
    let mut listener = shutdown.listener();

    loop {
        tokio::select! {
            _ = listener.wait() => break,
            _ = tokio::time::sleep(heartbeat) => {}
        }

        debug!("Storage is running with {} workers", handles.len());
        if let Some((id, _)) = handles.iter().find(|(_, handle)| handle.is_finished()) {
            error!("Storage worker {} has stopped. Exiting", id);
            shutdown.trigger();
            break;
        }
    }

    for (id, handle) in handles {
        match handle.await {
            Ok(Ok(())) => debug!(worker = id, "Storage worker finished"),
            Ok(Err(e)) => error!(worker = id, "Storage worker failed: {}", e),
            Err(e) => error!(worker = id, "Storage worker panicked: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::messages::{GatewayStatus, MessageKind, ReceivedPacket};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn lost(message: &str) -> Error {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionAborted,
            message.to_string(),
        ))
    }

    #[derive(Default)]
    struct Journal {
        rows: StdMutex<Vec<String>>,
        connects: AtomicUsize,
        failed_pings: AtomicUsize,
        failed_inserts: AtomicUsize,
    }

    struct MemoryStore {
        journal: Arc<Journal>,
        fail_connect: bool,
    }

    #[async_trait]
    impl PacketStore for MemoryStore {
        async fn connect(&mut self, _create_tables: bool) -> Result<()> {
            if self.fail_connect {
                return Err(lost("connection refused"));
            }
            self.journal.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn ping(&mut self) -> Result<()> {
            if self.journal.failed_pings.load(Ordering::SeqCst) > 0 {
                self.journal.failed_pings.fetch_sub(1, Ordering::SeqCst);
                return Err(lost("gone away"));
            }
            Ok(())
        }

        async fn close(&mut self) {}

        async fn put_received_packet(&mut self, packet: &ReceivedPacket) -> Result<()> {
            if self.journal.failed_inserts.load(Ordering::SeqCst) > 0 {
                self.journal.failed_inserts.fetch_sub(1, Ordering::SeqCst);
                return Err(lost("lost connection during query"));
            }
            self.journal
                .rows
                .lock()
                .unwrap()
                .push(format!("packet:{}", packet.source_address));
            Ok(())
        }

        async fn put_diagnostics(&mut self, packet: &ReceivedPacket) -> Result<()> {
            self.journal
                .rows
                .lock()
                .unwrap()
                .push(format!("{}:{}", packet.kind, packet.source_address));
            Ok(())
        }

        async fn put_gateway_status(&mut self, status: &GatewayStatus) -> Result<()> {
            self.journal
                .rows
                .lock()
                .unwrap()
                .push(format!("status:{}", status.gw_id));
            Ok(())
        }
    }

    fn packet(source_address: u32, source_endpoint: u8, destination_endpoint: u8) -> GatewayEvent {
        GatewayEvent::Packet(ReceivedPacket {
            gw_id: "gw-1".to_string(),
            sink_id: "sink0".to_string(),
            event_id: 1,
            network_address: 1,
            source_address,
            destination_address: 1,
            source_endpoint,
            destination_endpoint,
            travel_time_ms: 10,
            rx_time: Utc::now(),
            qos: None,
            hop_count: None,
            payload: vec![1, 2, 3],
            kind: MessageKind::classify(source_endpoint, destination_endpoint),
        })
    }

    fn status() -> GatewayEvent {
        GatewayEvent::Status(GatewayStatus {
            gw_id: "gw-1".to_string(),
            online: true,
            version: 2,
            event_id: 7,
            time: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_single_worker_stores_every_event() {
        let journal = Arc::new(Journal::default());
        let factory_journal = journal.clone();
        let observer = StorageObserver::new(
            move || MemoryStore {
                journal: factory_journal.clone(),
                fail_connect: false,
            },
            1,
        );

        let (tx, rx) = mpsc::channel(8);
        tx.send(packet(10, 1, 1)).await.unwrap();
        tx.send(packet(11, 253, 255)).await.unwrap();
        tx.send(status()).await.unwrap();
        drop(tx);

        observer.run(rx, Shutdown::new()).await.unwrap();

        let rows = journal.rows.lock().unwrap().clone();
        assert_eq!(
            rows,
            vec!["packet:10", "packet:11", "node_diagnostics:11", "status:gw-1"]
        );
    }

    #[tokio::test]
    async fn test_worker_reconnects_after_failed_ping() {
        let journal = Arc::new(Journal::default());
        journal.failed_pings.store(1, Ordering::SeqCst);
        let factory_journal = journal.clone();
        let observer = StorageObserver::new(
            move || MemoryStore {
                journal: factory_journal.clone(),
                fail_connect: false,
            },
            1,
        )
        .with_reconnect_delay(Duration::from_millis(1));

        let (tx, rx) = mpsc::channel(8);
        tx.send(packet(20, 1, 1)).await.unwrap();
        drop(tx);

        observer.run(rx, Shutdown::new()).await.unwrap();

        assert_eq!(journal.connects.load(Ordering::SeqCst), 2);
        assert_eq!(journal.rows.lock().unwrap().as_slice(), ["packet:20"]);
    }

    #[tokio::test]
    async fn test_failed_insert_is_retried_after_reconnect() {
        let journal = Arc::new(Journal::default());
        journal.failed_inserts.store(1, Ordering::SeqCst);
        let factory_journal = journal.clone();
        let observer = StorageObserver::new(
            move || MemoryStore {
                journal: factory_journal.clone(),
                fail_connect: false,
            },
            1,
        )
        .with_reconnect_delay(Duration::from_millis(1));

        let (tx, rx) = mpsc::channel(8);
        tx.send(packet(30, 1, 1)).await.unwrap();
        tx.send(packet(31, 1, 1)).await.unwrap();
        drop(tx);

        observer.run(rx, Shutdown::new()).await.unwrap();

        assert_eq!(journal.connects.load(Ordering::SeqCst), 2);
        assert_eq!(
            journal.rows.lock().unwrap().as_slice(),
            ["packet:30", "packet:31"]
        );
    }

    #[tokio::test]
    async fn test_event_dropped_when_retry_fails() {
        let journal = Arc::new(Journal::default());
        journal.failed_inserts.store(2, Ordering::SeqCst);
        let factory_journal = journal.clone();
        let observer = StorageObserver::new(
            move || MemoryStore {
                journal: factory_journal.clone(),
                fail_connect: false,
            },
            1,
        )
        .with_reconnect_delay(Duration::from_millis(1));

        let (tx, rx) = mpsc::channel(8);
        tx.send(packet(40, 1, 1)).await.unwrap();
        tx.send(packet(41, 1, 1)).await.unwrap();
        drop(tx);

        observer.run(rx, Shutdown::new()).await.unwrap();

        assert_eq!(journal.rows.lock().unwrap().as_slice(), ["packet:41"]);
    }

    #[tokio::test]
    async fn test_pool_drains_queue_and_stops_when_workers_finish() {
        let journal = Arc::new(Journal::default());
        let factory_journal = journal.clone();
        let observer = StorageObserver::new(
            move || MemoryStore {
                journal: factory_journal.clone(),
                fail_connect: false,
            },
            3,
        )
        .with_heartbeat(Duration::from_millis(10));

        let (tx, rx) = mpsc::channel(16);
        for address in 0..10 {
            tx.send(packet(address, 1, 1)).await.unwrap();
        }
        drop(tx);

        let shutdown = Shutdown::new();
        tokio::time::timeout(Duration::from_secs(5), observer.run(rx, shutdown.clone()))
            .await
            .expect("storage should stop once the queue is closed")
            .unwrap();

        assert!(shutdown.is_triggered());
        assert_eq!(journal.rows.lock().unwrap().len(), 10);
        // main connection plus one per worker
        assert_eq!(journal.connects.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_main_connection_failure_triggers_shutdown() {
        let observer = StorageObserver::new(
            || MemoryStore {
                journal: Arc::new(Journal::default()),
                fail_connect: true,
            },
            2,
        );

        let (_tx, rx) = mpsc::channel(1);
        let shutdown = Shutdown::new();
        assert!(observer.run(rx, shutdown.clone()).await.is_err());
        assert!(shutdown.is_triggered());
    }
}
