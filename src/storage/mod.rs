//! Persistence of gateway events

mod mysql;
mod observer;

pub use mysql::MySql;
pub use observer::StorageObserver;

use async_trait::async_trait;

use crate::error::Result;
use crate::messages::{GatewayEvent, GatewayStatus, ReceivedPacket};

/// A connection able to persist gateway events
#[async_trait]
pub trait PacketStore: Send + 'static {
    /// Open the connection, optionally creating the schema
    async fn connect(&mut self, create_tables: bool) -> Result<()>;

    /// Check that the connection is still usable
    async fn ping(&mut self) -> Result<()>;

    async fn close(&mut self);

    async fn put_received_packet(&mut self, packet: &ReceivedPacket) -> Result<()>;

    async fn put_diagnostics(&mut self, packet: &ReceivedPacket) -> Result<()>;

    async fn put_gateway_status(&mut self, status: &GatewayStatus) -> Result<()>;
}

/// Insert an event into every table it belongs to
pub async fn store_event<S: PacketStore + ?Sized>(store: &mut S, event: &GatewayEvent) -> Result<()> {
    match event {
        GatewayEvent::Packet(packet) => {
            store.put_received_packet(packet).await?;
            if packet.kind.is_diagnostics() {
                store.put_diagnostics(packet).await?;
            }
        }
        GatewayEvent::Status(status) => store.put_gateway_status(status).await?,
    }
    Ok(())
}
