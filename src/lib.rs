//! wm-gw-cli - Wirepas gateway backend client
//!
//! This is the library interface for wm-gw-cli: layered settings, the
//! gateway MQTT topic scheme and event decoding, MySQL storage and the node
//! inventory KPI.

pub mod cli;
pub mod error;
pub mod inventory;
pub mod messages;
pub mod mqtt;
pub mod settings;
pub mod shutdown;
pub mod storage;

pub use error::Error;
pub use inventory::Inventory;
pub use messages::GatewayEvent;
pub use settings::Settings;
pub use shutdown::Shutdown;
