//! Settings management for wm-gw-cli

pub mod loader;
mod schema;
mod seed;

pub use loader::{interpolate_env_vars, load_matches, SettingsSource};
pub use schema::*;
pub use seed::{default_settings_content, seed_settings};
