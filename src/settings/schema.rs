//! Settings schema definitions
//!
//! Every field is a command-line flag with an environment variable fallback.
//! Field names double as the keys accepted in the YAML settings file, so they
//! keep the `group_name` spelling used by existing deployments.

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, Command, FromArgMatches};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

use crate::error::{Error, Result};

use super::loader::{load_matches, SettingsSource};

pub const DEFAULT_HEARTBEAT: u64 = 10;
pub const DEFAULT_MQTT_PORT: u16 = 8883;
pub const DEFAULT_MQTT_TOPIC: &str = "#";
pub const WILDCARD: &str = "+";
pub const DEFAULT_DB_HOSTNAME: &str = "127.0.0.1";
pub const DEFAULT_DB_PORT: u16 = 3306;
pub const DEFAULT_DB_CONNECTION_TIMEOUT: u64 = 1200;
pub const DEFAULT_TEST_DURATION: u64 = 10;
pub const DEFAULT_TEST_NODES: &str = "./nodes.txt";

/// Placeholder shown instead of secrets
const REDACTED: &str = "password_is_set";

/// All settings understood by `wm-gw-cli`
#[derive(Debug, Clone, Default, Args, Serialize, Deserialize)]
pub struct Settings {
    #[command(flatten)]
    #[serde(flatten)]
    pub framework: FrameworkSettings,

    #[command(flatten)]
    #[serde(flatten)]
    pub mqtt: MqttSettings,

    #[command(flatten)]
    #[serde(flatten)]
    pub database: DatabaseSettings,

    #[command(flatten)]
    #[serde(flatten)]
    pub test: TestSettings,
}

/// Client operation settings
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
#[command(next_help_heading = "Framework")]
pub struct FrameworkSettings {
    /// Logger debug level
    #[arg(long = "debug_level", env = "WM_DEBUG_LEVEL")]
    pub debug_level: Option<String>,

    /// Amount of seconds to check if workers are alive
    #[arg(long = "heartbeat", env = "WM_BCLI_HEARTBEAT", default_value_t = DEFAULT_HEARTBEAT)]
    pub heartbeat: u64,

    /// Settings file
    #[arg(long = "settings", env = "WM_BCLI_FILE_SETTINGS")]
    pub settings: Option<PathBuf>,
}

impl Default for FrameworkSettings {
    fn default() -> Self {
        Self {
            debug_level: None,
            heartbeat: DEFAULT_HEARTBEAT,
            settings: None,
        }
    }
}

/// MQTT broker settings
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
#[command(next_help_heading = "MQTT")]
pub struct MqttSettings {
    /// MQTT broker hostname
    #[arg(long = "mqtt_hostname", env = "WM_SERVICES_MQTT_HOSTNAME")]
    pub mqtt_hostname: Option<String>,

    /// MQTT broker username
    #[arg(long = "mqtt_username", env = "WM_SERVICES_MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    /// MQTT broker password
    #[arg(long = "mqtt_password", env = "WM_SERVICES_MQTT_PASSWORD")]
    pub mqtt_password: Option<String>,

    /// MQTT broker port
    #[arg(long = "mqtt_port", env = "WM_SERVICES_MQTT_PORT", default_value_t = DEFAULT_MQTT_PORT)]
    pub mqtt_port: u16,

    /// Path to the Certificate Authority certificates trusted by this client
    #[arg(long = "mqtt_ca_certs", env = "WM_SERVICES_MQTT_CA_CERTS")]
    pub mqtt_ca_certs: Option<PathBuf>,

    /// Path to the PEM encoded client certificate
    #[arg(long = "mqtt_certfile", env = "WM_SERVICES_MQTT_CLIENT_CRT")]
    pub mqtt_certfile: Option<PathBuf>,

    /// Path to the PEM encoded client private key
    #[arg(long = "mqtt_keyfile", env = "WM_SERVICES_MQTT_CLIENT_KEY")]
    pub mqtt_keyfile: Option<PathBuf>,

    /// Ask the broker to keep the session between reconnections
    #[arg(
        long = "mqtt_persist_session",
        env = "WM_SERVICES_MQTT_PERSIST_SESSION",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub mqtt_persist_session: bool,

    /// Skip the TLS handshake
    #[arg(
        long = "mqtt_force_unsecure",
        env = "WM_SERVICES_MQTT_FORCE_UNSECURE",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub mqtt_force_unsecure: bool,

    /// Skip the certificate name check
    #[arg(
        long = "mqtt_allow_untrusted",
        env = "WM_SERVICES_MQTT_ALLOW_UNTRUSTED",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub mqtt_allow_untrusted: bool,

    /// MQTT topic to subscribe to
    #[arg(long = "mqtt_topic", env = "WM_SERVICES_MQTT_SUB_TOPIC", default_value = DEFAULT_MQTT_TOPIC)]
    pub mqtt_topic: String,

    /// Network id to use in the gateway topic subscription
    #[arg(
        long = "mqtt_subscribe_network_id",
        env = "WM_SERVICES_MQTT_SUB_NETWORK_ID",
        default_value = WILDCARD
    )]
    pub mqtt_subscribe_network_id: String,

    /// Sink id to use in the gateway topic subscription
    #[arg(
        long = "mqtt_subscribe_sink_id",
        env = "WM_SERVICES_MQTT_SUB_SINK_ID",
        default_value = WILDCARD
    )]
    pub mqtt_subscribe_sink_id: String,

    /// Gateway id to use in the gateway topic subscription
    #[arg(
        long = "mqtt_subscribe_gateway_id",
        env = "WM_SERVICES_MQTT_SUB_GATEWAY_ID",
        default_value = WILDCARD
    )]
    pub mqtt_subscribe_gateway_id: String,

    /// Source endpoint to use in the gateway topic subscription
    #[arg(
        long = "mqtt_subscribe_source_endpoint",
        env = "WM_SERVICES_MQTT_SUB_SOURCE_ENDPOINT",
        default_value = WILDCARD
    )]
    pub mqtt_subscribe_source_endpoint: String,

    /// Destination endpoint to use in the gateway topic subscription
    #[arg(
        long = "mqtt_subscribe_destination_endpoint",
        env = "WM_SERVICES_MQTT_SUB_DESTINATION_ENDPOINT",
        default_value = WILDCARD
    )]
    pub mqtt_subscribe_destination_endpoint: String,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            mqtt_hostname: None,
            mqtt_username: None,
            mqtt_password: None,
            mqtt_port: DEFAULT_MQTT_PORT,
            mqtt_ca_certs: None,
            mqtt_certfile: None,
            mqtt_keyfile: None,
            mqtt_persist_session: false,
            mqtt_force_unsecure: false,
            mqtt_allow_untrusted: false,
            mqtt_topic: DEFAULT_MQTT_TOPIC.to_string(),
            mqtt_subscribe_network_id: WILDCARD.to_string(),
            mqtt_subscribe_sink_id: WILDCARD.to_string(),
            mqtt_subscribe_gateway_id: WILDCARD.to_string(),
            mqtt_subscribe_source_endpoint: WILDCARD.to_string(),
            mqtt_subscribe_destination_endpoint: WILDCARD.to_string(),
        }
    }
}

/// MySQL settings
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
#[command(next_help_heading = "Database")]
pub struct DatabaseSettings {
    /// Database hostname
    #[arg(long = "db_hostname", env = "WM_SERVICES_MYSQL_HOSTNAME", default_value = DEFAULT_DB_HOSTNAME)]
    pub db_hostname: String,

    /// Database port
    #[arg(long = "db_port", env = "WM_SERVICES_MYSQL_PORT", default_value_t = DEFAULT_DB_PORT)]
    pub db_port: u16,

    /// Database schema to use
    #[arg(long = "db_database", env = "WM_SERVICES_MYSQL_DATABASE")]
    pub db_database: Option<String>,

    /// Database user
    #[arg(long = "db_username", env = "WM_SERVICES_MYSQL_USERNAME")]
    pub db_username: Option<String>,

    /// Database password
    #[arg(long = "db_password", env = "WM_SERVICES_MYSQL_PASSWORD")]
    pub db_password: Option<String>,

    /// Database connection timeout in seconds
    #[arg(
        long = "db_connection_timeout",
        env = "WM_SERVICES_MYSQL_CONNECTION_TIMEOUT",
        default_value_t = DEFAULT_DB_CONNECTION_TIMEOUT
    )]
    pub db_connection_timeout: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            db_hostname: DEFAULT_DB_HOSTNAME.to_string(),
            db_port: DEFAULT_DB_PORT,
            db_database: None,
            db_username: None,
            db_password: None,
            db_connection_timeout: DEFAULT_DB_CONNECTION_TIMEOUT,
        }
    }
}

/// Settings for inventory runs
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
#[command(next_help_heading = "Test")]
pub struct TestSettings {
    /// Initial wait in seconds, random within the jitter range when unset
    #[arg(long = "delay", env = "WM_BCLI_TEST_DELAY")]
    pub delay: Option<u64>,

    /// Time to collect data for, in seconds
    #[arg(long = "duration", env = "WM_BCLI_TEST_DURATION", default_value_t = DEFAULT_TEST_DURATION)]
    pub duration: u64,

    /// File with the list of nodes to observe
    #[arg(long = "nodes", env = "WM_BCLI_TEST_NODES", default_value = DEFAULT_TEST_NODES)]
    pub nodes: PathBuf,

    /// Minimum amount of sleep between runs
    #[arg(long = "jitter_minimum", env = "WM_BCLI_TEST_JITTER_MIN", default_value_t = 0)]
    pub jitter_minimum: u64,

    /// Maximum amount of sleep between runs
    #[arg(long = "jitter_maximum", env = "WM_BCLI_TEST_JITTER_MAX", default_value_t = 0)]
    pub jitter_maximum: u64,

    /// File where to write the report
    #[arg(long = "output", env = "WM_BCLI_TEST_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Append datetime information to the output filename
    #[arg(
        long = "output_time",
        env = "WM_BCLI_TEST_OUTPUT_TIME",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub output_time: bool,

    /// Scratchpad sequence every target node must report
    #[arg(long = "target_otap", env = "WM_BCLI_TEST_TARGET_OTAP")]
    pub target_otap: Option<u32>,

    /// Number of messages that should be observed for each node
    #[arg(long = "target_frequency", env = "WM_BCLI_TEST_TARGET_FREQUENCY")]
    pub target_frequency: Option<u64>,

    /// Number of test runs to execute
    #[arg(long = "number_of_runs", env = "WM_BCLI_TEST_NUMBER_RUNS", default_value_t = 1)]
    pub number_of_runs: u32,
}

impl Default for TestSettings {
    fn default() -> Self {
        Self {
            delay: None,
            duration: DEFAULT_TEST_DURATION,
            nodes: PathBuf::from(DEFAULT_TEST_NODES),
            jitter_minimum: 0,
            jitter_maximum: 0,
            output: None,
            output_time: false,
            target_otap: None,
            target_frequency: None,
            number_of_runs: 1,
        }
    }
}

impl Settings {
    /// Resolve the settings from `argv` alone, without any subcommand
    pub fn load<I, T>(argv: I) -> Result<(Self, SettingsSource)>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let command = Self::augment_args(Command::new("wm-gw-cli"));
        let (matches, source) = load_matches(command, argv)?;
        let settings = Self::from_arg_matches(&matches)?;
        Ok((settings, source))
    }

    /// Flattened view of the settings, keyed like the settings file
    pub fn to_map(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }

    /// Names of the `required` fields that hold no value
    pub fn sanity(&self, required: &[&str]) -> Vec<String> {
        let map = self.to_map();
        required
            .iter()
            .filter(|key| map.get(**key).map_or(true, serde_json::Value::is_null))
            .map(|key| key.to_string())
            .collect()
    }

    /// Fail with the list of missing fields when any `required` field is unset
    pub fn require(&self, required: &[&str]) -> Result<()> {
        let missing = self.sanity(required);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingSettings(missing))
        }
    }

    /// Human readable listing, one `key: value (hint)` line per field
    pub fn describe(&self, required: &[&str], key_filter: Option<&str>) -> String {
        let mut out = String::new();
        for (key, value) in self.to_map() {
            if let Some(filter) = key_filter {
                if !key.contains(filter) {
                    continue;
                }
            }

            let value = match value {
                serde_json::Value::Null => "-".to_string(),
                _ if key.contains("password") => REDACTED.to_string(),
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            let hint = if required.contains(&key.as_str()) {
                "required"
            } else {
                "optional"
            };

            out.push_str(&format!("{}: {} ({})\n", key, value, hint));
        }
        out
    }

    /// Write the resolved settings as JSON.
    ///
    /// Values are written as resolved, secrets included, so the file can be
    /// fed back through `--settings`.
    pub fn dump(&self, path: &std::path::Path) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.to_map())?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe(&[], None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_flags() {
        let settings = Settings::default();
        assert_eq!(settings.mqtt.mqtt_port, 8883);
        assert_eq!(settings.mqtt.mqtt_topic, "#");
        assert_eq!(settings.database.db_port, 3306);
        assert_eq!(settings.test.number_of_runs, 1);
    }

    #[test]
    fn test_missing_reports_unset_fields() {
        let mut settings = Settings::default();
        settings.mqtt.mqtt_hostname = Some("broker".to_string());

        let missing = settings.sanity(&["mqtt_hostname", "db_database", "db_username"]);
        assert_eq!(missing, vec!["db_database", "db_username"]);
        assert!(settings.require(&["mqtt_hostname"]).is_ok());
        assert!(matches!(
            settings.require(&["db_password"]),
            Err(Error::MissingSettings(_))
        ));
    }

    #[test]
    fn test_describe_redacts_passwords() {
        let mut settings = Settings::default();
        settings.mqtt.mqtt_password = Some("secret".to_string());

        let text = settings.describe(&["mqtt_hostname"], Some("mqtt"));
        assert!(text.contains("mqtt_password: password_is_set (optional)"));
        assert!(text.contains("mqtt_hostname: - (required)"));
        assert!(!text.contains("secret"));
        assert!(!text.contains("db_hostname"));
    }

    #[test]
    fn test_unset_password_is_not_marked_set() {
        let settings = Settings::default();
        let text = settings.to_string();
        assert!(text.contains("db_password: - (optional)"));
    }
}
