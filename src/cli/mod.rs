//! CLI interface for wm-gw-cli

pub mod commands;
mod output;

pub use output::*;

use clap::{CommandFactory, FromArgMatches, Parser, Subcommand, ValueEnum};
use std::ffi::OsString;
use std::path::PathBuf;

use crate::error::Result;
use crate::settings::{Settings, SettingsSource};

#[derive(Parser)]
#[command(name = "wm-gw-cli")]
#[command(author = "Wirepas Ltd")]
#[command(version)]
#[command(about = "Observe and store Wirepas gateway traffic", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Write the default settings file to the --settings path
    Init {
        /// Overwrite an existing settings file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the resolved settings
    Settings {
        /// Write the settings as JSON to this path instead
        #[arg(long)]
        dump: Option<PathBuf>,
    },

    /// Print gateway events as they arrive (default command)
    Listen {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: EventFormat,
    },

    /// Collect gateway status events for --duration seconds
    Gateways {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Store gateway events into MySQL
    Store {
        /// Number of database workers
        #[arg(short, long, default_value_t = 10)]
        workers: usize,
    },

    /// Run the node inventory rounds
    Inventory,
}

impl Commands {
    /// Settings that must be set for the command to run
    pub fn required_settings(&self) -> &'static [&'static str] {
        match self {
            Commands::Init { .. } => &["settings"],
            Commands::Settings { .. } => &[],
            Commands::Listen { .. } | Commands::Gateways { .. } | Commands::Inventory => {
                &["mqtt_hostname"]
            }
            Commands::Store { .. } => &[
                "mqtt_hostname",
                "db_database",
                "db_username",
                "db_password",
            ],
        }
    }
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Listen {
            format: EventFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EventFormat {
    Text,
    Json,
}

impl Cli {
    /// Parse `argv` with the settings file layered under the flags
    pub fn load<I, T>(argv: I) -> Result<(Self, SettingsSource)>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let command = <Self as CommandFactory>::command();
        let (matches, source) = crate::settings::load_matches(command, argv)?;
        let cli = Self::from_arg_matches(&matches)?;
        Ok((cli, source))
    }

    /// The subcommand to run, `listen` when none was given
    pub fn selected_command(&self) -> Commands {
        self.command.clone().unwrap_or_default()
    }
}

/// Log filter directive for a `--debug_level` value.
///
/// Accepts the level names used by existing settings files, so `warning`
/// and `critical` are understood too.
pub fn log_directive(level: &str) -> String {
    let level = match level.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        other => other.to_string(),
    };
    format!("wm_gw_cli={}", level)
}
