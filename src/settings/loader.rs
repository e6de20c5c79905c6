//! Settings file loading and environment variable interpolation
//!
//! The YAML settings file is folded into the command line: every key becomes
//! a `--key=value` flag placed ahead of the real arguments, so flags typed by
//! the user win over the file, and the file wins over environment defaults.

use crate::error::{Error, Result};
use clap::{ArgMatches, Command};
use regex::Regex;
use std::collections::HashMap;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Argument id holding the settings file path
const SETTINGS_ARG: &str = "settings";

/// Where the resolved settings came from
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsSource {
    /// No settings file was requested
    Arguments,
    /// The requested settings file does not exist
    Missing(PathBuf),
    /// The settings file was applied
    File {
        path: PathBuf,
        applied: Vec<String>,
        ignored: Vec<String>,
    },
}

impl SettingsSource {
    /// Report how the settings were resolved
    pub fn log(&self) {
        match self {
            SettingsSource::Arguments => {
                tracing::debug!("No settings file given, using arguments and environment")
            }
            SettingsSource::Missing(path) => {
                tracing::warn!("Settings file {} not found, using defaults", path.display())
            }
            SettingsSource::File {
                path,
                applied,
                ignored,
            } => {
                tracing::info!(
                    "Loaded {} settings from {}",
                    applied.len(),
                    path.display()
                );
                if !ignored.is_empty() {
                    tracing::debug!("Ignored unknown settings: {:?}", ignored);
                }
            }
        }
    }
}

/// Parse `argv` against `command`, layering the settings file under the flags
pub fn load_matches<I, T>(command: Command, argv: I) -> Result<(ArgMatches, SettingsSource)>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let command = command.args_override_self(true);
    let argv: Vec<OsString> = argv.into_iter().map(Into::into).collect();

    let matches = command.clone().try_get_matches_from(&argv)?;
    let Some(path) = matches.get_one::<PathBuf>(SETTINGS_ARG).cloned() else {
        return Ok((matches, SettingsSource::Arguments));
    };

    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok((matches, SettingsSource::Missing(path)));
        }
        Err(e) => return Err(e.into()),
    };

    let file_args = file_arguments(&command, &content)?;

    let mut merged: Vec<OsString> = Vec::with_capacity(argv.len() + file_args.flags.len());
    merged.extend(argv.first().cloned());
    merged.extend(file_args.flags.iter().map(OsString::from));
    merged.extend(argv.iter().skip(1).cloned());

    let matches = command.try_get_matches_from(merged)?;
    Ok((
        matches,
        SettingsSource::File {
            path,
            applied: file_args.applied,
            ignored: file_args.ignored,
        },
    ))
}

/// Flags derived from a settings file
#[derive(Debug, Default, PartialEq)]
pub struct FileArguments {
    pub flags: Vec<String>,
    pub applied: Vec<String>,
    pub ignored: Vec<String>,
}

/// Turn the YAML settings `content` into flags understood by `command`
pub fn file_arguments(command: &Command, content: &str) -> Result<FileArguments> {
    let content = interpolate_env_vars(content);
    let document: serde_yaml::Value = serde_yaml::from_str(&content)?;

    let mapping = match document {
        serde_yaml::Value::Mapping(mapping) => mapping,
        serde_yaml::Value::Null => serde_yaml::Mapping::new(),
        _ => {
            return Err(Error::Config(
                "settings file must contain a mapping of option names to values".to_string(),
            ))
        }
    };

    // long name -> whether the flag takes a value
    let known: HashMap<&str, bool> = command
        .get_arguments()
        .filter_map(|arg| {
            arg.get_long()
                .map(|long| (long, arg.get_action().takes_values()))
        })
        .filter(|(long, _)| *long != SETTINGS_ARG)
        .collect();

    let mut out = FileArguments::default();
    for (key, value) in mapping {
        let Some(key) = key.as_str().map(str::to_string) else {
            out.ignored.push(format!("{:?}", key));
            continue;
        };

        let Some(&takes_value) = known.get(key.as_str()) else {
            out.ignored.push(key);
            continue;
        };

        let value = match value {
            serde_yaml::Value::Null => continue,
            serde_yaml::Value::Bool(flag) => {
                if !takes_value {
                    if flag {
                        out.flags.push(format!("--{}", key));
                        out.applied.push(key);
                    }
                    continue;
                }
                flag.to_string()
            }
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::String(s) => s,
            _ => {
                out.ignored.push(key);
                continue;
            }
        };

        if takes_value {
            out.flags.push(format!("--{}={}", key, value));
            out.applied.push(key);
        } else if is_truthy(&value) {
            out.flags.push(format!("--{}", key));
            out.applied.push(key);
        }
    }

    Ok(out)
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "on" | "1" | "y"
    )
}

/// Replace `${VAR}` and `${VAR:-default}` with values from the environment.
///
/// Unset variables without a default become empty strings.
pub fn interpolate_env_vars(content: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").expect("valid interpolation pattern")
    });

    pattern
        .replace_all(content, |caps: &regex::Captures| {
            let fallback = caps.get(2).map_or("", |m| m.as_str());
            env::var(&caps[1]).unwrap_or_else(|_| fallback.to_string())
        })
        .into_owned()
}
