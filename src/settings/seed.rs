//! Default settings file seeding

use std::fs;
use std::path::Path;

use crate::error::Result;

/// Settings file bundled with the binary
pub fn default_settings_content() -> &'static str {
    include_str!("../../settings.example.yml")
}

/// Write the bundled settings to `path`.
///
/// An existing file is left alone unless `force` is set. Returns whether
/// the file was written.
pub fn seed_settings(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        tracing::debug!("Settings file {} already exists", path.display());
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    fs::write(path, default_settings_content())?;
    tracing::info!("Seeded settings file at {}", path.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_seed_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vars").join("settings.yml");

        assert!(seed_settings(&path, false).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), default_settings_content());
    }

    #[test]
    fn test_seed_keeps_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.yml");
        fs::write(&path, "mqtt_hostname: mine\n").unwrap();

        assert!(!seed_settings(&path, false).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "mqtt_hostname: mine\n");

        assert!(seed_settings(&path, true).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), default_settings_content());
    }
}
