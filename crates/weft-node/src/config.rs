//! Configuration file handling.
//!
//! The node never refuses to start because of a bad config file: a missing
//! or unparseable file falls back to [`FabricConfig::default`] with a
//! warning, matching every field of the schema having a default.

use crate::error::FabricError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use weft_types::FabricConfig;

/// Default config location: `~/.weft/weft.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".weft")
        .join("weft.toml")
}

/// Load configuration from a TOML file, falling back to defaults.
pub fn load_config(path: &Path) -> FabricConfig {
    match fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                debug!(path = %path.display(), "configuration loaded");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid configuration, using defaults");
                FabricConfig::default()
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no configuration file, using defaults");
            FabricConfig::default()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read configuration, using defaults");
            FabricConfig::default()
        }
    }
}

/// Write a default configuration file. Refuses to overwrite.
pub fn write_default_config(path: &Path) -> Result<FabricConfig, FabricError> {
    if path.exists() {
        return Err(FabricError::Config(format!(
            "{} already exists",
            path.display()
        )));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| FabricError::Config(format!("{}: {e}", parent.display())))?;
    }
    let config = FabricConfig::default();
    let contents = toml::to_string_pretty(&config)
        .map_err(|e| FabricError::Config(format!("serialize defaults: {e}")))?;
    fs::write(path, contents).map_err(|e| FabricError::Config(format!("{}: {e}", path.display())))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::Role;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("nope.toml"));
        assert_eq!(config.mode, Role::StandalonePeer);
        assert_eq!(config.port, 50_051);
    }

    #[test]
    fn test_invalid_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weft.toml");
        fs::write(&path, "mode = 12 [[[").unwrap();
        let config = load_config(&path);
        assert_eq!(config.mode, Role::StandalonePeer);
    }

    #[test]
    fn test_valid_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weft.toml");
        fs::write(
            &path,
            r#"
            node_id = "n-7"
            mode = "coordinator"
            port = 6000
        "#,
        )
        .unwrap();
        let config = load_config(&path);
        assert_eq!(config.node_id, "n-7");
        assert_eq!(config.mode, Role::Coordinator);
        assert_eq!(config.port, 6000);
    }

    #[test]
    fn test_write_default_roundtrips_and_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("weft.toml");

        let written = write_default_config(&path).unwrap();
        let loaded = load_config(&path);
        assert_eq!(loaded, written);

        assert!(matches!(
            write_default_config(&path),
            Err(FabricError::Config(_))
        ));
    }
}
