//! Generic configuration I/O utilities
//!
//! YAML loading and saving for any serializable configuration type.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Load configuration from a YAML file
///
/// A missing file gives the default config. A file that cannot be read or
/// parsed logs a warning and also gives the default config.
///
/// ```ignore
/// let config: PlayerConfig = load_config(&default_config_path("player.yaml"));
/// ```
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    log::info!("load_config: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_config: Config file doesn't exist, using defaults");
        return T::default();
    }

    match read_config(path) {
        Ok(config) => {
            log::info!("load_config: Loaded config from {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("load_config: {:#}, using defaults", e);
            T::default()
        }
    }
}

/// Strict variant of [`load_config`]: every failure is an error
pub fn read_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    serde_yaml::from_str(&contents).with_context(|| format!("Failed to parse config file: {:?}", path))
}

/// Save configuration to a YAML file, creating parent directories
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    log::info!("save_config: Saving to {:?}", path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("save_config: Config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlayerConfig;
    use crate::engine::{QueueKind, Threading};

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config: PlayerConfig = load_config(Path::new("/nonexistent/path/player.yaml"));
        assert_eq!(config, PlayerConfig::default());
    }

    #[test]
    fn test_roundtrip_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("player.yaml");

        let config = PlayerConfig::default()
            .with_period_frames(480)
            .with_queue(QueueKind::Locked)
            .with_threading(Threading::DeviceCallback);
        save_config(&config, &path).unwrap();

        let loaded: PlayerConfig = load_config(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.yaml");
        std::fs::write(&path, "period_frames: [not, a, number]").unwrap();

        let config: PlayerConfig = load_config(&path);
        assert_eq!(config, PlayerConfig::default());
        assert!(read_config::<PlayerConfig>(&path).is_err());
    }
}
