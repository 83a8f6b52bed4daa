//! Standard locations of sonance configuration files

use std::path::PathBuf;

/// Get the default configuration directory
///
/// Returns: `{user config dir}/sonance`, or `./sonance` when the platform
/// has no config directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sonance")
}

/// Get the default config file path for `filename` (e.g. "player.yaml")
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_ends_with_sonance() {
        assert!(default_config_dir().ends_with("sonance"));
    }

    #[test]
    fn test_config_path_includes_filename() {
        let path = default_config_path("player.yaml");
        assert!(path.ends_with("sonance/player.yaml"));
    }
}
