//! Configuration loading.

use agora_types::config::AgoraConfig;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Load configuration from `path`, or from `~/.agora/config.toml`.
///
/// A missing, unreadable or malformed file yields the defaults.
pub fn load_config(path: Option<&Path>) -> AgoraConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return AgoraConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<AgoraConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                AgoraConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            AgoraConfig::default()
        }
    }
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    agora_home().join("config.toml")
}

/// Get the default Agora home directory.
pub fn agora_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".agora")
}
