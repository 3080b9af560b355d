//! Configuration system for the ferry CLI.

use ferry_core::TransferConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// ferry configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Transfer layer limits
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Loopback simulation settings
    #[serde(default)]
    pub simulate: SimulateConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Loopback simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulateConfig {
    /// Length of the chunk requests the loopback transport generates
    #[serde(default = "default_request_size")]
    pub request_size: usize,
    /// Pump rounds to hold a pause before resuming
    #[serde(default = "default_pause_rounds")]
    pub pause_rounds: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_request_size() -> usize {
    ferry_core::MAX_CHUNK_SIZE
}

fn default_pause_rounds() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SimulateConfig {
    fn default() -> Self {
        Self {
            request_size: default_request_size(),
            pause_rounds: default_pause_rounds(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("ferry/config.toml")
    }

    /// Load config from default path, falling back to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.transfer.validate()?;

        if self.simulate.request_size == 0 || self.simulate.request_size > self.transfer.max_chunk_size
        {
            anyhow::bail!(
                "Simulated request size must be between 1 and max_chunk_size ({})",
                self.transfer.max_chunk_size
            );
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transfer.max_transfers_per_peer, 256);
        assert_eq!(config.simulate.request_size, ferry_core::MAX_CHUNK_SIZE);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "DEBUG".to_string();
        assert!(config.validate().is_ok());

        config.simulate.request_size = config.transfer.max_chunk_size + 1;
        assert!(config.validate().is_err());

        config.simulate.request_size = 512;
        config.transfer.max_transfers_per_peer = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [transfer]
            max_chunk_size = 4096

            [simulate]
            request_size = 4096
            "#,
        )
        .unwrap();
        assert_eq!(config.transfer.max_chunk_size, 4096);
        assert_eq!(config.transfer.max_transfers_per_peer, 256);
        assert_eq!(config.simulate.pause_rounds, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.logging.level = "trace".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.logging.level, "trace");
        assert_eq!(loaded.transfer, config.transfer);
    }
}
