//! ctxbridge configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bus::DEFAULT_CHANNEL_CAPACITY;
use crate::envelope::LogLevel;

/// Main ctxbridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Event bus sizing
    pub bus: BusConfig,

    /// Caller-side settings
    pub client: ClientConfig,

    /// Handler message sink
    pub sink: SinkConfig,

    /// Tracing filter for the binary (overridden by --log-level)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Reject values that would make the bridge unusable
    pub fn validate(&self) -> Result<()> {
        if self.bus.channel_capacity == 0 {
            return Err(eyre::eyre!("bus.channel-capacity must be at least 1"));
        }
        if self.client.request_timeout_ms == 0 {
            return Err(eyre::eyre!("client.request-timeout-ms must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::search_paths() {
            if !candidate.exists() {
                continue;
            }
            match Self::load_from_file(&candidate) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", candidate.display(), e);
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only `log-level`, before logging is set up
    ///
    /// Never fails: any problem just means no configured level.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates = match config_path {
            Some(path) => vec![path.clone()],
            None => Self::search_paths(),
        };

        candidates
            .iter()
            .filter_map(|path| fs::read_to_string(path).ok())
            .find_map(|content| serde_yaml::from_str::<Self>(&content).ok())
            .and_then(|config| config.log_level)
    }

    /// `.ctxbridge.yml`, then `~/.config/ctxbridge/ctxbridge.yml`
    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".ctxbridge.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("ctxbridge").join("ctxbridge.yml"));
        }
        paths
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Event bus sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Unread messages per subscription before a backlog warning
    #[serde(rename = "channel-capacity")]
    pub channel_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Caller-side settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Deadline for `call_sync`, `call_async` and `info`
    #[serde(rename = "request-timeout-ms")]
    pub request_timeout_ms: u64,
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
        }
    }
}

/// Handler message sink
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Lowest level written unless an entry is forced
    pub threshold: LogLevel,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bus.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.client.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.sink.threshold, LogLevel::Info);
        assert!(config.log_level.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
bus:
  channel-capacity: 64
client:
  request-timeout-ms: 250
sink:
  threshold: warning
log-level: debug
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.bus.channel_capacity, 64);
        assert_eq!(config.client.request_timeout_ms, 250);
        assert_eq!(config.sink.threshold, LogLevel::Warning);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = serde_yaml::from_str("client:\n  request-timeout-ms: 5\n").unwrap();
        assert_eq!(config.client.request_timeout_ms, 5);
        assert_eq!(config.bus.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_load_explicit_path() {
        let file = write_config("bus:\n  channel-capacity: 8\n");
        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.bus.channel_capacity, 8);
    }

    #[test]
    fn test_load_explicit_path_rejects_invalid() {
        let file = write_config("bus:\n  channel-capacity: 0\n");
        assert!(Config::load(Some(&file.path().to_path_buf())).is_err());

        let missing = PathBuf::from("/nonexistent/ctxbridge.yml");
        assert!(Config::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_load_log_level() {
        let file = write_config("log-level: trace\n");
        assert_eq!(
            Config::load_log_level(Some(&file.path().to_path_buf())).as_deref(),
            Some("trace")
        );

        let garbage = write_config(": : not yaml [");
        assert!(Config::load_log_level(Some(&garbage.path().to_path_buf())).is_none());
    }
}
