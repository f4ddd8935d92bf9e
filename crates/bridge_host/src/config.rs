//! Host Configuration
//!
//! Loads `bridge.toml`. Every section is optional; missing keys fall back to
//! their defaults.

use std::path::{Path, PathBuf};

use bridge_runtime::BridgeConfig;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Host configuration (bridge.toml)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub demo: DemoConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "bridge_host=info,bridge_runtime=info,bridge_link=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

/// Inputs for the demo session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Operands sent to `calc.add`
    #[serde(default = "default_operands")]
    pub operands: (i64, i64),
    /// Number of `tick` events broadcast before the handshake
    #[serde(default = "default_ticks")]
    pub ticks: u32,
    /// Catalogue served by the script side
    #[serde(default = "default_movies")]
    pub movies: Vec<String>,
}

fn default_operands() -> (i64, i64) {
    (2, 3)
}

fn default_ticks() -> u32 {
    3
}

fn default_movies() -> Vec<String> {
    vec!["Heat".to_string(), "Arrival".to_string()]
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            operands: default_operands(),
            ticks: default_ticks(),
            movies: default_movies(),
        }
    }
}

impl HostConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load a config file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).await?;
        let config = Self::from_toml(&content)?;
        info!("Loaded config from: {}", path.display());
        Ok(config)
    }

    /// Load `path` if given, defaults otherwise
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path).await,
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_full_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bridge.toml");
        fs::write(
            &path,
            r#"
[bridge]
request_timeout_ms = 750
max_queued_messages = 32

[logging]
filter = "debug"
json = true

[demo]
operands = [40, 2]
ticks = 1
movies = ["Alien"]
"#,
        )
        .await
        .unwrap();

        let config = HostConfig::load(&path).await.unwrap();
        assert_eq!(config.bridge.request_timeout_ms, 750);
        assert_eq!(config.bridge.max_queued_messages, Some(32));
        assert_eq!(config.logging.filter, "debug");
        assert!(config.logging.json);
        assert_eq!(config.demo.operands, (40, 2));
        assert_eq!(config.demo.movies, vec!["Alien".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_sections_use_defaults() {
        let config = HostConfig::from_toml("[bridge]\nrequest_timeout_ms = 100\n").unwrap();
        assert_eq!(config.bridge.request_timeout_ms, 100);
        assert_eq!(config.logging, LoggingConfig::default());
        assert_eq!(config.demo, DemoConfig::default());

        let empty = HostConfig::load_or_default(None).await.unwrap();
        assert_eq!(empty, HostConfig::default());
    }

    #[tokio::test]
    async fn test_load_errors() {
        let dir = TempDir::new().unwrap();

        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            HostConfig::load(&missing).await,
            Err(ConfigError::NotFound(_))
        ));

        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "[bridge\nrequest_timeout_ms = ").await.unwrap();
        assert!(matches!(
            HostConfig::load(&broken).await,
            Err(ConfigError::Parse(_))
        ));
    }
}
