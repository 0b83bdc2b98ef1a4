//! Protocol Configuration
//!
//! Every section has working defaults so an agent starts with no file at
//! all. Sources are layered in increasing priority:
//!
//! ```text
//! defaults → TOML file (optional) → TETHER_* environment variables
//! ```
//!
//! Nested keys use `__` in the environment, e.g.
//! `TETHER_LOCATOR__RETENTION_MS=30000`.

use crate::error::ConfigError;
use codec::{DecodeOptions, EncodeOptions};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "TETHER";

/// Well-known discovery port
pub const DEFAULT_DISCOVERY_PORT: u16 = 1534;

/// Complete protocol configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub dispatch: DispatchConfig,
    pub channel: ChannelConfig,
    pub codec: CodecConfig,
    pub locator: LocatorConfig,
    pub tcp: TcpConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Name given to the dispatch thread
    pub thread_name: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            thread_name: "tether-dispatch".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Largest transport message accepted or produced
    pub max_frame_size: usize,
    /// Outbound frames queued before congestion is reported to listeners
    pub outbound_soft_limit: usize,
    /// Time allowed for the remote `Locator.Hello` before the channel fails
    pub hello_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024, // 16MB
            outbound_soft_limit: 256,
            hello_timeout_ms: 30_000,
        }
    }
}

impl ChannelConfig {
    pub fn hello_timeout(&self) -> Duration {
        Duration::from_millis(self.hello_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Send binary values as raw spliced blocks instead of base64
    pub zero_copy: bool,
    /// Deepest nesting accepted by the decoder
    pub max_depth: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            zero_copy: true,
            max_depth: codec::DEFAULT_MAX_DEPTH,
        }
    }
}

impl CodecConfig {
    pub fn encode_options(&self) -> EncodeOptions {
        EncodeOptions {
            zero_copy: self.zero_copy,
        }
    }

    pub fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            max_depth: self.max_depth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Discovered peers not refreshed within this window are removed
    pub retention_ms: u64,
    /// Interval between discovery broadcasts
    pub broadcast_interval_ms: u64,
    /// Interval between stale-peer sweeps
    pub prune_interval_ms: u64,
    /// UDP port for discovery; taken port falls back to an ephemeral slave port
    pub discovery_port: u16,
    /// Broadcast address used for discovery requests
    pub broadcast_address: String,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            retention_ms: 60_000,
            broadcast_interval_ms: 15_000,
            prune_interval_ms: 5_000,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            broadcast_address: "255.255.255.255".to_string(),
        }
    }
}

impl LocatorConfig {
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Address the channel server listens on
    pub bind_address: String,
    pub connect_timeout_ms: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:1534".to_string(),
            connect_timeout_ms: 5_000,
        }
    }
}

impl TcpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_address.parse().map_err(|e| ConfigError::Invalid {
            field: "tcp.bind_address",
            message: format!("{e}"),
        })
    }
}

impl ProtocolConfig {
    /// Load defaults, an optional TOML file, then `TETHER_*` overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading protocol configuration");
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        debug!(?config, "Protocol configuration resolved");
        Ok(config)
    }

    /// Parse a plain TOML file without environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel.max_frame_size == 0 {
            return Err(ConfigError::Invalid {
                field: "channel.max_frame_size",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.codec.max_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "codec.max_depth",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.locator.retention_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "locator.retention_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ProtocolConfig::default();
        assert_eq!(config.locator.retention_ms, 60_000);
        assert_eq!(config.locator.discovery_port, 1534);
        assert_eq!(config.codec.max_depth, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[locator]\nretention_ms = 1000\n\n[codec]\nzero_copy = false").unwrap();

        let config = ProtocolConfig::from_file(file.path()).unwrap();
        assert_eq!(config.locator.retention_ms, 1000);
        assert_eq!(config.locator.broadcast_interval_ms, 15_000);
        assert!(!config.codec.zero_copy);
        assert_eq!(config.channel, ChannelConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[codec]\nmax_depth = 0").unwrap();
        assert!(matches!(
            ProtocolConfig::from_file(file.path()),
            Err(ConfigError::Invalid { field: "codec.max_depth", .. })
        ));
    }

    #[test]
    fn test_load_layers_file_then_environment() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[locator]\nretention_ms = 2000\nprune_interval_ms = 100").unwrap();

        std::env::set_var("TETHER_LOCATOR__PRUNE_INTERVAL_MS", "250");
        let loaded = ProtocolConfig::load(Some(file.path()));
        std::env::remove_var("TETHER_LOCATOR__PRUNE_INTERVAL_MS");

        let config = loaded.unwrap();
        assert_eq!(config.locator.retention_ms, 2000);
        assert_eq!(config.locator.prune_interval_ms, 250);
        assert_eq!(config.tcp, TcpConfig::default());
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = ProtocolConfig::from_file("/nonexistent/tether.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tether.toml"));
    }

    #[test]
    fn test_json_dump_reads_back() {
        let mut config = ProtocolConfig::default();
        config.locator.broadcast_address = "127.0.0.1".to_string();
        config.channel.hello_timeout_ms = 750;

        let json = serde_json::to_string(&config).unwrap();
        let parsed: ProtocolConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);

        let sparse: ProtocolConfig = serde_json::from_str(r#"{"locator":{"discovery_port":4000}}"#).unwrap();
        assert_eq!(sparse.locator.discovery_port, 4000);
        assert_eq!(sparse.locator.retention_ms, 60_000);
    }
}
