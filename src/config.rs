//! Configuration loading using Figment
//!
//! Connection settings are read from:
//! 1. a TOML file (`config/moco.toml` by default)
//! 2. environment variables prefixed with `MOCO_`, which override the file
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! MOCO_CONNECTION__URL=socket://moco-ctrl:5000
//! MOCO_CONNECTION__TIMEOUT=800ms
//! MOCO_PROTOCOL__MULTILINE_FRAMING=keep
//! ```
//!
//! # Example
//!
//! ```no_run
//! use moco::{Moco, MocoConfig};
//!
//! fn main() -> moco::MocoResult<()> {
//!     let config = MocoConfig::load()?;
//!     let mut moco = Moco::from_config(&config)?;
//!     println!("state: {}", moco.state()?);
//!     Ok(())
//! }
//! ```

use crate::adapters::serial_adapter::{DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT};
use crate::adapters::ConnectionOptions;
use crate::error::{MocoError, MocoResult};
use crate::instrument::reply::MultilineFraming;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/moco.toml";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "MOCO_";

/// Top-level driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MocoConfig {
    /// How to reach the instrument
    pub connection: ConnectionConfig,
    /// Protocol policies
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

/// `[connection]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Device path, `serial://<path>` or `socket://host:port`
    pub url: String,
    /// Window for a single-line reply
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Silence that ends a multi-line burst; defaults to `timeout`
    #[serde(default, with = "humantime_serde")]
    pub burst_timeout: Option<Duration>,
    /// Serial baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

impl ConnectionConfig {
    /// Connection options for [`SyncConnection::open`](crate::adapters::SyncConnection::open)
    pub fn options(&self) -> ConnectionOptions {
        ConnectionOptions {
            timeout: self.timeout,
            burst_timeout: self.burst_timeout,
            baud_rate: self.baud_rate,
        }
    }
}

/// `[protocol]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Handling of the delimiter lines around `HELP`/`INFO` replies
    #[serde(default)]
    pub multiline_framing: MultilineFraming,
}

impl MocoConfig {
    /// Configuration for `url` with every other setting at its default.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            connection: ConnectionConfig {
                url: url.into(),
                timeout: DEFAULT_TIMEOUT,
                burst_timeout: None,
                baud_rate: DEFAULT_BAUD_RATE,
            },
            protocol: ProtocolConfig::default(),
        }
    }

    /// Load from [`DEFAULT_CONFIG_PATH`] plus environment overrides.
    pub fn load() -> MocoResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file plus environment overrides.
    ///
    /// A missing file is not an error on its own; the environment may still
    /// provide every required key.
    ///
    /// # Errors
    ///
    /// [`MocoError::ConfigLoad`] if a source cannot be parsed or a required key
    /// is missing, [`MocoError::Config`] if a value fails validation.
    pub fn load_from<P: AsRef<Path>>(path: P) -> MocoResult<Self> {
        Self::from_figment(Self::figment(path))
    }

    /// The layered sources `load_from` reads, for callers that want to merge
    /// further overrides (command-line flags) on top.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Extract and validate a configuration from prepared sources.
    pub fn from_figment(figment: Figment) -> MocoResult<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - URL is not empty
    /// - timeouts are non-zero
    /// - baud rate is non-zero
    pub fn validate(&self) -> MocoResult<()> {
        let connection = &self.connection;

        if connection.url.trim().is_empty() {
            return Err(MocoError::Config(
                "connection.url must not be empty".to_string(),
            ));
        }

        if connection.timeout.is_zero() {
            return Err(MocoError::Config(
                "connection.timeout must be greater than zero".to_string(),
            ));
        }

        if connection.burst_timeout.is_some_and(|t| t.is_zero()) {
            return Err(MocoError::Config(
                "connection.burst_timeout must be greater than zero".to_string(),
            ));
        }

        if connection.baud_rate == 0 {
            return Err(MocoError::Config(format!(
                "Invalid baud_rate {} for '{}'",
                connection.baud_rate, connection.url
            )));
        }

        Ok(())
    }
}
