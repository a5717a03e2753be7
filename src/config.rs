//! Layered runtime configuration.
//!
//! Values are merged, lowest precedence first, from built-in defaults, an
//! optional TOML file, `TCHANNEL_WIRE_*` environment variables and finally
//! command-line overrides.

use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    checksum::ChecksumType,
    dispatch::DecodeMode,
    frame::{FRAME_HEADER_LEN, MAX_FRAME_SIZE},
};

/// Prefix of environment variables read by [`WireConfig::load`].
pub const ENV_PREFIX: &str = "TCHANNEL_WIRE_";

/// Default size of one transport read.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 16 * 1024;

/// Default per-read timeout in milliseconds.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 30_000;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A provider failed or a value had the wrong type.
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    /// A value parsed but is out of range.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending key.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Settings for one connection's read path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireConfig {
    /// Largest inbound frame accepted by the dispatcher.
    pub max_frame_size: usize,
    /// Lazy or strict decoding of inbound frames.
    pub decode_mode: DecodeMode,
    /// Checksum used for outbound calls built by
    /// [`crate::fragment::CallFragmenter::from_config`].
    pub checksum: ChecksumType,
    /// Bytes requested per transport read.
    pub read_chunk_size: usize,
    /// Per-read timeout in milliseconds; zero disables it.
    pub read_timeout_ms: u64,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            decode_mode: DecodeMode::default(),
            checksum: ChecksumType::default(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

/// Command-line values that take precedence over every other source.
///
/// Unset fields leave the lower layers untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    /// Override for [`WireConfig::max_frame_size`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_frame_size: Option<usize>,
    /// Override for [`WireConfig::decode_mode`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decode_mode: Option<DecodeMode>,
    /// Override for [`WireConfig::read_chunk_size`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_chunk_size: Option<usize>,
}

impl WireConfig {
    /// Build the provider stack without extracting it.
    #[must_use]
    pub fn figment(file: Option<&Path>, overrides: &ConfigOverrides) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = file {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Serialized::defaults(overrides))
    }

    /// Load defaults, file and environment.
    ///
    /// # Errors
    /// Returns [`ConfigError::Load`] if a source cannot be parsed and
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(file, &ConfigOverrides::default())
    }

    /// Load every layer including command-line overrides.
    ///
    /// # Errors
    /// As for [`WireConfig::load`].
    pub fn load_with(
        file: Option<&Path>,
        overrides: &ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let cfg: Self = Self::figment(file, overrides).extract().map_err(Box::new)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check value ranges.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(FRAME_HEADER_LEN..=MAX_FRAME_SIZE).contains(&self.max_frame_size) {
            return Err(ConfigError::Invalid {
                field: "max_frame_size",
                reason: format!("must be between {FRAME_HEADER_LEN} and {MAX_FRAME_SIZE}"),
            });
        }
        if self.read_chunk_size == 0 {
            return Err(ConfigError::Invalid {
                field: "read_chunk_size",
                reason: "must be positive".to_owned(),
            });
        }
        Ok(())
    }

    /// Per-read timeout, if enabled.
    #[must_use]
    pub const fn read_timeout(&self) -> Option<Duration> {
        match self.read_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
