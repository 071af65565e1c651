//! Dispatch engine configuration.
//!
//! Loaded from TOML with sensible defaults for every field, then validated.
//! There is no environment-variable layer: the embedding application owns
//! process configuration and hands a [`DispatchConfig`] to the engine.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use giop_dispatch_types::CodeSetComponentInfo;
use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;
use snafu::Snafu;

use crate::constants::DEFAULT_MAX_ADDRESSING_RETRIES;
use crate::constants::DEFAULT_MAX_ATTEMPTS;
use crate::constants::DEFAULT_MAX_LOCATION_FORWARDS;
use crate::constants::DEFAULT_MAX_SAME_TARGET_RETRIES;
use crate::constants::DEFAULT_REQUEST_TIMEOUT;
use crate::constants::MAX_ATTEMPTS_CEILING;

/// Default values for configuration
mod defaults {
    use super::*;

    pub fn request_timeout_ms() -> u64 {
        DEFAULT_REQUEST_TIMEOUT.as_millis() as u64
    }
    pub fn max_attempts() -> u32 {
        DEFAULT_MAX_ATTEMPTS
    }
    pub fn max_location_forwards() -> u32 {
        DEFAULT_MAX_LOCATION_FORWARDS
    }
    pub fn max_same_target_retries() -> u32 {
        DEFAULT_MAX_SAME_TARGET_RETRIES
    }
    pub fn max_addressing_retries() -> u32 {
        DEFAULT_MAX_ADDRESSING_RETRIES
    }
}

/// Configuration errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[snafu(display("failed to read config file {}: {source}", path.display()))]
    ReadFile {
        /// File that was requested.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration is not valid TOML for this schema.
    #[snafu(display("failed to parse config: {source}"))]
    Parse {
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// A value is out of range.
    #[snafu(display("invalid configuration for {key}: '{value}' ({reason})"))]
    InvalidValue {
        /// Offending key.
        key: String,
        /// Offending value.
        value: String,
        /// Why it is rejected.
        reason: String,
    },
}

/// Whether the code-set context accompanies every request on a connection or
/// only those sent before the connection's first completed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeSetPolicy {
    /// Only until the server has seen the context once.
    #[default]
    FirstRequestOnly,
    /// On every request.
    Every,
}

/// Dispatch engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    /// Time to wait for a reply, in milliseconds.
    #[serde(default = "defaults::request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Maximum attempts per invocation across all endpoints.
    ///
    /// Running out of endpoints is reported first: when the last candidate
    /// fails retryably the invocation ends with `NowhereToGo` even if this
    /// cap was reached on the same attempt. With more retryable candidates
    /// than this cap, the invocation stops with `AttemptLimitExceeded`
    /// carrying the last failure, and later candidates are never tried.
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Maximum location forwards followed per invocation.
    #[serde(default = "defaults::max_location_forwards")]
    pub max_location_forwards: u32,

    /// Same-target retries per endpoint before moving to the next one.
    #[serde(default = "defaults::max_same_target_retries")]
    pub max_same_target_retries: u32,

    /// Addressing-mode retries per endpoint.
    #[serde(default = "defaults::max_addressing_retries")]
    pub max_addressing_retries: u32,

    /// When the code-set context is attached.
    #[serde(default)]
    pub codeset_policy: CodeSetPolicy,

    /// Codebase advertised once per connection in the sending context.
    #[serde(default)]
    pub codebase: Option<String>,

    /// Code sets this client supports.
    #[serde(default)]
    pub codesets: CodeSetComponentInfo,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: defaults::request_timeout_ms(),
            max_attempts: defaults::max_attempts(),
            max_location_forwards: defaults::max_location_forwards(),
            max_same_target_retries: defaults::max_same_target_retries(),
            max_addressing_retries: defaults::max_addressing_retries(),
            codeset_policy: CodeSetPolicy::default(),
            codebase: None,
            codesets: CodeSetComponentInfo::default(),
        }
    }
}

impl DispatchConfig {
    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).context(ParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        Self::from_toml_str(&contents)
    }

    /// Check every value against its bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == 0 {
            return invalid("request_timeout_ms", self.request_timeout_ms, "must be greater than zero");
        }
        if self.max_attempts == 0 || self.max_attempts > MAX_ATTEMPTS_CEILING {
            return invalid(
                "max_attempts",
                self.max_attempts,
                &format!("must be between 1 and {MAX_ATTEMPTS_CEILING}"),
            );
        }
        if self.max_location_forwards >= self.max_attempts {
            return invalid("max_location_forwards", self.max_location_forwards, "must be below max_attempts");
        }
        if let Some(codebase) = &self.codebase {
            if codebase.trim().is_empty() {
                return invalid("codebase", codebase, "must not be blank");
            }
        }
        Ok(())
    }

    /// Reply timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// The per-invocation retry budget.
    pub fn retry_limits(&self) -> RetryLimits {
        RetryLimits {
            max_location_forwards: self.max_location_forwards,
            max_same_target_retries: self.max_same_target_retries,
            max_addressing_retries: self.max_addressing_retries,
        }
    }
}

fn invalid(key: &str, value: impl ToString, reason: &str) -> Result<(), ConfigError> {
    InvalidValueSnafu {
        key,
        value: value.to_string(),
        reason,
    }
    .fail()
}

/// Bounds applied by an endpoint list while one invocation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryLimits {
    /// Location forwards followed per invocation.
    pub max_location_forwards: u32,
    /// Same-target retries per endpoint.
    pub max_same_target_retries: u32,
    /// Addressing-mode retries per endpoint.
    pub max_addressing_retries: u32,
}

impl Default for RetryLimits {
    fn default() -> Self {
        DispatchConfig::default().retry_limits()
    }
}
