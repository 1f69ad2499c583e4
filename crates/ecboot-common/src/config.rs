//! Configuration structures for the reboot sequence.
//!
//! Supports TOML deserialization with defaults that reproduce the
//! SOEM timing constants, so an empty file behaves like no file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level reboot configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RebootConfig {
    /// Per-operation timeout units.
    pub timeouts: TimeoutConfig,

    /// Multipliers applied to the state timeout unit for each state check.
    pub multipliers: StateBudgets,

    /// Sync-manager programming behaviour.
    pub sync_manager: SyncManagerSettings,
}

/// Timeout units handed to the master stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Standard per-state timeout unit.
    #[serde(with = "humantime_serde")]
    pub state: Duration,

    /// Budget for a single SII (EEPROM) read.
    #[serde(with = "humantime_serde")]
    pub eeprom: Duration,

    /// Budget for a single configured-address register access.
    #[serde(with = "humantime_serde")]
    pub register: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            state: Duration::from_secs(2),
            eeprom: Duration::from_millis(20),
            register: Duration::from_millis(2),
        }
    }
}

/// How many state timeout units each state check may take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateBudgets {
    /// Collective PRE_OP check after auto-configuration.
    pub pre_op: u32,
    /// INIT check after the first INIT request.
    pub init: u32,
    /// BOOT check; entering BOOT may reinitialise the device.
    pub boot: u32,
}

impl Default for StateBudgets {
    fn default() -> Self {
        Self {
            pre_op: 4,
            init: 4,
            boot: 10,
        }
    }
}

/// Whether sync-manager writes are confirmed by reading them back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncManagerWritePolicy {
    /// Acceptance by the transport counts as success.
    #[default]
    Accept,
    /// Read each register block back and compare.
    Verify,
}

/// Sync-manager programming settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SyncManagerSettings {
    /// Confirmation policy for the SM0/SM1 writes.
    pub write_policy: SyncManagerWritePolicy,
}

impl RebootConfig {
    /// Budget for the collective PRE_OP check.
    #[must_use]
    pub fn pre_op_timeout(&self) -> Duration {
        self.timeouts.state.saturating_mul(self.multipliers.pre_op)
    }

    /// Budget for the INIT check.
    #[must_use]
    pub fn init_timeout(&self) -> Duration {
        self.timeouts.state.saturating_mul(self.multipliers.init)
    }

    /// Budget for the BOOT check.
    #[must_use]
    pub fn boot_timeout(&self) -> Duration {
        self.timeouts.state.saturating_mul(self.multipliers.boot)
    }

    /// Reject settings that would make a collaborator call return immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("timeouts.state", self.timeouts.state),
            ("timeouts.eeprom", self.timeouts.eeprom),
            ("timeouts.register", self.timeouts.register),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }

        let multipliers = [
            ("multipliers.pre_op", self.multipliers.pre_op),
            ("multipliers.init", self.multipliers.init),
            ("multipliers.boot", self.multipliers.boot),
        ];
        for (name, value) in multipliers {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
            }
        }

        Ok(())
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Parsed but semantically invalid.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
