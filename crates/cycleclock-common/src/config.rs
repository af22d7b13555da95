//! Configuration structures for the calibrated clock.
//!
//! Supports TOML deserialization with defaults that match the
//! stock calibration behavior; only the warm-up and calibration
//! interval usually need tuning.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Largest number of reference reads taken per synchronized sample.
pub const MAX_SAMPLE_BRACKETS: usize = 15;

/// Default number of reference reads per synchronized sample.
///
/// Windows' performance counter has coarser and less stable read latency,
/// so more brackets are taken there.
#[cfg(windows)]
pub const DEFAULT_SAMPLE_BRACKETS: usize = 15;
/// Default number of reference reads per synchronized sample.
#[cfg(not(windows))]
pub const DEFAULT_SAMPLE_BRACKETS: usize = 3;

/// Default number of sampling attempts before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Smallest accepted calibration interval.
///
/// The next calibration is scheduled one microsecond early, so anything
/// at or below that would schedule calibrations in the past.
pub const MIN_CALIBRATION_INTERVAL: Duration = Duration::from_micros(1);

/// Top-level clock configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Reference time between the two initial samples.
    ///
    /// Longer warm-ups give a more accurate initial rate at the cost of
    /// startup latency. Zero takes the two samples back to back.
    #[serde(with = "humantime_serde")]
    pub warmup: Duration,

    /// Target spacing between recalibrations.
    ///
    /// Shorter intervals bound drift more tightly at the cost of more
    /// frequent sampling.
    #[serde(with = "humantime_serde")]
    pub calibration_interval: Duration,

    /// Sampler tuning.
    pub sampling: SamplingConfig,

    /// Background calibration service tuning.
    pub service: ServiceConfig,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            warmup: Duration::from_millis(200),
            calibration_interval: Duration::from_secs(1),
            sampling: SamplingConfig::default(),
            service: ServiceConfig::default(),
        }
    }
}

/// Sampler tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Reference reads per sample (each bracketed by two cycle reads).
    pub brackets: usize,

    /// Attempts before a sample fails with `TooManyRetries`.
    pub max_retries: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            brackets: DEFAULT_SAMPLE_BRACKETS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Background calibration service tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// How often the service runs the due check.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl ClockConfig {
    /// Build a configuration from the two nanosecond tunables.
    #[must_use]
    pub fn from_nanos(warmup_ns: u64, interval_ns: u64) -> Self {
        Self {
            warmup: Duration::from_nanos(warmup_ns),
            calibration_interval: Duration::from_nanos(interval_ns),
            ..Self::default()
        }
    }

    /// Warm-up span in nanoseconds (saturating).
    #[must_use]
    pub fn warmup_ns(&self) -> u64 {
        u64::try_from(self.warmup.as_nanos()).unwrap_or(u64::MAX)
    }

    /// Calibration interval in nanoseconds (saturating).
    #[must_use]
    pub fn calibration_interval_ns(&self) -> u64 {
        u64::try_from(self.calibration_interval.as_nanos()).unwrap_or(u64::MAX)
    }

    /// Check that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.calibration_interval <= MIN_CALIBRATION_INTERVAL {
            return Err(ConfigError::Invalid(format!(
                "calibration_interval must exceed {}",
                humantime::format_duration(MIN_CALIBRATION_INTERVAL)
            )));
        }
        if self.calibration_interval_ns() > i64::MAX as u64 {
            return Err(ConfigError::Invalid(
                "calibration_interval is too large".into(),
            ));
        }
        if !(1..=MAX_SAMPLE_BRACKETS).contains(&self.sampling.brackets) {
            return Err(ConfigError::Invalid(format!(
                "sampling.brackets must be between 1 and {MAX_SAMPLE_BRACKETS}, got {}",
                self.sampling.brackets
            )));
        }
        if self.sampling.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "sampling.max_retries must be at least 1".into(),
            ));
        }
        if self.service.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "service.poll_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
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
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
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

    /// A value is out of range.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClockConfig::default();
        assert_eq!(config.warmup, Duration::from_millis(200));
        assert_eq!(config.calibration_interval, Duration::from_secs(1));
        assert_eq!(config.sampling.max_retries, 10);
        assert_eq!(config.sampling.brackets, DEFAULT_SAMPLE_BRACKETS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            warmup = "50ms"
            calibration_interval = "250ms"

            [sampling]
            brackets = 7
            max_retries = 4

            [service]
            poll_interval = "20ms"
        "#;

        let config = ClockConfig::from_toml(toml).unwrap();
        assert_eq!(config.warmup_ns(), 50_000_000);
        assert_eq!(config.calibration_interval_ns(), 250_000_000);
        assert_eq!(config.sampling.brackets, 7);
        assert_eq!(config.sampling.max_retries, 4);
        assert_eq!(config.service.poll_interval, Duration::from_millis(20));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ClockConfig::from_toml("warmup = \"10ms\"").unwrap();
        assert_eq!(config.warmup, Duration::from_millis(10));
        assert_eq!(config.calibration_interval, Duration::from_secs(1));
        assert_eq!(config.sampling, SamplingConfig::default());
    }

    #[test]
    fn test_roundtrip_toml() {
        let config = ClockConfig::from_nanos(30_000_000, 500_000_000);
        let toml = config.to_toml().unwrap();
        let parsed = ClockConfig::from_toml(&toml).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_bad_duration_is_parse_error() {
        let err = ClockConfig::from_toml("warmup = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = ClockConfig::from_nanos(0, 1_000);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        // Back-to-back initial samples are allowed
        config.calibration_interval = Duration::from_secs(1);
        assert!(config.validate().is_ok());

        config.sampling.brackets = MAX_SAMPLE_BRACKETS + 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sampling.brackets"));

        config.sampling.brackets = 1;
        config.sampling.max_retries = 0;
        assert!(config.validate().is_err());

        config.sampling.max_retries = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "calibration_interval = \"2s\"").unwrap();

        let config = ClockConfig::from_file(file.path()).unwrap();
        assert_eq!(config.calibration_interval, Duration::from_secs(2));

        let missing = ClockConfig::from_file(std::path::Path::new("/nonexistent/cycleclock.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_sampling_config_json() {
        let sampling: SamplingConfig = serde_json::from_str(r#"{"brackets": 15}"#).unwrap();
        assert_eq!(sampling.brackets, 15);
        assert_eq!(sampling.max_retries, DEFAULT_MAX_RETRIES);
    }
}
