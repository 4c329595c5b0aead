//! Configuration System using Figment
//!
//! Settings are loaded from:
//! 1. `config/illumicell.toml` (or a path given on the command line)
//! 2. Environment variables (prefixed with `ILLUMICELL_`, `__` between levels)
//!
//! Every section has defaults, so an absent file yields a working configuration.
//!
//! # Environment Variable Overrides
//!
//! ```text
//! ILLUMICELL_DEVICE__PORT=/dev/ttyUSB0
//! ILLUMICELL_DEVICE__BAUD_RATE=115200
//! ILLUMICELL_APPLICATION__LOG_LEVEL=debug
//! ```
//!
//! # Example
//!
//! ```no_run
//! use illumicell::config::Settings;
//!
//! let settings = Settings::load().unwrap();
//! println!("Device: {} @ {}", settings.device.port, settings.device.baud_rate);
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/illumicell.toml";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or environment could not be parsed.
    #[error("Configuration load error: {0}")]
    Load(#[from] figment::Error),
    /// A value is out of range.
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    /// Logging
    #[serde(default)]
    pub application: ApplicationSettings,
    /// Serial link
    #[serde(default)]
    pub device: DeviceSettings,
    /// Run timing
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// Sensor sampling
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationSettings {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,
}

/// Serial link to the light controller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSettings {
    /// Serial port (e.g., "/dev/ttyACM0", "COM8")
    #[serde(default = "default_port")]
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Maximum wait for a complete telemetry line
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    /// Delay after opening the port while the controller resets
    #[serde(default = "default_settle")]
    pub settle_ms: u64,
}

/// Scheduler timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerSettings {
    /// Period of elapsed-time reports while running
    #[serde(default = "default_elapsed_tick")]
    pub elapsed_tick_ms: u64,
}

/// Telemetry sampling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySettings {
    /// Sensor poll cadence while running
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Start sampling as soon as a run starts
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout(),
            settle_ms: default_settle(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            elapsed_tick_ms: default_elapsed_tick(),
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            auto_start: default_auto_start(),
        }
    }
}

impl SchedulerSettings {
    /// Interval between elapsed-time reports.
    pub fn elapsed_tick(&self) -> Duration {
        Duration::from_millis(self.elapsed_tick_ms)
    }
}

impl TelemetrySettings {
    /// Interval between telemetry polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> String {
    "/dev/ttyACM0".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_timeout() -> u64 {
    1000
}

fn default_settle() -> u64 {
    2000
}

fn default_elapsed_tick() -> u64 {
    1000
}

fn default_poll_interval() -> u64 {
    500
}

fn default_auto_start() -> bool {
    true
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load configuration from [`DEFAULT_CONFIG_PATH`] and the environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment variables still
    /// apply. The result is validated before it is returned.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("ILLUMICELL_").split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.device.port.trim().is_empty() {
            return Err(ConfigError::Validation(
                "device.port cannot be empty".to_string(),
            ));
        }

        if self.device.baud_rate == 0 {
            return Err(ConfigError::Validation(
                "device.baud_rate must be > 0".to_string(),
            ));
        }

        if self.scheduler.elapsed_tick_ms == 0 {
            return Err(ConfigError::Validation(
                "scheduler.elapsed_tick_ms must be > 0".to_string(),
            ));
        }

        if self.telemetry.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "telemetry.poll_interval_ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.device.baud_rate, 9600);
        assert_eq!(settings.telemetry.poll_interval(), Duration::from_millis(500));
        assert_eq!(settings.scheduler.elapsed_tick(), Duration::from_secs(1));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.device, DeviceSettings::default());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[device]\nport = \"COM8\"\n\n[telemetry]\nauto_start = false"
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.device.port, "COM8");
        assert_eq!(settings.device.baud_rate, 9600);
        assert!(!settings.telemetry.auto_start);
        assert_eq!(settings.telemetry.poll_interval_ms, 500);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "verbose".to_string();
        let result = settings.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid log_level"));
    }

    #[test]
    fn test_zero_intervals_rejected() {
        let mut settings = Settings::default();
        settings.telemetry.poll_interval_ms = 0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Validation(_))
        ));

        let mut settings = Settings::default();
        settings.scheduler.elapsed_tick_ms = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_empty_port_rejected() {
        let mut settings = Settings::default();
        settings.device.port = "  ".to_string();
        assert!(settings.validate().is_err());
    }
}
