//! Configuration loading using Figment
//!
//! Settings are merged from, lowest to highest precedence:
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. environment variables prefixed with `BENCH_DAQ_`
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! BENCH_DAQ_SERIAL__PORT=/dev/ttyUSB0
//! BENCH_DAQ_POLLING__INTERVAL_MS=500
//! BENCH_DAQ_APPLICATION__LOG_LEVEL=debug
//! ```
//!
//! Command-line flags are applied on top by the binary, so loading does not
//! validate. Call [`Settings::validate`] once every override is in place.
//!
//! # Example
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//!
//! [polling]
//! instrument = "spe6103"
//! functions = ["voltage", "current"]
//! interval_ms = 1000
//!
//! [storage]
//! csv_path = "logs/bench.csv"
//! ```

use crate::error::{AppResult, DaqError};
use crate::instrument::{InstrumentType, MeasurementFunction};
use crate::poller::PollInterval;
use crate::scpi::DEFAULT_TERMINATOR;
use crate::tracing_init::{parse_log_level, OutputFormat};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "BENCH_DAQ_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Logging settings
    pub application: ApplicationSettings,
    /// Serial link settings
    pub serial: SerialConfig,
    /// Measurement plan and cadence
    pub polling: PollingConfig,
    /// Reading log settings
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: OutputFormat,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: OutputFormat::Compact,
        }
    }
}

/// Serial port configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port: Option<String>,
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout in milliseconds
    pub timeout_ms: u64,
    /// SCPI line terminator
    pub terminator: String,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 9600,
            timeout_ms: 1000,
            terminator: DEFAULT_TERMINATOR.to_string(),
        }
    }
}

impl SerialConfig {
    /// Read timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Polling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Instrument model behind the port
    pub instrument: InstrumentType,
    /// Functions to sample, one slot each, in order
    pub functions: Vec<MeasurementFunction>,
    /// Time between cycle starts in milliseconds
    pub interval_ms: u64,
    /// Bound on waiting for the poller to exit after stop, in milliseconds
    pub join_timeout_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            instrument: InstrumentType::Mp730889,
            functions: vec![MeasurementFunction::Voltage],
            interval_ms: 1000,
            join_timeout_ms: 1500,
        }
    }
}

impl PollingConfig {
    /// Validated polling interval
    pub fn interval(&self) -> AppResult<PollInterval> {
        PollInterval::from_millis(self.interval_ms)
    }

    /// Join bound as a `Duration`
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// CSV file readings are appended to; logging is off when unset
    pub csv_path: Option<PathBuf>,
}

impl Settings {
    /// Loads defaults and environment overrides, without a file.
    pub fn load() -> AppResult<Self> {
        Self::from_figment(Self::figment(None))
    }

    /// Loads defaults, the TOML file at `path`, then environment overrides.
    ///
    /// A missing file is an error. Use [`Settings::load`] to run without one.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DaqError::Configuration(format!(
                "Configuration file '{}' not found",
                path.display()
            )));
        }
        Self::from_figment(Self::figment(Some(path)))
    }

    /// Provider chain used by the loaders.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Renders the settings as a TOML document that [`Settings::load_from`] accepts.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| {
            DaqError::Configuration(format!("Failed to serialize settings: {}", e))
        })
    }

    fn from_figment(figment: Figment) -> AppResult<Self> {
        Ok(figment.extract()?)
    }

    /// Validate configuration after loading or after CLI overrides
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Baud rate and read timeout are non-zero
    /// - Terminator is non-empty
    /// - Polling interval is within 200-60000 ms
    pub fn validate(&self) -> AppResult<()> {
        parse_log_level(&self.application.log_level)?;

        if self.serial.baud_rate == 0 {
            return Err(DaqError::Configuration(
                "serial.baud_rate must be greater than 0".to_string(),
            ));
        }

        if self.serial.timeout_ms == 0 {
            return Err(DaqError::Configuration(
                "serial.timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.serial.terminator.is_empty() {
            return Err(DaqError::Configuration(
                "serial.terminator cannot be empty".to_string(),
            ));
        }

        self.polling.interval()?;
        Ok(())
    }
}
