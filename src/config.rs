//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fmt::Display;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::acquisition::{SessionSettings, TimeBase};
use crate::decoder::CsvPayloadDecoder;
use crate::device::{DeviceDescriptor, Ending, FrameLayout, FramingMode};
use crate::error::{GathererError, Result};
use crate::framing::checksum::{ChecksumKind, ChecksumSpec, Radix};
use crate::framing::ReadSettings;

/// Baud rates accepted for serial devices
pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600,
];

/// Longest accepted nominal sample period (one hour)
pub const MAX_CYCLE_TIME_MS: u64 = 3_600_000;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub serial: SerialConfig,
    pub device: DeviceConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    /// Device path; empty means try the default paths
    #[serde(default)]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,

    #[serde(default = "default_parity")]
    pub parity: String,

    /// Timeout of a single read
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Frame layout and payload format of the device
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "default_device_name")]
    pub name: String,

    #[serde(default)]
    pub framing: FramingMode,

    #[serde(default = "default_start_delimiter")]
    pub start_delimiter: u8,

    #[serde(default = "default_ending")]
    pub ending: Vec<u8>,

    #[serde(default = "default_min_frame_len")]
    pub min_frame_len: usize,

    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,

    #[serde(default = "default_read_size")]
    pub read_size: usize,

    /// Frame size for fixed block framing
    #[serde(default)]
    pub block_size: usize,

    #[serde(default)]
    pub checksum: ChecksumConfig,

    /// Nominal cycle time; 0 for free-running devices
    #[serde(default)]
    pub cycle_time_ms: u64,

    #[serde(default)]
    pub channel_count: Option<u32>,

    #[serde(default = "default_separator")]
    pub separator: char,

    #[serde(default = "default_time_unit_factor")]
    pub time_unit_factor: f64,

    /// Mode names by device state, starting at state 1
    #[serde(default)]
    pub modes: Vec<String>,
}

/// Trailing checksum field
#[derive(Debug, Deserialize, Clone)]
pub struct ChecksumConfig {
    #[serde(default)]
    pub kind: ChecksumKind,

    #[serde(default)]
    pub radix: Radix,

    #[serde(default = "default_checksum_width")]
    pub width: usize,
}

/// Acquisition tuning
#[derive(Debug, Deserialize, Clone)]
pub struct AcquisitionConfig {
    /// Read timeouts tolerated before the device counts as absent
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    #[serde(default = "default_xfer_error_limit")]
    pub xfer_error_limit: u32,

    /// Shorter series are discarded
    #[serde(default = "default_min_series_samples")]
    pub min_series_samples: usize,

    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Sample time stamping; nominal for fixed-rate devices when unset,
    /// wall clock otherwise
    #[serde(default)]
    pub time_base: Option<TimeBase>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily rolling log files; console only when unset
    #[serde(default)]
    pub directory: Option<String>,

    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
}

// Default value functions
fn default_baud_rate() -> u32 { 9600 }
fn default_data_bits() -> u8 { 8 }
fn default_stop_bits() -> u8 { 1 }
fn default_parity() -> String { "none".to_string() }
fn default_timeout_ms() -> u64 { 5000 }

fn default_device_name() -> String { "CSV serial device".to_string() }
fn default_start_delimiter() -> u8 { b'$' }
fn default_ending() -> Vec<u8> { vec![b'\r', b'\n'] }
fn default_min_frame_len() -> usize { crate::device::DEFAULT_MIN_FRAME_LEN }
fn default_max_frame_len() -> usize { 512 }
fn default_read_size() -> usize { 256 }
fn default_separator() -> char { crate::decoder::csv::DEFAULT_SEPARATOR }
fn default_time_unit_factor() -> f64 { crate::decoder::csv::DEFAULT_TIME_UNIT_FACTOR }
fn default_checksum_width() -> usize { 2 }

fn default_retry_budget() -> u32 { crate::acquisition::session::DEFAULT_RETRY_BUDGET }
fn default_xfer_error_limit() -> u32 { crate::framing::DEFAULT_XFER_ERROR_LIMIT }
fn default_min_series_samples() -> usize { crate::acquisition::session::DEFAULT_MIN_SERIES_SAMPLES }
fn default_progress_interval() -> u64 { crate::acquisition::scheduler::DEFAULT_PROGRESS_INTERVAL }

fn default_log_level() -> String { "info".to_string() }
fn default_log_file_prefix() -> String { "telemetry-gatherer.log".to_string() }

impl Default for ChecksumConfig {
    fn default() -> Self {
        Self {
            kind: ChecksumKind::None,
            radix: Radix::Hex,
            width: default_checksum_width(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            retry_budget: default_retry_budget(),
            xfer_error_limit: default_xfer_error_limit(),
            min_series_samples: default_min_series_samples(),
            progress_interval: default_progress_interval(),
            time_base: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
            file_prefix: default_log_file_prefix(),
        }
    }
}

fn invalid(message: impl Display) -> GathererError {
    GathererError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use telemetry_gatherer::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Read tuning for the frame synchronizer
    pub fn read_settings(&self) -> ReadSettings {
        ReadSettings {
            timeout: Duration::from_millis(self.serial.timeout_ms),
            xfer_error_limit: self.acquisition.xfer_error_limit,
        }
    }

    /// Configured time base, or the one implied by the device's cycle time
    pub fn time_base(&self) -> TimeBase {
        match self.acquisition.time_base {
            Some(time_base) => time_base,
            None if self.device.cycle_time_ms > 0 => TimeBase::Nominal,
            None => TimeBase::WallClock,
        }
    }

    /// Session tuning for the given device
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            retry_budget: self.acquisition.retry_budget,
            min_series_samples: self.acquisition.min_series_samples,
            time_base: self.time_base(),
            cycle_time: Duration::from_millis(self.device.cycle_time_ms),
            channel_count: self.device.channel_count,
        }
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        // Serial line settings
        if !SUPPORTED_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(invalid(format!(
                "baud_rate must be one of: {:?}",
                SUPPORTED_BAUD_RATES
            )));
        }

        if !(5..=8).contains(&self.serial.data_bits) {
            return Err(invalid("data_bits must be between 5 and 8"));
        }

        if ![1, 2].contains(&self.serial.stop_bits) {
            return Err(invalid("stop_bits must be 1 or 2"));
        }

        if !["none", "odd", "even"].contains(&self.serial.parity.as_str()) {
            return Err(invalid("parity must be one of: none, odd, even"));
        }

        if self.serial.timeout_ms == 0 || self.serial.timeout_ms > 60000 {
            return Err(invalid("timeout_ms must be between 1 and 60000"));
        }

        // Frame layout
        let device = &self.device;
        if device.ending.is_empty() || device.ending.len() > 2 {
            return Err(invalid("ending must have one or two bytes"));
        }

        if device.ending.contains(&device.start_delimiter) {
            return Err(invalid("start_delimiter must differ from the ending bytes"));
        }

        if device.min_frame_len <= device.ending.len() {
            return Err(invalid("min_frame_len must exceed the ending length"));
        }

        if device.max_frame_len < device.min_frame_len {
            return Err(invalid("max_frame_len must not be less than min_frame_len"));
        }

        if device.read_size == 0 || device.read_size > 65536 {
            return Err(invalid("read_size must be between 1 and 65536"));
        }

        if device.framing == FramingMode::FixedBlock && device.block_size <= device.ending.len() {
            return Err(invalid("block_size must exceed the ending length for fixed_block framing"));
        }

        if device.checksum.kind != ChecksumKind::None
            && (device.checksum.width == 0 || device.checksum.width > 8)
        {
            return Err(invalid("checksum width must be between 1 and 8"));
        }

        if !device.time_unit_factor.is_finite() || device.time_unit_factor <= 0.0 {
            return Err(invalid("time_unit_factor must be a positive number"));
        }

        if device.channel_count == Some(0) {
            return Err(invalid("channel_count must be at least 1"));
        }

        // Acquisition
        if self.acquisition.retry_budget == 0 {
            return Err(invalid("retry_budget must be at least 1"));
        }

        if self.acquisition.progress_interval == 0 {
            return Err(invalid("progress_interval must be at least 1"));
        }

        if device.cycle_time_ms > MAX_CYCLE_TIME_MS {
            return Err(invalid(format!("cycle_time_ms must not exceed {}", MAX_CYCLE_TIME_MS)));
        }

        if self.time_base() == TimeBase::Nominal && device.cycle_time_ms == 0 {
            return Err(invalid("time_base 'nominal' requires cycle_time_ms"));
        }

        // Logging
        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid("log level must be one of: trace, debug, info, warn, error"));
        }

        if self.logging.directory.as_deref() == Some("") {
            return Err(invalid("logging directory cannot be empty when set"));
        }

        Ok(())
    }
}

impl DeviceConfig {
    /// Build the runtime descriptor
    ///
    /// # Errors
    ///
    /// Returns error if the ending does not have one or two bytes
    pub fn descriptor(&self) -> Result<DeviceDescriptor> {
        let ending = Ending::from_bytes(&self.ending)
            .ok_or_else(|| invalid("ending must have one or two bytes"))?;

        let checksum = match self.checksum.kind {
            ChecksumKind::None => ChecksumSpec::none(),
            ChecksumKind::Xor => ChecksumSpec::xor(self.checksum.radix, self.checksum.width),
        };

        Ok(DeviceDescriptor {
            name: self.name.clone(),
            framing: self.framing,
            layout: FrameLayout {
                start: self.start_delimiter,
                ending,
                min_len: self.min_frame_len,
                max_len: self.max_frame_len,
                checksum,
            },
            read_size: self.read_size,
            block_size: self.block_size,
            cycle_time: Duration::from_millis(self.cycle_time_ms),
            channel_count: self.channel_count,
        })
    }

    /// Payload decoder for this device
    pub fn decoder(&self, descriptor: &DeviceDescriptor) -> CsvPayloadDecoder {
        CsvPayloadDecoder::new(descriptor, self.separator)
            .with_time_unit_factor(self.time_unit_factor)
            .with_modes(self.modes.clone())
    }
}
