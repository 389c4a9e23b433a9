//! # Serial Communication Module
//!
//! Opens the device connection the acquisition worker reads from.
//!
//! This module handles:
//! - Opening a serial port with the configured line settings
//! - Trying fallback device paths in order
//! - Opening a capture file for replay through the same pipeline
//! - Exposing every connection as a timeout-bounded [`PortReader`]

pub mod port_trait;

pub use port_trait::{PortReader, StreamPort};

use std::path::Path;

use crate::config::SerialConfig;
use crate::error::{GathererError, Result};
use tracing::{debug, info, warn};

/// Default device paths to try (in order of preference)
pub const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyUSB0", // USB-to-serial adapters (most common for loggers)
    "/dev/ttyACM0", // USB CDC devices
];

/// Serial connection to a telemetry device
pub type SerialPort = StreamPort<tokio_serial::SerialStream>;

/// Replay connection reading a raw capture file
pub type ReplayPort = StreamPort<tokio::fs::File>;

/// Open the configured port, falling back to [`DEFAULT_DEVICE_PATHS`] when the
/// configured port is empty
///
/// # Errors
///
/// Returns error if none of the candidate paths can be opened
pub fn open(config: &SerialConfig) -> Result<SerialPort> {
    if config.port.is_empty() {
        open_with_paths(DEFAULT_DEVICE_PATHS, config)
    } else {
        open_with_paths(&[config.port.as_str()], config)
    }
}

/// Open the first path in `paths` that accepts the line settings
///
/// # Arguments
///
/// * `paths` - Device paths to try (e.g., &["/dev/ttyUSB0"])
/// * `config` - Baud rate and line settings
///
/// # Returns
///
/// * `Result<SerialPort>` - Connected port or error
pub fn open_with_paths(paths: &[&str], config: &SerialConfig) -> Result<SerialPort> {
    for path in paths {
        debug!("Trying to open serial port: {}", path);

        match open_port(path, config) {
            Ok(stream) => {
                info!("Opened {} at {} baud", path, config.baud_rate);
                return Ok(StreamPort::new(stream));
            }
            Err(e) => {
                warn!("Failed to open {}: {}", path, e);
                continue;
            }
        }
    }

    Err(GathererError::SerialPortNotFound(paths.join(", ")))
}

/// Open a specific serial port
fn open_port(path: &str, config: &SerialConfig) -> Result<tokio_serial::SerialStream> {
    use tokio_serial::SerialPortBuilderExt;

    let data_bits = match config.data_bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    };
    let stop_bits = match config.stop_bits {
        2 => tokio_serial::StopBits::Two,
        _ => tokio_serial::StopBits::One,
    };
    let parity = match config.parity.as_str() {
        "odd" => tokio_serial::Parity::Odd,
        "even" => tokio_serial::Parity::Even,
        _ => tokio_serial::Parity::None,
    };

    tokio_serial::new(path, config.baud_rate)
        .data_bits(data_bits)
        .parity(parity)
        .stop_bits(stop_bits)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| GathererError::Serial(format!("Failed to open {}: {}", path, e)))
}

/// Open a raw capture for replay
///
/// The stream ends with [`GathererError::ConnectionClosed`] once the file is
/// exhausted, which finalizes the acquisition like an unplugged device.
pub async fn open_replay<P: AsRef<Path>>(path: P) -> Result<ReplayPort> {
    let file = tokio::fs::File::open(path.as_ref()).await?;
    info!("Replaying capture {}", path.as_ref().display());
    Ok(StreamPort::new(file))
}
