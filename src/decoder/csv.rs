//! # CSV Payload Decoder
//!
//! Reference decoder for line oriented loggers and chargers that print their
//! measurements as separated text:
//!
//! ```text
//! $<channel>;<state>;<time>;<v1>;<v2>;...;<vn>;[checksum]\r\n
//! ```
//!
//! - `channel`: outlet / record set number (must parse)
//! - `state`: 1-based operating mode index, mapped to a configured name
//! - `time`: device time in device units, scaled to milliseconds
//! - `v1..vn`: measurement values, unparsable fields become 0

use std::time::Duration;
use tracing::debug;

use super::{DecodedSample, PayloadDecoder, SeriesContext};
use crate::device::DeviceDescriptor;
use crate::error::{GathererError, Result};
use crate::framing::Frame;

/// Default field separator
pub const DEFAULT_SEPARATOR: char = ';';

/// Default factor from device time units (seconds) to milliseconds
pub const DEFAULT_TIME_UNIT_FACTOR: f64 = 1000.0;

/// Decoder for separated-text frames
#[derive(Debug, Clone)]
pub struct CsvPayloadDecoder {
    start: u8,
    /// Bytes to strip from the end: end delimiter plus checksum field
    trailer_len: usize,
    separator: char,
    time_unit_factor: f64,
    modes: Vec<String>,
}

impl CsvPayloadDecoder {
    /// Decoder matching the frame layout of `descriptor`
    pub fn new(descriptor: &DeviceDescriptor, separator: char) -> Self {
        let layout = &descriptor.layout;
        let checksum_width = if layout.checksum.is_present() {
            layout.checksum.width
        } else {
            0
        };

        Self {
            start: layout.start,
            trailer_len: layout.ending.width() + checksum_width,
            separator,
            time_unit_factor: DEFAULT_TIME_UNIT_FACTOR,
            modes: Vec::new(),
        }
    }

    pub fn with_time_unit_factor(mut self, factor: f64) -> Self {
        self.time_unit_factor = factor;
        self
    }

    /// Names of the operating modes, indexed by state number starting at 1
    pub fn with_modes(mut self, modes: Vec<String>) -> Self {
        self.modes = modes;
        self
    }

    /// Name of a device state
    pub fn mode_name(&self, state: u32) -> String {
        state
            .checked_sub(1)
            .and_then(|index| self.modes.get(index as usize))
            .cloned()
            .unwrap_or_else(|| format!("state {}", state))
    }

    fn payload<'a>(&self, frame: &'a [u8]) -> &'a [u8] {
        let body = match frame.first() {
            Some(&b) if b == self.start => &frame[1..],
            _ => frame,
        };
        &body[..body.len().saturating_sub(self.trailer_len)]
    }

    fn device_time(&self, field: &str) -> Option<Duration> {
        let ms = match field.parse::<f64>() {
            Ok(value) => value * self.time_unit_factor,
            Err(_) => {
                debug!("unparsable time field {:?}", field);
                return None;
            }
        };
        if !ms.is_finite() || ms < 0.0 {
            debug!("time field out of range: {}", ms);
            return None;
        }
        match Duration::try_from_secs_f64(ms / 1000.0) {
            Ok(time) => Some(time),
            Err(e) => {
                debug!("time field {} ms not representable: {}", ms, e);
                None
            }
        }
    }
}

impl PayloadDecoder for CsvPayloadDecoder {
    fn decode(&self, frame: &Frame) -> Result<DecodedSample> {
        let text = String::from_utf8_lossy(self.payload(frame.as_bytes()));
        let mut fields: Vec<&str> = text.split(self.separator).map(str::trim).collect();
        if fields.last().is_some_and(|f| f.is_empty()) {
            fields.pop();
        }

        if fields.len() < 3 {
            return Err(GathererError::Decode(format!(
                "expected at least 3 fields, got {}: {:?}",
                fields.len(),
                text
            )));
        }

        let channel = fields[0]
            .parse::<u32>()
            .map_err(|_| GathererError::Decode(format!("invalid channel {:?}", fields[0])))?;
        let state = fields[1]
            .parse::<u32>()
            .map_err(|_| GathererError::Decode(format!("invalid state {:?}", fields[1])))?;
        let time = self.device_time(fields[2]);

        let values = fields[3..]
            .iter()
            .enumerate()
            .map(|(index, field)| {
                field.parse::<f64>().unwrap_or_else(|_| {
                    debug!("value {} unparsable ({:?}), using 0", index + 1, field);
                    0.0
                })
            })
            .collect();

        Ok(DecodedSample {
            context: SeriesContext::new(channel, self.mode_name(state)),
            values,
            time,
        })
    }
}
