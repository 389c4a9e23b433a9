//! # Payload Decoding
//!
//! Turns validated frames into numeric samples. Each device family provides
//! one [`PayloadDecoder`]; the acquisition loop only sees the trait.
//!
//! Decoders are lenient per field: a value that fails to parse is replaced by
//! zero. Only a frame whose structure cannot be recovered at all (no channel,
//! too few fields) yields [`GathererError::Decode`](crate::error::GathererError::Decode).

pub mod csv;

pub use csv::CsvPayloadDecoder;

use std::fmt;
use std::time::Duration;

use crate::error::Result;
use crate::framing::Frame;

/// Device context a sample was recorded in
///
/// A change of context between consecutive samples starts a new series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesContext {
    /// Channel / outlet number reported by the device
    pub channel: u32,
    /// Operating mode name (e.g. "charge", "discharge")
    pub mode: String,
}

impl SeriesContext {
    pub fn new(channel: u32, mode: impl Into<String>) -> Self {
        Self {
            channel,
            mode: mode.into(),
        }
    }
}

impl fmt::Display for SeriesContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel {} {}", self.channel, self.mode)
    }
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSample {
    pub context: SeriesContext,
    pub values: Vec<f64>,
    /// Device-reported time stamp, if the frame carries a usable one
    pub time: Option<Duration>,
}

/// Per-device payload decoding capability
#[cfg_attr(test, mockall::automock)]
pub trait PayloadDecoder: Send {
    /// Decode one validated frame
    ///
    /// # Errors
    ///
    /// Returns [`GathererError::Decode`](crate::error::GathererError::Decode)
    /// only if the frame is structurally unusable
    fn decode(&self, frame: &Frame) -> Result<DecodedSample>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_equality_drives_series_split() {
        let a = SeriesContext::new(1, "charge");
        assert_eq!(a, SeriesContext::new(1, "charge"));
        assert_ne!(a, SeriesContext::new(2, "charge"));
        assert_ne!(a, SeriesContext::new(1, "discharge"));
    }

    #[test]
    fn test_context_display() {
        assert_eq!(SeriesContext::new(3, "pause").to_string(), "channel 3 pause");
    }

    #[test]
    fn test_mock_decoder() {
        let mut decoder = MockPayloadDecoder::new();
        decoder.expect_decode().times(1).returning(|frame| {
            Ok(DecodedSample {
                context: SeriesContext::new(1, "mock"),
                values: vec![frame.len() as f64],
                time: None,
            })
        });

        let sample = decoder.decode(&Frame::from(&b"$12345\n"[..])).unwrap();
        assert_eq!(sample.values, vec![7.0]);
    }
}
