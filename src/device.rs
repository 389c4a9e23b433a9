//! # Device Descriptor
//!
//! Read-only description of how a device frames its telemetry. Everything the
//! synchronizers know about a byte stream comes from here.

use serde::Deserialize;
use std::time::Duration;

use crate::framing::checksum::ChecksumSpec;

/// Default minimum frame length; shorter delimiter matches are false positives
pub const DEFAULT_MIN_FRAME_LEN: usize = 8;

/// How frames are carved out of the byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramingMode {
    /// Variable-length frames between start and end delimiters
    #[default]
    Delimited,
    /// Every frame is exactly `block_size` bytes
    FixedBlock,
}

/// End delimiter of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    /// One terminating byte (e.g. `\n`)
    Single(u8),
    /// Two terminating bytes (e.g. `\r\n`)
    Pair(u8, u8),
}

impl Ending {
    /// Build from the configured byte list
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match *bytes {
            [last] => Some(Ending::Single(last)),
            [first, last] => Some(Ending::Pair(first, last)),
            _ => None,
        }
    }

    /// Number of bytes in the delimiter
    pub fn width(&self) -> usize {
        match self {
            Ending::Single(_) => 1,
            Ending::Pair(..) => 2,
        }
    }

    /// The byte that completes the delimiter
    pub fn last(&self) -> u8 {
        match *self {
            Ending::Single(last) | Ending::Pair(_, last) => last,
        }
    }

    /// Whether `buf` finishes with this delimiter
    pub fn terminates(&self, buf: &[u8]) -> bool {
        match *self {
            Ending::Single(last) => buf.last() == Some(&last),
            Ending::Pair(first, last) => buf.ends_with(&[first, last]),
        }
    }
}

/// Byte-level frame layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    /// Start delimiter
    pub start: u8,
    /// End delimiter
    pub ending: Ending,
    /// Minimum accepted frame length
    pub min_len: usize,
    /// Maximum frame length before a candidate is abandoned
    pub max_len: usize,
    /// Trailing checksum declaration
    pub checksum: ChecksumSpec,
}

impl FrameLayout {
    /// Check the trailing checksum of a complete frame
    pub fn is_valid(&self, frame: &[u8]) -> bool {
        self.checksum.is_valid(frame, self.ending.width())
    }
}

/// Everything the acquisition pipeline needs to know about one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Human readable device name
    pub name: String,
    /// Framing strategy
    pub framing: FramingMode,
    /// Frame layout
    pub layout: FrameLayout,
    /// Upper bound for a single read
    pub read_size: usize,
    /// Frame size for [`FramingMode::FixedBlock`]
    pub block_size: usize,
    /// Nominal cycle time; zero means free-running
    pub cycle_time: Duration,
    /// Highest channel number accepted from the device
    pub channel_count: Option<u32>,
}

impl DeviceDescriptor {
    /// Free-running delimited device with the given delimiters
    pub fn delimited(name: &str, start: u8, ending: Ending) -> Self {
        Self {
            name: name.to_string(),
            framing: FramingMode::Delimited,
            layout: FrameLayout {
                start,
                ending,
                min_len: DEFAULT_MIN_FRAME_LEN,
                max_len: 512,
                checksum: ChecksumSpec::none(),
            },
            read_size: 256,
            block_size: 0,
            cycle_time: Duration::ZERO,
            channel_count: None,
        }
    }

    /// Whether the device delivers samples at a fixed nominal rate
    pub fn is_fixed_rate(&self) -> bool {
        !self.cycle_time.is_zero()
    }
}
