//! # Framing Module
//!
//! Carves device frames out of a chunked, timeout-bounded byte stream.
//!
//! This module handles:
//! - Start/end delimiter scanning across chunk boundaries
//! - Minimum-length guard against false terminator matches
//! - Checksum validation of completed frames
//! - Resynchronization of fixed-size reads that lost alignment
//! - Counting transfer errors and escalating past a threshold

pub mod checksum;
pub mod delimited;
pub mod fixed;

pub use delimited::FrameSynchronizer;
pub use fixed::FixedBlockSynchronizer;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::warn;

use crate::device::{DeviceDescriptor, FramingMode};
use crate::error::{GathererError, Result};
use crate::serial::PortReader;

/// Default number of tolerated transfer errors
pub const DEFAULT_XFER_ERROR_LIMIT: u32 = 10;

/// One complete device transmission, start delimiter through end delimiter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Bytes,
}

impl Frame {
    pub fn new(bytes: Bytes) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<&[u8]> for Frame {
    fn from(bytes: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(bytes))
    }
}

/// Outcome of one synchronizer step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A complete, validated frame
    Frame(Frame),
    /// Data was consumed but no frame completed yet
    NeedMoreData,
    /// The read primitive timed out without delivering anything
    TimedOut,
}

/// Whether the stream is currently aligned on a frame boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    InSync,
    OutOfSync,
}

/// A synchronizer bound to one open connection
#[async_trait]
pub trait FrameSource: Send {
    /// Advance by at most one blocking read
    ///
    /// # Errors
    ///
    /// Fatal read failures and [`GathererError::TransferErrorLimit`]. Timeouts
    /// are reported as [`FrameEvent::TimedOut`], never as errors.
    async fn next_event(&mut self) -> Result<FrameEvent>;

    /// Transfer errors counted so far
    fn xfer_errors(&self) -> u32;

    /// Current alignment
    fn sync_state(&self) -> SyncState;
}

/// Counter of checksum and resynchronization failures
#[derive(Debug, Clone)]
pub struct XferErrorCounter {
    count: u32,
    limit: u32,
}

impl XferErrorCounter {
    pub fn new(limit: u32) -> Self {
        Self { count: 0, limit }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Count one failure
    ///
    /// # Errors
    ///
    /// Returns [`GathererError::TransferErrorLimit`] once the count exceeds the limit
    pub fn record(&mut self, reason: &str) -> Result<()> {
        self.count += 1;
        if self.count > self.limit {
            warn!(
                "{}: number of transfer errors {} exceeds the acceptable limit of {}",
                reason, self.count, self.limit
            );
            return Err(GathererError::TransferErrorLimit {
                errors: self.count,
                limit: self.limit,
            });
        }
        Ok(())
    }
}

/// Read tuning shared by both synchronizers
#[derive(Debug, Clone, Copy)]
pub struct ReadSettings {
    /// Timeout of a single blocking read
    pub timeout: Duration,
    /// Transfer errors tolerated before the link is declared broken
    pub xfer_error_limit: u32,
}

impl Default for ReadSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            xfer_error_limit: DEFAULT_XFER_ERROR_LIMIT,
        }
    }
}

/// Build the synchronizer the descriptor asks for
pub fn frame_source<P>(descriptor: &DeviceDescriptor, port: P, settings: ReadSettings) -> Box<dyn FrameSource>
where
    P: PortReader + 'static,
{
    match descriptor.framing {
        FramingMode::Delimited => Box::new(FrameSynchronizer::new(port, descriptor, settings)),
        FramingMode::FixedBlock => Box::new(FixedBlockSynchronizer::new(port, descriptor, settings)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Ending;
    use crate::serial::port_trait::mocks::ScriptedPort;

    #[test]
    fn test_xfer_counter_escalates_past_limit() {
        let mut counter = XferErrorCounter::new(2);
        assert!(counter.record("checksum").is_ok());
        assert!(counter.record("checksum").is_ok());

        match counter.record("checksum") {
            Err(GathererError::TransferErrorLimit { errors, limit }) => {
                assert_eq!(errors, 3);
                assert_eq!(limit, 2);
            }
            other => panic!("Expected TransferErrorLimit, got: {:?}", other),
        }
        assert_eq!(counter.count(), 3);
    }

    #[test]
    fn test_frame_accessors() {
        let frame = Frame::from(&b"$abc\n"[..]);
        assert_eq!(frame.len(), 5);
        assert!(!frame.is_empty());
        assert_eq!(frame.as_bytes(), b"$abc\n");
    }

    #[tokio::test]
    async fn test_frame_source_selects_variant() {
        let mut descriptor = DeviceDescriptor::delimited("test", b'$', Ending::Single(b'\n'));
        descriptor.layout.min_len = 4;

        let mut delimited = frame_source(&descriptor, ScriptedPort::chunks([b"$abc\n"]), ReadSettings::default());
        assert_eq!(
            delimited.next_event().await.unwrap(),
            FrameEvent::Frame(Frame::from(&b"$abc\n"[..]))
        );

        descriptor.framing = FramingMode::FixedBlock;
        descriptor.block_size = 5;
        let mut fixed = frame_source(&descriptor, ScriptedPort::chunks([b"$xyz\n"]), ReadSettings::default());
        assert_eq!(
            fixed.next_event().await.unwrap(),
            FrameEvent::Frame(Frame::from(&b"$xyz\n"[..]))
        );
        assert_eq!(fixed.sync_state(), SyncState::InSync);
    }
}
