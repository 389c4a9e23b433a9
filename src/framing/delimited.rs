//! # Delimited Frame Synchronizer
//!
//! Reassembles variable-length frames from a chunked read stream. A frame runs
//! from the start delimiter to the first end delimiter that yields at least
//! the minimum frame length; anything shorter is a false match and scanning
//! continues past it.
//!
//! Bytes of an incomplete frame are carried in a pending tail across reads.
//! For two-byte endings a "first ending byte seen" flag is carried with the
//! tail so a terminator straddling two reads is still recognised. The flag
//! belongs to the frame being scanned and is cleared whenever a frame is
//! emitted or abandoned.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use super::{Frame, FrameEvent, FrameSource, ReadSettings, SyncState, XferErrorCounter};
use crate::device::{DeviceDescriptor, Ending, FrameLayout};
use crate::error::Result;
use crate::serial::PortReader;

/// Synchronizer for start/end delimited frames
pub struct FrameSynchronizer<P> {
    port: P,
    layout: FrameLayout,
    read_size: usize,
    settings: ReadSettings,
    /// Current raw chunk and the first unscanned index in it
    chunk: Bytes,
    cursor: usize,
    /// Bytes of a frame that did not complete within earlier chunks
    pending: BytesMut,
    first_ending_seen: bool,
    state: SyncState,
    errors: XferErrorCounter,
}

impl<P> std::fmt::Debug for FrameSynchronizer<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSynchronizer")
            .field("pending", &self.pending.len())
            .field("state", &self.state)
            .field("xfer_errors", &self.errors.count())
            .finish_non_exhaustive()
    }
}

impl<P: PortReader> FrameSynchronizer<P> {
    pub fn new(port: P, descriptor: &DeviceDescriptor, settings: ReadSettings) -> Self {
        Self {
            port,
            layout: descriptor.layout.clone(),
            read_size: descriptor.read_size.max(1),
            settings,
            chunk: Bytes::new(),
            cursor: 0,
            pending: BytesMut::new(),
            first_ending_seen: false,
            state: SyncState::InSync,
            errors: XferErrorCounter::new(settings.xfer_error_limit),
        }
    }

    /// Length of the partial frame carried into the next read
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Scan the unscanned part of the current chunk
    fn scan(&mut self) -> Result<FrameEvent> {
        let chunk = self.chunk.clone();
        let in_frame = !self.pending.is_empty();

        let start = if in_frame {
            self.cursor
        } else {
            match chunk[self.cursor..].iter().position(|&b| b == self.layout.start) {
                Some(offset) => self.cursor + offset,
                None => {
                    trace!("no start delimiter in {} bytes, discarding", chunk.len() - self.cursor);
                    self.cursor = chunk.len();
                    return Ok(FrameEvent::NeedMoreData);
                }
            }
        };

        // The start delimiter itself never counts as an ending byte
        let scan_from = if in_frame { start } else { start + 1 };
        let mut first_seen = in_frame && self.first_ending_seen;

        for i in scan_from..chunk.len() {
            let byte = chunk[i];
            let frame_len = self.pending.len() + (i + 1 - start);

            let terminated = match self.layout.ending {
                Ending::Single(last) => byte == last,
                Ending::Pair(first, last) => {
                    let hit = first_seen && byte == last;
                    first_seen = byte == first;
                    hit
                }
            };

            if terminated {
                if frame_len >= self.layout.min_len {
                    let mut bytes = std::mem::take(&mut self.pending);
                    bytes.extend_from_slice(&chunk[start..=i]);
                    self.cursor = i + 1;
                    self.first_ending_seen = false;
                    self.state = SyncState::InSync;
                    return self.accept(bytes.freeze());
                }
                trace!(
                    "terminator at frame length {} is below minimum {}, continuing",
                    frame_len,
                    self.layout.min_len
                );
                continue;
            }

            if frame_len >= self.layout.max_len {
                debug!(
                    "no terminator within {} bytes, abandoning frame, number of errors = {}",
                    self.layout.max_len,
                    self.errors.count() + 1
                );
                self.pending.clear();
                self.first_ending_seen = false;
                self.cursor = i + 1;
                self.state = SyncState::OutOfSync;
                self.errors.record("frame exceeds maximum length")?;
                return Ok(FrameEvent::NeedMoreData);
            }
        }

        self.pending.extend_from_slice(&chunk[start..]);
        self.first_ending_seen = first_seen;
        self.cursor = chunk.len();
        self.state = SyncState::OutOfSync;
        trace!("frame incomplete, carrying {} bytes", self.pending.len());
        Ok(FrameEvent::NeedMoreData)
    }

    /// Validate the checksum of a completed frame
    fn accept(&mut self, bytes: Bytes) -> Result<FrameEvent> {
        if !self.layout.is_valid(&bytes) {
            debug!(
                "checksum error occurred, number of errors = {}",
                self.errors.count() + 1
            );
            self.errors.record("checksum error")?;
            return Ok(FrameEvent::NeedMoreData);
        }

        trace!("frame ({} bytes): {:02X?}", bytes.len(), &bytes[..]);
        Ok(FrameEvent::Frame(Frame::new(bytes)))
    }
}

#[async_trait]
impl<P: PortReader> FrameSource for FrameSynchronizer<P> {
    async fn next_event(&mut self) -> Result<FrameEvent> {
        if self.cursor >= self.chunk.len() {
            match self.port.read_chunk(self.read_size, self.settings.timeout).await {
                Ok(chunk) => {
                    self.chunk = chunk;
                    self.cursor = 0;
                }
                Err(e) if e.is_timeout() => return Ok(FrameEvent::TimedOut),
                Err(e) => return Err(e),
            }
        }

        self.scan()
    }

    fn xfer_errors(&self) -> u32 {
        self.errors.count()
    }

    fn sync_state(&self) -> SyncState {
        self.state
    }
}
