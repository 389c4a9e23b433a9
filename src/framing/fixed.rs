//! # Fixed Block Synchronizer
//!
//! For devices that always transmit frames of exactly `block_size` bytes. A
//! block is accepted when it opens with the start delimiter and closes with
//! the end delimiter. Otherwise the stream lost alignment:
//!
//! 1. Find the first terminator inside the block
//! 2. Carry the bytes after it forward as the head of the next frame
//! 3. Complete that frame with a supplementary read of the missing length
//!
//! A block without any terminator is discarded. Every resync is a transfer
//! error, so a link that never realigns ends at the error threshold.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use super::{Frame, FrameEvent, FrameSource, ReadSettings, SyncState, XferErrorCounter};
use crate::device::{DeviceDescriptor, Ending, FrameLayout};
use crate::error::Result;
use crate::serial::PortReader;

/// Synchronizer for fixed-size frames
pub struct FixedBlockSynchronizer<P> {
    port: P,
    layout: FrameLayout,
    block_size: usize,
    settings: ReadSettings,
    /// Bytes collected towards the next block
    buf: BytesMut,
    state: SyncState,
    errors: XferErrorCounter,
}

impl<P: PortReader> FixedBlockSynchronizer<P> {
    pub fn new(port: P, descriptor: &DeviceDescriptor, settings: ReadSettings) -> Self {
        let block_size = descriptor.block_size.max(1);
        Self {
            port,
            layout: descriptor.layout.clone(),
            block_size,
            settings,
            buf: BytesMut::with_capacity(block_size),
            state: SyncState::InSync,
            errors: XferErrorCounter::new(settings.xfer_error_limit),
        }
    }

    /// Read until a full block is buffered
    ///
    /// Returns false on timeout; the partial block stays buffered.
    async fn fill(&mut self) -> Result<bool> {
        while self.buf.len() < self.block_size {
            let missing = self.block_size - self.buf.len();
            match self.port.read_chunk(missing, self.settings.timeout).await {
                Ok(chunk) => self.buf.extend_from_slice(&chunk),
                Err(e) if e.is_timeout() => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    fn is_aligned(&self, block: &[u8]) -> bool {
        block.first() == Some(&self.layout.start) && self.layout.ending.terminates(block)
    }

    /// Index of the last byte of the first terminator in `block`
    fn interior_terminator(&self, block: &[u8]) -> Option<usize> {
        match self.layout.ending {
            Ending::Single(last) => block.iter().position(|&b| b == last),
            Ending::Pair(first, last) => {
                // Second half of a terminator that straddled the previous block
                if block.first() == Some(&last) {
                    return Some(0);
                }
                block.windows(2).position(|w| w == [first, last]).map(|p| p + 1)
            }
        }
    }

    fn resync(&mut self, block: Bytes) -> Result<FrameEvent> {
        self.state = SyncState::OutOfSync;
        debug!(
            "block out of sync, number of errors = {}: {:02X?}",
            self.errors.count() + 1,
            &block[..]
        );
        self.errors.record("frame out of sync")?;

        match self.interior_terminator(&block) {
            Some(end) => {
                let carry = &block[end + 1..];
                trace!("resync: carrying {} bytes, {} more to read", carry.len(), end + 1);
                self.buf.extend_from_slice(carry);
            }
            None => trace!("resync: no terminator in block, discarding"),
        }
        Ok(FrameEvent::NeedMoreData)
    }
}

#[async_trait]
impl<P: PortReader> FrameSource for FixedBlockSynchronizer<P> {
    async fn next_event(&mut self) -> Result<FrameEvent> {
        if !self.fill().await? {
            return Ok(FrameEvent::TimedOut);
        }

        let block = self.buf.split().freeze();
        if !self.is_aligned(&block) {
            return self.resync(block);
        }

        self.state = SyncState::InSync;
        if !self.layout.is_valid(&block) {
            debug!(
                "checksum error occurred, number of errors = {}",
                self.errors.count() + 1
            );
            self.errors.record("checksum error")?;
            return Ok(FrameEvent::NeedMoreData);
        }

        Ok(FrameEvent::Frame(Frame::new(block)))
    }

    fn xfer_errors(&self) -> u32 {
        self.errors.count()
    }

    fn sync_state(&self) -> SyncState {
        self.state
    }
}
