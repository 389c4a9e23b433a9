//! # Acquisition Module
//!
//! Turns decoded frames into time-stamped series.
//!
//! This module handles:
//! - Grouping samples into series by device context
//! - Device readiness supervision through a retry budget
//! - Cycle pacing with drift compensation for fixed-rate devices
//! - Finalizing or discarding the open series on every exit path
//! - Running the worker as a background task with cooperative cancellation

pub mod drift;
pub mod scheduler;
pub mod session;
pub mod sink;

pub use scheduler::{
    AcquisitionHandle, AcquisitionScheduler, Diagnostics, ExitReason, Progress, SessionReport,
};
pub use session::{AcquisitionSession, SessionSettings, TimeBase};
pub use sink::{MemorySeriesSink, SeriesId, SeriesSink};
