//! # Telemetry Gatherer Library
//!
//! Live acquisition of framed telemetry from hobby electronics (flight
//! loggers, chargers, multimeters, GPS units) over serial links.
//!
//! The pipeline runs leaf to root:
//!
//! - [`serial`]: timeout-bounded reads from a serial port or a replay capture
//! - [`framing`]: carving checksummed frames out of the chunked byte stream
//! - [`decoder`]: turning frames into numeric samples
//! - [`acquisition`]: grouping samples into series on a background worker

pub mod acquisition;
pub mod config;
pub mod decoder;
pub mod device;
pub mod error;
pub mod framing;
pub mod serial;
