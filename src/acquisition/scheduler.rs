//! # Acquisition Scheduler
//!
//! The worker loop of one device connection:
//!
//! 1. Stop if cancellation was requested
//! 2. Pull the next framing event (one blocking, timeout-bounded read at most)
//! 3. Decode complete frames and hand the samples to the session
//! 4. For fixed-rate devices, sleep until the next nominal cycle
//! 5. Report progress every N samples
//!
//! Whatever ends the loop, the open series is finalized (or discarded when too
//! short) before the result is returned, and the connection is released by
//! dropping the frame source.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn, Level};

use super::drift::DriftCompensator;
use super::session::{AcquisitionSession, RecordOutcome, SessionSignal};
use super::sink::{SeriesId, SeriesSink};
use crate::decoder::PayloadDecoder;
use crate::device::DeviceDescriptor;
use crate::error::{GathererError, Result};
use crate::framing::{FrameEvent, FrameSource};

/// Default number of samples between progress reports
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10;

/// Progress snapshot passed to the progress callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    /// Samples stored in this session
    pub samples: u64,
    /// Series currently recording
    pub series: Option<SeriesId>,
    /// Samples in the current series
    pub series_samples: usize,
    pub xfer_errors: u32,
}

pub type ProgressCallback = Box<dyn FnMut(&Progress) + Send>;

/// Counters published by the worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub xfer_errors: u32,
    pub retry_budget_remaining: u32,
    pub samples: u64,
    pub decode_errors: u64,
}

#[derive(Debug, Default)]
struct SharedDiagnostics {
    active: AtomicBool,
    xfer_errors: AtomicU32,
    retry_budget_remaining: AtomicU32,
    samples: AtomicU64,
    decode_errors: AtomicU64,
}

impl SharedDiagnostics {
    fn snapshot(&self) -> Diagnostics {
        Diagnostics {
            xfer_errors: self.xfer_errors.load(Ordering::Relaxed),
            retry_budget_remaining: self.retry_budget_remaining.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}

/// Why an acquisition ended without a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Stop requested by the user
    Cancelled,
    /// The device never delivered data
    ActivationTimeout,
}

/// Summary of a finished acquisition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub reason: ExitReason,
    pub finalized_series: u32,
    pub discarded_series: u32,
    pub samples: u64,
    pub xfer_errors: u32,
    pub decode_errors: u64,
}

/// Worker binding frame source, decoder and session
pub struct AcquisitionScheduler<S> {
    device_name: String,
    source: Box<dyn FrameSource>,
    decoder: Box<dyn PayloadDecoder>,
    session: AcquisitionSession<S>,
    drift: Option<DriftCompensator>,
    stop: Arc<AtomicBool>,
    diagnostics: Arc<SharedDiagnostics>,
    progress: Option<ProgressCallback>,
    progress_interval: u64,
    decode_errors: u64,
}

impl<S: SeriesSink> AcquisitionScheduler<S> {
    pub fn new(
        device: &DeviceDescriptor,
        source: Box<dyn FrameSource>,
        decoder: Box<dyn PayloadDecoder>,
        session: AcquisitionSession<S>,
    ) -> Self {
        let drift = device
            .is_fixed_rate()
            .then(|| DriftCompensator::new(device.cycle_time));

        let diagnostics = Arc::new(SharedDiagnostics::default());
        diagnostics
            .retry_budget_remaining
            .store(session.retry_budget_remaining(), Ordering::Relaxed);

        Self {
            device_name: device.name.clone(),
            source,
            decoder,
            session,
            drift,
            stop: Arc::new(AtomicBool::new(false)),
            diagnostics,
            progress: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            decode_errors: 0,
        }
    }

    /// Report progress every `interval` samples
    pub fn with_progress<F>(mut self, interval: u64, callback: F) -> Self
    where
        F: FnMut(&Progress) + Send + 'static,
    {
        self.progress_interval = interval.max(1);
        self.progress = Some(Box::new(callback));
        self
    }

    /// Flag that stops the worker when set
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.snapshot()
    }

    /// Spawn the worker on the tokio runtime
    pub fn start(self) -> AcquisitionHandle
    where
        S: Send + 'static,
    {
        let stop = self.stop_flag();
        let diagnostics = Arc::clone(&self.diagnostics);
        diagnostics.active.store(true, Ordering::SeqCst);

        let task = tokio::spawn(self.run());
        AcquisitionHandle {
            stop,
            diagnostics,
            task: Some(task),
        }
    }

    /// Run the worker inline until it stops
    ///
    /// # Returns
    ///
    /// * `Ok(SessionReport)` - Stopped by request or activation timeout
    ///
    /// # Errors
    ///
    /// Returns the fatal fault (I/O failure, closed connection, transfer
    /// error limit) after the open series has been closed
    pub async fn run(mut self) -> Result<SessionReport> {
        self.diagnostics.active.store(true, Ordering::SeqCst);
        info!("Acquisition from {} started", self.device_name);

        let outcome = self.acquire().await;
        let closed = self.session.close();
        self.publish();
        self.diagnostics.active.store(false, Ordering::SeqCst);

        let xfer_errors = self.source.xfer_errors();
        if xfer_errors > 0 {
            if xfer_error_level(&outcome) == Level::WARN {
                warn!("{} transfer errors occurred during acquisition", xfer_errors);
            } else {
                info!("{} transfer errors occurred during acquisition", xfer_errors);
            }
        }

        let result = match outcome {
            Ok(reason) => closed.map(|_| SessionReport {
                reason,
                finalized_series: self.session.finalized_count(),
                discarded_series: self.session.discarded_count(),
                samples: self.session.sample_count(),
                xfer_errors,
                decode_errors: self.decode_errors,
            }),
            Err(e) => {
                warn!("Acquisition from {} stopped: {}", self.device_name, e);
                if let Err(close_error) = closed {
                    warn!("Failed to close open series: {}", close_error);
                }
                Err(e)
            }
        };

        info!("Releasing connection to {}", self.device_name);
        result
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    async fn acquire(&mut self) -> Result<ExitReason> {
        loop {
            if self.stop_requested() {
                info!("Acquisition stop requested");
                return Ok(ExitReason::Cancelled);
            }

            let event = self.source.next_event().await;
            if self.stop_requested() {
                info!("Acquisition stop requested");
                return Ok(ExitReason::Cancelled);
            }

            match event? {
                FrameEvent::NeedMoreData => {}
                FrameEvent::TimedOut => {
                    if self.session.on_timeout() == SessionSignal::ActivationTimeout {
                        self.publish();
                        return Ok(ExitReason::ActivationTimeout);
                    }
                }
                FrameEvent::Frame(frame) => {
                    let arrived = Instant::now();

                    match self.decoder.decode(&frame) {
                        Ok(sample) => {
                            if let RecordOutcome::Appended { new_series, .. } = self.session.record(sample, arrived)? {
                                if new_series {
                                    self.restart_pacing();
                                }
                                self.report_progress();
                            }
                        }
                        Err(e) => {
                            self.decode_errors += 1;
                            debug!("Skipping undecodable frame: {}", e);
                        }
                    }

                    self.pace(arrived).await;
                }
            }
            self.publish();
        }
    }

    /// Sleep until the next nominal cycle of a fixed-rate device
    async fn pace(&mut self, arrived: Instant) {
        let Some(drift) = self.drift.as_mut() else {
            return;
        };

        drift.begin_cycle(arrived);
        let pause = drift.remaining(Instant::now());
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }

    /// A new series starts its own cycle history
    fn restart_pacing(&mut self) {
        if let Some(drift) = self.drift.as_mut() {
            if drift.drift_nanos() != 0 {
                debug!("Dropping {} ns of cycle drift for the new series", drift.drift_nanos());
            }
            drift.reset();
        }
    }

    fn report_progress(&mut self) {
        let samples = self.session.sample_count();
        if samples % self.progress_interval != 0 {
            return;
        }
        let Some(callback) = self.progress.as_mut() else {
            return;
        };

        let (series, series_samples) = match self.session.open_series() {
            Some((id, count)) => (Some(id), count),
            None => (None, 0),
        };
        callback(&Progress {
            samples,
            series,
            series_samples,
            xfer_errors: self.source.xfer_errors(),
        });
    }

    fn publish(&self) {
        let d = &self.diagnostics;
        d.xfer_errors.store(self.source.xfer_errors(), Ordering::Relaxed);
        d.retry_budget_remaining
            .store(self.session.retry_budget_remaining(), Ordering::Relaxed);
        d.samples.store(self.session.sample_count(), Ordering::Relaxed);
        d.decode_errors.store(self.decode_errors, Ordering::Relaxed);
    }
}

/// A requested stop ends quietly, anything else warns about link errors
fn xfer_error_level(outcome: &Result<ExitReason>) -> Level {
    match outcome {
        Ok(ExitReason::Cancelled) => Level::INFO,
        _ => Level::WARN,
    }
}

/// Control surface of a running worker
pub struct AcquisitionHandle {
    stop: Arc<AtomicBool>,
    diagnostics: Arc<SharedDiagnostics>,
    /// Taken by the first [`AcquisitionHandle::wait`] that completes
    task: Option<JoinHandle<Result<SessionReport>>>,
}

impl AcquisitionHandle {
    /// Ask the worker to stop; an in-flight read completes first
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.diagnostics.active.load(Ordering::SeqCst)
            && self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.snapshot()
    }

    /// Wait for the worker to finish
    ///
    /// # Errors
    ///
    /// The worker's own error, or [`GathererError::Worker`] if it panicked or
    /// its result was already collected
    pub async fn wait(&mut self) -> Result<SessionReport> {
        let Some(task) = self.task.as_mut() else {
            return Err(GathererError::Worker("worker result already collected".to_string()));
        };

        let joined = task.await;
        self.task = None;
        joined.map_err(|e| GathererError::Worker(e.to_string()))?
    }

    /// Wait for the worker to finish and drop the handle
    pub async fn join(mut self) -> Result<SessionReport> {
        self.wait().await
    }
}
