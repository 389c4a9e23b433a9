//! # Acquisition Session
//!
//! Owns one logical recording and decides what happens to every decoded
//! sample:
//!
//! - **AwaitingDevice**: no series open. Each read timeout spends one unit of
//!   the retry budget; when it runs out the session signals an activation
//!   timeout once.
//! - **Recording**: a series is open. Samples with the same context are
//!   appended; a context change closes the series and opens the next one.
//!
//! Series shorter than the minimum sample count are discarded instead of
//! finalized.

use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::sink::{series_label, SeriesId, SeriesSink};
use crate::decoder::{DecodedSample, SeriesContext};
use crate::error::Result;

/// Default number of timeouts tolerated before the device counts as absent
pub const DEFAULT_RETRY_BUDGET: u32 = 36;

/// Default minimum number of samples a series needs to be kept
pub const DEFAULT_MIN_SERIES_SAMPLES: usize = 6;

/// Source of the elapsed time stamped on each sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBase {
    /// Host clock since the series started
    #[default]
    WallClock,
    /// Sample index times the nominal cycle time
    Nominal,
    /// Device time stamp relative to the series' first sample
    Device,
}

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub retry_budget: u32,
    pub min_series_samples: usize,
    pub time_base: TimeBase,
    /// Nominal cycle time used by [`TimeBase::Nominal`]
    pub cycle_time: Duration,
    /// Highest accepted channel number
    pub channel_count: Option<u32>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            retry_budget: DEFAULT_RETRY_BUDGET,
            min_series_samples: DEFAULT_MIN_SERIES_SAMPLES,
            time_base: TimeBase::WallClock,
            cycle_time: Duration::ZERO,
            channel_count: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingDevice,
    Recording,
}

/// Reaction to a read timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    Continue,
    /// Retry budget exhausted before the device delivered anything
    ActivationTimeout,
}

/// Why a decoded sample was not stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ChannelOutOfRange(u32),
    LayoutMismatch { expected: usize, actual: usize },
}

/// Result of feeding one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Appended { series: SeriesId, new_series: bool },
    Skipped(SkipReason),
}

/// How a series was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Finalized(SeriesId),
    Discarded(SeriesId),
}

#[derive(Debug)]
struct OpenSeries {
    id: SeriesId,
    sequence: u32,
    context: SeriesContext,
    started_at: Instant,
    first_device_time: Option<Duration>,
    samples: usize,
    /// Value count fixed by the first sample
    layout: usize,
}

/// One recording over one device connection
pub struct AcquisitionSession<S> {
    sink: S,
    settings: SessionSettings,
    retry_budget: u32,
    activation_signalled: bool,
    open: Option<OpenSeries>,
    sequence: u32,
    finalized: u32,
    discarded: u32,
    samples: u64,
}

impl<S: SeriesSink> AcquisitionSession<S> {
    pub fn new(sink: S, settings: SessionSettings) -> Self {
        Self {
            sink,
            retry_budget: settings.retry_budget,
            settings,
            activation_signalled: false,
            open: None,
            sequence: 0,
            finalized: 0,
            discarded: 0,
            samples: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.open.is_some() {
            SessionState::Recording
        } else {
            SessionState::AwaitingDevice
        }
    }

    pub fn retry_budget_remaining(&self) -> u32 {
        self.retry_budget
    }

    /// Samples stored over the whole session
    pub fn sample_count(&self) -> u64 {
        self.samples
    }

    pub fn finalized_count(&self) -> u32 {
        self.finalized
    }

    pub fn discarded_count(&self) -> u32 {
        self.discarded
    }

    /// Id and sample count of the open series
    pub fn open_series(&self) -> Option<(SeriesId, usize)> {
        self.open.as_ref().map(|s| (s.id, s.samples))
    }

    /// Handle a read timeout
    pub fn on_timeout(&mut self) -> SessionSignal {
        if let Some(open) = &self.open {
            debug!("timeout while recording {}, waiting", series_label(open.sequence, &open.context));
            return SessionSignal::Continue;
        }
        if self.activation_signalled {
            return SessionSignal::Continue;
        }

        self.retry_budget = self.retry_budget.saturating_sub(1);
        if self.retry_budget == 0 {
            self.activation_signalled = true;
            warn!(
                "activation timeout: device sent no data after {} attempts",
                self.settings.retry_budget
            );
            return SessionSignal::ActivationTimeout;
        }

        debug!("wait for activation ... {} attempts left", self.retry_budget);
        SessionSignal::Continue
    }

    /// Store one decoded sample received at `now`
    ///
    /// # Errors
    ///
    /// Propagates sink failures
    pub fn record(&mut self, sample: DecodedSample, now: Instant) -> Result<RecordOutcome> {
        self.retry_budget = self.settings.retry_budget;
        self.activation_signalled = false;

        if let Some(max) = self.settings.channel_count {
            if sample.context.channel > max {
                debug!("channel {} exceeds channel count {}, skipping", sample.context.channel, max);
                return Ok(RecordOutcome::Skipped(SkipReason::ChannelOutOfRange(sample.context.channel)));
            }
        }

        let mut new_series = false;
        let mut open = match self.open.take() {
            Some(open) if open.context == sample.context => open,
            previous => {
                self.open = previous;
                self.close()?;
                new_series = true;
                self.start_series(&sample, now)?
            }
        };

        if sample.values.len() != open.layout {
            debug!(
                "sample has {} values, series layout has {}, skipping",
                sample.values.len(),
                open.layout
            );
            let skipped = SkipReason::LayoutMismatch {
                expected: open.layout,
                actual: sample.values.len(),
            };
            self.open = Some(open);
            return Ok(RecordOutcome::Skipped(skipped));
        }

        let offset = self.offset(&open, &sample, now);
        let appended = self.sink.append(open.id, &sample.values, offset);
        if appended.is_ok() {
            open.samples += 1;
            self.samples += 1;
        }
        let series = open.id;
        self.open = Some(open);
        appended?;

        Ok(RecordOutcome::Appended { series, new_series })
    }

    fn offset(&self, open: &OpenSeries, sample: &DecodedSample, now: Instant) -> Duration {
        let wall_clock = now.saturating_duration_since(open.started_at);
        match self.settings.time_base {
            TimeBase::WallClock => wall_clock,
            TimeBase::Nominal => u32::try_from(open.samples)
                .ok()
                .and_then(|n| self.settings.cycle_time.checked_mul(n))
                .unwrap_or(Duration::MAX),
            TimeBase::Device => match (sample.time, open.first_device_time) {
                (Some(time), Some(first)) => time.checked_sub(first).unwrap_or_else(|| {
                    debug!("device time went backwards, using host clock");
                    wall_clock
                }),
                _ => wall_clock,
            },
        }
    }

    fn start_series(&mut self, sample: &DecodedSample, now: Instant) -> Result<OpenSeries> {
        self.sequence += 1;
        let id = self.sink.create_series(self.sequence, &sample.context)?;
        debug!("{} created", series_label(self.sequence, &sample.context));

        Ok(OpenSeries {
            id,
            sequence: self.sequence,
            context: sample.context.clone(),
            started_at: now,
            first_device_time: sample.time,
            samples: 0,
            layout: sample.values.len(),
        })
    }

    /// Close the open series, keeping it only if it reached the minimum size
    ///
    /// # Errors
    ///
    /// Propagates sink failures
    pub fn close(&mut self) -> Result<Option<CloseOutcome>> {
        let Some(open) = self.open.take() else {
            return Ok(None);
        };
        let label = series_label(open.sequence, &open.context);

        if open.samples < self.settings.min_series_samples {
            self.sink.discard(open.id)?;
            self.discarded += 1;
            debug!("{} discarded, only {} samples", label, open.samples);
            return Ok(Some(CloseOutcome::Discarded(open.id)));
        }

        self.sink.finalize(open.id)?;
        self.finalized += 1;
        info!("{} finalized with {} samples", label, open.samples);
        Ok(Some(CloseOutcome::Finalized(open.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::sink::MemorySeriesSink;

    fn sample(channel: u32, mode: &str, value: f64) -> DecodedSample {
        DecodedSample {
            context: SeriesContext::new(channel, mode),
            values: vec![value],
            time: None,
        }
    }

    fn session(settings: SessionSettings) -> (AcquisitionSession<MemorySeriesSink>, MemorySeriesSink) {
        let sink = MemorySeriesSink::new();
        (AcquisitionSession::new(sink.clone(), settings), sink)
    }

    fn guard(min: usize) -> SessionSettings {
        SessionSettings {
            min_series_samples: min,
            ..SessionSettings::default()
        }
    }

    #[test]
    fn test_context_runs_become_series() {
        let (mut session, sink) = session(guard(3));
        let now = Instant::now();
        let tags = ["A", "A", "A", "B", "B", "B", "A", "A", "A"];

        for (i, tag) in tags.iter().enumerate() {
            session.record(sample(1, tag, i as f64), now).unwrap();
        }
        session.close().unwrap();

        let series = sink.finalized();
        assert_eq!(series.len(), 3);
        let labels: Vec<_> = series.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["1) A", "2) B", "3) A"]);
        for (k, s) in series.iter().enumerate() {
            let values: Vec<f64> = s.samples.iter().map(|x| x.values[0]).collect();
            let first = (k * 3) as f64;
            assert_eq!(values, vec![first, first + 1.0, first + 2.0]);
        }
        assert_eq!(session.finalized_count(), 3);
        assert_eq!(session.discarded_count(), 0);
    }

    #[test]
    fn test_short_series_discarded() {
        let (mut session, sink) = session(guard(3));
        let now = Instant::now();

        session.record(sample(1, "A", 1.0), now).unwrap();
        session.record(sample(1, "A", 2.0), now).unwrap();
        session.record(sample(1, "B", 3.0), now).unwrap();
        assert!(sink.snapshot().iter().all(|s| s.label != "1) A"));

        assert!(matches!(session.close().unwrap(), Some(CloseOutcome::Discarded(_))));
        assert!(sink.snapshot().is_empty());
        assert_eq!(session.discarded_count(), 2);
        assert_eq!(session.state(), SessionState::AwaitingDevice);
    }

    #[test]
    fn test_channel_change_starts_new_series() {
        let (mut session, _sink) = session(guard(1));
        let now = Instant::now();

        let first = session.record(sample(1, "charge", 1.0), now).unwrap();
        let second = session.record(sample(2, "charge", 1.0), now).unwrap();
        match (first, second) {
            (
                RecordOutcome::Appended { series: a, new_series: true },
                RecordOutcome::Appended { series: b, new_series: true },
            ) => assert_ne!(a, b),
            other => panic!("unexpected outcomes: {:?}", other),
        }
    }

    #[test]
    fn test_activation_timeout_fires_once_at_budget() {
        let budget = 5;
        let (mut session, _sink) = session(SessionSettings {
            retry_budget: budget,
            ..SessionSettings::default()
        });

        let signals: Vec<_> = (0..budget + 3).map(|_| session.on_timeout()).collect();
        let fired: Vec<_> = signals
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == SessionSignal::ActivationTimeout)
            .map(|(i, _)| i + 1)
            .collect();
        assert_eq!(fired, vec![budget as usize]);
    }

    #[test]
    fn test_frame_after_timeouts_resets_budget() {
        let (mut session, _sink) = session(SessionSettings {
            retry_budget: 3,
            ..SessionSettings::default()
        });

        session.on_timeout();
        session.on_timeout();
        assert_eq!(session.retry_budget_remaining(), 1);
        session.on_timeout();

        let outcome = session.record(sample(1, "A", 1.0), Instant::now()).unwrap();
        assert!(matches!(outcome, RecordOutcome::Appended { new_series: true, .. }));
        assert_eq!(session.retry_budget_remaining(), 3);
        assert_eq!(session.state(), SessionState::Recording);
    }

    #[test]
    fn test_timeouts_while_recording_leave_budget() {
        let (mut session, _sink) = session(SessionSettings {
            retry_budget: 2,
            ..SessionSettings::default()
        });
        session.record(sample(1, "A", 1.0), Instant::now()).unwrap();

        for _ in 0..10 {
            assert_eq!(session.on_timeout(), SessionSignal::Continue);
        }
        assert_eq!(session.retry_budget_remaining(), 2);
    }

    #[test]
    fn test_wall_clock_offsets() {
        let (mut session, sink) = session(guard(1));
        let t0 = Instant::now();

        session.record(sample(1, "A", 1.0), t0).unwrap();
        session.record(sample(1, "A", 2.0), t0 + Duration::from_millis(1500)).unwrap();

        let offsets: Vec<_> = sink.snapshot()[0].samples.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![Duration::ZERO, Duration::from_millis(1500)]);
    }

    #[test]
    fn test_nominal_offsets() {
        let (mut session, sink) = session(SessionSettings {
            time_base: TimeBase::Nominal,
            cycle_time: Duration::from_millis(1000),
            ..guard(1)
        });
        let t0 = Instant::now();

        for k in 0..3u64 {
            // Jittery arrival does not matter
            session.record(sample(1, "A", 0.0), t0 + Duration::from_millis(k * 1013)).unwrap();
        }

        let offsets: Vec<_> = sink.snapshot()[0].samples.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![Duration::ZERO, Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[test]
    fn test_nominal_offset_saturates() {
        let (mut session, sink) = session(SessionSettings {
            time_base: TimeBase::Nominal,
            cycle_time: Duration::MAX,
            ..guard(1)
        });
        let now = Instant::now();

        session.record(sample(1, "A", 0.0), now).unwrap();
        session.record(sample(1, "A", 0.0), now).unwrap();

        let offsets: Vec<_> = sink.snapshot()[0].samples.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![Duration::ZERO, Duration::MAX]);
    }

    #[test]
    fn test_device_offsets_relative_to_first_sample() {
        let (mut session, sink) = session(SessionSettings {
            time_base: TimeBase::Device,
            ..guard(1)
        });
        let now = Instant::now();

        for secs in [100u64, 102, 107] {
            let mut s = sample(1, "A", 0.0);
            s.time = Some(Duration::from_secs(secs));
            session.record(s, now).unwrap();
        }

        let offsets: Vec<_> = sink.snapshot()[0].samples.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![Duration::ZERO, Duration::from_secs(2), Duration::from_secs(7)]);
    }

    #[test]
    fn test_channel_out_of_range_skipped() {
        let (mut session, sink) = session(SessionSettings {
            channel_count: Some(2),
            ..guard(1)
        });

        let outcome = session.record(sample(3, "A", 1.0), Instant::now()).unwrap();
        assert_eq!(outcome, RecordOutcome::Skipped(SkipReason::ChannelOutOfRange(3)));
        assert!(sink.snapshot().is_empty());
        assert_eq!(session.state(), SessionState::AwaitingDevice);
    }

    #[test]
    fn test_layout_mismatch_skipped() {
        let (mut session, sink) = session(guard(1));
        let now = Instant::now();

        session.record(sample(1, "A", 1.0), now).unwrap();
        let mut wide = sample(1, "A", 2.0);
        wide.values.push(3.0);

        assert_eq!(
            session.record(wide, now).unwrap(),
            RecordOutcome::Skipped(SkipReason::LayoutMismatch { expected: 1, actual: 2 })
        );
        assert_eq!(sink.snapshot()[0].samples.len(), 1);
        assert_eq!(session.sample_count(), 1);
    }
}
