//! # Cycle Drift Compensation
//!
//! Fixed-rate devices are polled once per nominal cycle. Sleeping a constant
//! `nominal - work` would accumulate timer overshoot, so the measured error of
//! every cycle is fed into the next sleep. Over many cycles the mean spacing
//! converges to the nominal cycle time.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct DriftCompensator {
    nominal: Duration,
    cycle_start: Option<Instant>,
    /// Accumulated (measured - nominal) error in nanoseconds
    drift: i128,
}

impl DriftCompensator {
    pub fn new(nominal: Duration) -> Self {
        Self {
            nominal,
            cycle_start: None,
            drift: 0,
        }
    }

    /// Current accumulated error, negative when cycles ran short
    pub fn drift_nanos(&self) -> i128 {
        self.drift
    }

    /// Mark the start of a cycle and account the length of the previous one
    pub fn begin_cycle(&mut self, now: Instant) {
        let nominal = self.nominal.as_nanos() as i128;

        if let Some(previous) = self.cycle_start {
            let measured = now.saturating_duration_since(previous).as_nanos() as i128;
            self.drift += measured - nominal;

            // More than a whole cycle behind: do not try to catch up
            if self.drift > nominal {
                self.drift = 0;
            } else if self.drift < -nominal {
                self.drift = -nominal;
            }
        }
        self.cycle_start = Some(now);
    }

    /// Time to sleep before the next cycle, given the work done so far
    pub fn remaining(&self, now: Instant) -> Duration {
        let Some(start) = self.cycle_start else {
            return self.nominal;
        };

        let work = now.saturating_duration_since(start).as_nanos() as i128;
        let remaining = self.nominal.as_nanos() as i128 - work - self.drift;
        if remaining <= 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(remaining.min(u64::MAX as i128) as u64)
        }
    }

    /// Forget the cycle history (new series, resumed device)
    pub fn reset(&mut self) {
        self.cycle_start = None;
        self.drift = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOMINAL: Duration = Duration::from_millis(1000);

    #[test]
    fn test_first_cycle_sleeps_nominal_minus_work() {
        let t0 = Instant::now();
        let mut drift = DriftCompensator::new(NOMINAL);
        assert_eq!(drift.remaining(t0), NOMINAL);

        drift.begin_cycle(t0);
        assert_eq!(drift.remaining(t0 + Duration::from_millis(3)), Duration::from_millis(997));
    }

    #[test]
    fn test_overshoot_shortens_next_sleep() {
        let t0 = Instant::now();
        let mut drift = DriftCompensator::new(NOMINAL);
        drift.begin_cycle(t0);

        // Previous cycle took 1020 ms
        let t1 = t0 + Duration::from_millis(1020);
        drift.begin_cycle(t1);
        assert_eq!(drift.drift_nanos(), 20_000_000);
        assert_eq!(drift.remaining(t1), Duration::from_millis(980));
    }

    #[test]
    fn test_mean_spacing_tracks_nominal() {
        let t0 = Instant::now();
        let mut drift = DriftCompensator::new(NOMINAL);
        let mut now = t0;
        let cycles = 50u32;
        let work = Duration::from_millis(4);
        let overshoot = Duration::from_millis(7);

        for _ in 0..cycles {
            drift.begin_cycle(now);
            now += work;
            // The timer always wakes late by a constant amount
            now += drift.remaining(now) + overshoot;
        }

        let total = now - t0;
        let expected = NOMINAL * cycles;
        let error = if total > expected { total - expected } else { expected - total };
        assert!(error <= overshoot * 2, "accumulated error {:?}", error);
    }

    #[test]
    fn test_large_overrun_resets_drift() {
        let t0 = Instant::now();
        let mut drift = DriftCompensator::new(NOMINAL);
        drift.begin_cycle(t0);
        drift.begin_cycle(t0 + Duration::from_millis(2500));

        assert_eq!(drift.drift_nanos(), 0);
        assert_eq!(drift.remaining(t0 + Duration::from_millis(2500)), NOMINAL);
    }

    #[test]
    fn test_work_longer_than_cycle_never_negative() {
        let t0 = Instant::now();
        let mut drift = DriftCompensator::new(NOMINAL);
        drift.begin_cycle(t0);
        assert_eq!(drift.remaining(t0 + Duration::from_millis(1500)), Duration::ZERO);
    }

    #[test]
    fn test_reset() {
        let t0 = Instant::now();
        let mut drift = DriftCompensator::new(NOMINAL);
        drift.begin_cycle(t0);
        drift.begin_cycle(t0 + Duration::from_millis(1100));
        drift.reset();

        assert_eq!(drift.drift_nanos(), 0);
        assert_eq!(drift.remaining(t0), NOMINAL);
    }
}
