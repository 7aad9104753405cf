use std::time::Instant;

/// Instantaneous and session-average throughput, in KB/s.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Throughput {
    pub instant_kbps: f64,
    pub average_kbps: f64,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    bytes: u64,
    at: Instant,
}

/// Turns cumulative byte counts into throughput figures.
///
/// 1 byte/ms is reported as 1 KB/s. The first sample after [`reset`] or
/// [`reseed`] only establishes a baseline and reports zeros.
///
/// [`reset`]: ThroughputTracker::reset
/// [`reseed`]: ThroughputTracker::reseed
#[derive(Debug, Default)]
pub struct ThroughputTracker {
    baseline: Option<Sample>,
    previous: Option<Sample>,
    last_average: f64,
}

impl ThroughputTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `bytes` transferred so far at `at`.
    pub fn sample(&mut self, bytes: u64, at: Instant) -> Throughput {
        let current = Sample { bytes, at };

        let (Some(baseline), Some(previous)) = (self.baseline, self.previous) else {
            self.baseline = Some(current);
            self.previous = Some(current);
            return Throughput::default();
        };

        let delta_ms = millis_between(previous.at, at);
        if delta_ms <= 0.0 {
            return Throughput {
                instant_kbps: 0.0,
                average_kbps: self.last_average,
            };
        }

        let instant = bytes.saturating_sub(previous.bytes) as f64 / delta_ms;

        let elapsed_ms = millis_between(baseline.at, at);
        let average = if elapsed_ms > 0.0 {
            bytes.saturating_sub(baseline.bytes) as f64 / elapsed_ms
        } else {
            0.0
        };

        self.previous = Some(current);
        self.last_average = average;

        Throughput {
            instant_kbps: instant,
            average_kbps: average,
        }
    }

    /// Forgets the baseline so the next sample starts a new measurement
    /// window. Used after a resume.
    pub fn reseed(&mut self) {
        self.baseline = None;
        self.previous = None;
    }

    /// Clears everything, including the remembered average.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// The most recent session average, or 0 before the second sample.
    pub fn last_average(&self) -> f64 {
        self.last_average
    }
}

fn millis_between(earlier: Instant, later: Instant) -> f64 {
    later.saturating_duration_since(earlier).as_secs_f64() * 1000.0
}
