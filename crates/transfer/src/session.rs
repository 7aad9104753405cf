use std::time::{Duration, Instant};

use crate::throughput::ThroughputTracker;

/// A progress figure worth advertising.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub instant_kbps: f64,
    pub average_kbps: f64,
}

/// Bookkeeping for one operation run.
///
/// Not internally synchronized; the owning controller keeps it behind its
/// state lock.
#[derive(Debug, Default)]
pub struct TransferSession {
    run_id: String,
    resource: String,
    total_bytes: Option<u64>,
    tracker: ThroughputTracker,
    started_at: Option<Instant>,
    cancel_reason: Option<String>,
    last_percent: Option<u8>,
    samples_seen: u32,
}

impl TransferSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets every field and opens a new run against `resource`.
    pub fn begin(&mut self, resource: impl Into<String>, total_bytes: Option<u64>) {
        *self = Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            resource: resource.into(),
            total_bytes,
            started_at: Some(Instant::now()),
            ..Self::default()
        };
    }

    /// Feeds one engine sample.
    ///
    /// Returns `None` when the total is unknown (zero), when the percentage
    /// did not move since the last report, or when the sample claims 100 %:
    /// the completed transfer gets its 100 % from the controller exactly once.
    pub fn record_progress(
        &mut self,
        bytes: u64,
        total: u64,
        at: Instant,
    ) -> Option<ProgressUpdate> {
        self.samples_seen = self.samples_seen.saturating_add(1);
        let throughput = self.tracker.sample(bytes, at);

        if total == 0 {
            return None;
        }
        self.observe_total(total);

        let percent = percent_of(bytes, total);
        if percent >= 100 || self.last_percent == Some(percent) {
            return None;
        }
        self.last_percent = Some(percent);

        Some(ProgressUpdate {
            percent,
            instant_kbps: throughput.instant_kbps,
            average_kbps: throughput.average_kbps,
        })
    }

    /// Records an engine-reported total. Zero means "unknown" and is ignored.
    pub fn observe_total(&mut self, total: u64) {
        if total != 0 {
            self.total_bytes = Some(total);
        }
    }

    /// Marks that 100 % has been reported.
    pub fn mark_finished(&mut self) {
        self.last_percent = Some(100);
    }

    /// Starts a fresh throughput window (after a resume or phase change).
    pub fn reseed(&mut self) {
        self.tracker.reseed();
    }

    pub fn set_cancel_reason(&mut self, reason: impl Into<String>) {
        self.cancel_reason = Some(reason.into());
    }

    /// `true` once a cancel was requested for this run.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_reason.is_some()
    }

    /// The stored cancellation reason, or an empty string.
    pub fn cancel_reason(&self) -> &str {
        self.cancel_reason.as_deref().unwrap_or_default()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }

    pub fn last_percent(&self) -> Option<u8> {
        self.last_percent
    }

    /// Number of engine progress samples seen this run, deduplicated or not.
    pub fn samples_seen(&self) -> u32 {
        self.samples_seen
    }

    /// Time since [`begin`](Self::begin), or zero before the first run.
    pub fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }
}

/// floor(bytes * 100 / total), clamped to 100.
fn percent_of(bytes: u64, total: u64) -> u8 {
    let pct = u128::from(bytes) * 100 / u128::from(total);
    pct.min(100) as u8
}
