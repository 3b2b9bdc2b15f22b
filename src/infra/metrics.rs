//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::types::TransitionKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, ≤5120, >5120
const BUCKET_BOUNDS: [u64; 10] = [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120];
const NUM_BUCKETS: usize = 11;

pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120, 10240];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Total positions ever processed (monotonic)
    positions_total: AtomicU64,
    /// Positions since last report (reset on report)
    positions_since_report: AtomicU64,
    /// Sum of evaluation latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max evaluation latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Evaluation latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Positions dropped at ingest because the engine channel was full
    positions_dropped: AtomicU64,
    /// Fixes ignored while tracking was unavailable
    positions_ignored: AtomicU64,
    location_reports_sent: AtomicU64,
    location_reports_failed: AtomicU64,
    /// Location reports dropped because the dispatch queue was full
    location_reports_dropped: AtomicU64,
    alerts_sent: AtomicU64,
    alerts_failed: AtomicU64,
    alerts_dropped: AtomicU64,
    transitions_entered: AtomicU64,
    transitions_exited: AtomicU64,
    resync_ok: AtomicU64,
    resync_failed: AtomicU64,
    /// Resyncs that actually swapped in a different zone
    resync_changed: AtomicU64,
    /// Terminal position source failures
    source_failures: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            positions_total: AtomicU64::new(0),
            positions_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            positions_dropped: AtomicU64::new(0),
            positions_ignored: AtomicU64::new(0),
            location_reports_sent: AtomicU64::new(0),
            location_reports_failed: AtomicU64::new(0),
            location_reports_dropped: AtomicU64::new(0),
            alerts_sent: AtomicU64::new(0),
            alerts_failed: AtomicU64::new(0),
            alerts_dropped: AtomicU64::new(0),
            transitions_entered: AtomicU64::new(0),
            transitions_exited: AtomicU64::new(0),
            resync_ok: AtomicU64::new(0),
            resync_failed: AtomicU64::new(0),
            resync_changed: AtomicU64::new(0),
            source_failures: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a position was processed with given latency (lock-free)
    #[inline]
    pub fn record_position_processed(&self, latency_us: u64) {
        self.positions_total.fetch_add(1, Ordering::Relaxed);
        self.positions_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_position_dropped(&self) {
        self.positions_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_position_ignored(&self) {
        self.positions_ignored.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_location_report(&self, ok: bool) {
        if ok {
            self.location_reports_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.location_reports_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_location_report_dropped(&self) {
        self.location_reports_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_alert(&self, ok: bool) {
        if ok {
            self.alerts_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.alerts_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_alert_dropped(&self) {
        self.alerts_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_transition(&self, kind: TransitionKind) {
        match kind {
            TransitionKind::Entered => self.transitions_entered.fetch_add(1, Ordering::Relaxed),
            TransitionKind::Exited => self.transitions_exited.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Record a resync attempt outcome; `changed` only counts on success
    #[inline]
    pub fn record_resync(&self, ok: bool, changed: bool) {
        if !ok {
            self.resync_failed.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.resync_ok.fetch_add(1, Ordering::Relaxed);
        if changed {
            self.resync_changed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_source_failure(&self) {
        self.source_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn positions_total(&self) -> u64 {
        self.positions_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn positions_dropped(&self) -> u64 {
        self.positions_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn location_reports_sent(&self) -> u64 {
        self.location_reports_sent.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn location_reports_failed(&self) -> u64 {
        self.location_reports_failed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn location_reports_dropped(&self) -> u64 {
        self.location_reports_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn alerts_sent(&self) -> u64 {
        self.alerts_sent.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn alerts_failed(&self) -> u64 {
        self.alerts_failed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn resync_ok(&self) -> u64 {
        self.resync_ok.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn resync_failed(&self) -> u64 {
        self.resync_failed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn resync_changed(&self) -> u64 {
        self.resync_changed.load(Ordering::Relaxed)
    }

    /// Generate a metrics summary, resetting periodic counters
    pub fn report(&self) -> MetricsSummary {
        // Swap periodic counters to zero and get their values
        let positions_count = self.positions_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let positions_per_sec = if elapsed.as_secs_f64() > 0.0 {
            positions_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let avg_latency = if positions_count > 0 { latency_sum / positions_count } else { 0 };

        MetricsSummary {
            positions_total: self.positions_total.load(Ordering::Relaxed),
            positions_per_sec,
            avg_eval_latency_us: avg_latency,
            max_eval_latency_us: max_latency,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            positions_dropped: self.positions_dropped.load(Ordering::Relaxed),
            positions_ignored: self.positions_ignored.load(Ordering::Relaxed),
            location_reports_sent: self.location_reports_sent.load(Ordering::Relaxed),
            location_reports_failed: self.location_reports_failed.load(Ordering::Relaxed),
            location_reports_dropped: self.location_reports_dropped.load(Ordering::Relaxed),
            alerts_sent: self.alerts_sent.load(Ordering::Relaxed),
            alerts_failed: self.alerts_failed.load(Ordering::Relaxed),
            alerts_dropped: self.alerts_dropped.load(Ordering::Relaxed),
            transitions_entered: self.transitions_entered.load(Ordering::Relaxed),
            transitions_exited: self.transitions_exited.load(Ordering::Relaxed),
            resync_ok: self.resync_ok.load(Ordering::Relaxed),
            resync_failed: self.resync_failed.load(Ordering::Relaxed),
            resync_changed: self.resync_changed.load(Ordering::Relaxed),
            source_failures: self.source_failures.load(Ordering::Relaxed),
        }
    }
}

/// Summary of metrics for reporting
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub positions_total: u64,
    pub positions_per_sec: f64,
    pub avg_eval_latency_us: u64,
    pub max_eval_latency_us: u64,
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p99_us: u64,
    pub positions_dropped: u64,
    pub positions_ignored: u64,
    pub location_reports_sent: u64,
    pub location_reports_failed: u64,
    pub location_reports_dropped: u64,
    pub alerts_sent: u64,
    pub alerts_failed: u64,
    pub alerts_dropped: u64,
    pub transitions_entered: u64,
    pub transitions_exited: u64,
    pub resync_ok: u64,
    pub resync_failed: u64,
    pub resync_changed: u64,
    pub source_failures: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            positions_total = %self.positions_total,
            positions_per_sec = format!("{:.1}", self.positions_per_sec),
            avg_latency_us = %self.avg_eval_latency_us,
            max_latency_us = %self.max_eval_latency_us,
            p99_us = %self.lat_p99_us,
            reports_sent = %self.location_reports_sent,
            reports_failed = %self.location_reports_failed,
            alerts_sent = %self.alerts_sent,
            alerts_failed = %self.alerts_failed,
            entered = %self.transitions_entered,
            exited = %self.transitions_exited,
            resync_ok = %self.resync_ok,
            resync_failed = %self.resync_failed,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.positions_total(), 0);
        assert_eq!(metrics.alerts_sent(), 0);
    }

    #[test]
    fn test_record_position() {
        let metrics = Metrics::new();

        metrics.record_position_processed(15);
        assert_eq!(metrics.positions_total(), 1);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 15);

        metrics.record_position_processed(30);
        assert_eq!(metrics.positions_total(), 2);
        assert_eq!(metrics.latency_max_us.load(Ordering::Relaxed), 30);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(10), 0);
        assert_eq!(bucket_index(11), 1);
        assert_eq!(bucket_index(5120), 9);
        assert_eq!(bucket_index(5121), 10);
    }

    #[test]
    fn test_report_resets_periodic_counters() {
        let metrics = Metrics::new();
        metrics.record_position_processed(15);
        metrics.record_position_processed(25);

        let summary = metrics.report();
        assert_eq!(summary.positions_total, 2);
        assert_eq!(summary.avg_eval_latency_us, 20);
        assert_eq!(summary.max_eval_latency_us, 25);
        assert_eq!(summary.lat_buckets.iter().sum::<u64>(), 2);

        let summary = metrics.report();
        // Monotonic total survives, periodic values reset
        assert_eq!(summary.positions_total, 2);
        assert_eq!(summary.avg_eval_latency_us, 0);
        assert_eq!(summary.lat_buckets.iter().sum::<u64>(), 0);
    }

    #[test]
    fn test_resync_and_transition_counters() {
        let metrics = Metrics::new();
        metrics.record_resync(true, false);
        metrics.record_resync(true, true);
        metrics.record_resync(false, true);
        metrics.record_transition(TransitionKind::Entered);
        metrics.record_transition(TransitionKind::Exited);
        metrics.record_transition(TransitionKind::Exited);

        let summary = metrics.report();
        assert_eq!(summary.resync_ok, 2);
        assert_eq!(summary.resync_changed, 1);
        assert_eq!(summary.resync_failed, 1);
        assert_eq!(summary.transitions_entered, 1);
        assert_eq!(summary.transitions_exited, 2);
    }

    #[test]
    fn test_percentile_from_buckets() {
        let mut buckets = [0u64; NUM_BUCKETS];
        assert_eq!(percentile_from_buckets(&buckets, 0.99), 0);

        buckets[0] = 98;
        buckets[5] = 2;
        assert_eq!(percentile_from_buckets(&buckets, 0.50), 10);
        assert_eq!(percentile_from_buckets(&buckets, 0.99), 320);
    }
}
