//! Action metrics.
//!
//! [`ActionMetrics`] holds the counters an action exports under its
//! component type, e.g. `mapper.items.read`:
//!
//! | Metric | Kind |
//! |--------|------|
//! | `{action}.items.read` | counter |
//! | `{action}.items.processed` | counter |
//! | `{action}.items.output` | counter |
//! | `{action}.items.error_total` | counter |
//! | `{action}.items.dlq_total` | counter |
//! | `{action}.items.processed_rate` | gauge, records/second since last observation |
//! | `{action}.items.output_rate` | gauge, records/second since last observation |

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::time::Instant;

/// Counters and rate gauges for one action.
#[derive(Debug)]
pub struct ActionMetrics {
    action: String,

    /// Records read from the source.
    pub read: AtomicU64,

    /// Records processed.
    pub processed: AtomicU64,

    /// Records sent to the target.
    pub output: AtomicU64,

    /// Errors reported.
    pub errors: AtomicU64,

    /// Records routed to the dead-letter sink.
    pub dlq: AtomicU64,

    processed_rate: RateWindow,
    output_rate: RateWindow,
}

#[derive(Debug)]
struct RateWindow {
    since: Mutex<(Instant, u64)>,
}

impl RateWindow {
    fn new() -> Self {
        Self {
            since: Mutex::new((Instant::now(), 0)),
        }
    }

    /// Rate of `total` since the previous observation; starts a new window.
    #[allow(clippy::cast_precision_loss)]
    fn observe(&self, total: u64) -> f64 {
        let mut since = self.since.lock();
        let (start, base) = *since;
        *since = (Instant::now(), total);
        calculate_rate(total.saturating_sub(base), start.elapsed().as_secs_f64())
    }

    fn reset(&self, total: u64) {
        *self.since.lock() = (Instant::now(), total);
    }
}

/// Records per second, or the raw count if no time has elapsed.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_rate(count: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        count as f64 / elapsed_secs
    } else {
        count as f64
    }
}

impl ActionMetrics {
    /// Creates metrics for the given component type (`mapper`, `projector`, `adapter`).
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            read: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            output: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            dlq: AtomicU64::new(0),
            processed_rate: RateWindow::new(),
            output_rate: RateWindow::new(),
        }
    }

    /// Component type the metric names are prefixed with.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Full name of a metric, e.g. `metric_name("read")` is `mapper.items.read`.
    #[must_use]
    pub fn metric_name(&self, metric: &str) -> String {
        format!("{}.items.{metric}", self.action)
    }

    /// Records a record read.
    pub fn record_read(&self) {
        self.read.fetch_add(1, Ordering::Relaxed);
    }

    /// Records `n` records processed.
    pub fn record_processed(&self, n: u64) {
        self.processed.fetch_add(n, Ordering::Relaxed);
    }

    /// Records a record output.
    pub fn record_output(&self) {
        self.output.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an error.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a dead-lettered record.
    pub fn record_dlq(&self) {
        self.dlq.fetch_add(1, Ordering::Relaxed);
    }

    /// Restarts both rate windows, called when the action starts.
    pub fn start_rates(&self) {
        self.processed_rate
            .reset(self.processed.load(Ordering::Relaxed));
        self.output_rate.reset(self.output.load(Ordering::Relaxed));
    }

    /// Processing rate since the last call.
    pub fn observe_processed_rate(&self) -> f64 {
        self.processed_rate
            .observe(self.processed.load(Ordering::Relaxed))
    }

    /// Output rate since the last call.
    pub fn observe_output_rate(&self) -> f64 {
        self.output_rate.observe(self.output.load(Ordering::Relaxed))
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn snapshot(&self) -> ActionMetricsSnapshot {
        ActionMetricsSnapshot {
            read: self.read.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            output: self.output.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            dlq: self.dlq.load(Ordering::Relaxed),
        }
    }

    /// The counters as `(metric name, value)` pairs.
    #[must_use]
    pub fn counters(&self) -> Vec<(String, u64)> {
        let snap = self.snapshot();
        vec![
            (self.metric_name("read"), snap.read),
            (self.metric_name("processed"), snap.processed),
            (self.metric_name("output"), snap.output),
            (self.metric_name("error_total"), snap.errors),
            (self.metric_name("dlq_total"), snap.dlq),
        ]
    }
}

/// Point-in-time snapshot of [`ActionMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionMetricsSnapshot {
    /// Records read.
    pub read: u64,

    /// Records processed.
    pub processed: u64,

    /// Records output.
    pub output: u64,

    /// Errors reported.
    pub errors: u64,

    /// Records dead-lettered.
    pub dlq: u64,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_counters_and_names() {
        let metrics = ActionMetrics::new("mapper");
        metrics.record_read();
        metrics.record_read();
        metrics.record_processed(2);
        metrics.record_output();
        metrics.record_error();
        metrics.record_dlq();

        let snap = metrics.snapshot();
        assert_eq!(snap.read, 2);
        assert_eq!(snap.processed, 2);
        assert_eq!(snap.output, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.dlq, 1);

        let counters = metrics.counters();
        assert_eq!(counters[0], ("mapper.items.read".to_string(), 2));
        assert_eq!(counters[3], ("mapper.items.error_total".to_string(), 1));
        assert_eq!(counters[4], ("mapper.items.dlq_total".to_string(), 1));
    }

    #[test]
    fn test_calculate_rate() {
        assert_eq!(calculate_rate(10, 0.0), 10.0);
        assert_eq!(calculate_rate(10, 2.0), 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_window_resets_on_observe() {
        let metrics = ActionMetrics::new("projector");
        metrics.start_rates();
        metrics.record_processed(20);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(metrics.observe_processed_rate(), 10.0);

        metrics.record_processed(4);
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(metrics.observe_processed_rate(), 1.0);
    }
}
