//! Kafka connector metrics.
//!
//! [`KafkaSourceMetrics`] and [`KafkaSinkMetrics`] provide lock-free atomic
//! counters for consumption and production statistics. Connectors hand out
//! shared handles so callers can read them while a pipeline runs.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for Kafka source statistics.
#[derive(Debug, Default)]
pub struct KafkaSourceMetrics {
    /// Total records polled from Kafka.
    pub records_polled: AtomicU64,
    /// Total payload bytes polled from Kafka.
    pub bytes_polled: AtomicU64,
    /// Polled records discarded because their partition was just seeked.
    pub records_discarded: AtomicU64,
    /// Total consumer or deserialization errors.
    pub errors: AtomicU64,
    /// Total offset commits.
    pub commits: AtomicU64,
    /// Total partition seeks.
    pub seeks: AtomicU64,
}

impl KafkaSourceMetrics {
    /// Creates a new metrics instance with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a polled message of `bytes` payload bytes.
    pub fn record_poll(&self, bytes: u64) {
        self.records_polled.fetch_add(1, Ordering::Relaxed);
        self.bytes_polled.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records a polled message that was dropped after a seek.
    pub fn record_discard(&self) {
        self.records_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a consumer or deserialization error.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful offset commit.
    pub fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a partition seek.
    pub fn record_seek(&self) {
        self.seeks.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> KafkaSourceMetricsSnapshot {
        KafkaSourceMetricsSnapshot {
            records_polled: self.records_polled.load(Ordering::Relaxed),
            bytes_polled: self.bytes_polled.load(Ordering::Relaxed),
            records_discarded: self.records_discarded.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            seeks: self.seeks.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`KafkaSourceMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct KafkaSourceMetricsSnapshot {
    pub records_polled: u64,
    pub bytes_polled: u64,
    pub records_discarded: u64,
    pub errors: u64,
    pub commits: u64,
    pub seeks: u64,
}

/// Atomic counters for Kafka sink statistics.
#[derive(Debug, Default)]
pub struct KafkaSinkMetrics {
    /// Total records handed to the producer.
    pub records_sent: AtomicU64,
    /// Total payload bytes handed to the producer.
    pub bytes_sent: AtomicU64,
    /// Times a send waited for buffer space before retrying.
    pub queue_full_retries: AtomicU64,
    /// Total production or serialization errors.
    pub errors: AtomicU64,
    /// Total flushes.
    pub flushes: AtomicU64,
}

impl KafkaSinkMetrics {
    /// Creates a new metrics instance with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an enqueued message of `bytes` payload bytes.
    pub fn record_send(&self, bytes: u64) {
        self.records_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records a retry caused by a full send buffer.
    pub fn record_queue_full(&self) {
        self.queue_full_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a production or serialization error.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a flush.
    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> KafkaSinkMetricsSnapshot {
        KafkaSinkMetricsSnapshot {
            records_sent: self.records_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            queue_full_retries: self.queue_full_retries.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`KafkaSinkMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct KafkaSinkMetricsSnapshot {
    pub records_sent: u64,
    pub bytes_sent: u64,
    pub queue_full_retries: u64,
    pub errors: u64,
    pub flushes: u64,
}
