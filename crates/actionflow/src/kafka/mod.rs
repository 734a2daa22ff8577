//! Kafka source and sink connectors.
//!
//! Provides a [`KafkaSource`] that reads one topic as a consumer group
//! member through the [`DataSource`] trait, and a [`KafkaSink`] that
//! produces to one topic through the [`DataSink`] trait.
//!
//! # Features
//!
//! - Deferred seek-on-assignment for the `beginning`/`end` reset policies,
//!   at most once per partition (source)
//! - Periodic, on-revoke and on-close offset commits (source)
//! - Lag reporting across assigned partitions with a cached fallback (source)
//! - Backpressure retry on a full producer buffer (sink)
//! - Flush-on-close (sink)
//! - Atomic metrics counters
//!
//! The connectors are written against the [`LogConsumer`] and
//! [`LogProducer`] seams. With the `kafka` feature enabled,
//! `KafkaSource::new` and `KafkaSink::new` use rdkafka; tests use
//! [`crate::testing::MockCluster`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use actionflow::config::Configurator;
//! use actionflow::kafka::{KafkaSink, KafkaSinkConfig, KafkaSource, KafkaSourceConfig};
//!
//! let conf = Configurator::from_env();
//! let source = KafkaSource::new(KafkaSourceConfig::from_configurator("knowledge", &conf)?)?;
//! let sink = KafkaSink::new(KafkaSinkConfig::from_configurator("knowledge.out", &conf)?)?;
//! ```
//!
//! [`DataSource`]: crate::connector::DataSource
//! [`DataSink`]: crate::connector::DataSink

pub mod client;
pub mod config;
pub mod group_id;
pub mod metrics;
pub mod offsets;
pub mod rebalance;
pub mod sink;
pub mod source;

#[cfg(feature = "kafka")]
pub mod rdkafka_client;

pub use client::{
    ConsumedMessage, ConsumerFactory, EnqueueError, LogConsumer, LogProducer, OutboundMessage,
    ProducerFactory, SeekTarget, TopicPartition, Watermarks,
};
pub use config::{KafkaSinkConfig, KafkaSourceConfig, OffsetReset};
pub use group_id::{clean_hostname, generate_group_id};
pub use metrics::{KafkaSinkMetrics, KafkaSourceMetrics};
pub use offsets::OffsetTracker;
#[cfg(feature = "kafka")]
pub use rdkafka_client::RdKafkaClientFactory;
pub use rebalance::{RebalanceState, SharedRebalanceState};
pub use sink::KafkaSink;
pub use source::{KafkaSource, SourceState};

/// Name of the dead-letter topic for `topic`.
#[must_use]
pub fn dlq_topic(topic: &str) -> String {
    format!("{topic}.dlq")
}
