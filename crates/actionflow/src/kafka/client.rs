//! Client seams between the Kafka connectors and a Kafka client library.
//!
//! [`KafkaSource`](super::KafkaSource) and [`KafkaSink`](super::KafkaSink)
//! implement their seek, commit and retry policies against the
//! [`LogConsumer`] and [`LogProducer`] traits. The `rdkafka` adapters in
//! `rdkafka_client` implement them for real brokers; the in-memory cluster in
//! [`crate::testing`] implements them for tests.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::config::{KafkaSinkConfig, KafkaSourceConfig};
use super::rebalance::SharedRebalanceState;
use crate::error::ConnectorError;

/// A topic and partition pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    /// Topic name.
    pub topic: String,
    /// Partition number.
    pub partition: i32,
}

impl TopicPartition {
    /// Creates a topic partition.
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// Where an explicit seek moves a partition's read position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekTarget {
    /// The first retained offset.
    Beginning,
    /// The current end of the log.
    End,
}

/// Low and high watermarks of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermarks {
    /// First retained offset.
    pub low: i64,
    /// Offset the next produced message will get.
    pub high: i64,
}

/// A message read from a partition.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumedMessage {
    /// Source topic.
    pub topic: String,
    /// Source partition.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Broker timestamp in milliseconds.
    pub timestamp: Option<i64>,
    /// Message key.
    pub key: Option<Bytes>,
    /// Message payload.
    pub payload: Option<Bytes>,
    /// Message headers in wire order.
    pub headers: Vec<(String, Option<Bytes>)>,
}

impl ConsumedMessage {
    /// The partition this message was read from.
    #[must_use]
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}

/// A message ready to be produced.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Destination topic.
    pub topic: String,
    /// Message key.
    pub key: Option<Bytes>,
    /// Message payload.
    pub payload: Option<Bytes>,
    /// Message headers in order.
    pub headers: Vec<(String, Option<Bytes>)>,
}

/// Why a producer refused a message.
#[derive(Debug)]
pub enum EnqueueError {
    /// The local send buffer is full. The message is handed back for a retry.
    QueueFull(OutboundMessage),
    /// The message cannot be produced.
    Fatal(ConnectorError),
}

/// A subscribed consumer group member.
///
/// Implementations report assignment changes through the
/// [`SharedRebalanceState`] they were created with, and commit the pending
/// offsets of revoked partitions before giving them up.
#[async_trait]
pub trait LogConsumer: Send {
    /// Waits up to `timeout` for the next message.
    ///
    /// Returns `None` if nothing arrived in time. A missing topic is
    /// reported as [`ConnectorError::SourceNotFound`].
    async fn poll(&mut self, timeout: Duration) -> Option<Result<ConsumedMessage, ConnectorError>>;

    /// Partitions currently assigned to this member.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the assignment cannot be read.
    fn assignment(&self) -> Result<Vec<TopicPartition>, ConnectorError>;

    /// Moves the read position of an assigned partition.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the seek is rejected.
    async fn seek(&mut self, partition: &TopicPartition, target: SeekTarget) -> Result<(), ConnectorError>;

    /// Commits next-to-read offsets.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::CommitError` if the commit fails.
    async fn commit(&mut self, offsets: &[(TopicPartition, i64)]) -> Result<(), ConnectorError>;

    /// Next offset this member will read from a partition, if known.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the position cannot be read.
    fn position(&self, partition: &TopicPartition) -> Result<Option<i64>, ConnectorError>;

    /// Fetches the watermarks of a partition.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the broker cannot be reached.
    async fn watermarks(&mut self, partition: &TopicPartition) -> Result<Watermarks, ConnectorError>;

    /// Leaves the group and releases the connection.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the client fails to shut down cleanly.
    async fn close(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

/// A buffered message producer.
#[async_trait]
pub trait LogProducer: Send {
    /// Hands a message to the send buffer without waiting for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::QueueFull`] when the buffer has no room, or
    /// [`EnqueueError::Fatal`] when the message can never be produced.
    fn enqueue(&mut self, message: OutboundMessage) -> Result<(), EnqueueError>;

    /// Waits until every buffered message is delivered or `timeout` passes.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::WriteError` if messages are still undelivered.
    async fn flush(&mut self, timeout: Duration) -> Result<(), ConnectorError>;
}

/// Creates consumers for [`KafkaSource`](super::KafkaSource).
pub trait ConsumerFactory {
    /// Creates a consumer subscribed to `config.topic`.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the client cannot be created or subscribed.
    fn create_consumer(
        &self,
        config: &KafkaSourceConfig,
        rebalance: SharedRebalanceState,
    ) -> Result<Box<dyn LogConsumer>, ConnectorError>;
}

/// Creates producers for [`KafkaSink`](super::KafkaSink).
pub trait ProducerFactory {
    /// Creates a producer.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the client cannot be created.
    fn create_producer(&self, config: &KafkaSinkConfig) -> Result<Box<dyn LogProducer>, ConnectorError>;
}
