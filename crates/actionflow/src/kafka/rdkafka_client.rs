//! rdkafka-backed implementations of the Kafka client seams.
//!
//! The consumer is a `StreamConsumer` whose context feeds rebalance events
//! into the source's [`SharedRebalanceState`]. Revoked partitions have their
//! pending read positions committed from inside the callback, before the
//! assignment is given up. Seeking is left to the read loop.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Headers, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{ClientContext, Message, Offset, TopicPartitionList};
use tracing::{debug, warn};

use super::client::{
    ConsumedMessage, ConsumerFactory, EnqueueError, LogConsumer, LogProducer, OutboundMessage,
    ProducerFactory, SeekTarget, TopicPartition, Watermarks,
};
use super::config::{KafkaSinkConfig, KafkaSourceConfig};
use super::rebalance::SharedRebalanceState;
use crate::error::ConnectorError;

/// Timeout for metadata, seek and watermark requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Creates rdkafka consumers and producers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RdKafkaClientFactory;

impl ConsumerFactory for RdKafkaClientFactory {
    fn create_consumer(
        &self,
        config: &KafkaSourceConfig,
        rebalance: SharedRebalanceState,
    ) -> Result<Box<dyn LogConsumer>, ConnectorError> {
        let group_id = config.resolve_group_id();
        let context = SourceContext {
            rebalance,
            consumer: OnceLock::new(),
        };
        let consumer: StreamConsumer<SourceContext> = config
            .to_rdkafka_config(&group_id)
            .create_with_context(context)
            .map_err(|e| {
                ConnectorError::ConnectionFailed(format!("failed to create consumer: {e}"))
            })?;
        let consumer = Arc::new(consumer);
        let _ = consumer.context().consumer.set(Arc::downgrade(&consumer));

        // Subscribe after the context holds the consumer so the first
        // revocation can already commit.
        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| ConnectorError::ConnectionFailed(format!("failed to subscribe: {e}")))?;

        Ok(Box::new(RdKafkaConsumer {
            consumer: Some(consumer),
            topic: config.topic.clone(),
        }))
    }
}

impl ProducerFactory for RdKafkaClientFactory {
    fn create_producer(
        &self,
        config: &KafkaSinkConfig,
    ) -> Result<Box<dyn LogProducer>, ConnectorError> {
        let producer: FutureProducer = config.to_rdkafka_config().create().map_err(|e| {
            ConnectorError::ConnectionFailed(format!("failed to create producer: {e}"))
        })?;
        Ok(Box::new(RdKafkaProducer { producer }))
    }
}

struct SourceContext {
    rebalance: SharedRebalanceState,
    consumer: OnceLock<Weak<StreamConsumer<SourceContext>>>,
}

impl SourceContext {
    fn commit_revoked(&self, offsets: &[(TopicPartition, i64)]) {
        if offsets.is_empty() {
            return;
        }
        let Some(consumer) = self.consumer.get().and_then(Weak::upgrade) else {
            warn!("consumer gone before revoked partitions could be committed");
            return;
        };
        match offset_list(offsets) {
            Ok(tpl) => {
                if let Err(e) = consumer.commit(&tpl, CommitMode::Sync) {
                    warn!(error = %e, "failed to commit revoked partitions");
                } else {
                    debug!(partitions = offsets.len(), "committed revoked partitions");
                }
            }
            Err(e) => warn!(error = %e, "failed to build commit list"),
        }
    }
}

impl ClientContext for SourceContext {}

impl ConsumerContext for SourceContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Revoke(tpl) => {
                let revoked = partitions(tpl);
                let pending = self.rebalance.lock().on_revoke(&revoked);
                self.commit_revoked(&pending);
            }
            Rebalance::Assign(tpl) => {
                self.rebalance.lock().on_assign(&partitions(tpl));
            }
            Rebalance::Error(msg) => {
                warn!(error = %msg, "kafka rebalance error");
            }
        }
    }
}

fn partitions(tpl: &TopicPartitionList) -> Vec<TopicPartition> {
    tpl.elements()
        .iter()
        .map(|e| TopicPartition::new(e.topic(), e.partition()))
        .collect()
}

fn offset_list(offsets: &[(TopicPartition, i64)]) -> Result<TopicPartitionList, KafkaError> {
    let mut tpl = TopicPartitionList::new();
    for (tp, offset) in offsets {
        tpl.add_partition_offset(&tp.topic, tp.partition, Offset::Offset(*offset))?;
    }
    Ok(tpl)
}

fn is_unknown_topic(e: &KafkaError) -> bool {
    matches!(
        e.rdkafka_error_code(),
        Some(RDKafkaErrorCode::UnknownTopicOrPartition | RDKafkaErrorCode::UnknownTopic)
    )
}

fn consumed(msg: &BorrowedMessage<'_>) -> ConsumedMessage {
    let headers = msg
        .headers()
        .map(|h| {
            h.iter()
                .map(|header| {
                    (
                        header.key.to_string(),
                        header.value.map(bytes::Bytes::copy_from_slice),
                    )
                })
                .collect()
        })
        .unwrap_or_default();
    ConsumedMessage {
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        timestamp: msg.timestamp().to_millis(),
        key: msg.key().map(bytes::Bytes::copy_from_slice),
        payload: msg.payload().map(bytes::Bytes::copy_from_slice),
        headers,
    }
}

struct RdKafkaConsumer {
    /// `None` once closed. Dropping the last handle leaves the group and
    /// closes the broker connections.
    consumer: Option<Arc<StreamConsumer<SourceContext>>>,
    topic: String,
}

impl RdKafkaConsumer {
    fn live(&self) -> Result<&StreamConsumer<SourceContext>, ConnectorError> {
        self.consumer.as_deref().ok_or(ConnectorError::Closed)
    }
}

#[async_trait]
impl LogConsumer for RdKafkaConsumer {
    async fn poll(&mut self, timeout: Duration) -> Option<Result<ConsumedMessage, ConnectorError>> {
        let consumer = match self.live() {
            Ok(consumer) => consumer,
            Err(e) => return Some(Err(e)),
        };
        match tokio::time::timeout(timeout, consumer.recv()).await {
            Err(_) => None,
            Ok(Ok(msg)) => Some(Ok(consumed(&msg))),
            Ok(Err(e)) if is_unknown_topic(&e) => Some(Err(ConnectorError::SourceNotFound {
                name: self.topic.clone(),
            })),
            Ok(Err(e)) => Some(Err(ConnectorError::ReadError(e.to_string()))),
        }
    }

    fn assignment(&self) -> Result<Vec<TopicPartition>, ConnectorError> {
        self.live()?
            .assignment()
            .map(|tpl| partitions(&tpl))
            .map_err(|e| ConnectorError::ReadError(format!("failed to read assignment: {e}")))
    }

    async fn seek(
        &mut self,
        partition: &TopicPartition,
        target: SeekTarget,
    ) -> Result<(), ConnectorError> {
        let offset = match target {
            SeekTarget::Beginning => Offset::Beginning,
            SeekTarget::End => Offset::End,
        };
        self.live()?
            .seek(&partition.topic, partition.partition, offset, REQUEST_TIMEOUT)
            .map_err(|e| ConnectorError::ReadError(format!("failed to seek {partition}: {e}")))
    }

    async fn commit(&mut self, offsets: &[(TopicPartition, i64)]) -> Result<(), ConnectorError> {
        let tpl = offset_list(offsets)
            .map_err(|e| ConnectorError::CommitError(format!("invalid offsets: {e}")))?;
        self.live()?
            .commit(&tpl, CommitMode::Sync)
            .map_err(|e| ConnectorError::CommitError(format!("offset commit failed: {e}")))
    }

    fn position(&self, partition: &TopicPartition) -> Result<Option<i64>, ConnectorError> {
        let positions = self
            .live()?
            .position()
            .map_err(|e| ConnectorError::ReadError(format!("failed to read position: {e}")))?;
        Ok(positions
            .find_partition(&partition.topic, partition.partition)
            .and_then(|e| match e.offset() {
                Offset::Offset(n) => Some(n),
                _ => None,
            }))
    }

    async fn watermarks(&mut self, partition: &TopicPartition) -> Result<Watermarks, ConnectorError> {
        let (low, high) = self
            .live()?
            .fetch_watermarks(&partition.topic, partition.partition, REQUEST_TIMEOUT)
            .map_err(|e| ConnectorError::ReadError(format!("failed to fetch watermarks: {e}")))?;
        Ok(Watermarks { low, high })
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            debug!(topic = %self.topic, "consumer closed");
        }
        Ok(())
    }
}

struct RdKafkaProducer {
    producer: FutureProducer,
}

fn owned_headers(headers: &[(String, Option<bytes::Bytes>)]) -> OwnedHeaders {
    headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(headers.len()), |acc, (key, value)| {
            acc.insert(rdkafka::message::Header {
                key: key.as_str(),
                value: value.as_deref(),
            })
        })
}

#[async_trait]
impl LogProducer for RdKafkaProducer {
    fn enqueue(&mut self, message: OutboundMessage) -> Result<(), EnqueueError> {
        let result = {
            let mut record: FutureRecord<'_, [u8], [u8]> =
                FutureRecord::to(&message.topic).headers(owned_headers(&message.headers));
            if let Some(key) = &message.key {
                record = record.key(key.as_ref());
            }
            if let Some(payload) = &message.payload {
                record = record.payload(payload.as_ref());
            }
            // Delivery is confirmed by `flush`; the per-message future is not awaited.
            self.producer.send_result(record).map(drop).map_err(|(e, _)| e)
        };
        match result {
            Ok(()) => Ok(()),
            Err(KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull)) => {
                Err(EnqueueError::QueueFull(message))
            }
            Err(e) => Err(EnqueueError::Fatal(ConnectorError::WriteError(format!(
                "failed to enqueue message: {e}"
            )))),
        }
    }

    async fn flush(&mut self, timeout: Duration) -> Result<(), ConnectorError> {
        self.producer
            .flush(timeout)
            .map_err(|e| ConnectorError::WriteError(format!("flush failed: {e}")))
    }
}
