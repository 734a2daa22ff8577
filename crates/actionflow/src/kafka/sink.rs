//! Kafka sink implementation.
//!
//! [`KafkaSink`] implements [`DataSink`] over a buffered [`LogProducer`].
//! Sends only enqueue; a full buffer is treated as backpressure and retried
//! after a bounded wait. `close()` flushes everything still buffered, so the
//! program can exit right after it returns.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::client::{EnqueueError, LogProducer, OutboundMessage, ProducerFactory};
use super::config::KafkaSinkConfig;
use super::metrics::KafkaSinkMetrics;
use crate::connector::DataSink;
use crate::error::ConnectorError;
use crate::record::{Payload, Record};
use crate::serde::SerializeFn;

/// A data sink producing to one Kafka topic.
pub struct KafkaSink {
    producer: Box<dyn LogProducer>,
    config: KafkaSinkConfig,
    metrics: Arc<KafkaSinkMetrics>,
    closed: bool,
}

impl KafkaSink {
    /// Creates a sink backed by rdkafka.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the configuration is invalid or the
    /// producer cannot be created.
    #[cfg(feature = "kafka")]
    pub fn new(config: KafkaSinkConfig) -> Result<Self, ConnectorError> {
        Self::with_factory(config, &super::rdkafka_client::RdKafkaClientFactory)
    }

    /// Creates a sink whose producer comes from `factory`.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the configuration is invalid or the
    /// producer cannot be created.
    pub fn with_factory(
        config: KafkaSinkConfig,
        factory: &dyn ProducerFactory,
    ) -> Result<Self, ConnectorError> {
        config.validate()?;
        info!(
            brokers = %config.brokers(),
            topic = %config.topic,
            "opening Kafka sink"
        );
        let producer = factory.create_producer(&config)?;
        Ok(Self {
            producer,
            config,
            metrics: Arc::new(KafkaSinkMetrics::new()),
            closed: false,
        })
    }

    /// Returns the sink configuration.
    #[must_use]
    pub fn config(&self) -> &KafkaSinkConfig {
        &self.config
    }

    /// Returns a shared handle to the sink metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<KafkaSinkMetrics> {
        Arc::clone(&self.metrics)
    }

    fn encode(&self, record: Record) -> Result<OutboundMessage, ConnectorError> {
        let (headers, key, value) = record.into_parts();
        let headers = headers
            .into_iter()
            .map(|h| (h.key, h.value.as_ref().map(Payload::to_bytes)))
            .collect();
        Ok(OutboundMessage {
            topic: self.config.topic.clone(),
            key: serialize(self.config.key_serializer, key.as_ref())?,
            payload: serialize(self.config.value_serializer, value.as_ref())?,
            headers,
        })
    }
}

fn serialize(
    serializer: SerializeFn,
    data: Option<&Payload>,
) -> Result<Option<bytes::Bytes>, ConnectorError> {
    Ok(data.map(serializer).transpose()?)
}

#[async_trait]
impl DataSink for KafkaSink {
    fn name(&self) -> &str {
        &self.config.topic
    }

    async fn send(&mut self, record: Record) -> Result<(), ConnectorError> {
        if self.closed {
            return Err(ConnectorError::Closed);
        }
        let mut message = match self.encode(record) {
            Ok(message) => message,
            Err(e) => {
                self.metrics.record_error();
                return Err(e);
            }
        };
        let bytes = message.payload.as_ref().map_or(0, |p| p.len() as u64);

        loop {
            match self.producer.enqueue(message) {
                Ok(()) => {
                    self.metrics.record_send(bytes);
                    return Ok(());
                }
                Err(EnqueueError::QueueFull(returned)) => {
                    self.metrics.record_queue_full();
                    debug!(
                        topic = %self.config.topic,
                        backoff_ms = self.config.retry_backoff.as_millis(),
                        "producer buffer full, waiting before retry"
                    );
                    tokio::time::sleep(self.config.retry_backoff).await;
                    message = returned;
                }
                Err(EnqueueError::Fatal(e)) => {
                    self.metrics.record_error();
                    warn!(error = %e, topic = %self.config.topic, "failed to enqueue record");
                    return Err(e);
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = self.producer.flush(self.config.flush_timeout).await;
        self.metrics.record_flush();
        match &result {
            Ok(()) => info!(sink = %self, records = self.metrics.snapshot().records_sent, "Kafka sink closed"),
            Err(e) => warn!(error = %e, sink = %self, "Kafka sink closed with undelivered records"),
        }
        result
    }
}

impl fmt::Display for KafkaSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kafka {}::{}", self.config.brokers(), self.config.topic)
    }
}

impl fmt::Debug for KafkaSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaSink")
            .field("topic", &self.config.topic)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
