//! Kafka source implementation.
//!
//! [`KafkaSource`] implements [`DataSource`] over a [`LogConsumer`]. It owns
//! one consumer group member subscribed to exactly one topic and drives its
//! assignment, seek and commit protocol:
//!
//! - Rebalance callbacks only record state. An assignment raises a seek
//!   request; a revocation commits the revoked partitions' read positions.
//! - Seeks for the `beginning`/`end` reset policies happen on the read loop,
//!   after a poll and before any record is returned. A partition is seeked
//!   at most once per source, so re-assignment never replays it, and the
//!   seeked position is committed at once.
//! - Read positions are committed every `commit_interval` records and again
//!   on close.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::client::{
    ConsumedMessage, ConsumerFactory, LogConsumer, SeekTarget, TopicPartition,
};
use super::config::KafkaSourceConfig;
use super::metrics::KafkaSourceMetrics;
use super::rebalance::{RebalanceState, SharedRebalanceState};
use crate::connector::DataSource;
use crate::error::ConnectorError;
use crate::record::{Header, RawMessage, Record};

/// Observable state of a [`KafkaSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// No partitions assigned yet.
    Unassigned,
    /// Partitions were assigned and the seek check has not run yet.
    NeedsSeek,
    /// Reading from assigned partitions.
    Ready,
    /// Closed; no further reads are possible.
    Closed,
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceState::Unassigned => write!(f, "Unassigned"),
            SourceState::NeedsSeek => write!(f, "NeedsSeek"),
            SourceState::Ready => write!(f, "Ready"),
            SourceState::Closed => write!(f, "Closed"),
        }
    }
}

/// A data source reading one Kafka topic as a consumer group member.
///
/// # Lifecycle
///
/// 1. Create with [`KafkaSource::new`] (rdkafka) or [`KafkaSource::with_factory`]
/// 2. Call `next_record()` in a loop; it waits until a record arrives
/// 3. Call `close()` to commit read positions and leave the group
pub struct KafkaSource {
    consumer: Box<dyn LogConsumer>,
    config: KafkaSourceConfig,
    group_id: String,
    rebalance: SharedRebalanceState,
    metrics: Arc<KafkaSourceMetrics>,
    records_seen: u64,
    last_known_remaining: Option<u64>,
    closed: bool,
}

impl KafkaSource {
    /// Creates a source backed by rdkafka.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the configuration is invalid or the
    /// consumer cannot be created.
    #[cfg(feature = "kafka")]
    pub fn new(config: KafkaSourceConfig) -> Result<Self, ConnectorError> {
        Self::with_factory(config, &super::rdkafka_client::RdKafkaClientFactory)
    }

    /// Creates a source whose consumer comes from `factory`.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the configuration is invalid or the
    /// consumer cannot be created.
    pub fn with_factory(
        mut config: KafkaSourceConfig,
        factory: &dyn ConsumerFactory,
    ) -> Result<Self, ConnectorError> {
        config.validate()?;
        let group_id = config.resolve_group_id();
        config.group_id = Some(group_id.clone());

        info!(
            brokers = %config.brokers(),
            topic = %config.topic,
            group_id = %group_id,
            reset = %config.auto_offset_reset,
            "opening Kafka source"
        );

        let rebalance = RebalanceState::shared();
        let consumer = factory.create_consumer(&config, Arc::clone(&rebalance))?;

        Ok(Self {
            consumer,
            config,
            group_id,
            rebalance,
            metrics: Arc::new(KafkaSourceMetrics::new()),
            records_seen: 0,
            last_known_remaining: None,
            closed: false,
        })
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SourceState {
        if self.closed {
            return SourceState::Closed;
        }
        let rebalance = self.rebalance.lock();
        if rebalance.needs_seek() {
            SourceState::NeedsSeek
        } else if rebalance.assigned_partitions().is_empty() {
            SourceState::Unassigned
        } else {
            SourceState::Ready
        }
    }

    /// Returns the source configuration.
    #[must_use]
    pub fn config(&self) -> &KafkaSourceConfig {
        &self.config
    }

    /// Returns the consumer group this source reads as.
    #[must_use]
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Returns a shared handle to the source metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<KafkaSourceMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Returns the rebalance state shared with the consumer.
    #[must_use]
    pub fn rebalance_state(&self) -> SharedRebalanceState {
        Arc::clone(&self.rebalance)
    }

    /// Number of records returned so far.
    #[must_use]
    pub fn records_seen(&self) -> u64 {
        self.records_seen
    }

    fn needs_seek(&self) -> bool {
        self.rebalance.lock().needs_seek()
    }

    /// Performs the seek requested by the last assignment.
    ///
    /// Returns the partitions that were moved. Only the `beginning` and
    /// `end` policies seek, and only partitions never seeked before. The
    /// seeked positions are committed straight away so a restart does not
    /// apply the reset policy again. The seek request stays raised until
    /// every pending partition is seeked and committed.
    async fn seek_pending(&mut self) -> Result<Vec<TopicPartition>, ConnectorError> {
        let generation = self.rebalance.lock().rebalance_count();

        let Some(target) = self.config.auto_offset_reset.seek_target() else {
            self.finish_seek(generation);
            return Ok(Vec::new());
        };
        let assignment = self.consumer.assignment()?;
        let pending = self.rebalance.lock().unseeked(&assignment);

        let mut positions = Vec::with_capacity(pending.len());
        for tp in &pending {
            self.consumer.seek(tp, target).await?;
            let marks = self.consumer.watermarks(tp).await?;
            let offset = match target {
                SeekTarget::Beginning => marks.low,
                SeekTarget::End => marks.high,
            };
            self.metrics.record_seek();
            debug!(partition = %tp, target = ?target, offset, "seeked partition");
            positions.push((tp.clone(), offset));
        }
        if !positions.is_empty() {
            self.consumer.commit(&positions).await?;
            self.metrics.record_commit();
            info!(
                partitions = pending.len(),
                reset = %self.config.auto_offset_reset,
                "seeked and committed newly assigned partitions"
            );
        }

        {
            let mut rebalance = self.rebalance.lock();
            for tp in &pending {
                rebalance.mark_seeked(tp.clone());
            }
        }
        self.finish_seek(generation);
        Ok(pending)
    }

    /// Lowers the seek request unless another rebalance arrived meanwhile.
    fn finish_seek(&self, generation: u64) {
        let mut rebalance = self.rebalance.lock();
        if rebalance.rebalance_count() == generation {
            rebalance.clear_needs_seek();
        }
    }

    /// Commits the most recent read positions.
    async fn commit_read_positions(&mut self) -> Result<(), ConnectorError> {
        let offsets = self.rebalance.lock().offsets().commit_list();
        if offsets.is_empty() {
            return Ok(());
        }
        self.consumer.commit(&offsets).await?;
        self.metrics.record_commit();
        debug!(partitions = offsets.len(), "committed read positions");
        Ok(())
    }

    async fn accept(&mut self, msg: ConsumedMessage) -> Result<Record, ConnectorError> {
        self.metrics
            .record_poll(msg.payload.as_ref().map_or(0, |p| p.len() as u64));
        self.rebalance
            .lock()
            .offsets_mut()
            .update(&msg.topic, msg.partition, msg.offset);

        self.records_seen += 1;
        if self.records_seen % self.config.commit_interval == 0 {
            self.commit_read_positions().await?;
        }

        let decoded = decode(&self.config, &msg);
        if decoded.is_err() {
            self.metrics.record_error();
        }
        let (key, value) = decoded?;

        let headers = msg
            .headers
            .into_iter()
            .map(|(k, v)| Header::new(k, v))
            .collect();
        Ok(Record::new(headers, key, value).with_raw(RawMessage {
            topic: msg.topic,
            partition: msg.partition,
            offset: msg.offset,
            timestamp: msg.timestamp,
        }))
    }

    async fn compute_remaining(&mut self) -> Result<Option<u64>, ConnectorError> {
        let assignment = self.consumer.assignment()?;
        if assignment.is_empty() {
            return Ok(None);
        }
        let mut total: u64 = 0;
        for tp in &assignment {
            let marks = self.consumer.watermarks(tp).await?;
            let position = self.consumer.position(tp)?.unwrap_or(marks.low);
            total += u64::try_from(marks.high - position).unwrap_or(0);
        }
        Ok(Some(total))
    }
}

type Decoded = (Option<crate::record::Payload>, Option<crate::record::Payload>);

fn decode(config: &KafkaSourceConfig, msg: &ConsumedMessage) -> Result<Decoded, ConnectorError> {
    let key = msg
        .key
        .as_deref()
        .map(config.key_deserializer)
        .transpose()?;
    let value = msg
        .payload
        .as_deref()
        .map(config.value_deserializer)
        .transpose()?;
    Ok((key, value))
}

#[async_trait]
impl DataSource for KafkaSource {
    fn name(&self) -> &str {
        &self.config.topic
    }

    fn topic(&self) -> Option<&str> {
        Some(&self.config.topic)
    }

    async fn next_record(&mut self) -> Result<Option<Record>, ConnectorError> {
        if self.closed {
            return Err(ConnectorError::Closed);
        }
        let timeout = self.config.poll_timeout;

        // Poll with a short timeout and loop: a long wait could block while
        // an assignment is waiting to be seeked.
        loop {
            let mut polled = None;
            if !self.needs_seek() {
                polled = self.consumer.poll(timeout).await;
            }

            if self.needs_seek() {
                let seeked = self.seek_pending().await?;
                // A record read before the seek took effect is stale.
                let stale = matches!(&polled, Some(Ok(msg)) if seeked.contains(&msg.topic_partition()));
                if stale {
                    debug!("discarding record read before seek");
                    self.metrics.record_discard();
                    polled = None;
                }
                if polled.is_none() && !seeked.is_empty() {
                    polled = self.consumer.poll(timeout).await;
                }
            }

            match polled {
                None => continue,
                Some(Err(e)) => {
                    self.metrics.record_error();
                    if !matches!(e, ConnectorError::SourceNotFound { .. }) {
                        warn!(error = %e, topic = %self.config.topic, "Kafka consumer error");
                    }
                    return Err(e);
                }
                Some(Ok(msg)) => return self.accept(msg).await.map(Some),
            }
        }
    }

    async fn remaining(&mut self) -> Option<u64> {
        if self.closed {
            return self.last_known_remaining;
        }
        match self.compute_remaining().await {
            Ok(Some(remaining)) => {
                self.last_known_remaining = Some(remaining);
                Some(remaining)
            }
            Ok(None) => self.last_known_remaining,
            Err(e) => {
                debug!(error = %e, "unable to calculate remaining records, using cached value");
                self.last_known_remaining
            }
        }
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        if self.closed {
            return Ok(());
        }
        if let Some(remaining) = self.remaining().await {
            debug!(source = %self, remaining, "closing Kafka source");
        }
        if let Err(e) = self.commit_read_positions().await {
            warn!(error = %e, "failed to commit final read positions");
        }
        self.closed = true;
        self.consumer.close().await?;
        info!(source = %self, records = self.records_seen, "Kafka source closed");
        Ok(())
    }
}

impl fmt::Display for KafkaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kafka {}::{}", self.config.brokers(), self.config.topic)
    }
}

impl fmt::Debug for KafkaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaSource")
            .field("topic", &self.config.topic)
            .field("group_id", &self.group_id)
            .field("reset", &self.config.auto_offset_reset)
            .field("records_seen", &self.records_seen)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
