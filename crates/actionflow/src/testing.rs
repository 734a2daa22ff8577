//! Testing utilities for sources, sinks and actions.
//!
//! [`MockCluster`] is an in-memory stand-in for a Kafka cluster. It
//! implements [`ConsumerFactory`] and [`ProducerFactory`], so a
//! [`KafkaSource`](crate::kafka::KafkaSource) or
//! [`KafkaSink`](crate::kafka::KafkaSink) built with `with_factory` runs the
//! real seek, commit and retry logic against it.
//!
//! The cluster models what the connectors depend on:
//! - partitions with low/high watermarks and truncation
//! - committed offsets per consumer group
//! - group membership, where the first poll assigns every partition and
//!   [`MockCluster::rebalance`] moves partitions on the next poll
//! - a producer buffer that is only written to the log on flush
//!
//! [`FailingSink`] rejects every record, for exercising error paths.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::connector::DataSink;
use crate::error::ConnectorError;
use crate::kafka::client::{
    ConsumedMessage, ConsumerFactory, EnqueueError, LogConsumer, LogProducer, OutboundMessage,
    ProducerFactory, SeekTarget, TopicPartition, Watermarks,
};
use crate::kafka::config::{KafkaSinkConfig, KafkaSourceConfig, OffsetReset};
use crate::kafka::rebalance::SharedRebalanceState;
use crate::record::Record;

/// Longest a mock poll sleeps when no message is available.
const EMPTY_POLL_WAIT: Duration = Duration::from_millis(5);

#[derive(Debug, Default)]
struct PartitionLog {
    /// Offset of `messages[0]`.
    low: i64,
    messages: Vec<ConsumedMessage>,
}

impl PartitionLog {
    fn high(&self) -> i64 {
        self.low + self.messages.len() as i64
    }

    fn get(&self, offset: i64) -> Option<&ConsumedMessage> {
        usize::try_from(offset - self.low)
            .ok()
            .and_then(|i| self.messages.get(i))
    }
}

#[derive(Debug)]
struct Member {
    group: String,
    topic: String,
    pending: Option<Vec<TopicPartition>>,
}

#[derive(Debug, Default)]
struct ClusterState {
    topics: BTreeMap<String, Vec<PartitionLog>>,
    committed: BTreeMap<(String, TopicPartition), i64>,
    members: BTreeMap<u64, Member>,
    next_member: u64,
    fail_sends: u32,
    fail_watermarks: bool,
}

impl ClusterState {
    fn partition(&self, tp: &TopicPartition) -> Option<&PartitionLog> {
        self.topics
            .get(&tp.topic)
            .and_then(|parts| usize::try_from(tp.partition).ok().and_then(|p| parts.get(p)))
    }

    fn append(&mut self, topic: &str, partition: i32, mut message: ConsumedMessage) -> i64 {
        let idx = usize::try_from(partition).unwrap_or(0);
        let parts = self.topics.entry(topic.to_string()).or_default();
        while parts.len() <= idx {
            parts.push(PartitionLog::default());
        }
        let log = &mut parts[idx];
        let offset = log.high();
        message.topic = topic.to_string();
        message.partition = partition;
        message.offset = offset;
        log.messages.push(message);
        offset
    }

    fn all_partitions(&self, topic: &str) -> Vec<TopicPartition> {
        self.topics.get(topic).map_or_else(Vec::new, |parts| {
            (0..parts.len())
                .filter_map(|p| i32::try_from(p).ok())
                .map(|p| TopicPartition::new(topic, p))
                .collect()
        })
    }
}

/// An in-memory Kafka cluster.
///
/// Cloning yields another handle to the same cluster.
#[derive(Debug, Clone, Default)]
pub struct MockCluster {
    inner: Arc<Mutex<ClusterState>>,
}

impl MockCluster {
    /// Creates an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `topic` with `partitions` empty partitions.
    ///
    /// Existing partitions are kept.
    pub fn create_topic(&self, topic: &str, partitions: usize) {
        let mut state = self.inner.lock();
        let parts = state.topics.entry(topic.to_string()).or_default();
        while parts.len() < partitions {
            parts.push(PartitionLog::default());
        }
    }

    /// Appends a message and returns its offset. Creates the topic if needed.
    pub fn produce<K: Into<Bytes>>(
        &self,
        topic: &str,
        partition: i32,
        key: Option<K>,
        value: impl Into<Bytes>,
    ) -> i64 {
        self.produce_with_headers(topic, partition, key, value, Vec::new())
    }

    /// Appends a message with headers and returns its offset.
    pub fn produce_with_headers<K: Into<Bytes>>(
        &self,
        topic: &str,
        partition: i32,
        key: Option<K>,
        value: impl Into<Bytes>,
        headers: Vec<(String, Option<Bytes>)>,
    ) -> i64 {
        let message = ConsumedMessage {
            topic: String::new(),
            partition,
            offset: 0,
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
            key: key.map(Into::into),
            payload: Some(value.into()),
            headers,
        };
        self.inner.lock().append(topic, partition, message)
    }

    /// Drops every message of a partition below `before`, as retention would.
    pub fn truncate(&self, topic: &str, partition: i32, before: i64) {
        let mut state = self.inner.lock();
        let Some(log) = state
            .topics
            .get_mut(topic)
            .and_then(|parts| usize::try_from(partition).ok().and_then(|p| parts.get_mut(p)))
        else {
            return;
        };
        let drop = usize::try_from(before - log.low)
            .unwrap_or(0)
            .min(log.messages.len());
        log.messages.drain(..drop);
        log.low += drop as i64;
    }

    /// All messages of `topic`, by partition then offset.
    #[must_use]
    pub fn messages(&self, topic: &str) -> Vec<ConsumedMessage> {
        self.inner.lock().topics.get(topic).map_or_else(Vec::new, |parts| {
            parts
                .iter()
                .flat_map(|log| log.messages.iter().cloned())
                .collect()
        })
    }

    /// Watermarks of a partition, if it exists.
    #[must_use]
    pub fn watermarks(&self, topic: &str, partition: i32) -> Option<Watermarks> {
        self.inner
            .lock()
            .partition(&TopicPartition::new(topic, partition))
            .map(|log| Watermarks {
                low: log.low,
                high: log.high(),
            })
    }

    /// Stores a committed offset for `group`.
    pub fn commit(&self, group: &str, partition: &TopicPartition, offset: i64) {
        self.inner
            .lock()
            .committed
            .insert((group.to_string(), partition.clone()), offset);
    }

    /// Committed offset of `group` for a partition.
    #[must_use]
    pub fn committed(&self, group: &str, partition: &TopicPartition) -> Option<i64> {
        self.inner
            .lock()
            .committed
            .get(&(group.to_string(), partition.clone()))
            .copied()
    }

    /// Gives every live member of `group` a new assignment, applied on its
    /// next poll.
    pub fn rebalance(&self, group: &str, partitions: &[TopicPartition]) {
        let mut state = self.inner.lock();
        for member in state.members.values_mut().filter(|m| m.group == group) {
            member.pending = Some(partitions.to_vec());
        }
    }

    /// Number of live consumers in `group`.
    #[must_use]
    pub fn member_count(&self, group: &str) -> usize {
        self.inner
            .lock()
            .members
            .values()
            .filter(|m| m.group == group)
            .count()
    }

    /// Makes the next `n` enqueue attempts report a full buffer.
    pub fn fail_next_sends(&self, n: u32) {
        self.inner.lock().fail_sends = n;
    }

    /// Makes watermark requests fail until reset.
    pub fn fail_watermarks(&self, fail: bool) {
        self.inner.lock().fail_watermarks = fail;
    }
}

impl ConsumerFactory for MockCluster {
    fn create_consumer(
        &self,
        config: &KafkaSourceConfig,
        rebalance: SharedRebalanceState,
    ) -> Result<Box<dyn LogConsumer>, ConnectorError> {
        let group = config.resolve_group_id();
        let id = {
            let mut state = self.inner.lock();
            let id = state.next_member;
            state.next_member += 1;
            state.members.insert(
                id,
                Member {
                    group: group.clone(),
                    topic: config.topic.clone(),
                    pending: None,
                },
            );
            id
        };
        Ok(Box::new(MockConsumer {
            cluster: self.clone(),
            id,
            group,
            topic: config.topic.clone(),
            reset: config.auto_offset_reset,
            rebalance,
            assignment: Vec::new(),
            positions: BTreeMap::new(),
            joined: false,
            cursor: 0,
        }))
    }
}

impl ProducerFactory for MockCluster {
    fn create_producer(
        &self,
        _config: &KafkaSinkConfig,
    ) -> Result<Box<dyn LogProducer>, ConnectorError> {
        Ok(Box::new(MockProducer {
            cluster: self.clone(),
            buffer: Vec::new(),
        }))
    }
}

/// A consumer group member of a [`MockCluster`].
struct MockConsumer {
    cluster: MockCluster,
    id: u64,
    group: String,
    topic: String,
    reset: OffsetReset,
    rebalance: SharedRebalanceState,
    assignment: Vec<TopicPartition>,
    positions: BTreeMap<TopicPartition, i64>,
    joined: bool,
    cursor: usize,
}

impl MockConsumer {
    fn apply_assignment(&mut self, state: &mut ClusterState, partitions: Vec<TopicPartition>) {
        let revoked: Vec<TopicPartition> = self
            .assignment
            .iter()
            .filter(|tp| !partitions.contains(tp))
            .cloned()
            .collect();
        if self.joined {
            let pending = self.rebalance.lock().on_revoke(&revoked);
            for (tp, offset) in pending {
                state.committed.insert((self.group.clone(), tp), offset);
            }
            for tp in &revoked {
                self.positions.remove(tp);
            }
        }

        for tp in &partitions {
            if self.positions.contains_key(tp) {
                continue;
            }
            let committed = state.committed.get(&(self.group.clone(), tp.clone())).copied();
            let (low, high) = state
                .partition(tp)
                .map_or((0, 0), |log| (log.low, log.high()));
            let position = committed.unwrap_or(match self.reset {
                OffsetReset::Earliest | OffsetReset::Beginning => low,
                OffsetReset::Latest | OffsetReset::End => high,
            });
            self.positions.insert(tp.clone(), position);
        }

        self.assignment = partitions;
        self.joined = true;
        self.cursor = 0;
        self.rebalance.lock().on_assign(&self.assignment);
    }

    fn next_message(&mut self, state: &ClusterState) -> Option<ConsumedMessage> {
        let n = self.assignment.len();
        for step in 0..n {
            let idx = (self.cursor + step) % n;
            let tp = &self.assignment[idx];
            let Some(log) = state.partition(tp) else {
                continue;
            };
            let position = self.positions.get(tp).copied().unwrap_or(log.low).max(log.low);
            if let Some(message) = log.get(position) {
                let message = message.clone();
                self.positions.insert(tp.clone(), position + 1);
                self.cursor = (idx + 1) % n;
                return Some(message);
            }
        }
        None
    }
}

#[async_trait]
impl LogConsumer for MockConsumer {
    async fn poll(&mut self, timeout: Duration) -> Option<Result<ConsumedMessage, ConnectorError>> {
        let polled = {
            let inner = Arc::clone(&self.cluster.inner);
            let mut state = inner.lock();
            if !state.topics.contains_key(&self.topic) {
                return Some(Err(ConnectorError::SourceNotFound {
                    name: self.topic.clone(),
                }));
            }
            let pending = state.members.get_mut(&self.id).and_then(|m| m.pending.take());
            if let Some(partitions) = pending {
                self.apply_assignment(&mut state, partitions);
            } else if !self.joined {
                let partitions = state.all_partitions(&self.topic);
                self.apply_assignment(&mut state, partitions);
            }
            self.next_message(&state)
        };
        match polled {
            Some(message) => Some(Ok(message)),
            None => {
                tokio::time::sleep(timeout.min(EMPTY_POLL_WAIT)).await;
                None
            }
        }
    }

    fn assignment(&self) -> Result<Vec<TopicPartition>, ConnectorError> {
        Ok(self.assignment.clone())
    }

    async fn seek(
        &mut self,
        partition: &TopicPartition,
        target: SeekTarget,
    ) -> Result<(), ConnectorError> {
        if !self.assignment.contains(partition) {
            return Err(ConnectorError::ReadError(format!(
                "cannot seek unassigned partition {partition}"
            )));
        }
        let state = self.cluster.inner.lock();
        let (low, high) = state
            .partition(partition)
            .map_or((0, 0), |log| (log.low, log.high()));
        let position = match target {
            SeekTarget::Beginning => low,
            SeekTarget::End => high,
        };
        self.positions.insert(partition.clone(), position);
        Ok(())
    }

    async fn commit(&mut self, offsets: &[(TopicPartition, i64)]) -> Result<(), ConnectorError> {
        let mut state = self.cluster.inner.lock();
        for (tp, offset) in offsets {
            state
                .committed
                .insert((self.group.clone(), tp.clone()), *offset);
        }
        Ok(())
    }

    fn position(&self, partition: &TopicPartition) -> Result<Option<i64>, ConnectorError> {
        Ok(self.positions.get(partition).copied())
    }

    async fn watermarks(&mut self, partition: &TopicPartition) -> Result<Watermarks, ConnectorError> {
        let state = self.cluster.inner.lock();
        if state.fail_watermarks {
            return Err(ConnectorError::ReadError("watermarks unavailable".into()));
        }
        state
            .partition(partition)
            .map(|log| Watermarks {
                low: log.low,
                high: log.high(),
            })
            .ok_or_else(|| ConnectorError::ReadError(format!("unknown partition {partition}")))
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        self.cluster.inner.lock().members.remove(&self.id);
        Ok(())
    }
}

/// A buffered producer of a [`MockCluster`].
struct MockProducer {
    cluster: MockCluster,
    buffer: Vec<OutboundMessage>,
}

#[async_trait]
impl LogProducer for MockProducer {
    fn enqueue(&mut self, message: OutboundMessage) -> Result<(), EnqueueError> {
        let mut state = self.cluster.inner.lock();
        if state.fail_sends > 0 {
            state.fail_sends -= 1;
            return Err(EnqueueError::QueueFull(message));
        }
        self.buffer.push(message);
        Ok(())
    }

    async fn flush(&mut self, _timeout: Duration) -> Result<(), ConnectorError> {
        let mut state = self.cluster.inner.lock();
        for message in self.buffer.drain(..) {
            let consumed = ConsumedMessage {
                topic: String::new(),
                partition: 0,
                offset: 0,
                timestamp: Some(chrono::Utc::now().timestamp_millis()),
                key: message.key,
                payload: message.payload,
                headers: message.headers,
            };
            state.append(&message.topic, 0, consumed);
        }
        Ok(())
    }
}

/// A sink that rejects every record.
#[derive(Debug, Default)]
pub struct FailingSink {
    attempts: u64,
}

impl FailingSink {
    /// Creates a failing sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Display for FailingSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failing Sink({} attempts)", self.attempts)
    }
}

#[async_trait]
impl DataSink for FailingSink {
    fn name(&self) -> &str {
        "Failing"
    }

    async fn send(&mut self, _record: Record) -> Result<(), ConnectorError> {
        self.attempts += 1;
        Err(ConnectorError::WriteError("sink rejected record".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_produce_and_truncate() {
        let cluster = MockCluster::new();
        for i in 0..5 {
            assert_eq!(cluster.produce("t", 0, None::<String>, format!("v{i}")), i);
        }
        cluster.truncate("t", 0, 3);
        assert_eq!(cluster.watermarks("t", 0), Some(Watermarks { low: 3, high: 5 }));
        let messages = cluster.messages("t");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].offset, 3);
    }

    #[test]
    fn test_committed_offsets_are_per_group() {
        let cluster = MockCluster::new();
        let tp = TopicPartition::new("t", 0);
        cluster.commit("a", &tp, 7);
        assert_eq!(cluster.committed("a", &tp), Some(7));
        assert_eq!(cluster.committed("b", &tp), None);
    }

    #[tokio::test]
    async fn test_failing_sink() {
        let mut sink = FailingSink::new();
        assert!(sink.send(Record::default()).await.is_err());
        assert_eq!(sink.to_string(), "Failing Sink(1 attempts)");
    }
}
