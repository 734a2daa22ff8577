//! Per-partition read positions awaiting commit.
//!
//! [`OffsetTracker`] keeps the last-read offset of each topic-partition.
//! Commits use next-to-read offsets, so [`OffsetTracker::commit_list`]
//! returns offset+1 per Kafka convention.

use std::collections::BTreeMap;

use super::client::TopicPartition;

/// Tracks last-read offsets per topic-partition.
#[derive(Debug, Clone, Default)]
pub struct OffsetTracker {
    offsets: BTreeMap<TopicPartition, i64>,
}

impl OffsetTracker {
    /// Creates a new empty offset tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `offset` was read from a partition.
    pub fn update(&mut self, topic: &str, partition: i32, offset: i64) {
        self.offsets
            .insert(TopicPartition::new(topic, partition), offset);
    }

    /// Gets the last-read offset for a topic-partition.
    #[must_use]
    pub fn get(&self, topic: &str, partition: i32) -> Option<i64> {
        self.offsets
            .get(&TopicPartition::new(topic, partition))
            .copied()
    }

    /// Returns the number of tracked partitions.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.offsets.len()
    }

    /// Next-to-read offsets for every tracked partition.
    #[must_use]
    pub fn commit_list(&self) -> Vec<(TopicPartition, i64)> {
        self.offsets
            .iter()
            .map(|(tp, offset)| (tp.clone(), offset + 1))
            .collect()
    }

    /// Removes the given partitions, returning their next-to-read offsets.
    ///
    /// Used when partitions are revoked: their positions are committed one
    /// last time and no longer belong to this member.
    pub fn take(&mut self, partitions: &[TopicPartition]) -> Vec<(TopicPartition, i64)> {
        partitions
            .iter()
            .filter_map(|tp| self.offsets.remove_entry(tp))
            .map(|(tp, offset)| (tp, offset + 1))
            .collect()
    }

    /// Clears all tracked offsets.
    pub fn clear(&mut self) {
        self.offsets.clear();
    }
}
