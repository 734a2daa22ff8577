//! Consumer group rebalance state.
//!
//! [`RebalanceState`] is shared between the consumer's rebalance callbacks
//! and the source's read loop. The callbacks only record what happened:
//! an assignment raises the `needs_seek` flag, a revocation hands back the
//! revoked partitions' pending offsets for a final commit. Seeking itself is
//! always done later, on the read loop, never inside a callback.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::client::TopicPartition;
use super::offsets::OffsetTracker;

/// Rebalance state shared with a consumer's callbacks.
pub type SharedRebalanceState = Arc<Mutex<RebalanceState>>;

/// Tracks assignments, pending seeks and read positions across rebalances.
#[derive(Debug, Default)]
pub struct RebalanceState {
    assigned: BTreeSet<TopicPartition>,
    needs_seek: bool,
    already_seeked: BTreeSet<TopicPartition>,
    rebalance_count: u64,
    offsets: OffsetTracker,
}

impl RebalanceState {
    /// Creates a new empty rebalance state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new empty state ready to share with a consumer.
    #[must_use]
    pub fn shared() -> SharedRebalanceState {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Handles a partition assignment event.
    ///
    /// Replaces the current assignment and requests a seek check on the
    /// next read.
    pub fn on_assign(&mut self, partitions: &[TopicPartition]) {
        for tp in partitions {
            debug!(partition = %tp, "partition assigned");
        }
        self.assigned = partitions.iter().cloned().collect();
        self.needs_seek = true;
        self.rebalance_count += 1;
        info!(
            partitions_assigned = partitions.len(),
            "kafka rebalance: new partitions assigned"
        );
    }

    /// Handles a partition revocation event.
    ///
    /// Returns the next-to-read offsets of the revoked partitions, which the
    /// consumer must commit before giving the partitions up.
    pub fn on_revoke(&mut self, partitions: &[TopicPartition]) -> Vec<(TopicPartition, i64)> {
        for tp in partitions {
            debug!(partition = %tp, "partition revoked");
            self.assigned.remove(tp);
        }
        self.rebalance_count += 1;
        info!(
            partitions_revoked = partitions.len(),
            "kafka rebalance: partitions being revoked, committing read positions"
        );
        self.offsets.take(partitions)
    }

    /// Returns `true` if an assignment happened since the last seek check.
    #[must_use]
    pub fn needs_seek(&self) -> bool {
        self.needs_seek
    }

    /// Marks the pending seek check as done.
    pub fn clear_needs_seek(&mut self) {
        self.needs_seek = false;
    }

    /// Partitions of `assignment` that have never been seeked by this member.
    #[must_use]
    pub fn unseeked(&self, assignment: &[TopicPartition]) -> Vec<TopicPartition> {
        assignment
            .iter()
            .filter(|tp| !self.already_seeked.contains(*tp))
            .cloned()
            .collect()
    }

    /// Records that a partition was seeked. It is never seeked again.
    pub fn mark_seeked(&mut self, partition: TopicPartition) {
        self.already_seeked.insert(partition);
    }

    /// Returns the set of currently assigned partitions.
    #[must_use]
    pub fn assigned_partitions(&self) -> &BTreeSet<TopicPartition> {
        &self.assigned
    }

    /// Returns `true` if the given topic-partition is currently assigned.
    #[must_use]
    pub fn is_assigned(&self, topic: &str, partition: i32) -> bool {
        self.assigned.contains(&TopicPartition::new(topic, partition))
    }

    /// Returns the total number of rebalance events.
    #[must_use]
    pub fn rebalance_count(&self) -> u64 {
        self.rebalance_count
    }

    /// Read positions awaiting commit.
    #[must_use]
    pub fn offsets(&self) -> &OffsetTracker {
        &self.offsets
    }

    /// Mutable access to the read positions.
    pub fn offsets_mut(&mut self) -> &mut OffsetTracker {
        &mut self.offsets
    }
}
