// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-partition ordered release: parks out-of-sequence messages and releases
//! them strictly by sequence number as predecessors complete.

use std::collections::{HashMap, VecDeque};

use tokio::sync::{mpsc, RwLock};

use crate::config::{LateSequencePolicy, OrderingConfig};
use crate::message::{epoch_ms, Message, TAG_PARTITION_KEY};

/// Gate verdict for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDecision {
    /// The message's sequence is the partition's next expectation.
    Ready,
    /// Enqueued in the partition's waiting area; a release will follow.
    /// Also covers late arrivals under [`LateSequencePolicy::Park`].
    Parked,
    /// Sequence below expectation (late duplicate or reorder fault); only
    /// produced under [`LateSequencePolicy::Fail`], and the caller routes
    /// the message to the failure path.
    Late,
}

#[derive(Debug)]
struct ParkedEntry {
    id: String,
    sequence: u64,
    parked_at: u64,
}

#[derive(Debug)]
struct Partition {
    next_expected: u64,
    waiting: VecDeque<ParkedEntry>,
}

impl Partition {
    fn new() -> Self {
        Self { next_expected: 1, waiting: VecDeque::new() }
    }

    /// Drop parked entries older than `max_wait_ms`. Their machines progress
    /// independently via the ordering-wait timeout.
    fn prune_stale(&mut self, key: &str, now: u64, max_wait_ms: u64) {
        self.waiting.retain(|entry| {
            let stale = now.saturating_sub(entry.parked_at) > max_wait_ms;
            if stale {
                tracing::warn!(
                    partition = key,
                    message_id = %entry.id,
                    sequence = entry.sequence,
                    "pruning parked message past max wait"
                );
            }
            !stale
        });
    }
}

/// Sequence gate shared by all machines of one processor.
///
/// Released message ids are pushed to an unbounded channel; the processor's
/// release loop resumes the corresponding machines.
pub struct OrderingCoordinator {
    partitions: RwLock<HashMap<String, Partition>>,
    config: OrderingConfig,
    release_tx: mpsc::UnboundedSender<String>,
}

impl OrderingCoordinator {
    pub fn new(config: OrderingConfig) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (release_tx, release_rx) = mpsc::unbounded_channel();
        let coordinator =
            Self { partitions: RwLock::new(HashMap::new()), config, release_tx };
        (coordinator, release_rx)
    }

    /// Partition key: `partitionKey` tag, else topic, else the configured
    /// fallback key.
    pub fn partition_key(&self, message: &Message) -> String {
        if let Some(key) = message.tag(TAG_PARTITION_KEY) {
            return key.to_owned();
        }
        if !message.topic.is_empty() {
            return message.topic.clone();
        }
        self.config.ordering_key.clone()
    }

    /// Gate a message against its partition's expectation.
    pub async fn admit(&self, message: &Message) -> OrderDecision {
        let key = self.partition_key(message);
        let sequence = message.sequence();
        let now = epoch_ms();

        if sequence == 0 {
            tracing::warn!(
                partition = %key,
                message_id = %message.id(),
                "sequence 0 is outside the expected domain (sequences start at 1)"
            );
        }

        let mut partitions = self.partitions.write().await;
        let partition = partitions.entry(key.clone()).or_insert_with(Partition::new);
        partition.prune_stale(&key, now, self.config.max_wait_ms);

        if sequence == partition.next_expected {
            return OrderDecision::Ready;
        }

        if sequence < partition.next_expected {
            tracing::warn!(
                partition = %key,
                message_id = %message.id(),
                sequence,
                next_expected = partition.next_expected,
                "late sequence observed"
            );
            match self.config.late_policy {
                LateSequencePolicy::Fail => return OrderDecision::Late,
                LateSequencePolicy::Park => {}
            }
        }

        if partition.waiting.len() >= self.config.max_pending_messages {
            if let Some(evicted) = partition.waiting.pop_front() {
                tracing::warn!(
                    partition = %key,
                    message_id = %evicted.id,
                    sequence = evicted.sequence,
                    "waiting queue full, evicting oldest parked message"
                );
            }
        }

        partition.waiting.push_back(ParkedEntry {
            id: message.id().to_owned(),
            sequence,
            parked_at: now,
        });
        OrderDecision::Parked
    }

    /// Report successful handling: advance the expectation and release every
    /// parked message now at the head of the sequence.
    pub async fn complete(&self, message: &Message) {
        let key = self.partition_key(message);
        let now = epoch_ms();

        let mut partitions = self.partitions.write().await;
        let Some(partition) = partitions.get_mut(&key) else {
            return;
        };

        // Only the message currently at the head may advance the gate; a
        // stale completion (say, a parked message that timed out, retried,
        // and eventually confirmed) must not skip the real successor.
        if message.sequence() != partition.next_expected {
            tracing::warn!(
                partition = %key,
                message_id = %message.id(),
                sequence = message.sequence(),
                next_expected = partition.next_expected,
                "completion out of order, not advancing"
            );
            return;
        }

        partition.next_expected += 1;
        partition.prune_stale(&key, now, self.config.max_wait_ms);

        while let Some(pos) = partition
            .waiting
            .iter()
            .position(|entry| entry.sequence == partition.next_expected)
        {
            if let Some(entry) = partition.waiting.remove(pos) {
                tracing::debug!(
                    partition = %key,
                    message_id = %entry.id,
                    sequence = entry.sequence,
                    "releasing parked message"
                );
                let _ = self.release_tx.send(entry.id);
            }
        }
    }

    /// Drop the parked entry for a message that left the waiting state by
    /// another path (cancel, timeout).
    pub async fn remove(&self, message: &Message) {
        let key = self.partition_key(message);
        let mut partitions = self.partitions.write().await;
        if let Some(partition) = partitions.get_mut(&key) {
            partition.waiting.retain(|entry| entry.id != message.id());
        }
    }

    /// Number of parked messages in a partition (0 for unknown partitions).
    pub async fn partition_depth(&self, key: &str) -> usize {
        self.partitions.read().await.get(key).map_or(0, |p| p.waiting.len())
    }

    /// Discard a partition's state entirely. Returns whether it existed.
    pub async fn cleanup_partition(&self, key: &str) -> bool {
        self.partitions.write().await.remove(key).is_some()
    }
}

#[cfg(test)]
#[path = "ordering_tests.rs"]
mod tests;
