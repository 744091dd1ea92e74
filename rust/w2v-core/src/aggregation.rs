// rust/w2v-core/src/aggregation.rs

//! Merging of per-shard partial dot products.
//!
//! Each shard contributes the dot products computed on its own column
//! partition. Once every expected shard has contributed, the sums form the
//! full dot products and are released as one immutable [`DotAggregation`].

use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::descriptor::RequestDescriptor;
use crate::error::{Result, TrainerError};
use crate::protocol::DotContribution;

/// Result of a cluster-wide merge, keyed by request.
pub trait Aggregation: Send + Sync + Debug {
    fn originator_id(&self) -> u64;

    fn task_id(&self) -> u64;

    /// The merged values.
    fn accumulated_result(&self) -> &[f32];

    /// Whether every expected contribution has been merged.
    fn is_ready(&self) -> bool;

    fn descriptor(&self) -> RequestDescriptor {
        RequestDescriptor::new(self.originator_id(), self.task_id())
    }
}

/// Summed dot products for one CBOW request.
#[derive(Debug, Clone, PartialEq)]
pub struct DotAggregation {
    originator_id: u64,
    task_id: u64,
    shards: u16,
    expected_shards: u16,
    dots: Vec<f32>,
}

impl DotAggregation {
    /// A fully merged aggregation built from known dot products.
    pub fn completed(originator_id: u64, task_id: u64, dots: Vec<f32>) -> Self {
        Self {
            originator_id,
            task_id,
            shards: 1,
            expected_shards: 1,
            dots,
        }
    }

    /// Number of shards merged into this result.
    pub fn shards(&self) -> u16 {
        self.shards
    }
}

impl Aggregation for DotAggregation {
    fn originator_id(&self) -> u64 {
        self.originator_id
    }

    fn task_id(&self) -> u64 {
        self.task_id
    }

    fn accumulated_result(&self) -> &[f32] {
        &self.dots
    }

    fn is_ready(&self) -> bool {
        self.shards == self.expected_shards
    }
}

/// Contributions received so far for one request.
#[derive(Debug)]
struct PendingDot {
    expected_shards: u16,
    received: Vec<bool>,
    sum: Vec<f32>,
    created_at: Instant,
}

impl PendingDot {
    fn new(expected_shards: u16, length: usize) -> Self {
        Self {
            expected_shards,
            received: vec![false; expected_shards as usize],
            sum: vec![0.0; length],
            created_at: Instant::now(),
        }
    }

    fn received_count(&self) -> u16 {
        self.received.iter().filter(|r| **r).count() as u16
    }

    fn is_ready(&self) -> bool {
        self.received_count() == self.expected_shards
    }

    fn accumulate(&mut self, contribution: &DotContribution) -> Result<bool> {
        if contribution.expected_shards != self.expected_shards {
            return Err(TrainerError::protocol(format!(
                "task {} expected {} shards, contribution from shard {} says {}",
                contribution.task_id,
                self.expected_shards,
                contribution.shard_index,
                contribution.expected_shards
            )));
        }
        if contribution.partial.len() != self.sum.len() {
            return Err(TrainerError::protocol(format!(
                "task {} expects {} partial dots, shard {} sent {}",
                contribution.task_id,
                self.sum.len(),
                contribution.shard_index,
                contribution.partial.len()
            )));
        }

        let slot = self
            .received
            .get_mut(contribution.shard_index as usize)
            .ok_or_else(|| {
                TrainerError::protocol(format!(
                    "contribution from shard {} but only {} shards expected",
                    contribution.shard_index, self.expected_shards
                ))
            })?;
        if *slot {
            return Ok(false);
        }
        *slot = true;

        for (acc, value) in self.sum.iter_mut().zip(&contribution.partial) {
            *acc += *value;
        }
        Ok(true)
    }
}

/// Per-request collector state.
#[derive(Debug)]
enum Slot {
    Pending(PendingDot),
    /// Already published; late or redelivered contributions are dropped.
    Released(Instant),
}

/// Collects contributions and releases each merged aggregation exactly once.
///
/// Released requests leave a tombstone behind so that redelivered
/// contributions cannot assemble a second aggregation. Tombstones are
/// pruned by [`AggregationCollector::evict_stale`].
#[derive(Debug, Default)]
pub struct AggregationCollector {
    slots: DashMap<RequestDescriptor, Slot>,
}

impl AggregationCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one contribution.
    ///
    /// Returns the finished aggregation when this contribution was the last
    /// one missing. Repeated contributions from the same shard, and any
    /// contribution for an already released request, are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the contribution disagrees with earlier ones on
    /// shape or cluster size.
    pub fn add(&self, contribution: &DotContribution) -> Result<Option<Arc<DotAggregation>>> {
        let descriptor = contribution.descriptor();

        // The whole check-accumulate-release step runs under the entry lock.
        let pending = match self.slots.entry(descriptor) {
            Entry::Vacant(entry) => {
                let mut pending =
                    PendingDot::new(contribution.expected_shards, contribution.partial.len());
                pending.accumulate(contribution)?;
                if !pending.is_ready() {
                    entry.insert(Slot::Pending(pending));
                    return Ok(None);
                }
                entry.insert(Slot::Released(Instant::now()));
                pending
            }
            Entry::Occupied(mut entry) => {
                let slot = entry.get_mut();
                let Slot::Pending(pending) = &mut *slot else {
                    tracing::debug!(
                        "Contribution from shard {} for released {} ignored",
                        contribution.shard_index,
                        descriptor
                    );
                    return Ok(None);
                };
                if !pending.accumulate(contribution)? {
                    tracing::debug!(
                        "Duplicate contribution from shard {} for {} ignored",
                        contribution.shard_index,
                        descriptor
                    );
                    return Ok(None);
                }
                if !pending.is_ready() {
                    return Ok(None);
                }
                match std::mem::replace(slot, Slot::Released(Instant::now())) {
                    Slot::Pending(pending) => pending,
                    Slot::Released(_) => return Ok(None),
                }
            }
        };

        Ok(Some(Arc::new(DotAggregation {
            originator_id: descriptor.originator_id,
            task_id: descriptor.task_id,
            shards: pending.received_count(),
            expected_shards: pending.expected_shards,
            dots: pending.sum,
        })))
    }

    /// Number of requests still waiting for contributions.
    pub fn pending(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Pending(_)))
            .count()
    }

    /// Number of released requests still remembered.
    pub fn released(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Released(_)))
            .count()
    }

    /// Drops merges that have waited longer than `max_age` and returns
    /// them. Tombstones older than `max_age` are pruned silently.
    pub fn evict_stale(&self, max_age: Duration) -> Vec<RequestDescriptor> {
        let mut evicted = Vec::new();
        self.slots.retain(|descriptor, slot| match slot {
            Slot::Pending(pending) => {
                let keep = pending.created_at.elapsed() <= max_age;
                if !keep {
                    evicted.push(*descriptor);
                }
                keep
            }
            Slot::Released(at) => at.elapsed() <= max_age,
        });
        evicted
    }
}
