// rust/w2v-core/src/storage/mod.rs

//! Embedding storage for one parameter shard.
//!
//! Every shard owns a column partition of each embedding matrix: all rows
//! of the vocabulary, but only its slice of the vector dimensions. Dot
//! products computed on a partition are therefore partial sums, and adding
//! the partials of every shard yields the full product.
//!
//! Arrays are handed out as [`SharedMatrix`] handles so concurrent training
//! rounds on the same shard can read and update them under a lock.
//!
//! # Example
//!
//! ```
//! use w2v_core::storage::{ArrayKey, InMemoryStorage, WordVectorStorage};
//!
//! let storage = InMemoryStorage::for_partition(16, 4, 100, 6.0, 7);
//! let syn0 = storage.get_array(ArrayKey::Syn0).unwrap();
//! assert_eq!(syn0.read().rows(), 16);
//! assert_eq!(syn0.read().columns(), 4);
//! ```

mod matrix;
mod memory;
mod sigmoid;

use std::ops::Range;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub(crate) use matrix::dot;
pub use matrix::Matrix;
pub use memory::InMemoryStorage;
pub use sigmoid::{build_sigmoid_table, Sigmoid};

/// A matrix shared between concurrent training rounds.
pub type SharedMatrix = Arc<RwLock<Matrix>>;

/// Logical names of the arrays a shard stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArrayKey {
    /// Precomputed sigmoid values over `[-max_exp, max_exp]`, one row.
    ExpTable,
    /// Input (context) embeddings.
    Syn0,
    /// Hierarchical softmax output embeddings.
    Syn1,
    /// Negative sampling output embeddings.
    Syn1Negative,
}

/// Storage backend for word vectors.
///
/// This trait is object-safe and can be used with `Arc<dyn WordVectorStorage>`.
pub trait WordVectorStorage: Send + Sync {
    /// Returns the shared array stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the array was never stored.
    fn get_array(&self, key: ArrayKey) -> Result<SharedMatrix>;
}

/// Columns of a `vector_length` wide vector owned by `shard_index`.
///
/// Columns are split evenly; shards with index below the remainder get one
/// extra column.
pub fn partition_columns(vector_length: usize, shard_count: u16, shard_index: u16) -> Range<usize> {
    let shards = shard_count.max(1) as usize;
    let idx = shard_index as usize;
    let per_shard = vector_length / shards;
    let remainder = vector_length % shards;

    let start = idx * per_shard + idx.min(remainder);
    let extra = if idx < remainder { 1 } else { 0 };
    start..start + per_shard + extra
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_even() {
        assert_eq!(partition_columns(8, 4, 0), 0..2);
        assert_eq!(partition_columns(8, 4, 3), 6..8);
    }

    #[test]
    fn test_partition_uneven_covers_all_columns() {
        let ranges: Vec<_> = (0..3).map(|i| partition_columns(10, 3, i)).collect();

        assert_eq!(ranges[0], 0..4);
        assert_eq!(ranges[1], 4..7);
        assert_eq!(ranges[2], 7..10);
        let total: usize = ranges.iter().map(|r| r.len()).sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn test_partition_single_shard() {
        assert_eq!(partition_columns(100, 1, 0), 0..100);
    }
}
