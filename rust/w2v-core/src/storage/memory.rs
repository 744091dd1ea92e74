// rust/w2v-core/src/storage/memory.rs

//! In-memory word vector storage.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{build_sigmoid_table, ArrayKey, Matrix, SharedMatrix, WordVectorStorage};
use crate::error::{Result, TrainerError};

/// Word vector storage backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    arrays: RwLock<HashMap<ArrayKey, SharedMatrix>>,
}

impl InMemoryStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates storage for one column partition of the embedding table.
    ///
    /// syn0 is initialised with small random values scaled by the partition
    /// width, as word2vec does; syn1 and syn1neg start at zero.
    pub fn for_partition(
        vocab_size: usize,
        columns: usize,
        exp_table_size: usize,
        max_exp: f32,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let scale = columns.max(1) as f32;
        let syn0 = Matrix::from_fn(vocab_size, columns, || (rng.gen::<f32>() - 0.5) / scale);

        let storage = Self::new();
        storage.put_array(
            ArrayKey::ExpTable,
            build_sigmoid_table(exp_table_size, max_exp),
        );
        storage.put_array(ArrayKey::Syn0, syn0);
        storage.put_array(ArrayKey::Syn1, Matrix::zeros(vocab_size, columns));
        storage.put_array(ArrayKey::Syn1Negative, Matrix::zeros(vocab_size, columns));
        storage
    }

    /// Stores `matrix` under `key`, replacing any previous array.
    pub fn put_array(&self, key: ArrayKey, matrix: Matrix) {
        self.arrays.write().insert(key, Arc::new(RwLock::new(matrix)));
    }
}

impl WordVectorStorage for InMemoryStorage {
    fn get_array(&self, key: ArrayKey) -> Result<SharedMatrix> {
        self.arrays
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| TrainerError::storage(key, "array not found"))
    }
}
