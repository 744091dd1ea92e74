// rust/w2v-core/src/training/partial.rs

//! Shard-local share of the CBOW dot products.

use crate::error::Result;
use crate::protocol::DistributedCbowDot;
use crate::storage::{dot, ArrayKey, WordVectorStorage};

/// Dot products of the context mean with every output row the request
/// touches, restricted to this shard's columns.
///
/// The layout matches what the gradient kernel expects: one value per HS
/// code position, then the target word and each negative sample.
///
/// # Errors
///
/// Returns an error if an array is missing or a row is out of range.
pub fn partial_dots(storage: &dyn WordVectorStorage, message: &DistributedCbowDot) -> Result<Vec<f32>> {
    let neu1 = storage
        .get_array(ArrayKey::Syn0)?
        .read()
        .mean_of_rows(ArrayKey::Syn0, &message.syn0_rows)?;

    let mut dots = Vec::with_capacity(message.syn1_rows.len() + message.negative_rows.len() + 1);

    if message.use_hs {
        let syn1 = storage.get_array(ArrayKey::Syn1)?;
        let syn1 = syn1.read();
        for &row in &message.syn1_rows {
            dots.push(dot(&neu1, syn1.checked_row(ArrayKey::Syn1, row)?));
        }
    }

    if message.neg_samples > 0 {
        let syn1_neg = storage.get_array(ArrayKey::Syn1Negative)?;
        let syn1_neg = syn1_neg.read();
        for &row in std::iter::once(&message.w1).chain(&message.negative_rows) {
            dots.push(dot(&neu1, syn1_neg.checked_row(ArrayKey::Syn1Negative, row)?));
        }
    }

    Ok(dots)
}
