// rust/w2v-core/src/training/kernel.rs

//! CBOW gradient update.
//!
//! This is the word2vec update rule applied to one shard's column partition.
//! The dot products come pre-aggregated from the whole cluster, so each
//! shard only touches its own slice of the output rows and of the input
//! error vector.

use crate::error::{Result, TrainerError};
use crate::storage::{ArrayKey, Matrix, Sigmoid};

/// Accumulates output-side updates for one CBOW round.
///
/// Output rows are updated in place as each objective runs; the error to
/// propagate into the context rows accumulates in `neu1e` and is taken with
/// [`GradientKernel::into_error`].
pub struct GradientKernel<'a> {
    neu1: &'a [f32],
    sigmoid: Sigmoid<'a>,
    alpha: f32,
    neu1e: Vec<f32>,
}

impl<'a> GradientKernel<'a> {
    /// `neu1` is the mean context vector on this partition.
    pub fn new(neu1: &'a [f32], sigmoid: Sigmoid<'a>, alpha: f32) -> Self {
        Self {
            neu1,
            sigmoid,
            alpha,
            neu1e: vec![0.0; neu1.len()],
        }
    }

    /// Hierarchical softmax over the Huffman path of the target word.
    ///
    /// `dots[d]` is the full dot product of the context mean with the inner
    /// node `points[d]`. Positions outside the sigmoid domain carry no
    /// gradient.
    pub fn hierarchical_softmax(
        &mut self,
        dots: &[f32],
        codes: &[u8],
        points: &[u32],
        syn1: &mut Matrix,
    ) -> Result<()> {
        if dots.len() != codes.len() || points.len() != codes.len() {
            return Err(TrainerError::protocol(format!(
                "hierarchical softmax needs one dot and one point per code: {} codes, {} points, {} dots",
                codes.len(),
                points.len(),
                dots.len()
            )));
        }
        self.check_width(ArrayKey::Syn1, syn1)?;

        for ((&f, &code), &point) in dots.iter().zip(codes).zip(points) {
            let Some(sigma) = self.sigmoid.lookup(f) else {
                continue;
            };
            let g = (1.0 - code as f32 - sigma) * self.alpha;
            self.apply(g, syn1.checked_row_mut(ArrayKey::Syn1, point)?);
        }
        Ok(())
    }

    /// Negative sampling with `w1` as the positive and `negatives` as the
    /// sampled noise words.
    ///
    /// `dots[0]` belongs to `w1`, `dots[1 + i]` to `negatives[i]`. Negatives
    /// equal to the target are skipped. Dot products outside the sigmoid
    /// domain saturate to 0 or 1.
    pub fn negative_sampling(
        &mut self,
        dots: &[f32],
        w1: u32,
        negatives: &[u32],
        syn1_neg: &mut Matrix,
    ) -> Result<()> {
        if dots.len() != negatives.len() + 1 {
            return Err(TrainerError::protocol(format!(
                "negative sampling needs {} dots, got {}",
                negatives.len() + 1,
                dots.len()
            )));
        }
        self.check_width(ArrayKey::Syn1Negative, syn1_neg)?;

        let targets = std::iter::once((w1, 1.0f32)).chain(
            negatives
                .iter()
                .filter(|&&row| row != w1)
                .map(|&row| (row, 0.0f32)),
        );
        let dots_by_target = std::iter::once(dots[0]).chain(
            negatives
                .iter()
                .zip(&dots[1..])
                .filter(|(&row, _)| row != w1)
                .map(|(_, &f)| f),
        );

        for ((row, label), f) in targets.zip(dots_by_target) {
            let sigma = match self.sigmoid.lookup(f) {
                Some(sigma) => sigma,
                None if f > 0.0 => 1.0,
                None => 0.0,
            };
            let g = (label - sigma) * self.alpha;
            self.apply(g, syn1_neg.checked_row_mut(ArrayKey::Syn1Negative, row)?);
        }
        Ok(())
    }

    /// The accumulated input error.
    pub fn into_error(self) -> Vec<f32> {
        self.neu1e
    }

    // neu1e picks up the row before the row itself moves.
    fn apply(&mut self, g: f32, row: &mut [f32]) {
        for ((err, out), ctx) in self.neu1e.iter_mut().zip(row.iter_mut()).zip(self.neu1) {
            *err += g * *out;
            *out += g * *ctx;
        }
    }

    fn check_width(&self, key: ArrayKey, matrix: &Matrix) -> Result<()> {
        if matrix.columns() != self.neu1.len() {
            return Err(TrainerError::storage(
                key,
                format!(
                    "partition has {} columns but context vector has {}",
                    matrix.columns(),
                    self.neu1.len()
                ),
            ));
        }
        Ok(())
    }
}

/// Adds the input error to every context row.
///
/// # Errors
///
/// Returns an error if a row is out of range or the widths disagree.
pub fn propagate_input_error(syn0: &mut Matrix, rows: &[u32], neu1e: &[f32]) -> Result<()> {
    if syn0.columns() != neu1e.len() {
        return Err(TrainerError::storage(
            ArrayKey::Syn0,
            format!(
                "partition has {} columns but error vector has {}",
                syn0.columns(),
                neu1e.len()
            ),
        ));
    }
    for &row in rows {
        let target = syn0.checked_row_mut(ArrayKey::Syn0, row)?;
        for (value, err) in target.iter_mut().zip(neu1e) {
            *value += *err;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f32 = 1e-6;

    /// Lower half of the domain maps to 0.25, upper half to 0.75.
    fn step_table() -> Vec<f32> {
        let mut table = vec![0.25f32; 1000];
        for value in &mut table[500..] {
            *value = 0.75;
        }
        table
    }

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < TOLERANCE, "{:?} != {:?}", actual, expected);
        }
    }

    #[test]
    fn test_hierarchical_softmax_matches_hand_computation() {
        let table = step_table();
        let neu1 = [1.0f32, 2.0];
        let mut syn1 = Matrix::from_vec(
            ArrayKey::Syn1,
            3,
            2,
            vec![0.1, 0.2, 0.0, 0.0, -0.3, 0.4],
        )
        .unwrap();

        let mut kernel = GradientKernel::new(&neu1, Sigmoid::new(&table, 6.0), 0.025);
        // point 0: f=1.0 -> 0.75, code 0 -> g = (1 - 0 - 0.75) * 0.025 = 0.00625
        // point 2: f=-1.0 -> 0.25, code 1 -> g = (1 - 1 - 0.25) * 0.025 = -0.00625
        kernel
            .hierarchical_softmax(&[1.0, -1.0], &[0, 1], &[0, 2], &mut syn1)
            .unwrap();
        let neu1e = kernel.into_error();

        // neu1e = 0.00625 * [0.1, 0.2] - 0.00625 * [-0.3, 0.4]
        assert_close(&neu1e, &[0.0025, -0.00125]);
        // syn1[0] = [0.1, 0.2] + 0.00625 * [1, 2]
        assert_close(syn1.row(0).unwrap(), &[0.10625, 0.2125]);
        assert_close(syn1.row(1).unwrap(), &[0.0, 0.0]);
        // syn1[2] = [-0.3, 0.4] - 0.00625 * [1, 2]
        assert_close(syn1.row(2).unwrap(), &[-0.30625, 0.3875]);
    }

    #[test]
    fn test_hierarchical_softmax_skips_saturated_dots() {
        let table = step_table();
        let neu1 = [1.0f32];
        let mut syn1 = Matrix::from_vec(ArrayKey::Syn1, 1, 1, vec![0.5]).unwrap();

        let mut kernel = GradientKernel::new(&neu1, Sigmoid::new(&table, 6.0), 0.025);
        kernel
            .hierarchical_softmax(&[6.0, -7.5], &[0, 1], &[0, 0], &mut syn1)
            .unwrap();

        assert_eq!(syn1.row(0).unwrap(), &[0.5]);
        assert_eq!(kernel.into_error(), vec![0.0]);
    }

    #[test]
    fn test_negative_sampling_matches_hand_computation() {
        let table = step_table();
        let neu1 = [2.0f32, -1.0];
        let mut syn1_neg = Matrix::from_vec(
            ArrayKey::Syn1Negative,
            3,
            2,
            vec![0.5, 0.5, 1.0, 0.0, 0.0, 2.0],
        )
        .unwrap();

        let mut kernel = GradientKernel::new(&neu1, Sigmoid::new(&table, 6.0), 0.025);
        // target 0: f=1.0 -> 0.75, label 1 -> g = 0.25 * 0.025 = 0.00625
        // negative 1: f=-1.0 -> 0.25, label 0 -> g = -0.25 * 0.025 = -0.00625
        // negative 2: f=9.0 saturates to 1, label 0 -> g = -0.025
        kernel
            .negative_sampling(&[1.0, -1.0, 9.0], 0, &[1, 2], &mut syn1_neg)
            .unwrap();
        let neu1e = kernel.into_error();

        // 0.00625*[0.5,0.5] - 0.00625*[1,0] - 0.025*[0,2]
        assert_close(&neu1e, &[-0.003125, -0.046875]);
        assert_close(syn1_neg.row(0).unwrap(), &[0.5125, 0.49375]);
        assert_close(syn1_neg.row(1).unwrap(), &[0.9875, 0.00625]);
        assert_close(syn1_neg.row(2).unwrap(), &[-0.05, 2.025]);
    }

    #[test]
    fn test_negative_equal_to_target_is_skipped() {
        let table = step_table();
        let neu1 = [1.0f32];
        let mut syn1_neg = Matrix::zeros(2, 1);

        let mut kernel = GradientKernel::new(&neu1, Sigmoid::new(&table, 6.0), 0.1);
        kernel
            .negative_sampling(&[1.0, 1.0, -1.0], 0, &[0, 1], &mut syn1_neg)
            .unwrap();

        // target: (1 - 0.75) * 0.1; negative 1 uses dots[2]: (0 - 0.25) * 0.1
        assert_close(syn1_neg.row(0).unwrap(), &[0.025]);
        assert_close(syn1_neg.row(1).unwrap(), &[-0.025]);
    }

    #[test]
    fn test_shape_errors() {
        let table = step_table();
        let neu1 = [1.0f32, 1.0];
        let mut narrow = Matrix::zeros(2, 1);
        let mut wide = Matrix::zeros(2, 2);

        let mut kernel = GradientKernel::new(&neu1, Sigmoid::new(&table, 6.0), 0.1);
        assert!(kernel
            .hierarchical_softmax(&[0.0], &[0], &[0], &mut narrow)
            .is_err());
        assert!(kernel
            .hierarchical_softmax(&[0.0, 0.0], &[0], &[0], &mut wide)
            .is_err());
        assert!(kernel
            .hierarchical_softmax(&[0.0], &[0], &[5], &mut wide)
            .is_err());
        assert!(kernel.negative_sampling(&[0.0], 0, &[1], &mut wide).is_err());
    }

    #[test]
    fn test_propagate_input_error() {
        let mut syn0 = Matrix::zeros(3, 2);
        propagate_input_error(&mut syn0, &[0, 2, 2], &[0.5, -1.0]).unwrap();

        assert_eq!(syn0.row(0).unwrap(), &[0.5, -1.0]);
        assert_eq!(syn0.row(1).unwrap(), &[0.0, 0.0]);
        assert_eq!(syn0.row(2).unwrap(), &[1.0, -2.0]);

        assert!(propagate_input_error(&mut syn0, &[3], &[0.0, 0.0]).is_err());
        assert!(propagate_input_error(&mut syn0, &[0], &[0.0]).is_err());
    }
}
