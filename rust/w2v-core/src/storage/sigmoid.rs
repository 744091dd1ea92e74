// rust/w2v-core/src/storage/sigmoid.rs

//! Shared sigmoid lookup table.
//!
//! All shards approximate the logistic function through the same table so
//! that every partition applies bit-identical gradients.

use super::Matrix;

/// Builds the one-row table `σ(x)` for `x` evenly spaced over
/// `[-max_exp, max_exp)`.
pub fn build_sigmoid_table(size: usize, max_exp: f32) -> Matrix {
    let values = (0..size)
        .map(|i| {
            let x = ((i as f32 / size as f32) * 2.0 - 1.0) * max_exp;
            let e = x.exp();
            e / (e + 1.0)
        })
        .collect();
    Matrix::row_vector(values)
}

/// Borrowed view over a sigmoid table.
#[derive(Debug, Clone, Copy)]
pub struct Sigmoid<'a> {
    table: &'a [f32],
    max_exp: f32,
}

impl<'a> Sigmoid<'a> {
    pub fn new(table: &'a [f32], max_exp: f32) -> Self {
        Self { table, max_exp }
    }

    /// Table value for `f`, or `None` when `f` lies outside the open domain
    /// `(-max_exp, max_exp)` or the table is empty.
    pub fn lookup(&self, f: f32) -> Option<f32> {
        if self.table.is_empty() || f <= -self.max_exp || f >= self.max_exp {
            return None;
        }
        let scale = self.table.len() as f32 / self.max_exp / 2.0;
        let index = ((f + self.max_exp) * scale) as usize;
        Some(self.table[index.min(self.table.len() - 1)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_monotonic_sigmoid() {
        let table = build_sigmoid_table(1000, 6.0);
        let values = table.as_slice();

        assert_eq!(values.len(), 1000);
        assert!(values[0] < 0.01);
        assert!((values[500] - 0.5).abs() < 1e-6);
        assert!(values[999] > 0.99);
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_lookup_clips_domain() {
        let table = build_sigmoid_table(1000, 6.0);
        let sigmoid = Sigmoid::new(table.as_slice(), 6.0);

        assert!(sigmoid.lookup(6.0).is_none());
        assert!(sigmoid.lookup(-6.0).is_none());
        assert!(sigmoid.lookup(100.0).is_none());

        let mid = sigmoid.lookup(0.01).unwrap();
        assert!((mid - 0.5).abs() < 0.01);
        let high = sigmoid.lookup(5.99).unwrap();
        assert!(high > 0.99);
    }

    #[test]
    fn test_lookup_matches_closed_form_closely() {
        let table = build_sigmoid_table(1000, 6.0);
        let sigmoid = Sigmoid::new(table.as_slice(), 6.0);

        for &f in &[-4.5f32, -1.0, 0.3, 2.2, 5.0] {
            let exact = 1.0 / (1.0 + (-f).exp());
            assert!((sigmoid.lookup(f).unwrap() - exact).abs() < 0.01);
        }
    }

    #[test]
    fn test_empty_table() {
        assert!(Sigmoid::new(&[], 6.0).lookup(0.0).is_none());
    }
}
