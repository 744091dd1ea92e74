// rust/w2v-core/src/storage/matrix.rs

//! Dense row-major `f32` matrix.

use crate::error::{Result, TrainerError};

use super::ArrayKey;

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    columns: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// Creates a zero-filled matrix.
    pub fn zeros(rows: usize, columns: usize) -> Self {
        Self {
            rows,
            columns,
            data: vec![0.0; rows * columns],
        }
    }

    /// Wraps row-major data.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` does not hold exactly `rows * columns` values.
    pub fn from_vec(key: ArrayKey, rows: usize, columns: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * columns {
            return Err(TrainerError::storage(
                key,
                format!(
                    "expected {} values for a {}x{} matrix, got {}",
                    rows * columns,
                    rows,
                    columns,
                    data.len()
                ),
            ));
        }
        Ok(Self {
            rows,
            columns,
            data,
        })
    }

    /// Fills a matrix in row-major order from `f`.
    pub fn from_fn(rows: usize, columns: usize, mut f: impl FnMut() -> f32) -> Self {
        Self {
            rows,
            columns,
            data: (0..rows * columns).map(|_| f()).collect(),
        }
    }

    /// A single-row matrix.
    pub fn row_vector(data: Vec<f32>) -> Self {
        Self {
            rows: 1,
            columns: data.len(),
            data,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.columns;
        Some(&self.data[start..start + self.columns])
    }

    pub fn row_mut(&mut self, index: usize) -> Option<&mut [f32]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.columns;
        Some(&mut self.data[start..start + self.columns])
    }

    /// Like [`Matrix::row`], but reports a missing row as a storage error.
    pub fn checked_row(&self, key: ArrayKey, index: u32) -> Result<&[f32]> {
        let rows = self.rows;
        self.row(index as usize).ok_or_else(|| {
            TrainerError::storage(key, format!("row {} out of range ({} rows)", index, rows))
        })
    }

    pub fn checked_row_mut(&mut self, key: ArrayKey, index: u32) -> Result<&mut [f32]> {
        let rows = self.rows;
        self.row_mut(index as usize).ok_or_else(|| {
            TrainerError::storage(key, format!("row {} out of range ({} rows)", index, rows))
        })
    }

    /// Column-wise mean of the named rows.
    ///
    /// # Errors
    ///
    /// Returns an error if `indices` is empty or any index is out of range.
    pub fn mean_of_rows(&self, key: ArrayKey, indices: &[u32]) -> Result<Vec<f32>> {
        if indices.is_empty() {
            return Err(TrainerError::storage(key, "mean of zero rows requested"));
        }

        let mut mean = vec![0.0f32; self.columns];
        for &index in indices {
            let row = self.checked_row(key, index)?;
            for (acc, value) in mean.iter_mut().zip(row) {
                *acc += *value;
            }
        }

        let count = indices.len() as f32;
        for value in &mut mean {
            *value /= count;
        }
        Ok(mean)
    }
}

/// Dot product of two equally sized slices.
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
