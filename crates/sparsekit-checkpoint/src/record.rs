//! In-memory checkpoint records.

use crate::{CheckpointError, Result};

/// Flat `(key, vector)` records sharing one vector size.
///
/// Vectors are stored back to back in `values`; record `i` owns
/// `values[i * dim..(i + 1) * dim]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBatch {
    dim: usize,
    keys: Vec<i64>,
    values: Vec<f32>,
}

impl RecordBatch {
    /// Creates an empty batch of `dim`-wide vectors.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            keys: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Creates an empty batch with room for `records` records.
    pub fn with_capacity(dim: usize, records: usize) -> Self {
        Self {
            dim,
            keys: Vec::with_capacity(records),
            values: Vec::with_capacity(records * dim),
        }
    }

    /// Builds a batch from parallel key and value buffers.
    pub fn from_parts(dim: usize, keys: Vec<i64>, values: Vec<f32>) -> Result<Self> {
        let expected = keys.len() * dim;
        if values.len() != expected {
            return Err(CheckpointError::DimensionMismatch {
                expected,
                actual: values.len(),
            });
        }
        Ok(Self { dim, keys, values })
    }

    /// Appends one record.
    pub fn push(&mut self, key: i64, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(CheckpointError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        self.keys.push(key);
        self.values.extend_from_slice(vector);
        Ok(())
    }

    /// Appends a record whose width the caller already knows matches.
    pub(crate) fn push_unchecked(&mut self, key: i64, vector: &[f32]) {
        debug_assert_eq!(vector.len(), self.dim);
        self.keys.push(key);
        self.values.extend_from_slice(vector);
    }

    /// Vector size of every record.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[i64] {
        &self.keys
    }

    /// All vectors, back to back.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// The vector of record `i`.
    pub fn vector(&self, i: usize) -> &[f32] {
        &self.values[i * self.dim..(i + 1) * self.dim]
    }

    /// Records in order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, &[f32])> + '_ {
        self.keys
            .iter()
            .enumerate()
            .map(move |(i, &key)| (key, self.vector(i)))
    }
}
