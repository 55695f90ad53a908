//! Dense table shard: contiguous `capacity x vector_size` storage.

use crate::error::{HashTableError, Result};
use crate::initializer::Initializer;

/// A flat buffer of `capacity * vector_size` values addressed by slot.
///
/// Only slots reachable from the paired index are live. Slot indices handed
/// to this type come from that index and are always `< capacity`.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseTableShard {
    capacity: usize,
    vector_size: usize,
    data: Vec<f32>,
}

impl DenseTableShard {
    /// Creates a zero-filled table.
    pub fn new(capacity: usize, vector_size: usize) -> Self {
        Self {
            capacity,
            vector_size,
            data: vec![0.0; capacity * vector_size],
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Length of each vector.
    pub fn vector_size(&self) -> usize {
        self.vector_size
    }

    /// Size of the table in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// The whole table, row-major.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Runs `initializer` over every slot.
    pub fn fill_all(&mut self, initializer: &dyn Initializer) {
        initializer.fill(&mut self.data, self.vector_size);
    }

    /// Runs `initializer` over the given slots.
    pub fn fill_slots(&mut self, slots: &[usize], initializer: &dyn Initializer) {
        for &slot in slots {
            let vector_size = self.vector_size;
            initializer.fill(self.row_mut(slot), vector_size);
        }
    }

    /// The vector stored at `slot`.
    #[inline]
    pub fn row(&self, slot: usize) -> &[f32] {
        let start = slot * self.vector_size;
        &self.data[start..start + self.vector_size]
    }

    /// The vector stored at `slot`, mutably.
    #[inline]
    pub fn row_mut(&mut self, slot: usize) -> &mut [f32] {
        let start = slot * self.vector_size;
        &mut self.data[start..start + self.vector_size]
    }

    /// Overwrites the vector at `slot`.
    pub fn write_row(&mut self, slot: usize, values: &[f32]) -> Result<()> {
        self.validate_len(1, values.len())?;
        self.row_mut(slot).copy_from_slice(values);
        Ok(())
    }

    /// Copies the vectors at `slots` into `out`, one after another.
    pub fn gather(&self, slots: &[usize], out: &mut [f32]) -> Result<()> {
        self.validate_len(slots.len(), out.len())?;
        for (chunk, &slot) in out.chunks_exact_mut(self.vector_size).zip(slots) {
            chunk.copy_from_slice(self.row(slot));
        }
        Ok(())
    }

    /// Writes consecutive vectors from `values` into `slots`.
    pub fn scatter(&mut self, slots: &[usize], values: &[f32]) -> Result<()> {
        self.validate_len(slots.len(), values.len())?;
        for (chunk, &slot) in values.chunks_exact(self.vector_size).zip(slots) {
            self.row_mut(slot).copy_from_slice(chunk);
        }
        Ok(())
    }

    /// Applies `row -= learning_rate * gradient` for every slot.
    pub fn apply_update(
        &mut self,
        slots: &[usize],
        gradients: &[f32],
        learning_rate: f32,
    ) -> Result<()> {
        self.validate_len(slots.len(), gradients.len())?;
        for (grad, &slot) in gradients.chunks_exact(self.vector_size).zip(slots) {
            for (value, g) in self.row_mut(slot).iter_mut().zip(grad) {
                *value -= learning_rate * g;
            }
        }
        Ok(())
    }

    fn validate_len(&self, rows: usize, len: usize) -> Result<()> {
        let expected = rows * self.vector_size;
        if len != expected {
            return Err(HashTableError::DimensionMismatch {
                expected,
                actual: len,
            });
        }
        Ok(())
    }
}
