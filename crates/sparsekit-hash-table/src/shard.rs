//! Operations spanning a device's index and its dense table.
//!
//! A device shard is a [`HashIndexShard`] paired with a [`DenseTableShard`].
//! Callers hold both exclusively (index first, then table) for the duration
//! of each call.

use sparsekit_core::FillPolicy;

use crate::dense::DenseTableShard;
use crate::error::{HashTableError, Result};
use crate::index::HashIndexShard;
use crate::initializer::Initializer;
use crate::traits::SlotIndex;

/// Resolves a key batch to slots, inserting keys seen for the first time.
///
/// Under [`FillPolicy::Lazy`] each newly assigned slot is filled by
/// `initializer` before this returns. Under [`FillPolicy::Eager`] the slot
/// already holds initializer output from `init()`.
///
/// On error neither the index nor the table is modified.
pub fn resolve_keys(
    index: &mut HashIndexShard,
    table: &mut DenseTableShard,
    keys: &[i64],
    initializer: &dyn Initializer,
    fill_policy: FillPolicy,
) -> Result<Vec<usize>> {
    let mut inserted = Vec::new();
    let slots = index.resolve(keys, &mut inserted)?;
    if fill_policy == FillPolicy::Lazy && !inserted.is_empty() {
        table.fill_slots(&inserted, initializer);
    }
    tracing::trace!(
        keys = keys.len(),
        inserted = inserted.len(),
        live = index.len(),
        "Resolved key batch"
    );
    Ok(slots)
}

/// Looks up the slots of live keys without inserting.
pub fn lookup_slots(index: &HashIndexShard, keys: &[i64]) -> Result<Vec<usize>> {
    keys.iter()
        .map(|&key| index.slot_of(key).ok_or(HashTableError::KeyNotFound { key }))
        .collect()
}

/// Copies the vectors of live keys into a new buffer.
pub fn gather_keys(
    index: &HashIndexShard,
    table: &DenseTableShard,
    keys: &[i64],
) -> Result<Vec<f32>> {
    let slots = lookup_slots(index, keys)?;
    let mut out = vec![0.0; keys.len() * table.vector_size()];
    table.gather(&slots, &mut out)?;
    Ok(out)
}

/// Inserts or overwrites `keys` with the consecutive vectors in `values`.
///
/// Slots of new keys are assigned exactly as [`resolve_keys`] would; their
/// content comes from `values`, so no initializer runs.
pub fn assign_keys(
    index: &mut HashIndexShard,
    table: &mut DenseTableShard,
    keys: &[i64],
    values: &[f32],
) -> Result<()> {
    let expected = keys.len() * table.vector_size();
    if values.len() != expected {
        return Err(HashTableError::DimensionMismatch {
            expected,
            actual: values.len(),
        });
    }
    let mut inserted = Vec::new();
    let slots = index.resolve(keys, &mut inserted)?;
    table.scatter(&slots, values)
}

/// An insert-or-overwrite that has been checked against a device shard but
/// not yet applied to it.
///
/// Staging resolves the keys on a copy of the index, so every error surfaces
/// before the live shard changes. Only the touched rows are written on
/// [`commit`](StagedAssignment::commit); the table itself is never copied.
#[derive(Debug)]
pub struct StagedAssignment<'v> {
    index: HashIndexShard,
    slots: Vec<usize>,
    vector_size: usize,
    values: &'v [f32],
}

impl StagedAssignment<'_> {
    /// Installs the staged index and writes the staged rows.
    ///
    /// `index` and `table` must be the pair the assignment was staged
    /// against, still held exclusively since [`stage_assignment`].
    pub fn commit(self, index: &mut HashIndexShard, table: &mut DenseTableShard) {
        debug_assert_eq!(table.vector_size(), self.vector_size);
        *index = self.index;
        for (chunk, &slot) in self.values.chunks_exact(self.vector_size).zip(&self.slots) {
            table.row_mut(slot).copy_from_slice(chunk);
        }
    }
}

/// Stages [`assign_keys`] against `index` without touching it or its table.
pub fn stage_assignment<'v>(
    index: &HashIndexShard,
    table: &DenseTableShard,
    keys: &[i64],
    values: &'v [f32],
) -> Result<StagedAssignment<'v>> {
    let vector_size = table.vector_size();
    let expected = keys.len() * vector_size;
    if values.len() != expected {
        return Err(HashTableError::DimensionMismatch {
            expected,
            actual: values.len(),
        });
    }
    let mut staged = index.clone();
    let mut inserted = Vec::new();
    let slots = staged.resolve(keys, &mut inserted)?;
    Ok(StagedAssignment {
        index: staged,
        slots,
        vector_size,
        values,
    })
}

/// Applies `v -= learning_rate * g` to the vectors of live keys.
///
/// Every key must be live; the table is untouched if any is missing.
pub fn apply_gradients(
    index: &HashIndexShard,
    table: &mut DenseTableShard,
    keys: &[i64],
    gradients: &[f32],
    learning_rate: f32,
) -> Result<()> {
    let slots = lookup_slots(index, keys)?;
    table.apply_update(&slots, gradients, learning_rate)
}

/// Live `(key, vector)` pairs of a device shard, in insertion order.
pub fn live_records<'a>(
    index: &'a HashIndexShard,
    table: &'a DenseTableShard,
) -> impl Iterator<Item = (i64, &'a [f32])> + 'a {
    index.entries().map(move |(key, slot)| (key, table.row(slot)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initializer::{OnesInitializer, ZerosInitializer};

    #[test]
    fn test_resolve_keys_lazy_fills_new_slots() {
        let mut index = HashIndexShard::hashed(4);
        let mut table = DenseTableShard::new(4, 2);

        let slots =
            resolve_keys(&mut index, &mut table, &[10, 20], &OnesInitializer, FillPolicy::Lazy)
                .unwrap();
        assert_eq!(slots, vec![0, 1]);
        assert_eq!(table.row(0), &[1.0, 1.0]);
        assert_eq!(table.row(1), &[1.0, 1.0]);
        assert_eq!(table.row(2), &[0.0, 0.0]);
    }

    #[test]
    fn test_resolve_keys_lazy_keeps_existing_values() {
        let mut index = HashIndexShard::hashed(4);
        let mut table = DenseTableShard::new(4, 2);
        resolve_keys(&mut index, &mut table, &[10], &OnesInitializer, FillPolicy::Lazy).unwrap();
        table.write_row(0, &[3.0, 4.0]).unwrap();

        resolve_keys(&mut index, &mut table, &[10, 11], &OnesInitializer, FillPolicy::Lazy)
            .unwrap();
        assert_eq!(table.row(0), &[3.0, 4.0]);
        assert_eq!(table.row(1), &[1.0, 1.0]);
    }

    #[test]
    fn test_resolve_keys_eager_does_not_refill() {
        let mut index = HashIndexShard::hashed(2);
        let mut table = DenseTableShard::new(2, 2);
        table.fill_all(&OnesInitializer);
        table.write_row(0, &[9.0, 9.0]).unwrap();

        resolve_keys(&mut index, &mut table, &[5], &ZerosInitializer, FillPolicy::Eager)
            .unwrap();
        assert_eq!(table.row(0), &[9.0, 9.0]);
    }

    #[test]
    fn test_resolve_keys_capacity_exceeded_no_fill() {
        let mut index = HashIndexShard::hashed(1);
        let mut table = DenseTableShard::new(1, 2);

        let result =
            resolve_keys(&mut index, &mut table, &[1, 2], &OnesInitializer, FillPolicy::Lazy);
        assert!(matches!(result, Err(HashTableError::CapacityExceeded { .. })));
        assert!(index.is_empty());
        assert_eq!(table.row(0), &[0.0, 0.0]);
    }

    #[test]
    fn test_gather_keys() {
        let mut index = HashIndexShard::hashed(4);
        let mut table = DenseTableShard::new(4, 2);
        assign_keys(&mut index, &mut table, &[7, 8], &[1.0, 2.0, 3.0, 4.0]).unwrap();

        assert_eq!(
            gather_keys(&index, &table, &[8, 7]).unwrap(),
            vec![3.0, 4.0, 1.0, 2.0]
        );
        assert!(matches!(
            gather_keys(&index, &table, &[9]),
            Err(HashTableError::KeyNotFound { key: 9 })
        ));
    }

    #[test]
    fn test_assign_keys_overwrites() {
        let mut index = HashIndexShard::identity(4);
        let mut table = DenseTableShard::new(4, 1);
        assign_keys(&mut index, &mut table, &[3], &[1.0]).unwrap();
        assign_keys(&mut index, &mut table, &[3, 0], &[2.0, 5.0]).unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(table.row(3), &[2.0]);
        assert_eq!(table.row(0), &[5.0]);

        assert!(matches!(
            assign_keys(&mut index, &mut table, &[1], &[1.0, 2.0]),
            Err(HashTableError::DimensionMismatch { .. })
        ));
        assert!(!index.contains(1));
    }

    #[test]
    fn test_staged_assignment_leaves_shard_until_commit() {
        let mut index = HashIndexShard::hashed(4);
        let mut table = DenseTableShard::new(4, 2);
        assign_keys(&mut index, &mut table, &[1], &[1.0, 1.0]).unwrap();

        let values = [5.0, 6.0, 7.0, 8.0];
        let staged = stage_assignment(&index, &table, &[2, 1], &values).unwrap();
        assert!(!index.contains(2));
        assert_eq!(table.row(0), &[1.0, 1.0]);

        staged.commit(&mut index, &mut table);
        assert_eq!(index.slot_of(2), Some(1));
        assert_eq!(table.row(1), &[5.0, 6.0]);
        assert_eq!(table.row(0), &[7.0, 8.0]);
        assert_eq!(table.row(2), &[0.0, 0.0]);
    }

    #[test]
    fn test_stage_assignment_errors() {
        let index = HashIndexShard::identity(2);
        let table = DenseTableShard::new(2, 1);

        assert!(matches!(
            stage_assignment(&index, &table, &[0], &[1.0, 2.0]),
            Err(HashTableError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            stage_assignment(&index, &table, &[0, 2], &[1.0, 2.0]),
            Err(HashTableError::KeyOutOfRange { key: 2, .. })
        ));
        assert!(index.is_empty());
    }

    #[test]
    fn test_apply_gradients_requires_live_keys() {
        let mut index = HashIndexShard::hashed(4);
        let mut table = DenseTableShard::new(4, 2);
        assign_keys(&mut index, &mut table, &[1], &[1.0, 1.0]).unwrap();

        let result = apply_gradients(&index, &mut table, &[1, 2], &[1.0; 4], 0.5);
        assert!(matches!(result, Err(HashTableError::KeyNotFound { key: 2 })));
        assert_eq!(table.row(0), &[1.0, 1.0]);

        apply_gradients(&index, &mut table, &[1], &[1.0, 2.0], 0.5).unwrap();
        assert_eq!(table.row(0), &[0.5, 0.0]);
    }

    #[test]
    fn test_live_records_order() {
        let mut index = HashIndexShard::hashed(4);
        let mut table = DenseTableShard::new(4, 1);
        assign_keys(&mut index, &mut table, &[30, 10, 20], &[3.0, 1.0, 2.0]).unwrap();

        let records: Vec<(i64, Vec<f32>)> = live_records(&index, &table)
            .map(|(key, row)| (key, row.to_vec()))
            .collect();
        assert_eq!(
            records,
            vec![(30, vec![3.0]), (10, vec![1.0]), (20, vec![2.0])]
        );
    }
}
