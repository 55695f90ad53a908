//! Core traits for key-to-slot indexes.

use crate::Result;

/// A mapping from sparse keys to dense slot indices in `[0, capacity)`.
///
/// Slots are never reassigned while their key is live, and keys are never
/// removed, so a key resolves to the same slot until the whole index is
/// replaced.
///
/// # Thread Safety
///
/// Implementations are plain data and require external synchronization; a
/// store wraps each device's index in a lock.
///
/// # Example
///
/// ```
/// use sparsekit_hash_table::{HashIndexShard, SlotIndex};
///
/// let mut index = HashIndexShard::hashed(4);
/// let mut inserted = Vec::new();
/// let slots = index.resolve(&[10, 20, 10, 30], &mut inserted).unwrap();
/// assert_eq!(slots, vec![0, 1, 0, 2]);
/// assert_eq!(inserted, vec![0, 1, 2]);
/// ```
pub trait SlotIndex {
    /// Maximum number of live keys.
    fn capacity(&self) -> usize;

    /// Number of live keys.
    fn len(&self) -> usize;

    /// Returns `true` if no key is live.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the slot assigned to `key`, if it is live.
    fn slot_of(&self, key: i64) -> Option<usize>;

    /// Checks whether `key` is live.
    fn contains(&self, key: i64) -> bool {
        self.slot_of(key).is_some()
    }

    /// Resolves every key to its slot, inserting keys seen for the first time.
    ///
    /// Newly assigned slots are appended to `inserted` in insertion order.
    ///
    /// # Errors
    ///
    /// * [`HashTableError::CapacityExceeded`] - The batch holds more new keys
    ///   than free slots
    /// * [`HashTableError::KeyOutOfRange`] - An identity-mapped index received
    ///   a key it cannot address
    ///
    /// On error the index is left unchanged.
    ///
    /// [`HashTableError::CapacityExceeded`]: crate::HashTableError::CapacityExceeded
    /// [`HashTableError::KeyOutOfRange`]: crate::HashTableError::KeyOutOfRange
    fn resolve(&mut self, keys: &[i64], inserted: &mut Vec<usize>) -> Result<Vec<usize>>;

    /// Live `(key, slot)` pairs in insertion order.
    fn entries(&self) -> Box<dyn Iterator<Item = (i64, usize)> + '_>;
}
