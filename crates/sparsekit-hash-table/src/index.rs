//! Hash index shard implementations.

use hashbrown::{HashMap, HashSet};

use crate::error::{HashTableError, Result};
use crate::traits::SlotIndex;

/// A growing hash index that hands out slots sequentially.
///
/// The `n`-th distinct key inserted receives slot `n`, so slot order is
/// insertion order.
#[derive(Debug, Clone)]
pub struct HashedIndex {
    /// Key to slot.
    slots: HashMap<i64, usize>,
    /// Slot to key, indexed by slot.
    keys: Vec<i64>,
    capacity: usize,
}

impl HashedIndex {
    /// Creates an empty index able to hold `capacity` keys.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: HashMap::new(),
            keys: Vec::new(),
            capacity,
        }
    }

    fn count_new_keys(&self, keys: &[i64]) -> usize {
        let mut seen = HashSet::new();
        keys.iter()
            .filter(|key| !self.slots.contains_key(*key) && seen.insert(**key))
            .count()
    }
}

impl SlotIndex for HashedIndex {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn slot_of(&self, key: i64) -> Option<usize> {
        self.slots.get(&key).copied()
    }

    fn resolve(&mut self, keys: &[i64], inserted: &mut Vec<usize>) -> Result<Vec<usize>> {
        let new_keys = self.count_new_keys(keys);
        if self.keys.len() + new_keys > self.capacity {
            return Err(HashTableError::CapacityExceeded {
                capacity: self.capacity,
                requested: self.keys.len() + new_keys,
            });
        }

        let mut out = Vec::with_capacity(keys.len());
        for &key in keys {
            let next = self.keys.len();
            let slot = *self.slots.entry(key).or_insert(next);
            if slot == next {
                self.keys.push(key);
                inserted.push(slot);
            }
            out.push(slot);
        }
        Ok(out)
    }

    fn entries(&self) -> Box<dyn Iterator<Item = (i64, usize)> + '_> {
        Box::new(self.keys.iter().enumerate().map(|(slot, &key)| (key, slot)))
    }
}

/// An identity-mapped index for small, known vocabularies: key `k` lives in
/// slot `k`.
///
/// Keys outside `[0, capacity)` are rejected.
#[derive(Debug, Clone)]
pub struct IdentityIndex {
    live: Vec<bool>,
    /// Live keys in insertion order.
    order: Vec<i64>,
}

impl IdentityIndex {
    /// Creates an empty index addressing `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            live: vec![false; capacity],
            order: Vec::new(),
        }
    }

    fn slot_for(&self, key: i64) -> Result<usize> {
        usize::try_from(key)
            .ok()
            .filter(|&slot| slot < self.live.len())
            .ok_or(HashTableError::KeyOutOfRange {
                key,
                capacity: self.live.len(),
            })
    }
}

impl SlotIndex for IdentityIndex {
    fn capacity(&self) -> usize {
        self.live.len()
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn slot_of(&self, key: i64) -> Option<usize> {
        self.slot_for(key).ok().filter(|&slot| self.live[slot])
    }

    fn resolve(&mut self, keys: &[i64], inserted: &mut Vec<usize>) -> Result<Vec<usize>> {
        let slots = keys
            .iter()
            .map(|&key| self.slot_for(key))
            .collect::<Result<Vec<_>>>()?;

        for (&key, &slot) in keys.iter().zip(&slots) {
            if !self.live[slot] {
                self.live[slot] = true;
                self.order.push(key);
                inserted.push(slot);
            }
        }
        Ok(slots)
    }

    fn entries(&self) -> Box<dyn Iterator<Item = (i64, usize)> + '_> {
        Box::new(self.order.iter().map(|&key| (key, key as usize)))
    }
}

/// The index of one device shard.
///
/// Either a [`HashedIndex`] for open key spaces that grow during training, or
/// an [`IdentityIndex`] for fixed vocabularies.
#[derive(Debug, Clone)]
pub enum HashIndexShard {
    /// Hash-backed, slots assigned on first sight.
    Hashed(HashedIndex),
    /// Identity-mapped, key equals slot.
    Identity(IdentityIndex),
}

impl HashIndexShard {
    /// Creates an empty hash-backed shard.
    pub fn hashed(capacity: usize) -> Self {
        Self::Hashed(HashedIndex::new(capacity))
    }

    /// Creates an empty identity-mapped shard.
    pub fn identity(capacity: usize) -> Self {
        Self::Identity(IdentityIndex::new(capacity))
    }

    fn as_dyn(&self) -> &dyn SlotIndex {
        match self {
            Self::Hashed(index) => index,
            Self::Identity(index) => index,
        }
    }

    fn as_dyn_mut(&mut self) -> &mut dyn SlotIndex {
        match self {
            Self::Hashed(index) => index,
            Self::Identity(index) => index,
        }
    }
}

impl SlotIndex for HashIndexShard {
    fn capacity(&self) -> usize {
        self.as_dyn().capacity()
    }

    fn len(&self) -> usize {
        self.as_dyn().len()
    }

    fn slot_of(&self, key: i64) -> Option<usize> {
        self.as_dyn().slot_of(key)
    }

    fn resolve(&mut self, keys: &[i64], inserted: &mut Vec<usize>) -> Result<Vec<usize>> {
        self.as_dyn_mut().resolve(keys, inserted)
    }

    fn entries(&self) -> Box<dyn Iterator<Item = (i64, usize)> + '_> {
        self.as_dyn().entries()
    }
}
