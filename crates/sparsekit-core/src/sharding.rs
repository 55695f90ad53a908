//! Key-space partitioning across device shards.
//!
//! A single routing rule decides which device owns a key. It is used by live
//! lookups and by checkpoint restore alike, so a key always lands on the same
//! device for a given device count regardless of how many devices wrote the
//! checkpoint.

/// Mixes the bits of a key so that sequential keys spread evenly.
///
/// This is the SplitMix64 finalizer. It is fixed and seedless, so routing is
/// stable across processes.
#[inline]
pub fn mix_key(key: i64) -> u64 {
    let mut z = key as u64;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Returns the shard index in `[0, num_shards)` that owns `key`.
///
/// # Panics
///
/// Panics if `num_shards` is 0.
///
/// # Examples
///
/// ```
/// use sparsekit_core::sharding::shard_for_key;
///
/// assert_eq!(shard_for_key(42, 1), 0);
/// let shard = shard_for_key(42, 4);
/// assert!(shard < 4);
/// assert_eq!(shard, shard_for_key(42, 4));
/// ```
#[inline]
pub fn shard_for_key(key: i64, num_shards: usize) -> usize {
    assert!(num_shards > 0, "num_shards must be greater than 0");
    (mix_key(key) % num_shards as u64) as usize
}

/// Groups keys by owning shard, preserving their relative order.
pub fn partition_keys(keys: &[i64], num_shards: usize) -> Vec<Vec<i64>> {
    let mut groups = vec![Vec::new(); num_shards];
    for &key in keys {
        groups[shard_for_key(key, num_shards)].push(key);
    }
    groups
}
