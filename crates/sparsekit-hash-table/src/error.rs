//! Error types for shard operations.

use thiserror::Error;

/// Errors that can occur during hash index and dense table operations.
#[derive(Error, Debug)]
pub enum HashTableError {
    /// The shard has no free slot for a new key.
    #[error("capacity exceeded: {requested} keys requested, capacity is {capacity}")]
    CapacityExceeded {
        /// Maximum number of keys the shard can hold.
        capacity: usize,
        /// Number of live keys the operation would have required.
        requested: usize,
    },

    /// An identity-mapped shard received a key outside `[0, capacity)`.
    #[error("key {key} is outside the identity-mapped range [0, {capacity})")]
    KeyOutOfRange {
        /// The offending key.
        key: i64,
        /// Capacity of the shard.
        capacity: usize,
    },

    /// No initializer is registered under the requested name.
    #[error("unknown initializer: {name}")]
    UnknownInitializer {
        /// The requested name.
        name: String,
    },

    /// An initializer was configured with invalid parameters.
    #[error("invalid initializer {name}: {reason}")]
    InvalidInitializer {
        /// Initializer name.
        name: String,
        /// Why the parameters were rejected.
        reason: String,
    },

    /// A buffer length does not match the shard's vector size.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected number of elements.
        expected: usize,
        /// Number of elements provided.
        actual: usize,
    },

    /// The requested key is not live in the shard.
    #[error("key {key} not found")]
    KeyNotFound {
        /// The missing key.
        key: i64,
    },
}

/// A specialized Result type for shard operations.
pub type Result<T> = std::result::Result<T, HashTableError>;
