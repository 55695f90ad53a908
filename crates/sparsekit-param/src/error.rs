//! Error types for parameter store operations.

use std::path::PathBuf;

use sparsekit_checkpoint::CheckpointError;
use sparsekit_core::CoreError;
use sparsekit_hash_table::HashTableError;
use thiserror::Error;

/// Errors surfaced by parameter stores and the registry.
///
/// Every failure is returned synchronously from the call that caused it. A
/// failed restore or load leaves the store exactly as it was.
#[derive(Debug, Error)]
pub enum ParamError {
    /// A replica id does not name one of the store's devices.
    #[error("Replica {replica_id} out of range (device count: {device_count})")]
    OutOfRange {
        /// The requested id.
        replica_id: usize,
        /// Number of device shards.
        device_count: usize,
    },

    /// A different consumer is already bound to the store.
    #[error("Variable {var_name} is already bound to consumer {bound}, cannot bind {requested}")]
    AlreadyBound {
        /// Store name.
        var_name: String,
        /// Name of the consumer already bound.
        bound: String,
        /// Name of the consumer that was rejected.
        requested: String,
    },

    /// A device shard has no room for the keys it was asked to hold.
    #[error("Capacity exceeded on device {device}: {reason} (capacity {capacity})")]
    CapacityExceeded {
        /// Local replica id of the full shard.
        device: usize,
        /// Per-device capacity.
        capacity: usize,
        /// What overflowed.
        reason: String,
    },

    /// The initializer name is not registered.
    #[error("Unknown initializer: {name}")]
    UnknownInitializer {
        /// The rejected name.
        name: String,
    },

    /// Gradients were applied to a frozen store.
    #[error("Variable {var_name} is not trainable")]
    NotTrainable {
        /// Store name.
        var_name: String,
    },

    /// The checkpoint is malformed or does not match the store's vector size.
    #[error("Corrupt checkpoint {path}: {reason}")]
    CorruptCheckpoint {
        /// Offending file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// The shape passed to the factory is unusable.
    #[error("Invalid shape {shape:?}: {reason}")]
    InvalidShape {
        /// The rejected shape.
        shape: Vec<usize>,
        /// Why it was rejected.
        reason: String,
    },

    /// The number of device buffers differs from the resource manager's
    /// device count.
    #[error("Resource manager has {devices} devices but {buffers} buffers were supplied")]
    DeviceCountMismatch {
        /// Device count reported by the resource manager.
        devices: usize,
        /// Number of buffers supplied.
        buffers: usize,
    },

    /// A data-path call reached a device before `init`.
    #[error("Device {device} is not initialized")]
    NotInitialized {
        /// Local replica id.
        device: usize,
    },

    /// A key was sent to a device that does not own it.
    #[error("Key {key} belongs to device {owner}, not device {device}")]
    MisroutedKey {
        /// The key.
        key: i64,
        /// Device the key was sent to.
        device: usize,
        /// Device the routing rule assigns it to.
        owner: usize,
    },

    /// A read or update referenced a key that is not live.
    #[error("Key {key} not found on device {device}")]
    KeyNotFound {
        /// Local replica id.
        device: usize,
        /// The missing key.
        key: i64,
    },

    /// A value buffer has the wrong length.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// A store with this name is already registered.
    #[error("Duplicate variable name: {name}")]
    DuplicateName {
        /// The contested name.
        name: String,
    },

    /// No store is registered under this name.
    #[error("Unknown variable: {name}")]
    UnknownParam {
        /// The missing name.
        name: String,
    },

    /// A consumer hook failed.
    #[error("Consumer {consumer} failed: {message}")]
    User {
        /// Consumer name.
        consumer: String,
        /// Failure description.
        message: String,
    },

    /// Configuration or device resource error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Checkpoint I/O error.
    #[error(transparent)]
    Checkpoint(CheckpointError),
}

impl ParamError {
    /// Builds a [`ParamError::User`] for a consumer hook.
    pub fn user(consumer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::User {
            consumer: consumer.into(),
            message: message.into(),
        }
    }

    /// Attaches the device id to a shard-level error.
    pub(crate) fn shard(device: usize, err: HashTableError) -> Self {
        match err {
            HashTableError::CapacityExceeded {
                capacity,
                requested,
            } => Self::CapacityExceeded {
                device,
                capacity,
                reason: format!("{requested} live keys requested"),
            },
            HashTableError::KeyOutOfRange { key, capacity } => Self::CapacityExceeded {
                device,
                capacity,
                reason: format!("key {key} is outside the identity-mapped range"),
            },
            HashTableError::UnknownInitializer { name }
            | HashTableError::InvalidInitializer { name, .. } => {
                Self::UnknownInitializer { name }
            }
            HashTableError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            HashTableError::KeyNotFound { key } => Self::KeyNotFound { device, key },
        }
    }
}

impl From<CheckpointError> for ParamError {
    fn from(err: CheckpointError) -> Self {
        match err {
            CheckpointError::CorruptCheckpoint { path, reason } => {
                Self::CorruptCheckpoint { path, reason }
            }
            other => Self::Checkpoint(other),
        }
    }
}

/// Result type for parameter store operations.
pub type Result<T> = std::result::Result<T, ParamError>;
