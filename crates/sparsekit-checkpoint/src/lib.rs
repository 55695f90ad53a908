//! Checkpoint codec for sharded sparse embedding stores.
//!
//! A checkpoint is a flat list of `(key, vector)` records. The file carries no
//! trace of the device count it was written under, so a store with any number
//! of devices can restore it by routing each key with
//! [`sparsekit_core::shard_for_key`].
//!
//! # Core Components
//!
//! - [`RecordBatch`]: In-memory `(key, vector)` records of one vector size
//! - [`EmbeddingCodec`]: Reads and writes record files
//! - [`CheckpointMetadata`]: JSON sidecar describing a dump
//! - [`redistribute`]: Splits records across a device count
//!
//! # Examples
//!
//! ```no_run
//! use sparsekit_checkpoint::{EmbeddingCodec, RecordBatch};
//!
//! fn main() -> sparsekit_checkpoint::Result<()> {
//!     let mut batch = RecordBatch::new(2);
//!     batch.push(10, &[0.5, 0.25])?;
//!     batch.push(20, &[1.0, 2.0])?;
//!
//!     let codec = EmbeddingCodec::new(2);
//!     codec.dump_to_file("/tmp/item.emb".as_ref(), &[batch], "item", 1)?;
//!
//!     let restored = codec.restore_from_file("/tmp/item.emb".as_ref())?;
//!     assert_eq!(restored.len(), 2);
//!     Ok(())
//! }
//! ```
//!
//! # File Format
//!
//! Each record is the key as a little-endian `i64` followed by `vector_size`
//! little-endian `f32` values. There is no header; the vector size is agreed
//! out of band and cross-checked against the sidecar when one is present.

pub mod codec;
pub mod metadata;
pub mod record;

pub use codec::{redistribute, EmbeddingCodec};
pub use metadata::{CheckpointMetadata, FORMAT_VERSION};
pub use record::RecordBatch;

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during checkpoint operations.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// I/O error during checkpoint operations.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Checkpoint file not found.
    #[error("Checkpoint not found: {0}")]
    NotFound(PathBuf),

    /// The file is malformed or disagrees with the expected vector size.
    #[error("Corrupt checkpoint {path}: {reason}")]
    CorruptCheckpoint {
        /// Offending file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// The sidecar metadata could not be read or written.
    #[error("Checkpoint metadata error at {path}: {source}")]
    Metadata {
        /// Sidecar path.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A record's vector does not have the batch's vector size.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptCheckpoint {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;
