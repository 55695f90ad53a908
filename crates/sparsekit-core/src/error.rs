//! Error types for the sparsekit core library.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for sparsekit-core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Error during configuration parsing or validation.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// A description of the configuration error.
        message: String,
    },

    /// A device buffer cannot satisfy a reservation.
    #[error(
        "Out of device memory on device {device}: requested {requested} bytes, {available} available"
    )]
    OutOfDeviceMemory {
        /// Local id of the device whose buffer is exhausted.
        device: usize,
        /// Number of bytes requested.
        requested: usize,
        /// Number of bytes still available.
        available: usize,
    },

    /// A device id is not managed by this resource manager.
    #[error("Invalid device {device} (device count: {device_count})")]
    InvalidDevice {
        /// The requested device id.
        device: usize,
        /// Number of devices managed.
        device_count: usize,
    },

    /// I/O error while reading a configuration file.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file could not be parsed.
    #[error("Failed to parse {path}: {source}")]
    Parse {
        /// Path of the malformed file.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

impl CoreError {
    /// Creates a new configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

/// A specialized Result type for sparsekit-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
