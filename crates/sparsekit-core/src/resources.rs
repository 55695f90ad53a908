//! Device resources used by parameter stores.
//!
//! The resource manager is the authority on how many device shards a store
//! has and supplies the execution context in which per-device work runs.
//! [`DeviceBuffer`] accounts for the memory a store reserves on each device.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{CoreError, Result};

/// Supplies device count and per-device execution context.
pub trait ResourceManager: Send + Sync + fmt::Debug {
    /// Number of devices owned by this worker.
    fn device_count(&self) -> usize;

    /// Index of this worker in the job.
    fn worker_id(&self) -> usize {
        0
    }

    /// Maps a global replica id to this worker's local replica id.
    ///
    /// Returns `None` when the replica belongs to another worker.
    fn global_to_local(&self, global_replica_id: usize) -> Option<usize> {
        let count = self.device_count();
        let first = self.worker_id() * count;
        (global_replica_id >= first && global_replica_id < first + count)
            .then(|| global_replica_id - first)
    }

    /// Pool on which per-device work is scheduled.
    fn thread_pool(&self) -> &rayon::ThreadPool;
}

/// A single-worker resource manager with one pool thread per device.
pub struct LocalResourceManager {
    device_count: usize,
    pool: rayon::ThreadPool,
}

impl fmt::Debug for LocalResourceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalResourceManager")
            .field("device_count", &self.device_count)
            .field("pool_threads", &self.pool.current_num_threads())
            .finish()
    }
}

impl LocalResourceManager {
    /// Creates a manager for `device_count` local devices.
    pub fn new(device_count: usize) -> Result<Self> {
        if device_count == 0 {
            return Err(CoreError::invalid_config("device_count must be positive"));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(device_count)
            .thread_name(|i| format!("sparsekit-device-{}", i))
            .build()
            .map_err(|e| CoreError::invalid_config(format!("failed to build device pool: {e}")))?;

        tracing::debug!(device_count, "Created local resource manager");
        Ok(Self { device_count, pool })
    }

    /// Allocates one buffer of `bytes_per_device` for every device.
    pub fn allocate_buffers(&self, bytes_per_device: usize) -> Vec<Arc<DeviceBuffer>> {
        (0..self.device_count)
            .map(|device| Arc::new(DeviceBuffer::new(device, bytes_per_device)))
            .collect()
    }
}

impl ResourceManager for LocalResourceManager {
    fn device_count(&self) -> usize {
        self.device_count
    }

    fn thread_pool(&self) -> &rayon::ThreadPool {
        &self.pool
    }
}

/// Memory budget of one device.
///
/// Stores reserve the bytes their dense tables occupy at construction and
/// release them when they are dropped.
#[derive(Debug)]
pub struct DeviceBuffer {
    device_id: usize,
    capacity_bytes: usize,
    used_bytes: Mutex<usize>,
}

impl DeviceBuffer {
    /// Creates a buffer of `capacity_bytes` for `device_id`.
    pub fn new(device_id: usize, capacity_bytes: usize) -> Self {
        Self {
            device_id,
            capacity_bytes,
            used_bytes: Mutex::new(0),
        }
    }

    /// Returns the local id of the owning device.
    pub fn device_id(&self) -> usize {
        self.device_id
    }

    /// Returns the total size of the buffer.
    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    /// Returns the number of reserved bytes.
    pub fn used_bytes(&self) -> usize {
        *self.used_bytes.lock()
    }

    /// Returns the number of bytes still available.
    pub fn available_bytes(&self) -> usize {
        self.capacity_bytes - *self.used_bytes.lock()
    }

    /// Reserves `bytes`, failing if the buffer cannot hold them.
    pub fn reserve(&self, bytes: usize) -> Result<()> {
        let mut used = self.used_bytes.lock();
        let available = self.capacity_bytes - *used;
        if bytes > available {
            return Err(CoreError::OutOfDeviceMemory {
                device: self.device_id,
                requested: bytes,
                available,
            });
        }
        *used += bytes;
        Ok(())
    }

    /// Returns `bytes` previously obtained with [`DeviceBuffer::reserve`].
    pub fn release(&self, bytes: usize) {
        let mut used = self.used_bytes.lock();
        *used = used.saturating_sub(bytes);
    }
}
