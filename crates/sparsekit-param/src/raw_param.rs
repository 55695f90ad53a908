//! The concrete sharded embedding store.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use rayon::prelude::*;
use sparsekit_checkpoint::{redistribute, EmbeddingCodec, RecordBatch};
use sparsekit_core::{
    partition_keys, shard_for_key, CoreError, DeviceBuffer, FillPolicy, ResourceManager,
    StoreConfig,
};
use sparsekit_hash_table::{
    shard, DenseTableShard, HashIndexShard, Initializer, InitializerFactory, SlotIndex,
};

use crate::error::{ParamError, Result};
use crate::interface::{IndexHandle, ParamInterface, TableHandle};
use crate::user::EmbeddingUser;

type ShardWriteGuards<'a> = Vec<(
    RwLockWriteGuard<'a, HashIndexShard>,
    RwLockWriteGuard<'a, DenseTableShard>,
)>;

/// One device's index and table plus the buffer bytes backing them.
struct DeviceShard {
    index: IndexHandle,
    table: TableHandle,
    initialized: AtomicBool,
    buffer: Arc<DeviceBuffer>,
    reserved_bytes: usize,
}

impl DeviceShard {
    fn new(index: HashIndexShard, table: DenseTableShard, buffer: Arc<DeviceBuffer>) -> Self {
        let reserved_bytes = table.size_bytes();
        Self {
            index: Arc::new(RwLock::new(index)),
            table: Arc::new(RwLock::new(table)),
            initialized: AtomicBool::new(false),
            buffer,
            reserved_bytes,
        }
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }
}

impl Drop for DeviceShard {
    fn drop(&mut self) {
        self.buffer.release(self.reserved_bytes);
        tracing::trace!(
            device = self.buffer.device_id(),
            bytes = self.reserved_bytes,
            "Released device buffer"
        );
    }
}

/// An embedding variable sharded across the devices of one worker.
///
/// Device `d` owns the keys for which [`shard_for_key`] returns `d`. Each
/// device has its own index and dense table; no lock spans devices on the
/// lookup path.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use sparsekit_core::LocalResourceManager;
/// use sparsekit_param::{ParamInterface, RawParam};
///
/// let manager = Arc::new(LocalResourceManager::new(1).unwrap());
/// let buffers = manager.allocate_buffers(1 << 20);
/// let param = RawParam::create("zeros", true, &[4, 2], manager, buffers, "item", true).unwrap();
/// param.init_all().unwrap();
///
/// let slots = param.lookup_or_insert(0, &[10, 20, 10, 30]).unwrap();
/// assert_eq!(slots, vec![0, 1, 0, 2]);
/// assert_eq!(param.gather(0, &[30]).unwrap(), vec![0.0, 0.0]);
/// assert_eq!(param.get_max_vocabulary_size_per_gpu(), 4);
/// ```
pub struct RawParam {
    config: StoreConfig,
    initializer: Arc<dyn Initializer>,
    resource_mgr: Arc<dyn ResourceManager>,
    devices: Vec<DeviceShard>,
    user: Mutex<Option<Weak<dyn EmbeddingUser>>>,
}

impl fmt::Debug for RawParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawParam")
            .field("config", &self.config)
            .field("devices", &self.devices.len())
            .field("resource_mgr", &self.resource_mgr)
            .finish()
    }
}

impl RawParam {
    /// Creates a store from a `[max_vocabulary_size_per_gpu, vector_size]`
    /// shape.
    ///
    /// # Errors
    ///
    /// * [`ParamError::InvalidShape`] - `shape` is not two positive dimensions
    /// * [`ParamError::UnknownInitializer`] - `initializer_name` is not registered
    /// * [`ParamError::DeviceCountMismatch`] - one buffer per device is required
    /// * [`ParamError::Core`] - the resource manager reports no devices, a
    ///   buffer belongs to a device it does not manage, or a buffer is too
    ///   small for the table
    pub fn create(
        initializer_name: &str,
        use_hashtable: bool,
        shape: &[usize],
        resource_mgr: Arc<dyn ResourceManager>,
        buffers: Vec<Arc<DeviceBuffer>>,
        var_name: &str,
        trainable: bool,
    ) -> Result<Self> {
        let invalid = |reason: &str| ParamError::InvalidShape {
            shape: shape.to_vec(),
            reason: reason.to_string(),
        };
        if shape.is_empty() {
            return Err(invalid("shape is empty"));
        }
        let config = StoreConfig::from_shape(var_name, shape)
            .map_err(|_| invalid("expected [max_vocabulary_size_per_gpu, vector_size]"))?
            .with_initializer(initializer_name)
            .with_hashtable(use_hashtable)
            .with_trainable(trainable);
        if config.max_vocabulary_size_per_gpu == 0 {
            return Err(invalid("max_vocabulary_size_per_gpu must be positive"));
        }
        if config.vector_size == 0 {
            return Err(invalid("vector_size must be positive"));
        }
        Self::create_from_config(config, resource_mgr, buffers)
    }

    /// Creates a store from a full configuration.
    ///
    /// The initializer is resolved before any device memory is reserved. The
    /// dense table bytes of every device are reserved from its buffer and
    /// returned when the store is dropped.
    pub fn create_from_config(
        config: StoreConfig,
        resource_mgr: Arc<dyn ResourceManager>,
        buffers: Vec<Arc<DeviceBuffer>>,
    ) -> Result<Self> {
        config.validate()?;
        let initializer = InitializerFactory::from_name(&config.initializer).map_err(|_| {
            ParamError::UnknownInitializer {
                name: config.initializer.clone(),
            }
        })?;

        let device_count = resource_mgr.device_count();
        if device_count == 0 {
            return Err(CoreError::invalid_config("resource manager reports no devices").into());
        }
        if device_count != buffers.len() {
            return Err(ParamError::DeviceCountMismatch {
                devices: device_count,
                buffers: buffers.len(),
            });
        }
        if let Some(buffer) = buffers.iter().find(|b| b.device_id() >= device_count) {
            return Err(CoreError::InvalidDevice {
                device: buffer.device_id(),
                device_count,
            }
            .into());
        }

        let bytes = config.table_len() * std::mem::size_of::<f32>();
        let mut devices = Vec::with_capacity(device_count);
        for buffer in buffers {
            // Shards already pushed release their reservation when dropped.
            buffer.reserve(bytes)?;
            let index = new_index(&config);
            let table = DenseTableShard::new(config.max_vocabulary_size_per_gpu, config.vector_size);
            devices.push(DeviceShard::new(index, table, buffer));
        }

        tracing::info!(
            var = %config.name,
            devices = device_count,
            capacity = config.max_vocabulary_size_per_gpu,
            vector_size = config.vector_size,
            initializer = %config.initializer,
            hashtable = config.use_hashtable,
            fill_policy = %config.fill_policy,
            "Created embedding variable"
        );

        Ok(Self {
            config,
            initializer,
            resource_mgr,
            devices,
            user: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Number of device shards.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn fill_policy(&self) -> FillPolicy {
        self.config.fill_policy
    }

    /// Name of the initializer seeding new slots.
    pub fn initializer_name(&self) -> &str {
        self.initializer.name()
    }

    /// Initializes the device serving `global_replica_id`.
    ///
    /// Under [`FillPolicy::Eager`] every slot receives initializer output.
    /// Initializing a device twice logs a warning and changes nothing.
    pub fn init(&self, global_replica_id: usize) -> Result<()> {
        let local = self
            .resource_mgr
            .global_to_local(global_replica_id)
            .ok_or(ParamError::OutOfRange {
                replica_id: global_replica_id,
                device_count: self.devices.len(),
            })?;
        self.init_device(local)
    }

    /// Initializes every device in parallel on the resource manager's pool.
    pub fn init_all(&self) -> Result<()> {
        let device_count = self.devices.len();
        self.resource_mgr.thread_pool().install(|| {
            (0..device_count)
                .into_par_iter()
                .try_for_each(|device| self.init_device(device))
        })?;
        tracing::info!(var = %self.config.name, devices = device_count, "Initialized embedding variable");
        Ok(())
    }

    fn init_device(&self, local: usize) -> Result<()> {
        let device = self.device(local)?;
        // Holding the index keeps lookups out until the fill is visible.
        let _index = device.index.write();
        let mut table = device.table.write();
        if device.is_initialized() {
            tracing::warn!(var = %self.config.name, device = local, "Device already initialized");
            return Ok(());
        }
        if self.config.fill_policy == FillPolicy::Eager {
            table.fill_all(self.initializer.as_ref());
        }
        device.initialized.store(true, Ordering::Release);
        tracing::debug!(
            var = %self.config.name,
            device = local,
            fill_policy = %self.config.fill_policy,
            "Initialized device shard"
        );
        Ok(())
    }

    /// Returns whether device `local_replica_id` has been initialized.
    pub fn is_initialized(&self, local_replica_id: usize) -> Result<bool> {
        Ok(self.device(local_replica_id)?.is_initialized())
    }

    /// Resolves keys owned by device `local_replica_id` to slots, inserting
    /// keys seen for the first time.
    ///
    /// The whole batch fails without inserting anything if it holds more new
    /// keys than the device has free slots, or if any key belongs to another
    /// device.
    pub fn lookup_or_insert(&self, local_replica_id: usize, keys: &[i64]) -> Result<Vec<usize>> {
        let device = self.device(local_replica_id)?;
        self.check_routing(local_replica_id, keys)?;

        let mut index = device.index.write();
        self.ensure_initialized(local_replica_id, device)?;
        let mut table = device.table.write();
        shard::resolve_keys(
            &mut index,
            &mut table,
            keys,
            self.initializer.as_ref(),
            self.config.fill_policy,
        )
        .map_err(|e| ParamError::shard(local_replica_id, e))
    }

    /// Copies the vectors of live keys on device `local_replica_id`.
    pub fn gather(&self, local_replica_id: usize, keys: &[i64]) -> Result<Vec<f32>> {
        let device = self.device(local_replica_id)?;
        let index = device.index.read();
        self.ensure_initialized(local_replica_id, device)?;
        let table = device.table.read();
        shard::gather_keys(&index, &table, keys).map_err(|e| ParamError::shard(local_replica_id, e))
    }

    /// Applies `v -= learning_rate * g` to live keys on device
    /// `local_replica_id`.
    pub fn apply_gradients(
        &self,
        local_replica_id: usize,
        keys: &[i64],
        gradients: &[f32],
        learning_rate: f32,
    ) -> Result<()> {
        if !self.config.trainable {
            return Err(ParamError::NotTrainable {
                var_name: self.config.name.clone(),
            });
        }
        let device = self.device(local_replica_id)?;
        let index = device.index.read();
        self.ensure_initialized(local_replica_id, device)?;
        let mut table = device.table.write();
        shard::apply_gradients(&index, &mut table, keys, gradients, learning_rate)
            .map_err(|e| ParamError::shard(local_replica_id, e))
    }

    /// Number of live keys on device `local_replica_id`.
    pub fn num_live_keys(&self, local_replica_id: usize) -> Result<usize> {
        Ok(self.device(local_replica_id)?.index.read().len())
    }

    /// Splits a global key batch into one batch per device.
    pub fn route_keys(&self, keys: &[i64]) -> Vec<Vec<i64>> {
        partition_keys(keys, self.devices.len())
    }

    fn device(&self, local_replica_id: usize) -> Result<&DeviceShard> {
        self.devices
            .get(local_replica_id)
            .ok_or(ParamError::OutOfRange {
                replica_id: local_replica_id,
                device_count: self.devices.len(),
            })
    }

    fn ensure_initialized(&self, local_replica_id: usize, device: &DeviceShard) -> Result<()> {
        if device.is_initialized() {
            Ok(())
        } else {
            Err(ParamError::NotInitialized {
                device: local_replica_id,
            })
        }
    }

    fn check_routing(&self, local_replica_id: usize, keys: &[i64]) -> Result<()> {
        let device_count = self.devices.len();
        for &key in keys {
            let owner = shard_for_key(key, device_count);
            if owner != local_replica_id {
                return Err(ParamError::MisroutedKey {
                    key,
                    device: local_replica_id,
                    owner,
                });
            }
        }
        Ok(())
    }

    /// Write-locks every device, index before table, in device order.
    fn lock_all(&self) -> ShardWriteGuards<'_> {
        self.devices
            .iter()
            .map(|device| (device.index.write(), device.table.write()))
            .collect()
    }

    /// Live records of every device, captured under one consistent view.
    fn snapshot(&self) -> Result<Vec<RecordBatch>> {
        let guards: Vec<_> = self
            .devices
            .iter()
            .map(|device| (device.index.read(), device.table.read()))
            .collect();

        let mut batches = Vec::with_capacity(guards.len());
        for (index, table) in &guards {
            let mut batch = RecordBatch::with_capacity(self.config.vector_size, index.len());
            for (key, vector) in shard::live_records(index, table) {
                batch.push(key, vector)?;
            }
            batches.push(batch);
        }
        Ok(batches)
    }

    /// Builds a fresh index and table for one device from restored records.
    fn stage_device(
        &self,
        local_replica_id: usize,
        records: &RecordBatch,
    ) -> Result<(HashIndexShard, DenseTableShard)> {
        let capacity = self.config.max_vocabulary_size_per_gpu;
        if records.len() > capacity {
            return Err(ParamError::CapacityExceeded {
                device: local_replica_id,
                capacity,
                reason: format!("restore assigns {} records", records.len()),
            });
        }

        let mut index = new_index(&self.config);
        let mut table = DenseTableShard::new(capacity, self.config.vector_size);
        if self.config.fill_policy == FillPolicy::Eager {
            table.fill_all(self.initializer.as_ref());
        }
        shard::assign_keys(&mut index, &mut table, records.keys(), records.values())
            .map_err(|e| ParamError::shard(local_replica_id, e))?;

        tracing::debug!(
            var = %self.config.name,
            device = local_replica_id,
            records = records.len(),
            "Staged restored device shard"
        );
        Ok((index, table))
    }
}

fn new_index(config: &StoreConfig) -> HashIndexShard {
    if config.use_hashtable {
        HashIndexShard::hashed(config.max_vocabulary_size_per_gpu)
    } else {
        HashIndexShard::identity(config.max_vocabulary_size_per_gpu)
    }
}

impl ParamInterface for RawParam {
    fn get_max_vocabulary_size_per_gpu(&self) -> usize {
        self.config.max_vocabulary_size_per_gpu
    }

    fn get_embedding_vec_size(&self) -> usize {
        self.config.vector_size
    }

    fn trainable(&self) -> bool {
        self.config.trainable
    }

    fn get_hashtable(&self, local_replica_id: usize) -> Result<IndexHandle> {
        Ok(Arc::clone(&self.device(local_replica_id)?.index))
    }

    fn get_embedding_table_tensor(&self, local_replica_id: usize) -> Result<TableHandle> {
        Ok(Arc::clone(&self.device(local_replica_id)?.table))
    }

    fn get_var_name(&self) -> &str {
        &self.config.name
    }

    fn set_user(&self, user: &Arc<dyn EmbeddingUser>) -> Result<()> {
        let mut bound = self.user.lock();
        match bound.as_ref() {
            Some(existing) if std::ptr::addr_eq(existing.as_ptr(), Arc::as_ptr(user)) => Ok(()),
            Some(existing) => Err(ParamError::AlreadyBound {
                var_name: self.config.name.clone(),
                bound: existing
                    .upgrade()
                    .map(|u| u.name().to_string())
                    .unwrap_or_else(|| "<dropped>".to_string()),
                requested: user.name().to_string(),
            }),
            None => {
                *bound = Some(Arc::downgrade(user));
                tracing::info!(var = %self.config.name, user = %user.name(), "Bound consumer");
                Ok(())
            }
        }
    }

    fn user(&self) -> Option<Arc<dyn EmbeddingUser>> {
        self.user.lock().as_ref().and_then(Weak::upgrade)
    }

    fn dump_to_file(&self, path: &Path) -> Result<()> {
        let batches = self.snapshot()?;
        let codec = EmbeddingCodec::new(self.config.vector_size);
        let meta = codec.dump_to_file(path, &batches, &self.config.name, self.devices.len())?;
        tracing::info!(
            var = %self.config.name,
            path = %path.display(),
            records = meta.num_records,
            "Dumped embedding variable"
        );
        Ok(())
    }

    fn restore_from_file(&self, path: &Path) -> Result<()> {
        let codec = EmbeddingCodec::new(self.config.vector_size);
        let records = codec.restore_from_file(path)?;
        let per_device = redistribute(&records, self.devices.len());

        let staged = self.resource_mgr.thread_pool().install(|| {
            per_device
                .par_iter()
                .enumerate()
                .map(|(device, batch)| self.stage_device(device, batch))
                .collect::<Result<Vec<_>>>()
        })?;

        let mut guards = self.lock_all();
        for ((index, table), (new_index, new_table)) in guards.iter_mut().zip(staged) {
            **index = new_index;
            **table = new_table;
        }
        for device in &self.devices {
            device.initialized.store(true, Ordering::Release);
        }
        drop(guards);

        tracing::info!(
            var = %self.config.name,
            path = %path.display(),
            records = records.len(),
            devices = self.devices.len(),
            "Restored embedding variable"
        );
        Ok(())
    }

    fn load_embedding_values(&self, values: &[RecordBatch]) -> Result<()> {
        let vector_size = self.config.vector_size;
        if let Some(batch) = values.iter().find(|b| b.dim() != vector_size) {
            return Err(ParamError::DimensionMismatch {
                expected: vector_size,
                actual: batch.dim(),
            });
        }

        let device_count = self.devices.len();
        let mut routed: Vec<(Vec<i64>, Vec<f32>)> = vec![(Vec::new(), Vec::new()); device_count];
        for batch in values {
            for (key, vector) in batch.iter() {
                let (keys, vectors) = &mut routed[shard_for_key(key, device_count)];
                keys.push(key);
                vectors.extend_from_slice(vector);
            }
        }

        let mut guards = self.lock_all();
        for (local, device) in self.devices.iter().enumerate() {
            self.ensure_initialized(local, device)?;
        }

        let mut staged = Vec::with_capacity(device_count);
        for (local, ((index, table), (keys, vectors))) in guards.iter().zip(&routed).enumerate() {
            if keys.is_empty() {
                staged.push(None);
                continue;
            }
            let assignment = shard::stage_assignment(index, table, keys, vectors)
                .map_err(|e| ParamError::shard(local, e))?;
            staged.push(Some(assignment));
        }

        let mut loaded = 0;
        for ((index, table), staged) in guards.iter_mut().zip(staged) {
            if let Some(assignment) = staged {
                assignment.commit(index, table);
                loaded += 1;
            }
        }
        drop(guards);

        tracing::info!(
            var = %self.config.name,
            records = values.iter().map(RecordBatch::len).sum::<usize>(),
            devices = loaded,
            "Loaded embedding values"
        );
        Ok(())
    }
}
