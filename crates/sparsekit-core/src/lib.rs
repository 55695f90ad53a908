//! Core types shared by the sparsekit crates.
//!
//! - [`params`]: configuration of a sharded embedding store
//! - [`sharding`]: the key routing rule that partitions keys across devices
//! - [`resources`]: resource manager and per-device buffers

pub mod error;
pub mod params;
pub mod resources;
pub mod sharding;

pub use error::{CoreError, Result};
pub use params::{FillPolicy, StoreConfig};
pub use resources::{DeviceBuffer, LocalResourceManager, ResourceManager};
pub use sharding::{partition_keys, shard_for_key};
