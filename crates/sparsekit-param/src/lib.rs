//! Distributed sparse embedding parameter store.
//!
//! A parameter store owns one embedding variable sharded across the devices
//! of a worker. Each device holds an index from sparse keys to slots and a
//! dense table of vectors. The store resolves key batches, applies gradients
//! and checkpoints its contents in a device-count independent format.
//!
//! # Core Components
//!
//! - [`ParamInterface`]: The contract every store exposes to a training pipeline
//! - [`RawParam`]: The sharded store
//! - [`EmbeddingUser`]: The single consumer bound to a store, with checkpoint hooks
//! - [`ParamRegistry`]: Stores of a job by name, with whole-job dump and restore
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use sparsekit_core::LocalResourceManager;
//! use sparsekit_param::{ParamInterface, ParamRegistry, RawParam};
//!
//! fn main() -> sparsekit_param::Result<()> {
//!     let manager = Arc::new(LocalResourceManager::new(2)?);
//!     let buffers = manager.allocate_buffers(64 << 20);
//!     let param = RawParam::create("uniform", true, &[100_000, 16], manager, buffers, "item", true)?;
//!     param.init_all()?;
//!
//!     for (device, keys) in param.route_keys(&[3, 14, 15, 92, 65]).iter().enumerate() {
//!         let slots = param.lookup_or_insert(device, keys)?;
//!         assert_eq!(slots.len(), keys.len());
//!     }
//!
//!     let registry = ParamRegistry::new();
//!     registry.register(Arc::new(param))?;
//!     registry.dump_all("/tmp/ckpt".as_ref())?;
//!     Ok(())
//! }
//! ```

mod error;
mod interface;
mod raw_param;
mod registry;
mod user;

pub use error::{ParamError, Result};
pub use interface::{IndexHandle, ParamInterface, TableHandle};
pub use raw_param::RawParam;
pub use registry::{ParamRegistry, CHECKPOINT_EXTENSION};
pub use user::EmbeddingUser;

pub use sparsekit_checkpoint::RecordBatch;
