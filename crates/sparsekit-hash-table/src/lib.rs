//! Device shard storage for sparse embedding parameters.
//!
//! Each device of a sharded embedding store owns one index and one dense
//! table. This crate provides those two pieces and the initializers that seed
//! the table.
//!
//! # Overview
//!
//! - [`SlotIndex`] - The key-to-slot capability shared by every index
//! - [`HashIndexShard`] - A device's index: [`HashedIndex`] or [`IdentityIndex`]
//! - [`DenseTableShard`] - A device's contiguous vector storage
//! - [`Initializer`] / [`InitializerFactory`] - Named initialization policies
//! - [`shard`] - Key resolution, gather, assign and update across both pieces
//!
//! # Example
//!
//! ```
//! use sparsekit_core::FillPolicy;
//! use sparsekit_hash_table::{shard, DenseTableShard, HashIndexShard, InitializerFactory};
//!
//! let initializer = InitializerFactory::from_name("zeros").unwrap();
//! let mut index = HashIndexShard::hashed(4);
//! let mut table = DenseTableShard::new(4, 2);
//!
//! let slots = shard::resolve_keys(
//!     &mut index,
//!     &mut table,
//!     &[10, 20, 10, 30],
//!     initializer.as_ref(),
//!     FillPolicy::Lazy,
//! )
//! .unwrap();
//! assert_eq!(slots, vec![0, 1, 0, 2]);
//! assert_eq!(shard::gather_keys(&index, &table, &[30]).unwrap(), vec![0.0, 0.0]);
//! ```

mod dense;
mod error;
mod index;
pub mod initializer;
pub mod shard;
mod traits;

pub use dense::DenseTableShard;
pub use error::{HashTableError, Result};
pub use index::{HashIndexShard, HashedIndex, IdentityIndex};
pub use initializer::{
    ConstantInitializer, Initializer, InitializerFactory, OnesInitializer,
    RandomNormalInitializer, RandomUniformInitializer, TruncatedNormalInitializer,
    XavierUniformInitializer, ZerosInitializer,
};
pub use traits::SlotIndex;
