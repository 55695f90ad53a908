//! The uniform contract every parameter store exposes.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use sparsekit_checkpoint::RecordBatch;
use sparsekit_hash_table::{DenseTableShard, HashIndexShard};

use crate::error::Result;
use crate::user::EmbeddingUser;

/// Shared handle to one device's index.
pub type IndexHandle = Arc<RwLock<HashIndexShard>>;

/// Shared handle to one device's dense table.
pub type TableHandle = Arc<RwLock<DenseTableShard>>;

/// Operations common to every embedding parameter store.
///
/// Handles returned by [`get_hashtable`](Self::get_hashtable) and
/// [`get_embedding_table_tensor`](Self::get_embedding_table_tensor) alias the
/// live shards. Holders that lock both must take the index before the table.
pub trait ParamInterface: Send + Sync {
    /// Maximum number of live keys on one device.
    fn get_max_vocabulary_size_per_gpu(&self) -> usize;

    fn get_embedding_vec_size(&self) -> usize;

    fn trainable(&self) -> bool;

    /// Index of device `local_replica_id`.
    ///
    /// Fails with [`ParamError::OutOfRange`] past the last device.
    ///
    /// [`ParamError::OutOfRange`]: crate::ParamError::OutOfRange
    fn get_hashtable(&self, local_replica_id: usize) -> Result<IndexHandle>;

    /// Dense table of device `local_replica_id`.
    fn get_embedding_table_tensor(&self, local_replica_id: usize) -> Result<TableHandle>;

    fn get_var_name(&self) -> &str;

    /// Binds the consumer of this store.
    ///
    /// Binding the same consumer again is a no-op. Binding a different one
    /// fails with [`ParamError::AlreadyBound`], even after the first consumer
    /// has been dropped.
    ///
    /// [`ParamError::AlreadyBound`]: crate::ParamError::AlreadyBound
    fn set_user(&self, user: &Arc<dyn EmbeddingUser>) -> Result<()>;

    /// The bound consumer, if it is still alive.
    fn user(&self) -> Option<Arc<dyn EmbeddingUser>>;

    /// Writes every live `(key, vector)` record to `path`.
    fn dump_to_file(&self, path: &Path) -> Result<()>;

    /// Replaces the contents of every device with the records at `path`.
    ///
    /// Either every device is replaced or none is.
    fn restore_from_file(&self, path: &Path) -> Result<()>;

    /// Inserts or overwrites the given records on the devices that own them.
    ///
    /// Either every record is applied or none is.
    fn load_embedding_values(&self, values: &[RecordBatch]) -> Result<()>;

    /// [`dump_to_file`](Self::dump_to_file) wrapped in the consumer's dump
    /// hooks.
    fn let_user_dump_to_file(&self, path: &Path) -> Result<()> {
        with_user_hooks(
            self.user(),
            self.get_var_name(),
            |user, name| user.before_dump(name),
            || self.dump_to_file(path),
            |user, name| user.after_dump(name),
        )
    }

    /// [`restore_from_file`](Self::restore_from_file) wrapped in the
    /// consumer's restore hooks.
    fn let_user_restore_from_file(&self, path: &Path) -> Result<()> {
        with_user_hooks(
            self.user(),
            self.get_var_name(),
            |user, name| user.before_restore(name),
            || self.restore_from_file(path),
            |user, name| user.after_restore(name),
        )
    }

    /// [`load_embedding_values`](Self::load_embedding_values) wrapped in the
    /// consumer's load hooks.
    fn let_user_load_embedding_values(&self, values: &[RecordBatch]) -> Result<()> {
        with_user_hooks(
            self.user(),
            self.get_var_name(),
            |user, name| user.before_load(name),
            || self.load_embedding_values(values),
            |user, name| user.after_load(name),
        )
    }
}

/// Runs `op` between the consumer's hooks.
///
/// A failing `before` hook skips `op` and `after`. Otherwise `after` always
/// runs and an error from `op` wins over one from `after`.
fn with_user_hooks<B, O, A>(
    user: Option<Arc<dyn EmbeddingUser>>,
    var_name: &str,
    before: B,
    op: O,
    after: A,
) -> Result<()>
where
    B: FnOnce(&dyn EmbeddingUser, &str) -> Result<()>,
    O: FnOnce() -> Result<()>,
    A: FnOnce(&dyn EmbeddingUser, &str) -> Result<()>,
{
    let Some(user) = user else {
        return op();
    };
    tracing::debug!(var = %var_name, user = %user.name(), "Running consumer hooks");

    before(user.as_ref(), var_name)?;
    let result = op();
    let after_result = after(user.as_ref(), var_name);
    if let (Err(primary), Err(secondary)) = (&result, &after_result) {
        tracing::warn!(
            var = %var_name,
            user = %user.name(),
            error = %secondary,
            cause = %primary,
            "Consumer hook failed after a failed operation"
        );
    }
    result.and(after_result)
}
