//! Name-keyed collection of the parameter stores of one job.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{ParamError, Result};
use crate::interface::ParamInterface;

/// File extension of per-variable checkpoint files.
pub const CHECKPOINT_EXTENSION: &str = "emb";

/// Stores registered by variable name.
///
/// Whole-job checkpoints write one `<dir>/<name>.emb` file per store, going
/// through the consumer hooks of each.
#[derive(Default)]
pub struct ParamRegistry {
    params: RwLock<BTreeMap<String, Arc<dyn ParamInterface>>>,
}

impl fmt::Debug for ParamRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl ParamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a store under its variable name.
    ///
    /// Fails with [`ParamError::DuplicateName`] if the name is taken.
    pub fn register(&self, param: Arc<dyn ParamInterface>) -> Result<()> {
        let name = param.get_var_name().to_string();
        let mut params = self.params.write();
        if params.contains_key(&name) {
            return Err(ParamError::DuplicateName { name });
        }
        tracing::debug!(var = %name, "Registered embedding variable");
        params.insert(name, param);
        Ok(())
    }

    /// Looks up a store by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn ParamInterface>> {
        self.params
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ParamError::UnknownParam {
                name: name.to_string(),
            })
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.params.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.params.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.read().is_empty()
    }

    /// Checkpoint path of variable `name` under `dir`.
    pub fn checkpoint_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.{CHECKPOINT_EXTENSION}"))
    }

    /// Dumps every store into `dir`, stopping at the first failure.
    pub fn dump_all(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let params = self.snapshot();
        tracing::info!(dir = %dir.display(), variables = params.len(), "Dumping all embedding variables");

        let mut written = Vec::with_capacity(params.len());
        for (name, param) in params {
            let path = Self::checkpoint_path(dir, &name);
            param.let_user_dump_to_file(&path)?;
            written.push(path);
        }
        Ok(written)
    }

    /// Restores every store from `dir`, stopping at the first failure.
    ///
    /// Each store is restored atomically on its own; stores restored before a
    /// failure keep their restored contents.
    pub fn restore_all(&self, dir: &Path) -> Result<()> {
        let params = self.snapshot();
        tracing::info!(dir = %dir.display(), variables = params.len(), "Restoring all embedding variables");

        for (name, param) in params {
            param.let_user_restore_from_file(&Self::checkpoint_path(dir, &name))?;
        }
        Ok(())
    }

    fn snapshot(&self) -> Vec<(String, Arc<dyn ParamInterface>)> {
        self.params
            .read()
            .iter()
            .map(|(name, param)| (name.clone(), Arc::clone(param)))
            .collect()
    }
}
