//! The consumer side of a parameter store.

use crate::error::Result;

/// A component that issues lookups against a parameter store.
///
/// A store is bound to at most one consumer through
/// [`ParamInterface::set_user`]. Consumers that hold state derived from the
/// store, such as slot indices promised to the current step, override the
/// hooks to drain or rebuild it around checkpoint operations. The hooks run
/// from the `let_user_*` paths of [`ParamInterface`]; every `after_*` hook
/// runs even when the wrapped operation failed.
///
/// [`ParamInterface::set_user`]: crate::ParamInterface::set_user
/// [`ParamInterface`]: crate::ParamInterface
pub trait EmbeddingUser: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    fn before_dump(&self, _var_name: &str) -> Result<()> {
        Ok(())
    }

    fn after_dump(&self, _var_name: &str) -> Result<()> {
        Ok(())
    }

    fn before_restore(&self, _var_name: &str) -> Result<()> {
        Ok(())
    }

    fn after_restore(&self, _var_name: &str) -> Result<()> {
        Ok(())
    }

    fn before_load(&self, _var_name: &str) -> Result<()> {
        Ok(())
    }

    fn after_load(&self, _var_name: &str) -> Result<()> {
        Ok(())
    }
}
