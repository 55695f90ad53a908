//! Parameter store configuration.
//!
//! This module provides the configuration structures used to create a
//! sharded embedding parameter store:
//!
//! - [`StoreConfig`]: name, shape, initializer and policy flags of one store.
//! - [`FillPolicy`]: when the initializer runs over a dense table shard.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Controls when dense table slots receive initializer output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillPolicy {
    /// Every slot of every shard is filled during `init()`.
    #[default]
    Eager,
    /// A slot is filled at the moment its key is inserted.
    ///
    /// Slots that were never assigned to a key hold `0.0`.
    Lazy,
}

impl std::fmt::Display for FillPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FillPolicy::Eager => write!(f, "eager"),
            FillPolicy::Lazy => write!(f, "lazy"),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_initializer() -> String {
    "uniform".to_string()
}

/// Configuration for one named embedding variable.
///
/// # Examples
///
/// ```
/// use sparsekit_core::params::{FillPolicy, StoreConfig};
///
/// let config = StoreConfig::new("item_embeddings", [1024, 16])
///     .with_initializer("zeros")
///     .with_fill_policy(FillPolicy::Lazy);
/// assert_eq!(config.shape(), [1024, 16]);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Variable name, unique within a training job.
    pub name: String,

    /// Length of each embedding vector.
    pub vector_size: usize,

    /// Maximum number of distinct keys one device shard may hold.
    pub max_vocabulary_size_per_gpu: usize,

    /// Whether device shards use a hash index (`true`) or identity mapping.
    #[serde(default = "default_true")]
    pub use_hashtable: bool,

    /// Whether gradients may mutate the dense tables.
    #[serde(default = "default_true")]
    pub trainable: bool,

    /// Registered initializer name.
    #[serde(default = "default_initializer")]
    pub initializer: String,

    /// When slots receive initializer output.
    #[serde(default)]
    pub fill_policy: FillPolicy,
}

impl StoreConfig {
    /// Creates a configuration from a name and a `[capacity, vector_size]` shape.
    pub fn new(name: impl Into<String>, shape: [usize; 2]) -> Self {
        Self {
            name: name.into(),
            max_vocabulary_size_per_gpu: shape[0],
            vector_size: shape[1],
            use_hashtable: true,
            trainable: true,
            initializer: default_initializer(),
            fill_policy: FillPolicy::default(),
        }
    }

    /// Creates a configuration from a shape slice, as received from a
    /// variable declaration. The slice must have exactly two dimensions.
    pub fn from_shape(name: impl Into<String>, shape: &[usize]) -> Result<Self> {
        match shape {
            [capacity, vector_size] => Ok(Self::new(name, [*capacity, *vector_size])),
            _ => Err(CoreError::invalid_config(format!(
                "shape must be [max_vocabulary_size_per_gpu, vector_size], got {:?}",
                shape
            ))),
        }
    }

    /// Loads a configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| CoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the initializer name.
    pub fn with_initializer(mut self, initializer: impl Into<String>) -> Self {
        self.initializer = initializer.into();
        self
    }

    /// Selects hash index (`true`) or identity-mapped (`false`) shards.
    pub fn with_hashtable(mut self, use_hashtable: bool) -> Self {
        self.use_hashtable = use_hashtable;
        self
    }

    /// Sets whether the store accepts gradient updates.
    pub fn with_trainable(mut self, trainable: bool) -> Self {
        self.trainable = trainable;
        self
    }

    /// Sets the fill policy.
    pub fn with_fill_policy(mut self, fill_policy: FillPolicy) -> Self {
        self.fill_policy = fill_policy;
        self
    }

    /// Returns `[max_vocabulary_size_per_gpu, vector_size]`.
    pub fn shape(&self) -> [usize; 2] {
        [self.max_vocabulary_size_per_gpu, self.vector_size]
    }

    /// Number of `f32` elements in one dense table shard.
    pub fn table_len(&self) -> usize {
        self.max_vocabulary_size_per_gpu * self.vector_size
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CoreError::invalid_config("name must not be empty"));
        }
        if self.max_vocabulary_size_per_gpu == 0 {
            return Err(CoreError::invalid_config(
                "max_vocabulary_size_per_gpu must be positive",
            ));
        }
        if self.vector_size == 0 {
            return Err(CoreError::invalid_config("vector_size must be positive"));
        }
        let bytes = self
            .max_vocabulary_size_per_gpu
            .checked_mul(self.vector_size)
            .and_then(|len| len.checked_mul(std::mem::size_of::<f32>()));
        if bytes.is_none() {
            return Err(CoreError::invalid_config(format!(
                "table of {} x {} does not fit in memory",
                self.max_vocabulary_size_per_gpu, self.vector_size
            )));
        }
        Ok(())
    }
}
