//! Initializers for dense table slots.
//!
//! An initializer produces the starting values of embedding vectors. Stores
//! run it either over a whole dense table shard during `init()` or over a
//! single slot when its key is first inserted, depending on the fill policy.
//!
//! # Overview
//!
//! - [`Initializer`] - The core trait
//! - [`ZerosInitializer`], [`OnesInitializer`], [`ConstantInitializer`]
//! - [`RandomUniformInitializer`], [`RandomNormalInitializer`],
//!   [`TruncatedNormalInitializer`], [`XavierUniformInitializer`]
//! - [`InitializerFactory`] - Registry resolving initializer names
//!
//! # Example
//!
//! ```
//! use sparsekit_hash_table::initializer::{Initializer, InitializerFactory};
//!
//! let initializer = InitializerFactory::from_name("ones").unwrap();
//! assert_eq!(initializer.initialize(3), vec![1.0, 1.0, 1.0]);
//! ```

use std::sync::Arc;

use rand::distributions::Uniform;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::error::{HashTableError, Result};

/// A trait for embedding initializers.
///
/// All initializers must be `Send + Sync` so that device shards can be filled
/// concurrently.
pub trait Initializer: Send + Sync {
    /// Fills `out` with initial values.
    ///
    /// `out` holds one or more consecutive vectors of `vector_size` elements.
    fn fill(&self, out: &mut [f32], vector_size: usize);

    /// Returns the registered name of this initializer.
    fn name(&self) -> &str;

    /// Returns one freshly initialized vector of `dim` elements.
    fn initialize(&self, dim: usize) -> Vec<f32> {
        let mut out = vec![0.0; dim];
        self.fill(&mut out, dim);
        out
    }
}

/// Initializer that sets all values to zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZerosInitializer;

impl Initializer for ZerosInitializer {
    fn fill(&self, out: &mut [f32], _vector_size: usize) {
        out.fill(0.0);
    }

    fn name(&self) -> &str {
        "zeros"
    }
}

/// Initializer that sets all values to one.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnesInitializer;

impl Initializer for OnesInitializer {
    fn fill(&self, out: &mut [f32], _vector_size: usize) {
        out.fill(1.0);
    }

    fn name(&self) -> &str {
        "ones"
    }
}

/// Initializer that sets all values to a constant.
///
/// # Example
///
/// ```
/// use sparsekit_hash_table::initializer::{ConstantInitializer, Initializer};
///
/// let initializer = ConstantInitializer::new(0.5);
/// assert_eq!(initializer.initialize(2), vec![0.5, 0.5]);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantInitializer {
    value: f32,
}

impl ConstantInitializer {
    /// Creates a new constant initializer with the given value.
    pub fn new(value: f32) -> Self {
        Self { value }
    }

    /// Returns the constant value.
    pub fn value(&self) -> f32 {
        self.value
    }
}

impl Initializer for ConstantInitializer {
    fn fill(&self, out: &mut [f32], _vector_size: usize) {
        out.fill(self.value);
    }

    fn name(&self) -> &str {
        "constant"
    }
}

/// Initializer that samples uniformly from `[min_val, max_val)`.
#[derive(Debug, Clone, Copy)]
pub struct RandomUniformInitializer {
    min_val: f32,
    max_val: f32,
    dist: Uniform<f32>,
}

impl RandomUniformInitializer {
    /// Creates a new uniform initializer.
    ///
    /// # Errors
    ///
    /// Returns [`HashTableError::InvalidInitializer`] if `min_val >= max_val`.
    pub fn new(min_val: f32, max_val: f32) -> Result<Self> {
        if !(min_val < max_val) || !(max_val - min_val).is_finite() {
            return Err(HashTableError::InvalidInitializer {
                name: "uniform".to_string(),
                reason: format!("[{min_val}, {max_val}) is not a finite, non-empty range"),
            });
        }
        Ok(Self {
            min_val,
            max_val,
            dist: Uniform::new(min_val, max_val),
        })
    }

    /// Returns the minimum value.
    pub fn min_val(&self) -> f32 {
        self.min_val
    }

    /// Returns the maximum value.
    pub fn max_val(&self) -> f32 {
        self.max_val
    }
}

impl Default for RandomUniformInitializer {
    fn default() -> Self {
        Self {
            min_val: -0.05,
            max_val: 0.05,
            dist: Uniform::new(-0.05, 0.05),
        }
    }
}

impl Initializer for RandomUniformInitializer {
    fn fill(&self, out: &mut [f32], _vector_size: usize) {
        let mut rng = rand::thread_rng();
        for v in out.iter_mut() {
            *v = rng.sample(self.dist);
        }
    }

    fn name(&self) -> &str {
        "uniform"
    }
}

fn normal_distribution(name: &str, mean: f32, stddev: f32) -> Result<Normal<f32>> {
    if !(stddev > 0.0) {
        return Err(HashTableError::InvalidInitializer {
            name: name.to_string(),
            reason: format!("stddev ({stddev}) must be positive"),
        });
    }
    Normal::new(mean, stddev).map_err(|e| HashTableError::InvalidInitializer {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Initializer that samples from a normal distribution.
#[derive(Debug, Clone, Copy)]
pub struct RandomNormalInitializer {
    mean: f32,
    stddev: f32,
    dist: Normal<f32>,
}

impl RandomNormalInitializer {
    /// Creates a new normal initializer.
    ///
    /// # Errors
    ///
    /// Returns [`HashTableError::InvalidInitializer`] if `stddev <= 0`.
    pub fn new(mean: f32, stddev: f32) -> Result<Self> {
        let dist = normal_distribution("normal", mean, stddev)?;
        Ok(Self { mean, stddev, dist })
    }

    /// Returns the mean.
    pub fn mean(&self) -> f32 {
        self.mean
    }

    /// Returns the standard deviation.
    pub fn stddev(&self) -> f32 {
        self.stddev
    }
}

impl Initializer for RandomNormalInitializer {
    fn fill(&self, out: &mut [f32], _vector_size: usize) {
        let mut rng = rand::thread_rng();
        for v in out.iter_mut() {
            *v = self.dist.sample(&mut rng);
        }
    }

    fn name(&self) -> &str {
        "normal"
    }
}

/// Initializer that samples from a normal distribution truncated to two
/// standard deviations around the mean. Out-of-range samples are redrawn.
#[derive(Debug, Clone, Copy)]
pub struct TruncatedNormalInitializer {
    mean: f32,
    stddev: f32,
    dist: Normal<f32>,
}

impl TruncatedNormalInitializer {
    /// Creates a new truncated normal initializer.
    ///
    /// # Errors
    ///
    /// Returns [`HashTableError::InvalidInitializer`] if `stddev <= 0`.
    pub fn new(mean: f32, stddev: f32) -> Result<Self> {
        let dist = normal_distribution("truncated_normal", mean, stddev)?;
        Ok(Self { mean, stddev, dist })
    }

    /// Returns the mean.
    pub fn mean(&self) -> f32 {
        self.mean
    }

    /// Returns the standard deviation.
    pub fn stddev(&self) -> f32 {
        self.stddev
    }
}

impl Initializer for TruncatedNormalInitializer {
    fn fill(&self, out: &mut [f32], _vector_size: usize) {
        let mut rng = rand::thread_rng();
        let lower = self.mean - 2.0 * self.stddev;
        let upper = self.mean + 2.0 * self.stddev;

        for v in out.iter_mut() {
            *v = loop {
                let sample = self.dist.sample(&mut rng);
                if sample >= lower && sample <= upper {
                    break sample;
                }
            };
        }
    }

    fn name(&self) -> &str {
        "truncated_normal"
    }
}

/// Xavier/Glorot uniform initializer.
///
/// Samples from `[-limit, limit)` with `limit = gain * sqrt(6 / (1 + vector_size))`,
/// treating each embedding row as a layer with fan-in 1.
#[derive(Debug, Clone, Copy)]
pub struct XavierUniformInitializer {
    gain: f32,
}

impl XavierUniformInitializer {
    /// Creates a new Xavier uniform initializer.
    ///
    /// # Errors
    ///
    /// Returns [`HashTableError::InvalidInitializer`] if `gain <= 0`.
    pub fn new(gain: f32) -> Result<Self> {
        if !(gain > 0.0 && gain.is_finite()) {
            return Err(HashTableError::InvalidInitializer {
                name: "xavier_uniform".to_string(),
                reason: format!("gain ({gain}) must be positive and finite"),
            });
        }
        Ok(Self { gain })
    }

    /// Returns the gain factor.
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Returns the sampling bound for vectors of `vector_size` elements.
    pub fn limit(&self, vector_size: usize) -> f32 {
        self.gain * (6.0 / (1.0 + vector_size as f32)).sqrt()
    }
}

impl Default for XavierUniformInitializer {
    fn default() -> Self {
        Self { gain: 1.0 }
    }
}

impl Initializer for XavierUniformInitializer {
    fn fill(&self, out: &mut [f32], vector_size: usize) {
        let limit = self.limit(vector_size);
        let dist = Uniform::new(-limit, limit);
        let mut rng = rand::thread_rng();
        for v in out.iter_mut() {
            *v = rng.sample(dist);
        }
    }

    fn name(&self) -> &str {
        "xavier_uniform"
    }
}

/// Registry of named initializers.
///
/// `"constant"` accepts an optional value suffix, e.g. `"constant:0.5"`.
pub struct InitializerFactory;

impl InitializerFactory {
    /// Names accepted by [`InitializerFactory::from_name`].
    pub fn registered_names() -> &'static [&'static str] {
        &[
            "uniform",
            "random_uniform",
            "normal",
            "random_normal",
            "truncated_normal",
            "xavier_uniform",
            "constant",
            "ones",
            "zeros",
        ]
    }

    /// Resolves an initializer by name.
    ///
    /// # Errors
    ///
    /// Returns [`HashTableError::UnknownInitializer`] for names outside the
    /// registered set and [`HashTableError::InvalidInitializer`] for a
    /// malformed constant value.
    pub fn from_name(name: &str) -> Result<Arc<dyn Initializer>> {
        if let Some(value) = name.strip_prefix("constant:") {
            let value: f32 = value
                .trim()
                .parse()
                .map_err(|_| HashTableError::InvalidInitializer {
                    name: name.to_string(),
                    reason: format!("'{value}' is not a number"),
                })?;
            return Ok(Arc::new(ConstantInitializer::new(value)));
        }

        let initializer: Arc<dyn Initializer> = match name {
            "uniform" | "random_uniform" => Arc::new(RandomUniformInitializer::default()),
            "normal" | "random_normal" => Arc::new(RandomNormalInitializer::new(0.0, 0.01)?),
            "truncated_normal" => Arc::new(TruncatedNormalInitializer::new(0.0, 0.01)?),
            "xavier_uniform" => Arc::new(XavierUniformInitializer::default()),
            "constant" => Arc::new(ConstantInitializer::default()),
            "ones" => Arc::new(OnesInitializer),
            "zeros" => Arc::new(ZerosInitializer),
            _ => {
                return Err(HashTableError::UnknownInitializer {
                    name: name.to_string(),
                })
            }
        };
        Ok(initializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros_initializer() {
        let initializer = ZerosInitializer;
        assert_eq!(initializer.initialize(4), vec![0.0; 4]);
        assert_eq!(initializer.name(), "zeros");
    }

    #[test]
    fn test_ones_initializer() {
        let initializer = OnesInitializer;
        let mut out = vec![7.0; 6];
        initializer.fill(&mut out, 3);
        assert_eq!(out, vec![1.0; 6]);
        assert_eq!(initializer.name(), "ones");
    }

    #[test]
    fn test_constant_initializer() {
        let initializer = ConstantInitializer::new(0.5);
        assert_eq!(initializer.initialize(4), vec![0.5; 4]);
        assert_eq!(initializer.value(), 0.5);
        assert_eq!(ConstantInitializer::default().initialize(2), vec![0.0; 2]);
    }

    #[test]
    fn test_random_uniform_initializer() {
        let initializer = RandomUniformInitializer::new(-0.1, 0.1).unwrap();
        let embedding = initializer.initialize(100);
        assert_eq!(embedding.len(), 100);
        for &val in &embedding {
            assert!(
                (-0.1..0.1).contains(&val),
                "Value {} out of range [-0.1, 0.1)",
                val
            );
        }
        assert_eq!(initializer.name(), "uniform");
    }

    #[test]
    fn test_random_uniform_initializer_invalid_range() {
        assert!(matches!(
            RandomUniformInitializer::new(0.1, -0.1),
            Err(HashTableError::InvalidInitializer { .. })
        ));
        assert!(RandomUniformInitializer::new(0.1, 0.1).is_err());
    }

    #[test]
    fn test_random_normal_initializer() {
        let initializer = RandomNormalInitializer::new(0.0, 0.1).unwrap();
        let embedding = initializer.initialize(1000);
        let mean: f32 = embedding.iter().sum::<f32>() / embedding.len() as f32;
        assert!(mean.abs() < 0.05, "Mean {} too far from 0", mean);
        assert_eq!(initializer.stddev(), 0.1);

        assert!(RandomNormalInitializer::new(0.0, -0.1).is_err());
        assert!(RandomNormalInitializer::new(0.0, f32::NAN).is_err());
    }

    #[test]
    fn test_truncated_normal_initializer() {
        let initializer = TruncatedNormalInitializer::new(0.0, 0.1).unwrap();
        for &val in &initializer.initialize(1000) {
            assert!((-0.2..=0.2).contains(&val), "Value {} out of range", val);
        }
        assert!(TruncatedNormalInitializer::new(0.0, 0.0).is_err());
    }

    #[test]
    fn test_xavier_uniform_initializer() {
        let initializer = XavierUniformInitializer::default();
        let limit = (6.0_f32 / 65.0).sqrt();
        assert!((initializer.limit(64) - limit).abs() < 1e-6);

        let mut table = vec![0.0; 64 * 10];
        initializer.fill(&mut table, 64);
        for &val in &table {
            assert!(val >= -limit && val < limit);
        }
        assert!(XavierUniformInitializer::new(0.0).is_err());
    }

    #[test]
    fn test_factory_registered_names_resolve() {
        for name in InitializerFactory::registered_names() {
            let initializer = InitializerFactory::from_name(name).unwrap();
            assert_eq!(initializer.initialize(8).len(), 8);
        }
    }

    #[test]
    fn test_factory_names() {
        assert_eq!(InitializerFactory::from_name("zeros").unwrap().name(), "zeros");
        assert_eq!(
            InitializerFactory::from_name("random_uniform").unwrap().name(),
            "uniform"
        );
        assert_eq!(
            InitializerFactory::from_name("random_normal").unwrap().name(),
            "normal"
        );
    }

    #[test]
    fn test_factory_constant_value() {
        let initializer = InitializerFactory::from_name("constant:0.25").unwrap();
        assert_eq!(initializer.name(), "constant");
        assert_eq!(initializer.initialize(3), vec![0.25; 3]);

        assert!(matches!(
            InitializerFactory::from_name("constant:abc"),
            Err(HashTableError::InvalidInitializer { .. })
        ));
    }

    #[test]
    fn test_factory_unknown_name() {
        let err = InitializerFactory::from_name("glorot").err().unwrap();
        assert!(matches!(
            err,
            HashTableError::UnknownInitializer { ref name } if name == "glorot"
        ));
    }

    #[test]
    fn test_initializers_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}

        assert_send_sync::<ZerosInitializer>();
        assert_send_sync::<OnesInitializer>();
        assert_send_sync::<ConstantInitializer>();
        assert_send_sync::<RandomUniformInitializer>();
        assert_send_sync::<RandomNormalInitializer>();
        assert_send_sync::<TruncatedNormalInitializer>();
        assert_send_sync::<XavierUniformInitializer>();
    }
}
