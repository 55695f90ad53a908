//! Inspect Command Implementation
//!
//! Summarizes a checkpoint file: record count, key range, sidecar metadata and
//! how the records would be distributed over a given device count.

use anyhow::{Context, Result};
use clap::Args;
use sparsekit_checkpoint::{redistribute, CheckpointMetadata, EmbeddingCodec, RecordBatch};
use std::fmt;
use std::path::PathBuf;
use tracing::info;

/// Summarize an embedding checkpoint
///
/// # Example
///
/// ```bash
/// sparsekit inspect --path /ckpt/item.emb --vector-size 16 --devices 4
/// ```
#[derive(Args, Debug, Clone)]
pub struct InspectCommand {
    /// Checkpoint file to read
    #[arg(long, short = 'p', env = "SPARSEKIT_CHECKPOINT_PATH")]
    pub path: PathBuf,

    /// Length of each embedding vector in the file
    #[arg(long, env = "SPARSEKIT_VECTOR_SIZE")]
    pub vector_size: usize,

    /// Device count to show the distribution for
    #[arg(long, short = 'd', default_value = "1")]
    pub devices: usize,
}

/// What `inspect` found.
#[derive(Debug, Clone)]
pub struct InspectReport {
    pub path: PathBuf,
    pub vector_size: usize,
    pub records: usize,
    /// Smallest and largest key, if any record exists.
    pub key_range: Option<(i64, i64)>,
    /// Records per device under the routing rule.
    pub per_device: Vec<usize>,
    pub metadata: Option<CheckpointMetadata>,
}

impl InspectCommand {
    /// Reads the checkpoint and builds the report.
    pub fn inspect(&self) -> Result<InspectReport> {
        if self.devices == 0 {
            anyhow::bail!("--devices must be positive");
        }

        let codec = EmbeddingCodec::new(self.vector_size);
        let records = codec
            .restore_from_file(&self.path)
            .with_context(|| format!("Failed to read checkpoint {}", self.path.display()))?;
        let metadata = CheckpointMetadata::read(&self.path).context("Failed to read metadata")?;

        let key_range = records
            .keys()
            .iter()
            .fold(None, |range: Option<(i64, i64)>, &key| match range {
                Some((lo, hi)) => Some((lo.min(key), hi.max(key))),
                None => Some((key, key)),
            });
        let per_device = redistribute(&records, self.devices)
            .iter()
            .map(RecordBatch::len)
            .collect();

        Ok(InspectReport {
            path: self.path.clone(),
            vector_size: self.vector_size,
            records: records.len(),
            key_range,
            per_device,
            metadata,
        })
    }

    /// Execute the inspect command
    pub fn run(&self) -> Result<()> {
        info!(path = %self.path.display(), devices = self.devices, "Inspecting checkpoint");
        let report = self.inspect()?;
        println!("{report}");
        Ok(())
    }
}

impl fmt::Display for InspectReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "checkpoint:  {}", self.path.display())?;
        writeln!(f, "vector size: {}", self.vector_size)?;
        writeln!(f, "records:     {}", self.records)?;
        match self.key_range {
            Some((lo, hi)) => writeln!(f, "key range:   [{lo}, {hi}]")?,
            None => writeln!(f, "key range:   (empty)")?,
        }
        if let Some(meta) = &self.metadata {
            writeln!(
                f,
                "dumped from: {} ({} devices, format v{})",
                meta.var_name, meta.num_devices, meta.format_version
            )?;
        }
        for (device, count) in self.per_device.iter().enumerate() {
            writeln!(f, "device {device}:    {count}")?;
        }
        Ok(())
    }
}
