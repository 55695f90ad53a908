//! Build Command Implementation
//!
//! Creates a store from a JSON configuration, inserts a list of keys on
//! their owning devices and dumps the result.

use anyhow::{Context, Result};
use clap::Args;
use sparsekit_core::{LocalResourceManager, StoreConfig};
use sparsekit_param::{ParamInterface, RawParam};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Build an embedding checkpoint from a key list
///
/// The key file holds one integer key per line. Blank lines and lines
/// starting with `#` are skipped.
///
/// # Example
///
/// ```bash
/// sparsekit build --config store.json --keys keys.txt --output /ckpt/item.emb --devices 2
/// ```
#[derive(Args, Debug, Clone)]
pub struct BuildCommand {
    /// Store configuration (JSON)
    #[arg(long, short = 'c', env = "SPARSEKIT_STORE_CONFIG")]
    pub config: PathBuf,

    /// File of keys to insert
    #[arg(long, short = 'k')]
    pub keys: PathBuf,

    /// Checkpoint file to write
    #[arg(long, short = 'o', env = "SPARSEKIT_OUTPUT_PATH")]
    pub output: PathBuf,

    /// Number of local devices to shard over
    #[arg(long, short = 'd', default_value = "1")]
    pub devices: usize,
}

/// What `build` did.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub var_name: String,
    /// Keys read from the key file, duplicates included.
    pub keys_read: usize,
    /// Live keys per device after insertion.
    pub live_per_device: Vec<usize>,
}

impl BuildCommand {
    /// Builds the store and writes the checkpoint.
    pub fn build(&self) -> Result<BuildReport> {
        let config = StoreConfig::from_json_file(&self.config)
            .with_context(|| format!("Failed to load store config {}", self.config.display()))?;
        let keys = read_keys(&self.keys)?;

        let manager = Arc::new(
            LocalResourceManager::new(self.devices).context("Failed to set up devices")?,
        );
        let bytes_per_device = config.table_len() * std::mem::size_of::<f32>();
        let buffers = manager.allocate_buffers(bytes_per_device);
        let param = RawParam::create_from_config(config, manager, buffers)
            .context("Failed to create embedding variable")?;
        param.init_all()?;

        for (device, batch) in param.route_keys(&keys).iter().enumerate() {
            param
                .lookup_or_insert(device, batch)
                .with_context(|| format!("Failed to insert keys on device {device}"))?;
        }
        param
            .dump_to_file(&self.output)
            .with_context(|| format!("Failed to write {}", self.output.display()))?;

        let live_per_device = (0..param.device_count())
            .map(|device| param.num_live_keys(device))
            .collect::<sparsekit_param::Result<Vec<_>>>()?;

        Ok(BuildReport {
            var_name: param.get_var_name().to_string(),
            keys_read: keys.len(),
            live_per_device,
        })
    }

    /// Execute the build command
    pub fn run(&self) -> Result<()> {
        info!(
            config = %self.config.display(),
            output = %self.output.display(),
            devices = self.devices,
            "Building checkpoint"
        );
        let report = self.build()?;
        info!(
            var = %report.var_name,
            keys = report.keys_read,
            live = report.live_per_device.iter().sum::<usize>(),
            "Checkpoint built"
        );
        println!(
            "{}: {} keys read, live per device {:?}",
            report.var_name, report.keys_read, report.live_per_device
        );
        Ok(())
    }
}

fn read_keys(path: &Path) -> Result<Vec<i64>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read key file {}", path.display()))?;

    text.lines()
        .enumerate()
        .map(|(number, line)| (number + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(number, line)| {
            line.parse::<i64>()
                .with_context(|| format!("{}:{number}: invalid key {line:?}", path.display()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_read_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys.txt");
        std::fs::write(&path, "# header\n10\n\n -3 \n10\n").unwrap();
        assert_eq!(read_keys(&path).unwrap(), vec![10, -3, 10]);

        std::fs::write(&path, "1\nabc\n").unwrap();
        let err = read_keys(&path).unwrap_err();
        assert!(err.to_string().contains(":2:"));
    }
}
