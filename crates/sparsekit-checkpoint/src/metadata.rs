//! JSON sidecar written next to every record file.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::{CheckpointError, Result};

/// Current record file format version.
pub const FORMAT_VERSION: u32 = 1;

/// Metadata describing one dump, stored at `<path>.meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Name of the dumped variable.
    pub var_name: String,

    /// Length of every vector in the file.
    pub vector_size: usize,

    /// Number of records in the file.
    pub num_records: usize,

    /// Device count of the store at dump time. Informational only.
    pub num_devices: usize,

    /// Format version.
    pub format_version: u32,

    /// Seconds since the Unix epoch when the dump finished.
    #[serde(default)]
    pub timestamp: u64,
}

impl CheckpointMetadata {
    pub fn new(
        var_name: impl Into<String>,
        vector_size: usize,
        num_records: usize,
        num_devices: usize,
    ) -> Self {
        Self {
            var_name: var_name.into(),
            vector_size,
            num_records,
            num_devices,
            format_version: FORMAT_VERSION,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }

    /// Sidecar path for a record file.
    pub fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".meta.json");
        PathBuf::from(name)
    }

    /// Writes the sidecar for `path`, replacing any previous one atomically.
    pub fn write(&self, path: &Path) -> Result<()> {
        let sidecar = Self::sidecar_path(path);
        self.stage(path)?
            .persist(&sidecar)
            .map(|_| ())
            .map_err(|e| CheckpointError::io(&sidecar, e.error))
    }

    /// Serializes the sidecar for `path` into a synced temporary file in the
    /// same directory. Persisting it over [`Self::sidecar_path`] is left to
    /// the caller.
    pub(crate) fn stage(&self, path: &Path) -> Result<NamedTempFile> {
        let sidecar = Self::sidecar_path(path);
        let dir = match sidecar.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| CheckpointError::io(dir, e))?;
        serde_json::to_writer_pretty(&mut tmp, self).map_err(|source| {
            CheckpointError::Metadata {
                path: sidecar.clone(),
                source,
            }
        })?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| CheckpointError::io(&sidecar, e))?;
        Ok(tmp)
    }

    /// Fails unless this sidecar was written in a format this build reads.
    pub fn check_version(&self, path: &Path) -> Result<()> {
        if self.format_version != FORMAT_VERSION {
            return Err(CheckpointError::corrupt(
                path,
                format!(
                    "unsupported format version {} (supported: {FORMAT_VERSION})",
                    self.format_version
                ),
            ));
        }
        Ok(())
    }

    /// Reads the sidecar for `path`, returning `None` if there is none.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let sidecar = Self::sidecar_path(path);
        let json = match std::fs::read_to_string(&sidecar) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::io(&sidecar, e)),
        };
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|source| CheckpointError::Metadata {
                path: sidecar,
                source,
            })
    }
}
