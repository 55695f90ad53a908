//! Record file reader and writer.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use hashbrown::HashSet;
use sparsekit_core::shard_for_key;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

use crate::metadata::CheckpointMetadata;
use crate::record::RecordBatch;
use crate::{CheckpointError, Result};

const KEY_BYTES: usize = std::mem::size_of::<i64>();
const VALUE_BYTES: usize = std::mem::size_of::<f32>();

/// Reads and writes checkpoint files of a fixed vector size.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddingCodec {
    vector_size: usize,
}

impl EmbeddingCodec {
    /// Creates a codec for `vector_size`-wide records.
    pub fn new(vector_size: usize) -> Self {
        Self { vector_size }
    }

    pub fn vector_size(&self) -> usize {
        self.vector_size
    }

    /// Bytes per record on disk.
    pub fn record_size(&self) -> usize {
        KEY_BYTES + self.vector_size * VALUE_BYTES
    }

    /// Writes every record of `batch` to `writer`.
    pub fn write_records<W: Write>(
        &self,
        writer: &mut W,
        batch: &RecordBatch,
    ) -> std::io::Result<()> {
        for (key, vector) in batch.iter() {
            writer.write_i64::<LittleEndian>(key)?;
            for &value in vector {
                writer.write_f32::<LittleEndian>(value)?;
            }
        }
        Ok(())
    }

    /// Reads exactly `count` records from `reader`.
    ///
    /// A key seen twice makes the file corrupt; `path` names it in the error.
    pub fn read_records<R: Read>(
        &self,
        path: &Path,
        reader: &mut R,
        count: usize,
    ) -> Result<RecordBatch> {
        let mut keys = Vec::with_capacity(count);
        let mut values = vec![0.0f32; count * self.vector_size];
        let mut seen = HashSet::with_capacity(count);

        for i in 0..count {
            let key = reader
                .read_i64::<LittleEndian>()
                .map_err(|e| CheckpointError::io(path, e))?;
            if !seen.insert(key) {
                return Err(CheckpointError::corrupt(
                    path,
                    format!("key {key} appears more than once"),
                ));
            }
            keys.push(key);
            reader
                .read_f32_into::<LittleEndian>(
                    &mut values[i * self.vector_size..(i + 1) * self.vector_size],
                )
                .map_err(|e| CheckpointError::io(path, e))?;
        }

        RecordBatch::from_parts(self.vector_size, keys, values)
    }

    /// Writes `batches` to `path` as one record file plus its sidecar.
    ///
    /// The records and the sidecar are each written to a temporary file in
    /// the same directory and renamed into place once complete, sidecar
    /// first.
    pub fn dump_to_file(
        &self,
        path: &Path,
        batches: &[RecordBatch],
        var_name: &str,
        num_devices: usize,
    ) -> Result<CheckpointMetadata> {
        if let Some(batch) = batches.iter().find(|b| b.dim() != self.vector_size) {
            return Err(CheckpointError::DimensionMismatch {
                expected: self.vector_size,
                actual: batch.dim(),
            });
        }
        let num_records: usize = batches.iter().map(RecordBatch::len).sum();
        tracing::info!(
            path = %path.display(),
            var = %var_name,
            records = num_records,
            "Dumping embedding checkpoint"
        );

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| CheckpointError::io(dir, e))?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| CheckpointError::io(dir, e))?;
        {
            let mut writer = BufWriter::new(&mut tmp);
            for batch in batches {
                self.write_records(&mut writer, batch)
                    .map_err(|e| CheckpointError::io(path, e))?;
            }
            writer.flush().map_err(|e| CheckpointError::io(path, e))?;
        }
        tmp.as_file()
            .sync_all()
            .map_err(|e| CheckpointError::io(path, e))?;

        // The sidecar lands first: a failure here leaves the previous dump
        // and its sidecar untouched.
        let meta = CheckpointMetadata::new(var_name, self.vector_size, num_records, num_devices);
        let sidecar = CheckpointMetadata::sidecar_path(path);
        meta.stage(path)?
            .persist(&sidecar)
            .map_err(|e| CheckpointError::io(&sidecar, e.error))?;
        tmp.persist(path)
            .map_err(|e| CheckpointError::io(path, e.error))?;

        tracing::debug!(
            path = %path.display(),
            bytes = num_records * self.record_size(),
            "Checkpoint written"
        );
        Ok(meta)
    }

    /// Reads every record of the file at `path`.
    ///
    /// # Errors
    ///
    /// * [`CheckpointError::NotFound`] - No file at `path`
    /// * [`CheckpointError::CorruptCheckpoint`] - The length is not a whole
    ///   number of records, a key repeats, the sidecar has an unknown format
    ///   version, or it disagrees with the file or with this codec's vector
    ///   size
    pub fn restore_from_file(&self, path: &Path) -> Result<RecordBatch> {
        tracing::info!(path = %path.display(), "Restoring embedding checkpoint");

        let file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => CheckpointError::NotFound(path.to_path_buf()),
            _ => CheckpointError::io(path, e),
        })?;
        let len = file
            .metadata()
            .map_err(|e| CheckpointError::io(path, e))?
            .len();

        let record_size = self.record_size() as u64;
        if len % record_size != 0 {
            return Err(CheckpointError::corrupt(
                path,
                format!(
                    "length {len} is not a multiple of the {record_size}-byte record for vector size {}",
                    self.vector_size
                ),
            ));
        }
        let count = usize::try_from(len / record_size)
            .map_err(|_| CheckpointError::corrupt(path, "record count overflows usize"))?;

        match CheckpointMetadata::read(path)? {
            Some(meta) => {
                meta.check_version(path)?;
                if meta.vector_size != self.vector_size {
                    return Err(CheckpointError::corrupt(
                        path,
                        format!(
                            "vector size {} recorded at dump, expected {}",
                            meta.vector_size, self.vector_size
                        ),
                    ));
                }
                if meta.num_records != count {
                    return Err(CheckpointError::corrupt(
                        path,
                        format!(
                            "{} records recorded at dump, file holds {count}",
                            meta.num_records
                        ),
                    ));
                }
            }
            None => {
                tracing::warn!(path = %path.display(), "Checkpoint has no metadata sidecar");
            }
        }

        let mut reader = BufReader::new(file);
        let batch = self.read_records(path, &mut reader, count)?;
        tracing::debug!(path = %path.display(), records = batch.len(), "Checkpoint read");
        Ok(batch)
    }
}

/// Splits `batch` into one batch per device using [`shard_for_key`].
///
/// Records keep their relative order within each target device.
pub fn redistribute(batch: &RecordBatch, num_devices: usize) -> Vec<RecordBatch> {
    if num_devices == 0 {
        return Vec::new();
    }
    let per_device = batch.len() / num_devices + 1;
    let mut shards: Vec<RecordBatch> = (0..num_devices)
        .map(|_| RecordBatch::with_capacity(batch.dim(), per_device))
        .collect();

    for (key, vector) in batch.iter() {
        let device = shard_for_key(key, num_devices);
        shards[device].push_unchecked(key, vector);
    }
    shards
}
