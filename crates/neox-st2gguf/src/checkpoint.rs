//! Checkpoint shard discovery and loading.
//!
//! Shards are consumed one at a time: [`ShardSequence`] only asks its reader
//! for the next part when the caller advances, and a shard's memory is
//! released once the caller has drained it.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use safetensors::SafeTensors;

use crate::error::{ConvertError, Result};
use crate::tensor::RawTensor;

/// Single-file checkpoint name.
pub const MONOLITHIC_CHECKPOINT: &str = "model.safetensors";
const SHARD_PREFIX: &str = "model-";
const SHARD_EXTENSION: &str = ".safetensors";

/// Loads one checkpoint shard into memory.
pub trait CheckpointReader {
    /// Owned name/tensor pairs; dropping the shard (or its iterator) frees it.
    type Shard: IntoIterator<Item = (String, RawTensor)>;

    fn load(&mut self, path: &Path) -> Result<Self::Shard>;
}

/// Count `model-*.safetensors` files directly inside `dir`.
pub fn count_model_parts(dir: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(SHARD_PREFIX) && name.ends_with(SHARD_EXTENSION) && entry.path().is_file() {
            count += 1;
        }
    }
    Ok(count)
}

/// Shard file names for `num_parts` parts; zero means a single monolithic file.
pub fn shard_names(num_parts: usize) -> Vec<String> {
    if num_parts == 0 {
        return vec![MONOLITHIC_CHECKPOINT.to_string()];
    }
    (1..=num_parts).map(|n| format!("{SHARD_PREFIX}{n:05}-of-{num_parts:05}{SHARD_EXTENSION}")).collect()
}

/// Lazy, single-pass sequence of loaded shards.
pub struct ShardSequence<'r, R: CheckpointReader> {
    reader: &'r mut R,
    dir: PathBuf,
    names: std::vec::IntoIter<String>,
}

impl<'r, R: CheckpointReader> ShardSequence<'r, R> {
    pub fn new(reader: &'r mut R, dir: &Path, names: Vec<String>) -> Self {
        Self { reader, dir: dir.to_path_buf(), names: names.into_iter() }
    }

    /// Shards not yet loaded.
    pub fn remaining(&self) -> usize {
        self.names.len()
    }
}

impl<R: CheckpointReader> Iterator for ShardSequence<'_, R> {
    type Item = Result<(String, R::Shard)>;

    fn next(&mut self) -> Option<Self::Item> {
        let name = self.names.next()?;
        tracing::info!("gguf: loading model part '{name}'");
        let path = self.dir.join(&name);
        Some(self.reader.load(&path).map(|shard| (name, shard)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.names.size_hint()
    }
}

/// Tensors of one shard, ordered by name.
#[derive(Debug, Default)]
pub struct LoadedShard {
    tensors: Vec<(String, RawTensor)>,
}

impl LoadedShard {
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

impl IntoIterator for LoadedShard {
    type Item = (String, RawTensor);
    type IntoIter = std::vec::IntoIter<(String, RawTensor)>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.into_iter()
    }
}

/// Reads `.safetensors` shards through a read-only memory map.
#[derive(Debug, Default, Clone, Copy)]
pub struct SafeTensorsReader;

impl CheckpointReader for SafeTensorsReader {
    type Shard = LoadedShard;

    fn load(&mut self, path: &Path) -> Result<LoadedShard> {
        if !path.is_file() {
            return Err(ConvertError::MissingRequiredFile(path.to_path_buf()));
        }
        let file = File::open(path)?;
        // SAFETY: the mapping is read-only and dropped before this function returns.
        let mmap = unsafe { Mmap::map(&file)? };
        let st = SafeTensors::deserialize(&mmap)
            .map_err(|e| ConvertError::Checkpoint { path: path.to_path_buf(), reason: e.to_string() })?;

        let mut tensors: Vec<(String, RawTensor)> = st
            .tensors()
            .into_iter()
            .map(|(name, view)| {
                let raw = RawTensor::new(view.dtype(), view.shape().to_vec(), view.data().to_vec());
                (name, raw)
            })
            .collect();
        tensors.sort_by(|a, b| a.0.cmp(&b.0));
        tracing::debug!(path = %path.display(), tensors = tensors.len(), "loaded safetensors shard");
        Ok(LoadedShard { tensors })
    }
}
