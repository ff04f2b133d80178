//! Staged GGUF v3 writer.
//!
//! Metadata is collected in memory; tensor payloads are spilled to a scratch
//! file as they arrive, so only their index entries stay resident. Everything
//! is then streamed out by `write_header` / `write_metadata` /
//! `write_tensors`. Output goes to a temporary file next to the destination
//! and is only renamed into place by `close`, so an aborted conversion never
//! leaves a partial artifact.

use std::collections::HashSet;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::keys;
use crate::sink::ArtifactSink;
use crate::{
    GGUF_DEFAULT_ALIGNMENT, GGUF_MAGIC, GGUF_VERSION, GgufError, GgufValueType, Result,
    TensorDType, TokenType,
};

/// Metadata value accepted by the writer.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Bool(bool),
    U32(u32),
    I32(i32),
    U64(u64),
    F32(f32),
    String(String),
    /// Array of byte strings (token texts, merge rules).
    StringArray(Vec<Vec<u8>>),
    F32Array(Vec<f32>),
    I32Array(Vec<i32>),
}

impl MetadataValue {
    fn value_type(&self) -> GgufValueType {
        match self {
            Self::Bool(_) => GgufValueType::Bool,
            Self::U32(_) => GgufValueType::Uint32,
            Self::I32(_) => GgufValueType::Int32,
            Self::U64(_) => GgufValueType::Uint64,
            Self::F32(_) => GgufValueType::Float32,
            Self::String(_) => GgufValueType::String,
            Self::StringArray(_) | Self::F32Array(_) | Self::I32Array(_) => GgufValueType::Array,
        }
    }
}

/// One tensor queued for writing. `shape` is outermost-first.
#[derive(Debug, Clone)]
pub struct TensorEntry {
    pub name: String,
    pub shape: Vec<u64>,
    pub dtype: TensorDType,
    pub data: Vec<u8>,
}

impl TensorEntry {
    pub fn new(name: String, shape: Vec<u64>, dtype: TensorDType, data: Vec<u8>) -> Self {
        Self { name, shape, dtype, data }
    }

    fn expected_len(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(usize::try_from(d).ok()?))?
            .checked_mul(self.dtype.element_size())
    }
}

/// Index entry of a tensor whose payload lives in the spill file.
#[derive(Debug, Clone)]
struct StagedTensor {
    name: String,
    shape: Vec<u64>,
    dtype: TensorDType,
    len: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Collecting,
    Header,
    Metadata,
    Tensors,
    Closed,
}

impl Stage {
    const fn name(self) -> &'static str {
        match self {
            Self::Collecting => "collecting",
            Self::Header => "header",
            Self::Metadata => "metadata",
            Self::Tensors => "tensors",
            Self::Closed => "closed",
        }
    }
}

/// Byte sink that tracks its own position for alignment padding.
struct Output {
    inner: BufWriter<NamedTempFile>,
    written: u64,
}

impl Output {
    fn bytes(&mut self, b: &[u8]) -> Result<()> {
        self.inner.write_all(b)?;
        self.written += b.len() as u64;
        Ok(())
    }

    fn u32(&mut self, v: u32) -> Result<()> {
        self.bytes(&v.to_le_bytes())
    }

    fn u64(&mut self, v: u64) -> Result<()> {
        self.bytes(&v.to_le_bytes())
    }

    fn string(&mut self, s: &[u8]) -> Result<()> {
        self.u64(s.len() as u64)?;
        self.bytes(s)
    }

    /// Copy exactly `len` bytes from `src`.
    fn copy_from(&mut self, src: &mut impl Read, len: u64) -> Result<()> {
        let copied = io::copy(&mut src.by_ref().take(len), &mut self.inner)?;
        if copied != len {
            return Err(GgufError::Malformed);
        }
        self.written += copied;
        Ok(())
    }

    fn pad_to(&mut self, alignment: u64) -> Result<()> {
        let pad = padding(self.written, alignment);
        if pad > 0 {
            self.bytes(&vec![0u8; pad as usize])?;
        }
        Ok(())
    }
}

#[inline]
fn padding(offset: u64, alignment: u64) -> u64 {
    (alignment - offset % alignment) % alignment
}

/// GGUF v3 [`ArtifactSink`].
pub struct GgufWriter {
    path: PathBuf,
    alignment: u64,
    metadata: Vec<(String, MetadataValue)>,
    keys_seen: HashSet<String>,
    tensors: Vec<StagedTensor>,
    spill: Option<BufWriter<NamedTempFile>>,
    spilled: u64,
    tensor_names: HashSet<String>,
    stage: Stage,
    out: Option<Output>,
}

impl GgufWriter {
    /// Create a writer targeting `path`. Nothing touches the filesystem until
    /// [`write_header`](ArtifactSink::write_header).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            alignment: GGUF_DEFAULT_ALIGNMENT,
            metadata: Vec::new(),
            keys_seen: HashSet::new(),
            tensors: Vec::new(),
            spill: None,
            spilled: 0,
            tensor_names: HashSet::new(),
            stage: Stage::Collecting,
            out: None,
        }
    }

    /// Override the tensor-data alignment (must be a power of two).
    pub fn with_alignment(mut self, alignment: u64) -> Self {
        if alignment.is_power_of_two() {
            self.alignment = alignment;
        } else {
            tracing::warn!(alignment, "ignoring non power-of-two alignment");
        }
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tensor_count(&self) -> usize {
        self.tensors.len()
    }

    /// Payload bytes moved out of memory into the spill file so far.
    pub fn spilled_bytes(&self) -> u64 {
        self.spilled
    }

    /// Directory for scratch and staging files: the destination's parent.
    fn staging_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn expect_stage(&self, call: &'static str, allowed: &[Stage]) -> Result<()> {
        if allowed.contains(&self.stage) {
            Ok(())
        } else {
            Err(GgufError::OutOfOrder { call, stage: self.stage.name() })
        }
    }

    fn out(&mut self) -> Result<&mut Output> {
        self.out.as_mut().ok_or(GgufError::Malformed)
    }

    fn push_kv(&mut self, call: &'static str, key: &str, value: MetadataValue) -> Result<()> {
        self.expect_stage(call, &[Stage::Collecting])?;
        if !self.keys_seen.insert(key.to_string()) {
            return Err(GgufError::DuplicateKey(key.to_string()));
        }
        self.metadata.push((key.to_string(), value));
        Ok(())
    }

    fn write_value(out: &mut Output, value: &MetadataValue) -> Result<()> {
        out.u32(value.value_type() as u32)?;
        match value {
            MetadataValue::Bool(v) => out.bytes(&[u8::from(*v)]),
            MetadataValue::U32(v) => out.u32(*v),
            MetadataValue::I32(v) => out.bytes(&v.to_le_bytes()),
            MetadataValue::U64(v) => out.u64(*v),
            MetadataValue::F32(v) => out.bytes(&v.to_le_bytes()),
            MetadataValue::String(s) => out.string(s.as_bytes()),
            MetadataValue::StringArray(items) => {
                out.u32(GgufValueType::String as u32)?;
                out.u64(items.len() as u64)?;
                items.iter().try_for_each(|s| out.string(s))
            }
            MetadataValue::F32Array(items) => {
                out.u32(GgufValueType::Float32 as u32)?;
                out.u64(items.len() as u64)?;
                items.iter().try_for_each(|v| out.bytes(&v.to_le_bytes()))
            }
            MetadataValue::I32Array(items) => {
                out.u32(GgufValueType::Int32 as u32)?;
                out.u64(items.len() as u64)?;
                items.iter().try_for_each(|v| out.bytes(&v.to_le_bytes()))
            }
        }
    }
}

impl ArtifactSink for GgufWriter {
    fn set_architecture(&mut self, name: &str) -> Result<()> {
        self.push_kv(
            "set_architecture",
            keys::GENERAL_ARCHITECTURE,
            MetadataValue::String(name.to_string()),
        )
    }

    fn add_metadata(&mut self, key: &str, value: MetadataValue) -> Result<()> {
        self.push_kv("add_metadata", key, value)
    }

    fn add_token_list(&mut self, tokens: Vec<Vec<u8>>) -> Result<()> {
        self.push_kv("add_token_list", keys::TOKENIZER_TOKENS, MetadataValue::StringArray(tokens))
    }

    fn add_token_scores(&mut self, scores: Vec<f32>) -> Result<()> {
        self.push_kv("add_token_scores", keys::TOKENIZER_SCORES, MetadataValue::F32Array(scores))
    }

    fn add_token_types(&mut self, types: Vec<TokenType>) -> Result<()> {
        let codes = types.into_iter().map(TokenType::as_i32).collect();
        self.push_kv("add_token_types", keys::TOKENIZER_TOKEN_TYPE, MetadataValue::I32Array(codes))
    }

    fn add_tensor(&mut self, tensor: TensorEntry) -> Result<()> {
        self.expect_stage("add_tensor", &[Stage::Collecting])?;
        if tensor.expected_len() != Some(tensor.data.len()) {
            return Err(GgufError::TensorSize {
                name: tensor.name,
                shape: tensor.shape,
                dtype: tensor.dtype,
                len: tensor.data.len(),
            });
        }
        if !self.tensor_names.insert(tensor.name.clone()) {
            return Err(GgufError::DuplicateTensor(tensor.name));
        }

        if self.spill.is_none() {
            let tmp = NamedTempFile::new_in(self.staging_dir())?;
            tracing::debug!("spilling tensor data to {}", tmp.path().display());
            self.spill = Some(BufWriter::new(tmp));
        }
        let spill = self.spill.as_mut().ok_or(GgufError::Malformed)?;
        spill.write_all(&tensor.data)?;

        let len = tensor.data.len() as u64;
        self.spilled += len;
        self.tensors.push(StagedTensor { name: tensor.name, shape: tensor.shape, dtype: tensor.dtype, len });
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        self.expect_stage("write_header", &[Stage::Collecting])?;
        if self.alignment != GGUF_DEFAULT_ALIGNMENT {
            let alignment = u32::try_from(self.alignment).map_err(|_| GgufError::Malformed)?;
            self.push_kv("write_header", keys::GENERAL_ALIGNMENT, MetadataValue::U32(alignment))?;
        }

        let tmp = NamedTempFile::new_in(self.staging_dir())?;
        tracing::debug!("staging GGUF output in {}", tmp.path().display());

        let mut out = Output { inner: BufWriter::new(tmp), written: 0 };
        out.bytes(&GGUF_MAGIC)?;
        out.u32(GGUF_VERSION)?;
        out.u64(self.tensors.len() as u64)?;
        out.u64(self.metadata.len() as u64)?;
        self.out = Some(out);
        self.stage = Stage::Header;
        Ok(())
    }

    fn write_metadata(&mut self) -> Result<()> {
        self.expect_stage("write_metadata", &[Stage::Header])?;
        let metadata = std::mem::take(&mut self.metadata);
        let out = self.out()?;
        for (key, value) in &metadata {
            out.string(key.as_bytes())?;
            Self::write_value(out, value)?;
        }
        self.metadata = metadata;
        self.stage = Stage::Metadata;
        Ok(())
    }

    fn write_tensors(&mut self) -> Result<()> {
        self.expect_stage("write_tensors", &[Stage::Metadata])?;
        let alignment = self.alignment;
        let tensors = std::mem::take(&mut self.tensors);
        let mut spill = match self.spill.take() {
            Some(buf) => {
                let mut file = buf.into_inner().map_err(|e| GgufError::Io(e.into_error()))?;
                file.seek(SeekFrom::Start(0))?;
                Some(file)
            }
            None => None,
        };
        let out = self.out()?;

        let mut offset = 0u64;
        for t in &tensors {
            out.string(t.name.as_bytes())?;
            out.u32(t.shape.len() as u32)?;
            for &dim in t.shape.iter().rev() {
                out.u64(dim)?;
            }
            out.u32(t.dtype.as_gguf_type())?;
            out.u64(offset)?;
            offset += t.len;
            offset += padding(offset, alignment);
        }

        out.pad_to(alignment)?;
        for t in &tensors {
            if t.len > 0 {
                let src = spill.as_mut().ok_or(GgufError::Malformed)?;
                out.copy_from(src, t.len)?;
            }
            out.pad_to(alignment)?;
        }
        tracing::debug!(tensors = tensors.len(), bytes = out.written, "wrote tensor data");

        self.tensors = tensors;
        self.stage = Stage::Tensors;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.expect_stage("close", &[Stage::Metadata, Stage::Tensors])?;
        if self.stage == Stage::Metadata && !self.tensors.is_empty() {
            return Err(GgufError::OutOfOrder { call: "close", stage: self.stage.name() });
        }

        let out = self.out.take().ok_or(GgufError::Malformed)?;
        let tmp = out.inner.into_inner().map_err(|e| GgufError::Io(e.into_error()))?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| GgufError::Persist { path: self.path.clone(), source: e.error })?;

        tracing::debug!("persisted {} ({} bytes)", self.path.display(), out.written);
        self.stage = Stage::Closed;
        Ok(())
    }
}
