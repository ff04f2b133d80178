//! GGUF file-format types, the artifact sink contract, and a staged writer.
//!
//! The converter in `neox-st2gguf` never touches the byte layout directly; it
//! drives an [`ArtifactSink`] through a fixed call order and the
//! [`GgufWriter`] turns those calls into a GGUF v3 file.
//!
//! # Example
//!
//! ```no_run
//! use neox_gguf::{ArtifactSink, GgufWriter, MetadataValue};
//!
//! let mut w = GgufWriter::new("model.gguf");
//! w.set_architecture("gptneox").unwrap();
//! w.add_metadata("gptneox.block_count", MetadataValue::U32(2)).unwrap();
//! w.write_header().unwrap();
//! w.write_metadata().unwrap();
//! w.close().unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub mod keys;
pub mod reader;
pub mod sink;
pub mod writer;

pub use sink::ArtifactSink;
pub use writer::{GgufWriter, MetadataValue, TensorEntry};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// The four-byte magic that every GGUF file starts with.
pub const GGUF_MAGIC: [u8; 4] = *b"GGUF";
/// Version written by [`GgufWriter`].
pub const GGUF_VERSION: u32 = 3;
/// Default tensor-data alignment in bytes.
pub const GGUF_DEFAULT_ALIGNMENT: u64 = 32;
/// Length of the fixed header (magic + version + tensor count + kv count).
pub const GGUF_HEADER_LEN: usize = 24;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while writing or reading a GGUF file.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum GgufError {
    #[error("bad magic: {0:02x?}")]
    BadMagic([u8; 4]),
    #[error("unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),
    #[error("short header: read {0} bytes, need 24")]
    ShortHeader(usize),
    #[error("malformed file")]
    Malformed,
    #[error("invalid KV type: {0}")]
    InvalidKvType(u32),
    #[error("string too large: {0} bytes")]
    StringTooLarge(u64),
    #[error("duplicate metadata key `{0}`")]
    DuplicateKey(String),
    #[error("duplicate tensor `{0}`")]
    DuplicateTensor(String),
    #[error("tensor `{name}`: {len} data bytes do not match shape {shape:?} of {dtype:?}")]
    TensorSize { name: String, shape: Vec<u64>, dtype: TensorDType, len: usize },
    #[error("`{call}` is not allowed after the writer reached stage {stage}")]
    OutOfOrder { call: &'static str, stage: &'static str },
    #[error("cannot persist {path}: {source}")]
    Persist { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, GgufError>;

// ---------------------------------------------------------------------------
// Value-type discriminant
// ---------------------------------------------------------------------------

/// Discriminant tag for GGUF metadata values.
///
/// Numeric values match those used by the GGUF file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum GgufValueType {
    Uint8 = 0,
    Int8 = 1,
    Uint16 = 2,
    Int16 = 3,
    Uint32 = 4,
    Int32 = 5,
    Float32 = 6,
    Bool = 7,
    String = 8,
    Array = 9,
    Uint64 = 10,
    Int64 = 11,
    Float64 = 12,
}

impl GgufValueType {
    /// Convert from the raw u32 discriminant in the file.
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Uint8),
            1 => Some(Self::Int8),
            2 => Some(Self::Uint16),
            3 => Some(Self::Int16),
            4 => Some(Self::Uint32),
            5 => Some(Self::Int32),
            6 => Some(Self::Float32),
            7 => Some(Self::Bool),
            8 => Some(Self::String),
            9 => Some(Self::Array),
            10 => Some(Self::Uint64),
            11 => Some(Self::Int64),
            12 => Some(Self::Float64),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Storage dtype
// ---------------------------------------------------------------------------

/// Element type of a tensor stored in the artifact.
///
/// Only the two float precisions the converter produces are representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TensorDType {
    F32,
    F16,
}

impl TensorDType {
    /// GGML type id written in the tensor index.
    pub const fn as_gguf_type(self) -> u32 {
        match self {
            Self::F32 => 0,
            Self::F16 => 1,
        }
    }

    /// Size of one element in bytes.
    pub const fn element_size(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F16 => 2,
        }
    }

    pub const fn from_gguf_type(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::F32),
            1 => Some(Self::F16),
            _ => None,
        }
    }
}

impl std::fmt::Display for TensorDType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::F32 => f.write_str("f32"),
            Self::F16 => f.write_str("f16"),
        }
    }
}

// ---------------------------------------------------------------------------
// Token type
// ---------------------------------------------------------------------------

/// Per-token classification stored in `tokenizer.ggml.token_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum TokenType {
    Normal = 1,
    Unknown = 2,
    Control = 3,
    UserDefined = 4,
    Unused = 5,
    Byte = 6,
}

impl TokenType {
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
