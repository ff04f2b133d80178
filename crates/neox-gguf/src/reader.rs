//! Read back the index of a GGUF file: header, metadata and tensor infos.
//!
//! Tensor payloads are not loaded; only their offsets are reported.

use std::io::{BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{GGUF_HEADER_LEN, GgufError, Result, TensorDType};

/// Fixed 24-byte GGUF header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GgufHeader {
    pub version: u32,
    pub n_tensors: u64,
    pub n_kv: u64,
}

/// Decoded metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GgufValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
    Bool(bool),
    String(String),
    Array(Vec<GgufValue>),
    U64(u64),
    I64(i64),
    F64(f64),
}

impl GgufValue {
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[GgufValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }
}

/// Tensor index entry. `dims` are in file order (innermost first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GgufTensorInfo {
    pub name: String,
    pub dims: Vec<u64>,
    pub dtype: TensorDType,
    pub offset: u64,
}

/// Everything before the tensor-data section.
#[derive(Debug, Clone)]
pub struct GgufIndex {
    pub header: GgufHeader,
    pub metadata: Vec<(String, GgufValue)>,
    pub tensors: Vec<GgufTensorInfo>,
}

impl GgufIndex {
    pub fn get(&self, key: &str) -> Option<&GgufValue> {
        self.metadata.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

const MAX_STR_LEN: u64 = 10 * 1024 * 1024;

/// Parse the first 24 bytes of a GGUF file.
pub fn parse_header(buf: &[u8]) -> Result<GgufHeader> {
    if buf.len() < GGUF_HEADER_LEN {
        return Err(GgufError::ShortHeader(buf.len()));
    }

    let magic: [u8; 4] = buf[0..4].try_into().map_err(|_| GgufError::Malformed)?;
    if &magic != b"GGUF" {
        return Err(GgufError::BadMagic(magic));
    }

    let version = u32::from_le_bytes(buf[4..8].try_into().map_err(|_| GgufError::Malformed)?);
    if !(2..=3).contains(&version) {
        return Err(GgufError::UnsupportedVersion(version));
    }

    let n_tensors = u64::from_le_bytes(buf[8..16].try_into().map_err(|_| GgufError::Malformed)?);
    let n_kv = u64::from_le_bytes(buf[16..24].try_into().map_err(|_| GgufError::Malformed)?);

    Ok(GgufHeader { version, n_tensors, n_kv })
}

#[inline]
fn read_array<const N: usize, R: Read>(r: &mut R) -> Result<[u8; N]> {
    let mut b = [0u8; N];
    r.read_exact(&mut b)?;
    Ok(b)
}

#[inline]
fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(r)?))
}

#[inline]
fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    Ok(u64::from_le_bytes(read_array(r)?))
}

fn read_string<R: Read>(r: &mut R) -> Result<String> {
    let len = read_u64(r)?;
    if len > MAX_STR_LEN {
        return Err(GgufError::StringTooLarge(len));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| GgufError::Malformed)
}

fn read_value<R: Read>(r: &mut R, ty: u32) -> Result<GgufValue> {
    Ok(match ty {
        0 => GgufValue::U8(read_array::<1, _>(r)?[0]),
        1 => GgufValue::I8(i8::from_le_bytes(read_array(r)?)),
        2 => GgufValue::U16(u16::from_le_bytes(read_array(r)?)),
        3 => GgufValue::I16(i16::from_le_bytes(read_array(r)?)),
        4 => GgufValue::U32(read_u32(r)?),
        5 => GgufValue::I32(i32::from_le_bytes(read_array(r)?)),
        6 => GgufValue::F32(f32::from_le_bytes(read_array(r)?)),
        7 => GgufValue::Bool(read_array::<1, _>(r)?[0] != 0),
        8 => GgufValue::String(read_string(r)?),
        9 => {
            let elem_ty = read_u32(r)?;
            let len = read_u64(r)?;
            let mut items = Vec::with_capacity(len.min(1 << 16) as usize);
            for _ in 0..len {
                items.push(read_value(r, elem_ty)?);
            }
            GgufValue::Array(items)
        }
        10 => GgufValue::U64(read_u64(r)?),
        11 => GgufValue::I64(i64::from_le_bytes(read_array(r)?)),
        12 => GgufValue::F64(f64::from_le_bytes(read_array(r)?)),
        _ => return Err(GgufError::InvalidKvType(ty)),
    })
}

/// Read header, all metadata and the tensor index from `path`.
pub fn read_index(path: impl AsRef<Path>) -> Result<GgufIndex> {
    let f = std::fs::File::open(path)?;
    let mut r = BufReader::new(f);

    let header_buf: [u8; GGUF_HEADER_LEN] = read_array(&mut r)?;
    let header = parse_header(&header_buf)?;

    let mut metadata = Vec::with_capacity(header.n_kv.min(1024) as usize);
    for _ in 0..header.n_kv {
        let key = read_string(&mut r)?;
        let ty = read_u32(&mut r)?;
        metadata.push((key, read_value(&mut r, ty)?));
    }

    let mut tensors = Vec::with_capacity(header.n_tensors.min(1024) as usize);
    for _ in 0..header.n_tensors {
        let name = read_string(&mut r)?;
        let n_dims = read_u32(&mut r)?;
        let dims = (0..n_dims).map(|_| read_u64(&mut r)).collect::<Result<Vec<_>>>()?;
        let raw = read_u32(&mut r)?;
        let dtype = TensorDType::from_gguf_type(raw).ok_or(GgufError::Malformed)?;
        let offset = read_u64(&mut r)?;
        tensors.push(GgufTensorInfo { name, dims, dtype, offset });
    }

    Ok(GgufIndex { header, metadata, tensors })
}
