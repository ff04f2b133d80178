//! Tensor payload conversion: squeeze, decode, and re-encode.

use half::{bf16, f16};
use neox_gguf::{TensorDType, TensorEntry};
use safetensors::Dtype;

use crate::dtype::native_of;
use crate::error::{ConvertError, Result};

/// One tensor as stored in a checkpoint shard. `data` is little-endian.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTensor {
    pub dtype: Dtype,
    pub shape: Vec<usize>,
    pub data: Vec<u8>,
}

impl RawTensor {
    pub fn new(dtype: Dtype, shape: Vec<usize>, data: Vec<u8>) -> Self {
        Self { dtype, shape, data }
    }

    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> Self {
        Self::new(Dtype::F32, shape, bytemuck::cast_slice(values).to_vec())
    }

    pub fn from_f16(shape: Vec<usize>, values: &[f16]) -> Self {
        Self::new(Dtype::F16, shape, bytemuck::cast_slice(values).to_vec())
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Drop size-1 axes. A tensor that is all size-1 axes keeps a single one.
pub fn squeeze(shape: &[usize]) -> Vec<usize> {
    let squeezed: Vec<usize> = shape.iter().copied().filter(|&d| d != 1).collect();
    if squeezed.is_empty() { vec![1] } else { squeezed }
}

fn chunks<const N: usize>(data: &[u8]) -> impl Iterator<Item = [u8; N]> + '_ {
    data.chunks_exact(N).map(|c| {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(c);
        bytes
    })
}

/// Decode an OCP FP8 E4M3 byte (no infinities, 0x7f/0xff are NaN).
fn f8_e4m3_to_f32(b: u8) -> f32 {
    let sign = if b & 0x80 != 0 { -1.0 } else { 1.0 };
    let exp = i32::from((b >> 3) & 0x0f);
    let mant = f32::from(b & 0x07);
    if exp == 0x0f && mant == 7.0 {
        return f32::NAN;
    }
    if exp == 0 {
        sign * mant / 8.0 * 2f32.powi(-6)
    } else {
        sign * (1.0 + mant / 8.0) * 2f32.powi(exp - 7)
    }
}

/// Decode an OCP microscaling float with no inf/NaN encodings
/// (FP4 E2M1, FP6 E2M3, FP6 E3M2).
fn mx_float_to_f32(code: u8, exp_bits: u32, mant_bits: u32, bias: i32) -> f32 {
    let sign = if (code >> (exp_bits + mant_bits)) & 1 == 1 { -1.0 } else { 1.0 };
    let exp = i32::from((code >> mant_bits) & ((1u8 << exp_bits) - 1));
    let mant = f32::from(code & ((1u8 << mant_bits) - 1)) / f32::from(1u8 << mant_bits);
    if exp == 0 {
        sign * mant * 2f32.powi(1 - bias)
    } else {
        sign * (1.0 + mant) * 2f32.powi(exp - bias)
    }
}

/// Decode an E8M0 scale byte: `2^(e - 127)`, 0xff is NaN.
fn f8_e8m0_to_f32(b: u8) -> f32 {
    if b == 0xff { f32::NAN } else { 2f32.powi(i32::from(b) - 127) }
}

/// Split a packed sub-byte payload into codes, least significant bits first.
fn unpack_bits(data: &[u8], bits: usize) -> impl Iterator<Item = u8> + '_ {
    let mask = (1u16 << bits) - 1;
    (0..data.len() * 8 / bits).map(move |i| {
        let (byte, shift) = (i * bits / 8, i * bits % 8);
        let lo = u16::from(data[byte]);
        let hi = data.get(byte + 1).map_or(0, |&b| u16::from(b));
        (((lo | hi << 8) >> shift) & mask) as u8
    })
}

/// Widen a checkpoint payload to f32.
///
/// Packed sub-byte dtypes yield one value per slot in the payload, which may
/// include trailing padding; callers trim to the element count.
pub fn decode_f32(dtype: Dtype, data: &[u8]) -> Result<Vec<f32>> {
    let values = match dtype {
        Dtype::BOOL => data.iter().map(|&b| if b != 0 { 1.0 } else { 0.0 }).collect(),
        Dtype::U8 => data.iter().map(|&b| f32::from(b)).collect(),
        Dtype::I8 => data.iter().map(|&b| f32::from(b as i8)).collect(),
        Dtype::F8_E5M2 => data.iter().map(|&b| f16::from_bits(u16::from(b) << 8).to_f32()).collect(),
        Dtype::F8_E4M3 => data.iter().map(|&b| f8_e4m3_to_f32(b)).collect(),
        Dtype::F8_E8M0 => data.iter().map(|&b| f8_e8m0_to_f32(b)).collect(),
        Dtype::F4 => unpack_bits(data, 4).map(|c| mx_float_to_f32(c, 2, 1, 1)).collect(),
        Dtype::F6_E2M3 => unpack_bits(data, 6).map(|c| mx_float_to_f32(c, 2, 3, 1)).collect(),
        Dtype::F6_E3M2 => unpack_bits(data, 6).map(|c| mx_float_to_f32(c, 3, 2, 3)).collect(),
        Dtype::I16 => chunks::<2>(data).map(|c| f32::from(i16::from_le_bytes(c))).collect(),
        Dtype::U16 => chunks::<2>(data).map(|c| f32::from(u16::from_le_bytes(c))).collect(),
        Dtype::F16 => chunks::<2>(data).map(|c| f16::from_le_bytes(c).to_f32()).collect(),
        Dtype::BF16 => chunks::<2>(data).map(|c| bf16::from_le_bytes(c).to_f32()).collect(),
        Dtype::I32 => chunks::<4>(data).map(|c| i32::from_le_bytes(c) as f32).collect(),
        Dtype::U32 => chunks::<4>(data).map(|c| u32::from_le_bytes(c) as f32).collect(),
        Dtype::F32 => chunks::<4>(data).map(f32::from_le_bytes).collect(),
        Dtype::F64 => chunks::<8>(data).map(|c| f64::from_le_bytes(c) as f32).collect(),
        Dtype::I64 => chunks::<8>(data).map(|c| i64::from_le_bytes(c) as f32).collect(),
        Dtype::U64 => chunks::<8>(data).map(|c| u64::from_le_bytes(c) as f32).collect(),
        other => return Err(ConvertError::UnsupportedDtype(format!("{other:?}"))),
    };
    Ok(values)
}

/// Encode `raw` as `out`. Same-dtype payloads are passed through untouched.
pub fn encode(raw: RawTensor, out: TensorDType) -> Result<Vec<u8>> {
    if raw.dtype == native_of(out) {
        return Ok(raw.data);
    }
    let mut values = decode_f32(raw.dtype, &raw.data)?;
    values.truncate(raw.element_count());
    let bytes = match out {
        TensorDType::F32 => bytemuck::cast_slice(&values).to_vec(),
        TensorDType::F16 => {
            let halves: Vec<f16> = values.iter().map(|&v| f16::from_f32(v)).collect();
            bytemuck::cast_slice(&halves).to_vec()
        }
    };
    Ok(bytes)
}

/// Squeeze and encode `raw` into an entry named `name`.
pub fn to_entry(name: String, raw: RawTensor, out: TensorDType) -> Result<TensorEntry> {
    let shape = squeeze(&raw.shape).into_iter().map(|d| d as u64).collect();
    let data = encode(raw, out)?;
    Ok(TensorEntry::new(name, shape, out, data))
}
