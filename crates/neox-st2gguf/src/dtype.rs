//! Storage precision policy.
//!
//! Decides per tensor whether the artifact stores f32 or f16. Only 2-D
//! `.weight` matrices are ever narrowed; 1-D tensors (norms, biases) stay f32
//! under an f16 target even when the checkpoint holds them as f16.

use neox_gguf::TensorDType;
use safetensors::Dtype;

/// Output file type selected on the command line (`0` = f32, `1` = f16).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    F32,
    F16,
}

impl FileType {
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::F32),
            1 => Some(Self::F16),
            _ => None,
        }
    }

    pub const fn code(self) -> u8 {
        match self {
            Self::F32 => 0,
            Self::F16 => 1,
        }
    }

    /// Suffix used in the default output file name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::F16 => "f16",
        }
    }
}

/// F16 and F32 pass through; every other dtype is widened to F32.
pub fn normalize(native: Dtype) -> TensorDType {
    match native {
        Dtype::F16 => TensorDType::F16,
        _ => TensorDType::F32,
    }
}

/// The checkpoint dtype that holds `dtype` bit-for-bit.
pub fn native_of(dtype: TensorDType) -> Dtype {
    match dtype {
        TensorDType::F32 => Dtype::F32,
        TensorDType::F16 => Dtype::F16,
    }
}

/// Storage dtype for one tensor. Pure and total.
///
/// `rank` is the number of dimensions after squeezing; `is_weight` is true for
/// native names ending in `.weight`.
pub fn decide(target: FileType, native: Dtype, rank: usize, is_weight: bool) -> TensorDType {
    match (target, normalize(native)) {
        (FileType::F32, TensorDType::F16) => TensorDType::F32,
        (FileType::F16, TensorDType::F16) if rank == 1 => TensorDType::F32,
        (FileType::F16, TensorDType::F32) if rank == 2 && is_weight => TensorDType::F16,
        (_, dtype) => dtype,
    }
}
