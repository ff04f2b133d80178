//! GPT-NeoX checkpoint to GGUF conversion.
//!
//! The pipeline lives in [`convert`]; everything else is a leaf it drives:
//! vocabulary reconciliation, tensor renaming, the storage dtype policy and
//! shard loading.

pub mod checkpoint;
pub mod convert;
pub mod dtype;
pub mod error;
pub mod exit;
pub mod hparams;
pub mod names;
pub mod special_vocab;
pub mod tensor;
pub mod vocab;

pub use checkpoint::{CheckpointReader, LoadedShard, SafeTensorsReader};
pub use convert::{ConversionSummary, ConvertOptions, convert};
pub use dtype::FileType;
pub use error::{ConvertError, Result};
pub use hparams::Hyperparameters;
pub use names::TensorNameMap;
pub use tensor::RawTensor;
pub use vocab::Vocabulary;
