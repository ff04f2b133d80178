//! Architecture hyperparameters from `config.json`.

use std::path::Path;

use neox_gguf::MetadataValue;
use neox_gguf::keys::{self, arch_key};
use serde::Deserialize;

use crate::error::{ConvertError, Result};
use crate::vocab::read_json;

/// The only checkpoint architecture this converter understands.
pub const SUPPORTED_ARCHITECTURE: &str = "GPTNeoXForCausalLM";
/// Architecture name written to `general.architecture`.
pub const GGUF_ARCH: &str = "gptneox";

/// GPT-NeoX hyperparameters. Every field is required except
/// `use_parallel_residual`, which defaults to `true`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Hyperparameters {
    pub architectures: Vec<String>,
    pub num_hidden_layers: u32,
    pub max_position_embeddings: u32,
    pub hidden_size: u32,
    pub intermediate_size: u32,
    pub num_attention_heads: u32,
    pub rotary_pct: f64,
    pub layer_norm_eps: f32,
    #[serde(default = "default_parallel_residual")]
    pub use_parallel_residual: bool,
}

fn default_parallel_residual() -> bool {
    true
}

impl Hyperparameters {
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }

    /// First entry of `architectures`, if any.
    pub fn architecture(&self) -> Option<&str> {
        self.architectures.first().map(String::as_str)
    }

    pub fn check_architecture(&self) -> Result<()> {
        match self.architecture() {
            Some(SUPPORTED_ARCHITECTURE) => Ok(()),
            Some(other) => Err(ConvertError::UnsupportedArchitecture(other.to_string())),
            None => Err(ConvertError::UnsupportedArchitecture("<none>".to_string())),
        }
    }

    pub fn block_count(&self) -> u32 {
        self.num_hidden_layers
    }

    /// `floor(rotary_pct * head_dim)` where `head_dim = hidden_size / heads`.
    pub fn rope_dimension_count(&self) -> Result<u32> {
        if self.num_attention_heads == 0 {
            return Err(ConvertError::InvalidHyperparameters(
                "num_attention_heads must be non-zero".to_string(),
            ));
        }
        let head_dim = self.hidden_size / self.num_attention_heads;
        Ok((self.rotary_pct * f64::from(head_dim)) as u32)
    }

    /// Architecture metadata in the order it is handed to the sink.
    pub fn gguf_metadata(&self) -> Result<Vec<(String, MetadataValue)>> {
        use MetadataValue::{Bool, F32, U32};
        let k = |key: &str| arch_key(GGUF_ARCH, key);
        Ok(vec![
            (k(keys::CONTEXT_LENGTH), U32(self.max_position_embeddings)),
            (k(keys::EMBEDDING_LENGTH), U32(self.hidden_size)),
            (k(keys::BLOCK_COUNT), U32(self.num_hidden_layers)),
            (k(keys::FEED_FORWARD_LENGTH), U32(self.intermediate_size)),
            (k(keys::ROPE_DIMENSION_COUNT), U32(self.rope_dimension_count()?)),
            (k(keys::HEAD_COUNT), U32(self.num_attention_heads)),
            (k(keys::USE_PARALLEL_RESIDUAL), Bool(self.use_parallel_residual)),
            (k(keys::LAYER_NORM_EPS), F32(self.layer_norm_eps)),
        ])
    }
}
