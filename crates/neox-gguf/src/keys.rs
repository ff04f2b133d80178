//! Well-known GGUF metadata keys.
//!
//! Architecture-scoped keys are templates; expand them with [`arch_key`].

pub const GENERAL_ARCHITECTURE: &str = "general.architecture";
pub const GENERAL_NAME: &str = "general.name";
pub const GENERAL_ALIGNMENT: &str = "general.alignment";

pub const CONTEXT_LENGTH: &str = "context_length";
pub const EMBEDDING_LENGTH: &str = "embedding_length";
pub const BLOCK_COUNT: &str = "block_count";
pub const FEED_FORWARD_LENGTH: &str = "feed_forward_length";
pub const USE_PARALLEL_RESIDUAL: &str = "use_parallel_residual";
pub const ROPE_DIMENSION_COUNT: &str = "rope.dimension_count";
pub const HEAD_COUNT: &str = "attention.head_count";
pub const LAYER_NORM_EPS: &str = "attention.layer_norm_epsilon";

pub const TOKENIZER_MODEL: &str = "tokenizer.ggml.model";
pub const TOKENIZER_TOKENS: &str = "tokenizer.ggml.tokens";
pub const TOKENIZER_SCORES: &str = "tokenizer.ggml.scores";
pub const TOKENIZER_TOKEN_TYPE: &str = "tokenizer.ggml.token_type";
pub const TOKENIZER_MERGES: &str = "tokenizer.ggml.merges";
pub const TOKENIZER_ADD_BOS: &str = "tokenizer.ggml.add_bos_token";
pub const TOKENIZER_ADD_EOS: &str = "tokenizer.ggml.add_eos_token";

/// `arch_key("gptneox", BLOCK_COUNT)` → `"gptneox.block_count"`.
pub fn arch_key(arch: &str, key: &str) -> String {
    format!("{arch}.{key}")
}

/// Key for a special token id, e.g. `tokenizer.ggml.bos_token_id`.
pub fn special_token_id_key(kind: &str) -> String {
    format!("tokenizer.ggml.{kind}_token_id")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_arch_scoped_keys() {
        assert_eq!(arch_key("gptneox", ROPE_DIMENSION_COUNT), "gptneox.rope.dimension_count");
        assert_eq!(arch_key("gptneox", HEAD_COUNT), "gptneox.attention.head_count");
    }

    #[test]
    fn special_token_keys() {
        assert_eq!(special_token_id_key("eos"), "tokenizer.ggml.eos_token_id");
    }
}
