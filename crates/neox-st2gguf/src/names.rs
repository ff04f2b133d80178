//! Checkpoint-native → canonical GGUF tensor names for GPT-NeoX.

use std::sync::LazyLock;

use regex::Regex;

/// Parameter suffixes re-attached after the base name is mapped.
pub const TRY_SUFFIXES: &[&str] = &[".weight", ".bias"];

/// Runtime-derived buffers that are never converted.
const DROPPED_SUFFIXES: &[&str] =
    &[".attention.masked_bias", ".attention.bias", ".attention.rotary_emb.inv_freq"];

const GLOBAL_TENSORS: &[(&str, &str)] = &[
    ("gpt_neox.embed_in", "token_embd"),
    ("gpt_neox.final_layer_norm", "output_norm"),
    ("embed_out", "output"),
];

const BLOCK_TENSORS: &[(&str, &str)] = &[
    ("input_layernorm", "attn_norm"),
    ("attention.query_key_value", "attn_qkv"),
    ("attention.dense", "attn_output"),
    ("post_attention_layernorm", "ffn_norm"),
    ("mlp.dense_h_to_4h", "ffn_up"),
    ("mlp.dense_4h_to_h", "ffn_down"),
];

static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^gpt_neox\.layers\.(0|[1-9][0-9]*)\.(.+)$").expect("valid block regex")
});

/// `true` for attention mask/bias buffers and rotary caches.
pub fn is_runtime_buffer(name: &str) -> bool {
    DROPPED_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Name table for a model with a fixed number of blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorNameMap {
    block_count: u32,
}

impl TensorNameMap {
    pub fn new(block_count: u32) -> Self {
        Self { block_count }
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// Map a native name; `None` means the tensor has no canonical role.
    ///
    /// An exact match is tried first, then each recognized suffix (longest
    /// first) is stripped, the remainder mapped, and the suffix re-attached.
    pub fn map(&self, native: &str) -> Option<String> {
        if let Some(canonical) = self.map_base(native) {
            return Some(canonical);
        }
        let mut suffixes = TRY_SUFFIXES.to_vec();
        suffixes.sort_by_key(|s| std::cmp::Reverse(s.len()));
        suffixes.into_iter().find_map(|suffix| {
            let base = native.strip_suffix(suffix)?;
            self.map_base(base).map(|canonical| format!("{canonical}{suffix}"))
        })
    }

    fn map_base(&self, base: &str) -> Option<String> {
        if let Some(&(_, canonical)) = GLOBAL_TENSORS.iter().find(|(n, _)| *n == base) {
            return Some(canonical.to_string());
        }
        let caps = BLOCK_RE.captures(base)?;
        let bid: u32 = caps[1].parse().ok()?;
        if bid >= self.block_count {
            return None;
        }
        let role = &caps[2];
        BLOCK_TENSORS.iter().find(|(n, _)| *n == role).map(|(_, c)| format!("blk.{bid}.{c}"))
    }

    /// Every (native, canonical) base-name pair, globals first.
    pub fn pairs(&self) -> Vec<(String, String)> {
        let globals = GLOBAL_TENSORS.iter().map(|&(n, c)| (n.to_string(), c.to_string()));
        let blocks = (0..self.block_count).flat_map(|bid| {
            BLOCK_TENSORS
                .iter()
                .map(move |&(n, c)| (format!("gpt_neox.layers.{bid}.{n}"), format!("blk.{bid}.{c}")))
        });
        globals.chain(blocks).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_global_tensors_with_suffix() {
        let map = TensorNameMap::new(2);
        assert_eq!(map.map("gpt_neox.embed_in.weight").as_deref(), Some("token_embd.weight"));
        assert_eq!(map.map("gpt_neox.final_layer_norm.bias").as_deref(), Some("output_norm.bias"));
        assert_eq!(map.map("embed_out.weight").as_deref(), Some("output.weight"));
    }

    #[test]
    fn maps_block_tensors() {
        let map = TensorNameMap::new(2);
        assert_eq!(
            map.map("gpt_neox.layers.1.attention.query_key_value.weight").as_deref(),
            Some("blk.1.attn_qkv.weight")
        );
        assert_eq!(
            map.map("gpt_neox.layers.0.mlp.dense_4h_to_h.bias").as_deref(),
            Some("blk.0.ffn_down.bias")
        );
    }

    #[test]
    fn exact_names_without_suffix() {
        let map = TensorNameMap::new(1);
        assert_eq!(map.map("gpt_neox.layers.0.input_layernorm").as_deref(), Some("blk.0.attn_norm"));
    }

    #[test]
    fn block_index_outside_model_is_unmapped() {
        let map = TensorNameMap::new(2);
        assert_eq!(map.map("gpt_neox.layers.2.attention.dense.weight"), None);
        assert_eq!(map.map("gpt_neox.layers.01.attention.dense.weight"), None);
    }

    #[test]
    fn unknown_names_are_unmapped() {
        let map = TensorNameMap::new(4);
        assert_eq!(map.map("gpt_neox.layers.0.attention.rotary.weight"), None);
        assert_eq!(map.map("model.embed_tokens.weight"), None);
        assert_eq!(map.map("gpt_neox.embed_in.scale"), None);
        assert_eq!(map.map(""), None);
    }

    #[test]
    fn runtime_buffers() {
        assert!(is_runtime_buffer("gpt_neox.layers.0.attention.masked_bias"));
        assert!(is_runtime_buffer("gpt_neox.layers.3.attention.bias"));
        assert!(is_runtime_buffer("gpt_neox.layers.3.attention.rotary_emb.inv_freq"));
        assert!(!is_runtime_buffer("gpt_neox.layers.3.attention.dense.bias"));
        assert!(!is_runtime_buffer("gpt_neox.layers.3.attention.query_key_value.bias"));
    }

    #[test]
    fn canonical_table_snapshot() {
        let table: Vec<String> =
            TensorNameMap::new(1).pairs().into_iter().map(|(n, c)| format!("{n} -> {c}")).collect();
        insta::assert_snapshot!(table.join("\n"), @r"
        gpt_neox.embed_in -> token_embd
        gpt_neox.final_layer_norm -> output_norm
        embed_out -> output
        gpt_neox.layers.0.input_layernorm -> blk.0.attn_norm
        gpt_neox.layers.0.attention.query_key_value -> blk.0.attn_qkv
        gpt_neox.layers.0.attention.dense -> blk.0.attn_output
        gpt_neox.layers.0.post_attention_layernorm -> blk.0.ffn_norm
        gpt_neox.layers.0.mlp.dense_h_to_4h -> blk.0.ffn_up
        gpt_neox.layers.0.mlp.dense_4h_to_h -> blk.0.ffn_down
        ");
    }

    proptest::proptest! {
        #[test]
        fn every_listed_pair_maps_with_each_suffix(blocks in 1u32..48, pick in 0usize..1000) {
            let map = TensorNameMap::new(blocks);
            let pairs = map.pairs();
            let (native, canonical) = &pairs[pick % pairs.len()];
            for suffix in TRY_SUFFIXES {
                let mapped = map.map(&format!("{native}{suffix}"));
                proptest::prop_assert_eq!(mapped, Some(format!("{canonical}{suffix}")));
            }
        }
    }
}
