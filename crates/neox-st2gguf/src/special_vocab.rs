//! Merge rules and special-token ids.
//!
//! Special ids come from `tokenizer_config.json` (`bos_token`, ... resolved
//! through the embedded `added_tokens` of `tokenizer.json`), and any still
//! missing are filled from `<kind>_token_id` in `config.json`.

use std::path::Path;

use neox_gguf::MetadataValue;
use neox_gguf::keys;
use serde_json::Value as Json;

use crate::error::Result;
use crate::vocab::{TokenizerDescriptor, read_json};

/// Special token kinds, in the order they are emitted.
pub const SPECIAL_TOKEN_TYPES: [&str; 5] = ["bos", "eos", "unk", "sep", "pad"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecialVocab {
    pub merges: Vec<String>,
    pub special_token_ids: Vec<(&'static str, u32)>,
    pub add_bos: Option<bool>,
    pub add_eos: Option<bool>,
}

fn optional_json(path: &Path) -> Result<Option<Json>> {
    if path.is_file() { read_json(path).map(Some) } else { Ok(None) }
}

/// `"<s>"` or `{"content": "<s>", ...}`.
fn token_content(entry: &Json) -> Option<&str> {
    match entry {
        Json::String(s) => Some(s),
        Json::Object(obj) => obj.get("content").and_then(Json::as_str),
        _ => None,
    }
}

impl SpecialVocab {
    /// Read `tokenizer_config.json` and `config.json` (both optional) from `dir`.
    pub fn load(dir: &Path, tokenizer: &TokenizerDescriptor, load_merges: bool) -> Result<Self> {
        let tokenizer_config = optional_json(&dir.join("tokenizer_config.json"))?;
        let config = optional_json(&dir.join("config.json"))?;
        Ok(Self::from_parts(tokenizer, tokenizer_config.as_ref(), config.as_ref(), load_merges))
    }

    pub fn from_parts(
        tokenizer: &TokenizerDescriptor,
        tokenizer_config: Option<&Json>,
        config: Option<&Json>,
        load_merges: bool,
    ) -> Self {
        let mut sv = Self::default();

        if load_merges {
            sv.merges = tokenizer.model.merges.iter().map(|m| m.to_joined()).collect();
        }

        let added = tokenizer.added_token_ids();
        for kind in SPECIAL_TOKEN_TYPES {
            let from_tokenizer = tokenizer_config
                .and_then(|tc| tc.get(format!("{kind}_token")))
                .and_then(token_content)
                .and_then(|content| added.get(content).copied());
            let from_config = || {
                config
                    .and_then(|c| c.get(format!("{kind}_token_id")))
                    .and_then(Json::as_u64)
                    .and_then(|id| u32::try_from(id).ok())
            };
            if let Some(id) = from_tokenizer.or_else(from_config) {
                sv.special_token_ids.push((kind, id));
            }
        }

        if let Some(tc) = tokenizer_config {
            sv.add_bos = tc.get("add_bos_token").and_then(Json::as_bool);
            sv.add_eos = tc.get("add_eos_token").and_then(Json::as_bool);
        }

        sv
    }

    pub fn id_of(&self, kind: &str) -> Option<u32> {
        self.special_token_ids.iter().find(|(k, _)| *k == kind).map(|&(_, id)| id)
    }

    /// Metadata entries for the sink; empty parts are skipped.
    pub fn gguf_metadata(&self) -> Vec<(String, MetadataValue)> {
        let mut out = Vec::new();
        if !self.merges.is_empty() {
            let merges = self.merges.iter().map(|m| m.as_bytes().to_vec()).collect();
            out.push((keys::TOKENIZER_MERGES.to_string(), MetadataValue::StringArray(merges)));
        }
        for &(kind, id) in &self.special_token_ids {
            out.push((keys::special_token_id_key(kind), MetadataValue::U32(id)));
        }
        if let Some(add_bos) = self.add_bos {
            out.push((keys::TOKENIZER_ADD_BOS.to_string(), MetadataValue::Bool(add_bos)));
        }
        if let Some(add_eos) = self.add_eos {
            out.push((keys::TOKENIZER_ADD_EOS.to_string(), MetadataValue::Bool(add_eos)));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tokenizer() -> TokenizerDescriptor {
        serde_json::from_value(json!({
            "model": {
                "vocab": {"a": 0, "b": 1, "ab": 2},
                "merges": ["a b"]
            },
            "added_tokens": [
                {"id": 0, "content": "<|endoftext|>", "special": true},
                {"id": 1, "content": "<|padding|>", "special": true}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn resolves_ids_through_added_tokens() {
        let tc = json!({
            "bos_token": "<|endoftext|>",
            "eos_token": {"content": "<|endoftext|>", "lstrip": false},
            "unk_token": "<|missing|>",
            "add_bos_token": false
        });
        let sv = SpecialVocab::from_parts(&tokenizer(), Some(&tc), None, true);
        assert_eq!(sv.merges, ["a b"]);
        assert_eq!(sv.id_of("bos"), Some(0));
        assert_eq!(sv.id_of("eos"), Some(0));
        assert_eq!(sv.id_of("unk"), None);
        assert_eq!(sv.add_bos, Some(false));
        assert_eq!(sv.add_eos, None);
    }

    #[test]
    fn config_fills_missing_ids() {
        let tc = json!({"eos_token": "<|endoftext|>"});
        let config = json!({"bos_token_id": 0, "eos_token_id": 7, "pad_token_id": -1});
        let sv = SpecialVocab::from_parts(&tokenizer(), Some(&tc), Some(&config), false);
        assert!(sv.merges.is_empty());
        assert_eq!(sv.id_of("bos"), Some(0));
        // tokenizer_config wins over config.json
        assert_eq!(sv.id_of("eos"), Some(0));
        // negative ids are ignored
        assert_eq!(sv.id_of("pad"), None);
    }

    #[test]
    fn metadata_keys() {
        let tc = json!({"bos_token": "<|endoftext|>", "pad_token": "<|padding|>", "add_eos_token": true});
        let sv = SpecialVocab::from_parts(&tokenizer(), Some(&tc), None, true);
        let md = sv.gguf_metadata();
        let keys: Vec<&str> = md.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            [
                "tokenizer.ggml.merges",
                "tokenizer.ggml.bos_token_id",
                "tokenizer.ggml.pad_token_id",
                "tokenizer.ggml.add_eos_token",
            ]
        );
        assert_eq!(md[2].1, MetadataValue::U32(1));
    }

    #[test]
    fn nothing_to_add() {
        let sv = SpecialVocab::from_parts(&tokenizer(), None, None, false);
        assert!(sv.gguf_metadata().is_empty());
    }
}
