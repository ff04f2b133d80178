//! Tiny GPT-NeoX model directory fixtures.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use half::f16;
use neox_st2gguf::RawTensor;
use safetensors::tensor::TensorView;
use serde_json::{Value, json};

pub const BLOCKS: u32 = 1;
pub const HIDDEN: usize = 4;
pub const FFN: usize = 8;
pub const VOCAB: usize = 6;

pub fn config(architecture: &str) -> Value {
    json!({
        "architectures": [architecture],
        "num_hidden_layers": BLOCKS,
        "max_position_embeddings": 128,
        "hidden_size": HIDDEN,
        "intermediate_size": FFN,
        "num_attention_heads": 2,
        "rotary_pct": 0.5,
        "layer_norm_eps": 1e-5,
        "use_parallel_residual": true,
        "bos_token_id": 1,
        "eos_token_id": 2
    })
}

pub fn tokenizer() -> Value {
    json!({
        "version": "1.0",
        "added_tokens": [
            {"id": 0, "content": "<unk>", "special": true},
            {"id": 6, "content": "<|pad|>", "special": true}
        ],
        "model": {
            "type": "BPE",
            "vocab": {"<unk>": 0, "<s>": 1, "</s>": 2, "a": 3, "b": 4, "ab": 5},
            "merges": ["a b"]
        }
    })
}

fn write_json(path: &Path, value: &Value) {
    fs::write(path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
}

/// `config.json` + `tokenizer.json`, no shards.
pub fn write_model_dir(dir: &Path, architecture: &str) {
    write_json(&dir.join("config.json"), &config(architecture));
    write_json(&dir.join("tokenizer.json"), &tokenizer());
}

pub fn write_added_tokens(dir: &Path, added: Value) {
    write_json(&dir.join("added_tokens.json"), &added);
}

fn ramp(shape: &[usize]) -> RawTensor {
    let n: usize = shape.iter().product();
    let values: Vec<f32> = (0..n).map(|i| i as f32 * 0.25).collect();
    RawTensor::from_f32(shape.to_vec(), &values)
}

/// A full checkpoint for one block, plus two runtime buffers.
pub fn checkpoint_tensors() -> Vec<(String, RawTensor)> {
    let mut t = vec![
        ("gpt_neox.embed_in.weight".to_string(), ramp(&[VOCAB, HIDDEN])),
        ("gpt_neox.layers.0.input_layernorm.weight".into(), ramp(&[HIDDEN])),
        ("gpt_neox.layers.0.input_layernorm.bias".into(), ramp(&[HIDDEN])),
        ("gpt_neox.layers.0.attention.query_key_value.weight".into(), ramp(&[3 * HIDDEN, HIDDEN])),
        ("gpt_neox.layers.0.attention.query_key_value.bias".into(), ramp(&[3 * HIDDEN])),
        ("gpt_neox.layers.0.attention.dense.weight".into(), ramp(&[HIDDEN, HIDDEN])),
        ("gpt_neox.layers.0.post_attention_layernorm.weight".into(), ramp(&[HIDDEN])),
        ("gpt_neox.layers.0.mlp.dense_h_to_4h.weight".into(), ramp(&[FFN, HIDDEN])),
        ("gpt_neox.layers.0.mlp.dense_4h_to_h.weight".into(), ramp(&[HIDDEN, FFN])),
        ("gpt_neox.final_layer_norm.weight".into(), ramp(&[HIDDEN])),
        ("embed_out.weight".into(), ramp(&[VOCAB, HIDDEN])),
        ("gpt_neox.layers.0.attention.masked_bias".into(), ramp(&[1])),
        ("gpt_neox.layers.0.attention.rotary_emb.inv_freq".into(), ramp(&[1])),
    ];
    let halves = [f16::ONE; HIDDEN];
    t.push(("gpt_neox.final_layer_norm.bias".into(), RawTensor::from_f16(vec![HIDDEN], &halves)));
    t
}

/// Tensors that survive filtering.
pub const MAPPED_TENSORS: usize = 12;

pub fn write_safetensors(path: &Path, tensors: &[(String, RawTensor)]) {
    let views: Vec<(&str, TensorView<'_>)> = tensors
        .iter()
        .map(|(name, raw)| {
            (name.as_str(), TensorView::new(raw.dtype, raw.shape.clone(), &raw.data).unwrap())
        })
        .collect();
    let bytes = safetensors::serialize(views.iter().map(|(k, v)| (*k, v)), None).unwrap();
    fs::write(path, bytes).unwrap();
}

/// Names present in `dir`, sorted.
pub fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> =
        fs::read_dir(dir).unwrap().map(|e| e.unwrap().file_name().to_string_lossy().into_owned()).collect();
    names.sort();
    names
}
