//! BPE vocabulary reconciliation.
//!
//! Merges the base vocabulary from `tokenizer.json` with added tokens (either
//! from `added_tokens.json` or the `added_tokens` listing embedded in
//! `tokenizer.json`) into one id-ordered table of `(text, score, type)`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use neox_gguf::TokenType;
use serde::Deserialize;

use crate::error::{ConvertError, Result};

/// Score given to every base-vocabulary token.
pub const BASE_TOKEN_SCORE: f32 = 0.0;
/// Score given to added tokens so they rank last.
pub const ADDED_TOKEN_SCORE: f32 = -1000.0;
/// Highest id eligible for the special-token heuristic in [`classify_base_token`].
pub const SPECIAL_TOKEN_MAX_ID: u32 = 258;

/// The parts of `tokenizer.json` the converter reads.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenizerDescriptor {
    pub model: TokenizerModel,
    #[serde(default)]
    pub added_tokens: Vec<EmbeddedAddedToken>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenizerModel {
    pub vocab: HashMap<String, u32>,
    #[serde(default)]
    pub merges: Vec<MergeRule>,
}

/// A merge rule, stored either as `"a b"` or as `["a", "b"]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MergeRule {
    Joined(String),
    Pair(String, String),
}

impl MergeRule {
    /// Space-joined form written to the artifact.
    pub fn to_joined(&self) -> String {
        match self {
            Self::Joined(s) => s.clone(),
            Self::Pair(a, b) => format!("{a} {b}"),
        }
    }
}

/// One entry of the `added_tokens` array in `tokenizer.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EmbeddedAddedToken {
    pub id: u32,
    pub content: String,
    #[serde(default)]
    pub special: bool,
}

impl TokenizerDescriptor {
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }

    /// Content → id for the embedded added tokens (later entries win).
    pub fn added_token_ids(&self) -> HashMap<&str, u32> {
        self.added_tokens.iter().map(|t| (t.content.as_str(), t.id)).collect()
    }
}

/// Explicit `added_tokens.json` mapping (token text → id). Trusted as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct AddedTokens(pub HashMap<String, u32>);

impl AddedTokens {
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }
}

pub(crate) fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    if !path.is_file() {
        return Err(ConvertError::MissingRequiredFile(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|source| ConvertError::Json { path: path.to_path_buf(), source })
}

/// One vocabulary entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub text: Vec<u8>,
    pub score: f32,
    pub kind: TokenType,
}

/// Id-ordered token table: position `i` holds the token with id `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    tokens: Vec<Token>,
    base_size: usize,
}

/// Classify a base token by id and text.
///
/// This is a convention-based approximation, not a tokenizer-aware
/// classifier: it assumes low ids are reserved for `<...>` special tokens
/// (`<unk>` at 0, control tokens at 1 and 2, `<0x..>` byte tokens after).
/// Any vocabulary laid out differently gets misclassified.
pub fn classify_base_token(id: u32, text: &[u8]) -> TokenType {
    let bracketed = text.starts_with(b"<") && text.ends_with(b">");
    if id > SPECIAL_TOKEN_MAX_ID || !bracketed {
        return TokenType::Normal;
    }
    match id {
        0 if text == b"<unk>" => TokenType::Unknown,
        1 | 2 => TokenType::Control,
        3.. if text.starts_with(b"<0x") => TokenType::Byte,
        _ => TokenType::Normal,
    }
}

/// Check that sorted `ids` are exactly `start..start + ids.len()`.
fn ensure_sequential(kind: &'static str, start: u32, mut ids: Vec<u32>) -> Result<Vec<u32>> {
    ids.sort_unstable();
    let sequential = ids.iter().enumerate().all(|(i, &id)| u64::from(id) == u64::from(start) + i as u64);
    if sequential {
        Ok(ids)
    } else {
        Err(ConvertError::VocabConsistency { kind, start, actual: ids })
    }
}

impl Vocabulary {
    /// Reconcile the base vocabulary with added tokens.
    ///
    /// When `added` is `None` the embedded listing is used instead, minus
    /// entries whose text already exists in `base`. Inputs are not modified.
    pub fn build(
        base: &HashMap<String, u32>,
        added: Option<&AddedTokens>,
        embedded: &[EmbeddedAddedToken],
    ) -> Result<Self> {
        let base_ids = ensure_sequential("base", 0, base.values().copied().collect())?;
        let base_size = base_ids.len();
        let base_size_u32 = u32::try_from(base_size).map_err(|_| {
            ConvertError::InvalidHyperparameters(format!("vocabulary too large: {base_size}"))
        })?;

        let added: HashMap<&str, u32> = match added {
            Some(explicit) => explicit.0.iter().map(|(t, &id)| (t.as_str(), id)).collect(),
            None => embedded
                .iter()
                .filter(|t| !base.contains_key(&t.content))
                .map(|t| (t.content.as_str(), t.id))
                .collect(),
        };
        ensure_sequential("added", base_size_u32, added.values().copied().collect())?;

        let mut ordered: Vec<(&str, u32)> = base.iter().map(|(t, &id)| (t.as_str(), id)).collect();
        ordered.sort_unstable_by_key(|&(_, id)| id);

        let mut tokens: Vec<Token> = ordered
            .into_iter()
            .map(|(text, id)| Token {
                text: text.as_bytes().to_vec(),
                score: BASE_TOKEN_SCORE,
                kind: classify_base_token(id, text.as_bytes()),
            })
            .collect();

        let mut added_items: Vec<(&str, u32)> = added.into_iter().collect();
        added_items.sort_unstable_by_key(|&(_, id)| id);
        tokens.extend(added_items.into_iter().map(|(text, _)| Token {
            text: text.as_bytes().to_vec(),
            score: ADDED_TOKEN_SCORE,
            kind: TokenType::UserDefined,
        }));

        tracing::debug!(base = base_size, added = tokens.len() - base_size, "built vocabulary");
        Ok(Self { tokens, base_size })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn base_size(&self) -> usize {
        self.base_size
    }

    pub fn added_count(&self) -> usize {
        self.tokens.len() - self.base_size
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Split into the three aligned arrays the sink expects.
    pub fn to_columns(&self) -> (Vec<Vec<u8>>, Vec<f32>, Vec<TokenType>) {
        let texts = self.tokens.iter().map(|t| t.text.clone()).collect();
        let scores = self.tokens.iter().map(|t| t.score).collect();
        let kinds = self.tokens.iter().map(|t| t.kind).collect();
        (texts, scores, kinds)
    }
}

impl std::fmt::Display for Vocabulary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "BPE vocabulary with {} base tokens and {} added tokens",
            self.base_size,
            self.added_count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_vocab(n: u32) -> HashMap<String, u32> {
        (0..n).map(|i| (format!("tok{i}"), i)).collect()
    }

    fn added(pairs: &[(&str, u32)]) -> AddedTokens {
        AddedTokens(pairs.iter().map(|&(t, id)| (t.to_string(), id)).collect())
    }

    #[test]
    fn base_only_vocabulary() {
        let vocab = Vocabulary::build(&base_vocab(50), None, &[]).unwrap();
        assert_eq!(vocab.len(), 50);
        assert_eq!(vocab.added_count(), 0);
        assert!(vocab.tokens().iter().all(|t| t.score == 0.0));
        assert!(vocab.tokens().iter().all(|t| t.kind == TokenType::Normal));
    }

    #[test]
    fn explicit_added_tokens_are_appended() {
        let vocab =
            Vocabulary::build(&base_vocab(100), Some(&added(&[("<sep>", 101), ("<pad>", 100)])), &[])
                .unwrap();
        assert_eq!(vocab.len(), 102);
        assert_eq!(vocab.tokens()[100].text, b"<pad>");
        assert_eq!(vocab.tokens()[101].text, b"<sep>");
        for t in &vocab.tokens()[100..] {
            assert_eq!(t.score, ADDED_TOKEN_SCORE);
            assert_eq!(t.kind, TokenType::UserDefined);
        }
    }

    #[test]
    fn gap_in_added_ids_is_rejected() {
        let err = Vocabulary::build(&base_vocab(100), Some(&added(&[("<pad>", 100), ("<sep>", 105)])), &[])
            .unwrap_err();
        match &err {
            ConvertError::VocabConsistency { kind, start, actual } => {
                assert_eq!(*kind, "added");
                assert_eq!(*start, 100);
                assert_eq!(actual, &vec![100, 105]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("range 100 - 101"));
    }

    #[test]
    fn overlapping_added_ids_are_rejected() {
        let res = Vocabulary::build(&base_vocab(10), Some(&added(&[("<a>", 10), ("<b>", 10)])), &[]);
        assert!(matches!(res, Err(ConvertError::VocabConsistency { .. })));
    }

    #[test]
    fn embedded_tokens_colliding_with_base_are_dropped() {
        let mut base = base_vocab(3);
        base.insert("<|endoftext|>".into(), 3);
        let embedded = vec![
            EmbeddedAddedToken { id: 3, content: "<|endoftext|>".into(), special: true },
            EmbeddedAddedToken { id: 4, content: "<|pad|>".into(), special: true },
        ];
        let vocab = Vocabulary::build(&base, None, &embedded).unwrap();
        assert_eq!(vocab.base_size(), 4);
        assert_eq!(vocab.added_count(), 1);
        assert_eq!(vocab.tokens()[4].text, b"<|pad|>");
    }

    #[test]
    fn explicit_file_is_not_filtered_against_base() {
        // Duplicated text is trusted when it comes from added_tokens.json.
        let vocab = Vocabulary::build(&base_vocab(2), Some(&added(&[("tok0", 2)])), &[]).unwrap();
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.tokens()[2].text, b"tok0");
    }

    #[test]
    fn explicit_file_shadows_embedded_listing() {
        let embedded = vec![EmbeddedAddedToken { id: 2, content: "<x>".into(), special: false }];
        let vocab = Vocabulary::build(&base_vocab(2), Some(&AddedTokens::default()), &embedded).unwrap();
        assert_eq!(vocab.len(), 2);
    }

    #[test]
    fn base_tokens_follow_id_order() {
        let base: HashMap<String, u32> =
            [("c", 2), ("a", 0), ("b", 1)].into_iter().map(|(t, i)| (t.to_string(), i)).collect();
        let vocab = Vocabulary::build(&base, None, &[]).unwrap();
        let texts: Vec<&[u8]> = vocab.tokens().iter().map(|t| t.text.as_slice()).collect();
        assert_eq!(texts, [b"a".as_slice(), b"b".as_slice(), b"c".as_slice()]);
    }

    #[test]
    fn base_ids_with_gap_are_rejected() {
        let base: HashMap<String, u32> =
            [("a", 0), ("b", 2)].into_iter().map(|(t, i)| (t.to_string(), i)).collect();
        let err = Vocabulary::build(&base, None, &[]).unwrap_err();
        assert!(matches!(err, ConvertError::VocabConsistency { kind: "base", start: 0, .. }));
    }

    #[test]
    fn classification_heuristic() {
        assert_eq!(classify_base_token(0, b"<unk>"), TokenType::Unknown);
        assert_eq!(classify_base_token(0, b"<s>"), TokenType::Normal);
        assert_eq!(classify_base_token(1, b"<s>"), TokenType::Control);
        assert_eq!(classify_base_token(2, b"</s>"), TokenType::Control);
        assert_eq!(classify_base_token(3, b"<0x00>"), TokenType::Byte);
        assert_eq!(classify_base_token(258, b"<0xFF>"), TokenType::Byte);
        assert_eq!(classify_base_token(259, b"<0xFF>"), TokenType::Normal);
        assert_eq!(classify_base_token(5, b"<mask>"), TokenType::Normal);
        assert_eq!(classify_base_token(1, b"s"), TokenType::Normal);
        assert_eq!(classify_base_token(0, b"<unk"), TokenType::Normal);
    }

    #[test]
    fn merge_rules_accept_both_encodings() {
        let rules: Vec<MergeRule> = serde_json::from_str(r#"["a b", ["c", "d"]]"#).unwrap();
        let joined: Vec<String> = rules.iter().map(MergeRule::to_joined).collect();
        assert_eq!(joined, ["a b", "c d"]);
    }

    #[test]
    fn display_summarizes_counts() {
        let vocab = Vocabulary::build(&base_vocab(4), Some(&added(&[("<x>", 4)])), &[]).unwrap();
        assert_eq!(vocab.to_string(), "BPE vocabulary with 4 base tokens and 1 added tokens");
    }
}
