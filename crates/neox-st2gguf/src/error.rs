//! Conversion error taxonomy.

use std::path::PathBuf;

use neox_gguf::GgufError;
use thiserror::Error;

use crate::exit;

/// Every failure is terminal for the run; nothing is retried.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("{} is not a directory", .0.display())]
    InputNotDirectory(PathBuf),

    #[error("missing required file {}", .0.display())]
    MissingRequiredFile(PathBuf),

    #[error("model architecture not supported: {0}")]
    UnsupportedArchitecture(String),

    #[error(
        "expected the {count} {kind} token ID(s) to be sequential in the range {start} - {end}; got {actual:?}",
        count = .actual.len(),
        end = range_end(.start, .actual)
    )]
    VocabConsistency { kind: &'static str, start: u32, actual: Vec<u32> },

    #[error("can not map tensor '{0}'")]
    UnmappableTensor(String),

    #[error("invalid hyperparameters: {0}")]
    InvalidHyperparameters(String),

    #[error("failed to parse {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to load checkpoint {}: {reason}", path.display())]
    Checkpoint { path: PathBuf, reason: String },

    /// A dtype added by a SafeTensors release newer than this decoder.
    #[error("cannot decode tensor dtype {0}")]
    UnsupportedDtype(String),

    #[error("artifact sink: {0}")]
    Sink(#[from] GgufError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn range_end(start: &u32, actual: &[u32]) -> i64 {
    i64::from(*start) + actual.len() as i64 - 1
}

impl ConvertError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::UnsupportedArchitecture(_) => exit::EXIT_UNSUPPORTED_ARCH,
            Self::UnmappableTensor(_) => exit::EXIT_STRICT_MAPPING,
            Self::VocabConsistency { .. } => exit::EXIT_VOCAB,
            _ => exit::EXIT_GENERIC_FAIL,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocab_error_names_expected_range() {
        let err = ConvertError::VocabConsistency { kind: "added", start: 100, actual: vec![100, 105] };
        assert_eq!(
            err.to_string(),
            "expected the 2 added token ID(s) to be sequential in the range 100 - 101; got [100, 105]"
        );
        assert_eq!(err.exit_code(), exit::EXIT_VOCAB);
    }

    #[test]
    fn messages_carry_the_offending_identifier() {
        let err = ConvertError::UnmappableTensor("gpt_neox.layers.9.foo.weight".into());
        assert!(err.to_string().contains("gpt_neox.layers.9.foo.weight"));
        assert_eq!(err.exit_code(), exit::EXIT_STRICT_MAPPING);

        let err = ConvertError::UnsupportedArchitecture("LlamaForCausalLM".into());
        assert!(err.to_string().contains("LlamaForCausalLM"));

        let err = ConvertError::MissingRequiredFile(PathBuf::from("/m/tokenizer.json"));
        assert!(err.to_string().contains("/m/tokenizer.json"));
        assert_eq!(err.exit_code(), exit::EXIT_GENERIC_FAIL);
    }
}
