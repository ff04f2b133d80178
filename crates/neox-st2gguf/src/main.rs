//! GPT-NeoX to GGUF converter
//!
//! ```bash
//! # f16 (default), written to <model_dir>/ggml-model-f16.gguf
//! neox-st2gguf path/to/pythia-410m
//!
//! # f32 to an explicit path
//! neox-st2gguf path/to/pythia-410m 0 --outfile pythia-f32.gguf
//!
//! # tokenizer only
//! neox-st2gguf path/to/pythia-410m --vocab-only
//! ```
//!
//! Exit codes: 0 success, 1 bad input or I/O failure, 2 usage error (clap),
//! 3 unmappable tensor, 4 inconsistent vocabulary, 5 unsupported architecture.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use neox_gguf::GgufWriter;
use neox_st2gguf::exit::{EXIT_GENERIC_FAIL, EXIT_SUCCESS};
use neox_st2gguf::{ConvertError, ConvertOptions, FileType, SafeTensorsReader, convert};

/// Convert a GPT-NeoX model to a GGUF compatible file
#[derive(Parser, Debug)]
#[command(name = "neox-st2gguf")]
#[command(version)]
struct Args {
    /// Directory containing config.json, tokenizer.json and the model shards
    model: PathBuf,

    /// Output format: 0 for float32, 1 for float16
    #[arg(value_parser = clap::value_parser!(u8).range(0..=1), default_value_t = 1)]
    ftype: u8,

    /// Extract only the vocabulary
    #[arg(long)]
    vocab_only: bool,

    /// Path to write to; default: <model>/ggml-model-<f32|f16>.gguf
    #[arg(long)]
    outfile: Option<PathBuf>,
}

impl Args {
    fn options(&self) -> Result<ConvertOptions> {
        let file_type = FileType::from_code(self.ftype)
            .with_context(|| format!("invalid ftype {}", self.ftype))?;
        Ok(ConvertOptions {
            model_dir: self.model.clone(),
            file_type,
            vocab_only: self.vocab_only,
            outfile: self.outfile.clone(),
        })
    }
}

fn run(args: &Args) -> Result<()> {
    let options = args.options()?;
    let output = options.output_path();
    tracing::info!("Input: {}", options.model_dir.display());
    tracing::info!("Output: {}", output.display());

    let mut sink = GgufWriter::new(&output);
    let summary = convert(&options, &mut SafeTensorsReader, &mut sink)
        .with_context(|| format!("failed to convert {}", options.model_dir.display()))?;

    tracing::info!("gguf: model successfully exported to '{}'", summary.output.display());
    tracing::info!("  Vocabulary: {} tokens", summary.vocab_size);
    tracing::info!("  Tensors: {} from {} part(s)", summary.tensors, summary.shards);
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let code = match run(&args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            e.downcast_ref::<ConvertError>().map_or(EXIT_GENERIC_FAIL, ConvertError::exit_code)
        }
    };
    std::process::exit(code);
}
