//! Conversion pipeline.
//!
//! Stages run strictly in order and every failure is terminal:
//!
//! 1. validate the input directory
//! 2. load `config.json` and check the architecture
//! 3. emit architecture metadata
//! 4. load tokenizer descriptors, build and emit the vocabulary
//! 5. emit merges and special-token ids
//! 6. unless vocab-only, stream shards and emit each mapped tensor
//! 7. finalize the sink
//!
//! The artifact is only published in step 7, so an abort leaves nothing under
//! the output name.

use std::path::{Path, PathBuf};

use neox_gguf::keys;
use neox_gguf::{ArtifactSink, MetadataValue, TensorDType, TensorEntry};
use safetensors::Dtype;

use crate::checkpoint::{CheckpointReader, ShardSequence, count_model_parts, shard_names};
use crate::dtype::{FileType, decide};
use crate::error::{ConvertError, Result};
use crate::hparams::{GGUF_ARCH, Hyperparameters};
use crate::names::{TensorNameMap, is_runtime_buffer};
use crate::special_vocab::SpecialVocab;
use crate::tensor::{RawTensor, squeeze, to_entry};
use crate::vocab::{AddedTokens, TokenizerDescriptor, Vocabulary};

pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const ADDED_TOKENS_FILE: &str = "added_tokens.json";
/// Tokenizer model name recorded in `tokenizer.ggml.model`.
pub const TOKENIZER_MODEL: &str = "gpt2";

/// What to convert and where to put it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertOptions {
    pub model_dir: PathBuf,
    pub file_type: FileType,
    pub vocab_only: bool,
    pub outfile: Option<PathBuf>,
}

impl ConvertOptions {
    pub fn new(model_dir: impl Into<PathBuf>, file_type: FileType) -> Self {
        Self { model_dir: model_dir.into(), file_type, vocab_only: false, outfile: None }
    }

    /// `--outfile`, or `<model_dir>/ggml-model-<f32|f16>.gguf`.
    pub fn output_path(&self) -> PathBuf {
        match &self.outfile {
            Some(path) => path.clone(),
            None => self.model_dir.join(format!("ggml-model-{}.gguf", self.file_type.as_str())),
        }
    }
}

/// State shared by the tensor stage once the vocabulary is settled.
#[derive(Debug)]
pub struct ConversionContext<'a> {
    pub options: &'a ConvertOptions,
    pub hparams: Hyperparameters,
    pub vocab: Vocabulary,
}

impl ConversionContext<'_> {
    /// Name map sized by the checkpoint's block count.
    pub fn tensor_names(&self) -> TensorNameMap {
        TensorNameMap::new(self.hparams.block_count())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionSummary {
    pub output: PathBuf,
    pub vocab_size: usize,
    pub shards: usize,
    pub tensors: usize,
}

/// Tokenizer inputs read from the model directory.
#[derive(Debug)]
pub struct VocabularyDescriptors {
    pub tokenizer: TokenizerDescriptor,
    pub added: Option<AddedTokens>,
}

impl VocabularyDescriptors {
    /// `tokenizer.json` is required; `added_tokens.json` is optional.
    pub fn load(dir: &Path) -> Result<Self> {
        let tokenizer_path = dir.join(TOKENIZER_FILE);
        if !tokenizer_path.is_file() {
            return Err(ConvertError::MissingRequiredFile(tokenizer_path));
        }
        let tokenizer = TokenizerDescriptor::load(&tokenizer_path)?;
        let added_path = dir.join(ADDED_TOKENS_FILE);
        let added = if added_path.is_file() { Some(AddedTokens::load(&added_path)?) } else { None };
        Ok(Self { tokenizer, added })
    }

    pub fn build_vocabulary(&self) -> Result<Vocabulary> {
        Vocabulary::build(&self.tokenizer.model.vocab, self.added.as_ref(), &self.tokenizer.added_tokens)
    }
}

pub fn validate_input_directory(dir: &Path) -> Result<()> {
    if dir.is_dir() { Ok(()) } else { Err(ConvertError::InputNotDirectory(dir.to_path_buf())) }
}

/// Directory name, resolving `.` and similar through the filesystem.
fn model_name(dir: &Path) -> String {
    dir.file_name()
        .map(ToOwned::to_owned)
        .or_else(|| dir.canonicalize().ok()?.file_name().map(ToOwned::to_owned))
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| GGUF_ARCH.to_string())
}

pub fn emit_metadata<S: ArtifactSink>(sink: &mut S, hparams: &Hyperparameters, name: &str) -> Result<()> {
    sink.set_architecture(GGUF_ARCH)?;
    sink.add_metadata(keys::GENERAL_NAME, MetadataValue::String(name.to_string()))?;
    for (key, value) in hparams.gguf_metadata()? {
        sink.add_metadata(&key, value)?;
    }
    sink.add_metadata(keys::TOKENIZER_MODEL, MetadataValue::String(TOKENIZER_MODEL.to_string()))?;
    Ok(())
}

pub fn emit_vocabulary<S: ArtifactSink>(sink: &mut S, vocab: &Vocabulary) -> Result<()> {
    let (texts, scores, types) = vocab.to_columns();
    sink.add_token_list(texts)?;
    sink.add_token_scores(scores)?;
    sink.add_token_types(types)?;
    Ok(())
}

pub fn emit_special_vocabulary<S: ArtifactSink>(sink: &mut S, special: &SpecialVocab) -> Result<()> {
    for (key, value) in special.gguf_metadata() {
        sink.add_metadata(&key, value)?;
    }
    Ok(())
}

/// Per-tensor progress line: native and canonical name, rank, dtype change.
pub fn describe_conversion(name: &str, canonical: &str, n_dims: usize, old: Dtype, new: TensorDType) -> String {
    format!("{name} -> {canonical}, n_dims = {n_dims}, {old:?} --> {new}")
}

/// Filter, map, and re-encode one checkpoint tensor.
///
/// `Ok(None)` for runtime buffers that are dropped; an unknown name aborts.
pub fn convert_tensor(
    names: &TensorNameMap,
    file_type: FileType,
    name: &str,
    raw: RawTensor,
) -> Result<Option<TensorEntry>> {
    if is_runtime_buffer(name) {
        tracing::debug!("skipping runtime buffer '{name}'");
        return Ok(None);
    }
    let canonical = names.map(name).ok_or_else(|| ConvertError::UnmappableTensor(name.to_string()))?;
    let n_dims = squeeze(&raw.shape).len();
    let old_dtype = raw.dtype;
    let new_dtype = decide(file_type, old_dtype, n_dims, name.ends_with(".weight"));
    tracing::info!("{}", describe_conversion(name, &canonical, n_dims, old_dtype, new_dtype));
    to_entry(canonical, raw, new_dtype).map(Some)
}

/// Stream every shard through [`convert_tensor`]. Returns (shards, tensors).
pub fn emit_tensors<R, S>(ctx: &ConversionContext<'_>, reader: &mut R, sink: &mut S) -> Result<(usize, usize)>
where
    R: CheckpointReader,
    S: ArtifactSink,
{
    let dir = &ctx.options.model_dir;
    let names = ctx.tensor_names();
    let parts = shard_names(count_model_parts(dir)?);
    let (mut shards, mut tensors) = (0, 0);

    for loaded in ShardSequence::new(reader, dir, parts) {
        let (part, shard) = loaded?;
        for (name, raw) in shard {
            if let Some(entry) = convert_tensor(&names, ctx.options.file_type, &name, raw)? {
                sink.add_tensor(entry)?;
                tensors += 1;
            }
        }
        tracing::debug!("released model part '{part}'");
        shards += 1;
    }
    Ok((shards, tensors))
}

pub fn finalize<S: ArtifactSink>(sink: &mut S, vocab_only: bool) -> Result<()> {
    sink.write_header()?;
    sink.write_metadata()?;
    if !vocab_only {
        sink.write_tensors()?;
    }
    sink.close()?;
    Ok(())
}

/// Run the whole pipeline against `reader` and `sink`.
pub fn convert<R, S>(options: &ConvertOptions, reader: &mut R, sink: &mut S) -> Result<ConversionSummary>
where
    R: CheckpointReader,
    S: ArtifactSink,
{
    let dir = options.model_dir.as_path();
    validate_input_directory(dir)?;

    let hparams = Hyperparameters::load(&dir.join(CONFIG_FILE))?;
    if let Err(err) = hparams.check_architecture() {
        tracing::error!("{err}");
        return Err(err);
    }
    let name = model_name(dir);
    tracing::info!("gguf: loading model {name}");
    emit_metadata(sink, &hparams, &name)?;

    tracing::info!("gguf: get tokenizer metadata");
    let descriptors = VocabularyDescriptors::load(dir)?;
    let vocab = descriptors.build_vocabulary()?;
    tracing::info!("{vocab}");
    emit_vocabulary(sink, &vocab)?;

    let special = SpecialVocab::load(dir, &descriptors.tokenizer, true)?;
    emit_special_vocabulary(sink, &special)?;

    let ctx = ConversionContext { options, hparams, vocab };

    let (shards, tensors) = if options.vocab_only {
        (0, 0)
    } else {
        tracing::info!("gguf: get tensor metadata");
        emit_tensors(&ctx, reader, sink)?
    };

    tracing::info!("gguf: writing {}", if options.vocab_only { "vocab only" } else { "model" });
    finalize(sink, options.vocab_only)?;

    Ok(ConversionSummary { output: options.output_path(), vocab_size: ctx.vocab.len(), shards, tensors })
}
