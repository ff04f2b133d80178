//! The artifact sink contract.

use crate::writer::{MetadataValue, TensorEntry};
use crate::{Result, TokenType};

/// Destination for a converted model.
///
/// Callers must use this order, each step at most once except where noted:
///
/// 1. [`set_architecture`](Self::set_architecture)
/// 2. [`add_metadata`](Self::add_metadata) (repeated)
/// 3. [`add_token_list`](Self::add_token_list), [`add_token_scores`](Self::add_token_scores),
///    [`add_token_types`](Self::add_token_types)
/// 4. optional special-token metadata through `add_metadata`
/// 5. [`add_tensor`](Self::add_tensor) (zero or more)
/// 6. [`write_header`](Self::write_header), [`write_metadata`](Self::write_metadata),
///    [`write_tensors`](Self::write_tensors) (skipped in vocab-only runs)
/// 7. [`close`](Self::close)
///
/// A sink dropped without `close` must not leave an artifact behind.
pub trait ArtifactSink {
    fn set_architecture(&mut self, name: &str) -> Result<()>;

    fn add_metadata(&mut self, key: &str, value: MetadataValue) -> Result<()>;

    fn add_token_list(&mut self, tokens: Vec<Vec<u8>>) -> Result<()>;

    fn add_token_scores(&mut self, scores: Vec<f32>) -> Result<()>;

    fn add_token_types(&mut self, types: Vec<TokenType>) -> Result<()>;

    fn add_tensor(&mut self, tensor: TensorEntry) -> Result<()>;

    fn write_header(&mut self) -> Result<()>;

    fn write_metadata(&mut self) -> Result<()>;

    fn write_tensors(&mut self) -> Result<()>;

    /// Flush and publish the artifact.
    fn close(&mut self) -> Result<()>;
}
