pub mod acwan;
pub mod cwan;
pub mod han;

use displaydoc::Display;
use thiserror::Error;

use crate::{
    config::{Config, ConfigError, ModelKind},
    reorder::ReorderError,
};
use layer::{
    embedding::{Embedding, EmbeddingError},
    io::{BinParams, BinParamsWithScope, LoadingBinParamsFailed, LoadingLayerFailed},
    recurrent::SequenceError,
    utils::IncompatibleMatrices,
};

/// The potential errors of the models.
#[derive(Debug, Display, Error)]
pub enum ModelError {
    /// Invalid model configuration: {0}
    Config(#[from] ConfigError),

    /// The configuration is for a {got:?} model, expected {expected:?}
    Kind { got: ModelKind, expected: ModelKind },

    /// Failed to load the model parameters: {0}
    Loading(#[from] LoadingLayerFailed),

    /// Failed to read or write the model parameters: {0}
    Io(#[from] LoadingBinParamsFailed),

    /// Failed to embed the tokens: {0}
    Embedding(#[from] EmbeddingError),

    /// Failed to encode the sequences: {0}
    Sequence(#[from] SequenceError),

    /// Failed to reorder the encoded units: {0}
    Reorder(#[from] ReorderError),

    /// Invalid array shapes: {0}
    Shape(#[from] IncompatibleMatrices),

    /// Remaining parameters must be used: {0:?}
    UnusedParams(Vec<String>),
}

pub(crate) fn check_kind(config: &Config, expected: ModelKind) -> Result<(), ModelError> {
    if config.kind() == expected {
        Ok(())
    } else {
        Err(ModelError::Kind {
            got: config.kind(),
            expected,
        })
    }
}

pub(crate) fn check_unused(params: BinParams) -> Result<(), ModelError> {
    if params.is_empty() {
        Ok(())
    } else {
        Err(ModelError::UnusedParams(
            params.keys().map(Into::into).collect(),
        ))
    }
}

pub(crate) fn check_size(
    name: &'static str,
    got: usize,
    expected: usize,
) -> Result<(), IncompatibleMatrices> {
    if got == expected {
        Ok(())
    } else {
        Err(IncompatibleMatrices::new(
            name,
            [got],
            "expected",
            [expected],
            "the loaded layer doesn't match the configured sizes",
        ))
    }
}

/// Loads the embedding table and checks its width, the vocabulary may differ from the configuration.
pub(crate) fn load_embedding(
    params: BinParamsWithScope<'_>,
    config: &Config,
) -> Result<Embedding, ModelError> {
    let embedding = Embedding::load(params)?;
    if embedding.embedding_size() != config.embedding_size() {
        return Err(EmbeddingError::WidthMismatch {
            got: embedding.embedding_size(),
            expected: config.embedding_size(),
        }
        .into());
    }
    Ok(embedding)
}
