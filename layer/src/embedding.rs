use displaydoc::Display;
use ndarray::{Array2, Array3, ArrayView2, Axis};
use rand::Rng;
use thiserror::Error;

use crate::{
    initializer::embedding_weights_init,
    io::{BinParamsWithScope, LoadingLayerFailed},
    utils::IncompatibleMatrices,
};

#[derive(Debug, Display, Error)]
pub enum EmbeddingError {
    /// Token index {index} is out of the vocabulary of size {vocab_size}
    OutOfVocabulary { index: usize, vocab_size: usize },
    /// Embedding width mismatch: got {got}, expected {expected}
    WidthMismatch { got: usize, expected: usize },
    /// The embedding table must at least contain the padding row
    MissingPaddingRow,
}

/// A token embedding table.
///
/// The token index `0` is reserved for padding. Its row is zero when created with random
/// weights, so padding tokens embed to the zero vector.
#[derive(Clone, Debug)]
pub struct Embedding {
    weights: Array2<f32>,
}

impl Embedding {
    /// The reserved index of the padding token.
    pub const PADDING_INDEX: usize = 0;

    pub fn new(weights: Array2<f32>) -> Result<Self, EmbeddingError> {
        if weights.nrows() > Self::PADDING_INDEX {
            Ok(Self { weights })
        } else {
            Err(EmbeddingError::MissingPaddingRow)
        }
    }

    pub fn new_with_random_weights<R>(rng: &mut R, vocab_size: usize, embedding_size: usize) -> Self
    where
        R: Rng + ?Sized,
    {
        Self {
            weights: embedding_weights_init(rng, vocab_size.max(1), embedding_size),
        }
    }

    pub fn load(mut params: BinParamsWithScope) -> Result<Self, LoadingLayerFailed> {
        let weights: Array2<f32> = params.take("weights")?;
        if weights.nrows() > Self::PADDING_INDEX {
            Ok(Self { weights })
        } else {
            Err(IncompatibleMatrices::new(
                "embedding/weights",
                weights.raw_dim(),
                "embedding/padding",
                [1, weights.ncols()],
                "the table must at least contain the padding row",
            )
            .into())
        }
    }

    pub fn store_params(self, mut params: BinParamsWithScope) {
        params.insert("weights", self.weights);
    }

    pub fn weights(&self) -> ArrayView2<f32> {
        self.weights.view()
    }

    pub fn vocab_size(&self) -> usize {
        self.weights.nrows()
    }

    pub fn embedding_size(&self) -> usize {
        self.weights.ncols()
    }

    /// Replaces the table, e.g. with pretrained embeddings.
    ///
    /// The vocabulary size may change but the embedding width must stay the same.
    pub fn set_weights(&mut self, weights: Array2<f32>) -> Result<(), EmbeddingError> {
        if weights.ncols() != self.embedding_size() {
            return Err(EmbeddingError::WidthMismatch {
                got: weights.ncols(),
                expected: self.embedding_size(),
            });
        }
        *self = Self::new(weights)?;
        Ok(())
    }

    /// Embeds a `(batch, tokens)` matrix of token indices into `(batch, tokens, embedding_size)`.
    pub fn run(&self, tokens: ArrayView2<usize>) -> Result<Array3<f32>, EmbeddingError> {
        let vocab_size = self.vocab_size();
        if let Some(&index) = tokens.iter().find(|&&index| index >= vocab_size) {
            return Err(EmbeddingError::OutOfVocabulary { index, vocab_size });
        }

        let (batch_size, nr_tokens) = tokens.dim();
        let mut output = Array3::zeros((batch_size, nr_tokens, self.embedding_size()));
        for (tokens, mut output) in tokens.outer_iter().zip(output.outer_iter_mut()) {
            for (&token, mut embedded) in tokens.iter().zip(output.axis_iter_mut(Axis(0))) {
                embedded.assign(&self.weights.row(token));
            }
        }
        Ok(output)
    }
}
