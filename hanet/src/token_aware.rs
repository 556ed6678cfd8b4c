//! Attention pooling with an additional token-filtered branch.

use log::trace;
use ndarray::{Array2, ArrayView2, ArrayView3};
use rand::Rng;

use crate::{
    attention::masked_softmax_batch_major,
    encoder::{weighted_sum, AttentionalBiRnn, Encoded},
};
use layer::{
    io::{BinParamsWithScope, LoadingLayerFailed},
    recurrent::{RecurrentCell, SequenceError},
    utils::IncompatibleMatrices,
};

/// The outputs of a [`TokenAwareBiRnn`].
#[derive(Clone, Debug)]
pub struct TokenAwarePool {
    /// The `(batch, 2 * hidden_size)` attention pooled vectors.
    pub pooled: Array2<f32>,
    /// The `(batch, 2 * hidden_size)` sums of the encoder outputs at the masked positions.
    pub token_sum: Array2<f32>,
    /// The `(batch, time)` attention weights.
    pub weights: Array2<f32>,
}

/// An [`AttentionalBiRnn`] which additionally sums up the encoder outputs at the positions
/// flagged by a token mask.
///
/// The mask only selects positions, it doesn't take part in the attention.
#[derive(Clone, Debug)]
pub struct TokenAwareBiRnn<C> {
    encoder: AttentionalBiRnn<C>,
}

impl<C> TokenAwareBiRnn<C>
where
    C: RecurrentCell,
{
    pub fn new(encoder: AttentionalBiRnn<C>) -> Self {
        Self { encoder }
    }

    pub fn new_with_random_weights<R>(rng: &mut R, input_size: usize, hidden_size: usize) -> Self
    where
        R: Rng + ?Sized,
    {
        Self::new(AttentionalBiRnn::new_with_random_weights(
            rng,
            input_size,
            hidden_size,
        ))
    }

    pub fn load(params: BinParamsWithScope<'_>) -> Result<Self, LoadingLayerFailed> {
        AttentionalBiRnn::load(params).map(Self::new)
    }

    pub fn store_params(self, params: BinParamsWithScope<'_>) {
        self.encoder.store_params(params);
    }

    pub fn input_size(&self) -> usize {
        self.encoder.input_size()
    }

    pub fn output_size(&self) -> usize {
        self.encoder.output_size()
    }

    /// Pools batch-major `(batch, time, features)` inputs.
    ///
    /// The `(batch, time)` token mask contains `1` at flagged and `0` at all other positions.
    pub fn pool(
        &self,
        inputs: ArrayView3<f32>,
        lengths: &[usize],
        token_mask: ArrayView2<f32>,
    ) -> Result<TokenAwarePool, SequenceError> {
        let (batch_size, max_length, _) = inputs.dim();
        if token_mask.dim() != (batch_size, max_length) {
            return Err(IncompatibleMatrices::new(
                "token_aware/inputs",
                inputs.raw_dim(),
                "token_aware/token_mask",
                token_mask.raw_dim(),
                "expected a mask value per position",
            )
            .into());
        }

        let Encoded { outputs, scores } = self.encoder.encode(inputs, lengths)?;
        let weights = masked_softmax_batch_major(scores.view(), lengths)?;
        let pooled = weighted_sum(outputs.view(), weights.view());
        let token_sum = weighted_sum(outputs.view(), token_mask);
        trace!(
            "token aware pooling over {} flagged positions",
            token_mask.iter().filter(|&&flag| flag != 0.).count()
        );

        Ok(TokenAwarePool {
            pooled,
            token_sum,
            weights,
        })
    }
}
