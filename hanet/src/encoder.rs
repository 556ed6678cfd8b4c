//! Bidirectional recurrent encoders pooled by attention.

use log::trace;
use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayView3, Axis};
use rand::Rng;

use crate::attention::{masked_softmax_batch_major, masked_softmax_time_major};
use layer::{
    activation::Tanh,
    dense::Dense,
    initializer::glorot_uniform_weights_init,
    io::{BinParamsWithScope, LoadingLayerFailed},
    recurrent::{BiRnn, RecurrentCell, SequenceError},
    utils::IncompatibleMatrices,
};

/// The attention pooled vectors of a batch of sequences.
#[derive(Clone, Debug)]
pub struct AttentionPool {
    /// The `(batch, 2 * hidden_size)` pooled vectors.
    pub pooled: Array2<f32>,
    /// The attention weights, in the layout of the input (`(time, batch)` or `(batch, time)`).
    pub weights: Array2<f32>,
}

/// A bidirectional recurrent encoder, whose outputs are pooled by a learned attention.
///
/// ```ascii
/// h = BiRnn(x)                     (batch, time, 2 * hidden)
/// e = tanh(h·W_lin + b_lin)
/// a = masked_softmax(e·w_att, lengths)
/// pooled = Σ_t a_t * h_t
/// ```
///
/// The attention is computed from the projection `e`, but applied on the encoder outputs `h`.
/// The attention vector `w_att` has no bias, it is stored as a `(2 * hidden, 1)` matrix.
#[derive(Clone, Debug)]
pub struct AttentionalBiRnn<C> {
    rnn: BiRnn<C>,
    lin: Dense<Tanh>,
    att: Array1<f32>,
}

/// The outputs of a single encoder pass in batch-major layout.
pub(crate) struct Encoded {
    /// `(batch, time, 2 * hidden_size)`
    pub(crate) outputs: Array3<f32>,
    /// `(batch, time)`
    pub(crate) scores: Array2<f32>,
}

impl<C> AttentionalBiRnn<C>
where
    C: RecurrentCell,
{
    pub fn new_with_random_weights<R>(rng: &mut R, input_size: usize, hidden_size: usize) -> Self
    where
        R: Rng + ?Sized,
    {
        let output_size = 2 * hidden_size;
        Self {
            rnn: BiRnn::new_with_random_weights(rng, input_size, hidden_size),
            lin: Dense::new_with_random_weights(rng, output_size, output_size, Tanh),
            att: glorot_uniform_weights_init(rng, (output_size, 1)).index_axis_move(Axis(1), 0),
        }
    }

    pub fn load(mut params: BinParamsWithScope<'_>) -> Result<Self, LoadingLayerFailed> {
        let rnn = BiRnn::load(params.with_scope("rnn"))?;
        let lin = Dense::load(params.with_scope("lin"), Tanh)?;
        let att = params.with_scope("att").take::<Array2<f32>>("weights")?;

        let output_size = rnn.output_size();
        lin.check_sizes("attentional_birnn/lin", output_size, output_size)?;
        if att.shape() != [output_size, 1] {
            return Err(IncompatibleMatrices::new(
                "attentional_birnn/att",
                att.raw_dim(),
                "expected",
                [output_size, 1],
                "the attention vector must have one weight per encoder output",
            )
            .into());
        }
        let att = att.index_axis_move(Axis(1), 0);

        Ok(Self { rnn, lin, att })
    }

    pub fn store_params(self, mut params: BinParamsWithScope<'_>) {
        self.rnn.store_params(params.with_scope("rnn"));
        self.lin.store_params(params.with_scope("lin"));
        params
            .with_scope("att")
            .insert("weights", self.att.insert_axis(Axis(1)));
    }

    pub fn input_size(&self) -> usize {
        self.rnn.input_size()
    }

    /// The size of the pooled vectors, i.e. twice the hidden size.
    pub fn output_size(&self) -> usize {
        self.rnn.output_size()
    }

    /// Encodes `(batch, time, features)` inputs and computes the unnormalized attention scores.
    pub(crate) fn encode(
        &self,
        inputs: ArrayView3<f32>,
        lengths: &[usize],
    ) -> Result<Encoded, SequenceError> {
        let outputs = self.rnn.run(inputs, lengths)?;
        let projected = self.lin.run_3d(outputs.view());
        let scores = (&projected * &self.att).sum_axis(Axis(2));
        trace!(
            "encoded inputs {:?} into {:?}",
            inputs.shape(),
            outputs.shape()
        );
        Ok(Encoded { outputs, scores })
    }

    /// Pools batch-major `(batch, time, features)` inputs into `(batch, 2 * hidden_size)`.
    ///
    /// The weights have the shape `(batch, time)`.
    pub fn pool_batch_major(
        &self,
        inputs: ArrayView3<f32>,
        lengths: &[usize],
    ) -> Result<AttentionPool, SequenceError> {
        let Encoded { outputs, scores } = self.encode(inputs, lengths)?;
        let weights = masked_softmax_batch_major(scores.view(), lengths)?;
        let pooled = weighted_sum(outputs.view(), weights.view());
        Ok(AttentionPool { pooled, weights })
    }

    /// Pools time-major `(time, batch, features)` inputs into `(batch, 2 * hidden_size)`.
    ///
    /// The weights have the shape `(time, batch)`.
    pub fn pool_time_major(
        &self,
        inputs: ArrayView3<f32>,
        lengths: &[usize],
    ) -> Result<AttentionPool, SequenceError> {
        let Encoded { outputs, scores } = self.encode(inputs.permuted_axes([1, 0, 2]), lengths)?;
        let weights = masked_softmax_time_major(scores.t(), lengths)?;
        let pooled = weighted_sum(outputs.view(), weights.t());
        Ok(AttentionPool { pooled, weights })
    }
}

/// Sums the `(batch, time, features)` outputs over time weighted by the `(batch, time)` weights.
pub(crate) fn weighted_sum(outputs: ArrayView3<f32>, weights: ArrayView2<f32>) -> Array2<f32> {
    (&outputs * &weights.insert_axis(Axis(2))).sum_axis(Axis(1))
}
