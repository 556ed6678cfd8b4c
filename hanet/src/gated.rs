//! A recurrence whose update gate is driven by attention scores.

use ndarray::{Array2, ArrayView1, ArrayView2, ArrayView3, Axis};
use rand::Rng;

use layer::{
    activation::{ActivationFunction, Linear, Relu, Sigmoid},
    dense::Dense,
    io::{BinParamsWithScope, LoadingLayerFailed},
    utils::{concat_last_axis, IncompatibleMatrices},
};

/// A GRU like recurrence, where the update amount of each step is the rectified
/// attention score of that step instead of a learned gate.
///
/// ```ascii
/// r = σ([x_t; h]·W_r + b_r)
/// c = tanh(x_t·W_x + b_x + (r ⊙ h)·W_h + b_h)
/// z = max(0, score_t)
/// h' = (1 - z) ⊙ h + z ⊙ c
/// ```
///
/// `z` is not bounded above, scores greater than one overshoot the candidate.
#[derive(Clone, Debug)]
pub struct AttentionGatedRecurrence {
    reset: Dense<Sigmoid>,
    input: Dense<Linear>,
    hidden: Dense<Linear>,
}

impl AttentionGatedRecurrence {
    pub fn new_with_random_weights<R>(rng: &mut R, input_size: usize, hidden_size: usize) -> Self
    where
        R: Rng + ?Sized,
    {
        Self {
            reset: Dense::new_with_random_weights(
                rng,
                input_size + hidden_size,
                hidden_size,
                Sigmoid,
            ),
            input: Dense::new_with_random_weights(rng, input_size, hidden_size, Linear),
            hidden: Dense::new_with_random_weights(rng, hidden_size, hidden_size, Linear),
        }
    }

    pub fn load(mut params: BinParamsWithScope<'_>) -> Result<Self, LoadingLayerFailed> {
        let reset = Dense::load(params.with_scope("reset"), Sigmoid)?;
        let input = Dense::load(params.with_scope("input"), Linear)?;
        let hidden = Dense::load(params.with_scope("hidden"), Linear)?;

        let (input_size, hidden_size) = (input.input_size(), hidden.input_size());
        reset.check_sizes("gated/reset", input_size + hidden_size, hidden_size)?;
        input.check_sizes("gated/input", input_size, hidden_size)?;
        hidden.check_sizes("gated/hidden", hidden_size, hidden_size)?;

        Ok(Self {
            reset,
            input,
            hidden,
        })
    }

    pub fn store_params(self, mut params: BinParamsWithScope<'_>) {
        self.reset.store_params(params.with_scope("reset"));
        self.input.store_params(params.with_scope("input"));
        self.hidden.store_params(params.with_scope("hidden"));
    }

    pub fn input_size(&self) -> usize {
        self.input.input_size()
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden.input_size()
    }

    /// Folds the `(batch, time, input_size)` inputs with the `(batch, time)` scores into the
    /// final `(batch, hidden_size)` state.
    ///
    /// All time steps are visited, padding must be excluded by zero scores.
    pub fn run(
        &self,
        inputs: ArrayView3<f32>,
        scores: ArrayView2<f32>,
    ) -> Result<Array2<f32>, IncompatibleMatrices> {
        let (batch_size, max_length, input_size) = inputs.dim();
        if scores.dim() != (batch_size, max_length) || input_size != self.input_size() {
            return Err(IncompatibleMatrices::new(
                "gated/inputs",
                inputs.raw_dim(),
                "gated/scores",
                scores.raw_dim(),
                "expected a score per position and inputs of the configured input size",
            ));
        }

        inputs
            .axis_iter(Axis(1))
            .zip(scores.axis_iter(Axis(1)))
            .try_fold(
                Array2::zeros((batch_size, self.hidden_size())),
                |state, (input, score)| self.step(input, score, state),
            )
    }

    fn step(
        &self,
        input: ArrayView2<f32>,
        score: ArrayView1<f32>,
        state: Array2<f32>,
    ) -> Result<Array2<f32>, IncompatibleMatrices> {
        let reset = self.reset.run(concat_last_axis(input.view(), state.view())?);
        let candidate = self.input.run(input) + self.hidden.run(reset * &state);
        let candidate = candidate.mapv_into(f32::tanh);
        let update = Relu.apply_to(score.to_owned()).insert_axis(Axis(1));
        let keep = update.mapv(|update| 1. - update);
        Ok(&keep * &state + &update * &candidate)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{arr2, Array3};

    use super::*;
    use layer::io::BinParams;
    use test_utils::{assert_approx_eq, random_array, seeded_rng};

    #[test]
    fn test_zero_scores_keep_zero_state() {
        let mut rng = seeded_rng();
        let recurrence = AttentionGatedRecurrence::new_with_random_weights(&mut rng, 4, 3);
        let inputs = random_array(&mut rng, (2, 5, 4));
        let state = recurrence
            .run(inputs.view(), Array2::zeros((2, 5)).view())
            .unwrap();
        assert_eq!(state, Array2::<f32>::zeros((2, 3)));
    }

    #[test]
    fn test_negative_scores_are_rectified() {
        let mut rng = seeded_rng();
        let recurrence = AttentionGatedRecurrence::new_with_random_weights(&mut rng, 4, 3);
        let inputs = random_array(&mut rng, (2, 5, 4));
        let state = recurrence
            .run(inputs.view(), Array2::from_elem((2, 5), -3.).view())
            .unwrap();
        assert!(state.iter().all(|&v| v == 0.));
    }

    #[test]
    fn test_unit_score_takes_the_candidate() {
        // with a zero state the reset gate has no effect and the candidate is
        // tanh(x·W_x + b_x + b_h)
        let mut rng = seeded_rng();
        let recurrence = AttentionGatedRecurrence::new_with_random_weights(&mut rng, 2, 2);
        let inputs = Array3::from_shape_vec((1, 1, 2), vec![0.5, -0.25]).unwrap();
        let state = recurrence
            .run(inputs.view(), arr2(&[[1.]]).view())
            .unwrap();

        let input = inputs.index_axis(Axis(1), 0);
        let expected = (recurrence.input.run(input)
            + recurrence.hidden.run(Array2::<f32>::zeros((1, 2))))
        .mapv_into(f32::tanh);
        assert_approx_eq!(f32, state, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_scores_above_one_overshoot() {
        let mut rng = seeded_rng();
        let recurrence = AttentionGatedRecurrence::new_with_random_weights(&mut rng, 2, 2);
        let inputs = random_array(&mut rng, (1, 1, 2));
        let once = recurrence.run(inputs.view(), arr2(&[[1.]]).view()).unwrap();
        let twice = recurrence.run(inputs.view(), arr2(&[[2.]]).view()).unwrap();
        assert_approx_eq!(f32, twice, once * 2., epsilon = 1e-6);
    }

    #[test]
    fn test_shapes_are_checked() {
        let mut rng = seeded_rng();
        let recurrence = AttentionGatedRecurrence::new_with_random_weights(&mut rng, 4, 3);
        let inputs = random_array(&mut rng, (2, 5, 4));
        assert!(recurrence
            .run(inputs.view(), Array2::zeros((2, 4)).view())
            .is_err());
        let inputs = random_array(&mut rng, (2, 5, 3));
        assert!(recurrence
            .run(inputs.view(), Array2::zeros((2, 5)).view())
            .is_err());
    }

    #[test]
    fn test_store_and_load() {
        let mut rng = seeded_rng();
        let recurrence = AttentionGatedRecurrence::new_with_random_weights(&mut rng, 4, 3);
        let inputs = random_array(&mut rng, (2, 5, 4));
        let scores = random_array(&mut rng, (2, 5));
        let expected = recurrence.run(inputs.view(), scores.view()).unwrap();

        let mut params = BinParams::default();
        recurrence.store_params(params.with_scope("gated"));
        let recurrence = AttentionGatedRecurrence::load(params.with_scope("gated")).unwrap();
        assert!(params.is_empty());
        assert_approx_eq!(f32, recurrence.run(inputs.view(), scores.view()).unwrap(), expected);
    }
}
