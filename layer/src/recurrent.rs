//! Recurrent cells and length aware (packed) sequence runners.
//!
//! Sequences are passed padded as `(batch, time, features)` together with their true
//! lengths. The runners reproduce the semantics of packed sequences: a sequence never
//! sees its padding, the backward direction starts at the last valid step of each
//! sequence and outputs at padding positions are zero.

use displaydoc::Display;
use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3, Axis};
use rand::Rng;
use thiserror::Error;

use crate::{
    activation::{sigmoid, Linear},
    dense::Dense,
    initializer::recurrent_weights_init,
    io::{BinParamsWithScope, LoadingLayerFailed},
    utils::{concat_last_axis, IncompatibleMatrices},
};

#[derive(Debug, Display, Error)]
pub enum InvalidLengths {
    /// Got {got} lengths for a batch of {batch_size} sequences
    Count { got: usize, batch_size: usize },
    /// Length {length} of sequence {index} exceeds the padded length {max_length}
    TooLong {
        index: usize,
        length: usize,
        max_length: usize,
    },
}

/// Checks that there is one length per sequence and that none exceeds the padded length.
pub fn validate_lengths(
    lengths: &[usize],
    batch_size: usize,
    max_length: usize,
) -> Result<(), InvalidLengths> {
    if lengths.len() != batch_size {
        return Err(InvalidLengths::Count {
            got: lengths.len(),
            batch_size,
        });
    }
    match lengths.iter().enumerate().find(|(_, &l)| l > max_length) {
        Some((index, &length)) => Err(InvalidLengths::TooLong {
            index,
            length,
            max_length,
        }),
        None => Ok(()),
    }
}

#[derive(Debug, Display, Error)]
pub enum SequenceError {
    /// {0}
    Lengths(#[from] InvalidLengths),
    /// {0}
    Shape(#[from] IncompatibleMatrices),
}

/// The state carried from one time step to the next.
pub trait RecurrentState: Sized {
    /// The initial all zero state.
    fn zeros(batch_size: usize, hidden_size: usize) -> Self;

    /// The `(batch, hidden)` output of the cell for this state.
    fn hidden(&self) -> ArrayView2<f32>;

    /// Resets all rows which are not `active` to the rows of `previous`.
    fn keep_inactive_rows(&mut self, previous: &Self, active: &[bool]);
}

impl RecurrentState for Array2<f32> {
    fn zeros(batch_size: usize, hidden_size: usize) -> Self {
        Array2::zeros((batch_size, hidden_size))
    }

    fn hidden(&self) -> ArrayView2<f32> {
        self.view()
    }

    fn keep_inactive_rows(&mut self, previous: &Self, active: &[bool]) {
        for (row, _) in active.iter().enumerate().filter(|(_, &active)| !active) {
            self.row_mut(row).assign(&previous.row(row));
        }
    }
}

/// A cell running a single gated recurrent step.
pub trait RecurrentCell: Sized {
    type State: RecurrentState;

    fn new_with_random_weights<R>(rng: &mut R, input_size: usize, hidden_size: usize) -> Self
    where
        R: Rng + ?Sized;

    fn load(params: BinParamsWithScope<'_>) -> Result<Self, LoadingLayerFailed>;

    fn store_params(self, params: BinParamsWithScope<'_>);

    fn input_size(&self) -> usize;

    fn hidden_size(&self) -> usize;

    /// Computes the next state from a `(batch, input_size)` input.
    fn step(&self, input: ArrayView2<f32>, state: &Self::State) -> Self::State;
}

/// Loads the input and hidden projections shared by the cells and checks their sizes.
fn load_projections(
    mut params: BinParamsWithScope<'_>,
    nr_gates: usize,
) -> Result<(Dense<Linear>, Dense<Linear>), LoadingLayerFailed> {
    let input = Dense::load(params.with_scope("input"), Linear)?;
    let hidden = Dense::load(params.with_scope("hidden"), Linear)?;
    let hidden_size = hidden.input_size();
    input.check_sizes("cell/input/weights", input.input_size(), nr_gates * hidden_size)?;
    hidden.check_sizes("cell/hidden/weights", hidden_size, nr_gates * hidden_size)?;
    Ok((input, hidden))
}

fn random_projections<R>(
    rng: &mut R,
    input_size: usize,
    hidden_size: usize,
    nr_gates: usize,
) -> (Dense<Linear>, Dense<Linear>)
where
    R: Rng + ?Sized,
{
    let mut projection = |rows| {
        Dense::new_with_init(rows, nr_gates * hidden_size, Linear, |dim| {
            recurrent_weights_init(&mut *rng, dim, hidden_size)
        })
    };
    let input = projection(input_size);
    let hidden = projection(hidden_size);
    (input, hidden)
}

/// The `(batch, size)` slice of the `idx`-th gate of stacked gate activations.
fn gate(gates: &Array2<f32>, idx: usize, size: usize) -> ArrayView2<'_, f32> {
    gates.slice(s![.., idx * size..(idx + 1) * size])
}

/// A gated recurrent unit.
///
/// With gates ordered as reset, update, new:
///
/// ```ascii
/// r = σ(x·W_ir + b_ir + h·W_hr + b_hr)
/// z = σ(x·W_iz + b_iz + h·W_hz + b_hz)
/// n = tanh(x·W_in + b_in + r ⊙ (h·W_hn + b_hn))
/// h' = (1 - z) ⊙ n + z ⊙ h
/// ```
#[derive(Clone, Debug)]
pub struct Gru {
    input: Dense<Linear>,
    hidden: Dense<Linear>,
}

impl RecurrentCell for Gru {
    type State = Array2<f32>;

    fn new_with_random_weights<R>(rng: &mut R, input_size: usize, hidden_size: usize) -> Self
    where
        R: Rng + ?Sized,
    {
        let (input, hidden) = random_projections(rng, input_size, hidden_size, 3);
        Self { input, hidden }
    }

    fn load(params: BinParamsWithScope<'_>) -> Result<Self, LoadingLayerFailed> {
        let (input, hidden) = load_projections(params, 3)?;
        Ok(Self { input, hidden })
    }

    fn store_params(self, mut params: BinParamsWithScope<'_>) {
        self.input.store_params(params.with_scope("input"));
        self.hidden.store_params(params.with_scope("hidden"));
    }

    fn input_size(&self) -> usize {
        self.input.input_size()
    }

    fn hidden_size(&self) -> usize {
        self.hidden.input_size()
    }

    fn step(&self, input: ArrayView2<f32>, state: &Array2<f32>) -> Array2<f32> {
        let size = self.hidden_size();
        let gates_input = self.input.run(input);
        let gates_hidden = self.hidden.run(state.view());

        let reset =
            (&gate(&gates_input, 0, size) + &gate(&gates_hidden, 0, size)).mapv_into(sigmoid);
        let update =
            (&gate(&gates_input, 1, size) + &gate(&gates_hidden, 1, size)).mapv_into(sigmoid);
        let new = (&gate(&gates_input, 2, size) + &(reset * &gate(&gates_hidden, 2, size)))
            .mapv_into(f32::tanh);

        // (1 - z) ⊙ n + z ⊙ h == n + z ⊙ (h - n)
        &new + &(update * &(state - &new))
    }
}

/// The state of a [`Lstm`] cell.
#[derive(Clone, Debug)]
pub struct LstmState {
    hidden: Array2<f32>,
    cell: Array2<f32>,
}

impl RecurrentState for LstmState {
    fn zeros(batch_size: usize, hidden_size: usize) -> Self {
        Self {
            hidden: Array2::zeros((batch_size, hidden_size)),
            cell: Array2::zeros((batch_size, hidden_size)),
        }
    }

    fn hidden(&self) -> ArrayView2<f32> {
        self.hidden.view()
    }

    fn keep_inactive_rows(&mut self, previous: &Self, active: &[bool]) {
        self.hidden.keep_inactive_rows(&previous.hidden, active);
        self.cell.keep_inactive_rows(&previous.cell, active);
    }
}

/// A long short-term memory cell.
///
/// With gates ordered as input, forget, cell, output:
///
/// ```ascii
/// i = σ(..), f = σ(..), g = tanh(..), o = σ(..)
/// c' = f ⊙ c + i ⊙ g
/// h' = o ⊙ tanh(c')
/// ```
#[derive(Clone, Debug)]
pub struct Lstm {
    input: Dense<Linear>,
    hidden: Dense<Linear>,
}

impl RecurrentCell for Lstm {
    type State = LstmState;

    fn new_with_random_weights<R>(rng: &mut R, input_size: usize, hidden_size: usize) -> Self
    where
        R: Rng + ?Sized,
    {
        let (input, hidden) = random_projections(rng, input_size, hidden_size, 4);
        Self { input, hidden }
    }

    fn load(params: BinParamsWithScope<'_>) -> Result<Self, LoadingLayerFailed> {
        let (input, hidden) = load_projections(params, 4)?;
        Ok(Self { input, hidden })
    }

    fn store_params(self, mut params: BinParamsWithScope<'_>) {
        self.input.store_params(params.with_scope("input"));
        self.hidden.store_params(params.with_scope("hidden"));
    }

    fn input_size(&self) -> usize {
        self.input.input_size()
    }

    fn hidden_size(&self) -> usize {
        self.hidden.input_size()
    }

    fn step(&self, input: ArrayView2<f32>, state: &LstmState) -> LstmState {
        let size = self.hidden_size();
        let gates = self.input.run(input) + self.hidden.run(state.hidden.view());

        let input_gate = gate(&gates, 0, size).mapv(sigmoid);
        let forget_gate = gate(&gates, 1, size).mapv(sigmoid);
        let cell_gate = gate(&gates, 2, size).mapv(f32::tanh);
        let output_gate = gate(&gates, 3, size).mapv(sigmoid);

        let cell = forget_gate * &state.cell + input_gate * &cell_gate;
        let hidden = output_gate * &cell.mapv(f32::tanh);
        LstmState { hidden, cell }
    }
}

/// Runs a cell over all sequences of a batch in lock step.
///
/// Steps at or beyond the length of a sequence neither change its state nor
/// produce an output (the output stays zero).
fn run_direction<C>(
    cell: &C,
    inputs: ArrayView3<f32>,
    lengths: &[usize],
    reverse: bool,
) -> Array3<f32>
where
    C: RecurrentCell,
{
    let (batch_size, max_length, _) = inputs.dim();
    let mut outputs = Array3::zeros((batch_size, max_length, cell.hidden_size()));
    let mut state = C::State::zeros(batch_size, cell.hidden_size());

    let steps: Box<dyn Iterator<Item = usize>> = if reverse {
        Box::new((0..max_length).rev())
    } else {
        Box::new(0..max_length)
    };
    for step in steps {
        let active = lengths
            .iter()
            .map(|&length| step < length)
            .collect::<Vec<_>>();
        if !active.contains(&true) {
            continue;
        }

        let mut next = cell.step(inputs.index_axis(Axis(1), step), &state);
        next.keep_inactive_rows(&state, &active);

        let mut output = outputs.index_axis_mut(Axis(1), step);
        for (row, _) in active.iter().enumerate().filter(|(_, &active)| active) {
            output.row_mut(row).assign(&next.hidden().row(row));
        }
        state = next;
    }

    outputs
}

fn check_run_inputs<C>(
    cell: &C,
    inputs: &ArrayView3<f32>,
    lengths: &[usize],
) -> Result<(), SequenceError>
where
    C: RecurrentCell,
{
    let (batch_size, max_length, features) = inputs.dim();
    validate_lengths(lengths, batch_size, max_length)?;
    if features != cell.input_size() {
        return Err(IncompatibleMatrices::new(
            "rnn/input",
            inputs.raw_dim(),
            "rnn/cell/input_size",
            [cell.input_size()],
            "the feature axis of the input must match the input size of the cell",
        )
        .into());
    }
    Ok(())
}

/// A unidirectional recurrent encoder.
#[derive(Clone, Debug)]
pub struct Rnn<C> {
    cell: C,
}

impl<C> Rnn<C>
where
    C: RecurrentCell,
{
    pub fn new(cell: C) -> Self {
        Self { cell }
    }

    pub fn new_with_random_weights<R>(rng: &mut R, input_size: usize, hidden_size: usize) -> Self
    where
        R: Rng + ?Sized,
    {
        Self::new(C::new_with_random_weights(rng, input_size, hidden_size))
    }

    pub fn load(mut params: BinParamsWithScope<'_>) -> Result<Self, LoadingLayerFailed> {
        C::load(params.with_scope("cell")).map(Self::new)
    }

    pub fn store_params(self, mut params: BinParamsWithScope<'_>) {
        self.cell.store_params(params.with_scope("cell"));
    }

    pub fn input_size(&self) -> usize {
        self.cell.input_size()
    }

    pub fn output_size(&self) -> usize {
        self.cell.hidden_size()
    }

    /// Encodes `(batch, time, input_size)` into `(batch, time, hidden_size)`.
    pub fn run(
        &self,
        inputs: ArrayView3<f32>,
        lengths: &[usize],
    ) -> Result<Array3<f32>, SequenceError> {
        check_run_inputs(&self.cell, &inputs, lengths)?;
        Ok(run_direction(&self.cell, inputs, lengths, false))
    }
}

/// A bidirectional recurrent encoder.
///
/// The output concatenates the forward and the backward hidden states,
/// it has twice the hidden size of the cells as feature size.
#[derive(Clone, Debug)]
pub struct BiRnn<C> {
    forward: C,
    backward: C,
}

impl<C> BiRnn<C>
where
    C: RecurrentCell,
{
    pub fn new(forward: C, backward: C) -> Result<Self, IncompatibleMatrices> {
        if (forward.input_size(), forward.hidden_size())
            == (backward.input_size(), backward.hidden_size())
        {
            Ok(Self { forward, backward })
        } else {
            Err(IncompatibleMatrices::new(
                "birnn/forward",
                [forward.input_size(), forward.hidden_size()],
                "birnn/backward",
                [backward.input_size(), backward.hidden_size()],
                "both directions must have the same input and hidden size",
            ))
        }
    }

    pub fn new_with_random_weights<R>(rng: &mut R, input_size: usize, hidden_size: usize) -> Self
    where
        R: Rng + ?Sized,
    {
        Self {
            forward: C::new_with_random_weights(rng, input_size, hidden_size),
            backward: C::new_with_random_weights(rng, input_size, hidden_size),
        }
    }

    pub fn load(mut params: BinParamsWithScope<'_>) -> Result<Self, LoadingLayerFailed> {
        let forward = C::load(params.with_scope("forward"))?;
        let backward = C::load(params.with_scope("backward"))?;
        Self::new(forward, backward).map_err(Into::into)
    }

    pub fn store_params(self, mut params: BinParamsWithScope<'_>) {
        self.forward.store_params(params.with_scope("forward"));
        self.backward.store_params(params.with_scope("backward"));
    }

    pub fn input_size(&self) -> usize {
        self.forward.input_size()
    }

    pub fn hidden_size(&self) -> usize {
        self.forward.hidden_size()
    }

    pub fn output_size(&self) -> usize {
        2 * self.hidden_size()
    }

    /// Encodes `(batch, time, input_size)` into `(batch, time, 2 * hidden_size)`.
    pub fn run(
        &self,
        inputs: ArrayView3<f32>,
        lengths: &[usize],
    ) -> Result<Array3<f32>, SequenceError> {
        check_run_inputs(&self.forward, &inputs, lengths)?;
        let forward = run_direction(&self.forward, inputs.view(), lengths, false);
        let backward = run_direction(&self.backward, inputs, lengths, true);
        concat_last_axis(forward.view(), backward.view()).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{arr1, arr2, Array1};

    use super::*;
    use crate::io::BinParams;
    use test_utils::{assert_approx_eq, random_array, seeded_rng};

    fn identity_gru() -> Gru {
        // 1 input, 1 hidden unit; the update gate is pinned shut (z = σ(-100) ≈ 0)
        // and the new gate is n = tanh(x), so h' ≈ tanh(x).
        let input = Dense::new(arr2(&[[0.0f32, 0., 1.]]), arr1(&[0., -100., 0.]), Linear).unwrap();
        let hidden = Dense::new(arr2(&[[0.0f32, 0., 0.]]), Array1::zeros(3), Linear).unwrap();
        Gru { input, hidden }
    }

    #[test]
    fn test_gru_step_follows_the_gate_equations() {
        let gru = identity_gru();
        let state = Array2::zeros((2, 1));
        let next = gru.step(arr2(&[[0.5f32], [-1.]]).view(), &state);
        assert_approx_eq!(f32, next, arr2(&[[0.5f32.tanh()], [(-1f32).tanh()]]), epsilon = 1e-6);
    }

    #[test]
    fn test_gru_keeps_state_with_open_update_gate() {
        let input = Dense::new(arr2(&[[0.0f32, 0., 1.]]), arr1(&[0., 100., 0.]), Linear).unwrap();
        let hidden = Dense::new(arr2(&[[0.0f32, 0., 0.]]), Array1::zeros(3), Linear).unwrap();
        let gru = Gru { input, hidden };
        let state = arr2(&[[0.25f32]]);
        let next = gru.step(arr2(&[[3.0f32]]).view(), &state);
        assert_approx_eq!(f32, next, state, epsilon = 1e-6);
    }

    #[test]
    fn test_lstm_step_shapes_and_bounds() {
        let mut rng = seeded_rng();
        let lstm = Lstm::new_with_random_weights(&mut rng, 3, 4);
        let inputs = random_array(&mut rng, (2, 3));
        let next = lstm.step(inputs.view(), &LstmState::zeros(2, 4));
        assert_eq!(next.hidden().shape(), [2, 4]);
        assert!(next.hidden().iter().all(|v| v.abs() < 1.));
    }

    #[test]
    fn test_padding_does_not_influence_outputs() {
        let mut rng = seeded_rng();
        let birnn = BiRnn::<Gru>::new_with_random_weights(&mut rng, 3, 2);
        let mut inputs = random_array(&mut rng, (2, 4, 3));
        let lengths = [4, 2];

        let outputs = birnn.run(inputs.view(), &lengths).unwrap();
        assert_eq!(outputs.shape(), [2, 4, 4]);
        assert!(outputs.slice(s![1, 2.., ..]).iter().all(|&v| v == 0.));

        inputs.slice_mut(s![1, 2.., ..]).mapv_inplace(|_| 100.);
        let changed = birnn.run(inputs.view(), &lengths).unwrap();
        assert_approx_eq!(f32, changed, outputs);
    }

    #[test]
    fn test_backward_direction_starts_at_last_valid_step() {
        let mut rng = seeded_rng();
        let birnn = BiRnn::<Gru>::new_with_random_weights(&mut rng, 3, 2);
        let inputs = random_array(&mut rng, (1, 4, 3));

        let padded = birnn.run(inputs.view(), &[2]).unwrap();
        let trimmed = birnn.run(inputs.slice(s![.., ..2, ..]), &[2]).unwrap();
        assert_approx_eq!(f32, padded.slice(s![.., ..2, ..]), trimmed);
    }

    #[test]
    fn test_run_validates_inputs() {
        let mut rng = seeded_rng();
        let rnn = Rnn::<Lstm>::new_with_random_weights(&mut rng, 3, 2);
        let inputs = random_array(&mut rng, (2, 4, 3));
        assert!(matches!(
            rnn.run(inputs.view(), &[4]),
            Err(SequenceError::Lengths(InvalidLengths::Count { .. }))
        ));
        assert!(matches!(
            rnn.run(inputs.view(), &[5, 1]),
            Err(SequenceError::Lengths(InvalidLengths::TooLong { index: 0, .. }))
        ));
        let inputs = random_array(&mut rng, (2, 4, 5));
        assert!(matches!(
            rnn.run(inputs.view(), &[4, 1]),
            Err(SequenceError::Shape(_))
        ));
    }

    #[test]
    fn test_zero_length_sequences_stay_zero() {
        let mut rng = seeded_rng();
        let rnn = Rnn::<Gru>::new_with_random_weights(&mut rng, 3, 2);
        let inputs = random_array(&mut rng, (2, 3, 3));
        let outputs = rnn.run(inputs.view(), &[0, 3]).unwrap();
        assert!(outputs.slice(s![0, .., ..]).iter().all(|&v| v == 0.));
    }

    #[test]
    fn test_random_cells_have_gate_sized_projections() {
        let mut rng = seeded_rng();
        let gru = Gru::new_with_random_weights(&mut rng, 5, 2);
        assert_eq!(gru.input.weights().shape(), [5, 6]);
        assert_eq!(gru.hidden.weights().shape(), [2, 6]);
        assert_eq!(gru.hidden.bias().len(), 6);

        let lstm = Lstm::new_with_random_weights(&mut rng, 5, 2);
        let mut params = BinParams::default();
        lstm.store_params(params.with_scope("cell"));
        let bias: Array1<f32> = params.take("cell/input/bias").unwrap();
        assert_eq!(bias.len(), 8);
        assert!(bias.iter().any(|&b| b != 0.));
    }

    #[test]
    fn test_store_and_load_birnn() {
        let mut rng = seeded_rng();
        let birnn = BiRnn::<Lstm>::new_with_random_weights(&mut rng, 3, 2);
        let inputs = random_array(&mut rng, (1, 2, 3));
        let expected = birnn.run(inputs.view(), &[2]).unwrap();

        let mut params = BinParams::default();
        birnn.store_params(params.with_scope("birnn"));
        let loaded = BiRnn::<Lstm>::load(params.with_scope("birnn")).unwrap();
        assert!(params.is_empty());
        assert_approx_eq!(f32, loaded.run(inputs.view(), &[2]).unwrap(), expected);
    }
}
