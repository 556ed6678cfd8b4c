use ndarray::{
    linalg::Dot,
    Array,
    Array1,
    Array2,
    Array3,
    ArrayBase,
    ArrayView1,
    ArrayView2,
    ArrayView3,
    Axis,
    Data,
    Dimension,
};
use rand::Rng;

use crate::{
    activation::ActivationFunction,
    initializer::glorot_uniform_weights_init,
    io::{BinParamsWithScope, LoadingLayerFailed},
    utils::IncompatibleMatrices,
};

/// A dense feed forward network layer.
///
/// This can be used for 1D, 2D and (time step wise) 3D inputs,
/// the last axis is always the feature axis.
#[derive(Clone, Debug)]
pub struct Dense<AF>
where
    AF: ActivationFunction<f32>,
{
    weights: Array2<f32>,
    bias: Array1<f32>,
    activation_function: AF,
}

impl<AF> Dense<AF>
where
    AF: ActivationFunction<f32>,
{
    pub fn new(
        weights: Array2<f32>,
        bias: Array1<f32>,
        activation_function: AF,
    ) -> Result<Self, IncompatibleMatrices> {
        if weights.shape()[1] == bias.shape()[0] {
            Ok(Self {
                weights,
                bias,
                activation_function,
            })
        } else {
            Err(IncompatibleMatrices::new(
                "Dense/weights",
                weights.raw_dim(),
                "Dense/bias",
                bias.raw_dim(),
                "expected weights[1] == bias[0] for broadcasting bias add",
            ))
        }
    }

    /// Creates a dense layer with Glorot-Uniform weights and a zero bias.
    pub fn new_with_random_weights<R>(
        rng: &mut R,
        input_size: usize,
        output_size: usize,
        activation_function: AF,
    ) -> Self
    where
        R: Rng + ?Sized,
    {
        Self {
            weights: glorot_uniform_weights_init(rng, (input_size, output_size)),
            bias: Array1::zeros(output_size),
            activation_function,
        }
    }

    /// Creates a dense layer whose weights and bias are drawn from `init`.
    ///
    /// `init` is called with the `(input_size, output_size)` shape of the weights first and
    /// then with the `(1, output_size)` shape of the bias.
    pub(crate) fn new_with_init(
        input_size: usize,
        output_size: usize,
        activation_function: AF,
        mut init: impl FnMut((usize, usize)) -> Array2<f32>,
    ) -> Self {
        let weights = init((input_size, output_size));
        let bias = init((1, output_size)).index_axis_move(Axis(0), 0);
        debug_assert_eq!(weights.dim(), (input_size, output_size));
        debug_assert_eq!(bias.len(), output_size);
        Self {
            weights,
            bias,
            activation_function,
        }
    }

    pub fn load(
        mut params: BinParamsWithScope,
        activation_function: AF,
    ) -> Result<Self, LoadingLayerFailed> {
        Self::new(
            params.take("weights")?,
            params.take("bias")?,
            activation_function,
        )
        .map_err(Into::into)
    }

    pub fn store_params(self, mut params: BinParamsWithScope) {
        params.insert("weights", self.weights);
        params.insert("bias", self.bias);
    }

    pub fn weights(&self) -> ArrayView2<f32> {
        self.weights.view()
    }

    pub fn bias(&self) -> ArrayView1<f32> {
        self.bias.view()
    }

    /// The number of input features.
    pub fn input_size(&self) -> usize {
        self.weights.shape()[0]
    }

    /// The number of output units.
    pub fn output_size(&self) -> usize {
        self.weights.shape()[1]
    }

    /// Checks that the layer maps `input_size` features to `output_size` units.
    pub fn check_sizes(
        &self,
        name: &'static str,
        input_size: usize,
        output_size: usize,
    ) -> Result<(), IncompatibleMatrices> {
        if self.weights.shape() == [input_size, output_size] {
            Ok(())
        } else {
            Err(IncompatibleMatrices::new(
                name,
                self.weights.raw_dim(),
                "expected",
                [input_size, output_size],
                "unexpected weight shape for the configured layer sizes",
            ))
        }
    }

    /// Applies the dense layer on the given inputs.
    pub fn run<S, D>(&self, input: ArrayBase<S, D>) -> Array<f32, D>
    where
        S: Data<Elem = f32>,
        D: Dimension,
        ArrayBase<S, D>: Dot<Array2<f32>, Output = Array<f32, D>>,
    {
        let mut out = input.dot(&self.weights);
        out += &self.bias;
        self.activation_function.apply_to(out)
    }

    /// Applies the dense layer on each `(batch, features)` slice of a 3D input.
    ///
    /// The middle axis is the one iterated over, i.e. both `(batch, time, features)`
    /// and `(time, batch, features)` layouts are supported by the caller choosing
    /// which axis it passes in the middle.
    pub fn run_3d(&self, input: ArrayView3<f32>) -> Array3<f32> {
        let (outer, inner, _) = input.dim();
        let mut output = Array3::zeros((outer, inner, self.output_size()));
        for (input, mut output) in input
            .axis_iter(Axis(1))
            .zip(output.axis_iter_mut(Axis(1)))
        {
            output.assign(&self.run(input));
        }
        output
    }
}
