use ndarray::{ArrayBase, DataMut, DataOwned, Dimension, NdFloat};

/// Trait representing a activation functions.
pub trait ActivationFunction<A> {
    /// Applies the activation function to given array.
    ///
    /// In most cases this will call `input.mapv_inplace` and
    /// apply some function element wise.
    fn apply_to<S, D>(&self, input: ArrayBase<S, D>) -> ArrayBase<S, D>
    where
        S: DataOwned<Elem = A> + DataMut<Elem = A>,
        D: Dimension;
}

/// Linear activation function.
///
/// Like common this is a identity function used
/// in cases where there no activation function is needed.
#[derive(Clone, Copy, Debug, Default)]
pub struct Linear;

impl<A> ActivationFunction<A> for Linear {
    fn apply_to<S, D>(&self, input: ArrayBase<S, D>) -> ArrayBase<S, D>
    where
        S: DataOwned<Elem = A> + DataMut<Elem = A>,
        D: Dimension,
    {
        input
    }
}

/// reLu activation function.
#[derive(Clone, Copy, Debug, Default)]
pub struct Relu;

impl<A> ActivationFunction<A> for Relu
where
    A: NdFloat,
{
    fn apply_to<S, D>(&self, mut input: ArrayBase<S, D>) -> ArrayBase<S, D>
    where
        S: DataOwned<Elem = A> + DataMut<Elem = A>,
        D: Dimension,
    {
        input.mapv_inplace(|v| A::max(A::zero(), v));
        input
    }
}

/// Hyperbolic tangent activation function.
#[derive(Clone, Copy, Debug, Default)]
pub struct Tanh;

impl<A> ActivationFunction<A> for Tanh
where
    A: NdFloat,
{
    fn apply_to<S, D>(&self, mut input: ArrayBase<S, D>) -> ArrayBase<S, D>
    where
        S: DataOwned<Elem = A> + DataMut<Elem = A>,
        D: Dimension,
    {
        input.mapv_inplace(A::tanh);
        input
    }
}

/// Logistic sigmoid activation function.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sigmoid;

impl<A> ActivationFunction<A> for Sigmoid
where
    A: NdFloat,
{
    fn apply_to<S, D>(&self, mut input: ArrayBase<S, D>) -> ArrayBase<S, D>
    where
        S: DataOwned<Elem = A> + DataMut<Elem = A>,
        D: Dimension,
    {
        input.mapv_inplace(sigmoid);
        input
    }
}

/// Scaled exponential linear unit.
///
/// Uses the constants from "Self-Normalizing Neural Networks" (Klambauer et al.),
/// which are also the ones [`AlphaDropout`](crate::dropout::AlphaDropout) is tuned for.
#[derive(Clone, Copy, Debug, Default)]
pub struct Selu;

impl Selu {
    pub const ALPHA: f32 = 1.673_263_2;
    pub const SCALE: f32 = 1.050_701;
}

impl ActivationFunction<f32> for Selu {
    fn apply_to<S, D>(&self, mut input: ArrayBase<S, D>) -> ArrayBase<S, D>
    where
        S: DataOwned<Elem = f32> + DataMut<Elem = f32>,
        D: Dimension,
    {
        input.mapv_inplace(|v| {
            if v > 0. {
                Self::SCALE * v
            } else {
                Self::SCALE * Self::ALPHA * v.exp_m1()
            }
        });
        input
    }
}

/// The logistic sigmoid `1 / (1 + e^-x)`.
#[inline]
pub fn sigmoid<A>(v: A) -> A
where
    A: NdFloat,
{
    A::one() / (A::one() + (-v).exp())
}

#[cfg(test)]
mod tests {
    use ndarray::{arr1, arr3};

    use super::*;
    use test_utils::assert_approx_eq;

    #[test]
    fn test_relu_activation_function_works() {
        let relu = Relu;
        let array = arr3(&[
            [[-1.0f32, 2.], [3.5, -4.0]],
            [[3.0, 2.4], [-3.0, -1.2]],
            [[-12.0, -2.0], [2.0, 12.0]],
        ]);
        let expected = arr3(&[
            [[0.0f32, 2.], [3.5, 0.0]],
            [[3.0, 2.4], [0.0, 0.0]],
            [[0.0, 0.0], [2.0, 12.0]],
        ]);
        let output = relu.apply_to(array);
        assert_approx_eq!(f32, output, expected);
    }

    #[test]
    fn test_linear_activation_function_works() {
        let linear = Linear;
        let array = arr3(&[
            [[-1.0f32, 2.], [3.5, -4.0]],
            [[3.0, 2.4], [-3.0, -1.2]],
        ]);
        let expected = array.clone();
        let output = linear.apply_to(array);
        assert_approx_eq!(f32, output, expected);
    }

    #[test]
    fn test_tanh_activation_function_works() {
        let output = Tanh.apply_to(arr1(&[0.0f32, 1., -2.]));
        assert_approx_eq!(f32, output, [0.0, 0.7615942, -0.9640276], epsilon = 1e-6);
    }

    #[test]
    fn test_sigmoid_activation_function_works() {
        let output = Sigmoid.apply_to(arr1(&[0.0f32, 2., -2.]));
        assert_approx_eq!(f32, output, [0.5, 0.8807971, 0.11920292], epsilon = 1e-6);
    }

    #[test]
    fn test_selu_activation_function_works() {
        let output = Selu.apply_to(arr1(&[0.0f32, 1., -1.]));
        assert_approx_eq!(f32, output, [0.0, 1.050701, -1.1113307], epsilon = 1e-6);
    }
}
