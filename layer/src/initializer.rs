use ndarray::{Array2, Dimension, IntoDimension, Ix, Ix2};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal, Uniform};

/// Glorot-Uniform Initializer
///
/// Weights for layer `j` are sampled from a uniform distribution over
/// `[-√(6/(n_j+o_j)); √(6/(n_j+o_j))]`.
///
/// Where `n_j` is the number of input units of this layer.
/// This means for us `n_j` is the the number of rows of `W_j`.
/// And where `o_j` is the number of output units of this layer.
/// This means for us `o_j` is the the number of columns of `W_j`.
///
/// Source:
///
/// - Website: https://proceedings.mlr.press/v9/glorot10a.html
/// - Pdf: https://proceedings.mlr.press/v9/glorot10a/glorot10a.pdf
pub fn glorot_uniform_weights_init<R>(
    rng: &mut R,
    dim: impl IntoDimension<Dim = Ix2>,
) -> Array2<f32>
where
    R: Rng + ?Sized,
{
    let dim = dim.into_dimension();
    let in_plus_out: Ix = dim.slice().iter().sum();

    // Avoids problems with by-0 division.
    if in_plus_out == 0 {
        return Array2::zeros(dim);
    }

    let limit = (6.0 / in_plus_out as f32).sqrt();
    uniform_weights_init(rng, dim, limit)
}

/// Recurrent Cell Initializer
///
/// Weights of a recurrent cell with `hidden_size` units are sampled from a uniform
/// distribution over `[-1/√hidden_size; 1/√hidden_size]`.
pub fn recurrent_weights_init<R>(
    rng: &mut R,
    dim: impl IntoDimension<Dim = Ix2>,
    hidden_size: usize,
) -> Array2<f32>
where
    R: Rng + ?Sized,
{
    // Avoids problems with by-0 division.
    if hidden_size == 0 {
        return Array2::zeros(dim);
    }

    let limit = (hidden_size as f32).sqrt().recip();
    uniform_weights_init(rng, dim, limit)
}

/// Samples all weights uniformly from `[-limit; limit]`.
pub fn uniform_weights_init<R>(
    rng: &mut R,
    dim: impl IntoDimension<Dim = Ix2>,
    limit: f32,
) -> Array2<f32>
where
    R: Rng + ?Sized,
{
    let dist = Uniform::new_inclusive(-limit, limit);
    Array2::from_shape_simple_fn(dim, || dist.sample(rng))
}

/// Embedding Initializer
///
/// Samples from the standard normal distribution, except for the first
/// row which is reserved as padding row and set to zero.
pub fn embedding_weights_init<R>(
    rng: &mut R,
    vocab_size: usize,
    embedding_size: usize,
) -> Array2<f32>
where
    R: Rng + ?Sized,
{
    let mut weights =
        Array2::from_shape_simple_fn((vocab_size, embedding_size), || StandardNormal.sample(rng));
    if vocab_size > 0 {
        weights.row_mut(0).mapv_inplace(|_| 0.);
    }
    weights
}
