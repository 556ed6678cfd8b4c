//! Shared helpers for the tests of the workspace crates.

mod approx_eq;

pub use approx_eq::ApproxEqIter;
#[doc(hidden)]
pub use float_cmp::approx_eq;

use ndarray::{Array, Dimension, IntoDimension};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// The seed used by [`seeded_rng`].
pub const SEED: u64 = 0x5eed_ab1e;

/// Creates a deterministic rng, so that randomly initialized models are reproducible.
pub fn seeded_rng() -> StdRng {
    StdRng::seed_from_u64(SEED)
}

/// Creates an array of given shape filled with values uniformly sampled from `[-1; 1)`.
pub fn random_array<D>(rng: &mut impl Rng, shape: D) -> Array<f32, D::Dim>
where
    D: IntoDimension,
    D::Dim: Dimension,
{
    Array::from_shape_simple_fn(shape.into_dimension(), || rng.gen_range(-1.0..1.0))
}
