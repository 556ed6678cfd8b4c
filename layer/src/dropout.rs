use displaydoc::Display;
use ndarray::{Array, Dimension};
use rand::{Rng, RngCore};
use thiserror::Error;

use crate::activation::Selu;

/// Whether a forward pass runs for inference or as part of training.
///
/// Stochastic regularization (dropout) is only active during training and
/// draws its randomness from the given rng, inference is deterministic.
pub enum Mode<'a> {
    Inference,
    Training(&'a mut dyn RngCore),
}

/// Invalid dropout probability {0}, expected a value in [0, 1)
#[derive(Debug, Display, Error)]
pub struct InvalidProbability(pub f32);

fn validate(probability: f32) -> Result<f32, InvalidProbability> {
    if (0. ..1.).contains(&probability) {
        Ok(probability)
    } else {
        Err(InvalidProbability(probability))
    }
}

/// Inverted dropout.
///
/// During training each element is zeroed with the given probability and the
/// remaining ones are scaled by `1 / (1 - probability)`.
#[derive(Clone, Copy, Debug)]
pub struct Dropout {
    probability: f32,
}

impl Dropout {
    pub fn new(probability: f32) -> Result<Self, InvalidProbability> {
        validate(probability).map(|probability| Self { probability })
    }

    pub fn probability(&self) -> f32 {
        self.probability
    }

    pub fn apply<D>(&self, mut input: Array<f32, D>, mode: &mut Mode) -> Array<f32, D>
    where
        D: Dimension,
    {
        if let Mode::Training(rng) = mode {
            if self.probability > 0. {
                let keep = 1. - self.probability;
                input.mapv_inplace(|v| {
                    if rng.gen::<f32>() < keep {
                        v / keep
                    } else {
                        0.
                    }
                });
            }
        }
        input
    }
}

/// Alpha dropout, which keeps the self normalizing property of [`Selu`] activations.
///
/// Dropped elements are set to the negative saturation value of the SELU and the
/// result is affinely transformed to keep mean and variance.
#[derive(Clone, Copy, Debug)]
pub struct AlphaDropout {
    probability: f32,
}

impl AlphaDropout {
    const SATURATION: f32 = -Selu::SCALE * Selu::ALPHA;

    pub fn new(probability: f32) -> Result<Self, InvalidProbability> {
        validate(probability).map(|probability| Self { probability })
    }

    pub fn apply<D>(&self, mut input: Array<f32, D>, mode: &mut Mode) -> Array<f32, D>
    where
        D: Dimension,
    {
        if let Mode::Training(rng) = mode {
            if self.probability > 0. {
                let p = self.probability;
                let keep = 1. - p;
                let a = (keep * (1. + p * Self::SATURATION.powi(2))).sqrt().recip();
                let b = -a * Self::SATURATION * p;
                input.mapv_inplace(|v| {
                    let v = if rng.gen::<f32>() < keep {
                        v
                    } else {
                        Self::SATURATION
                    };
                    a * v + b
                });
            }
        }
        input
    }
}
