//! Attention weights over padded sequences.

use ndarray::{Array2, ArrayView2, ArrayView3, ArrayViewMut1, Axis};

use layer::{
    recurrent::{validate_lengths, InvalidLengths, SequenceError},
    utils::IncompatibleMatrices,
};

/// Added to the denominator of the masked softmax.
pub const SOFTMAX_EPSILON: f32 = 1e-4;

/// Lower bound for vector norms in the cosine attention.
const NORM_EPSILON: f32 = 1e-12;

/// Masked softmax over the `(time, batch)` scores of time-major sequences.
///
/// Each column `b` is normalized over its first `lengths[b]` positions, all other
/// positions are `0`. The lengths don't need to be sorted.
///
/// A sequence of length `0` gets all zero weights.
pub fn masked_softmax_time_major(
    scores: ArrayView2<f32>,
    lengths: &[usize],
) -> Result<Array2<f32>, InvalidLengths> {
    let (max_length, batch_size) = scores.dim();
    validate_lengths(lengths, batch_size, max_length)?;

    let mut weights = scores.to_owned();
    for (column, &length) in weights.axis_iter_mut(Axis(1)).zip(lengths) {
        masked_softmax(column, length);
    }
    Ok(weights)
}

/// Masked softmax over the `(batch, time)` scores of batch-major sequences.
///
/// Each row `b` is normalized over its first `lengths[b]` positions, all other
/// positions are `0`.
///
/// A sequence of length `0` gets all zero weights.
pub fn masked_softmax_batch_major(
    scores: ArrayView2<f32>,
    lengths: &[usize],
) -> Result<Array2<f32>, InvalidLengths> {
    let (batch_size, max_length) = scores.dim();
    validate_lengths(lengths, batch_size, max_length)?;

    let mut weights = scores.to_owned();
    for (row, &length) in weights.axis_iter_mut(Axis(0)).zip(lengths) {
        masked_softmax(row, length);
    }
    Ok(weights)
}

/// `exp(x) / (Σ exp(x) + ε)` over the first `length` positions.
///
/// There is no max subtraction, very negative scores can underflow to all zero weights.
fn masked_softmax(mut scores: ArrayViewMut1<f32>, length: usize) {
    for (position, score) in scores.iter_mut().enumerate() {
        *score = if position < length { score.exp() } else { 0. };
    }
    let sum = scores.sum() + SOFTMAX_EPSILON;
    scores.mapv_inplace(|score| score / sum);
}

/// Cosine similarity of each position of a `(batch, time, features)` sequence with the
/// `(batch, features)` query of its row.
///
/// The similarities are divided by the number of features and are `0` at positions
/// beyond the length of a row. They are scores, not a distribution.
pub fn cosine_query_attention(
    sequence: ArrayView3<f32>,
    query: ArrayView2<f32>,
    lengths: &[usize],
) -> Result<Array2<f32>, SequenceError> {
    let (batch_size, max_length, features) = sequence.dim();
    validate_lengths(lengths, batch_size, max_length)?;
    if query.dim() != (batch_size, features) {
        return Err(IncompatibleMatrices::new(
            "cosine_attention/sequence",
            sequence.raw_dim(),
            "cosine_attention/query",
            query.raw_dim(),
            "expected one query with the same features per sequence",
        )
        .into());
    }

    let scale = (features as f32).recip();
    let mut scores = Array2::zeros((batch_size, max_length));
    for (((sequence, query), &length), mut scores) in sequence
        .outer_iter()
        .zip(query.outer_iter())
        .zip(lengths)
        .zip(scores.outer_iter_mut())
    {
        let query_norm = query.dot(&query).sqrt().max(NORM_EPSILON);
        for (vector, score) in sequence.outer_iter().take(length).zip(scores.iter_mut()) {
            let vector_norm = vector.dot(&vector).sqrt().max(NORM_EPSILON);
            *score = vector.dot(&query) / (vector_norm * query_norm) * scale;
        }
    }
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use ndarray::{arr2, arr3, s};

    use super::*;
    use test_utils::{assert_approx_eq, random_array, seeded_rng};

    #[test]
    fn test_batch_major_weights_are_a_masked_distribution() {
        let mut rng = seeded_rng();
        let scores = random_array(&mut rng, (4, 6)) * 3.;
        let lengths = [6, 3, 1, 5];

        let weights = masked_softmax_batch_major(scores.view(), &lengths).unwrap();
        assert_eq!(weights.dim(), (4, 6));
        for (row, &length) in weights.outer_iter().zip(&lengths) {
            assert!(row.iter().all(|&w| w >= 0.));
            assert!(row.slice(s![length..]).iter().all(|&w| w == 0.));
            assert_approx_eq!(f32, row.slice(s![..length]).sum(), 1., epsilon = 1e-3);
        }
    }

    #[test]
    fn test_time_major_matches_batch_major() {
        let mut rng = seeded_rng();
        let scores = random_array(&mut rng, (5, 3));
        // unsorted lengths are fine
        let lengths = [2, 5, 4];

        let time_major = masked_softmax_time_major(scores.view(), &lengths).unwrap();
        let batch_major = masked_softmax_batch_major(scores.t(), &lengths).unwrap();
        assert_approx_eq!(f32, time_major.t(), batch_major);
        assert!(time_major.slice(s![2.., 0]).iter().all(|&w| w == 0.));
    }

    #[test]
    fn test_masked_softmax_values() {
        let scores = arr2(&[[0.0f32, 0., 100.], [1f32.ln(), 3f32.ln(), 0.]]);
        let weights = masked_softmax_batch_major(scores.view(), &[2, 2]).unwrap();
        let sum0 = 2. + SOFTMAX_EPSILON;
        let sum1 = 4. + SOFTMAX_EPSILON;
        assert_approx_eq!(
            f32,
            weights,
            arr2(&[[1. / sum0, 1. / sum0, 0.], [1. / sum1, 3. / sum1, 0.]]),
            epsilon = 1e-6,
        );
    }

    #[test]
    fn test_zero_length_gives_zero_weights() {
        let scores = arr2(&[[1.0f32, 2.], [3., 4.]]);
        let weights = masked_softmax_batch_major(scores.view(), &[0, 2]).unwrap();
        assert_eq!(weights.row(0).sum(), 0.);
    }

    #[test]
    fn test_invalid_lengths() {
        let scores = Array2::zeros((2, 3));
        assert!(matches!(
            masked_softmax_batch_major(scores.view(), &[1]),
            Err(InvalidLengths::Count {
                got: 1,
                batch_size: 2
            }),
        ));
        assert!(matches!(
            masked_softmax_time_major(scores.view(), &[1, 3, 2]),
            Err(InvalidLengths::TooLong {
                index: 1,
                length: 3,
                max_length: 2
            }),
        ));
    }

    #[test]
    fn test_cosine_attention_is_bounded_and_masked() {
        let mut rng = seeded_rng();
        let features = 4;
        let sequence = random_array(&mut rng, (3, 5, features));
        let query = random_array(&mut rng, (3, features));
        let lengths = [5, 2, 0];

        let scores = cosine_query_attention(sequence.view(), query.view(), &lengths).unwrap();
        assert_eq!(scores.dim(), (3, 5));
        let bound = 1. / features as f32 + 1e-6;
        assert!(scores.iter().all(|s| s.abs() <= bound));
        assert!(scores.slice(s![1, 2..]).iter().all(|&s| s == 0.));
        assert!(scores.row(2).iter().all(|&s| s == 0.));
    }

    #[test]
    fn test_cosine_attention_values() {
        let sequence = arr3(&[[[2.0f32, 0.], [0., 3.], [-1., 0.], [0., 0.]]]);
        let query = arr2(&[[5.0f32, 0.]]);
        let scores = cosine_query_attention(sequence.view(), query.view(), &[4]).unwrap();
        assert_approx_eq!(f32, scores, arr2(&[[0.5, 0., -0.5, 0.]]), epsilon = 1e-6);
    }

    #[test]
    fn test_cosine_attention_rejects_mismatched_query() {
        let sequence = Array2::zeros((2, 3)).insert_axis(Axis(2));
        let query = Array2::zeros((2, 2));
        assert!(matches!(
            cosine_query_attention(sequence.view(), query.view(), &[3, 3]),
            Err(SequenceError::Shape(_)),
        ));
    }
}
