//! Regrouping of flattened units (sentences, words) into ordered per-document sequences.

use displaydoc::Display;
use log::error;
use ndarray::{
    concatenate,
    Array1,
    Array2,
    Array3,
    ArrayView1,
    ArrayView2,
    ArrayView3,
    Axis,
    ShapeError,
};
use thiserror::Error;

#[derive(Debug, Display, Error)]
pub enum ReorderError {
    /// Order index {index} at slot {slot:?} is out of bounds for a source of shape {source_shape:?} reordered by an order of shape {order_shape:?}
    IndexOutOfBounds {
        index: usize,
        slot: (usize, usize),
        source_shape: Vec<usize>,
        order_shape: (usize, usize),
    },
    /// Document {document} has an empty slot {slot} followed by a non empty one
    GappedOrder { document: usize, slot: usize },
    /// Invalid reordered shape: {0}
    Shape(#[from] ShapeError),
}

/// The order of flattened units per document.
///
/// Slot `(d, s)` refers to the unit at the 1-based row `order[d, s]` of the flattened source,
/// the reserved index [`UnitOrder::EMPTY`] marks an empty slot which is filled with zeros.
#[derive(Clone, Debug, PartialEq)]
pub struct UnitOrder(Array2<usize>);

impl UnitOrder {
    /// The sentinel for an empty slot.
    pub const EMPTY: usize = 0;

    /// Creates the order from raw 1-based indices.
    pub fn from_indices(indices: Array2<usize>) -> Self {
        Self(indices)
    }

    /// Creates the order from optional 0-based references into the flattened source.
    ///
    /// Documents with fewer slots than the longest one are padded with empty slots.
    pub fn from_slots(documents: &[Vec<Option<usize>>]) -> Self {
        let slots = documents.iter().map(Vec::len).max().unwrap_or_default();
        let mut indices = Array2::from_elem((documents.len(), slots), Self::EMPTY);
        for (document, mut row) in documents.iter().zip(indices.outer_iter_mut()) {
            for (unit, index) in document.iter().zip(row.iter_mut()) {
                *index = unit.map_or(Self::EMPTY, |unit| unit + 1);
            }
        }
        Self(indices)
    }

    /// The 0-based reference of a slot, `None` for empty slots.
    pub fn get(&self, document: usize, slot: usize) -> Option<usize> {
        self.0
            .get((document, slot))
            .and_then(|&index| index.checked_sub(1))
    }

    /// The raw 1-based indices.
    pub fn indices(&self) -> ArrayView2<usize> {
        self.0.view()
    }

    /// The `(documents, slots)` shape.
    pub fn dim(&self) -> (usize, usize) {
        self.0.dim()
    }

    /// The number of non empty slots per document.
    ///
    /// Sequences are masked by length, so the non empty slots of each document must form a
    /// prefix of its row. Fails for the first document with an empty slot before a unit.
    pub fn lengths(&self) -> Result<Vec<usize>, ReorderError> {
        self.0
            .outer_iter()
            .enumerate()
            .map(|(document, row)| {
                let length = row
                    .iter()
                    .position(|&index| index == Self::EMPTY)
                    .unwrap_or_else(|| row.len());
                if row.iter().skip(length).any(|&index| index != Self::EMPTY) {
                    let err = ReorderError::GappedOrder {
                        document,
                        slot: length,
                    };
                    error!("{} (order: {:?})", err, self.0);
                    Err(err)
                } else {
                    Ok(length)
                }
            })
            .collect()
    }

    fn check_bounds(&self, source_shape: &[usize]) -> Result<(), ReorderError> {
        let rows = source_shape.first().copied().unwrap_or_default();
        match self.0.indexed_iter().find(|(_, &index)| index > rows) {
            Some((slot, &index)) => {
                let err = ReorderError::IndexOutOfBounds {
                    index,
                    slot,
                    source_shape: source_shape.to_vec(),
                    order_shape: self.dim(),
                };
                error!("{} (order: {:?})", err, self.0);
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn flat_indices(&self) -> Vec<usize> {
        self.0.iter().copied().collect()
    }
}

/// Gathers the `(units, features)` source rows into `(documents, slots, features)`.
///
/// A zero row is prepended to the source, so empty slots resolve to zero vectors.
pub fn reorder_rows(
    source: ArrayView2<f32>,
    order: &UnitOrder,
) -> Result<Array3<f32>, ReorderError> {
    order.check_bounds(source.shape())?;

    let features = source.ncols();
    let zeros = Array2::zeros((1, features));
    let padded = concatenate(Axis(0), &[zeros.view(), source.view()])?;
    let (documents, slots) = order.dim();
    padded
        .select(Axis(0), &order.flat_indices())
        .into_shape((documents, slots, features))
        .map_err(Into::into)
}

/// Gathers scalar per unit values (e.g. a token mask) into `(documents, slots)`.
///
/// Empty slots resolve to zero.
pub fn reorder_scalars(
    source: ArrayView1<f32>,
    order: &UnitOrder,
) -> Result<Array2<f32>, ReorderError> {
    order.check_bounds(source.shape())?;

    let zeros = Array1::zeros(1);
    let padded = concatenate(Axis(0), &[zeros.view(), source.view()])?;
    padded
        .select(Axis(0), &order.flat_indices())
        .into_shape(order.dim())
        .map_err(Into::into)
}

/// Flattens `(batch, time, features)` into `(batch * time, features)` in row-major order.
///
/// The unit at `(b, t)` ends up in row `b * time + t`.
pub fn flatten_sequences(sequences: ArrayView3<f32>) -> Result<Array2<f32>, ReorderError> {
    let (batch_size, max_length, features) = sequences.dim();
    Array2::from_shape_vec(
        (batch_size * max_length, features),
        sequences.iter().copied().collect(),
    )
    .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use ndarray::{arr1, arr2, s};

    use super::*;
    use test_utils::{assert_approx_eq, random_array, seeded_rng};

    fn sentences() -> Array2<f32> {
        arr2(&[[1.0f32, 1.], [2., 2.], [3., 3.], [4., 4.]])
    }

    #[test]
    fn test_reorder_sentences_into_documents() {
        let order = UnitOrder::from_indices(arr2(&[[1, 2, 0], [3, 4, 0]]));
        let documents = reorder_rows(sentences().view(), &order).unwrap();

        assert_eq!(documents.dim(), (2, 3, 2));
        assert_approx_eq!(f32, documents.slice(s![0, ..2, ..]), arr2(&[[1., 1.], [2., 2.]]));
        assert_approx_eq!(f32, documents.slice(s![1, ..2, ..]), arr2(&[[3., 3.], [4., 4.]]));
        assert!(documents.slice(s![.., 2, ..]).iter().all(|&v| v == 0.));
    }

    #[test]
    fn test_empty_order_gives_zeros() {
        let order = UnitOrder::from_indices(Array2::zeros((3, 5)));
        let documents = reorder_rows(sentences().view(), &order).unwrap();
        assert_eq!(documents.dim(), (3, 5, 2));
        assert!(documents.iter().all(|&v| v == 0.));
    }

    #[test]
    fn test_reorder_is_deterministic_and_follows_row_permutations() {
        let mut rng = seeded_rng();
        let source = random_array(&mut rng, (6, 3));
        let order = UnitOrder::from_indices(arr2(&[[2, 1, 0], [6, 5, 4], [3, 0, 0]]));
        let permuted = UnitOrder::from_indices(arr2(&[[3, 0, 0], [2, 1, 0], [6, 5, 4]]));

        let first = reorder_rows(source.view(), &order).unwrap();
        let second = reorder_rows(source.view(), &order).unwrap();
        assert_eq!(first, second);

        let reordered = reorder_rows(source.view(), &permuted).unwrap();
        assert_eq!(reordered.slice(s![0, .., ..]), first.slice(s![2, .., ..]));
        assert_eq!(reordered.slice(s![1, .., ..]), first.slice(s![0, .., ..]));
        assert_eq!(reordered.slice(s![2, .., ..]), first.slice(s![1, .., ..]));
    }

    #[test]
    fn test_out_of_bounds_index_is_reported() {
        let order = UnitOrder::from_indices(arr2(&[[1, 2], [5, 0]]));
        match reorder_rows(sentences().view(), &order) {
            Err(ReorderError::IndexOutOfBounds {
                index,
                slot,
                source_shape,
                order_shape,
            }) => {
                assert_eq!(index, 5);
                assert_eq!(slot, (1, 0));
                assert_eq!(source_shape, [4, 2]);
                assert_eq!(order_shape, (2, 2));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_reorder_scalars() {
        let mask = arr1(&[1.0f32, 0., 1., 1.]);
        let order = UnitOrder::from_indices(arr2(&[[4, 1, 0], [2, 0, 0]]));
        let reordered = reorder_scalars(mask.view(), &order).unwrap();
        assert_eq!(reordered, arr2(&[[1., 1., 0.], [0., 0., 0.]]));

        let order = UnitOrder::from_indices(arr2(&[[5]]));
        assert!(reorder_scalars(mask.view(), &order).is_err());
    }

    #[test]
    fn test_order_from_slots() {
        let order = UnitOrder::from_slots(&[vec![Some(0), Some(3)], vec![Some(1), None, Some(2)]]);
        assert_eq!(order.indices(), arr2(&[[1, 4, 0], [2, 0, 3]]));
        assert_eq!(order.get(0, 1), Some(3));
        assert_eq!(order.get(1, 1), None);
        assert_eq!(order.get(0, 2), None);
        assert_eq!(order.get(7, 0), None);
        assert!(matches!(
            order.lengths(),
            Err(ReorderError::GappedOrder {
                document: 1,
                slot: 1,
            }),
        ));

        let order = UnitOrder::from_slots(&[vec![Some(0), Some(3)], vec![Some(1)], vec![]]);
        assert_eq!(order.lengths().unwrap(), [2, 1, 0]);
    }

    #[test]
    fn test_flatten_sequences() {
        let mut rng = seeded_rng();
        let sequences = random_array(&mut rng, (2, 3, 4));
        let flat = flatten_sequences(sequences.view()).unwrap();
        assert_eq!(flat.dim(), (6, 4));
        assert_eq!(flat.row(4), sequences.slice(s![1, 1, ..]));
    }
}
