use displaydoc::Display;
use ndarray::{concatenate, Array, ArrayView, Axis, Dimension, IntoDimension, IxDyn, RemoveAxis};
use thiserror::Error;

/// Can't combine {name_left}({shape_left:?}) with {name_right}({shape_right:?}): {hint}
#[derive(Debug, Display, Error)]
pub struct IncompatibleMatrices {
    name_left: &'static str,
    shape_left: IxDyn,
    name_right: &'static str,
    shape_right: IxDyn,
    hint: &'static str,
}

impl IncompatibleMatrices {
    pub fn new(
        name_left: &'static str,
        shape_left: impl IntoDimension,
        name_right: &'static str,
        shape_right: impl IntoDimension,
        hint: &'static str,
    ) -> Self {
        Self {
            name_left,
            shape_left: shape_left.into_dimension().into_dyn(),
            name_right,
            shape_right: shape_right.into_dimension().into_dyn(),
            hint,
        }
    }
}

/// Concatenates two arrays along their last axis.
///
/// All other axes must have the same length.
pub fn concat_last_axis<'a, D>(
    left: ArrayView<'a, f32, D>,
    right: ArrayView<'a, f32, D>,
) -> Result<Array<f32, D>, IncompatibleMatrices>
where
    D: Dimension + RemoveAxis,
{
    let axis = Axis(left.ndim() - 1);
    let (shape_left, shape_right) = (left.raw_dim(), right.raw_dim());
    concatenate(axis, &[left, right]).map_err(|_| {
        IncompatibleMatrices::new(
            "concat/left",
            shape_left,
            "concat/right",
            shape_right,
            "all but the last axis must have the same length",
        )
    })
}
