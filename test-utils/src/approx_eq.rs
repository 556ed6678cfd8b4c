use ndarray::{ArrayBase, Data, Dimension, IntoDimension, Ix};

/// Asserts that two floats, or nested containers of floats, are approximately equal.
///
/// Floats, slices, arrays, vectors and ndarray arrays can be mixed as long as they have
/// the same logical shape:
///
/// ```
/// use ndarray::arr2;
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(f32, 0.15039155, 0.1503916, ulps = 3);
/// assert_approx_eq!(
///     f32,
///     &[[0.25, 0.75], [1., 0.]],
///     arr2(&[[0.25, 0.75], [1., 0.]]),
///     epsilon = 1e-6,
/// );
/// ```
///
/// `ulps` defaults to `2` and `epsilon` to `0`. Two NaNs at the same index count as equal,
/// a NaN is usually the expected outcome of a test in that case.
#[macro_export]
macro_rules! assert_approx_eq {
    ($t:ty, $left:expr, $right:expr $(,)?) => {
        $crate::assert_approx_eq!($t, $left, $right, epsilon = 0., ulps = 2)
    };
    ($t:ty, $left:expr, $right:expr, ulps = $ulps:expr $(,)?) => {
        $crate::assert_approx_eq!($t, $left, $right, epsilon = 0., ulps = $ulps)
    };
    ($t:ty, $left:expr, $right:expr, epsilon = $epsilon:expr $(,)?) => {
        $crate::assert_approx_eq!($t, $left, $right, epsilon = $epsilon, ulps = 2)
    };
    ($t:ty, $left:expr, $right:expr, epsilon = $epsilon:expr, ulps = $ulps:expr $(,)?) => {{
        let (epsilon, ulps) = ($epsilon, $ulps);
        let (left, right) = ($left, $right);
        let left = $crate::ApproxEqIter::leaves(&left);
        let right = $crate::ApproxEqIter::leaves(&right);
        for (index, (l, r)) in left.iter().zip(right.iter()).enumerate() {
            std::assert_eq!(
                l.0, r.0,
                "logical shapes differ at element {}: {:?} != {:?}",
                index, l.0, r.0,
            );
            let (lv, rv): ($t, $t) = (l.1, r.1);
            std::assert!(
                (lv.is_nan() && rv.is_nan())
                    || $crate::approx_eq!($t, lv, rv, ulps = ulps, epsilon = epsilon),
                "approximated equal assertion failed (ulps={:?}, epsilon={:?}) at index {:?}: {:?} == {:?}",
                ulps, epsilon, l.0, lv, rv,
            );
        }
        if let Some((index, _)) = left.get(right.len()) {
            std::panic!("Left input is longer, starting with index {:?}", index);
        }
        if let Some((index, _)) = right.get(left.len()) {
            std::panic!("Right input is longer, starting with index {:?}", index);
        }
    }};
}

/// Flattens a float or a container of floats for [`assert_approx_eq!`].
pub trait ApproxEqIter {
    /// The float type.
    type Leaf: Copy;

    /// Pushes all leaves in logical order, indexed by `prefix` extended with their position.
    fn push_leaves(&self, prefix: &mut Vec<Ix>, leaves: &mut Vec<(Vec<Ix>, Self::Leaf)>);

    /// Collects all leaves with their logical index.
    fn leaves(&self) -> Vec<(Vec<Ix>, Self::Leaf)> {
        let mut leaves = Vec::new();
        self.push_leaves(&mut Vec::new(), &mut leaves);
        leaves
    }
}

impl ApproxEqIter for f32 {
    type Leaf = f32;

    fn push_leaves(&self, prefix: &mut Vec<Ix>, leaves: &mut Vec<(Vec<Ix>, f32)>) {
        leaves.push((prefix.clone(), *self));
    }
}

impl<T> ApproxEqIter for &T
where
    T: ApproxEqIter + ?Sized,
{
    type Leaf = T::Leaf;

    fn push_leaves(&self, prefix: &mut Vec<Ix>, leaves: &mut Vec<(Vec<Ix>, T::Leaf)>) {
        (**self).push_leaves(prefix, leaves);
    }
}

impl<T> ApproxEqIter for [T]
where
    T: ApproxEqIter,
{
    type Leaf = T::Leaf;

    fn push_leaves(&self, prefix: &mut Vec<Ix>, leaves: &mut Vec<(Vec<Ix>, T::Leaf)>) {
        for (index, element) in self.iter().enumerate() {
            prefix.push(index);
            element.push_leaves(prefix, leaves);
            prefix.pop();
        }
    }
}

impl<T, const N: usize> ApproxEqIter for [T; N]
where
    T: ApproxEqIter,
{
    type Leaf = T::Leaf;

    fn push_leaves(&self, prefix: &mut Vec<Ix>, leaves: &mut Vec<(Vec<Ix>, T::Leaf)>) {
        self[..].push_leaves(prefix, leaves);
    }
}

impl<T> ApproxEqIter for Vec<T>
where
    T: ApproxEqIter,
{
    type Leaf = T::Leaf;

    fn push_leaves(&self, prefix: &mut Vec<Ix>, leaves: &mut Vec<(Vec<Ix>, T::Leaf)>) {
        self[..].push_leaves(prefix, leaves);
    }
}

impl<S, D> ApproxEqIter for ArrayBase<S, D>
where
    S: Data,
    S::Elem: ApproxEqIter,
    D: Dimension,
{
    type Leaf = <S::Elem as ApproxEqIter>::Leaf;

    fn push_leaves(&self, prefix: &mut Vec<Ix>, leaves: &mut Vec<(Vec<Ix>, Self::Leaf)>) {
        let depth = prefix.len();
        for (index, element) in self.indexed_iter() {
            prefix.extend(index.into_dimension().as_array_view().iter());
            element.push_leaves(prefix, leaves);
            prefix.truncate(depth);
        }
    }
}
