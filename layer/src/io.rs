//! Loading and storing of named ndarray arrays.

use std::{
    collections::{hash_map, HashMap},
    convert::{TryFrom, TryInto},
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use bincode::Options;
use displaydoc::Display;
use log::debug;
use ndarray::{Array, ArrayBase, DataOwned, Dim, Dimension, IntoDimension, Ix, Ix1, IxDyn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::IncompatibleMatrices;

/// Serialization helper representing a flattened array.
///
/// The flattened array is in row-major order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FlattenedArray<A> {
    shape: Vec<Ix>,
    /// There is a invariant that the length of data is
    /// equal to the product of all values in shape.
    data: Vec<A>,
}

impl<A> FlattenedArray<A> {
    pub fn shape(&self) -> &[Ix] {
        &self.shape
    }
}

impl<A, D> From<Array<A, D>> for FlattenedArray<A>
where
    A: Clone,
    D: Dimension,
{
    fn from(array: Array<A, D>) -> Self {
        let shape = array.shape().to_owned();
        let data = if array.is_standard_layout() {
            array.into_raw_vec()
        } else {
            // iteration is in logical (row-major) order
            array.iter().cloned().collect()
        };

        FlattenedArray { shape, data }
    }
}

impl<'de, A> Deserialize<'de> for FlattenedArray<A>
where
    A: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let helper = FlattenedArrayDeserializationHelper::<A>::deserialize(deserializer)?;

        let expected_data_len = helper.shape.iter().product::<usize>();
        if helper.data.len() != expected_data_len {
            return Err(<D::Error as serde::de::Error>::custom(
                UnexpectedNumberOfDimensions {
                    got: helper.data.len(),
                    expected: expected_data_len,
                },
            ));
        } else {
            return Ok(Self {
                shape: helper.shape,
                data: helper.data,
            });
        };

        /// Helper to get a post serialization invariant check.
        #[derive(Deserialize)]
        struct FlattenedArrayDeserializationHelper<A> {
            shape: Vec<Ix>,
            data: Vec<A>,
        }
    }
}

/// Unexpected number of dimensions: got={got}, expected={expected}
#[derive(Debug, Display, Error)]
pub struct UnexpectedNumberOfDimensions {
    got: usize,
    expected: usize,
}

#[derive(Debug, Display, Error)]
pub enum FailedToRetrieveParams {
    /// {0}
    UnexpectedNumberOfDimensions(#[from] UnexpectedNumberOfDimensions),
    /// Missing parameters for {name}.
    MissingParameters { name: String },
}

/// Failed to load a layer
#[derive(Debug, Display, Error)]
#[prefix_enum_doc_attributes]
pub enum LoadingLayerFailed {
    /// {0}
    IncompatibleMatrices(#[from] IncompatibleMatrices),
    /// {0}
    DimensionMismatch(#[from] UnexpectedNumberOfDimensions),
    /// {0}
    FailedToRetrieveParams(#[from] FailedToRetrieveParams),
}

#[derive(Debug, Display, Error)]
pub enum LoadingBinParamsFailed {
    /// {0}
    Io(#[from] io::Error),
    /// {0}
    DeserializationFailed(#[from] bincode::Error),
}

impl<S, D> TryFrom<FlattenedArray<S::Elem>> for ArrayBase<S, D>
where
    D: Dimension + TryIntoDimension,
    S: DataOwned,
{
    type Error = UnexpectedNumberOfDimensions;

    fn try_from(array: FlattenedArray<S::Elem>) -> Result<Self, Self::Error> {
        let shape = D::try_from(&array.shape)?;

        let flattened = ArrayBase::<S, Ix1>::from(array.data);
        let output = flattened.into_shape(shape);
        // This can only fail if the FlattenedArray invariant is violated, which
        // we do check when deserializing it!
        Ok(output.unwrap_or_else(|_| unreachable!()))
    }
}

/// Helper trait to allow us to create various `Dim` instances from a slice.
///
/// The serialization format for `Dim`,`ArrayBase` and similar is not fixed,
/// so we must deserialize it as a `Vec<usize>` (or similar) and then convert
/// it. But `ndarray` only ships with conversion methods from `Vec<Ix>`/`&[Ix]`
/// to `IxDyn` but not to the various specific dims.
pub trait TryIntoDimension: Sized {
    fn try_from(slice: &[Ix]) -> Result<Self, UnexpectedNumberOfDimensions>;
}

impl<const N: usize> TryIntoDimension for Dim<[Ix; N]>
where
    [Ix; N]: IntoDimension<Dim = Dim<[Ix; N]>>,
{
    fn try_from(slice: &[Ix]) -> Result<Self, UnexpectedNumberOfDimensions> {
        <[Ix; N]>::try_from(slice)
            .map(IntoDimension::into_dimension)
            .map_err(|_| UnexpectedNumberOfDimensions {
                got: slice.len(),
                expected: N,
            })
    }
}

impl TryIntoDimension for IxDyn {
    fn try_from(slice: &[Ix]) -> Result<Self, UnexpectedNumberOfDimensions> {
        Ok(slice.into_dimension())
    }
}

/// A named collection of flattened `f32` arrays.
///
/// This is the parameter store of all models, layers take their
/// parameters out of it when loading and put them back when storing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BinParams {
    params: HashMap<String, FlattenedArray<f32>>,
}

impl IntoIterator for BinParams {
    type Item = (String, FlattenedArray<f32>);
    type IntoIter = hash_map::IntoIter<String, FlattenedArray<f32>>;

    fn into_iter(self) -> Self::IntoIter {
        self.params.into_iter()
    }
}

impl BinParams {
    pub fn deserialize_from_file(file: impl AsRef<Path>) -> Result<Self, LoadingBinParamsFailed> {
        let path = file.as_ref();
        let params = Self::deserialize_from(BufReader::new(File::open(path)?))?;
        debug!("loaded {} arrays from {}", params.params.len(), path.display());
        Ok(params)
    }

    pub fn deserialize_from(source: impl Read) -> Result<Self, LoadingBinParamsFailed> {
        let bincode = Self::setup_bincode();
        bincode.deserialize_from(source).map_err(Into::into)
    }

    pub fn serialize_into_file(
        &self,
        file: impl AsRef<Path>,
    ) -> Result<(), LoadingBinParamsFailed> {
        let path = file.as_ref();
        let mut sink = BufWriter::new(File::create(path)?);
        self.serialize_into(&mut sink)?;
        sink.flush()?;
        debug!("stored {} arrays in {}", self.params.len(), path.display());
        Ok(())
    }

    pub fn serialize_into(&self, sink: impl Write) -> Result<(), LoadingBinParamsFailed> {
        let bincode = Self::setup_bincode();
        bincode.serialize_into(sink, self).map_err(Into::into)
    }

    fn setup_bincode() -> impl bincode::Options {
        // we explicitly set some default options to
        // convey exactly which options we use.
        bincode::DefaultOptions::new()
            .with_little_endian()
            .with_fixint_encoding()
            .reject_trailing_bytes()
    }

    /// True if this instance is empty.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// List the keys contained in this instance.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(|s| &**s)
    }

    pub fn take<A>(&mut self, name: &str) -> Result<A, FailedToRetrieveParams>
    where
        FlattenedArray<f32>: TryInto<A, Error = UnexpectedNumberOfDimensions>,
    {
        self.params
            .remove(name)
            .ok_or_else(|| FailedToRetrieveParams::MissingParameters {
                name: name.to_owned(),
            })?
            .try_into()
            .map_err(Into::into)
    }

    /// Inserts a array under given name, replacing any previous array of that name.
    pub fn insert<D>(&mut self, name: impl Into<String>, array: Array<f32, D>)
    where
        D: Dimension,
    {
        self.params.insert(name.into(), array.into());
    }

    /// Creates a new `BinParamsWithScope` instance.
    ///
    /// The name prefix will be  scope + '/'. Passing a empty
    /// scope in is possible.
    pub fn with_scope<'b>(&'b mut self, scope: &str) -> BinParamsWithScope<'b> {
        BinParamsWithScope {
            params: self,
            prefix: scope.to_owned() + "/",
        }
    }
}

/// A wrapper embedding a prefix with the bin params.
pub struct BinParamsWithScope<'a> {
    params: &'a mut BinParams,
    prefix: String,
}

impl<'a> BinParamsWithScope<'a> {
    pub fn take<A>(&mut self, name: &str) -> Result<A, FailedToRetrieveParams>
    where
        FlattenedArray<f32>: TryInto<A, Error = UnexpectedNumberOfDimensions>,
    {
        let name = self.prefix.clone() + name;
        self.params.take(&name)
    }

    pub fn insert<D>(&mut self, name: &str, array: Array<f32, D>)
    where
        D: Dimension,
    {
        self.params.insert(self.prefix.clone() + name, array);
    }

    /// Creates a nested scope, i.e. with prefix `outer/inner/`.
    pub fn with_scope<'b>(&'b mut self, scope: &str) -> BinParamsWithScope<'b> {
        BinParamsWithScope {
            params: self.params,
            prefix: self.prefix.clone() + scope + "/",
        }
    }
}
