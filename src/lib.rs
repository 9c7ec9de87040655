//! Mathematical coordinate transformations for geodesy:
//! linear and projective maps, geocentric conversion, datum shifts,
//! grid shifts, polynomial and thin-plate-spline warps,
//! and the composition logic that wires them into pipelines.
use smallvec::SmallVec;

mod error;
pub use error::{TransformError, TransformResult};

mod traits;
pub use traits::{Composition, Transformation, transform_array, transform_in_place, transform_point};

mod matrix;
pub use matrix::{Matrix, MatrixBuilder};

mod parameter;
pub use parameter::{ParameterGroup, ParameterValue};

pub mod wkt;

mod ellipsoid;
pub use ellipsoid::Ellipsoid;

pub mod transforms;
pub use transforms::{
    Affine, BursaWolfParameters, Concatenated, ExponentialTransform1D, Geocentric,
    GeocentricInverse, GeocentricTranslation, GridLocation, Identity, LinearTransform1D,
    LogarithmicTransform1D, Molodenski, NadconTransform, Ntv2Transform, PassThrough,
    RotationConvention, ThinPlateSpline2D, ThinPlateSplineTransform, WarpPolynomial,
};

mod localization_grid;
pub use localization_grid::{LocalizationGrid, LocalizationGridBuilder, LocalizationGridTransform};

mod dimension_filter;
pub use dimension_filter::DimensionFilter;

mod factory;
pub use factory::{MathTransformFactory, concatenate, pass_through};

mod graph;
pub use graph::TransformGraph;

#[cfg(feature = "ndarray")]
mod ndarr;
#[cfg(feature = "ndarray")]
pub use ndarr::{transform_ndarray, transform_ndarray_into};

pub const COORD_SIZE: usize = 6;

/// A short vector type alias for convenience,
/// which may be replaced by arrayvec/smallvec/tinyvec in future
/// as an optimisation.
pub type ShortVec<T> = SmallVec<[T; COORD_SIZE]>;

/// Convenience function for turning a slice of sliceables into a vec of slices.
/// Allocates a new vec.
pub(crate) fn as_refs<T, Inner: AsRef<[T]>>(input: &[Inner]) -> Vec<&[T]> {
    input.iter().map(|v| v.as_ref()).collect()
}

/// Convenience function for turning a mut slice of sliceables into a vec of mut slices.
/// Allocates a new vec.
pub(crate) fn as_muts<T, Inner: AsMut<[T]>>(input: &mut [Inner]) -> Vec<&mut [T]> {
    input.iter_mut().map(|v| v.as_mut()).collect()
}

pub(crate) fn vec_of_vec<T: Copy>(outer_len: usize, inner_len: usize, val: T) -> Vec<Vec<T>> {
    vec![vec![val; inner_len]; outer_len]
}

/// Convenience function for copying a 2D slice from input to output.
pub(crate) fn copy_into<T: Copy, InInner: AsRef<[T]>, OutInner: AsMut<[T]>>(
    input: &[InInner],
    output: &mut [OutInner],
) {
    input
        .iter()
        .zip(output.iter_mut())
        .for_each(|(inp, outp)| outp.as_mut().copy_from_slice(inp.as_ref()));
}
