//! Every concrete transformation.
mod identity;
pub use identity::Identity;

mod affine;
pub use affine::{Affine, linear_from_matrix};

mod linear1d;
pub use linear1d::LinearTransform1D;

mod exponential;
pub use exponential::{ExponentialTransform1D, LogarithmicTransform1D};
pub(crate) use exponential::collapse_1d;

mod concatenated;
pub use concatenated::Concatenated;

mod pass_through;
pub use pass_through::PassThrough;

mod geocentric;
pub use geocentric::{Geocentric, GeocentricInverse};

mod geocentric_translation;
pub use geocentric_translation::{BursaWolfParameters, GeocentricTranslation, RotationConvention};

mod molodenski;
pub use molodenski::Molodenski;

pub(crate) mod grid_shift;
pub use grid_shift::{GridLocation, NadconTransform, Ntv2Transform};

mod warp;
pub use warp::WarpPolynomial;

mod thin_plate_spline;
pub use thin_plate_spline::{ThinPlateSpline2D, ThinPlateSplineTransform};
