//! Building transformations: from classification names and parameters,
//! and by combining existing transformations with the usual simplifications.
use std::sync::Arc;

use crate::error::ensure_dimension;
use crate::transforms::{collapse_1d, linear_from_matrix};
use crate::{
    Affine, BursaWolfParameters, Composition, Concatenated, Ellipsoid, ExponentialTransform1D,
    Geocentric, GeocentricInverse, GeocentricTranslation, GridLocation, Identity,
    LogarithmicTransform1D, Matrix, Molodenski, NadconTransform, Ntv2Transform, ParameterGroup,
    PassThrough, RotationConvention, ThinPlateSplineTransform, TransformError, TransformResult,
    Transformation, WarpPolynomial,
};

/// Apply `first`, then `second`.
///
/// Identity legs are dropped, linear pairs are multiplied into one matrix,
/// matching one-dimensional exponential/logarithmic pairs fold together
/// and pass-throughs over the same ordinates are merged.
/// Anything else becomes a [Concatenated].
pub fn concatenate(
    first: Arc<dyn Transformation>,
    second: Arc<dyn Transformation>,
) -> TransformResult<Arc<dyn Transformation>> {
    ensure_dimension("second", first.output_ndim(), second.input_ndim())?;
    if first.is_identity() {
        return Ok(second);
    }
    if second.is_identity() {
        return Ok(first);
    }
    if let (Some(m1), Some(m2)) = (first.matrix(), second.matrix()) {
        log::debug!("Collapsing linear pair into a single matrix");
        return linear_from_matrix(m2.multiply(&m1)?);
    }
    if let Some(collapsed) = collapse_1d(first.as_ref(), second.as_ref())? {
        return Ok(collapsed);
    }
    if let (Composition::PassThrough(a), Composition::PassThrough(b)) =
        (first.composition(), second.composition())
    {
        if a.first_affected_ordinate() == b.first_affected_ordinate()
            && a.num_trailing_ordinates() == b.num_trailing_ordinates()
        {
            log::debug!("Merging pass-throughs at ordinate {}", a.first_affected_ordinate());
            let sub = concatenate(a.sub_transform().clone(), b.sub_transform().clone())?;
            return pass_through(a.first_affected_ordinate(), sub, a.num_trailing_ordinates());
        }
    }
    Ok(Arc::new(Concatenated::try_new(first, second)?))
}

/// Apply `sub` to the ordinates starting at `first_affected`,
/// passing `first_affected` leading and `num_trailing` trailing ordinates through.
///
/// With nothing to pass through, `sub` itself is returned.
pub fn pass_through(
    first_affected: usize,
    sub: Arc<dyn Transformation>,
    num_trailing: usize,
) -> TransformResult<Arc<dyn Transformation>> {
    if first_affected == 0 && num_trailing == 0 {
        return Ok(sub);
    }
    if sub.is_identity() {
        return Ok(Arc::new(Identity::new(
            first_affected + sub.input_ndim() + num_trailing,
        )));
    }
    if let Some(m) = sub.matrix().filter(Matrix::is_affine) {
        return linear_from_matrix(expand_matrix(&m, first_affected, num_trailing)?);
    }
    if let Composition::PassThrough(inner) = sub.composition() {
        log::debug!("Merging nested pass-throughs");
        return Ok(Arc::new(PassThrough::new(
            first_affected + inner.first_affected_ordinate(),
            inner.sub_transform().clone(),
            num_trailing + inner.num_trailing_ordinates(),
        )));
    }
    Ok(Arc::new(PassThrough::new(first_affected, sub, num_trailing)))
}

/// Embed an affine matrix in a larger one which leaves the surrounding ordinates unchanged.
fn expand_matrix(m: &Matrix, first: usize, trailing: usize) -> TransformResult<Matrix> {
    let sub_in = m.ncols() - 1;
    let sub_out = m.nrows() - 1;
    let n_in = first + sub_in + trailing;
    let n_out = first + sub_out + trailing;
    let mut out = Matrix::zeros(n_out + 1, n_in + 1);
    for i in 0..first {
        out.set(i, i, 1.0);
    }
    m.copy_sub_matrix(0, 0, sub_out, sub_in, first, first, &mut out)?;
    for r in 0..sub_out {
        out.set(first + r, n_in, m[(r, sub_in)]);
    }
    for k in 0..trailing {
        out.set(first + sub_out + k, first + sub_in + k, 1.0);
    }
    out.set(n_out, n_in, 1.0);
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Affine,
    Exponential,
    Logarithmic,
    EllipsoidToGeocentric,
    GeocentricToEllipsoid,
    Molodenski,
    AbridgedMolodenski,
    GeocentricTranslations,
    PositionVector,
    CoordinateFrame,
    Similarity,
    Nadcon,
    Ntv2,
    WarpPolynomial,
    ThinPlateSpline,
}

/// Classification names and aliases, compared after [normalise].
const METHODS: &[(Method, &[&str])] = &[
    (Method::Affine, &["affine", "9624"]),
    (Method::Exponential, &["exponential"]),
    (Method::Logarithmic, &["logarithmic"]),
    (
        Method::EllipsoidToGeocentric,
        &["ellipsoidtogeocentric", "geographicgeocentricconversions", "9602"],
    ),
    (Method::GeocentricToEllipsoid, &["geocentrictoellipsoid"]),
    (Method::Molodenski, &["molodenski", "9604"]),
    (Method::AbridgedMolodenski, &["abridgedmolodenski", "9605"]),
    (
        Method::GeocentricTranslations,
        &["geocentrictranslations", "9603"],
    ),
    (
        Method::PositionVector,
        &["positionvectortransformation", "positionvector", "9606"],
    ),
    (
        Method::CoordinateFrame,
        &["coordinateframerotation", "coordinateframe", "9607"],
    ),
    (Method::Similarity, &["similaritytransformation", "similarity", "9621"]),
    (Method::Nadcon, &["nadcon", "9613"]),
    (Method::Ntv2, &["ntv2", "9615"]),
    (Method::WarpPolynomial, &["warppolynomial", "polynomial"]),
    (Method::ThinPlateSpline, &["thinplatespline", "tps"]),
];

/// Lower case, alphanumerics only, without a trailing "(geocentric domain)".
fn normalise(name: &str) -> String {
    let out: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    match out.strip_suffix("geocentricdomain") {
        Some(stripped) => stripped.to_string(),
        None => out,
    }
}

fn method(name: &str) -> TransformResult<Method> {
    let key = normalise(name);
    METHODS
        .iter()
        .find(|(_, aliases)| aliases.contains(&key.as_str()))
        .map(|(m, _)| *m)
        .ok_or_else(|| TransformError::NoSuchIdentifier(name.to_string()))
}

/// Creates transformations from a classification name and a [ParameterGroup].
///
/// Every group reported by [Transformation::parameters] is accepted back.
#[derive(Debug, Clone, Default)]
pub struct MathTransformFactory {
    grid_location: GridLocation,
}

impl MathTransformFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up grid files given by bare name under `location`.
    pub fn with_grid_location(mut self, location: GridLocation) -> Self {
        self.grid_location = location;
        self
    }

    pub fn grid_location(&self) -> &GridLocation {
        &self.grid_location
    }

    /// Canonical classification names, one per supported method.
    pub fn available_methods() -> Vec<&'static str> {
        vec![
            "Affine",
            "Exponential",
            "Logarithmic",
            "Ellipsoid_To_Geocentric",
            "Geocentric_To_Ellipsoid",
            "Molodenski",
            "Abridged_Molodenski",
            "Geocentric translations (geocentric domain)",
            "Position Vector transformation (geocentric domain)",
            "Coordinate Frame rotation (geocentric domain)",
            "Similarity transformation",
            "NADCON",
            "NTv2",
            "Warp Polynomial",
            "ThinPlateSpline",
        ]
    }

    /// Build the transformation a classification name (case-insensitive) describes.
    pub fn create(
        &self,
        name: &str,
        params: &ParameterGroup,
    ) -> TransformResult<Arc<dyn Transformation>> {
        let method = method(name)?;
        log::debug!("Creating {method:?} transform from {} parameters", params.len());
        match method {
            Method::Affine => linear_from_matrix(affine_matrix(params)?),
            Method::Exponential => Ok(Arc::new(ExponentialTransform1D::try_new(
                params.real_or("base", 10.0)?,
                params.real_or("scale", 1.0)?,
            )?)),
            Method::Logarithmic => Ok(Arc::new(LogarithmicTransform1D::try_new(
                params.real_or("base", 10.0)?,
                params.real_or("offset", 0.0)?,
            )?)),
            Method::EllipsoidToGeocentric => {
                let ellipsoid = ellipsoid(params, "semi_major", "semi_minor")?;
                Ok(Arc::new(Geocentric::new(ellipsoid, has_height(params, "dim", 3)?)))
            }
            Method::GeocentricToEllipsoid => {
                let ellipsoid = ellipsoid(params, "semi_major", "semi_minor")?;
                Ok(Arc::new(GeocentricInverse::new(
                    ellipsoid,
                    has_height(params, "dim", 3)?,
                )))
            }
            Method::Molodenski | Method::AbridgedMolodenski => {
                let source_3d = has_height(params, "dim", 3)?;
                let target_3d =
                    has_height(params, "tgt_dim", if source_3d { 3 } else { 2 })?;
                Ok(Arc::new(Molodenski::new(
                    method == Method::AbridgedMolodenski,
                    ellipsoid(params, "src_semi_major", "src_semi_minor")?,
                    source_3d,
                    ellipsoid(params, "tgt_semi_major", "tgt_semi_minor")?,
                    target_3d,
                    params.real_or("dx", 0.0)?,
                    params.real_or("dy", 0.0)?,
                    params.real_or("dz", 0.0)?,
                )))
            }
            Method::GeocentricTranslations => {
                let bw = BursaWolfParameters::translation(
                    params.real_or("dx", 0.0)?,
                    params.real_or("dy", 0.0)?,
                    params.real_or("dz", 0.0)?,
                );
                Ok(Arc::new(GeocentricTranslation::new(
                    bw,
                    RotationConvention::PositionVector,
                )))
            }
            Method::PositionVector => Ok(Arc::new(GeocentricTranslation::new(
                bursa_wolf(params)?,
                RotationConvention::PositionVector,
            ))),
            Method::CoordinateFrame => Ok(Arc::new(GeocentricTranslation::new(
                bursa_wolf(params)?,
                RotationConvention::CoordinateFrame,
            ))),
            Method::Similarity => Ok(Arc::new(Affine::similarity(
                params.real_or("tx", 0.0)?,
                params.real_or("ty", 0.0)?,
                params.real_or("ppm", 0.0)?,
                params.real_or("rotation", 0.0)?,
            ))),
            Method::Nadcon => Ok(Arc::new(NadconTransform::open_in(
                &self.grid_location,
                params.text("Latitude_difference_file")?,
                params.text("Longitude_difference_file")?,
            )?)),
            Method::Ntv2 => Ok(Arc::new(Ntv2Transform::open_in(
                &self.grid_location,
                params.text("Latitude and longitude difference file")?,
            )?)),
            Method::WarpPolynomial => {
                let warp = WarpPolynomial::from_coefficients(
                    params.index("degree")?,
                    pair_or(params, "centre", [0.0, 0.0])?,
                    pair_or(params, "scale", [1.0, 1.0])?,
                    params.reals("xCoeffs")?.to_vec(),
                    params.reals("yCoeffs")?.to_vec(),
                )?;
                match warp.affine_matrix() {
                    Some(m) => linear_from_matrix(m),
                    None => Ok(Arc::new(warp)),
                }
            }
            Method::ThinPlateSpline => {
                let n = params.index("num_points")?;
                let mut source = Vec::with_capacity(n);
                let mut target = Vec::with_capacity(n);
                for idx in 0..n {
                    source.push(pair(params, &format!("source_{idx}"))?);
                    target.push(pair(params, &format!("target_{idx}"))?);
                }
                Ok(Arc::new(ThinPlateSplineTransform::try_new(&source, &target)?))
            }
        }
    }

    /// Build an affine transform from an augmented matrix, simplified where possible.
    pub fn create_affine(&self, augmented: Matrix) -> TransformResult<Arc<dyn Transformation>> {
        linear_from_matrix(augmented)
    }

    pub fn create_concatenated(
        &self,
        first: Arc<dyn Transformation>,
        second: Arc<dyn Transformation>,
    ) -> TransformResult<Arc<dyn Transformation>> {
        concatenate(first, second)
    }

    /// Signed ordinate counts, as they arrive from external callers.
    pub fn create_pass_through(
        &self,
        first_affected: i64,
        sub: Arc<dyn Transformation>,
        num_trailing: i64,
    ) -> TransformResult<Arc<dyn Transformation>> {
        let first = usize::try_from(first_affected).map_err(|_| {
            TransformError::invalid_argument(format!(
                "firstAffectedOrdinate must not be negative, got {first_affected}"
            ))
        })?;
        let trailing = usize::try_from(num_trailing).map_err(|_| {
            TransformError::invalid_argument(format!(
                "numTrailingOrdinates must not be negative, got {num_trailing}"
            ))
        })?;
        pass_through(first, sub, trailing)
    }
}

/// `num_row × num_col` matrix; absent `elt_r_c` follow the identity pattern.
fn affine_matrix(params: &ParameterGroup) -> TransformResult<Matrix> {
    let nrows = params.index_or("num_row", 3)?;
    let ncols = params.index_or("num_col", 3)?;
    if nrows < 2 || ncols < 2 {
        return Err(TransformError::invalid_parameter(
            "num_row",
            format!("an affine matrix must be at least 2x2, got {nrows}x{ncols}"),
        ));
    }
    let mut m = Matrix::zeros(nrows, ncols);
    for r in 0..nrows {
        for c in 0..ncols {
            let default = if (r == nrows - 1 && c == ncols - 1)
                || (r == c && r < nrows - 1 && c < ncols - 1)
            {
                1.0
            } else {
                0.0
            };
            m.set(r, c, params.real_or(&format!("elt_{r}_{c}"), default)?);
        }
    }
    Ok(m)
}

fn ellipsoid(params: &ParameterGroup, major: &str, minor: &str) -> TransformResult<Ellipsoid> {
    Ellipsoid::from_axes(params.real(major)?, params.real(minor)?)
}

fn has_height(params: &ParameterGroup, name: &str, default: usize) -> TransformResult<bool> {
    match params.index_or(name, default)? {
        2 => Ok(false),
        3 => Ok(true),
        other => Err(TransformError::invalid_parameter(
            name,
            format!("must be 2 or 3, got {other}"),
        )),
    }
}

fn bursa_wolf(params: &ParameterGroup) -> TransformResult<BursaWolfParameters> {
    Ok(BursaWolfParameters {
        dx: params.real_or("dx", 0.0)?,
        dy: params.real_or("dy", 0.0)?,
        dz: params.real_or("dz", 0.0)?,
        ex: params.real_or("ex", 0.0)?,
        ey: params.real_or("ey", 0.0)?,
        ez: params.real_or("ez", 0.0)?,
        ppm: params.real_or("ppm", 0.0)?,
    })
}

fn pair(params: &ParameterGroup, name: &str) -> TransformResult<[f64; 2]> {
    match params.reals(name)? {
        [a, b] => Ok([*a, *b]),
        other => Err(TransformError::invalid_parameter(
            name,
            format!("expected 2 numbers, got {}", other.len()),
        )),
    }
}

fn pair_or(params: &ParameterGroup, name: &str, default: [f64; 2]) -> TransformResult<[f64; 2]> {
    if params.get(name).is_none() {
        return Ok(default);
    }
    pair(params, name)
}
