//! Conversions between geographic (longitude, latitude, height) and geocentric (X, Y, Z) coordinates.
use std::sync::{Arc, OnceLock};

use crate::traits::inverse_derivative;
use crate::{Ellipsoid, Matrix, ParameterGroup, TransformError, TransformResult, Transformation};

/// Iteration cap of the latitude refinement in [GeocentricInverse].
pub const MAX_ITERATIONS: usize = 10;
/// Latitude convergence threshold, in radians (about 0.6 µm on the surface).
const TOLERANCE: f64 = 1e-13;

/// Geographic (longitude, latitude in degrees, optional ellipsoidal height)
/// to geocentric Cartesian coordinates.
#[derive(Debug, Clone)]
pub struct Geocentric {
    ellipsoid: Ellipsoid,
    has_height: bool,
    inverse: OnceLock<Arc<dyn Transformation>>,
}

impl PartialEq for Geocentric {
    fn eq(&self, other: &Self) -> bool {
        self.ellipsoid == other.ellipsoid && self.has_height == other.has_height
    }
}

impl Geocentric {
    pub fn new(ellipsoid: Ellipsoid, has_height: bool) -> Self {
        Self {
            ellipsoid,
            has_height,
            inverse: OnceLock::new(),
        }
    }

    pub fn ellipsoid(&self) -> &Ellipsoid {
        &self.ellipsoid
    }

    pub fn has_height(&self) -> bool {
        self.has_height
    }

    /// Same conversion with or without the height ordinate.
    pub fn with_height(&self, has_height: bool) -> Self {
        Self::new(self.ellipsoid, has_height)
    }

    pub fn to_cartesian(&self, lon: f64, lat: f64, height: f64) -> [f64; 3] {
        let (sin_lon, cos_lon) = lon.to_radians().sin_cos();
        let lat = lat.to_radians();
        let (sin_lat, cos_lat) = lat.sin_cos();
        let n = self.ellipsoid.prime_vertical_radius(lat);
        let e2 = self.ellipsoid.eccentricity_squared();
        let r = (n + height) * cos_lat;
        [
            r * cos_lon,
            r * sin_lon,
            (n * (1.0 - e2) + height) * sin_lat,
        ]
    }

    fn jacobian_3d(&self, pt: &[f64]) -> Matrix {
        let k = 1f64.to_radians();
        let (sin_lon, cos_lon) = pt[0].to_radians().sin_cos();
        let lat = pt[1].to_radians();
        let (sin_lat, cos_lat) = lat.sin_cos();
        let h = pt.get(2).copied().unwrap_or(0.0);
        let n = self.ellipsoid.prime_vertical_radius(lat);
        let m = self.ellipsoid.meridional_radius(lat);

        let mut jac = Matrix::zeros(3, 3);
        jac.set(0, 0, -(n + h) * cos_lat * sin_lon * k);
        jac.set(1, 0, (n + h) * cos_lat * cos_lon * k);

        jac.set(0, 1, -(m + h) * sin_lat * cos_lon * k);
        jac.set(1, 1, -(m + h) * sin_lat * sin_lon * k);
        jac.set(2, 1, (m + h) * cos_lat * k);

        jac.set(0, 2, cos_lat * cos_lon);
        jac.set(1, 2, cos_lat * sin_lon);
        jac.set(2, 2, sin_lat);
        jac
    }
}

fn ellipsoid_parameters(name: &str, ellipsoid: &Ellipsoid, has_height: bool) -> ParameterGroup {
    ParameterGroup::new(name)
        .with("semi_major", ellipsoid.semi_major_axis())
        .with("semi_minor", ellipsoid.semi_minor_axis())
        .with("dim", if has_height { 3_usize } else { 2_usize })
}

impl Transformation for Geocentric {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> TransformResult<()> {
        let height = if self.has_height { pt[2] } else { 0.0 };
        buf.copy_from_slice(&self.to_cartesian(pt[0], pt[1], height));
        Ok(())
    }

    fn invert(&self) -> TransformResult<Arc<dyn Transformation>> {
        let inv = self.inverse.get_or_init(|| {
            let inverse = GeocentricInverse::new(self.ellipsoid, self.has_height);
            let _ = inverse
                .inverse
                .set(Arc::new(self.with_height(self.has_height)) as Arc<dyn Transformation>);
            Arc::new(inverse)
        });
        Ok(inv.clone())
    }

    fn derivative(&self, pt: &[f64]) -> TransformResult<Matrix> {
        let jac = self.jacobian_3d(pt);
        if self.has_height {
            return Ok(jac);
        }
        let mut out = Matrix::zeros(3, 2);
        jac.copy_sub_matrix(0, 0, 3, 2, 0, 0, &mut out)?;
        Ok(out)
    }

    fn is_identity(&self) -> bool {
        false
    }

    fn input_ndim(&self) -> usize {
        if self.has_height { 3 } else { 2 }
    }

    fn output_ndim(&self) -> usize {
        3
    }

    fn parameters(&self) -> Option<ParameterGroup> {
        Some(ellipsoid_parameters(
            "Ellipsoid_To_Geocentric",
            &self.ellipsoid,
            self.has_height,
        ))
    }
}

/// Geocentric Cartesian to geographic coordinates,
/// refining the latitude iteratively from a closed-form first guess.
#[derive(Debug, Clone)]
pub struct GeocentricInverse {
    forward: Geocentric,
    inverse: OnceLock<Arc<dyn Transformation>>,
}

impl PartialEq for GeocentricInverse {
    fn eq(&self, other: &Self) -> bool {
        self.forward == other.forward
    }
}

impl GeocentricInverse {
    pub fn new(ellipsoid: Ellipsoid, has_height: bool) -> Self {
        Self {
            forward: Geocentric::new(ellipsoid, has_height),
            inverse: OnceLock::new(),
        }
    }

    /// Longitude and latitude in degrees, ellipsoidal height.
    ///
    /// NaN input yields NaN output rather than an error.
    pub fn to_geographic(&self, x: f64, y: f64, z: f64) -> TransformResult<[f64; 3]> {
        if x.is_nan() || y.is_nan() || z.is_nan() {
            return Ok([f64::NAN; 3]);
        }
        let ellipsoid = &self.forward.ellipsoid;
        let a = ellipsoid.semi_major_axis();
        let b = ellipsoid.semi_minor_axis();
        let lon = y.atan2(x);
        let p = x.hypot(y);

        if ellipsoid.is_sphere() {
            let lat = z.atan2(p);
            return Ok([lon.to_degrees(), lat.to_degrees(), p.hypot(z) - a]);
        }
        if p <= a * 1e-15 {
            // on the polar axis
            let lat = if z < 0.0 { -90.0 } else { 90.0 };
            return Ok([lon.to_degrees(), lat, z.abs() - b]);
        }

        let e2 = ellipsoid.eccentricity_squared();
        let mut lat = z.atan2(p * (1.0 - e2));
        for _ in 0..MAX_ITERATIONS {
            let (sin_lat, cos_lat) = lat.sin_cos();
            let n = ellipsoid.prime_vertical_radius(lat);
            let h = p * cos_lat + z * sin_lat - a * a / n;
            let next = z.atan2(p * (1.0 - e2 * n / (n + h)));
            if (next - lat).abs() < TOLERANCE {
                let (sin_lat, cos_lat) = next.sin_cos();
                let n = ellipsoid.prime_vertical_radius(next);
                let h = p * cos_lat + z * sin_lat - a * a / n;
                return Ok([lon.to_degrees(), next.to_degrees(), h]);
            }
            lat = next;
        }
        log::debug!("Geocentric inverse did not converge for ({x}, {y}, {z})");
        Err(TransformError::NoConvergence {
            operation: "geocentric to geographic",
            iterations: MAX_ITERATIONS,
        })
    }
}

impl Transformation for GeocentricInverse {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> TransformResult<()> {
        let geo = self.to_geographic(pt[0], pt[1], pt[2])?;
        let n = buf.len();
        buf.copy_from_slice(&geo[..n]);
        Ok(())
    }

    fn invert(&self) -> TransformResult<Arc<dyn Transformation>> {
        let inv = self.inverse.get_or_init(|| {
            let (ellipsoid, has_height) = (self.forward.ellipsoid, self.forward.has_height);
            let forward = Geocentric::new(ellipsoid, has_height);
            let _ = forward
                .inverse
                .set(Arc::new(Self::new(ellipsoid, has_height)) as Arc<dyn Transformation>);
            Arc::new(forward)
        });
        Ok(inv.clone())
    }

    fn derivative(&self, pt: &[f64]) -> TransformResult<Matrix> {
        let ellipsoid = self.forward.ellipsoid;
        let forward_3d = Geocentric::new(ellipsoid, true);
        let inverse_3d = GeocentricInverse::new(ellipsoid, true);
        let jac = inverse_derivative(&forward_3d, &inverse_3d, pt)?;
        if self.forward.has_height {
            return Ok(jac);
        }
        let mut out = Matrix::zeros(2, 3);
        jac.copy_sub_matrix(0, 0, 2, 3, 0, 0, &mut out)?;
        Ok(out)
    }

    fn is_identity(&self) -> bool {
        false
    }

    fn input_ndim(&self) -> usize {
        3
    }

    fn output_ndim(&self) -> usize {
        self.forward.input_ndim()
    }

    fn parameters(&self) -> Option<ParameterGroup> {
        Some(ellipsoid_parameters(
            "Geocentric_To_Ellipsoid",
            &self.forward.ellipsoid,
            self.forward.has_height,
        ))
    }
}
