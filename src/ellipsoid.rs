//! Reference ellipsoids and geodesic distances on them.
use std::f64::consts::PI;

use crate::{TransformError, TransformResult};

/// Iteration cap of the Vincenty inverse solution.
pub const VINCENTY_MAX_ITERATIONS: usize = 100;
/// Convergence threshold on longitude on the auxiliary sphere, in radians.
pub const VINCENTY_TOLERANCE: f64 = 1e-12;

/// Ellipsoid of revolution, axes in metres (or any consistent length unit).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    semi_major: f64,
    semi_minor: f64,
}

impl Ellipsoid {
    /// EPSG 7030
    pub const WGS84: Self = Self::from_flattening_unchecked(6_378_137.0, 298.257_223_563);
    /// EPSG 7019
    pub const GRS80: Self = Self::from_flattening_unchecked(6_378_137.0, 298.257_222_101);
    /// EPSG 7008
    pub const CLARKE_1866: Self = Self {
        semi_major: 6_378_206.4,
        semi_minor: 6_356_583.8,
    };
    /// EPSG 7022
    pub const INTERNATIONAL_1924: Self = Self::from_flattening_unchecked(6_378_388.0, 297.0);
    /// Authalic sphere, EPSG 7035
    pub const SPHERE: Self = Self {
        semi_major: 6_371_007.0,
        semi_minor: 6_371_007.0,
    };

    const fn from_flattening_unchecked(semi_major: f64, inverse_flattening: f64) -> Self {
        Self {
            semi_major,
            semi_minor: semi_major * (1.0 - 1.0 / inverse_flattening),
        }
    }

    pub fn from_axes(semi_major: f64, semi_minor: f64) -> TransformResult<Self> {
        if !(semi_major.is_finite() && semi_major > 0.0) {
            return Err(TransformError::invalid_parameter(
                "semi_major",
                format!("{semi_major} is not a positive length"),
            ));
        }
        if !(semi_minor.is_finite() && semi_minor > 0.0 && semi_minor <= semi_major) {
            return Err(TransformError::invalid_parameter(
                "semi_minor",
                format!("{semi_minor} must be positive and no longer than the semi-major axis"),
            ));
        }
        Ok(Self {
            semi_major,
            semi_minor,
        })
    }

    /// An infinite inverse flattening gives a sphere.
    pub fn from_flattening(semi_major: f64, inverse_flattening: f64) -> TransformResult<Self> {
        if inverse_flattening.is_infinite() {
            return Self::from_axes(semi_major, semi_major);
        }
        if !(inverse_flattening > 1.0) {
            return Err(TransformError::invalid_parameter(
                "inverse_flattening",
                format!("{inverse_flattening} must be greater than one"),
            ));
        }
        Self::from_axes(semi_major, semi_major * (1.0 - 1.0 / inverse_flattening))
    }

    pub fn sphere(radius: f64) -> TransformResult<Self> {
        Self::from_axes(radius, radius)
    }

    pub fn semi_major_axis(&self) -> f64 {
        self.semi_major
    }

    pub fn semi_minor_axis(&self) -> f64 {
        self.semi_minor
    }

    pub fn is_sphere(&self) -> bool {
        self.semi_major == self.semi_minor
    }

    pub fn flattening(&self) -> f64 {
        (self.semi_major - self.semi_minor) / self.semi_major
    }

    /// Infinite for a sphere.
    pub fn inverse_flattening(&self) -> f64 {
        self.semi_major / (self.semi_major - self.semi_minor)
    }

    /// e² = 1 - b²/a²
    pub fn eccentricity_squared(&self) -> f64 {
        let ratio = self.semi_minor / self.semi_major;
        1.0 - ratio * ratio
    }

    pub fn eccentricity(&self) -> f64 {
        self.eccentricity_squared().sqrt()
    }

    /// Radius of curvature in the prime vertical, N = a / √(1 - e²·sin²φ)
    pub fn prime_vertical_radius(&self, lat_rad: f64) -> f64 {
        let sin_lat = lat_rad.sin();
        self.semi_major / (1.0 - self.eccentricity_squared() * sin_lat * sin_lat).sqrt()
    }

    /// Radius of curvature in the meridian, M = a(1 - e²) / (1 - e²·sin²φ)^(3/2)
    pub fn meridional_radius(&self, lat_rad: f64) -> f64 {
        let sin_lat = lat_rad.sin();
        let e2 = self.eccentricity_squared();
        self.semi_major * (1.0 - e2) / (1.0 - e2 * sin_lat * sin_lat).powf(1.5)
    }

    /// Length of the equator; an upper bound on any orthodromic distance.
    pub fn circumference(&self) -> f64 {
        2.0 * PI * self.semi_major
    }

    /// Shortest distance over the surface between two points given in decimal degrees.
    ///
    /// Uses Vincenty's inverse solution on an ellipsoid and the haversine formula on a sphere.
    /// Where Vincenty's iteration does not converge (nearly antipodal points),
    /// the great-circle distance on the mean radius is used instead,
    /// capped at half the meridian length.
    /// The result always lies in `[0, circumference]`.
    pub fn orthodromic_distance(
        &self,
        lon1: f64,
        lat1: f64,
        lon2: f64,
        lat2: f64,
    ) -> TransformResult<f64> {
        for (name, lat) in [("lat1", lat1), ("lat2", lat2)] {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(TransformError::invalid_argument(format!(
                    "{name} = {lat} is outside [-90, 90]"
                )));
            }
        }
        if self.is_sphere() {
            return Ok(self.great_circle_distance(lon1, lat1, lon2, lat2));
        }
        match self.vincenty_distance(lon1, lat1, lon2, lat2) {
            Some(d) => Ok(d),
            None => {
                log::debug!(
                    "Vincenty distance ({lon1}, {lat1}) -> ({lon2}, {lat2}) did not converge \
                     after {VINCENTY_MAX_ITERATIONS} iterations; using mean-radius great circle"
                );
                let estimate = central_angle(lon1, lat1, lon2, lat2) * self.mean_radius();
                Ok(estimate.clamp(0.0, self.half_meridian_length()))
            }
        }
    }

    /// Arithmetic mean radius `(2a + b) / 3`.
    pub fn mean_radius(&self) -> f64 {
        (2.0 * self.semi_major + self.semi_minor) / 3.0
    }

    /// Distance from pole to pole along a meridian,
    /// the longest orthodromic distance on an oblate ellipsoid.
    pub fn half_meridian_length(&self) -> f64 {
        // Ramanujan's second approximation of the ellipse perimeter
        let (a, b) = (self.semi_major, self.semi_minor);
        let h = ((a - b) / (a + b)).powi(2);
        PI / 2.0 * (a + b) * (1.0 + 3.0 * h / (10.0 + (4.0 - 3.0 * h).sqrt()))
    }

    fn great_circle_distance(&self, lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
        self.semi_major * central_angle(lon1, lat1, lon2, lat2)
    }

    /// `None` if the longitude on the auxiliary sphere does not converge.
    fn vincenty_distance(&self, lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> Option<f64> {
        let a = self.semi_major;
        let b = self.semi_minor;
        let f = self.flattening();

        let l = (lon2 - lon1).to_radians();
        let u1 = ((1.0 - f) * lat1.to_radians().tan()).atan();
        let u2 = ((1.0 - f) * lat2.to_radians().tan()).atan();
        let (sin_u1, cos_u1) = u1.sin_cos();
        let (sin_u2, cos_u2) = u2.sin_cos();

        let mut lambda = l;
        for _ in 0..VINCENTY_MAX_ITERATIONS {
            let (sin_lambda, cos_lambda) = lambda.sin_cos();
            let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
                + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
            .sqrt();
            if sin_sigma == 0.0 {
                // coincident points
                return Some(0.0);
            }
            let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
            let sigma = sin_sigma.atan2(cos_sigma);
            let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
            let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
            // equatorial line: cos_sq_alpha = 0
            let cos_2sigma_m = if cos_sq_alpha != 0.0 {
                cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
            } else {
                0.0
            };
            let c = f / 16.0 * cos_sq_alpha * (4.0 + f * (4.0 - 3.0 * cos_sq_alpha));
            let lambda_prev = lambda;
            lambda = l
                + (1.0 - c)
                    * f
                    * sin_alpha
                    * (sigma
                        + c * sin_sigma
                            * (cos_2sigma_m
                                + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));

            if (lambda - lambda_prev).abs() < VINCENTY_TOLERANCE {
                let u_sq = cos_sq_alpha * (a * a - b * b) / (b * b);
                let big_a = 1.0
                    + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
                let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
                let delta_sigma = big_b
                    * sin_sigma
                    * (cos_2sigma_m
                        + big_b / 4.0
                            * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)
                                - big_b / 6.0
                                    * cos_2sigma_m
                                    * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                                    * (-3.0 + 4.0 * cos_2sigma_m * cos_2sigma_m)));
                return Some(b * big_a * (sigma - delta_sigma));
            }
        }
        None
    }
}

/// Haversine angle between two points in decimal degrees, in radians.
fn central_angle(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = phi2 - phi1;
    let d_lambda = (lon2 - lon1).to_radians();
    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn dms(deg: f64, min: f64, sec: f64) -> f64 {
        deg.signum() * (deg.abs() + min / 60.0 + sec / 3600.0)
    }

    #[test]
    fn test_flinders_peak_to_buninyong() {
        let d = Ellipsoid::GRS80
            .orthodromic_distance(
                dms(144.0, 25.0, 29.5244),
                dms(-37.0, 57.0, 3.7203),
                dms(143.0, 55.0, 35.3839),
                dms(-37.0, 39.0, 10.1561),
            )
            .unwrap();
        assert_relative_eq!(d, 54_972.271, epsilon = 2e-3);
    }

    #[test]
    fn test_along_equator() {
        let e = Ellipsoid::WGS84;
        let d = e.orthodromic_distance(10.0, 0.0, 11.0, 0.0).unwrap();
        assert_relative_eq!(d, e.semi_major_axis() * 1f64.to_radians(), epsilon = 1e-6);
    }

    #[test]
    fn test_sphere_agrees_with_nearly_spherical() {
        let sphere = Ellipsoid::sphere(6_371_000.0).unwrap();
        let nearly = Ellipsoid::from_axes(6_371_000.0, 6_371_000.0 - 1e-6).unwrap();
        let a = sphere.orthodromic_distance(-30.0, 20.0, 40.0, -15.0).unwrap();
        let b = nearly.orthodromic_distance(-30.0, 20.0, 40.0, -15.0).unwrap();
        assert_relative_eq!(a, b, max_relative = 1e-9);
    }

    #[test]
    fn test_within_bounds() {
        let e = Ellipsoid::INTERNATIONAL_1924;
        for (lon, lat) in [(0.0, 0.0), (120.0, 45.0), (-179.0, -89.0)] {
            let d = e.orthodromic_distance(5.0, 5.0, lon, lat).unwrap();
            assert!(d >= 0.0 && d <= e.circumference());
        }
        assert_eq!(e.orthodromic_distance(3.0, 4.0, 3.0, 4.0).unwrap(), 0.0);
    }

    #[test]
    fn test_nearly_antipodal_is_bounded() {
        crate::tests::init_logger();
        let e = Ellipsoid::WGS84;
        let half_meridian = e.half_meridian_length();
        for (lon1, lat1, lon2, lat2) in [(0.0, 0.0, 179.7, 0.0), (0.0, 0.5, 179.5, -0.5)] {
            let d = e.orthodromic_distance(lon1, lat1, lon2, lat2).unwrap();
            assert!(d >= 0.0 && d <= e.circumference(), "{d}");
            assert!(d <= half_meridian, "{d}");
            assert!(d > 0.99 * half_meridian, "{d}");
        }
    }

    #[test]
    fn test_half_meridian_length() {
        // pole to pole on WGS84
        assert_relative_eq!(
            Ellipsoid::WGS84.half_meridian_length(),
            20_003_931.46,
            epsilon = 0.1
        );
        let sphere = Ellipsoid::SPHERE;
        assert_relative_eq!(
            sphere.half_meridian_length(),
            PI * sphere.semi_major_axis(),
            max_relative = 1e-15
        );
    }

    #[test]
    fn test_invalid_axes() {
        assert!(Ellipsoid::from_axes(1.0, 2.0).is_err());
        assert!(Ellipsoid::from_flattening(6_378_137.0, 0.5).is_err());
        assert!(Ellipsoid::from_flattening(6_378_137.0, f64::INFINITY).unwrap().is_sphere());
        assert!(Ellipsoid::WGS84.orthodromic_distance(0.0, 91.0, 0.0, 0.0).is_err());
    }
}
