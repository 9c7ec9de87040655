//! Molodenski datum shifts, operating directly on geographic coordinates.
use std::f64::consts::{FRAC_PI_2, PI};
use std::sync::{Arc, OnceLock};

use crate::{Ellipsoid, ParameterGroup, TransformResult, Transformation};

/// Approximate datum shift between two geographic coordinate systems
/// (EPSG methods 9604 and 9605).
///
/// Input and output are `(longitude, latitude[, height])` in degrees and metres.
/// Each side carries a height ordinate or not, independently.
/// A missing source height is taken as zero.
#[derive(Debug, Clone)]
pub struct Molodenski {
    abridged: bool,
    source: Ellipsoid,
    source_3d: bool,
    target: Ellipsoid,
    target_3d: bool,
    dx: f64,
    dy: f64,
    dz: f64,
    // Derived from the two ellipsoids
    da: f64,
    df: f64,
    adf: f64,
    e2: f64,
    inverse: OnceLock<Arc<dyn Transformation>>,
}

impl PartialEq for Molodenski {
    fn eq(&self, other: &Self) -> bool {
        self.abridged == other.abridged
            && self.source == other.source
            && self.source_3d == other.source_3d
            && self.target == other.target
            && self.target_3d == other.target_3d
            && self.translation() == other.translation()
    }
}

impl Molodenski {
    /// `dx, dy, dz` is the geocentric translation from the source to the target datum.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        abridged: bool,
        source: Ellipsoid,
        source_3d: bool,
        target: Ellipsoid,
        target_3d: bool,
        dx: f64,
        dy: f64,
        dz: f64,
    ) -> Self {
        let a = source.semi_major_axis();
        let b = source.semi_minor_axis();
        let da = target.semi_major_axis() - a;
        let df = target.flattening() - source.flattening();
        Self {
            abridged,
            source,
            source_3d,
            target,
            target_3d,
            dx,
            dy,
            dz,
            da,
            df,
            adf: a * df + (a - b) * da / a,
            e2: source.eccentricity_squared(),
            inverse: OnceLock::new(),
        }
    }

    fn uncached(&self) -> Self {
        Self {
            inverse: OnceLock::new(),
            ..self.clone()
        }
    }

    pub fn is_abridged(&self) -> bool {
        self.abridged
    }

    pub fn source_ellipsoid(&self) -> &Ellipsoid {
        &self.source
    }

    pub fn target_ellipsoid(&self) -> &Ellipsoid {
        &self.target
    }

    pub fn translation(&self) -> [f64; 3] {
        [self.dx, self.dy, self.dz]
    }

    /// Same shift with different height handling on either side.
    pub fn with_dimensions(&self, source_3d: bool, target_3d: bool) -> Self {
        Self::new(
            self.abridged,
            self.source,
            source_3d,
            self.target,
            target_3d,
            self.dx,
            self.dy,
            self.dz,
        )
    }

    /// Shift one point; angles in degrees.
    pub fn shift(&self, lon: f64, lat: f64, height: f64) -> (f64, f64, f64) {
        let a = self.source.semi_major_axis();
        let b = self.source.semi_minor_axis();
        let (dx, dy, dz) = (self.dx, self.dy, self.dz);

        let x = lon.to_radians();
        let y = lat.to_radians();
        let (sin_x, cos_x) = x.sin_cos();
        let (sin_y, cos_y) = y.sin_cos();
        let sin2_y = sin_y * sin_y;
        let rn = a / (1.0 - self.e2 * sin2_y).sqrt();
        let rm = rn * (1.0 - self.e2) / (1.0 - self.e2 * sin2_y);

        // The division by sin(1") is omitted; the error is around 8e-7 arc-seconds.
        let (new_x, new_y) = if self.abridged {
            (
                x + (dy * cos_x - dx * sin_x) / (rn * cos_y),
                y + (dz * cos_y - sin_y * (dy * sin_x + dx * cos_x) + self.adf * (2.0 * y).sin())
                    / rm,
            )
        } else {
            (
                x + (dy * cos_x - dx * sin_x) / ((rn + height) * cos_y),
                y + (dz * cos_y - sin_y * (dy * sin_x + dx * cos_x)
                    + self.da / a * (rn * self.e2 * sin_y * cos_y)
                    + self.df * (rm * (a / b) + rn * (b / a)) * sin_y * cos_y)
                    / (rm + height),
            )
        };

        let (out_lon, out_lat) = if new_y.abs() > FRAC_PI_2 {
            (0.0, if new_y > 0.0 { 90.0 } else { -90.0 })
        } else {
            (roll_longitude(new_x).to_degrees(), new_y.to_degrees())
        };

        let common = dx * cos_y * cos_x + dy * cos_y * sin_x + dz * sin_y;
        let out_height = if self.abridged {
            height + common + self.adf * sin2_y - self.da
        } else {
            height + common + self.df * (b / a) * rn * sin2_y - self.da * a / rn
        };
        (out_lon, out_lat, out_height)
    }

    fn name(&self) -> &'static str {
        if self.abridged {
            "Abridged_Molodenski"
        } else {
            "Molodenski"
        }
    }
}

/// Bring a longitude in radians into `[-π, π)`.
fn roll_longitude(x: f64) -> f64 {
    x - 2.0 * PI * (x / (2.0 * PI) + 0.5).floor()
}

impl Transformation for Molodenski {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> TransformResult<()> {
        let height = if self.source_3d { pt[2] } else { 0.0 };
        let (lon, lat, h) = self.shift(pt[0], pt[1], height);
        buf[0] = lon;
        buf[1] = lat;
        if self.target_3d {
            buf[2] = h;
        }
        Ok(())
    }

    /// Swaps the ellipsoids and negates the translation;
    /// the round trip is accurate to the order of the Molodenski approximation.
    fn invert(&self) -> TransformResult<Arc<dyn Transformation>> {
        if let Some(inv) = self.inverse.get() {
            return Ok(inv.clone());
        }
        let mut inverse = Self::new(
            self.abridged,
            self.target,
            self.target_3d,
            self.source,
            self.source_3d,
            -self.dx,
            -self.dy,
            -self.dz,
        );
        inverse.inverse = OnceLock::from(Arc::new(self.uncached()) as Arc<dyn Transformation>);
        Ok(self.inverse.get_or_init(|| Arc::new(inverse)).clone())
    }

    fn is_identity(&self) -> bool {
        self.source_3d == self.target_3d
            && self.source == self.target
            && self.dx == 0.0
            && self.dy == 0.0
            && self.dz == 0.0
    }

    fn input_ndim(&self) -> usize {
        if self.source_3d { 3 } else { 2 }
    }

    fn output_ndim(&self) -> usize {
        if self.target_3d { 3 } else { 2 }
    }

    fn parameters(&self) -> Option<ParameterGroup> {
        let mut group = ParameterGroup::new(self.name()).with("dim", self.input_ndim());
        if self.source_3d != self.target_3d {
            group = group.with("tgt_dim", self.output_ndim());
        }
        Some(
            group
                .with("dx", self.dx)
                .with("dy", self.dy)
                .with("dz", self.dz)
                .with("src_semi_major", self.source.semi_major_axis())
                .with("src_semi_minor", self.source.semi_minor_axis())
                .with("tgt_semi_major", self.target.semi_major_axis())
                .with("tgt_semi_minor", self.target.semi_minor_axis()),
        )
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::tests::{
        check_inverse_transform_coord_with, check_transform_bulk_with, check_transform_col_with,
        make_coords_in, transform,
    };

    // WGS 84 to ED50, EPSG guidance note 7-2
    fn wgs84_to_ed50(abridged: bool, three_d: bool) -> Molodenski {
        Molodenski::new(
            abridged,
            Ellipsoid::WGS84,
            three_d,
            Ellipsoid::INTERNATIONAL_1924,
            three_d,
            84.87,
            96.49,
            116.95,
        )
    }

    fn coords_3d() -> Vec<Vec<f64>> {
        make_coords_in(200, &[(-170.0, 170.0), (-80.0, 80.0), (-100.0, 3000.0)])
    }

    fn coords_2d() -> Vec<Vec<f64>> {
        make_coords_in(200, &[(-170.0, 170.0), (-80.0, 80.0)])
    }

    #[test]
    fn test_bulk_and_columns() {
        for abridged in [true, false] {
            let t = wgs84_to_ed50(abridged, true);
            check_transform_bulk_with(&t, &coords_3d());
            check_transform_col_with(&t, &coords_3d());
        }
    }

    #[test]
    fn test_round_trip() {
        for abridged in [true, false] {
            check_inverse_transform_coord_with(&wgs84_to_ed50(abridged, false), &coords_2d(), 1e-5);
            check_inverse_transform_coord_with(&wgs84_to_ed50(abridged, true), &coords_3d(), 1e-2);
        }
    }

    #[test]
    fn test_abridged_close_to_full() {
        let abridged = wgs84_to_ed50(true, true);
        let full = wgs84_to_ed50(false, true);
        let pt = [2.1295, 53.8094, 0.0];
        let a = transform(&abridged, &pt);
        let f = transform(&full, &pt);
        assert_relative_eq!(a[0], f[0], epsilon = 1e-5);
        assert_relative_eq!(a[1], f[1], epsilon = 1e-5);
        assert_relative_eq!(a[2], f[2], epsilon = 2.0);
        // shifted towards the north-east by a few arc-seconds
        assert!(a[0] > pt[0] && a[0] - pt[0] < 10.0 / 3600.0);
        assert!(a[1] > pt[1] && a[1] - pt[1] < 10.0 / 3600.0);
    }

    #[test]
    fn test_pure_translations() {
        let e = Ellipsoid::WGS84;
        let dz = Molodenski::new(true, e, true, e, true, 0.0, 0.0, 10.0);
        let out = transform(&dz, &[0.0, 0.0, 0.0]);
        let rm = e.semi_major_axis() * (1.0 - e.eccentricity_squared());
        assert_relative_eq!(out[0], 0.0);
        assert_relative_eq!(out[1], (10.0 / rm).to_degrees(), max_relative = 1e-12);
        assert_relative_eq!(out[2], 0.0, epsilon = 1e-12);

        let dx = Molodenski::new(false, e, true, e, true, 10.0, 0.0, 0.0);
        let out = transform(&dx, &[0.0, 0.0, 5.0]);
        assert_relative_eq!(out[0], 0.0);
        assert_relative_eq!(out[1], 0.0);
        assert_relative_eq!(out[2], 15.0, epsilon = 1e-9);
    }

    #[test]
    fn test_two_and_three_dimensional_agree() {
        let flat = wgs84_to_ed50(false, false);
        let full = wgs84_to_ed50(false, true);
        let mixed = full.with_dimensions(false, true);
        assert_eq!(mixed.input_ndim(), 2);
        assert_eq!(mixed.output_ndim(), 3);
        for pt in coords_2d() {
            let h = transform(&flat, &pt);
            let f = transform(&full, &[pt[0], pt[1], 0.0]);
            let m = transform(&mixed, &pt);
            assert_eq!(&h[..], &f[..2]);
            assert_eq!(f, m);
        }
    }

    #[test]
    fn test_pole_is_clamped() {
        let e = Ellipsoid::WGS84;
        let t = Molodenski::new(true, e, false, e, false, -100.0, 0.0, 0.0);
        assert_eq!(transform(&t, &[0.0, 90.0]), vec![0.0, 90.0]);
        assert_eq!(transform(&t, &[0.0, -90.0]), vec![0.0, -90.0]);
    }

    #[test]
    fn test_longitude_rolls() {
        let e = Ellipsoid::WGS84;
        let t = Molodenski::new(true, e, false, e, false, 0.0, -1000.0, 0.0);
        let out = transform(&t, &[179.9999, 0.0]);
        assert!(out[0] < -179.9);
    }

    #[test]
    fn test_identity_and_parameters() {
        let e = Ellipsoid::GRS80;
        assert!(Molodenski::new(false, e, true, e, true, 0.0, 0.0, 0.0).is_identity());
        assert!(!Molodenski::new(false, e, true, e, false, 0.0, 0.0, 0.0).is_identity());

        let params = wgs84_to_ed50(true, false).parameters().unwrap();
        assert_eq!(params.name(), "Abridged_Molodenski");
        assert_eq!(params.integer("dim").unwrap(), 2);
        assert_eq!(params.real("dz").unwrap(), 116.95);
        assert_eq!(params.real("tgt_semi_major").unwrap(), 6_378_388.0);
    }

    #[test]
    fn test_inverse_is_cached() {
        let t = wgs84_to_ed50(false, true);
        let inv = t.invert().unwrap();
        assert!(Arc::ptr_eq(&inv, &t.invert().unwrap()));

        let back = inv.invert().unwrap();
        assert!(Arc::ptr_eq(&back, &inv.invert().unwrap()));
        let pt = [2.0, 50.0, 100.0];
        assert_eq!(transform(back.as_ref(), &pt), transform(&t, &pt));
    }
}
