//! Helmert-style datum shifts in the geocentric domain.
use std::f64::consts::PI;
use std::sync::Arc;

use crate::{
    Affine, Ellipsoid, Geocentric, GeocentricInverse, Matrix, ParameterGroup, TransformResult,
    Transformation, concatenate,
};

/// Sign convention of the three rotation parameters.
///
/// Both conventions describe the same physical rotation with opposite signs,
/// e.g. `ez = +0.554"` as a position vector is `ez = -0.554"` as a coordinate frame rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RotationConvention {
    /// EPSG method 9606: rotations apply to the position vector.
    PositionVector,
    /// EPSG method 9607: rotations apply to the coordinate frame.
    CoordinateFrame,
}

/// Seven parameters of a Bursa-Wolf datum shift.
///
/// Translations in metres, rotations in arc-seconds, scale in parts per million.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BursaWolfParameters {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    pub ex: f64,
    pub ey: f64,
    pub ez: f64,
    pub ppm: f64,
}

impl BursaWolfParameters {
    pub fn translation(dx: f64, dy: f64, dz: f64) -> Self {
        Self {
            dx,
            dy,
            dz,
            ..Default::default()
        }
    }

    /// Only the three translation terms are non-zero.
    pub fn is_translation(&self) -> bool {
        self.ex == 0.0 && self.ey == 0.0 && self.ez == 0.0 && self.ppm == 0.0
    }

    pub fn is_identity(&self) -> bool {
        self.is_translation() && self.dx == 0.0 && self.dy == 0.0 && self.dz == 0.0
    }

    /// Augmented 4×4 matrix of the shift in the given convention.
    pub fn matrix(&self, convention: RotationConvention) -> Matrix {
        let s = 1.0 + self.ppm * 1e-6;
        let sign = match convention {
            RotationConvention::PositionVector => 1.0,
            RotationConvention::CoordinateFrame => -1.0,
        };
        let rs = sign * (PI / 180.0 / 3600.0) * s;
        let (rx, ry, rz) = (self.ex * rs, self.ey * rs, self.ez * rs);
        let mut m = Matrix::identity(4);
        for (r, row) in [[s, -rz, ry, self.dx], [rz, s, -rx, self.dy], [-ry, rx, s, self.dz]]
            .iter()
            .enumerate()
        {
            for (c, v) in row.iter().enumerate() {
                m.set(r, c, *v);
            }
        }
        m
    }
}

/// Linear datum shift between two geocentric coordinate systems.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocentricTranslation {
    parameters: BursaWolfParameters,
    convention: RotationConvention,
    affine: Affine,
}

impl GeocentricTranslation {
    pub fn new(parameters: BursaWolfParameters, convention: RotationConvention) -> Self {
        let affine = Affine::from_affine_unchecked(parameters.matrix(convention));
        Self {
            parameters,
            convention,
            affine,
        }
    }

    pub fn bursa_wolf(&self) -> &BursaWolfParameters {
        &self.parameters
    }

    pub fn convention(&self) -> RotationConvention {
        self.convention
    }

    /// The full geographic pipeline: geographic → geocentric → shift → geographic.
    ///
    /// Each side may carry an ellipsoidal height or not;
    /// a missing source height is taken as zero and the target height is dropped.
    pub fn geographic_pipeline(
        &self,
        source: Ellipsoid,
        source_3d: bool,
        target: Ellipsoid,
        target_3d: bool,
    ) -> TransformResult<Arc<dyn Transformation>> {
        let step1: Arc<dyn Transformation> = Arc::new(Geocentric::new(source, source_3d));
        let step2: Arc<dyn Transformation> = Arc::new(self.clone());
        let step3: Arc<dyn Transformation> = Arc::new(GeocentricInverse::new(target, target_3d));
        concatenate(concatenate(step1, step2)?, step3)
    }
}

impl Transformation for GeocentricTranslation {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> TransformResult<()> {
        self.affine.transform_into(pt, buf)
    }

    fn column_transform_into(
        &self,
        columns: &[&[f64]],
        bufs: &mut [&mut [f64]],
    ) -> TransformResult<()> {
        self.affine.column_transform_into(columns, bufs)
    }

    fn invert(&self) -> TransformResult<Arc<dyn Transformation>> {
        self.affine.invert()
    }

    fn derivative(&self, pt: &[f64]) -> TransformResult<Matrix> {
        self.affine.derivative(pt)
    }

    fn is_identity(&self) -> bool {
        self.parameters.is_identity()
    }

    fn input_ndim(&self) -> usize {
        3
    }

    fn output_ndim(&self) -> usize {
        3
    }

    fn matrix(&self) -> Option<Matrix> {
        self.affine.matrix()
    }

    fn parameters(&self) -> Option<ParameterGroup> {
        let p = &self.parameters;
        let group = if p.is_translation() {
            ParameterGroup::new("Geocentric translations (geocentric domain)")
        } else {
            let name = match self.convention {
                RotationConvention::PositionVector => {
                    "Position Vector transformation (geocentric domain)"
                }
                RotationConvention::CoordinateFrame => {
                    "Coordinate Frame rotation (geocentric domain)"
                }
            };
            ParameterGroup::new(name)
                .with("ex", p.ex)
                .with("ey", p.ey)
                .with("ez", p.ez)
                .with("ppm", p.ppm)
        };
        Some(group.with("dx", p.dx).with("dy", p.dy).with("dz", p.dz))
    }
}
