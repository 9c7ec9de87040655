//! Thin-plate splines: minimum-curvature interpolation through scattered control points.
use std::sync::{Arc, OnceLock};

use super::warp::{EMPTY_POSITIONS, check_control_points};
use crate::{Matrix, ParameterGroup, TransformError, TransformResult, Transformation};

/// Radial basis `r² ln r`, zero at the centre.
fn kernel(r2: f64) -> f64 {
    let r = r2.sqrt();
    if r < f64::EPSILON { 0.0 } else { r2 * r.ln() }
}

/// `∂/∂u` of [kernel] divided by `u - uᵢ`, i.e. `2 ln r + 1`.
fn kernel_slope(r2: f64) -> f64 {
    let r = r2.sqrt();
    if r < f64::EPSILON { 0.0 } else { 2.0 * r.ln() + 1.0 }
}

/// Solved spline system shared by the scalar interpolator and the 2-D transform.
///
/// Nodes are centred on their mean and scaled by their largest extent;
/// the interpolant is unchanged by this, only the conditioning is.
#[derive(Debug, Clone, PartialEq)]
struct Spline {
    centre: [f64; 2],
    scale: f64,
    nodes: Vec<[f64; 2]>,
    /// `(n + 3) × k`: one radial weight per node, then `a0, a1, a2` of the affine part.
    coeffs: Matrix,
}

impl Spline {
    fn fit(points: &[[f64; 2]], values: &Matrix) -> TransformResult<Self> {
        let n = points.len();
        if n < 3 {
            return Err(TransformError::invalid_argument(format!(
                "A thin-plate spline needs at least 3 control points, got {n}"
            )));
        }
        if let Some(dup) = find_duplicate(points) {
            return Err(TransformError::invalid_argument(format!(
                "Duplicate control point ({}, {})",
                dup[0], dup[1]
            )));
        }

        let inv_n = 1.0 / n as f64;
        let centre = [
            points.iter().map(|p| p[0]).sum::<f64>() * inv_n,
            points.iter().map(|p| p[1]).sum::<f64>() * inv_n,
        ];
        let scale = points
            .iter()
            .map(|p| (p[0] - centre[0]).abs().max((p[1] - centre[1]).abs()))
            .fold(0.0, f64::max);
        let nodes: Vec<[f64; 2]> = points
            .iter()
            .map(|p| [(p[0] - centre[0]) / scale, (p[1] - centre[1]) / scale])
            .collect();

        let size = n + 3;
        let mut system = Matrix::zeros(size, size);
        let mut rhs = Matrix::zeros(size, values.ncols());
        for (i, pi) in nodes.iter().enumerate() {
            for (j, pj) in nodes.iter().enumerate().skip(i + 1) {
                let k = kernel(dist2(pi, pj));
                system.set(i, j, k);
                system.set(j, i, k);
            }
            for (c, p) in [1.0, pi[0], pi[1]].into_iter().enumerate() {
                system.set(i, n + c, p);
                system.set(n + c, i, p);
            }
            for c in 0..values.ncols() {
                rhs.set(i, c, values[(i, c)]);
            }
        }
        let coeffs = system.solve(&rhs).map_err(|_| {
            TransformError::invalid_argument("Control points must not all be collinear.")
        })?;
        log::debug!("Fitted thin-plate spline through {n} control points");
        Ok(Self {
            centre,
            scale,
            nodes,
            coeffs,
        })
    }

    fn normalise(&self, x: f64, y: f64) -> [f64; 2] {
        [
            (x - self.centre[0]) / self.scale,
            (y - self.centre[1]) / self.scale,
        ]
    }

    fn evaluate_into(&self, x: f64, y: f64, out: &mut [f64]) {
        let p = self.normalise(x, y);
        let n = self.nodes.len();
        for (c, o) in out.iter_mut().enumerate() {
            let affine = self.coeffs[(n, c)]
                + self.coeffs[(n + 1, c)] * p[0]
                + self.coeffs[(n + 2, c)] * p[1];
            *o = affine
                + self
                    .nodes
                    .iter()
                    .enumerate()
                    .map(|(i, node)| self.coeffs[(i, c)] * kernel(dist2(&p, node)))
                    .sum::<f64>();
        }
    }

    /// Jacobian with one row per value column.
    fn gradient(&self, x: f64, y: f64) -> Matrix {
        let p = self.normalise(x, y);
        let n = self.nodes.len();
        let mut jac = Matrix::zeros(self.coeffs.ncols(), 2);
        for c in 0..self.coeffs.ncols() {
            let mut du = self.coeffs[(n + 1, c)];
            let mut dv = self.coeffs[(n + 2, c)];
            for (i, node) in self.nodes.iter().enumerate() {
                let s = self.coeffs[(i, c)] * kernel_slope(dist2(&p, node));
                du += s * (p[0] - node[0]);
                dv += s * (p[1] - node[1]);
            }
            jac.set(c, 0, du / self.scale);
            jac.set(c, 1, dv / self.scale);
        }
        jac
    }
}

fn dist2(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

fn find_duplicate(points: &[[f64; 2]]) -> Option<[f64; 2]> {
    // -0.0 + 0.0 is +0.0, so signed zeros compare and sort together
    let mut sorted: Vec<[f64; 2]> = points.iter().map(|p| [p[0] + 0.0, p[1] + 0.0]).collect();
    sorted.sort_by(|a, b| a[0].total_cmp(&b[0]).then(a[1].total_cmp(&b[1])));
    sorted.windows(2).find(|w| w[0] == w[1]).map(|w| w[0])
}

/// Scalar thin-plate spline over the plane.
#[derive(Debug, Clone, PartialEq)]
pub struct ThinPlateSpline2D {
    spline: Spline,
}

impl ThinPlateSpline2D {
    /// Interpolant taking `values[i]` at `points[i]`.
    pub fn try_new(points: &[[f64; 2]], values: &[f64]) -> TransformResult<Self> {
        if points.is_empty() || values.is_empty() {
            return Err(TransformError::invalid_argument(EMPTY_POSITIONS));
        }
        if points.len() != values.len() {
            return Err(TransformError::invalid_argument(
                "Positions and values lists must be the same size.",
            ));
        }
        let values = Matrix::try_new(values.to_vec(), 1)?;
        Ok(Self {
            spline: Spline::fit(points, &values)?,
        })
    }

    /// Exact at the control points; extrapolation is unbounded.
    pub fn interpolate(&self, x: f64, y: f64) -> f64 {
        let mut out = [f64::NAN];
        self.spline.evaluate_into(x, y, &mut out);
        out[0]
    }
}

/// Two-dimensional warp through matched control points,
/// one thin-plate spline per output ordinate.
#[derive(Debug)]
pub struct ThinPlateSplineTransform {
    source: Vec<[f64; 2]>,
    target: Vec<[f64; 2]>,
    spline: Spline,
    inverse: OnceLock<Arc<dyn Transformation>>,
}

impl PartialEq for ThinPlateSplineTransform {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.target == other.target
    }
}

impl ThinPlateSplineTransform {
    pub fn try_new(source: &[[f64; 2]], target: &[[f64; 2]]) -> TransformResult<Self> {
        check_control_points(source, target)?;
        let values = Matrix::try_new(target.iter().flatten().copied().collect(), 2)?;
        Ok(Self {
            source: source.to_vec(),
            target: target.to_vec(),
            spline: Spline::fit(source, &values)?,
            inverse: OnceLock::new(),
        })
    }

    pub fn source_points(&self) -> &[[f64; 2]] {
        &self.source
    }

    pub fn target_points(&self) -> &[[f64; 2]] {
        &self.target
    }

    fn uncached(&self) -> Self {
        Self {
            source: self.source.clone(),
            target: self.target.clone(),
            spline: self.spline.clone(),
            inverse: OnceLock::new(),
        }
    }
}

impl Transformation for ThinPlateSplineTransform {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> TransformResult<()> {
        self.spline.evaluate_into(pt[0], pt[1], &mut buf[..2]);
        Ok(())
    }

    /// A second spline with source and target swapped.
    /// It is exact at the control points only; elsewhere the round trip
    /// is as good as the spline's approximation of the true inverse.
    fn invert(&self) -> TransformResult<Arc<dyn Transformation>> {
        if let Some(inv) = self.inverse.get() {
            return Ok(inv.clone());
        }
        let mut inverse = Self::try_new(&self.target, &self.source).map_err(|e| {
            TransformError::noninvertible(format!("cannot fit the reverse spline: {e}"))
        })?;
        inverse.inverse = OnceLock::from(Arc::new(self.uncached()) as Arc<dyn Transformation>);
        Ok(self.inverse.get_or_init(|| Arc::new(inverse)).clone())
    }

    fn derivative(&self, pt: &[f64]) -> TransformResult<Matrix> {
        Ok(self.spline.gradient(pt[0], pt[1]))
    }

    fn is_identity(&self) -> bool {
        false
    }

    fn input_ndim(&self) -> usize {
        2
    }

    fn output_ndim(&self) -> usize {
        2
    }

    fn parameters(&self) -> Option<ParameterGroup> {
        let mut group = ParameterGroup::new("ThinPlateSpline");
        for (idx, (s, t)) in self.source.iter().zip(&self.target).enumerate() {
            group.set(format!("source_{idx}"), *s);
            group.set(format!("target_{idx}"), *t);
        }
        Some(group.with("num_points", self.source.len()))
    }
}
