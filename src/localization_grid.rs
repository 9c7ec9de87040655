//! Transformations defined by a grid of localization points,
//! e.g. the geolocation tie points of a satellite image.
//!
//! Points are collected in a mutable [LocalizationGridBuilder],
//! which [LocalizationGridBuilder::build]s an immutable [LocalizationGrid].
use std::sync::Arc;

use crate::transforms::{WarpPolynomial, linear_from_matrix};
use crate::traits::inverse_derivative;
use crate::{Affine, Matrix, TransformError, TransformResult, Transformation, wkt};

/// Iteration cap of the inverse grid search.
pub const MAX_ITERATIONS: usize = 20;
/// Convergence threshold of the inverse grid search, in grid units.
pub const TOLERANCE: f64 = 1e-10;

/// Residuals below this (relative to the grid's extent) are treated as an exact affine fit.
const AFFINE_TOLERANCE: f64 = 1e-12;

fn check_size(width: usize, height: usize) -> TransformResult<()> {
    if width < 2 || height < 2 {
        return Err(TransformError::invalid_argument(format!(
            "A localization grid needs at least 2x2 points, got {width}x{height}"
        )));
    }
    Ok(())
}

/// Collects the real-world position of each grid point.
/// Unset points are NaN.
#[derive(Debug, Clone)]
pub struct LocalizationGridBuilder {
    width: usize,
    height: usize,
    points: Vec<[f64; 2]>,
}

impl LocalizationGridBuilder {
    pub fn new(width: usize, height: usize) -> TransformResult<Self> {
        check_size(width, height)?;
        Ok(Self {
            width,
            height,
            points: vec![[f64::NAN; 2]; width * height],
        })
    }

    fn offset(&self, grid_x: usize, grid_y: usize) -> TransformResult<usize> {
        if grid_x >= self.width || grid_y >= self.height {
            return Err(TransformError::invalid_argument(format!(
                "Grid point ({grid_x}, {grid_y}) is outside of a {}x{} grid",
                self.width, self.height
            )));
        }
        Ok(grid_y * self.width + grid_x)
    }

    pub fn set_localization_point(
        &mut self,
        grid_x: usize,
        grid_y: usize,
        real_x: f64,
        real_y: f64,
    ) -> TransformResult<()> {
        let idx = self.offset(grid_x, grid_y)?;
        self.points[idx] = [real_x, real_y];
        Ok(())
    }

    pub fn localization_point(&self, grid_x: usize, grid_y: usize) -> TransformResult<[f64; 2]> {
        Ok(self.points[self.offset(grid_x, grid_y)?])
    }

    pub fn build(self) -> LocalizationGrid {
        LocalizationGrid {
            width: self.width,
            height: self.height,
            points: Arc::new(self.points),
        }
    }
}

/// Frozen grid of localization points, cheap to clone and share.
///
/// Grid point `(gx, gy)` has grid coordinates `(gx, gy)`
/// and the real-world coordinates it was given in the builder.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalizationGrid {
    width: usize,
    height: usize,
    points: Arc<Vec<[f64; 2]>>,
}

impl LocalizationGrid {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn localization_point(&self, grid_x: usize, grid_y: usize) -> Option<[f64; 2]> {
        if grid_x < self.width && grid_y < self.height {
            Some(self.point(grid_x, grid_y))
        } else {
            None
        }
    }

    fn point(&self, grid_x: usize, grid_y: usize) -> [f64; 2] {
        self.points[grid_y * self.width + grid_x]
    }

    /// `((gx, gy), real)` for every point which is not NaN.
    fn valid_points(&self) -> impl Iterator<Item = ([f64; 2], [f64; 2])> + '_ {
        self.points.iter().enumerate().filter_map(|(idx, p)| {
            (!p[0].is_nan() && !p[1].is_nan()).then(|| {
                let g = [(idx % self.width) as f64, (idx / self.width) as f64];
                (g, *p)
            })
        })
    }

    /// Whether any point is unset or was given as NaN.
    pub fn contains_nan(&self) -> bool {
        self.points.iter().flatten().any(|v| v.is_nan())
    }

    /// Whether the real-world coordinates along every row (or every column)
    /// are strictly increasing or strictly decreasing in at least one ordinate.
    ///
    /// Lines may differ in which ordinate, and which direction, is monotonic.
    /// A non-monotonic grid is usable but probably folded.
    pub fn is_monotonic(&self, by_row: bool) -> bool {
        let (lines, len) = if by_row {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        };
        (0..lines).all(|line| {
            let at = |i: usize| {
                if by_row {
                    self.point(i, line)
                } else {
                    self.point(line, i)
                }
            };
            (0..2).any(|ord| {
                let diffs: Vec<f64> = (1..len).map(|i| at(i)[ord] - at(i - 1)[ord]).collect();
                diffs.iter().all(|d| *d > 0.0) || diffs.iter().all(|d| *d < 0.0)
            })
        })
    }

    /// Least-squares affine map from grid to real-world coordinates,
    /// ignoring NaN points.
    pub fn affine_transform(&self) -> TransformResult<Affine> {
        let valid: Vec<_> = self.valid_points().collect();
        let mut design = Matrix::zeros(valid.len(), 3);
        let mut rhs = Matrix::zeros(valid.len(), 2);
        for (row, (g, r)) in valid.iter().enumerate() {
            design.set(row, 0, g[0]);
            design.set(row, 1, g[1]);
            design.set(row, 2, 1.0);
            rhs.set(row, 0, r[0]);
            rhs.set(row, 1, r[1]);
        }
        let solution = design.least_squares(&rhs)?;
        let mut augmented = Matrix::identity(3);
        for out in 0..2 {
            for c in 0..3 {
                augmented.set(out, c, solution[(c, out)]);
            }
        }
        Ok(Affine::from_affine_unchecked(augmented))
    }

    /// Transformation from grid to real-world coordinates.
    ///
    /// A linear transformation if the grid is exactly affine,
    /// otherwise a [LocalizationGridTransform].
    pub fn math_transform(&self) -> TransformResult<Arc<dyn Transformation>> {
        let t = LocalizationGridTransform::try_new(self.clone())?;
        if t.is_affine() {
            log::debug!("Localization grid is affine");
            return linear_from_matrix(t.global.augmented().clone());
        }
        Ok(Arc::new(t))
    }

    /// Least-squares polynomial warp of the given degree through the grid's points.
    pub fn polynomial_transform(&self, degree: usize) -> TransformResult<Arc<dyn Transformation>> {
        let (grid, real): (Vec<_>, Vec<_>) = self.valid_points().unzip();
        WarpPolynomial::fit(&grid, &real, degree)
    }
}

/// Grid to real-world coordinates: the grid's best-fit affine,
/// corrected by bilinearly interpolated residuals.
///
/// Outside the grid the border cells are extrapolated.
#[derive(Debug, Clone)]
pub struct LocalizationGridTransform {
    grid: LocalizationGrid,
    global: Affine,
    residuals: Arc<Vec<[f64; 2]>>,
}

impl LocalizationGridTransform {
    pub fn try_new(grid: LocalizationGrid) -> TransformResult<Self> {
        if grid.contains_nan() {
            return Err(TransformError::invalid_argument(
                "Localization grid has unset or NaN points",
            ));
        }
        let global = grid.affine_transform()?;
        let mut residuals = Vec::with_capacity(grid.points.len());
        for (g, real) in grid.valid_points() {
            let (x, y) = global.transform_2d(g[0], g[1])?;
            residuals.push([real[0] - x, real[1] - y]);
        }
        Ok(Self {
            grid,
            global,
            residuals: Arc::new(residuals),
        })
    }

    pub fn grid(&self) -> &LocalizationGrid {
        &self.grid
    }

    pub fn global_affine(&self) -> &Affine {
        &self.global
    }

    fn is_affine(&self) -> bool {
        let m = self.global.augmented();
        let extent = (0..2)
            .map(|r| m[(r, 0)].abs() * self.grid.width as f64 + m[(r, 1)].abs() * self.grid.height as f64)
            .fold(1.0, f64::max);
        self.residuals
            .iter()
            .flatten()
            .all(|r| r.abs() <= extent * AFFINE_TOLERANCE)
    }

    fn residual(&self, col: usize, row: usize) -> [f64; 2] {
        self.residuals[row * self.grid.width + col]
    }

    /// Cell containing (or nearest to) the point, and the offsets within it.
    fn cell(&self, gx: f64, gy: f64) -> (usize, usize, f64, f64) {
        let col = (gx.floor().max(0.0) as usize).min(self.grid.width - 2);
        let row = (gy.floor().max(0.0) as usize).min(self.grid.height - 2);
        (col, row, gx - col as f64, gy - row as f64)
    }
}

impl Transformation for LocalizationGridTransform {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> TransformResult<()> {
        self.global.transform_into(pt, buf)?;
        let (col, row, fx, fy) = self.cell(pt[0], pt[1]);
        let r00 = self.residual(col, row);
        let r10 = self.residual(col + 1, row);
        let r01 = self.residual(col, row + 1);
        let r11 = self.residual(col + 1, row + 1);
        for (idx, b) in buf.iter_mut().enumerate().take(2) {
            let lower = r00[idx] + fx * (r10[idx] - r00[idx]);
            let upper = r01[idx] + fx * (r11[idx] - r01[idx]);
            *b += lower + fy * (upper - lower);
        }
        Ok(())
    }

    fn invert(&self) -> TransformResult<Arc<dyn Transformation>> {
        let start = self.global.augmented().invert()?;
        Ok(Arc::new(LocalizationGridInverse {
            forward: self.clone(),
            start,
        }))
    }

    fn derivative(&self, pt: &[f64]) -> TransformResult<Matrix> {
        let m = self.global.augmented();
        let (col, row, fx, fy) = self.cell(pt[0], pt[1]);
        let r00 = self.residual(col, row);
        let r10 = self.residual(col + 1, row);
        let r01 = self.residual(col, row + 1);
        let r11 = self.residual(col + 1, row + 1);
        let mut jac = Matrix::zeros(2, 2);
        for idx in 0..2 {
            let dx = (1.0 - fy) * (r10[idx] - r00[idx]) + fy * (r11[idx] - r01[idx]);
            let dy = (1.0 - fx) * (r01[idx] - r00[idx]) + fx * (r11[idx] - r10[idx]);
            jac.set(idx, 0, m[(idx, 0)] + dx);
            jac.set(idx, 1, m[(idx, 1)] + dy);
        }
        Ok(jac)
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

    fn to_wkt(&self) -> String {
        format!(
            "PARAM_MT[\"Localization grid\", PARAMETER[\"width\", {}], PARAMETER[\"height\", {}]]",
            self.grid.width, self.grid.height
        )
    }
}

/// Real-world to grid coordinates, by Newton iteration on the forward transform.
#[derive(Debug, Clone)]
struct LocalizationGridInverse {
    forward: LocalizationGridTransform,
    /// Inverse of the global affine, for the initial guess.
    start: Matrix,
}

impl Transformation for LocalizationGridInverse {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> TransformResult<()> {
        let guess = self.start.matmul(&[pt[0], pt[1], 1.0]);
        let (mut gx, mut gy) = (guess[0], guess[1]);
        let mut fwd = [f64::NAN; 2];
        for _ in 0..MAX_ITERATIONS {
            self.forward.transform_into(&[gx, gy], &mut fwd)?;
            let ex = fwd[0] - pt[0];
            let ey = fwd[1] - pt[1];
            let jac = self.forward.derivative(&[gx, gy])?;
            let (a, b, c, d) = (jac[(0, 0)], jac[(0, 1)], jac[(1, 0)], jac[(1, 1)]);
            let det = a * d - b * c;
            if det == 0.0 || !det.is_finite() {
                break;
            }
            let step_x = (d * ex - b * ey) / det;
            let step_y = (a * ey - c * ex) / det;
            gx -= step_x;
            gy -= step_y;
            if step_x.abs() <= TOLERANCE && step_y.abs() <= TOLERANCE {
                buf[0] = gx;
                buf[1] = gy;
                return Ok(());
            }
        }
        log::debug!("Inverse localization grid search for ({}, {}) did not converge", pt[0], pt[1]);
        Err(TransformError::NoConvergence {
            operation: "inverse localization grid",
            iterations: MAX_ITERATIONS,
        })
    }

    fn invert(&self) -> TransformResult<Arc<dyn Transformation>> {
        Ok(Arc::new(self.forward.clone()))
    }

    fn derivative(&self, pt: &[f64]) -> TransformResult<Matrix> {
        inverse_derivative(&self.forward, self, pt)
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

    fn to_wkt(&self) -> String {
        wkt::inverse_mt(&self.forward.to_wkt())
    }
}
