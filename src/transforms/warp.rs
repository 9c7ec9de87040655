//! Polynomial warps fitted to matched control points.
use std::sync::{Arc, OnceLock};

use super::linear_from_matrix;
use crate::{Matrix, ParameterGroup, TransformError, TransformResult, Transformation};

pub(crate) const EMPTY_POSITIONS: &str = "Positions list must not be null or empty.";
pub(crate) const MISMATCHED_POSITIONS: &str =
    "Source and target point lists must be the same size.";

/// Highest polynomial degree accepted by [WarpPolynomial].
pub const MAX_DEGREE: usize = 30;

/// Number of monomials of a bivariate polynomial of the given total degree.
pub fn num_terms(degree: usize) -> usize {
    (degree + 1) * (degree + 2) / 2
}

fn check_degree(degree: usize) -> TransformResult<()> {
    if degree == 0 || degree > MAX_DEGREE {
        return Err(TransformError::invalid_parameter(
            "degree",
            format!("polynomial degree must be between 1 and {MAX_DEGREE}, got {degree}"),
        ));
    }
    Ok(())
}

/// Check the shape of a pair of control point lists.
pub(crate) fn check_control_points(source: &[[f64; 2]], target: &[[f64; 2]]) -> TransformResult<()> {
    if source.is_empty() || target.is_empty() {
        return Err(TransformError::invalid_argument(EMPTY_POSITIONS));
    }
    if source.len() != target.len() {
        return Err(TransformError::invalid_argument(MISMATCHED_POSITIONS));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
struct ControlPoints {
    source: Vec<[f64; 2]>,
    target: Vec<[f64; 2]>,
}

/// Two-dimensional polynomial warp of arbitrary degree.
///
/// Each output ordinate is a polynomial in the centred and scaled input
/// `u = (x - cx) / sx`, `v = (y - cy) / sy`, with terms ordered
/// `1, u, v, u², uv, v², u³, ...`.
#[derive(Debug, Clone)]
pub struct WarpPolynomial {
    degree: usize,
    centre: [f64; 2],
    scale: [f64; 2],
    x_coeffs: Vec<f64>,
    y_coeffs: Vec<f64>,
    control_points: Option<Arc<ControlPoints>>,
    inverse: OnceLock<Arc<dyn Transformation>>,
}

impl PartialEq for WarpPolynomial {
    fn eq(&self, other: &Self) -> bool {
        self.degree == other.degree
            && self.centre == other.centre
            && self.scale == other.scale
            && self.x_coeffs == other.x_coeffs
            && self.y_coeffs == other.y_coeffs
            && self.control_points == other.control_points
    }
}

impl WarpPolynomial {
    /// Least-squares fit of a polynomial of the given degree mapping `source` onto `target`.
    pub fn try_new(source: &[[f64; 2]], target: &[[f64; 2]], degree: usize) -> TransformResult<Self> {
        check_control_points(source, target)?;
        check_degree(degree)?;
        let terms = num_terms(degree);
        if source.len() < terms {
            return Err(TransformError::invalid_argument(format!(
                "A degree {degree} warp needs at least {terms} points, got {}",
                source.len()
            )));
        }

        let (centre, scale) = normalisation(source);
        let mut design = Matrix::zeros(source.len(), terms);
        let mut rhs = Matrix::zeros(source.len(), 2);
        for (row, (s, t)) in source.iter().zip(target).enumerate() {
            let u = (s[0] - centre[0]) / scale[0];
            let v = (s[1] - centre[1]) / scale[1];
            for (col, m) in monomials(degree, u, v).enumerate() {
                design.set(row, col, m);
            }
            rhs.set(row, 0, t[0]);
            rhs.set(row, 1, t[1]);
        }
        let solution = design.least_squares(&rhs)?;
        let column = |c: usize| (0..terms).map(|r| solution[(r, c)]).collect::<Vec<_>>();
        Ok(Self {
            degree,
            centre,
            scale,
            x_coeffs: column(0),
            y_coeffs: column(1),
            control_points: Some(Arc::new(ControlPoints {
                source: source.to_vec(),
                target: target.to_vec(),
            })),
            inverse: OnceLock::new(),
        })
    }

    /// Fit a warp, returning a linear transformation when the degree is 1.
    pub fn fit(
        source: &[[f64; 2]],
        target: &[[f64; 2]],
        degree: usize,
    ) -> TransformResult<Arc<dyn Transformation>> {
        let warp = Self::try_new(source, target, degree)?;
        match warp.affine_matrix() {
            Some(m) => linear_from_matrix(m),
            None => Ok(Arc::new(warp)),
        }
    }

    /// Rebuild a warp from its coefficients, e.g. those reported by [Transformation::parameters].
    ///
    /// Such a warp has no control points, so only degree 1 can be inverted.
    pub fn from_coefficients(
        degree: usize,
        centre: [f64; 2],
        scale: [f64; 2],
        x_coeffs: Vec<f64>,
        y_coeffs: Vec<f64>,
    ) -> TransformResult<Self> {
        check_degree(degree)?;
        let terms = num_terms(degree);
        if x_coeffs.len() != terms || y_coeffs.len() != terms {
            return Err(TransformError::invalid_argument(format!(
                "A degree {degree} warp needs {terms} coefficients per ordinate"
            )));
        }
        if scale.iter().any(|s| !(s.is_finite() && *s != 0.0)) {
            return Err(TransformError::invalid_parameter(
                "scale",
                "scale factors must be finite and non-zero",
            ));
        }
        Ok(Self {
            degree,
            centre,
            scale,
            x_coeffs,
            y_coeffs,
            control_points: None,
            inverse: OnceLock::new(),
        })
    }

    fn uncached(&self) -> Self {
        Self {
            inverse: OnceLock::new(),
            ..self.clone()
        }
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn x_coeffs(&self) -> &[f64] {
        &self.x_coeffs
    }

    pub fn y_coeffs(&self) -> &[f64] {
        &self.y_coeffs
    }

    /// Augmented 3×3 matrix of a degree 1 warp in the original input units.
    pub fn affine_matrix(&self) -> Option<Matrix> {
        if self.degree != 1 {
            return None;
        }
        let mut m = Matrix::identity(3);
        for (row, c) in [&self.x_coeffs, &self.y_coeffs].into_iter().enumerate() {
            let a = c[1] / self.scale[0];
            let b = c[2] / self.scale[1];
            m.set(row, 0, a);
            m.set(row, 1, b);
            m.set(row, 2, c[0] - a * self.centre[0] - b * self.centre[1]);
        }
        Some(m)
    }

    fn normalise(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.centre[0]) / self.scale[0],
            (y - self.centre[1]) / self.scale[1],
        )
    }

    pub fn evaluate(&self, x: f64, y: f64) -> (f64, f64) {
        let (u, v) = self.normalise(x, y);
        let mut out = (0.0, 0.0);
        for ((m, cx), cy) in monomials(self.degree, u, v)
            .zip(&self.x_coeffs)
            .zip(&self.y_coeffs)
        {
            out.0 += m * cx;
            out.1 += m * cy;
        }
        out
    }
}

/// Centre on the mean and scale by the largest deviation, per axis.
fn normalisation(points: &[[f64; 2]]) -> ([f64; 2], [f64; 2]) {
    let n = points.len() as f64;
    let mut centre = [0.0; 2];
    let mut scale = [0.0_f64; 2];
    for axis in 0..2 {
        centre[axis] = points.iter().map(|p| p[axis]).sum::<f64>() / n;
        scale[axis] = points
            .iter()
            .map(|p| (p[axis] - centre[axis]).abs())
            .fold(0.0, f64::max);
        if scale[axis] == 0.0 {
            scale[axis] = 1.0;
        }
    }
    (centre, scale)
}

/// `u^(n-i)·v^i` for `n` in `0..=degree`, `i` in `0..=n`.
fn monomials(degree: usize, u: f64, v: f64) -> impl Iterator<Item = f64> {
    (0..=degree as i32).flat_map(move |n| (0..=n).map(move |i| u.powi(n - i) * v.powi(i)))
}

/// Partial derivatives of the monomials with respect to `u` and `v`.
fn monomial_gradients(degree: usize, u: f64, v: f64) -> impl Iterator<Item = (f64, f64)> {
    (0..=degree as i32).flat_map(move |n| {
        (0..=n).map(move |i| {
            let a = n - i;
            let du = if a > 0 { a as f64 * u.powi(a - 1) * v.powi(i) } else { 0.0 };
            let dv = if i > 0 { i as f64 * u.powi(a) * v.powi(i - 1) } else { 0.0 };
            (du, dv)
        })
    })
}

impl Transformation for WarpPolynomial {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> TransformResult<()> {
        let (x, y) = self.evaluate(pt[0], pt[1]);
        buf[0] = x;
        buf[1] = y;
        Ok(())
    }

    /// Exact for degree 1.
    /// Higher degrees have no polynomial inverse; the control points are refitted
    /// the other way round, which is only an approximation.
    fn invert(&self) -> TransformResult<Arc<dyn Transformation>> {
        if let Some(inv) = self.inverse.get() {
            return Ok(inv.clone());
        }
        if let Some(m) = self.affine_matrix() {
            let inverse = linear_from_matrix(m.invert()?)?;
            return Ok(self.inverse.get_or_init(|| inverse).clone());
        }
        let Some(cp) = &self.control_points else {
            return Err(TransformError::noninvertible(
                "a polynomial warp of degree > 1 needs control points to be inverted",
            ));
        };
        let mut inverse = Self::try_new(&cp.target, &cp.source, self.degree)?;
        inverse.inverse = OnceLock::from(Arc::new(self.uncached()) as Arc<dyn Transformation>);
        Ok(self.inverse.get_or_init(|| Arc::new(inverse)).clone())
    }

    fn derivative(&self, pt: &[f64]) -> TransformResult<Matrix> {
        let (u, v) = self.normalise(pt[0], pt[1]);
        let mut jac = Matrix::zeros(2, 2);
        for ((du, dv), (cx, cy)) in
            monomial_gradients(self.degree, u, v).zip(self.x_coeffs.iter().zip(&self.y_coeffs))
        {
            jac[(0, 0)] += cx * du / self.scale[0];
            jac[(0, 1)] += cx * dv / self.scale[1];
            jac[(1, 0)] += cy * du / self.scale[0];
            jac[(1, 1)] += cy * dv / self.scale[1];
        }
        Ok(jac)
    }

    fn is_identity(&self) -> bool {
        self.affine_matrix().is_some_and(|m| m.is_identity())
    }

    fn input_ndim(&self) -> usize {
        2
    }

    fn output_ndim(&self) -> usize {
        2
    }

    fn matrix(&self) -> Option<Matrix> {
        self.affine_matrix()
    }

    fn parameters(&self) -> Option<ParameterGroup> {
        Some(
            ParameterGroup::new("Warp Polynomial")
                .with("degree", self.degree)
                .with("xCoeffs", self.x_coeffs.clone())
                .with("yCoeffs", self.y_coeffs.clone())
                .with("centre", self.centre)
                .with("scale", self.scale),
        )
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::tests::{check_derivative, check_transform_bulk_with, make_coords_in, transform};

    fn grid_points(f: impl Fn(f64, f64) -> [f64; 2]) -> (Vec<[f64; 2]>, Vec<[f64; 2]>) {
        let mut source = Vec::new();
        for i in 0..6 {
            for j in 0..6 {
                source.push([i as f64 * 2.0, j as f64 * 2.0]);
            }
        }
        let target = source.iter().map(|p| f(p[0], p[1])).collect();
        (source, target)
    }

    fn quadratic(x: f64, y: f64) -> [f64; 2] {
        [
            3.0 + x + 1e-3 * x * x,
            -2.0 + 0.5 * y + 1e-3 * x * y,
        ]
    }

    #[test]
    fn test_monomial_order() {
        let terms: Vec<f64> = monomials(2, 2.0, 3.0).collect();
        assert_eq!(terms, vec![1.0, 2.0, 3.0, 4.0, 6.0, 9.0]);
        assert_eq!(num_terms(3), 10);
    }

    #[test]
    fn test_degree_one_is_affine() {
        let (source, target) = grid_points(|x, y| [1.0 + 2.0 * x - y, 4.0 + 0.5 * x + 3.0 * y]);
        let t = WarpPolynomial::fit(&source, &target, 1).unwrap();
        let m = t.matrix().unwrap();
        assert_relative_eq!(m[(0, 0)], 2.0, epsilon = 1e-10);
        assert_relative_eq!(m[(0, 1)], -1.0, epsilon = 1e-10);
        assert_relative_eq!(m[(1, 2)], 4.0, epsilon = 1e-10);
        assert!(t.parameters().unwrap().name().eq_ignore_ascii_case("affine"));

        let inv = t.invert().unwrap();
        for (s, d) in source.iter().zip(&target) {
            let back = transform(inv.as_ref(), d);
            assert_relative_eq!(back[0], s[0], epsilon = 1e-9);
            assert_relative_eq!(back[1], s[1], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_quadratic_is_exact() {
        let (source, target) = grid_points(quadratic);
        let t = WarpPolynomial::try_new(&source, &target, 2).unwrap();
        for p in make_coords_in(50, &[(0.0, 10.0), (0.0, 10.0)]) {
            let expected = quadratic(p[0], p[1]);
            let out = transform(&t, &p);
            assert_relative_eq!(out[0], expected[0], epsilon = 1e-9);
            assert_relative_eq!(out[1], expected[1], epsilon = 1e-9);
        }
        check_transform_bulk_with(&t, &make_coords_in(50, &[(0.0, 10.0), (0.0, 10.0)]));
        check_derivative(&t, &[3.0, 7.0], 1e-4, 1e-6);
    }

    #[test]
    fn test_higher_degree_inverse_is_approximate() {
        let (source, target) = grid_points(quadratic);
        let t = WarpPolynomial::try_new(&source, &target, 2).unwrap();
        let inv = t.invert().unwrap();
        for p in make_coords_in(50, &[(1.0, 9.0), (1.0, 9.0)]) {
            let back = transform(inv.as_ref(), &transform(&t, &p));
            assert_relative_eq!(back[0], p[0], epsilon = 1e-2);
            assert_relative_eq!(back[1], p[1], epsilon = 1e-2);
        }

        let rebuilt = WarpPolynomial::from_coefficients(
            2,
            t.centre,
            t.scale,
            t.x_coeffs.clone(),
            t.y_coeffs.clone(),
        )
        .unwrap();
        assert_eq!(transform(&rebuilt, &[4.0, 5.0]), transform(&t, &[4.0, 5.0]));
        assert!(matches!(
            rebuilt.invert(),
            Err(TransformError::NoninvertibleTransform(_))
        ));
    }

    #[test]
    fn test_invalid_inputs() {
        let (source, target) = grid_points(quadratic);
        assert!(matches!(
            WarpPolynomial::try_new(&source[..5], &target[..5], 2),
            Err(TransformError::InvalidArgument(_))
        ));
        assert!(matches!(
            WarpPolynomial::try_new(&source, &target[..5], 1),
            Err(TransformError::InvalidArgument(m)) if m == MISMATCHED_POSITIONS
        ));
        assert!(matches!(
            WarpPolynomial::try_new(&[], &[], 1),
            Err(TransformError::InvalidArgument(m)) if m == EMPTY_POSITIONS
        ));
        assert!(WarpPolynomial::try_new(&source, &target, 0).is_err());
    }

    #[test]
    fn test_degree_is_bounded() {
        let (source, target) = grid_points(quadratic);
        for degree in [MAX_DEGREE + 1, usize::MAX] {
            assert!(matches!(
                WarpPolynomial::try_new(&source, &target, degree),
                Err(TransformError::InvalidParameterValue { name, .. }) if name == "degree"
            ));
            assert!(matches!(
                WarpPolynomial::from_coefficients(degree, [0.0; 2], [1.0; 2], vec![], vec![]),
                Err(TransformError::InvalidParameterValue { name, .. }) if name == "degree"
            ));
        }
        assert!(matches!(
            WarpPolynomial::try_new(&source, &target, 0),
            Err(TransformError::InvalidParameterValue { .. })
        ));
    }

    #[test]
    fn test_inverse_is_cached() {
        let (source, target) = grid_points(quadratic);
        let t = WarpPolynomial::try_new(&source, &target, 2).unwrap();
        let inv = t.invert().unwrap();
        assert!(Arc::ptr_eq(&inv, &t.invert().unwrap()));

        let back = inv.invert().unwrap();
        assert!(Arc::ptr_eq(&back, &inv.invert().unwrap()));
        for p in make_coords_in(20, &[(0.0, 10.0), (0.0, 10.0)]) {
            assert_eq!(transform(back.as_ref(), &p), transform(&t, &p));
        }

        let (source, target) = grid_points(|x, y| [1.0 + 2.0 * x - y, 4.0 + 0.5 * x + 3.0 * y]);
        let linear = WarpPolynomial::try_new(&source, &target, 1).unwrap();
        assert!(Arc::ptr_eq(&linear.invert().unwrap(), &linear.invert().unwrap()));
    }
}
