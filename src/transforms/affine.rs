use std::sync::{Arc, OnceLock};

use crate::error::ensure_dimension;
use crate::{
    Identity, LinearTransform1D, Matrix, ParameterGroup, TransformError, TransformResult,
    Transformation,
};

/// Linear transformation in homogeneous coordinates.
///
/// For a transform from N to M dimensions, the augmented matrix has M+1 rows and N+1 columns.
/// When the last row is `[0, ..., 0, 1]` this is an affine transform;
/// otherwise it is projective and each output point is divided by the homogeneous ordinate.
#[derive(Debug, Clone)]
pub struct Affine {
    augmented: Matrix,
    projective: bool,
    inverse: OnceLock<Arc<dyn Transformation>>,
}

impl PartialEq for Affine {
    fn eq(&self, other: &Self) -> bool {
        self.augmented == other.augmented
    }
}

impl Affine {
    /// Create from an augmented matrix,
    /// i.e. which includes the translation as the last column
    /// and a bottom row (usually `[0, 0, ..., 1]`).
    pub fn try_new(augmented: Matrix) -> TransformResult<Self> {
        if augmented.nrows() < 2 || augmented.ncols() < 2 {
            return Err(TransformError::invalid_argument(format!(
                "Augmented matrix must be at least 2x2, got {}x{}",
                augmented.nrows(),
                augmented.ncols()
            )));
        }
        let projective = !is_affine_row(&augmented);
        Ok(Self {
            augmented,
            projective,
            inverse: OnceLock::new(),
        })
    }

    /// Create an Affine transform from its linear part and a translation vector.
    pub fn try_from_parts(unaugmented: &Matrix, translation: &[f64]) -> TransformResult<Self> {
        ensure_dimension("translation", unaugmented.nrows(), translation.len())?;
        let nrows = unaugmented.nrows();
        let ncols = unaugmented.ncols();
        let mut augmented = Matrix::zeros(nrows + 1, ncols + 1);
        unaugmented.copy_sub_matrix(0, 0, nrows, ncols, 0, 0, &mut augmented)?;
        for (r, t) in translation.iter().enumerate() {
            augmented.set(r, ncols, *t);
        }
        augmented.set(nrows, ncols, 1.0);
        Self::try_new(augmented)
    }

    /// Create an Affine transform from a matrix which includes the translation as the last column,
    /// but does not have the augmented matrix's bottom row of [0, 0, ..., 1].
    pub fn try_from_translated(translated: &Matrix) -> TransformResult<Self> {
        let nrows = translated.nrows();
        let ncols = translated.ncols();
        let mut augmented = Matrix::zeros(nrows + 1, ncols);
        translated.copy_sub_matrix(0, 0, nrows, ncols, 0, 0, &mut augmented)?;
        augmented.set(nrows, ncols - 1, 1.0);
        Self::try_new(augmented)
    }

    /// Axis-aligned scaling.
    pub fn scale(factors: &[f64]) -> Self {
        let n = factors.len();
        let mut augmented = Matrix::identity(n + 1);
        for (idx, f) in factors.iter().enumerate() {
            augmented.set(idx, idx, *f);
        }
        Self::from_affine_unchecked(augmented)
    }

    pub fn translation(offsets: &[f64]) -> Self {
        let n = offsets.len();
        let mut augmented = Matrix::identity(n + 1);
        for (idx, t) in offsets.iter().enumerate() {
            augmented.set(idx, n, *t);
        }
        Self::from_affine_unchecked(augmented)
    }

    /// Two-dimensional similarity transformation (EPSG method 9621):
    ///
    /// ```text
    /// x' = tx + x·M·cosθ + y·M·sinθ
    /// y' = ty - x·M·sinθ + y·M·cosθ
    /// ```
    /// with `M = 1 + scale_difference_ppm·10⁻⁶` and `θ` given in arc-seconds.
    pub fn similarity(tx: f64, ty: f64, scale_difference_ppm: f64, rotation_arcsec: f64) -> Self {
        let m = 1.0 + scale_difference_ppm * 1e-6;
        let (sin, cos) = (rotation_arcsec / 3600.0).to_radians().sin_cos();
        let mut augmented = Matrix::identity(3);
        augmented.set(0, 0, m * cos);
        augmented.set(0, 1, m * sin);
        augmented.set(0, 2, tx);
        augmented.set(1, 0, -m * sin);
        augmented.set(1, 1, m * cos);
        augmented.set(1, 2, ty);
        Self::from_affine_unchecked(augmented)
    }

    /// The caller guarantees the last row is `[0, ..., 0, 1]`.
    pub(crate) fn from_affine_unchecked(augmented: Matrix) -> Self {
        Self {
            augmented,
            projective: false,
            inverse: OnceLock::new(),
        }
    }

    pub fn augmented(&self) -> &Matrix {
        &self.augmented
    }

    pub fn is_projective(&self) -> bool {
        self.projective
    }

    /// 2-D overload, numerically identical to [Transformation::transform_into].
    pub fn transform_2d(&self, x: f64, y: f64) -> TransformResult<(f64, f64)> {
        ensure_dimension("point", self.input_ndim(), 2)?;
        ensure_dimension("target", self.output_ndim(), 2)?;
        let mut out = [f64::NAN; 2];
        self.transform_into(&[x, y], &mut out)?;
        Ok((out[0], out[1]))
    }

    fn homogeneous(&self, pt: &[f64]) -> f64 {
        let row = self.augmented.row(self.output_ndim());
        let n = self.input_ndim();
        row[..n].iter().zip(pt).map(|(m, p)| m * p).sum::<f64>() + row[n]
    }

    /// Copy without the cached inverse.
    fn uncached(&self) -> Self {
        Self {
            augmented: self.augmented.clone(),
            projective: self.projective,
            inverse: OnceLock::new(),
        }
    }
}

fn is_affine_row(augmented: &Matrix) -> bool {
    let last = augmented.nrows() - 1;
    let ncols = augmented.ncols();
    augmented
        .row(last)
        .iter()
        .enumerate()
        .all(|(c, v)| *v == if c == ncols - 1 { 1.0 } else { 0.0 })
}

/// Wrap a linear matrix in the most specific transformation available:
/// [Identity], [LinearTransform1D] or [Affine].
pub fn linear_from_matrix(augmented: Matrix) -> TransformResult<Arc<dyn Transformation>> {
    if augmented.nrows() == augmented.ncols() && augmented.is_identity() {
        return Ok(Arc::new(Identity::new(augmented.nrows() - 1)));
    }
    if augmented.nrows() == 2 && augmented.ncols() == 2 && augmented.is_affine() {
        return Ok(Arc::new(LinearTransform1D::new(
            augmented[(0, 0)],
            augmented[(0, 1)],
        )));
    }
    Ok(Arc::new(Affine::try_new(augmented)?))
}

impl Transformation for Affine {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> TransformResult<()> {
        let n = self.input_ndim();
        for (r, b) in buf.iter_mut().enumerate() {
            let row = self.augmented.row(r);
            *b = row[..n].iter().zip(pt).map(|(m, p)| m * p).sum::<f64>() + row[n];
        }
        if self.projective {
            let w = self.homogeneous(pt);
            for b in buf.iter_mut() {
                *b /= w;
            }
        }
        Ok(())
    }

    fn column_transform_into(
        &self,
        columns: &[&[f64]],
        bufs: &mut [&mut [f64]],
    ) -> TransformResult<()> {
        let n = self.input_ndim();
        for (r, buf_col) in bufs.iter_mut().enumerate() {
            let row = self.augmented.row(r);
            buf_col.fill(row[n]);
            for (mat_val, coord_col) in row[..n].iter().zip(columns.iter()) {
                // our hottest loop is iterating over long arrays in lock step
                for (c, b) in coord_col.iter().zip(buf_col.iter_mut()) {
                    *b += c * mat_val;
                }
            }
        }
        if self.projective {
            let row = self.augmented.row(self.output_ndim());
            let mut w = vec![row[n]; columns.first().map_or(0, |c| c.len())];
            for (mat_val, coord_col) in row[..n].iter().zip(columns.iter()) {
                for (c, wi) in coord_col.iter().zip(w.iter_mut()) {
                    *wi += c * mat_val;
                }
            }
            for buf_col in bufs.iter_mut() {
                for (b, wi) in buf_col.iter_mut().zip(w.iter()) {
                    *b /= wi;
                }
            }
        }
        Ok(())
    }

    fn input_ndim(&self) -> usize {
        self.augmented.ncols() - 1
    }

    fn output_ndim(&self) -> usize {
        self.augmented.nrows() - 1
    }

    fn invert(&self) -> TransformResult<Arc<dyn Transformation>> {
        if let Some(inv) = self.inverse.get() {
            return Ok(inv.clone());
        }
        let inv_matrix = self.augmented.invert()?;
        let inverse = Affine {
            projective: !is_affine_row(&inv_matrix),
            augmented: inv_matrix,
            inverse: OnceLock::from(Arc::new(self.uncached()) as Arc<dyn Transformation>),
        };
        Ok(self
            .inverse
            .get_or_init(|| Arc::new(inverse))
            .clone())
    }

    fn derivative(&self, pt: &[f64]) -> TransformResult<Matrix> {
        let n = self.input_ndim();
        let m = self.output_ndim();
        let mut jac = Matrix::zeros(m, n);
        self.augmented.copy_sub_matrix(0, 0, m, n, 0, 0, &mut jac)?;
        if !self.projective {
            return Ok(jac);
        }
        let w = self.homogeneous(pt);
        let mut out = vec![f64::NAN; m];
        self.transform_into(pt, &mut out)?;
        let w_row = self.augmented.row(m);
        for r in 0..m {
            for c in 0..n {
                // out_r = num_r / w, so d(out_r) = (d(num_r) - out_r * d(w)) / w
                jac.set(r, c, (jac[(r, c)] - out[r] * w_row[c]) / w);
            }
        }
        Ok(jac)
    }

    fn is_identity(&self) -> bool {
        self.augmented.is_identity()
    }

    fn matrix(&self) -> Option<Matrix> {
        Some(self.augmented.clone())
    }

    fn parameters(&self) -> Option<ParameterGroup> {
        let mut group = ParameterGroup::new("Affine")
            .with("num_row", self.augmented.nrows())
            .with("num_col", self.augmented.ncols());
        let last_col = self.augmented.ncols() - 1;
        let last_row = self.augmented.nrows() - 1;
        for r in 0..self.augmented.nrows() {
            for c in 0..self.augmented.ncols() {
                // only elements differing from the identity pattern are listed
                let default = if (r == last_row && c == last_col)
                    || (r == c && r < last_row && c < last_col)
                {
                    1.0
                } else {
                    0.0
                };
                let value = self.augmented[(r, c)];
                if value != default {
                    group.set(format!("elt_{r}_{c}"), value);
                }
            }
        }
        Some(group)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Affine, linear_from_matrix};
    use crate::{
        Matrix, TransformError, Transformation,
        tests::{
            check_derivative, check_inverse_transform_bulk, check_inverse_transform_col,
            check_inverse_transform_coord, check_transform_bulk, check_transform_col, transform,
        },
    };
    use approx::assert_ulps_eq;

    fn make_transform() -> Affine {
        #[rustfmt::skip]
        let arr = vec![
            0.8, -0.6, 0.0, 20.0,
            0.6, 0.8, 0.0, -3.0,
            0.0, 0.0, 2.0, 2.5,
        ];
        Affine::try_from_translated(&Matrix::try_new(arr, 4).unwrap()).unwrap()
    }

    fn make_projective() -> Affine {
        #[rustfmt::skip]
        let arr = vec![
            1.0, 0.2, 5.0,
            0.1, 1.0, -2.0,
            0.001, 0.002, 1.0,
        ];
        Affine::try_new(Matrix::try_new(arr, 3).unwrap()).unwrap()
    }

    #[test]
    fn test_bulk() {
        check_transform_bulk(make_transform());
    }

    #[test]
    fn test_columns() {
        check_transform_col(make_transform());
    }

    #[test]
    fn test_projective_columns() {
        check_transform_col(make_projective());
    }

    #[test]
    fn test_inverse() {
        check_inverse_transform_coord(make_transform());
    }

    #[test]
    fn test_projective_inverse() {
        check_inverse_transform_coord(make_projective());
    }

    #[test]
    fn test_inverse_bulk() {
        check_inverse_transform_bulk(make_transform());
    }

    #[test]
    fn test_inverse_columns() {
        check_inverse_transform_col(make_transform());
    }

    #[test]
    fn test_inverse_inverse() {
        let t = make_transform();
        let inv = t.invert().unwrap();
        assert!(Arc::ptr_eq(&inv, &t.invert().unwrap()));
        let inv_inv = inv.invert().unwrap();
        assert_eq!(inv_inv.matrix().unwrap(), t.matrix().unwrap());
        assert!(Arc::ptr_eq(&inv_inv, &inv.invert().unwrap()));
    }

    #[test]
    fn test_singular_not_invertible() {
        let t = Affine::scale(&[1.0, 0.0]);
        assert!(matches!(
            t.invert(),
            Err(TransformError::NoninvertibleTransform(_))
        ));
        // the forward transform still works
        assert_eq!(transform(&t, &[3.0, 4.0]), vec![3.0, 0.0]);
    }

    #[test]
    fn test_nan_propagates() {
        let out = transform(&make_transform(), &[f64::NAN, 1.0, 1.0]);
        assert!(out[0].is_nan() && out[1].is_nan());
        assert!(!out[2].is_nan());
    }

    #[test]
    fn test_transform_2d_matches_general() {
        let t = make_projective();
        let (x, y) = t.transform_2d(12.0, -7.5).unwrap();
        let general = transform(&t, &[12.0, -7.5]);
        assert_ulps_eq!([x, y].as_slice(), general.as_slice());
        assert!(make_transform().transform_2d(1.0, 2.0).is_err());
    }

    #[test]
    fn test_derivative() {
        check_derivative(&make_transform(), &[1.0, 2.0, 3.0], 1e-3, 1e-8);
        check_derivative(&make_projective(), &[10.0, 20.0], 1e-4, 1e-6);
    }

    #[test]
    fn test_specialisation() {
        let t = linear_from_matrix(Matrix::identity(4)).unwrap();
        assert!(t.is_identity());
        assert_eq!(t.input_ndim(), 3);

        let t = linear_from_matrix(Matrix::try_new(vec![2.0, 1.0, 0.0, 1.0], 2).unwrap()).unwrap();
        assert_eq!(transform(t.as_ref(), &[3.0]), vec![7.0]);
    }

    #[test]
    fn test_similarity() {
        // quarter turn with doubled scale
        let t = Affine::similarity(10.0, 20.0, 1e6, 90.0 * 3600.0);
        let out = transform(&t, &[1.0, 0.0]);
        assert_ulps_eq!(out.as_slice(), [10.0, 18.0].as_slice(), epsilon = 1e-12);
        check_inverse_transform_coord(t);
    }

    #[test]
    fn test_wkt() {
        let t = Affine::translation(&[5.0, -1.0]);
        assert_eq!(
            t.to_wkt(),
            "PARAM_MT[\"Affine\", PARAMETER[\"num_row\", 3], PARAMETER[\"num_col\", 3], PARAMETER[\"elt_0_2\", 5.0], PARAMETER[\"elt_1_2\", -1.0]]"
        );
    }
}
