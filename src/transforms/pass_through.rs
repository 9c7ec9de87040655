use std::ops::Range;
use std::sync::{Arc, OnceLock};

use crate::{Composition, Matrix, TransformResult, Transformation, copy_into, wkt};

/// Apply a sub-transformation to a contiguous range of ordinates,
/// passing the leading and trailing ordinates through unchanged.
///
/// Built by [crate::pass_through], which returns the sub-transformation itself
/// when there is nothing to pass through.
#[derive(Debug)]
pub struct PassThrough {
    first_affected: usize,
    sub: Arc<dyn Transformation>,
    num_trailing: usize,
    inverse: OnceLock<Arc<dyn Transformation>>,
}

impl PassThrough {
    /// Wrap without any simplification.
    pub fn new(first_affected: usize, sub: Arc<dyn Transformation>, num_trailing: usize) -> Self {
        Self {
            first_affected,
            sub,
            num_trailing,
            inverse: OnceLock::new(),
        }
    }

    pub fn first_affected_ordinate(&self) -> usize {
        self.first_affected
    }

    pub fn num_trailing_ordinates(&self) -> usize {
        self.num_trailing
    }

    pub fn sub_transform(&self) -> &Arc<dyn Transformation> {
        &self.sub
    }

    /// Source ordinates fed to the sub-transformation.
    pub fn modified_coordinates(&self) -> Range<usize> {
        self.first_affected..self.first_affected + self.sub.input_ndim()
    }

    fn uncached(&self) -> Self {
        Self::new(self.first_affected, self.sub.clone(), self.num_trailing)
    }
}

impl Transformation for PassThrough {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> TransformResult<()> {
        let first = self.first_affected;
        let sub_in = self.sub.input_ndim();
        let sub_out = self.sub.output_ndim();
        buf[..first].copy_from_slice(&pt[..first]);
        buf[first + sub_out..].copy_from_slice(&pt[first + sub_in..]);
        self.sub
            .transform_into(&pt[first..first + sub_in], &mut buf[first..first + sub_out])
    }

    fn column_transform_into(
        &self,
        columns: &[&[f64]],
        bufs: &mut [&mut [f64]],
    ) -> TransformResult<()> {
        let first = self.first_affected;
        let sub_in = self.sub.input_ndim();
        let sub_out = self.sub.output_ndim();
        copy_into(&columns[..first], &mut bufs[..first]);
        copy_into(&columns[first + sub_in..], &mut bufs[first + sub_out..]);
        self.sub.column_transform_into(
            &columns[first..first + sub_in],
            &mut bufs[first..first + sub_out],
        )
    }

    fn invert(&self) -> TransformResult<Arc<dyn Transformation>> {
        if let Some(inv) = self.inverse.get() {
            return Ok(inv.clone());
        }
        let inverse = PassThrough {
            first_affected: self.first_affected,
            sub: self.sub.invert()?,
            num_trailing: self.num_trailing,
            inverse: OnceLock::from(Arc::new(self.uncached()) as Arc<dyn Transformation>),
        };
        Ok(self.inverse.get_or_init(|| Arc::new(inverse)).clone())
    }

    fn derivative(&self, pt: &[f64]) -> TransformResult<Matrix> {
        let first = self.first_affected;
        let sub_in = self.sub.input_ndim();
        let sub_out = self.sub.output_ndim();
        let sub_jac = self.sub.derivative(&pt[first..first + sub_in])?;
        let mut jac = Matrix::zeros(self.output_ndim(), self.input_ndim());
        for i in 0..first {
            jac.set(i, i, 1.0);
        }
        sub_jac.copy_sub_matrix(0, 0, sub_out, sub_in, first, first, &mut jac)?;
        for k in 0..self.num_trailing {
            jac.set(first + sub_out + k, first + sub_in + k, 1.0);
        }
        Ok(jac)
    }

    fn is_identity(&self) -> bool {
        self.sub.is_identity()
    }

    fn input_ndim(&self) -> usize {
        self.first_affected + self.sub.input_ndim() + self.num_trailing
    }

    fn output_ndim(&self) -> usize {
        self.first_affected + self.sub.output_ndim() + self.num_trailing
    }

    fn composition(&self) -> Composition<'_> {
        Composition::PassThrough(self)
    }

    fn to_wkt(&self) -> String {
        wkt::passthrough_mt(self.first_affected, &self.sub.to_wkt())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::PassThrough;
    use crate::tests::{
        check_derivative, check_inverse_transform_bulk, check_inverse_transform_col,
        check_inverse_transform_coord, check_transform_bulk, check_transform_col, transform,
    };
    use crate::{ExponentialTransform1D, LogarithmicTransform1D, Transformation};

    fn make_transform() -> PassThrough {
        // log on the middle of three ordinates
        let log = LogarithmicTransform1D::try_new(10.0, 0.0).unwrap();
        PassThrough::new(1, Arc::new(log), 1)
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
    fn test_inverse() {
        check_inverse_transform_coord(make_transform());
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
    fn test_values() {
        let t = make_transform();
        let out = transform(&t, &[5.0, 100.0, 7.0]);
        approx::assert_ulps_eq!(out.as_slice(), [5.0, 2.0, 7.0].as_slice(), epsilon = 1e-12);
        assert_eq!(t.modified_coordinates(), 1..2);
        assert_eq!(
            t.to_wkt(),
            format!("PASSTHROUGH_MT[1, {}]", t.sub_transform().to_wkt())
        );
    }

    #[test]
    fn test_derivative() {
        let exp = ExponentialTransform1D::try_new(2.0, 1.0).unwrap();
        let t = PassThrough::new(2, Arc::new(exp), 0);
        check_derivative(&t, &[1.0, 2.0, 3.0], 1e-6, 1e-6);
    }
}
