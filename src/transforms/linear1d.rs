use std::sync::Arc;

use crate::{Matrix, ParameterGroup, TransformError, TransformResult, Transformation};

/// One-dimensional `y = scale·x + offset`.
///
/// The identity case returns its input untouched, so NaN payloads survive;
/// a zero scale is a constant function and ignores its input entirely.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearTransform1D {
    scale: f64,
    offset: f64,
}

impl LinearTransform1D {
    pub fn new(scale: f64, offset: f64) -> Self {
        Self { scale, offset }
    }

    pub fn constant(value: f64) -> Self {
        Self::new(0.0, value)
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn transform(&self, x: f64) -> f64 {
        if self.scale == 0.0 {
            self.offset
        } else if self.scale == 1.0 && self.offset == 0.0 {
            x
        } else {
            self.scale * x + self.offset
        }
    }
}

impl Transformation for LinearTransform1D {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> TransformResult<()> {
        buf[0] = self.transform(pt[0]);
        Ok(())
    }

    fn column_transform_into(
        &self,
        columns: &[&[f64]],
        bufs: &mut [&mut [f64]],
    ) -> TransformResult<()> {
        for (c, b) in columns[0].iter().zip(bufs[0].iter_mut()) {
            *b = self.transform(*c);
        }
        Ok(())
    }

    fn invert(&self) -> TransformResult<Arc<dyn Transformation>> {
        if self.scale == 0.0 {
            return Err(TransformError::noninvertible("constant function"));
        }
        Ok(Arc::new(Self::new(1.0 / self.scale, -self.offset / self.scale)))
    }

    fn derivative(&self, _pt: &[f64]) -> TransformResult<Matrix> {
        Matrix::try_new(vec![self.scale], 1)
    }

    fn is_identity(&self) -> bool {
        self.scale == 1.0 && self.offset == 0.0
    }

    fn input_ndim(&self) -> usize {
        1
    }

    fn output_ndim(&self) -> usize {
        1
    }

    fn matrix(&self) -> Option<Matrix> {
        Matrix::try_new(vec![self.scale, self.offset, 0.0, 1.0], 2).ok()
    }

    fn parameters(&self) -> Option<ParameterGroup> {
        let mut group = ParameterGroup::new("Affine")
            .with("num_row", 2_usize)
            .with("num_col", 2_usize);
        if self.scale != 1.0 {
            group.set("elt_0_0", self.scale);
        }
        if self.offset != 0.0 {
            group.set("elt_0_1", self.offset);
        }
        Some(group)
    }
}

#[cfg(test)]
mod tests {
    use super::LinearTransform1D;
    use crate::Transformation;
    use crate::tests::{check_inverse_transform_coord, check_transform_bulk, check_transform_col};

    fn make_transform() -> LinearTransform1D {
        LinearTransform1D::new(2.5, -7.0)
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
    fn test_identity_keeps_nan_bits() {
        let nan = f64::from_bits(0x7ff8_0000_dead_beef);
        let out = LinearTransform1D::new(1.0, 0.0).transform(nan);
        assert_eq!(out.to_bits(), nan.to_bits());
    }

    #[test]
    fn test_constant() {
        let t = LinearTransform1D::constant(4.0);
        assert_eq!(t.transform(f64::NAN), 4.0);
        assert!(t.invert().is_err());
    }
}
