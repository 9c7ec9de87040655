use std::sync::Arc;

use crate::{Matrix, ParameterGroup, TransformResult, Transformation, copy_into};

/// A no-op transform which returns the input point as the output point.
///
/// Defined for one dimensionality.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity(usize);

impl Identity {
    pub fn new(ndim: usize) -> Self {
        Self(ndim)
    }
}

impl Transformation for Identity {
    fn invert(&self) -> TransformResult<Arc<dyn Transformation>> {
        Ok(Arc::new(*self))
    }

    fn input_ndim(&self) -> usize {
        self.0
    }

    fn output_ndim(&self) -> usize {
        self.0
    }

    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> TransformResult<()> {
        buf.copy_from_slice(pt);
        Ok(())
    }

    fn column_transform_into(
        &self,
        columns: &[&[f64]],
        bufs: &mut [&mut [f64]],
    ) -> TransformResult<()> {
        copy_into(columns, bufs);
        Ok(())
    }

    fn derivative(&self, _pt: &[f64]) -> TransformResult<Matrix> {
        Ok(Matrix::identity(self.0))
    }

    fn is_identity(&self) -> bool {
        true
    }

    fn matrix(&self) -> Option<Matrix> {
        Some(Matrix::identity(self.0 + 1))
    }

    fn parameters(&self) -> Option<ParameterGroup> {
        Some(
            ParameterGroup::new("Affine")
                .with("num_row", self.0 + 1)
                .with("num_col", self.0 + 1),
        )
    }
}
