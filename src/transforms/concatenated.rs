use std::sync::{Arc, OnceLock};

use smallvec::smallvec;

use crate::error::ensure_dimension;
use crate::{
    Composition, Matrix, ShortVec, TransformResult, Transformation, as_muts, as_refs, vec_of_vec,
    wkt,
};

/// Apply `first`, then `second`.
///
/// Built by [crate::concatenate], which short-circuits identities
/// and collapses linear pairs before falling back to this type.
#[derive(Debug)]
pub struct Concatenated {
    first: Arc<dyn Transformation>,
    second: Arc<dyn Transformation>,
    inverse: OnceLock<Arc<dyn Transformation>>,
}

impl Concatenated {
    /// Chain two transformations without any simplification.
    pub fn try_new(
        first: Arc<dyn Transformation>,
        second: Arc<dyn Transformation>,
    ) -> TransformResult<Self> {
        ensure_dimension("second", first.output_ndim(), second.input_ndim())?;
        Ok(Self {
            first,
            second,
            inverse: OnceLock::new(),
        })
    }

    pub fn first(&self) -> &Arc<dyn Transformation> {
        &self.first
    }

    pub fn second(&self) -> &Arc<dyn Transformation> {
        &self.second
    }

    /// Leaf steps in application order, with nested concatenations flattened.
    pub fn steps(&self) -> Vec<Arc<dyn Transformation>> {
        let mut out = Vec::new();
        for leg in [&self.first, &self.second] {
            match leg.composition() {
                Composition::Concatenated(inner) => out.extend(inner.steps()),
                _ => out.push(leg.clone()),
            }
        }
        out
    }

    fn uncached(&self) -> Self {
        Self {
            first: self.first.clone(),
            second: self.second.clone(),
            inverse: OnceLock::new(),
        }
    }

    fn transform_with_buffer(
        &self,
        pt: &[f64],
        mid: &mut [f64],
        buf: &mut [f64],
    ) -> TransformResult<()> {
        self.first.transform_into(pt, mid)?;
        self.second.transform_into(mid, buf)
    }
}

impl Transformation for Concatenated {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> TransformResult<()> {
        let mut mid: ShortVec<f64> = smallvec![f64::NAN; self.first.output_ndim()];
        self.transform_with_buffer(pt, &mut mid, buf)
    }

    fn bulk_transform_into(&self, pts: &[&[f64]], bufs: &mut [&mut [f64]]) -> TransformResult<()> {
        let mut mid: ShortVec<f64> = smallvec![f64::NAN; self.first.output_ndim()];
        let mut first_err = None;
        for (pt, buf) in pts.iter().zip(bufs.iter_mut()) {
            if let Err(e) = self.transform_with_buffer(pt, &mut mid, buf) {
                buf.fill(f64::NAN);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn column_transform_into(
        &self,
        columns: &[&[f64]],
        bufs: &mut [&mut [f64]],
    ) -> TransformResult<()> {
        let n_pts = columns.first().map_or(0, |c| c.len());
        let mut mid = vec_of_vec(self.first.output_ndim(), n_pts, f64::NAN);
        // failed points come out of the first leg as NaN and stay NaN through the second
        let first_result = self
            .first
            .column_transform_into(columns, &mut as_muts(&mut mid));
        let second_result = self.second.column_transform_into(&as_refs(&mid), bufs);
        first_result.and(second_result)
    }

    fn invert(&self) -> TransformResult<Arc<dyn Transformation>> {
        if let Some(inv) = self.inverse.get() {
            return Ok(inv.clone());
        }
        let inverse = Concatenated {
            first: self.second.invert()?,
            second: self.first.invert()?,
            inverse: OnceLock::from(Arc::new(self.uncached()) as Arc<dyn Transformation>),
        };
        Ok(self.inverse.get_or_init(|| Arc::new(inverse)).clone())
    }

    fn derivative(&self, pt: &[f64]) -> TransformResult<Matrix> {
        let mut mid: ShortVec<f64> = smallvec![f64::NAN; self.first.output_ndim()];
        self.first.transform_into(pt, &mut mid)?;
        let d1 = self.first.derivative(pt)?;
        let d2 = self.second.derivative(&mid)?;
        d2.multiply(&d1)
    }

    fn is_identity(&self) -> bool {
        false
    }

    fn input_ndim(&self) -> usize {
        self.first.input_ndim()
    }

    fn output_ndim(&self) -> usize {
        self.second.output_ndim()
    }

    fn composition(&self) -> Composition<'_> {
        Composition::Concatenated(self)
    }

    fn to_wkt(&self) -> String {
        let parts: Vec<String> = self.steps().iter().map(|s| s.to_wkt()).collect();
        wkt::concat_mt(&parts)
    }
}
