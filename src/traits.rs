use std::sync::Arc;

use num_traits::AsPrimitive;
use smallvec::smallvec;

use crate::error::ensure_dimension;
use crate::transforms::{Concatenated, PassThrough};
use crate::{Matrix, ParameterGroup, ShortVec, TransformError, TransformResult, wkt};

/// Structural view of a transformation, used by the composition logic
/// to look inside concatenations and pass-throughs.
#[derive(Debug, Clone, Copy)]
pub enum Composition<'a> {
    /// Not a composite; may still be linear (see [Transformation::matrix]).
    Leaf,
    Concatenated(&'a Concatenated),
    PassThrough(&'a PassThrough),
}

/// Core coordinate transformation interface.
///
/// A transformation maps a point of [Transformation::input_ndim] ordinates
/// to a point of [Transformation::output_ndim] ordinates.
/// Dimensionalities are fixed at construction and transformations are immutable afterwards,
/// so they can be shared between threads behind an [Arc].
///
/// Implementations may not perform any bounds checks on the input,
/// as these transformations generally happen in performance-critical hot loops.
/// Therefore, they may panic if coordinates or output buffers of incorrect length are given;
/// the flat-array functions in this module ([transform_array], [transform_in_place], [transform_point])
/// validate lengths first.
pub trait Transformation: std::fmt::Debug + Send + Sync {
    /// Transform a single point from the input space to the output space.
    /// Writes to a pre-allocated output buffer.
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> TransformResult<()>;

    /// Transform multiple points from the input space into the output space.
    /// Writes to pre-allocated output buffers.
    ///
    /// A point which fails does not stop the batch:
    /// its output is filled with NaN, the remaining points are still transformed,
    /// and the first error encountered is returned at the end.
    fn bulk_transform_into(&self, pts: &[&[f64]], bufs: &mut [&mut [f64]]) -> TransformResult<()> {
        let mut first_err = None;
        for (pt, buf) in pts.iter().zip(bufs.iter_mut()) {
            if let Err(e) = self.transform_into(pt, buf) {
                buf.fill(f64::NAN);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Transform multiple points given in columnar format.
    /// Writes to pre-allocated output buffers.
    ///
    /// The trait implementation is inefficient,
    /// simply wrapping [Transformation::transform_into],
    /// and should be overridden by implementors where optimisations are available.
    /// Failure semantics match [Transformation::bulk_transform_into].
    fn column_transform_into(
        &self,
        columns: &[&[f64]],
        bufs: &mut [&mut [f64]],
    ) -> TransformResult<()> {
        let Some(n_pts) = columns.first().map(|c| c.len()) else {
            return Ok(());
        };
        let mut in_pt: ShortVec<f64> = smallvec![f64::NAN; self.input_ndim()];
        let mut out_pt: ShortVec<f64> = smallvec![f64::NAN; self.output_ndim()];
        let mut first_err = None;
        for pt_idx in 0..n_pts {
            for (idx, col) in columns.iter().enumerate() {
                in_pt[idx] = col[pt_idx];
            }
            if let Err(e) = self.transform_into(&in_pt, &mut out_pt) {
                out_pt.fill(f64::NAN);
                first_err.get_or_insert(e);
            }
            for (out_col, p) in bufs.iter_mut().zip(out_pt.iter()) {
                out_col[pt_idx] = *p;
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Return the inverse transformation.
    ///
    /// By default, transformations are considered non-invertible;
    /// specific transformations override this.
    /// Failing here never means the forward transformation was invalid.
    fn invert(&self) -> TransformResult<Arc<dyn Transformation>> {
        Err(TransformError::noninvertible(format!(
            "no inverse for {}",
            self.to_wkt()
        )))
    }

    /// Jacobian of the transformation at the given point,
    /// with [Transformation::output_ndim] rows and [Transformation::input_ndim] columns.
    fn derivative(&self, _pt: &[f64]) -> TransformResult<Matrix> {
        Err(TransformError::unsupported(
            "derivative is not available for this transformation",
        ))
    }

    /// Whether this transformation represents the identity,
    /// i.e. input and output are the same number of dimensions
    /// and the coordinate values (and positions) are not changed.
    /// This allows some downstream optimisations.
    ///
    /// `true` means it definitely is an identity.
    /// For certain transformations, checking for identity may be very expensive;
    /// these should return `false` and users should be aware that a `false` value is not definitive.
    fn is_identity(&self) -> bool;

    fn input_ndim(&self) -> usize;

    fn output_ndim(&self) -> usize;

    /// The augmented `(M+1)×(N+1)` matrix, for transformations which are linear
    /// (affine or projective) in homogeneous coordinates.
    fn matrix(&self) -> Option<Matrix> {
        None
    }

    fn composition(&self) -> Composition<'_> {
        Composition::Leaf
    }

    /// Classification name and parameters this transformation can be recreated from
    /// through [crate::MathTransformFactory::create].
    fn parameters(&self) -> Option<ParameterGroup> {
        None
    }

    /// Well-known-text rendering of this transformation.
    fn to_wkt(&self) -> String {
        match self.parameters() {
            Some(params) => wkt::param_mt(&params),
            None => wkt::param_mt(&ParameterGroup::new("Unknown")),
        }
    }
}

/// Jacobian of an inverse transformation at `pt`, obtained by inverting
/// the forward Jacobian at the point the inverse maps `pt` to.
pub(crate) fn inverse_derivative(
    forward: &dyn Transformation,
    inverse: &dyn Transformation,
    pt: &[f64],
) -> TransformResult<Matrix> {
    let source = transform_point(inverse, pt)?;
    forward.derivative(&source)?.invert()
}

/// Transform a single point, allocating the output.
pub fn transform_point(t: &dyn Transformation, pt: &[f64]) -> TransformResult<ShortVec<f64>> {
    ensure_dimension("point", t.input_ndim(), pt.len())?;
    let mut out = smallvec![f64::NAN; t.output_ndim()];
    t.transform_into(pt, &mut out)?;
    Ok(out)
}

fn check_range(
    argument: &str,
    len: usize,
    offset: usize,
    ndim: usize,
    num_points: usize,
) -> TransformResult<()> {
    let end = ndim
        .checked_mul(num_points)
        .and_then(|n| n.checked_add(offset));
    if end.is_none_or(|end| end > len) {
        return Err(TransformError::invalid_argument(format!(
            "{argument} array of length {len} cannot hold {num_points} points of {ndim} ordinates from offset {offset}"
        )));
    }
    Ok(())
}

/// Transform `num_points` points stored contiguously in `src` starting at `src_off`,
/// writing them contiguously into `dst` from `dst_off`.
///
/// Ordinates may be `f32` or `f64` on either side; computation always happens in `f64`.
/// Per-point failures follow [Transformation::bulk_transform_into]:
/// the failed point is written as NaN and the first error is returned once all points were visited.
pub fn transform_array<S, D>(
    t: &dyn Transformation,
    src: &[S],
    src_off: usize,
    dst: &mut [D],
    dst_off: usize,
    num_points: usize,
) -> TransformResult<()>
where
    S: Copy + Into<f64>,
    D: Copy + 'static,
    f64: AsPrimitive<D>,
{
    let in_dim = t.input_ndim();
    let out_dim = t.output_ndim();
    check_range("source", src.len(), src_off, in_dim, num_points)?;
    check_range("destination", dst.len(), dst_off, out_dim, num_points)?;

    let mut in_pt: ShortVec<f64> = smallvec![f64::NAN; in_dim];
    let mut out_pt: ShortVec<f64> = smallvec![f64::NAN; out_dim];
    let mut first_err = None;
    for idx in 0..num_points {
        let s = src_off + idx * in_dim;
        for (p, v) in in_pt.iter_mut().zip(&src[s..s + in_dim]) {
            *p = (*v).into();
        }
        if let Err(e) = t.transform_into(&in_pt, &mut out_pt) {
            out_pt.fill(f64::NAN);
            first_err.get_or_insert(e);
        }
        let d = dst_off + idx * out_dim;
        for (o, v) in dst[d..d + out_dim].iter_mut().zip(out_pt.iter()) {
            *o = v.as_();
        }
    }
    if let Some(e) = &first_err {
        log::debug!("Batch of {num_points} points finished with error: {e}");
    }
    first_err.map_or(Ok(()), Err)
}

/// Like [transform_array], with source and destination ranges in the same buffer.
///
/// The ranges may overlap: when they do and both sides have the same dimensionality,
/// points are processed back to front if the destination lies after the source.
/// Otherwise an overlapping source range is copied out first.
pub fn transform_in_place<T>(
    t: &dyn Transformation,
    buf: &mut [T],
    src_off: usize,
    dst_off: usize,
    num_points: usize,
) -> TransformResult<()>
where
    T: Copy + Into<f64> + 'static,
    f64: AsPrimitive<T>,
{
    let in_dim = t.input_ndim();
    let out_dim = t.output_ndim();
    check_range("source", buf.len(), src_off, in_dim, num_points)?;
    check_range("destination", buf.len(), dst_off, out_dim, num_points)?;

    let src_end = src_off + in_dim * num_points;
    let dst_end = dst_off + out_dim * num_points;
    let overlapping = src_off < dst_end && dst_off < src_end;

    if overlapping && in_dim != out_dim {
        let copy: Vec<f64> = buf[src_off..src_end].iter().map(|v| (*v).into()).collect();
        return transform_array(t, &copy, 0, buf, dst_off, num_points);
    }

    let mut in_pt: ShortVec<f64> = smallvec![f64::NAN; in_dim];
    let mut out_pt: ShortVec<f64> = smallvec![f64::NAN; out_dim];
    let mut first_err = None;
    let mut step = |idx: usize, buf: &mut [T]| {
        let s = src_off + idx * in_dim;
        for (p, v) in in_pt.iter_mut().zip(&buf[s..s + in_dim]) {
            *p = (*v).into();
        }
        if let Err(e) = t.transform_into(&in_pt, &mut out_pt) {
            out_pt.fill(f64::NAN);
            first_err.get_or_insert(e);
        }
        let d = dst_off + idx * out_dim;
        for (o, v) in buf[d..d + out_dim].iter_mut().zip(out_pt.iter()) {
            *o = v.as_();
        }
    };
    if dst_off > src_off {
        for idx in (0..num_points).rev() {
            step(idx, buf);
        }
    } else {
        for idx in 0..num_points {
            step(idx, buf);
        }
    }
    first_err.map_or(Ok(()), Err)
}
