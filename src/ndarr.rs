//! Batch transformation of [ndarray] point sets, one point per row.
use ndarray::{Array2, ArrayView2, ArrayViewMut2};

use crate::{ShortVec, TransformResult, Transformation, error::ensure_dimension};

/// Transform every row of `input` into the matching row of `output`.
///
/// As with [Transformation::bulk_transform_into],
/// points which fail are filled with NaN, every other point is still transformed,
/// and the first error is returned.
pub fn transform_ndarray_into<T: Transformation + ?Sized>(
    t: &T,
    input: ArrayView2<f64>,
    mut output: ArrayViewMut2<f64>,
) -> TransformResult<()> {
    ensure_dimension("input columns", t.input_ndim(), input.ncols())?;
    ensure_dimension("output columns", t.output_ndim(), output.ncols())?;
    ensure_dimension("output rows", input.nrows(), output.nrows())?;

    let mut pt: ShortVec<f64> = smallvec::smallvec![f64::NAN; t.input_ndim()];
    let mut buf: ShortVec<f64> = smallvec::smallvec![f64::NAN; t.output_ndim()];
    let mut first_err = None;

    for (in_row, mut out_row) in input.rows().into_iter().zip(output.rows_mut()) {
        pt.iter_mut().zip(in_row.iter()).for_each(|(p, v)| *p = *v);
        match t.transform_into(&pt, &mut buf) {
            Ok(()) => out_row.iter_mut().zip(buf.iter()).for_each(|(o, v)| *o = *v),
            Err(e) => {
                out_row.fill(f64::NAN);
                first_err.get_or_insert(e);
            }
        }
    }

    first_err.map_or(Ok(()), Err)
}

/// Transform every row of `points` into a freshly allocated array.
///
/// Fails on the first point which cannot be transformed;
/// use [transform_ndarray_into] to keep the successful points.
pub fn transform_ndarray<T: Transformation + ?Sized>(
    t: &T,
    points: ArrayView2<f64>,
) -> TransformResult<Array2<f64>> {
    let mut out = Array2::from_elem((points.nrows(), t.output_ndim()), f64::NAN);
    transform_ndarray_into(t, points, out.view_mut())?;
    Ok(out)
}
