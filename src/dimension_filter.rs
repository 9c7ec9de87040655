//! Extracting the part of a transformation which acts on a subset of ordinates.
use std::sync::Arc;

use crate::transforms::linear_from_matrix;
use crate::{
    Composition, Identity, Matrix, TransformError, TransformResult, Transformation, concatenate,
    pass_through,
};

/// Separates a sub-transformation from a larger one, given the source and/or
/// target ordinates to keep.
///
/// ```text
/// [lon, lat, height, time] --PassThrough(0, geographic->projected, 2)--> [x, y, height, time]
/// ```
/// Keeping source dimension 3 of the above gives an identity on `time`,
/// with target dimension 3; keeping 0 and 1 gives back the geographic->projected step.
///
/// Dimensions are kept sorted and unique.
/// After [DimensionFilter::separate], the source and target dimensions
/// describe the returned transformation's place in the original.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DimensionFilter {
    source_dimensions: Option<Vec<usize>>,
    target_dimensions: Option<Vec<usize>>,
}

fn insert(dims: &mut Option<Vec<usize>>, values: impl IntoIterator<Item = usize>) {
    let dims = dims.get_or_insert_with(Vec::new);
    for v in values {
        if let Err(pos) = dims.binary_search(&v) {
            dims.insert(pos, v);
        }
    }
}

fn check_range(lower: usize, upper: usize) -> TransformResult<()> {
    if lower >= upper {
        return Err(TransformError::invalid_argument(format!(
            "Dimension range {lower}..{upper} is empty"
        )));
    }
    Ok(())
}

/// Whether every dimension in `lower..upper` is present in the sorted `dims`.
fn contains_all(dims: &[usize], lower: usize, upper: usize) -> bool {
    (lower..upper).all(|d| dims.binary_search(&d).is_ok())
}

impl DimensionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all requested dimensions, so the filter can be reused.
    pub fn clear(&mut self) {
        self.source_dimensions = None;
        self.target_dimensions = None;
    }

    pub fn add_source_dimension(&mut self, dimension: usize) {
        insert(&mut self.source_dimensions, [dimension]);
    }

    pub fn add_source_dimensions(&mut self, dimensions: &[usize]) {
        insert(&mut self.source_dimensions, dimensions.iter().copied());
    }

    /// Add `lower..upper`.
    pub fn add_source_dimension_range(&mut self, lower: usize, upper: usize) -> TransformResult<()> {
        check_range(lower, upper)?;
        insert(&mut self.source_dimensions, lower..upper);
        Ok(())
    }

    pub fn source_dimensions(&self) -> Option<&[usize]> {
        self.source_dimensions.as_deref()
    }

    pub fn add_target_dimension(&mut self, dimension: usize) {
        insert(&mut self.target_dimensions, [dimension]);
    }

    pub fn add_target_dimensions(&mut self, dimensions: &[usize]) {
        insert(&mut self.target_dimensions, dimensions.iter().copied());
    }

    /// Add `lower..upper`.
    pub fn add_target_dimension_range(&mut self, lower: usize, upper: usize) -> TransformResult<()> {
        check_range(lower, upper)?;
        insert(&mut self.target_dimensions, lower..upper);
        Ok(())
    }

    pub fn target_dimensions(&self) -> Option<&[usize]> {
        self.target_dimensions.as_deref()
    }

    /// The part of `transform` which maps the requested source dimensions
    /// onto the requested target dimensions.
    ///
    /// Without requested source dimensions, all are kept;
    /// without requested target dimensions, every target dimension
    /// which depends only on the kept source dimensions is kept, and recorded.
    pub fn separate(
        &mut self,
        transform: Arc<dyn Transformation>,
    ) -> TransformResult<Arc<dyn Transformation>> {
        let Some(source) = self.source_dimensions.clone() else {
            self.source_dimensions = Some((0..transform.input_ndim()).collect());
            return match self.target_dimensions.clone() {
                None => {
                    self.target_dimensions = Some((0..transform.output_ndim()).collect());
                    Ok(transform)
                }
                Some(target) => separate_output(transform, &target),
            };
        };
        let (separated, step_target) = separate_input(transform, &source)?;
        let Some(target) = self.target_dimensions.clone() else {
            self.target_dimensions = Some(step_target);
            return Ok(separated);
        };
        // requested targets, as positions among the separated step's outputs
        let positions = target
            .iter()
            .map(|d| step_target.binary_search(d))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| TransformError::InseparableTransform)?;
        separate_output(separated, &positions)
    }
}

/// Returns the separated transformation and the target dimensions it produces.
fn separate_input(
    transform: Arc<dyn Transformation>,
    source: &[usize],
) -> TransformResult<(Arc<dyn Transformation>, Vec<usize>)> {
    let dim_source = transform.input_ndim();
    let dim_target = transform.output_ndim();
    let (Some(&lower), Some(&last)) = (source.first(), source.last()) else {
        return Err(TransformError::InseparableTransform);
    };
    let upper = last + 1;
    if upper > dim_source {
        return Err(TransformError::invalid_argument(format!(
            "Source dimension {last} is out of range for a {dim_source}-dimensional transform"
        )));
    }
    log::trace!("Separating source dimensions {source:?} of {}", transform.to_wkt());

    if source.len() == dim_source {
        return Ok((transform, (0..dim_target).collect()));
    }
    if transform.is_identity() {
        return Ok((Arc::new(Identity::new(source.len())), source.to_vec()));
    }
    match transform.composition() {
        Composition::Concatenated(c) => {
            let (step1, mid) = separate_input(c.first().clone(), source)?;
            let (step2, target) = separate_input(c.second().clone(), &mid)?;
            return Ok((concatenate(step1, step2)?, target));
        }
        Composition::PassThrough(p) => {
            let sub = p.sub_transform();
            let sub_in = sub.input_ndim();
            let sub_out = sub.output_ndim();
            let sub_lower = p.first_affected_ordinate();
            let sub_upper = sub_lower + sub_in;

            let mut target = Vec::new();
            let mut sub_source = Vec::new();
            for &n in source {
                if (sub_lower..sub_upper).contains(&n) {
                    sub_source.push(n - sub_lower);
                } else if n >= sub_upper {
                    target.push(n + sub_out - sub_in);
                } else {
                    target.push(n);
                }
            }
            if sub_source.is_empty() {
                // only the passed-through ordinates were asked for
                return Ok((Arc::new(Identity::new(source.len())), target));
            }
            let (sub, sub_target) = separate_input(sub.clone(), &sub_source)?;
            target.extend(sub_target.iter().map(|d| d + sub_lower));
            target.sort_unstable();
            if contains_all(source, lower, sub_lower) && contains_all(source, sub_upper, upper) {
                let first = sub_lower.saturating_sub(lower);
                let trailing = upper.saturating_sub(sub_upper);
                return Ok((pass_through(first, sub, trailing)?, target));
            }
            // not contiguous; the linear case below may still apply
        }
        Composition::Leaf => {}
    }

    if let Some(matrix) = transform.matrix() {
        let mut rows = Vec::new();
        let mut target = Vec::new();
        let mut has_last_row = false;
        'rows: for j in 0..=dim_target {
            let mut row = Vec::with_capacity(source.len() + 1);
            for i in 0..dim_source {
                let element = matrix[(j, i)];
                if source.binary_search(&i).is_ok() {
                    row.push(element);
                } else if element != 0.0 {
                    // output j depends on a discarded input
                    continue 'rows;
                }
            }
            row.push(matrix[(j, dim_source)]);
            if j == dim_target {
                has_last_row = true;
            } else {
                target.push(j);
            }
            rows.push(row);
        }
        if has_last_row {
            return Ok((linear_from_matrix(Matrix::from_rows(&rows)?)?, target));
        }
    }
    Err(TransformError::InseparableTransform)
}

/// Keep only the given output ordinates, by position.
fn separate_output(
    transform: Arc<dyn Transformation>,
    target: &[usize],
) -> TransformResult<Arc<dyn Transformation>> {
    let dim_source = transform.input_ndim();
    let dim_target = transform.output_ndim();
    let Some(&last) = target.last() else {
        return Err(TransformError::InseparableTransform);
    };
    if last >= dim_target {
        return Err(TransformError::invalid_argument(format!(
            "Target dimension {last} is out of range for a {dim_target}-dimensional transform"
        )));
    }
    log::trace!("Separating target dimensions {target:?} of {}", transform.to_wkt());
    if target.len() == dim_target {
        return Ok(transform);
    }

    let select = |n_in: usize, index: &dyn Fn(usize) -> usize| -> TransformResult<_> {
        let mut m = Matrix::zeros(target.len() + 1, n_in + 1);
        for (j, &d) in target.iter().enumerate() {
            m.set(j, index(d), 1.0);
        }
        m.set(target.len(), n_in, 1.0);
        linear_from_matrix(m)
    };

    // when none of a pass-through's sub outputs are kept, skip the sub-transformation
    if let Composition::PassThrough(p) = transform.composition() {
        let sub_in = p.sub_transform().input_ndim();
        let sub_out = p.sub_transform().output_ndim();
        let sub_lower = p.first_affected_ordinate();
        let sub_upper = sub_lower + sub_out;
        if !target.iter().any(|d| (sub_lower..sub_upper).contains(d)) {
            return select(dim_source, &|d: usize| {
                if d >= sub_upper { d + sub_in - sub_out } else { d }
            });
        }
    }
    concatenate(transform, select(dim_target, &|d: usize| d)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{init_logger, transform};
    use crate::{
        Affine, Ellipsoid, ExponentialTransform1D, Geocentric, LinearTransform1D,
        LogarithmicTransform1D,
    };

    fn arc<T: Transformation + 'static>(t: T) -> Arc<dyn Transformation> {
        Arc::new(t)
    }

    fn geocentric() -> Arc<dyn Transformation> {
        arc(Geocentric::new(Ellipsoid::WGS84, true))
    }

    #[test]
    fn test_dimension_lists() {
        let mut filter = DimensionFilter::new();
        assert_eq!(filter.source_dimensions(), None);
        filter.add_source_dimension(4);
        filter.add_source_dimensions(&[1, 4, 0]);
        filter.add_source_dimension_range(2, 4).unwrap();
        assert_eq!(filter.source_dimensions(), Some(&[0, 1, 2, 3, 4][..]));
        assert!(filter.add_target_dimension_range(3, 3).is_err());
        filter.add_target_dimension(1);
        filter.clear();
        assert_eq!(filter, DimensionFilter::default());
    }

    #[test]
    fn test_pass_through_recovers_sub_transform() {
        init_logger();
        let geo = geocentric();
        let t = pass_through(2, geo.clone(), 1).unwrap();
        assert_eq!(t.input_ndim(), 6);

        let mut filter = DimensionFilter::new();
        filter.add_source_dimension_range(2, 5).unwrap();
        let separated = filter.separate(t.clone()).unwrap();
        assert!(Arc::ptr_eq(&separated, &geo));
        assert_eq!(filter.target_dimensions(), Some(&[2, 3, 4][..]));

        for (range, expected_target) in [((0, 2), vec![0, 1]), ((5, 6), vec![5])] {
            let mut filter = DimensionFilter::new();
            filter.add_source_dimension_range(range.0, range.1).unwrap();
            let separated = filter.separate(t.clone()).unwrap();
            assert!(separated.is_identity());
            assert_eq!(separated.input_ndim(), range.1 - range.0);
            assert_eq!(filter.target_dimensions(), Some(&expected_target[..]));
        }
    }

    #[test]
    fn test_concatenated() {
        let exp = arc(ExponentialTransform1D::try_new(2.0, 1.0).unwrap());
        let log = arc(LogarithmicTransform1D::try_new(10.0, 0.0).unwrap());
        let t = concatenate(
            pass_through(0, exp.clone(), 1).unwrap(),
            pass_through(1, log, 0).unwrap(),
        )
        .unwrap();
        assert!(matches!(t.composition(), Composition::Concatenated(_)));

        let mut filter = DimensionFilter::new();
        filter.add_source_dimension(0);
        let separated = filter.separate(t).unwrap();
        assert!(Arc::ptr_eq(&separated, &exp));
        assert_eq!(filter.target_dimensions(), Some(&[0][..]));
    }

    #[test]
    fn test_linear() {
        let m = Matrix::from_rows(&[
            [2.0, 0.0, 0.0, 1.0],
            [0.0, 3.0, 1.0, 2.0],
            [0.0, 0.0, 4.0, 3.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
        .unwrap();
        let t = arc(Affine::try_new(m).unwrap());

        let mut filter = DimensionFilter::new();
        filter.add_source_dimension(0);
        let separated = filter.separate(t.clone()).unwrap();
        assert_eq!(separated.matrix(), LinearTransform1D::new(2.0, 1.0).matrix());
        assert_eq!(filter.target_dimensions(), Some(&[0][..]));

        let mut filter = DimensionFilter::new();
        filter.add_source_dimensions(&[1, 2]);
        let separated = filter.separate(t).unwrap();
        assert_eq!(filter.target_dimensions(), Some(&[1, 2][..]));
        assert_eq!(transform(separated.as_ref(), &[1.0, 1.0]), vec![6.0, 7.0]);
    }

    #[test]
    fn test_target_only() {
        let mut filter = DimensionFilter::new();
        filter.add_target_dimension(1);
        let t = filter.separate(geocentric()).unwrap();
        assert_eq!(t.input_ndim(), 3);
        assert_eq!(t.output_ndim(), 1);
        assert_eq!(filter.source_dimensions(), Some(&[0, 1, 2][..]));
        let full = transform(geocentric().as_ref(), &[10.0, 20.0, 30.0]);
        assert_eq!(transform(t.as_ref(), &[10.0, 20.0, 30.0]), vec![full[1]]);
    }

    #[test]
    fn test_source_and_target() {
        let exp = arc(ExponentialTransform1D::try_new(2.0, 1.0).unwrap());
        let t = pass_through(1, exp, 1).unwrap();
        let mut filter = DimensionFilter::new();
        filter.add_source_dimensions(&[0, 1]);
        filter.add_target_dimension(1);
        let separated = filter.separate(t).unwrap();
        assert_eq!(separated.input_ndim(), 2);
        assert_eq!(separated.output_ndim(), 1);
        assert_eq!(transform(separated.as_ref(), &[5.0, 3.0]), vec![8.0]);
        assert_eq!(filter.target_dimensions(), Some(&[1][..]));
    }

    #[test]
    fn test_skips_unused_sub_transform() {
        let t = pass_through(1, geocentric(), 1).unwrap();
        let mut filter = DimensionFilter::new();
        filter.add_target_dimensions(&[0, 4]);
        let separated = filter.separate(t).unwrap();
        assert!(separated.matrix().is_some());
        assert_eq!(
            transform(separated.as_ref(), &[1.0, 2.0, 3.0, 4.0, 5.0]),
            vec![1.0, 5.0]
        );
    }

    #[test]
    fn test_inseparable() {
        let mut filter = DimensionFilter::new();
        filter.add_source_dimension(0);
        assert!(matches!(
            filter.separate(geocentric()),
            Err(TransformError::InseparableTransform)
        ));

        let mut filter = DimensionFilter::new();
        filter.add_source_dimension(7);
        assert!(matches!(
            filter.separate(geocentric()),
            Err(TransformError::InvalidArgument(_))
        ));
    }
}
