use std::sync::Arc;

use crate::{
    LinearTransform1D, Matrix, ParameterGroup, TransformError, TransformResult, Transformation,
};

fn check_base(base: f64) -> TransformResult<f64> {
    if !(base.is_finite() && base > 0.0 && base != 1.0) {
        return Err(TransformError::invalid_parameter(
            "base",
            format!("{base} is not a valid logarithm base"),
        ));
    }
    Ok(base)
}

/// `y = scale·base^x`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialTransform1D {
    base: f64,
    ln_base: f64,
    scale: f64,
}

impl ExponentialTransform1D {
    pub fn try_new(base: f64, scale: f64) -> TransformResult<Self> {
        let base = check_base(base)?;
        Ok(Self {
            base,
            ln_base: base.ln(),
            scale,
        })
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn transform(&self, x: f64) -> f64 {
        self.scale * (x * self.ln_base).exp()
    }
}

impl Transformation for ExponentialTransform1D {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> TransformResult<()> {
        buf[0] = self.transform(pt[0]);
        Ok(())
    }

    fn invert(&self) -> TransformResult<Arc<dyn Transformation>> {
        if self.scale <= 0.0 || !self.scale.is_finite() {
            return Err(TransformError::noninvertible(format!(
                "exponential with scale {}",
                self.scale
            )));
        }
        Ok(Arc::new(LogarithmicTransform1D {
            base: self.base,
            ln_base: self.ln_base,
            offset: -self.scale.ln() / self.ln_base,
        }))
    }

    fn derivative(&self, pt: &[f64]) -> TransformResult<Matrix> {
        Matrix::try_new(vec![self.transform(pt[0]) * self.ln_base], 1)
    }

    fn is_identity(&self) -> bool {
        false
    }

    fn input_ndim(&self) -> usize {
        1
    }

    fn output_ndim(&self) -> usize {
        1
    }

    fn parameters(&self) -> Option<ParameterGroup> {
        Some(
            ParameterGroup::new("Exponential")
                .with("base", self.base)
                .with("scale", self.scale),
        )
    }
}

/// `y = log_base(x) + offset`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogarithmicTransform1D {
    base: f64,
    ln_base: f64,
    offset: f64,
}

impl LogarithmicTransform1D {
    pub fn try_new(base: f64, offset: f64) -> TransformResult<Self> {
        let base = check_base(base)?;
        Ok(Self {
            base,
            ln_base: base.ln(),
            offset,
        })
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn transform(&self, x: f64) -> f64 {
        x.ln() / self.ln_base + self.offset
    }
}

impl Transformation for LogarithmicTransform1D {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> TransformResult<()> {
        buf[0] = self.transform(pt[0]);
        Ok(())
    }

    fn invert(&self) -> TransformResult<Arc<dyn Transformation>> {
        Ok(Arc::new(ExponentialTransform1D {
            base: self.base,
            ln_base: self.ln_base,
            scale: (-self.offset * self.ln_base).exp(),
        }))
    }

    fn derivative(&self, pt: &[f64]) -> TransformResult<Matrix> {
        Matrix::try_new(vec![1.0 / (pt[0] * self.ln_base)], 1)
    }

    fn is_identity(&self) -> bool {
        false
    }

    fn input_ndim(&self) -> usize {
        1
    }

    fn output_ndim(&self) -> usize {
        1
    }

    fn parameters(&self) -> Option<ParameterGroup> {
        Some(
            ParameterGroup::new("Logarithmic")
                .with("base", self.base)
                .with("offset", self.offset),
        )
    }
}

enum OneDim {
    Linear(f64, f64),
    Exponential(f64, f64),
    Logarithmic(f64, f64),
}

fn classify(t: &dyn Transformation) -> Option<OneDim> {
    if t.input_ndim() != 1 || t.output_ndim() != 1 {
        return None;
    }
    if let Some(m) = t.matrix() {
        return m.is_affine().then(|| OneDim::Linear(m[(0, 0)], m[(0, 1)]));
    }
    let params = t.parameters()?;
    match params.name() {
        "Exponential" => Some(OneDim::Exponential(
            params.real("base").ok()?,
            params.real("scale").ok()?,
        )),
        "Logarithmic" => Some(OneDim::Logarithmic(
            params.real("base").ok()?,
            params.real("offset").ok()?,
        )),
        _ => None,
    }
}

/// Closed form of `second ∘ first` when both are one-dimensional
/// exponential, logarithmic or linear pieces which fold into a single one.
pub(crate) fn collapse_1d(
    first: &dyn Transformation,
    second: &dyn Transformation,
) -> TransformResult<Option<Arc<dyn Transformation>>> {
    let (Some(a), Some(b)) = (classify(first), classify(second)) else {
        return Ok(None);
    };
    let out: Arc<dyn Transformation> = match (a, b) {
        // scale·base^(log_base(x) + offset) = scale·base^offset·x
        (OneDim::Logarithmic(b1, offset), OneDim::Exponential(b2, scale)) if b1 == b2 => {
            Arc::new(LinearTransform1D::new(scale * b1.powf(offset), 0.0))
        }
        // log_base(scale·base^x) + offset = x + log_base(scale) + offset
        (OneDim::Exponential(b1, scale), OneDim::Logarithmic(b2, offset))
            if b1 == b2 && scale > 0.0 =>
        {
            Arc::new(LinearTransform1D::new(1.0, scale.ln() / b1.ln() + offset))
        }
        // scale·base^(a·x + c) = (scale·base^c)·(base^a)^x
        (OneDim::Linear(a, c), OneDim::Exponential(base, scale)) if a != 0.0 => {
            let new_base = base.powf(a);
            if new_base == 1.0 {
                return Ok(None);
            }
            Arc::new(ExponentialTransform1D::try_new(new_base, scale * base.powf(c))?)
        }
        // a·(log_base(x) + offset) + c = log_(base^(1/a))(x) + a·offset + c
        (OneDim::Logarithmic(base, offset), OneDim::Linear(a, c)) if a != 0.0 => {
            let new_base = base.powf(1.0 / a);
            if new_base == 1.0 {
                return Ok(None);
            }
            Arc::new(LogarithmicTransform1D::try_new(new_base, a * offset + c)?)
        }
        _ => return Ok(None),
    };
    log::debug!("Collapsed one-dimensional pair into {}", out.to_wkt());
    Ok(Some(out))
}
