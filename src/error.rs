//! Error types shared by every transformation.
//!
//! Errors fall into four groups:
//!
//! - construction-time validation ([TransformError::InvalidArgument],
//!   [TransformError::MismatchedDimension]),
//! - per-point numeric failures raised while transforming
//!   ([TransformError::NoConvergence], [TransformError::PointOutsideGrid]),
//! - [TransformError::NoninvertibleTransform], only raised by `invert()`,
//! - resource errors when loading grid files ([TransformError::Io], [TransformError::GridFormat]).
use std::path::PathBuf;

use thiserror::Error;

pub type TransformResult<T> = Result<T, TransformError>;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Argument \"{argument}\" has {actual} dimensions, while {expected} was expected")]
    MismatchedDimension {
        argument: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Transform is not invertible: {0}")]
    NoninvertibleTransform(String),

    #[error("{operation} did not converge after {iterations} iterations")]
    NoConvergence {
        operation: &'static str,
        iterations: usize,
    },

    #[error("Point ({x}, {y}) is outside the grid")]
    PointOutsideGrid { x: f64, y: f64 },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Transform is not separable on the requested dimensions")]
    InseparableTransform,

    #[error("No transform for classification \"{0}\"")]
    NoSuchIdentifier(String),

    #[error("Parameter \"{0}\" not found")]
    ParameterNotFound(String),

    #[error("Illegal value for parameter \"{name}\": {reason}")]
    InvalidParameterValue { name: String, reason: String },

    #[error("Could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed grid file {}: {reason}", path.display())]
    GridFormat { path: PathBuf, reason: String },
}

impl TransformError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn noninvertible(msg: impl Into<String>) -> Self {
        Self::NoninvertibleTransform(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameterValue {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn grid_format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::GridFormat {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error concerns a single point of a batch,
    /// as opposed to the shape of the input or the transform itself.
    pub fn is_per_point(&self) -> bool {
        matches!(
            self,
            Self::NoConvergence { .. } | Self::PointOutsideGrid { .. }
        )
    }
}

/// Fail with [TransformError::MismatchedDimension] unless `actual == expected`.
pub(crate) fn ensure_dimension(
    argument: &'static str,
    expected: usize,
    actual: usize,
) -> TransformResult<()> {
    if expected != actual {
        return Err(TransformError::MismatchedDimension {
            argument,
            expected,
            actual,
        });
    }
    Ok(())
}
