//! Named parameter sets, used to describe a transformation to the factory
//! and to render it as well-known text.
use std::fmt;

use crate::{TransformError, TransformResult};

#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Integer(i64),
    Real(f64),
    Text(String),
    /// A tuple of reals, e.g. a control point.
    Reals(Vec<f64>),
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v:?}"),
            Self::Text(v) => write!(f, "\"{v}\""),
            Self::Reals(vs) => {
                write!(f, "[")?;
                for (idx, v) in vs.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v:?}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<usize> for ParameterValue {
    fn from(value: usize) -> Self {
        Self::Integer(value as i64)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<f64>> for ParameterValue {
    fn from(value: Vec<f64>) -> Self {
        Self::Reals(value)
    }
}

impl From<[f64; 2]> for ParameterValue {
    fn from(value: [f64; 2]) -> Self {
        Self::Reals(value.to_vec())
    }
}

/// A classification name plus ordered named values.
///
/// Lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterGroup {
    name: String,
    values: Vec<(String, ParameterValue)>,
}

impl ParameterGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    /// Builder-style [ParameterGroup::set].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Replace the value of an existing parameter or append a new one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ParameterValue>) {
        let name = name.into();
        let value = value.into();
        match self
            .values
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some((_, v)) => *v = value,
            None => self.values.push((name, value)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.values
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    fn required(&self, name: &str) -> TransformResult<&ParameterValue> {
        self.get(name)
            .ok_or_else(|| TransformError::ParameterNotFound(name.to_string()))
    }

    /// Real value; integers are widened.
    pub fn real(&self, name: &str) -> TransformResult<f64> {
        match self.required(name)? {
            ParameterValue::Real(v) => Ok(*v),
            ParameterValue::Integer(v) => Ok(*v as f64),
            other => Err(TransformError::invalid_parameter(
                name,
                format!("expected a number, got {other}"),
            )),
        }
    }

    pub fn real_or(&self, name: &str, default: f64) -> TransformResult<f64> {
        if self.get(name).is_none() {
            return Ok(default);
        }
        self.real(name)
    }

    pub fn integer(&self, name: &str) -> TransformResult<i64> {
        match self.required(name)? {
            ParameterValue::Integer(v) => Ok(*v),
            ParameterValue::Real(v) if v.fract() == 0.0 => Ok(*v as i64),
            other => Err(TransformError::invalid_parameter(
                name,
                format!("expected an integer, got {other}"),
            )),
        }
    }

    /// Non-negative integer, e.g. an ordinate index or a count.
    pub fn index(&self, name: &str) -> TransformResult<usize> {
        let value = self.integer(name)?;
        usize::try_from(value)
            .map_err(|_| TransformError::invalid_parameter(name, format!("{value} is negative")))
    }

    pub fn index_or(&self, name: &str, default: usize) -> TransformResult<usize> {
        if self.get(name).is_none() {
            return Ok(default);
        }
        self.index(name)
    }

    pub fn boolean_or(&self, name: &str, default: bool) -> TransformResult<bool> {
        match self.get(name) {
            None => Ok(default),
            Some(ParameterValue::Integer(v)) => Ok(*v != 0),
            Some(ParameterValue::Text(t)) if t.eq_ignore_ascii_case("true") => Ok(true),
            Some(ParameterValue::Text(t)) if t.eq_ignore_ascii_case("false") => Ok(false),
            Some(other) => Err(TransformError::invalid_parameter(
                name,
                format!("expected a boolean, got {other}"),
            )),
        }
    }

    pub fn text(&self, name: &str) -> TransformResult<&str> {
        match self.required(name)? {
            ParameterValue::Text(v) => Ok(v),
            other => Err(TransformError::invalid_parameter(
                name,
                format!("expected text, got {other}"),
            )),
        }
    }

    pub fn reals(&self, name: &str) -> TransformResult<&[f64]> {
        match self.required(name)? {
            ParameterValue::Reals(v) => Ok(v),
            other => Err(TransformError::invalid_parameter(
                name,
                format!("expected a tuple of numbers, got {other}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let group = ParameterGroup::new("Molodenski").with("DX", 84.0).with("dim", 3_i64);
        assert_eq!(group.real("dx").unwrap(), 84.0);
        assert_eq!(group.real("Dim").unwrap(), 3.0);
        assert!(matches!(
            group.real("dz"),
            Err(TransformError::ParameterNotFound(_))
        ));
        assert_eq!(group.real_or("dz", 0.0).unwrap(), 0.0);
    }

    #[test]
    fn test_set_replaces() {
        let mut group = ParameterGroup::new("Affine").with("num_row", 3_i64);
        group.set("NUM_ROW", 4_i64);
        assert_eq!(group.len(), 1);
        assert_eq!(group.integer("num_row").unwrap(), 4);
    }

    #[test]
    fn test_negative_index_rejected() {
        let group = ParameterGroup::new("PassThrough").with("first", -1_i64);
        assert!(matches!(
            group.index("first"),
            Err(TransformError::InvalidParameterValue { .. })
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(ParameterValue::Reals(vec![1.0, -2.5]).to_string(), "[1.0, -2.5]");
        assert_eq!(ParameterValue::Text("a.las".into()).to_string(), "\"a.las\"");
    }
}
