//! Well-known-text emission for math transforms.
use crate::ParameterGroup;

/// `PARAM_MT["name", PARAMETER["key", value], ...]`
pub fn param_mt(group: &ParameterGroup) -> String {
    let mut out = format!("PARAM_MT[\"{}\"", group.name());
    for (key, value) in group.iter() {
        out.push_str(&format!(", PARAMETER[\"{key}\", {value}]"));
    }
    out.push(']');
    out
}

/// `CONCAT_MT[a, b, ...]`
pub fn concat_mt<S: AsRef<str>>(steps: &[S]) -> String {
    let inner: Vec<&str> = steps.iter().map(|s| s.as_ref()).collect();
    format!("CONCAT_MT[{}]", inner.join(", "))
}

/// `PASSTHROUGH_MT[first, sub]`
pub fn passthrough_mt(first_affected_ordinate: usize, sub: &str) -> String {
    format!("PASSTHROUGH_MT[{first_affected_ordinate}, {sub}]")
}

/// `INVERSE_MT[forward]`
pub fn inverse_mt(forward: &str) -> String {
    format!("INVERSE_MT[{forward}]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_mt() {
        let group = ParameterGroup::new("Exponential").with("base", 10.0);
        assert_eq!(
            param_mt(&group),
            "PARAM_MT[\"Exponential\", PARAMETER[\"base\", 10.0]]"
        );
    }

    #[test]
    fn test_nesting() {
        let a = param_mt(&ParameterGroup::new("A"));
        let b = inverse_mt(&param_mt(&ParameterGroup::new("B")));
        assert_eq!(
            passthrough_mt(2, &concat_mt(&[a, b])),
            "PASSTHROUGH_MT[2, CONCAT_MT[PARAM_MT[\"A\"], INVERSE_MT[PARAM_MT[\"B\"]]]]"
        );
    }
}
