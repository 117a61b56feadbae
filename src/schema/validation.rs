//! Per-field validation rules applied after type conversion.

use crate::error::ConfigError;
use regex::Regex;
use serde_json::Value;

#[derive(Clone, Debug)]
pub enum Rule {
    Length { min: Option<usize>, max: Option<usize> },
    Range { min: Option<f64>, max: Option<f64> },
    Pattern(Regex),
    OneOf(Vec<Value>),
    Email,
    /// Domain check on a string value, e.g. a tax id check digit.
    Check { check: fn(&str) -> bool, message: &'static str },
}

impl Rule {
    pub fn max_length(max: usize) -> Self {
        Rule::Length { min: None, max: Some(max) }
    }

    pub fn pattern(pattern: &str) -> Result<Self, ConfigError> {
        Regex::new(pattern)
            .map(Rule::Pattern)
            .map_err(|e| ConfigError::InvalidPattern(e.to_string()))
    }

    /// Returns the failure message, if any. Null values always pass.
    pub fn check(&self, v: &Value) -> Result<(), String> {
        if v.is_null() {
            return Ok(());
        }
        match self {
            Rule::Length { min, max } => {
                if let Some(s) = v.as_str() {
                    let len = s.chars().count();
                    if let Some(max) = max {
                        if len > *max {
                            return Err(format!("Longer than maximum length {}.", max));
                        }
                    }
                    if let Some(min) = min {
                        if len < *min {
                            return Err(format!("Shorter than minimum length {}.", min));
                        }
                    }
                }
            }
            Rule::Range { min, max } => {
                if let Some(n) = v.as_f64() {
                    if let Some(min) = min {
                        if n < *min {
                            return Err(format!("Must be at least {}.", min));
                        }
                    }
                    if let Some(max) = max {
                        if n > *max {
                            return Err(format!("Must be at most {}.", max));
                        }
                    }
                }
            }
            Rule::Pattern(re) => {
                if let Some(s) = v.as_str() {
                    if !re.is_match(s) {
                        return Err("String does not match expected pattern.".into());
                    }
                }
            }
            Rule::OneOf(allowed) => {
                if !allowed.iter().any(|a| value_eq(v, a)) {
                    return Err("Not a valid choice.".into());
                }
            }
            Rule::Email => {
                if let Some(s) = v.as_str() {
                    let valid = match s.split_once('@') {
                        Some((user, domain)) => !user.is_empty() && domain.contains('.'),
                        None => false,
                    };
                    if !valid {
                        return Err("Not a valid email address.".into());
                    }
                }
            }
            Rule::Check { check, message } => {
                if let Some(s) = v.as_str() {
                    if !check(s) {
                        return Err((*message).to_string());
                    }
                }
            }
        }
        Ok(())
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn length_bounds() {
        let rule = Rule::max_length(8);
        assert!(rule.check(&json!("00007")).is_ok());
        assert_eq!(
            rule.check(&json!("123456789")).unwrap_err(),
            "Longer than maximum length 8."
        );
        assert!(rule.check(&Value::Null).is_ok());
    }

    #[test]
    fn one_of_compares_numbers_numerically() {
        let rule = Rule::OneOf(vec![json!(1), json!("a")]);
        assert!(rule.check(&json!(1.0)).is_ok());
        assert!(rule.check(&json!("b")).is_err());
    }

    #[test]
    fn pattern_and_email() {
        let rule = Rule::pattern("^[0-9]+$").unwrap();
        assert!(rule.check(&json!("0123")).is_ok());
        assert!(rule.check(&json!("12a")).is_err());
        assert!(Rule::Email.check(&json!("ana@example.com")).is_ok());
        assert!(Rule::Email.check(&json!("ana")).is_err());
    }
}
