use std::fmt;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::infer::{self, NumericLiteral, SemanticType};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn semantic_type(&self) -> SemanticType {
        match self {
            Value::Integer(_) => SemanticType::Integer,
            Value::Real(_) => SemanticType::Real,
            Value::Text(_) => SemanticType::Text,
        }
    }

    pub fn as_display(&self) -> String {
        match self {
            Value::Integer(i) => i.to_string(),
            Value::Real(f) => {
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    format!("{f:.1}")
                } else {
                    f.to_string()
                }
            }
            Value::Text(s) => s.clone(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

/// Coerce a raw cell into the target type using the shared cleaning rules.
///
/// Returns `Ok(None)` for empty cells and null placeholders. A value that
/// cannot be represented in `ty` is an error; the caller decides whether that
/// becomes a null.
pub fn coerce(raw: &str, ty: SemanticType) -> Result<Option<Value>> {
    if ty == SemanticType::Text {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        return Ok(Some(Value::Text(trimmed.to_string())));
    }

    let Some(cleaned) = infer::clean_value(raw) else {
        return Ok(None);
    };
    let literal = infer::classify(&cleaned)
        .ok_or_else(|| anyhow!("'{}' is not numeric", raw.trim()))?;

    match (ty, literal) {
        (SemanticType::Integer, NumericLiteral::Integer(value)) => Ok(Some(Value::Integer(value))),
        (SemanticType::Integer, NumericLiteral::Real(value)) => {
            if value.fract() == 0.0 && value.abs() <= i64::MAX as f64 {
                Ok(Some(Value::Integer(value as i64)))
            } else {
                Err(anyhow!("'{}' is not a whole number", raw.trim()))
            }
        }
        (_, literal) => Ok(Some(Value::Real(literal.as_f64()))),
    }
}

pub fn render(value: Option<&Value>) -> String {
    value.map(Value::as_display).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_coercion_accepts_separators_and_whole_floats() {
        assert_eq!(
            coerce("1,234", SemanticType::Integer).unwrap(),
            Some(Value::Integer(1234))
        );
        assert_eq!(
            coerce("(7)", SemanticType::Integer).unwrap(),
            Some(Value::Integer(-7))
        );
        assert_eq!(
            coerce("12.0", SemanticType::Integer).unwrap(),
            Some(Value::Integer(12))
        );
        assert!(coerce("12.5", SemanticType::Integer).is_err());
        assert!(coerce("Arsenal", SemanticType::Integer).is_err());
    }

    #[test]
    fn real_coercion_scales_percentages() {
        assert_eq!(
            coerce("45%", SemanticType::Real).unwrap(),
            Some(Value::Real(0.45))
        );
        assert_eq!(
            coerce("3", SemanticType::Real).unwrap(),
            Some(Value::Real(3.0))
        );
    }

    #[test]
    fn blanks_and_placeholders_become_null() {
        assert_eq!(coerce("", SemanticType::Integer).unwrap(), None);
        assert_eq!(coerce("N/A", SemanticType::Real).unwrap(), None);
        assert_eq!(coerce("   ", SemanticType::Text).unwrap(), None);
    }

    #[test]
    fn text_is_trimmed_verbatim() {
        assert_eq!(
            coerce("  Bukayo Saka ", SemanticType::Text).unwrap(),
            Some(Value::Text("Bukayo Saka".into()))
        );
    }

    #[test]
    fn display_keeps_real_marker() {
        assert_eq!(Value::Real(2.0).as_display(), "2.0");
        assert_eq!(Value::Real(0.45).as_display(), "0.45");
        assert_eq!(render(None), "");
    }
}
