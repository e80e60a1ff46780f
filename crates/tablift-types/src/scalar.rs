//! Parameter scalars coerced from JSON.
//!
//! Dataset parameters arrive as JSON and must reach the drivers as typed
//! scalars, not opaque nodes. [`ScalarValue::from_json`] picks the narrowest
//! native type along the chain int32 → int64 → decimal → float64 → string;
//! booleans and nulls pass through unchanged.

use bigdecimal::BigDecimal;
use serde_json::Value as JsonValue;
use std::fmt;

/// A typed parameter scalar bound into an extraction query.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Decimal(BigDecimal),
    Float64(f64),
    Text(String),
}

impl ScalarValue {
    /// Coerce a JSON scalar to the narrowest native representation.
    ///
    /// Arrays and objects are rendered to their JSON text; drivers treat
    /// them as strings, mirroring how opaque parameter payloads travel.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if let Ok(narrow) = i32::try_from(i) {
                        Self::Int32(narrow)
                    } else {
                        Self::Int64(i)
                    }
                } else if let Some(u) = n.as_u64() {
                    // Larger than i64: exact decimal, never a lossy float.
                    Self::Decimal(BigDecimal::from(u))
                } else {
                    Self::Float64(n.as_f64().unwrap_or_default())
                }
            }
            JsonValue::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int32(i) => write!(f, "{i}"),
            Self::Int64(i) => write!(f, "{i}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// An ordered parameter list.
///
/// Order matters: the output-cursor driver binds inputs in the exact order
/// the dataset spec declared them.
pub type ParameterList = Vec<(String, ScalarValue)>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn small_integers_narrow_to_int32() {
        assert_eq!(ScalarValue::from_json(&json!(42)), ScalarValue::Int32(42));
        assert_eq!(
            ScalarValue::from_json(&json!(-2_147_483_648_i64)),
            ScalarValue::Int32(i32::MIN)
        );
    }

    #[test]
    fn wide_integers_stay_int64() {
        assert_eq!(
            ScalarValue::from_json(&json!(2_147_483_648_i64)),
            ScalarValue::Int64(2_147_483_648)
        );
    }

    #[test]
    fn u64_overflow_becomes_exact_decimal() {
        let v = ScalarValue::from_json(&json!(18_446_744_073_709_551_615_u64));
        assert_eq!(v, ScalarValue::Decimal(BigDecimal::from(u64::MAX)));
    }

    #[test]
    fn fractional_numbers_become_float64() {
        assert_eq!(
            ScalarValue::from_json(&json!(1.5)),
            ScalarValue::Float64(1.5)
        );
    }

    #[test]
    fn bools_nulls_and_strings_pass_through() {
        assert_eq!(ScalarValue::from_json(&json!(true)), ScalarValue::Bool(true));
        assert_eq!(ScalarValue::from_json(&JsonValue::Null), ScalarValue::Null);
        assert_eq!(
            ScalarValue::from_json(&json!("2024-01-01")),
            ScalarValue::Text("2024-01-01".into())
        );
    }

    #[test]
    fn compound_values_render_as_json_text() {
        let v = ScalarValue::from_json(&json!([1, 2]));
        assert_eq!(v, ScalarValue::Text("[1,2]".into()));
    }
}
