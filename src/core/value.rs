use crate::core::{Result, UmiError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A property value as stored in a column.
///
/// Integers and floats compare with each other numerically. `Null` sorts
/// after every other value, so ascending orders put missing values last.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        if let (Some(a), Some(b)) = (self.numeric(), other.numeric()) {
            return Ok(match (self, other) {
                (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
                _ => a.total_cmp(&b),
            });
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ok(Ordering::Equal),
            (Value::Null, _) => Ok(Ordering::Greater),
            (_, Value::Null) => Ok(Ordering::Less),
            (Value::Text(a), Value::Text(b)) => Ok(a.as_str().cmp(b.as_str())),
            (Value::Boolean(a), Value::Boolean(b)) => Ok(a.cmp(b)),
            _ => Err(UmiError::UnexpectedValue(format!(
                "Cannot compare {} value '{}' with {} value '{}'",
                self.type_name(),
                self,
                other.type_name(),
                other
            ))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Boolean(_) => "BOOLEAN",
            Value::Integer(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::Text(_) => "TEXT",
        }
    }

    /// Integer view; numeric strings such as stored ids in text columns
    /// are accepted too.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        if let Value::Text(s) = self { Some(s) } else { None }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// `Null` or an empty string; what the `required` validator rejects.
    pub fn is_empty(&self) -> bool {
        self.is_null() || self.as_str().is_some_and(str::is_empty)
    }

    /// Scalar from a configuration value. Arrays and objects are rejected.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        use serde_json::Value as Json;
        Ok(match value {
            Json::Null => Value::Null,
            Json::Bool(flag) => Value::Boolean(*flag),
            Json::String(text) => Value::Text(text.clone()),
            Json::Number(number) => match (number.as_i64(), number.as_f64()) {
                (Some(integer), _) => Value::Integer(integer),
                (None, Some(float)) => Value::Float(float),
                (None, None) => {
                    return Err(UmiError::UnexpectedValue(format!(
                        "Number {} does not fit a column value",
                        number
                    )));
                }
            },
            Json::Array(_) | Json::Object(_) => {
                return Err(UmiError::UnexpectedValue(format!(
                    "Expected a scalar, got {}",
                    value
                )));
            }
        })
    }

    fn numeric(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            _ => match (self.numeric(), other.numeric()) {
                (Some(a), Some(b)) => a.total_cmp(&b) == Ordering::Equal,
                _ => false,
            },
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Value) -> Option<Ordering> {
        self.compare(other).ok()
    }
}

/// Text prints raw so values can be spliced into URIs and formulas.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(flag) => write!(f, "{}", flag),
            Value::Integer(integer) => write!(f, "{}", integer),
            Value::Float(float) => write!(f, "{}", float),
            Value::Text(text) => f.write_str(text),
        }
    }
}

macro_rules! value_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for Value {
                fn from(value: $source) -> Self {
                    Value::$variant(value.into())
                }
            }
        )*
    };
}

value_from! {
    i64 => Integer,
    i32 => Integer,
    f64 => Float,
    bool => Boolean,
    String => Text,
    &str => Text,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sorts_last() {
        assert_eq!(Value::Null.compare(&Value::Integer(1)).unwrap(), Ordering::Greater);
        assert_eq!(Value::from("a").compare(&Value::Null).unwrap(), Ordering::Less);
    }

    #[test]
    fn test_numbers_compare_across_variants() {
        assert_eq!(Value::Integer(2).compare(&Value::Float(2.5)).unwrap(), Ordering::Less);
        assert_eq!(Value::Integer(3), Value::Float(3.0));
        assert_ne!(Value::Integer(3), Value::from("3"));
        assert!(Value::from("a").compare(&Value::Integer(1)).is_err());
    }

    #[test]
    fn test_integer_view() {
        assert_eq!(Value::from("42").as_i64(), Some(42));
        assert_eq!(Value::Float(4.0).as_i64(), Some(4));
        assert_eq!(Value::Float(4.5).as_i64(), None);
        assert_eq!(Value::Null.as_i64(), None);
    }

    #[test]
    fn test_empty_values() {
        assert!(Value::Null.is_empty());
        assert!(Value::from("").is_empty());
        assert!(!Value::Integer(0).is_empty());
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }

    #[test]
    fn test_from_json_scalars() {
        assert_eq!(Value::from_json(&serde_json::json!(5)).unwrap(), Value::Integer(5));
        assert_eq!(Value::from_json(&serde_json::json!("x")).unwrap(), Value::from("x"));
        assert!(Value::from_json(&serde_json::json!([1])).is_err());
    }
}
