//! The dynamic value model shared by the query evaluator and codec readers.
//!
//! [`Value`] is a tagged union over the JSON-like kinds that flow through
//! message parts, extended with `Bytes` (raw payloads are first-class) and two
//! sentinels: [`Value::Delete`] requests removal of the field or element being
//! assigned, and [`Value::Nothing`] requests that the prior value be kept.
//!
//! Numbers retain their representation kind ([`Number`]) so that integer
//! arithmetic stays integral until an operation forces a float. Equality is
//! heterogeneous-safe: values of different kinds are simply unequal, and
//! numbers compare by numeric value regardless of representation.

use std::collections::HashMap;
use std::fmt;

/// Internal representation kind of a numeric [`Value`].
#[derive(Clone, Copy, Debug)]
pub enum Number {
    Int(i64),
    Uint(u64),
    Float(f64),
}

impl Number {
    /// Whether this number is represented as a float.
    pub fn is_float(&self) -> bool {
        matches!(self, Number::Float(_))
    }

    /// The value as a 64-bit signed integer, truncating floats.
    pub fn as_i64(&self) -> i64 {
        match *self {
            Number::Int(i) => i,
            Number::Uint(u) => u as i64,
            Number::Float(f) => f as i64,
        }
    }

    /// The value as a 64-bit float.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Number::Int(i) => i as f64,
            Number::Uint(u) => u as f64,
            Number::Float(f) => f,
        }
    }
}

// Numbers compare by numeric value, not representation: 15, 15u and 15.0 are
// all equal.
impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        use Number::*;
        match (*self, *other) {
            (Int(a), Int(b)) => a == b,
            (Uint(a), Uint(b)) => a == b,
            (Int(a), Uint(b)) | (Uint(b), Int(a)) => a >= 0 && a as u64 == b,
            (Float(a), Float(b)) => a == b,
            (Float(f), Int(i)) | (Int(i), Float(f)) => f == i as f64,
            (Float(f), Uint(u)) | (Uint(u), Float(f)) => f == u as f64,
        }
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        use Number::*;
        match (*self, *other) {
            (Int(a), Int(b)) => a.partial_cmp(&b),
            (Uint(a), Uint(b)) => a.partial_cmp(&b),
            _ => self.as_f64().partial_cmp(&other.as_f64()),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Number::Int(i) => write!(f, "{i}"),
            Number::Uint(u) => write!(f, "{u}"),
            Number::Float(v) => write!(f, "{v}"),
        }
    }
}

/// A dynamic value drawn from or destined for a message part.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
    /// Sentinel: remove the field or element this value is assigned to.
    Delete,
    /// Sentinel: keep whatever value was previously present.
    Nothing,
}

/// The observable kind of a [`Value`], as reported to users in diagnostics
/// and by the `type()` method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Bytes,
    Number,
    Bool,
    Array,
    Object,
    Null,
    Delete,
    Nothing,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::String => "string",
            ValueKind::Bytes => "bytes",
            ValueKind::Number => "number",
            ValueKind::Bool => "bool",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
            ValueKind::Null => "null",
            ValueKind::Delete => "delete",
            ValueKind::Nothing => "nothing",
        };
        f.write_str(name)
    }
}

/// A value did not have one of the kinds an operation accepts.
#[derive(Debug, Clone)]
pub struct TypeError {
    pub actual: ValueKind,
    pub expected: Vec<ValueKind>,
}

impl TypeError {
    pub fn new(actual: &Value, expected: &[ValueKind]) -> Self {
        Self {
            actual: actual.kind(),
            expected: expected.to_vec(),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.expected.is_empty() {
            return write!(f, "unexpected {} value", self.actual);
        }
        write!(f, "expected ")?;
        for (i, k) in self.expected.iter().enumerate() {
            if i > 0 {
                write!(f, " or ")?;
            }
            write!(f, "{k}")?;
        }
        write!(f, " value, found {}", self.actual)
    }
}

impl std::error::Error for TypeError {}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
            Value::Delete => ValueKind::Delete,
            Value::Nothing => ValueKind::Nothing,
        }
    }

    /// Strict boolean access, used by logical operators.
    pub fn as_bool(&self) -> Result<bool, TypeError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(TypeError::new(other, &[ValueKind::Bool])),
        }
    }

    /// Numeric access without parsing: only number kinds qualify.
    pub fn as_number(&self) -> Result<Number, TypeError> {
        match self {
            Value::Number(n) => Ok(*n),
            other => Err(TypeError::new(other, &[ValueKind::Number])),
        }
    }

    pub fn as_f64(&self) -> Result<f64, TypeError> {
        self.as_number().map(|n| n.as_f64())
    }

    /// Lenient boolean coercion: non-zero numbers are true, and the usual
    /// spellings of true/false are accepted for strings.
    pub fn coerce_bool(&self) -> Result<bool, TypeError> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Number(n) => Ok(n.as_f64() != 0.0),
            Value::String(s) => match s.as_str() {
                "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
                "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
                _ => Err(TypeError::new(self, &[ValueKind::Bool])),
            },
            other => Err(TypeError::new(other, &[ValueKind::Bool])),
        }
    }

    /// Lenient numeric coercion: numbers pass through, strings are parsed as
    /// an integer first and a float second.
    pub fn coerce_number(&self) -> Result<Number, TypeError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::String(s) => {
                if let Ok(i) = s.parse::<i64>() {
                    return Ok(Number::Int(i));
                }
                match s.parse::<f64>() {
                    Ok(f) => Ok(Number::Float(f)),
                    Err(_) => Err(TypeError::new(self, &[ValueKind::Number])),
                }
            }
            other => Err(TypeError::new(other, &[ValueKind::Number])),
        }
    }

    /// Render the value as a string. Structures render as compact JSON.
    pub fn coerce_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null | Value::Delete | Value::Nothing => String::new(),
            other => other.to_json().to_string(),
        }
    }

    pub fn coerce_bytes(&self) -> Vec<u8> {
        match self {
            Value::Bytes(b) => b.clone(),
            other => other.coerce_string().into_bytes(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert a parsed JSON document into a [`Value`]. Integer kind is
    /// preserved: numbers representable as `i64` stay signed, larger
    /// non-negative integers become unsigned, everything else is a float.
    pub fn from_json(v: serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Number(Number::Int(i))
                } else if let Some(u) = n.as_u64() {
                    Value::Number(Number::Uint(u))
                } else {
                    Value::Number(Number::Float(n.as_f64().unwrap_or(f64::NAN)))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to a JSON document. Bytes render as lossy UTF-8 strings, the
    /// sentinels as null.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::Delete | Value::Nothing => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(Number::Int(i)) => serde_json::Value::Number((*i).into()),
            Value::Number(Number::Uint(u)) => serde_json::Value::Number((*u).into()),
            Value::Number(Number::Float(f)) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::String(String::from_utf8_lossy(b).into_owned()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Number(Number::Int(i))
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Value::Number(Number::Uint(u))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Number(Number::Float(f))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_compare_across_representations() {
        assert_eq!(Number::Int(15), Number::Uint(15));
        assert_eq!(Number::Int(15), Number::Float(15.0));
        assert_ne!(Number::Int(-1), Number::Uint(u64::MAX));
        assert!(Number::Uint(15) >= Number::Int(15));
        assert!(Number::Float(15.0) <= Number::Uint(15));
    }

    #[test]
    fn heterogeneous_equality_is_safe() {
        assert_ne!(Value::from("foo"), Value::from(5i64));
        assert_ne!(Value::Null, Value::from("foo"));
        assert_eq!(Value::Null, Value::Null);
        assert_eq!(Value::from(5i64), Value::from(5.0));
    }

    #[test]
    fn json_round_trip_preserves_integer_kind() {
        let v = Value::from_json(serde_json::json!({"a": 12, "b": 3.5}));
        let Value::Object(fields) = &v else {
            panic!("expected object")
        };
        assert!(matches!(fields["a"], Value::Number(Number::Int(12))));
        assert!(matches!(fields["b"], Value::Number(Number::Float(_))));
    }

    #[test]
    fn string_coercion_parses_ints_before_floats() {
        assert!(matches!(
            Value::from("12").coerce_number().unwrap(),
            Number::Int(12)
        ));
        assert!(matches!(
            Value::from("12.5").coerce_number().unwrap(),
            Number::Float(_)
        ));
        assert!(Value::from("nope").coerce_number().is_err());
    }
}
