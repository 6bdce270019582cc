//! Channel value type.

use serde::{Deserialize, Serialize};

/// The typed scalar a channel can hold. `Enum` carries the index into the
/// channel's declared value list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    // Index into the channel's declared value list; constructed by the
    // loader, never read directly from JSON (it would be ambiguous with Int).
    Enum(u32),
}

impl Default for Value {
    fn default() -> Self {
        Value::Float(0.0)
    }
}

impl Value {
    /// Numeric view used by formula arithmetic. Booleans coerce to 0/1, the
    /// way the source documents treat toggle channels in formulas.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Float(f) => f,
            Value::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Int(i) => i as f64,
            Value::Enum(e) => e as f64,
        }
    }

    pub fn as_bool(&self) -> bool {
        match *self {
            Value::Bool(b) => b,
            Value::Float(f) => f != 0.0,
            Value::Int(i) => i != 0,
            Value::Enum(e) => e != 0,
        }
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_json_forms() {
        assert_eq!(serde_json::from_str::<Value>("1.5").unwrap(), Value::Float(1.5));
        assert_eq!(serde_json::from_str::<Value>("true").unwrap(), Value::Bool(true));
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(Value::Bool(true).as_f64(), 1.0);
        assert_eq!(Value::Float(0.25).as_f64(), 0.25);
    }
}
