//! Scalar value vocabulary
//!
//! The value kinds a computation variable can hold when it is value-typed
//! rather than reference-typed, plus the collection tags the project store
//! dispatches on.

use serde_json::{json, Value as JsonValue};

/// Declared kind of a scalar variable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Boolean,
    Integral,
    Real,
    Complex,
    Text,
}

impl ValueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Boolean => "boolean",
            ValueKind::Integral => "integral",
            ValueKind::Real => "real",
            ValueKind::Complex => "complex",
            ValueKind::Text => "string",
        }
    }

    pub fn from_str(text: &str) -> Option<Self> {
        match text {
            "boolean" => Some(ValueKind::Boolean),
            "integral" => Some(ValueKind::Integral),
            "real" => Some(ValueKind::Real),
            "complex" => Some(ValueKind::Complex),
            "string" => Some(ValueKind::Text),
            _ => None,
        }
    }

    /// Preferred UI control for this kind.
    pub fn default_control_type(self) -> &'static str {
        match self {
            ValueKind::Boolean => "checkbox",
            ValueKind::Integral => "slider",
            ValueKind::Real | ValueKind::Complex | ValueKind::Text => "field",
        }
    }

    /// Default value assigned when a variable is retyped to this kind.
    pub fn default_value(self) -> Option<Value> {
        match self {
            ValueKind::Boolean => Some(Value::Boolean(true)),
            ValueKind::Integral => Some(Value::Integral(0)),
            ValueKind::Real => Some(Value::Real(0.0)),
            ValueKind::Complex => Some(Value::Complex(0.0, 0.0)),
            ValueKind::Text => None,
        }
    }
}

/// A scalar value. Complex values persist as a two-element array; everything
/// else persists as the matching JSON scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Integral(i64),
    Real(f64),
    Complex(f64, f64),
    Text(String),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Integral(_) => ValueKind::Integral,
            Value::Real(_) => ValueKind::Real,
            Value::Complex(..) => ValueKind::Complex,
            Value::Text(_) => ValueKind::Text,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Boolean(value) => json!(value),
            Value::Integral(value) => json!(value),
            Value::Real(value) => json!(value),
            Value::Complex(re, im) => json!([re, im]),
            Value::Text(value) => json!(value),
        }
    }

    /// Read a value of a declared kind from its persisted representation.
    pub fn from_json(kind: ValueKind, raw: &JsonValue) -> Option<Self> {
        match kind {
            ValueKind::Boolean => raw.as_bool().map(Value::Boolean),
            ValueKind::Integral => raw.as_i64().map(Value::Integral),
            ValueKind::Real => raw.as_f64().map(Value::Real),
            ValueKind::Complex => {
                let parts = raw.as_array()?;
                let re = parts.first()?.as_f64()?;
                let im = parts.get(1)?.as_f64()?;
                Some(Value::Complex(re, im))
            }
            ValueKind::Text => raw.as_str().map(|text| Value::Text(text.to_string())),
        }
    }

    /// Best-effort read without a declared kind; used for untyped property
    /// payloads (graphic fields and similar).
    pub fn from_json_lossy(raw: &JsonValue) -> Option<Self> {
        match raw {
            JsonValue::Bool(value) => Some(Value::Boolean(*value)),
            JsonValue::Number(number) => number
                .as_i64()
                .map(Value::Integral)
                .or_else(|| number.as_f64().map(Value::Real)),
            JsonValue::String(text) => Some(Value::Text(text.clone())),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integral(value) => Some(*value as f64),
            Value::Real(value) => Some(*value),
            _ => None,
        }
    }
}

/// Top-level collections of the project store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    DataItems,
    DisplayItems,
    DataStructures,
    Computations,
    Connections,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::DataItems => "data_items",
            Collection::DisplayItems => "display_items",
            Collection::DataStructures => "data_structures",
            Collection::Computations => "computations",
            Collection::Connections => "connections",
        }
    }
}
