//! Instance context values.
//!
//! Context is a small closed set of value kinds so it can be moved across
//! process and language boundaries without loss.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Key-ordered context map attached to an instance.
pub type Context = BTreeMap<String, ContextValue>;

/// A single context value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<ContextValue>),
    Map(BTreeMap<String, ContextValue>),
}

impl ContextValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ContextValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ContextValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ContextValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ContextValue::Int(n) => Some(*n as f64),
            ContextValue::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ContextValue::Null)
    }

    /// Nested lookup by dotted path, e.g. `customer.address.city`.
    pub fn pointer(&self, path: &str) -> Option<&ContextValue> {
        path.split('.').try_fold(self, |current, part| match current {
            ContextValue::Map(map) => map.get(part),
            _ => None,
        })
    }
}

impl From<bool> for ContextValue {
    fn from(v: bool) -> Self {
        ContextValue::Bool(v)
    }
}

impl From<i32> for ContextValue {
    fn from(v: i32) -> Self {
        ContextValue::Int(v.into())
    }
}

impl From<i64> for ContextValue {
    fn from(v: i64) -> Self {
        ContextValue::Int(v)
    }
}

impl From<u32> for ContextValue {
    fn from(v: u32) -> Self {
        ContextValue::Int(v.into())
    }
}

/// NaN and infinities map to `Null`, the value they take after a JSON round trip.
impl From<f64> for ContextValue {
    fn from(v: f64) -> Self {
        if v.is_finite() {
            ContextValue::Float(v)
        } else {
            ContextValue::Null
        }
    }
}

impl From<&str> for ContextValue {
    fn from(v: &str) -> Self {
        ContextValue::String(v.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(v: String) -> Self {
        ContextValue::String(v)
    }
}

impl<T: Into<ContextValue>> From<Vec<T>> for ContextValue {
    fn from(v: Vec<T>) -> Self {
        ContextValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, ContextValue>> for ContextValue {
    fn from(v: BTreeMap<String, ContextValue>) -> Self {
        ContextValue::Map(v)
    }
}

impl<T: Into<ContextValue>> From<Option<T>> for ContextValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ContextValue::Null)
    }
}

impl From<Value> for ContextValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => ContextValue::Null,
            Value::Bool(b) => ContextValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ContextValue::Int(i),
                // u64 beyond i64::MAX and fractional numbers land here
                None => n.as_f64().map(ContextValue::from).unwrap_or_default(),
            },
            Value::String(s) => ContextValue::String(s),
            Value::Array(items) => {
                ContextValue::List(items.into_iter().map(ContextValue::from).collect())
            }
            Value::Object(map) => ContextValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, ContextValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<ContextValue> for Value {
    fn from(v: ContextValue) -> Self {
        match v {
            ContextValue::Null => Value::Null,
            ContextValue::Bool(b) => Value::Bool(b),
            ContextValue::Int(i) => Value::from(i),
            // NaN and infinities have no JSON form and become null
            ContextValue::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ContextValue::String(s) => Value::String(s),
            ContextValue::List(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            ContextValue::Map(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}
