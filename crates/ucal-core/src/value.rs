//! Scalar metadata values with a total order.

use std::cmp::Ordering;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A defined scalar value read from a run's metadata document.
///
/// Only scalars participate in grouping and range queries. `null`, arrays and
/// objects are treated as undefined and never become a [`MetaValue`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer value (scan ids, counters).
    Int(i64),
    /// Floating point value (timestamps, sensor readings).
    Float(f64),
    /// String value (uids, sample names, ISO dates).
    Str(String),
}

impl MetaValue {
    /// Converts a JSON value into a scalar, returning `None` for undefined shapes.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(flag) => Some(MetaValue::Bool(*flag)),
            Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    Some(MetaValue::Int(int))
                } else {
                    number.as_f64().map(MetaValue::Float)
                }
            }
            Value::String(text) => Some(MetaValue::Str(text.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Returns the string payload when the value is textual.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the numeric payload for integer and float values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Int(int) => Some(*int as f64),
            MetaValue::Float(float) => Some(*float),
            _ => None,
        }
    }

    /// Returns the integer payload when the value is integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetaValue::Int(int) => Some(*int),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            MetaValue::Bool(_) => 0,
            MetaValue::Int(_) | MetaValue::Float(_) => 1,
            MetaValue::Str(_) => 2,
        }
    }

    /// Compares two values of the same kind for range queries.
    ///
    /// Numbers compare by value, so `Int(10)` and `Float(10.0)` are equal here
    /// even though [`Ord`] separates them for sorting. Returns `None` when the
    /// kinds differ (a string bound never matches a number).
    pub fn partial_compare(&self, other: &Self) -> Option<Ordering> {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => Some(a.total_cmp(&b)),
            _ if self.rank() != other.rank() => None,
            _ => Some(self.cmp(other)),
        }
    }
}

impl Ord for MetaValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (MetaValue::Bool(a), MetaValue::Bool(b)) => a.cmp(b),
            (MetaValue::Int(a), MetaValue::Int(b)) => a.cmp(b),
            (MetaValue::Str(a), MetaValue::Str(b)) => a.cmp(b),
            (MetaValue::Int(a), MetaValue::Float(b)) => {
                (*a as f64).total_cmp(b).then(Ordering::Less)
            }
            (MetaValue::Float(a), MetaValue::Int(b)) => {
                a.total_cmp(&(*b as f64)).then(Ordering::Greater)
            }
            (MetaValue::Float(a), MetaValue::Float(b)) => a.total_cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for MetaValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for MetaValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MetaValue {}

impl Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Bool(flag) => write!(f, "{flag}"),
            MetaValue::Int(int) => write!(f, "{int}"),
            MetaValue::Float(float) => write!(f, "{float}"),
            MetaValue::Str(text) => write!(f, "{text}"),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Str(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::Str(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        MetaValue::Int(value)
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        MetaValue::Float(value)
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        MetaValue::Bool(value)
    }
}
