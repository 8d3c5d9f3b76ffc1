//! Entity metadata: a typed key-value payload stored next to each vector.
use std::collections::BTreeMap;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::utils::errors::SearchError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(String),
    ListBool(Vec<bool>),
    ListInt(Vec<i64>),
    ListFloat(Vec<OrderedFloat<f64>>),
    ListStr(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(pub BTreeMap<String, MetadataValue>);

impl Metadata {
    pub fn set(&mut self, key: &str, value: MetadataValue) {
        self.0.insert(key.to_string(), value);
    }

    pub fn with(mut self, key: &str, value: MetadataValue) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn compare_field(
        &self,
        field: &str,
        op: ComparisonOp,
        other: &MetadataValue,
    ) -> Result<bool, SearchError> {
        match self.get(field) {
            Some(value) => value.compare_scalar(op, other).ok_or_else(|| {
                SearchError::validation(format!("type mismatch for metadata field: {field}"))
            }),
            None => Err(SearchError::validation(format!(
                "missing metadata field: {field}"
            ))),
        }
    }

    /// True when the list stored under `field` contains `needle`.
    pub fn list_contains(&self, field: &str, needle: &MetadataValue) -> bool {
        self.get(field)
            .and_then(|value| value.contains(needle))
            .unwrap_or(false)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl ComparisonOp {
    fn apply<T: PartialOrd>(self, a: &T, b: &T) -> bool {
        match self {
            ComparisonOp::Eq => a == b,
            ComparisonOp::Neq => a != b,
            ComparisonOp::Lt => a < b,
            ComparisonOp::Lte => a <= b,
            ComparisonOp::Gt => a > b,
            ComparisonOp::Gte => a >= b,
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Neq => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::Lte => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Gte => ">=",
        }
    }
}

impl MetadataValue {
    /// Compares two scalars of the same type. Ints and floats compare
    /// numerically with each other; any other type pairing yields `None`.
    pub fn compare_scalar(&self, op: ComparisonOp, other: &MetadataValue) -> Option<bool> {
        use MetadataValue::*;

        match (self, other) {
            (Int(a), Int(b)) => Some(op.apply(a, b)),
            (Float(a), Float(b)) => Some(op.apply(a, b)),
            (Int(a), Float(b)) => Some(op.apply(&OrderedFloat(*a as f64), b)),
            (Float(a), Int(b)) => Some(op.apply(a, &OrderedFloat(*b as f64))),
            (Str(a), Str(b)) => Some(op.apply(a, b)),
            (Bool(a), Bool(b)) => match op {
                ComparisonOp::Eq | ComparisonOp::Neq => Some(op.apply(a, b)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Equality as stored JSON sees it: numbers are equal when their values
    /// are, whether written as ints or floats.
    pub fn same_value(&self, other: &MetadataValue) -> bool {
        use MetadataValue::*;

        match (self, other) {
            (Int(a), Float(b)) | (Float(b), Int(a)) => int_eq_float(*a, *b),
            (ListInt(a), ListFloat(b)) | (ListFloat(b), ListInt(a)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| int_eq_float(*x, *y))
            }
            _ => self == other,
        }
    }

    pub fn contains(&self, needle: &MetadataValue) -> Option<bool> {
        use MetadataValue::*;

        match (self, needle) {
            (ListInt(vec), Int(x)) => Some(vec.contains(x)),
            (ListFloat(vec), Float(x)) => Some(vec.contains(x)),
            (ListInt(vec), Float(x)) => Some(vec.iter().any(|i| int_eq_float(*i, *x))),
            (ListFloat(vec), Int(x)) => Some(vec.iter().any(|f| int_eq_float(*x, *f))),
            (ListStr(vec), Str(x)) => Some(vec.contains(x)),
            (ListBool(vec), Bool(x)) => Some(vec.contains(x)),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            MetadataValue::Int(_)
                | MetadataValue::Float(_)
                | MetadataValue::Str(_)
                | MetadataValue::Bool(_)
        )
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn int_eq_float(a: i64, b: OrderedFloat<f64>) -> bool {
    a as f64 == b.into_inner()
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Str(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Str(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(OrderedFloat(value))
    }
}
