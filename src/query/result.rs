use serde::de::DeserializeOwned;
use serde_json::Value;

use super::path::{FieldPath, Segment, Shape};

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("nothing found at {path}")]
    NotFound { path: String },

    #[error("expected {expected} at {path}, found {found}")]
    Mismatch {
        path: String,
        expected: &'static str,
        found: String,
    },

    #[error("failed to decode result")]
    Decode(#[source] serde_json::Error),
}

/// A typed value pulled out of a result document.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    String(String),
    Number(f64),
    Bool(bool),
    Strings(Vec<String>),
    Numbers(Vec<f64>),
    Any(Value),
}

impl Extracted {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Extracted::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Extracted::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Extracted::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn into_strings(self) -> Option<Vec<String>> {
        match self {
            Extracted::Strings(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_numbers(self) -> Option<Vec<f64>> {
        match self {
            Extracted::Numbers(v) => Some(v),
            _ => None,
        }
    }

    /// The value as JSON, whatever its shape.
    pub fn into_value(self) -> Value {
        match self {
            Extracted::String(s) => Value::String(s),
            Extracted::Number(n) => serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Extracted::Bool(b) => Value::Bool(b),
            Extracted::Strings(v) => Value::from(v),
            Extracted::Numbers(v) => Value::from(v),
            Extracted::Any(v) => v,
        }
    }
}

/// The decoded JSON body of a successful API response.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    value: Value,
}

impl QueryResult {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    pub fn from_slice(body: &[u8]) -> Result<Self, ExtractError> {
        serde_json::from_slice(body)
            .map(Self::new)
            .map_err(ExtractError::Decode)
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// Decode the whole document into a caller-defined type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ExtractError> {
        T::deserialize(&self.value).map_err(ExtractError::Decode)
    }

    /// Resolve `path` and check the result against its declared shape.
    ///
    /// A path without wildcards or slices must find exactly one value. A path
    /// that fans out may find none, which yields an empty list.
    pub fn extract(&self, path: &FieldPath) -> Result<Extracted, ExtractError> {
        let mut matches = vec![&self.value];
        for segment in path.segments() {
            matches = matches
                .into_iter()
                .flat_map(|value| step(value, segment))
                .collect();
        }

        if !path.is_multi() {
            let value = matches.first().copied().ok_or_else(|| ExtractError::NotFound {
                path: path.expr().to_string(),
            })?;
            return shape_single(path, value);
        }

        if path.shape().is_list() || path.shape() == Shape::Any {
            return shape_list(path, &matches);
        }

        match matches.as_slice() {
            [value] => shape_single(path, value),
            [] => Err(ExtractError::NotFound {
                path: path.expr().to_string(),
            }),
            many => Err(mismatch(path, format!("{} values", many.len()))),
        }
    }
}

fn step<'a>(value: &'a Value, segment: &Segment) -> Vec<&'a Value> {
    match (segment, value) {
        (Segment::Field(name), Value::Object(map)) => map.get(name).into_iter().collect(),
        (Segment::Index(index), Value::Array(items)) => resolve_index(*index, items.len())
            .and_then(|i| items.get(i))
            .into_iter()
            .collect(),
        (Segment::Wildcard, Value::Array(items)) => items.iter().collect(),
        (Segment::Wildcard, Value::Object(map)) => map.values().collect(),
        (Segment::Slice(start, end), Value::Array(items)) => {
            let (start, end) = slice_bounds(*start, *end, items.len());
            items[start..end].iter().collect()
        }
        _ => Vec::new(),
    }
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { len + index } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

// Python-style: negative bounds count from the end, out of range bounds clamp,
// and an end before the start selects nothing.
fn slice_bounds(start: Option<i64>, end: Option<i64>, len: usize) -> (usize, usize) {
    let len_i = len as i64;
    let clamp = |bound: i64| -> usize {
        let bound = if bound < 0 { len_i + bound } else { bound };
        bound.clamp(0, len_i) as usize
    };
    let start = start.map_or(0, clamp);
    let end = end.map_or(len, clamp);
    (start, end.max(start))
}

fn shape_single(path: &FieldPath, value: &Value) -> Result<Extracted, ExtractError> {
    match (path.shape(), value) {
        (Shape::Any, v) => Ok(Extracted::Any(v.clone())),
        (Shape::String, Value::String(s)) => Ok(Extracted::String(s.clone())),
        (Shape::Number, Value::Number(n)) => n
            .as_f64()
            .map(Extracted::Number)
            .ok_or_else(|| mismatch(path, n.to_string())),
        (Shape::Bool, Value::Bool(b)) => Ok(Extracted::Bool(*b)),
        (Shape::Strings | Shape::Numbers, Value::Array(items)) => {
            shape_list(path, &items.iter().collect::<Vec<_>>())
        }
        (_, other) => Err(mismatch(path, json_type(other).to_string())),
    }
}

fn shape_list(path: &FieldPath, values: &[&Value]) -> Result<Extracted, ExtractError> {
    match path.shape() {
        Shape::Strings => values
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.clone()),
                other => Err(mismatch(path, format!("list containing {}", json_type(other)))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Extracted::Strings),
        Shape::Numbers => values
            .iter()
            .map(|v| {
                v.as_f64().ok_or_else(|| {
                    mismatch(path, format!("list containing {}", json_type(v)))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Extracted::Numbers),
        _ => Ok(Extracted::Any(Value::Array(
            values.iter().map(|v| (*v).clone()).collect(),
        ))),
    }
}

fn mismatch(path: &FieldPath, found: String) -> ExtractError {
    ExtractError::Mismatch {
        path: path.expr().to_string(),
        expected: path.shape().name(),
        found,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
