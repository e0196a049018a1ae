//! Ordering and filtering for remote collections.
//!
//! Values compare the way the remote backend orders them: null, then
//! booleans, then numbers, then strings, then objects. Ties break on the key.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "by", content = "field", rename_all = "camelCase")]
pub enum OrderBy {
    Key,
    Child(String),
}

/// Bounds applied to a collection before it is delivered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equal_to: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_to_last: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_by_child(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy::Child(field.into()));
        self
    }

    pub fn order_by_key(mut self) -> Self {
        self.order_by = Some(OrderBy::Key);
        self
    }

    pub fn start_at(mut self, value: impl Into<Value>) -> Self {
        self.start_at = Some(value.into());
        self
    }

    pub fn equal_to(mut self, value: impl Into<Value>) -> Self {
        self.equal_to = Some(value.into());
        self
    }

    pub fn limit_to_last(mut self, n: usize) -> Self {
        self.limit_to_last = Some(n);
        self
    }

    /// True when the query selects every child unchanged.
    pub fn is_unbounded(&self) -> bool {
        self.start_at.is_none() && self.equal_to.is_none() && self.limit_to_last.is_none()
    }

    fn sort_value(&self, key: &str, value: &Value) -> Value {
        match &self.order_by {
            Some(OrderBy::Child(field)) => value.get(field).cloned().unwrap_or(Value::Null),
            Some(OrderBy::Key) | None => Value::String(key.to_string()),
        }
    }

    /// Children of a collection node that satisfy the query.
    pub fn apply(&self, children: &Map<String, Value>) -> Map<String, Value> {
        let mut selected: Vec<(Value, &String, &Value)> = children
            .iter()
            .map(|(key, value)| (self.sort_value(key, value), key, value))
            .filter(|(sort, _, _)| {
                let after_start = self
                    .start_at
                    .as_ref()
                    .map_or(true, |start| compare_values(sort, start) != Ordering::Less);
                let equal = self
                    .equal_to
                    .as_ref()
                    .map_or(true, |target| compare_values(sort, target) == Ordering::Equal);
                after_start && equal
            })
            .collect();

        selected.sort_by(|a, b| compare_values(&a.0, &b.0).then_with(|| a.1.cmp(b.1)));

        if let Some(limit) = self.limit_to_last {
            let skip = selected.len().saturating_sub(limit);
            selected.drain(..skip);
        }

        selected
            .into_iter()
            .map(|(_, key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) | Value::Object(_) => 4,
    }
}

/// Total order over JSON values used by ordered queries.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
