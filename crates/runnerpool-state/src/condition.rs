//! Condition and update expressions for single-item writes.
//!
//! A [`Condition`] is evaluated against the current stored item (or `None`
//! when the key is absent) inside the write transaction that would apply
//! the change.

use chrono::{DateTime, Utc};
use serde_json::Value;

use runnerpool_core::parse_timestamp;

/// Predicate over one stored item.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// The item exists.
    Exists,
    /// The key is absent.
    NotExists,
    Equals { attr: String, value: Value },
    In { attr: String, values: Vec<Value> },
    /// The attribute is present and not an empty string.
    NotEmpty { attr: String },
    /// The attribute is a timestamp strictly later than `at`.
    TimeAfter { attr: String, at: DateTime<Utc> },
    /// The attribute is a timestamp strictly earlier than `at`.
    TimeBefore { attr: String, at: DateTime<Utc> },
    All(Vec<Condition>),
}

impl Condition {
    /// `attr` equals `value`.
    pub fn equals(attr: &str, value: impl Into<Value>) -> Self {
        Condition::Equals {
            attr: attr.to_string(),
            value: value.into(),
        }
    }

    /// `attr` equals one of `values`.
    pub fn is_in<V: Into<Value>>(attr: &str, values: impl IntoIterator<Item = V>) -> Self {
        Condition::In {
            attr: attr.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `attr` is present and non-empty.
    pub fn not_empty(attr: &str) -> Self {
        Condition::NotEmpty {
            attr: attr.to_string(),
        }
    }

    /// `attr` is a timestamp later than `at`.
    pub fn time_after(attr: &str, at: DateTime<Utc>) -> Self {
        Condition::TimeAfter {
            attr: attr.to_string(),
            at,
        }
    }

    /// `attr` is a timestamp earlier than `at`.
    pub fn time_before(attr: &str, at: DateTime<Utc>) -> Self {
        Condition::TimeBefore {
            attr: attr.to_string(),
            at,
        }
    }

    /// Every condition holds. An empty list always holds.
    pub fn all(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Condition::All(conditions.into_iter().collect())
    }

    /// Evaluate against the current item. Comparisons on an absent item are
    /// false; time comparisons on empty or malformed timestamps are false.
    pub fn evaluate(&self, item: Option<&Value>) -> bool {
        match self {
            Condition::Exists => item.is_some(),
            Condition::NotExists => item.is_none(),
            Condition::Equals { attr, value } => field(item, attr) == Some(value),
            Condition::In { attr, values } => {
                field(item, attr).is_some_and(|current| values.contains(current))
            }
            Condition::NotEmpty { attr } => match field(item, attr) {
                Some(Value::String(s)) => !s.is_empty(),
                Some(Value::Null) | None => false,
                Some(_) => true,
            },
            Condition::TimeAfter { attr, at } => timestamp(item, attr).is_some_and(|t| t > *at),
            Condition::TimeBefore { attr, at } => timestamp(item, attr).is_some_and(|t| t < *at),
            Condition::All(conditions) => conditions.iter().all(|c| c.evaluate(item)),
        }
    }
}

fn field<'a>(item: Option<&'a Value>, attr: &str) -> Option<&'a Value> {
    item.and_then(|v| v.get(attr))
}

fn timestamp(item: Option<&Value>, attr: &str) -> Option<DateTime<Utc>> {
    field(item, attr)
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
}

/// One `SET attr = value` clause of an update.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub attr: String,
    pub value: Value,
}

impl Assignment {
    /// Set `attr` to `value`.
    pub fn set(attr: &str, value: impl Into<Value>) -> Self {
        Self {
            attr: attr.to_string(),
            value: value.into(),
        }
    }
}
