//! Record shapes exchanged with the data store.
//!
//! Rows come back as loose JSON objects, the way a PostgREST backend hands
//! them out. The helpers here read the few fields the revenue statistics
//! care about without trusting their types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{Result, StorefrontError};

/// A single row as returned by the store.
pub type Record = Map<String, Value>;

/// The collections the storefront reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Payments,
    Orders,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Payments, Collection::Orders];

    /// Table / resource name in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payments => "payments",
            Self::Orders => "orders",
        }
    }

    /// Columns a filter may reference and a query returns.
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            Self::Payments => &["id", "amount", "status"],
            Self::Orders => &["id", "status"],
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields().contains(&field)
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment states the revenue reads select on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Paid,
    Refund,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Paid => "paid",
            Self::Refund => "refund",
        }
    }
}

/// Order states that count as fulfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Delivered,
    Completed,
}

impl OrderStatus {
    /// Every state counted towards average order value.
    pub const FULFILLED: [OrderStatus; 2] = [Self::Delivered, Self::Completed];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Completed => "completed",
        }
    }
}

/// Row filter on a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `field = value`
    Eq { field: String, value: String },
    /// `field = v1 OR field = v2 ...`
    AnyOf { field: String, values: Vec<String> },
}

impl Filter {
    pub fn equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn any_of<I, S>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AnyOf {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Self::Eq { field, .. } | Self::AnyOf { field, .. } => field,
        }
    }

    /// Accepted values, in order.
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::Eq { value, .. } => vec![value.as_str()],
            Self::AnyOf { values, .. } => values.iter().map(String::as_str).collect(),
        }
    }

    /// Reject filters the store could not evaluate against `collection`.
    pub fn validate(&self, collection: Collection) -> Result<()> {
        if !collection.has_field(self.field()) {
            return Err(StorefrontError::InvalidFilter(format!(
                "{collection} has no field '{}'",
                self.field()
            )));
        }
        if let Self::AnyOf { values, .. } = self {
            if values.is_empty() {
                return Err(StorefrontError::InvalidFilter(format!(
                    "empty OR filter on {collection}.{}",
                    self.field()
                )));
            }
        }
        Ok(())
    }

    /// Evaluate the filter against an in-memory record.
    pub fn matches(&self, record: &Record) -> bool {
        let Some(actual) = record.get(self.field()).and_then(value_as_text) else {
            return false;
        };
        self.values().iter().any(|v| *v == actual)
    }
}

/// One read against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub collection: Collection,
    pub filter: Filter,
}

impl Query {
    pub fn new(collection: Collection, filter: Filter) -> Self {
        Self { collection, filter }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Emitted whenever a row of a subscribed collection is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub collection: Collection,
    pub kind: ChangeKind,
    pub at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn now(collection: Collection, kind: ChangeKind) -> Self {
        Self {
            collection,
            kind,
            at: Utc::now(),
        }
    }
}

/// Read a monetary `amount` leniently: numbers as-is, numeric strings
/// parsed, anything else (missing, null, garbage, non-finite) is zero.
pub fn coerce_amount(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                0.0
            } else {
                s.parse::<f64>().unwrap_or(0.0)
            }
        }
        _ => 0.0,
    };
    if parsed.is_finite() {
        parsed
    } else {
        0.0
    }
}

/// Sum the `amount` field across `records`.
pub fn sum_amounts(records: &[Record]) -> f64 {
    records
        .iter()
        .map(|r| coerce_amount(r.get("amount")))
        .sum()
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
