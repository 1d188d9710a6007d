use serde::{Deserialize, Serialize};

/// Literal scalar values (spec §3, `Lit(value)`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    Date(String),
    Time(String),
    Timestamp(String),
    /// A compound interval, e.g. `3 days`.
    Interval { n: i64, unit: String },
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Null => write!(f, "null"),
            Literal::Integer(i) => write!(f, "{i}"),
            Literal::Float(v) => write!(f, "{v}"),
            Literal::Boolean(b) => write!(f, "{b}"),
            Literal::String(s) => write!(f, "{s:?}"),
            Literal::Date(s) | Literal::Time(s) | Literal::Timestamp(s) => write!(f, "@{s}"),
            Literal::Interval { n, unit } => write!(f, "{n}{unit}"),
        }
    }
}

// `PartialEq` on `f64` makes this not `Eq`, but we need structural equality
// for aggregate deduplication (spec §4.3 "aggregates... deduplicated") and
// Append's column-name intersection only ever compares labels, not literal
// values, so a float-free `Eq` isn't required here.
