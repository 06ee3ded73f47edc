//! Sample filters and the store-agnostic queries built from them.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Query construction errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueryError {
    #[error("missing required meter specifier")]
    MissingMeter,
}

/// One value or a set of values to match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    One(String),
    Many(Vec<String>),
}

impl Selector {
    /// The single value, or the first of a set.
    pub fn first(&self) -> Option<&str> {
        match self {
            Selector::One(v) => Some(v.as_str()),
            Selector::Many(vs) => vs.first().map(String::as_str),
        }
    }
}

impl From<&str> for Selector {
    fn from(v: &str) -> Self {
        Selector::One(v.to_string())
    }
}

impl From<String> for Selector {
    fn from(v: String) -> Self {
        Selector::One(v)
    }
}

impl From<Vec<String>> for Selector {
    fn from(vs: Vec<String>) -> Self {
        Selector::Many(vs)
    }
}

/// Comparison operator requested for a timestamp bound.
///
/// Only `Gt` changes the lower bound and only `Le` changes the upper bound;
/// anything else keeps the default (inclusive lower, exclusive upper).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    Gt,
    Ge,
    Lt,
    Le,
}

impl std::str::FromStr for RangeOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gt" => Ok(RangeOp::Gt),
            "ge" | "gte" => Ok(RangeOp::Ge),
            "lt" => Ok(RangeOp::Lt),
            "le" | "lte" => Ok(RangeOp::Le),
            other => Err(format!("unknown range operator {}", other)),
        }
    }
}

/// Query specification over stored samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleFilter {
    pub meter: Option<Selector>,
    pub resource: Option<Selector>,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub start_timestamp_op: Option<RangeOp>,
    pub end_timestamp_op: Option<RangeOp>,
}

impl SampleFilter {
    pub fn for_meter(meter: impl Into<Selector>) -> Self {
        Self {
            meter: Some(meter.into()),
            ..Default::default()
        }
    }

    pub fn resource(mut self, resource: impl Into<Selector>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_timestamp = Some(start);
        self.end_timestamp = Some(end);
        self
    }

    pub fn start_op(mut self, op: RangeOp) -> Self {
        self.start_timestamp_op = Some(op);
        self
    }

    pub fn end_op(mut self, op: RangeOp) -> Self {
        self.end_timestamp_op = Some(op);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowerBound {
    Inclusive(DateTime<Utc>),
    Exclusive(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpperBound {
    Inclusive(DateTime<Utc>),
    Exclusive(DateTime<Utc>),
}

/// Timestamp predicate; empty when neither bound is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimestampRange {
    pub lower: Option<LowerBound>,
    pub upper: Option<UpperBound>,
}

impl TimestampRange {
    pub fn is_empty(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }
}

/// Build the range for the given bounds and operators.
///
/// Defaults to an inclusive lower bound and an exclusive upper bound.
pub fn make_timestamp_range(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    start_op: Option<RangeOp>,
    end_op: Option<RangeOp>,
) -> TimestampRange {
    TimestampRange {
        lower: start.map(|t| match start_op {
            Some(RangeOp::Gt) => LowerBound::Exclusive(t),
            _ => LowerBound::Inclusive(t),
        }),
        upper: end.map(|t| match end_op {
            Some(RangeOp::Le) => UpperBound::Inclusive(t),
            _ => UpperBound::Exclusive(t),
        }),
    }
}

/// Predicates over the `counter_name`, `resource_id` and `timestamp` fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub counter_name: Option<Selector>,
    pub resource_id: Option<Selector>,
    pub timestamp: TimestampRange,
}

/// Build a query from `filter`.
///
/// With `require_meter`, a filter without a meter is rejected.
pub fn make_query_from_filter(filter: &SampleFilter, require_meter: bool) -> Result<Query, QueryError> {
    if filter.meter.is_none() && require_meter {
        return Err(QueryError::MissingMeter);
    }

    Ok(Query {
        counter_name: filter.meter.clone(),
        resource_id: filter.resource.clone(),
        timestamp: make_timestamp_range(
            filter.start_timestamp,
            filter.end_timestamp,
            filter.start_timestamp_op,
            filter.end_timestamp_op,
        ),
    })
}
