//! Statistics model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One stored sample row, as written by the ingestion path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsRow {
    pub resource_id: String,
    pub counter_name: String,
    pub timestamp: DateTime<Utc>,
    pub unit: String,
    /// Granularity in seconds.
    pub period: u32,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Duration of the matching samples; `period` when absent.
    pub duration: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub sum: Option<f64>,
    pub count: Option<i64>,
    pub aggregate: Option<HashMap<String, f64>>,
}

/// Computed statistics based on a set of sample data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub resource_id: String,
    pub unit: String,
    /// Length of the time range covered by these stats, in seconds.
    pub period: u32,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Total time for the matching samples, in seconds.
    pub duration: f64,
    pub duration_start: DateTime<Utc>,
    pub duration_end: DateTime<Utc>,
    /// Fields the samples were grouped by.
    pub groupby: Option<HashMap<String, String>>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub sum: Option<f64>,
    pub count: Option<i64>,
    /// Name-value pairs for selectable aggregates.
    pub aggregate: Option<HashMap<String, f64>>,
}

/// A selectable aggregate, e.g. `cardinality/resource_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateSpec {
    pub func: String,
    pub param: Option<String>,
}

impl AggregateSpec {
    /// Key the aggregate is stored under.
    pub fn key(&self) -> String {
        match &self.param {
            Some(param) => format!("{}/{}", self.func, param),
            None => self.func.clone(),
        }
    }
}
