//! Period mapping: which metrics are sampled at which granularity.
//!
//! A mapping document looks like:
//!
//! ```json
//! {
//!   "period_colls": [60, 300, 3600],
//!   "60":   {"meter_type": ["cpu_util", "memory.usage"]},
//!   "300":  {},
//!   "3600": {"meter_type": ["instance", "volume"]}
//! }
//! ```
//!
//! Every granularity listed in `period_colls` must have its own key.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Granularity used when a metric is not listed in the mapping.
pub const DEFAULT_PERIOD: u32 = 60;

/// Directories searched for a mapping file given by name only.
pub const MAPPING_DIRS: &[&str] = &[".", "/etc/skynet", "/etc/ceilometer"];

/// Mapping load errors.
#[derive(Error, Debug)]
pub enum MappingError {
    #[error("mapping file {name} not found in {dirs:?}")]
    NotFound { name: String, dirs: Vec<String> },
    #[error("failed to read mapping file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid mapping JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("mapping has no period_colls list (got {0})")]
    MissingPeriodColls(String),
    #[error("period_colls entry {0} is not a positive integer")]
    InvalidPeriod(String),
    #[error("period {0} is listed in period_colls but has no entry in the mapping")]
    MissingPeriod(u32),
    #[error("invalid entry for period {period}: {reason}")]
    InvalidEntry { period: u32, reason: String },
}

/// One granularity's entry.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PeriodEntry {
    #[serde(default)]
    pub meter_type: Vec<String>,
    #[serde(default)]
    pub mult_topology: Option<Vec<u32>>,
    #[serde(default)]
    pub point_topology: Option<Vec<u32>>,
}

/// Parsed and validated period mapping. Immutable after load.
#[derive(Debug, Clone, Default)]
pub struct PeriodMapping {
    period_colls: Vec<u32>,
    entries: HashMap<u32, PeriodEntry>,
}

impl PeriodMapping {
    /// Load the mapping named by `mapping_file`.
    ///
    /// An existing path is used as is, otherwise the name is looked up in
    /// [`MAPPING_DIRS`].
    pub fn load(mapping_file: &str) -> Result<Self, MappingError> {
        let path = find_mapping_file(mapping_file, MAPPING_DIRS)?;
        tracing::debug!("Loading period mapping from {}", path.display());
        let data = std::fs::read_to_string(&path).map_err(|source| MappingError::Io {
            path: path.clone(),
            source,
        })?;
        let mapping = Self::from_json(&data)?;
        tracing::info!(
            "Loaded period mapping {} with periods {:?}",
            path.display(),
            mapping.period_colls
        );
        Ok(mapping)
    }

    /// Parse and validate a mapping document.
    pub fn from_json(data: &str) -> Result<Self, MappingError> {
        let doc: Value = serde_json::from_str(data)?;
        Self::from_value(&doc)
    }

    pub fn from_value(doc: &Value) -> Result<Self, MappingError> {
        let colls = match doc.get("period_colls") {
            Some(Value::Array(colls)) => colls,
            other => {
                let got = other.map_or_else(|| "nothing".to_string(), |v| v.to_string());
                return Err(MappingError::MissingPeriodColls(got));
            }
        };

        let mut period_colls = Vec::with_capacity(colls.len());
        for c in colls {
            let period = period_from_value(c).ok_or_else(|| MappingError::InvalidPeriod(c.to_string()))?;
            period_colls.push(period);
        }

        let mut entries = HashMap::with_capacity(period_colls.len());
        for &period in &period_colls {
            let raw = doc
                .get(period.to_string())
                .ok_or(MappingError::MissingPeriod(period))?;
            let entry = if raw.is_null() {
                PeriodEntry::default()
            } else {
                PeriodEntry::deserialize(raw).map_err(|e| MappingError::InvalidEntry {
                    period,
                    reason: e.to_string(),
                })?
            };
            entries.insert(period, entry);
        }

        Ok(Self {
            period_colls,
            entries,
        })
    }

    pub fn period_colls(&self) -> &[u32] {
        &self.period_colls
    }

    pub fn entry(&self, period: u32) -> Option<&PeriodEntry> {
        self.entries.get(&period)
    }

    /// First granularity, in `period_colls` order, that lists `metric`.
    pub fn lookup(&self, metric: &str) -> Option<u32> {
        self.period_colls.iter().copied().find(|period| {
            self.entries
                .get(period)
                .is_some_and(|e| e.meter_type.iter().any(|m| m == metric))
        })
    }

    /// Granularity for `metric`, or [`DEFAULT_PERIOD`] when unlisted.
    pub fn resolve_period(&self, metric: &str) -> u32 {
        self.lookup(metric).unwrap_or(DEFAULT_PERIOD)
    }
}

fn period_from_value(v: &Value) -> Option<u32> {
    let period = match v {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    u32::try_from(period).ok().filter(|p| *p > 0)
}

fn find_mapping_file(name: &str, dirs: &[&str]) -> Result<PathBuf, MappingError> {
    let direct = Path::new(name);
    if direct.exists() {
        return Ok(direct.to_path_buf());
    }

    dirs.iter()
        .map(|d| Path::new(d).join(name))
        .find(|p| p.exists())
        .ok_or_else(|| MappingError::NotFound {
            name: name.to_string(),
            dirs: dirs.iter().map(|d| d.to_string()).collect(),
        })
}
