//! Declarative polling pipeline.
//!
//! A pipeline document groups pollers into sources sharing one interval:
//!
//! ```yaml
//! sources:
//!   - name: hosts
//!     interval: 60
//!     meters:
//!       - name: openstack.hosts.total
//!         method: create_host_total
//! ```
//!
//! Loading is all-or-nothing: any malformed source or poller fails the whole
//! document.

use crate::pollers::Method;

use serde_yaml::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directories searched for the pipeline file, in order.
pub const PIPELINE_DIRS: &[&str] = &[".", "../etc/", "/etc/skynet"];

/// Interval used when a source does not set one.
pub const DEFAULT_INTERVAL: u64 = 600;

/// Pipeline error types. Every variant names the offending fragment.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("pipeline file {name} not found in {dirs:?}")]
    FileNotFound { name: String, dirs: Vec<String> },
    #[error("failed to read pipeline file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid pipeline document: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("sources are required in {0}")]
    MissingSources(String),
    #[error("sources must be a list, got {0}")]
    InvalidSources(String),
    #[error("duplicated source name {name}")]
    DuplicateSource { name: String },
    #[error("source {source_name}: required field {field} not specified in {fragment}")]
    MissingField {
        source_name: String,
        field: &'static str,
        fragment: String,
    },
    #[error("source {source_name}: interval must be a positive integer, got {value}")]
    InvalidInterval { source_name: String, value: String },
    #[error("source {source_name}: duplicated poller name {poller}")]
    DuplicatePoller { source_name: String, poller: String },
    #[error("source {source_name}: poller {poller} uses unknown method {method}")]
    UnknownMethod {
        source_name: String,
        poller: String,
        method: String,
    },
}

/// One collectible metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Poller {
    pub name: String,
    pub method: Method,
}

impl Poller {
    fn from_value(source_name: &str, cfg: &Value) -> Result<Self, PipelineError> {
        let name = required_str(source_name, cfg, "name")?;
        let method_name = required_str(source_name, cfg, "method")?;
        let method = method_name
            .parse()
            .map_err(|_| PipelineError::UnknownMethod {
                source_name: source_name.to_string(),
                poller: name.clone(),
                method: method_name,
            })?;
        Ok(Self { name, method })
    }
}

impl std::fmt::Display for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Poller name: {}, Poller method: {}", self.name, self.method)
    }
}

/// A named group of pollers sharing one polling interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerSource {
    pub name: String,
    /// Polling interval in seconds, always > 0.
    pub interval: u64,
    pub pollers: Vec<Poller>,
}

impl PollerSource {
    fn from_value(name: String, cfg: &Value) -> Result<Self, PipelineError> {
        let interval = parse_interval(&name, cfg.get("interval"))?;

        let meters = match cfg.get("meters") {
            None | Some(Value::Null) => &[][..],
            Some(Value::Sequence(meters)) => meters.as_slice(),
            Some(other) => {
                return Err(PipelineError::MissingField {
                    source_name: name,
                    field: "meters",
                    fragment: fragment(other),
                })
            }
        };

        // Names are checked before any poller is built.
        let mut seen = HashSet::with_capacity(meters.len());
        for meter in meters {
            let poller = required_str(&name, meter, "name")?;
            if !seen.insert(poller.clone()) {
                return Err(PipelineError::DuplicatePoller {
                    source_name: name,
                    poller,
                });
            }
        }

        let pollers = meters
            .iter()
            .map(|m| Poller::from_value(&name, m))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name,
            interval,
            pollers,
        })
    }
}

/// Root of the pipeline: every configured source, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollersManager {
    sources: Vec<PollerSource>,
}

impl PollersManager {
    pub fn from_yaml(data: &str) -> Result<Self, PipelineError> {
        let doc: Value = serde_yaml::from_str(data)?;
        Self::from_value(&doc)
    }

    pub fn from_value(cfg: &Value) -> Result<Self, PipelineError> {
        let sources = match cfg.get("sources") {
            None => return Err(PipelineError::MissingSources(fragment(cfg))),
            Some(Value::Sequence(sources)) => sources,
            Some(other) => return Err(PipelineError::InvalidSources(fragment(other))),
        };

        let mut names = HashSet::with_capacity(sources.len());
        let mut built = Vec::with_capacity(sources.len());
        for source in sources {
            let name = required_str("<unnamed>", source, "name")?;
            if !names.insert(name.clone()) {
                return Err(PipelineError::DuplicateSource { name });
            }
            built.push(PollerSource::from_value(name, source)?);
        }

        Ok(Self { sources: built })
    }

    pub fn sources(&self) -> &[PollerSource] {
        &self.sources
    }
}

/// Locate and load the pipeline file named `pipeline_file`.
pub fn setup_polling(pipeline_file: &str) -> Result<PollersManager, PipelineError> {
    let path = find_pipeline_file(pipeline_file, PIPELINE_DIRS)?;
    load_pipeline(&path)
}

pub fn load_pipeline(path: &Path) -> Result<PollersManager, PipelineError> {
    tracing::debug!("Polling config file: {}", path.display());
    let data = std::fs::read_to_string(path).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let manager = PollersManager::from_yaml(&data)?;
    tracing::info!(
        "Loaded pipeline {} with {} sources",
        path.display(),
        manager.sources.len()
    );
    Ok(manager)
}

fn find_pipeline_file(name: &str, dirs: &[&str]) -> Result<PathBuf, PipelineError> {
    dirs.iter()
        .map(|d| Path::new(d).join(name))
        .find(|p| p.exists())
        .ok_or_else(|| {
            tracing::error!("Skynet pipeline file {} is not found", name);
            PipelineError::FileNotFound {
                name: name.to_string(),
                dirs: dirs.iter().map(|d| d.to_string()).collect(),
            }
        })
}

fn parse_interval(source_name: &str, value: Option<&Value>) -> Result<u64, PipelineError> {
    let invalid = |v: &Value| PipelineError::InvalidInterval {
        source_name: source_name.to_string(),
        value: fragment(v),
    };

    let interval = match value {
        None | Some(Value::Null) => return Ok(DEFAULT_INTERVAL),
        Some(v @ Value::Number(n)) => n.as_i64().ok_or_else(|| invalid(v))?,
        Some(v @ Value::String(s)) => s.trim().parse::<i64>().map_err(|_| invalid(v))?,
        Some(v) => return Err(invalid(v)),
    };

    match u64::try_from(interval) {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(PipelineError::InvalidInterval {
            source_name: source_name.to_string(),
            value: interval.to_string(),
        }),
    }
}

fn required_str(source_name: &str, cfg: &Value, field: &'static str) -> Result<String, PipelineError> {
    let missing = || PipelineError::MissingField {
        source_name: source_name.to_string(),
        field,
        fragment: fragment(cfg),
    };

    match cfg.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(missing()),
    }
}

/// Render a document fragment on one line for diagnostics.
fn fragment(v: &Value) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| format!("{:?}", v))
}
