//! Metric producers.
//!
//! Every pipeline `method` names one variant of [`Method`]; unknown names are
//! rejected when the pipeline is loaded. Producers return a JSON value that
//! the scheduler encodes into the item sent to Zabbix.

mod cloud;
mod hosts;
#[cfg(test)]
pub(crate) mod testing;

pub use cloud::*;
pub use hosts::*;

use crate::config::AgentConfig;
use crate::db::{DbError, StatisticsEngine};
use crate::zabbix::{ApiError, ZabbixSession};

use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Per-metric error types. A failing producer only drops its own metric.
#[derive(Error, Debug)]
pub enum PollError {
    #[error("zabbix API: {0}")]
    Api(#[from] ApiError),
    #[error("statistics store: {0}")]
    Store(#[from] DbError),
    #[error("inventory: {0}")]
    Inventory(#[from] InventoryError),
    #[error("no inventory configured")]
    NoInventory,
    #[error("unexpected data: {0}")]
    Data(String),
}

/// The closed set of metric producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    HostTotal,
    MemoryUsage,
    CpuUtil,
    HostsTopMemoryUsage,
    HostsTopCpuUtil,
    VmsTotal,
    VmsMemoryUsage,
    VmsVcpuUsage,
    VmsTopMemoryUsage,
    VmsTopVcpuUsage,
    AlarmsTotal,
}

/// Method identifiers as written in pipeline documents.
pub const METHODS: &[(&str, Method)] = &[
    ("create_host_total", Method::HostTotal),
    ("create_memory_usage", Method::MemoryUsage),
    ("create_cpu_util", Method::CpuUtil),
    ("create_hosts_top_memory_usage", Method::HostsTopMemoryUsage),
    ("create_hosts_top_cpu_util", Method::HostsTopCpuUtil),
    ("create_vms_total", Method::VmsTotal),
    ("create_vms_memory_usage", Method::VmsMemoryUsage),
    ("create_vms_vcpu_usage", Method::VmsVcpuUsage),
    ("create_vms_top_memory_usage", Method::VmsTopMemoryUsage),
    ("create_vms_top_vcpu_usage", Method::VmsTopVcpuUsage),
    ("create_alarms_total", Method::AlarmsTotal),
];

/// Minutes of samples the VM top-N producers look back over.
pub const TOP_WINDOW_MINUTES: i64 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMethod(pub String);

impl fmt::Display for UnknownMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown poller method {}", self.0)
    }
}

impl std::error::Error for UnknownMethod {}

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        METHODS
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, m)| *m)
            .ok_or_else(|| UnknownMethod(s.to_string()))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Method {
    pub fn name(self) -> &'static str {
        METHODS
            .iter()
            .find(|(_, m)| *m == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }

    /// Whether the producer reads from the compute inventory.
    pub fn needs_inventory(self) -> bool {
        matches!(
            self,
            Method::VmsTotal
                | Method::VmsMemoryUsage
                | Method::VmsVcpuUsage
                | Method::VmsTopMemoryUsage
                | Method::VmsTopVcpuUsage
                | Method::AlarmsTotal
        )
    }

    /// Produce the metric value.
    pub async fn produce(self, ctx: &PollContext, cache: &mut TickCache) -> Result<Value, PollError> {
        match self {
            Method::HostTotal => host_total(ctx).await,
            Method::MemoryUsage => memory_usage(ctx).await,
            Method::CpuUtil => cpu_util(ctx).await,
            Method::HostsTopMemoryUsage => hosts_top_memory_usage(ctx).await,
            Method::HostsTopCpuUtil => hosts_top_cpu_util(ctx).await,
            Method::VmsTotal => vms_total(ctx, cache).await,
            Method::VmsMemoryUsage => vms_memory_usage(ctx).await,
            Method::VmsVcpuUsage => vms_vcpu_usage(ctx).await,
            Method::VmsTopMemoryUsage => vms_top_metric(ctx, cache, "memory.usage").await,
            Method::VmsTopVcpuUsage => vms_top_metric(ctx, cache, "cpu_util").await,
            Method::AlarmsTotal => alarms_total(ctx).await,
        }
    }
}

/// Everything a producer may read, shared by all source tasks.
pub struct PollContext {
    pub config: Arc<AgentConfig>,
    pub session: Arc<ZabbixSession>,
    pub engine: StatisticsEngine,
    pub inventory: Option<Arc<dyn Inventory>>,
}

impl PollContext {
    pub fn inventory(&self) -> Result<&dyn Inventory, PollError> {
        self.inventory.as_deref().ok_or(PollError::NoInventory)
    }
}

/// Lookups shared by the producers of one tick.
///
/// Created empty at the start of a tick and dropped at its end, so ticks of
/// different sources never see each other's entries.
#[derive(Debug, Default)]
pub struct TickCache {
    instances: Option<InstanceIndex>,
}

impl TickCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instance index, listed from the inventory on first use.
    pub async fn instances(&mut self, inventory: &dyn Inventory) -> Result<&InstanceIndex, PollError> {
        if self.instances.is_none() {
            let listed = inventory.list_instances().await?;
            self.instances = Some(InstanceIndex::from_instances(&listed));
        }
        self.instances
            .as_ref()
            .ok_or_else(|| PollError::Data("instance index missing".to_string()))
    }

    pub fn clear(&mut self) {
        self.instances = None;
    }
}

/// Parse a Zabbix value that may be a JSON number or a numeric string.
pub(crate) fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn round_to(v: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (v * factor).round() / factor
}

/// `numerator / denominator` rounded to four digits, 0 when undefined.
pub(crate) fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        round_to(numerator / denominator, 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_names_round_trip() {
        for (name, method) in METHODS {
            assert_eq!(name.parse::<Method>(), Ok(*method));
            assert_eq!(method.name(), *name);
            assert_eq!(method.to_string(), *name);
        }
    }

    #[test]
    fn test_unknown_method() {
        let err = "get_everything".parse::<Method>().unwrap_err();
        assert_eq!(err, UnknownMethod("get_everything".to_string()));
    }

    #[test]
    fn test_needs_inventory() {
        assert!(Method::VmsTotal.needs_inventory());
        assert!(Method::AlarmsTotal.needs_inventory());
        assert!(!Method::HostTotal.needs_inventory());
        assert!(!Method::HostsTopCpuUtil.needs_inventory());
    }

    #[test]
    fn test_value_helpers() {
        assert_eq!(value_as_f64(&json!("12.5")), Some(12.5));
        assert_eq!(value_as_f64(&json!(3)), Some(3.0));
        assert_eq!(value_as_f64(&json!(null)), None);
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(ratio(1.0, 3.0), 0.3333);
        assert_eq!(ratio(1.0, 0.0), 0.0);
    }
}
