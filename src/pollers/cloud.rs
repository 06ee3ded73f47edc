//! Producers backed by the compute inventory and the statistics store.

use super::{ratio, PollContext, PollError, TickCache, TOP_WINDOW_MINUTES};
use crate::db::{first_seen_averages, top_n, RangeOp, SampleFilter};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("inventory request failed: {0}")]
pub struct InventoryError(pub String);

/// A compute instance as listed by the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    /// `ACTIVE`, `ERROR`, `SHUTOFF`, `SUSPENDED`, ...
    pub status: String,
}

/// Aggregate hypervisor usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HypervisorStats {
    pub memory_mb: u64,
    pub memory_mb_used: u64,
    pub vcpus: u64,
    pub vcpus_used: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    pub name: String,
    /// `ok`, `alarm` or `insufficient data`.
    pub state: String,
}

/// Source of compute inventory: instances, hypervisor totals and alarms.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// All instances across tenants.
    async fn list_instances(&self) -> Result<Vec<Instance>, InventoryError>;

    async fn hypervisor_statistics(&self) -> Result<HypervisorStats, InventoryError>;

    async fn list_alarms(&self) -> Result<Vec<Alarm>, InventoryError>;
}

/// Instance names by id plus the ids of active instances.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceIndex {
    pub names: HashMap<String, String>,
    pub active: Vec<String>,
    pub total: usize,
    pub error: usize,
    pub off: usize,
    pub paused: usize,
}

impl InstanceIndex {
    pub fn from_instances(instances: &[Instance]) -> Self {
        let mut index = Self {
            total: instances.len(),
            ..Default::default()
        };
        for i in instances {
            index.names.insert(i.id.clone(), i.name.clone());
            match i.status.as_str() {
                "ACTIVE" => index.active.push(i.id.clone()),
                "ERROR" => index.error += 1,
                "SHUTOFF" => index.off += 1,
                "SUSPENDED" => index.paused += 1,
                _ => {}
            }
        }
        index
    }
}

pub async fn vms_total(ctx: &PollContext, cache: &mut TickCache) -> Result<Value, PollError> {
    let index = cache.instances(ctx.inventory()?).await?;
    Ok(json!({
        "total_count": index.total,
        "active_count": index.active.len(),
        "error_count": index.error,
        "off_count": index.off,
        "paused_count": index.paused,
    }))
}

pub async fn vms_memory_usage(ctx: &PollContext) -> Result<Value, PollError> {
    let stats = ctx.inventory()?.hypervisor_statistics().await?;
    Ok(json!({
        "used_memory_mb": stats.memory_mb_used,
        "total_memory_mb": stats.memory_mb,
        "used_memory_ratio": ratio(stats.memory_mb_used as f64, stats.memory_mb as f64),
    }))
}

pub async fn vms_vcpu_usage(ctx: &PollContext) -> Result<Value, PollError> {
    let stats = ctx.inventory()?.hypervisor_statistics().await?;
    Ok(json!({
        "used_vcpus_used": stats.vcpus_used,
        "total_vcpus_total": stats.vcpus,
        "used_vcpus_ratio": ratio(stats.vcpus_used as f64, stats.vcpus as f64),
    }))
}

pub async fn alarms_total(ctx: &PollContext) -> Result<Value, PollError> {
    let alarms = ctx.inventory()?.list_alarms().await?;
    let count = |state: &str| alarms.iter().filter(|a| a.state == state).count();
    Ok(json!({
        "total_count": alarms.len(),
        "no_data_count": count("insufficient data"),
        "alarm_count": count("alarm"),
        "ok_count": count("ok"),
    }))
}

/// Top-N active instances by the latest average of `metric`.
///
/// Returns a list of single-entry objects `{instance name: value}`, highest
/// first. Instances missing from the name index are skipped.
pub async fn vms_top_metric(ctx: &PollContext, cache: &mut TickCache, metric: &str) -> Result<Value, PollError> {
    let top = ctx.config.top;
    let index = cache.instances(ctx.inventory()?).await?;

    let now = Utc::now();
    let filter = SampleFilter::for_meter(metric)
        .resource(index.active.clone())
        .between(now - ChronoDuration::minutes(TOP_WINDOW_MINUTES), now)
        .start_op(RangeOp::Gt)
        .end_op(RangeOp::Lt);
    let stats = ctx.engine.query(&filter, None, None)?;

    let ranked = rank_named(first_seen_averages(&stats), &index.names, top);
    Ok(Value::Array(ranked))
}

/// Map resource ids to names and keep the `top` highest values.
///
/// Ids without a name are skipped; the instance was likely deleted since the
/// sample was stored.
pub fn rank_named(values: Vec<(String, f64)>, names: &HashMap<String, String>, top: usize) -> Vec<Value> {
    let named = values
        .into_iter()
        .filter_map(|(id, value)| match names.get(&id) {
            Some(name) => Some((name.clone(), value)),
            None => {
                tracing::warn!("Instance with id {} may be deleted", id);
                None
            }
        })
        .collect();

    top_n(named, top)
        .into_iter()
        .map(|(name, value)| {
            let mut entry = Map::new();
            entry.insert(name, json!(value));
            Value::Object(entry)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{StatisticsEngine, StatisticsRow, Store};
    use crate::mapping::PeriodMapping;
    use crate::pollers::testing::{inventory, test_context};
    use crate::pollers::Method;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_vms_total_counts_states() {
        let ctx = test_context(0, Some(Arc::new(inventory())));
        let mut cache = TickCache::new();
        let value = Method::VmsTotal.produce(&ctx, &mut cache).await.unwrap();
        assert_eq!(
            value,
            json!({"total_count": 6, "active_count": 3, "error_count": 1, "off_count": 1, "paused_count": 1})
        );
    }

    #[tokio::test]
    async fn test_hypervisor_ratios() {
        let ctx = test_context(0, Some(Arc::new(inventory())));
        let mut cache = TickCache::new();

        let mem = Method::VmsMemoryUsage.produce(&ctx, &mut cache).await.unwrap();
        assert_eq!(mem["used_memory_ratio"], json!(0.25));

        let cpu = Method::VmsVcpuUsage.produce(&ctx, &mut cache).await.unwrap();
        assert_eq!(cpu["used_vcpus_ratio"], json!(0.0));
        assert_eq!(cpu["total_vcpus_total"], json!(16));
    }

    #[tokio::test]
    async fn test_alarms_total() {
        let ctx = test_context(0, Some(Arc::new(inventory())));
        let value = Method::AlarmsTotal.produce(&ctx, &mut TickCache::new()).await.unwrap();
        assert_eq!(
            value,
            json!({"total_count": 4, "no_data_count": 1, "alarm_count": 1, "ok_count": 2})
        );
    }

    #[tokio::test]
    async fn test_missing_inventory_is_an_error() {
        let ctx = test_context(0, None);
        let err = Method::VmsTotal.produce(&ctx, &mut TickCache::new()).await.unwrap_err();
        assert!(matches!(err, PollError::NoInventory));
    }

    #[tokio::test]
    async fn test_vms_top_metric_ranks_recent_samples() {
        let mapping = PeriodMapping::from_json(r#"{"period_colls": [60], "60": {"meter_type": ["cpu_util"]}}"#).unwrap();
        let engine = StatisticsEngine::new(Store::open(":memory:").unwrap(), Arc::new(mapping)).unwrap();

        let now = Utc::now();
        let sample = |resource: &str, age_secs: i64, avg: f64| StatisticsRow {
            resource_id: resource.to_string(),
            counter_name: "cpu_util".to_string(),
            timestamp: now - ChronoDuration::seconds(age_secs),
            unit: "%".to_string(),
            period: 60,
            period_start: now - ChronoDuration::seconds(age_secs + 60),
            period_end: now - ChronoDuration::seconds(age_secs),
            duration: None,
            min: None,
            max: None,
            avg: Some(avg),
            sum: None,
            count: Some(1),
            aggregate: None,
        };
        engine
            .store()
            .add_statistics(
                60,
                &[
                    sample("vm-1", 10, 10.0),
                    sample("vm-1", 70, 99.0), // older sample of vm-1, ignored
                    sample("vm-2", 20, 30.0),
                    sample("vm-3", 30, 20.0),
                    sample("vm-4", 15, 80.0),   // not active
                    sample("vm-gone", 5, 95.0), // deleted
                    sample("vm-2", 600, 70.0),  // outside the window
                ],
            )
            .unwrap();

        let mut ctx = test_context(0, Some(Arc::new(inventory())));
        ctx.engine = engine;

        let mut cache = TickCache::new();
        let value = Method::VmsTopVcpuUsage.produce(&ctx, &mut cache).await.unwrap();
        assert_eq!(
            value,
            json!([{"vm-2-name": 30.0}, {"vm-3-name": 20.0}, {"vm-1-name": 10.0}])
        );
    }

    #[test]
    fn test_rank_named_skips_unknown_ids() {
        let names = HashMap::from([
            ("vm-1".to_string(), "web".to_string()),
            ("vm-3".to_string(), "db".to_string()),
        ]);
        let values = vec![
            ("vm-1".to_string(), 10.0),
            ("vm-2".to_string(), 50.0),
            ("vm-3".to_string(), 20.0),
        ];
        assert_eq!(rank_named(values.clone(), &names, 1), vec![json!({"db": 20.0})]);
        assert_eq!(
            rank_named(values, &names, 5),
            vec![json!({"db": 20.0}), json!({"web": 10.0})]
        );
    }
}
