//! Producers backed by the Zabbix API: physical host counts and usage.

use super::{ratio, round_to, value_as_f64, PollContext, PollError};
use crate::db::top_n;

use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// `history.get` value types.
const HISTORY_FLOAT: u8 = 0;
const HISTORY_UNSIGNED: u8 = 3;

const KEY_MEMORY_AVAILABLE: &str = "vm.memory.size[available]";
const KEY_MEMORY_TOTAL: &str = "vm.memory.size[total]";
const KEY_MEMORY_PAVAILABLE: &str = "vm.memory.size[pavailable]";
const KEY_CPU_IDLE: &str = "system.cpu.util[,idle]";

/// Item that has reported at least twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveItem {
    pub itemid: String,
    pub hostid: String,
}

pub async fn host_total(ctx: &PollContext) -> Result<Value, PollError> {
    let groupids = hostgroup_ids(ctx).await?;
    let hosts = ctx
        .session
        .call("host.get", json!({"output": "extend", "groupids": groupids}))
        .await?;
    Ok(host_counts(as_array(&hosts, "host.get")?))
}

pub async fn memory_usage(ctx: &PollContext) -> Result<Value, PollError> {
    let groupids = hostgroup_ids(ctx).await?;
    let available = sum_latest(ctx, &groupids, KEY_MEMORY_AVAILABLE, HISTORY_UNSIGNED).await?;
    let total = sum_latest(ctx, &groupids, KEY_MEMORY_TOTAL, HISTORY_UNSIGNED).await?;
    Ok(json!({
        "available_mems": available as u64,
        "total_mems": total as u64,
        "mem_used_radio": ratio(total - available, total),
    }))
}

/// Mean CPU utilisation across hosts, as a fraction of 1.
pub async fn cpu_util(ctx: &PollContext) -> Result<Value, PollError> {
    let groupids = hostgroup_ids(ctx).await?;
    let items = live_items(ctx, &groupids, KEY_CPU_IDLE).await?;
    if items.is_empty() {
        return Err(PollError::Data(format!("no reporting {} items", KEY_CPU_IDLE)));
    }

    let mut busy = 0.0;
    for item in &items {
        busy += 100.0 - latest_value(ctx, &item.itemid, HISTORY_FLOAT).await?;
    }
    let used = round_to(busy / items.len() as f64 / 100.0, 4);
    Ok(json!({
        "total_cpu_util": 1.0,
        "used_cpu_util": used,
        "used_radio": used,
    }))
}

/// Hosts with the highest memory usage in percent.
pub async fn hosts_top_memory_usage(ctx: &PollContext) -> Result<Value, PollError> {
    let groupids = hostgroup_ids(ctx).await?;
    let values = host_values(ctx, &groupids, KEY_MEMORY_PAVAILABLE).await?;
    let usage = values
        .into_iter()
        .map(|(hostid, available)| (hostid, round_to(100.0 - available, 2)))
        .collect();
    top_hosts(ctx, usage).await
}

/// Hosts with the highest CPU utilisation in percent.
pub async fn hosts_top_cpu_util(ctx: &PollContext) -> Result<Value, PollError> {
    let groupids = hostgroup_ids(ctx).await?;
    let values = host_values(ctx, &groupids, KEY_CPU_IDLE).await?;
    let usage = values
        .into_iter()
        .map(|(hostid, idle)| (hostid, round_to(100.0 - idle, 4)))
        .collect();
    top_hosts(ctx, usage).await
}

async fn hostgroup_ids(ctx: &PollContext) -> Result<Vec<String>, PollError> {
    let groups = ctx
        .session
        .call(
            "hostgroup.get",
            json!({"output": "extend", "filter": {"name": ctx.config.hostgroups}}),
        )
        .await?;
    Ok(as_array(&groups, "hostgroup.get")?
        .iter()
        .filter_map(|g| g["groupid"].as_str().map(str::to_string))
        .collect())
}

async fn live_items(ctx: &PollContext, groupids: &[String], key: &str) -> Result<Vec<LiveItem>, PollError> {
    let items = ctx
        .session
        .call(
            "item.get",
            json!({"output": "extend", "groupids": groupids, "search": {"key_": key}}),
        )
        .await?;
    Ok(filter_live_items(as_array(&items, "item.get")?))
}

async fn latest_value(ctx: &PollContext, itemid: &str, history: u8) -> Result<f64, PollError> {
    let rows = ctx
        .session
        .call(
            "history.get",
            json!({
                "output": "extend",
                "history": history,
                "itemids": itemid,
                "sortfield": "clock",
                "sortorder": "DESC",
                "limit": 1,
            }),
        )
        .await?;
    let row = as_array(&rows, "history.get")?
        .first()
        .ok_or_else(|| PollError::Data(format!("no history for item {}", itemid)))?;
    Ok(value_as_f64(&row["value"]).unwrap_or(0.0))
}

async fn sum_latest(ctx: &PollContext, groupids: &[String], key: &str, history: u8) -> Result<f64, PollError> {
    let mut sum = 0.0;
    for item in live_items(ctx, groupids, key).await? {
        sum += latest_value(ctx, &item.itemid, history).await?;
    }
    Ok(sum)
}

/// Latest value of `key` per host.
async fn host_values(ctx: &PollContext, groupids: &[String], key: &str) -> Result<Vec<(String, f64)>, PollError> {
    let items = live_items(ctx, groupids, key).await?;
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        let value = latest_value(ctx, &item.itemid, HISTORY_FLOAT).await?;
        values.push((item.hostid, value));
    }
    Ok(values)
}

/// Rank per-host values and resolve host names.
async fn top_hosts(ctx: &PollContext, values: Vec<(String, f64)>) -> Result<Value, PollError> {
    let ranked = top_n(values, ctx.config.top);
    if ranked.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }

    let hostids: Vec<&str> = ranked.iter().map(|(id, _)| id.as_str()).collect();
    let hosts = ctx
        .session
        .call("host.get", json!({"output": "extend", "hostids": hostids}))
        .await?;
    Ok(Value::Array(name_hosts(ranked, as_array(&hosts, "host.get")?)))
}

/// Count hosts; a host is active when enabled and without error.
pub fn host_counts(hosts: &[Value]) -> Value {
    let total = hosts.len();
    let active = hosts
        .iter()
        .filter(|h| h["status"] == "0" && h["error"].as_str().map_or(true, str::is_empty))
        .count();
    json!({"total": total, "active": active, "off": total - active})
}

/// Items whose last and previous values are both positive.
pub fn filter_live_items(items: &[Value]) -> Vec<LiveItem> {
    items
        .iter()
        .filter(|item| {
            let positive = |field: &str| value_as_f64(&item[field]).is_some_and(|v| v > 0.0);
            positive("lastvalue") && positive("prevvalue")
        })
        .filter_map(|item| {
            Some(LiveItem {
                itemid: item["itemid"].as_str()?.to_string(),
                hostid: item["hostid"].as_str()?.to_string(),
            })
        })
        .collect()
}

/// Turn ranked `(hostid, value)` pairs into `{host name: value}` entries,
/// keeping the ranking order and dropping hosts the API did not return.
pub fn name_hosts(ranked: Vec<(String, f64)>, hosts: &[Value]) -> Vec<Value> {
    let names: HashMap<&str, &str> = hosts
        .iter()
        .filter_map(|h| Some((h["hostid"].as_str()?, h["host"].as_str()?)))
        .collect();

    ranked
        .into_iter()
        .filter_map(|(hostid, value)| {
            let Some(name) = names.get(hostid.as_str()) else {
                tracing::warn!("Host {} not returned by host.get", hostid);
                return None;
            };
            let mut entry = Map::new();
            entry.insert(name.to_string(), json!(value));
            Some(Value::Object(entry))
        })
        .collect()
}

fn as_array<'a>(v: &'a Value, method: &str) -> Result<&'a [Value], PollError> {
    v.as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| PollError::Data(format!("{} returned {}, expected a list", method, v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pollers::testing::context_with_api;
    use crate::pollers::{Method, TickCache};
    use crate::zabbix::testing::spawn_fake_api;

    fn zabbix(method: &str, params: &Value, auth: Option<&str>) -> Result<Value, (i64, String)> {
        if method == "user.login" {
            return Ok(json!("tok"));
        }
        if auth != Some("tok") {
            return Err((-32602, "Not authorised.".to_string()));
        }

        let hosts = json!([
            {"hostid": "101", "host": "node-1", "status": "0", "error": ""},
            {"hostid": "102", "host": "node-2", "status": "0", "error": "unreachable"},
            {"hostid": "103", "host": "node-3", "status": "1", "error": ""},
        ]);
        let item = |itemid: &str, hostid: &str, last: &str, prev: &str| {
            json!({"itemid": itemid, "hostid": hostid, "lastvalue": last, "prevvalue": prev})
        };

        match method {
            "hostgroup.get" => {
                assert_eq!(params["filter"]["name"], json!(["Controller", "Computer"]));
                Ok(json!([{"groupid": "2"}, {"groupid": "7"}]))
            }
            "host.get" => match params["hostids"].as_array() {
                Some(ids) => Ok(Value::Array(
                    hosts
                        .as_array()
                        .unwrap()
                        .iter()
                        .filter(|h| ids.contains(&h["hostid"]))
                        .cloned()
                        .collect(),
                )),
                None => {
                    assert_eq!(params["groupids"], json!(["2", "7"]));
                    Ok(hosts)
                }
            },
            "item.get" => Ok(match params["search"]["key_"].as_str().unwrap() {
                KEY_MEMORY_AVAILABLE => json!([item("i1", "101", "100", "100"), item("i2", "102", "0", "5")]),
                KEY_MEMORY_TOTAL => json!([item("i3", "101", "400", "400")]),
                KEY_MEMORY_PAVAILABLE => json!([item("i4", "101", "70.5", "70"), item("i5", "102", "20.25", "21")]),
                KEY_CPU_IDLE => json!([item("i6", "101", "90", "91"), item("i7", "102", "40", "41")]),
                _ => json!([]),
            }),
            "history.get" => {
                let value = match params["itemids"].as_str().unwrap() {
                    "i1" => "1024",
                    "i3" => "4096",
                    "i4" => "70.5",
                    "i5" => "20.25",
                    "i6" => "90",
                    "i7" => "40",
                    _ => return Ok(json!([])),
                };
                Ok(json!([{"itemid": params["itemids"], "clock": "1700000000", "value": value}]))
            }
            _ => Err((-32601, "Method not found.".to_string())),
        }
    }

    async fn produce(method: Method) -> Value {
        let api = spawn_fake_api(zabbix).await;
        let ctx = context_with_api(&api.url, 0, None);
        ctx.session.authenticate().await.unwrap();
        method.produce(&ctx, &mut TickCache::new()).await.unwrap()
    }

    #[tokio::test]
    async fn test_host_total() {
        assert_eq!(
            produce(Method::HostTotal).await,
            json!({"total": 3, "active": 1, "off": 2})
        );
    }

    #[tokio::test]
    async fn test_memory_usage_skips_idle_items() {
        assert_eq!(
            produce(Method::MemoryUsage).await,
            json!({"available_mems": 1024, "total_mems": 4096, "mem_used_radio": 0.75})
        );
    }

    #[tokio::test]
    async fn test_cpu_util_is_mean_busy_fraction() {
        assert_eq!(
            produce(Method::CpuUtil).await,
            json!({"total_cpu_util": 1.0, "used_cpu_util": 0.35, "used_radio": 0.35})
        );
    }

    #[tokio::test]
    async fn test_top_hosts_ranked_descending() {
        assert_eq!(
            produce(Method::HostsTopMemoryUsage).await,
            json!([{"node-2": 79.75}, {"node-1": 29.5}])
        );
        assert_eq!(
            produce(Method::HostsTopCpuUtil).await,
            json!([{"node-2": 60.0}, {"node-1": 10.0}])
        );
    }

    #[tokio::test]
    async fn test_unauthenticated_session_fails_the_metric() {
        let api = spawn_fake_api(zabbix).await;
        let ctx = context_with_api(&api.url, 0, None);
        let err = Method::HostTotal
            .produce(&ctx, &mut TickCache::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::Api(_)));
    }

    #[test]
    fn test_filter_live_items() {
        let items = vec![
            json!({"itemid": "1", "hostid": "a", "lastvalue": "3", "prevvalue": "2"}),
            json!({"itemid": "2", "hostid": "b", "lastvalue": "0", "prevvalue": "2"}),
            json!({"itemid": "3", "hostid": "c", "lastvalue": "1.5", "prevvalue": "bogus"}),
        ];
        assert_eq!(
            filter_live_items(&items),
            vec![LiveItem {
                itemid: "1".to_string(),
                hostid: "a".to_string()
            }]
        );
    }

    #[test]
    fn test_name_hosts_keeps_rank_order() {
        let hosts = vec![
            json!({"hostid": "1", "host": "alpha"}),
            json!({"hostid": "2", "host": "beta"}),
        ];
        let ranked = vec![
            ("2".to_string(), 80.0),
            ("9".to_string(), 70.0),
            ("1".to_string(), 10.0),
        ];
        assert_eq!(
            name_hosts(ranked, &hosts),
            vec![json!({"beta": 80.0}), json!({"alpha": 10.0})]
        );
    }
}
