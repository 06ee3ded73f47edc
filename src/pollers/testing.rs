//! Fixtures shared by producer and scheduler tests.

use super::{Alarm, HypervisorStats, Instance, Inventory, InventoryError, PollContext};
use crate::config::AgentConfig;
use crate::db::{StatisticsEngine, Store};
use crate::mapping::PeriodMapping;
use crate::zabbix::{ApiClient, Sender, ZabbixSession};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub struct FakeInventory {
    pub instances: Vec<Instance>,
    pub alarms: Result<Vec<Alarm>, String>,
}

#[async_trait]
impl Inventory for FakeInventory {
    async fn list_instances(&self) -> Result<Vec<Instance>, InventoryError> {
        Ok(self.instances.clone())
    }

    async fn hypervisor_statistics(&self) -> Result<HypervisorStats, InventoryError> {
        Ok(HypervisorStats {
            memory_mb: 4096,
            memory_mb_used: 1024,
            vcpus: 16,
            vcpus_used: 0,
        })
    }

    async fn list_alarms(&self) -> Result<Vec<Alarm>, InventoryError> {
        self.alarms.clone().map_err(InventoryError)
    }
}

pub fn instance(id: &str, status: &str) -> Instance {
    Instance {
        id: id.to_string(),
        name: format!("{}-name", id),
        status: status.to_string(),
    }
}

/// Three active instances, one each in error, shutoff and suspended.
pub fn inventory() -> FakeInventory {
    FakeInventory {
        instances: vec![
            instance("vm-1", "ACTIVE"),
            instance("vm-2", "ACTIVE"),
            instance("vm-3", "ACTIVE"),
            instance("vm-4", "ERROR"),
            instance("vm-5", "SHUTOFF"),
            instance("vm-6", "SUSPENDED"),
        ],
        alarms: Ok(vec![
            Alarm { name: "a".into(), state: "ok".into() },
            Alarm { name: "b".into(), state: "alarm".into() },
            Alarm { name: "c".into(), state: "insufficient data".into() },
            Alarm { name: "d".into(), state: "ok".into() },
        ]),
    }
}

/// Context with an in-memory store, the trapper on `trapper_port` and an
/// API endpoint nobody listens on.
pub fn test_context(trapper_port: u16, inventory: Option<Arc<dyn Inventory>>) -> PollContext {
    context_with_api("http://127.0.0.1:9/zabbix/api_jsonrpc.php", trapper_port, inventory)
}

pub fn context_with_api(api_url: &str, trapper_port: u16, inventory: Option<Arc<dyn Inventory>>) -> PollContext {
    let config = AgentConfig {
        zabbix_port: trapper_port,
        zabbix_api_url: Some(api_url.to_string()),
        zabbix_user_pwd: "zabbix".to_string(),
        publish_host: "openstack".to_string(),
        revalidate_session: false,
        ..Default::default()
    };

    let api = ApiClient::new(api_url, Duration::from_secs(5)).unwrap();
    let sender = Sender::new("127.0.0.1", trapper_port, Duration::from_secs(5));
    let session = ZabbixSession::new(api, sender, &config.zabbix_user, &config.zabbix_user_pwd);

    let mapping = PeriodMapping::from_json(r#"{"period_colls": [60], "60": {"meter_type": ["cpu_util", "memory.usage"]}}"#)
        .unwrap();
    let engine = StatisticsEngine::new(Store::open(":memory:").unwrap(), Arc::new(mapping)).unwrap();

    PollContext {
        config: Arc::new(config),
        session: Arc::new(session),
        engine,
        inventory,
    }
}
