//! skynet-polling - pushes OpenStack cloud metrics to Zabbix.
//!
//! Pass `--once` to run every source a single time and exit.

use skynet::config::AgentConfig;
use skynet::db::{StatisticsEngine, Store};
use skynet::mapping::PeriodMapping;
use skynet::pipeline::setup_polling;
use skynet::pollers::PollContext;
use skynet::retry::RetryPolicy;
use skynet::scheduler::Scheduler;
use skynet::zabbix::ZabbixSession;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("skynet=info".parse()?)
                .add_directive("skynet_polling=info".parse()?),
        )
        .init();

    let once = std::env::args().skip(1).any(|arg| arg == "--once");

    // Load configuration
    let cfg = Arc::new(AgentConfig::load()?);
    tracing::info!("Starting skynet polling agent for zabbix {}:{}", cfg.zabbix_host, cfg.zabbix_port);

    let pipeline = setup_polling(&cfg.pipeline_file)?;
    let mapping = Arc::new(PeriodMapping::load(&cfg.mapping_file)?);

    let store = RetryPolicy::new(cfg.max_retries, cfg.retry_interval)
        .run("connect to statistics store", || async { Store::open(&cfg.store_url) })
        .await?;
    let engine = StatisticsEngine::new(store, mapping)?;
    tracing::info!("Statistics store {} ready", cfg.store_url);

    let session = ZabbixSession::connect(&cfg, RetryPolicy::session()).await?;

    // No compute inventory backend is wired into the binary.
    for source in pipeline.sources() {
        for poller in source.pollers.iter().filter(|p| p.method.needs_inventory()) {
            tracing::warn!(
                "Poller {} of source {} needs a compute inventory, none is configured",
                poller.name,
                source.name
            );
        }
    }

    let ctx = Arc::new(PollContext {
        config: cfg.clone(),
        session: Arc::new(session),
        engine,
        inventory: None,
    });
    let scheduler = Scheduler::new(&pipeline, ctx);

    if once {
        for report in scheduler.run_once().await {
            tracing::info!(
                "Source {}: {} sent, failed pollers {:?}",
                report.source,
                report.sent,
                report.failed
            );
        }
        return Ok(());
    }

    scheduler.start().await;
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    scheduler.stop().await;

    Ok(())
}
