//! Scheduler module: one polling loop per pipeline source.

use crate::pipeline::{PollerSource, PollersManager};
use crate::pollers::{PollContext, TickCache};
use crate::zabbix::{SenderItem, SenderResponse};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

/// Delay before the first tick of every source.
pub const DEFAULT_SHUFFLE_DELAY: Duration = Duration::from_millis(500);

/// Outcome of one tick of one source.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub source: String,
    /// Items acknowledged by the trapper.
    pub sent: usize,
    /// Pollers whose producer failed this tick.
    pub failed: Vec<String>,
    pub response: Option<SenderResponse>,
}

/// Runs every source of the pipeline on its own interval.
pub struct Scheduler {
    sources: Vec<PollerSource>,
    ctx: Arc<PollContext>,
    shuffle_delay: Duration,
    stop_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(pipeline: &PollersManager, ctx: Arc<PollContext>) -> Self {
        let (stop_tx, _) = broadcast::channel(1);
        Self {
            sources: pipeline.sources().to_vec(),
            ctx,
            shuffle_delay: DEFAULT_SHUFFLE_DELAY,
            stop_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn with_shuffle_delay(mut self, delay: Duration) -> Self {
        self.shuffle_delay = delay;
        self
    }

    /// Spawn one task per source.
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return; // Already running
        }

        tracing::info!("Starting scheduler with {} sources", self.sources.len());
        for source in &self.sources {
            tracing::info!(
                "Scheduler: Adding source {} every {}s with {} pollers",
                source.name,
                source.interval,
                source.pollers.len()
            );
            handles.push(tokio::spawn(run_source_loop(
                self.ctx.clone(),
                source.clone(),
                self.shuffle_delay,
                self.stop_tx.subscribe(),
            )));
        }
    }

    /// Run one tick of every source, one after the other.
    pub async fn run_once(&self) -> Vec<TickReport> {
        let mut reports = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            reports.push(run_tick(&self.ctx, source).await);
        }
        reports
    }

    /// Stop every source task and wait for them to finish.
    pub async fn stop(&self) {
        let handles = std::mem::take(&mut *self.handles.lock().await);
        let _ = self.stop_tx.send(());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Source task ended abnormally: {}", e);
            }
        }
        tracing::info!("Scheduler stopped");
    }
}

async fn run_source_loop(
    ctx: Arc<PollContext>,
    source: PollerSource,
    shuffle_delay: Duration,
    mut stop_rx: broadcast::Receiver<()>,
) {
    tokio::select! {
        _ = stop_rx.recv() => return,
        _ = tokio::time::sleep(shuffle_delay) => {}
    }

    let mut interval = tokio::time::interval(Duration::from_secs(source.interval));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                break;
            }
            _ = interval.tick() => {
                run_tick(&ctx, &source).await;
            }
        }
    }
    tracing::debug!("Source {} stopped", source.name);
}

/// Produce every metric of `source` and send them as one batch.
///
/// Failing producers are logged and left out of the batch; an empty batch
/// is not sent.
pub async fn run_tick(ctx: &PollContext, source: &PollerSource) -> TickReport {
    let started = Instant::now();

    if ctx.config.revalidate_session {
        if let Err(e) = ctx.session.ensure_authenticated().await {
            tracing::error!(source = %source.name, error = %e, "Failed to revalidate zabbix session");
        }
    }

    let mut cache = TickCache::new();
    let mut items = Vec::with_capacity(source.pollers.len());
    let mut failed = Vec::new();
    for poller in &source.pollers {
        match poller.method.produce(ctx, &mut cache).await {
            Ok(value) => items.push(SenderItem {
                host: ctx.config.publish_host.clone(),
                key: poller.name.clone(),
                value: value.to_string(),
            }),
            Err(e) => {
                tracing::error!(
                    source = %source.name,
                    poller = %poller.name,
                    method = %poller.method,
                    error = %e,
                    "Failed to produce metric"
                );
                failed.push(poller.name.clone());
            }
        }
    }
    cache.clear();

    let response = if items.is_empty() {
        tracing::warn!("Source {} produced no metrics, nothing sent", source.name);
        None
    } else {
        match ctx.session.send(&items).await {
            Ok(response) => Some(response),
            Err(e) => {
                tracing::error!(source = %source.name, error = %e, "Failed to send metrics to zabbix");
                None
            }
        }
    };

    let sent = if response.is_some() { items.len() } else { 0 };
    tracing::info!(
        "Source {} tick done in {:?}: {} sent, {} failed",
        source.name,
        started.elapsed(),
        sent,
        failed.len()
    );

    TickReport {
        source: source.name.clone(),
        sent,
        failed,
        response,
    }
}
