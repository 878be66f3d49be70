//! Background cycles on independent fixed intervals.
//!
//! Each cycle runs in its own task and stops when the shared `watch`
//! shutdown signal flips. A failing cycle is logged and retried on the
//! next tick; it never stops the loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use replwatch_alerts::EvaluationReport;
use replwatch_discovery::DiscoveryReport;
use replwatch_metrics::SamplingReport;
use replwatch_state::DatabaseEndpoint;

use crate::context::AppContext;
use crate::error::CycleResult;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub discovery_interval_secs: u64,
    /// Sampling is followed by an alert evaluation in the same cycle.
    pub sampling_interval_secs: u64,
    pub maintenance_interval_secs: u64,
    pub purge_interval_secs: u64,
    /// Run every cycle once right away instead of after the first interval.
    pub run_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            discovery_interval_secs: 60,
            sampling_interval_secs: 30,
            maintenance_interval_secs: 30,
            purge_interval_secs: 300,
            run_on_start: true,
        }
    }
}

// ── Cycles ─────────────────────────────────────────────────────────

pub async fn run_discovery_cycle(ctx: &AppContext) -> CycleResult<DiscoveryReport> {
    let report = ctx.discovery.discover().await?;
    info!(
        created = report.streams_created,
        refreshed = report.streams_refreshed,
        inactive = report.streams_marked_inactive,
        removed = report.streams_removed,
        unreachable = report.unreachable.len(),
        duration_ms = report.duration_ms,
        "discovery cycle complete"
    );
    Ok(report)
}

/// Sample every stream, then evaluate alerts against the fresh samples.
pub async fn run_sampling_cycle(
    ctx: &AppContext,
) -> CycleResult<(SamplingReport, EvaluationReport)> {
    let sampling = ctx.sampler.sample_all().await?;
    for (stream_id, reason) in &sampling.failed {
        warn!(%stream_id, error = %reason, "stream not sampled");
    }
    let evaluation = ctx.alerts.run_cycle().await?;
    debug!(
        sampled = sampling.sampled,
        failed = sampling.failed.len(),
        created = evaluation.created,
        resolved = evaluation.resolved,
        "sampling cycle complete"
    );
    Ok((sampling, evaluation))
}

/// Health-check due endpoints and drop pools of failing or removed ones.
pub async fn run_maintenance_cycle(ctx: &AppContext) -> CycleResult<usize> {
    let endpoints: Vec<DatabaseEndpoint> = ctx.store.list()?;
    let probed = ctx.connections.maintain(&endpoints).await;
    debug!(probed, endpoints = endpoints.len(), "connection maintenance complete");
    Ok(probed)
}

/// Physically remove records whose TTL has passed.
pub async fn run_purge_cycle(ctx: &AppContext) -> CycleResult<u32> {
    let purged = ctx.store.purge_expired()?;
    if purged > 0 {
        debug!(purged, "expired records purged");
    }
    Ok(purged)
}

// ── Loops ──────────────────────────────────────────────────────────

/// Handle to the running background cycles.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signal every loop and wait for the in-flight cycles to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "background cycle task failed");
            }
        }
        info!("background cycles stopped");
    }
}

/// Spawn one task per cycle.
pub fn start(ctx: Arc<AppContext>, config: &SchedulerConfig) -> SchedulerHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run_on_start = config.run_on_start;
    let mut tasks = Vec::with_capacity(4);

    let c = ctx.clone();
    tasks.push(spawn_loop(
        "discovery",
        Duration::from_secs(config.discovery_interval_secs),
        run_on_start,
        shutdown_rx.clone(),
        move || {
            let ctx = c.clone();
            async move { run_discovery_cycle(&ctx).await.map(|_| ()) }
        },
    ));

    let c = ctx.clone();
    tasks.push(spawn_loop(
        "sampling",
        Duration::from_secs(config.sampling_interval_secs),
        run_on_start,
        shutdown_rx.clone(),
        move || {
            let ctx = c.clone();
            async move { run_sampling_cycle(&ctx).await.map(|_| ()) }
        },
    ));

    let c = ctx.clone();
    tasks.push(spawn_loop(
        "maintenance",
        Duration::from_secs(config.maintenance_interval_secs),
        run_on_start,
        shutdown_rx.clone(),
        move || {
            let ctx = c.clone();
            async move { run_maintenance_cycle(&ctx).await.map(|_| ()) }
        },
    ));

    let c = ctx;
    tasks.push(spawn_loop(
        "purge",
        Duration::from_secs(config.purge_interval_secs),
        run_on_start,
        shutdown_rx,
        move || {
            let ctx = c.clone();
            async move { run_purge_cycle(&ctx).await.map(|_| ()) }
        },
    ));

    info!(
        discovery_secs = config.discovery_interval_secs,
        sampling_secs = config.sampling_interval_secs,
        maintenance_secs = config.maintenance_interval_secs,
        purge_secs = config.purge_interval_secs,
        "background cycles started"
    );
    SchedulerHandle { shutdown_tx, tasks }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    interval: Duration,
    run_on_start: bool,
    mut shutdown: watch::Receiver<bool>,
    mut cycle: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = CycleResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if run_on_start {
            if let Err(e) = cycle().await {
                error!(cycle = name, error = %e, "cycle failed");
            }
        }
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = cycle().await {
                        error!(cycle = name, error = %e, "cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!(cycle = name, "cycle loop shutting down");
                    break;
                }
            }
        }
    })
}
