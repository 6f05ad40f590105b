use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::cache::ContentCache;
use crate::dedup::DedupStore;
use crate::deliver::Deliver;
use crate::health::HealthChecker;
use crate::pipeline::DeliveryPipeline;
use crate::types::{RelayConfig, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    NotStarted,
    WaitingReady,
    Running,
    Stopped,
}

/// Drives the periodic work: delivery sweeps on the short cadence,
/// health checks and retention cleanup on the long one. Startup waits
/// for the destination to report ready before the first sweep.
pub struct Scheduler {
    pipeline: Arc<DeliveryPipeline>,
    health: Arc<HealthChecker>,
    dedup: Arc<DedupStore>,
    cache: Arc<ContentCache>,
    destination: Arc<dyn Deliver>,
    config: RelayConfig,
    state: RwLock<SchedulerState>,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(
        pipeline: Arc<DeliveryPipeline>,
        health: Arc<HealthChecker>,
        dedup: Arc<DedupStore>,
        cache: Arc<ContentCache>,
        destination: Arc<dyn Deliver>,
        config: RelayConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            pipeline,
            health,
            dedup,
            cache,
            destination,
            config,
            state: RwLock::new(SchedulerState::NotStarted),
            shutdown,
        }
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    /// Requests a stop. An in-flight sweep or health round finishes
    /// before the loop observes the signal and exits.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub async fn run(&self) -> Result<()> {
        let mut stop = self.shutdown.subscribe();

        *self.state.write().await = SchedulerState::WaitingReady;
        while !self.destination.ready().await {
            debug!("destination not ready, waiting");
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                _ = stop.changed() => {
                    *self.state.write().await = SchedulerState::Stopped;
                    return Ok(());
                }
            }
        }

        *self.state.write().await = SchedulerState::Running;
        info!(
            "scheduler running: sweep every {}s, health every {}s",
            self.config.check_interval_secs, self.config.health_interval_secs
        );

        let mut sweep_tick = interval(Duration::from_secs(self.config.check_interval_secs));
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut health_tick = interval(Duration::from_secs(self.config.health_interval_secs));
        health_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                _ = sweep_tick.tick() => {
                    if let Err(e) = self.pipeline.run_sweep().await {
                        error!("sweep failed: {e}");
                    }
                }
                _ = health_tick.tick() => {
                    if let Err(e) = self.health.check_all().await {
                        error!("health check round failed: {e}");
                    }
                    match self.dedup.sweep(self.config.delivery_retention_days).await {
                        Ok(n) if n > 0 => info!("pruned {n} old delivery records"),
                        Ok(_) => {}
                        Err(e) => error!("delivery retention sweep failed: {e}"),
                    }
                    if let Err(e) = self.cache.sweep(self.config.cache_retention_days).await {
                        error!("cache retention sweep failed: {e}");
                    }
                }
            }
        }

        *self.state.write().await = SchedulerState::Stopped;
        info!("scheduler stopped");
        Ok(())
    }
}
