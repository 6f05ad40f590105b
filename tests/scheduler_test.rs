use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use news_relay::deliver::{Deliver, HealthAlert, OutboundMessage};
use news_relay::scheduler::{Scheduler, SchedulerState};
use news_relay::{
    ContentCache, DedupStore, DeliveryPipeline, HealthChecker, MultiServiceRateLimiter,
    RelayConfig, Result, RetryPolicy, SourceFetcher, Store,
};

#[derive(Default)]
struct GatedDeliverer {
    ready: AtomicBool,
}

#[async_trait]
impl Deliver for GatedDeliverer {
    async fn send(&self, _channel: &str, _message: &OutboundMessage) -> Result<()> {
        Ok(())
    }

    async fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn alert(&self, _owner_id: i64, _alert: &HealthAlert) -> Result<()> {
        Ok(())
    }
}

async fn scheduler_with(destination: Arc<GatedDeliverer>) -> Arc<Scheduler> {
    let store = Arc::new(
        Store::open_in_memory()
            .await
            .unwrap_or_else(|e| panic!("failed to open store: {e}")),
    );
    let dedup = Arc::new(DedupStore::new(&store));
    let cache = Arc::new(ContentCache::new(&store));
    let config = RelayConfig::default();
    let client = reqwest::Client::new();
    let fetcher = SourceFetcher::new(
        Arc::new(MultiServiceRateLimiter::with_defaults()),
        RetryPolicy::default(),
    );
    let pipeline = Arc::new(DeliveryPipeline::new(
        store.clone(),
        dedup.clone(),
        fetcher,
        None,
        destination.clone(),
        client.clone(),
        config.clone(),
    ));
    let health = Arc::new(HealthChecker::new(
        store,
        destination.clone(),
        client,
        config.health_failure_threshold,
    ));
    Arc::new(Scheduler::new(
        pipeline,
        health,
        dedup,
        cache,
        destination,
        config,
    ))
}

async fn wait_for_state(scheduler: &Scheduler, want: SchedulerState) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while scheduler.state().await != want {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("scheduler never reached {want:?}"));
}

#[tokio::test]
async fn waits_for_destination_before_running() {
    let destination = Arc::new(GatedDeliverer::default());
    let scheduler = scheduler_with(destination.clone()).await;
    assert_eq!(scheduler.state().await, SchedulerState::NotStarted);

    let runner = scheduler.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    wait_for_state(&scheduler, SchedulerState::WaitingReady).await;

    destination.ready.store(true, Ordering::SeqCst);
    wait_for_state(&scheduler, SchedulerState::Running).await;

    scheduler.shutdown();
    handle.await.unwrap().unwrap();
    assert_eq!(scheduler.state().await, SchedulerState::Stopped);
}

#[tokio::test]
async fn shutdown_while_waiting_stops_cleanly() {
    let destination = Arc::new(GatedDeliverer::default());
    let scheduler = scheduler_with(destination).await;

    let runner = scheduler.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    wait_for_state(&scheduler, SchedulerState::WaitingReady).await;
    scheduler.shutdown();
    handle.await.unwrap().unwrap();
    assert_eq!(scheduler.state().await, SchedulerState::Stopped);
}
