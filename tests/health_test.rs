use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use news_relay::deliver::{Deliver, HealthAlert, OutboundMessage};
use news_relay::{HealthChecker, Result, SourceKind, Store};

#[derive(Default)]
struct AlertLog {
    alerts: Mutex<Vec<HealthAlert>>,
}

#[async_trait]
impl Deliver for AlertLog {
    async fn send(&self, _channel: &str, _message: &OutboundMessage) -> Result<()> {
        Ok(())
    }

    async fn alert(&self, _owner_id: i64, alert: &HealthAlert) -> Result<()> {
        self.alerts.lock().await.push(alert.clone());
        Ok(())
    }
}

async fn checker_with_one_source() -> (Arc<Store>, Arc<AlertLog>, HealthChecker) {
    let store = Arc::new(
        Store::open_in_memory()
            .await
            .unwrap_or_else(|e| panic!("failed to open store: {e}")),
    );
    store
        .add_binding(
            1,
            "Example",
            SourceKind::Rss,
            "https://example.test/feed.xml",
            "news",
            false,
        )
        .await
        .unwrap();
    let destination = Arc::new(AlertLog::default());
    let checker = HealthChecker::new(
        store.clone(),
        destination.clone(),
        reqwest::Client::new(),
        3,
    );
    (store, destination, checker)
}

#[tokio::test]
async fn three_consecutive_failures_disable_the_source() {
    let (store, destination, checker) = checker_with_one_source().await;
    let binding = store.enabled_bindings().await.unwrap().remove(0);

    for _ in 0..2 {
        let health = checker
            .apply_result(&binding, Err("HTTP 503".to_string()))
            .await
            .unwrap();
        assert!(!health.disabled);
    }
    assert_eq!(store.enabled_bindings().await.unwrap().len(), 1);

    let health = checker
        .apply_result(&binding, Err("HTTP 503".to_string()))
        .await
        .unwrap();
    assert!(health.disabled);
    assert!(store.enabled_bindings().await.unwrap().is_empty());

    let alerts = destination.alerts.lock().await;
    assert_eq!(alerts.len(), 3);
    assert!(!alerts[0].disabled);
    assert!(!alerts[1].disabled);
    assert!(alerts[2].disabled);
    assert_eq!(alerts[2].failures, 3);
}

#[tokio::test]
async fn disabled_source_stays_disabled_after_recovery() {
    let (store, _destination, checker) = checker_with_one_source().await;
    let binding = store.enabled_bindings().await.unwrap().remove(0);

    for _ in 0..3 {
        checker
            .apply_result(&binding, Err("connection refused".to_string()))
            .await
            .unwrap();
    }
    assert!(store.enabled_bindings().await.unwrap().is_empty());

    // The upstream coming back does not re-enable it; that takes an
    // operator.
    let binding = store.list_bindings(1).await.unwrap().remove(0);
    assert!(!binding.enabled);
    let health = checker.apply_result(&binding, Ok(())).await.unwrap();
    assert!(health.disabled);
    assert_eq!(health.consecutive_failures, 0);
    assert!(store.enabled_bindings().await.unwrap().is_empty());

    store.set_binding_enabled(binding.id, true).await.unwrap();
    assert_eq!(store.enabled_bindings().await.unwrap().len(), 1);
}

#[tokio::test]
async fn re_enabled_source_is_auto_disabled_again_at_the_threshold() {
    let (store, destination, checker) = checker_with_one_source().await;
    let binding = store.enabled_bindings().await.unwrap().remove(0);

    for _ in 0..3 {
        checker
            .apply_result(&binding, Err("HTTP 503".to_string()))
            .await
            .unwrap();
    }
    assert!(store.enabled_bindings().await.unwrap().is_empty());

    store.set_binding_enabled(binding.id, true).await.unwrap();
    let binding = store.enabled_bindings().await.unwrap().remove(0);

    // The streak starts over: two failures are not enough.
    for _ in 0..2 {
        let health = checker
            .apply_result(&binding, Err("HTTP 503".to_string()))
            .await
            .unwrap();
        assert!(!health.disabled);
    }
    assert_eq!(store.enabled_bindings().await.unwrap().len(), 1);

    let health = checker
        .apply_result(&binding, Err("HTTP 503".to_string()))
        .await
        .unwrap();
    assert!(health.disabled);
    assert!(store.enabled_bindings().await.unwrap().is_empty());

    let alerts = destination.alerts.lock().await;
    assert_eq!(alerts.iter().filter(|a| a.disabled).count(), 2);
    assert!(alerts.last().is_some_and(|a| a.disabled && a.failures == 3));
}

#[tokio::test]
async fn a_success_resets_the_failure_streak() {
    let (store, destination, checker) = checker_with_one_source().await;
    let binding = store.enabled_bindings().await.unwrap().remove(0);

    checker
        .apply_result(&binding, Err("HTTP 500".to_string()))
        .await
        .unwrap();
    checker
        .apply_result(&binding, Err("HTTP 500".to_string()))
        .await
        .unwrap();
    checker.apply_result(&binding, Ok(())).await.unwrap();
    checker
        .apply_result(&binding, Err("HTTP 500".to_string()))
        .await
        .unwrap();
    let health = checker
        .apply_result(&binding, Err("HTTP 500".to_string()))
        .await
        .unwrap();

    assert_eq!(health.consecutive_failures, 2);
    assert!(!health.disabled);
    assert_eq!(store.enabled_bindings().await.unwrap().len(), 1);
    assert!(destination.alerts.lock().await.iter().all(|a| !a.disabled));
}

#[tokio::test]
async fn uptime_tracks_successes_over_checks() {
    let (store, _destination, checker) = checker_with_one_source().await;
    let binding = store.enabled_bindings().await.unwrap().remove(0);

    checker.apply_result(&binding, Ok(())).await.unwrap();
    checker.apply_result(&binding, Ok(())).await.unwrap();
    checker.apply_result(&binding, Ok(())).await.unwrap();
    let health = checker
        .apply_result(&binding, Err("HTTP 502".to_string()))
        .await
        .unwrap();

    assert_eq!(health.total_checks, 4);
    assert_eq!(health.total_successes, 3);
    assert!((health.uptime_pct() - 75.0).abs() < f64::EPSILON);
    assert!(health.last_check.is_some());
}
