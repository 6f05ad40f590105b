use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::deliver::{Deliver, HealthAlert};
use crate::store::Store;
use crate::types::{Result, SourceBinding, SourceKind};

/// Per-source health bookkeeping. Three consecutive probe failures
/// disable the source; recovery afterwards never re-enables it, only an
/// explicit operator action does.
pub struct HealthChecker {
    store: Arc<Store>,
    destination: Arc<dyn Deliver>,
    client: reqwest::Client,
    threshold: u32,
    state: Mutex<HashMap<i64, SourceHealth>>,
}

#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub source: String,
    pub healthy: bool,
    pub uptime_pct: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SourceHealth {
    pub consecutive_failures: u32,
    pub total_checks: u64,
    pub total_successes: u64,
    pub last_check: Option<DateTime<Utc>>,
    pub disabled: bool,
}

impl SourceHealth {
    pub fn uptime_pct(&self) -> f64 {
        if self.total_checks == 0 {
            100.0
        } else {
            self.total_successes as f64 / self.total_checks as f64 * 100.0
        }
    }
}

impl HealthChecker {
    pub fn new(
        store: Arc<Store>,
        destination: Arc<dyn Deliver>,
        client: reqwest::Client,
        threshold: u32,
    ) -> Self {
        Self {
            store,
            destination,
            client,
            threshold,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Probes every enabled source and applies the results. Returns the
    /// bindings checked this round with their verdicts and rolling uptime.
    pub async fn check_all(&self) -> Result<Vec<CheckOutcome>> {
        let bindings = self.store.enabled_bindings().await?;
        info!("health check: probing {} sources", bindings.len());

        let mut results = Vec::with_capacity(bindings.len());
        for binding in &bindings {
            let verdict = self.probe(binding).await;
            let healthy = verdict.is_ok();
            let health = self.apply_result(binding, verdict).await?;
            results.push(CheckOutcome {
                source: binding.name.clone(),
                healthy,
                uptime_pct: health.uptime_pct(),
            });
        }
        Ok(results)
    }

    /// A probe is a plain GET against the source URL. RSS sources must
    /// additionally parse as a feed with at least one entry; a reachable
    /// endpoint serving an empty or broken feed counts as unhealthy.
    pub async fn probe(&self, binding: &SourceBinding) -> std::result::Result<(), String> {
        let response = self
            .client
            .get(&binding.url)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }

        if binding.kind == SourceKind::Rss {
            let body = response
                .text()
                .await
                .map_err(|e| format!("failed to read body: {e}"))?;
            let feed = feed_rs::parser::parse(body.as_bytes())
                .map_err(|e| format!("invalid feed: {e}"))?;
            if feed.entries.is_empty() {
                return Err("feed has no entries".to_string());
            }
        }

        Ok(())
    }

    /// Folds one probe verdict into the source's health record, alerting
    /// the owner on failure and disabling the source once the failure
    /// streak reaches the threshold.
    pub async fn apply_result(
        &self,
        binding: &SourceBinding,
        verdict: std::result::Result<(), String>,
    ) -> Result<SourceHealth> {
        let mut state = self.state.lock().await;
        let health = state.entry(binding.id).or_default();

        // An operator re-enable starts a fresh streak; without this the
        // stale flag would block any further auto-disable.
        if binding.enabled && health.disabled {
            health.disabled = false;
            health.consecutive_failures = 0;
        }

        health.total_checks += 1;
        health.last_check = Some(Utc::now());

        match verdict {
            Ok(()) => {
                health.total_successes += 1;
                health.consecutive_failures = 0;
            }
            Err(error) => {
                health.consecutive_failures += 1;
                warn!(
                    "source {} unhealthy ({}/{}): {}",
                    binding.name, health.consecutive_failures, self.threshold, error
                );

                let disable = health.consecutive_failures >= self.threshold && !health.disabled;
                if disable {
                    health.disabled = true;
                    self.store.set_binding_enabled(binding.id, false).await?;
                    error!(
                        "source {} disabled after {} consecutive failures",
                        binding.name, health.consecutive_failures
                    );
                }

                let alert = HealthAlert {
                    source_name: binding.name.clone(),
                    error,
                    failures: health.consecutive_failures,
                    threshold: self.threshold,
                    disabled: disable,
                };
                if let Err(e) = self.destination.alert(binding.owner_id, &alert).await {
                    error!("failed to alert owner {}: {}", binding.owner_id, e);
                }
            }
        }

        Ok(health.clone())
    }
}
