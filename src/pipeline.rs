use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::dedup::DedupStore;
use crate::deliver::Deliver;
use crate::format;
use crate::sources::{self, SourceFetch, SourceFetcher};
use crate::store::Store;
use crate::translate::CachedTranslator;
use crate::types::{Item, RelayConfig, Result, SourceBinding};

/// Orchestrates one delivery pass over every configured (owner, source,
/// destination) triple: fetch, filter already-delivered items, transform,
/// deliver, record.
pub struct DeliveryPipeline {
    store: Arc<Store>,
    dedup: Arc<DedupStore>,
    fetcher: SourceFetcher,
    translator: Option<Arc<CachedTranslator>>,
    destination: Arc<dyn Deliver>,
    client: reqwest::Client,
    config: RelayConfig,
    sweep_lock: Mutex<()>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub owners: usize,
    pub triples: usize,
    pub fetched: usize,
    pub delivered: usize,
    pub failed: usize,
    /// True when this sweep was skipped because the previous one was
    /// still running.
    pub skipped: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TripleOutcome {
    pub fetched: usize,
    pub delivered: usize,
    pub failed: usize,
}

impl DeliveryPipeline {
    pub fn new(
        store: Arc<Store>,
        dedup: Arc<DedupStore>,
        fetcher: SourceFetcher,
        translator: Option<Arc<CachedTranslator>>,
        destination: Arc<dyn Deliver>,
        client: reqwest::Client,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            dedup,
            fetcher,
            translator,
            destination,
            client,
            config,
            sweep_lock: Mutex::new(()),
        }
    }

    /// Runs one full sweep over every enabled triple. Triples run
    /// concurrently up to the configured bound; a sweep that finds the
    /// previous one still in flight is skipped rather than stacked.
    pub async fn run_sweep(&self) -> Result<SweepReport> {
        let Ok(_guard) = self.sweep_lock.try_lock() else {
            warn!("previous sweep still running, skipping this cycle");
            return Ok(SweepReport {
                skipped: true,
                ..SweepReport::default()
            });
        };

        let owners = self.store.load_owner_configs().await?;
        let mut triples: Vec<(i64, SourceBinding)> = Vec::new();
        for owner in &owners {
            for binding in &owner.bindings {
                triples.push((owner.owner_id, binding.clone()));
            }
        }

        info!(
            "sweep started: {} owners, {} triples",
            owners.len(),
            triples.len()
        );

        let report = Mutex::new(SweepReport {
            owners: owners.len(),
            triples: triples.len(),
            ..SweepReport::default()
        });

        stream::iter(triples)
            .for_each_concurrent(self.config.fetch_concurrency, |(owner_id, binding)| {
                let report = &report;
                async move {
                    let source = sources::build_fetcher(&binding, self.client.clone(), &self.config);
                    let outcome = self
                        .process_triple(owner_id, &binding, source.as_ref())
                        .await;
                    let mut report = report.lock().await;
                    report.fetched += outcome.fetched;
                    report.delivered += outcome.delivered;
                    report.failed += outcome.failed;
                }
            })
            .await;

        let report = report.into_inner();
        info!(
            "sweep finished: {} fetched, {} delivered, {} failed",
            report.fetched, report.delivered, report.failed
        );
        Ok(report)
    }

    /// Processes one triple. Items run strictly sequentially in fetch
    /// order; a failure on one item never blocks its siblings.
    pub async fn process_triple(
        &self,
        owner_id: i64,
        binding: &SourceBinding,
        source: &dyn SourceFetch,
    ) -> TripleOutcome {
        let items = self.fetcher.fetch_with_retry(source).await;
        let source_key = source.source_key();
        let mut outcome = TripleOutcome {
            fetched: items.len(),
            ..TripleOutcome::default()
        };

        for item in &items {
            match self.dedup.is_delivered(owner_id, &item.id, source_key).await {
                Ok(true) => {
                    debug!("already delivered, skipping: {}", item.id);
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    // Without a dedup answer we cannot rule out a double
                    // delivery; leave the item for the next cycle.
                    error!("dedup check failed for {}: {}", item.id, e);
                    outcome.failed += 1;
                    continue;
                }
            }

            let (title, body) = self.transform(binding, item).await;
            let message = format::build_message(item, binding, title, body);

            if let Err(e) = self.destination.send(&binding.channel, &message).await {
                error!(
                    "failed to deliver item {} to {}: {}",
                    item.id, binding.channel, e
                );
                outcome.failed += 1;
                continue;
            }

            // Only a confirmed send gets recorded; a crash before this
            // point means the item is retried next cycle.
            if let Err(e) = self
                .dedup
                .mark_delivered(owner_id, &item.id, source_key, &item.title, &item.url)
                .await
            {
                error!("failed to record delivery of {}: {}", item.id, e);
            }
            outcome.delivered += 1;
            info!("delivered: {} - {}", source_key, item.title);
        }

        outcome
    }

    /// Optional translation step. Any translation failure falls back to
    /// the original text; delivery is never blocked by the transform.
    async fn transform(&self, binding: &SourceBinding, item: &Item) -> (String, Option<String>) {
        let Some(translator) = &self.translator else {
            return (item.title.clone(), item.body.clone());
        };
        if !binding.translate {
            return (item.title.clone(), item.body.clone());
        }

        let title = match translator.translate(&item.title).await {
            Ok(t) => t,
            Err(e) => {
                warn!("title translation failed for {}: {}, using original", item.id, e);
                item.title.clone()
            }
        };
        let body = match &item.body {
            Some(b) => Some(match translator.translate(b).await {
                Ok(t) => t,
                Err(e) => {
                    warn!("body translation failed for {}: {}, using original", item.id, e);
                    b.clone()
                }
            }),
            None => None,
        };
        (title, body)
    }
}
