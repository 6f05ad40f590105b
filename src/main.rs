use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use news_relay::{
    sources, CachedTranslator, ConsoleDeliverer, ContentCache, DedupStore, Deliver,
    DeliveryPipeline, HealthChecker, MultiServiceRateLimiter, RelayConfig, RetryPolicy, Scheduler,
    SourceFetcher, SourceKind, Store,
};

#[derive(Parser)]
#[command(name = "news-relay", about = "Polls content sources and relays new items to channels")]
struct Cli {
    /// SQLite database location.
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://news-relay.db")]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler: periodic sweeps, health checks, retention.
    Run,
    /// Run a single delivery sweep and exit.
    Sweep,
    /// Run a single health check round and exit.
    Check,
    /// Print store, cache, and rate limiter statistics as JSON.
    Stats,
    /// Register a source for an owner.
    AddSource {
        #[arg(long)]
        owner: i64,
        #[arg(long)]
        name: String,
        /// One of: rss, scrape, api.
        #[arg(long)]
        kind: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        channel: String,
        #[arg(long)]
        translate: bool,
    },
    /// Remove an owner's source by URL.
    RemoveSource {
        #[arg(long)]
        owner: i64,
        #[arg(long)]
        url: String,
    },
    /// List an owner's sources.
    ListSources {
        #[arg(long)]
        owner: i64,
    },
}

struct App {
    store: Arc<Store>,
    dedup: Arc<DedupStore>,
    cache: Arc<ContentCache>,
    limiter: Arc<MultiServiceRateLimiter>,
    pipeline: Arc<DeliveryPipeline>,
    health: Arc<HealthChecker>,
    destination: Arc<dyn Deliver>,
    config: RelayConfig,
}

impl App {
    async fn build(database_url: &str) -> anyhow::Result<Self> {
        let config = RelayConfig::from_env().context("invalid configuration")?;

        let store = Arc::new(
            Store::open(database_url)
                .await
                .with_context(|| format!("failed to open database at {database_url}"))?,
        );
        let dedup = Arc::new(DedupStore::new(&store));
        let cache = Arc::new(ContentCache::new(&store));
        let limiter = Arc::new(MultiServiceRateLimiter::with_defaults());
        let client = sources::http_client(&config).context("failed to build HTTP client")?;
        let destination: Arc<dyn Deliver> = Arc::new(ConsoleDeliverer);

        let retry = RetryPolicy::new(
            config.max_retries,
            std::time::Duration::from_secs_f64(config.retry_base_delay_secs),
            std::time::Duration::from_secs_f64(config.retry_max_delay_secs),
        );
        let fetcher = SourceFetcher::new(limiter.clone(), retry);

        // No translation provider is wired in by default; items pass
        // through with their original text.
        let translator: Option<Arc<CachedTranslator>> = None;

        let pipeline = Arc::new(DeliveryPipeline::new(
            store.clone(),
            dedup.clone(),
            fetcher,
            translator,
            destination.clone(),
            client.clone(),
            config.clone(),
        ));
        let health = Arc::new(HealthChecker::new(
            store.clone(),
            destination.clone(),
            client,
            config.health_failure_threshold,
        ));

        Ok(Self {
            store,
            dedup,
            cache,
            limiter,
            pipeline,
            health,
            destination,
            config,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let app = App::build(&cli.database_url).await?;

    match cli.command {
        Command::Run => {
            let scheduler = Arc::new(Scheduler::new(
                app.pipeline.clone(),
                app.health.clone(),
                app.dedup.clone(),
                app.cache.clone(),
                app.destination.clone(),
                app.config.clone(),
            ));
            let runner = scheduler.clone();
            let handle = tokio::spawn(async move { runner.run().await });

            tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
            info!("shutdown requested");
            scheduler.shutdown();
            handle.await.context("scheduler task panicked")??;
        }
        Command::Sweep => {
            let report = app.pipeline.run_sweep().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Check => {
            let results = app.health.check_all().await?;
            for outcome in results {
                println!(
                    "{}: {} (uptime {:.1}%)",
                    outcome.source,
                    if outcome.healthy { "ok" } else { "unhealthy" },
                    outcome.uptime_pct
                );
            }
        }
        Command::Stats => {
            let stats = serde_json::json!({
                "store": app.store.statistics().await?,
                "cache": app.cache.stats().await?,
                "rate_limits": app.limiter.all_stats().await,
            });
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::AddSource {
            owner,
            name,
            kind,
            url,
            channel,
            translate,
        } => {
            let kind = SourceKind::parse(&kind)
                .with_context(|| format!("unknown source kind: {kind}"))?;
            let id = app
                .store
                .add_binding(owner, &name, kind, &url, &channel, translate)
                .await?;
            println!("added source {name} (id {id})");
        }
        Command::RemoveSource { owner, url } => {
            let removed = app.store.remove_binding(owner, &url).await?;
            if removed > 0 {
                println!("removed {url}");
            } else {
                println!("no source with that URL for owner {owner}");
            }
        }
        Command::ListSources { owner } => {
            let bindings = app.store.list_bindings(owner).await?;
            if bindings.is_empty() {
                println!("no sources configured for owner {owner}");
            }
            for b in bindings {
                println!(
                    "{} [{}] {} -> {} (enabled: {}, translate: {})",
                    b.id,
                    b.kind.as_str(),
                    b.url,
                    b.channel,
                    b.enabled,
                    b.translate
                );
            }
        }
    }

    Ok(())
}
