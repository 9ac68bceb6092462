use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use groundswell_collector::harvester::StreamOptions;
use groundswell_collector::traits::{DurableCache, RawPostSink, SeenStore};
use groundswell_collector::{Collector, CredentialPool, DedupIndex, Harvester, WatermarkStore};
use groundswell_common::{Config, RateGate};
use groundswell_store::{KvStore, PostRepo, SeenSets};

/// Listing API quota: 600 calls/min with a short gap between calls.
const API_CALLS_PER_MINUTE: u32 = 600;
const API_MIN_GAP: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(about = "Harvest problem posts from the source forum")]
struct Cli {
    /// Run the continuous streaming mode instead of a one-shot plan.
    #[arg(long)]
    stream: bool,

    /// Time budget for streaming mode, in seconds.
    #[arg(long, default_value_t = 300)]
    time_budget_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Groundswell collector starting...");

    let cli = Cli::parse();
    let config = Config::collector_from_env()?;
    config.log_redacted();

    let pool = groundswell_store::connect(&config.database_url).await?;
    groundswell_store::migrate(&pool).await?;

    let cache: Arc<dyn DurableCache> = Arc::new(KvStore::new(pool.clone()));
    let seen: Arc<dyn SeenStore> = Arc::new(SeenSets::new(pool.clone()));
    let sink: Arc<dyn RawPostSink> = Arc::new(PostRepo::new(pool.clone()));

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    let dedup = Arc::new(DedupIndex::new("reddit", seen, config.seen_ttl_days));
    let seeded = dedup.warm_start(sink.as_ref()).await?;
    info!(seeded, "Dedup index ready");

    let api = Arc::new(groundswell_collector::reddit::RedditClient::new(
        config.reddit_user_agent.clone(),
    ));
    let credentials = Arc::new(CredentialPool::new(
        config.reddit_credentials.clone(),
        cache.clone(),
    ));
    let api_bucket = Arc::new(RateGate::per_minute(API_CALLS_PER_MINUTE).with_min_gap(API_MIN_GAP));
    let watermarks = Arc::new(WatermarkStore::new(cache.clone()));

    let harvester = Arc::new(Harvester::new(api, credentials, api_bucket, cancel.clone()));

    if cli.stream {
        let options = StreamOptions {
            time_budget: Duration::from_secs(cli.time_budget_secs),
            ..StreamOptions::default()
        };
        run_streams(harvester, dedup, watermarks, sink, &config.sub_sources, options).await?;
    } else {
        let collector = Collector::new(
            harvester,
            dedup,
            watermarks,
            sink,
            cache,
            config.collector_target_count,
        );
        collector.run(&config.sub_sources).await?;
    }

    Ok(())
}

/// Consume one continuous stream per sub-source, persisting deduped batches
/// as they arrive.
async fn run_streams(
    harvester: Arc<Harvester>,
    dedup: Arc<DedupIndex>,
    watermarks: Arc<WatermarkStore>,
    sink: Arc<dyn RawPostSink>,
    sub_sources: &[String],
    options: StreamOptions,
) -> Result<()> {
    let mut handles = Vec::new();

    for sub in sub_sources {
        let mut rx = harvester.clone().stream_new_posts(
            sub.clone(),
            watermarks.clone(),
            options.clone(),
        );
        let dedup = dedup.clone();
        let sink = sink.clone();
        let sub = sub.clone();

        handles.push(tokio::spawn(async move {
            let mut persisted = 0u64;
            while let Some(batch) = rx.recv().await {
                let ids: Vec<String> = batch.iter().map(|p| p.id.clone()).collect();
                let fresh_flags = match dedup.add_many(&ids).await {
                    Ok(flags) => flags,
                    Err(e) => {
                        tracing::warn!(sub_source = sub.as_str(), error = %e, "Dedup failed");
                        continue;
                    }
                };
                let fresh: Vec<_> = batch
                    .into_iter()
                    .zip(fresh_flags)
                    .filter(|(_, is_new)| *is_new)
                    .map(|(post, _)| post)
                    .collect();
                if fresh.is_empty() {
                    continue;
                }
                match sink.persist(&fresh).await {
                    Ok(n) => persisted += n,
                    Err(e) => tracing::warn!(sub_source = sub.as_str(), error = %e, "Persist failed"),
                }
            }
            info!(sub_source = sub.as_str(), persisted, "Stream consumer done");
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}
