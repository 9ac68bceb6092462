use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use groundswell_common::{Config, Metrics};
use groundswell_pipeline::worker::{run_worker, WorkerOptions};
use groundswell_pipeline::{LlmGate, Pipeline, PipelineDeps, PipelineOptions, QueueRefiller};
use groundswell_store::{AuditLog, CategoryRepo, ClusterRepo, JobQueue, MentionRepo, PostRepo};

mod routes;

const QUEUE_NAME: &str = "orchestrator";

/// Clusters whose centroids exceed this cosine similarity are merged.
const MERGE_THRESHOLD: f64 = 0.95;

#[derive(Parser)]
#[command(about = "Groundswell enrichment service")]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Serve the HTTP ingress API.
    Server,
    /// Consume the enrichment queue.
    Worker,
    /// Run the cluster maintenance pass: recompute centroids, merge
    /// near-duplicate clusters, reassign outliers.
    Maintain,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::server_from_env()?;
    config.log_redacted();

    let pool = groundswell_store::connect(&config.database_url).await?;
    groundswell_store::migrate(&pool).await?;

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

    let openai = Arc::new(
        ai_client::OpenAi::new(&config.openai_api_key, &config.chat_model)
            .with_embedding_model(&config.embedding_model),
    );
    let llm = Arc::new(LlmGate::new(
        openai.clone(),
        openai,
        config.max_requests_per_minute,
        config.max_tokens_per_minute,
        config.retry_attempts,
        Duration::from_millis(config.retry_delay_ms),
        cancel.clone(),
    ));

    let posts = Arc::new(PostRepo::new(pool.clone()));
    let deps = Arc::new(PipelineDeps {
        posts: posts.clone(),
        categories: Arc::new(CategoryRepo::new(pool.clone())),
        clusters: Arc::new(ClusterRepo::new(pool.clone())),
        mentions: Arc::new(MentionRepo::new(pool.clone())),
        audit: Arc::new(AuditLog::new(pool.clone())),
        llm,
        metrics: Arc::new(Metrics::new()),
        options: PipelineOptions {
            max_retries: config.retry_attempts as i32,
            cluster_similarity_threshold: config.cluster_similarity_threshold,
        },
        cancel: cancel.clone(),
    });

    let pipeline = Arc::new(Pipeline::new(deps.clone()));
    let queue = Arc::new(
        JobQueue::new(pool.clone(), QUEUE_NAME).with_max_attempts(config.retry_attempts as i32),
    );

    match cli.mode {
        Mode::Server => {
            let state = routes::AppState {
                queue,
                pipeline,
                environment: config.environment.clone(),
            };
            let app = routes::build_router(state);
            let addr = format!("0.0.0.0:{}", config.port);
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!(addr = addr.as_str(), "HTTP ingress listening");
            axum::serve(listener, app).await?;
        }
        Mode::Worker => {
            let refiller = Arc::new(QueueRefiller::new(queue.clone(), posts));
            run_worker(
                queue,
                pipeline,
                refiller,
                WorkerOptions {
                    concurrency: config.orch_concurrency,
                    ..WorkerOptions::default()
                },
                cancel,
            )
            .await?;
            deps.metrics.log_summary();
        }
        Mode::Maintain => {
            let recomputed = groundswell_pipeline::jobs::recompute_all(&deps.clusters).await?;
            let merged =
                groundswell_pipeline::jobs::merge_similar(&deps.clusters, MERGE_THRESHOLD).await?;
            let moved = groundswell_pipeline::jobs::reassign_outliers(
                &deps.posts,
                &deps.clusters,
                config.cluster_similarity_threshold,
                config.centroid_update_batch_size,
            )
            .await?;
            info!(recomputed, merged, moved, "Maintenance pass complete");
        }
    }

    Ok(())
}
