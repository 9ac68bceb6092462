//! Queue worker loop: claim, process, complete/fail, refill.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use groundswell_store::JobQueue;

use crate::pipeline::Pipeline;
use crate::refiller::QueueRefiller;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub concurrency: usize,
    /// Sleep when the queue is empty.
    pub idle_sleep: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            idle_sleep: Duration::from_secs(2),
        }
    }
}

/// Consume the queue until cancelled. Multiple posts run in parallel up to
/// `concurrency`; each post's own stages stay sequential inside the
/// pipeline.
pub async fn run_worker(
    queue: Arc<JobQueue>,
    pipeline: Arc<Pipeline>,
    refiller: Arc<QueueRefiller>,
    options: WorkerOptions,
    cancel: Arc<AtomicBool>,
) -> Result<()> {
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    info!(concurrency = options.concurrency, "Worker started");

    while !cancel.load(Ordering::Relaxed) {
        let job = match queue.claim().await {
            Ok(Some(job)) => job,
            Ok(None) => {
                if let Err(e) = refiller.maybe_refill().await {
                    warn!(error = %e, "Refill failed");
                }
                tokio::time::sleep(options.idle_sleep).await;
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Queue claim failed");
                tokio::time::sleep(options.idle_sleep).await;
                continue;
            }
        };

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("worker semaphore closed");

        let queue = queue.clone();
        let pipeline = pipeline.clone();
        let refiller = refiller.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let job_id = job.id;
            let post_id = job.post.id.clone();

            match pipeline.process(job.post).await {
                Ok(outcome) => {
                    info!(job_id, post_id = post_id.as_str(), ?outcome, "Job complete");
                    if let Err(e) = queue.complete(job_id).await {
                        warn!(job_id, error = %e, "Failed to complete job");
                    }
                    // Completion is the natural moment to check queue depth.
                    if let Err(e) = refiller.maybe_refill().await {
                        warn!(error = %e, "Refill failed");
                    }
                }
                Err(e) => {
                    warn!(job_id, post_id = post_id.as_str(), error = %e, "Job failed");
                    if let Err(fail_err) = queue.fail(job_id, &e.to_string()).await {
                        warn!(job_id, error = %fail_err, "Failed to record job failure");
                    }
                }
            }
        });
    }

    // Drain in-flight jobs before returning.
    let _ = semaphore.acquire_many(options.concurrency.max(1) as u32).await;
    info!("Worker stopped");
    Ok(())
}
