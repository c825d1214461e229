//! One worker loop: acquire a rate-limit token, pop one ready job, spawn a
//! Supervisor for it, and wait for that supervisor to release the job
//! before looping.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::rate_limiter::RateLimiter;
use crate::store::StateStore;
use crate::supervisor::Supervisor;

/// Runs until cancelled. `concurrency_gate` enforces `max_concurrent_calls`
/// across the whole worker pool, independent of worker count.
pub async fn worker_loop(
    name: String,
    store: Arc<StateStore>,
    rate_limiter: Arc<RateLimiter>,
    supervisor_factory: Arc<dyn Fn() -> Supervisor + Send + Sync>,
    concurrency_gate: Arc<Semaphore>,
) {
    info!(worker = %name, "dispatcher worker started");
    loop {
        let permit = concurrency_gate.clone().acquire_owned().await;
        let permit = match permit {
            Ok(p) => p,
            Err(_) => return, // semaphore closed: shutdown
        };

        rate_limiter.acquire().await;

        let popped = match store.pop_ready(1, &name).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(worker = %name, error = %e, "pop_ready failed");
                drop(permit);
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                continue;
            }
        };

        let Some(job) = popped.into_iter().next() else {
            drop(permit);
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            continue;
        };

        debug!(worker = %name, call_id = %job.id, "dispatching job");
        let supervisor = supervisor_factory();
        let handle = tokio::spawn(async move { supervisor.run(job).await });
        let _ = handle.await;
        drop(permit);
    }
}
