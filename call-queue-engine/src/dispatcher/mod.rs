//! # Dispatcher
//!
//! Owns the worker pool, the scheduled-call promoter, and the sweeper.
//! Grounded on the teacher's server start/stop lifecycle: background tasks
//! stored as `JoinHandle`s and aborted on stop.

pub mod promoter;
pub mod sweeper;
pub mod worker;

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::info;

use crate::agent::VoiceAgent;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::rate_limiter::RateLimiter;
use crate::store::StateStore;
use crate::supervisor::sink::ResultSink;
use crate::supervisor::Supervisor;
use crate::telephony::TelephonyProvider;

/// Runs the worker pool plus its two background loops until [`Dispatcher::stop`].
pub struct Dispatcher {
    store: Arc<StateStore>,
    rate_limiter: Arc<RateLimiter>,
    telephony: Arc<dyn TelephonyProvider>,
    agent: Arc<dyn VoiceAgent>,
    sink: Arc<dyn ResultSink>,
    config: EngineConfig,
    worker_handles: Vec<JoinHandle<()>>,
    promoter_handle: Option<JoinHandle<()>>,
    sweeper_handle: Option<JoinHandle<()>>,
    concurrency_gate: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<StateStore>,
        telephony: Arc<dyn TelephonyProvider>,
        agent: Arc<dyn VoiceAgent>,
        sink: Arc<dyn ResultSink>,
        config: EngineConfig,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.dispatch.rate_limit_per_second));
        let concurrency_gate = Arc::new(Semaphore::new(config.dispatch.max_concurrent_calls));
        Self {
            store,
            rate_limiter,
            telephony,
            agent,
            sink,
            config,
            worker_handles: Vec::new(),
            promoter_handle: None,
            sweeper_handle: None,
            concurrency_gate,
        }
    }

    /// Start the worker pool and both background loops.
    pub async fn start(&mut self) -> Result<()> {
        info!(
            workers = self.config.dispatch.queue_workers,
            max_concurrent = self.config.dispatch.max_concurrent_calls,
            "starting dispatcher"
        );

        for i in 0..self.config.dispatch.queue_workers {
            let name = format!("worker-{i}");
            let store = self.store.clone();
            let rate_limiter = self.rate_limiter.clone();
            let gate = self.concurrency_gate.clone();
            let telephony = self.telephony.clone();
            let agent = self.agent.clone();
            let sink = self.sink.clone();
            let supervisor_config = self.config.supervisor.clone();

            let factory = Arc::new(move || {
                Supervisor::new(
                    store.clone(),
                    telephony.clone(),
                    agent.clone(),
                    sink.clone(),
                    supervisor_config.clone(),
                )
            });

            let store_for_worker = self.store.clone();
            let handle = tokio::spawn(worker::worker_loop(
                name,
                store_for_worker,
                rate_limiter,
                factory,
                gate,
            ));
            self.worker_handles.push(handle);
        }

        let promoter_store = self.store.clone();
        self.promoter_handle = Some(tokio::spawn(promoter::promoter_loop(
            promoter_store,
            self.config.dispatch.promoter_interval,
        )));

        let sweeper_store = self.store.clone();
        let sweeper_sink = self.sink.clone();
        self.sweeper_handle = Some(tokio::spawn(sweeper::sweeper_loop(
            sweeper_store,
            sweeper_sink,
            self.config.dispatch.sweeper_interval,
            self.config.dispatch.hard_deadline,
            self.config.dispatch.stuck_threshold,
        )));

        Ok(())
    }

    /// Abort all background tasks. In-flight supervisions are not waited on;
    /// they will run to their own natural terminal or stuck-call timeout.
    pub async fn stop(&mut self) {
        info!("stopping dispatcher");
        for handle in self.worker_handles.drain(..) {
            handle.abort();
        }
        if let Some(handle) = self.promoter_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.sweeper_handle.take() {
            handle.abort();
        }
    }

    /// Number of permits currently available in the concurrency gate, for
    /// diagnostics.
    pub fn available_capacity(&self) -> usize {
        self.concurrency_gate.available_permits()
    }
}
