//! # Call Queue Engine
//!
//! An outbound-call dispatch, supervision, and result-reconciliation engine.
//! Accepts call jobs, schedules and rate-limits their dispatch through a
//! telephony provider, supervises each live call against the provider and a
//! voice-agent service, and reports a reconciled outcome to a backend sink
//! exactly once.
//!
//! ## Components
//!
//! - [`store`] — durable job storage, priority queues, scheduled index, active set.
//! - [`rate_limiter`] — global token-bucket admission control.
//! - [`telephony`] — the telephony provider adapter.
//! - [`agent`] — the voice-agent adapter.
//! - [`supervisor`] — per-call state machine and result reconciliation.
//! - [`dispatcher`] — worker pool, scheduled-call promoter, sweeper.
//! - [`api`] — the ingress contract other components submit jobs through.
//!
//! ## Quick start
//!
//! ```no_run
//! use call_queue_engine::{config::EngineConfig, server::EngineServer};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = EngineConfig::from_env()?;
//! let mut server = EngineServer::new(config).await?;
//! server.start().await?;
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod api;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod rate_limiter;
pub mod server;
pub mod store;
pub mod supervisor;
pub mod telephony;

/// Commonly used types, re-exported for downstream crates.
pub mod prelude {
    pub use crate::api::{EnqueueAck, IngressApi, JobSpec, QueueIngress, QueueMetrics};
    pub use crate::config::EngineConfig;
    pub use crate::error::{EngineError, Result};
    pub use crate::job::{CallJob, CallOutcome, CallResult, DataSource, JobStatus, Priority};
    pub use crate::server::EngineServer;
}
