//! # Ingress API
//!
//! The contract the engine exposes to whatever accepts call requests on its
//! behalf (an HTTP router, a gRPC service, a CLI). Modeled on the teacher's
//! thin client-wrapper-plus-builder shape; the transport itself (axum
//! routes, auth) is left to the embedding binary.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::job::{CallJob, JobStatus, Priority};
use crate::store::{PutOutcome, StateStore};

/// One call request as submitted by the upstream caller.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSpec {
    pub id: String,
    pub phone_number: String,
    pub campaign_id: String,
    #[serde(default)]
    pub call_config: HashMap<String, Value>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    3
}

/// Minimal acknowledgement returned on submission.
#[derive(Debug, Clone, Serialize)]
pub struct EnqueueAck {
    pub call_id: String,
    pub status: JobStatus,
}

/// Queue-wide health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct QueueMetrics {
    pub pending_by_priority: HashMap<Priority, i64>,
    pub scheduled_count: i64,
    pub active_count: i64,
}

/// The contract the engine implements for its ingress caller.
#[async_trait]
pub trait QueueIngress {
    async fn enqueue_one(&self, spec: JobSpec) -> Result<EnqueueAck>;
    async fn enqueue_bulk(&self, specs: Vec<JobSpec>) -> Result<Vec<EnqueueAck>>;
    async fn get_status(&self, call_id: &str) -> Result<Option<CallJob>>;
    async fn get_queue_metrics(&self) -> Result<QueueMetrics>;
}

/// Thin wrapper around the state store implementing [`QueueIngress`].
#[derive(Clone)]
pub struct IngressApi {
    store: std::sync::Arc<StateStore>,
}

impl IngressApi {
    pub fn new(store: std::sync::Arc<StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl QueueIngress for IngressApi {
    async fn enqueue_one(&self, spec: JobSpec) -> Result<EnqueueAck> {
        if spec.id.is_empty() {
            return Err(crate::error::EngineError::contract("job id is required"));
        }
        if spec.call_config.get("answer_url").and_then(Value::as_str).is_none() {
            return Err(crate::error::EngineError::contract(
                "call_config.answer_url is required",
            ));
        }

        let job = CallJob::new(
            spec.id.clone(),
            spec.phone_number,
            spec.campaign_id,
            spec.call_config,
            spec.priority,
            spec.scheduled_at,
            spec.max_retries,
        );

        let outcome = self.store.put(&job).await?;
        let status = match outcome {
            PutOutcome::Created => job.status,
            PutOutcome::Exists => {
                self.store
                    .get(&spec.id)
                    .await?
                    .map(|j| j.status)
                    .unwrap_or(job.status)
            }
        };

        Ok(EnqueueAck {
            call_id: spec.id,
            status,
        })
    }

    async fn enqueue_bulk(&self, specs: Vec<JobSpec>) -> Result<Vec<EnqueueAck>> {
        let mut acks = Vec::with_capacity(specs.len());
        for spec in specs {
            match self.enqueue_one(spec).await {
                Ok(ack) => acks.push(ack),
                Err(e) => {
                    tracing::warn!(error = %e, "rejecting one job in bulk submission");
                }
            }
        }
        Ok(acks)
    }

    async fn get_status(&self, call_id: &str) -> Result<Option<CallJob>> {
        self.store.get(call_id).await
    }

    async fn get_queue_metrics(&self) -> Result<QueueMetrics> {
        Ok(QueueMetrics {
            pending_by_priority: self.store.pending_counts().await?,
            scheduled_count: self.store.scheduled_count().await?,
            active_count: self.store.active_count().await?,
        })
    }
}
