//! # Voice-Agent Client
//!
//! Adapter around the voice-agent (bot) service, which handles in-call
//! conversation and produces transcripts/recordings. This is a best-effort
//! collaborator: it is polled opportunistically but never authoritative for
//! a call's termination. Built in the same reqwest-client shape as
//! [`crate::telephony`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("agent request failed: {0}")]
    Transient(String),
}

/// The C4 contract the supervisor depends on, so tests can substitute a
/// fake voice-agent without making real HTTP calls.
#[async_trait]
pub trait VoiceAgent: Send + Sync {
    async fn register(
        &self,
        job_id: &str,
        phone: &str,
        extras: &HashMap<String, Value>,
    ) -> Result<(), AgentError>;

    async fn status(&self, job_id: &str) -> Result<Option<AgentStatus>, AgentError>;
}

/// The agent's current view of a call.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentStatus {
    pub phase: String,
    #[serde(default)]
    pub transcript: Option<Value>,
    #[serde(default)]
    pub recording_ref: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl AgentStatus {
    /// Whether the agent considers the call to have reached a terminal phase.
    pub fn is_terminal_phase(&self) -> bool {
        matches!(self.phase.as_str(), "ended" | "completed" | "failed")
    }
}

/// Thin REST adapter for the voice-agent service.
#[derive(Clone)]
pub struct AgentClient {
    client: Client,
    base_url: String,
}

impl AgentClient {
    pub fn new(base_url: String, request_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("reqwest client builds with static config");
        Self { client, base_url }
    }

}

#[async_trait]
impl VoiceAgent for AgentClient {
    /// Tell the agent to expect an inbound media leg for this job. Best
    /// effort: callers should log and continue on failure rather than abort
    /// dispatch.
    async fn register(
        &self,
        job_id: &str,
        phone: &str,
        extras: &HashMap<String, Value>,
    ) -> Result<(), AgentError> {
        let url = format!("{}/calls/{}/register", self.base_url, job_id);
        let body = serde_json::json!({
            "call_id": job_id,
            "phone": phone,
            "config": extras,
        });

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Transient(format!("agent register failed: {e}")))?;

        if !res.status().is_success() {
            return Err(AgentError::Transient(format!(
                "agent register returned {}",
                res.status()
            )));
        }
        debug!(call_id = job_id, "agent registered");
        Ok(())
    }

    /// Fetch the agent's current view of a call. `Ok(None)` means
    /// not-yet-known, which is expected early in a call's life.
    async fn status(&self, job_id: &str) -> Result<Option<AgentStatus>, AgentError> {
        let url = format!("{}/calls/{}/status", self.base_url, job_id);
        let res = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AgentError::Transient(format!("agent status failed: {e}")))?;

        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !res.status().is_success() {
            return Err(AgentError::Transient(format!(
                "agent status returned {}",
                res.status()
            )));
        }

        let status: AgentStatus = res
            .json()
            .await
            .map_err(|e| AgentError::Transient(format!("bad agent response: {e}")))?;
        Ok(Some(status))
    }
}
