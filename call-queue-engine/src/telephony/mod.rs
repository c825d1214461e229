//! # Telephony Provider Client
//!
//! Adapter around the outbound telephony provider's REST API: initiate a
//! call and poll its status by provider UUID. Modeled on the
//! `basic_auth` + form-encoded-body reqwest pattern used by the pack's
//! Twilio-style client, but with a proper error taxonomy instead of
//! `&'static str`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::job::{CallOutcome, JobStatus};

#[derive(Error, Debug)]
pub enum TelephonyError {
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("permanent provider error: {0}")]
    Permanent(String),
}

impl TelephonyError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// The C3 contract the supervisor depends on, so tests can substitute a
/// fake provider without making real HTTP calls.
#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    async fn initiate(
        &self,
        phone: &str,
        answer_url: &str,
        extras: &HashMap<String, Value>,
    ) -> Result<(String, MappedStatus), TelephonyError>;

    async fn status(&self, provider_uuid: &str) -> Result<MappedStatus, TelephonyError>;
}

/// Internal state mapping of a provider status poll.
#[derive(Debug, Clone)]
pub struct MappedStatus {
    pub status: JobStatus,
    pub outcome: Option<CallOutcome>,
    pub hangup_cause: Option<String>,
    pub duration_seconds: i64,
    pub raw: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct ProviderCallResponse {
    uuid: String,
    status: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ProviderStatusResponse {
    status: String,
    #[serde(default)]
    hangup_cause: Option<String>,
    #[serde(default)]
    duration_seconds: i64,
    #[serde(default)]
    answered: bool,
}

/// Thin REST adapter for the telephony provider.
#[derive(Clone)]
pub struct TelephonyClient {
    client: Client,
    config: ProviderConfig,
    min_connected_seconds: i64,
}

impl TelephonyClient {
    pub fn new(config: ProviderConfig, request_timeout: Duration, min_connected_seconds: i64) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("reqwest client builds with static config");
        Self {
            client,
            config,
            min_connected_seconds,
        }
    }

    /// Map a provider raw state string to the engine's internal status,
    /// per the table in the call-supervision contract.
    fn map_raw_state(
        &self,
        raw_state: &str,
        hangup_cause: Option<String>,
        duration_seconds: i64,
        _answered: bool,
    ) -> MappedStatus {
        let raw = serde_json::json!({
            "raw_state": raw_state,
            "hangup_cause": hangup_cause,
            "duration_seconds": duration_seconds,
        });

        let (status, outcome) = match raw_state {
            "queued" | "initiated" => (JobStatus::Dispatching, None),
            "ringing" => (JobStatus::Ringing, None),
            "in-progress" => (JobStatus::InProgress, None),
            "completed" if duration_seconds >= self.min_connected_seconds => {
                (JobStatus::Completed, Some(CallOutcome::Completed))
            }
            "completed" => (JobStatus::Completed, Some(CallOutcome::Missed)),
            "busy" => (JobStatus::Missed, Some(CallOutcome::Busy)),
            "no-answer" => (JobStatus::Missed, Some(CallOutcome::NoAnswer)),
            "failed" => (JobStatus::Failed, Some(CallOutcome::Failed)),
            "rejected" => (JobStatus::Failed, Some(CallOutcome::Rejected)),
            other => {
                warn!(raw_state = other, "unrecognized provider raw state");
                (JobStatus::Dispatching, None)
            }
        };

        let effective_cause = match raw_state {
            "busy" => Some("busy".to_string()),
            "no-answer" => Some("no_answer".to_string()),
            _ => hangup_cause,
        };

        MappedStatus {
            status,
            outcome,
            hangup_cause: effective_cause,
            duration_seconds,
            raw,
        }
    }
}

#[async_trait]
impl TelephonyProvider for TelephonyClient {
    /// Place an outbound call. Returns the provider's UUID and initial status
    /// mapping on success.
    async fn initiate(
        &self,
        phone: &str,
        answer_url: &str,
        extras: &HashMap<String, Value>,
    ) -> Result<(String, MappedStatus), TelephonyError> {
        let url = format!("{}/Calls", self.config.base_url);

        let mut form: HashMap<String, String> = HashMap::new();
        form.insert("From".to_string(), self.config.outbound_number.clone());
        form.insert("To".to_string(), phone.to_string());
        form.insert("AnswerUrl".to_string(), answer_url.to_string());
        for (k, v) in extras {
            if let Some(s) = v.as_str() {
                form.insert(k.clone(), s.to_string());
            }
        }

        let res = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_id, Some(&self.config.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| TelephonyError::Transient(format!("request to provider failed: {e}")))?;

        let status = res.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TelephonyError::Transient(format!(
                "provider returned {status}"
            )));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, body, "provider rejected initiate");
            return Err(TelephonyError::Permanent(format!(
                "provider rejected call: {status}"
            )));
        }

        let parsed: ProviderCallResponse = res
            .json()
            .await
            .map_err(|e| TelephonyError::Transient(format!("bad provider response: {e}")))?;

        let mapped = self.map_raw_state(&parsed.status, None, 0, false);
        debug!(uuid = %parsed.uuid, status = %parsed.status, "call initiated");
        Ok((parsed.uuid, mapped))
    }

    /// Poll the current status of a call by provider UUID.
    async fn status(&self, provider_uuid: &str) -> Result<MappedStatus, TelephonyError> {
        let url = format!("{}/Calls/{}", self.config.base_url, provider_uuid);
        let res = self
            .client
            .get(&url)
            .basic_auth(&self.config.account_id, Some(&self.config.auth_token))
            .send()
            .await
            .map_err(|e| TelephonyError::Transient(format!("status request failed: {e}")))?;

        let status_code = res.status();
        if status_code.is_server_error() || status_code == StatusCode::TOO_MANY_REQUESTS {
            return Err(TelephonyError::Transient(format!(
                "provider returned {status_code}"
            )));
        }
        if !status_code.is_success() {
            return Err(TelephonyError::Permanent(format!(
                "provider returned {status_code}"
            )));
        }

        let parsed: ProviderStatusResponse = res
            .json()
            .await
            .map_err(|e| TelephonyError::Transient(format!("bad provider response: {e}")))?;

        Ok(self.map_raw_state(
            &parsed.status,
            parsed.hangup_cause.clone(),
            parsed.duration_seconds,
            parsed.answered,
        ))
    }
}
