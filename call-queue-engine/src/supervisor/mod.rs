//! # Call Supervisor
//!
//! One instance runs per actively-dispatched job: it drives the job from
//! Dispatching through to a terminal [`CallResult`], then hands the result
//! either to the backend sink or, for a retryable Failed outcome, back to
//! the state store as a re-enqueued Pending job.
//!
//! Grounded on the orchestration-loop shape of the teacher's server
//! (background tasks driven by `tokio::time::interval`/`sleep`), with the
//! state-transition guard from [`state_machine`].

pub mod backoff;
pub mod sink;
pub mod state_machine;

use std::sync::Arc;
use std::time::Instant as StdInstant;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::agent::VoiceAgent;
use crate::config::SupervisorConfig;
use crate::job::{AttemptRecord, CallJob, CallOutcome, CallResult, DataSource, JobStatus};
use crate::store::{JobPatch, StateStore};
use crate::telephony::{MappedStatus, TelephonyProvider};
use sink::ResultSink;

/// Drives a single job's lifecycle from Dispatching to a terminal result.
pub struct Supervisor {
    store: Arc<StateStore>,
    telephony: Arc<dyn TelephonyProvider>,
    agent: Arc<dyn VoiceAgent>,
    sink: Arc<dyn ResultSink>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(
        store: Arc<StateStore>,
        telephony: Arc<dyn TelephonyProvider>,
        agent: Arc<dyn VoiceAgent>,
        sink: Arc<dyn ResultSink>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            store,
            telephony,
            agent,
            sink,
            config,
        }
    }

    /// Run the full supervision of `job` to completion. Never panics out of
    /// the caller's task; all failure paths resolve to a terminal CallJob
    /// update and a store release.
    #[instrument(skip(self, job), fields(call_id = %job.id))]
    pub async fn run(&self, mut job: CallJob) {
        let provider_uuid = match self.dispatch_entry(&mut job).await {
            Ok(uuid) => uuid,
            Err(result) => {
                self.finalize(job, result).await;
                return;
            }
        };

        let result = self.observe(&mut job, &provider_uuid).await;
        self.finalize(job, result).await;
    }

    /// Register with the agent (best-effort) then initiate with the
    /// provider, retrying transient failures with jittered backoff up to
    /// `max_status_retries`.
    async fn dispatch_entry(&self, job: &mut CallJob) -> Result<String, CallResult> {
        if let Err(e) = self.agent.register(&job.id, &job.phone_number, &job.call_config).await {
            warn!(call_id = %job.id, error = %e, "agent registration failed, continuing");
        }

        let answer_url = job.answer_url().unwrap_or_default().to_string();
        let mut attempt = 0u32;
        loop {
            match self
                .telephony
                .initiate(&job.phone_number, &answer_url, &job.call_config)
                .await
            {
                Ok((provider_uuid, mapped)) => {
                    self.record_attempt_started(job, &provider_uuid).await;
                    self.apply_status(job, &mapped, JobStatus::Dispatching).await;
                    return Ok(provider_uuid);
                }
                Err(e) if e.is_transient() && attempt < self.config.max_status_retries => {
                    let delay = backoff::delay_for_attempt(
                        attempt,
                        self.config.backoff_base,
                        self.config.backoff_cap,
                    );
                    warn!(call_id = %job.id, attempt, error = %e, ?delay, "transient initiate failure, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    info!(call_id = %job.id, error = %e, "initiate failed permanently or retries exhausted");
                    return Err(self.synthesize(
                        job,
                        CallOutcome::Failed,
                        Some("agent_unreachable".to_string()),
                        0,
                        DataSource::SupervisorSynthetic,
                    ));
                }
            }
        }
    }

    /// Poll the provider (and opportunistically the agent) until a terminal
    /// provider state, a stuck-call deadline, or provider-unreachable
    /// declaration is reached.
    async fn observe(&self, job: &mut CallJob, provider_uuid: &str) -> CallResult {
        tokio::time::sleep(self.config.initial_status_delay).await;

        let started = StdInstant::now();
        let mut consecutive_errors = 0u32;
        let mut last_agent_status = None;

        loop {
            if started.elapsed() >= self.config.stuck_call_deadline {
                warn!(call_id = %job.id, "stuck-call deadline exceeded, synthesizing miss");
                return self.synthesize(
                    job,
                    CallOutcome::Missed,
                    Some("no_answer_timeout".to_string()),
                    started.elapsed().as_secs() as i64,
                    DataSource::SupervisorSynthetic,
                );
            }

            match self.telephony.status(provider_uuid).await {
                Ok(mapped) => {
                    consecutive_errors = 0;
                    last_agent_status = self.poll_agent_opportunistically(job).await.or(last_agent_status);

                    if mapped.status.is_terminal() {
                        return self.reconcile(job, mapped, last_agent_status).await;
                    }
                    self.apply_status(job, &mapped, mapped.status).await;
                }
                Err(e) if e.is_transient() => {
                    consecutive_errors += 1;
                    debug!(call_id = %job.id, consecutive_errors, error = %e, "transient status poll error");
                    if consecutive_errors >= self.config.max_consecutive_poll_errors {
                        warn!(call_id = %job.id, "provider unreachable after repeated transient errors");
                        last_agent_status = self.poll_agent_opportunistically(job).await.or(last_agent_status);
                        return self.synthesize_from_agent_or_unknown(job, last_agent_status);
                    }
                }
                Err(e) => {
                    warn!(call_id = %job.id, error = %e, "permanent status poll error");
                    return self.synthesize(
                        job,
                        CallOutcome::Failed,
                        Some("provider_status_error".to_string()),
                        0,
                        DataSource::SupervisorSynthetic,
                    );
                }
            }

            tokio::time::sleep(self.config.status_check_interval).await;
        }
    }

    async fn poll_agent_opportunistically(
        &self,
        job: &CallJob,
    ) -> Option<crate::agent::AgentStatus> {
        match self.agent.status(&job.id).await {
            Ok(status) => status,
            Err(e) => {
                debug!(call_id = %job.id, error = %e, "agent poll failed, ignoring");
                None
            }
        }
    }

    /// Build the final CallResult once the provider has reported a terminal
    /// raw state, folding in the last-known agent snapshot.
    async fn reconcile(
        &self,
        job: &mut CallJob,
        mapped: MappedStatus,
        agent_status: Option<crate::agent::AgentStatus>,
    ) -> CallResult {
        let outcome = mapped.outcome.unwrap_or(CallOutcome::Failed);
        self.close_attempt(job, &mapped);

        CallResult {
            call_id: job.id.clone(),
            status: mapped.status,
            call_outcome: outcome,
            duration_seconds: mapped.duration_seconds,
            hangup_cause: mapped.hangup_cause,
            transcript: agent_status.as_ref().and_then(|a| a.transcript.clone()),
            recording_ref: agent_status.as_ref().and_then(|a| a.recording_ref.clone()),
            provider_data: Some(mapped.raw),
            agent_data: agent_status.map(|a| {
                serde_json::json!({ "phase": a.phase, "updated_at": a.updated_at })
            }),
            data_source: DataSource::ProviderPrimary,
            reported_at: None,
            reported_ok: false,
        }
    }

    /// Build a terminal result when the provider could not be reached at
    /// all, falling back to the agent's view if it has one.
    fn synthesize_from_agent_or_unknown(
        &self,
        job: &mut CallJob,
        agent_status: Option<crate::agent::AgentStatus>,
    ) -> CallResult {
        if let Some(status) = agent_status.filter(|a| a.is_terminal_phase()) {
            self.close_attempt_synthetic(job, "agent_only");
            return CallResult {
                call_id: job.id.clone(),
                status: JobStatus::Completed,
                call_outcome: CallOutcome::Completed,
                duration_seconds: 0,
                hangup_cause: None,
                transcript: status.transcript,
                recording_ref: status.recording_ref,
                provider_data: None,
                agent_data: Some(serde_json::json!({ "phase": status.phase })),
                data_source: DataSource::AgentOnly,
                reported_at: None,
                reported_ok: false,
            };
        }

        self.synthesize(
            job,
            CallOutcome::Failed,
            Some("provider_unreachable".to_string()),
            0,
            DataSource::SupervisorSynthetic,
        )
    }

    fn synthesize(
        &self,
        job: &mut CallJob,
        outcome: CallOutcome,
        hangup_cause: Option<String>,
        duration_seconds: i64,
        data_source: DataSource,
    ) -> CallResult {
        self.close_attempt_synthetic(job, hangup_cause.as_deref().unwrap_or("synthetic"));
        let status = match outcome {
            CallOutcome::Completed => JobStatus::Completed,
            CallOutcome::Missed | CallOutcome::Busy | CallOutcome::NoAnswer | CallOutcome::Timeout => {
                JobStatus::Missed
            }
            CallOutcome::Failed | CallOutcome::Rejected => JobStatus::Failed,
        };
        CallResult {
            call_id: job.id.clone(),
            status,
            call_outcome: outcome,
            duration_seconds,
            hangup_cause,
            transcript: None,
            recording_ref: None,
            provider_data: None,
            agent_data: None,
            data_source,
            reported_at: None,
            reported_ok: false,
        }
    }

    async fn record_attempt_started(&self, job: &mut CallJob, provider_uuid: &str) {
        let record = AttemptRecord {
            provider_uuid: Some(provider_uuid.to_string()),
            started_at: Utc::now(),
            ended_at: None,
            terminal_status: None,
            hangup_cause: None,
        };
        job.attempt_log.push(record.clone());
        let _ = self
            .store
            .update(
                &job.id,
                JobPatch {
                    append_attempt: Some(record),
                    ..Default::default()
                },
            )
            .await;
    }

    fn close_attempt(&self, job: &mut CallJob, mapped: &MappedStatus) {
        if let Some(last) = job.attempt_log.last_mut() {
            last.ended_at = Some(Utc::now());
            last.terminal_status = Some(mapped.status.as_str().to_string());
            last.hangup_cause = mapped.hangup_cause.clone();
        }
    }

    fn close_attempt_synthetic(&self, job: &mut CallJob, cause: &str) {
        if let Some(last) = job.attempt_log.last_mut() {
            last.ended_at = Some(Utc::now());
            last.terminal_status = Some("synthetic".to_string());
            last.hangup_cause = Some(cause.to_string());
        }
    }

    async fn apply_status(&self, job: &mut CallJob, _mapped: &MappedStatus, status: JobStatus) {
        if !state_machine::is_valid_transition(job.status, status) || job.status == status {
            return;
        }
        job.status = status;
        let _ = self
            .store
            .update(
                &job.id,
                JobPatch {
                    status: Some(status),
                    ..Default::default()
                },
            )
            .await;
    }

    /// Apply the job-level retry rule, then either re-enqueue or deliver.
    async fn finalize(&self, mut job: CallJob, mut result: CallResult) {
        if result.status == JobStatus::Failed && job.retry_count < job.max_retries {
            info!(call_id = %job.id, retry_count = job.retry_count, "failed call is retryable, re-enqueuing");
            job.retry_count += 1;
            let _ = self
                .store
                .update(
                    &job.id,
                    JobPatch {
                        status: Some(JobStatus::Pending),
                        retry_count: Some(job.retry_count),
                        ..Default::default()
                    },
                )
                .await;
            let _ = self.store.release(&job.id).await;
            return;
        }

        result.reported_ok = self.deliver_with_retry(&result).await;
        result.reported_at = Some(Utc::now());

        let _ = self
            .store
            .update(
                &job.id,
                JobPatch {
                    status: Some(result.status),
                    result: Some(result.clone()),
                    ..Default::default()
                },
            )
            .await;
        let _ = self.store.release(&job.id).await;
    }

    /// POST the result to the backend sink, retrying transient failures
    /// with the same backoff schedule as initiation.
    async fn deliver_with_retry(&self, result: &CallResult) -> bool {
        let mut attempt = 0u32;
        loop {
            match self.sink.deliver(result).await {
                Ok(()) => return true,
                Err(e) if e.is_transient() && attempt < self.config.max_delivery_retries => {
                    let delay = backoff::delay_for_attempt(
                        attempt,
                        self.config.backoff_base,
                        self.config.backoff_cap,
                    );
                    warn!(call_id = %result.call_id, attempt, error = %e, ?delay, "delivery failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(call_id = %result.call_id, error = %e, "delivery not retried, persisting reported_ok=false");
                    return false;
                }
            }
        }
    }
}
