//! End-to-end supervision tests against fake collaborators. These exercise
//! the full `Supervisor::run` lifecycle without any real HTTP calls, using
//! an in-memory state store and scripted `TelephonyProvider`/`VoiceAgent`/
//! `ResultSink` fakes.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use call_queue_engine::config::SupervisorConfig;
use call_queue_engine::job::{CallJob, CallOutcome, CallResult, JobStatus, Priority};
use call_queue_engine::store::StateStore;
use call_queue_engine::supervisor::sink::{ResultSink, SinkError};
use call_queue_engine::supervisor::Supervisor;
use call_queue_engine::telephony::{MappedStatus, TelephonyError, TelephonyProvider};
use call_queue_engine::agent::{AgentError, AgentStatus, VoiceAgent};
use parking_lot::Mutex;
use serde_json::Value;

fn mapped(status: JobStatus, outcome: Option<CallOutcome>, duration_seconds: i64) -> MappedStatus {
    MappedStatus {
        status,
        outcome,
        hangup_cause: None,
        duration_seconds,
        raw: serde_json::json!({}),
    }
}

/// Scripted telephony provider: one fixed `initiate` script, and a queue of
/// `status` results consumed in order. Once the status queue is empty the
/// last entry repeats, so a supervisor's poll loop never runs dry.
struct ScriptedTelephony {
    initiate_script: Mutex<VecDeque<Result<(String, MappedStatus), TelephonyError>>>,
    status_script: Mutex<Vec<Result<MappedStatus, TelephonyError>>>,
    status_cursor: Mutex<usize>,
}

impl ScriptedTelephony {
    fn new(
        initiate_script: Vec<Result<(String, MappedStatus), TelephonyError>>,
        status_script: Vec<Result<MappedStatus, TelephonyError>>,
    ) -> Self {
        Self {
            initiate_script: Mutex::new(initiate_script.into()),
            status_script: Mutex::new(status_script),
            status_cursor: Mutex::new(0),
        }
    }
}

fn clone_mapped(m: &MappedStatus) -> MappedStatus {
    MappedStatus {
        status: m.status,
        outcome: m.outcome,
        hangup_cause: m.hangup_cause.clone(),
        duration_seconds: m.duration_seconds,
        raw: m.raw.clone(),
    }
}

fn clone_telephony_err(e: &TelephonyError) -> TelephonyError {
    match e {
        TelephonyError::Transient(s) => TelephonyError::Transient(s.clone()),
        TelephonyError::Permanent(s) => TelephonyError::Permanent(s.clone()),
    }
}

#[async_trait]
impl TelephonyProvider for ScriptedTelephony {
    async fn initiate(
        &self,
        _phone: &str,
        _answer_url: &str,
        _extras: &HashMap<String, Value>,
    ) -> Result<(String, MappedStatus), TelephonyError> {
        self.initiate_script
            .lock()
            .pop_front()
            .expect("initiate script exhausted")
    }

    async fn status(&self, _provider_uuid: &str) -> Result<MappedStatus, TelephonyError> {
        let script = self.status_script.lock();
        let mut cursor = self.status_cursor.lock();
        let idx = (*cursor).min(script.len() - 1);
        *cursor += 1;
        match &script[idx] {
            Ok(m) => Ok(clone_mapped(m)),
            Err(e) => Err(clone_telephony_err(e)),
        }
    }
}

/// Voice-agent fake: never has a view of the call, which is the common
/// case for a provider-driven test. Registration always succeeds.
struct SilentAgent;

#[async_trait]
impl VoiceAgent for SilentAgent {
    async fn register(
        &self,
        _job_id: &str,
        _phone: &str,
        _extras: &HashMap<String, Value>,
    ) -> Result<(), AgentError> {
        Ok(())
    }

    async fn status(&self, _job_id: &str) -> Result<Option<AgentStatus>, AgentError> {
        Ok(None)
    }
}

/// Sink fake that records every delivered result and can be scripted to
/// fail the first `fail_count` calls with a transient error.
struct RecordingSink {
    delivered: Mutex<Vec<CallResult>>,
    fail_count: Mutex<u32>,
}

impl RecordingSink {
    fn new(fail_count: u32) -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            fail_count: Mutex::new(fail_count),
        }
    }

    fn delivered(&self) -> Vec<CallResult> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn deliver(&self, result: &CallResult) -> Result<(), SinkError> {
        let mut remaining = self.fail_count.lock();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(SinkError::Transient("sink temporarily unavailable".into()));
        }
        self.delivered.lock().push(result.clone());
        Ok(())
    }
}

fn fast_supervisor_config() -> SupervisorConfig {
    SupervisorConfig {
        initial_status_delay: Duration::from_millis(5),
        status_check_interval: Duration::from_millis(5),
        request_timeout: Duration::from_secs(1),
        max_status_retries: 2,
        stuck_call_deadline: Duration::from_millis(60),
        min_connected_seconds: 5,
        max_consecutive_poll_errors: 3,
        max_delivery_retries: 2,
        backoff_base: Duration::from_millis(2),
        backoff_cap: Duration::from_millis(10),
    }
}

async fn fresh_job(store: &StateStore, id: &str, max_retries: u32) -> CallJob {
    let mut call_config = HashMap::new();
    call_config.insert(
        "answer_url".to_string(),
        Value::String("https://agent.example.com/answer".into()),
    );
    let job = CallJob::new(
        id,
        "+15550001000",
        "campaign-a",
        call_config,
        Priority::Normal,
        None,
        max_retries,
    );
    store.put(&job).await.unwrap();
    job
}

#[tokio::test]
async fn happy_path_reports_completed() {
    let store = Arc::new(StateStore::new_in_memory().await.unwrap());
    let job = fresh_job(&store, "call-happy", 3).await;

    let telephony = Arc::new(ScriptedTelephony::new(
        vec![Ok((
            "prov-1".to_string(),
            mapped(JobStatus::Dispatching, None, 0),
        ))],
        vec![
            Ok(mapped(JobStatus::Ringing, None, 0)),
            Ok(mapped(JobStatus::InProgress, None, 0)),
            Ok(mapped(JobStatus::Completed, Some(CallOutcome::Completed), 42)),
        ],
    ));
    let agent = Arc::new(SilentAgent);
    let sink = Arc::new(RecordingSink::new(0));

    let supervisor = Supervisor::new(
        store.clone(),
        telephony,
        agent,
        sink.clone(),
        fast_supervisor_config(),
    );
    supervisor.run(job).await;

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].call_outcome, CallOutcome::Completed);
    assert_eq!(delivered[0].duration_seconds, 42);

    let stored = store.get("call-happy").await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
}

#[tokio::test]
async fn quick_completion_is_reclassified_missed() {
    let store = Arc::new(StateStore::new_in_memory().await.unwrap());
    let job = fresh_job(&store, "call-quick", 3).await;

    let telephony = Arc::new(ScriptedTelephony::new(
        vec![Ok((
            "prov-2".to_string(),
            mapped(JobStatus::Dispatching, None, 0),
        ))],
        vec![Ok(mapped(JobStatus::Completed, Some(CallOutcome::Missed), 1))],
    ));
    let agent = Arc::new(SilentAgent);
    let sink = Arc::new(RecordingSink::new(0));

    let supervisor = Supervisor::new(
        store.clone(),
        telephony,
        agent,
        sink.clone(),
        fast_supervisor_config(),
    );
    supervisor.run(job).await;

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].call_outcome, CallOutcome::Missed);
}

#[tokio::test]
async fn stuck_call_is_synthesized_as_missed_after_deadline() {
    let store = Arc::new(StateStore::new_in_memory().await.unwrap());
    let job = fresh_job(&store, "call-stuck", 3).await;

    // Every poll comes back non-terminal; the stuck-call deadline must fire.
    let telephony = Arc::new(ScriptedTelephony::new(
        vec![Ok((
            "prov-3".to_string(),
            mapped(JobStatus::Dispatching, None, 0),
        ))],
        vec![Ok(mapped(JobStatus::Ringing, None, 0))],
    ));
    let agent = Arc::new(SilentAgent);
    let sink = Arc::new(RecordingSink::new(0));

    let supervisor = Supervisor::new(
        store.clone(),
        telephony,
        agent,
        sink.clone(),
        fast_supervisor_config(),
    );
    supervisor.run(job).await;

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].call_outcome, CallOutcome::Missed);
    assert_eq!(delivered[0].hangup_cause.as_deref(), Some("no_answer_timeout"));
}

#[tokio::test]
async fn transient_poll_errors_recover_before_the_error_ceiling() {
    let store = Arc::new(StateStore::new_in_memory().await.unwrap());
    let job = fresh_job(&store, "call-transient", 3).await;

    let telephony = Arc::new(ScriptedTelephony::new(
        vec![Ok((
            "prov-4".to_string(),
            mapped(JobStatus::Dispatching, None, 0),
        ))],
        vec![
            Err(TelephonyError::Transient("upstream hiccup".into())),
            Err(TelephonyError::Transient("upstream hiccup".into())),
            Ok(mapped(JobStatus::Completed, Some(CallOutcome::Completed), 20)),
        ],
    ));
    let agent = Arc::new(SilentAgent);
    let sink = Arc::new(RecordingSink::new(0));

    let supervisor = Supervisor::new(
        store.clone(),
        telephony,
        agent,
        sink.clone(),
        fast_supervisor_config(),
    );
    supervisor.run(job).await;

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].call_outcome, CallOutcome::Completed);
}

#[tokio::test]
async fn initiate_retries_transient_failures_then_succeeds() {
    let store = Arc::new(StateStore::new_in_memory().await.unwrap());
    let job = fresh_job(&store, "call-initiate-retry", 3).await;

    let telephony = Arc::new(ScriptedTelephony::new(
        vec![
            Err(TelephonyError::Transient("busy trunk".into())),
            Ok((
                "prov-5".to_string(),
                mapped(JobStatus::Dispatching, None, 0),
            )),
        ],
        vec![Ok(mapped(JobStatus::Completed, Some(CallOutcome::Completed), 15))],
    ));
    let agent = Arc::new(SilentAgent);
    let sink = Arc::new(RecordingSink::new(0));

    let supervisor = Supervisor::new(
        store.clone(),
        telephony,
        agent,
        sink.clone(),
        fast_supervisor_config(),
    );
    supervisor.run(job).await;

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].call_outcome, CallOutcome::Completed);
}

#[tokio::test]
async fn initiate_permanent_failure_with_no_retries_left_is_delivered_failed() {
    let store = Arc::new(StateStore::new_in_memory().await.unwrap());
    // max_retries = 0: the job-level retry rule in `finalize` must not
    // re-enqueue, so this terminal Failed result should be delivered.
    let job = fresh_job(&store, "call-dead-on-arrival", 0).await;

    let telephony = Arc::new(ScriptedTelephony::new(
        vec![Err(TelephonyError::Permanent("number blocked".into()))],
        vec![Ok(mapped(JobStatus::Ringing, None, 0))],
    ));
    let agent = Arc::new(SilentAgent);
    let sink = Arc::new(RecordingSink::new(0));

    let supervisor = Supervisor::new(
        store.clone(),
        telephony,
        agent,
        sink.clone(),
        fast_supervisor_config(),
    );
    supervisor.run(job).await;

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].call_outcome, CallOutcome::Failed);

    let stored = store.get("call-dead-on-arrival").await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
}

#[tokio::test]
async fn failed_job_with_retries_remaining_is_reenqueued_instead_of_delivered() {
    let store = Arc::new(StateStore::new_in_memory().await.unwrap());
    let job = fresh_job(&store, "call-retryable", 3).await;

    let telephony = Arc::new(ScriptedTelephony::new(
        vec![Err(TelephonyError::Permanent("number blocked".into()))],
        vec![Ok(mapped(JobStatus::Ringing, None, 0))],
    ));
    let agent = Arc::new(SilentAgent);
    let sink = Arc::new(RecordingSink::new(0));

    let supervisor = Supervisor::new(
        store.clone(),
        telephony,
        agent,
        sink.clone(),
        fast_supervisor_config(),
    );
    supervisor.run(job).await;

    // Retryable: never delivered, job goes back to Pending with retry_count bumped.
    assert!(sink.delivered().is_empty());
    let stored = store.get("call-retryable").await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.retry_count, 1);
}

#[tokio::test]
async fn delivery_survives_transient_sink_failures() {
    let store = Arc::new(StateStore::new_in_memory().await.unwrap());
    let job = fresh_job(&store, "call-sink-retry", 3).await;

    let telephony = Arc::new(ScriptedTelephony::new(
        vec![Ok((
            "prov-6".to_string(),
            mapped(JobStatus::Dispatching, None, 0),
        ))],
        vec![Ok(mapped(JobStatus::Completed, Some(CallOutcome::Completed), 30))],
    ));
    let agent = Arc::new(SilentAgent);
    // Fails the first two delivery attempts, succeeds on the third.
    let sink = Arc::new(RecordingSink::new(2));

    let supervisor = Supervisor::new(
        store.clone(),
        telephony,
        agent,
        sink.clone(),
        fast_supervisor_config(),
    );
    supervisor.run(job).await;

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);

    let stored = store.get("call-sink-retry").await.unwrap().unwrap();
    assert!(stored.result.unwrap().reported_ok);
}
