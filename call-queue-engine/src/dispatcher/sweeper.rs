//! Sweeper: a second line of defense behind the supervisor's own stuck-call
//! check, for calls whose supervisor has crashed or hung. Force-completes
//! any active job whose `active_since` predates `hard_deadline` and whose
//! `updated_at` is older than `stuck_threshold`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;
use tracing::{info, warn};

use crate::job::{CallOutcome, CallResult, DataSource, JobStatus};
use crate::store::{JobPatch, StateStore};
use crate::supervisor::sink::ResultSink;

pub async fn sweeper_loop(
    store: Arc<StateStore>,
    sink: Arc<dyn ResultSink>,
    tick: Duration,
    hard_deadline: Duration,
    stuck_threshold: Duration,
) {
    let mut ticker = interval(tick);
    loop {
        ticker.tick().await;
        let now = Utc::now();
        let stuck = match store
            .scan_active(|job| {
                let age = now.signed_duration_since(job.updated_at);
                age > chrono::Duration::from_std(stuck_threshold).unwrap_or_default()
                    && !job.status.is_terminal()
            })
            .await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "sweeper scan_active failed");
                continue;
            }
        };

        for job in stuck {
            let alive_for = now.signed_duration_since(job.created_at);
            if alive_for < chrono::Duration::from_std(hard_deadline).unwrap_or_default() {
                continue;
            }

            warn!(call_id = %job.id, "sweeper force-completing stuck call");
            let mut result = deliverable(&job.id);
            result.reported_ok = sink.deliver(&result).await.is_ok();
            result.reported_at = Some(Utc::now());

            if let Err(e) = store
                .update(
                    &job.id,
                    JobPatch {
                        status: Some(JobStatus::Missed),
                        result: Some(result),
                        ..Default::default()
                    },
                )
                .await
            {
                warn!(call_id = %job.id, error = %e, "sweeper failed to mark job missed");
                continue;
            }
            let _ = store.release(&job.id).await;
            info!(call_id = %job.id, "sweeper released stuck call as missed");
        }
    }
}

fn deliverable(call_id: &str) -> CallResult {
    CallResult {
        call_id: call_id.to_string(),
        status: JobStatus::Missed,
        call_outcome: CallOutcome::Missed,
        duration_seconds: 0,
        hangup_cause: Some("no_answer_timeout".to_string()),
        transcript: None,
        recording_ref: None,
        provider_data: None,
        agent_data: None,
        data_source: DataSource::SupervisorSynthetic,
        reported_at: None,
        reported_ok: false,
    }
}
