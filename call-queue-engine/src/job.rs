use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Call priority. Ordering is `Urgent > High > Normal > Low`; strictly higher
/// priorities starve lower ones, by design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Urgent,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];
}

/// Lifecycle status of a [`CallJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Scheduled,
    Dispatching,
    Ringing,
    InProgress,
    Completed,
    Failed,
    Missed,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses are never overwritten once reached.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Missed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Dispatching => "dispatching",
            JobStatus::Ringing => "ringing",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Missed => "missed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => JobStatus::Pending,
            "scheduled" => JobStatus::Scheduled,
            "dispatching" => JobStatus::Dispatching,
            "ringing" => JobStatus::Ringing,
            "in_progress" => JobStatus::InProgress,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "missed" => JobStatus::Missed,
            "cancelled" => JobStatus::Cancelled,
            _ => return None,
        })
    }
}

/// One attempt at initiating and carrying a call through to a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub provider_uuid: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub terminal_status: Option<String>,
    pub hangup_cause: Option<String>,
}

/// The unit of work the engine dispatches, supervises and eventually reports on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallJob {
    pub id: String,
    pub phone_number: String,
    pub campaign_id: String,
    pub call_config: HashMap<String, Value>,
    pub priority: Priority,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub max_retries: u32,
    pub retry_count: u32,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub attempt_log: Vec<AttemptRecord>,
    pub result: Option<CallResult>,
}

impl CallJob {
    /// Construct a new Pending (or Scheduled, if `scheduled_at` is set) job.
    pub fn new(
        id: impl Into<String>,
        phone_number: impl Into<String>,
        campaign_id: impl Into<String>,
        call_config: HashMap<String, Value>,
        priority: Priority,
        scheduled_at: Option<DateTime<Utc>>,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        let status = if scheduled_at.is_some() {
            JobStatus::Scheduled
        } else {
            JobStatus::Pending
        };
        Self {
            id: id.into(),
            phone_number: phone_number.into(),
            campaign_id: campaign_id.into(),
            call_config,
            priority,
            scheduled_at,
            max_retries,
            retry_count: 0,
            status,
            created_at: now,
            updated_at: now,
            attempt_log: Vec::new(),
            result: None,
        }
    }

    pub fn answer_url(&self) -> Option<&str> {
        self.call_config.get("answer_url").and_then(Value::as_str)
    }
}

/// Final, user-visible outcome of a call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallOutcome {
    Completed,
    Missed,
    Failed,
    Busy,
    NoAnswer,
    Rejected,
    Timeout,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Completed => "completed",
            CallOutcome::Missed => "missed",
            CallOutcome::Failed => "failed",
            CallOutcome::Busy => "busy",
            CallOutcome::NoAnswer => "no_answer",
            CallOutcome::Rejected => "rejected",
            CallOutcome::Timeout => "timeout",
        }
    }
}

/// Where the fields of a [`CallResult`] were sourced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    ProviderPrimary,
    AgentOnly,
    SupervisorSynthetic,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::ProviderPrimary => "provider_primary",
            DataSource::AgentOnly => "agent_only",
            DataSource::SupervisorSynthetic => "supervisor_synthetic",
        }
    }
}

/// The reconciled, reportable result of a single call job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResult {
    pub call_id: String,
    pub status: JobStatus,
    pub call_outcome: CallOutcome,
    pub duration_seconds: i64,
    pub hangup_cause: Option<String>,
    pub transcript: Option<Value>,
    pub recording_ref: Option<String>,
    pub provider_data: Option<Value>,
    pub agent_data: Option<Value>,
    pub data_source: DataSource,
    pub reported_at: Option<DateTime<Utc>>,
    pub reported_ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_is_urgent_first() {
        let mut ps = vec![Priority::Low, Priority::Urgent, Priority::Normal, Priority::High];
        ps.sort();
        assert_eq!(ps, vec![Priority::Low, Priority::Normal, Priority::High, Priority::Urgent]);
    }

    #[test]
    fn new_job_without_schedule_is_pending() {
        let job = CallJob::new("a1", "+15550001", "camp", HashMap::new(), Priority::Normal, None, 3);
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn new_job_with_schedule_is_scheduled() {
        let at = Utc::now() + chrono::Duration::seconds(10);
        let job = CallJob::new("a2", "+15550001", "camp", HashMap::new(), Priority::Normal, Some(at), 3);
        assert_eq!(job.status, JobStatus::Scheduled);
    }

    #[test]
    fn terminal_statuses_are_identified() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Missed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Ringing.is_terminal());
    }
}
