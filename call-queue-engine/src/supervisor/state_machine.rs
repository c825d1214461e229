//! Per-call state machine validity check.
//!
//! Mirrors the explicit `match (from, to) { ... }` transition validator used
//! elsewhere in this codebase's lineage for call-state tracking, narrowed to
//! this engine's states: Dispatching → Ringing → InProgress →
//! {Completed | Failed | Missed}.

use crate::job::JobStatus;

/// Whether a supervised call may move from `from` to `to`.
pub fn is_valid_transition(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;

    match (from, to) {
        (Pending, Scheduled) => true,
        (Pending, Dispatching) => true,
        (Scheduled, Pending) => true,
        (Scheduled, Cancelled) => true,

        (Dispatching, Ringing) => true,
        (Dispatching, InProgress) => true,
        (Dispatching, Completed) => true,
        (Dispatching, Failed) => true,
        (Dispatching, Missed) => true,
        (Dispatching, Pending) => true, // job-level retry re-enqueues

        (Ringing, InProgress) => true,
        (Ringing, Completed) => true,
        (Ringing, Failed) => true,
        (Ringing, Missed) => true,
        (Ringing, Pending) => true,

        (InProgress, Completed) => true,
        (InProgress, Failed) => true,
        (InProgress, Missed) => true,
        (InProgress, Pending) => true,

        // Terminal states accept no further transitions.
        (Completed, _) => false,
        (Failed, _) => false,
        (Missed, _) => false,
        (Cancelled, _) => false,

        _ => false,
    }
}
