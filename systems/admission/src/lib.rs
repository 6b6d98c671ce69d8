#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Admission control: per-template team queues, cohort release and the
//! catalog-less quick queue.

mod queue;
mod quick;

use exfil_core::ParticipantId;

pub use queue::{AdmissionQueue, Cohort, QueueStatus, QueuedTeam};
pub use quick::{QuickQueue, QuickQueuePoll};

/// Read-only view of participant presence consulted on admission.
pub trait Availability {
    /// Reports whether the participant is connected.
    fn is_online(&self, participant: ParticipantId) -> bool;

    /// Reports whether the participant belongs to a running session.
    fn in_session(&self, participant: ParticipantId) -> bool;

    /// Reports whether the participant waits in a queue the caller does not own.
    fn queued_elsewhere(&self, _participant: ParticipantId) -> bool {
        false
    }
}
