use std::collections::{BTreeMap, BTreeSet};

use exfil_core::{ParticipantId, SessionId};
use exfil_system_admission::{AdmissionQueue, Availability, QuickQueue};
use exfil_system_session::Session;

use crate::{PendingGeneration, World};

/// Borrowed view of who is online, busy or queued.
///
/// Built from disjoint fields so a queue can be mutated while the other
/// registries are consulted.
pub(crate) struct Presence<'a> {
    pub(crate) online: &'a BTreeSet<ParticipantId>,
    pub(crate) mapped: &'a BTreeMap<ParticipantId, SessionId>,
    pub(crate) sessions: &'a BTreeMap<SessionId, Session>,
    pub(crate) jobs: &'a [PendingGeneration],
    pub(crate) queue: Option<&'a AdmissionQueue>,
    pub(crate) quick: Option<&'a QuickQueue>,
}

impl Availability for Presence<'_> {
    fn is_online(&self, participant: ParticipantId) -> bool {
        self.online.contains(&participant)
    }

    fn in_session(&self, participant: ParticipantId) -> bool {
        self.mapped
            .get(&participant)
            .is_some_and(|session| self.sessions.contains_key(session))
            || self
                .jobs
                .iter()
                .any(|pending| pending.participants.contains(&participant))
    }

    fn queued_elsewhere(&self, participant: ParticipantId) -> bool {
        self.queue.is_some_and(|queue| queue.is_queued(participant))
            || self.quick.is_some_and(|quick| quick.contains(participant))
    }
}

impl World {
    fn presence(&self) -> Presence<'_> {
        Presence {
            online: &self.online,
            mapped: &self.participant_sessions,
            sessions: &self.sessions,
            jobs: &self.jobs,
            queue: Some(&self.queue),
            quick: Some(&self.quick),
        }
    }
}

impl Availability for World {
    fn is_online(&self, participant: ParticipantId) -> bool {
        self.presence().is_online(participant)
    }

    fn in_session(&self, participant: ParticipantId) -> bool {
        self.presence().in_session(participant)
    }

    fn queued_elsewhere(&self, participant: ParticipantId) -> bool {
        self.presence().queued_elsewhere(participant)
    }
}
