use exfil_core::{AdmissionError, ParticipantId, QueueConfig, Timestamp};

use crate::Availability;

/// Outcome of polling the quick queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuickQueuePoll {
    /// Nobody is waiting.
    Idle,
    /// Fewer participants than required are waiting.
    Waiting {
        /// Participants waiting.
        waiting: u32,
        /// Participants required.
        required: u32,
    },
    /// Enough participants wait but no session slot is free.
    AtCapacity {
        /// Participants waiting.
        waiting: u32,
    },
    /// The countdown is running.
    CountingDown {
        /// Seconds until release.
        remaining_seconds: u64,
    },
    /// Everyone waiting leaves the lobby together.
    Release(Vec<ParticipantId>),
}

/// First-come lobby of individual participants released to the first template.
#[derive(Clone, Debug, Default)]
pub struct QuickQueue {
    members: Vec<ParticipantId>,
    countdown_started: Option<Timestamp>,
}

impl QuickQueue {
    /// Creates an empty lobby.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a participant to the lobby and returns how many are waiting.
    pub fn join<A>(
        &mut self,
        participant: ParticipantId,
        availability: &A,
    ) -> Result<u32, AdmissionError>
    where
        A: Availability + ?Sized,
    {
        if !availability.is_online(participant) {
            return Err(AdmissionError::Offline { participant });
        }
        if availability.in_session(participant) {
            return Err(AdmissionError::AlreadyInSession { participant });
        }
        if self.contains(participant) || availability.queued_elsewhere(participant) {
            return Err(AdmissionError::AlreadyQueued { participant });
        }
        self.members.push(participant);
        Ok(self.len())
    }

    /// Removes a participant; returns `false` when they were not waiting.
    pub fn leave(&mut self, participant: ParticipantId) -> bool {
        let before = self.members.len();
        self.members.retain(|member| *member != participant);
        before != self.members.len()
    }

    /// Reports whether the participant waits in the lobby.
    #[must_use]
    pub fn contains(&self, participant: ParticipantId) -> bool {
        self.members.contains(&participant)
    }

    /// Participants waiting, in arrival order.
    #[must_use]
    pub fn members(&self) -> &[ParticipantId] {
        &self.members
    }

    /// Number of participants waiting.
    #[must_use]
    pub fn len(&self) -> u32 {
        u32::try_from(self.members.len()).unwrap_or(u32::MAX)
    }

    /// Reports whether nobody is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Seconds left on a running countdown.
    #[must_use]
    pub fn countdown_remaining(&self, now: Timestamp, rules: &QueueConfig) -> Option<u64> {
        self.countdown_started.map(|started| {
            rules
                .effective_countdown_seconds()
                .saturating_sub(now.secs_since(started))
        })
    }

    /// Advances the lobby: starts or cancels the countdown and releases everyone
    /// once it expires. `slot_free` reports whether another session may start.
    ///
    /// The lobby waits for `rules.min_players` or `minimum`, whichever is larger.
    pub fn poll(
        &mut self,
        now: Timestamp,
        rules: &QueueConfig,
        minimum: u32,
        slot_free: bool,
    ) -> QuickQueuePoll {
        let waiting = self.len();
        let required = rules.min_players.max(minimum).max(1);
        if waiting == 0 {
            self.countdown_started = None;
            return QuickQueuePoll::Idle;
        }
        if waiting < required {
            self.countdown_started = None;
            return QuickQueuePoll::Waiting { waiting, required };
        }
        if !slot_free {
            return QuickQueuePoll::AtCapacity { waiting };
        }
        if !rules.auto_start {
            let _ = self.countdown_started.get_or_insert(now);
            if let Some(remaining_seconds) = self.countdown_remaining(now, rules) {
                if remaining_seconds > 0 {
                    return QuickQueuePoll::CountingDown { remaining_seconds };
                }
            }
        }
        self.countdown_started = None;
        QuickQueuePoll::Release(std::mem::take(&mut self.members))
    }

    /// Puts released participants back at the head of the lobby, in order.
    pub fn restore(&mut self, participants: Vec<ParticipantId>) {
        let mut restored: Vec<ParticipantId> = participants
            .into_iter()
            .filter(|participant| !self.members.contains(participant))
            .collect();
        restored.append(&mut self.members);
        self.members = restored;
    }

    /// Empties the lobby.
    pub fn clear(&mut self) -> Vec<ParticipantId> {
        self.countdown_started = None;
        std::mem::take(&mut self.members)
    }
}
