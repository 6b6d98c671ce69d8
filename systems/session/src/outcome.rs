use exfil_core::{EndReason, ExtractionMethod, ParticipantId, SessionId};

/// How a participant's part in a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Left alive with the loot.
    Extracted(ExtractionMethod),
    /// Died inside the instance.
    Died,
    /// Stayed away past the grace window.
    Forfeited,
    /// Was still inside when the clock ran out.
    TimedOut,
    /// Was still inside when the session was ended from outside.
    Ended(EndReason),
}

impl Outcome {
    /// Message shown to the participant.
    #[must_use]
    pub fn message(&self, session: SessionId) -> String {
        let id = session.get();
        match self {
            Self::Extracted(ExtractionMethod::Channel) => {
                format!("Raid #{id} extracted successfully. Loot secured.")
            }
            Self::Extracted(ExtractionMethod::Portal) => {
                format!("Raid #{id} extracted via exit portal. Loot secured.")
            }
            Self::Extracted(ExtractionMethod::Administrative) => {
                format!("Raid #{id} extracted (admin). Loot secured.")
            }
            Self::Died => format!("You died in Raid #{id}. All carried items lost."),
            Self::Forfeited => {
                format!("Forfeited Raid #{id} due to extended disconnect. Loot dropped.")
            }
            Self::TimedOut => format!("Raid #{id} failed (time)."),
            Self::Ended(_) => format!("Raid #{id} was ended."),
        }
    }
}

/// A participant that left the active roster or lost its session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Departure {
    /// Departing participant.
    pub participant: ParticipantId,
    /// How it ended for them.
    pub outcome: Outcome,
    /// Whether the message and relocation wait for the participant's return.
    pub deferred: bool,
}
