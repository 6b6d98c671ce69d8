#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the raid orchestrator crates.
//!
//! Adapters and the scheduler talk to the world exclusively through [`Command`]
//! values; the world answers with [`Event`] values. Everything the orchestrator
//! needs from the host (instance engine, home locations, teams) is expressed
//! as a narrow trait in this crate.

mod config;
mod geometry;
mod template;
mod terrain;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use config::{
    CatalogSource, CleanupConfig, ConfigError, ExtractionConfig, GenerationConfig,
    HeartbeatConfig, OrchestratorConfig, QueueConfig, SessionConfig, SessionRules,
    SpawnSafetyConfig, TemplateSpec, GRACE_FRACTION_PERCENT,
};
pub use geometry::{BlockPos, Boundary, HeightRange, Location, CELLS_PER_AREA_UNIT};
pub use template::{
    CenterFeatureRule, CenterSiteRule, EnvironmentKind, ExtractionUnlock, FeatureKind,
    PlayerBounds, Template, TemplateCatalog, TemplateId, TemplateOverrides, UnlockKind,
};
pub use terrain::{
    FactoryError, HomeResolver, Instance, InstanceFactory, Material, Team, TeamDirectory,
    Terrain,
};

/// Prefix shared by the storage names of every raid instance.
pub const INSTANCE_NAME_PREFIX: &str = "exfil_raid_";

/// Unique identifier assigned to a participant by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(u64);

impl ParticipantId {
    /// Creates a new participant identifier.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the identifier.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Unique identifier of a session, also used to name its instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    /// Creates a new session identifier.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the identifier.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Storage name of the instance backing this session.
    #[must_use]
    pub fn instance_name(&self) -> String {
        format!("{INSTANCE_NAME_PREFIX}{}", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Wall-clock instant measured in whole seconds.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp from seconds.
    #[must_use]
    pub const fn from_secs(seconds: u64) -> Self {
        Self(seconds)
    }

    /// Seconds represented by the timestamp.
    #[must_use]
    pub const fn as_secs(&self) -> u64 {
        self.0
    }

    /// Timestamp `seconds` later, saturating at the maximum.
    #[must_use]
    pub const fn plus_secs(&self, seconds: u64) -> Self {
        Self(self.0.saturating_add(seconds))
    }

    /// Seconds elapsed since `earlier`, zero when `earlier` is in the future.
    #[must_use]
    pub const fn secs_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

/// Opaque item carried by a participant; only snapshotted and dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarriedItem {
    kind: String,
    count: u32,
}

impl CarriedItem {
    /// Creates an item stack.
    #[must_use]
    pub fn new(kind: impl Into<String>, count: u32) -> Self {
        Self {
            kind: kind.into(),
            count,
        }
    }

    /// Item kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Stack size.
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }
}

/// Reasons the admission queue refuses a request.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The participant or a teammate is inside a running session.
    #[error("{participant} is already in a raid")]
    AlreadyInSession {
        /// Participant found in a session.
        participant: ParticipantId,
    },
    /// The participant or a teammate already waits in a queue.
    #[error("{participant} is already queued")]
    AlreadyQueued {
        /// Participant found in a queue.
        participant: ParticipantId,
    },
    /// The team exceeds the template's per-team limit.
    #[error("team of {size} exceeds the limit of {max} per team")]
    TeamTooLarge {
        /// Team size after filtering.
        size: u32,
        /// Largest admissible team.
        max: u32,
    },
    /// The requester is not connected.
    #[error("{participant} is offline")]
    Offline {
        /// Offline requester.
        participant: ParticipantId,
    },
    /// No template with this id is offered.
    #[error("unknown raid template `{0}`")]
    UnknownTemplate(TemplateId),
}

/// Feedback about a template queue after a change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct QueueFeedback {
    /// Players currently queued.
    pub players: u32,
    /// Teams currently queued.
    pub teams: u32,
    /// Players required to start.
    pub min_players: u32,
    /// Teams required to start.
    pub min_teams: u32,
}

impl QueueFeedback {
    /// Additional players needed before a release can fire.
    #[must_use]
    pub const fn needed_players(&self) -> u32 {
        self.min_players.saturating_sub(self.players)
    }

    /// Additional teams needed before a release can fire.
    #[must_use]
    pub const fn needed_teams(&self) -> u32 {
        self.min_teams.saturating_sub(self.teams)
    }
}

/// Why a generation attempt was discarded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GenerationFailure {
    /// The factory asked to be retried later.
    FactoryUnavailable(String),
    /// The factory refused the request.
    FactoryFailed(String),
    /// No centre site passed the density check.
    NoCenterSite,
    /// Too much of the sampled area was unsuitable terrain.
    TerrainUnsuitable,
    /// A globally required feature could not be located.
    MissingFeature(FeatureKind),
    /// No centre candidate lay within the centre radius.
    MissingCenterFeature,
    /// The attempt panicked and was rolled back.
    Fault,
}

impl fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FactoryUnavailable(reason) => write!(f, "factory unavailable: {reason}"),
            Self::FactoryFailed(reason) => write!(f, "factory failed: {reason}"),
            Self::NoCenterSite => f.write_str("no qualifying centre site"),
            Self::TerrainUnsuitable => f.write_str("terrain unsuitable"),
            Self::MissingFeature(feature) => write!(f, "missing feature {feature}"),
            Self::MissingCenterFeature => f.write_str("no centre feature near the centre"),
            Self::Fault => f.write_str("unexpected fault"),
        }
    }
}

/// How a participant left a session alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ExtractionMethod {
    /// Channelled at the extraction point.
    Channel,
    /// Entered an exit portal.
    Portal,
    /// Extracted by an administrator.
    Administrative,
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum EndReason {
    /// The duration elapsed.
    Timeout,
    /// The active roster emptied.
    Completed,
    /// An administrator ended it.
    Administrative,
    /// The orchestrator is shutting down.
    Shutdown,
}

/// Sessions targeted by an administrative force-end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForceEndTarget {
    /// Every live session.
    All,
    /// The session a participant is in.
    Participant(ParticipantId),
}

/// Sessions targeted by an administrative unlock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnlockTarget {
    /// Every session running this template.
    Template(TemplateId),
    /// The session a participant is in.
    Participant(ParticipantId),
}

/// Commands that mutate the authoritative world state.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Advances the world to `now`.
    Tick {
        /// Current wall-clock time.
        now: Timestamp,
    },
    /// A participant connected to the host.
    Connect {
        /// Connecting participant.
        participant: ParticipantId,
    },
    /// A participant disconnected from the host.
    Disconnect {
        /// Disconnecting participant.
        participant: ParticipantId,
        /// Last known location.
        location: Location,
        /// Items carried at the moment of leaving.
        items: Vec<CarriedItem>,
    },
    /// Reports where a participant currently stands.
    ReportPosition {
        /// Moving participant.
        participant: ParticipantId,
        /// Current location.
        location: Location,
    },
    /// A participant died.
    Died {
        /// Dead participant.
        participant: ParticipantId,
    },
    /// A participant respawned after death.
    Respawned {
        /// Respawning participant.
        participant: ParticipantId,
    },
    /// A participant selected a template; their team queues with them.
    JoinQueue {
        /// Selected template.
        template: TemplateId,
        /// Requesting participant.
        participant: ParticipantId,
    },
    /// A participant joined the quick queue.
    JoinQuickQueue {
        /// Requesting participant.
        participant: ParticipantId,
    },
    /// A participant left whatever queue they are in, with their whole team.
    LeaveQueue {
        /// Leaving participant.
        participant: ParticipantId,
    },
    /// A participant stepped into an exit portal.
    EnterExitPortal {
        /// Participant in the portal.
        participant: ParticipantId,
    },
    /// The boss of an instance was defeated.
    BossDefeated {
        /// Storage name of the instance.
        instance: String,
    },
    /// Starts a session without waiting for admission thresholds.
    ForceStart {
        /// Template to start; the busiest or first template when absent.
        template: Option<TemplateId>,
        /// Administrator issuing the command.
        initiator: ParticipantId,
    },
    /// Ends matching sessions.
    ForceEnd {
        /// Sessions to end.
        target: ForceEndTarget,
    },
    /// Extracts a participant immediately.
    ForceExtract {
        /// Participant to extract.
        participant: ParticipantId,
        /// Clears a previous death before extracting.
        treat_as_alive: bool,
    },
    /// Opens extraction for matching sessions.
    Unlock {
        /// Sessions to unlock; every live session when absent.
        target: Option<UnlockTarget>,
    },
    /// Deletes stored instances no live registry entry refers to.
    PruneStale,
    /// Replaces the template catalog.
    ReloadTemplates {
        /// Freshly loaded catalog.
        catalog: TemplateCatalog,
    },
    /// Ends every session and tears every instance down.
    Shutdown,
}

/// Events emitted by the world after processing commands.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Time advanced to `now`.
    TimeAdvanced {
        /// New current time.
        now: Timestamp,
    },
    /// A team joined a template queue.
    QueueJoined {
        /// Template queued for.
        template: TemplateId,
        /// Members that entered the queue.
        participants: Vec<ParticipantId>,
        /// Queue accounting after the join.
        feedback: QueueFeedback,
    },
    /// A team left a queue.
    QueueLeft {
        /// Template the team waited for.
        template: TemplateId,
        /// Members that left.
        participants: Vec<ParticipantId>,
    },
    /// A queue request was refused.
    AdmissionRejected {
        /// Requesting participant.
        participant: ParticipantId,
        /// Reason for the refusal.
        reason: AdmissionError,
    },
    /// The quick queue changed.
    QuickQueueUpdated {
        /// Participants currently waiting.
        waiting: u32,
        /// Participants required to start.
        required: u32,
        /// Seconds until release when a countdown runs.
        countdown: Option<u64>,
    },
    /// A cohort left the queue and generation started.
    CohortReleased {
        /// Session id reserved for the cohort.
        session: SessionId,
        /// Template being generated.
        template: TemplateId,
        /// Every participant in the cohort.
        participants: Vec<ParticipantId>,
    },
    /// A release was postponed because the concurrency cap is reached.
    ReleaseDeferred {
        /// Template whose release was postponed.
        template: TemplateId,
        /// Live sessions plus pending generations.
        active: u32,
    },
    /// The staged generator located or missed one feature.
    FeatureSearched {
        /// Session being generated.
        session: SessionId,
        /// Feature searched for.
        feature: FeatureKind,
        /// Whether it was found.
        found: bool,
        /// Position in the search, starting at one.
        step: u32,
        /// Number of searches in the attempt.
        total: u32,
    },
    /// A generation attempt was discarded.
    GenerationAttemptFailed {
        /// Session being generated.
        session: SessionId,
        /// Attempt number, starting at one.
        attempt: u32,
        /// Why the attempt failed.
        failure: GenerationFailure,
    },
    /// Generation gave up; the cohort is dissolved.
    GenerationAbandoned {
        /// Session that will never start.
        session: SessionId,
        /// Template that failed.
        template: TemplateId,
        /// Cohort members to notify.
        participants: Vec<ParticipantId>,
        /// Attempts made.
        attempts: u32,
    },
    /// A session started.
    SessionStarted {
        /// New session id.
        session: SessionId,
        /// Template in use.
        template: TemplateId,
        /// Storage name of the instance.
        instance: String,
        /// Participants placed in the instance.
        participants: Vec<ParticipantId>,
        /// Extraction point.
        extraction: Location,
    },
    /// A participant must be moved.
    ParticipantRelocated {
        /// Participant to move.
        participant: ParticipantId,
        /// Instance holding the destination; `None` for the host's own world.
        instance: Option<String>,
        /// Destination.
        to: Location,
    },
    /// A participant receives a compass pointing at the extraction point.
    CompassIssued {
        /// Receiving participant.
        participant: ParticipantId,
        /// Target of the compass.
        target: Location,
    },
    /// Progress display shown to a participant.
    ProgressAttached {
        /// Session displayed.
        session: SessionId,
        /// Viewer.
        participant: ParticipantId,
    },
    /// Progress display removed from a participant.
    ProgressDetached {
        /// Session displayed.
        session: SessionId,
        /// Viewer.
        participant: ParticipantId,
    },
    /// Progress display updated.
    ProgressUpdated {
        /// Session displayed.
        session: SessionId,
        /// Elapsed share of the duration, in `0.0..=1.0`.
        fraction: f64,
        /// Seconds left.
        remaining_seconds: u64,
        /// Whether the display is in its critical state.
        critical: bool,
    },
    /// Extraction opened.
    ExtractionOpened {
        /// Session whose extraction opened.
        session: SessionId,
    },
    /// Visual cue at an open extraction point.
    ExtractionBeacon {
        /// Session.
        session: SessionId,
        /// Point to mark.
        point: Location,
        /// Channel radius.
        radius: f64,
        /// Configured cue name.
        beacon: String,
    },
    /// A participant channelled for one more second.
    ChannelProgress {
        /// Session.
        session: SessionId,
        /// Channelling participant.
        participant: ParticipantId,
        /// Seconds left before extraction.
        remaining_seconds: u32,
    },
    /// The final phase started.
    FinalPhase {
        /// Session.
        session: SessionId,
        /// Seconds left.
        remaining_seconds: u64,
    },
    /// A participant extracted.
    ParticipantExtracted {
        /// Session.
        session: SessionId,
        /// Extracted participant.
        participant: ParticipantId,
        /// How the participant left.
        method: ExtractionMethod,
    },
    /// A participant died in a session.
    ParticipantDied {
        /// Session.
        session: SessionId,
        /// Dead participant.
        participant: ParticipantId,
    },
    /// A participant disconnected while in a session.
    ParticipantDisconnected {
        /// Session.
        session: SessionId,
        /// Absent participant.
        participant: ParticipantId,
    },
    /// A participant reconnected within the grace window.
    ParticipantRejoined {
        /// Session.
        session: SessionId,
        /// Returning participant.
        participant: ParticipantId,
        /// Seconds spent away.
        absent_seconds: u64,
    },
    /// A participant forfeited after staying away too long.
    ParticipantForfeited {
        /// Session.
        session: SessionId,
        /// Forfeiting participant.
        participant: ParticipantId,
    },
    /// Items must be dropped at a location.
    ItemsDropped {
        /// Former owner.
        participant: ParticipantId,
        /// Drop location.
        at: Location,
        /// Dropped stacks.
        items: Vec<CarriedItem>,
    },
    /// A participant's held items must be cleared.
    InventoryCleared {
        /// Affected participant.
        participant: ParticipantId,
    },
    /// A participant is killed because the session timed out.
    ParticipantFailed {
        /// Session.
        session: SessionId,
        /// Failed participant.
        participant: ParticipantId,
    },
    /// A spawn-protection notice.
    ProtectionNotice {
        /// Session.
        session: SessionId,
        /// Protected participant.
        participant: ParticipantId,
        /// Seconds of protection left.
        remaining_seconds: u64,
    },
    /// Text addressed to a participant.
    Notice {
        /// Recipient.
        participant: ParticipantId,
        /// Message text.
        text: String,
    },
    /// A session ended.
    SessionEnded {
        /// Ended session.
        session: SessionId,
        /// Why it ended.
        reason: EndReason,
    },
    /// Instance teardown was scheduled.
    TeardownScheduled {
        /// Ended session.
        session: SessionId,
        /// Instance to tear down.
        instance: String,
        /// When teardown runs.
        at: Timestamp,
    },
    /// An instance was torn down.
    InstanceTornDown {
        /// Removed instance.
        instance: String,
        /// Whether backing storage was deleted.
        deleted: bool,
    },
    /// Stale stored instances were deleted.
    StaleInstancesPruned {
        /// Deleted instance names.
        removed: Vec<String>,
    },
    /// The template catalog was replaced.
    TemplatesReloaded {
        /// Templates now offered.
        count: u32,
    },
    /// An administrative force-end finished.
    SessionsForceEnded {
        /// Number of sessions ended.
        count: u32,
    },
    /// A session step panicked and was rolled back.
    SessionFaulted {
        /// Faulting session.
        session: SessionId,
        /// Step that faulted.
        stage: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_names_its_instance() {
        let id = SessionId::new(42);
        assert_eq!(id.instance_name(), "exfil_raid_42");
        assert!(id.instance_name().starts_with(INSTANCE_NAME_PREFIX));
    }

    #[test]
    fn timestamps_saturate() {
        let start = Timestamp::from_secs(10);
        assert_eq!(start.secs_since(Timestamp::from_secs(15)), 0);
        assert_eq!(start.plus_secs(u64::MAX).as_secs(), u64::MAX);
        assert_eq!(Timestamp::from_secs(70).secs_since(start), 60);
    }

    #[test]
    fn queue_feedback_counts_missing_entries() {
        let feedback = QueueFeedback {
            players: 1,
            teams: 1,
            min_players: 2,
            min_teams: 3,
        };
        assert_eq!(feedback.needed_players(), 1);
        assert_eq!(feedback.needed_teams(), 2);
    }

    #[test]
    fn participant_ids_serialize_as_plain_numbers() {
        let id = ParticipantId::new(9);
        let encoded = toml::to_string(&std::collections::BTreeMap::from([("id", id)]))
            .expect("serialize");
        assert!(encoded.contains("id = 9"));
    }
}
