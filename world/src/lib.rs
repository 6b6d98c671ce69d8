#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Authoritative orchestrator state for exfil raids.
//!
//! The [`World`] owns every global registry: live sessions, the participant
//! to session map, admission queues, pending generation jobs and scheduled
//! teardowns. It changes only through [`apply`] and is read through
//! [`query`]. Host services are injected as [`Collaborators`].

mod admin;
mod admission;
mod generation;
mod lifecycle;
mod presence;

use std::collections::{BTreeMap, BTreeSet};

use exfil_core::{
    Command, Event, ExtractionMethod, HomeResolver, Instance, InstanceFactory, Location,
    OrchestratorConfig, ParticipantId, SessionId, TeamDirectory, TemplateCatalog, Timestamp,
};
use exfil_system_admission::{AdmissionQueue, QuickQueue};
use exfil_system_generation::GenerationJob;
use exfil_system_session::{Outcome, Session};

/// Host services the world drives.
pub struct Collaborators {
    /// Creates, unloads and deletes instances.
    pub factory: Box<dyn InstanceFactory>,
    /// Resolves where participants return to.
    pub homes: Box<dyn HomeResolver>,
    /// Resolves team membership on admission.
    pub teams: Box<dyn TeamDirectory>,
}

struct PendingGeneration {
    job: GenerationJob,
    participants: Vec<ParticipantId>,
}

struct Teardown {
    instance: Box<dyn Instance>,
    at: Timestamp,
}

#[derive(Clone, Copy, Debug)]
struct PendingOutcome {
    session: SessionId,
    outcome: Outcome,
}

/// Represents the authoritative orchestrator state.
pub struct World {
    config: OrchestratorConfig,
    catalog: TemplateCatalog,
    factory: Box<dyn InstanceFactory>,
    homes: Box<dyn HomeResolver>,
    teams: Box<dyn TeamDirectory>,
    now: Timestamp,
    next_session: u64,
    online: BTreeSet<ParticipantId>,
    queue: AdmissionQueue,
    quick: QuickQueue,
    jobs: Vec<PendingGeneration>,
    sessions: BTreeMap<SessionId, Session>,
    instances: BTreeMap<SessionId, Box<dyn Instance>>,
    participant_sessions: BTreeMap<ParticipantId, SessionId>,
    teardowns: Vec<Teardown>,
    outcomes: BTreeMap<ParticipantId, PendingOutcome>,
}

impl World {
    /// Creates an idle world offering `catalog`.
    #[must_use]
    pub fn new(
        config: OrchestratorConfig,
        catalog: TemplateCatalog,
        collaborators: Collaborators,
    ) -> Self {
        let Collaborators {
            factory,
            homes,
            teams,
        } = collaborators;
        Self {
            config,
            catalog,
            factory,
            homes,
            teams,
            now: Timestamp::default(),
            next_session: 1,
            online: BTreeSet::new(),
            queue: AdmissionQueue::new(),
            quick: QuickQueue::new(),
            jobs: Vec::new(),
            sessions: BTreeMap::new(),
            instances: BTreeMap::new(),
            participant_sessions: BTreeMap::new(),
            teardowns: Vec::new(),
            outcomes: BTreeMap::new(),
        }
    }

    fn tick(&mut self, now: Timestamp, out_events: &mut Vec<Event>) {
        self.now = self.now.max(now);
        out_events.push(Event::TimeAdvanced { now: self.now });

        self.run_teardowns(out_events);
        self.advance_generation(out_events);
        self.tick_sessions(out_events);
        self.release_ready(out_events);
    }

    fn home_of(&self, participant: ParticipantId) -> Location {
        self.homes
            .resolve_home(participant)
            .unwrap_or_else(|| self.homes.fallback())
    }

    fn active_count(&self) -> u32 {
        u32::try_from(self.sessions.len() + self.jobs.len()).unwrap_or(u32::MAX)
    }

    fn slot_free(&self) -> bool {
        self.active_count() < self.config.queue.max_concurrent_sessions
    }
}

/// Applies the provided command to the world, mutating state deterministically.
pub fn apply(world: &mut World, command: Command, out_events: &mut Vec<Event>) {
    match command {
        Command::Tick { now } => world.tick(now, out_events),
        Command::Connect { participant } => {
            let _ = world.online.insert(participant);
            world.participant_returned(participant, out_events);
        }
        Command::Disconnect {
            participant,
            location,
            items,
        } => world.participant_left(participant, location, items, out_events),
        Command::ReportPosition {
            participant,
            location,
        } => world.report_position(participant, location),
        Command::Died { participant } => world.participant_died(participant, out_events),
        Command::Respawned { participant } => world.participant_returned(participant, out_events),
        Command::JoinQueue {
            template,
            participant,
        } => world.join_queue(&template, participant, out_events),
        Command::JoinQuickQueue { participant } => world.join_quick_queue(participant, out_events),
        Command::LeaveQueue { participant } => world.leave_queue(participant, out_events),
        Command::EnterExitPortal { participant } => {
            world.extract(participant, ExtractionMethod::Portal, out_events);
        }
        Command::BossDefeated { instance } => world.boss_defeated(&instance, out_events),
        Command::ForceStart {
            template,
            initiator,
        } => world.force_start(template.as_ref(), initiator, out_events),
        Command::ForceEnd { target } => world.force_end(target, out_events),
        Command::ForceExtract {
            participant,
            treat_as_alive,
        } => world.force_extract(participant, treat_as_alive, out_events),
        Command::Unlock { target } => world.unlock(target.as_ref(), out_events),
        Command::PruneStale => world.prune_stale(out_events),
        Command::ReloadTemplates { catalog } => world.reload_templates(catalog, out_events),
        Command::Shutdown => world.shutdown(out_events),
    }
}

/// Query functions that provide read-only access to the world state.
pub mod query {
    use exfil_core::{
        Instance, OrchestratorConfig, ParticipantId, SessionId, TemplateCatalog, TemplateId,
        Timestamp,
    };
    use exfil_system_admission::{Availability, QueueStatus};
    use exfil_system_session::{Outcome, Session};
    use serde::Serialize;

    use super::World;

    /// One line of the live session listing.
    #[derive(Clone, Debug, PartialEq, Eq, Serialize)]
    pub struct SessionSummary {
        /// Session id.
        pub id: SessionId,
        /// Template the session runs.
        pub template: TemplateId,
        /// Participants still on the active roster.
        pub active: u32,
        /// Participants ever placed.
        pub total: u32,
        /// Seconds until timeout.
        pub remaining_seconds: u64,
        /// Participants extracted.
        pub extracted: u32,
        /// Participants dead or forfeited.
        pub dead: u32,
    }

    impl SessionSummary {
        /// Remaining time as `mm:ss`.
        #[must_use]
        pub fn remaining_display(&self) -> String {
            format_clock(self.remaining_seconds)
        }
    }

    /// What a participant sees about its own session.
    #[derive(Clone, Debug, PartialEq, Eq, Serialize)]
    pub struct ParticipantStatus {
        /// Session id.
        pub session: SessionId,
        /// Template the session runs.
        pub template: TemplateId,
        /// Seconds until timeout.
        pub remaining_seconds: u64,
        /// Whether spawn protection still holds.
        pub protected: bool,
        /// Whether extraction is open.
        pub extraction_unlocked: bool,
        /// Channel seconds left for the participant.
        pub channel_remaining: Option<u32>,
    }

    /// Snapshot of every waiting list.
    #[derive(Clone, Debug, PartialEq, Eq, Serialize)]
    pub struct QueueOverview {
        /// Non-empty template queues.
        pub templates: Vec<QueueStatus>,
        /// Participants in the quick queue.
        pub quick_waiting: u32,
        /// Seconds until the quick queue releases, when counting down.
        pub quick_countdown: Option<u64>,
    }

    /// Formats seconds as `mm:ss`.
    #[must_use]
    pub fn format_clock(seconds: u64) -> String {
        format!("{:02}:{:02}", seconds / 60, seconds % 60)
    }

    /// Current world time.
    #[must_use]
    pub fn now(world: &World) -> Timestamp {
        world.now
    }

    /// Configuration the world runs with.
    #[must_use]
    pub fn config(world: &World) -> &OrchestratorConfig {
        &world.config
    }

    /// Templates currently offered.
    #[must_use]
    pub fn catalog(world: &World) -> &TemplateCatalog {
        &world.catalog
    }

    /// Live sessions ordered by id.
    #[must_use]
    pub fn sessions(world: &World) -> Vec<SessionSummary> {
        world
            .sessions
            .values()
            .map(|session| SessionSummary {
                id: session.id(),
                template: session.template().clone(),
                active: count(session.active_roster().len()),
                total: count(session.participants().len()),
                remaining_seconds: session.remaining_seconds(world.now),
                extracted: count(session.extracted().len()),
                dead: count(session.dead().len()),
            })
            .collect()
    }

    /// Looks up a live session.
    #[must_use]
    pub fn session(world: &World, id: SessionId) -> Option<&Session> {
        world.sessions.get(&id)
    }

    /// Live session the participant is mapped to.
    #[must_use]
    pub fn session_of(world: &World, participant: ParticipantId) -> Option<SessionId> {
        world
            .participant_sessions
            .get(&participant)
            .copied()
            .filter(|session| world.sessions.contains_key(session))
    }

    /// Status line of a participant's session.
    #[must_use]
    pub fn participant_status(world: &World, participant: ParticipantId) -> Option<ParticipantStatus> {
        let session = world.sessions.get(&session_of(world, participant)?)?;
        Some(ParticipantStatus {
            session: session.id(),
            template: session.template().clone(),
            remaining_seconds: session.remaining_seconds(world.now),
            protected: session.is_protected(world.now),
            extraction_unlocked: session.is_extraction_unlocked(world.now),
            channel_remaining: session.channel_remaining(participant),
        })
    }

    /// Template and quick queue occupancy.
    #[must_use]
    pub fn queue_status(world: &World) -> QueueOverview {
        QueueOverview {
            templates: world.queue.status(),
            quick_waiting: world.quick.len(),
            quick_countdown: world
                .quick
                .countdown_remaining(world.now, &world.config.queue),
        }
    }

    /// Online participants neither queued nor in a session.
    #[must_use]
    pub fn available_participants(world: &World) -> Vec<ParticipantId> {
        world
            .online
            .iter()
            .copied()
            .filter(|participant| {
                !world.in_session(*participant) && !world.queued_elsewhere(*participant)
            })
            .collect()
    }

    /// Reports whether the participant is connected.
    #[must_use]
    pub fn is_online(world: &World, participant: ParticipantId) -> bool {
        world.online.contains(&participant)
    }

    /// Outcome waiting for the participant's return.
    #[must_use]
    pub fn pending_outcome(world: &World, participant: ParticipantId) -> Option<Outcome> {
        world
            .outcomes
            .get(&participant)
            .map(|pending| pending.outcome)
    }

    /// Generation jobs still running.
    #[must_use]
    pub fn pending_generations(world: &World) -> usize {
        world.jobs.len()
    }

    /// Instances of ended sessions waiting for their teardown.
    #[must_use]
    pub fn scheduled_teardowns(world: &World) -> usize {
        world.teardowns.len()
    }

    /// Storage names of every instance the world holds.
    #[must_use]
    pub fn live_instances(world: &World) -> Vec<String> {
        world
            .instances
            .values()
            .chain(world.teardowns.iter().map(|teardown| &teardown.instance))
            .map(|instance| instance.name().to_owned())
            .collect()
    }

    /// Checks that the participant map and the session rosters agree.
    ///
    /// Every mapped participant belongs to a live session and sits on its
    /// active roster; every active roster member is mapped to that session;
    /// nobody is both extracted and dead.
    #[must_use]
    pub fn registry_is_consistent(world: &World) -> bool {
        let mapped_ok = world
            .participant_sessions
            .iter()
            .all(|(participant, id)| {
                world
                    .sessions
                    .get(id)
                    .is_some_and(|session| session.in_roster(*participant))
            });
        let rosters_ok = world.sessions.values().all(|session| {
            session.active_roster().into_iter().all(|participant| {
                world.participant_sessions.get(&participant) == Some(&session.id())
            }) && session.extracted().is_disjoint(session.dead())
        });
        let sessions_have_instances = world
            .sessions
            .keys()
            .all(|id| world.instances.contains_key(id));
        mapped_ok && rosters_ok && sessions_have_instances
    }

    fn count(len: usize) -> u32 {
        u32::try_from(len).unwrap_or(u32::MAX)
    }
}
