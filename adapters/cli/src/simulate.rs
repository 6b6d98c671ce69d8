use anyhow::{bail, Result};
use exfil_core::{
    Command, EndReason, Event, Location, OrchestratorConfig, ParticipantId, SessionId,
    TemplateCatalog, TemplateId, Timestamp,
};
use exfil_synthetic::{SyntheticFactory, SyntheticHomes, SyntheticTeams};
use exfil_system_heartbeat::Heartbeat;
use exfil_world::{
    query::{self, QueueOverview, SessionSummary},
    Collaborators, World,
};
use serde::Serialize;
use tracing::info;

const LOBBY: Location = Location::new(0.0, 100.0, 0.0);

/// Scripted participants driving one raid.
#[derive(Debug)]
pub(crate) struct Script {
    pub(crate) template: Option<TemplateId>,
    pub(crate) players: Option<u64>,
    pub(crate) seconds: u64,
    pub(crate) walk_to_extraction: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct EndedSession {
    session: SessionId,
    reason: EndReason,
}

/// What the scripted raid produced.
#[derive(Debug, Serialize)]
pub(crate) struct Report {
    template: TemplateId,
    seconds_simulated: u64,
    events: usize,
    #[serde(skip)]
    log: Vec<(u64, Event)>,
    ended: Vec<EndedSession>,
    abandoned: bool,
    sessions: Vec<SessionSummary>,
    queues: QueueOverview,
    instances_left: Vec<String>,
}

impl Report {
    pub(crate) fn print(&self) {
        for (second, event) in &self.log {
            println!("[{}] {event:?}", query::format_clock(*second));
        }
        println!("template {} simulated for {}s", self.template, self.seconds_simulated);
        for ended in &self.ended {
            println!("session {} ended: {:?}", ended.session, ended.reason);
        }
        if self.abandoned {
            println!("generation abandoned");
        }
        for session in &self.sessions {
            println!(
                "session {} still live: {}/{} active, {} left",
                session.id,
                session.active,
                session.total,
                session.remaining_display()
            );
        }
    }
}

/// Plays the script against a synthetic world, one pulse per second.
pub(crate) fn run(
    config: OrchestratorConfig,
    catalog: TemplateCatalog,
    script: &Script,
) -> Result<Report> {
    let template = match &script.template {
        Some(id) => catalog.get(id),
        None => catalog.first(),
    };
    let Some(template) = template.cloned() else {
        bail!("no template to simulate");
    };
    let players = script
        .players
        .unwrap_or_else(|| u64::from(template.bounds().min_players()))
        .max(1);
    let participants: Vec<ParticipantId> = (1..=players).map(ParticipantId::new).collect();

    let factory = SyntheticFactory::new(config.generation.seed);
    let interval = config.heartbeat.interval();
    let world = World::new(
        config,
        catalog,
        Collaborators {
            factory: Box::new(factory),
            homes: Box::new(SyntheticHomes::new(LOBBY)),
            teams: Box::new(SyntheticTeams::new()),
        },
    );
    let mut heartbeat = Heartbeat::new(world, interval);
    let inbox = heartbeat.inbox();
    for participant in &participants {
        inbox.send(Command::Connect {
            participant: *participant,
        })?;
        inbox.send(Command::JoinQueue {
            template: template.id().clone(),
            participant: *participant,
        })?;
    }

    info!(
        target: "exfil::simulate",
        template = %template.id(),
        players,
        "scripted raid starting"
    );
    let mut log = Vec::new();
    let mut ended = Vec::new();
    let mut abandoned = false;
    let mut released = false;
    let mut second = 0;
    while second < script.seconds {
        second += 1;
        let events = heartbeat.pulse(Timestamp::from_secs(second));
        for event in &events {
            match event {
                Event::CohortReleased { .. } => released = true,
                Event::SessionEnded { session, reason } => ended.push(EndedSession {
                    session: *session,
                    reason: *reason,
                }),
                Event::GenerationAbandoned { .. } => abandoned = true,
                _ => {}
            }
        }
        log.extend(events.into_iter().map(|event| (second, event)));

        let world = heartbeat.world();
        if released
            && query::sessions(world).is_empty()
            && query::pending_generations(world) == 0
            && query::scheduled_teardowns(world) == 0
        {
            break;
        }
        if script.walk_to_extraction {
            walk_to_extraction(world, &participants, &inbox)?;
        }
    }

    inbox.send(Command::Shutdown)?;
    let closing = heartbeat.pulse(Timestamp::from_secs(second));
    log.extend(closing.into_iter().map(|event| (second, event)));

    let world = heartbeat.into_world();
    Ok(Report {
        template: template.id().clone(),
        seconds_simulated: second,
        events: log.len(),
        log,
        ended,
        abandoned,
        sessions: query::sessions(&world),
        queues: query::queue_status(&world),
        instances_left: query::live_instances(&world),
    })
}

fn walk_to_extraction(
    world: &World,
    participants: &[ParticipantId],
    inbox: &exfil_system_heartbeat::Inbox,
) -> Result<()> {
    for participant in participants {
        let Some(status) = query::participant_status(world, *participant) else {
            continue;
        };
        if !status.extraction_unlocked {
            continue;
        }
        if let Some(session) = query::session(world, status.session) {
            inbox.send(Command::ReportPosition {
                participant: *participant,
                location: session.extraction_point(),
            })?;
        }
    }
    Ok(())
}
