use std::{thread, time::Duration};

use crossbeam_channel::{bounded, unbounded};
use exfil_core::{
    Command, EnvironmentKind, Event, Location, OrchestratorConfig, ParticipantId, Team,
    TeamDirectory, TemplateCatalog, TemplateId, TemplateSpec, Timestamp,
};
use exfil_synthetic::{SyntheticFactory, SyntheticHomes, SyntheticTeams, TerrainProfile};
use exfil_system_heartbeat::{Clock, Heartbeat, HeartbeatError, ManualClock, SystemClock};
use exfil_world::{query, Collaborators, World};

struct PanickingTeams;

impl TeamDirectory for PanickingTeams {
    fn team_of(&self, _participant: ParticipantId) -> Option<Team> {
        panic!("team directory unavailable");
    }
}

fn p(id: u64) -> ParticipantId {
    ParticipantId::new(id)
}

fn world_with(teams: Box<dyn TeamDirectory>) -> World {
    let specs = vec![TemplateSpec {
        id: "forest".to_owned(),
        extraction_open_after_seconds: Some(0),
        min_players: 2,
        ..TemplateSpec::default()
    }];
    let catalog = TemplateCatalog::from_specs(&specs).expect("test templates are valid");
    let factory = SyntheticFactory::new(3)
        .with_profile(EnvironmentKind::Surface, TerrainProfile::Flat { ground: 64 });
    World::new(
        OrchestratorConfig::default(),
        catalog,
        Collaborators {
            factory: Box::new(factory),
            homes: Box::new(SyntheticHomes::new(Location::new(0.0, 100.0, 0.0))),
            teams,
        },
    )
}

#[test]
fn pulse_applies_queued_commands_before_the_tick() {
    let mut heartbeat = Heartbeat::new(
        world_with(Box::new(SyntheticTeams::new())),
        Duration::from_secs(1),
    );
    let inbox = heartbeat.inbox();
    inbox
        .send(Command::Connect { participant: p(1) })
        .expect("inbox is open");
    inbox
        .send(Command::JoinQueue {
            template: TemplateId::new("forest"),
            participant: p(1),
        })
        .expect("inbox is open");

    let events = heartbeat.pulse(Timestamp::from_secs(5));

    let joined = events
        .iter()
        .position(|event| matches!(event, Event::QueueJoined { .. }))
        .expect("join processed");
    let ticked = events
        .iter()
        .position(|event| matches!(event, Event::TimeAdvanced { .. }))
        .expect("tick processed");
    assert!(joined < ticked, "commands run before the tick: {events:?}");
    assert_eq!(query::now(heartbeat.world()), Timestamp::from_secs(5));
    assert!(query::is_online(heartbeat.world(), p(1)));
}

#[test]
fn panicking_command_does_not_stop_the_heartbeat() {
    let mut heartbeat = Heartbeat::new(world_with(Box::new(PanickingTeams)), Duration::from_secs(1));
    let inbox = heartbeat.inbox();
    inbox
        .send(Command::Connect { participant: p(1) })
        .expect("inbox is open");
    inbox
        .send(Command::JoinQueue {
            template: TemplateId::new("forest"),
            participant: p(1),
        })
        .expect("inbox is open");
    inbox
        .send(Command::Connect { participant: p(2) })
        .expect("inbox is open");

    let events = heartbeat.pulse(Timestamp::from_secs(1));

    assert!(
        !events
            .iter()
            .any(|event| matches!(event, Event::QueueJoined { .. })),
        "the panicking join leaves no trace"
    );
    assert!(events.contains(&Event::TimeAdvanced {
        now: Timestamp::from_secs(1)
    }));
    assert!(query::is_online(heartbeat.world(), p(2)), "later commands still apply");

    let events = heartbeat.pulse(Timestamp::from_secs(2));
    assert!(events.contains(&Event::TimeAdvanced {
        now: Timestamp::from_secs(2)
    }));
}

#[test]
fn run_stops_on_shutdown_and_hands_back_the_world() {
    let heartbeat = Heartbeat::new(
        world_with(Box::new(SyntheticTeams::new())),
        Duration::from_millis(5),
    );
    let inbox = heartbeat.inbox();
    inbox
        .send(Command::Connect { participant: p(1) })
        .expect("inbox is open");
    inbox
        .send(Command::JoinQueue {
            template: TemplateId::new("forest"),
            participant: p(1),
        })
        .expect("inbox is open");

    let (stop, shutdown) = bounded::<()>(1);
    let (pulses_tx, pulses_rx) = unbounded::<Vec<Event>>();
    let runner = thread::spawn(move || {
        let clock = ManualClock::new(Timestamp::from_secs(10));
        heartbeat.run(&clock, &shutdown, |_, events| {
            let _ = pulses_tx.send(events);
        })
    });

    let first = pulses_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("a pulse fires");
    assert!(first
        .iter()
        .any(|event| matches!(event, Event::QueueJoined { .. })));
    stop.send(()).expect("runner is listening");
    let world = runner.join().expect("runner exits cleanly");

    let closing: Vec<Event> = pulses_rx.try_iter().flatten().collect();
    assert!(
        closing
            .iter()
            .any(|event| matches!(event, Event::QueueLeft { .. })),
        "shutdown empties the queues: {closing:?}"
    );
    assert!(query::queue_status(&world).templates.is_empty());
}

#[test]
fn inbox_reports_a_stopped_heartbeat() {
    let heartbeat = Heartbeat::new(
        world_with(Box::new(SyntheticTeams::new())),
        Duration::from_secs(1),
    );
    let inbox = heartbeat.inbox();
    drop(heartbeat);

    let sent = inbox.send(Command::PruneStale);
    assert!(matches!(sent, Err(HeartbeatError::InboxClosed)));
}

#[test]
fn manual_clock_moves_only_when_advanced() {
    let clock = ManualClock::new(Timestamp::from_secs(100));
    assert_eq!(clock.now(), Timestamp::from_secs(100));
    clock.advance(15);
    assert_eq!(clock.now(), Timestamp::from_secs(115));
}

#[test]
fn system_clock_reads_wall_time() {
    let now = SystemClock.now();
    assert!(
        now > Timestamp::from_secs(1_600_000_000),
        "system clock is past 2020: {now:?}"
    );
}
