use exfil_core::{
    CarriedItem, EndReason, EnvironmentKind, Event, ExtractionMethod, Location,
    OrchestratorConfig, ParticipantId, SessionId, SessionRules, Template, TemplateSpec,
    Timestamp,
};
use exfil_synthetic::SyntheticHomes;
use exfil_system_session::{Outcome, Return, Session, SessionPlan, SessionState, TickOutcome};

const EXTRACTION: Location = Location::new(100.5, 65.0, 100.5);
const FAR: Location = Location::new(-50.0, 65.0, -50.0);
const HOME: Location = Location::new(0.0, 80.0, 0.0);

fn at(seconds: u64) -> Timestamp {
    Timestamp::from_secs(seconds)
}

fn p(value: u64) -> ParticipantId {
    ParticipantId::new(value)
}

fn rules(spec: TemplateSpec) -> SessionRules {
    let template = Template::from_spec(spec, 0).expect("valid template");
    SessionRules::resolve(&template, &OrchestratorConfig::default())
}

fn ten_minutes() -> TemplateSpec {
    TemplateSpec {
        id: "standard".to_owned(),
        duration_minutes: 10,
        extraction_open_after_seconds: Some(300),
        ..TemplateSpec::default()
    }
}

fn open(rules: SessionRules, environment: EnvironmentKind, players: &[u64]) -> Session {
    let plan = SessionPlan {
        id: SessionId::new(7),
        template: exfil_core::TemplateId::new("standard"),
        instance: SessionId::new(7).instance_name(),
        environment,
        rules,
        extraction: EXTRACTION,
        beacon: "happy_villager".to_owned(),
        spawns: players.iter().map(|id| (p(*id), FAR)).collect(),
        placed_at: at(0),
    };
    let mut events = Vec::new();
    Session::start(plan, &mut events)
}

fn homes() -> SyntheticHomes {
    SyntheticHomes::new(HOME)
}

fn count(events: &[Event], matches: impl Fn(&Event) -> bool) -> usize {
    events.iter().filter(|event| matches(event)).count()
}

#[test]
fn start_places_everyone_and_attaches_the_display() {
    let plan = SessionPlan {
        id: SessionId::new(1),
        template: exfil_core::TemplateId::new("standard"),
        instance: "exfil_raid_1".to_owned(),
        environment: EnvironmentKind::Surface,
        rules: rules(ten_minutes()),
        extraction: EXTRACTION,
        beacon: "happy_villager".to_owned(),
        spawns: vec![(p(1), FAR), (p(2), FAR)],
        placed_at: at(0),
    };
    let mut events = Vec::new();
    let session = Session::start(plan, &mut events);

    assert!(matches!(events.first(), Some(Event::SessionStarted { .. })));
    assert_eq!(
        count(&events, |event| matches!(
            event,
            Event::ParticipantRelocated { instance: Some(name), .. } if name == "exfil_raid_1"
        )),
        2
    );
    assert_eq!(
        count(&events, |event| matches!(event, Event::CompassIssued { .. })),
        2
    );
    assert_eq!(session.viewers().len(), 2);
    assert_eq!(session.active_roster(), vec![p(1), p(2)]);
    assert_eq!(session.protection_until(), at(5));
    assert_eq!(session.remaining_seconds(at(3)), 600, "clock waits for protection");
}

#[test]
fn extraction_unlocks_after_protection_and_is_announced_once() {
    let mut session = open(rules(ten_minutes()), EnvironmentKind::Surface, &[1, 2]);
    let homes = homes();
    let mut events = Vec::new();
    let mut opened_at = None;

    for second in 0..=320 {
        let before = events.len();
        let outcome = session.tick(at(second), &homes, &mut events);
        assert_eq!(outcome, TickOutcome::Continue);
        if opened_at.is_none()
            && events[before..]
                .iter()
                .any(|event| matches!(event, Event::ExtractionOpened { .. }))
        {
            opened_at = Some(second);
        }
        if second == 4 {
            assert!(!session.is_extraction_unlocked(at(4)));
            assert!(session.is_protected(at(4)));
        }
    }

    assert!(session.is_extraction_unlocked(at(306)));
    let opened_at = opened_at.expect("extraction must open");
    assert!(opened_at <= 306, "opened at {opened_at}");
    assert!(opened_at > 4);
    assert_eq!(
        count(&events, |event| matches!(event, Event::ExtractionOpened { .. })),
        1,
        "the opening is announced exactly once"
    );
    assert_eq!(
        count(&events, |event| matches!(event, Event::ProtectionNotice { .. })),
        10,
        "two participants notified during five protected ticks"
    );
}

#[test]
fn reconnect_inside_grace_teleports_back_and_late_return_forfeits_once() {
    let mut session = open(rules(ten_minutes()), EnvironmentKind::Surface, &[1, 2, 3]);
    assert_eq!(session.rules().grace_seconds, 60);
    let homes = homes();
    let mut events = Vec::new();
    let left_at = Location::new(12.0, 70.0, -4.0);
    let items = vec![CarriedItem::new("diamond", 3)];

    assert!(session.disconnect(p(1), left_at, items.clone(), at(100), &mut events));
    assert!(session.disconnect(p(2), left_at, items.clone(), at(100), &mut events));
    assert!(!session.disconnect(p(2), left_at, items, at(101), &mut events));
    assert!(session.in_roster(p(1)), "disconnected participants stay on the roster");
    assert!(session.viewers().contains(&p(3)));
    assert!(!session.viewers().contains(&p(1)));

    events.clear();
    assert_eq!(
        session.reconnect(p(1), at(140), &homes, &mut events),
        Return::Rejoined { absent_seconds: 40 }
    );
    assert!(events.contains(&Event::ParticipantRelocated {
        participant: p(1),
        instance: Some("exfil_raid_7".to_owned()),
        to: Location::new(12.0, 70.5, -4.0),
    }));
    assert!(events.contains(&Event::CompassIssued {
        participant: p(1),
        target: EXTRACTION,
    }));
    assert!(session.viewers().contains(&p(1)));
    assert!(session.disconnect_info(p(1)).is_none());

    events.clear();
    assert_eq!(
        session.reconnect(p(2), at(200), &homes, &mut events),
        Return::Forfeited
    );
    assert_eq!(
        session.reconnect(p(2), at(210), &homes, &mut events),
        Return::AlreadyForfeited
    );
    assert_eq!(
        count(&events, |event| matches!(event, Event::ItemsDropped { .. })),
        1,
        "items drop exactly once"
    );
    assert!(events.contains(&Event::ItemsDropped {
        participant: p(2),
        at: left_at,
        items: vec![CarriedItem::new("diamond", 3)],
    }));
    assert!(events.contains(&Event::InventoryCleared { participant: p(2) }));
    assert!(session.dead().contains(&p(2)));
    assert!(!session.in_roster(p(2)));

    let departures = session.drain_departures();
    assert_eq!(departures.len(), 1);
    assert_eq!(departures[0].participant, p(2));
    assert_eq!(departures[0].outcome, Outcome::Forfeited);
    assert!(!departures[0].deferred);
}

#[test]
fn channel_resets_outside_the_radius_and_extracts_at_zero() {
    let rules = rules(TemplateSpec {
        extraction_open_after_seconds: Some(0),
        channel_seconds: Some(3),
        ..ten_minutes()
    });
    let mut session = open(rules, EnvironmentKind::Surface, &[1, 2]);
    let homes = homes().with_home(p(1), Location::new(500.0, 64.0, 500.0));
    let mut events = Vec::new();
    let inside = EXTRACTION.offset(1.0, 0.0, 1.0);

    session.report_position(p(1), inside);
    let _ = session.tick(at(5), &homes, &mut events);
    let _ = session.tick(at(6), &homes, &mut events);
    assert_eq!(session.channel_remaining(p(1)), Some(1));

    session.report_position(p(1), FAR);
    let _ = session.tick(at(7), &homes, &mut events);
    assert_eq!(session.channel_remaining(p(1)), Some(3), "leaving resets the channel");

    session.report_position(p(1), inside);
    for second in 8..=10 {
        let _ = session.tick(at(second), &homes, &mut events);
    }

    assert!(session.extracted().contains(&p(1)));
    assert!(events.contains(&Event::ParticipantRelocated {
        participant: p(1),
        instance: None,
        to: Location::new(500.0, 64.0, 500.0),
    }));
    assert_eq!(
        count(&events, |event| matches!(
            event,
            Event::ParticipantExtracted {
                method: ExtractionMethod::Channel,
                ..
            }
        )),
        1
    );
    assert_eq!(session.channel_remaining(p(2)), Some(3));
}

#[test]
fn extraction_and_death_are_idempotent() {
    let mut session = open(rules(ten_minutes()), EnvironmentKind::Surface, &[1, 2, 3]);
    let homes = homes();
    let mut events = Vec::new();

    assert!(session.die(p(1), &mut events));
    assert!(!session.die(p(1), &mut events));
    assert!(!session.extract(p(1), ExtractionMethod::Administrative, &homes, &mut events));

    assert!(session.extract(p(2), ExtractionMethod::Administrative, &homes, &mut events));
    assert!(!session.extract(p(2), ExtractionMethod::Administrative, &homes, &mut events));
    assert!(!session.die(p(2), &mut events));

    assert_eq!(
        count(&events, |event| matches!(event, Event::ParticipantDied { .. })),
        1
    );
    assert_eq!(
        count(&events, |event| matches!(event, Event::ParticipantExtracted { .. })),
        1
    );
    assert_eq!(
        count(&events, |event| matches!(event, Event::ParticipantRelocated { .. })),
        1,
        "no double relocation"
    );
    assert!(session.extracted().is_disjoint(session.dead()));

    let departures = session.drain_departures();
    assert_eq!(departures.len(), 2);
    assert_eq!(departures[0].outcome, Outcome::Died);
    assert!(departures[0].deferred, "the dead hear about it on respawn");
    assert_eq!(
        departures[1].outcome,
        Outcome::Extracted(ExtractionMethod::Administrative)
    );
    assert!(session.drain_departures().is_empty());
}

#[test]
fn revived_participant_can_be_extracted() {
    let mut session = open(rules(ten_minutes()), EnvironmentKind::Surface, &[1, 2]);
    let homes = homes();
    let mut events = Vec::new();

    assert!(session.die(p(1), &mut events));
    assert!(session.revive(p(1)));
    assert!(!session.revive(p(1)));
    assert!(session.extract(p(1), ExtractionMethod::Administrative, &homes, &mut events));

    assert!(session.extracted().contains(&p(1)));
    assert!(!session.dead().contains(&p(1)));
}

#[test]
fn roster_emptying_completes_the_session() {
    let mut session = open(rules(ten_minutes()), EnvironmentKind::Surface, &[1, 2, 3]);
    let homes = homes();
    let mut events = Vec::new();

    assert!(session.die(p(1), &mut events));
    assert!(session.extract(p(2), ExtractionMethod::Administrative, &homes, &mut events));
    assert!(session.disconnect(p(3), FAR, Vec::new(), at(20), &mut events));
    assert!(!session.is_complete(), "an absent participant keeps the session alive");
    assert_eq!(session.tick(at(21), &homes, &mut events), TickOutcome::Continue);

    assert_eq!(
        session.reconnect(p(3), at(200), &homes, &mut events),
        Return::Forfeited
    );
    assert!(session.is_complete());
    assert_eq!(
        session.tick(at(201), &homes, &mut events),
        TickOutcome::End(EndReason::Completed)
    );
}

#[test]
fn empty_roster_is_not_ended_during_protection() {
    let mut session = open(rules(ten_minutes()), EnvironmentKind::Surface, &[1]);
    let homes = homes();
    let mut events = Vec::new();

    assert!(session.die(p(1), &mut events));
    assert_eq!(session.tick(at(2), &homes, &mut events), TickOutcome::Continue);
    assert_eq!(
        session.tick(at(5), &homes, &mut events),
        TickOutcome::End(EndReason::Completed)
    );
}

#[test]
fn timeout_fails_the_present_and_forfeits_the_absent() {
    let mut session = open(rules(ten_minutes()), EnvironmentKind::Surface, &[1, 2, 3]);
    let homes = homes();
    let mut events = Vec::new();

    assert!(session.extract(p(1), ExtractionMethod::Administrative, &homes, &mut events));
    assert!(session.disconnect(p(3), FAR, Vec::new(), at(590), &mut events));
    let _ = session.drain_departures();

    assert_eq!(session.tick(at(604), &homes, &mut events), TickOutcome::Continue);
    assert_eq!(
        session.tick(at(605), &homes, &mut events),
        TickOutcome::End(EndReason::Timeout)
    );

    events.clear();
    assert!(session.end(EndReason::Timeout, &homes, &mut events));
    assert!(!session.end(EndReason::Timeout, &homes, &mut events));
    assert_eq!(session.state(), SessionState::Ended(EndReason::Timeout));
    assert_eq!(
        events
            .iter()
            .filter_map(|event| match event {
                Event::ParticipantFailed { participant, .. } => Some(*participant),
                _ => None,
            })
            .collect::<Vec<_>>(),
        vec![p(2)]
    );
    assert!(session.viewers().is_empty());
    assert!(events.contains(&Event::ProgressDetached {
        session: SessionId::new(7),
        participant: p(2),
    }));
    assert!(session
        .disconnect_info(p(3))
        .map_or(false, |record| record.forfeited()));

    let departures = session.drain_departures();
    assert_eq!(departures.len(), 2);
    assert!(departures.iter().all(|departure| departure.deferred));
    assert_eq!(departures[0].outcome, Outcome::TimedOut);
    assert_eq!(departures[1].participant, p(3));
    assert_eq!(departures[1].outcome, Outcome::Forfeited);

    let mut after = Vec::new();
    assert_eq!(session.tick(at(606), &homes, &mut after), TickOutcome::Continue);
    assert!(after.is_empty(), "an ended session never resurrects");
}

#[test]
fn ending_drops_the_items_of_the_absent_once() {
    let mut session = open(rules(ten_minutes()), EnvironmentKind::Surface, &[1, 2]);
    let homes = homes();
    let mut events = Vec::new();
    let left_at = Location::new(30.0, 66.0, 8.0);
    let loot = vec![CarriedItem::new("emerald", 5)];
    assert!(session.disconnect(p(2), left_at, loot.clone(), at(590), &mut events));

    events.clear();
    assert!(session.end(EndReason::Timeout, &homes, &mut events));
    assert_eq!(
        count(&events, |event| matches!(event, Event::ItemsDropped { .. })),
        1
    );
    assert!(events.contains(&Event::ItemsDropped {
        participant: p(2),
        at: left_at,
        items: loot,
    }));
    assert_eq!(
        session
            .disconnect_info(p(2))
            .map(|record| record.items().len()),
        Some(0),
        "the record gives its items up when forfeited"
    );

    events.clear();
    assert_eq!(
        session.reconnect(p(2), at(700), &homes, &mut events),
        Return::AlreadyForfeited
    );
    assert!(events.is_empty(), "a late return drops nothing more");
}

#[test]
fn final_phase_and_critical_display_fire_near_the_end() {
    let mut session = open(rules(ten_minutes()), EnvironmentKind::Surface, &[1]);
    let homes = homes();
    let mut events = Vec::new();

    let _ = session.tick(at(544), &homes, &mut events);
    assert!(!events
        .iter()
        .any(|event| matches!(event, Event::FinalPhase { .. })));
    for second in 545..=600 {
        let _ = session.tick(at(second), &homes, &mut events);
    }

    assert_eq!(
        count(&events, |event| matches!(event, Event::FinalPhase { .. })),
        1
    );
    assert!(events.contains(&Event::FinalPhase {
        session: SessionId::new(7),
        remaining_seconds: 60,
    }));
    let last = events
        .iter()
        .rev()
        .find_map(|event| match event {
            Event::ProgressUpdated {
                critical,
                remaining_seconds,
                ..
            } => Some((*critical, *remaining_seconds)),
            _ => None,
        })
        .expect("progress is updated every tick");
    assert_eq!(last, (true, 5));
}

#[test]
fn conditional_unlock_waits_for_the_boss() {
    let rules = rules(TemplateSpec {
        extraction_open_after_seconds: None,
        ..ten_minutes()
    });
    assert_eq!(rules.extraction_open_after_seconds, None);
    let mut session = open(rules, EnvironmentKind::Islands, &[1]);
    let mut events = Vec::new();

    assert!(!session.is_extraction_unlocked(at(10_000)));
    assert!(session.boss_defeated(at(50), &mut events));
    assert!(!session.boss_defeated(at(51), &mut events));
    assert!(session.is_extraction_unlocked(at(50)));
    assert_eq!(session.extraction_available_at(), Some(at(50)));
}

#[test]
fn boss_signal_is_ignored_by_timed_sessions() {
    let mut session = open(rules(ten_minutes()), EnvironmentKind::Islands, &[1]);
    let mut events = Vec::new();

    assert!(!session.boss_defeated(at(50), &mut events));
    assert!(session.unlock(at(50), &mut events));
    assert!(session.is_extraction_unlocked(at(50)));
    assert!(events.contains(&Event::Notice {
        participant: p(1),
        text: "Extraction unlocked early!".to_owned(),
    }));
}

#[test]
fn portal_extraction_only_counts_on_islands() {
    let homes = homes();
    let mut events = Vec::new();

    let mut surface = open(rules(ten_minutes()), EnvironmentKind::Surface, &[1]);
    assert!(!surface.extract(p(1), ExtractionMethod::Portal, &homes, &mut events));
    assert!(surface.in_roster(p(1)));

    let mut islands = open(rules(ten_minutes()), EnvironmentKind::Islands, &[1]);
    assert!(islands.extract(p(1), ExtractionMethod::Portal, &homes, &mut events));
    assert!(!islands.extract(p(1), ExtractionMethod::Portal, &homes, &mut events));
}

#[test]
fn administrative_end_sends_the_present_home() {
    let mut session = open(rules(ten_minutes()), EnvironmentKind::Surface, &[1]);
    let mut events = Vec::new();

    assert!(session.end(EndReason::Administrative, &homes(), &mut events));

    assert!(events.contains(&Event::ParticipantRelocated {
        participant: p(1),
        instance: None,
        to: HOME,
    }));
    let departures = session.drain_departures();
    assert_eq!(departures.len(), 1);
    assert_eq!(departures[0].outcome, Outcome::Ended(EndReason::Administrative));
    assert!(!departures[0].deferred);
}
