use exfil_core::{
    AdmissionError, CarriedItem, Command, EndReason, EnvironmentKind, Event, ExtractionMethod,
    ForceEndTarget, GenerationFailure, HomeResolver, Location, OrchestratorConfig, ParticipantId,
    SessionId, Team, TemplateCatalog, TemplateId, TemplateSpec, Timestamp, UnlockTarget,
};
use exfil_synthetic::{
    FactoryLedger, SyntheticFactory, SyntheticHomes, SyntheticTeams, TerrainProfile,
};
use exfil_system_session::Outcome;
use exfil_world::{self as world, query, Collaborators, World};

const LOBBY: Location = Location::new(0.0, 100.0, 0.0);

struct Harness {
    world: World,
    ledger: FactoryLedger,
    clock: u64,
}

impl Harness {
    fn new(specs: Vec<TemplateSpec>) -> Self {
        Self::with(specs, OrchestratorConfig::default(), flat_factory(), SyntheticTeams::new())
    }

    fn with(
        specs: Vec<TemplateSpec>,
        config: OrchestratorConfig,
        factory: SyntheticFactory,
        teams: SyntheticTeams,
    ) -> Self {
        let homes = (1..=9).fold(SyntheticHomes::new(LOBBY), |homes, id| {
            homes.with_home(p(id), home(id))
        });
        Self::with_homes(specs, config, factory, teams, Box::new(homes))
    }

    fn with_homes(
        specs: Vec<TemplateSpec>,
        config: OrchestratorConfig,
        factory: SyntheticFactory,
        teams: SyntheticTeams,
        homes: Box<dyn HomeResolver>,
    ) -> Self {
        let catalog = catalog(specs);
        let ledger = factory.ledger();
        let world = World::new(
            config,
            catalog,
            Collaborators {
                factory: Box::new(factory),
                homes,
                teams: Box::new(teams),
            },
        );
        Self {
            world,
            ledger,
            clock: 0,
        }
    }

    fn run(&mut self, command: Command) -> Vec<Event> {
        let mut events = Vec::new();
        world::apply(&mut self.world, command, &mut events);
        assert!(
            query::registry_is_consistent(&self.world),
            "registries diverged after {events:?}"
        );
        events
    }

    fn tick(&mut self) -> Vec<Event> {
        self.clock += 1;
        self.run(Command::Tick {
            now: Timestamp::from_secs(self.clock),
        })
    }

    fn tick_until(&mut self, secs: u64) -> Vec<Event> {
        let mut events = Vec::new();
        while self.clock < secs {
            events.extend(self.tick());
        }
        events
    }

    fn connect(&mut self, ids: &[u64]) {
        for id in ids {
            let _ = self.run(Command::Connect { participant: p(*id) });
        }
    }

    fn join(&mut self, template: &str, id: u64) -> Vec<Event> {
        self.run(Command::JoinQueue {
            template: TemplateId::new(template),
            participant: p(id),
        })
    }
}

struct PanickingHomes;

impl HomeResolver for PanickingHomes {
    fn resolve_home(&self, _participant: ParticipantId) -> Option<Location> {
        panic!("home lookup failed");
    }

    fn fallback(&self) -> Location {
        panic!("home lookup failed");
    }
}

fn p(id: u64) -> ParticipantId {
    ParticipantId::new(id)
}

fn home(id: u64) -> Location {
    Location::new(id as f64 * 10.0, 70.0, 0.0)
}

fn spec(id: &str) -> TemplateSpec {
    TemplateSpec {
        id: id.to_owned(),
        extraction_open_after_seconds: Some(0),
        ..TemplateSpec::default()
    }
}

fn catalog(specs: Vec<TemplateSpec>) -> TemplateCatalog {
    TemplateCatalog::from_specs(&specs).expect("test templates are valid")
}

fn flat_factory() -> SyntheticFactory {
    SyntheticFactory::new(7).with_profile(EnvironmentKind::Surface, TerrainProfile::Flat { ground: 64 })
}

fn released(events: &[Event]) -> Vec<(SessionId, Vec<ParticipantId>)> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::CohortReleased {
                session,
                participants,
                ..
            } => {
                let mut participants = participants.clone();
                participants.sort();
                Some((*session, participants))
            }
            _ => None,
        })
        .collect()
}

fn started(events: &[Event]) -> Vec<SessionId> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::SessionStarted { session, .. } => Some(*session),
            _ => None,
        })
        .collect()
}

fn notices(events: &[Event], participant: ParticipantId) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Notice {
                participant: target,
                text,
            } if *target == participant => Some(text.clone()),
            _ => None,
        })
        .collect()
}

fn rejection(events: &[Event]) -> Option<AdmissionError> {
    events.iter().find_map(|event| match event {
        Event::AdmissionRejected { reason, .. } => Some(reason.clone()),
        _ => None,
    })
}

fn ended(events: &[Event]) -> Vec<(SessionId, EndReason)> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::SessionEnded { session, reason } => Some((*session, *reason)),
            _ => None,
        })
        .collect()
}

#[test]
fn cohort_is_released_once_minimums_are_met() {
    let mut harness = Harness::new(vec![TemplateSpec {
        min_players: 2,
        ..spec("alpha")
    }]);
    harness.connect(&[1, 2]);

    let first = harness.join("alpha", 1);
    let feedback = first
        .iter()
        .find_map(|event| match event {
            Event::QueueJoined { feedback, .. } => Some(*feedback),
            _ => None,
        })
        .expect("join is acknowledged");
    assert_eq!(feedback.players, 1);
    assert_eq!(feedback.needed_players(), 1, "one more player is needed");
    assert!(released(&first).is_empty(), "a single player must wait");

    let second = harness.join("alpha", 2);
    assert_eq!(
        released(&second),
        vec![(SessionId::new(1), vec![p(1), p(2)])],
        "the second join fills the cohort"
    );
    assert_eq!(query::pending_generations(&harness.world), 1);
    assert!(query::queue_status(&harness.world).templates.is_empty());

    let tick = harness.tick();
    assert_eq!(started(&tick), vec![SessionId::new(1)]);
    assert_eq!(
        query::session_of(&harness.world, p(1)),
        Some(SessionId::new(1))
    );
    assert_eq!(
        query::session_of(&harness.world, p(2)),
        Some(SessionId::new(1))
    );
    assert_eq!(query::pending_generations(&harness.world), 0);
}

#[test]
fn teams_queue_together_and_oversized_teams_are_refused() {
    let teams = SyntheticTeams::new()
        .with_team(Team::new(p(1), [p(1), p(2)]))
        .with_team(Team::new(p(4), [p(4), p(5), p(6)]));
    let mut harness = Harness::with(
        vec![TemplateSpec {
            min_teams: 2,
            max_players_per_team: 2,
            ..spec("alpha")
        }],
        OrchestratorConfig::default(),
        flat_factory(),
        teams,
    );
    harness.connect(&[1, 2, 3, 4, 5, 6]);

    let joined = harness.join("alpha", 1);
    let (participants, feedback) = joined
        .iter()
        .find_map(|event| match event {
            Event::QueueJoined {
                participants,
                feedback,
                ..
            } => Some((participants.clone(), *feedback)),
            _ => None,
        })
        .expect("team join is acknowledged");
    assert_eq!(participants, vec![p(1), p(2)], "the whole team queues");
    assert_eq!(feedback.teams, 1);
    assert_eq!(feedback.players, 2);

    let oversized = harness.join("alpha", 4);
    assert_eq!(
        rejection(&oversized),
        Some(AdmissionError::TeamTooLarge { size: 3, max: 2 })
    );

    let solo = harness.join("alpha", 3);
    assert_eq!(
        released(&solo),
        vec![(SessionId::new(1), vec![p(1), p(2), p(3)])],
        "two teams release together"
    );
}

#[test]
fn busy_offline_and_unknown_requests_are_rejected() {
    let mut harness = Harness::new(vec![spec("alpha")]);
    harness.connect(&[1]);

    let first = harness.join("alpha", 1);
    assert_eq!(released(&first).len(), 1);

    let generating = harness.join("alpha", 1);
    assert_eq!(
        rejection(&generating),
        Some(AdmissionError::AlreadyInSession { participant: p(1) }),
        "a cohort member waiting for generation is busy"
    );

    let _ = harness.tick();
    let quick = harness.run(Command::JoinQuickQueue { participant: p(1) });
    assert_eq!(
        rejection(&quick),
        Some(AdmissionError::AlreadyInSession { participant: p(1) })
    );

    let offline = harness.join("alpha", 9);
    assert_eq!(
        rejection(&offline),
        Some(AdmissionError::Offline { participant: p(9) })
    );

    let unknown = harness.join("missing", 1);
    assert_eq!(
        rejection(&unknown),
        Some(AdmissionError::UnknownTemplate(TemplateId::new("missing")))
    );
}

#[test]
fn releases_wait_for_a_free_session_slot() {
    let mut config = OrchestratorConfig::default();
    config.queue.max_concurrent_sessions = 1;
    let mut harness = Harness::with(
        vec![spec("alpha")],
        config,
        flat_factory(),
        SyntheticTeams::new(),
    );
    harness.connect(&[1, 2]);

    assert_eq!(released(&harness.join("alpha", 1)).len(), 1);
    let blocked = harness.join("alpha", 2);
    assert!(released(&blocked).is_empty(), "the only slot is taken");

    let tick = harness.tick();
    assert_eq!(started(&tick), vec![SessionId::new(1)]);
    assert!(
        tick.iter().any(|event| matches!(
            event,
            Event::ReleaseDeferred { active: 1, .. }
        )),
        "a ready queue reports the deferral"
    );
    assert_eq!(query::queue_status(&harness.world).templates[0].players, 1);

    let _ = harness.run(Command::ForceEnd {
        target: ForceEndTarget::All,
    });
    let tick = harness.tick();
    assert_eq!(
        released(&tick),
        vec![(SessionId::new(2), vec![p(2)])],
        "the freed slot releases the waiting player"
    );
}

#[test]
fn exhausted_generation_dissolves_the_cohort() {
    let mut harness = Harness::with(
        vec![TemplateSpec {
            max_generation_attempts: 3,
            ..spec("alpha")
        }],
        OrchestratorConfig::default(),
        flat_factory().with_permanent_failure("disk full"),
        SyntheticTeams::new(),
    );
    harness.connect(&[1]);
    let _ = harness.join("alpha", 1);

    let events = harness.tick_until(3);
    let failures: Vec<u32> = events
        .iter()
        .filter_map(|event| match event {
            Event::GenerationAttemptFailed {
                attempt, failure, ..
            } => {
                assert_eq!(
                    *failure,
                    GenerationFailure::FactoryFailed("disk full".to_owned())
                );
                Some(*attempt)
            }
            _ => None,
        })
        .collect();
    assert_eq!(failures, vec![1, 2, 3]);
    assert!(events.iter().any(|event| matches!(
        event,
        Event::GenerationAbandoned { attempts: 3, participants, .. } if participants == &vec![p(1)]
    )));
    assert!(notices(&events, p(1))
        .iter()
        .any(|text| text.starts_with("World gen failed after 3 attempts")));
    assert_eq!(query::pending_generations(&harness.world), 0);
    assert!(query::sessions(&harness.world).is_empty());

    let again = harness.join("alpha", 1);
    assert_eq!(
        released(&again),
        vec![(SessionId::new(2), vec![p(1)])],
        "a dissolved cohort may queue again"
    );
}

#[test]
fn generation_panic_counts_as_a_failed_attempt() {
    let mut harness = Harness::with(
        vec![spec("alpha")],
        OrchestratorConfig::default(),
        flat_factory().with_panics(1),
        SyntheticTeams::new(),
    );
    harness.connect(&[1]);
    let _ = harness.join("alpha", 1);

    let first = harness.tick();
    assert!(first.iter().any(|event| matches!(
        event,
        Event::GenerationAttemptFailed {
            attempt: 1,
            failure: GenerationFailure::Fault,
            ..
        }
    )));

    let second = harness.tick();
    assert_eq!(started(&second), vec![SessionId::new(1)]);
}

#[test]
fn panicking_session_step_leaves_the_session_untouched() {
    let mut harness = Harness::with_homes(
        vec![spec("alpha")],
        OrchestratorConfig::default(),
        flat_factory(),
        SyntheticTeams::new(),
        Box::new(PanickingHomes),
    );
    harness.connect(&[1]);
    let _ = harness.join("alpha", 1);
    let _ = harness.tick();

    let events = harness.run(Command::ForceExtract {
        participant: p(1),
        treat_as_alive: false,
    });
    assert!(events.iter().any(|event| matches!(
        event,
        Event::SessionFaulted { stage: "extract", .. }
    )));
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, Event::ParticipantExtracted { .. })),
        "events staged by the failed step are dropped"
    );
    assert_eq!(
        query::session_of(&harness.world, p(1)),
        Some(SessionId::new(1))
    );

    let tick = harness.tick();
    assert!(
        tick.iter()
            .any(|event| matches!(event, Event::ProgressUpdated { .. })),
        "the session keeps ticking"
    );
}

#[test]
fn channel_extraction_completes_the_session_and_tears_down() {
    let mut harness = Harness::new(vec![spec("alpha")]);
    harness.connect(&[1]);
    let _ = harness.join("alpha", 1);
    let _ = harness.tick();

    let point = query::session(&harness.world, SessionId::new(1))
        .expect("session is live")
        .extraction_point();
    let _ = harness.run(Command::ReportPosition {
        participant: p(1),
        location: point,
    });

    let events = harness.tick_until(40);
    assert!(events.iter().any(|event| matches!(
        event,
        Event::ParticipantExtracted {
            method: ExtractionMethod::Channel,
            ..
        }
    )));
    assert!(events.iter().any(|event| matches!(
        event,
        Event::ParticipantRelocated { participant, instance: None, to }
            if *participant == p(1) && *to == home(1)
    )));
    assert!(notices(&events, p(1))
        .contains(&"Raid #1 extracted successfully. Loot secured.".to_owned()));
    assert_eq!(ended(&events), vec![(SessionId::new(1), EndReason::Completed)]);
    assert!(events.iter().any(|event| matches!(
        event,
        Event::InstanceTornDown { deleted: true, .. }
    )));

    let stats = harness.ledger.snapshot();
    assert_eq!(stats.discarded, 1);
    assert!(stats.stored.is_empty(), "storage is deleted on teardown");
    assert!(query::sessions(&harness.world).is_empty());
    assert!(query::live_instances(&harness.world).is_empty());
    assert_eq!(query::pending_outcome(&harness.world, p(1)), None);
}

#[test]
fn death_outcome_waits_for_respawn() {
    let mut harness = Harness::new(vec![TemplateSpec {
        min_players: 2,
        ..spec("alpha")
    }]);
    harness.connect(&[1, 2]);
    let _ = harness.join("alpha", 1);
    let _ = harness.join("alpha", 2);
    let _ = harness.tick();

    let death = harness.run(Command::Died { participant: p(1) });
    assert!(death
        .iter()
        .any(|event| matches!(event, Event::ParticipantDied { .. })));
    assert!(notices(&death, p(1)).is_empty(), "the message waits");
    assert_eq!(query::session_of(&harness.world, p(1)), None);
    assert_eq!(
        query::pending_outcome(&harness.world, p(1)),
        Some(Outcome::Died)
    );

    let listing = query::sessions(&harness.world);
    assert_eq!(listing.len(), 1, "the survivor keeps the session alive");
    assert_eq!(listing[0].active, 1);
    assert_eq!(listing[0].total, 2);
    assert_eq!(listing[0].dead, 1);
    assert_eq!(listing[0].remaining_display(), "10:00");

    let respawn = harness.run(Command::Respawned { participant: p(1) });
    assert!(respawn.iter().any(|event| matches!(
        event,
        Event::ParticipantRelocated { participant, instance: None, to }
            if *participant == p(1) && *to == home(1)
    )));
    assert_eq!(
        notices(&respawn, p(1)),
        vec!["You died in Raid #1. All carried items lost.".to_owned()]
    );
    assert_eq!(query::pending_outcome(&harness.world, p(1)), None);
}

#[test]
fn last_participant_dying_ends_the_session_at_once() {
    let mut harness = Harness::new(vec![spec("alpha")]);
    harness.connect(&[1]);
    let _ = harness.join("alpha", 1);
    let _ = harness.tick();

    let events = harness.run(Command::Died { participant: p(1) });
    assert_eq!(ended(&events), vec![(SessionId::new(1), EndReason::Completed)]);
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::TeardownScheduled { .. })));
    assert!(query::sessions(&harness.world).is_empty());
    assert_eq!(query::scheduled_teardowns(&harness.world), 1);
    assert_eq!(
        query::pending_outcome(&harness.world, p(1)),
        Some(Outcome::Died)
    );
}

#[test]
fn reconnect_inside_grace_rejoins_and_after_grace_forfeits() {
    let mut harness = Harness::new(vec![TemplateSpec {
        min_players: 3,
        ..spec("alpha")
    }]);
    harness.connect(&[1, 2, 3]);
    for id in 1..=3 {
        let _ = harness.join("alpha", id);
    }
    let _ = harness.tick_until(10);

    let spot = Location::new(12.0, 65.0, -4.0);
    let loot = vec![CarriedItem::new("diamond", 3)];
    for id in [1, 2] {
        let _ = harness.run(Command::Disconnect {
            participant: p(id),
            location: spot,
            items: loot.clone(),
        });
    }
    assert_eq!(
        query::session_of(&harness.world, p(1)),
        Some(SessionId::new(1)),
        "an absent participant stays mapped"
    );
    assert!(!query::is_online(&harness.world, p(1)));

    let _ = harness.tick_until(30);
    let rejoin = harness.run(Command::Connect { participant: p(1) });
    assert!(rejoin.iter().any(|event| matches!(
        event,
        Event::ParticipantRejoined { absent_seconds: 20, .. }
    )));
    assert_eq!(
        query::session_of(&harness.world, p(1)),
        Some(SessionId::new(1))
    );

    let _ = harness.tick_until(80);
    let forfeit = harness.run(Command::Connect { participant: p(2) });
    let dropped: Vec<&Vec<CarriedItem>> = forfeit
        .iter()
        .filter_map(|event| match event {
            Event::ItemsDropped { items, at, .. } => {
                assert_eq!(*at, spot, "items drop where the participant left");
                Some(items)
            }
            _ => None,
        })
        .collect();
    assert_eq!(dropped, vec![&loot], "items drop exactly once");
    assert!(forfeit
        .iter()
        .any(|event| matches!(event, Event::InventoryCleared { .. })));
    assert!(forfeit
        .iter()
        .any(|event| matches!(event, Event::ParticipantForfeited { .. })));
    assert_eq!(query::session_of(&harness.world, p(2)), None);
    assert_eq!(query::sessions(&harness.world)[0].dead, 1);
}

#[test]
fn force_start_picks_the_waiting_queue_or_the_initiator() {
    let mut harness = Harness::new(vec![
        TemplateSpec {
            min_players: 4,
            ..spec("alpha")
        },
        TemplateSpec {
            min_players: 4,
            ..spec("beta")
        },
    ]);
    harness.connect(&[1, 2, 3]);
    let _ = harness.join("beta", 2);
    let _ = harness.join("beta", 3);

    let forced = harness.run(Command::ForceStart {
        template: None,
        initiator: p(1),
    });
    assert_eq!(
        released(&forced),
        vec![(SessionId::new(1), vec![p(2), p(3)])],
        "the waiting queue is started without the initiator"
    );
    assert!(forced.iter().any(|event| matches!(
        event,
        Event::CohortReleased { template, .. } if template == &TemplateId::new("beta")
    )));

    let alone = harness.run(Command::ForceStart {
        template: None,
        initiator: p(1),
    });
    assert_eq!(released(&alone), vec![(SessionId::new(2), vec![p(1)])]);

    let nobody = harness.run(Command::ForceStart {
        template: Some(TemplateId::new("alpha")),
        initiator: p(9),
    });
    assert!(released(&nobody).is_empty());
    assert_eq!(
        notices(&nobody, p(9)),
        vec!["No eligible players to start.".to_owned()]
    );
}

#[test]
fn force_start_takes_the_forced_participant_out_of_other_queues() {
    let mut harness = Harness::new(vec![
        TemplateSpec {
            min_players: 2,
            ..spec("alpha")
        },
        spec("beta"),
    ]);
    harness.connect(&[1, 2]);
    let _ = harness.join("alpha", 1);

    let forced = harness.run(Command::ForceStart {
        template: Some(TemplateId::new("beta")),
        initiator: p(1),
    });
    assert_eq!(released(&forced), vec![(SessionId::new(1), vec![p(1)])]);
    assert!(forced.contains(&Event::QueueLeft {
        template: TemplateId::new("alpha"),
        participants: vec![p(1)],
    }));

    let joined = harness.join("alpha", 2);
    assert!(
        released(&joined).is_empty(),
        "the forced participant no longer counts toward alpha"
    );
    let later = harness.tick_until(5);
    assert!(released(&later).is_empty());
    assert_eq!(query::queue_status(&harness.world).templates.len(), 1);
}

#[test]
fn force_extract_revives_the_dead_only_when_asked() {
    let mut harness = Harness::new(vec![TemplateSpec {
        min_players: 2,
        ..spec("alpha")
    }]);
    harness.connect(&[1, 2]);
    let _ = harness.join("alpha", 1);
    let _ = harness.join("alpha", 2);
    let _ = harness.tick();
    let _ = harness.run(Command::Died { participant: p(1) });

    let refused = harness.run(Command::ForceExtract {
        participant: p(1),
        treat_as_alive: false,
    });
    assert!(!refused
        .iter()
        .any(|event| matches!(event, Event::ParticipantExtracted { .. })));

    let revived = harness.run(Command::ForceExtract {
        participant: p(1),
        treat_as_alive: true,
    });
    assert!(revived.iter().any(|event| matches!(
        event,
        Event::ParticipantExtracted {
            method: ExtractionMethod::Administrative,
            ..
        }
    )));
    assert!(notices(&revived, p(1)).contains(&"[Admin] You were forcibly extracted.".to_owned()));
    assert_eq!(
        query::pending_outcome(&harness.world, p(1)),
        None,
        "the held death outcome is replaced"
    );
    assert_eq!(query::sessions(&harness.world)[0].extracted, 1);
}

#[test]
fn unlock_opens_extraction_early_for_a_template() {
    let mut harness = Harness::new(vec![TemplateSpec {
        extraction_open_after_seconds: Some(300),
        ..spec("alpha")
    }]);
    harness.connect(&[1]);
    let _ = harness.join("alpha", 1);
    let _ = harness.tick_until(10);

    let before = query::participant_status(&harness.world, p(1)).expect("in a session");
    assert!(!before.protected);
    assert!(!before.extraction_unlocked);

    let events = harness.run(Command::Unlock {
        target: Some(UnlockTarget::Template(TemplateId::new("alpha"))),
    });
    assert_eq!(
        notices(&events, p(1)),
        vec!["Extraction unlocked early!".to_owned()]
    );
    let after = query::participant_status(&harness.world, p(1)).expect("in a session");
    assert!(after.extraction_unlocked);
}

#[test]
fn prune_deletes_only_orphaned_raid_storage() {
    let mut config = OrchestratorConfig::default();
    config.cleanup.delete_storage_on_end = false;
    config.cleanup.delay_seconds = 1;
    let mut harness = Harness::with(
        vec![spec("alpha")],
        config,
        flat_factory(),
        SyntheticTeams::new(),
    );
    harness.connect(&[1, 2]);
    let _ = harness.join("alpha", 1);
    let _ = harness.tick();

    let end = harness.run(Command::ForceEnd {
        target: ForceEndTarget::All,
    });
    assert!(end
        .iter()
        .any(|event| matches!(event, Event::SessionsForceEnded { count: 1 })));
    assert_eq!(ended(&end), vec![(SessionId::new(1), EndReason::Administrative)]);

    let _ = harness.join("alpha", 2);
    let tick = harness.tick();
    assert!(tick.iter().any(|event| matches!(
        event,
        Event::InstanceTornDown { deleted: false, .. }
    )));
    assert_eq!(started(&tick), vec![SessionId::new(2)]);

    let pruned = harness.run(Command::PruneStale);
    assert!(pruned.iter().any(|event| matches!(
        event,
        Event::StaleInstancesPruned { removed } if removed == &vec!["exfil_raid_1".to_owned()]
    )));
    let stored: Vec<String> = harness.ledger.snapshot().stored.into_iter().collect();
    assert_eq!(stored, vec!["exfil_raid_2".to_owned()], "the live instance is kept");
}

#[test]
fn reload_dissolves_queues_of_dropped_templates() {
    let mut harness = Harness::new(vec![
        TemplateSpec {
            min_players: 2,
            ..spec("alpha")
        },
        spec("beta"),
    ]);
    harness.connect(&[1]);
    let _ = harness.join("alpha", 1);

    let events = harness.run(Command::ReloadTemplates {
        catalog: catalog(vec![spec("beta")]),
    });
    assert!(events.iter().any(|event| matches!(
        event,
        Event::QueueLeft { template, participants }
            if template == &TemplateId::new("alpha") && participants == &vec![p(1)]
    )));
    assert_eq!(notices(&events, p(1)).len(), 1);
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::TemplatesReloaded { count: 1 })));
    assert!(query::queue_status(&harness.world).templates.is_empty());
    assert_eq!(query::available_participants(&harness.world), vec![p(1)]);
}

#[test]
fn shutdown_ends_sessions_and_releases_instances() {
    let mut harness = Harness::new(vec![
        spec("alpha"),
        TemplateSpec {
            min_players: 5,
            ..spec("beta")
        },
    ]);
    harness.connect(&[1, 2]);
    let _ = harness.join("alpha", 1);
    let _ = harness.tick();
    let _ = harness.join("beta", 2);

    let events = harness.run(Command::Shutdown);
    assert_eq!(ended(&events), vec![(SessionId::new(1), EndReason::Shutdown)]);
    assert!(events.iter().any(|event| matches!(
        event,
        Event::ParticipantRelocated { participant, instance: None, .. } if *participant == p(1)
    )));
    assert!(events.iter().any(|event| matches!(
        event,
        Event::InstanceTornDown { deleted: true, .. }
    )));
    assert!(events.iter().any(|event| matches!(
        event,
        Event::QueueLeft { participants, .. } if participants == &vec![p(2)]
    )));
    assert!(query::sessions(&harness.world).is_empty());
    assert!(query::live_instances(&harness.world).is_empty());
    assert!(harness.ledger.snapshot().stored.is_empty());
}

#[test]
fn quick_queue_counts_down_before_release() {
    let mut config = OrchestratorConfig::default();
    config.queue.min_players = 2;
    config.queue.auto_start = false;
    config.queue.countdown_seconds = 10;
    let mut harness = Harness::with(
        vec![spec("alpha")],
        config,
        flat_factory(),
        SyntheticTeams::new(),
    );
    harness.connect(&[1, 2]);

    let first = harness.run(Command::JoinQuickQueue { participant: p(1) });
    assert!(first.contains(&Event::QuickQueueUpdated {
        waiting: 1,
        required: 2,
        countdown: None,
    }));
    let second = harness.run(Command::JoinQuickQueue { participant: p(2) });
    assert!(second.contains(&Event::QuickQueueUpdated {
        waiting: 2,
        required: 2,
        countdown: Some(10),
    }));

    let waiting = harness.tick_until(9);
    assert!(released(&waiting).is_empty(), "the countdown is still running");
    let release = harness.tick();
    assert_eq!(released(&release), vec![(SessionId::new(1), vec![p(1), p(2)])]);
    assert_eq!(query::queue_status(&harness.world).quick_waiting, 0);
}

#[test]
fn quick_queue_waits_for_a_lobby_some_template_accepts() {
    let mut harness = Harness::new(vec![TemplateSpec {
        min_players: 2,
        ..spec("alpha")
    }]);
    harness.connect(&[1, 2]);

    let alone = harness.run(Command::JoinQuickQueue { participant: p(1) });
    assert!(released(&alone).is_empty(), "one player is below every minimum");
    assert!(alone.contains(&Event::QuickQueueUpdated {
        waiting: 1,
        required: 2,
        countdown: None,
    }));
    let still = harness.tick_until(3);
    assert!(released(&still).is_empty());
    assert_eq!(query::queue_status(&harness.world).quick_waiting, 1);

    let pair = harness.run(Command::JoinQuickQueue { participant: p(2) });
    assert_eq!(released(&pair), vec![(SessionId::new(1), vec![p(1), p(2)])]);
}

#[test]
fn quick_queue_overflow_stays_in_the_lobby() {
    let mut config = OrchestratorConfig::default();
    config.queue.auto_start = false;
    config.queue.countdown_seconds = 10;
    let mut harness = Harness::with(
        vec![TemplateSpec {
            max_players: 2,
            ..spec("alpha")
        }],
        config,
        flat_factory(),
        SyntheticTeams::new(),
    );
    harness.connect(&[1, 2, 3]);
    for id in 1..=3 {
        let _ = harness.run(Command::JoinQuickQueue { participant: p(id) });
    }

    let release = harness.tick_until(10);
    assert_eq!(
        released(&release),
        vec![(SessionId::new(1), vec![p(1), p(2)])],
        "the cohort stops at the template's player cap"
    );
    assert_eq!(query::queue_status(&harness.world).quick_waiting, 1);
    assert!(query::available_participants(&harness.world).is_empty());
}

#[test]
fn leaving_a_queue_keeps_the_rest_waiting() {
    let mut harness = Harness::new(vec![TemplateSpec {
        min_players: 3,
        ..spec("alpha")
    }]);
    harness.connect(&[1, 2, 3]);
    let _ = harness.join("alpha", 1);
    let _ = harness.join("alpha", 3);
    let _ = harness.tick_until(2);

    let left = harness.run(Command::LeaveQueue { participant: p(3) });
    assert_eq!(
        left,
        vec![Event::QueueLeft {
            template: TemplateId::new("alpha"),
            participants: vec![p(3)],
        }]
    );

    let _ = harness.join("alpha", 2);
    let rejoined = harness.join("alpha", 3);
    assert_eq!(
        released(&rejoined),
        vec![(SessionId::new(1), vec![p(1), p(2), p(3)])]
    );
}

#[test]
fn scripted_replay_is_deterministic() {
    let first = replay();
    let second = replay();
    assert_eq!(first, second, "replay diverged between runs");
    assert!(first
        .iter()
        .any(|event| matches!(event, Event::SessionEnded { .. })));
}

fn replay() -> Vec<Event> {
    let mut harness = Harness::new(vec![TemplateSpec {
        min_players: 2,
        duration_minutes: 1,
        ..spec("alpha")
    }]);
    harness.connect(&[1, 2, 3]);
    let mut log = Vec::new();
    log.extend(harness.join("alpha", 1));
    log.extend(harness.join("alpha", 2));
    log.extend(harness.tick_until(8));
    log.extend(harness.run(Command::Died { participant: p(2) }));
    log.extend(harness.run(Command::JoinQuickQueue { participant: p(3) }));
    log.extend(harness.tick_until(90));
    log.extend(harness.run(Command::Respawned { participant: p(2) }));
    log
}
