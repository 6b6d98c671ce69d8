use std::panic::{self, AssertUnwindSafe};

use exfil_core::{Event, Instance, ParticipantId, SessionId, SessionRules, Template};
use exfil_system_generation::{
    attempt_rng, GenerationJob, GenerationSettings, JobStep, PreparedInstance, STREAM_PLACEMENT,
};
use exfil_system_placement::plan_placement;
use exfil_system_session::{Session, SessionPlan};
use tracing::{error, info, warn};

use crate::{PendingGeneration, World};

impl World {
    /// Reserves a session id and queues generation for a released cohort.
    pub(crate) fn start_generation(
        &mut self,
        template: Template,
        participants: Vec<ParticipantId>,
        out_events: &mut Vec<Event>,
    ) -> SessionId {
        let session = SessionId::new(self.next_session);
        self.next_session = self.next_session.saturating_add(1);

        info!(
            target: "exfil::world",
            session = session.get(),
            template = %template.id(),
            participants = participants.len(),
            "cohort released; generating instance"
        );
        out_events.push(Event::CohortReleased {
            session,
            template: template.id().clone(),
            participants: participants.clone(),
        });
        for participant in &participants {
            out_events.push(Event::Notice {
                participant: *participant,
                text: format!("Preparing raid world for {}...", template.display_name()),
            });
        }

        let settings = GenerationSettings::from_config(&self.config.generation);
        self.jobs.push(PendingGeneration {
            job: GenerationJob::new(session, template, settings),
            participants,
        });
        session
    }

    /// Advances every pending job by one bounded step.
    pub(crate) fn advance_generation(&mut self, out_events: &mut Vec<Event>) {
        for mut pending in std::mem::take(&mut self.jobs) {
            let session = pending.job.session();
            match self.advance_job(&mut pending.job) {
                JobStep::Waiting => self.jobs.push(pending),
                JobStep::FeatureSearched {
                    feature,
                    found,
                    step,
                    total,
                } => {
                    out_events.push(Event::FeatureSearched {
                        session,
                        feature,
                        found,
                        step,
                        total,
                    });
                    self.jobs.push(pending);
                }
                JobStep::AttemptFailed {
                    attempt,
                    failure,
                    exhausted,
                } => {
                    out_events.push(Event::GenerationAttemptFailed {
                        session,
                        attempt,
                        failure,
                    });
                    if exhausted {
                        self.abandon(pending, attempt, out_events);
                    } else {
                        self.jobs.push(pending);
                    }
                }
                JobStep::Ready(prepared) => self.open_session(pending, prepared, out_events),
            }
        }
    }

    fn advance_job(&mut self, job: &mut GenerationJob) -> JobStep {
        let factory = &mut *self.factory;
        match panic::catch_unwind(AssertUnwindSafe(|| job.advance(factory))) {
            Ok(step) => step,
            Err(_) => {
                error!(
                    target: "exfil::world",
                    session = job.session().get(),
                    "generation step panicked"
                );
                job.record_fault(&mut *self.factory)
            }
        }
    }

    fn abandon(&mut self, pending: PendingGeneration, attempts: u32, out_events: &mut Vec<Event>) {
        let PendingGeneration { job, participants } = pending;
        let template = job.template();
        warn!(
            target: "exfil::world",
            session = job.session().get(),
            template = %template.id(),
            attempts,
            "generation abandoned; cohort dissolved"
        );
        for participant in &participants {
            out_events.push(Event::Notice {
                participant: *participant,
                text: format!(
                    "World gen failed after {attempts} attempts for template {}",
                    template.display_name()
                ),
            });
        }
        out_events.push(Event::GenerationAbandoned {
            session: job.session(),
            template: template.id().clone(),
            participants,
            attempts,
        });
    }

    /// Places the cohort on a validated instance and registers the session.
    fn open_session(
        &mut self,
        pending: PendingGeneration,
        prepared: PreparedInstance,
        out_events: &mut Vec<Event>,
    ) {
        let PreparedInstance {
            mut instance,
            boundary,
            attempt,
            ..
        } = prepared;
        let session = pending.job.session();
        let template = pending.job.template().clone();
        let participants: Vec<ParticipantId> = pending
            .participants
            .iter()
            .copied()
            .filter(|participant| self.online.contains(participant))
            .collect();
        if participants.is_empty() {
            warn!(
                target: "exfil::world",
                session = session.get(),
                "every cohort member left during generation"
            );
            self.factory.discard(instance);
            self.abandon(pending, attempt, out_events);
            return;
        }

        let mut rng = attempt_rng(
            self.config.generation.seed,
            session,
            attempt,
            STREAM_PLACEMENT,
        );
        let rules = &self.config.spawn_safety;
        let placed = panic::catch_unwind(AssertUnwindSafe(|| {
            plan_placement(&mut *instance, &boundary, &participants, rules, &mut rng)
        }));
        let placement = match placed {
            Ok(placement) => placement,
            Err(_) => {
                self.fault_start(session, instance, "placement", out_events);
                self.abandon(pending, attempt, out_events);
                return;
            }
        };

        let plan = SessionPlan {
            id: session,
            template: template.id().clone(),
            instance: instance.name().to_owned(),
            environment: template.environment(),
            rules: SessionRules::resolve(&template, &self.config),
            extraction: placement.extraction.location,
            beacon: self.config.extraction.beacon.clone(),
            spawns: placement
                .spawns
                .iter()
                .map(|(participant, spawn)| (*participant, spawn.location))
                .collect(),
            placed_at: self.now,
        };
        let mut staged = Vec::new();
        let started = panic::catch_unwind(AssertUnwindSafe(|| Session::start(plan, &mut staged)));
        let started = match started {
            Ok(started) => started,
            Err(_) => {
                self.fault_start(session, instance, "start", out_events);
                self.abandon(pending, attempt, out_events);
                return;
            }
        };
        out_events.append(&mut staged);

        for participant in started.participants() {
            let _ = self.participant_sessions.insert(*participant, session);
            let _ = self.outcomes.remove(participant);
        }
        let _ = self.instances.insert(session, instance);
        let _ = self.sessions.insert(session, started);
    }

    fn fault_start(
        &mut self,
        session: SessionId,
        instance: Box<dyn Instance>,
        stage: &'static str,
        out_events: &mut Vec<Event>,
    ) {
        error!(target: "exfil::world", session = session.get(), stage, "session start panicked");
        out_events.push(Event::SessionFaulted { session, stage });
        self.factory.discard(instance);
    }
}
