use std::collections::BTreeSet;

use exfil_core::{
    EndReason, Event, ExtractionMethod, ForceEndTarget, Instance, ParticipantId, SessionId,
    TemplateCatalog, TemplateId, UnlockTarget, INSTANCE_NAME_PREFIX,
};
use exfil_system_admission::Availability;
use exfil_system_session::Session;
use tracing::{info, warn};

use crate::World;

impl World {
    /// Starts a session immediately, bypassing queue thresholds.
    ///
    /// The template is the named one, else the first with a waiting queue,
    /// else the first offered. The cohort is that template's whole queue, or
    /// the initiator alone when nobody waits. Forced participants leave any
    /// other queue they wait in, taking their queued team with them.
    pub(crate) fn force_start(
        &mut self,
        template: Option<&TemplateId>,
        initiator: ParticipantId,
        out_events: &mut Vec<Event>,
    ) {
        let chosen = template
            .and_then(|id| self.catalog.get(id))
            .or_else(|| {
                self.catalog
                    .templates()
                    .iter()
                    .find(|template| self.queue.queued_players(template.id()) > 0)
            })
            .or_else(|| self.catalog.first())
            .cloned();
        let Some(template) = chosen else {
            out_events.push(Event::Notice {
                participant: initiator,
                text: "No templates available.".to_owned(),
            });
            return;
        };

        let mut candidates: Vec<ParticipantId> = self
            .queue
            .take_all(template.id())
            .iter()
            .flat_map(|team| team.members().iter().copied())
            .collect();
        if candidates.is_empty() {
            candidates.push(initiator);
        }
        let participants: Vec<ParticipantId> = candidates
            .into_iter()
            .filter(|participant| self.is_online(*participant) && !self.in_session(*participant))
            .collect();
        if participants.is_empty() {
            out_events.push(Event::Notice {
                participant: initiator,
                text: "No eligible players to start.".to_owned(),
            });
            return;
        }
        for participant in &participants {
            if let Some((queued, team)) = self.queue.leave(*participant) {
                out_events.push(Event::QueueLeft {
                    template: queued,
                    participants: team.members().iter().copied().collect(),
                });
            }
            let _ = self.quick.leave(*participant);
        }

        info!(
            target: "exfil::admin",
            %initiator,
            template = %template.id(),
            participants = participants.len(),
            "forcing session start"
        );
        out_events.push(Event::Notice {
            participant: initiator,
            text: format!(
                "[Admin] Forcing raid start template={} players={}",
                template.id(),
                participants.len()
            ),
        });
        let _ = self.start_generation(template, participants, out_events);
    }

    pub(crate) fn force_end(&mut self, target: ForceEndTarget, out_events: &mut Vec<Event>) {
        let ids: Vec<SessionId> = match target {
            ForceEndTarget::All => self.sessions.keys().copied().collect(),
            ForceEndTarget::Participant(participant) => self
                .session_of(participant)
                .or_else(|| {
                    self.sessions
                        .values()
                        .find(|session| session.participants().contains(&participant))
                        .map(Session::id)
                })
                .into_iter()
                .collect(),
        };
        let mut count = 0_u32;
        for id in ids {
            if self.end_session(id, EndReason::Administrative, out_events) {
                count += 1;
            }
        }
        info!(target: "exfil::admin", count, "sessions force-ended");
        out_events.push(Event::SessionsForceEnded { count });
    }

    /// Extracts a participant administratively.
    ///
    /// With `treat_as_alive`, a participant that died in a live session is
    /// revived first and the held death outcome is replaced.
    pub(crate) fn force_extract(
        &mut self,
        participant: ParticipantId,
        treat_as_alive: bool,
        out_events: &mut Vec<Event>,
    ) {
        let id = self.session_of(participant).or_else(|| {
            if !treat_as_alive {
                return None;
            }
            self.sessions
                .values()
                .find(|session| session.is_active() && session.dead().contains(&participant))
                .map(Session::id)
        });
        let Some(id) = id else {
            warn!(target: "exfil::admin", %participant, "force extract outside any session");
            return;
        };
        let extracted = self.guarded(id, "extract", out_events, |session, homes, out| {
            if treat_as_alive {
                let _ = session.revive(participant);
            }
            session.extract(participant, ExtractionMethod::Administrative, homes, out)
        });
        if extracted == Some(true) {
            out_events.push(Event::Notice {
                participant,
                text: "[Admin] You were forcibly extracted.".to_owned(),
            });
        }
        self.settle_and_check(id, out_events);
    }

    pub(crate) fn unlock(&mut self, target: Option<&UnlockTarget>, out_events: &mut Vec<Event>) {
        let ids: Vec<SessionId> = match target {
            None => self.sessions.keys().copied().collect(),
            Some(UnlockTarget::Template(template)) => self
                .sessions
                .values()
                .filter(|session| session.template() == template)
                .map(Session::id)
                .collect(),
            Some(UnlockTarget::Participant(participant)) => {
                self.session_of(*participant).into_iter().collect()
            }
        };
        if ids.is_empty() {
            warn!(target: "exfil::admin", "no matching active session for unlock");
        }
        let now = self.now;
        for id in ids {
            let _ = self.guarded(id, "unlock", out_events, |session, _, out| {
                session.unlock(now, out)
            });
        }
    }

    /// Deletes stored raid instances no live session owns.
    pub(crate) fn prune_stale(&mut self, out_events: &mut Vec<Event>) {
        let mut keep: BTreeSet<String> = self
            .sessions
            .values()
            .map(|session| session.instance().to_owned())
            .collect();
        keep.extend(
            self.teardowns
                .iter()
                .map(|teardown| teardown.instance.name().to_owned()),
        );
        keep.extend(
            self.jobs
                .iter()
                .map(|pending| pending.job.session().instance_name()),
        );

        let factory = &mut self.factory;
        let removed: Vec<String> = factory
            .stored_instances()
            .into_iter()
            .filter(|name| name.starts_with(INSTANCE_NAME_PREFIX) && !keep.contains(name))
            .filter(|name| factory.delete_stored(name))
            .collect();
        info!(target: "exfil::admin", removed = removed.len(), "stale instances pruned");
        out_events.push(Event::StaleInstancesPruned { removed });
    }

    /// Swaps the catalog and dissolves queues of templates no longer offered.
    pub(crate) fn reload_templates(
        &mut self,
        catalog: TemplateCatalog,
        out_events: &mut Vec<Event>,
    ) {
        self.catalog = catalog;
        for (template, team) in self.queue.retain_offered(&self.catalog) {
            let participants: Vec<ParticipantId> = team.members().iter().copied().collect();
            for participant in &participants {
                out_events.push(Event::Notice {
                    participant: *participant,
                    text: format!("Template {template} is no longer offered; left its queue."),
                });
            }
            out_events.push(Event::QueueLeft {
                template,
                participants,
            });
        }
        let count = u32::try_from(self.catalog.len()).unwrap_or(u32::MAX);
        info!(target: "exfil::admin", count, "templates reloaded");
        out_events.push(Event::TemplatesReloaded { count });
    }

    /// Cancels generation, ends every session, tears every instance down and
    /// empties the queues.
    pub(crate) fn shutdown(&mut self, out_events: &mut Vec<Event>) {
        for pending in std::mem::take(&mut self.jobs) {
            let mut job = pending.job;
            job.cancel(&mut *self.factory);
            out_events.push(Event::GenerationAbandoned {
                session: job.session(),
                template: job.template().id().clone(),
                participants: pending.participants,
                attempts: job.failed_attempts(),
            });
        }

        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in ids {
            let _ = self.end_session(id, EndReason::Shutdown, out_events);
        }
        for teardown in std::mem::take(&mut self.teardowns) {
            self.tear_down(teardown.instance, out_events);
        }

        for participant in self.quick.clear() {
            out_events.push(Event::Notice {
                participant,
                text: "Raid queue closed.".to_owned(),
            });
        }
        for status in self.queue.status() {
            let participants: Vec<ParticipantId> = self
                .queue
                .take_all(&status.template)
                .iter()
                .flat_map(|team| team.members().iter().copied())
                .collect();
            out_events.push(Event::QueueLeft {
                template: status.template,
                participants,
            });
        }
        info!(target: "exfil::admin", "orchestrator shut down");
    }
}
