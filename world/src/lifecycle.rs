use std::panic::{self, AssertUnwindSafe};

use exfil_core::{
    CarriedItem, EndReason, Event, ExtractionMethod, HomeResolver, Instance, Location,
    ParticipantId, SessionId,
};
use exfil_system_session::{Outcome, Session, TickOutcome};
use tracing::{debug, error, info, warn};

use crate::{PendingOutcome, Teardown, World};

impl World {
    /// Live session the participant is mapped to.
    ///
    /// A mapping that points at a session no longer registered is removed.
    pub(crate) fn session_of(&mut self, participant: ParticipantId) -> Option<SessionId> {
        let id = *self.participant_sessions.get(&participant)?;
        if self.sessions.contains_key(&id) {
            return Some(id);
        }
        warn!(
            target: "exfil::world",
            %participant,
            session = id.get(),
            "participant mapped to a missing session; unmapping"
        );
        let _ = self.participant_sessions.remove(&participant);
        None
    }

    /// Runs one step of a session against a copy and commits it on success.
    ///
    /// A panicking step leaves the session untouched, drops the events it
    /// staged and reports [`Event::SessionFaulted`].
    pub(crate) fn guarded<T>(
        &mut self,
        id: SessionId,
        stage: &'static str,
        out_events: &mut Vec<Event>,
        step: impl FnOnce(&mut Session, &dyn HomeResolver, &mut Vec<Event>) -> T,
    ) -> Option<T> {
        let mut draft = self.sessions.get(&id)?.clone();
        let homes = &*self.homes;
        let mut staged = Vec::new();
        let result = panic::catch_unwind(AssertUnwindSafe(|| step(&mut draft, homes, &mut staged)));
        match result {
            Ok(value) => {
                let _ = self.sessions.insert(id, draft);
                out_events.append(&mut staged);
                Some(value)
            }
            Err(_) => {
                error!(target: "exfil::world", session = id.get(), stage, "session step panicked");
                out_events.push(Event::SessionFaulted { session: id, stage });
                None
            }
        }
    }

    /// Unmaps departed participants and holds their deferred outcomes.
    pub(crate) fn settle(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        for departure in session.drain_departures() {
            let participant = departure.participant;
            if self.participant_sessions.get(&participant) == Some(&id) {
                let _ = self.participant_sessions.remove(&participant);
            }
            if departure.deferred {
                let _ = self.outcomes.insert(
                    participant,
                    PendingOutcome {
                        session: id,
                        outcome: departure.outcome,
                    },
                );
            } else {
                let _ = self.outcomes.remove(&participant);
            }
        }
    }

    pub(crate) fn settle_and_check(&mut self, id: SessionId, out_events: &mut Vec<Event>) {
        self.settle(id);
        let complete = self
            .sessions
            .get(&id)
            .is_some_and(|session| session.is_active() && session.is_complete());
        if complete {
            let _ = self.end_session(id, EndReason::Completed, out_events);
        }
    }

    pub(crate) fn tick_sessions(&mut self, out_events: &mut Vec<Event>) {
        let now = self.now;
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in ids {
            let outcome = self.guarded(id, "tick", out_events, |session, homes, out| {
                session.tick(now, homes, out)
            });
            self.settle(id);
            if let Some(TickOutcome::End(reason)) = outcome {
                let _ = self.end_session(id, reason, out_events);
            }
        }
    }

    /// Ends a session, removes it from the registries and schedules the
    /// teardown of its instance.
    pub(crate) fn end_session(
        &mut self,
        id: SessionId,
        reason: EndReason,
        out_events: &mut Vec<Event>,
    ) -> bool {
        let _ = self.guarded(id, "end", out_events, |session, homes, out| {
            session.end(reason, homes, out)
        });
        self.settle(id);
        let Some(session) = self.sessions.remove(&id) else {
            return false;
        };
        self.participant_sessions.retain(|_, mapped| *mapped != id);

        if let Some(instance) = self.instances.remove(&id) {
            let at = self
                .now
                .plus_secs(self.config.cleanup.effective_delay_seconds());
            out_events.push(Event::TeardownScheduled {
                session: id,
                instance: instance.name().to_owned(),
                at,
            });
            self.teardowns.push(Teardown { instance, at });
        }
        info!(
            target: "exfil::world",
            session = id.get(),
            template = %session.template(),
            ?reason,
            extracted = session.extracted().len(),
            dead = session.dead().len(),
            "session removed from registry"
        );
        true
    }

    pub(crate) fn run_teardowns(&mut self, out_events: &mut Vec<Event>) {
        let now = self.now;
        let (due, waiting): (Vec<Teardown>, Vec<Teardown>) = std::mem::take(&mut self.teardowns)
            .into_iter()
            .partition(|teardown| teardown.at <= now);
        self.teardowns = waiting;
        for teardown in due {
            self.tear_down(teardown.instance, out_events);
        }
    }

    pub(crate) fn tear_down(&mut self, instance: Box<dyn Instance>, out_events: &mut Vec<Event>) {
        let name = instance.name().to_owned();
        let deleted = self.config.cleanup.delete_storage_on_end;
        if deleted {
            self.factory.discard(instance);
        } else {
            self.factory.unload(instance);
        }
        debug!(target: "exfil::world", instance = %name, deleted, "instance torn down");
        out_events.push(Event::InstanceTornDown {
            instance: name,
            deleted,
        });
    }

    /// Handles a participant connecting or respawning.
    ///
    /// A held outcome is delivered first; otherwise an open disconnect in the
    /// participant's session is resolved.
    pub(crate) fn participant_returned(
        &mut self,
        participant: ParticipantId,
        out_events: &mut Vec<Event>,
    ) {
        if let Some(pending) = self.outcomes.remove(&participant) {
            self.deliver(participant, pending, out_events);
            return;
        }
        let Some(id) = self.session_of(participant) else {
            return;
        };
        let now = self.now;
        let _ = self.guarded(id, "reconnect", out_events, |session, homes, out| {
            session.reconnect(participant, now, homes, out)
        });
        self.settle_and_check(id, out_events);
    }

    fn deliver(
        &mut self,
        participant: ParticipantId,
        pending: PendingOutcome,
        out_events: &mut Vec<Event>,
    ) {
        out_events.push(Event::ParticipantRelocated {
            participant,
            instance: None,
            to: self.home_of(participant),
        });
        if pending.outcome == Outcome::Forfeited {
            out_events.push(Event::InventoryCleared { participant });
        }
        out_events.push(Event::Notice {
            participant,
            text: pending.outcome.message(pending.session),
        });
    }

    pub(crate) fn participant_left(
        &mut self,
        participant: ParticipantId,
        location: Location,
        items: Vec<CarriedItem>,
        out_events: &mut Vec<Event>,
    ) {
        let _ = self.online.remove(&participant);
        if self.quick.leave(participant) {
            out_events.push(Event::QuickQueueUpdated {
                waiting: self.quick.len(),
                required: self.quick_required(),
                countdown: None,
            });
        }
        let Some(id) = self.session_of(participant) else {
            return;
        };
        let now = self.now;
        let _ = self.guarded(id, "disconnect", out_events, move |session, _, out| {
            session.disconnect(participant, location, items, now, out)
        });
    }

    pub(crate) fn report_position(&mut self, participant: ParticipantId, location: Location) {
        if let Some(id) = self.session_of(participant) {
            if let Some(session) = self.sessions.get_mut(&id) {
                session.report_position(participant, location);
            }
        }
    }

    pub(crate) fn participant_died(
        &mut self,
        participant: ParticipantId,
        out_events: &mut Vec<Event>,
    ) {
        let Some(id) = self.session_of(participant) else {
            return;
        };
        let _ = self.guarded(id, "death", out_events, |session, _, out| {
            session.die(participant, out)
        });
        self.settle_and_check(id, out_events);
    }

    pub(crate) fn extract(
        &mut self,
        participant: ParticipantId,
        method: ExtractionMethod,
        out_events: &mut Vec<Event>,
    ) {
        let Some(id) = self.session_of(participant) else {
            return;
        };
        let _ = self.guarded(id, "extract", out_events, |session, homes, out| {
            session.extract(participant, method, homes, out)
        });
        self.settle_and_check(id, out_events);
    }

    pub(crate) fn boss_defeated(&mut self, instance: &str, out_events: &mut Vec<Event>) {
        let Some(id) = self
            .sessions
            .values()
            .find(|session| session.instance() == instance)
            .map(Session::id)
        else {
            debug!(target: "exfil::world", instance, "boss defeat outside any session");
            return;
        };
        let now = self.now;
        let _ = self.guarded(id, "boss", out_events, |session, _, out| {
            session.boss_defeated(now, out)
        });
    }
}
