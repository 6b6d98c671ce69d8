use std::collections::{BTreeMap, BTreeSet};

use exfil_core::{
    CarriedItem, EndReason, EnvironmentKind, Event, ExtractionMethod, HomeResolver, Location,
    ParticipantId, SessionId, SessionRules, TemplateId, Timestamp,
};
use tracing::{debug, info};

use crate::{
    disconnect::{DisconnectInfo, Return},
    outcome::{Departure, Outcome},
};

/// Everything needed to open a session on a prepared instance.
#[derive(Clone, Debug)]
pub struct SessionPlan {
    /// Session id, also naming the instance.
    pub id: SessionId,
    /// Template the session runs.
    pub template: TemplateId,
    /// Storage name of the instance.
    pub instance: String,
    /// Environment of the instance.
    pub environment: EnvironmentKind,
    /// Resolved timing and extraction rules.
    pub rules: SessionRules,
    /// Extraction point.
    pub extraction: Location,
    /// Visual cue emitted at the open extraction point.
    pub beacon: String,
    /// Participants with their spawn locations.
    pub spawns: Vec<(ParticipantId, Location)>,
    /// When the participants were placed.
    pub placed_at: Timestamp,
}

/// Lifecycle state; `Ended` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Running.
    Active,
    /// Finished for the given reason.
    Ended(EndReason),
}

/// What the owner must do after a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Keep the session running.
    Continue,
    /// End the session for the given reason.
    End(EndReason),
}

/// One running raid.
#[derive(Clone, Debug)]
pub struct Session {
    id: SessionId,
    template: TemplateId,
    instance: String,
    environment: EnvironmentKind,
    rules: SessionRules,
    extraction: Location,
    beacon: String,
    participants: BTreeSet<ParticipantId>,
    state: SessionState,
    placed_at: Timestamp,
    protection_until: Timestamp,
    extraction_available_at: Option<Timestamp>,
    conditional_unlocked: bool,
    extraction_announced: bool,
    final_phase_announced: bool,
    channel: BTreeMap<ParticipantId, u32>,
    extracted: BTreeSet<ParticipantId>,
    dead: BTreeSet<ParticipantId>,
    disconnects: BTreeMap<ParticipantId, DisconnectInfo>,
    positions: BTreeMap<ParticipantId, Location>,
    viewers: BTreeSet<ParticipantId>,
    departures: Vec<Departure>,
}

impl Session {
    /// Opens the session: places every participant and starts spawn protection.
    ///
    /// The duration clock and the extraction offset start once protection ends.
    pub fn start(plan: SessionPlan, out: &mut Vec<Event>) -> Self {
        let protection_until = plan
            .placed_at
            .plus_secs(u64::from(plan.rules.spawn_protection_seconds));
        let extraction_available_at = plan
            .rules
            .extraction_open_after_seconds
            .map(|offset| protection_until.plus_secs(offset));

        let mut session = Self {
            id: plan.id,
            template: plan.template,
            instance: plan.instance,
            environment: plan.environment,
            rules: plan.rules,
            extraction: plan.extraction,
            beacon: plan.beacon,
            participants: BTreeSet::new(),
            state: SessionState::Active,
            placed_at: plan.placed_at,
            protection_until,
            extraction_available_at,
            conditional_unlocked: false,
            extraction_announced: false,
            final_phase_announced: false,
            channel: BTreeMap::new(),
            extracted: BTreeSet::new(),
            dead: BTreeSet::new(),
            disconnects: BTreeMap::new(),
            positions: BTreeMap::new(),
            viewers: BTreeSet::new(),
            departures: Vec::new(),
        };

        out.push(Event::SessionStarted {
            session: session.id,
            template: session.template.clone(),
            instance: session.instance.clone(),
            participants: plan.spawns.iter().map(|(participant, _)| *participant).collect(),
            extraction: session.extraction,
        });
        for (participant, spawn) in plan.spawns {
            let _ = session.participants.insert(participant);
            let _ = session
                .channel
                .insert(participant, session.rules.channel_seconds);
            let _ = session.positions.insert(participant, spawn);
            out.push(Event::ParticipantRelocated {
                participant,
                instance: Some(session.instance.clone()),
                to: spawn,
            });
            out.push(Event::CompassIssued {
                participant,
                target: session.extraction,
            });
            session.attach(participant, out);
            out.push(Event::Notice {
                participant,
                text: format!(
                    "Spawn protection {}s",
                    session.rules.spawn_protection_seconds
                ),
            });
        }

        info!(
            target: "exfil::session",
            session = session.id.get(),
            template = %session.template,
            instance = %session.instance,
            participants = session.participants.len(),
            "session started"
        );
        session
    }

    /// Session id.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Template the session runs.
    #[must_use]
    pub fn template(&self) -> &TemplateId {
        &self.template
    }

    /// Storage name of the instance.
    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Environment of the instance.
    #[must_use]
    pub const fn environment(&self) -> EnvironmentKind {
        self.environment
    }

    /// Resolved rules.
    #[must_use]
    pub const fn rules(&self) -> &SessionRules {
        &self.rules
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Reports whether the session still runs.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Extraction point.
    #[must_use]
    pub const fn extraction_point(&self) -> Location {
        self.extraction
    }

    /// Everyone placed in the session.
    #[must_use]
    pub fn participants(&self) -> &BTreeSet<ParticipantId> {
        &self.participants
    }

    /// Participants that extracted.
    #[must_use]
    pub fn extracted(&self) -> &BTreeSet<ParticipantId> {
        &self.extracted
    }

    /// Participants that died or forfeited.
    #[must_use]
    pub fn dead(&self) -> &BTreeSet<ParticipantId> {
        &self.dead
    }

    /// Participants neither extracted nor dead, in id order.
    #[must_use]
    pub fn active_roster(&self) -> Vec<ParticipantId> {
        self.participants
            .iter()
            .copied()
            .filter(|participant| self.in_roster(*participant))
            .collect()
    }

    /// Reports whether the participant is on the active roster.
    #[must_use]
    pub fn in_roster(&self, participant: ParticipantId) -> bool {
        self.participants.contains(&participant)
            && !self.extracted.contains(&participant)
            && !self.dead.contains(&participant)
    }

    /// Reports whether the participant is disconnected and not yet forfeited.
    #[must_use]
    pub fn is_away(&self, participant: ParticipantId) -> bool {
        self.disconnects
            .get(&participant)
            .map_or(false, |record| !record.forfeited())
    }

    /// Disconnect record of a participant, if any.
    #[must_use]
    pub fn disconnect_info(&self, participant: ParticipantId) -> Option<&DisconnectInfo> {
        self.disconnects.get(&participant)
    }

    /// Channel seconds a participant still needs.
    #[must_use]
    pub fn channel_remaining(&self, participant: ParticipantId) -> Option<u32> {
        self.channel.get(&participant).copied()
    }

    /// Participants currently shown the progress display.
    #[must_use]
    pub fn viewers(&self) -> &BTreeSet<ParticipantId> {
        &self.viewers
    }

    /// When participants were placed.
    #[must_use]
    pub const fn placed_at(&self) -> Timestamp {
        self.placed_at
    }

    /// When spawn protection ends and the clock starts.
    #[must_use]
    pub const fn protection_until(&self) -> Timestamp {
        self.protection_until
    }

    /// When time-based extraction opens; `None` until a conditional unlock.
    #[must_use]
    pub const fn extraction_available_at(&self) -> Option<Timestamp> {
        self.extraction_available_at
    }

    /// Reports whether spawn protection is still running.
    #[must_use]
    pub fn is_protected(&self, now: Timestamp) -> bool {
        now < self.protection_until
    }

    /// Seconds left on the session clock.
    #[must_use]
    pub fn remaining_seconds(&self, now: Timestamp) -> u64 {
        self.rules
            .duration_seconds
            .saturating_sub(now.secs_since(self.protection_until))
    }

    /// Reports whether extraction is open.
    #[must_use]
    pub fn is_extraction_unlocked(&self, now: Timestamp) -> bool {
        if self.conditional_unlocked {
            return true;
        }
        self.extraction_available_at
            .map_or(false, |available_at| now >= available_at)
    }

    /// Reports whether the opening was announced.
    #[must_use]
    pub const fn extraction_announced(&self) -> bool {
        self.extraction_announced
    }

    /// Reports whether nobody is left and no absence is still pending.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.active_roster().is_empty()
            && self.disconnects.values().all(DisconnectInfo::forfeited)
    }

    /// Hands out the departures recorded since the last call.
    pub fn drain_departures(&mut self) -> Vec<Departure> {
        std::mem::take(&mut self.departures)
    }

    /// Records where a participant currently stands.
    pub fn report_position(&mut self, participant: ParticipantId, location: Location) {
        if self.participants.contains(&participant) {
            let _ = self.positions.insert(participant, location);
        }
    }

    /// Advances the session by one heartbeat.
    pub fn tick<H>(&mut self, now: Timestamp, homes: &H, out: &mut Vec<Event>) -> TickOutcome
    where
        H: HomeResolver + ?Sized,
    {
        if !self.is_active() {
            return TickOutcome::Continue;
        }

        let remaining = self.remaining_seconds(now);
        let duration = self.rules.duration_seconds.max(1);
        out.push(Event::ProgressUpdated {
            session: self.id,
            fraction: (1.0 - remaining as f64 / duration as f64).clamp(0.0, 1.0),
            remaining_seconds: remaining,
            critical: remaining <= self.rules.critical_seconds,
        });

        if self.is_protected(now) {
            let left = self.protection_until.secs_since(now);
            for participant in self.active_roster() {
                if !self.is_away(participant) {
                    out.push(Event::ProtectionNotice {
                        session: self.id,
                        participant,
                        remaining_seconds: left,
                    });
                }
            }
            return TickOutcome::Continue;
        }

        if self.is_extraction_unlocked(now) {
            if !self.extraction_announced {
                self.extraction_announced = true;
                out.push(Event::ExtractionOpened { session: self.id });
                info!(
                    target: "exfil::session",
                    session = self.id.get(),
                    remaining,
                    "extraction opened"
                );
            }
            out.push(Event::ExtractionBeacon {
                session: self.id,
                point: self.extraction,
                radius: self.rules.extraction_radius,
                beacon: self.beacon.clone(),
            });
            self.channel_all(homes, out);
        }

        if !self.final_phase_announced && remaining <= self.rules.final_phase_seconds {
            self.final_phase_announced = true;
            out.push(Event::FinalPhase {
                session: self.id,
                remaining_seconds: remaining,
            });
        }

        if remaining == 0 {
            TickOutcome::End(EndReason::Timeout)
        } else if self.active_roster().is_empty() {
            TickOutcome::End(EndReason::Completed)
        } else {
            TickOutcome::Continue
        }
    }

    fn channel_all<H>(&mut self, homes: &H, out: &mut Vec<Event>)
    where
        H: HomeResolver + ?Sized,
    {
        let required = self.rules.channel_seconds;
        let radius_squared = self.rules.extraction_radius * self.rules.extraction_radius;
        for participant in self.active_roster() {
            if self.is_away(participant) {
                continue;
            }
            let Some(position) = self.positions.get(&participant).copied() else {
                continue;
            };
            if position.distance_squared(&self.extraction) > radius_squared {
                let _ = self.channel.insert(participant, required);
                continue;
            }
            let left = self
                .channel
                .get(&participant)
                .copied()
                .unwrap_or(required)
                .saturating_sub(1);
            let _ = self.channel.insert(participant, left);
            out.push(Event::ChannelProgress {
                session: self.id,
                participant,
                remaining_seconds: left,
            });
            if left == 0 {
                let _ = self.extract(participant, ExtractionMethod::Channel, homes, out);
            }
        }
    }

    /// Extracts a participant; ignored when not on the active roster.
    ///
    /// Portal extraction only counts in island instances.
    pub fn extract<H>(
        &mut self,
        participant: ParticipantId,
        method: ExtractionMethod,
        homes: &H,
        out: &mut Vec<Event>,
    ) -> bool
    where
        H: HomeResolver + ?Sized,
    {
        if !self.is_active() || !self.in_roster(participant) {
            return false;
        }
        if method == ExtractionMethod::Portal && self.environment != EnvironmentKind::Islands {
            return false;
        }

        let away = self.is_away(participant);
        let _ = self.extracted.insert(participant);
        let _ = self.channel.remove(&participant);
        let _ = self.disconnects.remove(&participant);
        let outcome = Outcome::Extracted(method);
        if !away {
            out.push(Event::ParticipantRelocated {
                participant,
                instance: None,
                to: home_of(homes, participant),
            });
            out.push(Event::Notice {
                participant,
                text: outcome.message(self.id),
            });
        }
        self.detach(participant, out);
        out.push(Event::ParticipantExtracted {
            session: self.id,
            participant,
            method,
        });
        self.departures.push(Departure {
            participant,
            outcome,
            deferred: away,
        });
        info!(
            target: "exfil::session",
            session = self.id.get(),
            %participant,
            ?method,
            "participant extracted"
        );
        true
    }

    /// Records a death; ignored when not on the active roster.
    pub fn die(&mut self, participant: ParticipantId, out: &mut Vec<Event>) -> bool {
        if !self.is_active() || !self.in_roster(participant) {
            return false;
        }
        let _ = self.dead.insert(participant);
        let _ = self.channel.remove(&participant);
        self.detach(participant, out);
        out.push(Event::ParticipantDied {
            session: self.id,
            participant,
        });
        self.departures.push(Departure {
            participant,
            outcome: Outcome::Died,
            deferred: true,
        });
        true
    }

    /// Clears a death so the participant is back on the active roster.
    pub fn revive(&mut self, participant: ParticipantId) -> bool {
        self.is_active() && self.dead.remove(&participant)
    }

    /// Snapshots a participant that left the host mid-session.
    ///
    /// The participant stays on the roster until it returns or forfeits.
    pub fn disconnect(
        &mut self,
        participant: ParticipantId,
        location: Location,
        items: Vec<CarriedItem>,
        now: Timestamp,
        out: &mut Vec<Event>,
    ) -> bool {
        if !self.is_active() || !self.in_roster(participant) || self.is_away(participant) {
            return false;
        }
        let _ = self.positions.insert(participant, location);
        let _ = self
            .disconnects
            .insert(participant, DisconnectInfo::new(location, now, items));
        self.detach(participant, out);
        out.push(Event::ParticipantDisconnected {
            session: self.id,
            participant,
        });
        debug!(
            target: "exfil::session",
            session = self.id.get(),
            %participant,
            "participant disconnected"
        );
        true
    }

    /// Handles a participant coming back after a disconnect.
    ///
    /// Inside the grace window the participant is teleported back to where it
    /// left. Otherwise its items drop at that spot, its inventory is cleared and
    /// it leaves the roster. Forfeiture happens at most once.
    pub fn reconnect<H>(
        &mut self,
        participant: ParticipantId,
        now: Timestamp,
        homes: &H,
        out: &mut Vec<Event>,
    ) -> Return
    where
        H: HomeResolver + ?Sized,
    {
        let (absent_seconds, location) = match self.disconnects.get(&participant) {
            None => return Return::NotAbsent,
            Some(record) if record.forfeited() => return Return::AlreadyForfeited,
            Some(record) => (record.absent_seconds(now), record.location()),
        };

        if absent_seconds < self.rules.grace_seconds && self.is_active() {
            let _ = self.disconnects.remove(&participant);
            out.push(Event::ParticipantRelocated {
                participant,
                instance: Some(self.instance.clone()),
                to: location.offset(0.0, 0.5, 0.0),
            });
            out.push(Event::CompassIssued {
                participant,
                target: self.extraction,
            });
            self.attach(participant, out);
            out.push(Event::Notice {
                participant,
                text: format!("Rejoined Raid #{}. Absent {absent_seconds}s", self.id.get()),
            });
            out.push(Event::ParticipantRejoined {
                session: self.id,
                participant,
                absent_seconds,
            });
            debug!(
                target: "exfil::session",
                session = self.id.get(),
                %participant,
                absent_seconds,
                "participant rejoined"
            );
            return Return::Rejoined { absent_seconds };
        }

        let items = self
            .disconnects
            .get_mut(&participant)
            .and_then(DisconnectInfo::forfeit)
            .unwrap_or_default();
        out.push(Event::ItemsDropped {
            participant,
            at: location,
            items,
        });
        out.push(Event::InventoryCleared { participant });
        if self.in_roster(participant) {
            let _ = self.dead.insert(participant);
            let _ = self.channel.remove(&participant);
        }
        out.push(Event::ParticipantForfeited {
            session: self.id,
            participant,
        });
        out.push(Event::ParticipantRelocated {
            participant,
            instance: None,
            to: home_of(homes, participant),
        });
        out.push(Event::Notice {
            participant,
            text: Outcome::Forfeited.message(self.id),
        });
        self.departures.push(Departure {
            participant,
            outcome: Outcome::Forfeited,
            deferred: false,
        });
        info!(
            target: "exfil::session",
            session = self.id.get(),
            %participant,
            absent_seconds,
            "participant forfeited"
        );
        Return::Forfeited
    }

    /// Opens extraction immediately.
    pub fn unlock(&mut self, now: Timestamp, out: &mut Vec<Event>) -> bool {
        if !self.is_active() {
            return false;
        }
        self.extraction_available_at = Some(now);
        self.conditional_unlocked = true;
        self.notify_present("Extraction unlocked early!", out);
        true
    }

    /// Opens extraction of a conditionally unlocked session after its boss fell.
    pub fn boss_defeated(&mut self, now: Timestamp, out: &mut Vec<Event>) -> bool {
        if !self.is_active()
            || self.rules.extraction_open_after_seconds.is_some()
            || self.conditional_unlocked
        {
            return false;
        }
        self.conditional_unlocked = true;
        self.extraction_available_at = Some(now);
        self.notify_present("Boss defeated! Extraction now ACTIVE.", out);
        true
    }

    /// Ends the session.
    ///
    /// On timeout every remaining participant fails. On an outside end they
    /// are sent home. Outstanding absences are forfeited either way, dropping
    /// the absent participant's items where they left, and every participant
    /// still on the roster is reported as a departure.
    pub fn end<H>(&mut self, reason: EndReason, homes: &H, out: &mut Vec<Event>) -> bool
    where
        H: HomeResolver + ?Sized,
    {
        if !self.is_active() {
            return false;
        }
        self.state = SessionState::Ended(reason);

        for participant in self.active_roster() {
            if self.is_away(participant) {
                continue;
            }
            let outcome = match reason {
                EndReason::Timeout => Outcome::TimedOut,
                other => Outcome::Ended(other),
            };
            let deferred = reason == EndReason::Timeout;
            if deferred {
                out.push(Event::ParticipantFailed {
                    session: self.id,
                    participant,
                });
            } else {
                out.push(Event::ParticipantRelocated {
                    participant,
                    instance: None,
                    to: home_of(homes, participant),
                });
            }
            out.push(Event::Notice {
                participant,
                text: outcome.message(self.id),
            });
            self.departures.push(Departure {
                participant,
                outcome,
                deferred,
            });
        }

        for viewer in std::mem::take(&mut self.viewers) {
            out.push(Event::ProgressDetached {
                session: self.id,
                participant: viewer,
            });
        }

        for (participant, record) in &mut self.disconnects {
            let at = record.location();
            if let Some(items) = record.forfeit() {
                out.push(Event::ItemsDropped {
                    participant: *participant,
                    at,
                    items,
                });
                self.departures.push(Departure {
                    participant: *participant,
                    outcome: Outcome::Forfeited,
                    deferred: true,
                });
            }
        }

        out.push(Event::SessionEnded {
            session: self.id,
            reason,
        });
        info!(
            target: "exfil::session",
            session = self.id.get(),
            ?reason,
            extracted = self.extracted.len(),
            dead = self.dead.len(),
            "session ended"
        );
        true
    }

    fn notify_present(&self, text: &str, out: &mut Vec<Event>) {
        for participant in self.active_roster() {
            if !self.is_away(participant) {
                out.push(Event::Notice {
                    participant,
                    text: text.to_owned(),
                });
            }
        }
    }

    fn attach(&mut self, participant: ParticipantId, out: &mut Vec<Event>) {
        if self.viewers.insert(participant) {
            out.push(Event::ProgressAttached {
                session: self.id,
                participant,
            });
        }
    }

    fn detach(&mut self, participant: ParticipantId, out: &mut Vec<Event>) {
        if self.viewers.remove(&participant) {
            out.push(Event::ProgressDetached {
                session: self.id,
                participant,
            });
        }
    }
}

fn home_of<H: HomeResolver + ?Sized>(homes: &H, participant: ParticipantId) -> Location {
    homes
        .resolve_home(participant)
        .unwrap_or_else(|| homes.fallback())
}
