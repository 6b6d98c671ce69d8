use exfil_core::{AdmissionError, Event, ParticipantId, Template, TemplateId};
use exfil_system_admission::QuickQueuePoll;
use tracing::debug;

use crate::{presence::Presence, World};

impl World {
    pub(crate) fn join_queue(
        &mut self,
        template: &TemplateId,
        participant: ParticipantId,
        out_events: &mut Vec<Event>,
    ) {
        let Some(template) = self.catalog.get(template).cloned() else {
            out_events.push(Event::AdmissionRejected {
                participant,
                reason: AdmissionError::UnknownTemplate(template.clone()),
            });
            return;
        };
        let team = self.teams.team_of(participant);
        let presence = Presence {
            online: &self.online,
            mapped: &self.participant_sessions,
            sessions: &self.sessions,
            jobs: &self.jobs,
            queue: None,
            quick: Some(&self.quick),
        };
        match self
            .queue
            .enqueue(&template, participant, team.as_ref(), self.now, &presence)
        {
            Ok(feedback) => {
                let participants = self
                    .queue
                    .entry(participant)
                    .map(|team| team.members().iter().copied().collect())
                    .unwrap_or_default();
                out_events.push(Event::QueueJoined {
                    template: template.id().clone(),
                    participants,
                    feedback,
                });
                self.release_template(&template, false, out_events);
            }
            Err(reason) => {
                debug!(target: "exfil::admission", %participant, %reason, "queue join rejected");
                out_events.push(Event::AdmissionRejected {
                    participant,
                    reason,
                });
            }
        }
    }

    pub(crate) fn join_quick_queue(
        &mut self,
        participant: ParticipantId,
        out_events: &mut Vec<Event>,
    ) {
        let presence = Presence {
            online: &self.online,
            mapped: &self.participant_sessions,
            sessions: &self.sessions,
            jobs: &self.jobs,
            queue: Some(&self.queue),
            quick: None,
        };
        match self.quick.join(participant, &presence) {
            Ok(_) => self.poll_quick_queue(out_events),
            Err(reason) => {
                debug!(target: "exfil::admission", %participant, %reason, "quick queue join rejected");
                out_events.push(Event::AdmissionRejected {
                    participant,
                    reason,
                });
            }
        }
    }

    pub(crate) fn leave_queue(&mut self, participant: ParticipantId, out_events: &mut Vec<Event>) {
        if let Some((template, team)) = self.queue.leave(participant) {
            out_events.push(Event::QueueLeft {
                template: template.clone(),
                participants: team.members().iter().copied().collect(),
            });
            if let Some(template) = self.catalog.get(&template).cloned() {
                self.release_template(&template, false, out_events);
            }
            return;
        }
        if self.quick.leave(participant) {
            out_events.push(Event::QuickQueueUpdated {
                waiting: self.quick.len(),
                required: self.quick_required(),
                countdown: self.quick.countdown_remaining(self.now, &self.config.queue),
            });
            return;
        }
        out_events.push(Event::Notice {
            participant,
            text: "Not queued for any template.".to_owned(),
        });
    }

    /// Releases every cohort the queues allow, then polls the quick queue.
    pub(crate) fn release_ready(&mut self, out_events: &mut Vec<Event>) {
        let templates = self.catalog.templates().to_vec();
        for template in &templates {
            if self.queue.queued_players(template.id()) > 0 {
                self.release_template(template, true, out_events);
            }
        }
        if !self.quick.is_empty() {
            self.poll_quick_queue(out_events);
        }
    }

    fn release_template(&mut self, template: &Template, report: bool, out_events: &mut Vec<Event>) {
        loop {
            if !self.slot_free() {
                let feedback = self.queue.feedback(template);
                let ready = feedback.players > 0
                    && feedback.needed_players() == 0
                    && feedback.needed_teams() == 0;
                if report && ready {
                    out_events.push(Event::ReleaseDeferred {
                        template: template.id().clone(),
                        active: self.active_count(),
                    });
                }
                return;
            }
            let Some(cohort) = self.queue.try_release(template) else {
                return;
            };
            let _ = self.start_generation(template.clone(), cohort.participants(), out_events);
        }
    }

    /// Lobby size the quick queue waits for: the configured minimum, raised to
    /// what the least demanding template accepts.
    pub(crate) fn quick_required(&self) -> u32 {
        let smallest = self
            .catalog
            .templates()
            .iter()
            .map(solo_minimum)
            .min()
            .unwrap_or(1);
        self.config.queue.min_players.max(smallest).max(1)
    }

    fn poll_quick_queue(&mut self, out_events: &mut Vec<Event>) {
        let now = self.now;
        let slot_free = self.slot_free();
        let required = self.quick_required();
        match self.quick.poll(now, &self.config.queue, required, slot_free) {
            QuickQueuePoll::Idle => {}
            QuickQueuePoll::Waiting { waiting, required } => {
                out_events.push(Event::QuickQueueUpdated {
                    waiting,
                    required,
                    countdown: None,
                });
            }
            QuickQueuePoll::AtCapacity { waiting } => {
                out_events.push(Event::QuickQueueUpdated {
                    waiting,
                    required,
                    countdown: None,
                });
            }
            QuickQueuePoll::CountingDown { remaining_seconds } => {
                out_events.push(Event::QuickQueueUpdated {
                    waiting: self.quick.len(),
                    required,
                    countdown: Some(remaining_seconds),
                });
            }
            QuickQueuePoll::Release(members) => {
                if self.catalog.first().is_none() {
                    for participant in members {
                        out_events.push(Event::Notice {
                            participant,
                            text: "No templates available.".to_owned(),
                        });
                    }
                    return;
                }
                let mut cohort: Vec<ParticipantId> = members
                    .into_iter()
                    .filter(|participant| self.online.contains(participant))
                    .collect();
                let size = u32::try_from(cohort.len()).unwrap_or(u32::MAX);
                let fitting = self
                    .catalog
                    .templates()
                    .iter()
                    .find(|template| solo_minimum(template) <= solo_capacity(template, size))
                    .cloned();
                let Some(template) = fitting else {
                    debug!(target: "exfil::admission", waiting = size, "no template fits the lobby");
                    self.quick.restore(cohort);
                    return;
                };
                let take = usize::try_from(solo_capacity(&template, size)).unwrap_or(usize::MAX);
                let overflow = cohort.split_off(take.min(cohort.len()));
                if !overflow.is_empty() {
                    debug!(
                        target: "exfil::admission",
                        template = %template.id(),
                        overflow = overflow.len(),
                        "quick queue overflow stays in the lobby"
                    );
                    self.quick.restore(overflow);
                }
                let _ = self.start_generation(template, cohort, out_events);
            }
        }
    }
}

/// Smallest quick-queue cohort the template accepts; every member is a team of one.
fn solo_minimum(template: &Template) -> u32 {
    let bounds = template.bounds();
    bounds.min_players().max(bounds.min_teams())
}

/// Members of a lobby of `waiting` the template can take at once.
fn solo_capacity(template: &Template, waiting: u32) -> u32 {
    let bounds = template.bounds();
    waiting.min(bounds.max_players()).min(bounds.max_teams())
}
