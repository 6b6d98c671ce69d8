use std::collections::{BTreeMap, BTreeSet};

use exfil_core::{
    AdmissionError, ParticipantId, QueueFeedback, Team, Template, TemplateCatalog, TemplateId,
    Timestamp,
};
use serde::Serialize;
use tracing::debug;

use crate::Availability;

/// A team's entry in a template's waiting list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedTeam {
    leader: ParticipantId,
    members: BTreeSet<ParticipantId>,
    joined_at: Timestamp,
}

impl QueuedTeam {
    /// Leader recorded for the entry.
    #[must_use]
    pub const fn leader(&self) -> ParticipantId {
        self.leader
    }

    /// Members that entered the queue.
    #[must_use]
    pub fn members(&self) -> &BTreeSet<ParticipantId> {
        &self.members
    }

    /// When the entry joined.
    #[must_use]
    pub const fn joined_at(&self) -> Timestamp {
        self.joined_at
    }

    /// Number of queued members.
    #[must_use]
    pub fn size(&self) -> u32 {
        u32::try_from(self.members.len()).unwrap_or(u32::MAX)
    }

    /// Reports whether `participant` belongs to the entry.
    #[must_use]
    pub fn contains(&self, participant: ParticipantId) -> bool {
        self.members.contains(&participant)
    }
}

/// Teams released together to start one session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cohort {
    template: TemplateId,
    teams: Vec<QueuedTeam>,
}

impl Cohort {
    /// Template the cohort was released for.
    #[must_use]
    pub fn template(&self) -> &TemplateId {
        &self.template
    }

    /// Released teams in queue order.
    #[must_use]
    pub fn teams(&self) -> &[QueuedTeam] {
        &self.teams
    }

    /// Number of released teams.
    #[must_use]
    pub fn team_count(&self) -> u32 {
        u32::try_from(self.teams.len()).unwrap_or(u32::MAX)
    }

    /// Number of released players.
    #[must_use]
    pub fn player_count(&self) -> u32 {
        self.teams.iter().map(QueuedTeam::size).sum()
    }

    /// Every released participant, team by team.
    #[must_use]
    pub fn participants(&self) -> Vec<ParticipantId> {
        self.teams
            .iter()
            .flat_map(|team| team.members.iter().copied())
            .collect()
    }
}

/// Snapshot of one template's waiting list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    /// Template queued for.
    pub template: TemplateId,
    /// Teams waiting.
    pub teams: u32,
    /// Players waiting.
    pub players: u32,
}

/// Per-template waiting lists of team entries.
#[derive(Clone, Debug, Default)]
pub struct AdmissionQueue {
    queues: BTreeMap<TemplateId, Vec<QueuedTeam>>,
}

impl AdmissionQueue {
    /// Creates an empty admission queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the requester's team for `template`.
    ///
    /// Offline teammates are left out of the entry. The request is refused
    /// when the requester is offline, when the requester or an online
    /// teammate is already in a session or queue, or when the remaining team
    /// could never be released for this template.
    pub fn enqueue<A>(
        &mut self,
        template: &Template,
        requester: ParticipantId,
        team: Option<&Team>,
        now: Timestamp,
        availability: &A,
    ) -> Result<QueueFeedback, AdmissionError>
    where
        A: Availability + ?Sized,
    {
        if !availability.is_online(requester) {
            return Err(AdmissionError::Offline {
                participant: requester,
            });
        }

        let mut members = BTreeSet::from([requester]);
        if let Some(team) = team {
            members.extend(
                team.members()
                    .iter()
                    .copied()
                    .filter(|member| availability.is_online(*member)),
            );
        }

        let requester_first =
            std::iter::once(requester).chain(members.iter().copied().filter(|m| *m != requester));
        for participant in requester_first {
            if availability.in_session(participant) {
                return Err(AdmissionError::AlreadyInSession { participant });
            }
            if self.is_queued(participant) || availability.queued_elsewhere(participant) {
                return Err(AdmissionError::AlreadyQueued { participant });
            }
        }

        let size = u32::try_from(members.len()).unwrap_or(u32::MAX);
        let max = template.bounds().admissible_team_size();
        if size > max {
            return Err(AdmissionError::TeamTooLarge { size, max });
        }

        let leader = team
            .map(Team::leader)
            .filter(|leader| members.contains(leader))
            .unwrap_or(requester);
        debug!(
            target: "exfil::admission",
            template = %template.id(),
            leader = leader.get(),
            size,
            "team queued"
        );
        self.queues
            .entry(template.id().clone())
            .or_default()
            .push(QueuedTeam {
                leader,
                members,
                joined_at: now,
            });
        Ok(self.feedback(template))
    }

    /// Releases a cohort when the template's thresholds are satisfied.
    ///
    /// Teams are taken greedily in arrival order. A team that would push the
    /// cohort past `max_players` is skipped, and selection stops once the
    /// player cap or the team cap is reached. Reaching `max_teams` releases a
    /// full cohort even when more eligible teams wait behind it.
    pub fn try_release(&mut self, template: &Template) -> Option<Cohort> {
        let bounds = template.bounds();
        let queue = self.queues.get_mut(template.id())?;

        let mut chosen = Vec::new();
        let mut players = 0u32;
        for (index, team) in queue.iter().enumerate() {
            let size = team.size();
            if size > bounds.max_players_per_team()
                || players.saturating_add(size) > bounds.max_players()
            {
                continue;
            }
            chosen.push(index);
            players += size;
            let teams = u32::try_from(chosen.len()).unwrap_or(u32::MAX);
            if players >= bounds.max_players() || teams >= bounds.max_teams() {
                break;
            }
        }

        let teams = u32::try_from(chosen.len()).unwrap_or(u32::MAX);
        if chosen.is_empty()
            || teams < bounds.min_teams()
            || teams > bounds.max_teams()
            || players < bounds.min_players()
        {
            return None;
        }

        let mut released: Vec<QueuedTeam> = chosen
            .into_iter()
            .rev()
            .map(|index| queue.remove(index))
            .collect();
        released.reverse();
        if queue.is_empty() {
            let _ = self.queues.remove(template.id());
        }
        Some(Cohort {
            template: template.id().clone(),
            teams: released,
        })
    }

    /// Removes the participant's whole team from its queue.
    pub fn leave(&mut self, participant: ParticipantId) -> Option<(TemplateId, QueuedTeam)> {
        let (template, index) = self.position(participant)?;
        let queue = self.queues.get_mut(&template)?;
        let team = queue.remove(index);
        if queue.is_empty() {
            let _ = self.queues.remove(&template);
        }
        Some((template, team))
    }

    /// Reports whether the participant waits in any template queue.
    #[must_use]
    pub fn is_queued(&self, participant: ParticipantId) -> bool {
        self.position(participant).is_some()
    }

    /// Template the participant is queued for.
    #[must_use]
    pub fn queued_template(&self, participant: ParticipantId) -> Option<&TemplateId> {
        self.queues
            .iter()
            .find(|(_, teams)| teams.iter().any(|team| team.contains(participant)))
            .map(|(template, _)| template)
    }

    /// Queued team containing the participant.
    #[must_use]
    pub fn entry(&self, participant: ParticipantId) -> Option<&QueuedTeam> {
        self.queues
            .values()
            .flat_map(|teams| teams.iter())
            .find(|team| team.contains(participant))
    }

    /// Queue accounting for a template against its thresholds.
    #[must_use]
    pub fn feedback(&self, template: &Template) -> QueueFeedback {
        let (teams, players) = self.counts(template.id());
        QueueFeedback {
            players,
            teams,
            min_players: template.bounds().min_players(),
            min_teams: template.bounds().min_teams(),
        }
    }

    /// Players waiting for a template.
    #[must_use]
    pub fn queued_players(&self, template: &TemplateId) -> u32 {
        self.counts(template).1
    }

    /// Every non-empty template queue.
    #[must_use]
    pub fn status(&self) -> Vec<QueueStatus> {
        self.queues
            .keys()
            .map(|template| {
                let (teams, players) = self.counts(template);
                QueueStatus {
                    template: template.clone(),
                    teams,
                    players,
                }
            })
            .collect()
    }

    /// Drains a template queue regardless of its thresholds.
    pub fn take_all(&mut self, template: &TemplateId) -> Vec<QueuedTeam> {
        self.queues.remove(template).unwrap_or_default()
    }

    /// Dissolves the queues of templates no longer offered by `catalog`.
    pub fn retain_offered(&mut self, catalog: &TemplateCatalog) -> Vec<(TemplateId, QueuedTeam)> {
        let removed: Vec<TemplateId> = self
            .queues
            .keys()
            .filter(|template| catalog.get(template).is_none())
            .cloned()
            .collect();
        removed
            .into_iter()
            .flat_map(|template| {
                let teams = self.take_all(&template);
                teams.into_iter().map(move |team| (template.clone(), team))
            })
            .collect()
    }

    fn counts(&self, template: &TemplateId) -> (u32, u32) {
        self.queues.get(template).map_or((0, 0), |teams| {
            (
                u32::try_from(teams.len()).unwrap_or(u32::MAX),
                teams.iter().map(QueuedTeam::size).sum(),
            )
        })
    }

    fn position(&self, participant: ParticipantId) -> Option<(TemplateId, usize)> {
        self.queues.iter().find_map(|(template, teams)| {
            teams
                .iter()
                .position(|team| team.contains(participant))
                .map(|index| (template.clone(), index))
        })
    }
}
