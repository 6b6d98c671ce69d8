#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Deterministic, in-memory collaborators for the raid orchestrator.
//!
//! The factory builds [`SyntheticInstance`]s whose terrain is evaluated from a
//! seed on demand, so generation and placement run fast and reproducibly in
//! tests and in the command-line simulation.

mod terrain;

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, PoisonError},
};

use exfil_core::{
    BlockPos, EnvironmentKind, FactoryError, FeatureKind, HomeResolver, Instance,
    InstanceFactory, Location, ParticipantId, SessionId, Team, TeamDirectory, Template,
};

pub use terrain::{SyntheticInstance, TerrainProfile};

/// Counters describing what the factory has done, shared with observers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FactoryStats {
    /// Successful creations.
    pub created: u32,
    /// Instances unloaded with their storage deleted.
    pub discarded: u32,
    /// Instances unloaded with their storage kept.
    pub unloaded: u32,
    /// Transient failures reported.
    pub transient_failures: u32,
    /// Names with backing storage.
    pub stored: BTreeSet<String>,
}

/// Cloneable handle onto the factory's counters.
#[derive(Clone, Debug, Default)]
pub struct FactoryLedger {
    inner: Arc<Mutex<FactoryStats>>,
}

impl FactoryLedger {
    /// Snapshot of the counters.
    #[must_use]
    pub fn snapshot(&self) -> FactoryStats {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, change: impl FnOnce(&mut FactoryStats)) {
        let mut stats = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        change(&mut stats);
    }
}

/// Instance factory producing [`SyntheticInstance`]s.
#[derive(Debug)]
pub struct SyntheticFactory {
    seed: u64,
    profiles: HashMap<EnvironmentKind, TerrainProfile>,
    features: Vec<(FeatureKind, BlockPos)>,
    known_features: BTreeSet<FeatureKind>,
    transient_failures: u32,
    permanent_failure: Option<String>,
    panics: u32,
    ledger: FactoryLedger,
}

impl SyntheticFactory {
    /// Creates a factory whose instances derive their terrain from `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            profiles: HashMap::new(),
            features: Vec::new(),
            known_features: BTreeSet::new(),
            transient_failures: 0,
            permanent_failure: None,
            panics: 0,
            ledger: FactoryLedger::default(),
        }
    }

    /// Overrides the terrain profile used for an environment kind.
    #[must_use]
    pub fn with_profile(mut self, environment: EnvironmentKind, profile: TerrainProfile) -> Self {
        let _ = self.profiles.insert(environment, profile);
        self
    }

    /// Places a feature in every instance created from now on.
    #[must_use]
    pub fn with_feature(mut self, feature: impl AsRef<str>, at: BlockPos) -> Self {
        self.features.push((FeatureKind::new(feature), at));
        self
    }

    /// Declares a feature the engine can search for even when none is placed.
    #[must_use]
    pub fn with_known_feature(mut self, feature: impl AsRef<str>) -> Self {
        let _ = self.known_features.insert(FeatureKind::new(feature));
        self
    }

    /// Makes the next `count` creations fail transiently.
    #[must_use]
    pub fn with_transient_failures(mut self, count: u32) -> Self {
        self.transient_failures = count;
        self
    }

    /// Makes every creation fail permanently.
    #[must_use]
    pub fn with_permanent_failure(mut self, reason: impl Into<String>) -> Self {
        self.permanent_failure = Some(reason.into());
        self
    }

    /// Makes the next `count` creations panic.
    #[must_use]
    pub fn with_panics(mut self, count: u32) -> Self {
        self.panics = count;
        self
    }

    /// Shared handle onto the factory counters.
    #[must_use]
    pub fn ledger(&self) -> FactoryLedger {
        self.ledger.clone()
    }

    /// Builds an instance directly, bypassing failure injection.
    #[must_use]
    pub fn build(
        &self,
        environment: EnvironmentKind,
        name: impl Into<String>,
        salt: u64,
    ) -> SyntheticInstance {
        let profile = self
            .profiles
            .get(&environment)
            .copied()
            .unwrap_or_else(|| TerrainProfile::default_for(environment));
        let mut instance = SyntheticInstance::new(name, environment, profile, self.seed ^ salt);
        for feature in &self.known_features {
            instance = instance.with_known_feature(feature.clone());
        }
        for (feature, at) in &self.features {
            instance.add_feature(feature.clone(), *at);
        }
        instance
    }
}

impl InstanceFactory for SyntheticFactory {
    fn create(
        &mut self,
        template: &Template,
        session: SessionId,
    ) -> Result<Box<dyn Instance>, FactoryError> {
        if self.panics > 0 {
            self.panics -= 1;
            panic!("synthetic factory panic for {session}");
        }
        if self.transient_failures > 0 {
            self.transient_failures -= 1;
            self.ledger.update(|stats| stats.transient_failures += 1);
            return Err(FactoryError::Transient("engine busy".to_owned()));
        }
        if let Some(reason) = &self.permanent_failure {
            return Err(FactoryError::Failed(reason.clone()));
        }
        let name = session.instance_name();
        let instance = self.build(template.environment(), name.clone(), session.get());
        self.ledger.update(|stats| {
            stats.created += 1;
            let _ = stats.stored.insert(name);
        });
        Ok(Box::new(instance))
    }

    fn discard(&mut self, instance: Box<dyn Instance>) {
        let name = instance.name().to_owned();
        self.ledger.update(|stats| {
            stats.discarded += 1;
            let _ = stats.stored.remove(&name);
        });
    }

    fn unload(&mut self, _instance: Box<dyn Instance>) {
        self.ledger.update(|stats| stats.unloaded += 1);
    }

    fn stored_instances(&self) -> Vec<String> {
        self.ledger.snapshot().stored.into_iter().collect()
    }

    fn delete_stored(&mut self, name: &str) -> bool {
        let mut removed = false;
        self.ledger.update(|stats| removed = stats.stored.remove(name));
        removed
    }
}

/// Home resolver backed by a fixed map.
#[derive(Clone, Debug, Default)]
pub struct SyntheticHomes {
    homes: HashMap<ParticipantId, Location>,
    fallback: Location,
}

impl SyntheticHomes {
    /// Creates a resolver that answers every lookup with `fallback`.
    #[must_use]
    pub fn new(fallback: Location) -> Self {
        Self {
            homes: HashMap::new(),
            fallback,
        }
    }

    /// Registers a home.
    #[must_use]
    pub fn with_home(mut self, participant: ParticipantId, home: Location) -> Self {
        let _ = self.homes.insert(participant, home);
        self
    }
}

impl HomeResolver for SyntheticHomes {
    fn resolve_home(&self, participant: ParticipantId) -> Option<Location> {
        self.homes.get(&participant).copied()
    }

    fn fallback(&self) -> Location {
        self.fallback
    }
}

/// Team directory backed by a fixed list.
#[derive(Clone, Debug, Default)]
pub struct SyntheticTeams {
    teams: Vec<Team>,
}

impl SyntheticTeams {
    /// Creates an empty directory; everyone plays solo.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a team.
    #[must_use]
    pub fn with_team(mut self, team: Team) -> Self {
        self.teams.push(team);
        self
    }
}

impl TeamDirectory for SyntheticTeams {
    fn team_of(&self, participant: ParticipantId) -> Option<Team> {
        self.teams
            .iter()
            .find(|team| team.members().contains(&participant))
            .cloned()
    }
}
