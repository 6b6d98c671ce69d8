use std::{fmt, time::Duration};

use exfil_core::{
    BlockPos, Boundary, EnvironmentKind, FactoryError, FeatureKind, GenerationConfig,
    GenerationFailure, Instance, InstanceFactory, Location, SessionId, Template, Terrain,
};
use tracing::{debug, info, warn};

use crate::{
    seed::{attempt_rng, STREAM_CENTER, STREAM_TERRAIN},
    validation::{check_terrain, find_center_site, locate, validate_features, validate_located},
};

/// Upper bound on the radius of one staged feature search.
pub const STAGED_SEARCH_LIMIT: u32 = 4096;

/// Budgets and seed shared by every generation job.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationSettings {
    /// Base seed of every per-attempt random stream.
    pub seed: u64,
    /// Water share above which surface terrain is rejected.
    pub ocean_threshold: f64,
    /// Wall-clock budget of the terrain check.
    pub terrain_time_budget: Duration,
    /// Transient factory failures retried before they count as attempts.
    pub max_transient_retries: u32,
}

impl GenerationSettings {
    /// Settings taken from the generation section of the configuration.
    #[must_use]
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            seed: config.seed,
            ocean_threshold: config.ocean_threshold,
            terrain_time_budget: config.terrain_time_budget(),
            max_transient_retries: config.max_transient_retries,
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default())
    }
}

/// How a job spreads its work over ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Variant {
    /// One complete attempt per tick.
    Standard,
    /// Creation, then one feature search per tick, then validation.
    Staged,
}

/// A validated instance ready for placement.
pub struct PreparedInstance {
    /// The instance, boundary applied.
    pub instance: Box<dyn Instance>,
    /// Chosen centre.
    pub center: Location,
    /// Boundary applied to the instance.
    pub boundary: Boundary,
    /// Attempt that succeeded, starting at one.
    pub attempt: u32,
}

impl fmt::Debug for PreparedInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedInstance")
            .field("instance", &self.instance.name())
            .field("center", &self.center)
            .field("boundary", &self.boundary)
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// Observable result of advancing a job by one tick.
#[derive(Debug)]
pub enum JobStep {
    /// Nothing to report; advance again next tick.
    Waiting,
    /// The staged search located or missed one feature.
    FeatureSearched {
        /// Feature searched for.
        feature: FeatureKind,
        /// Whether it was found.
        found: bool,
        /// Position of this search, starting at one.
        step: u32,
        /// Searches in the attempt.
        total: u32,
    },
    /// An attempt was discarded.
    AttemptFailed {
        /// Attempts counted so far.
        attempt: u32,
        /// Why the attempt failed.
        failure: GenerationFailure,
        /// Whether the attempt cap is reached and the job is over.
        exhausted: bool,
    },
    /// The job produced a validated instance and is over.
    Ready(PreparedInstance),
}

struct Search {
    instance: Box<dyn Instance>,
    pending: Vec<FeatureKind>,
    located: Vec<(FeatureKind, Option<BlockPos>)>,
}

impl fmt::Debug for Search {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Search")
            .field("instance", &self.instance.name())
            .field("pending", &self.pending)
            .field("located", &self.located)
            .finish()
    }
}

impl Search {
    fn locate_next(&mut self, span: u32) -> Option<JobStep> {
        let feature = self.pending.get(self.located.len())?.clone();
        let range = self.instance.height_range();
        let origin = BlockPos::new(0, (range.min() + range.max()) / 2, 0);
        let radius = span.saturating_mul(3).min(STAGED_SEARCH_LIMIT);
        let found = locate(&*self.instance, &feature, origin, radius);
        self.located.push((feature.clone(), found));
        Some(JobStep::FeatureSearched {
            feature,
            found: found.is_some(),
            step: u32::try_from(self.located.len()).unwrap_or(u32::MAX),
            total: u32::try_from(self.pending.len()).unwrap_or(u32::MAX),
        })
    }
}

#[derive(Debug)]
enum Stage {
    Create,
    Locating(Search),
    Finished,
}

/// Bounded, resumable generation of one instance for one cohort.
#[derive(Debug)]
pub struct GenerationJob {
    session: SessionId,
    template: Template,
    settings: GenerationSettings,
    variant: Variant,
    failed_attempts: u32,
    transient_retries: u32,
    stage: Stage,
}

impl GenerationJob {
    /// Creates a job; templates with feature requirements use the staged variant.
    #[must_use]
    pub fn new(session: SessionId, template: Template, settings: GenerationSettings) -> Self {
        let variant = if template.needs_feature_search() {
            Variant::Staged
        } else {
            Variant::Standard
        };
        Self {
            session,
            template,
            settings,
            variant,
            failed_attempts: 0,
            transient_retries: 0,
            stage: Stage::Create,
        }
    }

    /// Session the job generates for.
    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.session
    }

    /// Template being generated.
    #[must_use]
    pub fn template(&self) -> &Template {
        &self.template
    }

    /// Variant in use.
    #[must_use]
    pub const fn variant(&self) -> Variant {
        self.variant
    }

    /// Attempts counted as failed so far.
    #[must_use]
    pub const fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Transient factory failures retried so far.
    #[must_use]
    pub const fn transient_retries(&self) -> u32 {
        self.transient_retries
    }

    /// Reports whether the job produced an instance or gave up.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.stage, Stage::Finished)
    }

    /// Performs the next bounded unit of work.
    pub fn advance(&mut self, factory: &mut dyn InstanceFactory) -> JobStep {
        let span = self.template.span_cells();
        if let Stage::Locating(search) = &mut self.stage {
            if let Some(step) = search.locate_next(span) {
                return step;
            }
        }
        match std::mem::replace(&mut self.stage, Stage::Create) {
            Stage::Create => self.attempt(factory),
            Stage::Locating(search) => {
                let Search {
                    instance, located, ..
                } = search;
                self.validate(instance, Some(located.as_slice()), factory)
            }
            Stage::Finished => {
                self.stage = Stage::Finished;
                JobStep::Waiting
            }
        }
    }

    /// Counts a panicked attempt as failed and discards any instance in flight.
    pub fn record_fault(&mut self, factory: &mut dyn InstanceFactory) -> JobStep {
        let instance = match std::mem::replace(&mut self.stage, Stage::Create) {
            Stage::Locating(search) => Some(search.instance),
            Stage::Create | Stage::Finished => None,
        };
        self.fail(instance, factory, GenerationFailure::Fault)
    }

    /// Stops the job and discards any instance in flight.
    pub fn cancel(&mut self, factory: &mut dyn InstanceFactory) {
        if let Stage::Locating(search) = std::mem::replace(&mut self.stage, Stage::Finished) {
            factory.discard(search.instance);
        }
    }

    fn attempt(&mut self, factory: &mut dyn InstanceFactory) -> JobStep {
        let instance = match factory.create(&self.template, self.session) {
            Ok(instance) => instance,
            Err(FactoryError::Transient(reason))
                if self.transient_retries < self.settings.max_transient_retries =>
            {
                self.transient_retries += 1;
                debug!(
                    target: "exfil::generation",
                    session = self.session.get(),
                    retries = self.transient_retries,
                    %reason,
                    "factory busy; retrying next tick"
                );
                return JobStep::Waiting;
            }
            Err(FactoryError::Transient(reason)) => {
                return self.fail(None, factory, GenerationFailure::FactoryUnavailable(reason));
            }
            Err(FactoryError::Failed(reason)) => {
                return self.fail(None, factory, GenerationFailure::FactoryFailed(reason));
            }
        };

        match self.variant {
            Variant::Standard => self.validate(instance, None, factory),
            Variant::Staged => {
                self.stage = Stage::Locating(Search {
                    instance,
                    pending: self.searches(),
                    located: Vec::new(),
                });
                JobStep::Waiting
            }
        }
    }

    fn validate(
        &mut self,
        mut instance: Box<dyn Instance>,
        located: Option<&[(FeatureKind, Option<BlockPos>)]>,
        factory: &mut dyn InstanceFactory,
    ) -> JobStep {
        let attempt = self.failed_attempts + 1;
        if let Some(located) = located {
            if let Err(failure) = staged_requirements(&self.template, located) {
                return self.fail(Some(instance), factory, failure);
            }
        }

        let center = match self.choose_center(&*instance, located, attempt) {
            Ok(center) => center,
            Err(failure) => return self.fail(Some(instance), factory, failure),
        };
        let boundary = Boundary::new(center, f64::from(self.template.span_cells()));
        instance.set_boundary(boundary);

        let environment = self.template.environment();
        if environment == EnvironmentKind::Surface {
            let mut rng = attempt_rng(self.settings.seed, self.session, attempt, STREAM_TERRAIN);
            let verdict = check_terrain(
                &*instance,
                center,
                boundary.half_extent(),
                self.settings.ocean_threshold,
                self.settings.terrain_time_budget,
                &mut rng,
            );
            if verdict.unsuitable {
                return self.fail(Some(instance), factory, GenerationFailure::TerrainUnsuitable);
            }
        }

        let features = match located {
            Some(located) => validate_located(&self.template, located, center.block()),
            None => validate_features(&*instance, &self.template, center.block()),
        };
        if let Err(failure) = features {
            return self.fail(Some(instance), factory, failure);
        }

        if self.template.force_night() && environment == EnvironmentKind::Surface {
            instance.force_night();
        }
        if self.template.require_boss() && environment == EnvironmentKind::Islands {
            instance.ensure_boss();
        }

        self.stage = Stage::Finished;
        info!(
            target: "exfil::generation",
            session = self.session.get(),
            template = %self.template.id(),
            attempt,
            center_x = center.x(),
            center_z = center.z(),
            "instance validated"
        );
        JobStep::Ready(PreparedInstance {
            instance,
            center,
            boundary,
            attempt,
        })
    }

    fn choose_center(
        &self,
        terrain: &dyn Instance,
        located: Option<&[(FeatureKind, Option<BlockPos>)]>,
        attempt: u32,
    ) -> Result<Location, GenerationFailure> {
        let staged = located.and_then(|located| staged_center(terrain, &self.template, located));
        if let Some(center) = staged {
            return Ok(center);
        }
        match self.template.center_site() {
            Some(rule) => {
                let mut rng = attempt_rng(self.settings.seed, self.session, attempt, STREAM_CENTER);
                find_center_site(terrain, rule, &mut rng).ok_or(GenerationFailure::NoCenterSite)
            }
            None => Ok(Location::new(0.0, 0.0, 0.0)),
        }
    }

    fn searches(&self) -> Vec<FeatureKind> {
        let mut searches: Vec<FeatureKind> = Vec::new();
        let center_candidates = self
            .template
            .center_feature()
            .map(|rule| rule.candidates())
            .unwrap_or_default();
        for feature in self
            .template
            .required_features()
            .iter()
            .chain(center_candidates)
        {
            if !searches.contains(feature) {
                searches.push(feature.clone());
            }
        }
        searches
    }

    fn fail(
        &mut self,
        instance: Option<Box<dyn Instance>>,
        factory: &mut dyn InstanceFactory,
        failure: GenerationFailure,
    ) -> JobStep {
        if let Some(instance) = instance {
            factory.discard(instance);
        }
        self.failed_attempts += 1;
        let attempt = self.failed_attempts;
        let exhausted = attempt >= self.template.max_generation_attempts();
        self.stage = if exhausted {
            Stage::Finished
        } else {
            Stage::Create
        };
        warn!(
            target: "exfil::generation",
            session = self.session.get(),
            template = %self.template.id(),
            attempt,
            exhausted,
            %failure,
            "generation attempt discarded"
        );
        JobStep::AttemptFailed {
            attempt,
            failure,
            exhausted,
        }
    }
}

fn position(located: &[(FeatureKind, Option<BlockPos>)], feature: &FeatureKind) -> Option<BlockPos> {
    located
        .iter()
        .find(|(kind, _)| kind == feature)
        .and_then(|(_, pos)| *pos)
}

fn staged_requirements(
    template: &Template,
    located: &[(FeatureKind, Option<BlockPos>)],
) -> Result<(), GenerationFailure> {
    if let Some(missing) = template
        .required_features()
        .iter()
        .find(|feature| position(located, feature).is_none())
    {
        return Err(GenerationFailure::MissingFeature(missing.clone()));
    }
    if let Some(rule) = template.center_feature() {
        if !rule
            .candidates()
            .iter()
            .any(|candidate| position(located, candidate).is_some())
        {
            return Err(GenerationFailure::MissingCenterFeature);
        }
    }
    Ok(())
}

/// First located centre candidate, else the centroid of every located feature.
fn staged_center<T: Terrain + ?Sized>(
    terrain: &T,
    template: &Template,
    located: &[(FeatureKind, Option<BlockPos>)],
) -> Option<Location> {
    let candidate = template.center_feature().and_then(|rule| {
        rule.candidates()
            .iter()
            .find_map(|candidate| position(located, candidate))
    });
    if let Some(pos) = candidate {
        return Some(Location::new(
            f64::from(pos.x()),
            f64::from(pos.y()),
            f64::from(pos.z()),
        ));
    }

    let found: Vec<BlockPos> = located.iter().filter_map(|(_, pos)| *pos).collect();
    if found.is_empty() {
        return None;
    }
    let count = found.len() as f64;
    let x = found.iter().map(|pos| f64::from(pos.x())).sum::<f64>() / count;
    let z = found.iter().map(|pos| f64::from(pos.z())).sum::<f64>() / count;
    let y = terrain.highest_block(x.floor() as i32, z.floor() as i32).y();
    Some(Location::new(x, f64::from(y), z))
}
