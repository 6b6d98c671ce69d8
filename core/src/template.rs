//! Immutable raid templates and the catalog that orders them.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    config::{ConfigError, TemplateSpec},
    geometry::CELLS_PER_AREA_UNIT,
    terrain::Material,
};

/// Identifier of a raid template.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(String);

impl TemplateId {
    /// Wraps the provided identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrowed identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// Name of a generated feature (a structure) the engine can locate.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureKind(String);

impl FeatureKind {
    /// Wraps the feature name, normalised to upper snake case.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(
            name.as_ref()
                .trim()
                .replace([' ', '-'], "_")
                .to_ascii_uppercase(),
        )
    }

    /// Normalised feature name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of environment an instance is generated as.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentKind {
    /// Open-sky terrain with oceans.
    #[default]
    Surface,
    /// Vertically bounded terrain with a solid ceiling.
    Roofed,
    /// Floating islands over the void.
    Islands,
}

/// Condition that opens the extraction point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractionUnlock {
    /// Extraction opens a fixed number of seconds after the session clock starts.
    Time {
        /// Offset from the clock start; `None` defers to the global default.
        open_after_seconds: Option<u64>,
    },
    /// Extraction opens when an external signal (the boss falling) arrives.
    Conditional,
}

/// Player and team bounds a cohort must satisfy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlayerBounds {
    min_players: u32,
    max_players: u32,
    min_teams: u32,
    max_teams: u32,
    max_players_per_team: u32,
}

impl PlayerBounds {
    /// Creates bounds without validating them; see [`Template::from_spec`].
    #[must_use]
    pub const fn new(
        min_players: u32,
        max_players: u32,
        min_teams: u32,
        max_teams: u32,
        max_players_per_team: u32,
    ) -> Self {
        Self {
            min_players,
            max_players,
            min_teams,
            max_teams,
            max_players_per_team,
        }
    }

    /// Fewest players a cohort may contain.
    #[must_use]
    pub const fn min_players(&self) -> u32 {
        self.min_players
    }

    /// Most players a cohort may contain.
    #[must_use]
    pub const fn max_players(&self) -> u32 {
        self.max_players
    }

    /// Fewest teams a cohort may contain.
    #[must_use]
    pub const fn min_teams(&self) -> u32 {
        self.min_teams
    }

    /// Most teams a cohort may contain.
    #[must_use]
    pub const fn max_teams(&self) -> u32 {
        self.max_teams
    }

    /// Largest team accepted into the queue.
    #[must_use]
    pub const fn max_players_per_team(&self) -> u32 {
        self.max_players_per_team
    }

    /// Largest team that could ever be released.
    #[must_use]
    pub fn admissible_team_size(&self) -> u32 {
        self.max_players_per_team.min(self.max_players)
    }
}

/// Per-template overrides of global session defaults.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TemplateOverrides {
    /// Radius around the extraction point that counts as channelling.
    pub extraction_radius: Option<f64>,
    /// Seconds a participant must channel to extract.
    pub channel_seconds: Option<u32>,
    /// Seconds of spawn protection after placement.
    pub spawn_protection_seconds: Option<u32>,
}

/// Requirement that one of several features lies near the instance centre.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CenterFeatureRule {
    candidates: Vec<FeatureKind>,
    radius_chunks: u32,
}

impl CenterFeatureRule {
    /// Creates a rule; the radius is floored at one area unit.
    #[must_use]
    pub fn new(candidates: Vec<FeatureKind>, radius_chunks: u32) -> Self {
        Self {
            candidates,
            radius_chunks: radius_chunks.max(1),
        }
    }

    /// Features of which at least one must be near the centre.
    #[must_use]
    pub fn candidates(&self) -> &[FeatureKind] {
        &self.candidates
    }

    /// Search radius in cells.
    #[must_use]
    pub fn radius_cells(&self) -> u32 {
        self.radius_chunks.saturating_mul(CELLS_PER_AREA_UNIT)
    }
}

/// Randomised search for a centre site away from a known unsafe central feature.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CenterSiteRule {
    /// Inner radius of the sampling band.
    pub min_radius: f64,
    /// Outer radius of the sampling band.
    pub max_radius: f64,
    /// Samples drawn per attempt.
    pub samples: u32,
    /// Highest acceptable surface row.
    pub max_surface_y: i32,
    /// Half width of the square density patch.
    pub patch_half_width: i32,
    /// Matching cells the patch must contain.
    pub min_density: u32,
    /// Ground material the site must be made of.
    pub ground: Material,
}

impl Default for CenterSiteRule {
    fn default() -> Self {
        Self {
            min_radius: 1300.0,
            max_radius: 3800.0,
            samples: 320,
            max_surface_y: 120,
            patch_half_width: 3,
            min_density: 12,
            ground: Material::EndStone,
        }
    }
}

/// Immutable definition of one raid variant.
#[derive(Clone, Debug, PartialEq)]
pub struct Template {
    id: TemplateId,
    display_name: String,
    environment: EnvironmentKind,
    size_chunks: u32,
    duration_seconds: u64,
    unlock: ExtractionUnlock,
    bounds: PlayerBounds,
    overrides: TemplateOverrides,
    required_features: Vec<FeatureKind>,
    center_feature: Option<CenterFeatureRule>,
    center_site: Option<CenterSiteRule>,
    force_night: bool,
    require_boss: bool,
    max_generation_attempts: u32,
    enabled: bool,
    order: i32,
}

impl Template {
    /// Validates a configuration entry and builds the template.
    ///
    /// `ordinal` is used as the sort order when the entry does not set one.
    pub fn from_spec(spec: TemplateSpec, ordinal: i32) -> Result<Self, ConfigError> {
        let id = spec.id.trim().to_owned();
        if id.is_empty() {
            return Err(ConfigError::InvalidTemplate {
                id,
                reason: "template id must not be empty".to_owned(),
            });
        }
        if spec.min_players > spec.max_players {
            return Err(ConfigError::InvalidTemplate {
                id,
                reason: format!(
                    "min_players {} exceeds max_players {}",
                    spec.min_players, spec.max_players
                ),
            });
        }
        if spec.min_teams > spec.max_teams {
            return Err(ConfigError::InvalidTemplate {
                id,
                reason: format!(
                    "min_teams {} exceeds max_teams {}",
                    spec.min_teams, spec.max_teams
                ),
            });
        }
        if spec.size_chunks == 0 || spec.duration_minutes == 0 {
            return Err(ConfigError::InvalidTemplate {
                id,
                reason: "size_chunks and duration_minutes must be positive".to_owned(),
            });
        }

        let unlock = match spec.unlock {
            Some(UnlockKind::Conditional) => ExtractionUnlock::Conditional,
            Some(UnlockKind::Time) => ExtractionUnlock::Time {
                open_after_seconds: spec.extraction_open_after_seconds,
            },
            None => match spec.extraction_open_after_seconds {
                Some(seconds) => ExtractionUnlock::Time {
                    open_after_seconds: Some(seconds),
                },
                None => ExtractionUnlock::Conditional,
            },
        };

        let required_features: Vec<FeatureKind> =
            spec.required_features.iter().map(FeatureKind::new).collect();
        let center_feature = if spec.require_center_feature {
            let mut candidates: Vec<FeatureKind> =
                spec.center_features.iter().map(FeatureKind::new).collect();
            if candidates.is_empty() {
                candidates = required_features.clone();
            }
            if candidates.is_empty() {
                return Err(ConfigError::InvalidTemplate {
                    id,
                    reason: "require_center_feature needs at least one feature".to_owned(),
                });
            }
            Some(CenterFeatureRule::new(candidates, spec.center_radius_chunks))
        } else {
            None
        };

        let display_name = if spec.display_name.trim().is_empty() {
            id.clone()
        } else {
            spec.display_name
        };

        Ok(Self {
            id: TemplateId::new(id),
            display_name,
            environment: spec.environment,
            size_chunks: spec.size_chunks,
            duration_seconds: u64::from(spec.duration_minutes) * 60,
            unlock,
            bounds: PlayerBounds::new(
                spec.min_players,
                spec.max_players,
                spec.min_teams,
                spec.max_teams,
                spec.max_players_per_team,
            ),
            overrides: TemplateOverrides {
                extraction_radius: spec.extraction_radius.filter(|radius| *radius > 0.0),
                channel_seconds: spec.channel_seconds.filter(|seconds| *seconds > 0),
                spawn_protection_seconds: spec.spawn_protection_seconds.filter(|s| *s > 0),
            },
            required_features,
            center_feature,
            center_site: spec.center_site,
            force_night: spec.force_night,
            require_boss: spec.require_boss,
            max_generation_attempts: spec.max_generation_attempts.max(1),
            enabled: spec.enabled,
            order: spec.order.unwrap_or(ordinal),
        })
    }

    /// Template identifier.
    #[must_use]
    pub fn id(&self) -> &TemplateId {
        &self.id
    }

    /// Human readable name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Environment kind of the generated instance.
    #[must_use]
    pub const fn environment(&self) -> EnvironmentKind {
        self.environment
    }

    /// Size of the instance in area units.
    #[must_use]
    pub const fn size_chunks(&self) -> u32 {
        self.size_chunks
    }

    /// Side length of the instance boundary in cells.
    #[must_use]
    pub const fn span_cells(&self) -> u32 {
        self.size_chunks.saturating_mul(CELLS_PER_AREA_UNIT)
    }

    /// Session duration in seconds.
    #[must_use]
    pub const fn duration_seconds(&self) -> u64 {
        self.duration_seconds
    }

    /// Condition that opens extraction.
    #[must_use]
    pub const fn unlock(&self) -> ExtractionUnlock {
        self.unlock
    }

    /// Cohort bounds.
    #[must_use]
    pub const fn bounds(&self) -> &PlayerBounds {
        &self.bounds
    }

    /// Overrides of global session defaults.
    #[must_use]
    pub const fn overrides(&self) -> &TemplateOverrides {
        &self.overrides
    }

    /// Features that must exist somewhere inside the instance.
    #[must_use]
    pub fn required_features(&self) -> &[FeatureKind] {
        &self.required_features
    }

    /// Optional requirement on features near the centre.
    #[must_use]
    pub fn center_feature(&self) -> Option<&CenterFeatureRule> {
        self.center_feature.as_ref()
    }

    /// Optional randomised centre site search.
    #[must_use]
    pub fn center_site(&self) -> Option<&CenterSiteRule> {
        self.center_site.as_ref()
    }

    /// Whether the instance clock is locked to night.
    #[must_use]
    pub const fn force_night(&self) -> bool {
        self.force_night
    }

    /// Whether the instance boss must be present.
    #[must_use]
    pub const fn require_boss(&self) -> bool {
        self.require_boss
    }

    /// Attempts allowed before generation is abandoned.
    #[must_use]
    pub const fn max_generation_attempts(&self) -> u32 {
        self.max_generation_attempts
    }

    /// Whether the template is offered at all.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Sort key inside the catalog.
    #[must_use]
    pub const fn order(&self) -> i32 {
        self.order
    }

    /// Whether generation must search for features before choosing a centre.
    #[must_use]
    pub fn needs_feature_search(&self) -> bool {
        !self.required_features.is_empty() || self.center_feature.is_some()
    }
}

/// Explicit unlock condition as written in configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockKind {
    /// Opens after a fixed offset.
    Time,
    /// Opens on an external signal.
    Conditional,
}

/// Enabled templates in display order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TemplateCatalog {
    templates: Arc<[Template]>,
}

impl TemplateCatalog {
    /// Builds a catalog from validated templates, dropping disabled entries.
    #[must_use]
    pub fn new(templates: impl IntoIterator<Item = Template>) -> Self {
        let mut enabled: Vec<Template> = templates
            .into_iter()
            .filter(Template::enabled)
            .collect();
        enabled.sort_by_key(Template::order);
        Self {
            templates: enabled.into(),
        }
    }

    /// Validates configuration entries, falling back to the built-in set when none are given.
    pub fn from_specs(specs: &[TemplateSpec]) -> Result<Self, ConfigError> {
        if specs.is_empty() {
            return Ok(Self::builtin());
        }
        let mut templates = Vec::with_capacity(specs.len());
        for (ordinal, spec) in specs.iter().enumerate() {
            let ordinal = i32::try_from(ordinal).unwrap_or(i32::MAX);
            templates.push(Template::from_spec(spec.clone(), ordinal)?);
        }
        Ok(Self::new(templates))
    }

    /// Eight built-in templates spanning every environment kind.
    #[must_use]
    pub fn builtin() -> Self {
        let templates = builtin_specs()
            .into_iter()
            .enumerate()
            .filter_map(|(ordinal, spec)| {
                Template::from_spec(spec, i32::try_from(ordinal).unwrap_or(i32::MAX)).ok()
            });
        Self::new(templates)
    }

    /// Templates in display order.
    #[must_use]
    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    /// Looks a template up by id.
    #[must_use]
    pub fn get(&self, id: &TemplateId) -> Option<&Template> {
        self.templates.iter().find(|template| template.id() == id)
    }

    /// First template in display order.
    #[must_use]
    pub fn first(&self) -> Option<&Template> {
        self.templates.first()
    }

    /// Number of templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Reports whether the catalog holds no template.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

fn builtin_specs() -> Vec<TemplateSpec> {
    let base = |id: &str, name: &str, environment: EnvironmentKind| TemplateSpec {
        id: id.to_owned(),
        display_name: name.to_owned(),
        environment,
        ..TemplateSpec::default()
    };
    let features = |names: &[&str]| names.iter().map(|name| (*name).to_owned()).collect();

    vec![
        TemplateSpec {
            size_chunks: 16,
            duration_minutes: 10,
            extraction_open_after_seconds: Some(300),
            min_players: 2,
            max_players: 8,
            min_teams: 2,
            max_teams: 4,
            max_players_per_team: 4,
            ..base("over_small_easy", "Surface Small / Easy", EnvironmentKind::Surface)
        },
        TemplateSpec {
            size_chunks: 32,
            duration_minutes: 25,
            extraction_open_after_seconds: Some(1200),
            min_players: 4,
            max_players: 32,
            min_teams: 4,
            max_teams: 8,
            max_players_per_team: 8,
            force_night: true,
            require_center_feature: true,
            center_features: features(&["VILLAGE", "PILLAGER_OUTPOST"]),
            center_radius_chunks: 6,
            ..base("over_medium_struct", "Surface Medium / Structures", EnvironmentKind::Surface)
        },
        TemplateSpec {
            size_chunks: 64,
            duration_minutes: 45,
            extraction_open_after_seconds: Some(1500),
            min_players: 8,
            max_players: 64,
            min_teams: 8,
            max_teams: 16,
            max_players_per_team: 8,
            require_center_feature: true,
            center_features: features(&["MANSION", "ANCIENT_CITY"]),
            required_features: features(&["ANCIENT_CITY", "STRONGHOLD"]),
            center_radius_chunks: 8,
            ..base("over_big_hard", "Surface Large / Hard", EnvironmentKind::Surface)
        },
        TemplateSpec {
            size_chunks: 16,
            duration_minutes: 15,
            extraction_open_after_seconds: Some(600),
            min_players: 2,
            max_players: 16,
            min_teams: 2,
            max_teams: 4,
            max_players_per_team: 4,
            ..base("roofed_small_medium", "Roofed Small / Medium", EnvironmentKind::Roofed)
        },
        TemplateSpec {
            size_chunks: 32,
            duration_minutes: 35,
            extraction_open_after_seconds: Some(1500),
            min_players: 4,
            max_players: 32,
            min_teams: 4,
            max_teams: 8,
            max_players_per_team: 8,
            require_center_feature: true,
            center_features: features(&["FORTRESS", "BASTION_REMNANT"]),
            center_radius_chunks: 6,
            ..base("roofed_medium_hard", "Roofed Medium / Hard", EnvironmentKind::Roofed)
        },
        TemplateSpec {
            size_chunks: 16,
            duration_minutes: 20,
            extraction_open_after_seconds: Some(900),
            min_players: 2,
            max_players: 16,
            min_teams: 2,
            max_teams: 4,
            max_players_per_team: 4,
            center_site: Some(CenterSiteRule::default()),
            ..base("islands_small_pvp", "Islands Small / PvP", EnvironmentKind::Islands)
        },
        TemplateSpec {
            size_chunks: 32,
            duration_minutes: 30,
            unlock: Some(UnlockKind::Conditional),
            min_players: 2,
            max_players: 16,
            min_teams: 2,
            max_teams: 4,
            max_players_per_team: 4,
            require_boss: true,
            ..base("islands_medium_boss", "Islands Medium / Boss", EnvironmentKind::Islands)
        },
        TemplateSpec {
            size_chunks: 64,
            duration_minutes: 60,
            extraction_open_after_seconds: Some(1800),
            min_players: 8,
            max_players: 64,
            min_teams: 8,
            max_teams: 16,
            max_players_per_team: 8,
            required_features: features(&["END_CITY"]),
            ..base("islands_big_hard", "Islands Large / Hard", EnvironmentKind::Islands)
        },
    ]
}
