//! Global tunables, template entries and the layered rule resolution.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::template::{
    CenterSiteRule, EnvironmentKind, ExtractionUnlock, Template, TemplateCatalog, UnlockKind,
};

/// Fixed share of the session duration a disconnected participant may stay away.
pub const GRACE_FRACTION_PERCENT: u64 = 10;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be parsed.
    #[error("failed to parse orchestrator config: {0}")]
    Parse(#[from] toml::de::Error),
    /// The configuration file could not be read.
    #[error("failed to read orchestrator config from {path:?}: {source}")]
    ReadFailed {
        /// Path that failed to load.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// A template entry violates its invariants.
    #[error("template `{id}` is invalid: {reason}")]
    InvalidTemplate {
        /// Offending template id.
        id: String,
        /// Human readable explanation.
        reason: String,
    },
}

/// Complete orchestrator configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Admission and concurrency settings.
    pub queue: QueueConfig,
    /// Extraction defaults.
    pub extraction: ExtractionConfig,
    /// Session timing defaults.
    pub session: SessionConfig,
    /// Spawn search budgets.
    pub spawn_safety: SpawnSafetyConfig,
    /// Teardown behaviour.
    pub cleanup: CleanupConfig,
    /// Generation budgets and seed.
    pub generation: GenerationConfig,
    /// Scheduler cadence.
    pub heartbeat: HeartbeatConfig,
    /// Template entries; empty selects the built-in catalog.
    pub templates: Vec<TemplateSpec>,
}

impl OrchestratorConfig {
    /// Parses configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Builds the template catalog described by this configuration.
    pub fn catalog(&self) -> Result<TemplateCatalog, ConfigError> {
        TemplateCatalog::from_specs(&self.templates)
    }
}

/// Admission and concurrency settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Participants the quick queue needs before it starts.
    pub min_players: u32,
    /// Live sessions plus pending generations allowed at once.
    pub max_concurrent_sessions: u32,
    /// Releases the quick queue as soon as it is full instead of counting down.
    pub auto_start: bool,
    /// Countdown length; never shorter than three seconds.
    pub countdown_seconds: u64,
}

impl QueueConfig {
    /// Countdown length after applying its floor.
    #[must_use]
    pub fn effective_countdown_seconds(&self) -> u64 {
        self.countdown_seconds.max(3)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_players: 1,
            max_concurrent_sessions: 10,
            auto_start: true,
            countdown_seconds: 10,
        }
    }
}

/// Extraction defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Channel radius around the extraction point.
    pub radius: f64,
    /// Seconds of channelling required.
    pub channel_seconds: u32,
    /// Offset used by time-unlocked templates that do not set their own.
    pub open_after_seconds: u64,
    /// Visual cue emitted at an open extraction point.
    pub beacon: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            radius: 3.0,
            channel_seconds: 10,
            open_after_seconds: 0,
            beacon: "happy_villager".to_owned(),
        }
    }
}

/// Session timing defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds of spawn protection after placement.
    pub spawn_protection_seconds: u32,
    /// Share of the duration after which the final phase is announced.
    pub final_phase_percent: u64,
    /// Remaining seconds at which the progress indicator turns critical.
    pub critical_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            spawn_protection_seconds: 5,
            final_phase_percent: 10,
            critical_seconds: 10,
        }
    }
}

/// Budgets for the spawn and extraction searches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnSafetyConfig {
    /// Random polar samples drawn before the ring search.
    pub radial_samples: u32,
    /// Extra radius covered by the ring search.
    pub square_extra_radius: u32,
    /// Rows searched upward from the surface.
    pub upward_adjust_max: u32,
    /// Rows searched downward from the surface.
    pub downward_adjust_max: u32,
    /// Enables the downward adjustment.
    pub enable_downward: bool,
    /// Enables the polar phase.
    pub enable_radial: bool,
    /// Enables the ring phase.
    pub enable_square: bool,
    /// Searches slower than this are logged.
    pub log_threshold_ms: u64,
}

impl Default for SpawnSafetyConfig {
    fn default() -> Self {
        Self {
            radial_samples: 80,
            square_extra_radius: 32,
            upward_adjust_max: 6,
            downward_adjust_max: 12,
            enable_downward: true,
            enable_radial: true,
            enable_square: true,
            log_threshold_ms: 25,
        }
    }
}

/// Teardown behaviour.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Delay between session end and instance teardown; at least one second.
    pub delay_seconds: u64,
    /// Whether backing storage is deleted on teardown.
    pub delete_storage_on_end: bool,
}

impl CleanupConfig {
    /// Delay after applying its floor.
    #[must_use]
    pub fn effective_delay_seconds(&self) -> u64 {
        self.delay_seconds.max(1)
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            delay_seconds: 5,
            delete_storage_on_end: true,
        }
    }
}

/// Generation budgets and seed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Base seed every per-attempt random stream is derived from.
    pub seed: u64,
    /// Water share above which surface terrain is rejected.
    pub ocean_threshold: f64,
    /// Wall-clock budget of the terrain check.
    pub terrain_time_budget_ms: u64,
    /// Transient factory failures tolerated before they count as attempts.
    pub max_transient_retries: u32,
}

impl GenerationConfig {
    /// Terrain check budget as a duration.
    #[must_use]
    pub fn terrain_time_budget(&self) -> Duration {
        Duration::from_millis(self.terrain_time_budget_ms)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            seed: 0x5eed_e8f1_1c4a_f7d3,
            ocean_threshold: 0.65,
            terrain_time_budget_ms: 40,
            max_transient_retries: 20,
        }
    }
}

/// Scheduler cadence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Milliseconds between ticks.
    pub interval_ms: u64,
}

impl HeartbeatConfig {
    /// Tick interval as a duration.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

/// One template entry as written in configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateSpec {
    /// Unique id.
    pub id: String,
    /// Name shown to participants; defaults to the id.
    pub display_name: String,
    /// Environment kind.
    pub environment: EnvironmentKind,
    /// Size in area units.
    pub size_chunks: u32,
    /// Duration in minutes.
    pub duration_minutes: u32,
    /// Seconds after the clock starts before extraction opens.
    pub extraction_open_after_seconds: Option<u64>,
    /// Explicit unlock condition; inferred from the offset when absent.
    pub unlock: Option<UnlockKind>,
    /// Fewest players per cohort.
    pub min_players: u32,
    /// Most players per cohort.
    pub max_players: u32,
    /// Fewest teams per cohort.
    pub min_teams: u32,
    /// Most teams per cohort.
    pub max_teams: u32,
    /// Largest team accepted.
    pub max_players_per_team: u32,
    /// Extraction radius override.
    pub extraction_radius: Option<f64>,
    /// Channel duration override.
    pub channel_seconds: Option<u32>,
    /// Spawn protection override.
    pub spawn_protection_seconds: Option<u32>,
    /// Locks the instance to night.
    pub force_night: bool,
    /// Requires one of `center_features` near the centre.
    pub require_center_feature: bool,
    /// Features required anywhere in the instance.
    pub required_features: Vec<String>,
    /// Candidates for the centre requirement.
    pub center_features: Vec<String>,
    /// Radius of the centre requirement in area units.
    pub center_radius_chunks: u32,
    /// Requires the boss to be present.
    pub require_boss: bool,
    /// Randomised centre site search.
    pub center_site: Option<CenterSiteRule>,
    /// Attempts before generation is abandoned.
    pub max_generation_attempts: u32,
    /// Whether the template is offered.
    pub enabled: bool,
    /// Sort key; defaults to the entry's position.
    pub order: Option<i32>,
}

impl Default for TemplateSpec {
    fn default() -> Self {
        Self {
            id: String::new(),
            display_name: String::new(),
            environment: EnvironmentKind::Surface,
            size_chunks: 16,
            duration_minutes: 10,
            extraction_open_after_seconds: None,
            unlock: None,
            min_players: 1,
            max_players: 16,
            min_teams: 1,
            max_teams: u32::MAX,
            max_players_per_team: u32::MAX,
            extraction_radius: None,
            channel_seconds: None,
            spawn_protection_seconds: None,
            force_night: false,
            require_center_feature: false,
            required_features: Vec::new(),
            center_features: Vec::new(),
            center_radius_chunks: 4,
            require_boss: false,
            center_site: None,
            max_generation_attempts: 6,
            enabled: true,
            order: None,
        }
    }
}

/// Session parameters after layering template overrides over global defaults.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SessionRules {
    /// Total session duration.
    pub duration_seconds: u64,
    /// Channel radius.
    pub extraction_radius: f64,
    /// Seconds of channelling required.
    pub channel_seconds: u32,
    /// Seconds of spawn protection.
    pub spawn_protection_seconds: u32,
    /// Offset after which extraction opens; `None` waits for the conditional signal.
    pub extraction_open_after_seconds: Option<u64>,
    /// Absence tolerated before a disconnect is forfeited.
    pub grace_seconds: u64,
    /// Remaining seconds at which the final phase starts.
    pub final_phase_seconds: u64,
    /// Remaining seconds at which the indicator turns critical.
    pub critical_seconds: u64,
}

impl SessionRules {
    /// Resolves every session parameter: template override first, then global default.
    #[must_use]
    pub fn resolve(template: &Template, config: &OrchestratorConfig) -> Self {
        let duration_seconds = template.duration_seconds();
        let overrides = template.overrides();
        let extraction_open_after_seconds = match template.unlock() {
            ExtractionUnlock::Time { open_after_seconds } => {
                Some(open_after_seconds.unwrap_or(config.extraction.open_after_seconds))
            }
            ExtractionUnlock::Conditional => None,
        };
        Self {
            duration_seconds,
            extraction_radius: overrides
                .extraction_radius
                .unwrap_or(config.extraction.radius),
            channel_seconds: overrides
                .channel_seconds
                .unwrap_or(config.extraction.channel_seconds),
            spawn_protection_seconds: overrides
                .spawn_protection_seconds
                .unwrap_or(config.session.spawn_protection_seconds),
            extraction_open_after_seconds,
            grace_seconds: duration_seconds * GRACE_FRACTION_PERCENT / 100,
            final_phase_seconds: duration_seconds * config.session.final_phase_percent / 100,
            critical_seconds: config.session.critical_seconds,
        }
    }
}

/// Loads the catalog once and serves the cached copy until invalidated.
#[derive(Debug)]
pub struct CatalogSource {
    path: Option<PathBuf>,
    cached: Option<TemplateCatalog>,
}

impl CatalogSource {
    /// Source that reads templates from a configuration file.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            cached: None,
        }
    }

    /// Source that always serves the built-in catalog.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            path: None,
            cached: None,
        }
    }

    /// Returns the cached catalog, loading it first when needed.
    pub fn catalog(&mut self) -> Result<&TemplateCatalog, ConfigError> {
        if self.cached.is_none() {
            let catalog = match &self.path {
                Some(path) => OrchestratorConfig::from_file(path)?.catalog()?,
                None => TemplateCatalog::builtin(),
            };
            self.cached = Some(catalog);
        }
        Ok(self.cached.get_or_insert_with(TemplateCatalog::builtin))
    }

    /// Drops the cached catalog so the next access reloads it.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Reports whether a catalog is currently cached.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.cached.is_some()
    }
}
