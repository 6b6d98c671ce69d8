#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Placement engine that picks the extraction point and safe spawn points
//! inside a validated instance.

mod extraction;
mod ground;
mod spawn;

use exfil_core::{Boundary, Instance, Location, ParticipantId, SpawnSafetyConfig};
use rand::Rng;
use tracing::warn;

pub use extraction::{
    clear_canopy, find_extraction_point, perimeter_cells, spawn_center, ExtractionSite,
    ExtractionTier,
};
pub use ground::{
    is_standable, roofed_ground_y, safe_spawn_from_surface, shore_ground, stable_ground,
    surface_y,
};
pub use spawn::{random_safe_spawn_near, SpawnOutcome, SpawnPhase};

/// Radius around the spawn centre searched for each participant.
pub const SPAWN_SCATTER_RADIUS: u32 = 32;

/// Every location a new session needs.
#[derive(Clone, Debug, PartialEq)]
pub struct Placement {
    /// Extraction point and the rule that produced it.
    pub extraction: ExtractionSite,
    /// Centre of the spawn area.
    pub spawn_center: Location,
    /// One spawn per participant, in cohort order.
    pub spawns: Vec<(ParticipantId, SpawnOutcome)>,
}

/// Computes the extraction point, clears its canopy and scatters spawns for
/// every participant.
pub fn plan_placement<I, R>(
    instance: &mut I,
    boundary: &Boundary,
    participants: &[ParticipantId],
    rules: &SpawnSafetyConfig,
    rng: &mut R,
) -> Placement
where
    I: Instance + ?Sized,
    R: Rng + ?Sized,
{
    let extraction = find_extraction_point(&*instance, boundary);
    if extraction.tier == ExtractionTier::Fallback {
        warn!(
            target: "exfil::placement",
            instance = instance.name(),
            "no perimeter ground qualified for extraction; using default spawn"
        );
    }
    let _ = clear_canopy(instance, extraction.location);

    let center = spawn_center(&*instance, boundary, extraction.location);
    let terrain = &*instance;
    let spawns = participants
        .iter()
        .map(|participant| {
            let outcome =
                random_safe_spawn_near(terrain, center, SPAWN_SCATTER_RADIUS, rules, rng);
            if outcome.phase == SpawnPhase::Fallback {
                warn!(
                    target: "exfil::placement",
                    participant = participant.get(),
                    columns_checked = outcome.columns_checked,
                    "spawn search exhausted; using default spawn column"
                );
            }
            (*participant, outcome)
        })
        .collect();

    Placement {
        extraction,
        spawn_center: center,
        spawns,
    }
}
