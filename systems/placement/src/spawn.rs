use std::{f64::consts::TAU, time::Instant};

use exfil_core::{Location, SpawnSafetyConfig, Terrain};
use rand::Rng;
use tracing::debug;

use crate::ground::safe_spawn_from_surface;

/// Search phase that produced a spawn location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpawnPhase {
    /// Random polar sample.
    Radial,
    /// Expanding square ring.
    Square,
    /// Default spawn column of the instance.
    Fallback,
}

/// Result of a bounded spawn search.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpawnOutcome {
    /// Chosen standing location.
    pub location: Location,
    /// Phase that produced it.
    pub phase: SpawnPhase,
    /// Columns checked before the search stopped.
    pub columns_checked: u32,
}

/// Finds a safe standing location near `center`.
///
/// Draws up to `radial_samples` random polar samples within `radius`, then
/// walks square rings out to `radius + square_extra_radius`, then falls back
/// to the default spawn column. Every phase is bounded, so the search always
/// returns.
pub fn random_safe_spawn_near<T, R>(
    terrain: &T,
    center: Location,
    radius: u32,
    rules: &SpawnSafetyConfig,
    rng: &mut R,
) -> SpawnOutcome
where
    T: Terrain + ?Sized,
    R: Rng + ?Sized,
{
    let started = Instant::now();
    let outcome = search(terrain, center, radius, rules, rng);
    let elapsed = started.elapsed();
    if elapsed.as_millis() >= u128::from(rules.log_threshold_ms) {
        debug!(
            target: "exfil::placement",
            elapsed_ms = elapsed.as_millis() as u64,
            phase = ?outcome.phase,
            columns_checked = outcome.columns_checked,
            "slow spawn search"
        );
    }
    outcome
}

fn search<T, R>(
    terrain: &T,
    center: Location,
    radius: u32,
    rules: &SpawnSafetyConfig,
    rng: &mut R,
) -> SpawnOutcome
where
    T: Terrain + ?Sized,
    R: Rng + ?Sized,
{
    let mut columns_checked = 0;

    if rules.enable_radial {
        for _ in 0..rules.radial_samples {
            let angle = rng.gen_range(0.0..TAU);
            let distance = if radius == 0 {
                0.0
            } else {
                rng.gen_range(0.0..f64::from(radius))
            };
            let x = (center.x() + angle.cos() * distance).floor() as i32;
            let z = (center.z() + angle.sin() * distance).floor() as i32;
            columns_checked += 1;
            if let Some(location) = safe_spawn_from_surface(terrain, x, z, rules) {
                return SpawnOutcome {
                    location,
                    phase: SpawnPhase::Radial,
                    columns_checked,
                };
            }
        }
    }

    if rules.enable_square {
        let cx = center.x().floor() as i32;
        let cz = center.z().floor() as i32;
        let reach = radius.saturating_add(rules.square_extra_radius) as i32;
        for ring in 1..=reach {
            let rows = (cx - ring..=cx + ring).flat_map(|x| [(x, cz - ring), (x, cz + ring)]);
            let columns =
                (cz - ring + 1..=cz + ring - 1).flat_map(|z| [(cx - ring, z), (cx + ring, z)]);
            for (x, z) in rows.chain(columns) {
                columns_checked += 1;
                if let Some(location) = safe_spawn_from_surface(terrain, x, z, rules) {
                    return SpawnOutcome {
                        location,
                        phase: SpawnPhase::Square,
                        columns_checked,
                    };
                }
            }
        }
    }

    let spawn = terrain.default_spawn();
    let column = spawn.block();
    let location = safe_spawn_from_surface(terrain, column.x(), column.z(), rules)
        .unwrap_or_else(|| spawn.offset(0.5, 1.0, 0.5));
    SpawnOutcome {
        location,
        phase: SpawnPhase::Fallback,
        columns_checked,
    }
}
