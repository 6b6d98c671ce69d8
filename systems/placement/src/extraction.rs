use std::collections::HashSet;

use exfil_core::{BlockPos, Boundary, Instance, Location, Material, Terrain};
use glam::DVec2;

use crate::ground::{shore_ground, stable_ground, surface_y};

/// Distance between perimeter samples.
const PERIMETER_STEP: usize = 8;
/// Inset of the sampled perimeter from the boundary edge.
const PERIMETER_INSET: f64 = 4.0;
/// Inset of the spawn centre from the boundary edge.
const SPAWN_CENTER_INSET: f64 = 8.0;
/// Horizontal reach of the canopy clearing around the extraction point.
const CANOPY_REACH: i32 = 2;
/// Rows of canopy cleared above the extraction ground.
const CANOPY_HEIGHT: i32 = 4;

/// Rule that produced the extraction point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractionTier {
    /// Stable ground on the perimeter.
    Stable,
    /// Sand or gravel beside water on the perimeter.
    Shore,
    /// The instance default spawn surface.
    Fallback,
}

/// Chosen extraction point and the rule that produced it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExtractionSite {
    /// Standing location participants channel around.
    pub location: Location,
    /// Rule that accepted the location.
    pub tier: ExtractionTier,
}

/// Cells sampled along a square perimeter of `half_extent` around `center`,
/// deduplicated in visiting order.
#[must_use]
pub fn perimeter_cells(center: Location, half_extent: f64) -> Vec<(i32, i32)> {
    let min_x = (center.x() - half_extent).floor() as i32;
    let max_x = (center.x() + half_extent).floor() as i32;
    let min_z = (center.z() - half_extent).floor() as i32;
    let max_z = (center.z() + half_extent).floor() as i32;
    let side = (max_x - min_x).max(max_z - min_z).max(0);

    let mut seen = HashSet::new();
    let mut cells = Vec::new();
    for offset in (0..=side).step_by(PERIMETER_STEP) {
        let along_x = (min_x + offset).min(max_x);
        let along_z = (min_z + offset).min(max_z);
        for cell in [
            (along_x, min_z),
            (along_x, max_z),
            (min_x, along_z),
            (max_x, along_z),
        ] {
            if seen.insert(cell) {
                cells.push(cell);
            }
        }
    }
    cells
}

fn farthest<F>(cells: &[(i32, i32)], reference: &Location, accept: F) -> Option<Location>
where
    F: Fn(i32, i32) -> Option<Location>,
{
    let mut best: Option<(f64, Location)> = None;
    for &(x, z) in cells {
        let Some(candidate) = accept(x, z) else {
            continue;
        };
        let distance = candidate.distance_squared(reference);
        if best.map_or(true, |(current, _)| distance > current) {
            best = Some((distance, candidate));
        }
    }
    best.map(|(_, location)| location)
}

/// Picks the perimeter point farthest from the centre that participants can
/// stand on, relaxing to shoreline and finally to the default spawn surface.
#[must_use]
pub fn find_extraction_point<T: Terrain + ?Sized>(
    terrain: &T,
    boundary: &Boundary,
) -> ExtractionSite {
    let center = boundary.center();
    let half = (boundary.half_extent() - PERIMETER_INSET).max(0.0);
    let cells = perimeter_cells(center, half);
    let reference = Location::new(
        center.x(),
        f64::from(terrain.height_range().max()),
        center.z(),
    );

    if let Some(location) = farthest(&cells, &reference, |x, z| stable_ground(terrain, x, z)) {
        return ExtractionSite {
            location,
            tier: ExtractionTier::Stable,
        };
    }
    if let Some(location) = farthest(&cells, &reference, |x, z| shore_ground(terrain, x, z)) {
        return ExtractionSite {
            location,
            tier: ExtractionTier::Shore,
        };
    }

    let spawn = terrain.default_spawn().block();
    let ground = BlockPos::new(spawn.x(), surface_y(terrain, spawn.x(), spawn.z()), spawn.z());
    ExtractionSite {
        location: ground.standing_location(),
        tier: ExtractionTier::Fallback,
    }
}

/// Replaces tree cells above the extraction point with air; returns how many changed.
pub fn clear_canopy<I: Instance + ?Sized>(instance: &mut I, at: Location) -> u32 {
    let base = at.block();
    let mut cleared = 0;
    for dx in -CANOPY_REACH..=CANOPY_REACH {
        for dz in -CANOPY_REACH..=CANOPY_REACH {
            for dy in 0..CANOPY_HEIGHT {
                let pos = base.offset(dx, dy, dz);
                if instance.block(pos).is_foliage() {
                    instance.set_block(pos, Material::Air);
                    cleared += 1;
                }
            }
        }
    }
    cleared
}

/// Centre of the spawn area, opposite the extraction point across the boundary centre.
#[must_use]
pub fn spawn_center<T: Terrain + ?Sized>(
    terrain: &T,
    boundary: &Boundary,
    extraction: Location,
) -> Location {
    let center = boundary.center().horizontal();
    let toward_extraction = extraction.horizontal() - center;
    let direction = toward_extraction.try_normalize().unwrap_or(DVec2::X);
    let reach = (boundary.half_extent() - SPAWN_CENTER_INSET).max(0.0);
    let spot = center - direction * reach;
    let x = spot.x.floor() as i32;
    let z = spot.y.floor() as i32;
    let y = surface_y(terrain, x, z);
    Location::new(spot.x, f64::from(y) + 1.0, spot.y)
}
