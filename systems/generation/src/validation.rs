use std::{
    f64::consts::TAU,
    time::{Duration, Instant},
};

use exfil_core::{
    BlockPos, CenterSiteRule, FeatureKind, GenerationFailure, Location, Template, Terrain,
};
use rand::Rng;

/// Margin kept between terrain samples and the boundary edge.
const SAMPLE_EDGE_MARGIN: f64 = 8.0;

/// Result of the water-share check on surface terrain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TerrainVerdict {
    /// Whether the sampled area is too wet to use.
    pub unsuitable: bool,
    /// Columns sampled before a decision was reached.
    pub samples: u32,
    /// Sampled columns topped by water-like material.
    pub water: u32,
}

/// Sample budget for a boundary of the given half extent.
#[must_use]
pub fn terrain_sample_budget(half_extent: f64) -> u32 {
    if half_extent <= 128.0 {
        160
    } else if half_extent <= 256.0 {
        240
    } else {
        320
    }
}

/// Samples column tops around `center` and reports whether the water share
/// exceeds `threshold`.
///
/// Sampling stops as soon as the verdict can no longer change, when the
/// sample budget is spent or when `time_budget` runs out.
pub fn check_terrain<T, R>(
    terrain: &T,
    center: Location,
    half_extent: f64,
    threshold: f64,
    time_budget: Duration,
    rng: &mut R,
) -> TerrainVerdict
where
    T: Terrain + ?Sized,
    R: Rng + ?Sized,
{
    let budget = terrain_sample_budget(half_extent);
    let reach = (half_extent - SAMPLE_EDGE_MARGIN).max(1.0);
    let started = Instant::now();
    let mut water = 0u32;
    let mut samples = 0u32;

    while samples < budget {
        let x = center.x() + rng.gen_range(-reach..reach);
        let z = center.z() + rng.gen_range(-reach..reach);
        let top = terrain.highest_block(x.floor() as i32, z.floor() as i32);
        samples += 1;
        if terrain.block(top).is_water_like() {
            water += 1;
        }

        let remaining = budget - samples;
        let total = f64::from(budget);
        if f64::from(water) / total > threshold {
            return TerrainVerdict {
                unsuitable: true,
                samples,
                water,
            };
        }
        if f64::from(water + remaining) / total < threshold {
            return TerrainVerdict {
                unsuitable: false,
                samples,
                water,
            };
        }
        if started.elapsed() > time_budget {
            break;
        }
    }

    TerrainVerdict {
        unsuitable: samples > 0 && f64::from(water) / f64::from(samples) > threshold,
        samples,
        water,
    }
}

/// Searches the sampling band of `rule` for a dense patch of its ground
/// material. Returns the site's column at height zero.
pub fn find_center_site<T, R>(terrain: &T, rule: &CenterSiteRule, rng: &mut R) -> Option<Location>
where
    T: Terrain + ?Sized,
    R: Rng + ?Sized,
{
    let inner = rule.min_radius.max(0.0);
    let outer = rule.max_radius.max(inner);
    for _ in 0..rule.samples {
        let angle = rng.gen_range(0.0..TAU);
        let radius = if outer > inner {
            rng.gen_range(inner * inner..outer * outer).sqrt()
        } else {
            inner
        };
        let x = (angle.cos() * radius) as i32;
        let z = (angle.sin() * radius) as i32;
        let top = terrain.highest_block(x, z);
        if terrain.block(top) != rule.ground || top.y() > rule.max_surface_y {
            continue;
        }
        if patch_density(terrain, top, rule) < rule.min_density {
            continue;
        }
        return Some(Location::new(f64::from(x), 0.0, f64::from(z)));
    }
    None
}

fn patch_density<T: Terrain + ?Sized>(terrain: &T, top: BlockPos, rule: &CenterSiteRule) -> u32 {
    let reach = rule.patch_half_width;
    let mut matching = 0;
    for dx in -reach..=reach {
        for dz in -reach..=reach {
            let below = top.offset(dx, -1, dz);
            let level = top.offset(dx, 0, dz);
            if terrain.block(below) == rule.ground || terrain.block(level) == rule.ground {
                matching += 1;
            }
        }
    }
    matching
}

/// Checks the template's feature requirements around `center`.
///
/// Every required feature must be locatable within half the boundary span,
/// and when a centre rule is set one of its candidates must lie within the
/// centre radius. Candidates the engine does not know are skipped.
pub fn validate_features<T: Terrain + ?Sized>(
    terrain: &T,
    template: &Template,
    center: BlockPos,
) -> Result<(), GenerationFailure> {
    let radius = template.span_cells() / 2;
    for feature in template.required_features() {
        if locate(terrain, feature, center, radius).is_none() {
            return Err(GenerationFailure::MissingFeature(feature.clone()));
        }
    }

    if let Some(rule) = template.center_feature() {
        let radius = rule.radius_cells();
        let near_center = rule
            .candidates()
            .iter()
            .any(|candidate| locate(terrain, candidate, center, radius).is_some());
        if !near_center {
            return Err(GenerationFailure::MissingCenterFeature);
        }
    }
    Ok(())
}

/// Checks the template's feature requirements against positions found by
/// earlier searches, without searching again.
///
/// Applies the same distances as [`validate_features`]: required features
/// within half the span of `center`, a centre candidate within the centre
/// radius.
pub fn validate_located(
    template: &Template,
    located: &[(FeatureKind, Option<BlockPos>)],
    center: BlockPos,
) -> Result<(), GenerationFailure> {
    let within = |feature: &FeatureKind, radius: u32| {
        located
            .iter()
            .filter(|(kind, _)| kind == feature)
            .filter_map(|(_, pos)| *pos)
            .any(|pos| horizontal_distance(center, pos) <= f64::from(radius))
    };

    let radius = template.span_cells() / 2;
    for feature in template.required_features() {
        if !within(feature, radius) {
            return Err(GenerationFailure::MissingFeature(feature.clone()));
        }
    }

    if let Some(rule) = template.center_feature() {
        let radius = rule.radius_cells();
        if !rule
            .candidates()
            .iter()
            .any(|candidate| within(candidate, radius))
        {
            return Err(GenerationFailure::MissingCenterFeature);
        }
    }
    Ok(())
}

fn horizontal_distance(from: BlockPos, to: BlockPos) -> f64 {
    let dx = f64::from(to.x() - from.x());
    let dz = f64::from(to.z() - from.z());
    dx.hypot(dz)
}

/// Locates a feature within `radius` cells of `origin`, horizontally.
pub fn locate<T: Terrain + ?Sized>(
    terrain: &T,
    feature: &FeatureKind,
    origin: BlockPos,
    radius: u32,
) -> Option<BlockPos> {
    if !terrain.knows_feature(feature) {
        return None;
    }
    let found = terrain.locate_feature(feature, origin, radius)?;
    (horizontal_distance(origin, found) <= f64::from(radius)).then_some(found)
}
