use exfil_core::{BlockPos, EnvironmentKind, Location, Material, SpawnSafetyConfig, Terrain};

/// Highest row the roofed scan starts from.
const ROOFED_SCAN_CEILING: i32 = 122;
/// Rows above the floor the roofed scan never descends below.
const ROOFED_SCAN_FLOOR_MARGIN: i32 = 5;

/// Reports whether a participant can stand on `pos`: solid, not a hazard, not
/// foliage, with two empty cells above.
#[must_use]
pub fn is_standable<T: Terrain + ?Sized>(terrain: &T, pos: BlockPos) -> bool {
    let material = terrain.block(pos);
    material.is_solid()
        && !material.is_hazard()
        && !material.is_foliage()
        && terrain.block(pos.above(1)).is_air()
        && terrain.block(pos.above(2)).is_air()
}

/// Standing location on top of the column when its highest cell is stable ground.
#[must_use]
pub fn stable_ground<T: Terrain + ?Sized>(terrain: &T, x: i32, z: i32) -> Option<Location> {
    if terrain.environment() == EnvironmentKind::Roofed {
        return roofed_ground_y(terrain, x, z)
            .map(|y| BlockPos::new(x, y, z).standing_location());
    }
    let top = terrain.highest_block(x, z);
    is_standable(terrain, top).then(|| top.standing_location())
}

/// Relaxed rule: sand or gravel with water in one of the eight neighbouring cells.
#[must_use]
pub fn shore_ground<T: Terrain + ?Sized>(terrain: &T, x: i32, z: i32) -> Option<Location> {
    let top = terrain.highest_block(x, z);
    if !terrain.block(top).is_loose_shore() {
        return None;
    }
    let near_water = (-1..=1)
        .flat_map(|dx| (-1..=1).map(move |dz| (dx, dz)))
        .filter(|offset| *offset != (0, 0))
        .any(|(dx, dz)| terrain.block(top.offset(dx, 0, dz)) == Material::Water);
    near_water.then(|| top.standing_location())
}

/// Ground row of a roofed column, scanning down from just under the ceiling.
///
/// Accepts solid, non-bedrock, non-hazard ground with two empty cells above,
/// no bedrock three cells above (unless that is past the top of the world)
/// and no lava directly underneath.
#[must_use]
pub fn roofed_ground_y<T: Terrain + ?Sized>(terrain: &T, x: i32, z: i32) -> Option<i32> {
    let range = terrain.height_range();
    let start = (range.max() - 2).min(ROOFED_SCAN_CEILING);
    let floor = range.min() + ROOFED_SCAN_FLOOR_MARGIN;
    (floor..=start).rev().find(|&y| {
        let pos = BlockPos::new(x, y, z);
        let material = terrain.block(pos);
        if !material.is_solid() || material == Material::Bedrock || material.is_hazard() {
            return false;
        }
        if !terrain.block(pos.above(1)).is_air() || !terrain.block(pos.above(2)).is_air() {
            return false;
        }
        let clearance = pos.above(3);
        if clearance.y() < range.max() && terrain.block(clearance) == Material::Bedrock {
            return false;
        }
        terrain.block(pos.below(1)) != Material::Lava
    })
}

/// Row used as the surface of a column when no standability is required.
#[must_use]
pub fn surface_y<T: Terrain + ?Sized>(terrain: &T, x: i32, z: i32) -> i32 {
    let highest = terrain.highest_block(x, z).y();
    match terrain.environment() {
        EnvironmentKind::Roofed => roofed_ground_y(terrain, x, z).unwrap_or(highest),
        EnvironmentKind::Surface | EnvironmentKind::Islands => highest,
    }
}

/// Safe standing location in a single column, adjusting up or down from the
/// surface within the configured limits.
#[must_use]
pub fn safe_spawn_from_surface<T: Terrain + ?Sized>(
    terrain: &T,
    x: i32,
    z: i32,
    rules: &SpawnSafetyConfig,
) -> Option<Location> {
    if terrain.environment() == EnvironmentKind::Roofed {
        return roofed_ground_y(terrain, x, z)
            .map(|y| BlockPos::new(x, y, z).standing_location());
    }

    let range = terrain.height_range();
    let top = terrain.highest_block(x, z);
    if is_standable(terrain, top) {
        return Some(top.standing_location());
    }

    if rules.enable_downward {
        let deepest = (top.y() - 1 - rules.downward_adjust_max as i32).max(range.min());
        for y in (deepest..top.y()).rev() {
            let pos = BlockPos::new(x, y, z);
            if is_standable(terrain, pos) {
                return Some(pos.standing_location());
            }
        }
    }

    for step in 1..=rules.upward_adjust_max as i32 {
        let pos = top.above(step);
        if pos.y() + 2 >= range.max() {
            break;
        }
        if is_standable(terrain, pos) {
            return Some(pos.standing_location());
        }
    }
    None
}
