use std::collections::{BTreeMap, BTreeSet, HashMap};

use exfil_core::{
    BlockPos, Boundary, EnvironmentKind, FeatureKind, HeightRange, Instance, Location, Material,
    Terrain,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const SURFACE_HEIGHT: HeightRange = HeightRange::new(0, 192);
const ROOFED_HEIGHT: HeightRange = HeightRange::new(0, 128);
const ISLANDS_HEIGHT: HeightRange = HeightRange::new(0, 160);
const ROOFED_LAVA_LEVEL: i32 = 31;
const ISLAND_SURFACE: i32 = 60;
const ISLAND_DEPTH: i32 = 10;
const TREE_SPACING: u64 = 61;

/// Shape of the procedurally evaluated terrain.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TerrainProfile {
    /// Grass plain at a fixed height.
    Flat {
        /// Row of the grass layer.
        ground: i32,
    },
    /// Open water everywhere over a sand floor.
    Ocean {
        /// Row of the sand floor.
        floor: i32,
        /// Highest water row.
        sea_level: i32,
    },
    /// Seeded hills, shores and optional trees.
    Rolling {
        /// Mean surface row.
        base: i32,
        /// Peak deviation from the mean.
        amplitude: f64,
        /// Highest water row.
        sea_level: i32,
        /// Whether trees grow on dry land.
        trees: bool,
    },
    /// Netherrack floor over a lava sea under a bedrock ceiling.
    Roofed {
        /// Mean floor row.
        floor: i32,
        /// First bedrock row of the ceiling.
        ceiling: i32,
    },
    /// Floating end stone islands.
    Islands {
        /// Radius of the central island.
        central_radius: f64,
        /// Inner radius of the outer island ring.
        ring_inner: f64,
        /// Outer radius of the outer island ring.
        ring_outer: f64,
    },
}

impl TerrainProfile {
    /// Profile used for an environment kind when none is configured.
    #[must_use]
    pub const fn default_for(environment: EnvironmentKind) -> Self {
        match environment {
            EnvironmentKind::Surface => Self::Rolling {
                base: 70,
                amplitude: 6.0,
                sea_level: 62,
                trees: true,
            },
            EnvironmentKind::Roofed => Self::Roofed {
                floor: 40,
                ceiling: 120,
            },
            EnvironmentKind::Islands => Self::Islands {
                central_radius: 150.0,
                ring_inner: 1200.0,
                ring_outer: 4000.0,
            },
        }
    }

    const fn height_range(&self) -> HeightRange {
        match self {
            Self::Flat { .. } | Self::Ocean { .. } | Self::Rolling { .. } => SURFACE_HEIGHT,
            Self::Roofed { .. } => ROOFED_HEIGHT,
            Self::Islands { .. } => ISLANDS_HEIGHT,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Phases {
    x: f64,
    z: f64,
    salt: u64,
}

impl Phases {
    fn from_seed(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Self {
            x: rng.gen_range(0.0..std::f64::consts::TAU),
            z: rng.gen_range(0.0..std::f64::consts::TAU),
            salt: rng.gen(),
        }
    }
}

/// Deterministic, allocation-light instance evaluated on demand.
#[derive(Debug)]
pub struct SyntheticInstance {
    name: String,
    environment: EnvironmentKind,
    profile: TerrainProfile,
    phases: Phases,
    edits: HashMap<BlockPos, Material>,
    features: BTreeMap<FeatureKind, Vec<BlockPos>>,
    known_features: BTreeSet<FeatureKind>,
    boundary: Option<Boundary>,
    night: bool,
    boss: bool,
}

impl SyntheticInstance {
    /// Creates an instance with the given profile and seed.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        environment: EnvironmentKind,
        profile: TerrainProfile,
        seed: u64,
    ) -> Self {
        Self {
            name: name.into(),
            environment,
            profile,
            phases: Phases::from_seed(seed),
            edits: HashMap::new(),
            features: BTreeMap::new(),
            known_features: BTreeSet::new(),
            boundary: None,
            night: false,
            boss: false,
        }
    }

    /// Places a locatable feature.
    #[must_use]
    pub fn with_feature(mut self, feature: FeatureKind, at: BlockPos) -> Self {
        self.add_feature(feature, at);
        self
    }

    /// Declares a feature the engine knows about even if none is placed.
    #[must_use]
    pub fn with_known_feature(mut self, feature: FeatureKind) -> Self {
        let _ = self.known_features.insert(feature);
        self
    }

    pub(crate) fn add_feature(&mut self, feature: FeatureKind, at: BlockPos) {
        let _ = self.known_features.insert(feature.clone());
        self.features.entry(feature).or_default().push(at);
    }

    /// Boundary applied by the orchestrator, if any.
    #[must_use]
    pub fn boundary(&self) -> Option<Boundary> {
        self.boundary
    }

    /// Whether the clock was locked to night.
    #[must_use]
    pub fn is_night(&self) -> bool {
        self.night
    }

    /// Whether the boss was spawned.
    #[must_use]
    pub fn has_boss(&self) -> bool {
        self.boss
    }

    fn surface_height(&self, x: i32, z: i32, base: i32, amplitude: f64) -> i32 {
        let wave = ((f64::from(x) * 0.045) + self.phases.x).sin()
            + ((f64::from(z) * 0.061) + self.phases.z).sin();
        base + (wave * amplitude / 2.0).round() as i32
    }

    fn column_hash(&self, x: i32, z: i32) -> u64 {
        let mut value = self.phases.salt
            ^ (x as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)
            ^ (z as u64).wrapping_mul(0xc2b2_ae3d_27d4_eb4f);
        value ^= value >> 31;
        value = value.wrapping_mul(0xbf58_476d_1ce4_e5b9);
        value ^ (value >> 29)
    }

    fn tree_height(
        &self,
        x: i32,
        z: i32,
        base: i32,
        amplitude: f64,
        sea_level: i32,
    ) -> Option<i32> {
        if self.column_hash(x, z) % TREE_SPACING != 0 {
            return None;
        }
        let ground = self.surface_height(x, z, base, amplitude);
        (ground > sea_level).then_some(ground)
    }

    fn generated(&self, pos: BlockPos) -> Material {
        let range = self.profile.height_range();
        let (x, y, z) = (pos.x(), pos.y(), pos.z());
        if !range.contains(y) {
            return Material::Air;
        }
        match self.profile {
            TerrainProfile::Flat { ground } => match y.cmp(&ground) {
                std::cmp::Ordering::Equal => Material::Grass,
                std::cmp::Ordering::Less if y == range.min() => Material::Bedrock,
                std::cmp::Ordering::Less => Material::Dirt,
                std::cmp::Ordering::Greater => Material::Air,
            },
            TerrainProfile::Ocean { floor, sea_level } => {
                if y < floor {
                    Material::Stone
                } else if y == floor {
                    Material::Sand
                } else if y <= sea_level {
                    Material::Water
                } else {
                    Material::Air
                }
            }
            TerrainProfile::Rolling {
                base,
                amplitude,
                sea_level,
                trees,
            } => {
                let ground = self.surface_height(x, z, base, amplitude);
                if y < ground {
                    return if ground - y > 4 {
                        Material::Stone
                    } else {
                        Material::Dirt
                    };
                }
                if y == ground {
                    return if ground <= sea_level + 1 {
                        Material::Sand
                    } else {
                        Material::Grass
                    };
                }
                if y <= sea_level {
                    return Material::Water;
                }
                if trees {
                    return self.tree_cell(x, y, z, base, amplitude, sea_level);
                }
                Material::Air
            }
            TerrainProfile::Roofed { floor, ceiling } => {
                if y == range.min() || y >= ceiling {
                    return Material::Bedrock;
                }
                let ground = self.surface_height(x, z, floor, 8.0);
                if y <= ground {
                    Material::Netherrack
                } else if y <= ROOFED_LAVA_LEVEL {
                    Material::Lava
                } else {
                    Material::Air
                }
            }
            TerrainProfile::Islands {
                central_radius,
                ring_inner,
                ring_outer,
            } => {
                let radius = f64::from(x).hypot(f64::from(z));
                let on_island = radius <= central_radius
                    || (radius >= ring_inner
                        && radius <= ring_outer
                        && self.column_hash(x.div_euclid(48), z.div_euclid(48)) % 3 != 0);
                if on_island && y <= ISLAND_SURFACE && y > ISLAND_SURFACE - ISLAND_DEPTH {
                    Material::EndStone
                } else {
                    Material::Air
                }
            }
        }
    }

    fn tree_cell(
        &self,
        x: i32,
        y: i32,
        z: i32,
        base: i32,
        amplitude: f64,
        sea: i32,
    ) -> Material {
        if let Some(ground) = self.tree_height(x, z, base, amplitude, sea) {
            if y > ground && y <= ground + 3 {
                return Material::Log;
            }
        }
        for dx in -1..=1 {
            for dz in -1..=1 {
                if let Some(ground) = self.tree_height(x + dx, z + dz, base, amplitude, sea) {
                    if y >= ground + 4 && y <= ground + 5 {
                        return Material::Leaves;
                    }
                }
            }
        }
        Material::Air
    }
}

impl Terrain for SyntheticInstance {
    fn environment(&self) -> EnvironmentKind {
        self.environment
    }

    fn height_range(&self) -> HeightRange {
        self.profile.height_range()
    }

    fn block(&self, pos: BlockPos) -> Material {
        match self.edits.get(&pos) {
            Some(material) => *material,
            None => self.generated(pos),
        }
    }

    fn highest_block(&self, x: i32, z: i32) -> BlockPos {
        let range = self.profile.height_range();
        for y in (range.min()..range.max()).rev() {
            let pos = BlockPos::new(x, y, z);
            if !self.block(pos).is_air() {
                return pos;
            }
        }
        BlockPos::new(x, range.min(), z)
    }

    fn default_spawn(&self) -> Location {
        match self.profile {
            TerrainProfile::Roofed { .. } => Location::new(0.0, 64.0, 0.0),
            TerrainProfile::Islands { .. } => {
                Location::new(0.0, f64::from(ISLAND_SURFACE + 1), 0.0)
            }
            _ => {
                let top = self.highest_block(0, 0);
                Location::new(0.0, f64::from(top.y() + 1), 0.0)
            }
        }
    }

    fn knows_feature(&self, feature: &FeatureKind) -> bool {
        self.known_features.contains(feature)
    }

    fn locate_feature(
        &self,
        feature: &FeatureKind,
        origin: BlockPos,
        radius: u32,
    ) -> Option<BlockPos> {
        let limit = f64::from(radius);
        self.features
            .get(feature)?
            .iter()
            .map(|pos| {
                let dx = f64::from(pos.x() - origin.x());
                let dz = f64::from(pos.z() - origin.z());
                (dx.hypot(dz), *pos)
            })
            .filter(|(distance, _)| *distance <= limit)
            .min_by(|left, right| left.0.total_cmp(&right.0))
            .map(|(_, pos)| pos)
    }
}

impl Instance for SyntheticInstance {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_boundary(&mut self, boundary: Boundary) {
        self.boundary = Some(boundary);
    }

    fn set_block(&mut self, pos: BlockPos, material: Material) {
        let _ = self.edits.insert(pos, material);
    }

    fn force_night(&mut self) {
        self.night = true;
    }

    fn ensure_boss(&mut self) {
        self.boss = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roofed_highest_block_is_the_ceiling() {
        let instance = SyntheticInstance::new(
            "roofed",
            EnvironmentKind::Roofed,
            TerrainProfile::default_for(EnvironmentKind::Roofed),
            1,
        );
        let top = instance.highest_block(10, 10);
        assert_eq!(instance.block(top), Material::Bedrock);
    }

    #[test]
    fn same_seed_yields_same_terrain() {
        let profile = TerrainProfile::default_for(EnvironmentKind::Surface);
        let first = SyntheticInstance::new("a", EnvironmentKind::Surface, profile, 9);
        let second = SyntheticInstance::new("b", EnvironmentKind::Surface, profile, 9);
        for x in (-64..64).step_by(7) {
            assert_eq!(first.highest_block(x, -x), second.highest_block(x, -x));
        }
    }

    #[test]
    fn features_are_found_within_radius_only() {
        let feature = FeatureKind::new("village");
        let instance = SyntheticInstance::new(
            "f",
            EnvironmentKind::Surface,
            TerrainProfile::Flat { ground: 64 },
            0,
        )
        .with_feature(feature.clone(), BlockPos::new(100, 64, 0));
        let origin = BlockPos::new(0, 64, 0);
        assert!(instance.locate_feature(&feature, origin, 50).is_none());
        assert_eq!(
            instance.locate_feature(&feature, origin, 128),
            Some(BlockPos::new(100, 64, 0))
        );
    }
}
