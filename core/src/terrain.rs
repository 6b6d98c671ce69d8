//! Narrow interfaces to the environment engine and to the host's collaborators.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    geometry::{BlockPos, Boundary, HeightRange, Location},
    template::{EnvironmentKind, FeatureKind, Template},
    ParticipantId, SessionId,
};

/// Material occupying a single cell of an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Material {
    /// Empty space.
    Air,
    /// Still or flowing water.
    Water,
    /// Still or flowing lava.
    Lava,
    /// Hot ground that damages anything standing on it.
    Magma,
    /// Open flame.
    Fire,
    /// Submerged kelp, including its stem.
    Kelp,
    /// Submerged grass, short or tall.
    Seagrass,
    /// Tree canopy.
    Leaves,
    /// Tree trunk or wood.
    Log,
    /// Indestructible floor and ceiling material.
    Bedrock,
    /// Loose sand.
    Sand,
    /// Loose gravel.
    Gravel,
    /// Bare rock.
    Stone,
    /// Grass-covered soil.
    Grass,
    /// Plain soil.
    Dirt,
    /// Roofed-environment ground.
    Netherrack,
    /// Floating-island ground.
    EndStone,
    /// Packed snow.
    Snow,
}

impl Material {
    /// Reports whether the cell is empty.
    #[must_use]
    pub const fn is_air(self) -> bool {
        matches!(self, Self::Air)
    }

    /// Reports whether a participant can stand on top of the cell.
    #[must_use]
    pub const fn is_solid(self) -> bool {
        !matches!(
            self,
            Self::Air | Self::Water | Self::Lava | Self::Fire | Self::Kelp | Self::Seagrass
        )
    }

    /// Liquids and damaging materials that must never be chosen as ground.
    #[must_use]
    pub const fn is_hazard(self) -> bool {
        matches!(
            self,
            Self::Water | Self::Lava | Self::Magma | Self::Fire | Self::Kelp | Self::Seagrass
        )
    }

    /// Tree material that cannot serve as ground.
    #[must_use]
    pub const fn is_foliage(self) -> bool {
        matches!(self, Self::Leaves | Self::Log)
    }

    /// Materials counted as open water by the terrain suitability check.
    #[must_use]
    pub const fn is_water_like(self) -> bool {
        matches!(self, Self::Water | Self::Kelp | Self::Seagrass)
    }

    /// Loose shoreline ground accepted by the relaxed extraction rule.
    #[must_use]
    pub const fn is_loose_shore(self) -> bool {
        matches!(self, Self::Sand | Self::Gravel)
    }
}

/// Read-only access to the cells of a generated instance.
pub trait Terrain {
    /// Environment kind the instance was generated for.
    fn environment(&self) -> EnvironmentKind;

    /// Vertical extent of the instance.
    fn height_range(&self) -> HeightRange;

    /// Material of the cell at `pos`; cells outside the height range read as air.
    fn block(&self, pos: BlockPos) -> Material;

    /// Highest non-air cell of the column, or the bottom row if the column is empty.
    fn highest_block(&self, x: i32, z: i32) -> BlockPos;

    /// Spawn location the engine reports for the instance.
    fn default_spawn(&self) -> Location;

    /// Reports whether the engine knows how to locate the feature at all.
    fn knows_feature(&self, feature: &FeatureKind) -> bool;

    /// Locates the nearest instance of `feature` within `radius` cells of `origin`.
    fn locate_feature(&self, feature: &FeatureKind, origin: BlockPos, radius: u32)
        -> Option<BlockPos>;
}

/// A live, mutable instance owned by the orchestrator.
pub trait Instance: Terrain + Send {
    /// Storage name of the instance.
    fn name(&self) -> &str;

    /// Applies the playable boundary.
    fn set_boundary(&mut self, boundary: Boundary);

    /// Replaces the material of a single cell.
    fn set_block(&mut self, pos: BlockPos, material: Material);

    /// Locks the instance clock to night.
    fn force_night(&mut self);

    /// Makes sure the instance boss is present.
    fn ensure_boss(&mut self);
}

/// Error raised when the factory cannot produce an instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FactoryError {
    /// The engine is busy; retrying on a later tick may succeed.
    #[error("instance creation is temporarily unavailable: {0}")]
    Transient(String),
    /// The engine rejected the request.
    #[error("instance creation failed: {0}")]
    Failed(String),
}

/// Produces and reclaims isolated instances.
pub trait InstanceFactory: Send {
    /// Creates a fresh instance for `template`, named after `session`.
    fn create(
        &mut self,
        template: &Template,
        session: SessionId,
    ) -> Result<Box<dyn Instance>, FactoryError>;

    /// Unloads an instance and deletes its backing storage.
    fn discard(&mut self, instance: Box<dyn Instance>);

    /// Unloads an instance but keeps its backing storage.
    fn unload(&mut self, instance: Box<dyn Instance>);

    /// Names of instances that still have backing storage.
    fn stored_instances(&self) -> Vec<String>;

    /// Deletes the storage of an unloaded instance; returns `false` when nothing was removed.
    fn delete_stored(&mut self, name: &str) -> bool;
}

/// Resolves the persistent home location of a participant.
pub trait HomeResolver: Send {
    /// Home location of `participant`, if one exists.
    fn resolve_home(&self, participant: ParticipantId) -> Option<Location>;

    /// Location used when a participant has no home.
    fn fallback(&self) -> Location;
}

/// Team membership as reported by the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Team {
    leader: ParticipantId,
    members: BTreeSet<ParticipantId>,
}

impl Team {
    /// Creates a team; the leader is always counted as a member.
    #[must_use]
    pub fn new(leader: ParticipantId, members: impl IntoIterator<Item = ParticipantId>) -> Self {
        let mut members: BTreeSet<ParticipantId> = members.into_iter().collect();
        let _ = members.insert(leader);
        Self { leader, members }
    }

    /// Team leader.
    #[must_use]
    pub const fn leader(&self) -> ParticipantId {
        self.leader
    }

    /// Every member including the leader.
    #[must_use]
    pub fn members(&self) -> &BTreeSet<ParticipantId> {
        &self.members
    }
}

/// Looks up team membership.
pub trait TeamDirectory: Send {
    /// Team `participant` belongs to, if any.
    fn team_of(&self, participant: ParticipantId) -> Option<Team>;
}
