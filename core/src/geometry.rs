//! Cell and continuous coordinates used inside generated instances.

use glam::{DVec2, DVec3};

/// Number of cells spanned by one area unit along each horizontal axis.
pub const CELLS_PER_AREA_UNIT: u32 = 16;

/// Integer cell coordinate inside an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockPos {
    x: i32,
    y: i32,
    z: i32,
}

impl BlockPos {
    /// Creates a new cell coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// East-west component.
    #[must_use]
    pub const fn x(&self) -> i32 {
        self.x
    }

    /// Vertical component.
    #[must_use]
    pub const fn y(&self) -> i32 {
        self.y
    }

    /// North-south component.
    #[must_use]
    pub const fn z(&self) -> i32 {
        self.z
    }

    /// Returns the cell displaced by the provided deltas.
    #[must_use]
    pub const fn offset(&self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.z.saturating_add(dz),
        )
    }

    /// Returns the cell `n` rows above this one.
    #[must_use]
    pub const fn above(&self, n: i32) -> Self {
        self.offset(0, n, 0)
    }

    /// Returns the cell `n` rows below this one.
    #[must_use]
    pub const fn below(&self, n: i32) -> Self {
        self.offset(0, -n, 0)
    }

    /// Location a participant occupies when standing on top of this cell.
    #[must_use]
    pub fn standing_location(&self) -> Location {
        Location::new(
            f64::from(self.x) + 0.5,
            f64::from(self.y) + 1.0,
            f64::from(self.z) + 0.5,
        )
    }
}

/// Continuous position inside an instance.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Location {
    x: f64,
    y: f64,
    z: f64,
}

impl Location {
    /// Creates a location from its components.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// East-west component.
    #[must_use]
    pub const fn x(&self) -> f64 {
        self.x
    }

    /// Vertical component.
    #[must_use]
    pub const fn y(&self) -> f64 {
        self.y
    }

    /// North-south component.
    #[must_use]
    pub const fn z(&self) -> f64 {
        self.z
    }

    /// Returns the location displaced by the provided deltas.
    #[must_use]
    pub fn offset(&self, dx: f64, dy: f64, dz: f64) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// Cell containing this location.
    #[must_use]
    pub fn block(&self) -> BlockPos {
        BlockPos::new(
            self.x.floor() as i32,
            self.y.floor() as i32,
            self.z.floor() as i32,
        )
    }

    /// Squared euclidean distance to another location.
    #[must_use]
    pub fn distance_squared(&self, other: &Location) -> f64 {
        self.to_vec3().distance_squared(other.to_vec3())
    }

    /// Euclidean distance to another location.
    #[must_use]
    pub fn distance(&self, other: &Location) -> f64 {
        self.to_vec3().distance(other.to_vec3())
    }

    /// Converts the location into a vector for arithmetic.
    #[must_use]
    pub fn to_vec3(&self) -> DVec3 {
        DVec3::new(self.x, self.y, self.z)
    }

    /// Horizontal projection of the location onto the x/z plane.
    #[must_use]
    pub fn horizontal(&self) -> DVec2 {
        DVec2::new(self.x, self.z)
    }
}

impl From<DVec3> for Location {
    fn from(value: DVec3) -> Self {
        Self::new(value.x, value.y, value.z)
    }
}

/// Square horizontal boundary enclosing a playable instance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Boundary {
    center: Location,
    side: f64,
}

impl Boundary {
    /// Creates a boundary of the given side length around `center`.
    #[must_use]
    pub const fn new(center: Location, side: f64) -> Self {
        Self { center, side }
    }

    /// Centre of the boundary.
    #[must_use]
    pub const fn center(&self) -> Location {
        self.center
    }

    /// Full side length measured in cells.
    #[must_use]
    pub const fn side(&self) -> f64 {
        self.side
    }

    /// Distance from the centre to any edge.
    #[must_use]
    pub fn half_extent(&self) -> f64 {
        self.side / 2.0
    }

    /// Reports whether a location lies within the boundary horizontally.
    #[must_use]
    pub fn contains(&self, location: &Location) -> bool {
        let half = self.half_extent();
        (location.x() - self.center.x()).abs() <= half
            && (location.z() - self.center.z()).abs() <= half
    }
}

/// Vertical extent of an instance: `min` inclusive, `max` exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeightRange {
    min: i32,
    max: i32,
}

impl HeightRange {
    /// Creates a new height range.
    #[must_use]
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    /// Lowest addressable row.
    #[must_use]
    pub const fn min(&self) -> i32 {
        self.min
    }

    /// First row above the addressable range.
    #[must_use]
    pub const fn max(&self) -> i32 {
        self.max
    }

    /// Reports whether a row lies inside the range.
    #[must_use]
    pub const fn contains(&self, y: i32) -> bool {
        y >= self.min && y < self.max
    }
}
