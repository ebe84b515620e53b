//! Positions in world space and on the integer block grid.
//!
//! [`Vec3`] is a continuous world position (what an actor reports), while
//! [`BlockPos`] is the integer grid coordinate of the block containing it.
//! Entries track the block their owner stands in; the spatial index files
//! entries by coarse cells of blocks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

// ---------------------------------------------------------------------------
// Vec3
// ---------------------------------------------------------------------------

/// A world-space position with f64 precision.
///
/// Persisted as a three element array `[x, y, z]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    /// The world origin.
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Construct a vector from components.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Squared distance to `other`.
    pub fn distance_squared(self, other: Vec3) -> f64 {
        let d = self - other;
        d.x * d.x + d.y * d.y + d.z * d.z
    }

    /// Check if all components are finite (not NaN or infinity).
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<[f64; 3]> for Vec3 {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self { x, y, z }
    }
}

impl From<Vec3> for [f64; 3] {
    fn from(v: Vec3) -> Self {
        [v.x, v.y, v.z]
    }
}

impl Add for Vec3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

// ---------------------------------------------------------------------------
// BlockPos
// ---------------------------------------------------------------------------

/// An integer block coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    /// The grid origin. Entries whose owner cannot be located sit here.
    pub const ORIGIN: BlockPos = BlockPos { x: 0, y: 0, z: 0 };

    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The block containing `pos` (each component floored).
    ///
    /// Non-finite components collapse to zero rather than saturating.
    pub fn floored(pos: Vec3) -> Self {
        fn floor(v: f64) -> i32 {
            if v.is_finite() {
                v.floor() as i32
            } else {
                0
            }
        }
        Self::new(floor(pos.x), floor(pos.y), floor(pos.z))
    }

    /// Offset by `(dx, dy, dz)`, saturating at the i32 bounds.
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.z.saturating_add(dz),
        )
    }

    /// The centre of this block in world space.
    pub fn center(self) -> Vec3 {
        Vec3::new(
            f64::from(self.x) + 0.5,
            f64::from(self.y) + 0.5,
            f64::from(self.z) + 0.5,
        )
    }

    /// True if the centre of this block lies within `distance` of `pos`.
    pub fn is_within_distance(self, pos: Vec3, distance: f64) -> bool {
        self.center().distance_squared(pos) < distance * distance
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.x, self.y, self.z)
    }
}
