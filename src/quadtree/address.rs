//! Quadtree tile addresses

use std::fmt;

use serde::{Deserialize, Serialize};

/// Deepest supported quadtree level; tile indices stay below `2^31`.
pub const MAX_LEVEL: u8 = 31;

/// Address of one quadtree node: `(level, tx, ty)` with `tx, ty < 2^level`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileAddress {
    pub level: u8,
    pub tx: u32,
    pub ty: u32,
}

impl TileAddress {
    /// The single tile covering the whole terrain.
    pub const ROOT: TileAddress = TileAddress { level: 0, tx: 0, ty: 0 };

    pub const fn new(level: u8, tx: u32, ty: u32) -> Self {
        Self { level, tx, ty }
    }

    /// Number of tiles along one side of the quadtree at `level`.
    pub fn tiles_per_side(level: u8) -> u64 {
        1u64 << level
    }

    /// True if the coordinates lie inside the quadtree at this level.
    pub fn is_valid(&self) -> bool {
        self.level <= MAX_LEVEL
            && (self.tx as u64) < Self::tiles_per_side(self.level)
            && (self.ty as u64) < Self::tiles_per_side(self.level)
    }

    /// Parent tile one level up, `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.level == 0 {
            None
        } else {
            Some(Self::new(self.level - 1, self.tx / 2, self.ty / 2))
        }
    }

    /// Ancestor at a coarser `level`. Returns `self` when `level == self.level`.
    pub fn ancestor(&self, level: u8) -> Option<Self> {
        if level > self.level {
            return None;
        }
        let shift = self.level - level;
        Some(Self::new(level, self.tx >> shift, self.ty >> shift))
    }

    /// True if `other` is this tile or lies below it in the quadtree.
    pub fn contains(&self, other: &TileAddress) -> bool {
        other.ancestor(self.level) == Some(*self)
    }

    /// The four children, in Z-order.
    pub fn children(&self) -> [Self; 4] {
        let (x, y, l) = (self.tx * 2, self.ty * 2, self.level + 1);
        [
            Self::new(l, x, y),
            Self::new(l, x + 1, y),
            Self::new(l, x, y + 1),
            Self::new(l, x + 1, y + 1),
        ]
    }

    /// Position of this tile inside its parent: `(tx & 1, ty & 1)`.
    pub fn quadrant(&self) -> (u32, u32) {
        (self.tx & 1, self.ty & 1)
    }

    /// Lower corner and edge length of the tile in the unit square `[0, 1]^2`.
    pub fn unit_bounds(&self) -> ([f64; 2], f64) {
        let size = 1.0 / Self::tiles_per_side(self.level) as f64;
        ([self.tx as f64 * size, self.ty as f64 * size], size)
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.level, self.tx, self.ty)
    }
}
