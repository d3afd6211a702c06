use itertools::iproduct;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
};

/// Identifies a cell of the surface quadtree.
///
/// Level `0` holds the root tiles. Every tile `(level, x, y)` is split into the four
/// tiles `(level + 1, 2x..=2x + 1, 2y..=2y + 1)`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileAddress {
    pub level: u32,
    pub x: u32,
    pub y: u32,
}

impl TileAddress {
    pub const fn new(level: u32, x: u32, y: u32) -> Self {
        Self { level, x, y }
    }

    pub fn parent(self) -> Option<Self> {
        (self.level > 0).then(|| Self::new(self.level - 1, self.x >> 1, self.y >> 1))
    }

    /// The four children, ordered row by row.
    pub fn children(self) -> [Self; 4] {
        let mut children = [Self::default(); 4];

        for (child, (y, x)) in children.iter_mut().zip(iproduct!(0..2, 0..2)) {
            *child = Self::new(self.level + 1, (self.x << 1) + x, (self.y << 1) + y);
        }

        children
    }

    /// Returns `true` if `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(self, other: Self) -> bool {
        if other.level <= self.level {
            return false;
        }

        // no bits of a coordinate survive a shift past its width
        let shift = other.level - self.level;
        other.x.checked_shr(shift).unwrap_or(0) == self.x && other.y.checked_shr(shift).unwrap_or(0) == self.y
    }

    /// Iterates over all strict ancestors, starting with the parent.
    pub fn ancestors(self) -> impl Iterator<Item = Self> {
        std::iter::successors(self.parent(), |address| address.parent())
    }

    pub fn path(self, root: &Path, extension: &str) -> PathBuf {
        root.join(self.level.to_string())
            .join(self.x.to_string())
            .join(format!("{}.{extension}", self.y))
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.level, self.x, self.y)
    }
}
