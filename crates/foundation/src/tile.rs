use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Deepest zoom level a `TileCoord` may address.
///
/// Bounded so that `TileKey` (level offset + position) always fits in a `u64`.
pub const MAX_ZOOM: u8 = 30;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum TileCoordError {
    #[error("zoom level {z} exceeds the maximum of {MAX_ZOOM}")]
    ZoomTooDeep { z: u8 },
    #[error("tile ({x}, {y}) is outside the {size}x{size} grid at zoom {z}")]
    OutOfRange { x: u32, y: u32, z: u8, size: u64 },
}

/// Quadtree tile address in the XYZ scheme (`y` grows southwards).
///
/// Invariant: `0 <= x, y < 2^z`. `(0, 0, 0)` covers the whole world.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub const ROOT: TileCoord = TileCoord { z: 0, x: 0, y: 0 };

    /// Validating constructor for coordinates coming from outside the engine.
    pub fn new(x: u32, y: u32, z: u8) -> Result<Self, TileCoordError> {
        if z > MAX_ZOOM {
            return Err(TileCoordError::ZoomTooDeep { z });
        }
        let size = Self::tiles_per_axis(z);
        if u64::from(x) >= size || u64::from(y) >= size {
            return Err(TileCoordError::OutOfRange { x, y, z, size });
        }
        Ok(Self { z, x, y })
    }

    /// Number of tiles along one axis at zoom `z` (`2^z`).
    pub fn tiles_per_axis(z: u8) -> u64 {
        1u64 << z
    }

    pub fn key(self) -> TileKey {
        TileKey::from_coord(self)
    }

    pub fn parent(self) -> Option<TileCoord> {
        self.ancestor(1)
    }

    /// Ancestor `levels` zoom levels up, or `None` above the root.
    pub fn ancestor(self, levels: u8) -> Option<TileCoord> {
        if levels > self.z {
            return None;
        }
        Some(TileCoord {
            z: self.z - levels,
            x: self.x >> levels,
            y: self.y >> levels,
        })
    }

    /// The four children in NW, NE, SW, SE order.
    pub fn children(self) -> [TileCoord; 4] {
        debug_assert!(self.z < MAX_ZOOM, "children of a tile at MAX_ZOOM");
        let z = self.z + 1;
        let (x, y) = (self.x * 2, self.y * 2);
        [
            TileCoord { z, x, y },
            TileCoord { z, x: x + 1, y },
            TileCoord { z, x, y: y + 1 },
            TileCoord { z, x: x + 1, y: y + 1 },
        ]
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Single ordered integer identifying a `TileCoord`.
///
/// Level-major: every key of level `z` sorts after every key of level `z - 1`,
/// and inside a level keys follow row-major order (`y * 2^z + x`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileKey(pub u64);

impl TileKey {
    pub fn from_coord(coord: TileCoord) -> Self {
        let within_level = (u64::from(coord.y) << coord.z) + u64::from(coord.x);
        TileKey(level_offset(coord.z) + within_level)
    }

    pub fn to_coord(self) -> TileCoord {
        let mut z = 0u8;
        while z < MAX_ZOOM && level_offset(z + 1) <= self.0 {
            z += 1;
        }
        let within_level = self.0 - level_offset(z);
        TileCoord {
            z,
            x: (within_level & (TileCoord::tiles_per_axis(z) - 1)) as u32,
            y: (within_level >> z) as u32,
        }
    }
}

impl From<TileCoord> for TileKey {
    fn from(coord: TileCoord) -> Self {
        TileKey::from_coord(coord)
    }
}

/// Number of tiles in all levels above `z`: `(4^z - 1) / 3`.
fn level_offset(z: u8) -> u64 {
    ((1u64 << (2 * u32::from(z))) - 1) / 3
}
