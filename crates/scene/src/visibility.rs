use std::collections::BTreeSet;

use foundation::{MAX_ZOOM, TileCoord};
use glam::{DVec2, DVec4};
use serde::{Deserialize, Serialize};

use crate::shape::{TileShape, TileShapes};
use crate::viewport::Viewport;

/// Clip-space half-spaces a point can lie outside of.
///
/// A tile is culled iff all four corners share at least one bit.
mod outcode {
    pub const LEFT: u8 = 1 << 0;
    pub const RIGHT: u8 = 1 << 1;
    pub const BOTTOM: u8 = 1 << 2;
    pub const TOP: u8 = 1 << 3;
    pub const NEAR: u8 = 1 << 4;
    pub const FAR: u8 = 1 << 5;
    pub const BEHIND: u8 = 1 << 6;
}

fn outcode(p: DVec4) -> u8 {
    let mut code = 0;
    if p.x < -p.w {
        code |= outcode::LEFT;
    }
    if p.x > p.w {
        code |= outcode::RIGHT;
    }
    if p.y < -p.w {
        code |= outcode::BOTTOM;
    }
    if p.y > p.w {
        code |= outcode::TOP;
    }
    if p.z < -p.w {
        code |= outcode::NEAR;
    }
    if p.z > p.w {
        code |= outcode::FAR;
    }
    if p.w <= 0.0 {
        code |= outcode::BEHIND;
    }
    code
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadtreeConfig {
    /// Tiles larger than this on screen (pixels) are subdivided.
    pub size_threshold_px: f64,
    /// Deepest zoom level the quadtree descends to, at most `MAX_ZOOM`.
    pub max_z: u8,
}

impl Default for QuadtreeConfig {
    fn default() -> Self {
        Self {
            size_threshold_px: 256.0,
            max_z: 22,
        }
    }
}

/// Screen-space level-of-detail selection over the tile quadtree.
///
/// Ordering contract:
/// - `visible_tiles` returns a `BTreeSet`, so iteration is by `(z, x, y)`.
/// - The set is recomputed from scratch every call; nothing carries over
///   between frames.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct VisibilityQuadtree {
    config: QuadtreeConfig,
}

impl VisibilityQuadtree {
    pub fn new(mut config: QuadtreeConfig) -> Self {
        config.max_z = config.max_z.min(MAX_ZOOM);
        Self { config }
    }

    pub fn config(&self) -> QuadtreeConfig {
        self.config
    }

    /// Tiles that cover the view at roughly `size_threshold_px` each.
    ///
    /// A tile whose shape is not known yet is kept at its level instead of
    /// being dropped; likewise a tile is not split while any child's shape
    /// is unknown.
    pub fn visible_tiles(
        &self,
        viewport: &Viewport,
        shapes: &mut impl TileShapes,
    ) -> BTreeSet<TileCoord> {
        let mut out = BTreeSet::new();
        let Some(root) = shapes.shape(TileCoord::ROOT) else {
            out.insert(TileCoord::ROOT);
            return out;
        };

        let mut stack = vec![(TileCoord::ROOT, root)];
        while let Some((coord, shape)) = stack.pop() {
            let Some(size) = screen_size(viewport, &shape) else {
                continue;
            };
            if size <= self.config.size_threshold_px || coord.z >= self.config.max_z {
                out.insert(coord);
                continue;
            }

            let children = coord.children();
            let mut child_shapes = [None; 4];
            for (slot, child) in child_shapes.iter_mut().zip(children) {
                *slot = shapes.shape(child);
            }
            if child_shapes.iter().any(Option::is_none) {
                out.insert(coord);
                continue;
            }
            for (child, shape) in children.into_iter().zip(child_shapes.into_iter().flatten()) {
                stack.push((child, shape));
            }
        }
        out
    }
}

/// Estimated on-screen size of a tile in pixels (RMS of its edge lengths),
/// or `None` if it is outside the frustum. Infinite if a corner is behind
/// the camera.
fn screen_size(viewport: &Viewport, shape: &TileShape) -> Option<f64> {
    let clip = shape.corners.map(|c| viewport.world_to_clip(c));
    if clip.iter().fold(u8::MAX, |acc, p| acc & outcode(*p)) != 0 {
        return None;
    }
    if clip.iter().any(|p| p.w <= 0.0) {
        return Some(f64::INFINITY);
    }

    let screen: [DVec2; 4] = clip.map(|p| viewport.clip_to_screen(p));
    let sum_sq: f64 = (0..4)
        .map(|i| screen[i].distance_squared(screen[(i + 1) % 4]))
        .sum();
    Some((sum_sq / 4.0).sqrt())
}
