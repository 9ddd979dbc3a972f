//! Elevation-adjusted tile corners.

use std::collections::BTreeMap;
use std::time::Duration;

use foundation::math::{mercator_to_lng_lat, tile_corners_mercator};
use foundation::{TileCoord, TileKey};
use glam::DVec3;
use runtime::FrameBudget;
use serde::{Deserialize, Serialize};
use streaming::{CacheConfig, GroundElevation, TileIndexCache};
use tokio::time::Instant;
use tracing::debug;

/// World-space corners of a tile in NW, NE, SE, SW order.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TileShape {
    pub corners: [DVec3; 4],
}

impl TileShape {
    /// The tile on the sea-level plane.
    pub fn flat(coord: TileCoord) -> Self {
        Self {
            corners: tile_corners_mercator(coord).map(|c| c.extend(0.0)),
        }
    }
}

/// Source of tile shapes for the visibility quadtree.
///
/// `None` means "not known yet"; the caller treats the tile provisionally.
pub trait TileShapes {
    fn shape(&mut self, coord: TileCoord) -> Option<TileShape>;
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapeConfig {
    /// Memo of resolved shapes; unused shapes age out after the TTL.
    pub memo: CacheConfig,
    /// A shape in use is resampled this long after it was computed, so finer
    /// terrain that arrived in the meantime replaces it.
    pub refresh_ms: u64,
    /// Resolution attempts before a tile settles for flat corners.
    pub max_shape_attempts: u32,
    /// Pending shapes resolved per frame.
    pub max_resolves_per_frame: u32,
}

impl Default for ShapeConfig {
    fn default() -> Self {
        Self {
            memo: CacheConfig::with_ttl(4096, 10_000),
            refresh_ms: 1_000,
            max_shape_attempts: 30,
            max_resolves_per_frame: 256,
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct PendingShape {
    coord: TileCoord,
    attempts: u32,
    /// A memoised shape exists and keeps being served meanwhile.
    refresh: bool,
}

#[derive(Debug, Copy, Clone)]
struct ResolvedShape {
    shape: TileShape,
    sampled: Instant,
}

/// Memoising [`TileShapes`] backed by ground elevation.
///
/// `shape` never computes: a miss registers the tile in the pending map (once,
/// however often it is asked for) and returns `None`. `resolve_pending`, run
/// once per frame, samples elevation for pending tiles and moves the ones
/// whose terrain is resident into the memo.
///
/// A memoised shape older than `refresh_ms` is still returned, but is queued
/// again so it picks up terrain that became resident after it was sampled.
pub struct TileShapeProvider<G> {
    ground: G,
    config: ShapeConfig,
    memo: TileIndexCache<ResolvedShape>,
    pending: BTreeMap<TileKey, PendingShape>,
}

impl<G: GroundElevation> TileShapeProvider<G> {
    pub fn new(ground: G, config: ShapeConfig) -> Self {
        Self {
            ground,
            config,
            memo: TileIndexCache::new(config.memo),
            pending: BTreeMap::new(),
        }
    }

    pub fn ground(&self) -> &G {
        &self.ground
    }

    pub fn ground_mut(&mut self) -> &mut G {
        &mut self.ground
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }

    /// Drop shapes that were not used within the memo TTL.
    pub fn purge_stale(&mut self) -> usize {
        self.memo.purge_stale()
    }

    /// Try to compute pending shapes, one budget unit each. Returns how many
    /// were resolved.
    pub fn resolve_pending(&mut self, budget: &mut FrameBudget) -> usize {
        let mut resolved = 0;
        let keys: Vec<TileKey> = self.pending.keys().copied().collect();
        for key in keys {
            if !budget.try_consume(1) {
                break;
            }
            let Some(mut pending) = self.pending.remove(&key) else {
                continue;
            };
            pending.attempts += 1;

            let shape = match self.sample(pending.coord) {
                Some(shape) => shape,
                None if pending.refresh => {
                    // Keep the previous shape until the next refresh window.
                    if let Some(resolved) = self.memo.peek_mut(key) {
                        resolved.sampled = Instant::now();
                    }
                    continue;
                }
                None if pending.attempts >= self.config.max_shape_attempts => {
                    debug!(
                        tile = %pending.coord,
                        attempts = pending.attempts,
                        "no terrain for tile, using flat shape"
                    );
                    TileShape::flat(pending.coord)
                }
                None => {
                    self.pending.insert(key, pending);
                    continue;
                }
            };
            self.memo.set(
                key,
                ResolvedShape {
                    shape,
                    sampled: Instant::now(),
                },
            );
            resolved += 1;
        }
        resolved
    }

    fn sample(&mut self, coord: TileCoord) -> Option<TileShape> {
        let corners = tile_corners_mercator(coord);
        let mut out = [DVec3::ZERO; 4];
        for (slot, corner) in out.iter_mut().zip(corners) {
            let elevation = self
                .ground
                .try_elevation(mercator_to_lng_lat(corner), Some(coord.z))?;
            *slot = corner.extend(elevation);
        }
        Some(TileShape { corners: out })
    }
}

impl<G: GroundElevation> TileShapes for TileShapeProvider<G> {
    fn shape(&mut self, coord: TileCoord) -> Option<TileShape> {
        let key = coord.key();
        let refresh_after = Duration::from_millis(self.config.refresh_ms);
        let memoised = self.memo.get(key).copied();
        if let Some(resolved) = memoised {
            if resolved.sampled.elapsed() >= refresh_after {
                self.pending.entry(key).or_insert(PendingShape {
                    coord,
                    attempts: 0,
                    refresh: true,
                });
            }
            return Some(resolved.shape);
        }
        self.pending.entry(key).or_insert(PendingShape {
            coord,
            attempts: 0,
            refresh: false,
        });
        None
    }
}
