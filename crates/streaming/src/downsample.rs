use foundation::{MAX_ZOOM, TileCoord};
use serde::{Deserialize, Serialize};

use crate::resource::TileResource;
use crate::tile_cache::TileCache;

/// Best-available-resolution lookup over a [`TileCache`].
///
/// A tile at `z` is served by the closest resident ancestor between `z` and
/// `min_z`. Requests deeper than `max_z` are first lifted to `max_z`; those
/// levels still count towards the reported downsample.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileDownsampler {
    pub min_z: u8,
    pub max_z: u8,
}

impl Default for TileDownsampler {
    fn default() -> Self {
        Self {
            min_z: 0,
            max_z: MAX_ZOOM,
        }
    }
}

/// A resident tile standing in for `requested`.
#[derive(Debug)]
pub struct Downsampled<'a, R> {
    pub resource: &'a R,
    /// The ancestor that was actually resident.
    pub coord: TileCoord,
    pub requested: TileCoord,
    /// Levels between `requested` and `coord`; 0 means native resolution.
    pub downsample: u8,
}

impl<R> Downsampled<'_, R> {
    /// Offset and scale mapping `requested`'s unit UV square into `coord`'s.
    pub fn uv_offset_scale(&self) -> ([f64; 2], f64) {
        let cells = TileCoord::tiles_per_axis(self.downsample);
        let scale = 1.0 / cells as f64;
        let offset = [
            (u64::from(self.requested.x) % cells) as f64 * scale,
            (u64::from(self.requested.y) % cells) as f64 * scale,
        ];
        (offset, scale)
    }
}

impl TileDownsampler {
    pub fn new(min_z: u8, max_z: u8) -> Self {
        debug_assert!(min_z <= max_z);
        Self { min_z, max_z }
    }

    /// Finest resident tile covering `coord`, or `None` if no level between
    /// `coord.z` and `min_z` is loaded yet.
    ///
    /// Every level that misses is requested, so coarser levels start loading
    /// alongside the native one.
    pub fn get<'c, R: TileResource>(
        &self,
        cache: &'c mut TileCache<R>,
        coord: TileCoord,
    ) -> Option<Downsampled<'c, R>> {
        if coord.z < self.min_z {
            return None;
        }
        let lifted = coord.z.saturating_sub(self.max_z);

        let mut hit = None;
        for downsample in lifted..=coord.z - self.min_z {
            let Some(ancestor) = coord.ancestor(downsample) else {
                break;
            };
            if cache.request(ancestor) {
                hit = Some((ancestor, downsample));
                break;
            }
        }

        let (ancestor, downsample) = hit?;
        let resource = cache.peek(ancestor)?;
        Some(Downsampled {
            resource,
            coord: ancestor,
            requested: coord,
            downsample,
        })
    }
}
