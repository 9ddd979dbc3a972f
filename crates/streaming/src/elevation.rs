//! Terrain-RGB elevation lookup.
//!
//! Terrain tiles store elevation as 24-bit fixed point in the RGB channels:
//! `(R·65536 + G·256 + B) / 10 − 10000` meters, i.e. 0.1 m steps from
//! −10000 m. Alpha is ignored.

use foundation::math::{LngLat, lng_lat_to_tile_fraction};
use foundation::{MAX_ZOOM, TileCoord};

use crate::downsample::TileDownsampler;
use crate::resource::{TexelSource, TileResource};
use crate::tile_cache::TileCache;

/// Lowest encodable elevation (meters).
pub const ELEVATION_MIN_M: f64 = -10_000.0;
/// Highest encodable elevation (meters).
pub const ELEVATION_MAX_M: f64 = ELEVATION_MIN_M + 16_777_215.0 / 10.0;

pub fn decode_elevation(r: u8, g: u8, b: u8) -> f64 {
    let raw = u32::from(r) * 65_536 + u32::from(g) * 256 + u32::from(b);
    f64::from(raw) / 10.0 + ELEVATION_MIN_M
}

/// Inverse of [`decode_elevation`], rounded to the nearest 0.1 m and clamped
/// to the encodable range.
pub fn encode_elevation(meters: f64) -> [u8; 3] {
    let raw = ((meters.clamp(ELEVATION_MIN_M, ELEVATION_MAX_M) - ELEVATION_MIN_M) * 10.0).round()
        as u32;
    [(raw >> 16) as u8, (raw >> 8) as u8, raw as u8]
}

/// Samples ground elevation from a terrain [`TileCache`].
///
/// Owns its terrain cache; callers drive it once per frame with
/// [`ElevationSampler::begin_frame`].
pub struct ElevationSampler<R: TileResource> {
    tiles: TileCache<R>,
    downsampler: TileDownsampler,
    default_zoom: u8,
}

impl<R: TileResource + TexelSource> ElevationSampler<R> {
    pub const DEFAULT_ZOOM: u8 = 10;

    pub fn new(tiles: TileCache<R>, downsampler: TileDownsampler) -> Self {
        Self {
            tiles,
            downsampler,
            default_zoom: Self::DEFAULT_ZOOM,
        }
    }

    pub fn with_default_zoom(mut self, z: u8) -> Self {
        self.default_zoom = z;
        self
    }

    pub fn default_zoom(&self) -> u8 {
        self.default_zoom
    }

    pub fn tiles(&self) -> &TileCache<R> {
        &self.tiles
    }

    pub fn tiles_mut(&mut self) -> &mut TileCache<R> {
        &mut self.tiles
    }

    pub fn begin_frame(&mut self) -> usize {
        self.tiles.begin_frame()
    }

    /// Elevation in meters at `p`, sampled at zoom `z` (default 10).
    ///
    /// Falls back to coarser resident terrain; `0.0` while nothing covering
    /// `p` is resident.
    pub fn elevation(&mut self, p: LngLat, z: Option<u8>) -> f64 {
        self.try_elevation(p, z).unwrap_or(0.0)
    }
}

/// Anything that can answer "how high is the ground here", if it knows yet.
pub trait GroundElevation {
    /// Meters above the ellipsoid at `p`, or `None` while unknown.
    fn try_elevation(&mut self, p: LngLat, z: Option<u8>) -> Option<f64>;
}

impl<R: TileResource + TexelSource> GroundElevation for ElevationSampler<R> {
    fn try_elevation(&mut self, p: LngLat, z: Option<u8>) -> Option<f64> {
        let z = z
            .unwrap_or(self.default_zoom)
            .min(self.downsampler.max_z)
            .max(self.downsampler.min_z)
            .min(MAX_ZOOM);
        let n = TileCoord::tiles_per_axis(z);
        let frac = lng_lat_to_tile_fraction(p, z);
        let column = (frac.x.floor().max(0.0) as u64).min(n - 1);
        let row = (frac.y.floor().max(0.0) as u64).min(n - 1);
        let coord = TileCoord::new(column as u32, row as u32, z).ok()?;

        let hit = self.downsampler.get(&mut self.tiles, coord)?;
        let (width, height) = hit.resource.dimensions();
        if width == 0 || height == 0 {
            return None;
        }

        // Position inside the ancestor tile, in [0, 1].
        let cells = TileCoord::tiles_per_axis(hit.downsample) as f64;
        let u = (frac.x / cells - f64::from(hit.coord.x)).clamp(0.0, 1.0);
        let v = (frac.y / cells - f64::from(hit.coord.y)).clamp(0.0, 1.0);
        let tx = ((u * f64::from(width)) as u32).min(width - 1);
        let ty = ((v * f64::from(height)) as u32).min(height - 1);

        let [r, g, b, _] = hit.resource.texel(tx, ty);
        Some(decode_elevation(r, g, b))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use foundation::TileCoord;
    use foundation::math::LngLat;
    use image::{Rgba, RgbaImage};
    use runtime::FrameBudget;

    use super::{
        ELEVATION_MAX_M, ELEVATION_MIN_M, ElevationSampler, GroundElevation, decode_elevation,
        encode_elevation,
    };
    use crate::downsample::TileDownsampler;
    use crate::tile_cache::TileCacheConfig;
    use crate::tile_cache::test_support::{FakeFetcher, cpu_cache, png, settle};

    fn rgba(meters: f64) -> Rgba<u8> {
        let [r, g, b] = encode_elevation(meters);
        Rgba([r, g, b, 255])
    }

    #[test]
    fn decode_matches_reference_values() {
        assert_eq!(decode_elevation(0, 0, 0), -10_000.0);
        // 0 m is raw 100000 = 0x01_86_A0.
        assert_eq!(decode_elevation(0x01, 0x86, 0xA0), 0.0);
        assert_eq!(decode_elevation(255, 255, 255), ELEVATION_MAX_M);
    }

    #[test]
    fn encode_then_decode_stays_within_a_decimeter() {
        let mut e = ELEVATION_MIN_M;
        while e <= 6_553.5 {
            let [r, g, b] = encode_elevation(e);
            let back = decode_elevation(r, g, b);
            assert!((back - e).abs() <= 0.1, "{e} decoded as {back}");
            e += 37.77;
        }
        let [r, g, b] = encode_elevation(8_848.86);
        assert!((decode_elevation(r, g, b) - 8_848.86).abs() <= 0.1);
    }

    #[test]
    fn encode_clamps_out_of_range() {
        assert_eq!(encode_elevation(-20_000.0), [0, 0, 0]);
        assert_eq!(encode_elevation(f64::MAX), [255, 255, 255]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_until_terrain_arrives_then_samples_the_nearest_texel() {
        let fetcher = Arc::new(FakeFetcher::default());
        // Root terrain: west half 100 m, east half 2000 m.
        let img = RgbaImage::from_fn(8, 8, |x, _| if x < 4 { rgba(100.0) } else { rgba(2_000.0) });
        fetcher.serve("mem://0/0/0", Ok(png(&img)));
        let cache = cpu_cache(Arc::clone(&fetcher), TileCacheConfig::default());
        let mut sampler = ElevationSampler::new(cache, TileDownsampler::default());

        let west = LngLat::new(-90.0, 10.0);
        let east = LngLat::new(90.0, -10.0);
        assert_eq!(sampler.elevation(west, None), 0.0);
        assert_eq!(sampler.try_elevation(west, None), None);

        settle().await;
        sampler.tiles_mut().pump(&mut FrameBudget::unlimited());

        assert!((sampler.elevation(west, None) - 100.0).abs() < 1e-9);
        assert!((sampler.elevation(east, Some(4)) - 2_000.0).abs() < 1e-9);
        assert!(sampler.tiles().has(TileCoord::ROOT));
    }

    #[tokio::test(start_paused = true)]
    async fn downsampled_texel_is_remapped_into_the_ancestor() {
        let fetcher = Arc::new(FakeFetcher::default());
        // Parent (0, 0, 1) covers the north-west quadrant. Its south-east
        // quarter is the only place at 500 m.
        let img = RgbaImage::from_fn(4, 4, |x, y| {
            if x >= 2 && y >= 2 { rgba(500.0) } else { rgba(0.0) }
        });
        fetcher.serve("mem://1/0/0", Ok(png(&img)));
        let cache = cpu_cache(Arc::clone(&fetcher), TileCacheConfig::default());
        let mut sampler =
            ElevationSampler::new(cache, TileDownsampler::new(1, 2)).with_default_zoom(2);

        // Just north-west of the origin: tile (1, 1, 2), the SE child of (0, 0, 1).
        let p = LngLat::new(-10.0, 10.0);
        assert_eq!(sampler.elevation(p, None), 0.0);
        settle().await;
        sampler.tiles_mut().pump(&mut FrameBudget::unlimited());

        assert!((sampler.elevation(p, None) - 500.0).abs() < 1e-9);
        assert!(sampler.elevation(LngLat::new(-170.0, 80.0), None).abs() < 1e-9);
    }
}
