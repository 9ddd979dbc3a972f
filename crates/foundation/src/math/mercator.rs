use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};

use crate::tile::TileCoord;

/// WGS84 semi-major axis (meters); the sphere radius of Web Mercator.
pub const WGS84_A: f64 = 6_378_137.0;

/// Half the width of the Mercator plane (meters).
pub const MERCATOR_HALF_EXTENT: f64 = PI * WGS84_A;

/// Latitude at which the square Mercator world ends.
pub const MERCATOR_MAX_LAT_DEG: f64 = 85.051_128_779_806_59;

/// Geographic position in degrees.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }
}

/// Project to Web Mercator meters (x east, y north).
///
/// Latitude is clamped to the Mercator square; longitude is not wrapped.
pub fn lng_lat_to_mercator(p: LngLat) -> DVec2 {
    let lat = p
        .lat
        .clamp(-MERCATOR_MAX_LAT_DEG, MERCATOR_MAX_LAT_DEG)
        .to_radians();
    DVec2::new(
        WGS84_A * p.lng.to_radians(),
        WGS84_A * (FRAC_PI_4 + 0.5 * lat).tan().ln(),
    )
}

pub fn mercator_to_lng_lat(m: DVec2) -> LngLat {
    let lng = (m.x / WGS84_A).to_degrees();
    let lat = (2.0 * (m.y / WGS84_A).exp().atan() - FRAC_PI_2).to_degrees();
    LngLat::new(lng, lat)
}

/// World position of a geographic point at `altitude_m` meters.
pub fn lng_lat_alt_to_world(p: LngLat, altitude_m: f64) -> DVec3 {
    lng_lat_to_mercator(p).extend(altitude_m)
}

/// Fractional tile coordinates of `p` at zoom `z`.
///
/// The integer part is the tile column/row, the fractional part the position
/// inside that tile (0 at the west/north edge).
pub fn lng_lat_to_tile_fraction(p: LngLat, z: u8) -> DVec2 {
    let m = lng_lat_to_mercator(p);
    let n = TileCoord::tiles_per_axis(z) as f64;
    let u = (m.x + MERCATOR_HALF_EXTENT) / (2.0 * MERCATOR_HALF_EXTENT);
    let v = (MERCATOR_HALF_EXTENT - m.y) / (2.0 * MERCATOR_HALF_EXTENT);
    DVec2::new(u * n, v * n)
}

/// Mercator extent of a tile as `(north_west, south_east)`.
pub fn tile_mercator_bounds(coord: TileCoord) -> (DVec2, DVec2) {
    let size = 2.0 * MERCATOR_HALF_EXTENT / TileCoord::tiles_per_axis(coord.z) as f64;
    let west = -MERCATOR_HALF_EXTENT + coord.x as f64 * size;
    let north = MERCATOR_HALF_EXTENT - coord.y as f64 * size;
    (DVec2::new(west, north), DVec2::new(west + size, north - size))
}

/// Corners of a tile in NW, NE, SE, SW order.
pub fn tile_corners_mercator(coord: TileCoord) -> [DVec2; 4] {
    let (nw, se) = tile_mercator_bounds(coord);
    [
        nw,
        DVec2::new(se.x, nw.y),
        se,
        DVec2::new(nw.x, se.y),
    ]
}
