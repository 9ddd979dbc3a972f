use foundation::math::mercator_to_lng_lat;
use glam::{DVec2, DVec3};
use streaming::GroundElevation;

use crate::viewport::Viewport;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ray {
    pub origin: DVec3,
    pub dir: DVec3,
}

impl Ray {
    pub fn new(origin: DVec3, dir: DVec3) -> Self {
        Self { origin, dir }
    }

    pub fn at(&self, t: f64) -> DVec3 {
        self.origin + self.dir * t
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PickOptions {
    /// Refinement steps of the ray / terrain intersection.
    pub max_iterations: u32,
    /// Stop once successive estimates agree to within this many meters.
    pub tolerance_m: f64,
    /// Zoom at which elevation is sampled; the sampler's default if `None`.
    pub elevation_zoom: Option<u8>,
}

impl Default for PickOptions {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            tolerance_m: 0.5,
            elevation_zoom: None,
        }
    }
}

/// World position of the ground under pixel `px`.
///
/// Intersects the view ray with the horizontal plane at the elevation found
/// under the previous estimate, starting from sea level. Unknown elevation
/// counts as sea level. `None` if the ray does not point down.
pub fn pick_ground(
    viewport: &Viewport,
    px: DVec2,
    ground: &mut impl GroundElevation,
    opts: PickOptions,
) -> Option<DVec3> {
    let ray = viewport.screen_ray(px);
    if !(ray.dir.z < 0.0) {
        return None;
    }

    let mut elevation = 0.0;
    let mut t = (elevation - ray.origin.z) / ray.dir.z;
    for _ in 0..opts.max_iterations {
        let hit = ray.at(t);
        elevation = ground
            .try_elevation(mercator_to_lng_lat(hit.truncate()), opts.elevation_zoom)
            .unwrap_or(0.0);
        let next = (elevation - ray.origin.z) / ray.dir.z;
        let converged = ((next - t) * ray.dir).length() <= opts.tolerance_m;
        t = next;
        if converged {
            break;
        }
    }

    (t >= 0.0).then(|| ray.at(t))
}

#[cfg(test)]
mod tests {
    use foundation::math::LngLat;
    use glam::{DVec2, DVec3};
    use streaming::GroundElevation;

    use super::{PickOptions, pick_ground};
    use crate::viewport::{View, Viewport};

    struct Flat(Option<f64>);

    impl GroundElevation for Flat {
        fn try_elevation(&mut self, _p: LngLat, _z: Option<u8>) -> Option<f64> {
            self.0
        }
    }

    /// Ground rising 1 m per 10 m northwards.
    struct Slope;

    impl GroundElevation for Slope {
        fn try_elevation(&mut self, p: LngLat, _z: Option<u8>) -> Option<f64> {
            let y = foundation::math::lng_lat_to_mercator(p).y;
            Some(y * 0.1)
        }
    }

    #[test]
    fn top_down_pick_hits_the_plateau() {
        let vp = Viewport::new(&View::default()).unwrap();
        let centre = DVec2::new(400.0, 300.0);

        let hit = pick_ground(&vp, centre, &mut Flat(None), PickOptions::default()).unwrap();
        assert!(hit.abs_diff_eq(DVec3::ZERO, 1e-6), "{hit}");

        let hit = pick_ground(&vp, centre, &mut Flat(Some(500.0)), PickOptions::default()).unwrap();
        assert!(hit.abs_diff_eq(DVec3::new(0.0, 0.0, 500.0), 1e-6), "{hit}");
    }

    #[test]
    fn pitched_pick_at_the_anchor_finds_the_target() {
        let view = View {
            target: LngLat::new(2.35, 48.85),
            orientation: [45.0, 30.0, 0.0],
            ..View::default()
        };
        let vp = Viewport::new(&view).unwrap();
        let hit = pick_ground(&vp, view.anchor_px(), &mut Flat(Some(0.0)), PickOptions::default())
            .unwrap();
        assert!(hit.abs_diff_eq(view.target_world(), 1e-3), "{hit}");
    }

    #[test]
    fn iterates_onto_sloped_terrain() {
        let view = View {
            orientation: [30.0, 0.0, 0.0],
            ..View::default()
        };
        let vp = Viewport::new(&view).unwrap();
        let opts = PickOptions {
            max_iterations: 50,
            tolerance_m: 1e-6,
            ..PickOptions::default()
        };
        let hit = pick_ground(&vp, DVec2::new(400.0, 200.0), &mut Slope, opts).unwrap();
        assert!((hit.z - hit.y * 0.1).abs() < 1e-3, "{hit}");
    }

    #[test]
    fn sky_pixels_miss() {
        let view = View {
            orientation: [85.0, 0.0, 0.0],
            ..View::default()
        };
        let vp = Viewport::new(&view).unwrap();
        assert!(pick_ground(&vp, DVec2::new(400.0, 0.0), &mut Flat(None), PickOptions::default()).is_none());
    }
}
