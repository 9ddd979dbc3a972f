//! Camera model.
//!
//! World space is Web Mercator meters: `x` east, `y` north, `z` up (altitude).
//! "Local" space is world space translated so the camera sits at the origin;
//! all matrices are rotation + projection only and operate on local
//! coordinates, so nothing at planetary magnitude ever reaches `f32`.
//!
//! Screen space is pixels with the origin at the top-left corner. Clip space
//! follows the OpenGL convention (`-w <= x, y, z <= w`).

use foundation::math::{CameraRelative, LngLat, MERCATOR_HALF_EXTENT, lng_lat_alt_to_world};
use glam::{DMat4, DVec2, DVec3, DVec4, Mat4};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::picking::Ray;

/// Near plane as a fraction of the camera distance.
const NEAR_FRACTION: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ViewportError {
    #[error("screen size {width}x{height} has no area")]
    EmptyScreen { width: f64, height: f64 },
    #[error("camera distance {0} must be positive and finite")]
    InvalidDistance(f64),
    #[error("anchor ray misses the sphere of radius {distance} m around the target")]
    AnchorMissesTarget { distance: f64 },
}

/// What the user is looking at, and from where.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct View {
    pub target: LngLat,
    /// Altitude of the target point (meters).
    pub target_altitude_m: f64,
    /// `[width, height]` in pixels.
    pub screen: [f64; 2],
    /// Camera-to-target distance (meters).
    pub distance: f64,
    /// `[pitch, yaw, roll]` in degrees. Pitch 0 looks straight down; positive
    /// pitch tilts towards the horizon. Yaw is the compass bearing.
    pub orientation: [f64; 3],
    /// Screen point the target appears under; the screen centre if unset.
    pub anchor: Option<[f64; 2]>,
    pub fov_y_deg: f64,
}

impl Default for View {
    fn default() -> Self {
        Self {
            target: LngLat::default(),
            target_altitude_m: 0.0,
            screen: [800.0, 600.0],
            distance: 10_000.0,
            orientation: [0.0, 0.0, 0.0],
            anchor: None,
            fov_y_deg: 45.0,
        }
    }
}

impl View {
    pub fn target_world(&self) -> DVec3 {
        lng_lat_alt_to_world(self.target, self.target_altitude_m)
    }

    pub fn anchor_px(&self) -> DVec2 {
        match self.anchor {
            Some(anchor) => DVec2::from(anchor),
            None => DVec2::new(self.screen[0] * 0.5, self.screen[1] * 0.5),
        }
    }

    /// Raise `distance` to at least `min_m` (also replaces NaN).
    pub fn clamp_distance(&mut self, min_m: f64) {
        if !(self.distance >= min_m) {
            self.distance = min_m;
        }
    }
}

/// A realised [`View`]: matrices, camera position and space conversions.
#[derive(Debug, Clone)]
pub struct Viewport {
    view: View,
    screen: DVec2,
    projection: DMat4,
    model_view: DMat4,
    view_projection: DMat4,
    inverse_view_projection: DMat4,
    camera: DVec3,
    relative: CameraRelative,
}

impl Viewport {
    pub fn new(view: &View) -> Result<Self, ViewportError> {
        let [width, height] = view.screen;
        if !(width > 0.0 && height > 0.0) {
            return Err(ViewportError::EmptyScreen { width, height });
        }
        if !(view.distance.is_finite() && view.distance > 0.0) {
            return Err(ViewportError::InvalidDistance(view.distance));
        }

        let [pitch, yaw, roll] = view.orientation;
        let model_view = DMat4::from_rotation_z(-roll.to_radians())
            * DMat4::from_rotation_x(-pitch.to_radians())
            * DMat4::from_rotation_z(yaw.to_radians());

        let near = view.distance * NEAR_FRACTION;
        // Deep enough to reach the horizon from any sane altitude.
        let far = view.distance + 4.0 * MERCATOR_HALF_EXTENT;
        let projection =
            DMat4::perspective_rh_gl(view.fov_y_deg.to_radians(), width / height, near, far);
        let view_projection = projection * model_view;

        let mut viewport = Self {
            view: view.clone(),
            screen: DVec2::new(width, height),
            projection,
            model_view,
            view_projection,
            inverse_view_projection: view_projection.inverse(),
            camera: DVec3::ZERO,
            relative: CameraRelative::new(DVec3::ZERO),
        };

        let hit = viewport.anchor_hit()?;
        viewport.camera = view.target_world() - hit;
        viewport.relative = CameraRelative::new(viewport.camera);
        Ok(viewport)
    }

    /// Local-space point where the anchor ray meets the sphere of radius
    /// `distance` around the camera.
    fn anchor_hit(&self) -> Result<DVec3, ViewportError> {
        let distance = self.view.distance;
        let miss = ViewportError::AnchorMissesTarget { distance };

        let anchor = self.view.anchor_px();
        let near = self.clip_to_local(self.screen_to_clip(anchor, -1.0));
        let far = self.clip_to_local(self.screen_to_clip(anchor, 1.0));
        let dir = (far - near).normalize_or_zero();
        if dir == DVec3::ZERO {
            return Err(miss);
        }

        // |near + t·dir|² = distance², with |dir| = 1.
        let b = 2.0 * near.dot(dir);
        let c = near.length_squared() - distance * distance;
        let discriminant = b * b - 4.0 * c;
        if !(discriminant >= 0.0) {
            return Err(miss);
        }
        let root = discriminant.sqrt();
        let t = [(-b - root) * 0.5, (-b + root) * 0.5]
            .into_iter()
            .find(|t| *t >= 0.0)
            .ok_or(miss)?;
        Ok(near + dir * t)
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn screen(&self) -> DVec2 {
        self.screen
    }

    /// Camera position in world space.
    pub fn camera(&self) -> DVec3 {
        self.camera
    }

    pub fn projection(&self) -> DMat4 {
        self.projection
    }

    pub fn model_view(&self) -> DMat4 {
        self.model_view
    }

    pub fn view_projection(&self) -> DMat4 {
        self.view_projection
    }

    pub fn projection_f32(&self) -> Mat4 {
        self.projection.as_mat4()
    }

    pub fn model_view_f32(&self) -> Mat4 {
        self.model_view.as_mat4()
    }

    /// Pixel position plus NDC depth to a clip-space point (`w = 1`).
    pub fn screen_to_clip(&self, px: DVec2, ndc_z: f64) -> DVec4 {
        DVec4::new(
            2.0 * px.x / self.screen.x - 1.0,
            1.0 - 2.0 * px.y / self.screen.y,
            ndc_z,
            1.0,
        )
    }

    pub fn clip_to_screen(&self, clip: DVec4) -> DVec2 {
        let ndc = DVec2::new(clip.x / clip.w, clip.y / clip.w);
        DVec2::new(
            (ndc.x + 1.0) * 0.5 * self.screen.x,
            (1.0 - ndc.y) * 0.5 * self.screen.y,
        )
    }

    pub fn clip_to_local(&self, clip: DVec4) -> DVec3 {
        let p = self.inverse_view_projection * clip;
        p.truncate() / p.w
    }

    pub fn local_to_clip(&self, local: DVec3) -> DVec4 {
        self.view_projection * local.extend(1.0)
    }

    pub fn local_to_world(&self, local: DVec3) -> DVec3 {
        self.relative.to_world(local)
    }

    pub fn world_to_local(&self, world: DVec3) -> DVec3 {
        self.relative.to_local(world)
    }

    pub fn world_to_clip(&self, world: DVec3) -> DVec4 {
        self.local_to_clip(self.world_to_local(world))
    }

    /// Screen position of `world`, or `None` if it is behind the camera.
    pub fn world_to_screen(&self, world: DVec3) -> Option<DVec2> {
        let clip = self.world_to_clip(world);
        (clip.w > 0.0).then(|| self.clip_to_screen(clip))
    }

    /// World-space ray from the camera through pixel `px`.
    pub fn screen_ray(&self, px: DVec2) -> Ray {
        let near = self.clip_to_local(self.screen_to_clip(px, -1.0));
        let far = self.clip_to_local(self.screen_to_clip(px, 1.0));
        Ray::new(self.camera, (far - near).normalize_or_zero())
    }
}
