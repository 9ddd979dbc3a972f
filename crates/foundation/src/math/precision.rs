//! Precision policies.
//!
//! World positions are Mercator meters, which at planetary scale lose
//! sub-meter detail in `f32`. Everything the GPU sees is therefore expressed
//! relative to a high-precision origin (the camera) first, in `f64`, and only
//! then narrowed.

use glam::{DVec3, Vec3};

/// Camera-relative precision model.
///
/// Store a high-precision `origin` (the camera eye) and express positions
/// relative to it ("local" space).
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CameraRelative {
    pub origin: DVec3,
}

impl CameraRelative {
    pub fn new(origin: DVec3) -> Self {
        Self { origin }
    }

    #[inline]
    pub fn to_local(self, world: DVec3) -> DVec3 {
        world - self.origin
    }

    #[inline]
    pub fn to_world(self, local: DVec3) -> DVec3 {
        local + self.origin
    }

    /// Convert a world-space point to a camera-relative `f32` offset.
    #[inline]
    pub fn to_f32(self, world: DVec3) -> Vec3 {
        self.to_local(world).as_vec3()
    }
}

#[cfg(test)]
mod tests {
    use glam::{DVec3, Vec3};

    use super::CameraRelative;

    #[test]
    fn camera_relative_preserves_small_offsets() {
        // Mercator-scale magnitudes, small delta.
        let origin = DVec3::new(20_037_000.0, -2_000_000.0, 1_000_000.0);
        let world = DVec3::new(20_037_001.25, -2_000_001.0, 999_999.5);
        let rel = CameraRelative::new(origin).to_f32(world);
        assert_eq!(rel, Vec3::new(1.25, -1.0, -0.5));
    }

    #[test]
    fn local_and_world_are_inverse() {
        let cr = CameraRelative::new(DVec3::new(-1.0e7, 3.3e6, 12_000.0));
        let p = DVec3::new(123.456, -9.0e6, 0.25);
        assert!(cr.to_local(cr.to_world(p)).abs_diff_eq(p, 1e-8));
    }
}
