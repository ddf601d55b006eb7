//! Camera building blocks. A camera is a shape with a `TransformWrap` and a `Projection`,
//! optionally animated by a `MotionControl`.

use crate::ShapeId;
use glam::{Mat4, Vec3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective { fov_y: f32, near: f32, far: f32 },
    Orthographic { height: f32, near: f32, far: f32 },
}

impl Projection {
    pub fn perspective(fov_y: f32, near: f32, far: f32) -> Self {
        Projection::Perspective { fov_y, near, far }
    }

    /// Right-handed, depth 0..1.
    pub fn matrix(&self, aspect: f32) -> Mat4 {
        let aspect = if aspect.is_finite() && aspect > 0.0 { aspect } else { 1.0 };
        match *self {
            Projection::Perspective { fov_y, near, far } => {
                Mat4::perspective_rh(fov_y, aspect, near, far)
            }
            Projection::Orthographic { height, near, far } => {
                let h = height * 0.5;
                let w = h * aspect;
                Mat4::orthographic_rh(-w, w, -h, h, near, far)
            }
        }
    }

    pub fn near(&self) -> f32 {
        match *self {
            Projection::Perspective { near, .. } | Projection::Orthographic { near, .. } => near,
        }
    }

    pub fn far(&self) -> f32 {
        match *self {
            Projection::Perspective { far, .. } | Projection::Orthographic { far, .. } => far,
        }
    }
}

/// Orbit around `target` in the XZ plane at `radius`, `height` above the target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionControl {
    pub target: Vec3,
    pub radius: f32,
    pub height: f32,
    /// Radians per second.
    pub speed: f32,
    pub angle: f32,
}

impl MotionControl {
    pub fn orbit(target: Vec3, radius: f32, height: f32, speed: f32) -> Self {
        Self { target, radius, height, speed, angle: 0.0 }
    }

    /// Advance by `delta_time` seconds; returns the new eye position.
    pub fn advance(&mut self, delta_time: f32) -> Vec3 {
        self.angle = (self.angle + self.speed * delta_time).rem_euclid(std::f32::consts::TAU);
        self.eye()
    }

    pub fn eye(&self) -> Vec3 {
        self.target
            + Vec3::new(self.radius * self.angle.cos(), self.height, self.radius * self.angle.sin())
    }
}

/// Cameras known to the scene and the one currently rendered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraGroup {
    cameras: Vec<ShapeId>,
    current: Option<ShapeId>,
}

impl CameraGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a camera; the first one added becomes current.
    pub fn add(&mut self, camera: ShapeId) {
        if !self.cameras.contains(&camera) {
            self.cameras.push(camera);
        }
        if self.current.is_none() {
            self.current = Some(camera);
        }
    }

    pub fn remove(&mut self, camera: ShapeId) {
        self.cameras.retain(|c| *c != camera);
        if self.current == Some(camera) {
            self.current = self.cameras.first().copied();
        }
    }

    /// Select a camera of this group; returns false for unknown ids.
    pub fn select(&mut self, camera: ShapeId) -> bool {
        if self.cameras.contains(&camera) {
            self.current = Some(camera);
            true
        } else {
            false
        }
    }

    pub fn current(&self) -> Option<ShapeId> {
        self.current
    }

    pub fn cameras(&self) -> &[ShapeId] {
        &self.cameras
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_tracks_current_selection() {
        let a = ShapeId::next();
        let b = ShapeId::next();
        let mut group = CameraGroup::new();
        group.add(a);
        group.add(b);
        assert_eq!(group.current(), Some(a));
        assert!(group.select(b));
        assert!(!group.select(ShapeId::next()));
        group.remove(b);
        assert_eq!(group.current(), Some(a));
    }

    #[test]
    fn orbit_wraps_angle() {
        let mut motion = MotionControl::orbit(Vec3::ZERO, 2.0, 1.0, std::f32::consts::PI);
        let eye = motion.advance(0.5);
        assert!(eye.abs_diff_eq(Vec3::new(0.0, 1.0, 2.0), 1e-5));
        motion.advance(4.0);
        assert!(motion.angle < std::f32::consts::TAU);
    }
}
