use glam::{Mat4, Quat, Vec3};

/// Translation, axis-angle rotation and scale. The derived matrix and its inverse are
/// recomputed by every setter.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformWrap {
    translation: Vec3,
    rotation_axis: Vec3,
    rotation_angle: f32,
    scale: Vec3,
    matrix: Mat4,
    inverse: Mat4,
}

impl Default for TransformWrap {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation_axis: Vec3::Y,
            rotation_angle: 0.0,
            scale: Vec3::ONE,
            matrix: Mat4::IDENTITY,
            inverse: Mat4::IDENTITY,
        }
    }
}

impl TransformWrap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_translation(translation: Vec3) -> Self {
        let mut t = Self::default();
        t.set_translation(translation);
        t
    }

    /// Transform of an observer at `eye` looking at `target`.
    pub fn looking_at(eye: Vec3, target: Vec3, up: Vec3) -> Self {
        let mut t = Self::default();
        t.set_look_at(eye, target, up);
        t
    }

    pub fn translation(&self) -> Vec3 {
        self.translation
    }

    /// Rotation as (unit axis, angle in radians).
    pub fn rotation(&self) -> (Vec3, f32) {
        (self.rotation_axis, self.rotation_angle)
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn matrix(&self) -> Mat4 {
        self.matrix
    }

    pub fn inverse(&self) -> Mat4 {
        self.inverse
    }

    pub fn set_translation(&mut self, translation: Vec3) {
        self.translation = translation;
        self.recompute();
    }

    /// A zero axis is stored as the Y axis.
    pub fn set_rotation(&mut self, axis: Vec3, angle: f32) {
        self.rotation_axis = axis.try_normalize().unwrap_or(Vec3::Y);
        self.rotation_angle = angle;
        self.recompute();
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.recompute();
    }

    pub fn set_look_at(&mut self, eye: Vec3, target: Vec3, up: Vec3) {
        let world = Mat4::look_at_rh(eye, target, up).inverse();
        let (_, rotation, _) = world.to_scale_rotation_translation();
        let (axis, angle) = rotation.to_axis_angle();
        self.translation = eye;
        self.rotation_axis = axis.try_normalize().unwrap_or(Vec3::Y);
        self.rotation_angle = angle;
        self.recompute();
    }

    fn recompute(&mut self) {
        let rotation = Quat::from_axis_angle(self.rotation_axis, self.rotation_angle);
        self.matrix = Mat4::from_scale_rotation_translation(self.scale, rotation, self.translation);
        self.inverse = self.matrix.inverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_keep_matrix_and_inverse_current() {
        let mut t = TransformWrap::new();
        t.set_translation(Vec3::new(1.0, 2.0, 3.0));
        t.set_rotation(Vec3::Z, std::f32::consts::FRAC_PI_2);
        t.set_scale(Vec3::splat(2.0));

        let p = t.matrix().transform_point3(Vec3::X);
        assert!(p.abs_diff_eq(Vec3::new(1.0, 4.0, 3.0), 1e-5));
        assert!((t.matrix() * t.inverse()).abs_diff_eq(Mat4::IDENTITY, 1e-5));
    }

    #[test]
    fn look_at_points_negative_z_at_target() {
        let t = TransformWrap::looking_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let forward = t.matrix().transform_vector3(-Vec3::Z);
        assert!(forward.abs_diff_eq(-Vec3::Z, 1e-5));
        assert!(t.inverse().transform_point3(Vec3::ZERO).abs_diff_eq(Vec3::new(0.0, 0.0, -5.0), 1e-5));
    }

    #[test]
    fn zero_axis_falls_back_to_y() {
        let mut t = TransformWrap::new();
        t.set_rotation(Vec3::ZERO, 1.0);
        assert_eq!(t.rotation().0, Vec3::Y);
    }
}
