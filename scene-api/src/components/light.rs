/// Omnidirectional light at the shape's translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub color: [f32; 3],
    pub intensity: f32,
    /// Distance at which the contribution reaches zero.
    pub range: f32,
    pub cast_shadow: bool,
}

impl Default for PointLight {
    fn default() -> Self {
        Self { color: [1.0; 3], intensity: 10.0, range: 20.0, cast_shadow: true }
    }
}
