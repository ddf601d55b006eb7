//! One linear pass over the scene that gathers world transforms and per-draw payloads.

use glam::Mat4;
use scene_api::{Scene, Shape, TransformWrap};

/// Parallel arrays built by [`collect`]: `transforms[i]` belongs to `payloads[i]`.
#[derive(Debug, Clone)]
pub struct DrawAccumulator<P> {
    pub transforms: Vec<Mat4>,
    pub payloads: Vec<P>,
}

impl<P> Default for DrawAccumulator<P> {
    fn default() -> Self {
        Self { transforms: Vec::new(), payloads: Vec::new() }
    }
}

impl<P> DrawAccumulator<P> {
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn push(&mut self, transform: Mat4, payload: P) {
        self.transforms.push(transform);
        self.payloads.push(payload);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Mat4, &P)> {
        self.transforms.iter().zip(self.payloads.iter())
    }
}

/// World matrix of a shape; identity when it has no transform.
pub fn world_transform(shape: &Shape) -> Mat4 {
    shape.get::<TransformWrap>().map(TransformWrap::matrix).unwrap_or(Mat4::IDENTITY)
}

/// Visit shapes in scene order; every shape for which `extract` yields a payload contributes
/// one entry. Visibility filtering is up to `extract` (usually via `Shape::get_visible`).
pub fn collect<'s, P>(scene: &'s Scene, mut extract: impl FnMut(&'s Shape) -> Option<P>) -> DrawAccumulator<P> {
    let mut out = DrawAccumulator::default();
    for shape in scene.shapes() {
        if let Some(payload) = extract(shape) {
            out.push(world_transform(shape), payload);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use scene_api::{CoordinateSystem, PointLight};

    #[test]
    fn walk_keeps_order_skips_invisible_and_defaults_to_identity() {
        let mut scene = Scene::new();
        scene.add(
            Shape::new("a")
                .with(TransformWrap::from_translation(Vec3::X))
                .with(CoordinateSystem::new(1.0)),
        );
        let mut hidden = CoordinateSystem::new(2.0);
        hidden.visible = false;
        scene.add(Shape::new("hidden").with(hidden));
        scene.add(Shape::new("light").with(PointLight::default()));
        scene.add(Shape::new("b").with(CoordinateSystem::new(3.0)));

        let walk = collect(&scene, |shape| shape.get_visible::<CoordinateSystem>().map(|c| c.length()));
        assert_eq!(walk.payloads, vec![1.0, 3.0]);
        assert_eq!(walk.transforms[0], Mat4::from_translation(Vec3::X));
        assert_eq!(walk.transforms[1], Mat4::IDENTITY);
    }

    #[test]
    fn components_without_visibility_always_count() {
        let mut scene = Scene::new();
        scene.add(Shape::new("l").with(PointLight::default()));
        let walk = collect(&scene, |shape| shape.get_visible::<PointLight>().copied());
        assert_eq!(walk.len(), 1);
    }
}
