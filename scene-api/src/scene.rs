use crate::{CameraGroup, CameraView, Projection, Shape, ShapeId, TransformWrap};
use std::collections::HashMap;

/// Shapes in insertion order plus an id index. Iteration order is always insertion order.
#[derive(Debug, Default)]
pub struct Scene {
    shapes: Vec<Shape>,
    index: HashMap<ShapeId, usize>,
}

/// Cloning a scene keeps every shape id so camera groups still resolve.
impl Clone for Scene {
    fn clone(&self) -> Self {
        Self { shapes: self.shapes.iter().map(Shape::duplicate).collect(), index: self.index.clone() }
    }
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `shape`, or replace the shape already stored under its id in place.
    pub fn add(&mut self, shape: Shape) -> ShapeId {
        let id = shape.id();
        match self.index.get(&id) {
            Some(&i) => self.shapes[i] = shape,
            None => {
                self.index.insert(id, self.shapes.len());
                self.shapes.push(shape);
            }
        }
        id
    }

    pub fn remove(&mut self, id: ShapeId) -> Option<Shape> {
        let i = self.index.remove(&id)?;
        let shape = self.shapes.remove(i);
        for (pos, s) in self.shapes.iter().enumerate().skip(i) {
            self.index.insert(s.id(), pos);
        }
        Some(shape)
    }

    pub fn shape(&self, id: ShapeId) -> Option<&Shape> {
        self.index.get(&id).map(|&i| &self.shapes[i])
    }

    pub fn shape_mut(&mut self, id: ShapeId) -> Option<&mut Shape> {
        self.index.get(&id).map(|&i| &mut self.shapes[i])
    }

    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub fn shapes_mut(&mut self) -> impl Iterator<Item = &mut Shape> {
        self.shapes.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// The first camera group in the scene.
    pub fn camera_group(&self) -> Option<&CameraGroup> {
        self.shapes.iter().find_map(|s| s.get::<CameraGroup>())
    }

    /// Current camera resolved to view/projection. `None` when there is no camera group,
    /// no current camera, or the camera shape lacks a transform or projection.
    pub fn camera_view(&self, aspect: f32) -> Option<CameraView> {
        let camera = self.shape(self.camera_group()?.current()?)?;
        let transform = camera.get::<TransformWrap>()?;
        let projection = camera.get::<Projection>()?;
        Some(CameraView {
            view: transform.inverse(),
            projection: projection.matrix(aspect),
            position: transform.translation(),
            near: projection.near(),
            far: projection.far(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn scene_with_camera(with_projection: bool) -> Scene {
        let mut scene = Scene::new();
        let mut camera = Shape::new("camera").with(TransformWrap::looking_at(
            Vec3::new(0.0, 0.0, 5.0),
            Vec3::ZERO,
            Vec3::Y,
        ));
        if with_projection {
            camera.insert(Projection::perspective(1.0, 0.1, 100.0));
        }
        let camera_id = scene.add(camera);
        let mut group = CameraGroup::new();
        group.add(camera_id);
        scene.add(Shape::new("cameras").with(group));
        scene
    }

    #[test]
    fn insertion_order_survives_removal() {
        let mut scene = Scene::new();
        let ids: Vec<ShapeId> = (0..4).map(|i| scene.add(Shape::new(format!("s{}", i)))).collect();
        scene.remove(ids[1]);
        let names: Vec<&str> = scene.shapes().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["s0", "s2", "s3"]);
        assert_eq!(scene.shape(ids[3]).unwrap().name(), "s3");
        assert!(scene.shape(ids[1]).is_none());
    }

    #[test]
    fn camera_view_resolves_current_camera() {
        let scene = scene_with_camera(true);
        let view = scene.camera_view(16.0 / 9.0).unwrap();
        assert!(view.position.abs_diff_eq(Vec3::new(0.0, 0.0, 5.0), 1e-5));
        let clip = view.view_projection().project_point3(Vec3::ZERO);
        assert!(clip.x.abs() < 1e-5 && clip.y.abs() < 1e-5);
        assert!(clip.z > 0.0 && clip.z < 1.0);
    }

    #[test]
    fn camera_without_projection_yields_none() {
        assert!(scene_with_camera(false).camera_view(1.0).is_none());
        assert!(Scene::new().camera_view(1.0).is_none());
    }

    #[test]
    fn adding_a_cloned_shape_keeps_the_original() {
        let mut scene = Scene::new();
        let lamp = Shape::new("lamp").with(TransformWrap::from_translation(Vec3::X));
        let original = scene.add(lamp.clone());
        let copy = scene.add(lamp);
        assert_ne!(original, copy);
        assert_eq!(scene.len(), 2);
        assert!(scene.shape(original).is_some());
    }

    #[test]
    fn adding_under_an_existing_id_replaces_in_place() {
        let mut scene = Scene::new();
        let id = scene.add(Shape::new("a"));
        scene.add(Shape::new("b"));
        let mut renamed = scene.shape(id).unwrap().duplicate();
        renamed.set_name("a2");
        scene.add(renamed);
        let names: Vec<&str> = scene.shapes().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["a2", "b"]);
        assert_eq!(scene.shape(id).unwrap().name(), "a2");
    }

    #[test]
    fn cloned_scene_keeps_ids_and_camera() {
        let scene = scene_with_camera(true);
        let copy = scene.clone();
        let ids: Vec<ShapeId> = scene.shapes().iter().map(|s| s.id()).collect();
        let copied: Vec<ShapeId> = copy.shapes().iter().map(|s| s.id()).collect();
        assert_eq!(ids, copied);
        assert!(copy.camera_view(1.0).is_some());
    }
}
