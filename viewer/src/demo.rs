//! Demo content: a lit showroom with an orbiting camera.

use glam::Vec3;
use scene_api::{
    CameraGroup, CoordinateSystem, LineSegment, LinesGrid, LinesMesh, MeshData, MotionControl, PhysicalBasedMaterial,
    PointLight, Projection, Scene, Shape, ShapeId, SkyBox, TextureId, TransformWrap, TrianglesMesh,
};
use std::sync::Arc;

pub const SKY_FACE_SIZE: u32 = 64;

pub fn scene() -> Scene {
    let mut scene = Scene::new();
    scene.add(
        Shape::new("floor")
            .with(TrianglesMesh::new(Arc::new(MeshData::plane(6.0))))
            .with(PhysicalBasedMaterial::default().with_base_color([0.55, 0.55, 0.6, 1.0]).with_metallic_roughness(0.0, 0.85)),
    );
    scene.add(
        Shape::new("cube")
            .with(TrianglesMesh::new(Arc::new(MeshData::cube(0.6))))
            .with(PhysicalBasedMaterial::default().with_base_color([0.85, 0.25, 0.2, 1.0]).with_metallic_roughness(0.1, 0.5))
            .with(TransformWrap::from_translation(Vec3::new(-1.2, 0.6, 0.0))),
    );

    let mut glowing = PhysicalBasedMaterial::default()
        .with_base_color([0.9, 0.9, 0.95, 1.0])
        .with_metallic_roughness(1.0, 0.2)
        .with_emissive([0.2, 0.4, 1.0]);
    glowing.blur = true;
    scene.add(
        Shape::new("sphere")
            .with(TrianglesMesh::new(Arc::new(MeshData::uv_sphere(0.7, 32, 16))))
            .with(glowing)
            .with(TransformWrap::from_translation(Vec3::new(1.2, 0.7, 0.0))),
    );

    scene.add(
        Shape::new("warm light")
            .with(PointLight { color: [1.0, 0.85, 0.7], intensity: 14.0, ..PointLight::default() })
            .with(TransformWrap::from_translation(Vec3::new(2.5, 3.5, 2.0))),
    );
    scene.add(
        Shape::new("fill light")
            .with(PointLight { color: [0.6, 0.7, 1.0], intensity: 6.0, cast_shadow: false, ..PointLight::default() })
            .with(TransformWrap::from_translation(Vec3::new(-3.0, 2.0, -2.0))),
    );

    scene.add(Shape::new("axes").with(CoordinateSystem::new(1.5)));
    scene.add(Shape::new("grid").with(LinesGrid::new(6.0, 12, [0.35, 0.35, 0.35])));
    scene.add(Shape::new("light rays").with(LinesMesh::new(vec![
        LineSegment::new([2.5, 3.5, 2.0], [-1.2, 0.6, 0.0], [1.0, 0.85, 0.3]),
        LineSegment::new([2.5, 3.5, 2.0], [1.2, 0.7, 0.0], [1.0, 0.85, 0.3]),
    ])));

    let orbit = MotionControl::orbit(Vec3::new(0.0, 0.5, 0.0), 7.0, 3.0, 0.25);
    let camera = scene.add(
        Shape::new("camera")
            .with(TransformWrap::looking_at(orbit.eye(), orbit.target, Vec3::Y))
            .with(Projection::perspective(std::f32::consts::FRAC_PI_4, 0.1, 100.0))
            .with(orbit),
    );
    let mut group = CameraGroup::new();
    group.add(camera);
    scene.add(Shape::new("cameras").with(group));
    scene
}

pub fn add_sky(scene: &mut Scene, texture: TextureId) -> ShapeId {
    scene.add(Shape::new("sky").with(SkyBox::new(texture)))
}

/// Move every orbiting camera along its path.
pub fn animate(scene: &mut Scene, delta_time: f32) {
    for shape in scene.shapes_mut() {
        let Some(motion) = shape.get_mut::<MotionControl>() else {
            continue;
        };
        let eye = motion.advance(delta_time);
        let target = motion.target;
        if let Some(transform) = shape.get_mut::<TransformWrap>() {
            transform.set_look_at(eye, target, Vec3::Y);
        }
    }
}

/// Vertical gradient sky, six RGBA8 faces in +X, -X, +Y, -Y, +Z, -Z order.
pub fn gradient_sky(size: u32) -> Vec<Vec<u8>> {
    const HORIZON: Vec3 = Vec3::new(0.85, 0.9, 1.0);
    const ZENITH: Vec3 = Vec3::new(0.25, 0.45, 0.85);
    const GROUND: Vec3 = Vec3::new(0.3, 0.28, 0.25);

    let face = |up: f32| -> [u8; 4] {
        let color = match up >= 0.0 {
            true => HORIZON.lerp(ZENITH, up),
            false => HORIZON.lerp(GROUND, -up),
        };
        let [r, g, b] = (color * 255.0).round().to_array();
        [r as u8, g as u8, b as u8, 255]
    };
    (0..6)
        .map(|index| {
            let mut pixels = Vec::with_capacity((size * size * 4) as usize);
            for y in 0..size {
                // Face v runs top to bottom; side faces span up = 1 .. -1.
                let v = (y as f32 + 0.5) / size as f32;
                let up = match index {
                    2 => 1.0,
                    3 => -1.0,
                    _ => 1.0 - 2.0 * v,
                };
                for _ in 0..size {
                    pixels.extend_from_slice(&face(up));
                }
            }
            pixels
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_scene_has_a_camera() {
        let scene = scene();
        let view = scene.camera_view(16.0 / 9.0).unwrap();
        assert!((view.position - Vec3::new(7.0, 3.5, 0.0)).length() < 1e-4);
    }

    #[test]
    fn animation_moves_the_camera_around_its_target() {
        let mut scene = scene();
        let before = scene.camera_view(1.0).unwrap().position;
        animate(&mut scene, 1.0);
        let after = scene.camera_view(1.0).unwrap().position;
        assert!((before - after).length() > 0.1);
        let target = Vec3::new(0.0, 0.5, 0.0);
        let horizontal = |p: Vec3| Vec3::new(p.x - target.x, 0.0, p.z - target.z).length();
        assert!((horizontal(before) - horizontal(after)).abs() < 1e-4);
    }

    #[test]
    fn sky_faces_are_full_size() {
        let faces = gradient_sky(4);
        assert_eq!(faces.len(), 6);
        assert!(faces.iter().all(|f| f.len() == 64));
        // Top face is zenith blue, bottom face ground brown.
        assert!(faces[2][2] > faces[2][0]);
        assert!(faces[3][0] > faces[3][2]);
    }
}
