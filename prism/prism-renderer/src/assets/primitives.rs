//! Built-in geometry and procedural textures owned by the asset manager.

use crate::workflow::cube_face_direction;
use glam::Vec3;
use scene_api::MeshData;

/// Full-screen quad in clip space; uv origin top-left.
pub fn screen_quad() -> MeshData {
    MeshData::new(
        vec![[-1.0, -1.0, 0.0], [1.0, -1.0, 0.0], [1.0, 1.0, 0.0], [-1.0, 1.0, 0.0]],
        vec![0, 1, 2, 0, 2, 3],
    )
    .with_texcoords(vec![[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]])
}

const ZENITH: Vec3 = Vec3::new(0.22, 0.42, 0.78);
const HORIZON: Vec3 = Vec3::new(0.72, 0.8, 0.9);
const GROUND: Vec3 = Vec3::new(0.28, 0.26, 0.24);

fn sky_color(direction: Vec3) -> Vec3 {
    if direction.y >= 0.0 {
        HORIZON.lerp(ZENITH, direction.y.powf(0.6))
    } else {
        HORIZON.lerp(GROUND, (-direction.y * 4.0).min(1.0))
    }
}

fn to_unorm(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Six RGBA8 faces (+X, -X, +Y, -Y, +Z, -Z) of a vertical gradient sky.
pub fn gradient_sky_faces(size: u32) -> Vec<Vec<u8>> {
    (0..6)
        .map(|face| {
            let mut pixels = Vec::with_capacity((size * size * 4) as usize);
            for y in 0..size {
                for x in 0..size {
                    let color = sky_color(cube_face_direction(face, x, y, size));
                    pixels.extend_from_slice(&[to_unorm(color.x), to_unorm(color.y), to_unorm(color.z), 255]);
                }
            }
            pixels
        })
        .collect()
}

/// Tiled SSAO rotation noise: xy random in [-1, 1] stored as `v * 0.5 + 0.5`.
pub fn rotation_noise(seed: u32, size: u32) -> Vec<u8> {
    let mut rng = XorShift::new(seed);
    (0..size * size)
        .flat_map(|_| {
            let x = rng.next_f32() * 2.0 - 1.0;
            let y = rng.next_f32() * 2.0 - 1.0;
            [to_unorm(x * 0.5 + 0.5), to_unorm(y * 0.5 + 0.5), 0, 255]
        })
        .collect()
}

/// Small deterministic generator for sample kernels and noise.
#[derive(Debug, Clone)]
pub struct XorShift(u32);

impl XorShift {
    pub fn new(seed: u32) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }

    /// Uniform in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / (1u32 << 24) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sky_is_brighter_blue_up_than_down() {
        let faces = gradient_sky_faces(8);
        assert_eq!(faces.len(), 6);
        assert!(faces.iter().all(|f| f.len() == 8 * 8 * 4));
        let up = &faces[2][(4 * 8 + 4) * 4..][..4];
        let down = &faces[3][(4 * 8 + 4) * 4..][..4];
        assert!(up[2] > down[2]);
    }

    #[test]
    fn xorshift_stays_in_unit_range() {
        let mut rng = XorShift::new(7);
        for _ in 0..1000 {
            let v = rng.next_f32();
            assert!((0.0..1.0).contains(&v));
        }
        assert_eq!(rotation_noise(3, 4).len(), 64);
    }
}
