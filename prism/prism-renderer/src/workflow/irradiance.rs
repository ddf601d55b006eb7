use super::Workflow;
use crate::error::{RenderError, Result};
use glam::Vec3;
use serde::Serialize;
use std::f32::consts::PI;

/// Direction through texel centre `(x, y)` of cube `face` (+X, -X, +Y, -Y, +Z, -Z order).
pub fn cube_face_direction(face: usize, x: u32, y: u32, size: u32) -> Vec3 {
    let u = 2.0 * (x as f32 + 0.5) / size as f32 - 1.0;
    let v = 2.0 * (y as f32 + 0.5) / size as f32 - 1.0;
    let dir = match face {
        0 => Vec3::new(1.0, -v, -u),
        1 => Vec3::new(-1.0, -v, u),
        2 => Vec3::new(u, 1.0, v),
        3 => Vec3::new(u, -1.0, -v),
        4 => Vec3::new(u, -v, 1.0),
        _ => Vec3::new(-u, -v, -1.0),
    };
    dir.normalize()
}

fn sh_basis(n: Vec3) -> [f32; 9] {
    [
        0.282_095,
        0.488_603 * n.y,
        0.488_603 * n.z,
        0.488_603 * n.x,
        1.092_548 * n.x * n.y,
        1.092_548 * n.y * n.z,
        0.315_392 * (3.0 * n.z * n.z - 1.0),
        1.092_548 * n.x * n.z,
        0.546_274 * (n.x * n.x - n.y * n.y),
    ]
}

/// Order-2 spherical harmonics of diffuse irradiance, already convolved with the cosine lobe
/// and divided by pi: `evaluate(n)` is the outgoing radiance of a white Lambertian surface.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShCoefficients {
    pub coefficients: [[f32; 3]; 9],
}

impl ShCoefficients {
    pub fn evaluate(&self, normal: Vec3) -> Vec3 {
        let basis = sh_basis(normal.normalize_or_zero());
        self.coefficients
            .iter()
            .zip(basis)
            .fold(Vec3::ZERO, |acc, (c, y)| acc + Vec3::from_array(*c) * y)
    }

    /// Padded to vec4 for uniform buffers.
    pub fn to_uniform(&self) -> [[f32; 4]; 9] {
        self.coefficients.map(|[r, g, b]| [r, g, b, 0.0])
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IrradianceInput {
    pub face_size: u32,
    /// Texel step when integrating; 1 visits every texel.
    pub sample_stride: u32,
}

/// Projects an RGBA8 sky cube onto [`ShCoefficients`].
#[derive(Debug)]
pub struct IrradianceWorkflow<'a> {
    faces: &'a [Vec<u8>],
}

impl<'a> IrradianceWorkflow<'a> {
    pub fn new(faces: &'a [Vec<u8>]) -> Self {
        Self { faces }
    }
}

impl Workflow for IrradianceWorkflow<'_> {
    const NAME: &'static str = "irradiance";
    type Input = IrradianceInput;
    type Output = ShCoefficients;

    fn source(&self, _input: &IrradianceInput) -> Result<Vec<u8>> {
        Ok(self.faces.concat())
    }

    fn work(&mut self, input: &IrradianceInput) -> Result<ShCoefficients> {
        let size = input.face_size;
        let texels = (size * size * 4) as usize;
        if self.faces.len() != 6 || self.faces.iter().any(|f| f.len() != texels) {
            return Err(RenderError::MissingResource(format!(
                "irradiance: expected 6 faces of {}x{} RGBA8",
                size, size
            )));
        }
        let stride = input.sample_stride.max(1);
        let mut radiance = [Vec3::ZERO; 9];
        let mut total_weight = 0.0f32;
        for (face, pixels) in self.faces.iter().enumerate() {
            for y in (0..size).step_by(stride as usize) {
                for x in (0..size).step_by(stride as usize) {
                    let u = 2.0 * (x as f32 + 0.5) / size as f32 - 1.0;
                    let v = 2.0 * (y as f32 + 0.5) / size as f32 - 1.0;
                    let weight = 1.0 / (1.0 + u * u + v * v).powf(1.5);
                    let i = ((y * size + x) * 4) as usize;
                    let color = Vec3::new(pixels[i] as f32, pixels[i + 1] as f32, pixels[i + 2] as f32) / 255.0;
                    let basis = sh_basis(cube_face_direction(face, x, y, size));
                    for (l, y_lm) in radiance.iter_mut().zip(basis) {
                        *l += color * y_lm * weight;
                    }
                    total_weight += weight;
                }
            }
        }

        let normalize = 4.0 * PI / total_weight;
        // Cosine-lobe convolution per band (pi, 2pi/3, pi/4), then divide by pi.
        let band = [1.0, 2.0 / 3.0, 2.0 / 3.0, 2.0 / 3.0, 0.25, 0.25, 0.25, 0.25, 0.25];
        let mut out = ShCoefficients::default();
        for ((dst, l), a) in out.coefficients.iter_mut().zip(radiance).zip(band) {
            *dst = (l * normalize * a).to_array();
        }
        Ok(out)
    }

    fn encode(output: &ShCoefficients) -> Vec<u8> {
        output
            .coefficients
            .iter()
            .flatten()
            .flat_map(|c| c.to_le_bytes())
            .collect()
    }

    fn decode(key: &str, bytes: &[u8]) -> Result<ShCoefficients> {
        if bytes.len() != 9 * 3 * 4 {
            return Err(RenderError::CacheDecode {
                key: key.to_string(),
                message: format!("expected 108 bytes, found {}", bytes.len()),
            });
        }
        let mut out = ShCoefficients::default();
        for (i, chunk) in bytes.chunks_exact(4).enumerate() {
            out.coefficients[i / 3][i % 3] = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(out)
    }
}
