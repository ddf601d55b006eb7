//! Renderer configuration: frames in flight, tone mapping, initial capacities and per-system
//! settings. Every field has a default, so a JSON file only lists what it overrides.

use crate::error::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Tone mapping mode for the post effect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneMapping {
    #[default]
    Reinhard,
    Aces,
    /// No tone mapping (clamp).
    None,
}

impl ToneMapping {
    /// Mode index read by the post shader.
    pub fn shader_mode(self) -> u32 {
        match self {
            ToneMapping::Reinhard => 0,
            ToneMapping::Aces => 1,
            ToneMapping::None => 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SsaoConfig {
    pub enabled: bool,
    /// Hemisphere samples per pixel; clamped to 1..=64.
    pub kernel_size: u32,
    pub radius: f32,
    pub bias: f32,
}

impl Default for SsaoConfig {
    fn default() -> Self {
        Self { enabled: true, kernel_size: 64, radius: 0.5, bias: 0.025 }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct BlurConfig {
    pub enabled: bool,
    /// Horizontal + vertical pass pairs.
    pub iterations: u32,
}

impl Default for BlurConfig {
    fn default() -> Self {
        Self { enabled: true, iterations: 4 }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    pub enabled: bool,
    /// Cube face edge in texels.
    pub resolution: u32,
    /// Shadow-casting lights beyond this count are lit without shadows.
    pub max_lights: u32,
    pub near: f32,
    pub far: f32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self { enabled: true, resolution: 1024, max_lights: 4, near: 0.1, far: 50.0 }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub directory: PathBuf,
    pub shaders: bool,
    pub irradiance: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { directory: PathBuf::from(".prism-cache"), shaders: true, irradiance: true }
    }
}

impl CacheConfig {
    /// Whether results of the named workflow are persisted. Unknown workflows are cached.
    pub fn enabled_for(&self, workflow: &str) -> bool {
        match workflow {
            "shader" => self.shaders,
            "irradiance" => self.irradiance,
            _ => true,
        }
    }
}

/// Element counts the per-slot buffers start with; they double on demand.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    pub line_vertices: usize,
    pub instances: usize,
    pub lights: usize,
    pub mesh_vertices: usize,
    pub mesh_indices: usize,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            line_vertices: 1024,
            instances: 256,
            lights: 16,
            mesh_vertices: 16 * 1024,
            mesh_indices: 64 * 1024,
        }
    }
}

/// Prism renderer configuration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub frames_in_flight: usize,
    pub tone_mapping: ToneMapping,
    pub exposure: f32,
    /// Linear RGBA the HDR target is cleared to behind the sky.
    pub clear_color: [f32; 4],
    pub capacities: CapacityConfig,
    pub ssao: SsaoConfig,
    pub blur: BlurConfig,
    pub shadow: ShadowConfig,
    pub cache: CacheConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            tone_mapping: ToneMapping::default(),
            exposure: 1.0,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            capacities: CapacityConfig::default(),
            ssao: SsaoConfig::default(),
            blur: BlurConfig::default(),
            shadow: ShadowConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl RendererConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str::<Self>(json)?.sanitized())
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Clamp values the systems cannot work with.
    pub fn sanitized(mut self) -> Self {
        self.frames_in_flight = self.frames_in_flight.max(1);
        self.ssao.kernel_size = self.ssao.kernel_size.clamp(1, 64);
        self.shadow.resolution = self.shadow.resolution.max(1);
        self.shadow.max_lights = self.shadow.max_lights.max(1);
        if self.shadow.far <= self.shadow.near {
            log::warn!(
                "shadow far plane {} not beyond near plane {}; using near + 1",
                self.shadow.far,
                self.shadow.near
            );
            self.shadow.far = self.shadow.near + 1.0;
        }
        self
    }
}
