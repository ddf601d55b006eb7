//! Intermediate render targets: the G-buffer, SSAO, HDR lighting and blur scratch textures
//! (sized to the swapchain), plus the point-light shadow cube array.

use crate::error::Result;
use prism_rhi::{
    Attachment, Device, FrameBuffer, Texture, TextureDescriptor, TextureDimension, TextureFormat, TextureUsage,
};
use std::sync::Arc;

pub const GBUFFER_FORMATS: [TextureFormat; 4] = [
    TextureFormat::Rgba8Unorm,
    TextureFormat::Rgba16Float,
    TextureFormat::Rgba16Float,
    TextureFormat::Rgba16Float,
];
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::D32Float;
pub const HDR_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const OCCLUSION_FORMAT: TextureFormat = TextureFormat::R16Float;
pub const SHADOW_FORMAT: TextureFormat = TextureFormat::R16Float;

fn render_target(
    device: &dyn Device,
    label: &'static str,
    size: (u32, u32, u32),
    format: TextureFormat,
    dimension: TextureDimension,
) -> Result<Arc<dyn Texture>> {
    let texture = device.create_texture(&TextureDescriptor {
        label: Some(label),
        size,
        format,
        usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        dimension,
    })?;
    Ok(texture.into())
}

/// Screen-sized targets. Recreated as a whole when the extent changes; `generation`
/// increments so systems holding descriptor sets over these textures know to rewrite them.
#[derive(Debug, Clone)]
pub struct RenderTargets {
    /// base color rgb, roughness a
    pub gbuffer0: Arc<dyn Texture>,
    /// world position xyz, occlusion a
    pub gbuffer1: Arc<dyn Texture>,
    /// emissive rgb, metallic a
    pub gbuffer2: Arc<dyn Texture>,
    /// world normal xyz, blur flag a
    pub gbuffer3: Arc<dyn Texture>,
    pub depth: Arc<dyn Texture>,
    pub ssao_raw: Arc<dyn Texture>,
    pub ssao: Arc<dyn Texture>,
    pub lit: Arc<dyn Texture>,
    pub blur_ping: Arc<dyn Texture>,
    pub blur_pong: Arc<dyn Texture>,
    width: u32,
    height: u32,
    generation: u64,
}

impl RenderTargets {
    /// Reuse `existing` when it already has this extent, otherwise create a new set.
    pub fn ensure_size(device: &dyn Device, existing: Option<Self>, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(crate::error::RenderError::InvalidFrameBuffer(format!(
                "render targets: extent {}x{} must be non-zero",
                width, height
            )));
        }
        let generation = match existing {
            Some(targets) if targets.width == width && targets.height == height => return Ok(targets),
            Some(targets) => targets.generation + 1,
            None => 0,
        };
        let size = (width, height, 1);
        let rt = |label, format| render_target(device, label, size, format, TextureDimension::D2);
        let targets = Self {
            gbuffer0: rt("gbuffer0", GBUFFER_FORMATS[0])?,
            gbuffer1: rt("gbuffer1", GBUFFER_FORMATS[1])?,
            gbuffer2: rt("gbuffer2", GBUFFER_FORMATS[2])?,
            gbuffer3: rt("gbuffer3", GBUFFER_FORMATS[3])?,
            depth: rt("gbuffer_depth", DEPTH_FORMAT)?,
            ssao_raw: rt("ssao_raw", OCCLUSION_FORMAT)?,
            ssao: rt("ssao", OCCLUSION_FORMAT)?,
            lit: rt("lit", HDR_FORMAT)?,
            blur_ping: rt("blur_ping", HDR_FORMAT)?,
            blur_pong: rt("blur_pong", HDR_FORMAT)?,
            width,
            height,
            generation,
        };
        log::debug!("render targets {}x{} (generation {})", width, height, generation);
        Ok(targets)
    }

    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn all(&self) -> [&Arc<dyn Texture>; 10] {
        [
            &self.gbuffer0,
            &self.gbuffer1,
            &self.gbuffer2,
            &self.gbuffer3,
            &self.depth,
            &self.ssao_raw,
            &self.ssao,
            &self.lit,
            &self.blur_ping,
            &self.blur_pong,
        ]
    }

    pub fn gbuffer_target(&self) -> Result<FrameBuffer> {
        let color = [&self.gbuffer0, &self.gbuffer1, &self.gbuffer2, &self.gbuffer3]
            .into_iter()
            .map(|t| Attachment::new(t.clone()))
            .collect();
        Ok(FrameBuffer::new(color, Some(Attachment::new(self.depth.clone())))?)
    }

    pub fn ssao_target(&self) -> Result<FrameBuffer> {
        single(&self.ssao)
    }

    pub fn lit_target(&self) -> Result<FrameBuffer> {
        single(&self.lit)
    }

    /// HDR color with the G-buffer depth, for geometry drawn over the composite.
    pub fn lit_with_depth_target(&self) -> Result<FrameBuffer> {
        Ok(FrameBuffer::new(vec![Attachment::new(self.lit.clone())], Some(Attachment::new(self.depth.clone())))?)
    }
}

pub(crate) fn single(texture: &Arc<dyn Texture>) -> Result<FrameBuffer> {
    Ok(FrameBuffer::new(vec![Attachment::new(texture.clone())], None)?)
}

/// Cube-array distance map (six layers per shadow-casting light) and the depth buffer all
/// faces share.
#[derive(Debug, Clone)]
pub struct ShadowTargets {
    pub cubes: Arc<dyn Texture>,
    pub depth: Arc<dyn Texture>,
    resolution: u32,
    max_lights: u32,
}

impl ShadowTargets {
    pub fn new(device: &dyn Device, resolution: u32, max_lights: u32) -> Result<Self> {
        let resolution = resolution.max(1);
        let max_lights = max_lights.max(1);
        Ok(Self {
            cubes: render_target(
                device,
                "shadow_cubes",
                (resolution, resolution, 6 * max_lights),
                SHADOW_FORMAT,
                TextureDimension::CubeArray,
            )?,
            depth: render_target(
                device,
                "shadow_depth",
                (resolution, resolution, 1),
                DEPTH_FORMAT,
                TextureDimension::D2,
            )?,
            resolution,
            max_lights,
        })
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn max_lights(&self) -> u32 {
        self.max_lights
    }

    /// Target for one face of one light's cube.
    pub fn face_target(&self, light_slot: u32, face: u32) -> Result<FrameBuffer> {
        Ok(FrameBuffer::new(
            vec![Attachment::layer(self.cubes.clone(), light_slot * 6 + face)],
            Some(Attachment::new(self.depth.clone())),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_rhi::headless::HeadlessDevice;

    #[test]
    fn same_extent_keeps_targets_and_resize_bumps_generation() {
        let device = HeadlessDevice::new();
        let first = RenderTargets::ensure_size(device.as_ref(), None, 64, 32).unwrap();
        let lit = first.lit.id();
        let same = RenderTargets::ensure_size(device.as_ref(), Some(first), 64, 32).unwrap();
        assert_eq!(same.lit.id(), lit);
        assert_eq!(same.generation(), 0);

        let resized = RenderTargets::ensure_size(device.as_ref(), Some(same), 128, 32).unwrap();
        assert_ne!(resized.lit.id(), lit);
        assert_eq!(resized.generation(), 1);
        assert_eq!(resized.gbuffer_target().unwrap().attachment_count(), 5);
        assert!(RenderTargets::ensure_size(device.as_ref(), None, 0, 32).is_err());
    }

    #[test]
    fn shadow_faces_address_consecutive_layers() {
        let device = HeadlessDevice::new();
        let shadows = ShadowTargets::new(device.as_ref(), 16, 2).unwrap();
        assert_eq!(shadows.cubes.size(), (16, 16, 12));
        let target = shadows.face_target(1, 3).unwrap();
        assert_eq!(target.color()[0].layer, 9);
        assert!(shadows.face_target(2, 0).is_err());
    }
}
