//! wgpu Texture and Sampler implementations.

use super::texture_format_to_wgpu;
use crate::{
    ResourceId, Sampler, Texture, TextureDescriptor, TextureDimension, TextureFormat, TextureUsage,
};
use std::sync::Arc;

/// A texture plus its views: one sampling view over the whole texture (cube / cube array
/// views for cube textures) and one single-layer 2D view per array layer for attachments.
pub struct WgpuTexture {
    raw: Option<wgpu::Texture>,
    sample_view: Arc<wgpu::TextureView>,
    layer_views: Vec<Arc<wgpu::TextureView>>,
    id: ResourceId,
    format: TextureFormat,
    size: (u32, u32, u32),
    dimension: TextureDimension,
}

impl WgpuTexture {
    /// Wrap a texture owned elsewhere (a surface image). Such textures cannot be written.
    pub(crate) fn from_external(
        texture: &wgpu::Texture,
        id: ResourceId,
        format: TextureFormat,
    ) -> Self {
        let view = Arc::new(texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("swapchain_view"),
            format: Some(texture_format_to_wgpu(format)),
            ..Default::default()
        }));
        Self {
            raw: None,
            sample_view: view.clone(),
            layer_views: vec![view],
            id,
            format,
            size: (texture.width(), texture.height(), 1),
            dimension: TextureDimension::D2,
        }
    }

    pub fn raw(&self) -> Option<&wgpu::Texture> {
        self.raw.as_ref()
    }

    pub(crate) fn sample_view(&self) -> Arc<wgpu::TextureView> {
        self.sample_view.clone()
    }

    pub(crate) fn layer_view(&self, layer: u32) -> Result<&wgpu::TextureView, String> {
        self.layer_views
            .get(layer as usize)
            .map(|v| v.as_ref())
            .ok_or_else(|| format!("texture {}: no layer {}", self.id, layer))
    }
}

impl std::fmt::Debug for WgpuTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuTexture")
            .field("id", &self.id)
            .field("format", &self.format)
            .field("size", &self.size)
            .finish()
    }
}

impl Texture for WgpuTexture {
    fn id(&self) -> ResourceId {
        self.id
    }
    fn format(&self) -> TextureFormat {
        self.format
    }
    fn size(&self) -> (u32, u32, u32) {
        self.size
    }
    fn dimension(&self) -> TextureDimension {
        self.dimension
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn usage_to_wgpu(usage: TextureUsage) -> wgpu::TextureUsages {
    let mut out = wgpu::TextureUsages::empty();
    if usage.contains(TextureUsage::COPY_SRC) {
        out |= wgpu::TextureUsages::COPY_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        out |= wgpu::TextureUsages::COPY_DST;
    }
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        out |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        out |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    out
}

fn view_dimension(dimension: TextureDimension) -> wgpu::TextureViewDimension {
    match dimension {
        TextureDimension::D2 => wgpu::TextureViewDimension::D2,
        TextureDimension::D2Array => wgpu::TextureViewDimension::D2Array,
        TextureDimension::Cube => wgpu::TextureViewDimension::Cube,
        TextureDimension::CubeArray => wgpu::TextureViewDimension::CubeArray,
    }
}

pub(super) fn create_texture(
    device: &wgpu::Device,
    id: ResourceId,
    desc: &TextureDescriptor,
) -> Result<WgpuTexture, String> {
    let (width, height, layers) = desc.size;
    if width == 0 || height == 0 || layers == 0 {
        return Err(format!("texture {:?}: zero extent {:?}", desc.label, desc.size));
    }
    let mut usage = usage_to_wgpu(desc.usage);
    // Uploads go through Queue::write_texture.
    if !desc.format.is_depth() {
        usage |= wgpu::TextureUsages::COPY_DST;
    }
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: desc.label,
        size: wgpu::Extent3d { width, height, depth_or_array_layers: layers },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: texture_format_to_wgpu(desc.format),
        usage,
        view_formats: &[],
    });
    let sample_view = Arc::new(texture.create_view(&wgpu::TextureViewDescriptor {
        label: desc.label,
        dimension: Some(view_dimension(desc.dimension)),
        ..Default::default()
    }));
    let layer_views = (0..layers)
        .map(|layer| {
            Arc::new(texture.create_view(&wgpu::TextureViewDescriptor {
                label: desc.label,
                dimension: Some(wgpu::TextureViewDimension::D2),
                base_array_layer: layer,
                array_layer_count: Some(1),
                ..Default::default()
            }))
        })
        .collect();
    Ok(WgpuTexture {
        raw: Some(texture),
        sample_view,
        layer_views,
        id,
        format: desc.format,
        size: desc.size,
        dimension: desc.dimension,
    })
}

pub struct WgpuSampler {
    pub(super) sampler: Arc<wgpu::Sampler>,
}

impl WgpuSampler {
    pub(crate) fn shared(&self) -> Arc<wgpu::Sampler> {
        self.sampler.clone()
    }
}

impl std::fmt::Debug for WgpuSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuSampler").finish()
    }
}

impl Sampler for WgpuSampler {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
