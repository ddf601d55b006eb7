use prism_rhi::{CommandEncoder, ImageLayout, ResourceId, Texture};
use std::collections::HashMap;

/// Last known layout of every texture the renderer touches. Transitions are recorded into
/// the encoder only when the layout actually changes.
#[derive(Debug, Default)]
pub struct LayoutTracker {
    layouts: HashMap<ResourceId, ImageLayout>,
}

impl LayoutTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layout(&self, texture: ResourceId) -> ImageLayout {
        self.layouts.get(&texture).copied().unwrap_or(ImageLayout::Undefined)
    }

    /// Record a texture written by `Device::write_texture`, which leaves it shader-readable.
    /// A sampled texture never registered here starts from `Undefined` and its first
    /// barrier discards the upload.
    pub fn uploaded(&mut self, texture: ResourceId) {
        self.layouts.insert(texture, ImageLayout::ShaderReadOnly);
    }

    /// Drop a texture whose contents are no longer needed (swapchain image after present,
    /// recreated render targets).
    pub fn forget(&mut self, texture: ResourceId) {
        self.layouts.remove(&texture);
    }

    pub fn transition(&mut self, encoder: &mut dyn CommandEncoder, texture: &dyn Texture, new_layout: ImageLayout) {
        let old_layout = self.layout(texture.id());
        if old_layout == new_layout {
            return;
        }
        encoder.pipeline_barrier_texture(texture, old_layout, new_layout);
        self.layouts.insert(texture.id(), new_layout);
    }

    /// Attachment layout for a render target of this format.
    pub fn attachment_layout(texture: &dyn Texture) -> ImageLayout {
        if texture.format().is_depth() {
            ImageLayout::DepthStencilAttachment
        } else {
            ImageLayout::ColorAttachment
        }
    }

    /// Transition every attachment of `target` for rendering.
    pub fn prepare_attachments(&mut self, encoder: &mut dyn CommandEncoder, target: &prism_rhi::FrameBuffer) {
        for attachment in target.color().iter().chain(target.depth()) {
            let texture = attachment.texture.as_ref();
            self.transition(encoder, texture, Self::attachment_layout(texture));
        }
    }

    pub fn prepare_sampled(&mut self, encoder: &mut dyn CommandEncoder, textures: &[&dyn Texture]) {
        for texture in textures {
            self.transition(encoder, *texture, ImageLayout::ShaderReadOnly);
        }
    }
}
