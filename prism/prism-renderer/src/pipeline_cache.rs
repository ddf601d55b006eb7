//! Pipelines are built for one attachment layout. A [`PipelineCache`] keeps the layout its
//! pipeline was built for and rebuilds only when a frame buffer with different attachment
//! formats (or depth presence) shows up.

use crate::error::Result;
use prism_rhi::{
    BlendState, CompareOp, ColorTargetState, DepthStencilState, DescriptorSetLayout, Device, FrameBuffer,
    GraphicsPipeline, GraphicsPipelineDescriptor, PrimitiveTopology, RasterizationState, RenderPassLayout,
    ShaderStage, TextureFormat, VertexInputDescriptor,
};
use std::sync::Arc;

/// Depth behaviour applied when the target has a depth attachment.
#[derive(Debug, Clone, Copy)]
pub struct DepthTemplate {
    pub write: bool,
    pub compare: CompareOp,
}

/// Everything about a pipeline except the attachment formats.
#[derive(Debug, Clone)]
pub struct PipelineTemplate {
    pub label: &'static str,
    pub vertex_shader: ShaderStage,
    pub fragment_shader: Option<ShaderStage>,
    pub vertex_input: VertexInputDescriptor,
    pub topology: PrimitiveTopology,
    pub rasterization: RasterizationState,
    /// Applied to every color target.
    pub blend: Option<BlendState>,
    /// `None` means depth is neither tested nor written even when present.
    pub depth: Option<DepthTemplate>,
    pub set_layouts: Vec<Arc<dyn DescriptorSetLayout>>,
}

impl PipelineTemplate {
    pub fn descriptor(&self, layout: &RenderPassLayout) -> GraphicsPipelineDescriptor {
        GraphicsPipelineDescriptor {
            label: Some(self.label),
            vertex_shader: self.vertex_shader.clone(),
            fragment_shader: self.fragment_shader.clone(),
            vertex_input: self.vertex_input.clone(),
            primitive_topology: self.topology,
            rasterization: self.rasterization.clone(),
            color_targets: layout
                .color_formats
                .iter()
                .map(|&format| ColorTargetState { format, blend: self.blend })
                .collect(),
            depth_stencil: layout.depth_format.map(|format| {
                let depth = self.depth.unwrap_or(DepthTemplate { write: false, compare: CompareOp::Always });
                DepthStencilState { format, depth_write_enabled: depth.write, depth_compare: depth.compare }
            }),
            set_layouts: self.set_layouts.clone(),
        }
    }
}

#[derive(Debug)]
pub struct PipelineCache {
    template: PipelineTemplate,
    layout: RenderPassLayout,
    pipeline: Box<dyn GraphicsPipeline>,
    rebuilds: u64,
}

impl PipelineCache {
    /// Build against `placeholder` so the system is usable before the first target exists.
    pub fn new(device: &dyn Device, template: PipelineTemplate, placeholder: RenderPassLayout) -> Result<Self> {
        let pipeline = device.create_graphics_pipeline(&template.descriptor(&placeholder))?;
        Ok(Self { template, layout: placeholder, pipeline, rebuilds: 0 })
    }

    /// Single color target placeholder, optionally with depth.
    pub fn placeholder(color: &[TextureFormat], depth: Option<TextureFormat>) -> RenderPassLayout {
        RenderPassLayout::new(color.to_vec(), depth)
    }

    /// Make the pipeline compatible with `target`. Returns true when it had to be rebuilt.
    pub fn ensure(&mut self, device: &dyn Device, target: &FrameBuffer) -> Result<bool> {
        if self.layout.is_compatible(target) {
            return Ok(false);
        }
        let layout = RenderPassLayout::from_frame_buffer(target);
        log::debug!(
            "pipeline {}: rebuilding for {:?} (was {:?})",
            self.template.label,
            layout,
            self.layout
        );
        self.pipeline = device.create_graphics_pipeline(&self.template.descriptor(&layout))?;
        self.layout = layout;
        self.rebuilds += 1;
        Ok(true)
    }

    pub fn pipeline(&self) -> &dyn GraphicsPipeline {
        self.pipeline.as_ref()
    }

    pub fn layout(&self) -> &RenderPassLayout {
        &self.layout
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }
}
