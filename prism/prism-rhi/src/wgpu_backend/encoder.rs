//! wgpu command encoder, render pass and command buffer.

use super::{WgpuBuffer, WgpuDescriptorSet, WgpuGraphicsPipeline, WgpuTexture};
use crate::{
    Buffer, CommandBuffer, CommandEncoder, DescriptorSet, GraphicsPipeline, ImageLayout,
    IndexFormat, LoadOp, RenderPass, RenderPassDescriptor, StoreOp, Texture,
};
use std::sync::Mutex;

fn texture_layer_view<'a>(texture: &'a dyn Texture, layer: u32) -> Result<&'a wgpu::TextureView, String> {
    texture
        .as_any()
        .downcast_ref::<WgpuTexture>()
        .ok_or("render pass: attachment is not a WgpuTexture")?
        .layer_view(layer)
}

fn store_to_wgpu(op: StoreOp) -> wgpu::StoreOp {
    match op {
        StoreOp::Store => wgpu::StoreOp::Store,
        StoreOp::DontCare => wgpu::StoreOp::Discard,
    }
}

pub struct WgpuCommandEncoder {
    encoder: Option<wgpu::CommandEncoder>,
}

impl WgpuCommandEncoder {
    pub(super) fn new(encoder: wgpu::CommandEncoder) -> Self {
        Self { encoder: Some(encoder) }
    }
}

impl std::fmt::Debug for WgpuCommandEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuCommandEncoder").finish()
    }
}

impl CommandEncoder for WgpuCommandEncoder {
    fn begin_render_pass<'a>(
        &mut self,
        desc: RenderPassDescriptor<'a>,
    ) -> Result<Box<dyn RenderPass>, String> {
        let encoder = self.encoder.as_mut().ok_or("encoder already finished")?;
        let mut color_attachments = Vec::with_capacity(desc.color_attachments.len());
        for a in &desc.color_attachments {
            let view = texture_layer_view(a.texture, a.layer)?;
            let c = a.clear_value;
            color_attachments.push(Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: match a.load_op {
                        LoadOp::Load => wgpu::LoadOp::Load,
                        LoadOp::Clear => wgpu::LoadOp::Clear(wgpu::Color {
                            r: f64::from(c.r),
                            g: f64::from(c.g),
                            b: f64::from(c.b),
                            a: f64::from(c.a),
                        }),
                    },
                    store: store_to_wgpu(a.store_op),
                },
            }));
        }
        let depth_stencil_attachment = match &desc.depth_stencil_attachment {
            Some(d) => Some(wgpu::RenderPassDepthStencilAttachment {
                view: texture_layer_view(d.texture, d.layer)?,
                depth_ops: Some(wgpu::Operations {
                    load: match d.depth_load_op {
                        LoadOp::Load => wgpu::LoadOp::Load,
                        LoadOp::Clear => wgpu::LoadOp::Clear(d.clear_depth),
                    },
                    store: store_to_wgpu(d.depth_store_op),
                }),
                stencil_ops: None,
            }),
            None => None,
        };
        let pass = encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: desc.label,
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            })
            .forget_lifetime();
        Ok(Box::new(WgpuRenderPass { pass }))
    }

    fn copy_buffer_to_buffer(
        &mut self,
        src: &dyn Buffer,
        src_offset: u64,
        dst: &dyn Buffer,
        dst_offset: u64,
        size: u64,
    ) {
        let (Some(encoder), Some(s), Some(d)) = (
            self.encoder.as_mut(),
            src.as_any().downcast_ref::<WgpuBuffer>(),
            dst.as_any().downcast_ref::<WgpuBuffer>(),
        ) else {
            log::error!("copy_buffer_to_buffer: foreign buffers or finished encoder");
            return;
        };
        encoder.copy_buffer_to_buffer(
            s.raw(),
            src_offset,
            d.raw(),
            dst_offset,
            size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
        );
    }

    fn pipeline_barrier_texture(
        &mut self,
        _texture: &dyn Texture,
        _old_layout: ImageLayout,
        _new_layout: ImageLayout,
    ) {
        // wgpu tracks resource states itself.
    }

    fn finish(mut self: Box<Self>) -> Result<Box<dyn CommandBuffer>, String> {
        let encoder = self.encoder.take().ok_or("encoder already finished")?;
        Ok(Box::new(WgpuCommandBuffer { buffer: Mutex::new(Some(encoder.finish())) }))
    }
}

pub struct WgpuRenderPass {
    pass: wgpu::RenderPass<'static>,
}

impl std::fmt::Debug for WgpuRenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuRenderPass").finish()
    }
}

impl RenderPass for WgpuRenderPass {
    fn set_pipeline(&mut self, pipeline: &dyn GraphicsPipeline) {
        match pipeline.as_any().downcast_ref::<WgpuGraphicsPipeline>() {
            Some(p) => self.pass.set_pipeline(p.raw()),
            None => log::error!("set_pipeline: pipeline is not a WgpuGraphicsPipeline"),
        }
    }

    fn bind_descriptor_set(&mut self, set_index: u32, set: &dyn DescriptorSet) {
        let group = set
            .as_any()
            .downcast_ref::<WgpuDescriptorSet>()
            .and_then(|s| s.bind_group());
        match group {
            Some(group) => self.pass.set_bind_group(set_index, group, &[]),
            None => log::error!("bind_descriptor_set: set {} is incomplete or foreign", set_index),
        }
    }

    fn set_vertex_buffer(&mut self, index: u32, buffer: &dyn Buffer, offset: u64) {
        match buffer.as_any().downcast_ref::<WgpuBuffer>() {
            Some(b) => self.pass.set_vertex_buffer(index, b.raw().slice(offset..)),
            None => log::error!("set_vertex_buffer: buffer is not a WgpuBuffer"),
        }
    }

    fn set_index_buffer(&mut self, buffer: &dyn Buffer, offset: u64, index_format: IndexFormat) {
        let format = match index_format {
            IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
            IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
        };
        match buffer.as_any().downcast_ref::<WgpuBuffer>() {
            Some(b) => self.pass.set_index_buffer(b.raw().slice(offset..), format),
            None => log::error!("set_index_buffer: buffer is not a WgpuBuffer"),
        }
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.pass.draw(
            first_vertex..first_vertex + vertex_count,
            first_instance..first_instance + instance_count,
        );
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.pass.draw_indexed(
            first_index..first_index + index_count,
            vertex_offset,
            first_instance..first_instance + instance_count,
        );
    }

    fn end(self: Box<Self>) {
        drop(self.pass);
    }
}

pub struct WgpuCommandBuffer {
    buffer: Mutex<Option<wgpu::CommandBuffer>>,
}

impl WgpuCommandBuffer {
    pub(super) fn take(&self) -> Option<wgpu::CommandBuffer> {
        self.buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

impl std::fmt::Debug for WgpuCommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuCommandBuffer").finish()
    }
}

impl CommandBuffer for WgpuCommandBuffer {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
