//! Batched line rendering shared by the axes and line-mesh systems: every visible segment
//! of every shape goes into one vertex buffer and is drawn with a single indexed line-list
//! draw. Each vertex carries the index of its shape's transform.

use super::{camera_buffer, mat4_array, shader_stages, storage_buffer, write_camera, RenderContext, CAMERA_KEY};
use crate::config::RendererConfig;
use crate::dynamic_buffer::DynamicBuffer;
use crate::error::Result;
use crate::frame_resources::{FrameResourceTable, FrameRing, FrameSlot};
use crate::pipeline_cache::{DepthTemplate, PipelineCache, PipelineTemplate};
use crate::scene_walk::DrawAccumulator;
use crate::targets::{DEPTH_FORMAT, HDR_FORMAT};
use crate::workflow::WorkflowCache;
use bytemuck::{Pod, Zeroable};
use prism_rhi::{
    BufferUsage, CommandEncoder, CompareOp, CullMode, DescriptorPool, DescriptorSetLayoutBinding, DescriptorType,
    Device, FrameBuffer, IndexFormat, LoadOp, PrimitiveTopology, RasterizationState, ShaderStages, VertexAttribute,
    VertexBinding, VertexFormat, VertexInputDescriptor, VertexInputRate,
};
use scene_api::LineSegment;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LineVertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub draw_index: u32,
}

const VERTICES: &str = "vertices";
const INDICES: &str = "indices";
const TRANSFORMS: &str = "transforms";
const SET: &str = "set";

#[derive(Debug, Default)]
struct LineCounts {
    index_count: u32,
    rebinds: u64,
}

#[derive(Debug)]
pub struct LineBatch {
    label: &'static str,
    ring: FrameRing<FrameSlot<LineCounts>>,
    pipeline: PipelineCache,
    _pool: Box<dyn DescriptorPool>,
}

impl LineBatch {
    pub fn new(
        device: &dyn Device,
        cache: &WorkflowCache,
        config: &RendererConfig,
        label: &'static str,
    ) -> Result<Self> {
        let set_layout = device.create_descriptor_set_layout(&[
            DescriptorSetLayoutBinding::new(0, DescriptorType::UniformBuffer, ShaderStages::VERTEX),
            DescriptorSetLayoutBinding::new(1, DescriptorType::StorageBuffer, ShaderStages::VERTEX),
        ])?;
        let pool = device.create_descriptor_pool(config.frames_in_flight as u32)?;
        let capacities = &config.capacities;

        let ring = FrameRing::try_new(config.frames_in_flight, |_| {
            let mut resources = FrameResourceTable::new();
            resources.set(
                VERTICES,
                DynamicBuffer::new(
                    device,
                    Some("line_vertices"),
                    std::mem::size_of::<LineVertex>() as u64,
                    capacities.line_vertices,
                    BufferUsage::VERTEX,
                )?,
            );
            resources.set(
                INDICES,
                DynamicBuffer::new(device, Some("line_indices"), 4, capacities.line_vertices, BufferUsage::INDEX)?,
            );
            resources.set(TRANSFORMS, storage_buffer::<[[f32; 4]; 4]>(device, "line_transforms", capacities.instances)?);
            resources.set(CAMERA_KEY, camera_buffer(device)?);
            resources.set(SET, pool.allocate_set(set_layout.as_ref())?);
            resources.bind_buffer(SET, 0, CAMERA_KEY)?;
            resources.bind_buffer(SET, 1, TRANSFORMS)?;
            Ok(FrameSlot::new(resources, LineCounts::default()))
        })?;

        let (vertex_shader, fragment_shader) = shader_stages(cache, "lines")?;
        let template = PipelineTemplate {
            label,
            vertex_shader,
            fragment_shader: Some(fragment_shader),
            vertex_input: VertexInputDescriptor {
                attributes: vec![
                    VertexAttribute { location: 0, binding: 0, format: VertexFormat::Float32x3, offset: 0 },
                    VertexAttribute { location: 1, binding: 0, format: VertexFormat::Float32x3, offset: 12 },
                    VertexAttribute { location: 2, binding: 0, format: VertexFormat::Uint32, offset: 24 },
                ],
                bindings: vec![VertexBinding {
                    binding: 0,
                    stride: std::mem::size_of::<LineVertex>() as u32,
                    input_rate: VertexInputRate::Vertex,
                }],
            },
            topology: PrimitiveTopology::LineList,
            rasterization: RasterizationState { cull_mode: CullMode::None, ..Default::default() },
            blend: None,
            depth: Some(DepthTemplate { write: false, compare: CompareOp::LessOrEqual }),
            set_layouts: vec![set_layout],
        };
        let pipeline = PipelineCache::new(device, template, PipelineCache::placeholder(&[HDR_FORMAT], Some(DEPTH_FORMAT)))?;
        Ok(Self { label, ring, pipeline, _pool: pool })
    }

    /// Flatten `draws` into the current slot. Buffers grow as needed; the transform buffer's
    /// descriptor is rewritten once per growth.
    pub fn update(&mut self, device: &dyn Device, draws: &DrawAccumulator<Vec<&[LineSegment]>>) -> Result<()> {
        let mut vertices = Vec::new();
        for (draw_index, segments) in draws.payloads.iter().enumerate() {
            for segment in segments.iter().flat_map(|s| s.iter()) {
                let draw_index = draw_index as u32;
                vertices.push(LineVertex { position: segment.start, color: segment.color, draw_index });
                vertices.push(LineVertex { position: segment.end, color: segment.color, draw_index });
            }
        }
        let indices: Vec<u32> = (0..vertices.len() as u32).collect();
        let transforms = mat4_array(&draws.transforms);

        let slot = self.ring.current_mut();
        let resources = &mut slot.resources;
        resources.buffer_mut(VERTICES)?.ensure_capacity(device, vertices.len())?;
        resources.buffer_mut(INDICES)?.ensure_capacity(device, indices.len())?;
        if resources.buffer_mut(TRANSFORMS)?.ensure_capacity(device, transforms.len())?.grown() {
            resources.bind_buffer(SET, 1, TRANSFORMS)?;
            slot.state.rebinds += 1;
        }
        resources.buffer(VERTICES)?.write(device, 0, &vertices)?;
        resources.buffer(INDICES)?.write(device, 0, &indices)?;
        resources.buffer(TRANSFORMS)?.write(device, 0, &transforms)?;
        slot.state.index_count = indices.len() as u32;
        log::trace!("{}: {} segments over {} shapes", self.label, vertices.len() / 2, draws.len());
        self.ring.mark_updated();
        Ok(())
    }

    pub fn render(
        &mut self,
        ctx: &mut RenderContext<'_>,
        encoder: &mut dyn CommandEncoder,
        target: &FrameBuffer,
    ) -> Result<()> {
        let slot = self.ring.updated_slot(self.label)?;
        if slot.state.index_count == 0 {
            self.ring.finish_render();
            return Ok(());
        }
        self.pipeline.ensure(ctx.device, target)?;
        let resources = &slot.resources;
        write_camera(ctx.device, resources.buffer(CAMERA_KEY)?, ctx.camera)?;

        let mut pass = encoder.begin_render_pass(target.pass_descriptor(
            Some(self.label),
            LoadOp::Load,
            prism_rhi::ClearColor::TRANSPARENT,
            LoadOp::Load,
        ))?;
        pass.set_pipeline(self.pipeline.pipeline());
        pass.bind_descriptor_set(0, resources.descriptor_set(SET)?);
        pass.set_vertex_buffer(0, resources.buffer(VERTICES)?.buffer(), 0);
        pass.set_index_buffer(resources.buffer(INDICES)?.buffer(), 0, IndexFormat::Uint32);
        pass.draw_indexed(slot.state.index_count, 1, 0, 0, 0);
        pass.end();

        self.ring.finish_render();
        Ok(())
    }

    pub fn frame_index(&self) -> usize {
        self.ring.index()
    }

    /// Transform-buffer rebinds of the current slot so far.
    pub fn rebinds(&self) -> u64 {
        self.ring.current().state.rebinds
    }

    pub fn pipeline(&self) -> &PipelineCache {
        &self.pipeline
    }
}
