//! Headless backend: buffers live in CPU memory, command buffers are recorded and replayed on
//! submit. Nothing is rasterized; instead every submission is validated (texture layouts,
//! pipeline/render-pass compatibility, zero-count draws) and logged so that tests and tools
//! can inspect exactly what a frame would have sent to a GPU.

use crate::{
    Buffer, BufferDescriptor, BufferMemoryPreference, BufferUsage, ColorTargetState, CommandBuffer,
    CommandEncoder, DepthStencilState, DescriptorPool, DescriptorSet, DescriptorSetLayout,
    DescriptorSetLayoutBinding, DescriptorType, Device, Fence, GraphicsPipeline,
    GraphicsPipelineDescriptor, ImageLayout, IndexFormat, LoadOp, RenderPass, RenderPassDescriptor,
    ResourceId, Sampler, SamplerDescriptor, Swapchain, SwapchainFrame, Texture, TextureDescriptor,
    TextureDimension, TextureFormat, TextureUsage,
};
use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Counters accumulated over the device lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub submissions: u64,
    pub draw_calls: u64,
    pub zero_count_draws: u64,
    pub incompatible_pipelines: u64,
    pub layout_violations: u64,
    pub incomplete_descriptor_sets: u64,
    pub buffers_created: u64,
    pub textures_created: u64,
    pub pipelines_created: u64,
    pub copies: u64,
    pub buffer_writes: u64,
    pub texture_writes: u64,
    /// Barriers out of `Undefined` on a texture still holding uploaded data.
    pub discarded_uploads: u64,
    pub wait_idles: u64,
    pub presents: u64,
}

/// One command as it was executed by [`HeadlessDevice::submit`] (or presented by a swapchain).
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginRenderPass {
        label: Option<&'static str>,
        color: Vec<ResourceId>,
        color_load: Vec<LoadOp>,
        depth: Option<ResourceId>,
    },
    SetPipeline {
        label: Option<&'static str>,
        compatible: bool,
    },
    BindDescriptorSet {
        set_index: u32,
        complete: bool,
        buffers: Vec<ResourceId>,
        textures: Vec<ResourceId>,
    },
    SetVertexBuffer {
        index: u32,
        buffer: ResourceId,
    },
    SetIndexBuffer {
        buffer: ResourceId,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    EndRenderPass,
    CopyBuffer {
        src: ResourceId,
        dst: ResourceId,
        size: u64,
    },
    TextureBarrier {
        texture: ResourceId,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    },
    Present {
        image_index: u32,
        texture: ResourceId,
    },
}

impl RecordedCommand {
    pub fn is_draw(&self) -> bool {
        matches!(self, RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. })
    }
}

/// Commands plus the side data replay needs (buffer storage for copies, texture ids whose
/// layouts are checked).
#[derive(Debug, Clone)]
enum Op {
    Record(RecordedCommand),
    Copy {
        src: Arc<Mutex<Vec<u8>>>,
        src_offset: u64,
        dst: Arc<Mutex<Vec<u8>>>,
        dst_offset: u64,
        size: u64,
        command: RecordedCommand,
    },
}

#[derive(Debug, Default)]
struct DeviceState {
    stats: HeadlessStats,
    commands: Vec<RecordedCommand>,
    layouts: HashMap<ResourceId, ImageLayout>,
    /// Textures whose contents came from `write_texture` and were not rendered over since.
    uploaded: HashSet<ResourceId>,
}

impl DeviceState {
    fn layout(&self, id: ResourceId) -> ImageLayout {
        self.layouts.get(&id).copied().unwrap_or(ImageLayout::Undefined)
    }

    fn expect_layout(&mut self, id: ResourceId, expected: ImageLayout, what: &str) {
        let actual = self.layout(id);
        if actual != expected {
            log::warn!(
                "headless: texture {} used as {} in layout {:?} (expected {:?})",
                id,
                what,
                actual,
                expected
            );
            self.stats.layout_violations += 1;
        }
    }

    fn execute(&mut self, op: Op) {
        let command = match op {
            Op::Record(command) => command,
            Op::Copy { src, src_offset, dst, dst_offset, size, command } => {
                let bytes = {
                    let src = lock(&src);
                    let start = src_offset as usize;
                    src[start..start + size as usize].to_vec()
                };
                let mut dst = lock(&dst);
                let start = dst_offset as usize;
                dst[start..start + size as usize].copy_from_slice(&bytes);
                self.stats.copies += 1;
                command
            }
        };
        match &command {
            RecordedCommand::BeginRenderPass { color, depth, .. } => {
                for id in color {
                    self.expect_layout(*id, ImageLayout::ColorAttachment, "color attachment");
                    self.uploaded.remove(id);
                }
                if let Some(id) = depth {
                    self.expect_layout(*id, ImageLayout::DepthStencilAttachment, "depth attachment");
                    self.uploaded.remove(id);
                }
            }
            RecordedCommand::SetPipeline { compatible, label } => {
                if !compatible {
                    log::warn!("headless: pipeline {:?} bound in incompatible render pass", label);
                    self.stats.incompatible_pipelines += 1;
                }
            }
            RecordedCommand::BindDescriptorSet { textures, complete, .. } => {
                if !complete {
                    self.stats.incomplete_descriptor_sets += 1;
                }
                for id in textures {
                    self.expect_layout(*id, ImageLayout::ShaderReadOnly, "sampled texture");
                }
            }
            RecordedCommand::Draw { vertex_count, instance_count, .. } => {
                self.stats.draw_calls += 1;
                if *vertex_count == 0 || *instance_count == 0 {
                    self.stats.zero_count_draws += 1;
                }
            }
            RecordedCommand::DrawIndexed { index_count, instance_count, .. } => {
                self.stats.draw_calls += 1;
                if *index_count == 0 || *instance_count == 0 {
                    self.stats.zero_count_draws += 1;
                }
            }
            RecordedCommand::TextureBarrier { texture, old_layout, new_layout } => {
                if *old_layout == ImageLayout::Undefined && self.uploaded.remove(texture) {
                    log::warn!("headless: barrier from Undefined discards the upload of texture {}", texture);
                    self.stats.discarded_uploads += 1;
                }
                let current = self.layout(*texture);
                if *old_layout != ImageLayout::Undefined && *old_layout != current {
                    log::warn!(
                        "headless: barrier on texture {} claims {:?} but texture is in {:?}",
                        texture,
                        old_layout,
                        current
                    );
                    self.stats.layout_violations += 1;
                }
                self.layouts.insert(*texture, *new_layout);
            }
            _ => {}
        }
        self.commands.push(command);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// CPU-side device. Cheap to create; use one per test.
///
/// Submissions execute immediately. By default the submit fence is signaled right away; a
/// device made with [`HeadlessDevice::with_deferred_completion`] keeps it unsignaled until
/// [`HeadlessDevice::complete`] or `wait_idle`, which lets tests hold frames in flight.
#[derive(Debug)]
pub struct HeadlessDevice {
    state: Arc<Mutex<DeviceState>>,
    next_id: Arc<AtomicU64>,
    deferred: bool,
    in_flight: Mutex<Vec<Arc<AtomicBool>>>,
}

impl HeadlessDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(false))
    }

    /// Device whose submit fences signal only on [`HeadlessDevice::complete`].
    pub fn with_deferred_completion() -> Arc<Self> {
        Arc::new(Self::build(true))
    }

    fn build(deferred: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState::default())),
            next_id: Arc::new(AtomicU64::new(1)),
            deferred,
            in_flight: Mutex::new(Vec::new()),
        }
    }

    /// Signal the fence of every submission still in flight. Returns how many were pending.
    pub fn complete(&self) -> usize {
        let pending = std::mem::take(&mut *lock(&self.in_flight));
        for fence in &pending {
            fence.store(true, Ordering::Release);
        }
        pending.len()
    }

    /// Submissions whose fence is still waiting for [`HeadlessDevice::complete`].
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    fn next_id(&self) -> ResourceId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn stats(&self) -> HeadlessStats {
        lock(&self.state).stats.clone()
    }

    /// Drain the log of executed commands.
    pub fn take_commands(&self) -> Vec<RecordedCommand> {
        std::mem::take(&mut lock(&self.state).commands)
    }

    /// Current contents of a headless buffer; `None` for foreign buffers.
    pub fn buffer_contents(&self, buffer: &dyn Buffer) -> Option<Vec<u8>> {
        buffer
            .as_any()
            .downcast_ref::<HeadlessBuffer>()
            .map(|b| lock(&b.data).clone())
    }

    pub fn texture_layout(&self, texture: ResourceId) -> ImageLayout {
        lock(&self.state).layout(texture)
    }

    /// Create a swapchain of `image_count` render-attachment textures.
    pub fn create_swapchain(
        &self,
        extent: (u32, u32),
        image_count: u32,
        format: TextureFormat,
    ) -> Result<HeadlessSwapchain, String> {
        if image_count == 0 {
            return Err("headless swapchain needs at least one image".to_string());
        }
        let mut swapchain = HeadlessSwapchain {
            state: self.state.clone(),
            next_id: self.next_id.clone(),
            images: Vec::new(),
            image_count,
            extent,
            format,
            next_image: 0,
        };
        swapchain.recreate_images();
        Ok(swapchain)
    }
}

impl Device for HeadlessDevice {
    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<Box<dyn Buffer>, String> {
        if desc.size == 0 {
            return Err(format!("buffer {:?}: size must be non-zero", desc.label));
        }
        lock(&self.state).stats.buffers_created += 1;
        Ok(Box::new(HeadlessBuffer {
            id: self.next_id(),
            size: desc.size,
            usage: desc.usage,
            host_visible: desc.memory == BufferMemoryPreference::HostVisible,
            data: Arc::new(Mutex::new(vec![0u8; desc.size as usize])),
        }))
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> Result<Box<dyn Texture>, String> {
        let (w, h, layers) = desc.size;
        if w == 0 || h == 0 || layers == 0 {
            return Err(format!("texture {:?}: zero extent {:?}", desc.label, desc.size));
        }
        let layers_ok = match desc.dimension {
            TextureDimension::D2 => layers == 1,
            TextureDimension::D2Array => true,
            TextureDimension::Cube => layers == 6,
            TextureDimension::CubeArray => layers % 6 == 0,
        };
        if !layers_ok {
            return Err(format!(
                "texture {:?}: {} layers invalid for {:?}",
                desc.label, layers, desc.dimension
            ));
        }
        lock(&self.state).stats.textures_created += 1;
        Ok(Box::new(HeadlessTexture {
            id: self.next_id(),
            format: desc.format,
            size: desc.size,
            dimension: desc.dimension,
            usage: desc.usage,
        }))
    }

    fn create_sampler(&self, _desc: &SamplerDescriptor) -> Result<Box<dyn Sampler>, String> {
        Ok(Box::new(HeadlessSampler { id: self.next_id() }))
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor,
    ) -> Result<Box<dyn GraphicsPipeline>, String> {
        if desc.vertex_shader.source.is_empty() || desc.vertex_shader.source.len() % 4 != 0 {
            return Err(format!("pipeline {:?}: vertex shader is not SPIR-V", desc.label));
        }
        if let Some(fs) = &desc.fragment_shader {
            if fs.source.is_empty() || fs.source.len() % 4 != 0 {
                return Err(format!("pipeline {:?}: fragment shader is not SPIR-V", desc.label));
            }
        }
        lock(&self.state).stats.pipelines_created += 1;
        Ok(Box::new(HeadlessPipeline {
            label: desc.label,
            color_targets: desc.color_targets.clone(),
            depth_stencil: desc.depth_stencil.clone(),
        }))
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorSetLayoutBinding],
    ) -> Result<Arc<dyn DescriptorSetLayout>, String> {
        let mut seen = HashSet::new();
        for b in bindings {
            if !seen.insert(b.binding) {
                return Err(format!("descriptor set layout: duplicate binding {}", b.binding));
            }
        }
        Ok(Arc::new(HeadlessDescriptorSetLayout { bindings: bindings.to_vec() }))
    }

    fn create_descriptor_pool(&self, max_sets: u32) -> Result<Box<dyn DescriptorPool>, String> {
        Ok(Box::new(HeadlessDescriptorPool {
            max_sets,
            allocated: AtomicU64::new(0),
        }))
    }

    fn create_command_encoder(
        &self,
        label: Option<&'static str>,
    ) -> Result<Box<dyn CommandEncoder>, String> {
        Ok(Box::new(HeadlessCommandEncoder {
            label,
            ops: Arc::new(Mutex::new(Vec::new())),
        }))
    }

    fn submit(
        &self,
        command_buffers: Vec<Box<dyn CommandBuffer>>,
        signal_fence: Option<&dyn Fence>,
    ) -> Result<(), String> {
        let mut state = lock(&self.state);
        for cb in command_buffers {
            let cb = cb
                .as_any()
                .downcast_ref::<HeadlessCommandBuffer>()
                .ok_or("submit: command buffer is not a HeadlessCommandBuffer")?;
            for op in cb.ops.iter().cloned() {
                state.execute(op);
            }
        }
        state.stats.submissions += 1;
        drop(state);
        if let Some(fence) = signal_fence {
            let fence = fence
                .as_any()
                .downcast_ref::<HeadlessFence>()
                .ok_or("submit: fence is not a HeadlessFence")?;
            match self.deferred {
                true => lock(&self.in_flight).push(Arc::clone(&fence.signaled)),
                false => fence.signaled.store(true, Ordering::Release),
            }
        }
        Ok(())
    }

    fn write_buffer(&self, buffer: &dyn Buffer, offset: u64, data: &[u8]) -> Result<(), String> {
        let b = buffer
            .as_any()
            .downcast_ref::<HeadlessBuffer>()
            .ok_or("write_buffer: buffer is not a HeadlessBuffer")?;
        if !b.usage.contains(BufferUsage::COPY_DST) && !b.host_visible {
            return Err(format!("write_buffer: buffer {} lacks COPY_DST", b.id));
        }
        let end = offset + data.len() as u64;
        if end > b.size {
            return Err(format!(
                "write_buffer: range {}..{} exceeds buffer {} of size {}",
                offset, end, b.id, b.size
            ));
        }
        lock(&b.data)[offset as usize..end as usize].copy_from_slice(data);
        lock(&self.state).stats.buffer_writes += 1;
        Ok(())
    }

    fn write_texture(&self, texture: &dyn Texture, layer: u32, data: &[u8]) -> Result<(), String> {
        let (w, h, layers) = texture.size();
        if layer >= layers {
            return Err(format!("write_texture: layer {} out of range ({} layers)", layer, layers));
        }
        let expected = (w * h * texture.format().bytes_per_pixel()) as usize;
        if data.len() != expected {
            return Err(format!(
                "write_texture: {} bytes given, layer needs {}",
                data.len(),
                expected
            ));
        }
        let mut state = lock(&self.state);
        state.layouts.insert(texture.id(), ImageLayout::ShaderReadOnly);
        state.uploaded.insert(texture.id());
        state.stats.texture_writes += 1;
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), String> {
        lock(&self.state).stats.wait_idles += 1;
        self.complete();
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> Result<Box<dyn Fence>, String> {
        Ok(Box::new(HeadlessFence { signaled: Arc::new(AtomicBool::new(signaled)) }))
    }
}

pub struct HeadlessBuffer {
    id: ResourceId,
    size: u64,
    usage: BufferUsage,
    host_visible: bool,
    data: Arc<Mutex<Vec<u8>>>,
}

impl std::fmt::Debug for HeadlessBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessBuffer")
            .field("id", &self.id)
            .field("size", &self.size)
            .finish()
    }
}

impl Buffer for HeadlessBuffer {
    fn id(&self) -> ResourceId {
        self.id
    }
    fn size(&self) -> u64 {
        self.size
    }
    fn usage(&self) -> BufferUsage {
        self.usage
    }
    fn host_visible(&self) -> bool {
        self.host_visible
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct HeadlessTexture {
    id: ResourceId,
    format: TextureFormat,
    size: (u32, u32, u32),
    dimension: TextureDimension,
    usage: TextureUsage,
}

impl HeadlessTexture {
    pub fn usage(&self) -> TextureUsage {
        self.usage
    }
}

impl Texture for HeadlessTexture {
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
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct HeadlessSampler {
    id: ResourceId,
}

impl Sampler for HeadlessSampler {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct HeadlessPipeline {
    label: Option<&'static str>,
    color_targets: Vec<ColorTargetState>,
    depth_stencil: Option<DepthStencilState>,
}

impl HeadlessPipeline {
    fn matches(&self, color: &[TextureFormat], depth: Option<TextureFormat>) -> bool {
        self.color_targets.len() == color.len()
            && self.color_targets.iter().zip(color).all(|(t, f)| t.format == *f)
            && self.depth_stencil.as_ref().map(|d| d.format) == depth
    }
}

impl GraphicsPipeline for HeadlessPipeline {
    fn label(&self) -> Option<&'static str> {
        self.label
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct HeadlessDescriptorSetLayout {
    bindings: Vec<DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayout for HeadlessDescriptorSetLayout {
    fn bindings(&self) -> &[DescriptorSetLayoutBinding] {
        &self.bindings
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct HeadlessDescriptorPool {
    max_sets: u32,
    allocated: AtomicU64,
}

impl DescriptorPool for HeadlessDescriptorPool {
    fn allocate_set(&self, layout: &dyn DescriptorSetLayout) -> Result<Box<dyn DescriptorSet>, String> {
        let n = self.allocated.fetch_add(1, Ordering::Relaxed);
        if n >= u64::from(self.max_sets) {
            return Err(format!("descriptor pool exhausted ({} sets)", self.max_sets));
        }
        Ok(Box::new(HeadlessDescriptorSet {
            bindings: layout.bindings().to_vec(),
            buffers: BTreeMap::new(),
            textures: BTreeMap::new(),
            samplers: BTreeMap::new(),
        }))
    }
}

#[derive(Debug)]
pub struct HeadlessDescriptorSet {
    bindings: Vec<DescriptorSetLayoutBinding>,
    buffers: BTreeMap<u32, ResourceId>,
    textures: BTreeMap<u32, ResourceId>,
    samplers: BTreeMap<u32, ResourceId>,
}

impl HeadlessDescriptorSet {
    fn binding_type(&self, binding: u32) -> Result<DescriptorType, String> {
        self.bindings
            .iter()
            .find(|b| b.binding == binding)
            .map(|b| b.descriptor_type)
            .ok_or_else(|| format!("descriptor set: no binding {} in layout", binding))
    }

    fn is_complete(&self) -> bool {
        self.bindings.iter().all(|b| {
            self.buffers.contains_key(&b.binding)
                || self.textures.contains_key(&b.binding)
                || self.samplers.contains_key(&b.binding)
        })
    }
}

impl DescriptorSet for HeadlessDescriptorSet {
    fn write_buffer(&mut self, binding: u32, buffer: &dyn Buffer, offset: u64, size: u64) -> Result<(), String> {
        let ty = self.binding_type(binding)?;
        let required = match ty {
            DescriptorType::UniformBuffer => BufferUsage::UNIFORM,
            DescriptorType::StorageBuffer => BufferUsage::STORAGE,
            other => return Err(format!("binding {} is {:?}, not a buffer", binding, other)),
        };
        if !buffer.usage().contains(required) {
            return Err(format!("binding {}: buffer {} lacks {:?}", binding, buffer.id(), required));
        }
        if offset + size > buffer.size() {
            return Err(format!("binding {}: range exceeds buffer {}", binding, buffer.id()));
        }
        self.buffers.insert(binding, buffer.id());
        Ok(())
    }

    fn write_texture(&mut self, binding: u32, texture: &dyn Texture) -> Result<(), String> {
        let expected = match self.binding_type(binding)? {
            DescriptorType::SampledImage => TextureDimension::D2,
            DescriptorType::SampledCubeImage => TextureDimension::Cube,
            DescriptorType::SampledCubeArrayImage => TextureDimension::CubeArray,
            other => return Err(format!("binding {} is {:?}, not a texture", binding, other)),
        };
        if texture.dimension() != expected {
            return Err(format!(
                "binding {}: texture {} is {:?}, layout expects {:?}",
                binding,
                texture.id(),
                texture.dimension(),
                expected
            ));
        }
        self.textures.insert(binding, texture.id());
        Ok(())
    }

    fn write_sampler(&mut self, binding: u32, sampler: &dyn Sampler) -> Result<(), String> {
        if self.binding_type(binding)? != DescriptorType::Sampler {
            return Err(format!("binding {} is not a sampler", binding));
        }
        let id = sampler
            .as_any()
            .downcast_ref::<HeadlessSampler>()
            .map(|s| s.id)
            .ok_or("write_sampler: sampler is not a HeadlessSampler")?;
        self.samplers.insert(binding, id);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct HeadlessCommandEncoder {
    label: Option<&'static str>,
    ops: Arc<Mutex<Vec<Op>>>,
}

impl CommandEncoder for HeadlessCommandEncoder {
    fn begin_render_pass<'a>(
        &mut self,
        desc: RenderPassDescriptor<'a>,
    ) -> Result<Box<dyn RenderPass>, String> {
        if desc.color_attachments.is_empty() && desc.depth_stencil_attachment.is_none() {
            return Err(format!("render pass {:?}: no attachments", desc.label));
        }
        let color_formats = desc.color_attachments.iter().map(|a| a.texture.format()).collect();
        let depth_format = desc.depth_stencil_attachment.as_ref().map(|d| d.texture.format());
        lock(&self.ops).push(Op::Record(RecordedCommand::BeginRenderPass {
            label: desc.label,
            color: desc.color_attachments.iter().map(|a| a.texture.id()).collect(),
            color_load: desc.color_attachments.iter().map(|a| a.load_op).collect(),
            depth: desc.depth_stencil_attachment.as_ref().map(|d| d.texture.id()),
        }));
        Ok(Box::new(HeadlessRenderPass {
            ops: self.ops.clone(),
            color_formats,
            depth_format,
        }))
    }

    fn copy_buffer_to_buffer(
        &mut self,
        src: &dyn Buffer,
        src_offset: u64,
        dst: &dyn Buffer,
        dst_offset: u64,
        size: u64,
    ) {
        let (Some(s), Some(d)) = (
            src.as_any().downcast_ref::<HeadlessBuffer>(),
            dst.as_any().downcast_ref::<HeadlessBuffer>(),
        ) else {
            log::error!("headless: copy between foreign buffers ignored");
            return;
        };
        if src_offset + size > s.size || dst_offset + size > d.size {
            log::error!("headless: copy of {} bytes out of range ignored", size);
            return;
        }
        lock(&self.ops).push(Op::Copy {
            src: s.data.clone(),
            src_offset,
            dst: d.data.clone(),
            dst_offset,
            size,
            command: RecordedCommand::CopyBuffer { src: s.id, dst: d.id, size },
        });
    }

    fn pipeline_barrier_texture(
        &mut self,
        texture: &dyn Texture,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) {
        lock(&self.ops).push(Op::Record(RecordedCommand::TextureBarrier {
            texture: texture.id(),
            old_layout,
            new_layout,
        }));
    }

    fn finish(self: Box<Self>) -> Result<Box<dyn CommandBuffer>, String> {
        let ops = std::mem::take(&mut *lock(&self.ops));
        log::trace!("headless: encoder {:?} finished with {} ops", self.label, ops.len());
        Ok(Box::new(HeadlessCommandBuffer { ops }))
    }
}

#[derive(Debug)]
pub struct HeadlessRenderPass {
    ops: Arc<Mutex<Vec<Op>>>,
    color_formats: Vec<TextureFormat>,
    depth_format: Option<TextureFormat>,
}

impl HeadlessRenderPass {
    fn record(&self, command: RecordedCommand) {
        lock(&self.ops).push(Op::Record(command));
    }
}

impl RenderPass for HeadlessRenderPass {
    fn set_pipeline(&mut self, pipeline: &dyn GraphicsPipeline) {
        let compatible = pipeline
            .as_any()
            .downcast_ref::<HeadlessPipeline>()
            .map(|p| p.matches(&self.color_formats, self.depth_format))
            .unwrap_or(false);
        self.record(RecordedCommand::SetPipeline { label: pipeline.label(), compatible });
    }

    fn bind_descriptor_set(&mut self, set_index: u32, set: &dyn DescriptorSet) {
        let Some(set) = set.as_any().downcast_ref::<HeadlessDescriptorSet>() else {
            log::error!("headless: foreign descriptor set ignored");
            return;
        };
        let complete = set.is_complete();
        if !complete {
            log::warn!("headless: descriptor set {} bound before all bindings were written", set_index);
        }
        self.record(RecordedCommand::BindDescriptorSet {
            set_index,
            complete,
            buffers: set.buffers.values().copied().collect(),
            textures: set.textures.values().copied().collect(),
        });
    }

    fn set_vertex_buffer(&mut self, index: u32, buffer: &dyn Buffer, _offset: u64) {
        self.record(RecordedCommand::SetVertexBuffer { index, buffer: buffer.id() });
    }

    fn set_index_buffer(&mut self, buffer: &dyn Buffer, _offset: u64, _index_format: IndexFormat) {
        self.record(RecordedCommand::SetIndexBuffer { buffer: buffer.id() });
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.record(RecordedCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.record(RecordedCommand::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
    }

    fn end(self: Box<Self>) {
        self.record(RecordedCommand::EndRenderPass);
    }
}

#[derive(Debug)]
pub struct HeadlessCommandBuffer {
    ops: Vec<Op>,
}

impl CommandBuffer for HeadlessCommandBuffer {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct HeadlessFence {
    signaled: Arc<AtomicBool>,
}

impl Fence for HeadlessFence {
    fn wait(&self, _timeout_ns: u64) -> Result<(), String> {
        if self.signaled.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err("fence wait timed out: no submission signals this fence".to_string())
        }
    }
    fn reset(&self) -> Result<(), String> {
        self.signaled.store(false, Ordering::Release);
        Ok(())
    }
    fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Swapchain over plain textures. Present only validates the image layout and logs the
/// present; images rotate round-robin.
#[derive(Debug)]
pub struct HeadlessSwapchain {
    state: Arc<Mutex<DeviceState>>,
    next_id: Arc<AtomicU64>,
    images: Vec<Arc<HeadlessTexture>>,
    image_count: u32,
    extent: (u32, u32),
    format: TextureFormat,
    next_image: u32,
}

impl HeadlessSwapchain {
    fn recreate_images(&mut self) {
        self.images = (0..self.image_count)
            .map(|_| {
                Arc::new(HeadlessTexture {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    format: self.format,
                    size: (self.extent.0, self.extent.1, 1),
                    dimension: TextureDimension::D2,
                    usage: TextureUsage::RENDER_ATTACHMENT,
                })
            })
            .collect();
        self.next_image = 0;
    }
}

impl Swapchain for HeadlessSwapchain {
    fn acquire_next_image(&mut self) -> Result<SwapchainFrame, String> {
        let image_index = self.next_image;
        let texture = self
            .images
            .get(image_index as usize)
            .cloned()
            .ok_or("swapchain has no images")?;
        self.next_image = (self.next_image + 1) % self.image_count;
        Ok(SwapchainFrame { image_index, texture })
    }

    fn present(&mut self, image_index: u32) -> Result<(), String> {
        let image = self
            .images
            .get(image_index as usize)
            .ok_or_else(|| format!("present: no swapchain image {}", image_index))?;
        let mut state = lock(&self.state);
        state.expect_layout(image.id, ImageLayout::PresentSrc, "present source");
        state.stats.presents += 1;
        state.commands.push(RecordedCommand::Present { image_index, texture: image.id });
        Ok(())
    }

    fn resize(&mut self, extent: (u32, u32)) -> Result<(), String> {
        if extent.0 == 0 || extent.1 == 0 {
            return Err(format!("swapchain resize to zero extent {:?}", extent));
        }
        self.extent = extent;
        self.recreate_images();
        Ok(())
    }

    fn extent(&self) -> (u32, u32) {
        self.extent
    }

    fn image_count(&self) -> u32 {
        self.image_count
    }

    fn format(&self) -> TextureFormat {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Attachment, ClearColor, FrameBuffer, PrimitiveTopology, RasterizationState, RenderPassLayout,
        ShaderStage, ShaderStages, VertexInputDescriptor,
    };

    fn texture(device: &HeadlessDevice, format: TextureFormat, size: (u32, u32)) -> Arc<dyn Texture> {
        Arc::from(
            device
                .create_texture(&TextureDescriptor {
                    label: Some("test"),
                    size: (size.0, size.1, 1),
                    format,
                    usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
                    dimension: TextureDimension::D2,
                })
                .unwrap(),
        )
    }

    fn pipeline(device: &HeadlessDevice, color: TextureFormat) -> Box<dyn GraphicsPipeline> {
        device
            .create_graphics_pipeline(&GraphicsPipelineDescriptor {
                label: Some("test_pipeline"),
                vertex_shader: ShaderStage { source: vec![0; 8], entry_point: "vs".into() },
                fragment_shader: Some(ShaderStage { source: vec![0; 8], entry_point: "fs".into() }),
                vertex_input: VertexInputDescriptor::default(),
                primitive_topology: PrimitiveTopology::TriangleList,
                rasterization: RasterizationState::default(),
                color_targets: vec![ColorTargetState { format: color, blend: None }],
                depth_stencil: None,
                set_layouts: Vec::new(),
            })
            .unwrap()
    }

    #[test]
    fn copy_executes_on_submit() {
        let device = HeadlessDevice::new();
        let desc = BufferDescriptor {
            label: Some("copy"),
            size: 8,
            usage: BufferUsage::COPY_SRC | BufferUsage::COPY_DST,
            memory: BufferMemoryPreference::HostVisible,
        };
        let src = device.create_buffer(&desc).unwrap();
        let dst = device.create_buffer(&desc).unwrap();
        device.write_buffer(src.as_ref(), 0, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let mut encoder = device.create_command_encoder(None).unwrap();
        encoder.copy_buffer_to_buffer(src.as_ref(), 0, dst.as_ref(), 4, 4);
        assert_eq!(device.buffer_contents(dst.as_ref()).unwrap(), vec![0; 8]);
        device.submit(vec![encoder.finish().unwrap()], None).unwrap();
        assert_eq!(device.buffer_contents(dst.as_ref()).unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
        assert_eq!(device.stats().copies, 1);
    }

    #[test]
    fn write_out_of_range_fails() {
        let device = HeadlessDevice::new();
        let buffer = device
            .create_buffer(&BufferDescriptor {
                size: 4,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                ..Default::default()
            })
            .unwrap();
        assert!(device.write_buffer(buffer.as_ref(), 2, &[0; 4]).is_err());
    }

    #[test]
    fn render_pass_validates_layouts_and_pipelines() {
        let device = HeadlessDevice::new();
        let color = texture(&device, TextureFormat::Rgba8Unorm, (4, 4));
        let fb = FrameBuffer::new(vec![Attachment::new(color.clone())], None).unwrap();
        let good = pipeline(&device, TextureFormat::Rgba8Unorm);
        let bad = pipeline(&device, TextureFormat::Rgba16Float);

        let mut encoder = device.create_command_encoder(Some("frame")).unwrap();
        // Missing barrier: texture is still Undefined.
        let mut pass = encoder
            .begin_render_pass(fb.pass_descriptor(None, LoadOp::Clear, ClearColor::BLACK, LoadOp::Clear))
            .unwrap();
        pass.set_pipeline(good.as_ref());
        pass.set_pipeline(bad.as_ref());
        pass.draw(3, 1, 0, 0);
        pass.draw(0, 1, 0, 0);
        pass.end();
        device.submit(vec![encoder.finish().unwrap()], None).unwrap();

        let stats = device.stats();
        assert_eq!(stats.layout_violations, 1);
        assert_eq!(stats.incompatible_pipelines, 1);
        assert_eq!(stats.draw_calls, 2);
        assert_eq!(stats.zero_count_draws, 1);
        assert!(RenderPassLayout::from_frame_buffer(&fb).is_compatible(&fb));
    }

    #[test]
    fn barrier_with_wrong_old_layout_is_a_violation() {
        let device = HeadlessDevice::new();
        let color = texture(&device, TextureFormat::Rgba8Unorm, (4, 4));
        let mut encoder = device.create_command_encoder(None).unwrap();
        encoder.pipeline_barrier_texture(color.as_ref(), ImageLayout::Undefined, ImageLayout::ColorAttachment);
        encoder.pipeline_barrier_texture(color.as_ref(), ImageLayout::ShaderReadOnly, ImageLayout::ColorAttachment);
        device.submit(vec![encoder.finish().unwrap()], None).unwrap();
        assert_eq!(device.stats().layout_violations, 1);
        assert_eq!(device.texture_layout(color.id()), ImageLayout::ColorAttachment);
    }

    #[test]
    fn descriptor_set_checks_types() {
        let device = HeadlessDevice::new();
        let layout = device
            .create_descriptor_set_layout(&[
                DescriptorSetLayoutBinding::new(0, DescriptorType::UniformBuffer, ShaderStages::VERTEX),
                DescriptorSetLayoutBinding::new(1, DescriptorType::SampledImage, ShaderStages::FRAGMENT),
            ])
            .unwrap();
        let pool = device.create_descriptor_pool(1).unwrap();
        let mut set = pool.allocate_set(layout.as_ref()).unwrap();
        assert!(pool.allocate_set(layout.as_ref()).is_err());
        let storage = device
            .create_buffer(&BufferDescriptor { size: 64, usage: BufferUsage::STORAGE, ..Default::default() })
            .unwrap();
        assert!(set.write_buffer(0, storage.as_ref(), 0, 64).is_err());
        let tex = texture(&device, TextureFormat::Rgba8Unorm, (1, 1));
        assert!(set.write_texture(0, tex.as_ref()).is_err());
        assert!(set.write_texture(1, tex.as_ref()).is_ok());
    }

    #[test]
    fn fence_signals_on_submit() {
        let device = HeadlessDevice::new();
        let fence = device.create_fence(false).unwrap();
        assert!(fence.wait(0).is_err());
        let encoder = device.create_command_encoder(None).unwrap();
        device.submit(vec![encoder.finish().unwrap()], Some(fence.as_ref())).unwrap();
        assert!(fence.wait(u64::MAX).is_ok());
        fence.reset().unwrap();
        assert!(!fence.is_signaled());
    }

    #[test]
    fn deferred_fences_signal_on_complete() {
        let device = HeadlessDevice::with_deferred_completion();
        let first = device.create_fence(false).unwrap();
        let second = device.create_fence(false).unwrap();
        for fence in [&first, &second] {
            let encoder = device.create_command_encoder(None).unwrap();
            device.submit(vec![encoder.finish().unwrap()], Some(fence.as_ref())).unwrap();
        }
        assert_eq!(device.stats().submissions, 2);
        assert_eq!(device.in_flight(), 2);
        assert!(first.wait(0).is_err());
        assert!(!second.is_signaled());

        assert_eq!(device.complete(), 2);
        assert!(first.wait(u64::MAX).is_ok());
        assert!(second.is_signaled());
        assert_eq!(device.in_flight(), 0);
        assert_eq!(device.complete(), 0);
    }

    #[test]
    fn wait_idle_completes_deferred_work() {
        let device = HeadlessDevice::with_deferred_completion();
        let fence = device.create_fence(false).unwrap();
        let encoder = device.create_command_encoder(None).unwrap();
        device.submit(vec![encoder.finish().unwrap()], Some(fence.as_ref())).unwrap();
        assert!(!fence.is_signaled());
        device.wait_idle().unwrap();
        assert!(fence.is_signaled());
    }

    #[test]
    fn barrier_from_undefined_after_upload_is_flagged() {
        let device = HeadlessDevice::new();
        let uploaded = texture(&device, TextureFormat::Rgba8Unorm, (2, 2));
        let tracked = texture(&device, TextureFormat::Rgba8Unorm, (2, 2));
        device.write_texture(uploaded.as_ref(), 0, &[0; 16]).unwrap();
        device.write_texture(tracked.as_ref(), 0, &[0; 16]).unwrap();
        let mut encoder = device.create_command_encoder(None).unwrap();
        encoder.pipeline_barrier_texture(uploaded.as_ref(), ImageLayout::Undefined, ImageLayout::ShaderReadOnly);
        encoder.pipeline_barrier_texture(uploaded.as_ref(), ImageLayout::Undefined, ImageLayout::ShaderReadOnly);
        encoder.pipeline_barrier_texture(tracked.as_ref(), ImageLayout::ShaderReadOnly, ImageLayout::ColorAttachment);
        device.submit(vec![encoder.finish().unwrap()], None).unwrap();
        let stats = device.stats();
        assert_eq!(stats.discarded_uploads, 1);
        assert_eq!(stats.texture_writes, 2);
        assert_eq!(stats.layout_violations, 0);
    }

    #[test]
    fn swapchain_present_requires_present_layout() {
        let device = HeadlessDevice::new();
        let mut swapchain = device.create_swapchain((8, 8), 2, TextureFormat::Bgra8Unorm).unwrap();
        let frame = swapchain.acquire_next_image().unwrap();
        assert_eq!(frame.image_index, 0);
        swapchain.present(frame.image_index).unwrap();
        assert_eq!(device.stats().layout_violations, 1);

        let frame = swapchain.acquire_next_image().unwrap();
        assert_eq!(frame.image_index, 1);
        let mut encoder = device.create_command_encoder(None).unwrap();
        encoder.pipeline_barrier_texture(frame.texture.as_ref(), ImageLayout::Undefined, ImageLayout::PresentSrc);
        device.submit(vec![encoder.finish().unwrap()], None).unwrap();
        swapchain.present(frame.image_index).unwrap();
        let stats = device.stats();
        assert_eq!(stats.layout_violations, 1);
        assert_eq!(stats.presents, 2);
    }

    #[test]
    fn frame_buffer_rejects_mismatched_extent() {
        let device = HeadlessDevice::new();
        let a = texture(&device, TextureFormat::Rgba8Unorm, (4, 4));
        let b = texture(&device, TextureFormat::Rgba8Unorm, (8, 4));
        let depth = texture(&device, TextureFormat::D32Float, (4, 4));
        assert!(FrameBuffer::new(vec![Attachment::new(a.clone()), Attachment::new(b)], None).is_err());
        assert!(FrameBuffer::new(vec![Attachment::new(depth.clone())], None).is_err());
        assert!(FrameBuffer::new(vec![], Some(Attachment::new(a.clone()))).is_err());
        let fb = FrameBuffer::new(vec![Attachment::new(a)], Some(Attachment::new(depth))).unwrap();
        assert_eq!(fb.attachment_count(), 2);
        assert_eq!(fb.depth_format(), Some(TextureFormat::D32Float));
    }
}
