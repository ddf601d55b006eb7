//! Prism RHI: backend-agnostic Rendering Hardware Interface.
//! This crate defines the traits and types the renderer records against, plus two backends:
//! [`wgpu_backend`] (Vulkan / D3D12 / Metal through wgpu) and [`headless`] (CPU memory,
//! command recording and validation, used by tests and offline tools).

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

pub mod headless;

#[cfg(feature = "wgpu")]
pub mod wgpu_backend;

/// Unique identifier for a GPU resource.
pub type ResourceId = u64;

bitflags::bitflags! {
    /// Buffer usage flags; combine for buffers used in multiple ways (e.g. Vertex | CopyDst).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const COPY_SRC = 1 << 4;
        const COPY_DST = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    R16Float,
    R32Float,
    Rgba16Float,
    Rgba32Float,
    D32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::D32Float)
    }

    pub fn is_srgb(&self) -> bool {
        matches!(self, TextureFormat::Rgba8UnormSrgb | TextureFormat::Bgra8UnormSrgb)
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::R16Float => 2,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::R32Float
            | TextureFormat::D32Float => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

/// Texture dimension / type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum TextureDimension {
    #[default]
    D2,
    D2Array,
    /// Six layers.
    Cube,
    /// A multiple of six layers.
    CubeArray,
}

/// The core device trait that all backends must implement.
pub trait Device: Send + Sync + Debug {
    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<Box<dyn Buffer>, String>;
    fn create_texture(&self, desc: &TextureDescriptor) -> Result<Box<dyn Texture>, String>;
    fn create_sampler(&self, desc: &SamplerDescriptor) -> Result<Box<dyn Sampler>, String>;
    /// Create a graphics pipeline. The pipeline is only valid inside render passes whose
    /// attachments match `color_targets` and `depth_stencil` (same count, same formats,
    /// same depth presence); see [`RenderPassLayout`].
    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor,
    ) -> Result<Box<dyn GraphicsPipeline>, String>;
    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorSetLayoutBinding],
    ) -> Result<Arc<dyn DescriptorSetLayout>, String>;
    fn create_descriptor_pool(&self, max_sets: u32) -> Result<Box<dyn DescriptorPool>, String>;

    /// Create a command encoder for recording GPU commands.
    fn create_command_encoder(
        &self,
        label: Option<&'static str>,
    ) -> Result<Box<dyn CommandEncoder>, String>;

    /// Submit command buffers to the graphics queue. Does not block. When `signal_fence` is
    /// provided it is signaled once the submitted work has completed.
    fn submit(
        &self,
        command_buffers: Vec<Box<dyn CommandBuffer>>,
        signal_fence: Option<&dyn Fence>,
    ) -> Result<(), String>;

    /// Write data into a buffer (CPU to GPU). The buffer needs `BufferUsage::COPY_DST`.
    fn write_buffer(&self, buffer: &dyn Buffer, offset: u64, data: &[u8]) -> Result<(), String>;

    /// Upload one full array layer (mip 0) of a texture. After this call the texture is
    /// in [`ImageLayout::ShaderReadOnly`].
    fn write_texture(&self, texture: &dyn Texture, layer: u32, data: &[u8]) -> Result<(), String>;

    /// Wait for the device to become idle (all submitted work finished).
    fn wait_idle(&self) -> Result<(), String>;

    /// Create a fence for CPU-GPU synchronization.
    fn create_fence(&self, signaled: bool) -> Result<Box<dyn Fence>, String>;
}

/// Fence: CPU can wait for GPU to complete submitted work.
pub trait Fence: Send + Sync + Debug {
    fn wait(&self, timeout_ns: u64) -> Result<(), String>;
    fn reset(&self) -> Result<(), String>;
    fn is_signaled(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
}

/// When true, buffer is mappable (host-visible) and write_buffer goes straight to memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum BufferMemoryPreference {
    #[default]
    HostVisible,
    DeviceLocal,
}

#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<&'static str>,
    pub size: u64,
    pub usage: BufferUsage,
    pub memory: BufferMemoryPreference,
}

impl Default for BufferDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            size: 0,
            usage: BufferUsage::VERTEX,
            memory: BufferMemoryPreference::HostVisible,
        }
    }
}

pub trait Buffer: Send + Sync + Debug {
    fn id(&self) -> ResourceId;
    fn size(&self) -> u64;
    fn usage(&self) -> BufferUsage;
    fn host_visible(&self) -> bool {
        true
    }
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<&'static str>,
    /// (width, height, array_layers). 2D: layers = 1. Cube: 6. CubeArray: 6 * cubes.
    pub size: (u32, u32, u32),
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub dimension: TextureDimension,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            size: (1, 1, 1),
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::empty(),
            dimension: TextureDimension::D2,
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct TextureUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const TEXTURE_BINDING = 1 << 2;
        const RENDER_ATTACHMENT = 1 << 3;
    }
}

pub trait Texture: Send + Sync + Debug {
    fn id(&self) -> ResourceId;
    fn format(&self) -> TextureFormat;
    fn size(&self) -> (u32, u32, u32);
    fn dimension(&self) -> TextureDimension;
    fn as_any(&self) -> &dyn Any;
}

/// Filter mode for sampler min/mag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

/// Address mode for sampler U/V/W.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
}

#[derive(Debug, Clone)]
pub struct SamplerDescriptor {
    pub label: Option<&'static str>,
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub address_mode: AddressMode,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            address_mode: AddressMode::ClampToEdge,
        }
    }
}

pub trait Sampler: Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
}

/// Graphics pipeline for rasterization (vertex + fragment).
pub trait GraphicsPipeline: Send + Sync + Debug {
    fn label(&self) -> Option<&'static str>;
    fn as_any(&self) -> &dyn Any;
}

/// Descriptor for creating a graphics pipeline.
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDescriptor {
    pub label: Option<&'static str>,
    pub vertex_shader: ShaderStage,
    pub fragment_shader: Option<ShaderStage>,
    pub vertex_input: VertexInputDescriptor,
    pub primitive_topology: PrimitiveTopology,
    pub rasterization: RasterizationState,
    pub color_targets: Vec<ColorTargetState>,
    pub depth_stencil: Option<DepthStencilState>,
    /// One layout per descriptor set index (set 0, set 1, ...).
    pub set_layouts: Vec<Arc<dyn DescriptorSetLayout>>,
}

#[derive(Debug, Clone)]
pub struct ShaderStage {
    /// SPIR-V binary (little-endian, 4-byte aligned).
    pub source: Vec<u8>,
    pub entry_point: String,
}

#[derive(Debug, Clone, Default)]
pub struct VertexInputDescriptor {
    pub attributes: Vec<VertexAttribute>,
    pub bindings: Vec<VertexBinding>,
}

#[derive(Debug, Clone)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

#[derive(Debug, Clone)]
pub struct VertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: VertexInputRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexInputRate {
    Vertex,
    Instance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VertexFormat {
    #[default]
    Float32x3,
    Float32x2,
    Float32x4,
    Uint32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    TriangleStrip,
    LineList,
}

#[derive(Debug, Clone, Default)]
pub struct RasterizationState {
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullMode {
    None,
    #[default]
    Back,
    Front,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

/// Color attachment state for a graphics pipeline.
#[derive(Debug, Clone)]
pub struct ColorTargetState {
    pub format: TextureFormat,
    pub blend: Option<BlendState>,
}

#[derive(Debug, Clone, Copy)]
pub struct BlendState {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

impl BlendState {
    pub const ALPHA: Self = Self {
        color: BlendComponent {
            src_factor: BlendFactor::SrcAlpha,
            dst_factor: BlendFactor::OneMinusSrcAlpha,
            operation: BlendOp::Add,
        },
        alpha: BlendComponent {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::OneMinusSrcAlpha,
            operation: BlendOp::Add,
        },
    };
}

#[derive(Debug, Clone, Copy)]
pub struct BlendComponent {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
    pub operation: BlendOp,
}

#[derive(Debug, Clone, Copy)]
pub enum BlendFactor {
    One,
    Zero,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Debug, Clone, Copy)]
pub enum BlendOp {
    Add,
    Subtract,
}

/// Depth attachment state for a graphics pipeline.
#[derive(Debug, Clone)]
pub struct DepthStencilState {
    pub format: TextureFormat,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

/// Render pass descriptor for begin_render_pass.
#[derive(Debug, Clone)]
pub struct RenderPassDescriptor<'a> {
    pub label: Option<&'static str>,
    pub color_attachments: Vec<ColorAttachment<'a>>,
    pub depth_stencil_attachment: Option<DepthStencilAttachment<'a>>,
}

#[derive(Debug, Clone)]
pub struct ColorAttachment<'a> {
    pub texture: &'a dyn Texture,
    /// Array layer rendered into (cube face index for cube targets).
    pub layer: u32,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_value: ClearColor,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl ClearColor {
    pub const TRANSPARENT: Self = Self { r: 0.0, g: 0.0, b: 0.0, a: 0.0 };
    pub const BLACK: Self = Self { r: 0.0, g: 0.0, b: 0.0, a: 1.0 };
    pub const WHITE: Self = Self { r: 1.0, g: 1.0, b: 1.0, a: 1.0 };
}

#[derive(Debug, Clone)]
pub struct DepthStencilAttachment<'a> {
    pub texture: &'a dyn Texture,
    pub layer: u32,
    pub depth_load_op: LoadOp,
    pub depth_store_op: StoreOp,
    pub clear_depth: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadOp {
    Load,
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Store,
    DontCare,
}

pub trait CommandEncoder: Debug {
    fn begin_render_pass<'a>(
        &mut self,
        desc: RenderPassDescriptor<'a>,
    ) -> Result<Box<dyn RenderPass>, String>;
    fn copy_buffer_to_buffer(
        &mut self,
        src: &dyn Buffer,
        src_offset: u64,
        dst: &dyn Buffer,
        dst_offset: u64,
        size: u64,
    );
    /// Insert a pipeline barrier for a layout transition of every layer of `texture`.
    fn pipeline_barrier_texture(
        &mut self,
        texture: &dyn Texture,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    );
    fn finish(self: Box<Self>) -> Result<Box<dyn CommandBuffer>, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    TransferDst,
    TransferSrc,
    ShaderReadOnly,
    ColorAttachment,
    DepthStencilAttachment,
    /// For swapchain images before present.
    PresentSrc,
}

/// Render pass for recording draw calls. Commands are recorded until [`RenderPass::end`].
pub trait RenderPass: Debug {
    fn set_pipeline(&mut self, pipeline: &dyn GraphicsPipeline);
    /// Bind a descriptor set for the currently bound graphics pipeline (set_index must match layout).
    fn bind_descriptor_set(&mut self, set_index: u32, set: &dyn DescriptorSet);
    fn set_vertex_buffer(&mut self, index: u32, buffer: &dyn Buffer, offset: u64);
    fn set_index_buffer(&mut self, buffer: &dyn Buffer, offset: u64, index_format: IndexFormat);
    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn end(self: Box<Self>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

/// Descriptor binding type for layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    UniformBuffer,
    /// Read-only storage buffer.
    StorageBuffer,
    /// Filterable float 2D texture.
    SampledImage,
    /// Filterable float cube texture.
    SampledCubeImage,
    /// Filterable float cube array texture.
    SampledCubeArrayImage,
    /// Filtering sampler.
    Sampler,
}

/// Descriptor set layout binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSetLayoutBinding {
    pub binding: u32,
    pub descriptor_type: DescriptorType,
    pub stages: ShaderStages,
}

impl DescriptorSetLayoutBinding {
    pub fn new(binding: u32, descriptor_type: DescriptorType, stages: ShaderStages) -> Self {
        Self { binding, descriptor_type, stages }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
    }
}

/// Descriptor set layout.
pub trait DescriptorSetLayout: Send + Sync + Debug {
    fn bindings(&self) -> &[DescriptorSetLayoutBinding];
    fn as_any(&self) -> &dyn Any;
}

/// Descriptor pool for allocating sets.
pub trait DescriptorPool: Send + Sync + Debug {
    fn allocate_set(&self, layout: &dyn DescriptorSetLayout) -> Result<Box<dyn DescriptorSet>, String>;
}

/// Descriptor set for binding resources. A set becomes bindable once every binding of its
/// layout has been written; rewriting a binding (e.g. after a buffer was replaced) takes
/// effect for the next bind.
pub trait DescriptorSet: Send + Sync + Debug {
    fn write_buffer(&mut self, binding: u32, buffer: &dyn Buffer, offset: u64, size: u64) -> Result<(), String>;
    fn write_texture(&mut self, binding: u32, texture: &dyn Texture) -> Result<(), String>;
    fn write_sampler(&mut self, binding: u32, sampler: &dyn Sampler) -> Result<(), String>;
    fn as_any(&self) -> &dyn Any;
}

pub trait CommandBuffer: Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
}

/// One swapchain image available for rendering this frame.
#[derive(Debug, Clone)]
pub struct SwapchainFrame {
    pub image_index: u32,
    pub texture: Arc<dyn Texture>,
}

/// Swapchain for presenting to a window. Acquire an image, render to it, then present.
pub trait Swapchain: Debug {
    fn acquire_next_image(&mut self) -> Result<SwapchainFrame, String>;
    /// Present the image acquired with `image_index`.
    fn present(&mut self, image_index: u32) -> Result<(), String>;
    /// Reconfigure for a new extent (window resize).
    fn resize(&mut self, extent: (u32, u32)) -> Result<(), String>;
    fn extent(&self) -> (u32, u32);
    fn image_count(&self) -> u32;
    /// Color format of swapchain images. Pipelines drawing into them must use this format.
    fn format(&self) -> TextureFormat;
}

/// A texture (layer) bound as a render pass attachment.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub texture: Arc<dyn Texture>,
    pub layer: u32,
}

impl Attachment {
    pub fn new(texture: Arc<dyn Texture>) -> Self {
        Self { texture, layer: 0 }
    }

    pub fn layer(texture: Arc<dyn Texture>, layer: u32) -> Self {
        Self { texture, layer }
    }
}

/// Set of attachments a render pass draws into. Validated at construction: all attachments
/// share one extent, color attachments use color formats, the depth attachment a depth format.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    color: Vec<Attachment>,
    depth: Option<Attachment>,
    extent: (u32, u32),
}

impl FrameBuffer {
    pub fn new(color: Vec<Attachment>, depth: Option<Attachment>) -> Result<Self, String> {
        let first = color
            .first()
            .or(depth.as_ref())
            .ok_or("FrameBuffer: at least one attachment is required")?;
        let (width, height, _) = first.texture.size();
        for attachment in color.iter().chain(depth.iter()) {
            let (w, h, layers) = attachment.texture.size();
            if (w, h) != (width, height) {
                return Err(format!(
                    "FrameBuffer: attachment extent {}x{} differs from {}x{}",
                    w, h, width, height
                ));
            }
            if attachment.layer >= layers {
                return Err(format!(
                    "FrameBuffer: layer {} out of range ({} layers)",
                    attachment.layer, layers
                ));
            }
        }
        if let Some(bad) = color.iter().find(|a| a.texture.format().is_depth()) {
            return Err(format!(
                "FrameBuffer: depth format {:?} used as color attachment",
                bad.texture.format()
            ));
        }
        if let Some(d) = &depth {
            if !d.texture.format().is_depth() {
                return Err(format!(
                    "FrameBuffer: color format {:?} used as depth attachment",
                    d.texture.format()
                ));
            }
        }
        Ok(Self { color, depth, extent: (width, height) })
    }

    pub fn color(&self) -> &[Attachment] {
        &self.color
    }

    pub fn depth(&self) -> Option<&Attachment> {
        self.depth.as_ref()
    }

    pub fn attachment_count(&self) -> usize {
        self.color.len() + usize::from(self.depth.is_some())
    }

    pub fn color_formats(&self) -> Vec<TextureFormat> {
        self.color.iter().map(|a| a.texture.format()).collect()
    }

    pub fn depth_format(&self) -> Option<TextureFormat> {
        self.depth.as_ref().map(|a| a.texture.format())
    }

    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }

    /// Same attachments with every color attachment moved to `layer` (cube face rendering).
    pub fn with_color_layer(&self, layer: u32) -> Result<Self, String> {
        let color = self
            .color
            .iter()
            .map(|a| Attachment::layer(a.texture.clone(), layer))
            .collect();
        Self::new(color, self.depth.clone())
    }

    /// Render pass descriptor over all attachments with uniform load behaviour.
    pub fn pass_descriptor(
        &self,
        label: Option<&'static str>,
        color_load: LoadOp,
        clear_color: ClearColor,
        depth_load: LoadOp,
    ) -> RenderPassDescriptor<'_> {
        RenderPassDescriptor {
            label,
            color_attachments: self
                .color
                .iter()
                .map(|a| ColorAttachment {
                    texture: a.texture.as_ref(),
                    layer: a.layer,
                    load_op: color_load,
                    store_op: StoreOp::Store,
                    clear_value: clear_color,
                })
                .collect(),
            depth_stencil_attachment: self.depth.as_ref().map(|a| DepthStencilAttachment {
                texture: a.texture.as_ref(),
                layer: a.layer,
                depth_load_op: depth_load,
                depth_store_op: StoreOp::Store,
                clear_depth: 1.0,
            }),
        }
    }
}

/// Attachment formats a pipeline was built for. Two passes are compatible when color count,
/// color formats, and depth presence/format all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderPassLayout {
    pub color_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
}

impl RenderPassLayout {
    pub fn new(color_formats: Vec<TextureFormat>, depth_format: Option<TextureFormat>) -> Self {
        Self { color_formats, depth_format }
    }

    pub fn from_frame_buffer(frame_buffer: &FrameBuffer) -> Self {
        Self {
            color_formats: frame_buffer.color_formats(),
            depth_format: frame_buffer.depth_format(),
        }
    }

    pub fn is_compatible(&self, frame_buffer: &FrameBuffer) -> bool {
        self.color_formats.len() == frame_buffer.color().len()
            && self
                .color_formats
                .iter()
                .zip(frame_buffer.color())
                .all(|(format, attachment)| *format == attachment.texture.format())
            && self.depth_format == frame_buffer.depth_format()
    }
}
