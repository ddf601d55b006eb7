//! wgpu backend for Prism RHI (Vulkan, D3D12 and Metal through wgpu).
//! Implements Device, Buffer, Texture, GraphicsPipeline, CommandEncoder, Fence, Swapchain.

mod buffer;
mod descriptor;
mod encoder;
mod pipeline;
mod swapchain;
mod texture;

use crate::{
    AddressMode, Buffer, BufferDescriptor, CommandBuffer, CommandEncoder, DescriptorPool,
    DescriptorSetLayout, DescriptorSetLayoutBinding, Device, Fence, FilterMode, GraphicsPipeline,
    GraphicsPipelineDescriptor, ResourceId, Sampler, SamplerDescriptor, Texture,
    TextureDescriptor, TextureFormat,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub use buffer::WgpuBuffer;
pub use descriptor::{WgpuDescriptorPool, WgpuDescriptorSet, WgpuDescriptorSetLayout};
pub use encoder::{WgpuCommandBuffer, WgpuCommandEncoder, WgpuRenderPass};
pub use pipeline::WgpuGraphicsPipeline;
pub use swapchain::WgpuSwapchain;
pub use texture::{WgpuSampler, WgpuTexture};

pub(crate) fn texture_format_to_wgpu(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        TextureFormat::R16Float => wgpu::TextureFormat::R16Float,
        TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::D32Float => wgpu::TextureFormat::Depth32Float,
    }
}

pub(crate) fn texture_format_from_wgpu(format: wgpu::TextureFormat) -> Option<TextureFormat> {
    Some(match format {
        wgpu::TextureFormat::Rgba8Unorm => TextureFormat::Rgba8Unorm,
        wgpu::TextureFormat::Rgba8UnormSrgb => TextureFormat::Rgba8UnormSrgb,
        wgpu::TextureFormat::Bgra8Unorm => TextureFormat::Bgra8Unorm,
        wgpu::TextureFormat::Bgra8UnormSrgb => TextureFormat::Bgra8UnormSrgb,
        wgpu::TextureFormat::Rgba16Float => TextureFormat::Rgba16Float,
        _ => return None,
    })
}

fn address_mode_to_wgpu(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::Repeat => wgpu::AddressMode::Repeat,
        AddressMode::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
        AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
    }
}

fn filter_mode_to_wgpu(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuDevice").finish()
    }
}

impl WgpuDevice {
    /// Create a device without a presentation surface (offscreen rendering).
    pub fn new() -> Result<Arc<Self>, String> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let (device, queue) = pollster::block_on(Self::request_device(&instance, None))?;
        Ok(Arc::new(Self::from_parts(device, queue)))
    }

    /// Create a device together with a swapchain presenting to `target` (e.g. an
    /// `Arc<winit::window::Window>`).
    pub fn with_surface(
        target: impl Into<wgpu::SurfaceTarget<'static>>,
        extent: (u32, u32),
    ) -> Result<(Arc<Self>, WgpuSwapchain), String> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let surface = instance.create_surface(target).map_err(|e| e.to_string())?;
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .ok_or("No adapter")?;
        let (device, queue) = pollster::block_on(Self::open(&adapter))?;
        let this = Arc::new(Self::from_parts(device, queue));
        let swapchain = WgpuSwapchain::new(&this, surface, &adapter, extent)?;
        Ok((this, swapchain))
    }

    async fn request_device(
        instance: &wgpu::Instance,
        surface: Option<&wgpu::Surface<'_>>,
    ) -> Result<(wgpu::Device, wgpu::Queue), String> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: surface,
                force_fallback_adapter: false,
            })
            .await
            .ok_or("No adapter")?;
        Self::open(&adapter).await
    }

    async fn open(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue), String> {
        let info = adapter.get_info();
        log::info!("wgpu adapter: {} ({:?})", info.name, info.backend);
        adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("prism_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(|e| e.to_string())
    }

    fn from_parts(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub(crate) fn next_id(&self) -> ResourceId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn raw_device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn raw_queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

impl Device for WgpuDevice {
    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<Box<dyn Buffer>, String> {
        Ok(Box::new(buffer::create_buffer(&self.device, self.next_id(), desc)?))
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> Result<Box<dyn Texture>, String> {
        Ok(Box::new(texture::create_texture(&self.device, self.next_id(), desc)?))
    }

    fn create_sampler(&self, desc: &SamplerDescriptor) -> Result<Box<dyn Sampler>, String> {
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: desc.label,
            address_mode_u: address_mode_to_wgpu(desc.address_mode),
            address_mode_v: address_mode_to_wgpu(desc.address_mode),
            address_mode_w: address_mode_to_wgpu(desc.address_mode),
            mag_filter: filter_mode_to_wgpu(desc.mag_filter),
            min_filter: filter_mode_to_wgpu(desc.min_filter),
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        Ok(Box::new(WgpuSampler { sampler: Arc::new(sampler) }))
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor,
    ) -> Result<Box<dyn GraphicsPipeline>, String> {
        Ok(Box::new(pipeline::create_graphics_pipeline(&self.device, desc)?))
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorSetLayoutBinding],
    ) -> Result<Arc<dyn DescriptorSetLayout>, String> {
        Ok(Arc::new(descriptor::create_descriptor_set_layout(&self.device, bindings)))
    }

    fn create_descriptor_pool(&self, max_sets: u32) -> Result<Box<dyn DescriptorPool>, String> {
        Ok(Box::new(WgpuDescriptorPool::new(self.device.clone(), max_sets)))
    }

    fn create_command_encoder(
        &self,
        label: Option<&'static str>,
    ) -> Result<Box<dyn CommandEncoder>, String> {
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label });
        Ok(Box::new(WgpuCommandEncoder::new(encoder)))
    }

    fn submit(
        &self,
        command_buffers: Vec<Box<dyn CommandBuffer>>,
        signal_fence: Option<&dyn Fence>,
    ) -> Result<(), String> {
        let mut raw = Vec::with_capacity(command_buffers.len());
        for cb in &command_buffers {
            let cb = cb
                .as_any()
                .downcast_ref::<WgpuCommandBuffer>()
                .ok_or("submit: command buffer is not a WgpuCommandBuffer")?;
            raw.push(cb.take().ok_or("submit: command buffer already submitted")?);
        }
        self.queue.submit(raw);
        if let Some(fence) = signal_fence {
            let fence = fence
                .as_any()
                .downcast_ref::<WgpuFence>()
                .ok_or("submit: fence is not a WgpuFence")?;
            let signaled = fence.signaled.clone();
            self.queue
                .on_submitted_work_done(move || signaled.store(true, Ordering::Release));
        }
        Ok(())
    }

    fn write_buffer(&self, buffer: &dyn Buffer, offset: u64, data: &[u8]) -> Result<(), String> {
        let b = buffer
            .as_any()
            .downcast_ref::<WgpuBuffer>()
            .ok_or("write_buffer: buffer is not a WgpuBuffer")?;
        if offset + data.len() as u64 > b.size() {
            return Err(format!(
                "write_buffer: {} bytes at {} exceed buffer size {}",
                data.len(),
                offset,
                b.size()
            ));
        }
        self.queue.write_buffer(b.raw(), offset, data);
        Ok(())
    }

    fn write_texture(&self, texture: &dyn Texture, layer: u32, data: &[u8]) -> Result<(), String> {
        let t = texture
            .as_any()
            .downcast_ref::<WgpuTexture>()
            .ok_or("write_texture: texture is not a WgpuTexture")?;
        let raw = t.raw().ok_or("write_texture: swapchain images are not writable")?;
        let (width, height, layers) = t.size();
        if layer >= layers {
            return Err(format!("write_texture: layer {} out of range ({} layers)", layer, layers));
        }
        let bytes_per_row = width * t.format().bytes_per_pixel();
        if data.len() != (bytes_per_row * height) as usize {
            return Err(format!(
                "write_texture: {} bytes given, layer needs {}",
                data.len(),
                bytes_per_row * height
            ));
        }
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: raw,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), String> {
        self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> Result<Box<dyn Fence>, String> {
        Ok(Box::new(WgpuFence {
            device: self.device.clone(),
            signaled: Arc::new(AtomicBool::new(signaled)),
        }))
    }
}

/// Fence signaled from `Queue::on_submitted_work_done`; waiting polls the device.
pub struct WgpuFence {
    device: Arc<wgpu::Device>,
    signaled: Arc<AtomicBool>,
}

impl std::fmt::Debug for WgpuFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuFence")
            .field("signaled", &self.signaled.load(Ordering::Relaxed))
            .finish()
    }
}

impl Fence for WgpuFence {
    fn wait(&self, _timeout_ns: u64) -> Result<(), String> {
        if self.signaled.load(Ordering::Acquire) {
            return Ok(());
        }
        self.device.poll(wgpu::Maintain::Wait);
        if self.signaled.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err("fence wait: device idle but fence never signaled".to_string())
        }
    }

    fn reset(&self) -> Result<(), String> {
        self.signaled.store(false, Ordering::Release);
        Ok(())
    }

    fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
