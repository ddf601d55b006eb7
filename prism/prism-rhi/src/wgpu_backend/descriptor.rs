//! wgpu Descriptor Set Layout, Pool, and Set.
//! A set records its bindings and (re)creates the wgpu bind group whenever a write completes
//! the layout, so rewriting one binding after a buffer swap yields a fresh bind group.

use super::{WgpuBuffer, WgpuSampler, WgpuTexture};
use crate::{
    Buffer, DescriptorPool, DescriptorSet, DescriptorSetLayout, DescriptorSetLayoutBinding,
    DescriptorType, Sampler, ShaderStages, Texture,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub struct WgpuDescriptorSetLayout {
    layout: Arc<wgpu::BindGroupLayout>,
    bindings: Vec<DescriptorSetLayoutBinding>,
}

impl WgpuDescriptorSetLayout {
    pub fn raw(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }
}

impl std::fmt::Debug for WgpuDescriptorSetLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuDescriptorSetLayout").finish()
    }
}

impl DescriptorSetLayout for WgpuDescriptorSetLayout {
    fn bindings(&self) -> &[DescriptorSetLayoutBinding] {
        &self.bindings
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn shader_stages_to_wgpu(stages: ShaderStages) -> wgpu::ShaderStages {
    let mut out = wgpu::ShaderStages::empty();
    if stages.contains(ShaderStages::VERTEX) {
        out |= wgpu::ShaderStages::VERTEX;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        out |= wgpu::ShaderStages::FRAGMENT;
    }
    out
}

fn binding_type_to_wgpu(ty: DescriptorType) -> wgpu::BindingType {
    let texture = |view_dimension| wgpu::BindingType::Texture {
        sample_type: wgpu::TextureSampleType::Float { filterable: true },
        view_dimension,
        multisampled: false,
    };
    match ty {
        DescriptorType::UniformBuffer => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        DescriptorType::StorageBuffer => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        DescriptorType::SampledImage => texture(wgpu::TextureViewDimension::D2),
        DescriptorType::SampledCubeImage => texture(wgpu::TextureViewDimension::Cube),
        DescriptorType::SampledCubeArrayImage => texture(wgpu::TextureViewDimension::CubeArray),
        DescriptorType::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
    }
}

pub(super) fn create_descriptor_set_layout(
    device: &wgpu::Device,
    bindings: &[DescriptorSetLayoutBinding],
) -> WgpuDescriptorSetLayout {
    let entries: Vec<wgpu::BindGroupLayoutEntry> = bindings
        .iter()
        .map(|b| wgpu::BindGroupLayoutEntry {
            binding: b.binding,
            visibility: shader_stages_to_wgpu(b.stages),
            ty: binding_type_to_wgpu(b.descriptor_type),
            count: None,
        })
        .collect();
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: None,
        entries: &entries,
    });
    WgpuDescriptorSetLayout { layout: Arc::new(layout), bindings: bindings.to_vec() }
}

pub struct WgpuDescriptorPool {
    device: Arc<wgpu::Device>,
    max_sets: u32,
    allocated: AtomicU32,
}

impl WgpuDescriptorPool {
    pub(super) fn new(device: Arc<wgpu::Device>, max_sets: u32) -> Self {
        Self { device, max_sets, allocated: AtomicU32::new(0) }
    }
}

impl std::fmt::Debug for WgpuDescriptorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuDescriptorPool").field("max_sets", &self.max_sets).finish()
    }
}

impl DescriptorPool for WgpuDescriptorPool {
    fn allocate_set(&self, layout: &dyn DescriptorSetLayout) -> Result<Box<dyn DescriptorSet>, String> {
        let layout = layout
            .as_any()
            .downcast_ref::<WgpuDescriptorSetLayout>()
            .ok_or("allocate_set: layout is not a WgpuDescriptorSetLayout")?;
        if self.allocated.fetch_add(1, Ordering::Relaxed) >= self.max_sets {
            return Err(format!("descriptor pool exhausted ({} sets)", self.max_sets));
        }
        Ok(Box::new(WgpuDescriptorSet {
            device: self.device.clone(),
            layout: layout.layout.clone(),
            bindings: layout.bindings.clone(),
            resources: BTreeMap::new(),
            bind_group: None,
        }))
    }
}

enum Bound {
    Buffer { buffer: Arc<wgpu::Buffer>, offset: u64, size: u64 },
    Texture(Arc<wgpu::TextureView>),
    Sampler(Arc<wgpu::Sampler>),
}

pub struct WgpuDescriptorSet {
    device: Arc<wgpu::Device>,
    layout: Arc<wgpu::BindGroupLayout>,
    bindings: Vec<DescriptorSetLayoutBinding>,
    resources: BTreeMap<u32, Bound>,
    bind_group: Option<wgpu::BindGroup>,
}

impl WgpuDescriptorSet {
    pub fn bind_group(&self) -> Option<&wgpu::BindGroup> {
        self.bind_group.as_ref()
    }

    fn binding_type(&self, binding: u32) -> Result<DescriptorType, String> {
        self.bindings
            .iter()
            .find(|b| b.binding == binding)
            .map(|b| b.descriptor_type)
            .ok_or_else(|| format!("descriptor set: no binding {} in layout", binding))
    }

    fn set(&mut self, binding: u32, bound: Bound) {
        self.resources.insert(binding, bound);
        if self.resources.len() < self.bindings.len() {
            return;
        }
        let entries: Vec<wgpu::BindGroupEntry> = self
            .resources
            .iter()
            .map(|(binding, bound)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: match bound {
                    Bound::Buffer { buffer, offset, size } => {
                        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer,
                            offset: *offset,
                            size: wgpu::BufferSize::new(*size),
                        })
                    }
                    Bound::Texture(view) => wgpu::BindingResource::TextureView(view),
                    Bound::Sampler(sampler) => wgpu::BindingResource::Sampler(sampler),
                },
            })
            .collect();
        self.bind_group = Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &self.layout,
            entries: &entries,
        }));
    }
}

impl std::fmt::Debug for WgpuDescriptorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuDescriptorSet")
            .field("bound", &self.resources.len())
            .field("complete", &self.bind_group.is_some())
            .finish()
    }
}

impl DescriptorSet for WgpuDescriptorSet {
    fn write_buffer(&mut self, binding: u32, buffer: &dyn Buffer, offset: u64, size: u64) -> Result<(), String> {
        match self.binding_type(binding)? {
            DescriptorType::UniformBuffer | DescriptorType::StorageBuffer => {}
            other => return Err(format!("binding {} is {:?}, not a buffer", binding, other)),
        }
        let b = buffer
            .as_any()
            .downcast_ref::<WgpuBuffer>()
            .ok_or("write_buffer: buffer is not a WgpuBuffer")?;
        self.set(binding, Bound::Buffer { buffer: b.shared(), offset, size });
        Ok(())
    }

    fn write_texture(&mut self, binding: u32, texture: &dyn Texture) -> Result<(), String> {
        match self.binding_type(binding)? {
            DescriptorType::SampledImage
            | DescriptorType::SampledCubeImage
            | DescriptorType::SampledCubeArrayImage => {}
            other => return Err(format!("binding {} is {:?}, not a texture", binding, other)),
        }
        let t = texture
            .as_any()
            .downcast_ref::<WgpuTexture>()
            .ok_or("write_texture: texture is not a WgpuTexture")?;
        self.set(binding, Bound::Texture(t.sample_view()));
        Ok(())
    }

    fn write_sampler(&mut self, binding: u32, sampler: &dyn Sampler) -> Result<(), String> {
        if self.binding_type(binding)? != DescriptorType::Sampler {
            return Err(format!("binding {} is not a sampler", binding));
        }
        let s = sampler
            .as_any()
            .downcast_ref::<WgpuSampler>()
            .ok_or("write_sampler: sampler is not a WgpuSampler")?;
        self.set(binding, Bound::Sampler(s.shared()));
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
