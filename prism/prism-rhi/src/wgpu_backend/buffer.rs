//! wgpu Buffer implementation.

use crate::{Buffer, BufferDescriptor, BufferMemoryPreference, BufferUsage, ResourceId};
use std::sync::Arc;

pub struct WgpuBuffer {
    buffer: Arc<wgpu::Buffer>,
    size: u64,
    usage: BufferUsage,
    id: ResourceId,
    host_visible: bool,
}

impl WgpuBuffer {
    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub(crate) fn shared(&self) -> Arc<wgpu::Buffer> {
        self.buffer.clone()
    }
}

impl std::fmt::Debug for WgpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBuffer")
            .field("id", &self.id)
            .field("size", &self.size)
            .finish()
    }
}

impl Buffer for WgpuBuffer {
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
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn usage_to_wgpu(usage: BufferUsage) -> wgpu::BufferUsages {
    let mut out = wgpu::BufferUsages::empty();
    if usage.contains(BufferUsage::VERTEX) {
        out |= wgpu::BufferUsages::VERTEX;
    }
    if usage.contains(BufferUsage::INDEX) {
        out |= wgpu::BufferUsages::INDEX;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        out |= wgpu::BufferUsages::UNIFORM;
    }
    if usage.contains(BufferUsage::STORAGE) {
        out |= wgpu::BufferUsages::STORAGE;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        out |= wgpu::BufferUsages::COPY_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        out |= wgpu::BufferUsages::COPY_DST;
    }
    out
}

pub(super) fn create_buffer(
    device: &wgpu::Device,
    id: ResourceId,
    desc: &BufferDescriptor,
) -> Result<WgpuBuffer, String> {
    if desc.size == 0 {
        return Err(format!("buffer {:?}: size must be non-zero", desc.label));
    }
    // Queue writes and copies work on 4-byte granularity.
    let size = desc.size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
    // Device::write_buffer uses Queue::write_buffer.
    let usage = usage_to_wgpu(desc.usage) | wgpu::BufferUsages::COPY_DST;
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: desc.label,
        size,
        usage,
        mapped_at_creation: false,
    });
    Ok(WgpuBuffer {
        buffer: Arc::new(buffer),
        size: desc.size,
        usage: desc.usage,
        id,
        host_visible: desc.memory == BufferMemoryPreference::HostVisible,
    })
}
