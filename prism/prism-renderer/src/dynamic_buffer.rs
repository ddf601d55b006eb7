//! Growable GPU buffer of fixed-stride elements.

use crate::error::{RenderError, Result};
use prism_rhi::{Buffer, BufferDescriptor, BufferMemoryPreference, BufferUsage, Device, ResourceId};

/// Outcome of [`DynamicBuffer::ensure_capacity`]. On `Grown` the buffer was replaced and
/// every descriptor referring to it must be rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    Unchanged,
    Grown { old_capacity: usize, new_capacity: usize },
}

impl Growth {
    pub fn grown(self) -> bool {
        matches!(self, Growth::Grown { .. })
    }
}

/// Smallest power-of-two multiple of `current` (0 counts as 1) that holds `required`.
pub fn next_capacity(current: usize, required: usize) -> usize {
    let mut capacity = current.max(1);
    while capacity < required {
        capacity *= 2;
    }
    capacity
}

/// A GPU buffer holding `capacity` elements of `stride` bytes.
#[derive(Debug)]
pub struct DynamicBuffer {
    buffer: Box<dyn Buffer>,
    label: Option<&'static str>,
    stride: u64,
    capacity: usize,
    usage: BufferUsage,
    memory: BufferMemoryPreference,
}

impl DynamicBuffer {
    pub fn new(
        device: &dyn Device,
        label: Option<&'static str>,
        stride: u64,
        capacity: usize,
        usage: BufferUsage,
    ) -> Result<Self> {
        Self::with_memory(device, label, stride, capacity, usage, BufferMemoryPreference::HostVisible)
    }

    pub fn with_memory(
        device: &dyn Device,
        label: Option<&'static str>,
        stride: u64,
        capacity: usize,
        usage: BufferUsage,
        memory: BufferMemoryPreference,
    ) -> Result<Self> {
        if stride == 0 {
            return Err(RenderError::Gpu(format!("dynamic buffer {:?}: zero stride", label)));
        }
        let capacity = capacity.max(1);
        let usage = usage | BufferUsage::COPY_SRC | BufferUsage::COPY_DST;
        let buffer = device.create_buffer(&BufferDescriptor {
            label,
            size: stride * capacity as u64,
            usage,
            memory,
        })?;
        Ok(Self { buffer, label, stride, capacity, usage, memory })
    }

    pub fn buffer(&self) -> &dyn Buffer {
        self.buffer.as_ref()
    }

    pub fn id(&self) -> ResourceId {
        self.buffer.id()
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size in bytes of the whole buffer.
    pub fn byte_size(&self) -> u64 {
        self.stride * self.capacity as u64
    }

    /// Make room for `required` elements. Grows by doubling, copies the old contents to the
    /// start of the new buffer and waits for the device before dropping the old one.
    pub fn ensure_capacity(&mut self, device: &dyn Device, required: usize) -> Result<Growth> {
        if self.capacity >= required {
            return Ok(Growth::Unchanged);
        }
        let old_capacity = self.capacity;
        let new_capacity = next_capacity(old_capacity, required);
        let replacement = device.create_buffer(&BufferDescriptor {
            label: self.label,
            size: self.stride * new_capacity as u64,
            usage: self.usage,
            memory: self.memory,
        })?;

        let mut encoder = device.create_command_encoder(Some("dynamic_buffer_grow"))?;
        encoder.copy_buffer_to_buffer(self.buffer.as_ref(), 0, replacement.as_ref(), 0, self.byte_size());
        device.submit(vec![encoder.finish()?], None)?;
        device.wait_idle()?;

        log::debug!(
            "buffer {:?} grown {} -> {} elements ({} bytes)",
            self.label,
            old_capacity,
            new_capacity,
            self.stride * new_capacity as u64
        );
        self.buffer = replacement;
        self.capacity = new_capacity;
        Ok(Growth::Grown { old_capacity, new_capacity })
    }

    /// Upload `data` starting at element `first_element`.
    pub fn write<T: bytemuck::Pod>(&self, device: &dyn Device, first_element: usize, data: &[T]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if std::mem::size_of::<T>() as u64 != self.stride {
            return Err(RenderError::Gpu(format!(
                "buffer {:?}: element size {} does not match stride {}",
                self.label,
                std::mem::size_of::<T>(),
                self.stride
            )));
        }
        if first_element + data.len() > self.capacity {
            return Err(RenderError::Gpu(format!(
                "buffer {:?}: write of {} elements at {} exceeds capacity {}",
                self.label,
                data.len(),
                first_element,
                self.capacity
            )));
        }
        device.write_buffer(self.buffer.as_ref(), first_element as u64 * self.stride, bytemuck::cast_slice(data))?;
        Ok(())
    }
}
