//! Per-frame-slot resources. Each render system keeps one [`FrameSlot`] per frame in flight
//! in a [`FrameRing`]; the slot being recorded is selected by the ring's rotating index.

use crate::dynamic_buffer::DynamicBuffer;
use crate::error::{RenderError, Result};
use prism_rhi::{DescriptorSet, Texture};
use std::collections::HashMap;
use std::sync::Arc;

/// A resource stored under a string key in a [`FrameResourceTable`].
#[derive(Debug)]
pub enum FrameResource {
    Buffer(DynamicBuffer),
    Texture(Arc<dyn Texture>),
    DescriptorSet(Box<dyn DescriptorSet>),
}

impl FrameResource {
    fn kind(&self) -> &'static str {
        match self {
            FrameResource::Buffer(_) => "buffer",
            FrameResource::Texture(_) => "texture",
            FrameResource::DescriptorSet(_) => "descriptor set",
        }
    }
}

impl From<DynamicBuffer> for FrameResource {
    fn from(buffer: DynamicBuffer) -> Self {
        FrameResource::Buffer(buffer)
    }
}

impl From<Arc<dyn Texture>> for FrameResource {
    fn from(texture: Arc<dyn Texture>) -> Self {
        FrameResource::Texture(texture)
    }
}

impl From<Box<dyn DescriptorSet>> for FrameResource {
    fn from(set: Box<dyn DescriptorSet>) -> Self {
        FrameResource::DescriptorSet(set)
    }
}

/// String-keyed GPU resources of one frame slot.
#[derive(Debug, Default)]
pub struct FrameResourceTable {
    entries: HashMap<String, FrameResource>,
}

impl FrameResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `resource` under `key`, returning whatever was there before.
    pub fn set(&mut self, key: impl Into<String>, resource: impl Into<FrameResource>) -> Option<FrameResource> {
        self.entries.insert(key.into(), resource.into())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<FrameResource> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Result<&FrameResource> {
        self.entries
            .get(key)
            .ok_or_else(|| RenderError::MissingResource(key.to_string()))
    }

    fn get_mut(&mut self, key: &str) -> Result<&mut FrameResource> {
        self.entries
            .get_mut(key)
            .ok_or_else(|| RenderError::MissingResource(key.to_string()))
    }

    pub fn buffer(&self, key: &str) -> Result<&DynamicBuffer> {
        match self.get(key)? {
            FrameResource::Buffer(b) => Ok(b),
            other => Err(type_error(key, "buffer", other)),
        }
    }

    pub fn buffer_mut(&mut self, key: &str) -> Result<&mut DynamicBuffer> {
        match self.get_mut(key)? {
            FrameResource::Buffer(b) => Ok(b),
            other => Err(type_error(key, "buffer", other)),
        }
    }

    pub fn texture(&self, key: &str) -> Result<&Arc<dyn Texture>> {
        match self.get(key)? {
            FrameResource::Texture(t) => Ok(t),
            other => Err(type_error(key, "texture", other)),
        }
    }

    pub fn descriptor_set(&self, key: &str) -> Result<&dyn DescriptorSet> {
        match self.get(key)? {
            FrameResource::DescriptorSet(s) => Ok(s.as_ref()),
            other => Err(type_error(key, "descriptor set", other)),
        }
    }

    pub fn descriptor_set_mut(&mut self, key: &str) -> Result<&mut Box<dyn DescriptorSet>> {
        match self.get_mut(key)? {
            FrameResource::DescriptorSet(s) => Ok(s),
            other => Err(type_error(key, "descriptor set", other)),
        }
    }

    /// Point `binding` of the set under `set_key` at the whole buffer under `buffer_key`.
    pub fn bind_buffer(&mut self, set_key: &str, binding: u32, buffer_key: &str) -> Result<()> {
        let mut set = match self.entries.remove(set_key) {
            Some(FrameResource::DescriptorSet(set)) => set,
            Some(other) => {
                let error = type_error(set_key, "descriptor set", &other);
                self.entries.insert(set_key.to_string(), other);
                return Err(error);
            }
            None => return Err(RenderError::MissingResource(set_key.to_string())),
        };
        let result = self
            .buffer(buffer_key)
            .and_then(|buffer| Ok(set.write_buffer(binding, buffer.buffer(), 0, buffer.byte_size())?));
        self.entries.insert(set_key.to_string(), FrameResource::DescriptorSet(set));
        result
    }
}

fn type_error(key: &str, expected: &'static str, found: &FrameResource) -> RenderError {
    log::trace!("frame resource {} is a {}, wanted {}", key, found.kind(), expected);
    RenderError::ResourceType { key: key.to_string(), expected }
}

/// One system's state for one frame in flight: its GPU resources, CPU-side state `S`, and
/// whether `update` ran for the slot since its last render.
#[derive(Debug, Default)]
pub struct FrameSlot<S> {
    pub resources: FrameResourceTable,
    pub state: S,
    updated: bool,
}

impl<S> FrameSlot<S> {
    pub fn new(resources: FrameResourceTable, state: S) -> Self {
        Self { resources, state, updated: false }
    }

    pub fn is_updated(&self) -> bool {
        self.updated
    }
}

/// Fixed set of per-frame values selected by a rotating index.
#[derive(Debug)]
pub struct FrameRing<T> {
    slots: Vec<T>,
    index: usize,
}

impl<T> FrameRing<T> {
    /// Build `count` slots (at least one) with `make(slot_index)`.
    pub fn try_new(count: usize, mut make: impl FnMut(usize) -> Result<T>) -> Result<Self> {
        let slots = (0..count.max(1)).map(&mut make).collect::<Result<Vec<_>>>()?;
        Ok(Self { slots, index: 0 })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn current(&self) -> &T {
        &self.slots[self.index]
    }

    pub fn current_mut(&mut self) -> &mut T {
        &mut self.slots[self.index]
    }

    pub fn advance(&mut self) {
        self.index = (self.index + 1) % self.slots.len();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut()
    }
}

impl<S> FrameRing<FrameSlot<S>> {
    /// Record that the current slot's resources were refreshed by `update`.
    pub fn mark_updated(&mut self) {
        self.current_mut().updated = true;
    }

    /// The current slot for recording; fails when `update` did not run for it.
    pub fn updated_slot(&self, system: &'static str) -> Result<&FrameSlot<S>> {
        let slot = self.current();
        if !slot.updated {
            return Err(RenderError::NotUpdated { system, slot: self.index });
        }
        Ok(slot)
    }

    /// Close the current slot after a successful render and move to the next one.
    pub fn finish_render(&mut self) {
        self.current_mut().updated = false;
        self.advance();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_rhi::headless::HeadlessDevice;
    use prism_rhi::{BufferUsage, Device, TextureDescriptor};

    #[test]
    fn typed_getters_report_missing_and_mismatched_keys() {
        let device = HeadlessDevice::new();
        let mut table = FrameResourceTable::new();
        let buffer = DynamicBuffer::new(device.as_ref(), Some("b"), 4, 4, BufferUsage::UNIFORM).unwrap();
        table.set("params", buffer);
        let texture: Arc<dyn Texture> = Arc::from(device.create_texture(&TextureDescriptor::default()).unwrap());
        table.set("noise", texture);

        assert!(table.buffer("params").is_ok());
        assert!(table.texture("noise").is_ok());
        assert!(matches!(table.buffer("noise"), Err(RenderError::ResourceType { expected: "buffer", .. })));
        assert!(matches!(table.texture("absent"), Err(RenderError::MissingResource(_))));
        assert!(matches!(
            table.descriptor_set("params"),
            Err(RenderError::ResourceType { expected: "descriptor set", .. })
        ));
    }

    #[test]
    fn set_replaces_wholesale() {
        let device = HeadlessDevice::new();
        let mut table = FrameResourceTable::new();
        let first = DynamicBuffer::new(device.as_ref(), None, 4, 1, BufferUsage::VERTEX).unwrap();
        let first_id = first.id();
        table.set("v", first);
        let second = DynamicBuffer::new(device.as_ref(), None, 4, 1, BufferUsage::VERTEX).unwrap();
        let replaced = table.set("v", second);
        assert!(matches!(replaced, Some(FrameResource::Buffer(ref b)) if b.id() == first_id));
        assert_ne!(table.buffer("v").unwrap().id(), first_id);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn bind_buffer_writes_into_a_set_in_the_same_table() {
        use prism_rhi::{DescriptorSetLayoutBinding, DescriptorType, ShaderStages};
        let device = HeadlessDevice::new();
        let layout = device
            .create_descriptor_set_layout(&[DescriptorSetLayoutBinding::new(
                0,
                DescriptorType::StorageBuffer,
                ShaderStages::VERTEX,
            )])
            .unwrap();
        let pool = device.create_descriptor_pool(1).unwrap();
        let mut table = FrameResourceTable::new();
        table.set("set", pool.allocate_set(layout.as_ref()).unwrap());
        table.set("data", DynamicBuffer::new(device.as_ref(), None, 16, 4, BufferUsage::STORAGE).unwrap());

        table.bind_buffer("set", 0, "data").unwrap();
        assert!(table.descriptor_set("set").is_ok());
        assert!(matches!(table.bind_buffer("data", 0, "data"), Err(RenderError::ResourceType { .. })));
        assert!(table.buffer("data").is_ok());
        assert!(matches!(table.bind_buffer("set", 0, "absent"), Err(RenderError::MissingResource(_))));
        assert!(table.contains("set"));
    }

    #[test]
    fn ring_index_after_k_renders_is_k_mod_slots() {
        for slots in 1..=4usize {
            let mut ring = FrameRing::try_new(slots, |_| Ok(FrameSlot::<()>::default())).unwrap();
            for k in 0..11usize {
                assert_eq!(ring.index(), k % slots);
                ring.mark_updated();
                assert!(ring.updated_slot("test").is_ok());
                ring.finish_render();
            }
        }
    }

    #[test]
    fn render_without_update_is_rejected() {
        let mut ring = FrameRing::try_new(2, |_| Ok(FrameSlot::<u32>::default())).unwrap();
        ring.mark_updated();
        ring.finish_render();
        assert!(matches!(
            ring.updated_slot("lines"),
            Err(RenderError::NotUpdated { system: "lines", slot: 1 })
        ));
    }
}
