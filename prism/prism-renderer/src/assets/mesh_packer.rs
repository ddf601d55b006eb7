//! Packs every mesh into one shared set of structure-of-arrays vertex buffers plus one index
//! buffer. Indices are stored already offset by the mesh's first vertex, so draws use a
//! vertex offset of 0 and `first_index = start_index`.

use crate::config::CapacityConfig;
use crate::dynamic_buffer::DynamicBuffer;
use crate::error::Result;
use prism_rhi::{Buffer, BufferUsage, Device};
use scene_api::{MeshData, MeshId};
use std::collections::HashMap;

/// Where a packed mesh lives in the shared buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeshLocation {
    pub start_vertex: u32,
    pub start_index: u32,
    pub index_count: u32,
}

#[derive(Debug, Default)]
struct Staging {
    first_vertex: usize,
    first_index: usize,
    positions: Vec<[f32; 3]>,
    texcoords: Vec<[f32; 2]>,
    tangents: Vec<[f32; 3]>,
    normals: Vec<[f32; 3]>,
    indices: Vec<u32>,
}

#[derive(Debug)]
pub struct MeshPacker {
    positions: DynamicBuffer,
    texcoords: DynamicBuffer,
    tangents: DynamicBuffer,
    normals: DynamicBuffer,
    indices: DynamicBuffer,
    locations: HashMap<MeshId, MeshLocation>,
    vertex_count: usize,
    index_count: usize,
    staging: Option<Staging>,
}

/// `values` resized to `len`: missing entries are zero, extra entries are dropped.
fn fit<'a, T: Copy + Default>(
    values: &'a [T],
    len: usize,
    attribute: &'static str,
    mesh: MeshId,
) -> impl Iterator<Item = T> + 'a {
    if values.len() > len {
        log::warn!(
            "mesh {:?}: {} has {} entries for {} positions; extra entries dropped",
            mesh,
            attribute,
            values.len(),
            len
        );
    }
    values
        .iter()
        .copied()
        .chain(std::iter::repeat(T::default()))
        .take(len)
}

impl MeshPacker {
    pub fn new(device: &dyn Device, capacities: &CapacityConfig) -> Result<Self> {
        let vertices = capacities.mesh_vertices;
        Ok(Self {
            positions: DynamicBuffer::new(device, Some("mesh_positions"), 12, vertices, BufferUsage::VERTEX)?,
            texcoords: DynamicBuffer::new(device, Some("mesh_texcoords"), 8, vertices, BufferUsage::VERTEX)?,
            tangents: DynamicBuffer::new(device, Some("mesh_tangents"), 12, vertices, BufferUsage::VERTEX)?,
            normals: DynamicBuffer::new(device, Some("mesh_normals"), 12, vertices, BufferUsage::VERTEX)?,
            indices: DynamicBuffer::new(device, Some("mesh_indices"), 4, capacities.mesh_indices, BufferUsage::INDEX)?,
            locations: HashMap::new(),
            vertex_count: 0,
            index_count: 0,
            staging: None,
        })
    }

    /// Open a batch. `allocate` calls until [`MeshPacker::end_allocating`] are uploaded together.
    pub fn begin_allocating(&mut self) {
        if self.staging.is_some() {
            log::warn!("mesh packer: begin_allocating while a batch is open; continuing that batch");
            return;
        }
        self.staging = Some(Staging {
            first_vertex: self.vertex_count,
            first_index: self.index_count,
            ..Default::default()
        });
    }

    /// Stage `mesh` once per mesh identity and return its location. Opens a batch when none
    /// is open.
    pub fn allocate(&mut self, mesh: &MeshData) -> MeshLocation {
        if let Some(location) = self.locations.get(&mesh.id()) {
            return *location;
        }
        if self.staging.is_none() {
            self.begin_allocating();
        }
        let base = self.vertex_count as u32;
        let len = mesh.vertex_count();
        let location = MeshLocation {
            start_vertex: base,
            start_index: self.index_count as u32,
            index_count: mesh.index_count() as u32,
        };
        if mesh.indices.iter().any(|&i| i as usize >= len) {
            log::warn!("mesh {:?}: indices reference vertices beyond {}", mesh.id(), len);
        }

        let staging = self.staging.get_or_insert_with(Staging::default);
        staging.positions.extend_from_slice(&mesh.positions);
        staging.texcoords.extend(fit(&mesh.texcoords, len, "texcoords", mesh.id()));
        staging.tangents.extend(fit(&mesh.tangents, len, "tangents", mesh.id()));
        staging.normals.extend(fit(&mesh.normals, len, "normals", mesh.id()));
        staging.indices.extend(mesh.indices.iter().map(|&i| i + base));

        self.vertex_count += len;
        self.index_count += mesh.index_count();
        self.locations.insert(mesh.id(), location);
        location
    }

    /// Close the batch: one capacity check and one upload per buffer for everything staged.
    pub fn end_allocating(&mut self, device: &dyn Device) -> Result<()> {
        let Some(staging) = self.staging.take() else {
            return Ok(());
        };
        if staging.positions.is_empty() && staging.indices.is_empty() {
            return Ok(());
        }
        for buffer in [&mut self.positions, &mut self.texcoords, &mut self.tangents, &mut self.normals] {
            buffer.ensure_capacity(device, self.vertex_count)?;
        }
        self.indices.ensure_capacity(device, self.index_count)?;

        self.positions.write(device, staging.first_vertex, &staging.positions)?;
        self.texcoords.write(device, staging.first_vertex, &staging.texcoords)?;
        self.tangents.write(device, staging.first_vertex, &staging.tangents)?;
        self.normals.write(device, staging.first_vertex, &staging.normals)?;
        self.indices.write(device, staging.first_index, &staging.indices)?;
        log::debug!(
            "mesh packer: uploaded {} vertices, {} indices (totals {} / {})",
            staging.positions.len(),
            staging.indices.len(),
            self.vertex_count,
            self.index_count
        );
        Ok(())
    }

    pub fn location(&self, mesh: MeshId) -> Option<MeshLocation> {
        self.locations.get(&mesh).copied()
    }

    pub fn contains(&self, mesh: MeshId) -> bool {
        self.locations.contains_key(&mesh)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub fn index_count(&self) -> usize {
        self.index_count
    }

    pub fn positions(&self) -> &dyn Buffer {
        self.positions.buffer()
    }

    pub fn texcoords(&self) -> &dyn Buffer {
        self.texcoords.buffer()
    }

    pub fn tangents(&self) -> &dyn Buffer {
        self.tangents.buffer()
    }

    pub fn normals(&self) -> &dyn Buffer {
        self.normals.buffer()
    }

    pub fn indices(&self) -> &dyn Buffer {
        self.indices.buffer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_rhi::headless::HeadlessDevice;

    fn packer(device: &HeadlessDevice, vertices: usize, indices: usize) -> MeshPacker {
        let capacities = CapacityConfig { mesh_vertices: vertices, mesh_indices: indices, ..Default::default() };
        MeshPacker::new(device, &capacities).unwrap()
    }

    fn read<T: bytemuck::Pod>(device: &HeadlessDevice, buffer: &dyn Buffer, count: usize) -> Vec<T> {
        let bytes = device.buffer_contents(buffer).unwrap();
        bytemuck::cast_slice::<u8, T>(&bytes[..count * std::mem::size_of::<T>()]).to_vec()
    }

    fn quad() -> MeshData {
        MeshData::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]],
            vec![0, 1, 2, 0, 2, 3],
        )
        .with_texcoords(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]])
    }

    #[test]
    fn packing_a_quad_zero_fills_missing_attributes() {
        let device = HeadlessDevice::new();
        let mut packer = packer(&device, 16, 16);
        let mesh = quad();
        packer.begin_allocating();
        let location = packer.allocate(&mesh);
        packer.end_allocating(device.as_ref()).unwrap();

        assert_eq!(location, MeshLocation { start_vertex: 0, start_index: 0, index_count: 6 });
        assert_eq!(packer.vertex_count(), 4);
        assert_eq!(read::<[f32; 3]>(&device, packer.positions(), 4), mesh.positions);
        assert_eq!(read::<[f32; 2]>(&device, packer.texcoords(), 4), mesh.texcoords);
        assert_eq!(read::<[f32; 3]>(&device, packer.tangents(), 4), vec![[0.0; 3]; 4]);
        assert_eq!(read::<[f32; 3]>(&device, packer.normals(), 4), vec![[0.0; 3]; 4]);
        assert_eq!(read::<u32>(&device, packer.indices(), 6), vec![0, 1, 2, 0, 2, 3]);
    }

    #[test]
    fn allocation_is_idempotent_per_mesh() {
        let device = HeadlessDevice::new();
        let mut packer = packer(&device, 16, 16);
        let mesh = quad();
        packer.begin_allocating();
        let first = packer.allocate(&mesh);
        let again = packer.allocate(&mesh);
        packer.end_allocating(device.as_ref()).unwrap();
        packer.begin_allocating();
        let later = packer.allocate(&mesh);
        packer.end_allocating(device.as_ref()).unwrap();

        assert_eq!(first, again);
        assert_eq!(first, later);
        assert_eq!(packer.vertex_count(), 4);
        assert_eq!(packer.index_count(), 6);
    }

    #[test]
    fn edited_copy_of_a_mesh_is_packed_separately() {
        let device = HeadlessDevice::new();
        let mut packer = packer(&device, 16, 16);
        let triangle = MeshData::new(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]], vec![0, 1, 2]);
        let mut hexagon = triangle.clone();
        hexagon.positions = (0..6).map(|i| [i as f32, 0.0, 1.0]).collect();
        hexagon.indices = (0..6).collect();

        packer.begin_allocating();
        let first = packer.allocate(&triangle);
        let second = packer.allocate(&hexagon);
        packer.end_allocating(device.as_ref()).unwrap();

        assert_ne!(triangle.id(), hexagon.id());
        assert_eq!(second, MeshLocation { start_vertex: 3, start_index: 3, index_count: 6 });
        assert_ne!(first, second);
        assert_eq!(packer.vertex_count(), 9);
        assert_eq!(read::<[f32; 3]>(&device, packer.positions(), 9)[3..], hexagon.positions[..]);
        assert_eq!(read::<u32>(&device, packer.indices(), 9)[3..], [3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn second_mesh_indices_are_offset_and_batch_uploads_once() {
        let device = HeadlessDevice::new();
        let mut packer = packer(&device, 4, 6);
        let created = device.stats().buffers_created;

        packer.begin_allocating();
        packer.allocate(&quad());
        let second = packer.allocate(&quad());
        packer.end_allocating(device.as_ref()).unwrap();

        assert_eq!(second, MeshLocation { start_vertex: 4, start_index: 6, index_count: 6 });
        assert_eq!(read::<u32>(&device, packer.indices(), 12)[6..], [4, 5, 6, 4, 6, 7]);
        // Four vertex buffers and the index buffer each grew exactly once for the batch.
        assert_eq!(device.stats().buffers_created - created, 5);
    }

    #[test]
    fn longer_attributes_are_truncated() {
        let device = HeadlessDevice::new();
        let mut packer = packer(&device, 8, 8);
        let mesh = MeshData::new(vec![[1.0, 2.0, 3.0]], vec![0])
            .with_normals(vec![[0.0, 1.0, 0.0], [9.0, 9.0, 9.0]]);
        packer.allocate(&mesh);
        packer.end_allocating(device.as_ref()).unwrap();
        assert_eq!(read::<[f32; 3]>(&device, packer.normals(), 2), vec![[0.0, 1.0, 0.0], [0.0; 3]]);
    }
}
