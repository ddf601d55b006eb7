use crate::MeshId;
use std::f32::consts::PI;
use std::sync::Arc;

/// Vertex attribute arrays plus indices. Attribute arrays other than `positions` may be
/// empty or shorter than `positions`; the renderer zero-fills the missing tail.
///
/// Cloning yields a new mesh with its own [`MeshId`]. Share one mesh between shapes
/// through the `Arc` in [`TrianglesMesh`].
#[derive(Debug, PartialEq)]
pub struct MeshData {
    id: MeshId,
    pub positions: Vec<[f32; 3]>,
    pub texcoords: Vec<[f32; 2]>,
    pub tangents: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

impl Clone for MeshData {
    fn clone(&self) -> Self {
        Self {
            id: MeshId::next(),
            positions: self.positions.clone(),
            texcoords: self.texcoords.clone(),
            tangents: self.tangents.clone(),
            normals: self.normals.clone(),
            indices: self.indices.clone(),
        }
    }
}

impl MeshData {
    pub fn new(positions: Vec<[f32; 3]>, indices: Vec<u32>) -> Self {
        Self {
            id: MeshId::next(),
            positions,
            texcoords: Vec::new(),
            tangents: Vec::new(),
            normals: Vec::new(),
            indices,
        }
    }

    pub fn with_texcoords(mut self, texcoords: Vec<[f32; 2]>) -> Self {
        self.texcoords = texcoords;
        self
    }

    pub fn with_tangents(mut self, tangents: Vec<[f32; 3]>) -> Self {
        self.tangents = tangents;
        self
    }

    pub fn with_normals(mut self, normals: Vec<[f32; 3]>) -> Self {
        self.normals = normals;
        self
    }

    pub fn id(&self) -> MeshId {
        self.id
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Axis-aligned cube centred at the origin, 24 vertices with per-face normals.
    pub fn cube(half_extent: f32) -> Self {
        // (normal, tangent, bitangent)
        let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ];
        let mut positions = Vec::with_capacity(24);
        let mut texcoords = Vec::with_capacity(24);
        let mut tangents = Vec::with_capacity(24);
        let mut normals = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (n, t, b) in faces {
            let base = positions.len() as u32;
            for (u, v) in [(-1.0f32, -1.0f32), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                positions.push([
                    (n[0] + t[0] * u + b[0] * v) * half_extent,
                    (n[1] + t[1] * u + b[1] * v) * half_extent,
                    (n[2] + t[2] * u + b[2] * v) * half_extent,
                ]);
                texcoords.push([(u + 1.0) * 0.5, 1.0 - (v + 1.0) * 0.5]);
                tangents.push(t);
                normals.push(n);
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Self::new(positions, indices)
            .with_texcoords(texcoords)
            .with_tangents(tangents)
            .with_normals(normals)
    }

    /// UV sphere of the given radius; `segments` around the equator, `rings` pole to pole.
    pub fn uv_sphere(radius: f32, segments: u32, rings: u32) -> Self {
        let segments = segments.max(3);
        let rings = rings.max(2);
        let mut positions = Vec::new();
        let mut texcoords = Vec::new();
        let mut tangents = Vec::new();
        let mut normals = Vec::new();
        for ring in 0..=rings {
            let v = ring as f32 / rings as f32;
            let theta = v * PI;
            for segment in 0..=segments {
                let u = segment as f32 / segments as f32;
                let phi = u * 2.0 * PI;
                let n = [theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin()];
                positions.push([n[0] * radius, n[1] * radius, n[2] * radius]);
                normals.push(n);
                texcoords.push([u, v]);
                tangents.push([-phi.sin(), 0.0, phi.cos()]);
            }
        }
        let stride = segments + 1;
        let mut indices = Vec::with_capacity((rings * segments * 6) as usize);
        for ring in 0..rings {
            for segment in 0..segments {
                let a = ring * stride + segment;
                let b = a + stride;
                indices.extend_from_slice(&[a, a + 1, b, a + 1, b + 1, b]);
            }
        }
        Self::new(positions, indices)
            .with_texcoords(texcoords)
            .with_tangents(tangents)
            .with_normals(normals)
    }

    /// Square in the XZ plane facing +Y.
    pub fn plane(half_extent: f32) -> Self {
        let h = half_extent;
        Self::new(
            vec![[-h, 0.0, h], [h, 0.0, h], [h, 0.0, -h], [-h, 0.0, -h]],
            vec![0, 1, 2, 0, 2, 3],
        )
        .with_texcoords(vec![[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]])
        .with_tangents(vec![[1.0, 0.0, 0.0]; 4])
        .with_normals(vec![[0.0, 1.0, 0.0]; 4])
    }
}

/// Triangle mesh component; mesh data is shared between shapes.
#[derive(Debug, Clone)]
pub struct TrianglesMesh {
    pub data: Arc<MeshData>,
    pub visible: bool,
}

impl TrianglesMesh {
    pub fn new(data: Arc<MeshData>) -> Self {
        Self { data, visible: true }
    }
}

impl From<MeshData> for TrianglesMesh {
    fn from(data: MeshData) -> Self {
        Self::new(Arc::new(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_is_closed_and_consistent() {
        let cube = MeshData::cube(1.0);
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.index_count(), 36);
        assert_eq!(cube.normals.len(), 24);
        assert!(cube.indices.iter().all(|&i| (i as usize) < cube.vertex_count()));
    }

    #[test]
    fn sphere_vertices_lie_on_radius() {
        let sphere = MeshData::uv_sphere(2.0, 8, 4);
        assert_eq!(sphere.vertex_count(), 9 * 5);
        for p in &sphere.positions {
            let len = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
            approx::assert_relative_eq!(len, 2.0, epsilon = 1e-4);
        }
        assert!(sphere.indices.iter().all(|&i| (i as usize) < sphere.vertex_count()));
    }

    #[test]
    fn every_mesh_and_every_clone_has_its_own_identity() {
        let a = MeshData::plane(1.0);
        let b = a.clone();
        assert_ne!(b.id(), a.id());
        assert_eq!(b.positions, a.positions);
        assert_eq!(b.indices, a.indices);
        assert_ne!(MeshData::plane(1.0).id(), a.id());
    }

    #[test]
    fn arc_shared_mesh_keeps_one_identity() {
        let mesh = TrianglesMesh::from(MeshData::cube(1.0));
        let shared = mesh.clone();
        assert_eq!(shared.data.id(), mesh.data.id());
    }
}
