//! Geometry and textures shared by every render system.

pub mod mesh_packer;
pub mod primitives;

pub use mesh_packer::{MeshLocation, MeshPacker};

use crate::config::RendererConfig;
use crate::error::{RenderError, Result};
use crate::workflow::{IrradianceInput, IrradianceWorkflow, ShCoefficients, WorkflowCache};
use prism_rhi::{
    Device, ResourceId, Texture, TextureDescriptor, TextureDimension, TextureFormat, TextureUsage,
};
use scene_api::{MeshData, MeshId, Scene, TextureId, TrianglesMesh};
use std::collections::HashMap;
use std::sync::Arc;

const SKY_FACE_SIZE: u32 = 64;
const IRRADIANCE_SAMPLE_STRIDE: u32 = 2;

/// Owns the packed mesh buffers, the named built-in geometry and every texture a
/// [`TextureId`] can refer to.
#[derive(Debug)]
pub struct AssetManager {
    packer: MeshPacker,
    geometry: HashMap<&'static str, MeshLocation>,
    textures: HashMap<TextureId, Arc<dyn Texture>>,
    irradiance: HashMap<TextureId, ShCoefficients>,
    next_texture: u32,
    white: TextureId,
    sky: TextureId,
    uploaded: Vec<ResourceId>,
}

impl AssetManager {
    pub fn new(device: &dyn Device, config: &RendererConfig, cache: &WorkflowCache) -> Result<Self> {
        let mut assets = Self {
            packer: MeshPacker::new(device, &config.capacities)?,
            geometry: HashMap::new(),
            textures: HashMap::new(),
            irradiance: HashMap::new(),
            next_texture: 1,
            white: TextureId(0),
            sky: TextureId(0),
            uploaded: Vec::new(),
        };

        assets.packer.begin_allocating();
        for (name, mesh) in [
            ("Quad", primitives::screen_quad()),
            ("SkyBox", MeshData::cube(1.0)),
            ("Cube", MeshData::cube(0.5)),
            ("Sphere", MeshData::uv_sphere(0.5, 32, 16)),
        ] {
            let location = assets.packer.allocate(&mesh);
            assets.geometry.insert(name, location);
        }
        assets.packer.end_allocating(device)?;

        assets.white = assets.upload_texture(device, 1, 1, &[255, 255, 255, 255])?;
        let faces = primitives::gradient_sky_faces(SKY_FACE_SIZE);
        assets.sky = assets.upload_cube_texture(device, SKY_FACE_SIZE, &faces, cache)?;
        log::info!(
            "assets ready: {} vertices, {} indices packed, {} textures",
            assets.packer.vertex_count(),
            assets.packer.index_count(),
            assets.textures.len()
        );
        Ok(assets)
    }

    fn next_id(&mut self) -> TextureId {
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        id
    }

    /// Upload a 2D RGBA8 texture (linear values).
    pub fn upload_texture(&mut self, device: &dyn Device, width: u32, height: u32, rgba: &[u8]) -> Result<TextureId> {
        let texture: Arc<dyn Texture> = device
            .create_texture(&TextureDescriptor {
                label: Some("asset_texture"),
                size: (width, height, 1),
                format: TextureFormat::Rgba8Unorm,
                usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
                dimension: TextureDimension::D2,
            })?
            .into();
        device.write_texture(texture.as_ref(), 0, rgba)?;
        let id = self.next_id();
        self.uploaded.push(texture.id());
        self.textures.insert(id, texture);
        Ok(id)
    }

    /// Upload six RGBA8 faces (+X, -X, +Y, -Y, +Z, -Z) as a cube texture and project its
    /// diffuse irradiance through the workflow cache.
    pub fn upload_cube_texture(
        &mut self,
        device: &dyn Device,
        size: u32,
        faces: &[Vec<u8>],
        cache: &WorkflowCache,
    ) -> Result<TextureId> {
        if faces.len() != 6 {
            return Err(RenderError::MissingResource(format!("cube texture needs 6 faces, got {}", faces.len())));
        }
        let irradiance = cache.start(
            &mut IrradianceWorkflow::new(faces),
            &IrradianceInput { face_size: size, sample_stride: IRRADIANCE_SAMPLE_STRIDE },
        )?;
        let texture: Arc<dyn Texture> = device
            .create_texture(&TextureDescriptor {
                label: Some("asset_cube_texture"),
                size: (size, size, 6),
                format: TextureFormat::Rgba8Unorm,
                usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
                dimension: TextureDimension::Cube,
            })?
            .into();
        for (layer, face) in faces.iter().enumerate() {
            device.write_texture(texture.as_ref(), layer as u32, face)?;
        }
        let id = self.next_id();
        self.uploaded.push(texture.id());
        self.textures.insert(id, texture);
        self.irradiance.insert(id, irradiance);
        Ok(id)
    }

    /// Pack every visible triangle mesh of `scene` that is not packed yet.
    pub fn pack_scene(&mut self, device: &dyn Device, scene: &Scene) -> Result<()> {
        let pending: Vec<_> = scene
            .shapes()
            .iter()
            .filter_map(|shape| shape.get_visible::<TrianglesMesh>())
            .filter(|mesh| !self.packer.contains(mesh.data.id()))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        self.packer.begin_allocating();
        for mesh in pending {
            self.packer.allocate(&mesh.data);
        }
        self.packer.end_allocating(device)
    }

    /// Built-in geometry: `"Quad"`, `"SkyBox"`, `"Cube"` or `"Sphere"`.
    pub fn geometry(&self, name: &str) -> Result<MeshLocation> {
        self.geometry
            .get(name)
            .copied()
            .ok_or_else(|| RenderError::MissingResource(format!("geometry {:?}", name)))
    }

    pub fn mesh_location(&self, mesh: MeshId) -> Option<MeshLocation> {
        self.packer.location(mesh)
    }

    pub fn packer(&self) -> &MeshPacker {
        &self.packer
    }

    pub fn texture(&self, id: TextureId) -> Option<&Arc<dyn Texture>> {
        self.textures.get(&id)
    }

    /// 2D texture for `id`, falling back to white for unknown ids and cube textures.
    pub fn texture_or_white(&self, id: Option<TextureId>) -> &Arc<dyn Texture> {
        id.and_then(|id| self.textures.get(&id))
            .filter(|t| t.dimension() == TextureDimension::D2)
            .unwrap_or_else(|| self.white())
    }

    /// Cube texture for `id`, falling back to the default sky.
    pub fn cube_or_default(&self, id: Option<TextureId>) -> (TextureId, &Arc<dyn Texture>) {
        match id.and_then(|id| self.textures.get(&id).map(|t| (id, t))) {
            Some((id, texture)) if texture.dimension() == TextureDimension::Cube => (id, texture),
            _ => (self.sky, self.default_sky()),
        }
    }

    pub fn white(&self) -> &Arc<dyn Texture> {
        &self.textures[&self.white]
    }

    pub fn default_sky(&self) -> &Arc<dyn Texture> {
        &self.textures[&self.sky]
    }

    pub fn default_sky_id(&self) -> TextureId {
        self.sky
    }

    /// Irradiance of a cube texture; the default sky's for unknown ids.
    pub fn irradiance(&self, id: TextureId) -> ShCoefficients {
        self.irradiance
            .get(&id)
            .or_else(|| self.irradiance.get(&self.sky))
            .copied()
            .unwrap_or_default()
    }

    /// Textures uploaded since the last call. Uploads leave them shader-readable.
    pub fn drain_uploaded(&mut self) -> Vec<ResourceId> {
        std::mem::take(&mut self.uploaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_rhi::headless::HeadlessDevice;
    use prism_rhi::ImageLayout;
    use scene_api::{Shape, TrianglesMesh};

    fn assets(device: &HeadlessDevice) -> AssetManager {
        AssetManager::new(device, &RendererConfig::default(), &WorkflowCache::disabled()).unwrap()
    }

    #[test]
    fn built_in_geometry_is_packed_back_to_back() {
        let device = HeadlessDevice::new();
        let assets = assets(&device);
        let quad = assets.geometry("Quad").unwrap();
        let sky = assets.geometry("SkyBox").unwrap();
        assert_eq!(quad, MeshLocation { start_vertex: 0, start_index: 0, index_count: 6 });
        assert_eq!(sky.start_vertex, 4);
        assert_eq!(sky.start_index, 6);
        assert!(assets.geometry("Sphere").unwrap().index_count > 0);
        assert!(matches!(assets.geometry("Teapot"), Err(RenderError::MissingResource(_))));
    }

    #[test]
    fn pack_scene_skips_invisible_and_already_packed_meshes() {
        let device = HeadlessDevice::new();
        let mut assets = assets(&device);
        let shared = Arc::new(MeshData::cube(2.0));
        let mut hidden = TrianglesMesh::new(Arc::new(MeshData::plane(1.0)));
        hidden.visible = false;
        let hidden_id = hidden.data.id();

        let mut scene = Scene::new();
        scene.add(Shape::new("a").with(TrianglesMesh::new(shared.clone())));
        scene.add(Shape::new("b").with(TrianglesMesh::new(shared.clone())));
        scene.add(Shape::new("c").with(hidden));

        let before = assets.packer().vertex_count();
        assets.pack_scene(device.as_ref(), &scene).unwrap();
        assets.pack_scene(device.as_ref(), &scene).unwrap();
        assert_eq!(assets.packer().vertex_count(), before + shared.vertex_count());
        assert!(assets.mesh_location(shared.id()).is_some());
        assert!(assets.mesh_location(hidden_id).is_none());
    }

    #[test]
    fn textures_resolve_with_fallbacks() {
        let device = HeadlessDevice::new();
        let mut assets = assets(&device);
        let uploaded = assets.drain_uploaded();
        assert_eq!(uploaded.len(), 2);
        for id in uploaded {
            assert_eq!(device.texture_layout(id), ImageLayout::ShaderReadOnly);
        }

        let checker = assets.upload_texture(device.as_ref(), 2, 1, &[0; 8]).unwrap();
        assert_eq!(assets.texture_or_white(Some(checker)).size(), (2, 1, 1));
        assert_eq!(assets.texture_or_white(Some(TextureId(999))).id(), assets.white().id());
        assert_eq!(assets.texture_or_white(None).id(), assets.white().id());

        let sky = assets.default_sky_id();
        assert_eq!(assets.texture_or_white(Some(sky)).id(), assets.white().id());
        assert_eq!(assets.cube_or_default(Some(checker)).0, sky);
        assert!(assets.irradiance(sky).evaluate(glam::Vec3::Y).x > 0.0);
    }
}
