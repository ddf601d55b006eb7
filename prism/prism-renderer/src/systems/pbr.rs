//! Deferred G-buffer fill. One indexed draw per visible mesh out of the shared packed
//! buffers; `first_instance` carries the draw index into the transform and material arrays.
//! Material texture descriptor sets are built once per distinct texture tuple and shared by
//! every slot.

use super::{
    camera_buffer, mat4_array, shader_stages, storage_buffer, write_camera, RenderContext, RenderSystem,
    UpdateContext, CAMERA_KEY,
};
use crate::assets::{AssetManager, MeshLocation};
use crate::config::RendererConfig;
use crate::error::Result;
use crate::frame_resources::{FrameResourceTable, FrameRing, FrameSlot};
use crate::pipeline_cache::{DepthTemplate, PipelineCache, PipelineTemplate};
use crate::scene_walk;
use crate::targets::{DEPTH_FORMAT, GBUFFER_FORMATS};
use crate::workflow::WorkflowCache;
use bytemuck::{Pod, Zeroable};
use prism_rhi::{
    AddressMode, ClearColor, CommandEncoder, CompareOp, CullMode, DescriptorPool, DescriptorSet, DescriptorSetLayout,
    DescriptorSetLayoutBinding, DescriptorType, Device, FilterMode, FrameBuffer, IndexFormat, LoadOp,
    PrimitiveTopology, RasterizationState, ResourceId, Sampler, SamplerDescriptor, ShaderStages, VertexAttribute,
    VertexBinding, VertexFormat, VertexInputDescriptor, VertexInputRate,
};
use scene_api::{PhysicalBasedMaterial, TrianglesMesh};
use std::collections::HashMap;
use std::sync::Arc;

const LABEL: &str = "pbr_gbuffer";
const TRANSFORMS: &str = "transforms";
const MATERIALS: &str = "materials";
const SET: &str = "set";
const MATERIAL_SETS_PER_POOL: u32 = 64;

const BASE_COLOR_MAP: u32 = 1;
const METALLIC_MAP: u32 = 2;
const ROUGHNESS_MAP: u32 = 4;
const EMISSIVE_MAP: u32 = 8;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuMaterial {
    pub base_color: [f32; 4],
    pub emissive_metallic: [f32; 4],
    pub roughness: f32,
    pub blur: f32,
    pub texture_flags: u32,
    pub pad: u32,
}

type TextureKey = [ResourceId; 4];

impl GpuMaterial {
    fn from_material(material: &PhysicalBasedMaterial) -> Self {
        let mut flags = 0;
        for (has_texture, flag) in [
            (material.base_color.texture().is_some(), BASE_COLOR_MAP),
            (material.metallic.texture().is_some(), METALLIC_MAP),
            (material.roughness.texture().is_some(), ROUGHNESS_MAP),
            (material.emissive.texture().is_some(), EMISSIVE_MAP),
        ] {
            if has_texture {
                flags |= flag;
            }
        }
        let [er, eg, eb] = material.emissive.constant().unwrap_or([0.0; 3]);
        Self {
            base_color: material.base_color.constant().unwrap_or([1.0; 4]),
            emissive_metallic: [er, eg, eb, material.metallic.constant().unwrap_or(0.0)],
            roughness: material.roughness.constant().unwrap_or(1.0),
            blur: if material.blur { 1.0 } else { 0.0 },
            texture_flags: flags,
            pad: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MeshDraw {
    location: MeshLocation,
    textures: TextureKey,
}

#[derive(Debug, Default)]
struct PbrState {
    draws: Vec<MeshDraw>,
}

/// Descriptor sets over material textures, keyed by the texture tuple.
#[derive(Debug)]
struct MaterialSets {
    layout: Arc<dyn DescriptorSetLayout>,
    sampler: Box<dyn Sampler>,
    pools: Vec<(Box<dyn DescriptorPool>, u32)>,
    sets: HashMap<TextureKey, Box<dyn DescriptorSet>>,
}

impl MaterialSets {
    fn ensure(&mut self, device: &dyn Device, assets: &AssetManager, material: &PhysicalBasedMaterial) -> Result<TextureKey> {
        let textures = [
            assets.texture_or_white(material.base_color.texture()),
            assets.texture_or_white(material.metallic.texture()),
            assets.texture_or_white(material.roughness.texture()),
            assets.texture_or_white(material.emissive.texture()),
        ];
        let key = textures.map(|t| t.id());
        if self.sets.contains_key(&key) {
            return Ok(key);
        }
        if self.pools.last().map_or(true, |(_, used)| *used >= MATERIAL_SETS_PER_POOL) {
            self.pools.push((device.create_descriptor_pool(MATERIAL_SETS_PER_POOL)?, 0));
        }
        let last = self.pools.len() - 1;
        let (pool, used) = &mut self.pools[last];
        let mut set = pool.allocate_set(self.layout.as_ref())?;
        *used += 1;
        for (binding, texture) in textures.iter().enumerate() {
            set.write_texture(binding as u32, texture.as_ref())?;
        }
        set.write_sampler(4, self.sampler.as_ref())?;
        log::debug!("{}: material texture set #{} for {:?}", LABEL, self.sets.len(), key);
        self.sets.insert(key, set);
        Ok(key)
    }
}

#[derive(Debug)]
pub struct PbrSystem {
    ring: FrameRing<FrameSlot<PbrState>>,
    pipeline: PipelineCache,
    materials: MaterialSets,
    _pool: Box<dyn DescriptorPool>,
}

impl PbrSystem {
    pub fn new(device: &dyn Device, cache: &WorkflowCache, config: &RendererConfig) -> Result<Self> {
        let frame_layout = device.create_descriptor_set_layout(&[
            DescriptorSetLayoutBinding::new(0, DescriptorType::UniformBuffer, ShaderStages::VERTEX),
            DescriptorSetLayoutBinding::new(1, DescriptorType::StorageBuffer, ShaderStages::VERTEX),
            DescriptorSetLayoutBinding::new(2, DescriptorType::StorageBuffer, ShaderStages::FRAGMENT),
        ])?;
        let material_layout = device.create_descriptor_set_layout(&[
            DescriptorSetLayoutBinding::new(0, DescriptorType::SampledImage, ShaderStages::FRAGMENT),
            DescriptorSetLayoutBinding::new(1, DescriptorType::SampledImage, ShaderStages::FRAGMENT),
            DescriptorSetLayoutBinding::new(2, DescriptorType::SampledImage, ShaderStages::FRAGMENT),
            DescriptorSetLayoutBinding::new(3, DescriptorType::SampledImage, ShaderStages::FRAGMENT),
            DescriptorSetLayoutBinding::new(4, DescriptorType::Sampler, ShaderStages::FRAGMENT),
        ])?;
        let pool = device.create_descriptor_pool(config.frames_in_flight as u32)?;
        let instances = config.capacities.instances;

        let ring = FrameRing::try_new(config.frames_in_flight, |_| {
            let mut resources = FrameResourceTable::new();
            resources.set(CAMERA_KEY, camera_buffer(device)?);
            resources.set(TRANSFORMS, storage_buffer::<[[f32; 4]; 4]>(device, "pbr_transforms", instances)?);
            resources.set(MATERIALS, storage_buffer::<GpuMaterial>(device, "pbr_materials", instances)?);
            resources.set(SET, pool.allocate_set(frame_layout.as_ref())?);
            resources.bind_buffer(SET, 0, CAMERA_KEY)?;
            resources.bind_buffer(SET, 1, TRANSFORMS)?;
            resources.bind_buffer(SET, 2, MATERIALS)?;
            Ok(FrameSlot::new(resources, PbrState::default()))
        })?;

        let (vertex_shader, fragment_shader) = shader_stages(cache, "gbuffer")?;
        let attribute = |location: u32, format| VertexAttribute { location, binding: location, format, offset: 0 };
        let binding = |binding: u32, stride| VertexBinding { binding, stride, input_rate: VertexInputRate::Vertex };
        let template = PipelineTemplate {
            label: LABEL,
            vertex_shader,
            fragment_shader: Some(fragment_shader),
            vertex_input: VertexInputDescriptor {
                attributes: vec![
                    attribute(0, VertexFormat::Float32x3),
                    attribute(1, VertexFormat::Float32x2),
                    attribute(2, VertexFormat::Float32x3),
                    attribute(3, VertexFormat::Float32x3),
                ],
                bindings: vec![binding(0, 12), binding(1, 8), binding(2, 12), binding(3, 12)],
            },
            topology: PrimitiveTopology::TriangleList,
            rasterization: RasterizationState { cull_mode: CullMode::Back, ..Default::default() },
            blend: None,
            depth: Some(DepthTemplate { write: true, compare: CompareOp::Less }),
            set_layouts: vec![frame_layout, material_layout.clone()],
        };
        let pipeline =
            PipelineCache::new(device, template, PipelineCache::placeholder(&GBUFFER_FORMATS, Some(DEPTH_FORMAT)))?;
        let sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("material_sampler"),
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            address_mode: AddressMode::Repeat,
        })?;
        Ok(Self {
            ring,
            pipeline,
            materials: MaterialSets { layout: material_layout, sampler, pools: Vec::new(), sets: HashMap::new() },
            _pool: pool,
        })
    }

    /// Distinct material texture tuples seen so far.
    pub fn material_set_count(&self) -> usize {
        self.materials.sets.len()
    }
}

impl RenderSystem for PbrSystem {
    fn label(&self) -> &'static str {
        LABEL
    }

    fn update(&mut self, ctx: &UpdateContext<'_>) -> Result<()> {
        let defaults = PhysicalBasedMaterial::default();
        let draws = scene_walk::collect(ctx.scene, |shape| {
            let mesh = shape.get_visible::<TrianglesMesh>()?;
            let Some(location) = ctx.assets.mesh_location(mesh.data.id()) else {
                log::warn!("{}: mesh of {:?} is not packed; skipped", LABEL, shape.name());
                return None;
            };
            if location.index_count == 0 {
                return None;
            }
            let material = shape.get_visible::<PhysicalBasedMaterial>().unwrap_or(&defaults);
            Some((location, material))
        });

        let mut meshes = Vec::with_capacity(draws.len());
        let mut materials = Vec::with_capacity(draws.len());
        for (location, material) in &draws.payloads {
            let textures = self.materials.ensure(ctx.device, ctx.assets, material)?;
            meshes.push(MeshDraw { location: *location, textures });
            materials.push(GpuMaterial::from_material(material));
        }
        let transforms = mat4_array(&draws.transforms);

        let slot = self.ring.current_mut();
        let resources = &mut slot.resources;
        if resources.buffer_mut(TRANSFORMS)?.ensure_capacity(ctx.device, transforms.len())?.grown() {
            resources.bind_buffer(SET, 1, TRANSFORMS)?;
        }
        if resources.buffer_mut(MATERIALS)?.ensure_capacity(ctx.device, materials.len())?.grown() {
            resources.bind_buffer(SET, 2, MATERIALS)?;
        }
        resources.buffer(TRANSFORMS)?.write(ctx.device, 0, &transforms)?;
        resources.buffer(MATERIALS)?.write(ctx.device, 0, &materials)?;
        log::trace!("{}: {} mesh draws", LABEL, meshes.len());
        slot.state.draws = meshes;
        self.ring.mark_updated();
        Ok(())
    }

    fn render(
        &mut self,
        ctx: &mut RenderContext<'_>,
        encoder: &mut dyn CommandEncoder,
        target: &FrameBuffer,
    ) -> Result<()> {
        let slot = self.ring.updated_slot(LABEL)?;
        self.pipeline.ensure(ctx.device, target)?;
        let resources = &slot.resources;
        write_camera(ctx.device, resources.buffer(CAMERA_KEY)?, ctx.camera)?;

        // The G-buffer is cleared even with nothing to draw; lighting reads it.
        let mut pass =
            encoder.begin_render_pass(target.pass_descriptor(Some(LABEL), LoadOp::Clear, ClearColor::TRANSPARENT, LoadOp::Clear))?;
        if !slot.state.draws.is_empty() {
            let packer = ctx.assets.packer();
            pass.set_pipeline(self.pipeline.pipeline());
            pass.bind_descriptor_set(0, resources.descriptor_set(SET)?);
            pass.set_vertex_buffer(0, packer.positions(), 0);
            pass.set_vertex_buffer(1, packer.texcoords(), 0);
            pass.set_vertex_buffer(2, packer.tangents(), 0);
            pass.set_vertex_buffer(3, packer.normals(), 0);
            pass.set_index_buffer(packer.indices(), 0, IndexFormat::Uint32);
            let mut bound: Option<TextureKey> = None;
            for (draw_index, draw) in slot.state.draws.iter().enumerate() {
                if bound != Some(draw.textures) {
                    if let Some(set) = self.materials.sets.get(&draw.textures) {
                        pass.bind_descriptor_set(1, set.as_ref());
                        bound = Some(draw.textures);
                    }
                }
                let location = draw.location;
                pass.draw_indexed(location.index_count, 1, location.start_index, 0, draw_index as u32);
            }
        }
        pass.end();

        self.ring.finish_render();
        Ok(())
    }

    fn frame_index(&self) -> usize {
        self.ring.index()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutTracker;
    use crate::systems::test_support;
    use prism_rhi::headless::{HeadlessDevice, RecordedCommand};
    use scene_api::{Factor, MeshData, Scene, Shape, TextureId, TransformWrap};

    #[test]
    fn material_flags_follow_texture_factors() {
        let mut material = PhysicalBasedMaterial::default().with_metallic_roughness(0.3, 0.6);
        material.base_color = Factor::Texture(TextureId(5));
        material.blur = true;
        let gpu = GpuMaterial::from_material(&material);
        assert_eq!(gpu.texture_flags, BASE_COLOR_MAP);
        assert_eq!(gpu.emissive_metallic[3], 0.3);
        assert_eq!(gpu.roughness, 0.6);
        assert_eq!(gpu.blur, 1.0);
        assert_eq!(std::mem::size_of::<GpuMaterial>(), 48);
    }

    #[test]
    fn one_draw_per_packed_mesh_and_shared_material_sets() {
        let device = HeadlessDevice::new();
        let mut assets = test_support::assets(&device);
        let config = RendererConfig::default();
        let mut system = PbrSystem::new(device.as_ref(), &WorkflowCache::disabled(), &config).unwrap();
        let target = test_support::target(&device, &GBUFFER_FORMATS, true);

        let cube = Arc::new(MeshData::cube(0.5));
        let empty = Arc::new(MeshData::new(Vec::new(), Vec::new()));
        let mut scene = Scene::new();
        for x in 0..3 {
            scene.add(
                Shape::new(format!("cube{}", x))
                    .with(TransformWrap::from_translation(glam::Vec3::X * x as f32))
                    .with(TrianglesMesh::new(cube.clone()))
                    .with(PhysicalBasedMaterial::default()),
            );
        }
        scene.add(Shape::new("empty").with(TrianglesMesh::new(empty)));
        assets.pack_scene(device.as_ref(), &scene).unwrap();
        let mut layouts = LayoutTracker::new();
        for id in assets.drain_uploaded() {
            layouts.uploaded(id);
        }
        device.take_commands();

        system
            .update(&UpdateContext { device: device.as_ref(), assets: &assets, scene: &scene, camera: None, delta_time: 0.0 })
            .unwrap();
        test_support::run(&device, &assets, &mut layouts, &mut system, None, &target).unwrap();

        let commands = device.take_commands();
        let draws: Vec<_> = commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::DrawIndexed { index_count, first_instance, .. } => Some((*index_count, *first_instance)),
                _ => None,
            })
            .collect();
        assert_eq!(draws, vec![(36, 0), (36, 1), (36, 2)]);
        assert_eq!(system.material_set_count(), 1);
        let stats = device.stats();
        assert_eq!(stats.layout_violations, 0);
        assert_eq!(stats.incomplete_descriptor_sets, 0);
        assert_eq!(stats.incompatible_pipelines, 0);
    }

    #[test]
    fn empty_scene_still_clears_the_gbuffer() {
        let device = HeadlessDevice::new();
        let assets = test_support::assets(&device);
        let mut system =
            PbrSystem::new(device.as_ref(), &WorkflowCache::disabled(), &RendererConfig::default()).unwrap();
        let target = test_support::target(&device, &GBUFFER_FORMATS, true);
        let scene = Scene::new();
        let mut layouts = LayoutTracker::new();
        device.take_commands();

        system
            .update(&UpdateContext { device: device.as_ref(), assets: &assets, scene: &scene, camera: None, delta_time: 0.0 })
            .unwrap();
        test_support::run(&device, &assets, &mut layouts, &mut system, None, &target).unwrap();

        let commands = device.take_commands();
        assert!(commands.iter().any(|c| matches!(
            c,
            RecordedCommand::BeginRenderPass { color_load, .. } if color_load.iter().all(|l| *l == LoadOp::Clear)
        )));
        assert!(!commands.iter().any(RecordedCommand::is_draw));
        assert_eq!(system.frame_index(), 1);
    }
}
