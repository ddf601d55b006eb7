//! Point-light shadows. Every shadow-casting light (up to `max_lights`, in scene order) gets
//! six cube-face passes into its six layers of the shadow cube array. Each pass stores the
//! linear light distance divided by the far plane and draws every visible mesh once.

use super::{mat4_array, shader_stages, storage_buffer, uniform_buffer, RenderContext, RenderSystem, UpdateContext};
use crate::assets::MeshLocation;
use crate::config::{RendererConfig, ShadowConfig};
use crate::error::Result;
use crate::frame_resources::{FrameResourceTable, FrameRing, FrameSlot};
use crate::layout::LayoutTracker;
use crate::pipeline_cache::{DepthTemplate, PipelineCache, PipelineTemplate};
use crate::scene_walk;
use crate::targets::{ShadowTargets, DEPTH_FORMAT, SHADOW_FORMAT};
use crate::workflow::WorkflowCache;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use prism_rhi::{
    ClearColor, CommandEncoder, CompareOp, CullMode, DescriptorPool, DescriptorSetLayoutBinding, DescriptorType,
    Device, FrameBuffer, IndexFormat, LoadOp, PrimitiveTopology, RasterizationState, ShaderStages, VertexAttribute,
    VertexBinding, VertexFormat, VertexInputDescriptor, VertexInputRate,
};
use scene_api::{PointLight, Scene, TrianglesMesh};

const LABEL: &str = "shadow_map";
const PARAMS: &str = "params";
const TRANSFORMS: &str = "transforms";
const FACES: &str = "faces";
const SET: &str = "set";

/// (look direction, up) per cube face in +X, -X, +Y, -Y, +Z, -Z order.
const FACE_BASIS: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::NEG_Y),
    (Vec3::NEG_X, Vec3::NEG_Y),
    (Vec3::Y, Vec3::Z),
    (Vec3::NEG_Y, Vec3::NEG_Z),
    (Vec3::Z, Vec3::NEG_Y),
    (Vec3::NEG_Z, Vec3::NEG_Y),
];

/// View-projection rendering cube `face` of a light at `position`, matching the texel
/// addressing cube samplers use.
pub fn cube_face_view_projection(position: Vec3, face: usize, near: f32, far: f32) -> Mat4 {
    let (direction, up) = FACE_BASIS[face % 6];
    let flip_y = Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0));
    flip_y
        * Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, near, far)
        * Mat4::look_at_rh(position, position + direction, up)
}

/// Shadow slot of each light in `lights` (scene order): casters get consecutive slots until
/// `max_lights` are taken.
pub fn shadow_slots<'a>(lights: impl IntoIterator<Item = &'a PointLight>, max_lights: u32) -> Vec<Option<u32>> {
    let mut next = 0u32;
    lights
        .into_iter()
        .map(|light| {
            if light.cast_shadow && next < max_lights {
                next += 1;
                Some(next - 1)
            } else {
                None
            }
        })
        .collect()
}

/// Positions of the lights that receive a shadow slot, in slot order.
fn shadow_casters(scene: &Scene, max_lights: u32) -> Vec<Vec3> {
    let lights = scene_walk::collect(scene, |shape| shape.get_visible::<PointLight>());
    let slots = shadow_slots(lights.payloads.iter().copied(), max_lights);
    lights
        .transforms
        .iter()
        .zip(slots)
        .filter(|(_, slot)| slot.is_some())
        .map(|(transform, _)| transform.w_axis.truncate())
        .collect()
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ShadowParams {
    draw_count: u32,
    pad: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct GpuFace {
    view_proj: [[f32; 4]; 4],
    light_position_far: [f32; 4],
}

#[derive(Debug, Default)]
struct ShadowState {
    draws: Vec<MeshLocation>,
    lights: u32,
}

#[derive(Debug)]
pub struct ShadowMapSystem {
    config: ShadowConfig,
    targets: ShadowTargets,
    ring: FrameRing<FrameSlot<ShadowState>>,
    pipeline: PipelineCache,
    _pool: Box<dyn DescriptorPool>,
}

impl ShadowMapSystem {
    pub fn new(
        device: &dyn Device,
        cache: &WorkflowCache,
        config: &RendererConfig,
        targets: ShadowTargets,
    ) -> Result<Self> {
        let set_layout = device.create_descriptor_set_layout(&[
            DescriptorSetLayoutBinding::new(0, DescriptorType::UniformBuffer, ShaderStages::VERTEX),
            DescriptorSetLayoutBinding::new(1, DescriptorType::StorageBuffer, ShaderStages::VERTEX),
            DescriptorSetLayoutBinding::new(2, DescriptorType::StorageBuffer, ShaderStages::VERTEX | ShaderStages::FRAGMENT),
        ])?;
        let pool = device.create_descriptor_pool(config.frames_in_flight as u32)?;
        let face_count = 6 * targets.max_lights() as usize;

        let ring = FrameRing::try_new(config.frames_in_flight, |_| {
            let mut resources = FrameResourceTable::new();
            resources.set(PARAMS, uniform_buffer::<ShadowParams>(device, "shadow_params")?);
            resources.set(
                TRANSFORMS,
                storage_buffer::<[[f32; 4]; 4]>(device, "shadow_transforms", config.capacities.instances)?,
            );
            resources.set(FACES, storage_buffer::<GpuFace>(device, "shadow_faces", face_count)?);
            resources.set(SET, pool.allocate_set(set_layout.as_ref())?);
            resources.bind_buffer(SET, 0, PARAMS)?;
            resources.bind_buffer(SET, 1, TRANSFORMS)?;
            resources.bind_buffer(SET, 2, FACES)?;
            Ok(FrameSlot::new(resources, ShadowState::default()))
        })?;

        let (vertex_shader, fragment_shader) = shader_stages(cache, "shadow")?;
        let template = PipelineTemplate {
            label: LABEL,
            vertex_shader,
            fragment_shader: Some(fragment_shader),
            vertex_input: VertexInputDescriptor {
                attributes: vec![VertexAttribute { location: 0, binding: 0, format: VertexFormat::Float32x3, offset: 0 }],
                bindings: vec![VertexBinding { binding: 0, stride: 12, input_rate: VertexInputRate::Vertex }],
            },
            topology: PrimitiveTopology::TriangleList,
            // The face projection flips Y, which flips winding.
            rasterization: RasterizationState { cull_mode: CullMode::None, ..Default::default() },
            blend: None,
            depth: Some(DepthTemplate { write: true, compare: CompareOp::Less }),
            set_layouts: vec![set_layout],
        };
        let pipeline =
            PipelineCache::new(device, template, PipelineCache::placeholder(&[SHADOW_FORMAT], Some(DEPTH_FORMAT)))?;
        Ok(Self { config: config.shadow.clone(), targets, ring, pipeline, _pool: pool })
    }

    pub fn targets(&self) -> &ShadowTargets {
        &self.targets
    }

    /// Lights that received a shadow slot in the current frame's update.
    pub fn shadowed_lights(&self) -> u32 {
        self.ring.current().state.lights
    }

    fn prepare_targets(&self, layouts: &mut LayoutTracker, encoder: &mut dyn CommandEncoder) {
        for texture in [&self.targets.cubes, &self.targets.depth] {
            layouts.transition(encoder, texture.as_ref(), LayoutTracker::attachment_layout(texture.as_ref()));
        }
    }
}

impl RenderSystem for ShadowMapSystem {
    fn label(&self) -> &'static str {
        LABEL
    }

    fn update(&mut self, ctx: &UpdateContext<'_>) -> Result<()> {
        let lights = shadow_casters(ctx.scene, self.targets.max_lights());
        let meshes = scene_walk::collect(ctx.scene, |shape| {
            let mesh = shape.get_visible::<TrianglesMesh>()?;
            ctx.assets.mesh_location(mesh.data.id()).filter(|l| l.index_count > 0)
        });
        let (near, far) = (self.config.near, self.config.far);
        let faces: Vec<GpuFace> = lights
            .iter()
            .flat_map(|&position| {
                (0..6).map(move |face| GpuFace {
                    view_proj: cube_face_view_projection(position, face, near, far).to_cols_array_2d(),
                    light_position_far: position.extend(far).to_array(),
                })
            })
            .collect();
        let transforms = mat4_array(&meshes.transforms);

        let slot = self.ring.current_mut();
        let resources = &mut slot.resources;
        if resources.buffer_mut(TRANSFORMS)?.ensure_capacity(ctx.device, transforms.len())?.grown() {
            resources.bind_buffer(SET, 1, TRANSFORMS)?;
        }
        resources.buffer(TRANSFORMS)?.write(ctx.device, 0, &transforms)?;
        resources.buffer(FACES)?.write(ctx.device, 0, &faces)?;
        let params = ShadowParams { draw_count: meshes.len() as u32, pad: [0; 3] };
        resources.buffer(PARAMS)?.write(ctx.device, 0, &[params])?;
        slot.state.draws = meshes.payloads;
        slot.state.lights = lights.len() as u32;
        log::trace!("{}: {} lights x {} meshes", LABEL, lights.len(), slot.state.draws.len());
        self.ring.mark_updated();
        Ok(())
    }

    /// `target` addresses the cube array and shared depth; each face pass retargets its layer.
    fn render(
        &mut self,
        ctx: &mut RenderContext<'_>,
        encoder: &mut dyn CommandEncoder,
        target: &FrameBuffer,
    ) -> Result<()> {
        let slot = self.ring.updated_slot(LABEL)?;
        if slot.state.lights == 0 {
            self.ring.finish_render();
            return Ok(());
        }
        self.pipeline.ensure(ctx.device, target)?;
        self.prepare_targets(ctx.layouts, encoder);
        let resources = &slot.resources;
        let draw_count = slot.state.draws.len() as u32;
        let packer = ctx.assets.packer();

        for face_slot in 0..slot.state.lights * 6 {
            let face_target = target.with_color_layer(face_slot)?;
            // Cleared to 1.0: nothing closer than the far plane.
            let mut pass = encoder.begin_render_pass(face_target.pass_descriptor(
                Some(LABEL),
                LoadOp::Clear,
                ClearColor::WHITE,
                LoadOp::Clear,
            ))?;
            if draw_count > 0 {
                pass.set_pipeline(self.pipeline.pipeline());
                pass.bind_descriptor_set(0, resources.descriptor_set(SET)?);
                pass.set_vertex_buffer(0, packer.positions(), 0);
                pass.set_index_buffer(packer.indices(), 0, IndexFormat::Uint32);
                for (draw, location) in slot.state.draws.iter().enumerate() {
                    let instance = face_slot * draw_count + draw as u32;
                    pass.draw_indexed(location.index_count, 1, location.start_index, 0, instance);
                }
            }
            pass.end();
        }

        self.ring.finish_render();
        Ok(())
    }

    fn frame_index(&self) -> usize {
        self.ring.index()
    }
}
