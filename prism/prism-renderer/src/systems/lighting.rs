//! Deferred lighting composite. Reads the G-buffer, the blurred occlusion and the shadow cube
//! array, adds point lights and spherical-harmonic sky irradiance, and writes HDR color with
//! alpha marking pixels covered by geometry.

use super::shadow_map::shadow_slots;
use super::{
    camera_buffer, draw_screen_quad, screen_quad_input, shader_stages, storage_buffer, uniform_buffer, visible_sky,
    write_camera, RenderContext, RenderSystem, UpdateContext, CAMERA_KEY,
};
use crate::config::RendererConfig;
use crate::error::{RenderError, Result};
use crate::frame_resources::{FrameResourceTable, FrameRing, FrameSlot};
use crate::pipeline_cache::{PipelineCache, PipelineTemplate};
use crate::scene_walk;
use crate::targets::{RenderTargets, ShadowTargets, HDR_FORMAT};
use crate::workflow::WorkflowCache;
use bytemuck::{Pod, Zeroable};
use prism_rhi::{
    AddressMode, ClearColor, CommandEncoder, CullMode, DescriptorPool, DescriptorSetLayoutBinding, DescriptorType,
    Device, FilterMode, FrameBuffer, LoadOp, PrimitiveTopology, RasterizationState, Sampler, SamplerDescriptor,
    ShaderStages,
};
use scene_api::PointLight;

const LABEL: &str = "lighting";
const PARAMS: &str = "params";
const LIGHTS: &str = "lights";
const SET: &str = "set";
const SHADOW_BIAS: f32 = 0.02;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct LightingParams {
    counts: [u32; 4],
    shadow: [f32; 4],
    sh: [[f32; 4]; 9],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
struct GpuLight {
    position_range: [f32; 4],
    color_intensity: [f32; 4],
    /// x: shadow cube slot, -1 without shadow.
    shadow: [f32; 4],
}

/// Textures the composite samples; bound again whenever the render targets change.
#[derive(Debug, Clone, Copy)]
pub struct LightingInputs<'a> {
    pub targets: &'a RenderTargets,
    pub shadows: &'a ShadowTargets,
}

#[derive(Debug, Default)]
struct LightingState {
    lights: Vec<GpuLight>,
}

#[derive(Debug)]
pub struct LightingSystem {
    ring: FrameRing<FrameSlot<LightingState>>,
    pipeline: PipelineCache,
    shadow_sampler: Box<dyn Sampler>,
    ssao_enabled: bool,
    /// Shadow slots handed out; zero when shadows are off.
    shadow_lights: u32,
    shadow_far: f32,
    has_inputs: bool,
    _pool: Box<dyn DescriptorPool>,
}

impl LightingSystem {
    pub fn new(device: &dyn Device, cache: &WorkflowCache, config: &RendererConfig) -> Result<Self> {
        let sampled =
            |binding| DescriptorSetLayoutBinding::new(binding, DescriptorType::SampledImage, ShaderStages::FRAGMENT);
        let set_layout = device.create_descriptor_set_layout(&[
            DescriptorSetLayoutBinding::new(0, DescriptorType::UniformBuffer, ShaderStages::FRAGMENT),
            DescriptorSetLayoutBinding::new(1, DescriptorType::UniformBuffer, ShaderStages::FRAGMENT),
            DescriptorSetLayoutBinding::new(2, DescriptorType::StorageBuffer, ShaderStages::FRAGMENT),
            sampled(3),
            sampled(4),
            sampled(5),
            sampled(6),
            sampled(7),
            DescriptorSetLayoutBinding::new(8, DescriptorType::SampledCubeArrayImage, ShaderStages::FRAGMENT),
            DescriptorSetLayoutBinding::new(9, DescriptorType::Sampler, ShaderStages::FRAGMENT),
        ])?;
        let pool = device.create_descriptor_pool(config.frames_in_flight as u32)?;
        let shadow_sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("shadow_sampler"),
            min_filter: FilterMode::Nearest,
            mag_filter: FilterMode::Nearest,
            address_mode: AddressMode::ClampToEdge,
        })?;

        let ring = FrameRing::try_new(config.frames_in_flight, |_| {
            let mut resources = FrameResourceTable::new();
            resources.set(CAMERA_KEY, camera_buffer(device)?);
            resources.set(PARAMS, uniform_buffer::<LightingParams>(device, "lighting_params")?);
            resources.set(LIGHTS, storage_buffer::<GpuLight>(device, "lighting_lights", config.capacities.lights)?);
            let mut set = pool.allocate_set(set_layout.as_ref())?;
            set.write_sampler(9, shadow_sampler.as_ref())?;
            resources.set(SET, set);
            resources.bind_buffer(SET, 0, CAMERA_KEY)?;
            resources.bind_buffer(SET, 1, PARAMS)?;
            resources.bind_buffer(SET, 2, LIGHTS)?;
            Ok(FrameSlot::new(resources, LightingState::default()))
        })?;

        let (vertex_shader, fragment_shader) = shader_stages(cache, "lighting")?;
        let template = PipelineTemplate {
            label: LABEL,
            vertex_shader,
            fragment_shader: Some(fragment_shader),
            vertex_input: screen_quad_input(),
            topology: PrimitiveTopology::TriangleList,
            rasterization: RasterizationState { cull_mode: CullMode::None, ..Default::default() },
            blend: None,
            depth: None,
            set_layouts: vec![set_layout],
        };
        let pipeline = PipelineCache::new(device, template, PipelineCache::placeholder(&[HDR_FORMAT], None))?;
        let shadows = &config.shadow;
        Ok(Self {
            ring,
            pipeline,
            shadow_sampler,
            ssao_enabled: config.ssao.enabled,
            shadow_lights: if shadows.enabled { shadows.max_lights } else { 0 },
            shadow_far: shadows.far,
            has_inputs: false,
            _pool: pool,
        })
    }

    /// Bind the G-buffer, occlusion and shadow textures into every slot.
    pub fn set_inputs(&mut self, inputs: LightingInputs<'_>) -> Result<()> {
        let targets = inputs.targets;
        for slot in self.ring.iter_mut() {
            let set = slot.resources.descriptor_set_mut(SET)?;
            for (binding, texture) in
                (3..).zip([&targets.gbuffer0, &targets.gbuffer1, &targets.gbuffer2, &targets.gbuffer3, &targets.ssao])
            {
                set.write_texture(binding, texture.as_ref())?;
            }
            set.write_texture(8, inputs.shadows.cubes.as_ref())?;
            set.write_sampler(9, self.shadow_sampler.as_ref())?;
        }
        self.has_inputs = true;
        Ok(())
    }
}

impl RenderSystem for LightingSystem {
    fn label(&self) -> &'static str {
        LABEL
    }

    fn update(&mut self, ctx: &UpdateContext<'_>) -> Result<()> {
        let walk = scene_walk::collect(ctx.scene, |shape| shape.get_visible::<PointLight>());
        let slots = shadow_slots(walk.payloads.iter().copied(), self.shadow_lights);
        let lights: Vec<GpuLight> = walk
            .iter()
            .zip(slots)
            .map(|((transform, light), slot)| GpuLight {
                position_range: transform.w_axis.truncate().extend(light.range).to_array(),
                color_intensity: [light.color[0], light.color[1], light.color[2], light.intensity],
                shadow: [slot.map_or(-1.0, |s| s as f32), 0.0, 0.0, 0.0],
            })
            .collect();
        let (sky, _) = ctx.assets.cube_or_default(visible_sky(ctx.scene));
        let params = LightingParams {
            counts: [lights.len() as u32, self.ssao_enabled as u32, 0, 0],
            shadow: [self.shadow_far, SHADOW_BIAS, 0.0, 0.0],
            sh: ctx.assets.irradiance(sky).to_uniform(),
        };

        let slot = self.ring.current_mut();
        let resources = &mut slot.resources;
        if resources.buffer_mut(LIGHTS)?.ensure_capacity(ctx.device, lights.len())?.grown() {
            resources.bind_buffer(SET, 2, LIGHTS)?;
        }
        resources.buffer(LIGHTS)?.write(ctx.device, 0, &lights)?;
        resources.buffer(PARAMS)?.write(ctx.device, 0, &[params])?;
        log::trace!("{}: {} point lights", LABEL, lights.len());
        slot.state.lights = lights;
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
        if !self.has_inputs {
            return Err(RenderError::MissingResource(format!("{} inputs", LABEL)));
        }
        self.pipeline.ensure(ctx.device, target)?;
        let resources = &slot.resources;
        write_camera(ctx.device, resources.buffer(CAMERA_KEY)?, ctx.camera)?;

        let mut pass = encoder.begin_render_pass(target.pass_descriptor(
            Some(LABEL),
            LoadOp::Clear,
            ClearColor::TRANSPARENT,
            LoadOp::Clear,
        ))?;
        pass.set_pipeline(self.pipeline.pipeline());
        pass.bind_descriptor_set(0, resources.descriptor_set(SET)?);
        draw_screen_quad(pass.as_mut(), ctx.assets)?;
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
    use glam::Vec3;
    use prism_rhi::headless::HeadlessDevice;
    use scene_api::{Scene, Shape, TransformWrap};

    fn light(cast_shadow: bool) -> PointLight {
        PointLight { cast_shadow, ..Default::default() }
    }

    #[test]
    fn lights_get_positions_and_shadow_slots() {
        let device = HeadlessDevice::new();
        let assets = test_support::assets(&device);
        let mut config = RendererConfig::default();
        config.shadow.max_lights = 1;
        let mut system = LightingSystem::new(device.as_ref(), &WorkflowCache::disabled(), &config).unwrap();

        let mut scene = Scene::new();
        scene.add(Shape::new("plain").with(light(false)));
        scene.add(
            Shape::new("first")
                .with(TransformWrap::from_translation(Vec3::new(1.0, 2.0, 3.0)))
                .with(light(true)),
        );
        scene.add(Shape::new("second").with(light(true)));
        system
            .update(&UpdateContext { device: device.as_ref(), assets: &assets, scene: &scene, camera: None, delta_time: 0.0 })
            .unwrap();

        let lights = &system.ring.current().state.lights;
        let slots: Vec<f32> = lights.iter().map(|l| l.shadow[0]).collect();
        assert_eq!(slots, vec![-1.0, 0.0, -1.0]);
        assert_eq!(lights[1].position_range, [1.0, 2.0, 3.0, 20.0]);
        assert_eq!(std::mem::size_of::<LightingParams>(), 176);
        assert_eq!(std::mem::size_of::<GpuLight>(), 48);
    }

    #[test]
    fn shadows_disabled_leaves_every_light_unshadowed() {
        let device = HeadlessDevice::new();
        let assets = test_support::assets(&device);
        let mut config = RendererConfig::default();
        config.shadow.enabled = false;
        let mut system = LightingSystem::new(device.as_ref(), &WorkflowCache::disabled(), &config).unwrap();
        let mut scene = Scene::new();
        scene.add(Shape::new("l").with(light(true)));
        system
            .update(&UpdateContext { device: device.as_ref(), assets: &assets, scene: &scene, camera: None, delta_time: 0.0 })
            .unwrap();
        assert_eq!(system.ring.current().state.lights[0].shadow[0], -1.0);
    }

    #[test]
    fn composite_draws_one_quad_with_complete_bindings() {
        let device = HeadlessDevice::new();
        let assets = test_support::assets(&device);
        let config = RendererConfig::default();
        let targets = RenderTargets::ensure_size(device.as_ref(), None, 8, 8).unwrap();
        let shadows = ShadowTargets::new(device.as_ref(), 4, 1).unwrap();
        let mut system = LightingSystem::new(device.as_ref(), &WorkflowCache::disabled(), &config).unwrap();
        system.set_inputs(LightingInputs { targets: &targets, shadows: &shadows }).unwrap();
        let scene = Scene::new();
        system
            .update(&UpdateContext { device: device.as_ref(), assets: &assets, scene: &scene, camera: None, delta_time: 0.0 })
            .unwrap();

        let mut layouts = LayoutTracker::new();
        let mut encoder = device.create_command_encoder(None).unwrap();
        let sampled: [&dyn prism_rhi::Texture; 6] = [
            targets.gbuffer0.as_ref(),
            targets.gbuffer1.as_ref(),
            targets.gbuffer2.as_ref(),
            targets.gbuffer3.as_ref(),
            targets.ssao.as_ref(),
            shadows.cubes.as_ref(),
        ];
        layouts.prepare_sampled(encoder.as_mut(), &sampled);
        device.submit(vec![encoder.finish().unwrap()], None).unwrap();
        device.take_commands();

        test_support::run(&device, &assets, &mut layouts, &mut system, None, &targets.lit_target().unwrap()).unwrap();
        let commands = device.take_commands();
        assert_eq!(commands.iter().filter(|c| c.is_draw()).count(), 1);
        let stats = device.stats();
        assert_eq!(stats.layout_violations, 0);
        assert_eq!(stats.incomplete_descriptor_sets, 0);
        assert_eq!(stats.zero_count_draws, 0);
    }
}
