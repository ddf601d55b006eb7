//! Final full-screen pass onto the presentation target: sky box behind uncovered pixels,
//! blurred color where the G-buffer blur flag is set, exposure and tone mapping, and sRGB
//! encoding when the target format does not encode on store.

use super::{
    camera_buffer, draw_screen_quad, screen_quad_input, shader_stages, uniform_buffer, visible_sky, write_camera,
    RenderContext, RenderSystem, UpdateContext, CAMERA_KEY,
};
use crate::config::{RendererConfig, ToneMapping};
use crate::error::{RenderError, Result};
use crate::frame_resources::{FrameResourceTable, FrameRing, FrameSlot};
use crate::pipeline_cache::{PipelineCache, PipelineTemplate};
use crate::targets::RenderTargets;
use crate::workflow::WorkflowCache;
use bytemuck::{Pod, Zeroable};
use prism_rhi::{
    AddressMode, ClearColor, CommandEncoder, CullMode, DescriptorPool, DescriptorSetLayoutBinding, DescriptorType,
    Device, FilterMode, FrameBuffer, LoadOp, PrimitiveTopology, RasterizationState, ResourceId, Sampler,
    SamplerDescriptor, ShaderStages, Texture, TextureFormat,
};
use std::sync::Arc;

const LABEL: &str = "post_effect";
const PARAMS: &str = "params";
const SET: &str = "set";
const SKY_BINDING: u32 = 5;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
struct PostParams {
    /// exposure, tone mapping mode, encode sRGB, sky visible
    settings: [f32; 4],
    clear_color: [f32; 4],
}

/// Textures the post pass samples.
#[derive(Debug, Clone, Copy)]
pub struct PostEffectInputs<'a> {
    pub targets: &'a RenderTargets,
    /// Output of the blur, or the lit image itself when blur is off.
    pub blurred: &'a Arc<dyn Texture>,
}

#[derive(Debug, Default)]
struct PostState {
    params: PostParams,
    /// Sky cube currently written into the slot's set.
    sky: Option<ResourceId>,
}

impl Default for PostParams {
    fn default() -> Self {
        Self::zeroed()
    }
}

#[derive(Debug)]
pub struct PostEffectSystem {
    ring: FrameRing<FrameSlot<PostState>>,
    pipeline: PipelineCache,
    _sampler: Box<dyn Sampler>,
    exposure: f32,
    tone_mapping: ToneMapping,
    clear_color: [f32; 4],
    encode_srgb: bool,
    has_inputs: bool,
    _pool: Box<dyn DescriptorPool>,
}

fn needs_srgb_encode(format: TextureFormat) -> bool {
    !format.is_srgb()
}

fn flag(on: bool) -> f32 {
    if on {
        1.0
    } else {
        0.0
    }
}

impl PostEffectSystem {
    pub fn new(
        device: &dyn Device,
        cache: &WorkflowCache,
        config: &RendererConfig,
        target_format: TextureFormat,
    ) -> Result<Self> {
        let set_layout = device.create_descriptor_set_layout(&[
            DescriptorSetLayoutBinding::new(0, DescriptorType::UniformBuffer, ShaderStages::FRAGMENT),
            DescriptorSetLayoutBinding::new(1, DescriptorType::UniformBuffer, ShaderStages::FRAGMENT),
            DescriptorSetLayoutBinding::new(2, DescriptorType::SampledImage, ShaderStages::FRAGMENT),
            DescriptorSetLayoutBinding::new(3, DescriptorType::SampledImage, ShaderStages::FRAGMENT),
            DescriptorSetLayoutBinding::new(4, DescriptorType::SampledImage, ShaderStages::FRAGMENT),
            DescriptorSetLayoutBinding::new(SKY_BINDING, DescriptorType::SampledCubeImage, ShaderStages::FRAGMENT),
            DescriptorSetLayoutBinding::new(6, DescriptorType::Sampler, ShaderStages::FRAGMENT),
        ])?;
        let pool = device.create_descriptor_pool(config.frames_in_flight as u32)?;
        let sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("sky_sampler"),
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            address_mode: AddressMode::ClampToEdge,
        })?;

        let ring = FrameRing::try_new(config.frames_in_flight, |_| {
            let mut resources = FrameResourceTable::new();
            resources.set(CAMERA_KEY, camera_buffer(device)?);
            resources.set(PARAMS, uniform_buffer::<PostParams>(device, "post_params")?);
            let mut set = pool.allocate_set(set_layout.as_ref())?;
            set.write_sampler(6, sampler.as_ref())?;
            resources.set(SET, set);
            resources.bind_buffer(SET, 0, CAMERA_KEY)?;
            resources.bind_buffer(SET, 1, PARAMS)?;
            Ok(FrameSlot::new(resources, PostState::default()))
        })?;

        let (vertex_shader, fragment_shader) = shader_stages(cache, "post")?;
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
        let pipeline = PipelineCache::new(device, template, PipelineCache::placeholder(&[target_format], None))?;
        Ok(Self {
            ring,
            pipeline,
            _sampler: sampler,
            exposure: config.exposure,
            tone_mapping: config.tone_mapping,
            clear_color: config.clear_color,
            encode_srgb: needs_srgb_encode(target_format),
            has_inputs: false,
            _pool: pool,
        })
    }

    pub fn set_inputs(&mut self, inputs: PostEffectInputs<'_>) -> Result<()> {
        let targets = inputs.targets;
        for slot in self.ring.iter_mut() {
            let set = slot.resources.descriptor_set_mut(SET)?;
            set.write_texture(2, targets.lit.as_ref())?;
            set.write_texture(3, inputs.blurred.as_ref())?;
            set.write_texture(4, targets.gbuffer3.as_ref())?;
        }
        self.has_inputs = true;
        Ok(())
    }

    pub fn set_exposure(&mut self, exposure: f32) {
        self.exposure = exposure;
    }

    pub fn set_tone_mapping(&mut self, tone_mapping: ToneMapping) {
        self.tone_mapping = tone_mapping;
    }

    fn params(&self, sky_visible: bool) -> PostParams {
        PostParams {
            settings: [
                self.exposure,
                self.tone_mapping.shader_mode() as f32,
                flag(self.encode_srgb),
                flag(sky_visible),
            ],
            clear_color: self.clear_color,
        }
    }
}

impl RenderSystem for PostEffectSystem {
    fn label(&self) -> &'static str {
        LABEL
    }

    fn update(&mut self, ctx: &UpdateContext<'_>) -> Result<()> {
        let sky = visible_sky(ctx.scene);
        let (_, sky_texture) = ctx.assets.cube_or_default(sky);
        let params = self.params(sky.is_some());

        let slot = self.ring.current_mut();
        if slot.state.sky != Some(sky_texture.id()) {
            slot.resources.descriptor_set_mut(SET)?.write_texture(SKY_BINDING, sky_texture.as_ref())?;
            log::debug!("{}: sky cube {:?} bound to slot", LABEL, sky_texture.id());
            slot.state.sky = Some(sky_texture.id());
        }
        slot.resources.buffer(PARAMS)?.write(ctx.device, 0, &[params])?;
        slot.state.params = params;
        self.ring.mark_updated();
        Ok(())
    }

    fn render(
        &mut self,
        ctx: &mut RenderContext<'_>,
        encoder: &mut dyn CommandEncoder,
        target: &FrameBuffer,
    ) -> Result<()> {
        if !self.has_inputs {
            return Err(RenderError::MissingResource(format!("{} inputs", LABEL)));
        }
        let encode_srgb = target.color_formats().first().copied().is_some_and(needs_srgb_encode);
        if encode_srgb != self.encode_srgb {
            log::debug!("{}: target format changed; sRGB encode {}", LABEL, encode_srgb);
            self.encode_srgb = encode_srgb;
        }
        let slot = self.ring.updated_slot(LABEL)?;
        self.pipeline.ensure(ctx.device, target)?;
        let resources = &slot.resources;
        let mut params = slot.state.params;
        if params.settings[2] != flag(encode_srgb) {
            params.settings[2] = flag(encode_srgb);
            resources.buffer(PARAMS)?.write(ctx.device, 0, &[params])?;
        }
        write_camera(ctx.device, resources.buffer(CAMERA_KEY)?, ctx.camera)?;

        let mut pass = encoder.begin_render_pass(target.pass_descriptor(
            Some(LABEL),
            LoadOp::Clear,
            ClearColor::BLACK,
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
    use crate::assets::AssetManager;
    use crate::layout::LayoutTracker;
    use crate::systems::test_support;
    use prism_rhi::headless::{HeadlessDevice, RecordedCommand};
    use scene_api::{Scene, Shape, SkyBox};

    fn update(system: &mut PostEffectSystem, device: &HeadlessDevice, assets: &AssetManager, scene: &Scene) {
        system
            .update(&UpdateContext { device, assets, scene, camera: None, delta_time: 0.0 })
            .unwrap();
    }

    #[test]
    fn params_follow_config_and_sky_visibility() {
        let device = HeadlessDevice::new();
        let assets = test_support::assets(&device);
        let config = RendererConfig { exposure: 2.0, tone_mapping: ToneMapping::Aces, ..Default::default() };
        let mut system =
            PostEffectSystem::new(device.as_ref(), &WorkflowCache::disabled(), &config, TextureFormat::Bgra8UnormSrgb)
                .unwrap();

        update(&mut system, &device, &assets, &Scene::new());
        assert_eq!(system.ring.current().state.params.settings, [2.0, 1.0, 0.0, 0.0]);
        assert_eq!(system.ring.current().state.sky, Some(assets.default_sky().id()));

        let mut scene = Scene::new();
        scene.add(Shape::new("sky").with(SkyBox::new(assets.default_sky_id())));
        update(&mut system, &device, &assets, &scene);
        assert_eq!(system.ring.current().state.params.settings[3], 1.0);
        assert_eq!(std::mem::size_of::<PostParams>(), 32);
    }

    #[test]
    fn draws_onto_a_linear_target_with_srgb_encoding() {
        let device = HeadlessDevice::new();
        let assets = test_support::assets(&device);
        let config = RendererConfig::default();
        let targets = RenderTargets::ensure_size(device.as_ref(), None, 8, 8).unwrap();
        let mut system =
            PostEffectSystem::new(device.as_ref(), &WorkflowCache::disabled(), &config, TextureFormat::Bgra8UnormSrgb)
                .unwrap();
        system.set_inputs(PostEffectInputs { targets: &targets, blurred: &targets.blur_pong }).unwrap();
        update(&mut system, &device, &assets, &Scene::new());

        let mut layouts = LayoutTracker::new();
        let mut encoder = device.create_command_encoder(None).unwrap();
        layouts.prepare_sampled(
            encoder.as_mut(),
            &[targets.lit.as_ref(), targets.blur_pong.as_ref(), targets.gbuffer3.as_ref()],
        );
        device.submit(vec![encoder.finish().unwrap()], None).unwrap();
        device.take_commands();

        let target = test_support::target(&device, &[TextureFormat::Rgba8Unorm], false);
        test_support::run(&device, &assets, &mut layouts, &mut system, None, &target).unwrap();
        assert!(system.encode_srgb);
        assert_eq!(system.pipeline.rebuilds(), 1);
        let commands = device.take_commands();
        assert!(commands
            .iter()
            .any(|c| matches!(c, RecordedCommand::BeginRenderPass { label: Some("post_effect"), .. })));
        let stats = device.stats();
        assert_eq!(stats.layout_violations, 0);
        assert_eq!(stats.incomplete_descriptor_sets, 0);
    }
}
