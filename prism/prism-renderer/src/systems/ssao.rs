//! Screen-space ambient occlusion in two sub-passes over the shared full-screen quad: raw
//! occlusion from a hemisphere kernel into a scratch target, then a 4x4 box blur into the
//! output target that cancels the tiled rotation noise.

use super::{
    camera_buffer, draw_screen_quad, screen_quad_input, shader_stages, uniform_buffer, write_camera, RenderContext,
    RenderSystem, UpdateContext, CAMERA_KEY,
};
use crate::assets::primitives::{rotation_noise, XorShift};
use crate::config::{RendererConfig, SsaoConfig};
use crate::error::{RenderError, Result};
use crate::frame_resources::{FrameResourceTable, FrameRing, FrameSlot};
use crate::pipeline_cache::{PipelineCache, PipelineTemplate};
use crate::targets::{single, RenderTargets, OCCLUSION_FORMAT};
use crate::workflow::WorkflowCache;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use prism_rhi::{
    ClearColor, CommandEncoder, CullMode, DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBinding,
    DescriptorType, Device, FrameBuffer, ImageLayout, LoadOp, PrimitiveTopology, RasterizationState, ShaderStages, Texture,
    TextureDescriptor, TextureDimension, TextureFormat, TextureUsage,
};
use std::sync::Arc;

const LABEL: &str = "ssao";
const BLUR_LABEL: &str = "ssao_blur";
const PARAMS: &str = "params";
const RAW_SET: &str = "raw_set";
const BLUR_SET: &str = "blur_set";
const MAX_KERNEL: usize = 64;
const NOISE_SIZE: u32 = 4;
const KERNEL_SEED: u32 = 0x5eed_a0a0;
const NOISE_SEED: u32 = 0x0dd_c0de;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SsaoParams {
    settings: [f32; 4],
    kernel: [[f32; 4]; MAX_KERNEL],
}

/// Hemisphere samples around +Z, denser toward the origin.
pub fn sample_kernel(size: usize, seed: u32) -> Vec<Vec3> {
    let mut rng = XorShift::new(seed);
    (0..size)
        .map(|i| {
            let direction = Vec3::new(rng.next_f32() * 2.0 - 1.0, rng.next_f32() * 2.0 - 1.0, rng.next_f32())
                .try_normalize()
                .unwrap_or(Vec3::Z);
            let t = i as f32 / size as f32;
            let scale = 0.1 + 0.9 * t * t;
            direction * rng.next_f32() * scale
        })
        .collect()
}

impl SsaoParams {
    fn new(config: &SsaoConfig) -> Self {
        let size = (config.kernel_size as usize).clamp(1, MAX_KERNEL);
        let mut kernel = [[0.0; 4]; MAX_KERNEL];
        for (slot, sample) in kernel.iter_mut().zip(sample_kernel(size, KERNEL_SEED)) {
            *slot = sample.extend(0.0).to_array();
        }
        Self { settings: [size as f32, config.radius, config.bias, 0.0], kernel }
    }
}

/// Render targets read and written by the sub-passes; replaced on every resize.
#[derive(Debug)]
struct SsaoInputs {
    raw: Arc<dyn Texture>,
    raw_target: FrameBuffer,
}

#[derive(Debug)]
pub struct SsaoSystem {
    ring: FrameRing<FrameSlot<()>>,
    raw_pipeline: PipelineCache,
    blur_pipeline: PipelineCache,
    noise: Arc<dyn Texture>,
    inputs: Option<SsaoInputs>,
    _pool: Box<dyn DescriptorPool>,
}

impl SsaoSystem {
    pub fn new(device: &dyn Device, cache: &WorkflowCache, config: &RendererConfig) -> Result<Self> {
        let raw_layout = device.create_descriptor_set_layout(&[
            DescriptorSetLayoutBinding::new(0, DescriptorType::UniformBuffer, ShaderStages::FRAGMENT),
            DescriptorSetLayoutBinding::new(1, DescriptorType::UniformBuffer, ShaderStages::FRAGMENT),
            DescriptorSetLayoutBinding::new(2, DescriptorType::SampledImage, ShaderStages::FRAGMENT),
            DescriptorSetLayoutBinding::new(3, DescriptorType::SampledImage, ShaderStages::FRAGMENT),
            DescriptorSetLayoutBinding::new(4, DescriptorType::SampledImage, ShaderStages::FRAGMENT),
        ])?;
        let blur_layout = device.create_descriptor_set_layout(&[DescriptorSetLayoutBinding::new(
            0,
            DescriptorType::SampledImage,
            ShaderStages::FRAGMENT,
        )])?;
        let pool = device.create_descriptor_pool(2 * config.frames_in_flight as u32)?;

        let noise: Arc<dyn Texture> = device
            .create_texture(&TextureDescriptor {
                label: Some("ssao_noise"),
                size: (NOISE_SIZE, NOISE_SIZE, 1),
                format: TextureFormat::Rgba8Unorm,
                usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
                dimension: TextureDimension::D2,
            })?
            .into();
        device.write_texture(noise.as_ref(), 0, &rotation_noise(NOISE_SEED, NOISE_SIZE))?;
        let params = SsaoParams::new(&config.ssao);

        let ring = FrameRing::try_new(config.frames_in_flight, |_| {
            let mut resources = FrameResourceTable::new();
            resources.set(CAMERA_KEY, camera_buffer(device)?);
            let params_buffer = uniform_buffer::<SsaoParams>(device, "ssao_params")?;
            params_buffer.write(device, 0, &[params])?;
            resources.set(PARAMS, params_buffer);
            let mut raw_set = pool.allocate_set(raw_layout.as_ref())?;
            raw_set.write_texture(4, noise.as_ref())?;
            resources.set(RAW_SET, raw_set);
            resources.set(BLUR_SET, pool.allocate_set(blur_layout.as_ref())?);
            resources.bind_buffer(RAW_SET, 0, CAMERA_KEY)?;
            resources.bind_buffer(RAW_SET, 1, PARAMS)?;
            Ok(FrameSlot::new(resources, ()))
        })?;

        let quad_template = |label: &'static str,
                             shader: &str,
                             layout: Arc<dyn DescriptorSetLayout>|
         -> Result<PipelineTemplate> {
            let (vertex_shader, fragment_shader) = shader_stages(cache, shader)?;
            Ok(PipelineTemplate {
                label,
                vertex_shader,
                fragment_shader: Some(fragment_shader),
                vertex_input: screen_quad_input(),
                topology: PrimitiveTopology::TriangleList,
                rasterization: RasterizationState { cull_mode: CullMode::None, ..Default::default() },
                blend: None,
                depth: None,
                set_layouts: vec![layout],
            })
        };
        let placeholder = PipelineCache::placeholder(&[OCCLUSION_FORMAT], None);
        let raw_pipeline = PipelineCache::new(device, quad_template(LABEL, "ssao", raw_layout)?, placeholder.clone())?;
        let blur_pipeline =
            PipelineCache::new(device, quad_template(BLUR_LABEL, "ssao_blur", blur_layout)?, placeholder)?;
        log::debug!("{}: {} kernel samples, radius {}", LABEL, params.settings[0], config.ssao.radius);
        Ok(Self { ring, raw_pipeline, blur_pipeline, noise, inputs: None, _pool: pool })
    }

    /// Point every slot at the current G-buffer and scratch target.
    pub fn set_inputs(&mut self, targets: &RenderTargets) -> Result<()> {
        for slot in self.ring.iter_mut() {
            let raw_set = slot.resources.descriptor_set_mut(RAW_SET)?;
            raw_set.write_texture(2, targets.gbuffer1.as_ref())?;
            raw_set.write_texture(3, targets.gbuffer3.as_ref())?;
            slot.resources.descriptor_set_mut(BLUR_SET)?.write_texture(0, targets.ssao_raw.as_ref())?;
        }
        self.inputs = Some(SsaoInputs { raw: targets.ssao_raw.clone(), raw_target: single(&targets.ssao_raw)? });
        Ok(())
    }

    pub fn noise(&self) -> &Arc<dyn Texture> {
        &self.noise
    }
}

impl RenderSystem for SsaoSystem {
    fn label(&self) -> &'static str {
        LABEL
    }

    fn update(&mut self, _ctx: &UpdateContext<'_>) -> Result<()> {
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
        let inputs = self
            .inputs
            .as_ref()
            .ok_or_else(|| RenderError::MissingResource(format!("{} inputs", LABEL)))?;
        self.raw_pipeline.ensure(ctx.device, &inputs.raw_target)?;
        self.blur_pipeline.ensure(ctx.device, target)?;
        let resources = &slot.resources;
        write_camera(ctx.device, resources.buffer(CAMERA_KEY)?, ctx.camera)?;
        ctx.layouts.prepare_sampled(encoder, &[self.noise.as_ref()]);

        ctx.layouts.transition(encoder, inputs.raw.as_ref(), ImageLayout::ColorAttachment);
        let mut pass = encoder.begin_render_pass(inputs.raw_target.pass_descriptor(
            Some(LABEL),
            LoadOp::Clear,
            ClearColor::WHITE,
            LoadOp::Clear,
        ))?;
        pass.set_pipeline(self.raw_pipeline.pipeline());
        pass.bind_descriptor_set(0, resources.descriptor_set(RAW_SET)?);
        draw_screen_quad(pass.as_mut(), ctx.assets)?;
        pass.end();

        ctx.layouts.transition(encoder, inputs.raw.as_ref(), ImageLayout::ShaderReadOnly);
        let mut pass = encoder.begin_render_pass(target.pass_descriptor(
            Some(BLUR_LABEL),
            LoadOp::Clear,
            ClearColor::WHITE,
            LoadOp::Clear,
        ))?;
        pass.set_pipeline(self.blur_pipeline.pipeline());
        pass.bind_descriptor_set(0, resources.descriptor_set(BLUR_SET)?);
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
    use prism_rhi::headless::{HeadlessDevice, RecordedCommand};
    use scene_api::Scene;

    #[test]
    fn kernel_stays_in_the_unit_hemisphere_and_is_deterministic() {
        let kernel = sample_kernel(64, 7);
        assert_eq!(kernel, sample_kernel(64, 7));
        for sample in &kernel {
            assert!(sample.z >= 0.0);
            assert!(sample.length() <= 1.0 + 1e-5);
        }
        let params = SsaoParams::new(&SsaoConfig { kernel_size: 16, ..Default::default() });
        assert_eq!(params.settings[0], 16.0);
        assert_eq!(params.kernel[16], [0.0; 4]);
        assert_eq!(std::mem::size_of::<SsaoParams>(), 1040);
    }

    #[test]
    fn raw_pass_then_blur_into_the_output() {
        let device = HeadlessDevice::new();
        let assets = test_support::assets(&device);
        let config = RendererConfig::default();
        let targets = RenderTargets::ensure_size(device.as_ref(), None, 8, 8).unwrap();
        let mut system = SsaoSystem::new(device.as_ref(), &WorkflowCache::disabled(), &config).unwrap();
        let scene = Scene::new();
        let ctx = UpdateContext { device: device.as_ref(), assets: &assets, scene: &scene, camera: None, delta_time: 0.0 };

        let mut layouts = LayoutTracker::new();
        system.update(&ctx).unwrap();
        assert!(matches!(
            test_support::run(&device, &assets, &mut layouts, &mut system, None, &targets.ssao_target().unwrap()),
            Err(RenderError::MissingResource(_))
        ));

        // The failed attempt never submitted its barriers.
        let mut layouts = LayoutTracker::new();
        layouts.uploaded(system.noise().id());
        system.set_inputs(&targets).unwrap();
        let mut encoder = device.create_command_encoder(None).unwrap();
        layouts.prepare_sampled(encoder.as_mut(), &[targets.gbuffer1.as_ref(), targets.gbuffer3.as_ref()]);
        device.submit(vec![encoder.finish().unwrap()], None).unwrap();
        device.take_commands();
        test_support::run(&device, &assets, &mut layouts, &mut system, None, &targets.ssao_target().unwrap()).unwrap();

        let commands = device.take_commands();
        let passes: Vec<_> = commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BeginRenderPass { label, .. } => *label,
                _ => None,
            })
            .collect();
        assert_eq!(passes, vec!["ssao", "ssao_blur"]);
        assert_eq!(commands.iter().filter(|c| c.is_draw()).count(), 2);
        let noise = system.noise().id();
        assert!(!commands
            .iter()
            .any(|c| matches!(c, RecordedCommand::TextureBarrier { texture, .. } if *texture == noise)));
        let stats = device.stats();
        assert_eq!(stats.layout_violations, 0);
        assert_eq!(stats.discarded_uploads, 0);
        assert_eq!(stats.incomplete_descriptor_sets, 0);
        assert_eq!(system.frame_index(), 1);
    }

    #[test]
    fn unregistered_noise_upload_is_caught() {
        let device = HeadlessDevice::new();
        let assets = test_support::assets(&device);
        let targets = RenderTargets::ensure_size(device.as_ref(), None, 8, 8).unwrap();
        let mut system = SsaoSystem::new(device.as_ref(), &WorkflowCache::disabled(), &RendererConfig::default()).unwrap();
        system.set_inputs(&targets).unwrap();
        let scene = Scene::new();
        let ctx = UpdateContext { device: device.as_ref(), assets: &assets, scene: &scene, camera: None, delta_time: 0.0 };
        system.update(&ctx).unwrap();

        let mut layouts = LayoutTracker::new();
        let mut encoder = device.create_command_encoder(None).unwrap();
        layouts.prepare_sampled(encoder.as_mut(), &[targets.gbuffer1.as_ref(), targets.gbuffer3.as_ref()]);
        device.submit(vec![encoder.finish().unwrap()], None).unwrap();
        test_support::run(&device, &assets, &mut layouts, &mut system, None, &targets.ssao_target().unwrap()).unwrap();

        assert_eq!(device.stats().discarded_uploads, 1);
        assert_eq!(layouts.layout(system.noise().id()), ImageLayout::ShaderReadOnly);
    }
}
