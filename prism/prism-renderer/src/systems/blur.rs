//! Separable Gaussian ping-pong. The first iteration blurs the lit image horizontally into
//! the ping target and vertically into pong; each further iteration goes pong -> ping -> pong,
//! so the result always ends up in pong.

use super::{
    draw_screen_quad, screen_quad_input, shader_stages, uniform_buffer, RenderContext, RenderSystem, UpdateContext,
};
use crate::config::RendererConfig;
use crate::error::{RenderError, Result};
use crate::frame_resources::{FrameResourceTable, FrameRing, FrameSlot};
use crate::pipeline_cache::{PipelineCache, PipelineTemplate};
use crate::targets::{single, RenderTargets, HDR_FORMAT};
use crate::workflow::WorkflowCache;
use bytemuck::{Pod, Zeroable};
use prism_rhi::{
    ClearColor, CommandEncoder, CullMode, DescriptorPool, DescriptorSetLayoutBinding, DescriptorType, Device,
    FrameBuffer, ImageLayout, LoadOp, PrimitiveTopology, RasterizationState, ShaderStages, Texture,
};
use std::sync::Arc;

const LABEL: &str = "blur";
const HORIZONTAL: &str = "horizontal";
const VERTICAL: &str = "vertical";

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct BlurParams {
    direction: [f32; 4],
}

/// One half-iteration: which set samples which texture into which target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// lit -> ping, horizontal
    First,
    /// ping -> pong, vertical
    Vertical,
    /// pong -> ping, horizontal
    Horizontal,
}

impl Step {
    const ALL: [Step; 3] = [Step::First, Step::Vertical, Step::Horizontal];

    fn set_key(self) -> &'static str {
        match self {
            Step::First => "set_first",
            Step::Vertical => "set_vertical",
            Step::Horizontal => "set_horizontal",
        }
    }

    fn params_key(self) -> &'static str {
        match self {
            Step::Vertical => VERTICAL,
            Step::First | Step::Horizontal => HORIZONTAL,
        }
    }
}

/// Passes recorded for `iterations` (at least one).
fn schedule(iterations: u32) -> Vec<Step> {
    let mut steps = vec![Step::First, Step::Vertical];
    for _ in 1..iterations.max(1) {
        steps.extend([Step::Horizontal, Step::Vertical]);
    }
    steps
}

#[derive(Debug)]
struct BlurInputs {
    lit: Arc<dyn Texture>,
    ping: Arc<dyn Texture>,
    pong: Arc<dyn Texture>,
    ping_target: FrameBuffer,
}

impl BlurInputs {
    fn source(&self, step: Step) -> &Arc<dyn Texture> {
        match step {
            Step::First => &self.lit,
            Step::Vertical => &self.ping,
            Step::Horizontal => &self.pong,
        }
    }

    fn destination(&self, step: Step) -> &Arc<dyn Texture> {
        match step {
            Step::First | Step::Horizontal => &self.ping,
            Step::Vertical => &self.pong,
        }
    }
}

#[derive(Debug)]
pub struct BlurSystem {
    ring: FrameRing<FrameSlot<()>>,
    pipeline: PipelineCache,
    steps: Vec<Step>,
    inputs: Option<BlurInputs>,
    _pool: Box<dyn DescriptorPool>,
}

impl BlurSystem {
    pub fn new(device: &dyn Device, cache: &WorkflowCache, config: &RendererConfig) -> Result<Self> {
        let set_layout = device.create_descriptor_set_layout(&[
            DescriptorSetLayoutBinding::new(0, DescriptorType::UniformBuffer, ShaderStages::FRAGMENT),
            DescriptorSetLayoutBinding::new(1, DescriptorType::SampledImage, ShaderStages::FRAGMENT),
        ])?;
        let pool = device.create_descriptor_pool(Step::ALL.len() as u32 * config.frames_in_flight as u32)?;

        let ring = FrameRing::try_new(config.frames_in_flight, |_| {
            let mut resources = FrameResourceTable::new();
            for (key, direction) in [(HORIZONTAL, [1.0, 0.0, 0.0, 0.0]), (VERTICAL, [0.0, 1.0, 0.0, 0.0])] {
                let buffer = uniform_buffer::<BlurParams>(device, "blur_params")?;
                buffer.write(device, 0, &[BlurParams { direction }])?;
                resources.set(key, buffer);
            }
            for step in Step::ALL {
                resources.set(step.set_key(), pool.allocate_set(set_layout.as_ref())?);
                resources.bind_buffer(step.set_key(), 0, step.params_key())?;
            }
            Ok(FrameSlot::new(resources, ()))
        })?;

        let (vertex_shader, fragment_shader) = shader_stages(cache, "blur")?;
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
        Ok(Self { ring, pipeline, steps: schedule(config.blur.iterations), inputs: None, _pool: pool })
    }

    pub fn set_inputs(&mut self, targets: &RenderTargets) -> Result<()> {
        let inputs = BlurInputs {
            lit: targets.lit.clone(),
            ping: targets.blur_ping.clone(),
            pong: targets.blur_pong.clone(),
            ping_target: single(&targets.blur_ping)?,
        };
        for slot in self.ring.iter_mut() {
            for step in Step::ALL {
                slot.resources.descriptor_set_mut(step.set_key())?.write_texture(1, inputs.source(step).as_ref())?;
            }
        }
        self.inputs = Some(inputs);
        Ok(())
    }

    /// Passes recorded per frame.
    pub fn pass_count(&self) -> usize {
        self.steps.len()
    }
}

impl RenderSystem for BlurSystem {
    fn label(&self) -> &'static str {
        LABEL
    }

    fn update(&mut self, _ctx: &UpdateContext<'_>) -> Result<()> {
        self.ring.mark_updated();
        Ok(())
    }

    /// `target` must address the pong texture.
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
        self.pipeline.ensure(ctx.device, target)?;

        for &step in &self.steps {
            ctx.layouts.transition(encoder, inputs.source(step).as_ref(), ImageLayout::ShaderReadOnly);
            ctx.layouts.transition(encoder, inputs.destination(step).as_ref(), ImageLayout::ColorAttachment);
            let frame_buffer = match step {
                Step::Vertical => target,
                Step::First | Step::Horizontal => &inputs.ping_target,
            };
            let mut pass = encoder.begin_render_pass(frame_buffer.pass_descriptor(
                Some(LABEL),
                LoadOp::Clear,
                ClearColor::TRANSPARENT,
                LoadOp::Clear,
            ))?;
            pass.set_pipeline(self.pipeline.pipeline());
            pass.bind_descriptor_set(0, slot.resources.descriptor_set(step.set_key())?);
            draw_screen_quad(pass.as_mut(), ctx.assets)?;
            pass.end();
        }

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
    fn schedule_alternates_and_ends_vertical() {
        assert_eq!(schedule(0), vec![Step::First, Step::Vertical]);
        assert_eq!(
            schedule(3),
            vec![Step::First, Step::Vertical, Step::Horizontal, Step::Vertical, Step::Horizontal, Step::Vertical]
        );
    }

    #[test]
    fn ping_pong_ends_in_pong_without_layout_violations() {
        let device = HeadlessDevice::new();
        let assets = test_support::assets(&device);
        let mut config = RendererConfig::default();
        config.blur.iterations = 2;
        let targets = RenderTargets::ensure_size(device.as_ref(), None, 8, 8).unwrap();
        let mut system = BlurSystem::new(device.as_ref(), &WorkflowCache::disabled(), &config).unwrap();
        system.set_inputs(&targets).unwrap();
        let scene = Scene::new();
        system
            .update(&UpdateContext { device: device.as_ref(), assets: &assets, scene: &scene, camera: None, delta_time: 0.0 })
            .unwrap();
        device.take_commands();

        let mut layouts = LayoutTracker::new();
        let pong = single(&targets.blur_pong).unwrap();
        test_support::run(&device, &assets, &mut layouts, &mut system, None, &pong).unwrap();

        let destinations: Vec<_> = device
            .take_commands()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCommand::BeginRenderPass { color, .. } => color.first().copied(),
                _ => None,
            })
            .collect();
        let (ping, pong) = (targets.blur_ping.id(), targets.blur_pong.id());
        assert_eq!(destinations, vec![ping, pong, ping, pong]);
        assert_eq!(system.pass_count(), 4);
        let stats = device.stats();
        assert_eq!(stats.layout_violations, 0);
        assert_eq!(stats.incomplete_descriptor_sets, 0);
    }
}
