//! Frame orchestration. One [`Renderer::render_frame`] call waits for the frame slot's fence,
//! updates every system from the scene, records shadow, G-buffer, SSAO, lighting, lines,
//! blur, post and overlay passes into one command buffer, then submits and presents.
//!
//! Every texture crosses roles through the [`LayoutTracker`]: the renderer transitions
//! attachments and sampled inputs before each system runs, and systems with internal
//! scratch targets (shadow, SSAO, blur) transition those themselves.

use crate::assets::AssetManager;
use crate::config::{RendererConfig, ToneMapping};
use crate::error::{RenderError, Result};
use crate::frame_resources::FrameRing;
use crate::layout::LayoutTracker;
use crate::overlay::OverlayRenderer;
use crate::systems::{
    BlurSystem, CoordinateAxesSystem, LightingInputs, LightingSystem, LinesSystem, PbrSystem, PostEffectInputs,
    PostEffectSystem, RenderContext, RenderSystem, ShadowMapSystem, SsaoSystem, UpdateContext,
};
use crate::targets::{single, RenderTargets, ShadowTargets};
use crate::workflow::WorkflowCache;
use prism_rhi::{
    Attachment, ClearColor, CommandEncoder, Device, Fence, FrameBuffer, ImageLayout, LoadOp, ResourceId, Swapchain,
    TextureFormat,
};
use scene_api::{Scene, TextureId};
use std::sync::Arc;

/// Targets one frame records into.
struct FrameTargets<'a> {
    targets: &'a RenderTargets,
    shadows: &'a ShadowTargets,
    present: &'a FrameBuffer,
}

/// Render systems in recording order. Optional systems are off in the configuration.
struct Systems {
    shadow: Option<ShadowMapSystem>,
    pbr: PbrSystem,
    ssao: Option<SsaoSystem>,
    lighting: LightingSystem,
    axes: CoordinateAxesSystem,
    lines: LinesSystem,
    blur: Option<BlurSystem>,
    post: PostEffectSystem,
}

impl Systems {
    fn new(
        device: &dyn Device,
        cache: &WorkflowCache,
        config: &RendererConfig,
        shadows: &ShadowTargets,
        present_format: TextureFormat,
    ) -> Result<Self> {
        Ok(Self {
            shadow: match config.shadow.enabled {
                true => Some(ShadowMapSystem::new(device, cache, config, shadows.clone())?),
                false => None,
            },
            pbr: PbrSystem::new(device, cache, config)?,
            ssao: match config.ssao.enabled {
                true => Some(SsaoSystem::new(device, cache, config)?),
                false => None,
            },
            lighting: LightingSystem::new(device, cache, config)?,
            axes: CoordinateAxesSystem::new(device, cache, config)?,
            lines: LinesSystem::new(device, cache, config)?,
            blur: match config.blur.enabled {
                true => Some(BlurSystem::new(device, cache, config)?),
                false => None,
            },
            post: PostEffectSystem::new(device, cache, config, present_format)?,
        })
    }

    fn each(&self) -> Vec<&dyn RenderSystem> {
        let mut systems: Vec<&dyn RenderSystem> = Vec::with_capacity(8);
        if let Some(shadow) = self.shadow.as_ref() {
            systems.push(shadow);
        }
        systems.push(&self.pbr);
        if let Some(ssao) = self.ssao.as_ref() {
            systems.push(ssao);
        }
        systems.push(&self.lighting);
        systems.push(&self.axes);
        systems.push(&self.lines);
        if let Some(blur) = self.blur.as_ref() {
            systems.push(blur);
        }
        systems.push(&self.post);
        systems
    }

    fn each_mut(&mut self) -> Vec<&mut dyn RenderSystem> {
        let mut systems: Vec<&mut dyn RenderSystem> = Vec::with_capacity(8);
        if let Some(shadow) = self.shadow.as_mut() {
            systems.push(shadow);
        }
        systems.push(&mut self.pbr);
        if let Some(ssao) = self.ssao.as_mut() {
            systems.push(ssao);
        }
        systems.push(&mut self.lighting);
        systems.push(&mut self.axes);
        systems.push(&mut self.lines);
        if let Some(blur) = self.blur.as_mut() {
            systems.push(blur);
        }
        systems.push(&mut self.post);
        systems
    }

    /// Textures the systems uploaded while being built.
    fn uploaded(&self) -> Vec<ResourceId> {
        self.ssao.iter().map(|ssao| ssao.noise().id()).collect()
    }

    /// Rebind every sampled render target after the targets were (re)created.
    fn set_inputs(&mut self, targets: &RenderTargets, shadows: &ShadowTargets) -> Result<()> {
        if let Some(ssao) = self.ssao.as_mut() {
            ssao.set_inputs(targets)?;
        }
        self.lighting.set_inputs(LightingInputs { targets, shadows })?;
        let blurred = match self.blur.as_mut() {
            Some(blur) => {
                blur.set_inputs(targets)?;
                &targets.blur_pong
            }
            None => &targets.lit,
        };
        self.post.set_inputs(PostEffectInputs { targets, blurred })
    }

    fn record(
        &mut self,
        ctx: &mut RenderContext<'_>,
        encoder: &mut dyn CommandEncoder,
        frame: &FrameTargets<'_>,
    ) -> Result<()> {
        let targets = frame.targets;
        if let Some(shadow) = self.shadow.as_mut() {
            shadow.render(ctx, encoder, &frame.shadows.face_target(0, 0)?)?;
        }

        let gbuffer = targets.gbuffer_target()?;
        ctx.layouts.prepare_attachments(encoder, &gbuffer);
        self.pbr.render(ctx, encoder, &gbuffer)?;

        if let Some(ssao) = self.ssao.as_mut() {
            ctx.layouts.prepare_sampled(encoder, &[targets.gbuffer1.as_ref(), targets.gbuffer3.as_ref()]);
            let occlusion = targets.ssao_target()?;
            ctx.layouts.prepare_attachments(encoder, &occlusion);
            ssao.render(ctx, encoder, &occlusion)?;
        }

        ctx.layouts.prepare_sampled(
            encoder,
            &[
                targets.gbuffer0.as_ref(),
                targets.gbuffer1.as_ref(),
                targets.gbuffer2.as_ref(),
                targets.gbuffer3.as_ref(),
                targets.ssao.as_ref(),
                frame.shadows.cubes.as_ref(),
            ],
        );
        let lit = targets.lit_target()?;
        ctx.layouts.prepare_attachments(encoder, &lit);
        self.lighting.render(ctx, encoder, &lit)?;

        let lit_with_depth = targets.lit_with_depth_target()?;
        ctx.layouts.prepare_attachments(encoder, &lit_with_depth);
        self.axes.render(ctx, encoder, &lit_with_depth)?;
        self.lines.render(ctx, encoder, &lit_with_depth)?;

        let blurred = match self.blur.as_mut() {
            Some(blur) => {
                blur.render(ctx, encoder, &single(&targets.blur_pong)?)?;
                &targets.blur_pong
            }
            None => &targets.lit,
        };

        ctx.layouts.prepare_sampled(
            encoder,
            &[targets.lit.as_ref(), blurred.as_ref(), targets.gbuffer3.as_ref()],
        );
        ctx.layouts.prepare_attachments(encoder, frame.present);
        self.post.render(ctx, encoder, frame.present)
    }
}

pub struct Renderer {
    device: Arc<dyn Device>,
    config: RendererConfig,
    cache: WorkflowCache,
    assets: AssetManager,
    layouts: LayoutTracker,
    targets: Option<RenderTargets>,
    shadow_targets: ShadowTargets,
    systems: Systems,
    overlay: Option<Box<dyn OverlayRenderer>>,
    fences: FrameRing<Box<dyn Fence>>,
    frames: u64,
}

impl Renderer {
    /// Build every system for a presentation target of `present_format`. Targets sized to the
    /// swapchain are created on the first frame.
    pub fn new(device: Arc<dyn Device>, present_format: TextureFormat, config: RendererConfig) -> Result<Self> {
        let config = config.sanitized();
        let cache = WorkflowCache::new(&config.cache);
        let gpu = device.as_ref();
        let assets = AssetManager::new(gpu, &config, &cache)?;
        let shadow_targets = match config.shadow.enabled {
            true => ShadowTargets::new(gpu, config.shadow.resolution, config.shadow.max_lights)?,
            false => ShadowTargets::new(gpu, 1, 1)?,
        };
        let systems = Systems::new(gpu, &cache, &config, &shadow_targets, present_format)?;
        let mut layouts = LayoutTracker::new();
        for texture in systems.uploaded() {
            layouts.uploaded(texture);
        }
        let fences = FrameRing::try_new(config.frames_in_flight, |_| Ok(gpu.create_fence(true)?))?;
        log::info!(
            "renderer ready: {} frames in flight, ssao {}, blur {}, shadows {}",
            config.frames_in_flight,
            config.ssao.enabled,
            config.blur.enabled,
            config.shadow.enabled
        );
        Ok(Self {
            device,
            config,
            cache,
            assets,
            layouts,
            targets: None,
            shadow_targets,
            systems,
            overlay: None,
            fences,
            frames: 0,
        })
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn assets(&self) -> &AssetManager {
        &self.assets
    }

    pub fn assets_mut(&mut self) -> &mut AssetManager {
        &mut self.assets
    }

    /// Frames submitted so far.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Frame slot the next frame records into; its fence is waited on first.
    pub fn frame_slot(&self) -> usize {
        self.fences.index()
    }

    /// Ring index of every active system, in recording order.
    pub fn system_frame_indices(&self) -> Vec<(&'static str, usize)> {
        self.systems.each().into_iter().map(|system| (system.label(), system.frame_index())).collect()
    }

    pub fn set_overlay(&mut self, overlay: Box<dyn OverlayRenderer>) {
        self.overlay = Some(overlay);
    }

    pub fn take_overlay(&mut self) -> Option<Box<dyn OverlayRenderer>> {
        self.overlay.take()
    }

    pub fn set_exposure(&mut self, exposure: f32) {
        self.config.exposure = exposure;
        self.systems.post.set_exposure(exposure);
    }

    pub fn set_tone_mapping(&mut self, tone_mapping: ToneMapping) {
        self.config.tone_mapping = tone_mapping;
        self.systems.post.set_tone_mapping(tone_mapping);
    }

    /// Upload an RGBA8 texture for materials.
    pub fn upload_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> Result<TextureId> {
        self.assets.upload_texture(self.device.as_ref(), width, height, rgba)
    }

    /// Upload a cube map (six RGBA8 faces) usable as a sky box.
    pub fn upload_cube_texture(&mut self, size: u32, faces: &[Vec<u8>]) -> Result<TextureId> {
        self.assets.upload_cube_texture(self.device.as_ref(), size, faces, &self.cache)
    }

    /// Render `scene` into the next swapchain image and present it. A zero-sized swapchain
    /// (minimized window) skips the frame.
    pub fn render_frame(&mut self, scene: &Scene, swapchain: &mut dyn Swapchain, delta_time: f32) -> Result<()> {
        let (width, height) = swapchain.extent();
        if width == 0 || height == 0 {
            log::trace!("swapchain extent {:?}; frame skipped", (width, height));
            return Ok(());
        }
        let device = Arc::clone(&self.device);
        let device = device.as_ref();
        // The slot's buffers and descriptor sets stay untouched until its last submission retires.
        self.fences.current().wait(u64::MAX)?;

        self.assets.pack_scene(device, scene)?;
        for texture in self.assets.drain_uploaded() {
            self.layouts.uploaded(texture);
        }
        self.ensure_targets(device, width, height)?;
        let targets = self
            .targets
            .as_ref()
            .ok_or_else(|| RenderError::MissingResource("render targets".to_string()))?;

        let camera = scene.camera_view(width as f32 / height as f32);
        let update = UpdateContext { device, assets: &self.assets, scene, camera: camera.as_ref(), delta_time };
        for system in self.systems.each_mut() {
            system.update(&update)?;
        }

        let image = swapchain.acquire_next_image()?;
        let present = FrameBuffer::new(vec![Attachment::new(image.texture.clone())], None)?;
        let mut encoder = device.create_command_encoder(Some("prism_frame"))?;
        let mut ctx = RenderContext {
            device,
            assets: &self.assets,
            camera: camera.as_ref(),
            delta_time,
            layouts: &mut self.layouts,
        };
        let frame = FrameTargets { targets, shadows: &self.shadow_targets, present: &present };
        self.systems.record(&mut ctx, encoder.as_mut(), &frame)?;

        if let Some(overlay) = self.overlay.as_mut() {
            let mut pass = encoder.begin_render_pass(present.pass_descriptor(
                Some(overlay.label()),
                LoadOp::Load,
                ClearColor::TRANSPARENT,
                LoadOp::Load,
            ))?;
            overlay.render(device, pass.as_mut(), &present)?;
            pass.end();
        }

        self.layouts.transition(encoder.as_mut(), image.texture.as_ref(), ImageLayout::PresentSrc);
        let commands = encoder.finish()?;
        let fence = self.fences.current();
        fence.reset()?;
        device.submit(vec![commands], Some(fence.as_ref()))?;
        swapchain.present(image.image_index)?;
        // Swapchain contents are not reused; the next acquire starts from undefined.
        self.layouts.forget(image.texture.id());
        self.fences.advance();
        self.frames += 1;
        log::trace!("frame {} presented on image {}", self.frames, image.image_index);
        Ok(())
    }

    fn ensure_targets(&mut self, device: &dyn Device, width: u32, height: u32) -> Result<()> {
        let previous = self.targets.as_ref().map(|t| (t.generation(), t.all().map(|texture| texture.id())));
        let targets = RenderTargets::ensure_size(device, self.targets.take(), width, height)?;
        if previous.as_ref().map(|(generation, _)| *generation) == Some(targets.generation()) {
            self.targets = Some(targets);
            return Ok(());
        }
        if let Some((_, textures)) = previous {
            device.wait_idle()?;
            for texture in textures {
                self.layouts.forget(texture);
            }
        }
        log::debug!("render targets {}x{} (generation {})", width, height, targets.generation());
        self.systems.set_inputs(&targets, &self.shadow_targets)?;
        self.targets = Some(targets);
        Ok(())
    }
}
