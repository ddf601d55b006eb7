//! Draws `LinesMesh` and `LinesGrid` components. A shape carrying both contributes the
//! segments of each under one transform.

use super::{LineBatch, RenderContext, RenderSystem, UpdateContext};
use crate::config::RendererConfig;
use crate::error::Result;
use crate::scene_walk;
use crate::workflow::WorkflowCache;
use prism_rhi::{CommandEncoder, Device, FrameBuffer};
use scene_api::{LinesGrid, LinesMesh};

#[derive(Debug)]
pub struct LinesSystem {
    batch: LineBatch,
}

impl LinesSystem {
    pub fn new(device: &dyn Device, cache: &WorkflowCache, config: &RendererConfig) -> Result<Self> {
        Ok(Self { batch: LineBatch::new(device, cache, config, "lines")? })
    }

    pub fn batch(&self) -> &LineBatch {
        &self.batch
    }
}

impl RenderSystem for LinesSystem {
    fn label(&self) -> &'static str {
        "lines"
    }

    fn update(&mut self, ctx: &UpdateContext<'_>) -> Result<()> {
        let draws = scene_walk::collect(ctx.scene, |shape| {
            let segments: Vec<_> = [
                shape.get_visible::<LinesMesh>().map(LinesMesh::segments),
                shape.get_visible::<LinesGrid>().map(LinesGrid::segments),
            ]
            .into_iter()
            .flatten()
            .collect();
            (!segments.is_empty()).then_some(segments)
        });
        self.batch.update(ctx.device, &draws)
    }

    fn render(
        &mut self,
        ctx: &mut RenderContext<'_>,
        encoder: &mut dyn CommandEncoder,
        target: &FrameBuffer,
    ) -> Result<()> {
        self.batch.render(ctx, encoder, target)
    }

    fn frame_index(&self) -> usize {
        self.batch.frame_index()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutTracker;
    use crate::systems::test_support;
    use crate::error::RenderError;
    use prism_rhi::headless::{HeadlessDevice, RecordedCommand};
    use prism_rhi::TextureFormat;
    use scene_api::{LineSegment, Scene, Shape};

    fn line_shape(name: &str) -> Shape {
        Shape::new(name).with(LinesMesh::new(vec![LineSegment::new([0.0; 3], [1.0, 0.0, 0.0], [1.0; 3])]))
    }

    fn small_config() -> RendererConfig {
        let mut config = RendererConfig::default();
        config.capacities.instances = 1;
        config
    }

    #[test]
    fn zero_segments_render_without_a_draw() {
        let device = HeadlessDevice::new();
        let assets = test_support::assets(&device);
        let config = small_config();
        let mut system = LinesSystem::new(device.as_ref(), &WorkflowCache::disabled(), &config).unwrap();
        let target = test_support::target(&device, &[TextureFormat::Rgba16Float], true);
        let scene = Scene::new();
        let mut layouts = LayoutTracker::new();
        device.take_commands();

        system
            .update(&UpdateContext { device: device.as_ref(), assets: &assets, scene: &scene, camera: None, delta_time: 0.0 })
            .unwrap();
        test_support::run(&device, &assets, &mut layouts, &mut system, None, &target).unwrap();

        assert_eq!(system.frame_index(), 1);
        assert!(!device.take_commands().iter().any(RecordedCommand::is_draw));
        assert_eq!(device.stats().zero_count_draws, 0);
    }

    #[test]
    fn render_without_update_fails() {
        let device = HeadlessDevice::new();
        let assets = test_support::assets(&device);
        let mut system = LinesSystem::new(device.as_ref(), &WorkflowCache::disabled(), &small_config()).unwrap();
        let target = test_support::target(&device, &[TextureFormat::Rgba16Float], true);
        let mut layouts = LayoutTracker::new();
        let result = test_support::run(&device, &assets, &mut layouts, &mut system, None, &target);
        assert!(matches!(result, Err(RenderError::NotUpdated { system: "lines", slot: 0 })));
        assert_eq!(system.frame_index(), 0);
    }

    #[test]
    fn transform_growth_rebinds_once_and_draws_from_the_new_buffer() {
        let device = HeadlessDevice::new();
        let assets = test_support::assets(&device);
        let mut config = small_config();
        config.frames_in_flight = 1;
        let mut system = LinesSystem::new(device.as_ref(), &WorkflowCache::disabled(), &config).unwrap();
        let target = test_support::target(&device, &[TextureFormat::Rgba16Float], true);
        let mut layouts = LayoutTracker::new();
        let mut scene = Scene::new();
        for name in ["a", "b", "c"] {
            scene.add(line_shape(name));
        }

        for _ in 0..2 {
            system
                .update(&UpdateContext {
                    device: device.as_ref(),
                    assets: &assets,
                    scene: &scene,
                    camera: None,
                    delta_time: 0.0,
                })
                .unwrap();
            assert_eq!(system.batch().rebinds(), 1);
            test_support::run(&device, &assets, &mut layouts, &mut system, None, &target).unwrap();
        }

        let commands = device.take_commands();
        let draws: Vec<_> = commands.iter().filter(|c| c.is_draw()).collect();
        assert_eq!(draws.len(), 2);
        assert!(matches!(draws[0], RecordedCommand::DrawIndexed { index_count: 6, instance_count: 1, .. }));
        let stats = device.stats();
        assert_eq!(stats.incomplete_descriptor_sets, 0);
        assert_eq!(stats.incompatible_pipelines, 0);
        assert_eq!(stats.layout_violations, 0);
        assert_eq!(system.batch().pipeline().rebuilds(), 0);
    }
}
