//! Draws every visible `CoordinateSystem` as colored axis lines.

use super::{LineBatch, RenderContext, RenderSystem, UpdateContext};
use crate::config::RendererConfig;
use crate::error::Result;
use crate::scene_walk;
use crate::workflow::WorkflowCache;
use prism_rhi::{CommandEncoder, Device, FrameBuffer};
use scene_api::CoordinateSystem;

#[derive(Debug)]
pub struct CoordinateAxesSystem {
    batch: LineBatch,
}

impl CoordinateAxesSystem {
    pub fn new(device: &dyn Device, cache: &WorkflowCache, config: &RendererConfig) -> Result<Self> {
        Ok(Self { batch: LineBatch::new(device, cache, config, "coordinate_axes")? })
    }
}

impl RenderSystem for CoordinateAxesSystem {
    fn label(&self) -> &'static str {
        "coordinate_axes"
    }

    fn update(&mut self, ctx: &UpdateContext<'_>) -> Result<()> {
        let draws = scene_walk::collect(ctx.scene, |shape| {
            shape.get_visible::<CoordinateSystem>().map(|axes| vec![axes.segments()])
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
