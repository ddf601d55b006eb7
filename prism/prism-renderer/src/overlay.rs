//! UI overlay hook. An editor plugs its panel renderer in here; the renderer records it last,
//! in a pass that loads the finished frame instead of clearing it.

use crate::error::Result;
use prism_rhi::{Device, FrameBuffer, RenderPass};

pub trait OverlayRenderer {
    fn label(&self) -> &'static str {
        "overlay"
    }

    /// Record draws into `pass`, which targets the presentation image described by `target`.
    fn render(&mut self, device: &dyn Device, pass: &mut dyn RenderPass, target: &FrameBuffer) -> Result<()>;
}
