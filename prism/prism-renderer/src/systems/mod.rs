//! Render systems. Each owns per-frame-slot GPU resources in a [`FrameRing`] and follows the
//! same cycle: `update` walks the scene and uploads into the current slot, `render` records
//! draws from that slot and advances the ring.
//!
//! [`FrameRing`]: crate::frame_resources::FrameRing

mod blur;
mod coordinate_axes;
mod lighting;
mod line_batch;
mod lines;
mod pbr;
mod post_effect;
mod shadow_map;
mod ssao;

pub use blur::BlurSystem;
pub use coordinate_axes::CoordinateAxesSystem;
pub use lighting::{LightingInputs, LightingSystem};
pub use line_batch::{LineBatch, LineVertex};
pub use lines::LinesSystem;
pub use pbr::PbrSystem;
pub use post_effect::{PostEffectInputs, PostEffectSystem};
pub use shadow_map::{cube_face_view_projection, ShadowMapSystem};
pub use ssao::SsaoSystem;

use crate::assets::AssetManager;
use crate::dynamic_buffer::DynamicBuffer;
use crate::error::Result;
use crate::layout::LayoutTracker;
use crate::workflow::{load_shader, ShaderKind, WorkflowCache};
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use prism_rhi::{
    BufferUsage, CommandEncoder, Device, FrameBuffer, IndexFormat, RenderPass, ShaderStage, VertexAttribute,
    VertexBinding, VertexFormat, VertexInputDescriptor, VertexInputRate,
};
use scene_api::{CameraView, Scene, SkyBox, TextureId};

/// Inputs of [`RenderSystem::update`]: everything is read-only.
#[derive(Debug, Clone, Copy)]
pub struct UpdateContext<'a> {
    pub device: &'a dyn Device,
    pub assets: &'a AssetManager,
    pub scene: &'a Scene,
    pub camera: Option<&'a CameraView>,
    pub delta_time: f32,
}

/// Inputs of [`RenderSystem::render`]. `camera` is `None` when the scene has no usable
/// camera; systems then keep last frame's camera uniforms and still draw.
#[derive(Debug)]
pub struct RenderContext<'a> {
    pub device: &'a dyn Device,
    pub assets: &'a AssetManager,
    pub camera: Option<&'a CameraView>,
    pub delta_time: f32,
    pub layouts: &'a mut LayoutTracker,
}

pub trait RenderSystem {
    fn label(&self) -> &'static str;

    /// Walk the scene and upload this frame's data into the current slot.
    fn update(&mut self, ctx: &UpdateContext<'_>) -> Result<()>;

    /// Record this frame's passes into `encoder`, drawing into `target`. Advances the frame
    /// index on success, also when there was nothing to draw.
    fn render(
        &mut self,
        ctx: &mut RenderContext<'_>,
        encoder: &mut dyn CommandEncoder,
        target: &FrameBuffer,
    ) -> Result<()>;

    fn frame_index(&self) -> usize;
}

/// Camera block shared by every shader that needs one.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniform {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub view_proj: [[f32; 4]; 4],
    pub inv_view_proj: [[f32; 4]; 4],
    pub position: [f32; 4],
}

impl CameraUniform {
    pub fn from_view(camera: &CameraView) -> Self {
        let view_proj = camera.view_projection();
        Self {
            view: camera.view.to_cols_array_2d(),
            proj: camera.projection.to_cols_array_2d(),
            view_proj: view_proj.to_cols_array_2d(),
            inv_view_proj: view_proj.inverse().to_cols_array_2d(),
            position: camera.position.extend(1.0).to_array(),
        }
    }
}

pub(crate) const CAMERA_KEY: &str = "camera";

pub(crate) fn camera_buffer(device: &dyn Device) -> Result<DynamicBuffer> {
    DynamicBuffer::new(
        device,
        Some("camera"),
        std::mem::size_of::<CameraUniform>() as u64,
        1,
        BufferUsage::UNIFORM,
    )
}

/// Write `camera` into the buffer; a missing camera leaves the previous contents.
pub(crate) fn write_camera(device: &dyn Device, buffer: &DynamicBuffer, camera: Option<&CameraView>) -> Result<()> {
    match camera {
        Some(camera) => buffer.write(device, 0, &[CameraUniform::from_view(camera)]),
        None => {
            log::trace!("no camera this frame; keeping previous camera uniforms");
            Ok(())
        }
    }
}

pub(crate) fn uniform_buffer<T: Pod>(device: &dyn Device, label: &'static str) -> Result<DynamicBuffer> {
    DynamicBuffer::new(device, Some(label), std::mem::size_of::<T>() as u64, 1, BufferUsage::UNIFORM)
}

pub(crate) fn storage_buffer<T: Pod>(device: &dyn Device, label: &'static str, capacity: usize) -> Result<DynamicBuffer> {
    DynamicBuffer::new(device, Some(label), std::mem::size_of::<T>() as u64, capacity, BufferUsage::STORAGE)
}

pub(crate) fn mat4_array(matrices: &[Mat4]) -> Vec<[[f32; 4]; 4]> {
    matrices.iter().map(Mat4::to_cols_array_2d).collect()
}

/// Vertex and fragment stage of one embedded shader.
pub(crate) fn shader_stages(cache: &WorkflowCache, name: &str) -> Result<(ShaderStage, ShaderStage)> {
    Ok((
        load_shader(cache, name, ShaderKind::Vertex, "vs_main")?,
        load_shader(cache, name, ShaderKind::Fragment, "fs_main")?,
    ))
}

/// Texture of the first visible sky box in scene order.
pub(crate) fn visible_sky(scene: &Scene) -> Option<TextureId> {
    scene.shapes().iter().find_map(|shape| shape.get_visible::<SkyBox>().map(|sky| sky.texture))
}

/// Position and uv streams of the packed geometry, as consumed by full-screen passes.
pub(crate) fn screen_quad_input() -> VertexInputDescriptor {
    VertexInputDescriptor {
        attributes: vec![
            VertexAttribute { location: 0, binding: 0, format: VertexFormat::Float32x3, offset: 0 },
            VertexAttribute { location: 1, binding: 1, format: VertexFormat::Float32x2, offset: 0 },
        ],
        bindings: vec![
            VertexBinding { binding: 0, stride: 12, input_rate: VertexInputRate::Vertex },
            VertexBinding { binding: 1, stride: 8, input_rate: VertexInputRate::Vertex },
        ],
    }
}

/// Draw the shared `"Quad"` geometry covering the whole target.
pub(crate) fn draw_screen_quad(pass: &mut dyn RenderPass, assets: &AssetManager) -> Result<()> {
    let quad = assets.geometry("Quad")?;
    let packer = assets.packer();
    pass.set_vertex_buffer(0, packer.positions(), 0);
    pass.set_vertex_buffer(1, packer.texcoords(), 0);
    pass.set_index_buffer(packer.indices(), 0, IndexFormat::Uint32);
    pass.draw_indexed(quad.index_count, 1, quad.start_index, 0, 0);
    Ok(())
}
