//! Prism renderer: deferred PBR over the Prism RHI. Shadow cubes, G-buffer, SSAO, lighting,
//! debug lines, bloom-style blur and tone-mapped post, recorded as one command buffer per frame.

pub mod assets;
pub mod config;
pub mod dynamic_buffer;
pub mod error;
pub mod frame_resources;
pub mod layout;
pub mod overlay;
pub mod pipeline_cache;
pub mod renderer;
pub mod scene_walk;
pub mod shaders;
pub mod systems;
pub mod targets;
pub mod workflow;

pub use assets::AssetManager;
pub use config::{BlurConfig, CacheConfig, CapacityConfig, RendererConfig, ShadowConfig, SsaoConfig, ToneMapping};
pub use error::{RenderError, Result};
pub use layout::LayoutTracker;
pub use overlay::OverlayRenderer;
pub use renderer::Renderer;
pub use systems::{RenderContext, RenderSystem, UpdateContext};
pub use targets::{RenderTargets, ShadowTargets};
pub use workflow::WorkflowCache;
