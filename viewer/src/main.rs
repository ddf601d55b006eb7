//! Prism viewer: opens a 1280x720 window and renders the demo scene every frame.
//! Run: cargo run -p viewer (reads `prism.json` from the working directory when present).

mod demo;

use prism_renderer::{Renderer, RendererConfig};
use prism_rhi::wgpu_backend::{WgpuDevice, WgpuSwapchain};
use prism_rhi::Swapchain;
use scene_api::{Scene, TypeNameRegistry};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

const WINDOW_SIZE: (u32, u32) = (1280, 720);
const CONFIG_FILE: &str = "prism.json";

fn load_config() -> RendererConfig {
    let path = Path::new(CONFIG_FILE);
    if !path.exists() {
        return RendererConfig::default();
    }
    match RendererConfig::from_json_file(path) {
        Ok(config) => {
            log::info!("loaded {}", CONFIG_FILE);
            config
        }
        Err(e) => {
            log::error!("{}: {}; using defaults", CONFIG_FILE, e);
            RendererConfig::default()
        }
    }
}

/// GPU state, created once the window exists.
struct Gpu {
    swapchain: WgpuSwapchain,
    renderer: Renderer,
}

impl Gpu {
    fn new(window: Arc<Window>, scene: &mut Scene, config: RendererConfig) -> Result<Self, String> {
        let size = window.inner_size();
        let (device, swapchain) = WgpuDevice::with_surface(window, (size.width, size.height))?;
        let mut renderer = Renderer::new(device, swapchain.format(), config).map_err(|e| e.to_string())?;
        let sky = renderer
            .upload_cube_texture(demo::SKY_FACE_SIZE, &demo::gradient_sky(demo::SKY_FACE_SIZE))
            .map_err(|e| e.to_string())?;
        demo::add_sky(scene, sky);
        Ok(Self { swapchain, renderer })
    }
}

struct App {
    window: Option<Arc<Window>>,
    gpu: Option<Gpu>,
    scene: Scene,
    config: Option<RendererConfig>,
    last_frame: Instant,
    minimized: bool,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        Self {
            window: None,
            gpu: None,
            scene: demo::scene(),
            config: Some(config),
            last_frame: Instant::now(),
            minimized: false,
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let now = Instant::now();
        let delta_time = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        if self.minimized {
            return;
        }
        let Some(gpu) = self.gpu.as_mut() else {
            return;
        };
        demo::animate(&mut self.scene, delta_time);
        if let Err(e) = gpu.renderer.render_frame(&self.scene, &mut gpu.swapchain, delta_time) {
            log::error!("frame {} failed: {}", gpu.renderer.frame_count(), e);
            event_loop.exit();
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.minimized = width == 0 || height == 0;
        if self.minimized {
            log::debug!("window minimized; rendering paused");
            return;
        }
        if let Some(gpu) = self.gpu.as_mut() {
            if let Err(e) = gpu.swapchain.resize((width, height)) {
                log::warn!("swapchain resize to {}x{} failed: {}", width, height, e);
            }
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attributes = Window::default_attributes()
            .with_title("Prism")
            .with_inner_size(winit::dpi::PhysicalSize::new(WINDOW_SIZE.0, WINDOW_SIZE.1))
            .with_resizable(false);
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("create window: {}", e);
                event_loop.exit();
                return;
            }
        };
        let config = self.config.take().unwrap_or_default();
        match Gpu::new(window.clone(), &mut self.scene, config) {
            Ok(gpu) => self.gpu = Some(gpu),
            Err(e) => {
                log::error!("renderer setup failed: {}", e);
                event_loop.exit();
                return;
            }
        }
        self.last_frame = Instant::now();
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput {
                event: KeyEvent { logical_key: Key::Named(NamedKey::Escape), state: ElementState::Pressed, .. },
                ..
            } => event_loop.exit(),
            WindowEvent::Resized(size) => self.resize(size.width, size.height),
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let event_loop = EventLoop::new().map_err(|e| e.to_string())?;
    event_loop.set_control_flow(ControlFlow::Poll);
    let mut app = App::new(load_config());
    let registry = TypeNameRegistry::with_defaults();
    for shape in app.scene.shapes() {
        log::debug!("scene: {}", shape.describe(&registry));
    }
    event_loop.run_app(&mut app).map_err(|e| e.to_string())?;
    if let Some(gpu) = &app.gpu {
        log::info!("rendered {} frames", gpu.renderer.frame_count());
    }
    Ok(())
}
