//! Surface-backed swapchain.

use super::{texture_format_from_wgpu, WgpuDevice, WgpuTexture};
use crate::{Swapchain, SwapchainFrame, TextureFormat};
use std::sync::Arc;

pub struct WgpuSwapchain {
    device: Arc<WgpuDevice>,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    format: TextureFormat,
    current: Option<wgpu::SurfaceTexture>,
    frame_counter: u32,
}

impl std::fmt::Debug for WgpuSwapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuSwapchain")
            .field("extent", &(self.config.width, self.config.height))
            .field("format", &self.format)
            .finish()
    }
}

const IMAGE_COUNT: u32 = 3;

impl WgpuSwapchain {
    pub(super) fn new(
        device: &Arc<WgpuDevice>,
        surface: wgpu::Surface<'static>,
        adapter: &wgpu::Adapter,
        extent: (u32, u32),
    ) -> Result<Self, String> {
        let caps = surface.get_capabilities(adapter);
        let (raw_format, format) = caps
            .formats
            .iter()
            .filter_map(|f| texture_format_from_wgpu(*f).map(|ours| (*f, ours)))
            .find(|(f, _)| f.is_srgb())
            .or_else(|| {
                caps.formats
                    .iter()
                    .find_map(|f| texture_format_from_wgpu(*f).map(|ours| (*f, ours)))
            })
            .ok_or("surface offers no supported color format")?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: raw_format,
            width: extent.0.max(1),
            height: extent.1.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: wgpu::CompositeAlphaMode::Opaque,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(device.raw_device(), &config);
        log::info!("swapchain: {:?} {}x{}", format, config.width, config.height);
        Ok(Self {
            device: device.clone(),
            surface,
            config,
            format,
            current: None,
            frame_counter: 0,
        })
    }
}

impl Swapchain for WgpuSwapchain {
    fn acquire_next_image(&mut self) -> Result<SwapchainFrame, String> {
        let frame = match self.surface.get_current_texture() {
            Ok(f) => f,
            Err(wgpu::SurfaceError::Outdated) | Err(wgpu::SurfaceError::Lost) => {
                self.surface.configure(self.device.raw_device(), &self.config);
                self.surface.get_current_texture().map_err(|e| e.to_string())?
            }
            Err(wgpu::SurfaceError::Timeout) => {
                return Err("Surface get_current_texture timeout".to_string())
            }
            Err(e) => return Err(e.to_string()),
        };
        let texture = Arc::new(WgpuTexture::from_external(
            &frame.texture,
            self.device.next_id(),
            self.format,
        ));
        self.current = Some(frame);
        let image_index = self.frame_counter % IMAGE_COUNT;
        self.frame_counter = self.frame_counter.wrapping_add(1);
        Ok(SwapchainFrame { image_index, texture })
    }

    fn present(&mut self, _image_index: u32) -> Result<(), String> {
        let frame = self.current.take().ok_or("present without an acquired image")?;
        frame.present();
        Ok(())
    }

    fn resize(&mut self, extent: (u32, u32)) -> Result<(), String> {
        if extent.0 == 0 || extent.1 == 0 {
            return Err(format!("swapchain resize to zero extent {:?}", extent));
        }
        self.config.width = extent.0;
        self.config.height = extent.1;
        self.current = None;
        self.surface.configure(self.device.raw_device(), &self.config);
        Ok(())
    }

    fn extent(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn image_count(&self) -> u32 {
        IMAGE_COUNT
    }

    fn format(&self) -> TextureFormat {
        self.format
    }
}
