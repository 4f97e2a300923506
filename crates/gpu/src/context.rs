//! GPU context and device management.

use parking_lot::RwLock;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;
use thiserror::Error;
use wgpu::{Adapter, Device, Instance, Queue, Surface, SurfaceConfiguration, TextureFormat};

/// Errors that can occur during GPU setup and readback.
///
/// These indicate an unusable graphics environment; callers treat them as
/// fatal rather than recoverable runtime conditions.
#[derive(Error, Debug)]
pub enum GpuError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,
    #[error("Failed to request device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
    #[error("Surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
    #[error("Failed to create surface")]
    SurfaceCreation,
    #[error("Pixel readback failed: {0}")]
    Readback(String),
}

/// wgpu instance, adapter, device and queue, with an optional window surface.
pub struct GpuContext {
    pub instance: Instance,
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,
    surface: RwLock<Option<Surface<'static>>>,
    surface_config: RwLock<Option<SurfaceConfiguration>>,
}

impl GpuContext {
    /// Create a headless context (offscreen rendering and readback only).
    pub async fn new() -> Result<Self, GpuError> {
        let instance = Self::create_instance();
        let adapter = Self::request_adapter(&instance, None).await?;
        let (device, queue) = Self::request_device(&adapter).await?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            surface: RwLock::new(None),
            surface_config: RwLock::new(None),
        })
    }

    /// Create a context presenting to a window.
    pub async fn with_window<W>(window: Arc<W>) -> Result<Self, GpuError>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        let instance = Self::create_instance();

        let surface = instance
            .create_surface(window)
            .map_err(|_| GpuError::SurfaceCreation)?;

        let adapter = Self::request_adapter(&instance, Some(&surface)).await?;
        let (device, queue) = Self::request_device(&adapter).await?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            surface: RwLock::new(Some(surface)),
            surface_config: RwLock::new(None),
        })
    }

    fn create_instance() -> Instance {
        Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            dx12_shader_compiler: Default::default(),
            flags: wgpu::InstanceFlags::default(),
            gles_minor_version: wgpu::Gles3MinorVersion::Automatic,
        })
    }

    async fn request_adapter(
        instance: &Instance,
        surface: Option<&Surface<'static>>,
    ) -> Result<Adapter, GpuError> {
        instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: surface,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)
    }

    async fn request_device(adapter: &Adapter) -> Result<(Device, Queue), GpuError> {
        adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Engine GPU Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(GpuError::from)
    }

    /// Configure the window surface for the given size.
    pub fn configure_surface(&self, width: u32, height: u32) {
        let surface = self.surface.read();
        let surface = match surface.as_ref() {
            Some(s) => s,
            None => return,
        };

        let caps = surface.get_capabilities(&self.adapter);
        let format = caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(caps.formats[0]);

        let config = SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        surface.configure(&self.device, &config);

        *self.surface_config.write() = Some(config);
    }

    /// Whether a window surface is attached and configured.
    pub fn has_surface(&self) -> bool {
        self.surface_config.read().is_some()
    }

    /// The configured surface format, if presenting to a window.
    pub fn surface_format(&self) -> Option<TextureFormat> {
        self.surface_config.read().as_ref().map(|c| c.format)
    }

    /// Acquire the next surface texture for presentation.
    pub fn get_current_texture(&self) -> Result<wgpu::SurfaceTexture, GpuError> {
        let surface = self.surface.read();
        let surface = surface.as_ref().ok_or(GpuError::SurfaceCreation)?;
        surface.get_current_texture().map_err(GpuError::Surface)
    }

    pub fn create_command_encoder(&self) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            })
    }

    pub fn submit(&self, commands: impl IntoIterator<Item = wgpu::CommandBuffer>) {
        self.queue.submit(commands);
    }
}
