//! GPU texture wrapper for the wgpu backend.

use crate::context::GpuContext;
use wgpu::{
    Extent3d, Texture, TextureDescriptor, TextureDimension, TextureFormat, TextureUsages,
    TextureView, TextureViewDescriptor,
};

/// A wgpu texture with its default view.
pub struct GpuTexture {
    pub texture: Texture,
    pub view: TextureView,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl GpuTexture {
    /// Create a sampleable texture.
    pub fn new(context: &GpuContext, width: u32, height: u32, format: TextureFormat) -> Self {
        Self::with_usage(
            context,
            width,
            height,
            format,
            TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
        )
    }

    /// Create an offscreen color target. The texture stays sampleable so a
    /// finished layer can be composited, and copyable so frames can be read
    /// back.
    pub fn render_target(context: &GpuContext, width: u32, height: u32, format: TextureFormat) -> Self {
        Self::with_usage(
            context,
            width,
            height,
            format,
            TextureUsages::RENDER_ATTACHMENT
                | TextureUsages::TEXTURE_BINDING
                | TextureUsages::COPY_SRC,
        )
    }

    fn with_usage(
        context: &GpuContext,
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: TextureUsages,
    ) -> Self {
        let texture = context.device.create_texture(&TextureDescriptor {
            label: Some("Engine Texture"),
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });

        let view = texture.create_view(&TextureViewDescriptor::default());

        Self {
            texture,
            view,
            width,
            height,
            format,
        }
    }

    /// Upload the full texture contents (`width * height * 4` bytes).
    pub fn write(&self, context: &GpuContext, data: &[u8]) {
        context.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * self.width),
                rows_per_image: Some(self.height),
            },
            Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }
}
