//! Graphics backend contract.
//!
//! The compositor issues all of its drawing through the [`Device`] trait:
//! texture and offscreen-target management, quad draws for every shader the
//! engine needs, and pixel readback. Two implementations exist:
//! [`SoftwareDevice`](crate::software::SoftwareDevice) rasterizes on the CPU
//! and backs the test suite; [`WgpuDevice`](crate::wgpu_device::WgpuDevice)
//! runs on the GPU.

use common::{Color, ColorMatrix, Point, Quad};

/// Handle to a 2D texture owned by a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// Handle to an offscreen color target owned by a device.
///
/// Every target has a backing texture reachable through
/// [`Device::target_texture`], so a finished offscreen render can be sampled
/// as an ordinary texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetId(pub u64);

/// Pixel layout of texture uploads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureFormat {
    Rgba8,
    Bgra8,
}

/// Drawing backend used by the compositor.
///
/// Draw calls take quads in frame coordinates (triangle-strip corner order)
/// and blend source-over onto the bound target. Texture-sampling draws map
/// the full texture across the quad.
///
/// All methods are infallible at the call site: resource creation failures
/// inside a backend indicate an unusable graphics environment and abort the
/// process rather than surfacing per-draw errors.
pub trait Device {
    /// Create a texture from raw pixel data (`width * height * 4` bytes).
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
        pixels: &[u8],
    ) -> TextureId;

    /// Replace the full contents of a texture.
    fn update_texture(&mut self, id: TextureId, pixels: &[u8]);

    fn destroy_texture(&mut self, id: TextureId);

    /// Create an offscreen color target, cleared to transparent.
    fn create_target(&mut self, width: u32, height: u32) -> TargetId;

    fn destroy_target(&mut self, id: TargetId);

    /// The texture backing an offscreen target.
    fn target_texture(&self, id: TargetId) -> TextureId;

    fn target_size(&self, id: TargetId) -> (u32, u32);

    /// Begin a frame rendered at the given pixel size, clearing to `clear`.
    /// Also rebinds drawing to the frame itself.
    fn begin_frame(&mut self, width: u32, height: u32, clear: Color);

    /// Finish the frame, flushing any pending work.
    fn end_frame(&mut self);

    /// Redirect subsequent draws to `target`, or back to the frame with
    /// `None`. `origin` rebases coordinates: content drawn at `origin` lands
    /// at the target's top-left corner. Passing a clear color wipes the
    /// target first.
    fn bind_target(&mut self, target: Option<TargetId>, origin: Point, clear: Option<Color>);

    /// Solid color quad.
    fn draw_solid(&mut self, quad: &Quad, color: Color);

    /// Textured quad with alpha modulation (`opacity` in 0.0 - 1.0).
    fn draw_textured(&mut self, quad: &Quad, texture: TextureId, opacity: f32);

    /// Textured quad run through a 4x4 color matrix.
    fn draw_color_matrix(&mut self, quad: &Quad, texture: TextureId, matrix: &ColorMatrix);

    /// One direction of a separable gaussian blur: sample `texture`, write
    /// the bound target. `horizontal` selects the kernel axis.
    fn draw_blur(&mut self, quad: &Quad, texture: TextureId, radius: f32, horizontal: bool);

    /// The alpha channel of `texture` recolored as `color` (shadow pass).
    fn draw_shadow_mask(&mut self, quad: &Quad, texture: TextureId, color: Color);

    /// Read back an RGBA pixel region of the finished frame, row-major.
    fn read_pixels(&mut self, x: u32, y: u32, width: u32, height: u32) -> Vec<u8>;
}
