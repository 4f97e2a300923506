//! Software rasterizing backend.
//!
//! A CPU implementation of [`Device`] over plain pixel buffers. It is the
//! reference backend: every shader the GPU path implements exists here as a
//! per-pixel shading function, so scenes can be rendered and inspected
//! without a graphics context.

use crate::device::{Device, TargetId, TextureFormat, TextureId};
use common::{Color, ColorMatrix, Point, Quad};
use std::collections::HashMap;

/// Pixel buffer with straight-alpha RGBA storage.
#[derive(Clone, Debug, Default)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let size = (width * height * 4) as usize;
        Self {
            width,
            height,
            data: vec![0; size],
        }
    }

    /// Fill with a color.
    pub fn fill(&mut self, color: Color) {
        for chunk in self.data.chunks_exact_mut(4) {
            chunk[0] = color.r;
            chunk[1] = color.g;
            chunk[2] = color.b;
            chunk[3] = color.a;
        }
    }

    /// Get pixel at position.
    pub fn get_pixel(&self, x: u32, y: u32) -> Color {
        if x >= self.width || y >= self.height {
            return Color::TRANSPARENT;
        }

        let offset = ((y * self.width + x) * 4) as usize;
        Color::rgba(
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        )
    }

    /// Set pixel at position.
    pub fn set_pixel(&mut self, x: u32, y: u32, color: Color) {
        if x >= self.width || y >= self.height {
            return;
        }

        let offset = ((y * self.width + x) * 4) as usize;
        self.data[offset] = color.r;
        self.data[offset + 1] = color.g;
        self.data[offset + 2] = color.b;
        self.data[offset + 3] = color.a;
    }

    /// Blend pixel at position using source-over compositing.
    pub fn blend_pixel(&mut self, x: u32, y: u32, color: Color) {
        if x >= self.width || y >= self.height || color.a == 0 {
            return;
        }

        let existing = self.get_pixel(x, y);
        let blended = color.blend_over(existing);
        self.set_pixel(x, y, blended);
    }

    /// Nearest-neighbor sample with normalized coordinates, clamped to edges.
    pub fn sample(&self, u: f32, v: f32) -> Color {
        if self.width == 0 || self.height == 0 {
            return Color::TRANSPARENT;
        }
        let x = ((u * self.width as f32) as i64).clamp(0, self.width as i64 - 1) as u32;
        let y = ((v * self.height as f32) as i64).clamp(0, self.height as i64 - 1) as u32;
        self.get_pixel(x, y)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// CPU implementation of the [`Device`] contract.
pub struct SoftwareDevice {
    /// Textures and target buffers share one id space.
    buffers: HashMap<u64, PixelBuffer>,
    frame: PixelBuffer,
    next_id: u64,
    bound: Option<TargetId>,
    origin: Point,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            frame: PixelBuffer::default(),
            next_id: 1,
            bound: None,
            origin: Point::ZERO,
        }
    }

    /// The finished frame buffer.
    pub fn frame(&self) -> &PixelBuffer {
        &self.frame
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Run `f` against the currently bound buffer with the rest of the
    /// buffer store readable for sampling. The bound buffer is taken out of
    /// the store for the duration of the call.
    fn with_bound<R>(
        &mut self,
        f: impl FnOnce(&mut PixelBuffer, &HashMap<u64, PixelBuffer>, Point) -> R,
    ) -> R {
        match self.bound {
            None => {
                let mut frame = std::mem::take(&mut self.frame);
                let result = f(&mut frame, &self.buffers, self.origin);
                self.frame = frame;
                result
            }
            Some(id) => {
                let Some(mut buffer) = self.buffers.remove(&id.0) else {
                    return f(&mut PixelBuffer::default(), &self.buffers, self.origin);
                };
                let result = f(&mut buffer, &self.buffers, self.origin);
                self.buffers.insert(id.0, buffer);
                result
            }
        }
    }
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for SoftwareDevice {
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
        pixels: &[u8],
    ) -> TextureId {
        let id = self.alloc_id();
        let mut buffer = PixelBuffer::new(width, height);
        write_pixels(&mut buffer, format, pixels);
        self.buffers.insert(id, buffer);
        TextureId(id)
    }

    fn update_texture(&mut self, id: TextureId, pixels: &[u8]) {
        if let Some(buffer) = self.buffers.get_mut(&id.0) {
            write_pixels(buffer, TextureFormat::Rgba8, pixels);
        }
    }

    fn destroy_texture(&mut self, id: TextureId) {
        self.buffers.remove(&id.0);
    }

    fn create_target(&mut self, width: u32, height: u32) -> TargetId {
        let id = self.alloc_id();
        self.buffers.insert(id, PixelBuffer::new(width, height));
        TargetId(id)
    }

    fn destroy_target(&mut self, id: TargetId) {
        self.buffers.remove(&id.0);
    }

    fn target_texture(&self, id: TargetId) -> TextureId {
        TextureId(id.0)
    }

    fn target_size(&self, id: TargetId) -> (u32, u32) {
        self.buffers
            .get(&id.0)
            .map(|b| (b.width, b.height))
            .unwrap_or((0, 0))
    }

    fn begin_frame(&mut self, width: u32, height: u32, clear: Color) {
        self.frame = PixelBuffer::new(width, height);
        self.frame.fill(clear);
        self.bound = None;
        self.origin = Point::ZERO;
    }

    fn end_frame(&mut self) {}

    fn bind_target(&mut self, target: Option<TargetId>, origin: Point, clear: Option<Color>) {
        self.bound = target;
        self.origin = origin;
        if let Some(color) = clear {
            self.with_bound(|buffer, _, _| buffer.fill(color));
        }
    }

    fn draw_solid(&mut self, quad: &Quad, color: Color) {
        self.with_bound(|buffer, _, origin| {
            let quad = quad.translated(-origin.x, -origin.y);
            fill_quad(buffer, &quad, &|_, _| color);
        });
    }

    fn draw_textured(&mut self, quad: &Quad, texture: TextureId, opacity: f32) {
        self.with_bound(|buffer, sources, origin| {
            let Some(source) = sources.get(&texture.0) else {
                return;
            };
            let quad = quad.translated(-origin.x, -origin.y);
            fill_quad(buffer, &quad, &|u, v| {
                source.sample(u, v).with_alpha_scaled(opacity)
            });
        });
    }

    fn draw_color_matrix(&mut self, quad: &Quad, texture: TextureId, matrix: &ColorMatrix) {
        self.with_bound(|buffer, sources, origin| {
            let Some(source) = sources.get(&texture.0) else {
                return;
            };
            let quad = quad.translated(-origin.x, -origin.y);
            fill_quad(buffer, &quad, &|u, v| matrix.apply(source.sample(u, v)));
        });
    }

    fn draw_blur(&mut self, quad: &Quad, texture: TextureId, radius: f32, horizontal: bool) {
        let weights = gaussian_kernel(radius);
        self.with_bound(|buffer, sources, origin| {
            let Some(source) = sources.get(&texture.0) else {
                return;
            };
            let (step_u, step_v) = if horizontal {
                (1.0 / source.width.max(1) as f32, 0.0)
            } else {
                (0.0, 1.0 / source.height.max(1) as f32)
            };
            let quad = quad.translated(-origin.x, -origin.y);
            fill_quad(buffer, &quad, &|u, v| {
                // Premultiplied accumulation so transparent texels do not
                // darken the result.
                let mut acc = [0.0f32; 4];
                let half = weights.len() as i32 / 2;
                for (i, w) in weights.iter().enumerate() {
                    let offset = (i as i32 - half) as f32;
                    let texel = source.sample(u + step_u * offset, v + step_v * offset);
                    let a = texel.a as f32 / 255.0;
                    acc[0] += texel.r as f32 * a * w;
                    acc[1] += texel.g as f32 * a * w;
                    acc[2] += texel.b as f32 * a * w;
                    acc[3] += a * w;
                }
                if acc[3] <= f32::EPSILON {
                    return Color::TRANSPARENT;
                }
                Color::rgba(
                    (acc[0] / acc[3]).round().clamp(0.0, 255.0) as u8,
                    (acc[1] / acc[3]).round().clamp(0.0, 255.0) as u8,
                    (acc[2] / acc[3]).round().clamp(0.0, 255.0) as u8,
                    (acc[3] * 255.0).round().clamp(0.0, 255.0) as u8,
                )
            });
        });
    }

    fn draw_shadow_mask(&mut self, quad: &Quad, texture: TextureId, color: Color) {
        self.with_bound(|buffer, sources, origin| {
            let Some(source) = sources.get(&texture.0) else {
                return;
            };
            let quad = quad.translated(-origin.x, -origin.y);
            fill_quad(buffer, &quad, &|u, v| {
                let alpha = source.sample(u, v).a as u32 * color.a as u32 / 255;
                Color::rgba(color.r, color.g, color.b, alpha as u8)
            });
        });
    }

    fn read_pixels(&mut self, x: u32, y: u32, width: u32, height: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity((width * height * 4) as usize);
        for row in y..y + height {
            for col in x..x + width {
                let pixel = self.frame.get_pixel(col, row);
                out.extend_from_slice(&[pixel.r, pixel.g, pixel.b, pixel.a]);
            }
        }
        out
    }
}

fn write_pixels(buffer: &mut PixelBuffer, format: TextureFormat, pixels: &[u8]) {
    let len = buffer.data.len().min(pixels.len());
    buffer.data[..len].copy_from_slice(&pixels[..len]);
    if format == TextureFormat::Bgra8 {
        for chunk in buffer.data.chunks_exact_mut(4) {
            chunk.swap(0, 2);
        }
    }
}

/// Normalized 1D gaussian weights for the given radius (odd length).
fn gaussian_kernel(radius: f32) -> Vec<f32> {
    let half = (radius.ceil() as i32).max(1);
    let sigma = (radius / 2.0).max(0.5);
    let mut weights = Vec::with_capacity((half * 2 + 1) as usize);
    let mut sum = 0.0;
    for i in -half..=half {
        let w = (-(i * i) as f32 / (2.0 * sigma * sigma)).exp();
        weights.push(w);
        sum += w;
    }
    for w in &mut weights {
        *w /= sum;
    }
    weights
}

/// Shade a quad into the buffer. Axis-aligned quads take a direct scanline
/// path; arbitrary quads are split into two triangles.
fn fill_quad(buffer: &mut PixelBuffer, quad: &Quad, shade: &dyn Fn(f32, f32) -> Color) {
    let [tl, tr, bl, br] = quad.points;

    let axis_aligned = tl.y == tr.y && bl.y == br.y && tl.x == bl.x && tr.x == br.x;
    if axis_aligned && tr.x > tl.x && bl.y > tl.y {
        let width = tr.x - tl.x;
        let height = bl.y - tl.y;
        let x_start = tl.x.max(0.0) as u32;
        let y_start = tl.y.max(0.0) as u32;
        let x_end = tr.x.min(buffer.width as f32).max(0.0) as u32;
        let y_end = bl.y.min(buffer.height as f32).max(0.0) as u32;

        for y in y_start..y_end {
            for x in x_start..x_end {
                let u = (x as f32 + 0.5 - tl.x) / width;
                let v = (y as f32 + 0.5 - tl.y) / height;
                buffer.blend_pixel(x, y, shade(u, v));
            }
        }
        return;
    }

    // The diagonal (tr, bl) is shared; the second triangle excludes it so
    // translucent quads do not double-blend along the seam.
    fill_triangle(
        buffer,
        [tl, tr, bl],
        [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)],
        [false; 3],
        shade,
    );
    fill_triangle(
        buffer,
        [tr, br, bl],
        [(1.0, 0.0), (1.0, 1.0), (0.0, 1.0)],
        [false, true, false],
        shade,
    );
}

fn edge(a: Point, b: Point, p: Point) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

fn fill_triangle(
    buffer: &mut PixelBuffer,
    p: [Point; 3],
    uv: [(f32, f32); 3],
    strict: [bool; 3],
    shade: &dyn Fn(f32, f32) -> Color,
) {
    let mut area = edge(p[0], p[1], p[2]);
    if area.abs() < f32::EPSILON {
        return;
    }
    // Normalize winding so edge weights are positive inside.
    let flip = if area < 0.0 { -1.0 } else { 1.0 };
    area *= flip;

    let min_x = p[0].x.min(p[1].x).min(p[2].x).max(0.0) as u32;
    let min_y = p[0].y.min(p[1].y).min(p[2].y).max(0.0) as u32;
    let max_x = p[0].x.max(p[1].x).max(p[2].x).min(buffer.width as f32).ceil() as u32;
    let max_y = p[0].y.max(p[1].y).max(p[2].y).min(buffer.height as f32).ceil() as u32;

    for y in min_y..max_y {
        for x in min_x..max_x {
            let c = Point::new(x as f32 + 0.5, y as f32 + 0.5);
            let w0 = edge(p[1], p[2], c) * flip;
            let w1 = edge(p[2], p[0], c) * flip;
            let w2 = edge(p[0], p[1], c) * flip;

            let inside = (if strict[0] { w0 > 0.0 } else { w0 >= 0.0 })
                && (if strict[1] { w1 > 0.0 } else { w1 >= 0.0 })
                && (if strict[2] { w2 > 0.0 } else { w2 >= 0.0 });
            if !inside {
                continue;
            }

            let (b0, b1, b2) = (w0 / area, w1 / area, w2 / area);
            let u = uv[0].0 * b0 + uv[1].0 * b1 + uv[2].0 * b2;
            let v = uv[0].1 * b0 + uv[1].1 * b1 + uv[2].1 * b2;
            buffer.blend_pixel(x, y, shade(u, v));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Rect;

    #[test]
    fn test_pixel_buffer() {
        let mut buffer = PixelBuffer::new(100, 100);
        assert_eq!(buffer.data.len(), 100 * 100 * 4);

        buffer.set_pixel(50, 50, Color::rgb(255, 0, 0));
        let pixel = buffer.get_pixel(50, 50);
        assert_eq!(pixel, Color::rgb(255, 0, 0));

        // Out of bounds reads are transparent.
        assert_eq!(buffer.get_pixel(200, 0), Color::TRANSPARENT);
    }

    #[test]
    fn test_solid_quad_fill() {
        let mut device = SoftwareDevice::new();
        device.begin_frame(64, 64, Color::WHITE);
        device.draw_solid(
            &Quad::from_rect(Rect::new(8.0, 8.0, 16.0, 16.0)),
            Color::rgb(0, 0, 255),
        );
        device.end_frame();

        assert_eq!(device.frame().get_pixel(10, 10), Color::rgb(0, 0, 255));
        assert_eq!(device.frame().get_pixel(30, 30), Color::WHITE);
    }

    #[test]
    fn test_translucent_quad_blend() {
        let mut device = SoftwareDevice::new();
        device.begin_frame(32, 32, Color::BLACK);
        device.draw_solid(
            &Quad::from_rect(Rect::new(0.0, 0.0, 32.0, 32.0)),
            Color::rgba(255, 255, 255, 128),
        );

        let pixel = device.frame().get_pixel(16, 16);
        assert!((pixel.r as i32 - 128).abs() <= 2);
    }

    #[test]
    fn test_texture_draw_with_opacity() {
        let mut device = SoftwareDevice::new();
        let pixels = vec![255u8, 0, 0, 255].repeat(16);
        let texture = device.create_texture(4, 4, TextureFormat::Rgba8, &pixels);

        device.begin_frame(16, 16, Color::WHITE);
        device.draw_textured(&Quad::from_rect(Rect::new(0.0, 0.0, 8.0, 8.0)), texture, 0.5);

        let pixel = device.frame().get_pixel(4, 4);
        assert!(pixel.r > 250);
        assert!((pixel.g as i32 - 127).abs() <= 3);
    }

    #[test]
    fn test_bgra_upload_swizzles() {
        let mut device = SoftwareDevice::new();
        let pixels = vec![255u8, 0, 0, 255]; // blue in BGRA order
        let texture = device.create_texture(1, 1, TextureFormat::Bgra8, &pixels);

        device.begin_frame(4, 4, Color::BLACK);
        device.draw_textured(&Quad::from_rect(Rect::new(0.0, 0.0, 4.0, 4.0)), texture, 1.0);
        assert_eq!(device.frame().get_pixel(1, 1), Color::rgb(0, 0, 255));
    }

    #[test]
    fn test_target_rebasing() {
        let mut device = SoftwareDevice::new();
        device.begin_frame(32, 32, Color::BLACK);

        let target = device.create_target(8, 8);
        device.bind_target(Some(target), Point::new(10.0, 10.0), Some(Color::TRANSPARENT));
        // Drawn at frame coordinates (10, 10): lands at target origin.
        device.draw_solid(
            &Quad::from_rect(Rect::new(10.0, 10.0, 8.0, 8.0)),
            Color::rgb(0, 255, 0),
        );
        device.bind_target(None, Point::ZERO, None);

        let texture = device.target_texture(target);
        device.draw_textured(&Quad::from_rect(Rect::new(0.0, 0.0, 8.0, 8.0)), texture, 1.0);
        assert_eq!(device.frame().get_pixel(2, 2), Color::rgb(0, 255, 0));
    }

    #[test]
    fn test_blur_spreads_alpha() {
        let mut device = SoftwareDevice::new();
        // 8x8 texture with an opaque 4x4 center.
        let mut pixels = vec![0u8; 8 * 8 * 4];
        for y in 2..6 {
            for x in 2..6 {
                let o = (y * 8 + x) * 4;
                pixels[o..o + 4].copy_from_slice(&[255, 255, 255, 255]);
            }
        }
        let texture = device.create_texture(8, 8, TextureFormat::Rgba8, &pixels);

        let target = device.create_target(8, 8);
        device.begin_frame(8, 8, Color::TRANSPARENT);
        device.bind_target(Some(target), Point::ZERO, Some(Color::TRANSPARENT));
        device.draw_blur(&Quad::from_rect(Rect::new(0.0, 0.0, 8.0, 8.0)), texture, 2.0, true);
        device.bind_target(None, Point::ZERO, None);

        let blurred = device.target_texture(target);
        device.draw_textured(&Quad::from_rect(Rect::new(0.0, 0.0, 8.0, 8.0)), blurred, 1.0);

        // Energy bleeds horizontally past the original edge.
        assert!(device.frame().get_pixel(1, 3).a > 0);
        // Center keeps most of its alpha.
        assert!(device.frame().get_pixel(4, 3).a > 128);
    }
}
