//! wgpu implementation of the [`Device`] contract.
//!
//! Draws are recorded into per-target passes during the frame and executed
//! in one command submission at `end_frame`. Offscreen targets rendered by
//! an earlier pass are sampleable by later passes within the same
//! submission.

use crate::context::{GpuContext, GpuError};
use crate::device::{Device, TargetId, TextureFormat, TextureId};
use crate::pipeline::{BlurUniforms, MatrixUniforms, PipelineCache, PipelineKind, Vertex, ViewUniforms};
use crate::texture::GpuTexture;
use common::{Color, ColorMatrix, Point, Quad};
use std::collections::HashMap;
use std::sync::Arc;
use wgpu::util::DeviceExt;

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// GPU-backed [`Device`] over a [`GpuContext`].
pub struct WgpuDevice {
    context: Arc<GpuContext>,
    pipelines: PipelineCache,
    sampler: wgpu::Sampler,
    textures: HashMap<u64, GpuTexture>,
    next_id: u64,
    frame_size: (u32, u32),
    headless_frame: Option<GpuTexture>,
    passes: Vec<Pass>,
    current: Pass,
    /// Destruction is deferred until the frame's draws have executed.
    pending_destroy: Vec<u64>,
}

struct Pass {
    target: Option<u64>,
    origin: Point,
    clear: Option<Color>,
    draws: Vec<Draw>,
}

impl Pass {
    fn new(target: Option<u64>, origin: Point, clear: Option<Color>) -> Self {
        Self {
            target,
            origin,
            clear,
            draws: Vec::new(),
        }
    }
}

struct Draw {
    kind: DrawKind,
    vertices: [Vertex; 4],
}

enum DrawKind {
    Solid,
    Textured(u64),
    ColorMatrix(u64, MatrixUniforms),
    Blur(u64, BlurUniforms),
    ShadowMask(u64),
}

impl DrawKind {
    fn pipeline(&self) -> PipelineKind {
        match self {
            DrawKind::Solid => PipelineKind::Solid,
            DrawKind::Textured(_) => PipelineKind::Textured,
            DrawKind::ColorMatrix(..) => PipelineKind::ColorMatrix,
            DrawKind::Blur(..) => PipelineKind::Blur,
            DrawKind::ShadowMask(_) => PipelineKind::ShadowMask,
        }
    }

    fn texture(&self) -> Option<u64> {
        match self {
            DrawKind::Solid => None,
            DrawKind::Textured(id)
            | DrawKind::ColorMatrix(id, _)
            | DrawKind::Blur(id, _)
            | DrawKind::ShadowMask(id) => Some(*id),
        }
    }
}

impl WgpuDevice {
    pub fn new(context: Arc<GpuContext>) -> Self {
        let pipelines = PipelineCache::new(context.clone());

        let sampler = context.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Engine Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            lod_min_clamp: 0.0,
            lod_max_clamp: 0.0,
            compare: None,
            anisotropy_clamp: 1,
            border_color: None,
        });

        Self {
            context,
            pipelines,
            sampler,
            textures: HashMap::new(),
            next_id: 1,
            frame_size: (0, 0),
            headless_frame: None,
            passes: Vec::new(),
            current: Pass::new(None, Point::ZERO, None),
            pending_destroy: Vec::new(),
        }
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn push_draw(&mut self, kind: DrawKind, quad: &Quad, color: Color) {
        let uv = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let color = color.to_f32_array();
        let mut vertices = [Vertex {
            position: [0.0, 0.0],
            tex_coord: [0.0, 0.0],
            color,
        }; 4];
        for i in 0..4 {
            vertices[i].position = [quad.points[i].x, quad.points[i].y];
            vertices[i].tex_coord = uv[i];
        }
        self.current.draws.push(Draw { kind, vertices });
    }

    fn frame_format(&self) -> wgpu::TextureFormat {
        self.context.surface_format().unwrap_or(TARGET_FORMAT)
    }

    fn execute(&mut self, passes: Vec<Pass>) {
        // All pipeline building happens before recording so the cache can be
        // borrowed immutably for the whole submission.
        let frame_format = self.frame_format();
        self.pipelines.warm_up(frame_format);
        self.pipelines.warm_up(TARGET_FORMAT);

        let surface_texture = if self.context.has_surface() {
            match self.context.get_current_texture() {
                Ok(t) => Some(t),
                Err(err) => {
                    tracing::warn!(%err, "skipping frame: surface texture unavailable");
                    return;
                }
            }
        } else {
            None
        };

        let surface_view = surface_texture
            .as_ref()
            .map(|t| t.texture.create_view(&wgpu::TextureViewDescriptor::default()));

        let device = &self.context.device;
        let mut encoder = self.context.create_command_encoder();

        for pass in &passes {
            // Resolve the color attachment for this pass.
            let (view, format, size) = match pass.target {
                Some(id) => match self.textures.get(&id) {
                    Some(texture) => (&texture.view, texture.format, (texture.width, texture.height)),
                    None => {
                        tracing::warn!(id, "render target missing, dropping pass");
                        continue;
                    }
                },
                None => match (&surface_view, &self.headless_frame) {
                    (Some(view), _) => (view, frame_format, self.frame_size),
                    (None, Some(frame)) => (&frame.view, frame.format, (frame.width, frame.height)),
                    (None, None) => continue,
                },
            };

            if pass.draws.is_empty() && pass.clear.is_none() {
                continue;
            }

            let view_uniforms = ViewUniforms::orthographic(
                size.0.max(1) as f32,
                size.1.max(1) as f32,
                pass.origin.x,
                pass.origin.y,
            );
            let view_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("View Uniforms"),
                contents: bytemuck::bytes_of(&view_uniforms),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            let view_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("View Bind Group"),
                layout: self.pipelines.view_layout(),
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: view_buffer.as_entire_binding(),
                }],
            });

            // Per-draw resources, prepared before the render pass borrows
            // the encoder.
            let mut vertex_data: Vec<Vertex> = Vec::with_capacity(pass.draws.len() * 4);
            let mut texture_groups: Vec<Option<wgpu::BindGroup>> = Vec::with_capacity(pass.draws.len());
            let mut params_buffers: Vec<Option<wgpu::Buffer>> = Vec::with_capacity(pass.draws.len());

            for draw in &pass.draws {
                vertex_data.extend_from_slice(&draw.vertices);

                let group = draw.kind.texture().and_then(|id| {
                    let texture = self.textures.get(&id)?;
                    Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("Source Bind Group"),
                        layout: self.pipelines.texture_layout(),
                        entries: &[
                            wgpu::BindGroupEntry {
                                binding: 0,
                                resource: wgpu::BindingResource::TextureView(&texture.view),
                            },
                            wgpu::BindGroupEntry {
                                binding: 1,
                                resource: wgpu::BindingResource::Sampler(&self.sampler),
                            },
                        ],
                    }))
                });
                texture_groups.push(group);

                let params = match &draw.kind {
                    DrawKind::ColorMatrix(_, uniforms) => Some(device.create_buffer_init(
                        &wgpu::util::BufferInitDescriptor {
                            label: Some("Matrix Uniforms"),
                            contents: bytemuck::bytes_of(uniforms),
                            usage: wgpu::BufferUsages::UNIFORM,
                        },
                    )),
                    DrawKind::Blur(_, uniforms) => Some(device.create_buffer_init(
                        &wgpu::util::BufferInitDescriptor {
                            label: Some("Blur Uniforms"),
                            contents: bytemuck::bytes_of(uniforms),
                            usage: wgpu::BufferUsages::UNIFORM,
                        },
                    )),
                    _ => None,
                };
                params_buffers.push(params);
            }

            let params_groups: Vec<Option<wgpu::BindGroup>> = params_buffers
                .iter()
                .map(|buffer| {
                    buffer.as_ref().map(|buffer| {
                        device.create_bind_group(&wgpu::BindGroupDescriptor {
                            label: Some("Params Bind Group"),
                            layout: self.pipelines.params_layout(),
                            entries: &[wgpu::BindGroupEntry {
                                binding: 0,
                                resource: buffer.as_entire_binding(),
                            }],
                        })
                    })
                })
                .collect();

            let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Frame Vertices"),
                contents: bytemuck::cast_slice(&vertex_data),
                usage: wgpu::BufferUsages::VERTEX,
            });

            let load = match pass.clear {
                Some(color) => {
                    let [r, g, b, a] = color.to_f32_array();
                    wgpu::LoadOp::Clear(wgpu::Color {
                        r: r as f64,
                        g: g as f64,
                        b: b as f64,
                        a: a as f64,
                    })
                }
                None => wgpu::LoadOp::Load,
            };

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Compositor Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            render_pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            render_pass.set_bind_group(0, &view_bind_group, &[]);

            for (i, draw) in pass.draws.iter().enumerate() {
                let kind = draw.kind.pipeline();
                if kind.samples_texture() && texture_groups[i].is_none() {
                    // Source texture was destroyed mid-frame.
                    continue;
                }

                let Some(pipeline) = self.pipelines.peek(kind, format) else {
                    tracing::error!(?kind, ?format, "pipeline missing after warm-up");
                    continue;
                };
                render_pass.set_pipeline(pipeline);

                if let Some(group) = &texture_groups[i] {
                    render_pass.set_bind_group(1, group, &[]);
                }
                if let Some(group) = &params_groups[i] {
                    render_pass.set_bind_group(2, group, &[]);
                }

                let first = (i * 4) as u32;
                render_pass.draw(first..first + 4, 0..1);
            }

            drop(render_pass);
        }

        self.context.submit(std::iter::once(encoder.finish()));

        if let Some(surface_texture) = surface_texture {
            surface_texture.present();
        }
    }

    fn read_headless(
        &self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, GpuError> {
        let frame = self
            .headless_frame
            .as_ref()
            .ok_or_else(|| GpuError::Readback("readback requires a headless frame".into()))?;

        // Row pitch must be 256-byte aligned for texture-to-buffer copies.
        let unpadded = frame.width * 4;
        let padded = unpadded.div_ceil(256) * 256;
        let buffer_size = (padded * frame.height) as wgpu::BufferAddress;

        let buffer = self.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: buffer_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.context.create_command_encoder();
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &frame.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(frame.height),
                },
            },
            wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );
        self.context.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = self.context.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| GpuError::Readback("map callback dropped".into()))?
            .map_err(|err| GpuError::Readback(err.to_string()))?;

        let data = slice.get_mapped_range();
        let mut out = Vec::with_capacity((width * height * 4) as usize);
        for row in y..(y + height).min(frame.height) {
            let start = (row * padded + x * 4) as usize;
            let end = start + (width.min(frame.width.saturating_sub(x)) * 4) as usize;
            out.extend_from_slice(&data[start..end]);
        }
        drop(data);
        buffer.unmap();

        Ok(out)
    }
}

impl Device for WgpuDevice {
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
        pixels: &[u8],
    ) -> TextureId {
        let native = match format {
            TextureFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
        };
        let texture = GpuTexture::new(&self.context, width, height, native);
        texture.write(&self.context, pixels);

        let id = self.alloc_id();
        self.textures.insert(id, texture);
        TextureId(id)
    }

    fn update_texture(&mut self, id: TextureId, pixels: &[u8]) {
        if let Some(texture) = self.textures.get(&id.0) {
            texture.write(&self.context, pixels);
        }
    }

    fn destroy_texture(&mut self, id: TextureId) {
        self.pending_destroy.push(id.0);
    }

    fn create_target(&mut self, width: u32, height: u32) -> TargetId {
        let texture = GpuTexture::render_target(&self.context, width, height, TARGET_FORMAT);
        let id = self.alloc_id();
        self.textures.insert(id, texture);
        TargetId(id)
    }

    fn destroy_target(&mut self, id: TargetId) {
        self.pending_destroy.push(id.0);
    }

    fn target_texture(&self, id: TargetId) -> TextureId {
        TextureId(id.0)
    }

    fn target_size(&self, id: TargetId) -> (u32, u32) {
        self.textures
            .get(&id.0)
            .map(|t| (t.width, t.height))
            .unwrap_or((0, 0))
    }

    fn begin_frame(&mut self, width: u32, height: u32, clear: Color) {
        self.frame_size = (width, height);

        if !self.context.has_surface() {
            let recreate = match &self.headless_frame {
                Some(frame) => frame.width != width || frame.height != height,
                None => true,
            };
            if recreate {
                self.headless_frame = Some(GpuTexture::render_target(
                    &self.context,
                    width.max(1),
                    height.max(1),
                    TARGET_FORMAT,
                ));
            }
        }

        self.passes.clear();
        self.current = Pass::new(None, Point::ZERO, Some(clear));
    }

    fn end_frame(&mut self) {
        let mut passes = std::mem::take(&mut self.passes);
        passes.push(std::mem::replace(
            &mut self.current,
            Pass::new(None, Point::ZERO, None),
        ));

        self.execute(passes);

        for id in self.pending_destroy.drain(..) {
            self.textures.remove(&id);
        }
    }

    fn bind_target(&mut self, target: Option<TargetId>, origin: Point, clear: Option<Color>) {
        let next = Pass::new(target.map(|t| t.0), origin, clear);
        self.passes.push(std::mem::replace(&mut self.current, next));
    }

    fn draw_solid(&mut self, quad: &Quad, color: Color) {
        self.push_draw(DrawKind::Solid, quad, color);
    }

    fn draw_textured(&mut self, quad: &Quad, texture: TextureId, opacity: f32) {
        let modulate = Color::from_f32(1.0, 1.0, 1.0, opacity);
        self.push_draw(DrawKind::Textured(texture.0), quad, modulate);
    }

    fn draw_color_matrix(&mut self, quad: &Quad, texture: TextureId, matrix: &ColorMatrix) {
        // WGSL mat4x4 is column-major; transpose the row-major engine matrix.
        let rows = matrix.to_rows_array();
        let mut cols = [[0.0f32; 4]; 4];
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                cols[c][r] = *value;
            }
        }
        self.push_draw(
            DrawKind::ColorMatrix(texture.0, MatrixUniforms { matrix: cols }),
            quad,
            Color::WHITE,
        );
    }

    fn draw_blur(&mut self, quad: &Quad, texture: TextureId, radius: f32, horizontal: bool) {
        let uniforms = BlurUniforms {
            direction: if horizontal { [1.0, 0.0] } else { [0.0, 1.0] },
            radius,
            _padding: 0.0,
        };
        self.push_draw(DrawKind::Blur(texture.0, uniforms), quad, Color::WHITE);
    }

    fn draw_shadow_mask(&mut self, quad: &Quad, texture: TextureId, color: Color) {
        self.push_draw(DrawKind::ShadowMask(texture.0), quad, color);
    }

    fn read_pixels(&mut self, x: u32, y: u32, width: u32, height: u32) -> Vec<u8> {
        match self.read_headless(x, y, width, height) {
            Ok(pixels) => pixels,
            Err(err) => {
                tracing::error!(%err, "pixel readback failed");
                vec![0; (width * height * 4) as usize]
            }
        }
    }
}
