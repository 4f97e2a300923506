//! Render pipeline management for the wgpu backend.

use crate::context::GpuContext;
use crate::shaders;
use std::collections::HashMap;
use std::sync::Arc;
use wgpu::{
    BindGroupLayout, BlendState, ColorTargetState, ColorWrites, FragmentState, FrontFace,
    MultisampleState, PolygonMode, PrimitiveState, PrimitiveTopology, RenderPipeline,
    TextureFormat, VertexState,
};

/// Pipeline identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    /// Solid color quads.
    Solid,
    /// Textured quads, color-modulated (covers plain and alpha-modulated).
    Textured,
    /// 4x4 color matrix filter.
    ColorMatrix,
    /// Separable gaussian blur pass.
    Blur,
    /// Blurred alpha mask recolored as a shadow.
    ShadowMask,
}

impl PipelineKind {
    const ALL: [PipelineKind; 5] = [
        PipelineKind::Solid,
        PipelineKind::Textured,
        PipelineKind::ColorMatrix,
        PipelineKind::Blur,
        PipelineKind::ShadowMask,
    ];

    fn shader(self) -> &'static str {
        match self {
            PipelineKind::Solid => shaders::SOLID_SHADER,
            PipelineKind::Textured => shaders::TEXTURED_SHADER,
            PipelineKind::ColorMatrix => shaders::COLOR_MATRIX_SHADER,
            PipelineKind::Blur => shaders::BLUR_SHADER,
            PipelineKind::ShadowMask => shaders::SHADOW_MASK_SHADER,
        }
    }

    fn label(self) -> &'static str {
        match self {
            PipelineKind::Solid => "solid",
            PipelineKind::Textured => "textured",
            PipelineKind::ColorMatrix => "color-matrix",
            PipelineKind::Blur => "blur",
            PipelineKind::ShadowMask => "shadow-mask",
        }
    }

    /// Whether the pipeline samples a source texture (bind group 1).
    pub fn samples_texture(self) -> bool {
        !matches!(self, PipelineKind::Solid)
    }

    /// Whether the pipeline takes an effect uniform (bind group 2).
    pub fn has_params(self) -> bool {
        matches!(self, PipelineKind::ColorMatrix | PipelineKind::Blur)
    }
}

/// Caches render pipelines per (kind, target format).
///
/// Offscreen targets and the window surface can disagree on texture format,
/// so pipelines are built lazily for each format actually rendered to.
pub struct PipelineCache {
    context: Arc<GpuContext>,
    pipelines: HashMap<(PipelineKind, TextureFormat), RenderPipeline>,
    view_layout: BindGroupLayout,
    texture_layout: BindGroupLayout,
    params_layout: BindGroupLayout,
}

impl PipelineCache {
    pub fn new(context: Arc<GpuContext>) -> Self {
        let device = &context.device;

        let view_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("View Uniform Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Source Texture Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let params_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Effect Params Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        Self {
            context,
            pipelines: HashMap::new(),
            view_layout,
            texture_layout,
            params_layout,
        }
    }

    pub fn view_layout(&self) -> &BindGroupLayout {
        &self.view_layout
    }

    pub fn texture_layout(&self) -> &BindGroupLayout {
        &self.texture_layout
    }

    pub fn params_layout(&self) -> &BindGroupLayout {
        &self.params_layout
    }

    /// Get or build the pipeline for a kind and target format.
    pub fn get(&mut self, kind: PipelineKind, format: TextureFormat) -> &RenderPipeline {
        if !self.pipelines.contains_key(&(kind, format)) {
            let pipeline = self.build(kind, format);
            self.pipelines.insert((kind, format), pipeline);
        }
        &self.pipelines[&(kind, format)]
    }

    /// Build every pipeline for a format up front.
    pub fn warm_up(&mut self, format: TextureFormat) {
        for kind in PipelineKind::ALL {
            self.get(kind, format);
        }
    }

    /// Look up an already-built pipeline without building.
    pub fn peek(&self, kind: PipelineKind, format: TextureFormat) -> Option<&RenderPipeline> {
        self.pipelines.get(&(kind, format))
    }

    fn build(&self, kind: PipelineKind, format: TextureFormat) -> RenderPipeline {
        let device = &self.context.device;

        tracing::debug!(pipeline = kind.label(), ?format, "building render pipeline");

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(kind.label()),
            source: wgpu::ShaderSource::Wgsl(kind.shader().into()),
        });

        let mut layouts: Vec<&BindGroupLayout> = vec![&self.view_layout];
        if kind.samples_texture() {
            layouts.push(&self.texture_layout);
        }
        if kind.has_params() {
            layouts.push(&self.params_layout);
        }

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(kind.label()),
            bind_group_layouts: &layouts,
            push_constant_ranges: &[],
        });

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(kind.label()),
            layout: Some(&pipeline_layout),
            vertex: VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[Vertex::layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(ColorTargetState {
                    format,
                    blend: Some(BlendState::ALPHA_BLENDING),
                    write_mask: ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: PrimitiveState {
                topology: PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                front_face: FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }
}

/// Shared vertex layout: position, texture coordinate, color.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub tex_coord: [f32; 2],
    pub color: [f32; 4],
}

impl Vertex {
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 4]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x4,
                },
            ],
        }
    }
}

/// Per-pass view uniform.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ViewUniforms {
    pub transform: [[f32; 4]; 4],
}

impl ViewUniforms {
    /// Orthographic projection over a target of the given pixel size, with
    /// frame coordinates rebased so `origin` maps to the top-left corner.
    pub fn orthographic(width: f32, height: f32, origin_x: f32, origin_y: f32) -> Self {
        let matrix = glam::Mat4::orthographic_rh(
            origin_x,
            origin_x + width,
            origin_y + height,
            origin_y,
            -1.0,
            1.0,
        );
        Self {
            transform: matrix.to_cols_array_2d(),
        }
    }
}

/// Per-draw blur parameters.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BlurUniforms {
    pub direction: [f32; 2],
    pub radius: f32,
    pub _padding: f32,
}

/// Per-draw color matrix parameters.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MatrixUniforms {
    pub matrix: [[f32; 4]; 4],
}
