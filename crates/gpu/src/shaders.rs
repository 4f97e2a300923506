//! WGSL shaders for the wgpu backend.
//!
//! Every pipeline shares one vertex layout (position, tex_coord, color) and
//! one view uniform holding the target's orthographic projection, rebased to
//! the bound target's origin.

/// Solid color shader.
pub const SOLID_SHADER: &str = r#"
struct ViewUniforms {
    transform: mat4x4<f32>,
}

@group(0) @binding(0)
var<uniform> view: ViewUniforms;

struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) tex_coord: vec2<f32>,
    @location(2) color: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec4<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var output: VertexOutput;
    output.position = view.transform * vec4<f32>(input.position, 0.0, 1.0);
    output.color = input.color;
    return output;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    return input.color;
}
"#;

/// Textured shader; the vertex color modulates the sample (alpha-modulated
/// draws pass an opacity in the color alpha).
pub const TEXTURED_SHADER: &str = r#"
struct ViewUniforms {
    transform: mat4x4<f32>,
}

@group(0) @binding(0)
var<uniform> view: ViewUniforms;

@group(1) @binding(0)
var t_source: texture_2d<f32>;

@group(1) @binding(1)
var s_source: sampler;

struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) tex_coord: vec2<f32>,
    @location(2) color: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) tex_coord: vec2<f32>,
    @location(1) color: vec4<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var output: VertexOutput;
    output.position = view.transform * vec4<f32>(input.position, 0.0, 1.0);
    output.tex_coord = input.tex_coord;
    output.color = input.color;
    return output;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let tex_color = textureSample(t_source, s_source, input.tex_coord);
    return tex_color * input.color;
}
"#;

/// Color matrix filter shader.
pub const COLOR_MATRIX_SHADER: &str = r#"
struct ViewUniforms {
    transform: mat4x4<f32>,
}

struct MatrixUniforms {
    matrix: mat4x4<f32>,
}

@group(0) @binding(0)
var<uniform> view: ViewUniforms;

@group(1) @binding(0)
var t_source: texture_2d<f32>;

@group(1) @binding(1)
var s_source: sampler;

@group(2) @binding(0)
var<uniform> filter_params: MatrixUniforms;

struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) tex_coord: vec2<f32>,
    @location(2) color: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) tex_coord: vec2<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var output: VertexOutput;
    output.position = view.transform * vec4<f32>(input.position, 0.0, 1.0);
    output.tex_coord = input.tex_coord;
    return output;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let tex_color = textureSample(t_source, s_source, input.tex_coord);
    return clamp(filter_params.matrix * tex_color, vec4<f32>(0.0), vec4<f32>(1.0));
}
"#;

/// Separable gaussian blur shader (9-tap, one axis per pass).
pub const BLUR_SHADER: &str = r#"
struct ViewUniforms {
    transform: mat4x4<f32>,
}

struct BlurUniforms {
    direction: vec2<f32>,
    radius: f32,
    _padding: f32,
}

@group(0) @binding(0)
var<uniform> view: ViewUniforms;

@group(1) @binding(0)
var t_source: texture_2d<f32>;

@group(1) @binding(1)
var s_source: sampler;

@group(2) @binding(0)
var<uniform> blur: BlurUniforms;

struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) tex_coord: vec2<f32>,
    @location(2) color: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) tex_coord: vec2<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var output: VertexOutput;
    output.position = view.transform * vec4<f32>(input.position, 0.0, 1.0);
    output.tex_coord = input.tex_coord;
    return output;
}

const WEIGHTS: array<f32, 5> = array<f32, 5>(
    0.227027,
    0.1945946,
    0.1216216,
    0.054054,
    0.016216
);

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let tex_size = vec2<f32>(textureDimensions(t_source));
    let pixel_size = 1.0 / tex_size;
    let stride = blur.direction * pixel_size * (blur.radius / 4.0);

    var color = textureSample(t_source, s_source, input.tex_coord) * WEIGHTS[0];

    for (var i = 1; i < 5; i = i + 1) {
        let offset = stride * f32(i);
        color += textureSample(t_source, s_source, input.tex_coord + offset) * WEIGHTS[i];
        color += textureSample(t_source, s_source, input.tex_coord - offset) * WEIGHTS[i];
    }

    return color;
}
"#;

/// Shadow mask shader: the source alpha recolored with the vertex color.
pub const SHADOW_MASK_SHADER: &str = r#"
struct ViewUniforms {
    transform: mat4x4<f32>,
}

@group(0) @binding(0)
var<uniform> view: ViewUniforms;

@group(1) @binding(0)
var t_source: texture_2d<f32>;

@group(1) @binding(1)
var s_source: sampler;

struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) tex_coord: vec2<f32>,
    @location(2) color: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) tex_coord: vec2<f32>,
    @location(1) color: vec4<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var output: VertexOutput;
    output.position = view.transform * vec4<f32>(input.position, 0.0, 1.0);
    output.tex_coord = input.tex_coord;
    output.color = input.color;
    return output;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let alpha = textureSample(t_source, s_source, input.tex_coord).a;
    return vec4<f32>(input.color.rgb, input.color.a * alpha);
}
"#;
