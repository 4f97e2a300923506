//! Scene nodes.
//!
//! Nodes are a closed set of variants discriminated by [`NodeKind`]. The
//! tree structure (parent/children) lives on the node itself; rendering
//! state does not; the compositor derives everything per frame.

use bitflags::bitflags;
use common::{Color, ColorMatrix, Point, Quad, Rect};
use glam::Mat4;
use gpu::{Device, TextureId};
use smallvec::SmallVec;
use std::fmt;

use crate::pool::NodeId;
use crate::tree::PreprocessFn;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        /// The preprocess hook should run at the next prepass.
        const PREPROCESS = 1 << 0;
        /// The node participates in hit testing.
        const POINTER_TARGET = 1 << 1;
        /// Storage came from the fixed pool block rather than the heap.
        const POOL_ALLOCATED = 1 << 2;
        /// The node and its subtree are skipped by the compositor.
        const HIDDEN = 1 << 3;
    }
}

/// Custom draw callback for [`NodeKind::Render`] nodes.
pub type DrawFn = Box<dyn FnMut(&mut dyn Device, &Quad)>;

/// Runtime type tag for the closed node variant set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeTag {
    Basic,
    Transform,
    Opacity,
    Rectangle,
    Texture,
    ColorFilter,
    Blur,
    Shadow,
    Render,
}

/// 4x4 transform, optionally starting a 3D-projected subtree.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransformNode {
    pub matrix: Mat4,
    /// A positive depth switches the subtree into 3D projection; the value
    /// acts as the perspective distance.
    pub projection_depth: f32,
}

/// Group opacity in 0.0 - 1.0. Values below 1.0 layer the subtree.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OpacityNode {
    pub opacity: f32,
}

/// Axis-aligned solid color rectangle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RectangleNode {
    pub rect: Rect,
    pub color: Color,
}

/// Axis-aligned textured rectangle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextureNode {
    pub rect: Rect,
    pub texture: TextureId,
}

/// 4x4 color matrix applied to the subtree. Non-identity matrices layer it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorFilterNode {
    pub matrix: ColorMatrix,
}

/// Gaussian blur over the subtree. A zero radius is a pass-through.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlurNode {
    pub radius: u32,
}

/// Drop shadow behind the subtree. A fully transparent color disables it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadowNode {
    pub radius: f32,
    pub offset: Point,
    pub color: Color,
}

/// Custom draw callback with the bounds it paints into.
pub struct RenderNode {
    pub rect: Rect,
    pub draw: DrawFn,
}

/// Closed set of node variants.
pub enum NodeKind {
    Basic,
    Transform(TransformNode),
    Opacity(OpacityNode),
    Rectangle(RectangleNode),
    Texture(TextureNode),
    ColorFilter(ColorFilterNode),
    Blur(BlurNode),
    Shadow(ShadowNode),
    Render(RenderNode),
}

impl NodeKind {
    pub fn tag(&self) -> NodeTag {
        match self {
            NodeKind::Basic => NodeTag::Basic,
            NodeKind::Transform(_) => NodeTag::Transform,
            NodeKind::Opacity(_) => NodeTag::Opacity,
            NodeKind::Rectangle(_) => NodeTag::Rectangle,
            NodeKind::Texture(_) => NodeTag::Texture,
            NodeKind::ColorFilter(_) => NodeTag::ColorFilter,
            NodeKind::Blur(_) => NodeTag::Blur,
            NodeKind::Shadow(_) => NodeTag::Shadow,
            NodeKind::Render(_) => NodeTag::Render,
        }
    }
}

/// A node in the scene tree.
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: SmallVec<[NodeId; 4]>,
    pub(crate) flags: NodeFlags,
    pub(crate) preprocess: Option<PreprocessFn>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: SmallVec::new(),
            flags: NodeFlags::empty(),
            preprocess: None,
        }
    }

    pub fn basic() -> Self {
        Self::new(NodeKind::Basic)
    }

    pub fn transform(matrix: Mat4) -> Self {
        Self::new(NodeKind::Transform(TransformNode {
            matrix,
            projection_depth: 0.0,
        }))
    }

    pub fn projection(matrix: Mat4, depth: f32) -> Self {
        Self::new(NodeKind::Transform(TransformNode {
            matrix,
            projection_depth: depth,
        }))
    }

    pub fn opacity(opacity: f32) -> Self {
        Self::new(NodeKind::Opacity(OpacityNode { opacity }))
    }

    pub fn rectangle(rect: Rect, color: Color) -> Self {
        Self::new(NodeKind::Rectangle(RectangleNode { rect, color }))
    }

    pub fn texture(rect: Rect, texture: TextureId) -> Self {
        Self::new(NodeKind::Texture(TextureNode { rect, texture }))
    }

    pub fn color_filter(matrix: ColorMatrix) -> Self {
        Self::new(NodeKind::ColorFilter(ColorFilterNode { matrix }))
    }

    pub fn blur(radius: u32) -> Self {
        Self::new(NodeKind::Blur(BlurNode { radius }))
    }

    pub fn shadow(radius: f32, offset: Point, color: Color) -> Self {
        Self::new(NodeKind::Shadow(ShadowNode {
            radius,
            offset,
            color,
        }))
    }

    pub fn render(rect: Rect, draw: DrawFn) -> Self {
        Self::new(NodeKind::Render(RenderNode { rect, draw }))
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }

    pub fn tag(&self) -> NodeTag {
        self.kind.tag()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    // === Flags ===

    pub fn is_pointer_target(&self) -> bool {
        self.flags.contains(NodeFlags::POINTER_TARGET)
    }

    pub fn set_pointer_target(&mut self, enabled: bool) {
        self.flags.set(NodeFlags::POINTER_TARGET, enabled);
    }

    pub fn is_hidden(&self) -> bool {
        self.flags.contains(NodeFlags::HIDDEN)
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.flags.set(NodeFlags::HIDDEN, hidden);
    }

    pub fn is_pool_allocated(&self) -> bool {
        self.flags.contains(NodeFlags::POOL_ALLOCATED)
    }

    pub fn preprocess_requested(&self) -> bool {
        self.flags.contains(NodeFlags::PREPROCESS)
    }

    /// Flag the preprocess hook to run at the next prepass.
    pub fn request_preprocess(&mut self) {
        self.flags.insert(NodeFlags::PREPROCESS);
    }

    // === Variant accessors ===
    //
    // Each returns `None` when the runtime tag does not match, mirroring a
    // checked downcast.

    pub fn as_transform(&self) -> Option<&TransformNode> {
        match &self.kind {
            NodeKind::Transform(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_transform_mut(&mut self) -> Option<&mut TransformNode> {
        match &mut self.kind {
            NodeKind::Transform(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_opacity(&self) -> Option<&OpacityNode> {
        match &self.kind {
            NodeKind::Opacity(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_opacity_mut(&mut self) -> Option<&mut OpacityNode> {
        match &mut self.kind {
            NodeKind::Opacity(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_rectangle(&self) -> Option<&RectangleNode> {
        match &self.kind {
            NodeKind::Rectangle(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_rectangle_mut(&mut self) -> Option<&mut RectangleNode> {
        match &mut self.kind {
            NodeKind::Rectangle(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_texture(&self) -> Option<&TextureNode> {
        match &self.kind {
            NodeKind::Texture(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_texture_mut(&mut self) -> Option<&mut TextureNode> {
        match &mut self.kind {
            NodeKind::Texture(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_color_filter(&self) -> Option<&ColorFilterNode> {
        match &self.kind {
            NodeKind::ColorFilter(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_color_filter_mut(&mut self) -> Option<&mut ColorFilterNode> {
        match &mut self.kind {
            NodeKind::ColorFilter(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_blur(&self) -> Option<&BlurNode> {
        match &self.kind {
            NodeKind::Blur(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_blur_mut(&mut self) -> Option<&mut BlurNode> {
        match &mut self.kind {
            NodeKind::Blur(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_shadow(&self) -> Option<&ShadowNode> {
        match &self.kind {
            NodeKind::Shadow(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_shadow_mut(&mut self) -> Option<&mut ShadowNode> {
        match &mut self.kind {
            NodeKind::Shadow(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_render_mut(&mut self) -> Option<&mut RenderNode> {
        match &mut self.kind {
            NodeKind::Render(r) => Some(r),
            _ => None,
        }
    }

    // === Animation endpoints ===
    //
    // Thin setters so a `(target, value)` closure can drive a node property
    // without matching on the variant itself. Each asserts the variant.

    pub fn set_opacity(&mut self, opacity: f32) {
        let node = self.as_opacity_mut().expect("set_opacity on non-Opacity node");
        node.opacity = opacity.clamp(0.0, 1.0);
    }

    pub fn set_matrix(&mut self, matrix: Mat4) {
        let node = self.as_transform_mut().expect("set_matrix on non-Transform node");
        node.matrix = matrix;
    }

    pub fn set_color(&mut self, color: Color) {
        let node = self.as_rectangle_mut().expect("set_color on non-Rectangle node");
        node.color = color;
    }

    pub fn set_blur_radius(&mut self, radius: u32) {
        let node = self.as_blur_mut().expect("set_blur_radius on non-Blur node");
        node.radius = radius;
    }

    pub fn set_shadow_offset(&mut self, offset: Point) {
        let node = self.as_shadow_mut().expect("set_shadow_offset on non-Shadow node");
        node.offset = offset;
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("tag", &self.tag())
            .field("parent", &self.parent)
            .field("children", &self.children.len())
            .field("flags", &self.flags)
            .finish()
    }
}
