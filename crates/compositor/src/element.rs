//! Per-frame render bookkeeping records.

use gpu::TargetId;
use scene::NodeId;

/// Per-frame projection of one node, valid for the duration of a single
/// `render()` call.
///
/// A `projection` or `layered` element's descendants occupy the contiguous
/// index range `[index + 1, index + 1 + group_size)` in the element array;
/// range operations (depth sort, layer rendering) rely on this.
#[derive(Clone, Copy, Debug)]
pub struct Element {
    /// Source node.
    pub node: NodeId,
    /// Index of the element's first quad in the frame's vertex storage.
    pub vertex_offset: usize,
    /// Depth under an active 3D projection; meaningful only there.
    pub z: f32,
    /// Offscreen target holding the rendered subtree (layered elements).
    pub target: Option<TargetId>,
    /// Second target for two-pass effects (a shadow's untouched source).
    pub source: Option<TargetId>,
    /// Number of descendant elements.
    pub group_size: usize,
    /// This element starts a 3D-projected subtree.
    pub projection: bool,
    /// This element's subtree is flattened to an offscreen texture.
    pub layered: bool,
    /// Already drawn (or consumed by a layer) this frame.
    pub completed: bool,
}

impl Element {
    pub fn leaf(node: NodeId, vertex_offset: usize, z: f32) -> Self {
        Self {
            node,
            vertex_offset,
            z,
            target: None,
            source: None,
            group_size: 0,
            projection: false,
            layered: false,
            completed: false,
        }
    }

    pub fn group(node: NodeId, layered: bool) -> Self {
        Self {
            node,
            vertex_offset: 0,
            z: 0.0,
            target: None,
            source: None,
            group_size: 0,
            projection: !layered,
            layered,
            completed: false,
        }
    }
}

/// Exact storage requirements tallied by the prepass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameCounts {
    pub elements: usize,
    pub quads: usize,
}
