//! Retained scene graph.
//!
//! A tree of drawable and effect nodes, stored in a fixed-capacity pool with
//! heap fallback. The tree owns no rendering state; the compositor walks it
//! once per frame.

pub mod hit;
pub mod node;
pub mod pool;
pub mod tree;

pub use hit::hit_test;
pub use node::{
    BlurNode, ColorFilterNode, DrawFn, Node, NodeFlags, NodeKind, NodeTag, OpacityNode,
    RectangleNode, RenderNode, ShadowNode, TextureNode, TransformNode,
};
pub use pool::{NodeId, NodePool};
pub use tree::{PreprocessFn, SceneTree};
