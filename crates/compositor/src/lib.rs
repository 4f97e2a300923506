//! Scene-graph compositing renderer.
//!
//! Walks the retained node tree once per frame, flattening it into an
//! element array, rendering effect subtrees (opacity, color filter, blur,
//! shadow) to pooled offscreen targets, and issuing the minimal set of
//! draw calls in correct back-to-front order.

pub mod compositor;
pub mod element;
pub mod surface;
pub mod targets;

pub use compositor::{Compositor, CompositorSettings, CompositorStats};
pub use element::{Element, FrameCounts};
pub use surface::Surface;
pub use targets::TargetPool;
