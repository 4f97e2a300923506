//! Common value types shared across the engine.

pub mod color;
pub mod geometry;

pub use color::{Color, ColorMatrix};
pub use geometry::{Bounds, Point, Quad, Rect, Size, Transform};
