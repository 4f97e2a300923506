//! Animatable value types.

use common::{Color, Point, Size};

/// A value an animation can interpolate.
///
/// `blend` is a plain linear mix; implementations reduce to `+` and scalar
/// `*` on the underlying type. The timing curve is applied to `t` before the
/// blend, so implementations stay curve-agnostic.
pub trait Animatable: Copy {
    fn blend(from: Self, to: Self, t: f32) -> Self;
}

impl Animatable for f32 {
    fn blend(from: Self, to: Self, t: f32) -> Self {
        from + (to - from) * t
    }
}

impl Animatable for Point {
    fn blend(from: Self, to: Self, t: f32) -> Self {
        from + (to - from) * t
    }
}

impl Animatable for Size {
    fn blend(from: Self, to: Self, t: f32) -> Self {
        Size::new(
            f32::blend(from.width, to.width, t),
            f32::blend(from.height, to.height, t),
        )
    }
}

impl Animatable for Color {
    fn blend(from: Self, to: Self, t: f32) -> Self {
        let a = from.to_f32_array();
        let b = to.to_f32_array();
        Color::from_f32(
            f32::blend(a[0], b[0], t),
            f32::blend(a[1], b[1], t),
            f32::blend(a[2], b[2], t),
            f32::blend(a[3], b[3], t),
        )
    }
}

impl Animatable for glam::Vec3 {
    fn blend(from: Self, to: Self, t: f32) -> Self {
        from + (to - from) * t
    }
}

impl Animatable for glam::Mat4 {
    fn blend(from: Self, to: Self, t: f32) -> Self {
        from + (to - from) * t
    }
}
