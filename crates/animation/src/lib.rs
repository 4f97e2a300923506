//! Time-driven property animation.
//!
//! Keyframe interpolation over arbitrary value types, bound to `(target,
//! setter)` closures, advanced by a per-frame [`Scheduler`].

pub mod animation;
pub mod easing;
pub mod scheduler;
pub mod value;

pub use animation::{Animation, Direction, Keyframe, KeyframeAnimation};
pub use easing::Easing;
pub use scheduler::{AnimationEvent, AnimationKey, Scheduler};
pub use value::Animatable;
