//! Graphics backend abstraction.
//!
//! The compositor draws through the [`Device`] trait; this crate provides
//! the trait, a CPU reference implementation ([`SoftwareDevice`]), and a
//! hardware implementation over wgpu ([`WgpuDevice`]).

pub mod context;
pub mod device;
pub mod pipeline;
pub mod shaders;
pub mod software;
pub mod texture;
pub mod wgpu_device;

pub use context::{GpuContext, GpuError};
pub use device::{Device, TargetId, TextureFormat, TextureId};
pub use software::{PixelBuffer, SoftwareDevice};
pub use wgpu_device::WgpuDevice;
