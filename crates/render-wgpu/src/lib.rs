//! wgpu backend for `penumbra-render`.
//!
//! [`WgpuDevice`] implements [`penumbra_render::GpuDevice`]: every
//! program kind maps to a WGSL module, fixed-function state maps to cached
//! render pipelines, and a frame's calls are replayed into render passes on
//! `present`. HUD text goes through an [`OverlayPass`] supplied by the
//! application.
//!
//! # Invariants
//! - Depth-only targets never get a fragment stage.
//! - A texture is never sampled by the pass that renders into it.
//! - Clears honour the scissor rectangle.

mod camera;
mod convert;
mod gpu;
mod overlay;
mod shaders;
mod uniforms;

pub use camera::FlyCamera;
pub use gpu::{OPTIONAL_FEATURES, WgpuDevice};
pub use overlay::{OverlayPass, OverlayTarget, top_left_origin};
pub use uniforms::{MAX_BONES, MAX_LIGHTS};
