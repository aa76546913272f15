//! Penumbra render core: a backend-independent frame pipeline.
//!
//! Scene code builds [`Renderable`]s, queues them in a [`RenderQueue`] and
//! hands the queue to [`RenderSystem::process_render_queue`] together with a
//! [`Viewport`]. Every frame runs a shadow pass from the light into a
//! depth-only target, a main pass into the window, an optional debug pass
//! that shows the shadow map, and a HUD overlay.
//!
//! # Invariants
//! - All GPU work goes through [`GpuDevice`] on the thread that owns it.
//! - A renderable that cannot be drawn is logged and skipped; the frame
//!   continues.
//! - Render states may be shared; a disposed state is never applied.

mod config;
mod context;
mod device;
mod error;
mod geometry;
mod hud;
mod program;
mod queue;
mod recording;
mod renderable;
mod shadow;
mod states;
mod sync;
mod system;
mod viewport;
mod window;

pub use config::{OrthoConfig, RenderConfig, RenderToggles, ShadowConfig};
pub use context::{AmbientLight, Light, LightKind, PassKind, ShadingContext, ShadowBinding};
pub use device::{
    BufferHandle, CullFace, DepthTarget, DepthTest, DeviceCaps, DrawCall, DrawSource,
    FramebufferHandle, GpuDevice, PixelRect, PolygonMode, SamplerDesc, TextureBinding,
    TextureDesc, TextureHandle,
};
pub use error::{ConfigError, RenderError};
pub use geometry::{GeometryBuffers, MeshData, SkinMatrices};
pub use hud::{HUD_ORIGIN, HUD2_ORIGIN, HudOverlay, HudText};
pub use program::{ProgramHandle, ProgramKind, ProgramRegistry};
pub use queue::RenderQueue;
pub use recording::{ContextRecord, DrawRecord, GpuCommand, RecordingDevice};
pub use renderable::{DataSource, Material, Primitive, RenderObject, Renderable};
pub use shadow::{LightSpace, ShadowMap};
pub use states::{
    CUBE_FACES, Culling, CullingState, DepthFunction, FrontFaceState, MagFilter, MinFilter,
    ReleaseQueue, RenderState, RenderStateKind, SharedRenderState, StateVariant, Texture,
    TextureState, TextureTarget, VertexWinding, WrapMode, ZBufferState,
};
pub use sync::{ContextGate, FrameSignal};
pub use system::{FramePhase, FrameStats, PATCH_VERTICES, RenderSystem, RenderView};
pub use viewport::{
    NormalizedRect, SharedCamera, SharedViewportListener, Viewport, ViewportCamera,
    ViewportListener,
};
pub use window::RenderWindow;

pub fn crate_info() -> &'static str {
    "penumbra-render v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("render"));
    }
}
