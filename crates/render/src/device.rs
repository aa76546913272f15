//! The seam between the pipeline and a concrete graphics API.
//!
//! The pipeline speaks a small, explicit state-machine vocabulary (bind a
//! target, set the viewport, toggle fixed-function state, bind a program,
//! upload its context, draw). Backends translate that vocabulary into real
//! API calls; [`crate::RecordingDevice`] just records it.

use serde::Serialize;

use crate::context::ShadingContext;
use crate::error::RenderError;
use crate::geometry::{GeometryBuffers, MeshData};
use crate::hud::HudText;
use crate::program::{ProgramHandle, ProgramKind};
use crate::renderable::Primitive;
use crate::states::{DepthFunction, MagFilter, MinFilter, TextureTarget, VertexWinding, WrapMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TextureHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FramebufferHandle(pub u32);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BufferHandle(pub u32);

/// Hardware limits queried once when the pipeline initializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceCaps {
    pub texture_unit_count: u32,
    pub max_texture_size: u32,
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self {
            texture_unit_count: 16,
            max_texture_size: 8192,
        }
    }
}

/// Pixel-space rectangle with a bottom-left origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl PixelRect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Off-screen depth-only target: a framebuffer with one depth texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DepthTarget {
    pub framebuffer: FramebufferHandle,
    pub depth_texture: TextureHandle,
    pub resolution: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextureDesc {
    pub target: TextureTarget,
    pub width: u32,
    pub height: u32,
    pub mipmapped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SamplerDesc {
    pub min_filter: MinFilter,
    pub mag_filter: MagFilter,
    pub wrap: WrapMode,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            min_filter: MinFilter::Trilinear,
            mag_filter: MagFilter::Bilinear,
            wrap: WrapMode::ClampToEdge,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TextureBinding {
    pub target: TextureTarget,
    pub texture: TextureHandle,
    pub sampler: SamplerDesc,
}

/// Fixed-function depth configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DepthTest {
    pub enabled: bool,
    pub write: bool,
    pub function: DepthFunction,
}

impl Default for DepthTest {
    fn default() -> Self {
        Self {
            enabled: true,
            write: true,
            function: DepthFunction::LessOrEqual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CullFace {
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
}

/// How many elements one draw consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DrawSource {
    Arrays { vertex_count: u32 },
    Indexed { index_count: u32 },
    Patches { vertices_per_patch: u32, instance_count: u32 },
}

/// A single draw: topology, the buffers to read, and the element counts.
#[derive(Debug, Clone, Copy)]
pub struct DrawCall<'a> {
    pub primitive: Primitive,
    pub geometry: &'a GeometryBuffers,
    pub source: DrawSource,
}

/// Everything the pipeline needs from a graphics API.
///
/// Calls must come from the thread that owns the context. Implementations are
/// free to defer work until [`GpuDevice::present`].
pub trait GpuDevice {
    fn capabilities(&self) -> DeviceCaps;

    fn create_geometry(&mut self, mesh: &MeshData) -> Result<GeometryBuffers, RenderError>;
    fn destroy_geometry(&mut self, geometry: &GeometryBuffers);

    fn create_program(&mut self, kind: ProgramKind) -> Result<ProgramHandle, RenderError>;
    fn destroy_program(&mut self, program: ProgramHandle);

    /// Upload a texture. `layers` holds one RGBA8 image for 2D targets and six
    /// faces for cube maps.
    fn create_texture(
        &mut self,
        desc: &TextureDesc,
        layers: &[&[u8]],
    ) -> Result<TextureHandle, RenderError>;
    fn destroy_texture(&mut self, texture: TextureHandle);

    fn create_depth_target(&mut self, resolution: u32) -> Result<DepthTarget, RenderError>;
    fn destroy_depth_target(&mut self, target: &DepthTarget);

    /// `None` selects the window's default framebuffer.
    fn bind_framebuffer(&mut self, target: Option<FramebufferHandle>);
    fn set_viewport(&mut self, rect: PixelRect);
    /// `None` disables the scissor test.
    fn set_scissor(&mut self, rect: Option<PixelRect>);
    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>);

    fn set_depth_test(&mut self, test: DepthTest);
    fn set_culling(&mut self, enabled: bool);
    fn set_cull_face(&mut self, face: CullFace);
    fn set_front_face(&mut self, winding: VertexWinding);
    fn set_polygon_mode(&mut self, mode: PolygonMode);

    /// `None` unbinds whatever texture occupies `unit`.
    fn bind_texture(&mut self, unit: u32, binding: Option<TextureBinding>);

    fn bind_program(&mut self, program: ProgramHandle);
    fn upload_context(&mut self, context: &ShadingContext<'_>);
    fn draw(&mut self, call: &DrawCall<'_>);
    fn unbind_program(&mut self);

    /// Immediate screen-space text, unaffected by 3D state.
    fn draw_text(&mut self, text: &HudText);

    /// Show the finished frame.
    fn present(&mut self) -> Result<(), RenderError>;
}
