use std::fmt::{self, Write as _};

use glam::Mat4;
use serde::Serialize;

use crate::context::{PassKind, ShadingContext, ShadowBinding};
use crate::device::{
    BufferHandle, CullFace, DepthTarget, DepthTest, DeviceCaps, DrawCall, DrawSource,
    FramebufferHandle, GpuDevice, PixelRect, PolygonMode, SamplerDesc, TextureBinding,
    TextureDesc, TextureHandle,
};
use crate::error::RenderError;
use crate::geometry::{GeometryBuffers, MeshData};
use crate::hud::HudText;
use crate::program::{ProgramHandle, ProgramKind};
use crate::renderable::Primitive;
use crate::states::{TextureTarget, VertexWinding};

/// What a [`ShadingContext`] carried when it was uploaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextRecord {
    pub pass: PassKind,
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
    pub light_space: Mat4,
    pub light_count: usize,
    pub has_material: bool,
    pub bone_count: usize,
    pub shadow_map: Option<ShadowBinding>,
    pub patch_resolution: u32,
}

impl From<&ShadingContext<'_>> for ContextRecord {
    fn from(ctx: &ShadingContext<'_>) -> Self {
        Self {
            pass: ctx.pass,
            model: ctx.model,
            view: ctx.view,
            projection: ctx.projection,
            light_space: ctx.light_space,
            light_count: ctx.lights.len(),
            has_material: ctx.material.is_some(),
            bone_count: ctx.skin.map_or(0, |s| s.bone_count()),
            shadow_map: ctx.shadow_map,
            patch_resolution: ctx.patch_resolution,
        }
    }
}

/// A draw as seen by the device, with the program and pass in effect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrawRecord {
    pub program: Option<ProgramHandle>,
    pub pass: Option<PassKind>,
    pub primitive: Primitive,
    pub source: DrawSource,
    /// Identifies the geometry drawn.
    pub positions: BufferHandle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum GpuCommand {
    CreateGeometry(GeometryBuffers),
    DestroyGeometry(BufferHandle),
    CreateProgram(ProgramHandle),
    DestroyProgram(ProgramHandle),
    CreateTexture {
        texture: TextureHandle,
        desc: TextureDesc,
        layers: usize,
    },
    DestroyTexture(TextureHandle),
    CreateDepthTarget(DepthTarget),
    DestroyDepthTarget(DepthTarget),
    BindFramebuffer(Option<FramebufferHandle>),
    SetViewport(PixelRect),
    SetScissor(Option<PixelRect>),
    Clear {
        color: Option<[f32; 4]>,
        depth: Option<f32>,
    },
    SetDepthTest(DepthTest),
    SetCulling(bool),
    SetCullFace(CullFace),
    SetFrontFace(VertexWinding),
    SetPolygonMode(PolygonMode),
    BindTexture {
        unit: u32,
        target: TextureTarget,
        texture: TextureHandle,
        sampler: SamplerDesc,
    },
    UnbindTexture(u32),
    BindProgram(ProgramHandle),
    UploadContext(Box<ContextRecord>),
    Draw(DrawRecord),
    UnbindProgram,
    DrawText(HudText),
    Present,
}

impl fmt::Display for GpuCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateGeometry(g) => write!(
                f,
                "create geometry #{} ({} vertices, {} indices)",
                g.positions.0, g.vertex_count, g.index_count
            ),
            Self::DestroyGeometry(b) => write!(f, "destroy geometry #{}", b.0),
            Self::CreateProgram(p) => write!(f, "create program #{} {:?}", p.id, p.kind),
            Self::DestroyProgram(p) => write!(f, "destroy program #{} {:?}", p.id, p.kind),
            Self::CreateTexture {
                texture,
                desc,
                layers,
            } => write!(
                f,
                "create texture #{} {:?} {}x{} layers={} mipmapped={}",
                texture.0, desc.target, desc.width, desc.height, layers, desc.mipmapped
            ),
            Self::DestroyTexture(t) => write!(f, "destroy texture #{}", t.0),
            Self::CreateDepthTarget(t) => write!(
                f,
                "create depth target fb#{} tex#{} {}px",
                t.framebuffer.0, t.depth_texture.0, t.resolution
            ),
            Self::DestroyDepthTarget(t) => write!(f, "destroy depth target fb#{}", t.framebuffer.0),
            Self::BindFramebuffer(None) => write!(f, "bind framebuffer default"),
            Self::BindFramebuffer(Some(fb)) => write!(f, "bind framebuffer #{}", fb.0),
            Self::SetViewport(r) => {
                write!(f, "viewport ({}, {}) {}x{}", r.x, r.y, r.width, r.height)
            }
            Self::SetScissor(None) => write!(f, "scissor off"),
            Self::SetScissor(Some(r)) => {
                write!(f, "scissor ({}, {}) {}x{}", r.x, r.y, r.width, r.height)
            }
            Self::Clear { color, depth } => write!(f, "clear color={color:?} depth={depth:?}"),
            Self::SetDepthTest(d) => write!(
                f,
                "depth test enabled={} write={} {:?}",
                d.enabled, d.write, d.function
            ),
            Self::SetCulling(on) => write!(f, "culling {}", if *on { "on" } else { "off" }),
            Self::SetCullFace(face) => write!(f, "cull face {face:?}"),
            Self::SetFrontFace(w) => write!(f, "front face {w:?}"),
            Self::SetPolygonMode(m) => write!(f, "polygon mode {m:?}"),
            Self::BindTexture {
                unit,
                target,
                texture,
                ..
            } => write!(f, "bind texture #{} to unit {unit} ({target:?})", texture.0),
            Self::UnbindTexture(unit) => write!(f, "unbind texture unit {unit}"),
            Self::BindProgram(p) => write!(f, "bind program #{} {:?}", p.id, p.kind),
            Self::UploadContext(c) => write!(
                f,
                "upload context {:?} lights={} bones={} shadow={}",
                c.pass,
                c.light_count,
                c.bone_count,
                c.shadow_map.is_some()
            ),
            Self::Draw(d) => write!(
                f,
                "draw {:?} {:?} geometry #{}",
                d.primitive, d.source, d.positions.0
            ),
            Self::UnbindProgram => write!(f, "unbind program"),
            Self::DrawText(t) => write!(f, "text ({}, {}) {:?}", t.x, t.y, t.text),
            Self::Present => write!(f, "present"),
        }
    }
}

/// Headless [`GpuDevice`] that records every call.
///
/// Handles are allocated from counters starting at 1. Used by tests and by
/// tooling that wants to inspect a frame without a GPU.
#[derive(Debug)]
pub struct RecordingDevice {
    caps: DeviceCaps,
    commands: Vec<GpuCommand>,
    next_id: u32,
    bound_program: Option<ProgramHandle>,
    current_pass: Option<PassKind>,
    fail_creates: bool,
    frames_presented: u64,
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self::with_caps(DeviceCaps::default())
    }
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_caps(caps: DeviceCaps) -> Self {
        Self {
            caps,
            commands: Vec::new(),
            next_id: 1,
            bound_program: None,
            current_pass: None,
            fail_creates: false,
            frames_presented: 0,
        }
    }

    /// Make every subsequent resource creation fail.
    pub fn set_fail_creates(&mut self, fail: bool) {
        self.fail_creates = fail;
    }

    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<GpuCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn draw_calls(&self) -> Vec<&DrawRecord> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                GpuCommand::Draw(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// One line per recorded command.
    pub fn trace(&self) -> String {
        let mut out = String::new();
        for (i, command) in self.commands.iter().enumerate() {
            let _ = writeln!(out, "{i:>4}  {command}");
        }
        out
    }

    fn alloc(&mut self) -> Result<u32, RenderError> {
        if self.fail_creates {
            return Err(RenderError::Device("resource creation disabled".into()));
        }
        let id = self.next_id;
        self.next_id += 1;
        Ok(id)
    }

    fn alloc_if(&mut self, present: bool) -> Result<Option<BufferHandle>, RenderError> {
        if present {
            Ok(Some(BufferHandle(self.alloc()?)))
        } else {
            Ok(None)
        }
    }
}

impl GpuDevice for RecordingDevice {
    fn capabilities(&self) -> DeviceCaps {
        self.caps
    }

    fn create_geometry(&mut self, mesh: &MeshData) -> Result<GeometryBuffers, RenderError> {
        let geometry = GeometryBuffers {
            positions: BufferHandle(self.alloc()?),
            normals: self.alloc_if(!mesh.normals.is_empty())?,
            tex_coords: self.alloc_if(!mesh.tex_coords.is_empty())?,
            indices: self.alloc_if(!mesh.indices.is_empty())?,
            bone_indices: self.alloc_if(!mesh.bone_indices.is_empty())?,
            bone_weights: self.alloc_if(!mesh.bone_weights.is_empty())?,
            vertex_count: mesh.vertex_count(),
            index_count: mesh.index_count(),
        };
        self.commands
            .push(GpuCommand::CreateGeometry(geometry.clone()));
        Ok(geometry)
    }

    fn destroy_geometry(&mut self, geometry: &GeometryBuffers) {
        self.commands
            .push(GpuCommand::DestroyGeometry(geometry.positions));
    }

    fn create_program(&mut self, kind: ProgramKind) -> Result<ProgramHandle, RenderError> {
        let handle = ProgramHandle {
            id: self.alloc()?,
            kind,
        };
        self.commands.push(GpuCommand::CreateProgram(handle));
        Ok(handle)
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.commands.push(GpuCommand::DestroyProgram(program));
    }

    fn create_texture(
        &mut self,
        desc: &TextureDesc,
        layers: &[&[u8]],
    ) -> Result<TextureHandle, RenderError> {
        let texture = TextureHandle(self.alloc()?);
        self.commands.push(GpuCommand::CreateTexture {
            texture,
            desc: desc.clone(),
            layers: layers.len(),
        });
        Ok(texture)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.commands.push(GpuCommand::DestroyTexture(texture));
    }

    fn create_depth_target(&mut self, resolution: u32) -> Result<DepthTarget, RenderError> {
        let target = DepthTarget {
            framebuffer: FramebufferHandle(self.alloc()?),
            depth_texture: TextureHandle(self.alloc()?),
            resolution,
        };
        self.commands.push(GpuCommand::CreateDepthTarget(target));
        Ok(target)
    }

    fn destroy_depth_target(&mut self, target: &DepthTarget) {
        self.commands.push(GpuCommand::DestroyDepthTarget(*target));
    }

    fn bind_framebuffer(&mut self, target: Option<FramebufferHandle>) {
        self.commands.push(GpuCommand::BindFramebuffer(target));
    }

    fn set_viewport(&mut self, rect: PixelRect) {
        self.commands.push(GpuCommand::SetViewport(rect));
    }

    fn set_scissor(&mut self, rect: Option<PixelRect>) {
        self.commands.push(GpuCommand::SetScissor(rect));
    }

    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>) {
        self.commands.push(GpuCommand::Clear { color, depth });
    }

    fn set_depth_test(&mut self, test: DepthTest) {
        self.commands.push(GpuCommand::SetDepthTest(test));
    }

    fn set_culling(&mut self, enabled: bool) {
        self.commands.push(GpuCommand::SetCulling(enabled));
    }

    fn set_cull_face(&mut self, face: CullFace) {
        self.commands.push(GpuCommand::SetCullFace(face));
    }

    fn set_front_face(&mut self, winding: VertexWinding) {
        self.commands.push(GpuCommand::SetFrontFace(winding));
    }

    fn set_polygon_mode(&mut self, mode: PolygonMode) {
        self.commands.push(GpuCommand::SetPolygonMode(mode));
    }

    fn bind_texture(&mut self, unit: u32, binding: Option<TextureBinding>) {
        self.commands.push(match binding {
            Some(b) => GpuCommand::BindTexture {
                unit,
                target: b.target,
                texture: b.texture,
                sampler: b.sampler,
            },
            None => GpuCommand::UnbindTexture(unit),
        });
    }

    fn bind_program(&mut self, program: ProgramHandle) {
        self.bound_program = Some(program);
        self.commands.push(GpuCommand::BindProgram(program));
    }

    fn upload_context(&mut self, context: &ShadingContext<'_>) {
        self.current_pass = Some(context.pass);
        self.commands
            .push(GpuCommand::UploadContext(Box::new(context.into())));
    }

    fn draw(&mut self, call: &DrawCall<'_>) {
        self.commands.push(GpuCommand::Draw(DrawRecord {
            program: self.bound_program,
            pass: self.current_pass,
            primitive: call.primitive,
            source: call.source,
            positions: call.geometry.positions,
        }));
    }

    fn unbind_program(&mut self) {
        self.bound_program = None;
        self.current_pass = None;
        self.commands.push(GpuCommand::UnbindProgram);
    }

    fn draw_text(&mut self, text: &HudText) {
        self.commands.push(GpuCommand::DrawText(text.clone()));
    }

    fn present(&mut self) -> Result<(), RenderError> {
        self.frames_presented += 1;
        self.commands.push(GpuCommand::Present);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_handles_follow_mesh_contents() {
        let mut device = RecordingDevice::new();
        let geometry = device.create_geometry(&MeshData::cube(1.0)).unwrap();
        assert_eq!(geometry.vertex_count, 24);
        assert_eq!(geometry.index_count, 36);
        assert!(geometry.indices.is_some());
        assert!(geometry.bone_indices.is_none());

        let quad = device.create_geometry(&MeshData::screen_quad()).unwrap();
        assert!(quad.normals.is_none());
        assert_ne!(quad.positions, geometry.positions);
    }

    #[test]
    fn draw_records_bound_program_and_pass() {
        let mut device = RecordingDevice::new();
        let geometry = device.create_geometry(&MeshData::plane(1.0)).unwrap();
        let program = device.create_program(ProgramKind::Rendering).unwrap();
        device.bind_program(program);
        device.upload_context(&ShadingContext::new(PassKind::Main));
        device.draw(&DrawCall {
            primitive: Primitive::Triangles,
            geometry: &geometry,
            source: DrawSource::Indexed { index_count: 6 },
        });
        device.unbind_program();

        let draws = device.draw_calls();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].program, Some(program));
        assert_eq!(draws[0].pass, Some(PassKind::Main));
        assert_eq!(draws[0].positions, geometry.positions);
    }

    #[test]
    fn failing_creates() {
        let mut device = RecordingDevice::new();
        device.set_fail_creates(true);
        assert!(matches!(
            device.create_program(ProgramKind::Depth),
            Err(RenderError::Device(_))
        ));
        assert!(device.commands().is_empty());
    }

    #[test]
    fn trace_lists_commands() {
        let mut device = RecordingDevice::new();
        device.bind_framebuffer(None);
        device.set_viewport(PixelRect::new(0, 0, 800, 600));
        device.present().unwrap();
        let trace = device.trace();
        assert!(trace.contains("bind framebuffer default"));
        assert!(trace.contains("viewport (0, 0) 800x600"));
        assert!(trace.contains("present"));
        assert_eq!(device.frames_presented(), 1);
    }

    #[test]
    fn commands_serialize_to_json() {
        let mut device = RecordingDevice::new();
        device.set_scissor(None);
        device.set_culling(true);
        let json = serde_json::to_string(device.commands()).unwrap();
        assert!(json.contains("SetScissor"));
        assert!(json.contains("SetCulling"));
    }
}
