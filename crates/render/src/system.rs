//! The frame pipeline: shadow pass, main pass, debug pass, HUD, present.

use glam::{Mat4, Vec3};
use serde::Serialize;
use tracing::{debug, info, info_span, trace, warn};

use crate::config::{RenderConfig, RenderToggles};
use crate::context::{AmbientLight, Light, PassKind, ShadingContext, ShadowBinding};
use crate::device::{
    CullFace, DepthTest, DeviceCaps, DrawCall, DrawSource, GpuDevice, PixelRect, PolygonMode,
    SamplerDesc, TextureBinding,
};
use crate::error::RenderError;
use crate::geometry::{GeometryBuffers, MeshData};
use crate::hud::{HUD_ORIGIN, HUD2_ORIGIN, HudOverlay};
use crate::program::{ProgramHandle, ProgramKind, ProgramRegistry};
use crate::queue::RenderQueue;
use crate::renderable::{DataSource, Primitive, Renderable};
use crate::shadow::{LightSpace, ShadowMap};
use crate::states::{
    CullingState, FrontFaceState, MagFilter, MinFilter, ReleaseQueue, RenderState,
    RenderStateKind, SharedRenderState, TextureState, TextureTarget, VertexWinding, WrapMode,
    ZBufferState,
};
use crate::sync::ContextGate;
use crate::viewport::Viewport;

/// Vertices per instanced patch.
pub const PATCH_VERTICES: u32 = 4;

/// Camera inputs for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderView {
    /// Camera position in world space.
    pub camera_position: Vec3,
    pub view: Mat4,
    /// Used while the perspective toggle is on.
    pub projection: Mat4,
}

impl Default for RenderView {
    fn default() -> Self {
        Self::look_at(Vec3::new(0.0, 10.0, 10.0), Vec3::ZERO, 60.0, 16.0 / 9.0)
    }
}

impl RenderView {
    /// Perspective camera at `eye` looking at `target`.
    pub fn look_at(eye: Vec3, target: Vec3, fov_degrees: f32, aspect: f32) -> Self {
        Self {
            camera_position: eye,
            view: Mat4::look_at_rh(eye, target, Vec3::Y),
            projection: Mat4::perspective_rh(fov_degrees.to_radians(), aspect, 0.1, 1000.0),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum FramePhase {
    #[default]
    Idle,
    ShadowPass,
    MainPass,
    DebugPass,
    /// Drawing finished; waiting for [`RenderSystem::swap_buffers`].
    Presented,
}

/// What one call to [`RenderSystem::process_render_queue`] drew.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    pub shadow_draws: u32,
    pub main_draws: u32,
    /// Renderables left out of the main pass.
    pub skipped: u32,
    pub debug_quad: bool,
    pub hud_strings: u32,
}

/// Resources that exist once the context is initialized.
#[derive(Debug)]
struct ContextResources {
    caps: DeviceCaps,
    shadow: Option<ShadowMap>,
    debug_quad: GeometryBuffers,
}

/// Owns the device and drives every frame through it.
///
/// All methods must be called on the thread that owns the GPU context.
pub struct RenderSystem<D: GpuDevice> {
    device: D,
    config: RenderConfig,
    toggles: RenderToggles,
    programs: ProgramRegistry,
    resources: Option<ContextResources>,
    lights: Vec<Light>,
    ambient: AmbientLight,
    hud: HudOverlay,
    release: ReleaseQueue,
    gate: ContextGate,
    phase: FramePhase,
}

impl<D: GpuDevice> RenderSystem<D> {
    /// Fails when `config` does not validate; nothing touches the device
    /// before that check.
    pub fn new(device: D, config: RenderConfig) -> Result<Self, RenderError> {
        config.validate()?;
        let toggles = RenderToggles::from_config(&config.ortho);
        Ok(Self {
            device,
            config,
            toggles,
            programs: ProgramRegistry::new(),
            resources: None,
            lights: Vec::new(),
            ambient: AmbientLight::default(),
            hud: HudOverlay::new(),
            release: ReleaseQueue::new(),
            gate: ContextGate::new(),
            phase: FramePhase::Idle,
        })
    }

    /// Query capabilities, build the shadow target, the depth and
    /// framebuffer programs and the debug quad, then open the context gate.
    pub fn initialize(&mut self) -> Result<(), RenderError> {
        if self.resources.is_some() {
            debug!("render system already initialized");
            return Ok(());
        }
        let caps = self.device.capabilities();
        let shadow = if self.config.shadows.enabled {
            Some(ShadowMap::create(&mut self.device, &self.config.shadows)?)
        } else {
            None
        };
        for kind in [ProgramKind::Depth, ProgramKind::Framebuffer] {
            if !self.programs.contains(kind) {
                self.create_gpu_shader_program(kind)?;
            }
        }
        let debug_quad = self.device.create_geometry(&MeshData::screen_quad())?;

        self.device.set_culling(true);
        self.device.set_cull_face(CullFace::Back);
        self.device.set_depth_test(DepthTest::default());
        self.device.set_front_face(VertexWinding::CounterClockwise);

        info!(
            texture_units = caps.texture_unit_count,
            max_texture_size = caps.max_texture_size,
            shadow_resolution = shadow.as_ref().map(ShadowMap::resolution),
            "render system initialized"
        );
        self.resources = Some(ContextResources {
            caps,
            shadow,
            debug_quad,
        });
        self.gate.mark_ready();
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.resources.is_some()
    }

    /// Handle for threads that must wait until [`Self::initialize`] ran.
    pub fn context_gate(&self) -> ContextGate {
        self.gate.clone()
    }

    pub fn capabilities(&self) -> Option<DeviceCaps> {
        self.resources.as_ref().map(|r| r.caps)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn create_render_queue<'a>(&self) -> RenderQueue<'a> {
        RenderQueue::new()
    }

    /// A fresh, enabled state of `kind`. Texture states need the device
    /// capabilities and therefore an initialized system.
    pub fn create_render_state(
        &self,
        kind: RenderStateKind,
    ) -> Result<SharedRenderState, RenderError> {
        let state = match kind {
            RenderStateKind::ZBuffer => RenderState::from(ZBufferState::new()),
            RenderStateKind::FrontFace => RenderState::from(FrontFaceState::new()),
            RenderStateKind::Culling => RenderState::from(CullingState::new()),
            RenderStateKind::Texture => {
                let caps = self.capabilities().ok_or(RenderError::NotInitialized)?;
                RenderState::from(TextureState::new(
                    caps.texture_unit_count,
                    self.release.clone(),
                ))
            }
        };
        Ok(state.into_shared())
    }

    pub fn create_gpu_shader_program(
        &mut self,
        kind: ProgramKind,
    ) -> Result<ProgramHandle, RenderError> {
        if self.programs.contains(kind) {
            return Err(RenderError::ProgramExists(kind));
        }
        let handle = self.device.create_program(kind)?;
        self.programs.insert(handle)?;
        debug!(?kind, id = handle.id, "shader program created");
        Ok(handle)
    }

    pub fn gpu_shader_program(&self, kind: ProgramKind) -> Result<ProgramHandle, RenderError> {
        self.programs.get(kind)
    }

    pub fn upload_mesh(&mut self, mesh: &MeshData) -> Result<GeometryBuffers, RenderError> {
        self.device.create_geometry(mesh)
    }

    pub fn release_mesh(&mut self, geometry: &GeometryBuffers) {
        self.device.destroy_geometry(geometry);
    }

    pub fn set_active_lights(&mut self, lights: Vec<Light>) {
        self.lights = lights;
    }

    pub fn active_lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn set_ambient_light(&mut self, ambient: AmbientLight) {
        self.ambient = ambient;
    }

    pub fn ambient_light(&self) -> AmbientLight {
        self.ambient
    }

    pub fn set_hud(&mut self, text: impl Into<String>) {
        self.hud.set_primary(text, HUD_ORIGIN.0, HUD_ORIGIN.1);
    }

    pub fn set_hud_at(&mut self, text: impl Into<String>, x: i32, y: i32) {
        self.hud.set_primary(text, x, y);
    }

    pub fn set_hud2(&mut self, text: impl Into<String>) {
        self.hud.set_secondary(text, HUD2_ORIGIN.0, HUD2_ORIGIN.1);
    }

    pub fn set_hud2_at(&mut self, text: impl Into<String>, x: i32, y: i32) {
        self.hud.set_secondary(text, x, y);
    }

    pub fn hud(&self) -> &HudOverlay {
        &self.hud
    }

    pub fn hud_mut(&mut self) -> &mut HudOverlay {
        &mut self.hud
    }

    pub fn toggles(&self) -> &RenderToggles {
        &self.toggles
    }

    pub fn toggles_mut(&mut self) -> &mut RenderToggles {
        &mut self.toggles
    }

    pub fn toggle_perspective(&mut self) {
        self.toggles.toggle_perspective();
    }

    pub fn toggle_shadow_debug(&mut self) {
        self.toggles.toggle_shadow_debug();
    }

    pub fn toggle_wireframe(&mut self) {
        self.toggles.toggle_wireframe();
    }

    pub fn set_box_size(&mut self, size: f32) {
        self.toggles.set_box_size(size);
    }

    /// Clear `viewport`'s region of the window to its clear values.
    pub fn clear_viewport(&mut self, viewport: &Viewport) {
        let device = &mut self.device;
        device.bind_framebuffer(None);
        device.set_viewport(viewport.pixel_rect());
        device.set_scissor(Some(viewport.scissor_pixel_rect()));
        device.clear(
            Some(*viewport.clear_color_buffer()),
            Some(viewport.clear_depth()),
        );
    }

    fn drain_releases(&mut self) {
        for texture in self.release.drain() {
            self.device.destroy_texture(texture);
        }
    }

    /// Draw `queue` into `viewport`.
    ///
    /// Renderables without a program, or whose data source cannot be
    /// resolved against their buffers, are logged and skipped. Before
    /// [`Self::initialize`] the call is ignored.
    pub fn process_render_queue(
        &mut self,
        queue: &RenderQueue<'_>,
        viewport: &Viewport,
        view: &RenderView,
    ) -> Result<FrameStats, RenderError> {
        if self.resources.is_none() {
            warn!("frame requested before the render context was initialized; ignoring");
            return Ok(FrameStats::default());
        }
        let span = info_span!("render_frame", renderables = queue.len());
        let _enter = span.enter();

        self.drain_releases();
        let toggles = self.toggles;
        let Some(resources) = self.resources.as_ref() else {
            return Ok(FrameStats::default());
        };
        let device: &mut dyn GpuDevice = &mut self.device;
        let mut stats = FrameStats::default();

        let light = resources
            .shadow
            .as_ref()
            .map(|s| s.light_space(view.camera_position));

        if let (Some(shadow), Some(light)) = (&resources.shadow, &light) {
            self.phase = FramePhase::ShadowPass;
            debug!(resolution = shadow.resolution(), "shadow pass");
            let depth_program = self.programs.get(ProgramKind::Depth).ok();
            stats.shadow_draws = shadow_pass(
                device,
                queue,
                shadow,
                light,
                depth_program,
                &self.lights,
                self.ambient,
                self.config.clear_color,
            );
            device.bind_framebuffer(None);
            device.set_viewport(viewport.pixel_rect());
            device.set_cull_face(CullFace::Back);
            device.set_scissor(Some(viewport.scissor_pixel_rect()));
            device.clear(
                Some(*viewport.clear_color_buffer()),
                Some(viewport.clear_depth()),
            );
        } else {
            device.bind_framebuffer(None);
            device.set_viewport(viewport.pixel_rect());
            device.set_scissor(Some(viewport.scissor_pixel_rect()));
        }

        self.phase = FramePhase::MainPass;
        let projection = if toggles.perspective() {
            view.projection
        } else {
            let (b, c) = (toggles.box_size(), toggles.clip_size());
            Mat4::orthographic_rh(-b, b, -b, b, -c, c)
        };
        debug!(
            perspective = toggles.perspective(),
            wireframe = toggles.wireframe(),
            "main pass"
        );
        let base = ShadingContext {
            view: view.view,
            projection,
            camera_position: view.camera_position,
            light_space: light.map_or(Mat4::IDENTITY, |l| l.matrix),
            lights: &self.lights,
            ambient: self.ambient,
            shadow_map: resources.shadow.as_ref().map(|s| ShadowBinding {
                unit: s.texture_unit(),
                texture: s.target().depth_texture,
            }),
            ..ShadingContext::new(PassKind::Main)
        };
        if toggles.wireframe() {
            device.set_polygon_mode(PolygonMode::Line);
        }
        for r in queue.iter() {
            let Some(program) = r.program() else {
                warn!(renderable = r.name(), "skipped: no shader program bound");
                stats.skipped += 1;
                continue;
            };
            let Some(source) = resolve_source(r) else {
                stats.skipped += 1;
                continue;
            };
            apply_states(r, device);
            let ctx = ShadingContext {
                model: r.world_transform(),
                material: r.material(),
                skin: r.skin(),
                patch_resolution: r.patch_resolution().unwrap_or(0),
                ..base
            };
            if let Some(binding) = base.shadow_map {
                device.bind_texture(binding.unit, Some(shadow_sampling(binding)));
            }
            submit(device, program, &ctx, r, source);
            stats.main_draws += 1;
        }
        if toggles.wireframe() {
            device.set_polygon_mode(PolygonMode::Fill);
        }

        if toggles.shadow_debug() {
            match &resources.shadow {
                Some(shadow) => {
                    self.phase = FramePhase::DebugPass;
                    let program = self.programs.get(ProgramKind::Framebuffer)?;
                    let side = viewport.actual_width() / self.config.debug_quad_divisor;
                    debug!(side, "shadow map debug pass");
                    debug_pass(device, program, shadow, &resources.debug_quad, side);
                    device.set_viewport(viewport.pixel_rect());
                    device.set_depth_test(DepthTest::default());
                    stats.debug_quad = true;
                }
                None => debug!("shadow debug requested but shadows are disabled"),
            }
        }

        for text in self.hud.iter() {
            device.draw_text(text);
            stats.hud_strings += 1;
        }
        self.phase = FramePhase::Presented;
        trace!(?stats, "frame drawn");
        Ok(stats)
    }

    /// Show everything drawn since the last swap.
    pub fn swap_buffers(&mut self) -> Result<(), RenderError> {
        if self.resources.is_none() {
            return Err(RenderError::NotInitialized);
        }
        self.device.present()?;
        self.phase = FramePhase::Idle;
        Ok(())
    }

    /// Release every GPU object the pipeline owns.
    pub fn shutdown(&mut self) {
        self.drain_releases();
        for program in self.programs.drain() {
            self.device.destroy_program(program);
        }
        if let Some(resources) = self.resources.take() {
            if let Some(shadow) = &resources.shadow {
                shadow.destroy(&mut self.device);
            }
            self.device.destroy_geometry(&resources.debug_quad);
        }
        self.phase = FramePhase::Idle;
        info!("render system shut down");
    }
}

/// Depth-only pass from the light. Returns the number of draws.
#[allow(clippy::too_many_arguments)]
fn shadow_pass(
    device: &mut dyn GpuDevice,
    queue: &RenderQueue<'_>,
    shadow: &ShadowMap,
    light: &LightSpace,
    depth_program: Option<ProgramHandle>,
    lights: &[Light],
    ambient: AmbientLight,
    clear_color: [f32; 4],
) -> u32 {
    let size = shadow.resolution() as i32;
    device.bind_framebuffer(Some(shadow.target().framebuffer));
    device.set_viewport(PixelRect::new(0, 0, size, size));
    device.set_cull_face(CullFace::Front);
    device.set_scissor(None);
    device.clear(Some(clear_color), Some(1.0));

    let mut draws = 0;
    for r in queue.iter() {
        let Some(own) = r.program() else {
            debug!(renderable = r.name(), "no shader program; not casting a shadow");
            continue;
        };
        if r.is_background() {
            trace!(renderable = r.name(), "background renderable casts no shadow");
            continue;
        }
        let Some(source) = resolve_source(r) else {
            continue;
        };
        let base = ShadingContext {
            model: r.world_transform(),
            light_space: light.matrix,
            skin: r.skin(),
            ..ShadingContext::new(PassKind::Shadow)
        };
        if r.data_source() == DataSource::InstancedPatch {
            // patches are expanded inside their own program, so it renders
            // from the light's point of view instead of the depth program
            apply_states(r, device);
            let ctx = ShadingContext {
                view: light.view,
                projection: light.projection,
                lights,
                ambient,
                patch_resolution: r.patch_resolution().unwrap_or(0),
                ..base
            };
            submit(device, own, &ctx, r, source);
        } else {
            let Some(program) = r.depth_program().or(depth_program) else {
                warn!(renderable = r.name(), "no depth program available");
                continue;
            };
            submit(device, program, &base, r, source);
        }
        draws += 1;
    }
    draws
}

fn debug_pass(
    device: &mut dyn GpuDevice,
    program: ProgramHandle,
    shadow: &ShadowMap,
    quad: &GeometryBuffers,
    side: i32,
) {
    let binding = ShadowBinding {
        unit: 0,
        texture: shadow.target().depth_texture,
    };
    device.bind_framebuffer(None);
    device.set_viewport(PixelRect::new(0, 0, side, side));
    device.set_depth_test(DepthTest {
        enabled: false,
        ..DepthTest::default()
    });
    device.bind_program(program);
    device.bind_texture(0, Some(shadow_sampling(binding)));
    let ctx = ShadingContext {
        shadow_map: Some(binding),
        ..ShadingContext::new(PassKind::Debug)
    };
    device.upload_context(&ctx);
    device.draw(&DrawCall {
        primitive: Primitive::TriangleStrip,
        geometry: quad,
        source: DrawSource::Arrays { vertex_count: 4 },
    });
    device.unbind_program();
}

fn shadow_sampling(binding: ShadowBinding) -> TextureBinding {
    TextureBinding {
        target: TextureTarget::TwoDimensional,
        texture: binding.texture,
        sampler: SamplerDesc {
            min_filter: MinFilter::NearestNoMipmaps,
            mag_filter: MagFilter::Nearest,
            wrap: WrapMode::ClampToBorder,
        },
    }
}

/// Element counts for `r`'s data source, or `None` when its buffers cannot
/// serve it.
fn resolve_source(r: &dyn Renderable) -> Option<DrawSource> {
    let geometry = r.geometry();
    match r.data_source() {
        DataSource::Vertices => Some(DrawSource::Arrays {
            vertex_count: geometry.vertex_count,
        }),
        DataSource::Indexed if geometry.indices.is_some() => Some(DrawSource::Indexed {
            index_count: geometry.index_count,
        }),
        DataSource::Indexed => {
            warn!(renderable = r.name(), "indexed draw without an index buffer; skipped");
            None
        }
        DataSource::InstancedPatch => match r.patch_resolution() {
            Some(q) if q > 0 => Some(DrawSource::Patches {
                vertices_per_patch: PATCH_VERTICES,
                instance_count: q * q,
            }),
            _ => {
                warn!(renderable = r.name(), "instanced patch without a resolution; skipped");
                None
            }
        },
    }
}

fn apply_states(r: &dyn Renderable, device: &mut dyn GpuDevice) {
    for kind in RenderStateKind::ALL {
        if let Some(state) = r.render_state(kind) {
            match state.try_borrow_mut() {
                Ok(mut state) => state.apply(device),
                Err(_) => warn!(renderable = r.name(), ?kind, "render state busy; not applied"),
            }
        }
    }
}

fn submit(
    device: &mut dyn GpuDevice,
    program: ProgramHandle,
    ctx: &ShadingContext<'_>,
    r: &dyn Renderable,
    source: DrawSource,
) {
    trace!(renderable = r.name(), pass = ?ctx.pass, program = ?program.kind, "draw");
    device.bind_program(program);
    device.upload_context(ctx);
    device.draw(&DrawCall {
        primitive: r.primitive(),
        geometry: r.geometry(),
        source,
    });
    device.unbind_program();
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::ConfigError;
    use crate::recording::{GpuCommand, RecordingDevice};
    use crate::renderable::RenderObject;
    use crate::states::Texture;

    fn system() -> RenderSystem<RecordingDevice> {
        let mut config = RenderConfig::default();
        config.shadows.resolution = 1024;
        let mut rs = RenderSystem::new(RecordingDevice::new(), config).unwrap();
        rs.initialize().unwrap();
        rs.create_gpu_shader_program(ProgramKind::Rendering)
            .unwrap();
        rs.device_mut().take_commands();
        rs
    }

    fn cube(rs: &mut RenderSystem<RecordingDevice>, name: &str) -> RenderObject {
        let geometry = rs.upload_mesh(&MeshData::cube(0.5)).unwrap();
        let program = rs.gpu_shader_program(ProgramKind::Rendering).unwrap();
        RenderObject::new(name, geometry).with_program(program)
    }

    fn draws_in(rs: &RenderSystem<RecordingDevice>, pass: PassKind) -> Vec<crate::device::BufferHandle> {
        rs.device()
            .draw_calls()
            .into_iter()
            .filter(|d| d.pass == Some(pass))
            .map(|d| d.positions)
            .collect()
    }

    #[test]
    fn frame_before_initialize_is_ignored() {
        let mut rs = RenderSystem::new(RecordingDevice::new(), RenderConfig::default()).unwrap();
        let queue = rs.create_render_queue();
        let stats = rs
            .process_render_queue(&queue, &Viewport::new(800, 600), &RenderView::default())
            .unwrap();
        assert_eq!(stats, FrameStats::default());
        assert!(rs.device().commands().is_empty());
        assert!(matches!(rs.swap_buffers(), Err(RenderError::NotInitialized)));
        assert!(matches!(
            rs.create_render_state(RenderStateKind::Texture),
            Err(RenderError::NotInitialized)
        ));
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let mut unordered = RenderConfig::default();
        unordered.ortho.min_box_size = 5.0;
        unordered.ortho.max_box_size = 2.0;
        let mut zero_divisor = RenderConfig::default();
        zero_divisor.debug_quad_divisor = 0;
        for config in [unordered, zero_divisor] {
            assert!(matches!(
                RenderSystem::new(RecordingDevice::new(), config),
                Err(RenderError::Config(ConfigError::Invalid(_)))
            ));
        }
    }

    #[test]
    fn initialize_builds_shared_resources() {
        let mut rs = RenderSystem::new(RecordingDevice::new(), RenderConfig::default()).unwrap();
        let gate = rs.context_gate();
        assert!(!gate.is_ready());
        rs.initialize().unwrap();
        assert!(gate.is_ready());
        assert!(rs.gpu_shader_program(ProgramKind::Depth).is_ok());
        assert!(rs.gpu_shader_program(ProgramKind::Framebuffer).is_ok());
        assert!(
            rs.device()
                .commands()
                .iter()
                .any(|c| matches!(c, GpuCommand::CreateDepthTarget(t) if t.resolution == 8192))
        );
        rs.initialize().unwrap();
        assert_eq!(
            rs.device()
                .commands()
                .iter()
                .filter(|c| matches!(c, GpuCommand::CreateDepthTarget(_)))
                .count(),
            1
        );
    }

    #[test]
    fn duplicate_program_is_rejected() {
        let mut rs = system();
        assert!(matches!(
            rs.create_gpu_shader_program(ProgramKind::Rendering),
            Err(RenderError::ProgramExists(ProgramKind::Rendering))
        ));
        assert!(matches!(
            rs.gpu_shader_program(ProgramKind::SkyBox),
            Err(RenderError::ProgramMissing(ProgramKind::SkyBox))
        ));
    }

    #[test]
    fn missing_program_skips_only_that_renderable() {
        let mut rs = system();
        let a = cube(&mut rs, "a");
        let mut b = cube(&mut rs, "b");
        b.set_program(None);
        let c = cube(&mut rs, "c");

        let mut queue = rs.create_render_queue();
        queue.add(&a);
        queue.add(&b);
        queue.add(&c);
        let stats = rs
            .process_render_queue(&queue, &Viewport::new(800, 600), &RenderView::default())
            .unwrap();

        assert_eq!(stats.main_draws, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(
            draws_in(&rs, PassKind::Main),
            vec![a.geometry().positions, c.geometry().positions]
        );
    }

    #[test]
    fn background_casts_no_shadow() {
        let mut rs = system();
        let ground = cube(&mut rs, "ground");
        let mut sky = cube(&mut rs, "sky");
        sky.set_background(true);

        let mut queue = rs.create_render_queue();
        queue.add(&sky);
        queue.add(&ground);
        let stats = rs
            .process_render_queue(&queue, &Viewport::new(800, 600), &RenderView::default())
            .unwrap();

        assert_eq!(stats.shadow_draws, 1);
        assert_eq!(draws_in(&rs, PassKind::Shadow), vec![ground.geometry().positions]);
        assert_eq!(
            draws_in(&rs, PassKind::Main),
            vec![sky.geometry().positions, ground.geometry().positions]
        );
    }

    #[test]
    fn shadow_pass_uses_depth_program_except_for_patches() {
        let mut rs = system();
        let depth = rs.gpu_shader_program(ProgramKind::Depth).unwrap();
        let tess = rs
            .create_gpu_shader_program(ProgramKind::Tessellation)
            .unwrap();
        let mesh = cube(&mut rs, "mesh");
        let geometry = rs.upload_mesh(&MeshData::plane(1.0)).unwrap();
        let mut terrain = RenderObject::new("terrain", geometry)
            .with_program(tess)
            .with_data_source(DataSource::InstancedPatch);
        terrain.set_patch_resolution(Some(8));

        let mut queue = rs.create_render_queue();
        queue.add(&mesh);
        queue.add(&terrain);
        rs.process_render_queue(&queue, &Viewport::new(800, 600), &RenderView::default())
            .unwrap();

        let draws = rs.device().draw_calls();
        let shadow: Vec<_> = draws
            .iter()
            .filter(|d| d.pass == Some(PassKind::Shadow))
            .collect();
        assert_eq!(shadow.len(), 2);
        assert_eq!(shadow[0].program, Some(depth));
        assert_eq!(shadow[1].program, Some(tess));
        assert_eq!(
            shadow[1].source,
            DrawSource::Patches {
                vertices_per_patch: 4,
                instance_count: 64
            }
        );
    }

    #[test]
    fn patch_resolution_is_read_every_frame() {
        let mut rs = system();
        let tess = rs
            .create_gpu_shader_program(ProgramKind::Tessellation)
            .unwrap();
        let geometry = rs.upload_mesh(&MeshData::plane(1.0)).unwrap();
        let mut terrain = RenderObject::new("terrain", geometry)
            .with_program(tess)
            .with_data_source(DataSource::InstancedPatch);
        let viewport = Viewport::new(800, 600);

        for (resolution, expected) in [(2, 4), (5, 25)] {
            terrain.set_patch_resolution(Some(resolution));
            let mut queue = rs.create_render_queue();
            queue.add(&terrain);
            rs.device_mut().take_commands();
            rs.process_render_queue(&queue, &viewport, &RenderView::default())
                .unwrap();
            let main = rs
                .device()
                .draw_calls()
                .into_iter()
                .find(|d| d.pass == Some(PassKind::Main))
                .map(|d| d.source);
            assert_eq!(
                main,
                Some(DrawSource::Patches {
                    vertices_per_patch: 4,
                    instance_count: expected
                })
            );
        }
    }

    #[test]
    fn unresolvable_data_source_is_skipped() {
        let mut rs = system();
        let geometry = rs.upload_mesh(&MeshData::screen_quad()).unwrap();
        let program = rs.gpu_shader_program(ProgramKind::Rendering).unwrap();
        let broken = RenderObject::new("broken", geometry)
            .with_program(program)
            .with_data_source(DataSource::Indexed);
        let good = cube(&mut rs, "good");

        let mut queue = rs.create_render_queue();
        queue.add(&broken);
        queue.add(&good);
        let stats = rs
            .process_render_queue(&queue, &Viewport::new(800, 600), &RenderView::default())
            .unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.main_draws, 1);
    }

    #[test]
    fn empty_queue_still_clears_both_passes() {
        let mut rs = system();
        let queue = rs.create_render_queue();
        let mut viewport = Viewport::new(800, 600);
        viewport.set_clear_color(0.0, 0.0, 1.0, 1.0).unwrap();
        rs.process_render_queue(&queue, &viewport, &RenderView::default())
            .unwrap();

        let commands = rs.device().commands();
        let clears: Vec<_> = commands
            .iter()
            .filter_map(|c| match c {
                GpuCommand::Clear { color, depth } => Some((*color, *depth)),
                _ => None,
            })
            .collect();
        assert_eq!(
            clears,
            vec![
                (Some([0.2, 0.3, 0.3, 1.0]), Some(1.0)),
                (Some([0.0, 0.0, 1.0, 1.0]), Some(1.0)),
            ]
        );
        assert!(rs.device().draw_calls().is_empty());
    }

    #[test]
    fn shadow_pass_setup_and_restore() {
        let mut rs = system();
        let queue = rs.create_render_queue();
        let mut viewport = Viewport::new(800, 600);
        viewport.set_dimensions(0.0, 0.5, 0.5, 1.0).unwrap();
        rs.process_render_queue(&queue, &viewport, &RenderView::default())
            .unwrap();

        let commands = rs.device().commands();
        assert!(matches!(commands[0], GpuCommand::BindFramebuffer(Some(_))));
        assert_eq!(
            commands[1],
            GpuCommand::SetViewport(PixelRect::new(0, 0, 1024, 1024))
        );
        assert_eq!(commands[2], GpuCommand::SetCullFace(CullFace::Front));
        assert_eq!(commands[3], GpuCommand::SetScissor(None));
        assert_eq!(commands[5], GpuCommand::BindFramebuffer(None));
        assert_eq!(
            commands[6],
            GpuCommand::SetViewport(PixelRect::new(400, 0, 400, 600))
        );
        assert_eq!(commands[7], GpuCommand::SetCullFace(CullFace::Back));
        assert_eq!(
            commands[8],
            GpuCommand::SetScissor(Some(PixelRect::new(400, 0, 400, 600)))
        );
    }

    #[test]
    fn main_pass_binds_shadow_map_and_lights() {
        let mut rs = system();
        rs.set_active_lights(vec![Light::point(Vec3::Y), Light::default()]);
        let a = cube(&mut rs, "a");
        let mut queue = rs.create_render_queue();
        queue.add(&a);
        rs.process_render_queue(&queue, &Viewport::new(800, 600), &RenderView::default())
            .unwrap();

        let main_ctx = rs
            .device()
            .commands()
            .iter()
            .find_map(|c| match c {
                GpuCommand::UploadContext(ctx) if ctx.pass == PassKind::Main => Some(ctx.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(main_ctx.light_count, 2);
        assert_eq!(main_ctx.shadow_map.map(|s| s.unit), Some(5));
        assert_ne!(main_ctx.light_space, Mat4::IDENTITY);
        assert!(rs.device().commands().iter().any(|c| matches!(
            c,
            GpuCommand::BindTexture {
                unit: 5,
                target: TextureTarget::TwoDimensional,
                ..
            }
        )));
    }

    #[test]
    fn orthographic_toggle_uses_box_size() {
        let mut rs = system();
        rs.toggle_perspective();
        rs.set_box_size(4.0);
        let a = cube(&mut rs, "a");
        let mut queue = rs.create_render_queue();
        queue.add(&a);
        let view = RenderView::default();
        rs.process_render_queue(&queue, &Viewport::new(800, 600), &view)
            .unwrap();

        let expected = Mat4::orthographic_rh(-4.0, 4.0, -4.0, 4.0, -40.0, 40.0);
        let projection = rs
            .device()
            .commands()
            .iter()
            .find_map(|c| match c {
                GpuCommand::UploadContext(ctx) if ctx.pass == PassKind::Main => {
                    Some(ctx.projection)
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(projection, expected);
        assert_ne!(projection, view.projection);
    }

    #[test]
    fn wireframe_wraps_main_pass() {
        let mut rs = system();
        rs.toggle_wireframe();
        let queue = rs.create_render_queue();
        rs.process_render_queue(&queue, &Viewport::new(800, 600), &RenderView::default())
            .unwrap();
        let modes: Vec<_> = rs
            .device()
            .commands()
            .iter()
            .filter_map(|c| match c {
                GpuCommand::SetPolygonMode(m) => Some(*m),
                _ => None,
            })
            .collect();
        assert_eq!(modes, vec![PolygonMode::Line, PolygonMode::Fill]);
    }

    #[test]
    fn debug_quad_draws_shadow_map() {
        let mut rs = system();
        rs.toggle_shadow_debug();
        let queue = rs.create_render_queue();
        let stats = rs
            .process_render_queue(&queue, &Viewport::new(800, 600), &RenderView::default())
            .unwrap();
        assert!(stats.debug_quad);
        assert_eq!(rs.phase(), FramePhase::Presented);

        let framebuffer = rs.gpu_shader_program(ProgramKind::Framebuffer).unwrap();
        let commands = rs.device().commands();
        assert!(commands.contains(&GpuCommand::SetViewport(PixelRect::new(0, 0, 200, 200))));
        let draws = rs.device().draw_calls();
        let quad = draws.last().unwrap();
        assert_eq!(quad.program, Some(framebuffer));
        assert_eq!(quad.primitive, Primitive::TriangleStrip);
        assert_eq!(quad.source, DrawSource::Arrays { vertex_count: 4 });
        assert_eq!(
            commands.iter().rev().find_map(|c| match c {
                GpuCommand::SetDepthTest(t) => Some(*t),
                _ => None,
            }),
            Some(DepthTest::default())
        );
    }

    #[test]
    fn shadows_disabled_skips_shadow_pass() {
        let mut config = RenderConfig::default();
        config.shadows.enabled = false;
        let mut rs = RenderSystem::new(RecordingDevice::new(), config).unwrap();
        rs.initialize().unwrap();
        rs.create_gpu_shader_program(ProgramKind::Rendering)
            .unwrap();
        rs.toggle_shadow_debug();
        let a = cube(&mut rs, "a");
        rs.device_mut().take_commands();

        let mut queue = rs.create_render_queue();
        queue.add(&a);
        let stats = rs
            .process_render_queue(&queue, &Viewport::new(800, 600), &RenderView::default())
            .unwrap();
        assert_eq!(stats.shadow_draws, 0);
        assert_eq!(stats.main_draws, 1);
        assert!(!stats.debug_quad);
        assert!(
            !rs.device()
                .commands()
                .iter()
                .any(|c| matches!(c, GpuCommand::Clear { .. }))
        );
    }

    #[test]
    fn render_states_are_applied_in_main_pass() {
        let mut rs = system();
        let mut a = cube(&mut rs, "a");
        let z = rs.create_render_state(RenderStateKind::ZBuffer).unwrap();
        z.borrow_mut()
            .as_zbuffer_mut()
            .unwrap()
            .set_test_enabled(false);
        a.set_render_state(z);
        let disabled = rs.create_render_state(RenderStateKind::FrontFace).unwrap();
        disabled.borrow_mut().set_enabled(false);
        a.set_render_state(disabled);

        let mut queue = rs.create_render_queue();
        queue.add(&a);
        rs.process_render_queue(&queue, &Viewport::new(800, 600), &RenderView::default())
            .unwrap();
        let commands = rs.device().commands();
        assert!(commands.iter().any(|c| matches!(
            c,
            GpuCommand::SetDepthTest(DepthTest { enabled: false, .. })
        )));
        assert!(
            !commands
                .iter()
                .any(|c| matches!(c, GpuCommand::SetFrontFace(_)))
        );
    }

    #[test]
    fn disposed_texture_released_next_frame() {
        let mut rs = system();
        let state = rs.create_render_state(RenderStateKind::Texture).unwrap();
        state
            .borrow_mut()
            .as_texture_mut()
            .unwrap()
            .set_texture(Arc::new(Texture::solid("t", 2, 2, [1, 2, 3, 4]).unwrap()))
            .unwrap();
        let mut a = cube(&mut rs, "a");
        a.set_render_state(state);

        let viewport = Viewport::new(800, 600);
        {
            let mut queue = rs.create_render_queue();
            queue.add(&a);
            rs.process_render_queue(&queue, &viewport, &RenderView::default())
                .unwrap();
        }
        drop(a);
        rs.device_mut().take_commands();

        let queue = rs.create_render_queue();
        rs.process_render_queue(&queue, &viewport, &RenderView::default())
            .unwrap();
        assert!(matches!(
            rs.device().commands()[0],
            GpuCommand::DestroyTexture(_)
        ));
    }

    #[test]
    fn hud_is_drawn_and_swap_presents() {
        let mut rs = system();
        rs.set_hud("Score: 3");
        rs.set_hud2_at("Lives: 1", 10, 40);
        let queue = rs.create_render_queue();
        let stats = rs
            .process_render_queue(&queue, &Viewport::new(800, 600), &RenderView::default())
            .unwrap();
        assert_eq!(stats.hud_strings, 2);
        rs.swap_buffers().unwrap();
        assert_eq!(rs.phase(), FramePhase::Idle);

        let commands = rs.device().commands();
        let n = commands.len();
        assert_eq!(commands[n - 1], GpuCommand::Present);
        assert!(matches!(&commands[n - 2], GpuCommand::DrawText(t) if t.text == "Lives: 1"));
        assert!(matches!(&commands[n - 3], GpuCommand::DrawText(t) if t.x == 15 && t.y == 15));
    }

    #[test]
    fn clear_viewport_uses_viewport_values() {
        let mut rs = system();
        let mut viewport = Viewport::new(100, 100);
        viewport.set_clear_depth(0.5).unwrap();
        rs.clear_viewport(&viewport);
        assert_eq!(
            rs.device().commands().last(),
            Some(&GpuCommand::Clear {
                color: Some([0.0, 0.0, 0.0, 1.0]),
                depth: Some(0.5)
            })
        );
    }

    #[test]
    fn shutdown_releases_everything() {
        let mut rs = system();
        rs.shutdown();
        let commands = rs.device().commands();
        assert_eq!(
            commands
                .iter()
                .filter(|c| matches!(c, GpuCommand::DestroyProgram(_)))
                .count(),
            3
        );
        assert!(
            commands
                .iter()
                .any(|c| matches!(c, GpuCommand::DestroyDepthTarget(_)))
        );
        assert!(!rs.is_initialized());
    }
}
