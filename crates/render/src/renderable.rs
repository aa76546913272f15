//! What the pipeline needs to know about a drawable, and a ready-made
//! implementation of it.

use std::collections::BTreeMap;
use std::rc::Rc;

use glam::Mat4;
use penumbra_common::{Color, Transform};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geometry::{GeometryBuffers, SkinMatrices};
use crate::program::ProgramHandle;
use crate::states::{RenderStateKind, SharedRenderState};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Primitive {
    Points,
    Lines,
    #[default]
    Triangles,
    TriangleStrip,
}

/// How a renderable's elements are fed to the draw call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataSource {
    /// One element per position.
    #[default]
    Vertices,
    /// Elements come from the index buffer.
    Indexed,
    /// `patch_resolution²` instances of a 4-vertex patch, expanded by the
    /// renderable's own program.
    InstancedPatch,
}

/// Surface reflectance handed to the shaders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    pub ambient: Color,
    pub diffuse: Color,
    pub specular: Color,
    pub emissive: Color,
    pub shininess: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_owned(),
            ambient: Color::rgb(0.2, 0.2, 0.2),
            diffuse: Color::rgb(0.8, 0.8, 0.8),
            specular: Color::BLACK,
            emissive: Color::BLACK,
            shininess: 1.0,
        }
    }
}

/// A drawable unit, read by the pipeline for the duration of one frame.
pub trait Renderable {
    /// Used in diagnostics only.
    fn name(&self) -> &str {
        "<unnamed>"
    }
    fn primitive(&self) -> Primitive;
    fn data_source(&self) -> DataSource;
    fn geometry(&self) -> &GeometryBuffers;
    fn skin(&self) -> Option<&SkinMatrices> {
        None
    }
    fn material(&self) -> Option<&Material> {
        None
    }
    fn program(&self) -> Option<ProgramHandle>;
    /// Replaces the shared depth program in the shadow pass when set.
    fn depth_program(&self) -> Option<ProgramHandle> {
        None
    }
    fn render_state(&self, kind: RenderStateKind) -> Option<&SharedRenderState>;
    fn world_transform(&self) -> Mat4;
    /// Sky and other backdrop geometry that never casts shadows.
    fn is_background(&self) -> bool {
        false
    }
    /// Patch grid resolution for [`DataSource::InstancedPatch`]. Queried on
    /// every draw.
    fn patch_resolution(&self) -> Option<u32> {
        None
    }
}

/// General-purpose [`Renderable`] owned by the scene layer.
///
/// Holds at most one render state per kind. Dropping the object disposes
/// every state nobody else holds.
#[derive(Debug, Default)]
pub struct RenderObject {
    name: String,
    primitive: Primitive,
    data_source: DataSource,
    geometry: GeometryBuffers,
    skin: Option<SkinMatrices>,
    material: Option<Material>,
    program: Option<ProgramHandle>,
    depth_program: Option<ProgramHandle>,
    states: BTreeMap<RenderStateKind, SharedRenderState>,
    transform: Transform,
    background: bool,
    patch_resolution: Option<u32>,
}

impl RenderObject {
    pub fn new(name: impl Into<String>, geometry: GeometryBuffers) -> Self {
        let data_source = if geometry.indices.is_some() {
            DataSource::Indexed
        } else {
            DataSource::Vertices
        };
        Self {
            name: name.into(),
            primitive: Primitive::default(),
            data_source,
            geometry,
            skin: None,
            material: None,
            program: None,
            depth_program: None,
            states: BTreeMap::new(),
            transform: Transform::default(),
            background: false,
            patch_resolution: None,
        }
    }

    pub fn with_program(mut self, program: ProgramHandle) -> Self {
        self.program = Some(program);
        self
    }

    pub fn with_primitive(mut self, primitive: Primitive) -> Self {
        self.primitive = primitive;
        self
    }

    pub fn with_data_source(mut self, data_source: DataSource) -> Self {
        self.data_source = data_source;
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = Some(material);
        self
    }

    pub fn set_program(&mut self, program: Option<ProgramHandle>) {
        self.program = program;
    }

    pub fn set_depth_program(&mut self, program: Option<ProgramHandle>) {
        self.depth_program = program;
    }

    pub fn set_data_source(&mut self, data_source: DataSource) {
        self.data_source = data_source;
    }

    pub fn set_primitive(&mut self, primitive: Primitive) {
        self.primitive = primitive;
    }

    pub fn set_material(&mut self, material: Option<Material>) {
        self.material = material;
    }

    /// Pose for this frame. Callers hand over a fresh copy rather than
    /// mutating one the pipeline may still be reading.
    pub fn set_skin(&mut self, skin: Option<SkinMatrices>) {
        self.skin = skin;
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn transform_mut(&mut self) -> &mut Transform {
        &mut self.transform
    }

    pub fn set_background(&mut self, background: bool) {
        self.background = background;
    }

    pub fn set_patch_resolution(&mut self, resolution: Option<u32>) {
        self.patch_resolution = resolution;
    }

    /// Attach `state`, replacing any state of the same kind. The displaced
    /// state is disposed unless another holder still references it.
    pub fn set_render_state(&mut self, state: SharedRenderState) {
        let kind = state.borrow().kind();
        if let Some(old) = self.states.insert(kind, state) {
            release(&self.name, kind, old);
        }
    }

    /// Detach the state of `kind` without disposing it.
    pub fn remove_render_state(&mut self, kind: RenderStateKind) -> Option<SharedRenderState> {
        self.states.remove(&kind)
    }

    pub fn render_states(&self) -> impl Iterator<Item = &SharedRenderState> {
        self.states.values()
    }
}

fn release(owner: &str, kind: RenderStateKind, state: SharedRenderState) {
    if Rc::strong_count(&state) == 1 {
        debug!(owner, ?kind, "disposing sole-owned render state");
        state.borrow_mut().dispose();
    }
}

impl Drop for RenderObject {
    fn drop(&mut self) {
        let states = std::mem::take(&mut self.states);
        for (kind, state) in states {
            release(&self.name, kind, state);
        }
    }
}

impl Renderable for RenderObject {
    fn name(&self) -> &str {
        &self.name
    }

    fn primitive(&self) -> Primitive {
        self.primitive
    }

    fn data_source(&self) -> DataSource {
        self.data_source
    }

    fn geometry(&self) -> &GeometryBuffers {
        &self.geometry
    }

    fn skin(&self) -> Option<&SkinMatrices> {
        self.skin.as_ref()
    }

    fn material(&self) -> Option<&Material> {
        self.material.as_ref()
    }

    fn program(&self) -> Option<ProgramHandle> {
        self.program
    }

    fn depth_program(&self) -> Option<ProgramHandle> {
        self.depth_program
    }

    fn render_state(&self, kind: RenderStateKind) -> Option<&SharedRenderState> {
        self.states.get(&kind)
    }

    fn world_transform(&self) -> Mat4 {
        self.transform.to_matrix()
    }

    fn is_background(&self) -> bool {
        self.background
    }

    fn patch_resolution(&self) -> Option<u32> {
        self.patch_resolution
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::device::{BufferHandle, GpuDevice};
    use crate::recording::RecordingDevice;
    use crate::states::{
        CullingState, ReleaseQueue, RenderState, Texture, TextureState, ZBufferState,
    };

    fn textured(release: &ReleaseQueue, device: &mut RecordingDevice) -> SharedRenderState {
        let mut tex = TextureState::new(device.capabilities().texture_unit_count, release.clone());
        tex.set_texture(Arc::new(Texture::solid("t", 1, 1, [0, 0, 0, 255]).unwrap()))
            .unwrap();
        let mut state = RenderState::from(tex);
        state.apply(device);
        state.into_shared()
    }

    #[test]
    fn data_source_follows_index_buffer() {
        let plain = RenderObject::new("plain", GeometryBuffers::default());
        assert_eq!(plain.data_source(), DataSource::Vertices);
        let indexed = RenderObject::new(
            "indexed",
            GeometryBuffers {
                indices: Some(BufferHandle(2)),
                ..GeometryBuffers::default()
            },
        );
        assert_eq!(indexed.data_source(), DataSource::Indexed);
    }

    #[test]
    fn second_texture_state_replaces_and_disposes_first() {
        let mut device = RecordingDevice::new();
        let release = ReleaseQueue::new();
        let mut obj = RenderObject::new("crate", GeometryBuffers::default());

        let first = textured(&release, &mut device);
        let probe = Rc::downgrade(&first);
        obj.set_render_state(first);
        obj.set_render_state(textured(&release, &mut device));

        assert_eq!(obj.render_states().count(), 1);
        assert!(probe.upgrade().is_none());
        assert_eq!(release.len(), 1);
        let current = obj.render_state(RenderStateKind::Texture).unwrap();
        assert!(!current.borrow().is_disposed());
    }

    #[test]
    fn shared_state_survives_replacement_on_one_holder() {
        let shared = RenderState::from(ZBufferState::new()).into_shared();
        let mut a = RenderObject::new("a", GeometryBuffers::default());
        let mut b = RenderObject::new("b", GeometryBuffers::default());
        a.set_render_state(Rc::clone(&shared));
        b.set_render_state(Rc::clone(&shared));
        drop(shared);

        a.set_render_state(RenderState::from(ZBufferState::new()).into_shared());
        let held = b.render_state(RenderStateKind::ZBuffer).unwrap();
        assert!(!held.borrow().is_disposed());
    }

    #[test]
    fn drop_keeps_states_held_elsewhere() {
        let shared = RenderState::from(CullingState::new()).into_shared();
        let sole = RenderState::from(ZBufferState::new()).into_shared();
        let sole_probe = Rc::clone(&sole);
        let mut obj = RenderObject::new("x", GeometryBuffers::default());
        obj.set_render_state(Rc::clone(&shared));
        obj.set_render_state(sole);

        drop(obj);
        assert!(!shared.borrow().is_disposed());
        assert!(!sole_probe.borrow().is_disposed());
    }

    #[test]
    fn drop_disposes_unshared_texture_state() {
        let mut device = RecordingDevice::new();
        let release = ReleaseQueue::new();
        let mut obj = RenderObject::new("x", GeometryBuffers::default());
        obj.set_render_state(textured(&release, &mut device));
        drop(obj);
        assert_eq!(release.len(), 1);
    }

    #[test]
    fn removed_state_is_not_disposed() {
        let mut obj = RenderObject::new("x", GeometryBuffers::default());
        obj.set_render_state(RenderState::from(ZBufferState::new()).into_shared());
        let state = obj.remove_render_state(RenderStateKind::ZBuffer).unwrap();
        assert!(!state.borrow().is_disposed());
        assert!(obj.render_state(RenderStateKind::ZBuffer).is_none());
    }
}
