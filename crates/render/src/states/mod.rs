//! Per-renderable GPU configuration, one state per [`RenderStateKind`].

mod culling;
mod front_face;
mod texture;
mod zbuffer;

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::device::{GpuDevice, TextureHandle};

pub use culling::{Culling, CullingState};
pub use front_face::{FrontFaceState, VertexWinding};
pub use texture::{
    CUBE_FACES, MagFilter, MinFilter, Texture, TextureState, TextureTarget, WrapMode,
};
pub use zbuffer::{DepthFunction, ZBufferState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RenderStateKind {
    ZBuffer,
    Texture,
    FrontFace,
    Culling,
}

impl RenderStateKind {
    /// Application order used by the pipeline.
    pub const ALL: [RenderStateKind; 4] = [
        RenderStateKind::ZBuffer,
        RenderStateKind::Texture,
        RenderStateKind::FrontFace,
        RenderStateKind::Culling,
    ];
}

/// A render state that several renderables may hold at once.
pub type SharedRenderState = Rc<RefCell<RenderState>>;

/// GPU texture objects waiting to be deleted on the render thread.
///
/// States are disposed wherever their last owner drops, which need not be
/// a place with device access, so deletion is deferred to the pipeline.
#[derive(Debug, Clone, Default)]
pub struct ReleaseQueue(Rc<RefCell<Vec<TextureHandle>>>);

impl ReleaseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, texture: TextureHandle) {
        self.0.borrow_mut().push(texture);
    }

    pub fn drain(&self) -> Vec<TextureHandle> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum StateVariant {
    ZBuffer(ZBufferState),
    Texture(TextureState),
    FrontFace(FrontFaceState),
    Culling(CullingState),
}

impl StateVariant {
    pub fn kind(&self) -> RenderStateKind {
        match self {
            Self::ZBuffer(_) => RenderStateKind::ZBuffer,
            Self::Texture(_) => RenderStateKind::Texture,
            Self::FrontFace(_) => RenderStateKind::FrontFace,
            Self::Culling(_) => RenderStateKind::Culling,
        }
    }
}

/// One togglable aspect of GPU configuration.
///
/// A disabled state is skipped by [`RenderState::apply`]. Disposal releases
/// owned GPU objects, disables the state and cannot be undone; repeated
/// disposal is harmless. Cloning yields an independent state that owns no
/// GPU objects yet.
#[derive(Debug, Clone)]
pub struct RenderState {
    enabled: bool,
    disposed: bool,
    variant: StateVariant,
}

impl RenderState {
    pub fn new(variant: StateVariant) -> Self {
        Self {
            enabled: true,
            disposed: false,
            variant,
        }
    }

    pub fn into_shared(self) -> SharedRenderState {
        Rc::new(RefCell::new(self))
    }

    pub fn kind(&self) -> RenderStateKind {
        self.variant.kind()
    }

    pub fn variant(&self) -> &StateVariant {
        &self.variant
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Ignored once the state has been disposed.
    pub fn set_enabled(&mut self, enabled: bool) {
        if !self.disposed {
            self.enabled = enabled;
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn apply(&mut self, device: &mut dyn GpuDevice) {
        if self.disposed {
            trace!(kind = ?self.kind(), "skipping disposed render state");
            return;
        }
        if !self.enabled {
            return;
        }
        match &mut self.variant {
            StateVariant::ZBuffer(s) => s.apply(device),
            StateVariant::Texture(s) => s.apply(device),
            StateVariant::FrontFace(s) => s.apply(device),
            StateVariant::Culling(s) => s.apply(device),
        }
    }

    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if let StateVariant::Texture(s) = &mut self.variant {
            s.dispose();
        }
        self.enabled = false;
        self.disposed = true;
    }

    pub fn as_zbuffer_mut(&mut self) -> Option<&mut ZBufferState> {
        match &mut self.variant {
            StateVariant::ZBuffer(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_texture(&self) -> Option<&TextureState> {
        match &self.variant {
            StateVariant::Texture(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_texture_mut(&mut self) -> Option<&mut TextureState> {
        match &mut self.variant {
            StateVariant::Texture(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_front_face_mut(&mut self) -> Option<&mut FrontFaceState> {
        match &mut self.variant {
            StateVariant::FrontFace(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_culling_mut(&mut self) -> Option<&mut CullingState> {
        match &mut self.variant {
            StateVariant::Culling(s) => Some(s),
            _ => None,
        }
    }
}

impl From<ZBufferState> for RenderState {
    fn from(state: ZBufferState) -> Self {
        Self::new(StateVariant::ZBuffer(state))
    }
}

impl From<TextureState> for RenderState {
    fn from(state: TextureState) -> Self {
        Self::new(StateVariant::Texture(state))
    }
}

impl From<FrontFaceState> for RenderState {
    fn from(state: FrontFaceState) -> Self {
        Self::new(StateVariant::FrontFace(state))
    }
}

impl From<CullingState> for RenderState {
    fn from(state: CullingState) -> Self {
        Self::new(StateVariant::Culling(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DepthTest;
    use crate::recording::{GpuCommand, RecordingDevice};

    #[test]
    fn kind_follows_variant() {
        assert_eq!(
            RenderState::from(ZBufferState::new()).kind(),
            RenderStateKind::ZBuffer
        );
        assert_eq!(
            RenderState::from(CullingState::new()).kind(),
            RenderStateKind::Culling
        );
        assert_eq!(
            RenderState::from(FrontFaceState::new()).kind(),
            RenderStateKind::FrontFace
        );
    }

    #[test]
    fn disabled_state_issues_nothing() {
        let mut device = RecordingDevice::new();
        let mut state = RenderState::from(ZBufferState::new());
        state.set_enabled(false);
        state.apply(&mut device);
        assert!(device.commands().is_empty());

        state.set_enabled(true);
        state.apply(&mut device);
        assert_eq!(
            device.commands(),
            &[GpuCommand::SetDepthTest(DepthTest::default())]
        );
    }

    #[test]
    fn culling_and_winding_apply() {
        let mut device = RecordingDevice::new();
        let mut cull = RenderState::from(CullingState::new());
        cull.as_culling_mut().unwrap().set_culling(Culling::Disabled);
        cull.apply(&mut device);
        let mut face = RenderState::from(FrontFaceState::new());
        face.as_front_face_mut()
            .unwrap()
            .set_winding(VertexWinding::Clockwise);
        face.apply(&mut device);
        assert_eq!(
            device.commands(),
            &[
                GpuCommand::SetCulling(false),
                GpuCommand::SetFrontFace(VertexWinding::Clockwise)
            ]
        );
    }

    #[test]
    fn dispose_is_idempotent_and_final() {
        let mut device = RecordingDevice::new();
        let mut state = RenderState::from(CullingState::new());
        state.dispose();
        state.dispose();
        assert!(state.is_disposed());
        assert!(!state.is_enabled());
        state.set_enabled(true);
        state.apply(&mut device);
        assert!(device.commands().is_empty());
    }

    #[test]
    fn shared_dispose_is_seen_by_every_holder() {
        let mut device = RecordingDevice::new();
        let shared = RenderState::from(ZBufferState::new()).into_shared();
        let other = Rc::clone(&shared);
        shared.borrow_mut().dispose();
        other.borrow_mut().apply(&mut device);
        assert!(other.borrow().is_disposed());
        assert!(device.commands().is_empty());
    }

    #[test]
    fn release_queue_drains() {
        let queue = ReleaseQueue::new();
        queue.push(TextureHandle(3));
        queue.clone().push(TextureHandle(4));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain(), vec![TextureHandle(3), TextureHandle(4)]);
        assert!(queue.is_empty());
    }
}
