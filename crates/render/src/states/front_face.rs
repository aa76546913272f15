use serde::{Deserialize, Serialize};

use crate::device::GpuDevice;

/// Which vertex order marks the front side of a primitive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VertexWinding {
    Clockwise,
    #[default]
    CounterClockwise,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontFaceState {
    winding: VertexWinding,
}

impl FrontFaceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn winding(&self) -> VertexWinding {
        self.winding
    }

    pub fn set_winding(&mut self, winding: VertexWinding) {
        self.winding = winding;
    }

    pub(crate) fn apply(&self, device: &mut dyn GpuDevice) {
        device.set_front_face(self.winding);
    }
}
