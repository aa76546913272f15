use serde::{Deserialize, Serialize};

use crate::device::GpuDevice;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Culling {
    #[default]
    Enabled,
    Disabled,
}

/// Switches back-face culling on or off for one renderable. The culled face
/// itself is chosen per pass by the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CullingState {
    culling: Culling,
}

impl CullingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn culling(&self) -> Culling {
        self.culling
    }

    pub fn set_culling(&mut self, culling: Culling) {
        self.culling = culling;
    }

    pub(crate) fn apply(&self, device: &mut dyn GpuDevice) {
        device.set_culling(self.culling == Culling::Enabled);
    }
}
