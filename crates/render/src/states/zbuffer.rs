use serde::{Deserialize, Serialize};

use crate::device::{DepthTest, GpuDevice};

/// Depth comparison applied to each incoming fragment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepthFunction {
    /// Never passes.
    AlwaysFail,
    /// Always passes.
    AlwaysPass,
    Equal,
    NotEqual,
    Less,
    #[default]
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

/// Depth-buffer testing and writing.
///
/// `test_enabled` switches the depth test itself. It is separate from the
/// owning [`super::RenderState`]'s enabled flag, which decides whether this
/// state is applied at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZBufferState {
    function: DepthFunction,
    test_enabled: bool,
    writable: bool,
}

impl Default for ZBufferState {
    fn default() -> Self {
        Self {
            function: DepthFunction::LessOrEqual,
            test_enabled: true,
            writable: true,
        }
    }
}

impl ZBufferState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(&self) -> DepthFunction {
        self.function
    }

    pub fn set_function(&mut self, function: DepthFunction) {
        self.function = function;
    }

    pub fn is_test_enabled(&self) -> bool {
        self.test_enabled
    }

    pub fn set_test_enabled(&mut self, enabled: bool) {
        self.test_enabled = enabled;
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn set_writable(&mut self, writable: bool) {
        self.writable = writable;
    }

    pub fn depth_test(&self) -> DepthTest {
        DepthTest {
            enabled: self.test_enabled,
            write: self.writable,
            function: self.function,
        }
    }

    pub(crate) fn apply(&self, device: &mut dyn GpuDevice) {
        device.set_depth_test(self.depth_test());
    }
}
