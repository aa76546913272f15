use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RenderError;

/// The shader programs a backend knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProgramKind {
    /// Lit, textured, shadow-receiving geometry.
    Rendering,
    /// [`ProgramKind::Rendering`] plus bone skinning.
    SkeletalRendering,
    /// Cube-mapped background drawn around the camera.
    SkyBox,
    /// Instanced-patch terrain; expands patches inside its own vertex stage.
    Tessellation,
    /// Depth-only output in light space for the shadow pass.
    Depth,
    /// Pass-through quad used to visualize the shadow map.
    Framebuffer,
    Transparent,
    ItemBox,
    GuiBackground,
}

/// Opaque reference to a backend-owned shader program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramHandle {
    pub id: u32,
    pub kind: ProgramKind,
}

/// At most one program per kind; owned by the pipeline.
#[derive(Debug, Default)]
pub struct ProgramRegistry {
    programs: BTreeMap<ProgramKind, ProgramHandle>,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: ProgramHandle) -> Result<(), RenderError> {
        if self.programs.contains_key(&handle.kind) {
            return Err(RenderError::ProgramExists(handle.kind));
        }
        self.programs.insert(handle.kind, handle);
        Ok(())
    }

    pub fn get(&self, kind: ProgramKind) -> Result<ProgramHandle, RenderError> {
        self.programs
            .get(&kind)
            .copied()
            .ok_or(RenderError::ProgramMissing(kind))
    }

    pub fn contains(&self, kind: ProgramKind) -> bool {
        self.programs.contains_key(&kind)
    }

    /// Remove every program, returning them for release on the GPU thread.
    pub fn drain(&mut self) -> Vec<ProgramHandle> {
        std::mem::take(&mut self.programs).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_program_per_kind() {
        let mut reg = ProgramRegistry::new();
        let depth = ProgramHandle {
            id: 1,
            kind: ProgramKind::Depth,
        };
        reg.insert(depth).unwrap();
        assert!(matches!(
            reg.insert(ProgramHandle { id: 2, ..depth }),
            Err(RenderError::ProgramExists(ProgramKind::Depth))
        ));
        assert_eq!(reg.get(ProgramKind::Depth).unwrap().id, 1);
    }

    #[test]
    fn missing_program_is_an_error() {
        let reg = ProgramRegistry::new();
        assert!(matches!(
            reg.get(ProgramKind::SkyBox),
            Err(RenderError::ProgramMissing(ProgramKind::SkyBox))
        ));
    }

    #[test]
    fn drain_empties_registry() {
        let mut reg = ProgramRegistry::new();
        reg.insert(ProgramHandle {
            id: 7,
            kind: ProgramKind::Rendering,
        })
        .unwrap();
        assert_eq!(reg.drain().len(), 1);
        assert!(reg.is_empty());
    }
}
