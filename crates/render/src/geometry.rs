use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::device::BufferHandle;

/// CPU-side vertex data ready for upload. Attribute arrays other than
/// `positions` may be empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub tex_coords: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
    pub bone_indices: Vec<[u32; 4]>,
    pub bone_weights: Vec<[f32; 4]>,
}

impl MeshData {
    pub fn vertex_count(&self) -> u32 {
        self.positions.len() as u32
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn is_skinned(&self) -> bool {
        !self.bone_indices.is_empty() && !self.bone_weights.is_empty()
    }

    /// Flat square in the XZ plane facing +Y, centred on the origin.
    pub fn plane(half_extent: f32) -> Self {
        let h = half_extent;
        Self {
            positions: vec![[-h, 0.0, -h], [-h, 0.0, h], [h, 0.0, h], [h, 0.0, -h]],
            normals: vec![[0.0, 1.0, 0.0]; 4],
            tex_coords: vec![[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0]],
            indices: vec![0, 1, 2, 0, 2, 3],
            ..Self::default()
        }
    }

    /// Axis-aligned cube centred on the origin with per-face normals.
    pub fn cube(half_extent: f32) -> Self {
        // (normal, u, v) with u x v == normal so every face winds CCW.
        let faces = [
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
        ];
        let mut mesh = Self::default();
        for (normal, u, v) in faces {
            let base = mesh.positions.len() as u32;
            let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
            for (su, sv) in corners {
                let p = (normal + u * su + v * sv) * half_extent;
                mesh.positions.push(p.to_array());
                mesh.normals.push(normal.to_array());
                mesh.tex_coords
                    .push([(su + 1.0) * 0.5, 1.0 - (sv + 1.0) * 0.5]);
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        mesh
    }

    /// Full-screen quad in clip space, drawn as a 4-vertex triangle strip.
    pub fn screen_quad() -> Self {
        Self {
            positions: vec![
                [-1.0, -1.0, 0.0],
                [1.0, -1.0, 0.0],
                [-1.0, 1.0, 0.0],
                [1.0, 1.0, 0.0],
            ],
            tex_coords: vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]],
            ..Self::default()
        }
    }
}

/// GPU-resident buffers of one mesh, as created by
/// [`crate::GpuDevice::create_geometry`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GeometryBuffers {
    pub positions: BufferHandle,
    pub normals: Option<BufferHandle>,
    pub tex_coords: Option<BufferHandle>,
    pub indices: Option<BufferHandle>,
    pub bone_indices: Option<BufferHandle>,
    pub bone_weights: Option<BufferHandle>,
    /// Number of positions.
    pub vertex_count: u32,
    /// Number of indices; zero when there is no index buffer.
    pub index_count: u32,
}

impl GeometryBuffers {
    pub fn is_skinned(&self) -> bool {
        self.bone_indices.is_some() && self.bone_weights.is_some()
    }
}

/// Per-bone skinning transforms for one frame, computed by the scene layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkinMatrices {
    pub pose: Vec<Mat4>,
    /// Inverse-transpose of each pose matrix, for normals.
    pub normal: Vec<Mat4>,
}

impl SkinMatrices {
    pub fn from_pose(pose: Vec<Mat4>) -> Self {
        let normal = pose.iter().map(|m| m.inverse().transpose()).collect();
        Self { pose, normal }
    }

    pub fn bone_count(&self) -> usize {
        self.pose.len()
    }
}
