use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use penumbra_render::{LightKind, Material, MeshData, ShadingContext};

/// Lights beyond this many are dropped from the context.
pub const MAX_LIGHTS: usize = 8;
/// Bones beyond this many are dropped from the context.
pub const MAX_BONES: usize = 64;
/// Dynamic uniform offsets must be multiples of this.
pub const UNIFORM_ALIGNMENT: u64 = 256;

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub bone_indices: [u32; 4],
    pub bone_weights: [f32; 4],
}

impl Vertex {
    pub const ATTRIBUTES: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x3,
        2 => Float32x2,
        3 => Uint32x4,
        4 => Float32x4,
    ];

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Interleave a mesh's attribute arrays. Missing attributes are zero.
pub fn interleave(mesh: &MeshData) -> Vec<Vertex> {
    mesh.positions
        .iter()
        .enumerate()
        .map(|(i, &position)| Vertex {
            position,
            normal: mesh.normals.get(i).copied().unwrap_or_default(),
            uv: mesh.tex_coords.get(i).copied().unwrap_or_default(),
            bone_indices: mesh.bone_indices.get(i).copied().unwrap_or_default(),
            bone_weights: mesh.bone_weights.get(i).copied().unwrap_or_default(),
        })
        .collect()
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct LightUniform {
    pub position: [f32; 4],
    pub direction: [f32; 4],
    pub ambient: [f32; 4],
    pub diffuse: [f32; 4],
    pub specular: [f32; 4],
    pub attenuation: [f32; 4],
    pub extra: [f32; 4],
}

/// Mirror of the WGSL `Context` struct.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct ContextUniforms {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub light_space: [[f32; 4]; 4],
    pub normal: [[f32; 4]; 4],
    pub camera_position: [f32; 4],
    pub ambient: [f32; 4],
    pub mat_ambient: [f32; 4],
    pub mat_diffuse: [f32; 4],
    pub mat_specular: [f32; 4],
    pub mat_emissive: [f32; 4],
    pub mat_params: [f32; 4],
    pub counts: [u32; 4],
    pub lights: [LightUniform; MAX_LIGHTS],
    pub bones: [[[f32; 4]; 4]; MAX_BONES],
}

/// Mirror of the WGSL `ClearParams` struct.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct ClearUniforms {
    pub color: [f32; 4],
    pub depth: [f32; 4],
}

fn light_uniform(light: &penumbra_render::Light) -> LightUniform {
    let kind = match light.kind {
        LightKind::Directional => 0.0,
        LightKind::Point => 1.0,
        LightKind::Spot => 2.0,
    };
    LightUniform {
        position: light.position.extend(kind).to_array(),
        direction: light
            .direction
            .extend(light.cone_cutoff_degrees.to_radians().cos())
            .to_array(),
        ambient: light.ambient.to_array(),
        diffuse: light.diffuse.to_array(),
        specular: light.specular.to_array(),
        attenuation: [
            light.constant_attenuation,
            light.linear_attenuation,
            light.quadratic_attenuation,
            light.range,
        ],
        extra: [light.falloff_exponent, 0.0, 0.0, 0.0],
    }
}

impl ContextUniforms {
    pub fn from_context(ctx: &ShadingContext<'_>) -> Self {
        let mut uniforms = Self::zeroed();
        uniforms.model = ctx.model.to_cols_array_2d();
        uniforms.view = ctx.view.to_cols_array_2d();
        uniforms.projection = ctx.projection.to_cols_array_2d();
        uniforms.light_space = ctx.light_space.to_cols_array_2d();
        uniforms.normal = ctx.normal_matrix().to_cols_array_2d();
        uniforms.camera_position = ctx.camera_position.extend(1.0).to_array();
        uniforms.ambient = ctx.ambient.intensity.to_array();

        let default_material = Material::default();
        let material = ctx.material.unwrap_or(&default_material);
        uniforms.mat_ambient = material.ambient.to_array();
        uniforms.mat_diffuse = material.diffuse.to_array();
        uniforms.mat_specular = material.specular.to_array();
        uniforms.mat_emissive = material.emissive.to_array();
        uniforms.mat_params = [material.shininess, 1.0, 0.0, 0.0];

        let light_count = ctx.lights.len().min(MAX_LIGHTS);
        for (slot, light) in uniforms.lights.iter_mut().zip(ctx.lights) {
            *slot = light_uniform(light);
        }

        let pose = ctx.skin.map_or(&[][..], |s| s.pose.as_slice());
        let bone_count = pose.len().min(MAX_BONES);
        for (slot, bone) in uniforms.bones.iter_mut().zip(pose) {
            *slot = bone.to_cols_array_2d();
        }
        for slot in uniforms.bones.iter_mut().skip(bone_count) {
            *slot = Mat4::IDENTITY.to_cols_array_2d();
        }

        uniforms.counts = [
            light_count as u32,
            ctx.shadow_map.is_some() as u32,
            ctx.patch_resolution,
            bone_count as u32,
        ];
        uniforms
    }
}

/// Size of one slot in the per-frame uniform arena.
pub fn uniform_slot_size() -> u64 {
    let size = std::mem::size_of::<ContextUniforms>() as u64;
    size.div_ceil(UNIFORM_ALIGNMENT) * UNIFORM_ALIGNMENT
}

/// Per-frame uniform data, one aligned slot per upload.
#[derive(Debug, Default)]
pub struct UniformArena {
    bytes: Vec<u8>,
}

impl UniformArena {
    /// Append `data` in a fresh slot and return the slot's byte offset.
    pub fn push<T: Pod>(&mut self, data: &T) -> u32 {
        let offset = self.bytes.len();
        self.bytes.extend_from_slice(bytemuck::bytes_of(data));
        self.bytes.resize(offset + uniform_slot_size() as usize, 0);
        offset as u32
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}
