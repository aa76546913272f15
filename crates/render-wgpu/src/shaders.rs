use penumbra_render::ProgramKind;

/// Bind group 0 (per-draw context) and the shared vertex layout.
macro_rules! context_wgsl {
    () => {
        r#"
struct Light {
    // w: 0 directional, 1 point, 2 spot
    position: vec4<f32>,
    // w: cosine of the spot cutoff
    direction: vec4<f32>,
    ambient: vec4<f32>,
    diffuse: vec4<f32>,
    specular: vec4<f32>,
    // constant, linear, quadratic, range
    attenuation: vec4<f32>,
    // x: spot falloff exponent
    extra: vec4<f32>,
};

struct Context {
    model: mat4x4<f32>,
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    light_space: mat4x4<f32>,
    normal: mat4x4<f32>,
    camera_position: vec4<f32>,
    ambient: vec4<f32>,
    mat_ambient: vec4<f32>,
    mat_diffuse: vec4<f32>,
    mat_specular: vec4<f32>,
    mat_emissive: vec4<f32>,
    // shininess, height scale
    mat_params: vec4<f32>,
    // light count, shadow map bound, patch resolution, bone count
    counts: vec4<u32>,
    lights: array<Light, 8>,
    bones: array<mat4x4<f32>, 64>,
};

@group(0) @binding(0) var<uniform> ctx: Context;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) bone_indices: vec4<u32>,
    @location(4) bone_weights: vec4<f32>,
};

fn identity() -> mat4x4<f32> {
    return mat4x4<f32>(
        vec4<f32>(1.0, 0.0, 0.0, 0.0),
        vec4<f32>(0.0, 1.0, 0.0, 0.0),
        vec4<f32>(0.0, 0.0, 1.0, 0.0),
        vec4<f32>(0.0, 0.0, 0.0, 1.0),
    );
}

fn skin_matrix(v: VertexInput) -> mat4x4<f32> {
    let total = v.bone_weights.x + v.bone_weights.y + v.bone_weights.z + v.bone_weights.w;
    if (ctx.counts.w == 0u || total < 0.0001) {
        return identity();
    }
    var m = mat4x4<f32>(vec4<f32>(0.0), vec4<f32>(0.0), vec4<f32>(0.0), vec4<f32>(0.0));
    for (var i = 0u; i < 4u; i += 1u) {
        let bone = min(v.bone_indices[i], ctx.counts.w - 1u);
        m = m + ctx.bones[bone] * v.bone_weights[i];
    }
    return m;
}
"#
    };
}

/// Bind group 1: the texture at unit 0 (2D or cube) and the shadow map.
macro_rules! textures_wgsl {
    () => {
        r#"
@group(1) @binding(0) var base_texture: texture_2d<f32>;
@group(1) @binding(1) var base_sampler: sampler;
@group(1) @binding(2) var cube_texture: texture_cube<f32>;
@group(1) @binding(3) var cube_sampler: sampler;
@group(1) @binding(4) var shadow_texture: texture_depth_2d;
@group(1) @binding(5) var shadow_sampler: sampler_comparison;
"#
    };
}

macro_rules! lighting_wgsl {
    () => {
        r#"
struct LitOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) light_clip: vec4<f32>,
};

fn shadow_factor(light_clip: vec4<f32>) -> f32 {
    if (ctx.counts.y == 0u) {
        return 1.0;
    }
    let ndc = light_clip.xyz / light_clip.w;
    let uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
    if (uv.x < 0.0 || uv.x > 1.0 || uv.y < 0.0 || uv.y > 1.0 || ndc.z > 1.0) {
        return 1.0;
    }
    return textureSampleCompareLevel(shadow_texture, shadow_sampler, uv, ndc.z - 0.002);
}

fn direct_light(l: Light, p: vec3<f32>, n: vec3<f32>, view_dir: vec3<f32>, shininess: f32) -> vec3<f32> {
    let kind = u32(l.position.w);
    var dir = normalize(-l.direction.xyz);
    var attenuation = 1.0;
    if (kind != 0u) {
        let to_light = l.position.xyz - p;
        let d = length(to_light);
        if (d > l.attenuation.w) {
            return vec3<f32>(0.0);
        }
        dir = to_light / max(d, 0.0001);
        attenuation = 1.0 / max(l.attenuation.x + l.attenuation.y * d + l.attenuation.z * d * d, 0.0001);
        if (kind == 2u) {
            let spot = dot(-dir, normalize(l.direction.xyz));
            if (spot < l.direction.w) {
                return vec3<f32>(0.0);
            }
            attenuation = attenuation * pow(max(spot, 0.0), l.extra.x);
        }
    }
    let diffuse = max(dot(n, dir), 0.0);
    let half_dir = normalize(dir + view_dir);
    let specular = select(0.0, pow(max(dot(n, half_dir), 0.0), shininess), diffuse > 0.0);
    return attenuation * (diffuse * l.diffuse.rgb * ctx.mat_diffuse.rgb
        + specular * l.specular.rgb * ctx.mat_specular.rgb);
}

fn shade(in: LitOutput, base: vec4<f32>) -> vec4<f32> {
    let len = length(in.normal);
    let n = select(vec3<f32>(0.0, 1.0, 0.0), in.normal / len, len > 0.00001);
    let view_dir = normalize(ctx.camera_position.xyz - in.world_position);
    let shininess = max(ctx.mat_params.x, 1.0);
    var ambient = ctx.ambient.rgb * ctx.mat_ambient.rgb;
    var direct = vec3<f32>(0.0);
    for (var i = 0u; i < ctx.counts.x; i += 1u) {
        let l = ctx.lights[i];
        ambient = ambient + l.ambient.rgb * ctx.mat_ambient.rgb;
        direct = direct + direct_light(l, in.world_position, n, view_dir, shininess);
    }
    let lit = ctx.mat_emissive.rgb + ambient + shadow_factor(in.light_clip) * direct;
    return vec4<f32>(lit * base.rgb, base.a * ctx.mat_diffuse.a);
}
"#
    };
}

/// Lit, textured, skinned when bones are uploaded.
pub const LIT_SHADER: &str = concat!(
    context_wgsl!(),
    textures_wgsl!(),
    lighting_wgsl!(),
    r#"
@vertex
fn vs_lit(v: VertexInput) -> LitOutput {
    let skin = skin_matrix(v);
    let world = ctx.model * skin * vec4<f32>(v.position, 1.0);
    var out: LitOutput;
    out.clip = ctx.projection * ctx.view * world;
    out.world_position = world.xyz;
    out.normal = (ctx.model * skin * vec4<f32>(v.normal, 0.0)).xyz;
    out.uv = v.uv;
    out.light_clip = ctx.light_space * world;
    return out;
}

@fragment
fn fs_lit(in: LitOutput) -> @location(0) vec4<f32> {
    let base = textureSample(base_texture, base_sampler, in.uv);
    return shade(in, base);
}

@fragment
fn fs_unlit(in: LitOutput) -> @location(0) vec4<f32> {
    return textureSample(base_texture, base_sampler, in.uv) * ctx.mat_diffuse;
}
"#
);

/// Depth-only output in light space.
pub const DEPTH_SHADER: &str = concat!(
    context_wgsl!(),
    r#"
@vertex
fn vs_depth(v: VertexInput) -> @builtin(position) vec4<f32> {
    return ctx.light_space * ctx.model * skin_matrix(v) * vec4<f32>(v.position, 1.0);
}
"#
);

/// Cube-mapped backdrop pinned to the far plane.
pub const SKYBOX_SHADER: &str = concat!(
    context_wgsl!(),
    textures_wgsl!(),
    r#"
struct SkyOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) direction: vec3<f32>,
};

@vertex
fn vs_sky(v: VertexInput) -> SkyOutput {
    let rotation = mat4x4<f32>(
        vec4<f32>(ctx.view[0].xyz, 0.0),
        vec4<f32>(ctx.view[1].xyz, 0.0),
        vec4<f32>(ctx.view[2].xyz, 0.0),
        vec4<f32>(0.0, 0.0, 0.0, 1.0),
    );
    let clip = ctx.projection * rotation * vec4<f32>(v.position, 1.0);
    var out: SkyOutput;
    out.clip = clip.xyww;
    out.direction = v.position;
    return out;
}

@fragment
fn fs_sky(in: SkyOutput) -> @location(0) vec4<f32> {
    return textureSample(cube_texture, cube_sampler, in.direction);
}
"#
);

/// Instanced height-mapped patches. Each instance is one grid cell, drawn
/// as a 4-vertex strip; the heightmap is the texture at unit 0.
pub const TERRAIN_SHADER: &str = concat!(
    context_wgsl!(),
    textures_wgsl!(),
    lighting_wgsl!(),
    r#"
fn terrain_height(uv: vec2<f32>) -> f32 {
    return textureSampleLevel(base_texture, base_sampler, uv, 0.0).r * ctx.mat_params.y;
}

@vertex
fn vs_terrain(@builtin(vertex_index) corner: u32, @builtin(instance_index) cell: u32) -> LitOutput {
    let res = max(ctx.counts.z, 1u);
    let origin = vec2<f32>(f32(cell % res), f32(cell / res));
    let offset = vec2<f32>(f32(corner >> 1u), f32(corner & 1u));
    let uv = (origin + offset) / f32(res);
    let step = 1.0 / f32(res);
    let h = terrain_height(uv);
    let dx = terrain_height(uv + vec2<f32>(step, 0.0)) - h;
    let dz = terrain_height(uv + vec2<f32>(0.0, step)) - h;

    let world = ctx.model * vec4<f32>(uv.x - 0.5, h, uv.y - 0.5, 1.0);
    var out: LitOutput;
    out.clip = ctx.projection * ctx.view * world;
    out.world_position = world.xyz;
    out.normal = (ctx.model * vec4<f32>(-dx, step, -dz, 0.0)).xyz;
    out.uv = uv;
    out.light_clip = ctx.light_space * world;
    return out;
}

@fragment
fn fs_terrain(in: LitOutput) -> @location(0) vec4<f32> {
    return shade(in, vec4<f32>(1.0));
}
"#
);

/// Shows the shadow depth texture on a screen-space quad.
pub const DEBUG_QUAD_SHADER: &str = concat!(
    context_wgsl!(),
    textures_wgsl!(),
    r#"
struct QuadOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_quad(v: VertexInput) -> QuadOutput {
    var out: QuadOutput;
    out.clip = vec4<f32>(v.position.xy, 0.0, 1.0);
    out.uv = vec2<f32>(v.uv.x, 1.0 - v.uv.y);
    return out;
}

@fragment
fn fs_quad(in: QuadOutput) -> @location(0) vec4<f32> {
    let size = textureDimensions(shadow_texture);
    let texel = vec2<u32>(clamp(in.uv, vec2<f32>(0.0), vec2<f32>(0.9999)) * vec2<f32>(size));
    let depth = textureLoad(shadow_texture, texel, 0);
    return vec4<f32>(vec3<f32>(depth), 1.0);
}
"#
);

/// Fills the scissored region with a color and a depth.
pub const CLEAR_SHADER: &str = r#"
struct ClearParams {
    color: vec4<f32>,
    depth: vec4<f32>,
};

@group(0) @binding(0) var<uniform> params: ClearParams;

@vertex
fn vs_clear(@builtin(vertex_index) i: u32) -> @builtin(position) vec4<f32> {
    let corner = vec2<f32>(f32((i << 1u) & 2u), f32(i & 2u));
    return vec4<f32>(corner * 2.0 - 1.0, params.depth.x, 1.0);
}

@fragment
fn fs_clear() -> @location(0) vec4<f32> {
    return params.color;
}
"#;

/// Shader source and entry points of one program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramSource {
    pub label: &'static str,
    pub source: &'static str,
    pub vertex: &'static str,
    /// `None` for depth-only programs.
    pub fragment: Option<&'static str>,
}

pub fn program_source(kind: ProgramKind) -> ProgramSource {
    let lit = |label, fragment| ProgramSource {
        label,
        source: LIT_SHADER,
        vertex: "vs_lit",
        fragment: Some(fragment),
    };
    match kind {
        ProgramKind::Rendering => lit("rendering", "fs_lit"),
        ProgramKind::SkeletalRendering => lit("skeletal_rendering", "fs_lit"),
        ProgramKind::Transparent => lit("transparent", "fs_lit"),
        ProgramKind::ItemBox => lit("item_box", "fs_lit"),
        ProgramKind::GuiBackground => lit("gui_background", "fs_unlit"),
        ProgramKind::SkyBox => ProgramSource {
            label: "sky_box",
            source: SKYBOX_SHADER,
            vertex: "vs_sky",
            fragment: Some("fs_sky"),
        },
        ProgramKind::Tessellation => ProgramSource {
            label: "tessellation",
            source: TERRAIN_SHADER,
            vertex: "vs_terrain",
            fragment: Some("fs_terrain"),
        },
        ProgramKind::Depth => ProgramSource {
            label: "depth",
            source: DEPTH_SHADER,
            vertex: "vs_depth",
            fragment: None,
        },
        ProgramKind::Framebuffer => ProgramSource {
            label: "framebuffer",
            source: DEBUG_QUAD_SHADER,
            vertex: "vs_quad",
            fragment: Some("fs_quad"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KINDS: [ProgramKind; 9] = [
        ProgramKind::Rendering,
        ProgramKind::SkeletalRendering,
        ProgramKind::SkyBox,
        ProgramKind::Tessellation,
        ProgramKind::Depth,
        ProgramKind::Framebuffer,
        ProgramKind::Transparent,
        ProgramKind::ItemBox,
        ProgramKind::GuiBackground,
    ];

    #[test]
    fn every_program_has_its_entry_points() {
        for kind in KINDS {
            let program = program_source(kind);
            assert!(
                program.source.contains(&format!("fn {}(", program.vertex)),
                "{kind:?}"
            );
            if let Some(fragment) = program.fragment {
                assert!(program.source.contains(&format!("fn {fragment}(")), "{kind:?}");
            }
        }
    }

    #[test]
    fn only_depth_program_lacks_fragment_stage() {
        for kind in KINDS {
            assert_eq!(
                program_source(kind).fragment.is_none(),
                kind == ProgramKind::Depth
            );
        }
    }
}
