use std::collections::{BTreeMap, HashMap, HashSet};
use std::num::NonZeroU64;

use bytemuck::Zeroable;
use penumbra_render::{
    CullFace, DepthTarget, DepthTest, DeviceCaps, DrawCall, DrawSource, FramebufferHandle,
    GeometryBuffers, BufferHandle, GpuDevice, HudText, MeshData, PixelRect, PolygonMode,
    ProgramHandle, ProgramKind, RenderError, SamplerDesc, ShadingContext, ShadowBinding,
    Texture, TextureBinding, TextureDesc, TextureHandle, TextureTarget, VertexWinding, CUBE_FACES,
};
use tracing::{debug, info, warn};
use wgpu::util::DeviceExt;

use crate::convert;
use crate::overlay::{OverlayPass, OverlayTarget};
use crate::shaders::{self, ProgramSource};
use crate::uniforms::{
    ClearUniforms, ContextUniforms, UniformArena, Vertex, interleave, uniform_slot_size,
};

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
const INITIAL_UNIFORM_SLOTS: u64 = 64;

/// Features the device uses when the adapter offers them.
pub const OPTIONAL_FEATURES: wgpu::Features = wgpu::Features::POLYGON_MODE_LINE
    .union(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Target {
    Window,
    /// A depth-only framebuffer, by framebuffer id.
    Depth(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TargetFormat {
    Window,
    DepthOnly,
}

impl Target {
    fn format(self) -> TargetFormat {
        match self {
            Target::Window => TargetFormat::Window,
            Target::Depth(_) => TargetFormat::DepthOnly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: u32,
    target: TargetFormat,
    topology: wgpu::PrimitiveTopology,
    cull: Option<wgpu::Face>,
    front: wgpu::FrontFace,
    polygon: wgpu::PolygonMode,
    depth_test: bool,
    depth_write: bool,
    compare: wgpu::CompareFunction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ClearKey {
    target: TargetFormat,
    color: bool,
    depth: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TextureSetKey {
    base: Option<(u32, SamplerDesc)>,
    cube: Option<(u32, SamplerDesc)>,
    shadow: Option<u32>,
}

impl TextureSetKey {
    fn uses(&self, texture: u32) -> bool {
        self.base.is_some_and(|(t, _)| t == texture)
            || self.cube.is_some_and(|(t, _)| t == texture)
            || self.shadow == Some(texture)
    }
}

#[derive(Debug, Clone, Copy)]
struct ContextSlot {
    offset: u32,
    shadow: Option<ShadowBinding>,
}

/// GL-style current state, captured into each recorded op.
#[derive(Debug, Clone)]
struct FixedState {
    target: Target,
    viewport: PixelRect,
    scissor: Option<PixelRect>,
    depth: DepthTest,
    culling: bool,
    cull_face: CullFace,
    front_face: VertexWinding,
    polygon: PolygonMode,
    units: BTreeMap<u32, TextureBinding>,
    program: Option<ProgramHandle>,
    context: Option<ContextSlot>,
}

impl Default for FixedState {
    fn default() -> Self {
        Self {
            target: Target::Window,
            viewport: PixelRect::default(),
            scissor: None,
            depth: DepthTest::default(),
            culling: true,
            cull_face: CullFace::Back,
            front_face: VertexWinding::CounterClockwise,
            polygon: PolygonMode::Fill,
            units: BTreeMap::new(),
            program: None,
            context: None,
        }
    }
}

#[derive(Debug)]
struct ClearOp {
    target: Target,
    key: ClearKey,
    rect: Option<PixelRect>,
    uniform: u32,
}

#[derive(Debug)]
struct DrawOp {
    target: Target,
    pipeline: PipelineKey,
    viewport: PixelRect,
    scissor: Option<PixelRect>,
    uniform: u32,
    textures: TextureSetKey,
    geometry: u32,
    source: DrawSource,
}

#[derive(Debug)]
enum Op {
    Clear(ClearOp),
    Draw(DrawOp),
}

impl Op {
    fn target(&self) -> Target {
        match self {
            Op::Clear(c) => c.target,
            Op::Draw(d) => d.target,
        }
    }
}

struct GpuGeometry {
    vertices: wgpu::Buffer,
    indices: Option<wgpu::Buffer>,
}

struct GpuTexture {
    view: wgpu::TextureView,
    target: TextureTarget,
}

struct GpuProgram {
    kind: ProgramKind,
    source: ProgramSource,
    module: wgpu::ShaderModule,
}

struct Fallbacks {
    white: wgpu::TextureView,
    white_cube: wgpu::TextureView,
    depth: wgpu::TextureView,
    sampler: wgpu::Sampler,
}

/// [`GpuDevice`] on top of wgpu.
///
/// Calls are recorded against a GL-style current state and replayed into
/// render passes when the frame is presented. Clears become scissored
/// full-screen draws so they honour the scissor rectangle.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    window_depth: wgpu::TextureView,
    caps: DeviceCaps,
    line_mode: bool,
    border_clamp: bool,

    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    program_layout: wgpu::PipelineLayout,
    clear_layout: wgpu::PipelineLayout,
    clear_module: wgpu::ShaderModule,
    uniform_buffer: wgpu::Buffer,
    uniform_group: wgpu::BindGroup,
    uniform_capacity: u64,
    shadow_sampler: wgpu::Sampler,
    fallbacks: Fallbacks,

    geometries: HashMap<u32, GpuGeometry>,
    programs: HashMap<u32, GpuProgram>,
    textures: HashMap<u32, GpuTexture>,
    /// Framebuffer id to (depth texture id, resolution).
    depth_targets: HashMap<u32, (u32, u32)>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    clear_pipelines: HashMap<ClearKey, wgpu::RenderPipeline>,
    samplers: HashMap<SamplerDesc, wgpu::Sampler>,
    texture_sets: HashMap<TextureSetKey, wgpu::BindGroup>,

    state: FixedState,
    ops: Vec<Op>,
    arena: UniformArena,
    hud: Vec<HudText>,
    overlay: Option<Box<dyn OverlayPass>>,
    next_id: u32,
}

impl WgpuDevice {
    /// Configure `surface` with `config` and build the shared GPU objects.
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    ) -> Self {
        surface.configure(&device, &config);
        let limits = device.limits();
        let features = device.features();
        let caps = DeviceCaps {
            texture_unit_count: limits.max_sampled_textures_per_shader_stage,
            max_texture_size: limits.max_texture_dimension_2d,
        };

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("context_layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(std::mem::size_of::<ContextUniforms>() as u64),
                },
                count: None,
            }],
        });

        let texture_entry = |binding, view_dimension, sample_type| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type,
                view_dimension,
                multisampled: false,
            },
            count: None,
        };
        let sampler_entry = |binding, kind| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Sampler(kind),
            count: None,
        };
        let filterable = wgpu::TextureSampleType::Float { filterable: true };
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("texture_layout"),
            entries: &[
                texture_entry(0, wgpu::TextureViewDimension::D2, filterable),
                sampler_entry(1, wgpu::SamplerBindingType::Filtering),
                texture_entry(2, wgpu::TextureViewDimension::Cube, filterable),
                sampler_entry(3, wgpu::SamplerBindingType::Filtering),
                texture_entry(4, wgpu::TextureViewDimension::D2, wgpu::TextureSampleType::Depth),
                sampler_entry(5, wgpu::SamplerBindingType::Comparison),
            ],
        });

        let program_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("program_layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });
        let clear_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("clear_layout"),
            bind_group_layouts: &[&uniform_layout],
            push_constant_ranges: &[],
        });
        let clear_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("clear_shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::CLEAR_SHADER.into()),
        });

        let uniform_capacity = INITIAL_UNIFORM_SLOTS * uniform_slot_size();
        let (uniform_buffer, uniform_group) =
            Self::create_uniforms(&device, &uniform_layout, uniform_capacity);

        let shadow_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("shadow_sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });
        let fallbacks = Self::create_fallbacks(&device, &queue);
        let window_depth = Self::create_depth_view(&device, config.width, config.height, false);

        info!(
            format = ?config.format,
            width = config.width,
            height = config.height,
            line_mode = features.contains(wgpu::Features::POLYGON_MODE_LINE),
            "wgpu device ready"
        );

        Self {
            device,
            queue,
            surface,
            config,
            window_depth,
            caps,
            line_mode: features.contains(wgpu::Features::POLYGON_MODE_LINE),
            border_clamp: features.contains(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER),
            uniform_layout,
            texture_layout,
            program_layout,
            clear_layout,
            clear_module,
            uniform_buffer,
            uniform_group,
            uniform_capacity,
            shadow_sampler,
            fallbacks,
            geometries: HashMap::new(),
            programs: HashMap::new(),
            textures: HashMap::new(),
            depth_targets: HashMap::new(),
            pipelines: HashMap::new(),
            clear_pipelines: HashMap::new(),
            samplers: HashMap::new(),
            texture_sets: HashMap::new(),
            state: FixedState::default(),
            ops: Vec::new(),
            arena: UniformArena::default(),
            hud: Vec::new(),
            overlay: None,
            next_id: 1,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    pub fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    /// Install the pass that draws HUD text.
    pub fn set_overlay(&mut self, overlay: Box<dyn OverlayPass>) {
        self.overlay = Some(overlay);
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.config.width = width.max(1);
        self.config.height = height.max(1);
        self.surface.configure(&self.device, &self.config);
        self.window_depth =
            Self::create_depth_view(&self.device, self.config.width, self.config.height, false);
        debug!(width = self.config.width, height = self.config.height, "surface resized");
    }

    fn alloc(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn create_uniforms(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        capacity: u64,
    ) -> (wgpu::Buffer, wgpu::BindGroup) {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("context_uniforms"),
            size: capacity,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("context_group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: NonZeroU64::new(std::mem::size_of::<ContextUniforms>() as u64),
                }),
            }],
        });
        (buffer, group)
    }

    fn ensure_uniform_capacity(&mut self, needed: u64) {
        if needed <= self.uniform_capacity {
            return;
        }
        let capacity = needed.next_power_of_two();
        let (buffer, group) = Self::create_uniforms(&self.device, &self.uniform_layout, capacity);
        self.uniform_buffer = buffer;
        self.uniform_group = group;
        self.uniform_capacity = capacity;
        debug!(capacity, "uniform arena grown");
    }

    fn create_fallbacks(device: &wgpu::Device, queue: &wgpu::Queue) -> Fallbacks {
        let white = |layers: u32, dimension, label| {
            let texture = device.create_texture_with_data(
                queue,
                &wgpu::TextureDescriptor {
                    label: Some(label),
                    size: wgpu::Extent3d {
                        width: 1,
                        height: 1,
                        depth_or_array_layers: layers,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: COLOR_FORMAT,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                },
                wgpu::util::TextureDataOrder::LayerMajor,
                &vec![255u8; 4 * layers as usize],
            );
            texture.create_view(&wgpu::TextureViewDescriptor {
                dimension: Some(dimension),
                ..Default::default()
            })
        };
        Fallbacks {
            white: white(1, wgpu::TextureViewDimension::D2, "fallback_white"),
            white_cube: white(CUBE_FACES as u32, wgpu::TextureViewDimension::Cube, "fallback_cube"),
            depth: Self::create_depth_view(device, 1, 1, true),
            sampler: device.create_sampler(&convert::sampler_descriptor(SamplerDesc::default(), false)),
        }
    }

    fn create_depth_view(device: &wgpu::Device, width: u32, height: u32, sampled: bool) -> wgpu::TextureView {
        let mut usage = wgpu::TextureUsages::RENDER_ATTACHMENT;
        if sampled {
            usage |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("depth_texture"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage,
            view_formats: &[],
        });
        texture.create_view(&Default::default())
    }

    fn target_size(&self, target: Target) -> (u32, u32) {
        match target {
            Target::Window => (self.config.width, self.config.height),
            Target::Depth(fb) => self
                .depth_targets
                .get(&fb)
                .map_or((1, 1), |&(_, res)| (res, res)),
        }
    }

    fn ensure_pipeline(&mut self, key: PipelineKey) -> Result<(), RenderError> {
        if self.pipelines.contains_key(&key) {
            return Ok(());
        }
        let program = self
            .programs
            .get(&key.program)
            .ok_or_else(|| RenderError::Device(format!("unknown program #{}", key.program)))?;
        let blend = if program.kind == ProgramKind::Transparent {
            wgpu::BlendState::ALPHA_BLENDING
        } else {
            wgpu::BlendState::REPLACE
        };
        let targets = [Some(wgpu::ColorTargetState {
            format: self.config.format,
            blend: Some(blend),
            write_mask: wgpu::ColorWrites::ALL,
        })];
        let fragment = match (key.target, program.source.fragment) {
            (TargetFormat::Window, Some(entry)) => Some(wgpu::FragmentState {
                module: &program.module,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                targets: &targets,
            }),
            (TargetFormat::Window, None) => {
                return Err(RenderError::Device(format!(
                    "{} program cannot draw into a color target",
                    program.source.label
                )));
            }
            (TargetFormat::DepthOnly, _) => None,
        };
        let strip_index_format = matches!(
            key.topology,
            wgpu::PrimitiveTopology::TriangleStrip | wgpu::PrimitiveTopology::LineStrip
        )
        .then_some(wgpu::IndexFormat::Uint32);
        let bias = if key.target == TargetFormat::DepthOnly {
            wgpu::DepthBiasState {
                constant: 2,
                slope_scale: 2.0,
                clamp: 0.0,
            }
        } else {
            wgpu::DepthBiasState::default()
        };

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(program.source.label),
                layout: Some(&self.program_layout),
                vertex: wgpu::VertexState {
                    module: &program.module,
                    entry_point: Some(program.source.vertex),
                    compilation_options: Default::default(),
                    buffers: &[Vertex::layout()],
                },
                fragment,
                primitive: wgpu::PrimitiveState {
                    topology: key.topology,
                    strip_index_format,
                    front_face: key.front,
                    cull_mode: key.cull,
                    polygon_mode: key.polygon,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: key.depth_test && key.depth_write,
                    depth_compare: if key.depth_test {
                        key.compare
                    } else {
                        wgpu::CompareFunction::Always
                    },
                    stencil: Default::default(),
                    bias,
                }),
                multisample: Default::default(),
                multiview: None,
                cache: None,
            });
        debug!(program = program.source.label, ?key.topology, "pipeline created");
        self.pipelines.insert(key, pipeline);
        Ok(())
    }

    fn ensure_clear_pipeline(&mut self, key: ClearKey) {
        if self.clear_pipelines.contains_key(&key) {
            return;
        }
        let write_mask = if key.color {
            wgpu::ColorWrites::ALL
        } else {
            wgpu::ColorWrites::empty()
        };
        let targets = [Some(wgpu::ColorTargetState {
            format: self.config.format,
            blend: None,
            write_mask,
        })];
        let fragment = (key.target == TargetFormat::Window).then(|| wgpu::FragmentState {
            module: &self.clear_module,
            entry_point: Some("fs_clear"),
            compilation_options: Default::default(),
            targets: &targets,
        });
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("clear"),
                layout: Some(&self.clear_layout),
                vertex: wgpu::VertexState {
                    module: &self.clear_module,
                    entry_point: Some("vs_clear"),
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                fragment,
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: key.depth,
                    depth_compare: wgpu::CompareFunction::Always,
                    stencil: Default::default(),
                    bias: Default::default(),
                }),
                multisample: Default::default(),
                multiview: None,
                cache: None,
            });
        self.clear_pipelines.insert(key, pipeline);
    }

    fn ensure_sampler(&mut self, desc: SamplerDesc) {
        if !self.samplers.contains_key(&desc) {
            let sampler = self
                .device
                .create_sampler(&convert::sampler_descriptor(desc, self.border_clamp));
            self.samplers.insert(desc, sampler);
        }
    }

    /// Textures for the next draw: unit 0 and the context's shadow map.
    fn texture_set_key(&self, shadow: Option<ShadowBinding>) -> TextureSetKey {
        let unit0 = self.state.units.get(&0).filter(|b| {
            self.textures
                .get(&b.texture.0)
                .is_some_and(|t| t.target == b.target)
        });
        let pick = |target| {
            unit0
                .filter(|b| b.target == target)
                .map(|b| (b.texture.0, b.sampler))
        };
        // a depth target cannot be sampled while it is being rendered into
        let rendering_into = match self.state.target {
            Target::Depth(fb) => self.depth_targets.get(&fb).map(|&(tex, _)| tex),
            Target::Window => None,
        };
        let shadow = shadow
            .map(|s| s.texture.0)
            .filter(|t| self.textures.contains_key(t) && Some(*t) != rendering_into);
        TextureSetKey {
            base: pick(TextureTarget::TwoDimensional),
            cube: pick(TextureTarget::CubeMap),
            shadow,
        }
    }

    fn ensure_texture_set(&mut self, key: TextureSetKey) {
        if self.texture_sets.contains_key(&key) {
            return;
        }
        for (_, sampler) in key.base.iter().chain(key.cube.iter()) {
            self.ensure_sampler(*sampler);
        }
        let group = {
            let view = |entry: Option<(u32, SamplerDesc)>, fallback| {
                entry
                    .and_then(|(t, _)| self.textures.get(&t))
                    .map_or(fallback, |t| &t.view)
            };
            let sampler = |entry: Option<(u32, SamplerDesc)>| {
                entry
                    .and_then(|(_, s)| self.samplers.get(&s))
                    .unwrap_or(&self.fallbacks.sampler)
            };
            let shadow = key
                .shadow
                .and_then(|t| self.textures.get(&t))
                .map_or(&self.fallbacks.depth, |t| &t.view);
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("texture_group"),
                layout: &self.texture_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(view(
                            key.base,
                            &self.fallbacks.white,
                        )),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(sampler(key.base)),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(view(
                            key.cube,
                            &self.fallbacks.white_cube,
                        )),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::Sampler(sampler(key.cube)),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: wgpu::BindingResource::TextureView(shadow),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: wgpu::BindingResource::Sampler(&self.shadow_sampler),
                    },
                ],
            })
        };
        self.texture_sets.insert(key, group);
    }

    fn forget_texture(&mut self, texture: u32) {
        self.textures.remove(&texture);
        self.texture_sets.retain(|key, _| !key.uses(texture));
    }

    fn reset_frame(&mut self) {
        self.ops.clear();
        self.arena.clear();
        self.hud.clear();
    }

    /// Replay the frame's ops, one render pass per run of ops sharing a
    /// target. The first pass on each target starts from a cleared image.
    fn encode(&self, encoder: &mut wgpu::CommandEncoder, surface_view: &wgpu::TextureView) {
        let mut started = HashSet::new();
        let mut start = 0;
        while start < self.ops.len() {
            let target = self.ops[start].target();
            let end = self.ops[start..]
                .iter()
                .position(|op| op.target() != target)
                .map_or(self.ops.len(), |n| start + n);
            let first = started.insert(target);
            self.encode_pass(encoder, surface_view, target, first, &self.ops[start..end]);
            start = end;
        }
        if !started.contains(&Target::Window) {
            self.encode_pass(encoder, surface_view, Target::Window, true, &[]);
        }
    }

    fn encode_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        surface_view: &wgpu::TextureView,
        target: Target,
        first: bool,
        ops: &[Op],
    ) {
        let depth_view = match target {
            Target::Window => &self.window_depth,
            Target::Depth(fb) => {
                let Some(texture) = self
                    .depth_targets
                    .get(&fb)
                    .and_then(|(tex, _)| self.textures.get(tex))
                else {
                    warn!(framebuffer = fb, "ops recorded for a destroyed framebuffer");
                    return;
                };
                &texture.view
            }
        };
        let (color_load, depth_load) = if first {
            (wgpu::LoadOp::Clear(wgpu::Color::BLACK), wgpu::LoadOp::Clear(1.0))
        } else {
            (wgpu::LoadOp::Load, wgpu::LoadOp::Load)
        };
        let color = [Some(wgpu::RenderPassColorAttachment {
            view: surface_view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: color_load,
                store: wgpu::StoreOp::Store,
            },
        })];
        let color_attachments: &[Option<wgpu::RenderPassColorAttachment>] = match target {
            Target::Window => &color,
            Target::Depth(_) => &[],
        };
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(match target {
                Target::Window => "window_pass",
                Target::Depth(_) => "depth_pass",
            }),
            color_attachments,
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: depth_load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            ..Default::default()
        });

        let (width, height) = self.target_size(target);
        let full = PixelRect::new(0, 0, width as i32, height as i32);
        for op in ops {
            match op {
                Op::Clear(clear) => {
                    let Some(pipeline) = self.clear_pipelines.get(&clear.key) else {
                        continue;
                    };
                    let Some(rect) =
                        convert::flip_and_clip(clear.rect.unwrap_or(full), width, height)
                    else {
                        continue;
                    };
                    pass.set_pipeline(pipeline);
                    pass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
                    pass.set_scissor_rect(rect.x, rect.y, rect.width, rect.height);
                    pass.set_bind_group(0, &self.uniform_group, &[clear.uniform]);
                    pass.draw(0..3, 0..1);
                }
                Op::Draw(draw) => {
                    let (Some(pipeline), Some(geometry), Some(textures)) = (
                        self.pipelines.get(&draw.pipeline),
                        self.geometries.get(&draw.geometry),
                        self.texture_sets.get(&draw.textures),
                    ) else {
                        continue;
                    };
                    let (Some(viewport), Some(scissor)) = (
                        convert::flip_and_clip(draw.viewport, width, height),
                        convert::flip_and_clip(draw.scissor.unwrap_or(full), width, height),
                    ) else {
                        continue;
                    };
                    pass.set_pipeline(pipeline);
                    pass.set_viewport(
                        viewport.x as f32,
                        viewport.y as f32,
                        viewport.width as f32,
                        viewport.height as f32,
                        0.0,
                        1.0,
                    );
                    pass.set_scissor_rect(scissor.x, scissor.y, scissor.width, scissor.height);
                    pass.set_bind_group(0, &self.uniform_group, &[draw.uniform]);
                    pass.set_bind_group(1, textures, &[]);
                    pass.set_vertex_buffer(0, geometry.vertices.slice(..));
                    match draw.source {
                        DrawSource::Arrays { vertex_count } => pass.draw(0..vertex_count, 0..1),
                        DrawSource::Indexed { index_count } => {
                            let Some(indices) = &geometry.indices else {
                                continue;
                            };
                            pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                            pass.draw_indexed(0..index_count, 0, 0..1);
                        }
                        DrawSource::Patches {
                            vertices_per_patch,
                            instance_count,
                        } => pass.draw(0..vertices_per_patch, 0..instance_count),
                    }
                }
            }
        }
    }
}

impl GpuDevice for WgpuDevice {
    fn capabilities(&self) -> DeviceCaps {
        self.caps
    }

    fn create_geometry(&mut self, mesh: &MeshData) -> Result<GeometryBuffers, RenderError> {
        let mut vertices = interleave(mesh);
        if vertices.is_empty() {
            vertices.push(Vertex::zeroed());
        }
        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("vertex_buffer"),
                contents: bytemuck::cast_slice(&vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let index_buffer = (!mesh.indices.is_empty()).then(|| {
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("index_buffer"),
                    contents: bytemuck::cast_slice(&mesh.indices),
                    usage: wgpu::BufferUsages::INDEX,
                })
        });
        let id = self.alloc();
        let handle = BufferHandle(id);
        let present = |attribute_present: bool| attribute_present.then_some(handle);
        let geometry = GeometryBuffers {
            positions: handle,
            normals: present(!mesh.normals.is_empty()),
            tex_coords: present(!mesh.tex_coords.is_empty()),
            indices: present(index_buffer.is_some()),
            bone_indices: present(!mesh.bone_indices.is_empty()),
            bone_weights: present(!mesh.bone_weights.is_empty()),
            vertex_count: mesh.vertex_count(),
            index_count: mesh.index_count(),
        };
        self.geometries.insert(
            id,
            GpuGeometry {
                vertices: vertex_buffer,
                indices: index_buffer,
            },
        );
        Ok(geometry)
    }

    fn destroy_geometry(&mut self, geometry: &GeometryBuffers) {
        self.geometries.remove(&geometry.positions.0);
    }

    fn create_program(&mut self, kind: ProgramKind) -> Result<ProgramHandle, RenderError> {
        let source = shaders::program_source(kind);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(source.label),
                source: wgpu::ShaderSource::Wgsl(source.source.into()),
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(RenderError::Device(format!(
                "{} shader failed to compile: {error}",
                source.label
            )));
        }
        let id = self.alloc();
        self.programs.insert(id, GpuProgram { kind, source, module });
        Ok(ProgramHandle { id, kind })
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program.id);
        self.pipelines.retain(|key, _| key.program != program.id);
    }

    fn create_texture(
        &mut self,
        desc: &TextureDesc,
        layers: &[&[u8]],
    ) -> Result<TextureHandle, RenderError> {
        let expected_layers = match desc.target {
            TextureTarget::TwoDimensional => 1,
            TextureTarget::CubeMap => CUBE_FACES,
        };
        let layer_bytes = Texture::byte_len(desc.width, desc.height)?;
        if layers.len() != expected_layers || layers.iter().any(|l| l.len() != layer_bytes) {
            return Err(RenderError::Device(format!(
                "texture data does not match {}x{} {:?}",
                desc.width, desc.height, desc.target
            )));
        }
        let mip_level_count = if desc.mipmapped {
            convert::mip_level_count(desc.width, desc.height)
        } else {
            1
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("texture"),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: layers.len() as u32,
            },
            mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        for (layer, pixels) in layers.iter().enumerate() {
            let (mut level, mut width, mut height) = (pixels.to_vec(), desc.width, desc.height);
            for mip_level in 0..mip_level_count {
                if mip_level > 0 {
                    (level, width, height) = convert::downsample(&level, width, height);
                }
                self.queue.write_texture(
                    wgpu::TexelCopyTextureInfo {
                        texture: &texture,
                        mip_level,
                        origin: wgpu::Origin3d {
                            x: 0,
                            y: 0,
                            z: layer as u32,
                        },
                        aspect: wgpu::TextureAspect::All,
                    },
                    &level,
                    wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(4 * width),
                        rows_per_image: Some(height),
                    },
                    wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                );
            }
        }
        let dimension = match desc.target {
            TextureTarget::TwoDimensional => wgpu::TextureViewDimension::D2,
            TextureTarget::CubeMap => wgpu::TextureViewDimension::Cube,
        };
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(dimension),
            ..Default::default()
        });
        let id = self.alloc();
        self.textures.insert(
            id,
            GpuTexture {
                view,
                target: desc.target,
            },
        );
        debug!(id, ?desc.target, mip_level_count, "texture uploaded");
        Ok(TextureHandle(id))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.forget_texture(texture.0);
    }

    fn create_depth_target(&mut self, resolution: u32) -> Result<DepthTarget, RenderError> {
        let resolution = resolution.clamp(1, self.caps.max_texture_size);
        let view = Self::create_depth_view(&self.device, resolution, resolution, true);
        let texture = self.alloc();
        let framebuffer = self.alloc();
        self.textures.insert(
            texture,
            GpuTexture {
                view,
                target: TextureTarget::TwoDimensional,
            },
        );
        self.depth_targets.insert(framebuffer, (texture, resolution));
        Ok(DepthTarget {
            framebuffer: FramebufferHandle(framebuffer),
            depth_texture: TextureHandle(texture),
            resolution,
        })
    }

    fn destroy_depth_target(&mut self, target: &DepthTarget) {
        self.depth_targets.remove(&target.framebuffer.0);
        self.forget_texture(target.depth_texture.0);
    }

    fn bind_framebuffer(&mut self, target: Option<FramebufferHandle>) {
        self.state.target = match target {
            Some(fb) if self.depth_targets.contains_key(&fb.0) => Target::Depth(fb.0),
            Some(fb) => {
                warn!(framebuffer = fb.0, "binding unknown framebuffer; using the window");
                Target::Window
            }
            None => Target::Window,
        };
    }

    fn set_viewport(&mut self, rect: PixelRect) {
        self.state.viewport = rect;
    }

    fn set_scissor(&mut self, rect: Option<PixelRect>) {
        self.state.scissor = rect;
    }

    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>) {
        let target = self.state.target;
        let key = ClearKey {
            target: target.format(),
            color: color.is_some() && target == Target::Window,
            depth: depth.is_some(),
        };
        if !key.color && !key.depth {
            return;
        }
        self.ensure_clear_pipeline(key);
        let uniform = self.arena.push(&ClearUniforms {
            color: color.unwrap_or_default(),
            depth: [depth.unwrap_or(1.0), 0.0, 0.0, 0.0],
        });
        self.ops.push(Op::Clear(ClearOp {
            target,
            key,
            rect: self.state.scissor,
            uniform,
        }));
    }

    fn set_depth_test(&mut self, test: DepthTest) {
        self.state.depth = test;
    }

    fn set_culling(&mut self, enabled: bool) {
        self.state.culling = enabled;
    }

    fn set_cull_face(&mut self, face: CullFace) {
        self.state.cull_face = face;
    }

    fn set_front_face(&mut self, winding: VertexWinding) {
        self.state.front_face = winding;
    }

    fn set_polygon_mode(&mut self, mode: PolygonMode) {
        if mode == PolygonMode::Line && !self.line_mode {
            debug!("line polygon mode unsupported by this adapter; drawing filled");
        }
        self.state.polygon = mode;
    }

    fn bind_texture(&mut self, unit: u32, binding: Option<TextureBinding>) {
        match binding {
            Some(binding) => {
                self.state.units.insert(unit, binding);
            }
            None => {
                self.state.units.remove(&unit);
            }
        }
    }

    fn bind_program(&mut self, program: ProgramHandle) {
        self.state.program = Some(program);
    }

    fn upload_context(&mut self, context: &ShadingContext<'_>) {
        let offset = self.arena.push(&ContextUniforms::from_context(context));
        self.state.context = Some(ContextSlot {
            offset,
            shadow: context.shadow_map,
        });
    }

    fn draw(&mut self, call: &DrawCall<'_>) {
        let (Some(program), Some(context)) = (self.state.program, self.state.context) else {
            warn!("draw without a bound program and context; ignored");
            return;
        };
        let geometry = call.geometry.positions.0;
        if !self.geometries.contains_key(&geometry) {
            warn!(geometry, "draw with released geometry; ignored");
            return;
        }
        let state = &self.state;
        let key = PipelineKey {
            program: program.id,
            target: state.target.format(),
            topology: convert::topology(call.primitive, call.source),
            cull: convert::cull_mode(state.culling, state.cull_face),
            front: convert::front_face(state.front_face),
            polygon: convert::polygon_mode(state.polygon, self.line_mode),
            depth_test: state.depth.enabled,
            depth_write: state.depth.write,
            compare: convert::compare(state.depth.function),
        };
        if let Err(error) = self.ensure_pipeline(key) {
            warn!(%error, ?program.kind, "draw skipped");
            return;
        }
        let textures = self.texture_set_key(context.shadow);
        self.ensure_texture_set(textures);
        self.ops.push(Op::Draw(DrawOp {
            target: self.state.target,
            pipeline: key,
            viewport: self.state.viewport,
            scissor: self.state.scissor,
            uniform: context.offset,
            textures,
            geometry,
            source: call.source,
        }));
    }

    fn unbind_program(&mut self) {
        self.state.program = None;
        self.state.context = None;
    }

    fn draw_text(&mut self, text: &HudText) {
        self.hud.push(text.clone());
    }

    fn present(&mut self) -> Result<(), RenderError> {
        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.device, &self.config);
                self.reset_frame();
                debug!("surface reconfigured; frame dropped");
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                self.reset_frame();
                warn!("surface timed out; frame dropped");
                return Ok(());
            }
            Err(error) => {
                self.reset_frame();
                return Err(RenderError::Device(format!("surface error: {error}")));
            }
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        self.ensure_uniform_capacity(self.arena.len());
        if !self.arena.is_empty() {
            self.queue
                .write_buffer(&self.uniform_buffer, 0, self.arena.bytes());
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame_encoder"),
            });
        self.encode(&mut encoder, &view);
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.render(
                OverlayTarget {
                    device: &self.device,
                    queue: &self.queue,
                    encoder: &mut encoder,
                    view: &view,
                    size: (self.config.width, self.config.height),
                },
                &self.hud,
            );
        } else if !self.hud.is_empty() {
            debug!(strings = self.hud.len(), "no overlay installed; HUD text dropped");
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        self.reset_frame();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_set_tracks_member_textures() {
        let key = TextureSetKey {
            base: Some((3, SamplerDesc::default())),
            cube: None,
            shadow: Some(7),
        };
        assert!(key.uses(3));
        assert!(key.uses(7));
        assert!(!key.uses(4));
    }

    #[test]
    fn targets_map_to_formats() {
        assert_eq!(Target::Window.format(), TargetFormat::Window);
        assert_eq!(Target::Depth(2).format(), TargetFormat::DepthOnly);
    }

    #[test]
    fn optional_features_cover_wireframe_and_border() {
        assert!(OPTIONAL_FEATURES.contains(wgpu::Features::POLYGON_MODE_LINE));
        assert!(OPTIONAL_FEATURES.contains(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER));
    }
}
