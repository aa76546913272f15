use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use glam::Vec3;
use penumbra_common::{Color, Transform};
use penumbra_input::InputBindings;
use penumbra_render::{
    DataSource, FrameStats, GpuCommand, GpuDevice, Light, Material, MeshData, ProgramKind, RecordingDevice,
    RenderConfig, RenderObject, RenderSystem, RenderView, Viewport,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "penumbra-cli", about = "Headless tool for the penumbra frame pipeline")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Run frames of a demo scene on the recording device and print the GPU
    /// command trace
    Frame {
        /// Render configuration (YAML)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Number of frames to run
        #[arg(short, long, default_value = "1")]
        frames: u32,
        /// Surface width in pixels
        #[arg(long, default_value = "800")]
        width: u32,
        /// Surface height in pixels
        #[arg(long, default_value = "600")]
        height: u32,
        /// Key presses applied before the first frame, e.g. `--press KeyF`
        #[arg(long = "press")]
        presses: Vec<String>,
        /// Disable the shadow pass
        #[arg(long)]
        no_shadows: bool,
        /// Print JSON instead of the text trace
        #[arg(long)]
        json: bool,
    },
    /// Render configuration tools
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Print key bindings, loaded from a file or the defaults
    Bindings {
        path: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Load and validate a configuration file
    Validate { path: PathBuf },
    /// Print the default configuration as YAML
    Default,
}

#[derive(Serialize)]
struct FrameReport<'a> {
    frames: &'a [FrameStats],
    commands: &'a [GpuCommand],
}

/// Floor, cube and a terrain patch grid under a sun.
fn demo_scene(system: &mut RenderSystem<RecordingDevice>) -> Result<Vec<RenderObject>> {
    let lit = system.create_gpu_shader_program(ProgramKind::Rendering)?;
    let terrain = system.create_gpu_shader_program(ProgramKind::Tessellation)?;
    let floor = system.upload_mesh(&MeshData::plane(10.0))?;
    let cube = system.upload_mesh(&MeshData::cube(0.5))?;
    let patch = system.upload_mesh(&MeshData::screen_quad())?;

    let mut hills = RenderObject::new("terrain", patch)
        .with_program(terrain)
        .with_data_source(DataSource::InstancedPatch);
    hills.set_patch_resolution(Some(8));

    system.set_active_lights(vec![Light::directional(Vec3::new(-0.4, -1.0, -0.3))]);
    Ok(vec![
        RenderObject::new("floor", floor).with_program(lit),
        RenderObject::new("cube", cube)
            .with_program(lit)
            .with_material(Material {
                diffuse: Color::rgb(0.9, 0.2, 0.2),
                ..Material::default()
            })
            .with_transform(Transform::from_position(Vec3::new(0.0, 0.5, 0.0))),
        hills,
    ])
}

fn run_frames(
    config: Option<PathBuf>,
    frames: u32,
    width: u32,
    height: u32,
    presses: &[String],
    no_shadows: bool,
    json: bool,
) -> Result<()> {
    let mut config = match config {
        Some(path) => RenderConfig::load(&path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => RenderConfig::default(),
    };
    if no_shadows {
        config.shadows.enabled = false;
    }

    let mut system = RenderSystem::new(RecordingDevice::new(), config)?;
    system.initialize()?;
    let bindings = InputBindings::default();
    for key in presses {
        let action = bindings.action_for(key);
        if !action.perform(system.toggles_mut(), 1.0, 1.0) {
            bail!("key {key} is not bound to a toggle or zoom action");
        }
    }

    let scene = demo_scene(&mut system)?;
    let viewport = Viewport::new(width, height);
    let view = RenderView::look_at(
        Vec3::new(0.0, 6.0, 10.0),
        Vec3::ZERO,
        60.0,
        width as f32 / height.max(1) as f32,
    );

    let mut stats = Vec::new();
    for frame in 0..frames {
        system.set_hud(format!("frame {frame}"));
        system.clear_viewport(&viewport);
        let mut queue = system.create_render_queue();
        for object in &scene {
            queue.add(object);
        }
        stats.push(system.process_render_queue(&queue, &viewport, &view)?);
        system.swap_buffers()?;
    }
    drop(scene);
    system.shutdown();

    if json {
        let report = FrameReport {
            frames: &stats,
            commands: system.device().commands(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", system.device().trace());
        for (i, s) in stats.iter().enumerate() {
            println!(
                "frame {i}: shadow draws {}, main draws {}, skipped {}, debug quad {}, hud {}",
                s.shadow_draws, s.main_draws, s.skipped, s.debug_quad, s.hud_strings
            );
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Info => {
            println!("penumbra-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("render: {}", penumbra_render::crate_info());
            println!("input: {}", penumbra_input::crate_info());
            let caps = RecordingDevice::new().capabilities();
            println!(
                "recording device: {} texture units, max texture {}",
                caps.texture_unit_count, caps.max_texture_size
            );
        }
        Commands::Frame {
            config,
            frames,
            width,
            height,
            presses,
            no_shadows,
            json,
        } => run_frames(config, frames, width, height, &presses, no_shadows, json)?,
        Commands::Config { action } => match action {
            ConfigAction::Validate { path } => {
                let config = RenderConfig::load(&path)
                    .with_context(|| format!("invalid configuration {}", path.display()))?;
                println!(
                    "{}: OK (shadows {}, resolution {})",
                    path.display(),
                    if config.shadows.enabled { "on" } else { "off" },
                    config.shadows.resolution
                );
            }
            ConfigAction::Default => print!("{}", RenderConfig::default().to_yaml_string()?),
        },
        Commands::Bindings { path } => {
            let bindings = match path {
                Some(path) => InputBindings::load(&path)
                    .with_context(|| format!("invalid bindings {}", path.display()))?,
                None => InputBindings::default(),
            };
            print!("{}", serde_yaml::to_string(&bindings)?);
        }
    }

    Ok(())
}
