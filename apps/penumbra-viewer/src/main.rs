mod overlay;
mod scene;

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use penumbra_input::InputBindings;
use penumbra_render::{
    ContextGate, FrameSignal, FrameStats, RenderConfig, RenderError, RenderSystem, RenderView,
    RenderWindow, SharedCamera,
};
use penumbra_render_wgpu::{FlyCamera, OPTIONAL_FEATURES, WgpuDevice};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{DeviceEvent, ElementState, KeyEvent, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop, EventLoopProxy};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use crate::overlay::EguiHud;
use crate::scene::Scene;

#[derive(Parser)]
#[command(name = "penumbra-viewer", about = "Interactive viewer for the penumbra frame pipeline")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Render configuration (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Key bindings (YAML)
    #[arg(long)]
    bindings: Option<PathBuf>,

    /// Override the shadow map resolution
    #[arg(long)]
    shadow_resolution: Option<u32>,

    /// Frames requested per second by the frame ticker
    #[arg(long, default_value_t = 60)]
    fps: u32,
}

#[derive(Debug, Clone, Copy)]
enum UserEvent {
    /// The ticker wants a frame; it waits on the frame signal.
    Frame,
}

/// GPU-side state, created once the window exists.
struct Graphics {
    window: Arc<Window>,
    system: RenderSystem<WgpuDevice>,
    surface: RenderWindow,
    scene: Scene,
}

impl Graphics {
    fn draw(&mut self, view: &RenderView) -> Result<FrameStats, RenderError> {
        let viewport = self.surface.viewport(0)?;
        self.system.clear_viewport(viewport);
        let mut queue = self.system.create_render_queue();
        self.scene.enqueue(&mut queue);
        let stats = self.system.process_render_queue(&queue, viewport, view)?;
        self.system.swap_buffers()?;
        Ok(stats)
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.system.device_mut().resize(width, height);
        self.surface.resize(width.max(1), height.max(1));
    }
}

struct ViewerApp {
    config: RenderConfig,
    bindings: InputBindings,
    camera: Rc<RefCell<FlyCamera>>,
    gfx: Option<Graphics>,
    proxy: EventLoopProxy<UserEvent>,
    frame: FrameSignal,
    frame_period: Duration,
    keys_held: HashSet<KeyCode>,
    mouse_captured: bool,
    last_frame: Instant,
    fps: FpsCounter,
}

/// Frames per second averaged over half-second windows.
#[derive(Debug, Default)]
struct FpsCounter {
    frames: u32,
    elapsed: f32,
    value: f32,
}

impl FpsCounter {
    fn tick(&mut self, dt: f32) -> f32 {
        self.frames += 1;
        self.elapsed += dt;
        if self.elapsed >= 0.5 {
            self.value = self.frames as f32 / self.elapsed;
            self.frames = 0;
            self.elapsed = 0.0;
        }
        self.value
    }
}

impl ViewerApp {
    fn new(
        config: RenderConfig,
        bindings: InputBindings,
        proxy: EventLoopProxy<UserEvent>,
        fps: u32,
    ) -> Self {
        Self {
            config,
            bindings,
            camera: Rc::new(RefCell::new(FlyCamera::default())),
            gfx: None,
            proxy,
            frame: FrameSignal::new(),
            frame_period: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            keys_held: HashSet::new(),
            mouse_captured: false,
            last_frame: Instant::now(),
            fps: FpsCounter::default(),
        }
    }

    fn create_graphics(&self, event_loop: &ActiveEventLoop) -> Result<Graphics> {
        let attrs = Window::default_attributes()
            .with_title("Penumbra")
            .with_inner_size(PhysicalSize::new(1280u32, 720));
        let window = Arc::new(
            event_loop
                .create_window(attrs)
                .context("failed to create window")?,
        );

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window.clone())
            .context("failed to create surface")?;
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .context("no suitable GPU adapter")?;
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("penumbra_device"),
                required_features: adapter.features() & OPTIONAL_FEATURES,
                required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                memory_hints: Default::default(),
            },
            None,
        ))
        .context("failed to create device")?;

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or(surface_caps.formats.first())
            .copied()
            .context("surface reports no formats")?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        tracing::info!(
            backend = adapter.get_info().backend.to_str(),
            adapter = %adapter.get_info().name,
            "GPU selected"
        );

        let mut device = WgpuDevice::new(device, queue, surface, config);
        let hud = EguiHud::new(device.device(), format);
        device.set_overlay(Box::new(hud));

        let mut system = RenderSystem::new(device, self.config.clone())
            .context("invalid render configuration")?;
        spawn_ticker(
            system.context_gate(),
            self.frame.clone(),
            self.proxy.clone(),
            self.frame_period,
            Duration::from_millis(self.config.context_timeout_ms),
        );
        system
            .initialize()
            .context("failed to initialize the render system")?;

        let mut surface = RenderWindow::new("Penumbra", size.width.max(1), size.height.max(1));
        let viewport = surface.viewport_mut(0)?;
        viewport.set_clear_color(0.1, 0.1, 0.15, 1.0)?;
        let camera: SharedCamera = self.camera.clone();
        viewport.set_camera(Some(camera));

        let scene = Scene::build(&mut system).context("failed to build the demo scene")?;
        Ok(Graphics {
            window,
            system,
            surface,
            scene,
        })
    }

    fn handle_key(&mut self, key: KeyCode, pressed: bool, repeat: bool) {
        if pressed {
            self.keys_held.insert(key);
        } else {
            self.keys_held.remove(&key);
        }
        if !pressed || repeat {
            return;
        }
        let action = self.bindings.action_for(&format!("{key:?}"));
        if action.is_toggle() {
            if let Some(gfx) = &mut self.gfx {
                action.perform(gfx.system.toggles_mut(), 1.0, 0.0);
            }
        }
    }

    fn update(&mut self, dt: f32) {
        let boost = if self.keys_held.contains(&KeyCode::ShiftLeft) {
            3.0
        } else {
            1.0
        };
        let step = dt * boost;
        {
            let mut camera = self.camera.borrow_mut();
            for key in &self.keys_held {
                match key {
                    KeyCode::KeyW => camera.advance(step),
                    KeyCode::KeyS => camera.advance(-step),
                    KeyCode::KeyA => camera.strafe(-step),
                    KeyCode::KeyD => camera.strafe(step),
                    KeyCode::Space => camera.rise(step),
                    KeyCode::ControlLeft => camera.rise(-step),
                    _ => {}
                }
            }
        }
        let Some(gfx) = &mut self.gfx else {
            return;
        };
        for key in &self.keys_held {
            let action = self.bindings.action_for(&format!("{key:?}"));
            if !action.is_toggle() {
                action.perform(gfx.system.toggles_mut(), 1.0, dt);
            }
        }
        gfx.scene.animate(dt);
    }

    fn render_frame(&mut self) {
        if !frame_pending(&self.frame) {
            return;
        }
        let now = Instant::now();
        let dt = (now - self.last_frame).as_secs_f32().min(0.1);
        self.last_frame = now;
        self.update(dt);
        let fps = self.fps.tick(dt);

        let view = self.camera.borrow().render_view();
        if let Some(gfx) = &mut self.gfx {
            let toggles = *gfx.system.toggles();
            gfx.system.set_hud(format!("{fps:.0} fps"));
            gfx.system.set_hud2(format!(
                "{} | box {:.1} | wire {} | shadow map {}",
                if toggles.perspective() { "perspective" } else { "ortho" },
                toggles.box_size(),
                if toggles.wireframe() { "on" } else { "off" },
                if toggles.shadow_debug() { "on" } else { "off" },
            ));
            match gfx.draw(&view) {
                Ok(stats) => tracing::trace!(?stats, "frame"),
                Err(e) => tracing::error!("frame failed: {e}"),
            }
        }
        self.frame.complete();
    }
}

/// Only frames the ticker asked for are drawn. Redraws the windowing system
/// issues on its own (expose, resize) are dropped until the next tick.
fn frame_pending(frame: &FrameSignal) -> bool {
    let pending = frame.is_requested();
    if !pending {
        tracing::trace!("unrequested redraw ignored");
    }
    pending
}

/// Request a frame every `period` once the render context is ready, blocking
/// until each one is drawn.
fn spawn_ticker(
    gate: ContextGate,
    frame: FrameSignal,
    proxy: EventLoopProxy<UserEvent>,
    period: Duration,
    timeout: Duration,
) {
    thread::spawn(move || {
        if let Err(e) = gate.wait_ready(timeout) {
            tracing::error!("frame ticker stopped: {e}");
            return;
        }
        loop {
            let started = Instant::now();
            let mut closed = false;
            let result = frame.request_and_wait(
                || closed = proxy.send_event(UserEvent::Frame).is_err(),
                timeout,
            );
            if closed {
                tracing::debug!("event loop closed; frame ticker exiting");
                return;
            }
            if let Err(e) = result {
                tracing::warn!("{e}");
            }
            if let Some(rest) = period.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }
    });
}

impl ApplicationHandler<UserEvent> for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.gfx.is_some() {
            return;
        }
        match self.create_graphics(event_loop) {
            Ok(gfx) => self.gfx = Some(gfx),
            Err(e) => {
                tracing::error!("{e:#}");
                event_loop.exit();
            }
        }
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: UserEvent) {
        match event {
            UserEvent::Frame => match &self.gfx {
                Some(gfx) => gfx.window.request_redraw(),
                // nothing to draw; release the ticker
                None => self.frame.complete(),
            },
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                if let Some(gfx) = &mut self.gfx {
                    gfx.resize(new_size.width, new_size.height);
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state,
                        repeat,
                        ..
                    },
                ..
            } => {
                if key == KeyCode::Escape {
                    event_loop.exit();
                    return;
                }
                self.handle_key(key, state == ElementState::Pressed, repeat);
            }
            WindowEvent::MouseInput {
                button: MouseButton::Right,
                state,
                ..
            } => {
                self.mouse_captured = state == ElementState::Pressed;
                if let Some(gfx) = &self.gfx {
                    gfx.window.set_cursor_visible(!self.mouse_captured);
                }
            }
            WindowEvent::RedrawRequested => self.render_frame(),
            _ => {}
        }
    }

    fn device_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        _device_id: winit::event::DeviceId,
        event: DeviceEvent,
    ) {
        if let DeviceEvent::MouseMotion { delta } = event {
            if self.mouse_captured {
                self.camera
                    .borrow_mut()
                    .rotate(delta.0 as f32, delta.1 as f32);
            }
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut gfx) = self.gfx.take() {
            gfx.scene.release(&mut gfx.system);
            gfx.surface.remove_all_viewports();
            gfx.system.shutdown();
        }
        self.frame.complete();
        tracing::info!("viewer shut down");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let mut config = match &cli.config {
        Some(path) => RenderConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => RenderConfig::default(),
    };
    if let Some(resolution) = cli.shadow_resolution {
        config.shadows.resolution = resolution;
        config.validate()?;
    }
    let bindings = match &cli.bindings {
        Some(path) => InputBindings::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => InputBindings::default(),
    };

    tracing::info!("penumbra-viewer starting");

    let event_loop = EventLoop::<UserEvent>::with_user_event().build()?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = ViewerApp::new(config, bindings, event_loop.create_proxy(), cli.fps);
    event_loop.run_app(&mut app)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_requested_frames_are_drawn() {
        let frame = FrameSignal::new();
        assert!(!frame_pending(&frame));
        frame.request();
        assert!(frame_pending(&frame));
        frame.complete();
        assert!(!frame_pending(&frame));
    }
}
