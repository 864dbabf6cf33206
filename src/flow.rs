//! Application event loop.
//!
//! [`run`] opens a window, loads the requested meshes into a [`Scene`] and
//! hands control to winit. The [`RenderScheduler`] decides when a tick is due;
//! between ticks the loop parks in `ControlFlow::WaitUntil` so waiting for the
//! next frame never blocks input handling. [`run_headless`] drives the same
//! scheduler against the recording backend on a tokio timer instead.
//!
//! # Controls
//!
//! - WASD, Space, Left Shift move the camera; drag with the right mouse button to look
//! - F1 pauses and resumes rendering
//! - F2 duplicates the newest instance, Delete removes it
//! - F5 writes a scene snapshot to the configured scene file
//! - Escape quits

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use instant::Instant;
use winit::{
    application::ApplicationHandler,
    event::{DeviceEvent, DeviceId, ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::Window,
};

use crate::{
    backend::{RenderBackend, headless::HeadlessBackend},
    camera::{Camera, CameraController, CameraInput, Projection},
    config::EngineConfig,
    context::Context,
    data_structures::{
        geometry::{GeometryRecord, SourceId},
        scene::Scene,
    },
    resources,
    scheduler::RenderScheduler,
};

/// Everything that exists once a window does.
struct Viewer {
    ctx: Context,
    scene: Scene,
    camera: Camera,
    controller: CameraController,
    projection: Projection,
    scheduler: RenderScheduler,
    last_tick: Instant,
}

impl Viewer {
    fn tick(&mut self) {
        let now = Instant::now();
        if !self.scheduler.is_due(now) {
            return;
        }
        let dt = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        let input = self.controller.take_input(dt);
        if let Some(report) = self.scheduler.tick(
            &mut self.scene,
            &mut self.camera,
            &input,
            &self.projection,
            &mut self.ctx,
        ) {
            log::trace!("tick: {report:?}");
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.ctx.resize(width, height);
        self.projection.resize(width, height);
    }

    fn newest(&self) -> Option<String> {
        self.scene.instances().last().map(|i| i.name().to_string())
    }
}

pub struct App {
    async_runtime: tokio::runtime::Runtime,
    config: EngineConfig,
    files: Vec<PathBuf>,
    viewer: Option<Viewer>,
    error: Option<anyhow::Error>,
}

impl App {
    fn new(config: EngineConfig, files: Vec<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self {
            async_runtime: tokio::runtime::Runtime::new()?,
            config,
            files,
            viewer: None,
            error: None,
        })
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<Viewer> {
        let window_attributes = Window::default_attributes().with_title(&self.config.window_title);
        let window = Arc::new(event_loop.create_window(window_attributes)?);
        let size = window.inner_size();

        let clear_colour = self.config.clear_colour;
        let mut ctx = self
            .async_runtime
            .block_on(Context::new(window, clear_colour))?;

        let mut scene = Scene::new(self.config.normals);
        populate(&self.async_runtime, &self.config, &self.files, &mut scene, &mut ctx);

        let mut scheduler = RenderScheduler::new(self.config.target_fps);
        scheduler.enable(Instant::now());
        Ok(Viewer {
            ctx,
            scene,
            camera: Camera::new(self.config.initial_camera),
            controller: CameraController::new(
                self.config.move_speed,
                self.config.rotate_sensitivity,
            ),
            projection: Projection::new(
                size.width,
                size.height,
                self.config.fov_y_degrees,
                self.config.near,
                self.config.far,
            ),
            scheduler,
            last_tick: Instant::now(),
        })
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, key: KeyCode) {
        let Some(viewer) = self.viewer.as_mut() else {
            return;
        };
        match key {
            KeyCode::Escape => event_loop.exit(),
            KeyCode::F1 => {
                if viewer.scheduler.is_enabled() {
                    viewer.scheduler.disable();
                } else {
                    viewer.scheduler.enable(Instant::now());
                }
            }
            KeyCode::F2 => {
                if let Some(name) = viewer.newest() {
                    match viewer.scene.duplicate(&name) {
                        Ok(copy) => log::info!("{name} duplicated as {copy}"),
                        Err(e) => log::warn!("{e}"),
                    }
                }
            }
            KeyCode::Delete => {
                if let Some(name) = viewer.newest() {
                    if let Err(e) = viewer.scene.remove(&name) {
                        log::warn!("{e}");
                    }
                }
            }
            KeyCode::F5 => match &self.config.scene {
                Some(path) => {
                    let snapshot = viewer.scene.snapshot();
                    match self
                        .async_runtime
                        .block_on(resources::save_snapshot(path, &snapshot))
                    {
                        Ok(()) => log::info!("scene saved to {}", path.display()),
                        Err(e) => log::error!("could not save scene: {e:#}"),
                    }
                }
                None => log::warn!("no scene file configured"),
            },
            _ => {}
        }
    }
}

/// Spawns the configured snapshot and every loaded file into `scene`.
fn populate(
    runtime: &tokio::runtime::Runtime,
    config: &EngineConfig,
    files: &[PathBuf],
    scene: &mut Scene,
    backend: &mut dyn RenderBackend,
) {
    if let Some(path) = &config.scene {
        match runtime.block_on(resources::load_snapshot(path)) {
            Ok(snapshot) => {
                let load = |source: &SourceId| {
                    runtime.block_on(resources::mesh::load_obj(Path::new(source.as_str())))
                };
                match scene.restore(&snapshot, load, backend) {
                    Ok(n) => log::info!("restored {n} instances from {}", path.display()),
                    Err(e) => log::error!("could not restore {}: {e}", path.display()),
                }
            }
            Err(e) => log::warn!("scene {} not restored: {e:#}", path.display()),
        }
    }

    let records: Vec<GeometryRecord> = runtime.block_on(resources::load_all(files));
    for record in &records {
        if let Err(e) = scene.spawn(record, None, backend) {
            log::error!("could not add {}: {e}", record.source);
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.viewer.is_some() {
            return;
        }
        match self.init(event_loop) {
            Ok(viewer) => self.viewer = Some(viewer),
            Err(e) => {
                log::error!("initialisation failed: {e:#}");
                self.error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _device_id: DeviceId, event: DeviceEvent) {
        if let (Some(viewer), DeviceEvent::MouseMotion { delta: (dx, dy) }) = (&mut self.viewer, event) {
            viewer.controller.handle_mouse(dx, dy);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let Some(viewer) = self.viewer.as_mut() else {
            return;
        };
        if viewer.controller.handle_window_events(&event) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => viewer.resize(size.width, size.height),
            WindowEvent::RedrawRequested => viewer.tick(),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => self.handle_key(event_loop, key),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(viewer) = self.viewer.as_ref() else {
            return;
        };
        match viewer.scheduler.next_tick() {
            Some(next) => {
                if Instant::now() >= next {
                    viewer.ctx.window().request_redraw();
                }
                event_loop.set_control_flow(ControlFlow::WaitUntil(next));
            }
            None => event_loop.set_control_flow(ControlFlow::Wait),
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(viewer) = self.viewer.as_mut() {
            viewer.scheduler.disable();
            viewer.scene.clear(&mut viewer.ctx);
        }
    }
}

/// Opens the viewer window and runs until it is closed.
pub fn run(config: EngineConfig, files: Vec<PathBuf>) -> anyhow::Result<()> {
    if let Err(e) = env_logger::try_init() {
        eprintln!("Warning: Could not initialize logger: {e}");
    }

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config, files)?;
    event_loop.run_app(&mut app)?;
    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Runs `ticks` paced ticks without a window and returns the recording
/// backend, scene and camera for inspection.
pub fn run_headless(
    config: EngineConfig,
    files: Vec<PathBuf>,
    ticks: u32,
) -> anyhow::Result<(HeadlessBackend, Scene, Camera)> {
    let runtime = tokio::runtime::Runtime::new()?;
    let mut backend = HeadlessBackend::new();
    let mut scene = Scene::new(config.normals);
    populate(&runtime, &config, &files, &mut scene, &mut backend);

    let mut camera = Camera::new(config.initial_camera);
    let projection = Projection::new(1280, 720, config.fov_y_degrees, config.near, config.far);
    let mut scheduler = RenderScheduler::new(config.target_fps);

    runtime.block_on(async {
        scheduler.enable(Instant::now());
        for _ in 0..ticks {
            let Some(next) = scheduler.next_tick() else {
                break;
            };
            tokio::time::sleep_until(next.into()).await;
            scheduler.tick(
                &mut scene,
                &mut camera,
                &CameraInput::default(),
                &projection,
                &mut backend,
            );
        }
        scheduler.disable();
    });
    log::info!(
        "headless run finished: {} ticks, {} skipped",
        scheduler.ticks(),
        scheduler.skipped()
    );
    Ok((backend, scene, camera))
}
