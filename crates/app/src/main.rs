//! Lumen viewer.
//!
//! Renders a small shadowed scene lit by orbiting point lights. Reads
//! `lumen.toml` from the working directory when present.

mod controller;
mod demo;

use anyhow::{Context, Result};
use glam::Vec3;
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::PhysicalKey;
use winit::window::WindowId;

use lumen_core::{RendererConfig, Timer};
use lumen_platform::{InputState, KeyCode, Window};
use lumen_renderer::{FrameOrchestrator, FrameSettings, MeshData, VulkanBackend};
use lumen_scene::{Camera, IdAllocator, SceneGraph};

use controller::{KeyboardController, Viewer};
use demo::{CAMERA_START, DemoMeshes};

const CONFIG_PATH: &str = "lumen.toml";

struct App {
    config: RendererConfig,
    // Dropped before the window it presents into.
    frames: Option<FrameOrchestrator<VulkanBackend>>,
    window: Option<Window>,
    scene: SceneGraph,
    ids: IdAllocator,
    camera: Camera,
    viewer: Viewer,
    controller: KeyboardController,
    input: InputState,
    timer: Timer,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        Self {
            config,
            frames: None,
            window: None,
            scene: SceneGraph::new(),
            ids: IdAllocator::new(),
            camera: Camera::new(),
            viewer: Viewer::at(CAMERA_START),
            controller: KeyboardController::default(),
            input: InputState::new(),
            timer: Timer::new(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window =
            Window::new(event_loop, &self.config.window).context("Failed to create window")?;
        let mut backend =
            VulkanBackend::new(&window, &self.config).context("Failed to initialize Vulkan")?;

        let meshes = DemoMeshes {
            cube: backend
                .upload_mesh(&MeshData::cube(Vec3::splat(0.8)))
                .context("Failed to upload cube mesh")?,
            plane: backend
                .upload_mesh(&MeshData::plane(Vec3::splat(0.6)))
                .context("Failed to upload ground mesh")?,
        };
        demo::populate(&mut self.scene, &mut self.ids, &meshes)
            .context("Failed to build the demo scene")?;
        info!("Scene ready with {} nodes", self.scene.len());

        self.frames = Some(FrameOrchestrator::new(
            backend,
            FrameSettings::from(&self.config),
        ));
        self.window = Some(window);
        self.timer.reset();
        Ok(())
    }

    fn redraw(&mut self) -> Result<()> {
        let (Some(window), Some(frames)) = (self.window.as_mut(), self.frames.as_mut()) else {
            return Ok(());
        };

        let delta = self.timer.delta_secs();
        self.controller.update(&self.input, delta, &mut self.viewer);
        self.input.begin_frame();

        // The projection is set by the frame loop once the surface is acquired.
        self.viewer.apply(&mut self.camera);

        frames
            .draw_frame(window, &mut self.scene, &mut self.camera, delta)
            .context("Frame failed")?;
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        match self.init(event_loop) {
            Ok(()) => info!("Initialization complete, entering main loop"),
            Err(e) => {
                error!("{:#}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                if let Some(window) = self.window.as_mut() {
                    window.request_close();
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = self.window.as_mut() {
                    window.resize(size.width, size.height);
                }
            }
            WindowEvent::Focused(false) => self.input.release_all(),
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    if event.state.is_pressed() {
                        self.input.on_key_pressed(key);
                        if key == KeyCode::Escape
                            && let Some(window) = self.window.as_mut()
                        {
                            window.request_close();
                        }
                    } else {
                        self.input.on_key_released(key);
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    error!("{:#}", e);
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        if window.should_close() {
            info!("Close requested, shutting down");
            // Release the GPU before the window goes away.
            self.frames = None;
            event_loop.exit();
        } else {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    lumen_core::init_logging();
    info!("Starting Lumen");

    let config = RendererConfig::load_or_default(CONFIG_PATH)
        .with_context(|| format!("Failed to load {}", CONFIG_PATH))?;

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    Ok(())
}
