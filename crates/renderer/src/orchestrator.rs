//! Per-frame state machine: acquire, record, submit, rebuild.

use ash::vk;
use tracing::{debug, info, warn};

use lumen_core::RendererConfig;
use lumen_platform::SurfaceHost;
use lumen_rhi::RhiResult;
use lumen_rhi::swapchain::{AcquireOutcome, PresentOutcome};
use lumen_rhi::sync::slot_for_frame;
use lumen_scene::{Camera, SceneGraph};

use crate::backend::{FrameBackend, FrameDraws};
use crate::lights::{ShadowProjection, object_uniforms, orbit_lights, scene_uniforms};

/// Perspective applied to the camera once the frame's surface is known.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Lens {
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Lens {
    fn default() -> Self {
        Self {
            fov_y: 90f32.to_radians(),
            near: 0.01,
            far: 1000.0,
        }
    }
}

impl Lens {
    pub fn apply(&self, camera: &mut Camera, aspect_ratio: f32) {
        camera.set_perspective(self.fov_y, aspect_ratio, self.near, self.far);
    }
}

/// Frame-independent parameters of the frame loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameSettings {
    pub clear_color: [f32; 4],
    pub shadow: ShadowProjection,
    pub lens: Lens,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            clear_color: [0.01, 0.01, 0.01, 1.0],
            shadow: ShadowProjection::default(),
            lens: Lens::default(),
        }
    }
}

impl From<&RendererConfig> for FrameSettings {
    fn from(config: &RendererConfig) -> Self {
        Self {
            clear_color: config.renderer.clear_color,
            shadow: ShadowProjection {
                near: config.shadow.light_near,
                far: config.shadow.light_far,
            },
            lens: Lens::default(),
        }
    }
}

/// What [`FrameOrchestrator::draw_frame`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Rendered(FrameDraws),
    /// Nothing was submitted: the surface was stale or could not be rebuilt
    /// yet.
    Skipped,
}

pub struct FrameOrchestrator<B: FrameBackend> {
    backend: B,
    settings: FrameSettings,
    /// Submissions since start; the slot cycles with it.
    frames_submitted: u64,
    frame_started: bool,
    /// Set while the window has no drawable area.
    rebuild_pending: bool,
}

impl<B: FrameBackend> FrameOrchestrator<B> {
    pub fn new(backend: B, settings: FrameSettings) -> Self {
        Self {
            backend,
            settings,
            frames_submitted: 0,
            frame_started: false,
            rebuild_pending: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn settings(&self) -> &FrameSettings {
        &self.settings
    }

    /// Slot the next frame records into.
    pub fn frame_slot(&self) -> usize {
        slot_for_frame(self.frames_submitted)
    }

    pub fn is_frame_in_progress(&self) -> bool {
        self.frame_started
    }

    pub fn is_rebuild_pending(&self) -> bool {
        self.rebuild_pending
    }

    /// Aspect ratio of the presentation surface, 1.0 while it is empty.
    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.backend.surface_extent();
        if extent.height == 0 {
            1.0
        } else {
            extent.width as f32 / extent.height as f32
        }
    }

    /// Animates the lights by `delta_secs`, then renders and presents one
    /// frame of `scene` seen through `camera`. The camera's projection is
    /// reset from the settings' lens and the acquired surface's aspect ratio.
    ///
    /// # Errors
    ///
    /// Any error is fatal: the loop should stop and the backend be dropped.
    pub fn draw_frame(
        &mut self,
        host: &mut dyn SurfaceHost,
        scene: &mut SceneGraph,
        camera: &mut Camera,
        delta_secs: f32,
    ) -> RhiResult<FrameStatus> {
        if self.rebuild_pending && !self.rebuild(host)? {
            return Ok(FrameStatus::Skipped);
        }

        let slot = self.frame_slot();
        let (image_index, suboptimal) = match self.backend.acquire(slot)? {
            AcquireOutcome::Ready { image_index } => (image_index, false),
            AcquireOutcome::Suboptimal { image_index } => (image_index, true),
            AcquireOutcome::Stale => {
                debug!("Surface stale on acquire");
                self.rebuild(host)?;
                return Ok(FrameStatus::Skipped);
            }
        };

        self.begin_frame()?;

        let aspect_ratio = self.aspect_ratio();
        self.settings.lens.apply(camera, aspect_ratio);

        orbit_lights(scene, delta_secs);
        let object = object_uniforms(camera);
        let lighting = scene_uniforms(scene, camera, aspect_ratio, self.settings.shadow);
        self.backend.write_uniforms(slot, &object, &lighting)?;

        let draws = self
            .backend
            .recording(slot, image_index)?
            .record(scene, camera.position(), self.settings.clear_color);

        let outcome = self.end_frame(image_index)?;
        let resized = host.take_resized();
        if resized || suboptimal || outcome.needs_rebuild() {
            debug!(
                "Rebuilding after present (resized: {}, suboptimal: {}, outcome: {:?})",
                resized, suboptimal, outcome
            );
            self.rebuild(host)?;
        }

        self.frames_submitted += 1;
        Ok(FrameStatus::Rendered(draws))
    }

    /// Starts recording into the current slot's command buffer.
    ///
    /// # Panics
    ///
    /// Panics if a frame is already in progress.
    pub fn begin_frame(&mut self) -> RhiResult<()> {
        assert!(
            !self.frame_started,
            "Cannot begin a frame while one is already in progress"
        );
        self.backend.begin_commands(self.frame_slot())?;
        self.frame_started = true;
        Ok(())
    }

    /// Finishes recording and submits the current slot for `image_index`.
    ///
    /// # Panics
    ///
    /// Panics if no frame is in progress.
    pub fn end_frame(&mut self, image_index: u32) -> RhiResult<PresentOutcome> {
        assert!(
            self.frame_started,
            "Cannot end a frame that was never begun"
        );
        self.frame_started = false;
        let slot = self.frame_slot();
        self.backend.end_commands(slot)?;
        self.backend.submit(slot, image_index)
    }

    /// Rebuilds the surface for the host's current extent. Returns `false`
    /// when the extent is empty and the rebuild stays pending. A successful
    /// rebuild consumes the host's resize flag.
    fn rebuild(&mut self, host: &mut dyn SurfaceHost) -> RhiResult<bool> {
        let extent = host.drawable_extent();
        if is_empty(extent) {
            if !self.rebuild_pending {
                warn!("Window has no drawable area, deferring surface rebuild");
            }
            self.rebuild_pending = true;
            return Ok(false);
        }

        self.backend.rebuild(extent)?;
        host.take_resized();
        self.rebuild_pending = false;
        info!("Surface rebuilt at {}x{}", extent.width, extent.height);
        Ok(true)
    }
}

fn is_empty(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}
