//! [`FrameBackend`] over a real Vulkan device and window surface.
//!
//! # Resource destruction order
//!
//! Fields drop in declaration order after [`Drop::drop`] has waited for the
//! device to go idle:
//! 1. Passes (pipelines, layouts, the shadow target)
//! 2. Per-frame uniform buffers, descriptor pool and set layouts
//! 3. Command pool and uploaded meshes
//! 4. Presentation surface (swapchain, depth, framebuffers, sync objects)
//! 5. Device, window surface, instance

use std::mem::size_of;
use std::sync::Arc;

use ash::vk;
use tracing::{error, info};

use lumen_core::RendererConfig;
use lumen_platform::{Surface, SurfaceHost, Window};
use lumen_rhi::buffer::{Buffer, BufferUsage};
use lumen_rhi::command::{CommandBuffer, CommandPool};
use lumen_rhi::descriptor::{
    BindingSetShape, DescriptorPool, DescriptorSetLayout, DescriptorWriter, PoolSize, ResourceKind,
};
use lumen_rhi::device::Device;
use lumen_rhi::instance::{Instance, InstanceDesc};
use lumen_rhi::physical_device::select_physical_device;
use lumen_rhi::swapchain::{AcquireOutcome, PresentOutcome, PresentationSurface};
use lumen_rhi::sync::MAX_FRAMES_IN_FLIGHT;
use lumen_rhi::{RhiError, RhiResult};
use lumen_scene::MeshHandle;

use crate::backend::{FrameBackend, FrameRecording, MainTarget, PassRecorders};
use crate::mesh::{GpuMesh, MeshData, MeshLibrary};
use crate::passes::{GeometryPass, LightPass, ShadowPass};
use crate::ubo::{ObjectUbo, SceneUbo};

/// Set 0: per-frame object and scene uniforms.
pub fn global_set_shape() -> RhiResult<BindingSetShape> {
    BindingSetShape::builder()
        .binding(0, ResourceKind::UniformBuffer, vk::ShaderStageFlags::ALL_GRAPHICS, 1)
        .binding(1, ResourceKind::UniformBuffer, vk::ShaderStageFlags::ALL_GRAPHICS, 1)
        .build()
}

/// Set 1: the shadow map.
pub fn shadow_set_shape() -> RhiResult<BindingSetShape> {
    BindingSetShape::builder()
        .binding(
            0,
            ResourceKind::CombinedImageSampler,
            vk::ShaderStageFlags::FRAGMENT,
            1,
        )
        .build()
}

/// One global set per frame slot plus the shared shadow set.
pub const DESCRIPTOR_SET_COUNT: u32 = MAX_FRAMES_IN_FLIGHT as u32 + 1;

pub fn descriptor_pool_sizes() -> [PoolSize; 2] {
    [
        PoolSize::new(ResourceKind::UniformBuffer, 2 * MAX_FRAMES_IN_FLIGHT as u32),
        PoolSize::new(ResourceKind::CombinedImageSampler, 1),
    ]
}

/// Uniform buffers and the global set of one frame slot.
struct FrameResources {
    object_ubo: Buffer,
    scene_ubo: Buffer,
    global_set: vk::DescriptorSet,
}

pub struct VulkanBackend {
    shadow_pass: ShadowPass,
    geometry_pass: GeometryPass,
    light_pass: LightPass,
    frames: Vec<FrameResources>,
    shadow_set: vk::DescriptorSet,
    descriptor_pool: DescriptorPool,
    global_layout: DescriptorSetLayout,
    shadow_layout: DescriptorSetLayout,
    command_buffers: Vec<CommandBuffer>,
    command_pool: CommandPool,
    meshes: MeshLibrary,
    /// Only `None` while a rebuild is in progress.
    presentation: Option<PresentationSurface>,
    prefer_mailbox: bool,
    device: Arc<Device>,
    surface: Surface,
    instance: Instance,
}

impl VulkanBackend {
    /// Creates the instance, device and every per-session resource for
    /// `window`.
    pub fn new(window: &Window, config: &RendererConfig) -> RhiResult<Self> {
        let extent = window.drawable_extent();
        info!(
            "Initializing Vulkan backend ({}x{})",
            extent.width, extent.height
        );

        let surface_extensions = window
            .required_extensions()
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;
        let instance = Instance::new(&InstanceDesc {
            application_name: c"lumen",
            enable_validation: config.renderer.validation,
            surface_extensions: &surface_extensions,
        })?;

        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;
        let physical_device =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical_device)?;

        let presentation = PresentationSurface::new(
            &instance,
            device.clone(),
            surface.handle(),
            extent,
            None,
            config.renderer.prefer_mailbox,
        )?;

        let global_layout = DescriptorSetLayout::new(device.clone(), global_set_shape()?)?;
        let shadow_layout = DescriptorSetLayout::new(device.clone(), shadow_set_shape()?)?;
        let set_layouts = [global_layout.handle(), shadow_layout.handle()];

        let shadow_pass = ShadowPass::new(device.clone(), config, &set_layouts)?;
        let geometry_pass = GeometryPass::new(
            device.clone(),
            presentation.render_pass(),
            &config.shaders,
            &set_layouts,
        )?;
        let light_pass = LightPass::new(
            device.clone(),
            presentation.render_pass(),
            &config.shaders,
            &set_layouts,
        )?;

        let mut descriptor_pool = DescriptorPool::new(
            device.clone(),
            DESCRIPTOR_SET_COUNT,
            &descriptor_pool_sizes(),
        )?;

        let frames = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| Self::create_frame_resources(&device, &mut descriptor_pool, &global_layout))
            .collect::<RhiResult<Vec<_>>>()?;

        let shadow_set = descriptor_pool.allocate(&shadow_layout)?;
        DescriptorWriter::new(shadow_layout.shape())
            .image(0, shadow_pass.image_info()?)
            .commit(&device, shadow_set)?;

        let command_pool = CommandPool::new(device.clone(), device.queue_families().graphics()?)?;
        let command_buffers = command_pool.allocate(MAX_FRAMES_IN_FLIGHT as u32)?;

        info!("Vulkan backend initialized");

        Ok(Self {
            shadow_pass,
            geometry_pass,
            light_pass,
            frames,
            shadow_set,
            descriptor_pool,
            global_layout,
            shadow_layout,
            command_buffers,
            command_pool,
            meshes: MeshLibrary::new(),
            presentation: Some(presentation),
            prefer_mailbox: config.renderer.prefer_mailbox,
            device,
            surface,
            instance,
        })
    }

    fn create_frame_resources(
        device: &Arc<Device>,
        pool: &mut DescriptorPool,
        layout: &DescriptorSetLayout,
    ) -> RhiResult<FrameResources> {
        let object_ubo = Buffer::new(
            device.clone(),
            BufferUsage::Uniform,
            size_of::<ObjectUbo>() as vk::DeviceSize,
        )?;
        let scene_ubo = Buffer::new(
            device.clone(),
            BufferUsage::Uniform,
            size_of::<SceneUbo>() as vk::DeviceSize,
        )?;
        object_ubo.write_pod(&ObjectUbo::default())?;
        scene_ubo.write_pod(&SceneUbo::default())?;

        let global_set = pool.allocate(layout)?;
        DescriptorWriter::new(layout.shape())
            .buffer(0, object_ubo.descriptor_info())
            .buffer(1, scene_ubo.descriptor_info())
            .commit(device, global_set)?;

        Ok(FrameResources {
            object_ubo,
            scene_ubo,
            global_set,
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Uploads `data` and returns the handle scene nodes refer to it by.
    pub fn upload_mesh(&mut self, data: &MeshData) -> RhiResult<MeshHandle> {
        let mesh = GpuMesh::upload(self.device.clone(), data)?;
        Ok(self.meshes.insert(mesh))
    }

    fn presentation(&self) -> RhiResult<&PresentationSurface> {
        self.presentation
            .as_ref()
            .ok_or_else(|| RhiError::SwapchainError("presentation surface missing".to_string()))
    }

    fn presentation_mut(&mut self) -> RhiResult<&mut PresentationSurface> {
        self.presentation
            .as_mut()
            .ok_or_else(|| RhiError::SwapchainError("presentation surface missing".to_string()))
    }

    fn frame(&self, slot: usize) -> RhiResult<&FrameResources> {
        self.frames
            .get(slot)
            .ok_or_else(|| RhiError::InvalidHandle(format!("frame slot {} out of range", slot)))
    }

    fn command_buffer(&self, slot: usize) -> RhiResult<&CommandBuffer> {
        self.command_buffers
            .get(slot)
            .ok_or_else(|| RhiError::InvalidHandle(format!("frame slot {} out of range", slot)))
    }
}

impl FrameBackend for VulkanBackend {
    fn surface_extent(&self) -> vk::Extent2D {
        self.presentation
            .as_ref()
            .map_or(vk::Extent2D::default(), PresentationSurface::extent)
    }

    fn acquire(&mut self, slot: usize) -> RhiResult<AcquireOutcome> {
        self.presentation()?.acquire(slot)
    }

    fn begin_commands(&mut self, slot: usize) -> RhiResult<()> {
        let command_buffer = self.command_buffer(slot)?;
        command_buffer.reset()?;
        command_buffer.begin()
    }

    fn write_uniforms(
        &mut self,
        slot: usize,
        object: &ObjectUbo,
        scene: &SceneUbo,
    ) -> RhiResult<()> {
        let frame = self.frame(slot)?;
        frame.object_ubo.write_pod(object)?;
        frame.scene_ubo.write_pod(scene)
    }

    fn recording(&mut self, slot: usize, image_index: u32) -> RhiResult<FrameRecording<'_>> {
        let presentation = self.presentation()?;
        let target = MainTarget {
            render_pass: presentation.render_pass(),
            framebuffer: presentation.framebuffer(image_index)?,
            extent: presentation.extent(),
        };
        let passes = PassRecorders {
            shadow: self.shadow_pass.recorder(),
            geometry: self.geometry_pass.recorder(),
            light: self.light_pass.recorder(),
        };
        let descriptor_sets = [self.frame(slot)?.global_set, self.shadow_set];

        let slots = self.command_buffers.len();
        let encoder = self.command_buffers.get_mut(slot).ok_or_else(|| {
            RhiError::InvalidHandle(format!("frame slot {} out of range ({})", slot, slots))
        })?;

        Ok(FrameRecording {
            encoder,
            meshes: &self.meshes,
            passes,
            target,
            descriptor_sets,
        })
    }

    fn end_commands(&mut self, slot: usize) -> RhiResult<()> {
        self.command_buffer(slot)?.end()
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome> {
        let command_buffer = self.command_buffer(slot)?.handle();
        self.presentation_mut()?
            .submit(slot, command_buffer, image_index)
    }

    fn rebuild(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
        self.device.wait_idle()?;

        let previous = self
            .presentation
            .take()
            .ok_or_else(|| RhiError::SwapchainError("presentation surface missing".to_string()))?;
        let previous = Arc::new(previous);

        match PresentationSurface::new(
            &self.instance,
            self.device.clone(),
            self.surface.handle(),
            extent,
            Some(previous.clone()),
            self.prefer_mailbox,
        ) {
            Ok(next) => {
                drop(previous);
                self.presentation = Some(next);
                Ok(())
            }
            Err(e) => {
                // Keep the old generation so teardown still finds it.
                self.presentation = Arc::try_unwrap(previous).ok();
                Err(e)
            }
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!(
                "Failed to wait for device idle during backend drop: {:?}",
                e
            );
        }
        info!("Vulkan backend destroyed");
    }
}
