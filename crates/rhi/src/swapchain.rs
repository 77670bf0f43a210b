//! The presentation surface: swapchain, its render pass and framebuffers.
//!
//! [`PresentationSurface`] owns everything tied to one swapchain generation:
//! - the swapchain images and their views
//! - one depth image shared by every framebuffer
//! - a render pass clearing color and depth, ending in `PRESENT_SRC_KHR`
//! - one framebuffer per swapchain image
//! - per-slot [`FrameSync`] and the fence last submitted against each image
//!
//! A rebuild (resize, out-of-date) creates a new surface from the old one.
//! The old one is kept alive as the predecessor until the new surface has
//! presented once, and must have negotiated the same formats.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use lumen_rhi::{device::Device, instance::Instance, vk};
//! use lumen_rhi::swapchain::{AcquireOutcome, PresentationSurface};
//!
//! # fn example(instance: &Instance, device: Arc<Device>, surface: vk::SurfaceKHR, cmd: vk::CommandBuffer) -> lumen_rhi::RhiResult<()> {
//! let extent = vk::Extent2D { width: 800, height: 600 };
//! let mut presentation = PresentationSurface::new(instance, device, surface, extent, None, true)?;
//!
//! if let AcquireOutcome::Ready { image_index } = presentation.acquire(0)? {
//!     // record into `cmd` using presentation.framebuffer(image_index)
//!     presentation.submit(0, cmd, image_index)?;
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::{Image, ImageDesc};
use crate::instance::Instance;
use crate::sync::{FrameSync, MAX_FRAMES_IN_FLIGHT};

/// Depth formats tried for the shared depth image, in order.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Surface capabilities, formats and present modes of a device/surface pair.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> Result<Self, RhiError> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count {}..{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            capabilities.max_image_count
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// At least one format and one present mode.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Color and depth formats negotiated by a surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceFormats {
    pub image: vk::Format,
    pub depth: vk::Format,
}

impl SurfaceFormats {
    /// True when `other` has the same image and depth formats.
    pub fn compare_formats(&self, other: &SurfaceFormats) -> bool {
        self == other
    }
}

/// A rebuilt surface must keep its predecessor's formats; pipelines built
/// against the old render pass stay valid only then.
pub fn ensure_compatible(previous: &SurfaceFormats, next: &SurfaceFormats) -> RhiResult<()> {
    if previous.compare_formats(next) {
        Ok(())
    } else {
        Err(RhiError::FormatMismatch {
            previous_image: previous.image,
            image: next.image,
            previous_depth: previous.depth,
            depth: next.depth,
        })
    }
}

/// Result of acquiring the next image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready { image_index: u32 },
    /// Usable, but the surface should be rebuilt after this frame.
    Suboptimal { image_index: u32 },
    /// The swapchain no longer matches the window. Nothing was acquired.
    Stale,
}

/// Result of submitting and presenting a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    Stale,
}

impl PresentOutcome {
    pub fn needs_rebuild(self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }

    /// Whether the image reached the screen, so the previous generation is
    /// no longer referenced by the presentation engine.
    pub fn releases_predecessor(self) -> bool {
        self != PresentOutcome::Stale
    }
}

/// Takes the retained previous generation out of `predecessor` once
/// `outcome` allows it.
pub fn release_after_present<T>(predecessor: &mut Option<T>, outcome: PresentOutcome) -> Option<T> {
    if outcome.releases_predecessor() {
        predecessor.take()
    } else {
        None
    }
}

/// Tracks which in-flight fence last rendered into each swapchain image.
///
/// Acquire order is up to the driver, so two frame slots can land on the
/// same image; the later one has to wait for the earlier one's fence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageFences {
    fences: Vec<vk::Fence>,
}

impl ImageFences {
    pub fn new(image_count: usize) -> Self {
        Self {
            fences: vec![vk::Fence::null(); image_count],
        }
    }

    /// Records `fence` as the owner of `image_index` and returns the fence
    /// of a different slot that still has to finish with the image first.
    pub fn claim(&mut self, image_index: u32, fence: vk::Fence) -> RhiResult<Option<vk::Fence>> {
        let count = self.fences.len();
        let owner = self.fences.get_mut(image_index as usize).ok_or_else(|| {
            RhiError::InvalidHandle(format!(
                "image index {} out of range ({} images)",
                image_index, count
            ))
        })?;

        let previous = std::mem::replace(owner, fence);
        Ok((previous != vk::Fence::null() && previous != fence).then_some(previous))
    }

    pub fn owner(&self, image_index: u32) -> Option<vk::Fence> {
        self.fences
            .get(image_index as usize)
            .copied()
            .filter(|fence| *fence != vk::Fence::null())
    }
}

/// Maps `vkAcquireNextImageKHR` results; anything but out-of-date is an error.
pub fn classify_acquire(result: Result<(u32, bool), vk::Result>) -> RhiResult<AcquireOutcome> {
    match result {
        Ok((image_index, false)) => Ok(AcquireOutcome::Ready { image_index }),
        Ok((image_index, true)) => Ok(AcquireOutcome::Suboptimal { image_index }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
        Err(e) => Err(RhiError::SwapchainError(format!(
            "failed to acquire swapchain image: {:?}",
            e
        ))),
    }
}

/// Maps `vkQueuePresentKHR` results the same way.
pub fn classify_present(result: Result<bool, vk::Result>) -> RhiResult<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) => Ok(PresentOutcome::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
        Err(e) => Err(RhiError::SwapchainError(format!(
            "failed to present swapchain image: {:?}",
            e
        ))),
    }
}

/// One swapchain generation and everything rendered into it.
pub struct PresentationSurface {
    device: Arc<Device>,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    formats: SurfaceFormats,
    color_space: vk::ColorSpaceKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    depth: Image,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    frame_sync: Vec<FrameSync>,
    images_in_flight: ImageFences,
    /// Previous generation, released after the first successful present.
    predecessor: Option<Arc<PresentationSurface>>,
}

impl PresentationSurface {
    /// Creates a surface for `window_extent`. Passing the previous generation
    /// as `predecessor` hands its swapchain to the driver for reuse and
    /// requires the new formats to match it.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        window_extent: vk::Extent2D,
        predecessor: Option<Arc<PresentationSurface>>,
        prefer_mailbox: bool,
    ) -> RhiResult<Self> {
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        let support =
            SwapchainSupportDetails::query(device.physical_device(), surface, &surface_loader)?;
        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "surface reports no formats or present modes".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats)?;
        let present_mode = choose_present_mode(&support.present_modes, prefer_mailbox);
        let extent = choose_extent(&support.capabilities, window_extent);
        let image_count = determine_image_count(&support.capabilities);
        let depth_format = device.find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;

        let formats = SurfaceFormats {
            image: surface_format.format,
            depth: depth_format,
        };
        if let Some(previous) = &predecessor {
            ensure_compatible(&previous.formats, &formats)?;
        }

        info!(
            "Creating swapchain: {}x{}, {:?}/{:?}, depth {:?}, {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            surface_format.color_space,
            depth_format,
            present_mode,
            image_count
        );

        let queue_families = device.queue_families();
        let graphics_family = queue_families.graphics()?;
        let present_family = queue_families.present()?;
        let family_indices = [graphics_family, present_family];
        let (sharing_mode, shared_families) = if graphics_family != present_family {
            (vk::SharingMode::CONCURRENT, family_indices.as_slice())
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let old_swapchain = predecessor
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |previous| previous.swapchain);

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let swapchain = unsafe { loader.create_swapchain(&create_info, None)? };
        let images = match unsafe { loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(e.into());
            }
        };

        let depth = match Image::new(
            device.clone(),
            ImageDesc::depth(extent.width, extent.height, depth_format),
        ) {
            Ok(depth) => depth,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(e);
            }
        };

        let image_count = images.len();
        let mut this = Self {
            device,
            loader,
            swapchain,
            images,
            image_views: Vec::with_capacity(image_count),
            formats,
            color_space: surface_format.color_space,
            extent,
            present_mode,
            depth,
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::with_capacity(image_count),
            frame_sync: Vec::with_capacity(MAX_FRAMES_IN_FLIGHT),
            images_in_flight: ImageFences::new(image_count),
            predecessor,
        };

        // From here on Drop cleans up whatever was created.
        this.create_image_views()?;
        this.create_render_pass()?;
        this.create_framebuffers()?;
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            this.frame_sync.push(FrameSync::new(this.device.clone())?);
        }

        info!("Swapchain ready with {} images", image_count);
        Ok(this)
    }

    fn create_image_views(&mut self) -> RhiResult<()> {
        for (i, &image) in self.images.iter().enumerate() {
            let create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.formats.image)
                .components(vk::ComponentMapping::default())
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );

            let view = unsafe {
                self.device
                    .handle()
                    .create_image_view(&create_info, None)
                    .map_err(|e| {
                        RhiError::SwapchainError(format!(
                            "failed to create view for image {}: {:?}",
                            i, e
                        ))
                    })?
            };
            self.image_views.push(view);
        }
        Ok(())
    }

    fn create_render_pass(&mut self) -> RhiResult<()> {
        let attachments = surface_attachments(&self.formats);
        let color_ref = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
        let depth_ref = vk::AttachmentReference::default()
            .attachment(1)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

        let subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_ref)
            .depth_stencil_attachment(&depth_ref);
        let dependency = surface_dependency();

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(std::slice::from_ref(&dependency));

        self.render_pass = unsafe { self.device.handle().create_render_pass(&create_info, None)? };
        Ok(())
    }

    fn create_framebuffers(&mut self) -> RhiResult<()> {
        for &view in &self.image_views {
            let attachments = [view, self.depth.view()];
            let create_info = vk::FramebufferCreateInfo::default()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);
            let framebuffer =
                unsafe { self.device.handle().create_framebuffer(&create_info, None)? };
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    fn sync(&self, slot: usize) -> RhiResult<&FrameSync> {
        self.frame_sync.get(slot).ok_or_else(|| {
            RhiError::InvalidHandle(format!(
                "frame slot {} out of range ({} slots)",
                slot,
                self.frame_sync.len()
            ))
        })
    }

    /// Waits until `slot` is no longer in flight, then acquires the next
    /// image. The slot's resources are free for the CPU once this returns.
    pub fn acquire(&self, slot: usize) -> RhiResult<AcquireOutcome> {
        let sync = self.sync(slot)?;
        sync.in_flight().wait(u64::MAX)?;

        let result = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                sync.image_available(),
                vk::Fence::null(),
            )
        };
        classify_acquire(result)
    }

    /// Submits `command_buffer` for `slot` and presents `image_index`.
    ///
    /// Blocks first if an earlier frame still renders into the same image.
    pub fn submit(
        &mut self,
        slot: usize,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
    ) -> RhiResult<PresentOutcome> {
        let (image_available, render_finished, fence) = {
            let sync = self.sync(slot)?;
            (
                sync.image_available(),
                sync.render_finished(),
                sync.in_flight().handle(),
            )
        };

        if let Some(previous) = self.images_in_flight.claim(image_index, fence)? {
            unsafe {
                self.device
                    .handle()
                    .wait_for_fences(&[previous], true, u64::MAX)?
            };
        }
        self.sync(slot)?.in_flight().reset()?;

        let wait_semaphores = [image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [render_finished];
        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe { self.device.submit_graphics(&[submit_info], fence)? };

        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.loader
                .queue_present(self.device.present_queue(), &present_info)
        };
        let outcome = classify_present(result)?;

        if release_after_present(&mut self.predecessor, outcome).is_some() {
            debug!("Released previous swapchain generation");
        }
        if outcome.needs_rebuild() {
            warn!("Presentation reported {:?}", outcome);
        }
        Ok(outcome)
    }

    /// Framebuffer rendering into swapchain image `image_index`.
    pub fn framebuffer(&self, image_index: u32) -> RhiResult<vk::Framebuffer> {
        self.framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| {
                RhiError::InvalidHandle(format!("no framebuffer for image {}", image_index))
            })
    }

    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    #[inline]
    pub fn formats(&self) -> SurfaceFormats {
        self.formats
    }

    #[inline]
    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.color_space
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height as f32
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn has_predecessor(&self) -> bool {
        self.predecessor.is_some()
    }
}

impl Drop for PresentationSurface {
    fn drop(&mut self) {
        unsafe {
            let device = self.device.handle();
            for &framebuffer in &self.framebuffers {
                device.destroy_framebuffer(framebuffer, None);
            }
            if self.render_pass != vk::RenderPass::null() {
                device.destroy_render_pass(self.render_pass, None);
            }
            for &view in &self.image_views {
                device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );
    }
}

/// Color then depth. Color ends presentable; depth is not kept.
pub fn surface_attachments(formats: &SurfaceFormats) -> [vk::AttachmentDescription; 2] {
    [
        vk::AttachmentDescription::default()
            .format(formats.image)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
        vk::AttachmentDescription::default()
            .format(formats.depth)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
    ]
}

/// Orders the subpass's color and depth writes after whatever the previous
/// frame (or the presentation engine) did to the same images.
pub fn surface_dependency() -> vk::SubpassDependency {
    let stages =
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(stages)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
}

/// B8G8R8A8_SRGB / SRGB_NONLINEAR if offered, else the first format.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> RhiResult<vk::SurfaceFormatKHR> {
    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });
    if let Some(&format) = preferred {
        return Ok(format);
    }

    let first = formats
        .first()
        .copied()
        .ok_or_else(|| RhiError::SwapchainError("surface offers no formats".to_string()))?;
    warn!("Preferred surface format unavailable, using {:?}", first.format);
    Ok(first)
}

/// MAILBOX when wanted and offered, FIFO otherwise (always available).
fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    prefer_mailbox: bool,
) -> vk::PresentModeKHR {
    if prefer_mailbox && present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        return vk::PresentModeKHR::MAILBOX;
    }
    vk::PresentModeKHR::FIFO
}

/// The surface's current extent, or the window size clamped to its limits
/// when the surface leaves the choice to us.
fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, window: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: window.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: window.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped by the maximum when there is one.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn formats(image: vk::Format, depth: vk::Format) -> SurfaceFormats {
        SurfaceFormats { image, depth }
    }

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let available = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        let selected = choose_surface_format(&available).unwrap();
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_choose_surface_format_falls_back_to_first() {
        let available = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        let selected = choose_surface_format(&available).unwrap();
        assert_eq!(selected.format, vk::Format::R8G8B8A8_UNORM);
        assert!(choose_surface_format(&[]).is_err());
    }

    #[test]
    fn test_choose_present_mode() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::FIFO);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE], true),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };

        let extent = choose_extent(
            &capabilities,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        );
        assert_eq!((extent.width, extent.height), (1920, 1080));
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let clamp = |width, height| {
            let e = choose_extent(&capabilities, vk::Extent2D { width, height });
            (e.width, e.height)
        };
        assert_eq!(clamp(3000, 3000), (2000, 2000));
        assert_eq!(clamp(50, 50), (100, 100));
        assert_eq!(clamp(800, 600), (800, 600));
    }

    #[test]
    fn test_determine_image_count() {
        let capped = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capped), 2);

        let unlimited = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&unlimited), 3);
    }

    #[test]
    fn test_swapchain_support_details_is_adequate() {
        let adequate = SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(adequate.is_adequate());

        let no_modes = SwapchainSupportDetails {
            present_modes: vec![],
            ..adequate.clone()
        };
        assert!(!no_modes.is_adequate());
    }

    #[test]
    fn test_compatible_formats_pass() {
        let a = formats(vk::Format::B8G8R8A8_SRGB, vk::Format::D32_SFLOAT);
        assert!(a.compare_formats(&a));
        assert!(ensure_compatible(&a, &a).is_ok());
    }

    #[test]
    fn test_changed_image_format_is_rejected() {
        let previous = formats(vk::Format::B8G8R8A8_SRGB, vk::Format::D32_SFLOAT);
        let next = formats(vk::Format::B8G8R8A8_UNORM, vk::Format::D32_SFLOAT);

        match ensure_compatible(&previous, &next) {
            Err(RhiError::FormatMismatch {
                previous_image,
                image,
                ..
            }) => {
                assert_eq!(previous_image, vk::Format::B8G8R8A8_SRGB);
                assert_eq!(image, vk::Format::B8G8R8A8_UNORM);
            }
            other => panic!("expected FormatMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_changed_depth_format_is_rejected() {
        let previous = formats(vk::Format::B8G8R8A8_SRGB, vk::Format::D32_SFLOAT);
        let next = formats(vk::Format::B8G8R8A8_SRGB, vk::Format::D24_UNORM_S8_UINT);
        assert!(!previous.compare_formats(&next));
        assert!(matches!(
            ensure_compatible(&previous, &next),
            Err(RhiError::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_classify_acquire() {
        assert_eq!(
            classify_acquire(Ok((2, false))).unwrap(),
            AcquireOutcome::Ready { image_index: 2 }
        );
        assert_eq!(
            classify_acquire(Ok((1, true))).unwrap(),
            AcquireOutcome::Suboptimal { image_index: 1 }
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::Stale
        );
        assert!(classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
    }

    #[test]
    fn test_classify_present() {
        assert_eq!(
            classify_present(Ok(false)).unwrap(),
            PresentOutcome::Presented
        );
        assert_eq!(
            classify_present(Ok(true)).unwrap(),
            PresentOutcome::Suboptimal
        );
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            PresentOutcome::Stale
        );
        assert!(classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
        assert!(PresentOutcome::Suboptimal.needs_rebuild());
        assert!(!PresentOutcome::Presented.needs_rebuild());
    }

    #[test]
    fn test_image_fences_wait_on_other_slot() {
        let slot_a = vk::Fence::from_raw(1);
        let slot_b = vk::Fence::from_raw(2);
        let mut fences = ImageFences::new(3);

        assert_eq!(fences.claim(1, slot_a).unwrap(), None);
        // The second slot lands on the same image and must wait for the first.
        assert_eq!(fences.claim(1, slot_b).unwrap(), Some(slot_a));
        assert_eq!(fences.owner(1), Some(slot_b));
        assert_eq!(fences.owner(0), None);
    }

    #[test]
    fn test_image_fences_same_slot_does_not_wait() {
        let slot_a = vk::Fence::from_raw(1);
        let mut fences = ImageFences::new(2);
        fences.claim(0, slot_a).unwrap();
        assert_eq!(fences.claim(0, slot_a).unwrap(), None);
    }

    #[test]
    fn test_image_fences_rejects_out_of_range() {
        let mut fences = ImageFences::new(2);
        assert!(matches!(
            fences.claim(2, vk::Fence::from_raw(1)),
            Err(RhiError::InvalidHandle(_))
        ));
        assert_eq!(fences, ImageFences::new(2));
    }

    #[test]
    fn test_stale_present_keeps_predecessor() {
        let mut predecessor = Some(Arc::new(7u32));

        assert_eq!(release_after_present(&mut predecessor, PresentOutcome::Stale), None);
        assert!(predecessor.is_some());

        let released = release_after_present(&mut predecessor, PresentOutcome::Suboptimal);
        assert_eq!(released.as_deref(), Some(&7));
        assert!(predecessor.is_none());
        assert_eq!(release_after_present(&mut predecessor, PresentOutcome::Presented), None);
    }

    #[test]
    fn test_surface_attachments() {
        let [color, depth] =
            surface_attachments(&formats(vk::Format::B8G8R8A8_SRGB, vk::Format::D32_SFLOAT));
        assert_eq!(color.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(color.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(color.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(depth.format, vk::Format::D32_SFLOAT);
        assert_eq!(depth.store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(
            depth.final_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn test_surface_dependency_covers_depth_writes() {
        let dependency = surface_dependency();
        assert_eq!(dependency.src_subpass, vk::SUBPASS_EXTERNAL);
        assert!(
            dependency
                .dst_stage_mask
                .contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
        );
        assert!(
            dependency
                .dst_access_mask
                .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        );
    }
}
