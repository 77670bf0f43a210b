//! Offscreen render targets.
//!
//! A [`FrameBufferTarget`] is a list of image attachments, one sampler shared
//! by all of them, and a render pass + framebuffer built over those
//! attachments by [`FrameBufferTarget::finalize`]. It is used for passes that
//! do not draw to the screen and whose output a later pass samples, such as
//! the shadow map.
//!
//! The render pass always carries the same pair of by-region dependencies:
//! one from outside the pass into the attachment-writing stages, and one
//! back out to where the attachments get sampled. Attachments finish in a
//! shader-readable layout, so nothing special is needed per use.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use lumen_rhi::device::Device;
//! use lumen_rhi::frame_buffer::{AttachmentCreateInfo, FrameBufferTarget};
//! use lumen_rhi::vk;
//!
//! # fn example(device: Arc<Device>) -> lumen_rhi::RhiResult<()> {
//! let mut target = FrameBufferTarget::new(device, 2048, 2048);
//! target.add_attachment(AttachmentCreateInfo {
//!     width: 2048,
//!     height: 2048,
//!     layer_count: 1,
//!     format: vk::Format::D16_UNORM,
//!     usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
//!     samples: vk::SampleCountFlags::TYPE_1,
//! })?;
//! target.create_sampler(vk::Filter::LINEAR, vk::Filter::LINEAR, vk::SamplerAddressMode::CLAMP_TO_EDGE)?;
//! target.finalize()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::{Image, ImageDesc};
use crate::sampler::{Sampler, SamplerDesc};

const DEPTH_FORMATS: [vk::Format; 6] = [
    vk::Format::D16_UNORM,
    vk::Format::X8_D24_UNORM_PACK32,
    vk::Format::D32_SFLOAT,
    vk::Format::D16_UNORM_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D32_SFLOAT_S8_UINT,
];

const STENCIL_FORMATS: [vk::Format; 4] = [
    vk::Format::S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D32_SFLOAT_S8_UINT,
];

/// Whether `format` has a depth component.
pub fn has_depth(format: vk::Format) -> bool {
    DEPTH_FORMATS.contains(&format)
}

/// Whether `format` has a stencil component.
pub fn has_stencil(format: vk::Format) -> bool {
    STENCIL_FORMATS.contains(&format)
}

/// Whether `format` belongs to the depth/stencil family at all.
pub fn is_depth_stencil(format: vk::Format) -> bool {
    has_depth(format) || has_stencil(format)
}

/// Parameters of one attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachmentCreateInfo {
    pub width: u32,
    pub height: u32,
    pub layer_count: u32,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub samples: vk::SampleCountFlags,
}

/// Image aspect implied by an attachment's usage and format.
///
/// Color usage yields `COLOR`. Depth/stencil usage yields `DEPTH` and/or
/// `STENCIL` according to the format. Anything else is rejected.
pub fn attachment_aspect(
    usage: vk::ImageUsageFlags,
    format: vk::Format,
) -> RhiResult<vk::ImageAspectFlags> {
    let mut aspect = vk::ImageAspectFlags::empty();

    if usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT) {
        aspect = vk::ImageAspectFlags::COLOR;
    }

    if usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
        if has_depth(format) {
            aspect = vk::ImageAspectFlags::DEPTH;
        }
        if has_stencil(format) {
            aspect |= vk::ImageAspectFlags::STENCIL;
        }
    }

    if aspect.is_empty() {
        return Err(RhiError::FrameBufferError(format!(
            "usage {:?} gives no image aspect for format {:?}",
            usage, format
        )));
    }
    Ok(aspect)
}

/// Layout an attachment is left in when the pass ends.
pub fn final_layout(format: vk::Format) -> vk::ImageLayout {
    if is_depth_stencil(format) {
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
    } else {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    }
}

/// Attachment description: always cleared, stored only when sampled later.
pub fn attachment_description(info: &AttachmentCreateInfo) -> vk::AttachmentDescription {
    let store_op = if info.usage.contains(vk::ImageUsageFlags::SAMPLED) {
        vk::AttachmentStoreOp::STORE
    } else {
        vk::AttachmentStoreOp::DONT_CARE
    };

    vk::AttachmentDescription::default()
        .format(info.format)
        .samples(info.samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(store_op)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(final_layout(info.format))
}

/// Entry and exit dependencies of the single subpass.
///
/// Both are `BY_REGION`. With a depth attachment the attachment side also
/// covers the depth test stages, and the external side covers fragment
/// shader reads so the downstream pass samples a finished image.
pub fn subpass_dependencies(with_depth: bool) -> [vk::SubpassDependency; 2] {
    let mut attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    let mut attachment_access =
        vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    let mut external_stages = vk::PipelineStageFlags::BOTTOM_OF_PIPE;
    let mut external_access = vk::AccessFlags::MEMORY_READ;

    if with_depth {
        attachment_stages |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        attachment_access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        external_stages |= vk::PipelineStageFlags::FRAGMENT_SHADER;
        external_access |= vk::AccessFlags::SHADER_READ;
    }

    [
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(external_stages)
            .dst_stage_mask(attachment_stages)
            .src_access_mask(external_access)
            .dst_access_mask(attachment_access)
            .dependency_flags(vk::DependencyFlags::BY_REGION),
        vk::SubpassDependency::default()
            .src_subpass(0)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(attachment_stages)
            .dst_stage_mask(external_stages)
            .src_access_mask(attachment_access)
            .dst_access_mask(external_access)
            .dependency_flags(vk::DependencyFlags::BY_REGION),
    ]
}

/// One attachment of a [`FrameBufferTarget`].
pub struct FramebufferAttachment {
    image: Image,
    aspect: vk::ImageAspectFlags,
    description: vk::AttachmentDescription,
}

impl FramebufferAttachment {
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.image.format()
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    #[inline]
    pub fn layer_count(&self) -> u32 {
        self.image.desc().layer_count
    }

    #[inline]
    pub fn description(&self) -> &vk::AttachmentDescription {
        &self.description
    }

    pub fn has_depth(&self) -> bool {
        has_depth(self.format())
    }

    pub fn has_stencil(&self) -> bool {
        has_stencil(self.format())
    }

    pub fn is_depth_stencil(&self) -> bool {
        is_depth_stencil(self.format())
    }
}

/// Offscreen target: attachments, one shared sampler, render pass and
/// framebuffer.
///
/// Teardown runs sampler, then each attachment (view, image, memory), then
/// framebuffer, then render pass.
pub struct FrameBufferTarget {
    device: Arc<Device>,
    width: u32,
    height: u32,
    attachments: Vec<FramebufferAttachment>,
    sampler: Option<Sampler>,
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
}

impl FrameBufferTarget {
    /// An empty target of the given size. Nothing is allocated yet.
    pub fn new(device: Arc<Device>, width: u32, height: u32) -> Self {
        Self {
            device,
            width,
            height,
            attachments: Vec::new(),
            sampler: None,
            render_pass: vk::RenderPass::null(),
            framebuffer: vk::Framebuffer::null(),
        }
    }

    /// Creates an attachment image and returns its index.
    ///
    /// A target holds at most one depth/stencil attachment, and attachments
    /// cannot be added once the target is finalized.
    pub fn add_attachment(&mut self, info: AttachmentCreateInfo) -> RhiResult<u32> {
        if self.is_finalized() {
            return Err(RhiError::FrameBufferError(
                "cannot add attachments to a finalized target".to_string(),
            ));
        }

        let aspect = attachment_aspect(info.usage, info.format)?;
        let depth_like = aspect.intersects(vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL);
        if depth_like && self.depth_attachment_index().is_some() {
            return Err(RhiError::FrameBufferError(
                "only one depth/stencil attachment per target".to_string(),
            ));
        }

        // Depth-stencil images are sampled through their depth aspect.
        let view_aspect = if has_depth(info.format) {
            vk::ImageAspectFlags::DEPTH
        } else {
            aspect
        };

        let image = Image::new(
            self.device.clone(),
            ImageDesc {
                width: info.width,
                height: info.height,
                layer_count: info.layer_count,
                format: info.format,
                usage: info.usage,
                samples: info.samples,
                aspect,
                view_aspect,
            },
        )?;

        self.attachments.push(FramebufferAttachment {
            image,
            aspect,
            description: attachment_description(&info),
        });

        let index = (self.attachments.len() - 1) as u32;
        debug!(
            "Added attachment {} ({:?}, {:?}) to {}x{} target",
            index, info.format, aspect, self.width, self.height
        );
        Ok(index)
    }

    /// Creates the sampler shared by every attachment.
    pub fn create_sampler(
        &mut self,
        mag_filter: vk::Filter,
        min_filter: vk::Filter,
        address_mode: vk::SamplerAddressMode,
    ) -> RhiResult<()> {
        let sampler = Sampler::new(
            self.device.clone(),
            &SamplerDesc {
                mag_filter,
                min_filter,
                address_mode,
            },
        )?;
        self.sampler = Some(sampler);
        Ok(())
    }

    /// Builds the render pass and framebuffer over the current attachments.
    pub fn finalize(&mut self) -> RhiResult<()> {
        if self.is_finalized() {
            return Err(RhiError::FrameBufferError("target already finalized".to_string()));
        }
        if self.attachments.is_empty() {
            return Err(RhiError::FrameBufferError("target has no attachments".to_string()));
        }

        let descriptions: Vec<vk::AttachmentDescription> =
            self.attachments.iter().map(|a| a.description).collect();
        let (color_refs, depth_ref) = attachment_references(
            &self
                .attachments
                .iter()
                .map(FramebufferAttachment::is_depth_stencil)
                .collect::<Vec<_>>(),
        );

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS);
        if !color_refs.is_empty() {
            subpass = subpass.color_attachments(&color_refs);
        }
        if let Some(depth_ref) = depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }

        let dependencies = subpass_dependencies(depth_ref.is_some());
        let subpasses = [subpass];
        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&descriptions)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        self.render_pass = unsafe {
            self.device
                .handle()
                .create_render_pass(&render_pass_info, None)?
        };

        let views: Vec<vk::ImageView> = self.attachments.iter().map(|a| a.view()).collect();
        let layers = self
            .attachments
            .iter()
            .map(FramebufferAttachment::layer_count)
            .max()
            .unwrap_or(1);

        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(self.render_pass)
            .attachments(&views)
            .width(self.width)
            .height(self.height)
            .layers(layers);

        self.framebuffer = unsafe {
            self.device
                .handle()
                .create_framebuffer(&framebuffer_info, None)?
        };

        info!(
            "Finalized {}x{} target with {} attachment(s)",
            self.width,
            self.height,
            self.attachments.len()
        );
        Ok(())
    }

    /// Image info for sampling attachment `index` in its final layout.
    pub fn descriptor_image_info(&self, index: u32) -> RhiResult<vk::DescriptorImageInfo> {
        let attachment = self.attachment(index)?;
        let sampler = self.sampler.as_ref().ok_or_else(|| {
            RhiError::FrameBufferError("sampler must be created before sampling".to_string())
        })?;

        Ok(vk::DescriptorImageInfo::default()
            .sampler(sampler.handle())
            .image_view(attachment.view())
            .image_layout(attachment.description.final_layout))
    }

    pub fn attachment(&self, index: u32) -> RhiResult<&FramebufferAttachment> {
        self.attachments.get(index as usize).ok_or_else(|| {
            RhiError::FrameBufferError(format!("no attachment at index {}", index))
        })
    }

    pub fn attachments(&self) -> &[FramebufferAttachment] {
        &self.attachments
    }

    fn depth_attachment_index(&self) -> Option<usize> {
        self.attachments.iter().position(|a| a.is_depth_stencil())
    }

    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.render_pass != vk::RenderPass::null()
    }

    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    #[inline]
    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    pub fn sampler(&self) -> Option<vk::Sampler> {
        self.sampler.as_ref().map(Sampler::handle)
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

impl Drop for FrameBufferTarget {
    fn drop(&mut self) {
        drop(self.sampler.take());
        self.attachments.clear();

        unsafe {
            if self.framebuffer != vk::Framebuffer::null() {
                self.device.handle().destroy_framebuffer(self.framebuffer, None);
            }
            if self.render_pass != vk::RenderPass::null() {
                self.device.handle().destroy_render_pass(self.render_pass, None);
            }
        }
        debug!("Destroyed {}x{} frame buffer target", self.width, self.height);
    }
}

/// Color references for every non-depth attachment in order, and the
/// reference for the depth attachment if there is one.
fn attachment_references(
    depth_flags: &[bool],
) -> (Vec<vk::AttachmentReference>, Option<vk::AttachmentReference>) {
    let mut color_refs = Vec::new();
    let mut depth_ref = None;

    for (index, &is_depth) in depth_flags.iter().enumerate() {
        if is_depth {
            depth_ref = Some(vk::AttachmentReference {
                attachment: index as u32,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            });
        } else {
            color_refs.push(vk::AttachmentReference {
                attachment: index as u32,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            });
        }
    }

    (color_refs, depth_ref)
}
