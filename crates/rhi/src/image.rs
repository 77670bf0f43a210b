//! Device-local 2D images with a single view.
//!
//! Used for the swapchain's shared depth buffer and for every attachment of
//! an offscreen [`FrameBufferTarget`](crate::frame_buffer::FrameBufferTarget).

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Parameters of an [`Image`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub layer_count: u32,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub samples: vk::SampleCountFlags,
    /// Aspect of the image itself.
    pub aspect: vk::ImageAspectFlags,
    /// Aspect exposed by the view; differs from `aspect` for depth-stencil
    /// images, which are sampled through their depth aspect only.
    pub view_aspect: vk::ImageAspectFlags,
}

impl ImageDesc {
    /// Single-layer, single-sample depth attachment.
    pub fn depth(width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            width,
            height,
            layer_count: 1,
            format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            samples: vk::SampleCountFlags::TYPE_1,
            aspect: vk::ImageAspectFlags::DEPTH,
            view_aspect: vk::ImageAspectFlags::DEPTH,
        }
    }

    /// `TYPE_2D_ARRAY` as soon as there is more than one layer.
    pub fn view_type(&self) -> vk::ImageViewType {
        if self.layer_count > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        }
    }
}

/// A device-local image, its memory and its view.
///
/// Dropping releases view, image, then memory.
pub struct Image {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    desc: ImageDesc,
}

impl Image {
    pub fn new(device: Arc<Device>, desc: ImageDesc) -> RhiResult<Self> {
        if desc.width == 0 || desc.height == 0 || desc.layer_count == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "image dimensions must be non-zero: {}x{}x{}",
                desc.width, desc.height, desc.layer_count
            )));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(desc.layer_count)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = device.allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: "image",
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RhiError::from)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e);
            }
        };

        let mut this = Self {
            device,
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            desc,
        };

        if let Some(allocation) = &this.allocation {
            unsafe {
                this.device.handle().bind_image_memory(
                    image,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(desc.view_type())
            .format(desc.format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(desc.view_aspect)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(desc.layer_count),
            );
        this.view = unsafe { this.device.handle().create_image_view(&view_info, None)? };

        debug!(
            "Created image {}x{} ({:?}, {} layer(s))",
            desc.width, desc.height, desc.format, desc.layer_count
        );

        Ok(this)
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    #[inline]
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.desc.width,
            height: self.desc.height,
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
            self.device.handle().destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        tracing::error!("Failed to free image allocation: {:?}", e);
                    }
                }
                Err(e) => tracing::error!("Leaking image allocation: {}", e),
            }
        }

        debug!("Destroyed image ({:?})", self.desc.format);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_desc_defaults() {
        let desc = ImageDesc::depth(800, 600, vk::Format::D32_SFLOAT);
        assert_eq!(desc.layer_count, 1);
        assert_eq!(desc.aspect, vk::ImageAspectFlags::DEPTH);
        assert_eq!(desc.samples, vk::SampleCountFlags::TYPE_1);
        assert!(
            desc.usage
                .contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
        );
    }

    #[test]
    fn test_view_type_follows_layer_count() {
        let mut desc = ImageDesc::depth(64, 64, vk::Format::D16_UNORM);
        assert_eq!(desc.view_type(), vk::ImageViewType::TYPE_2D);
        desc.layer_count = 6;
        assert_eq!(desc.view_type(), vk::ImageViewType::TYPE_2D_ARRAY);
    }

    #[test]
    fn test_image_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Image>();
    }
}
