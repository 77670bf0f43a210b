//! Vulkan layer of the Lumen renderer.
//!
//! Thin, owning wrappers over `ash`:
//! - Instance, physical device selection and the logical device
//! - Buffers and images backed by gpu-allocator
//! - Command recording and synchronization
//! - Descriptor layouts, pools and writers
//! - Offscreen frame buffer targets
//! - Render-pass based graphics pipelines
//! - The presentation swapchain

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod frame_buffer;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
