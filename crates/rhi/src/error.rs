//! RHI error types.

use ash::vk;
use thiserror::Error;

/// Error raised by the Vulkan layer.
///
/// Everything here is fatal for the current session except
/// [`RhiError::PoolExhausted`], which callers may recover from by freeing
/// or resetting descriptor sets.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// Another thread panicked while holding the memory allocator or
    /// upload pool lock
    #[error("Allocation lock poisoned")]
    AllocatorPoisoned,

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// SPIR-V could not be loaded or turned into a module
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation or query error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Offscreen target misuse or creation failure
    #[error("Frame buffer error: {0}")]
    FrameBufferError(String),

    /// A rebuilt swapchain negotiated different formats than its predecessor
    #[error(
        "Swapchain format has changed: image {previous_image:?} -> {image:?}, depth {previous_depth:?} -> {depth:?}"
    )]
    FormatMismatch {
        previous_image: vk::Format,
        image: vk::Format,
        previous_depth: vk::Format,
        depth: vk::Format,
    },

    /// Two bindings of one layout claim the same slot
    #[error("Duplicate descriptor binding at slot {0}")]
    DuplicateBinding(u32),

    /// A descriptor write does not match the layout it targets
    #[error("Descriptor binding error: {0}")]
    BindingError(String),

    /// Descriptor pool has no room left for the requested set
    #[error("Descriptor pool exhausted: {0}")]
    PoolExhausted(String),

    /// Invalid handle or argument
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
