//! Frame orchestration and render passes.
//!
//! A frame renders a shadow map from the first directional light, then the
//! lit scene and the point light billboards into the acquired swapchain
//! image:
//! - [`FrameOrchestrator`] drives acquire, record, submit and rebuild
//! - [`FrameBackend`] is the GPU seam, implemented by [`VulkanBackend`]
//! - [`passes`] holds the shadow, geometry and light passes

pub mod backend;
pub mod encoder;
pub mod lights;
pub mod mesh;
pub mod orchestrator;
pub mod passes;
pub mod ubo;
pub mod vulkan;

pub use backend::{FrameBackend, FrameDraws, FrameRecording, MainTarget, PassRecorders};
pub use encoder::{CommandEncoder, EncodedCommand, RecordingEncoder};
pub use lights::ShadowProjection;
pub use mesh::{GpuMesh, MeshData, MeshLibrary, MeshSource};
pub use orchestrator::{FrameOrchestrator, FrameSettings, FrameStatus, Lens};
pub use ubo::{MAX_LIGHTS, ObjectUbo, SceneUbo};
pub use vulkan::VulkanBackend;

pub use lumen_rhi::sync::MAX_FRAMES_IN_FLIGHT;
