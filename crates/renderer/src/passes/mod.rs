//! Render passes of a frame.
//!
//! Each pass owns its pipeline and pipeline layout, and hands out a small
//! `Copy` recorder holding only handles. Recorders write through
//! [`CommandEncoder`], so the same recording code runs against a Vulkan
//! command buffer or a [`crate::encoder::RecordingEncoder`].
//!
//! Every pipeline layout uses the same descriptor sets:
//! - set 0: per-frame uniforms ([`crate::ubo::ObjectUbo`], [`crate::ubo::SceneUbo`])
//! - set 1: the shadow map sampler

pub mod geometry;
pub mod light;
pub mod shadow;

use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use tracing::warn;

use lumen_core::ShaderConfig;
use lumen_rhi::RhiResult;
use lumen_rhi::device::Device;
use lumen_rhi::pipeline::{PipelineLayout, push_constant_range};
use lumen_rhi::shader::{Shader, ShaderStage};
use lumen_scene::SceneGraph;

use crate::encoder::CommandEncoder;
use crate::mesh::MeshSource;

pub use geometry::{GeometryPass, GeometryRecorder};
pub use light::{LightPass, LightRecorder, PointLightPushConstants};
pub use shadow::{DepthBias, ShadowPass, ShadowRecorder};

/// Stages that read push constants in every pass.
pub const PUSH_CONSTANT_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
);

/// Pipeline and layout handles a recorder binds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

/// Per-object push constants of the shadow and geometry passes.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MeshPushConstants {
    pub model: Mat4,
    pub normal: Mat4,
}

/// Everything a pass reads while recording one frame.
pub struct FrameContext<'a> {
    pub scene: &'a SceneGraph,
    pub meshes: &'a dyn MeshSource,
    /// Sets bound at index 0 onward, in layout order.
    pub descriptor_sets: &'a [vk::DescriptorSet],
    pub camera_position: Vec3,
}

/// Pushes transforms and draws every node that carries a known mesh.
/// Returns the number of meshes drawn.
fn record_meshes(
    encoder: &mut dyn CommandEncoder,
    pipeline: PassPipeline,
    frame: &FrameContext<'_>,
) -> usize {
    let mut draws = 0;
    for node in frame.scene.iter() {
        let Some(mesh) = node.mesh() else {
            continue;
        };
        if !frame.meshes.contains(mesh) {
            warn!("Node {} refers to unknown mesh {:?}", node.id(), mesh);
            continue;
        }
        let (model, normal) = frame.scene.world_transform(node);
        let push = MeshPushConstants { model, normal };
        encoder.push_constants(
            pipeline.layout,
            PUSH_CONSTANT_STAGES,
            bytemuck::bytes_of(&push),
        );
        if frame.meshes.record_draw(mesh, encoder) {
            draws += 1;
        }
    }
    draws
}

/// Pipeline layout over the shared set layouts with one push constant
/// range of `T`.
fn pass_layout<T>(
    device: Arc<Device>,
    set_layouts: &[vk::DescriptorSetLayout],
) -> RhiResult<PipelineLayout> {
    PipelineLayout::new(
        device,
        set_layouts,
        &[push_constant_range::<T>(PUSH_CONSTANT_STAGES)],
    )
}

fn load_shaders(
    device: &Arc<Device>,
    shaders: &ShaderConfig,
    vertex: &str,
    fragment: &str,
) -> RhiResult<(Shader, Shader)> {
    let vertex = Shader::from_spirv_file(
        device.clone(),
        &shaders.path(vertex),
        ShaderStage::Vertex,
    )?;
    let fragment = Shader::from_spirv_file(
        device.clone(),
        &shaders.path(fragment),
        ShaderStage::Fragment,
    )?;
    Ok((vertex, fragment))
}
