//! GPU side of the frame loop.
//!
//! [`crate::FrameOrchestrator`] owns the frame state machine and talks to
//! the GPU only through [`FrameBackend`]. The Vulkan implementation lives in
//! [`crate::vulkan`]; tests drive the orchestrator with an in-memory one.

use ash::vk;
use glam::Vec3;

use lumen_rhi::RhiResult;
use lumen_rhi::swapchain::{AcquireOutcome, PresentOutcome};
use lumen_scene::SceneGraph;

use crate::encoder::CommandEncoder;
use crate::mesh::MeshSource;
use crate::passes::{FrameContext, GeometryRecorder, LightRecorder, ShadowRecorder};
use crate::ubo::{ObjectUbo, SceneUbo};

/// Render pass and framebuffer of the image being presented.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MainTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PassRecorders {
    pub shadow: ShadowRecorder,
    pub geometry: GeometryRecorder,
    pub light: LightRecorder,
}

/// Draw counts of one recorded frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameDraws {
    pub shadow: usize,
    pub geometry: usize,
    pub lights: usize,
}

/// Borrowed view of a backend while one frame is recorded.
pub struct FrameRecording<'a> {
    pub encoder: &'a mut dyn CommandEncoder,
    pub meshes: &'a dyn MeshSource,
    pub passes: PassRecorders,
    pub target: MainTarget,
    /// Set 0 for this frame slot, then the shadow map set.
    pub descriptor_sets: [vk::DescriptorSet; 2],
}

impl FrameRecording<'_> {
    /// Records the shadow pass, then the main pass with geometry and
    /// light billboards.
    pub fn record(
        &mut self,
        scene: &SceneGraph,
        camera_position: Vec3,
        clear_color: [f32; 4],
    ) -> FrameDraws {
        let frame = FrameContext {
            scene,
            meshes: self.meshes,
            descriptor_sets: &self.descriptor_sets,
            camera_position,
        };

        let shadow = self.passes.shadow.record(self.encoder, &frame);

        let clear_values = main_clear_values(clear_color);
        self.encoder.begin_render_pass(
            self.target.render_pass,
            self.target.framebuffer,
            self.target.extent,
            &clear_values,
        );
        self.encoder.set_viewport_and_scissor(self.target.extent);
        let geometry = self.passes.geometry.record(self.encoder, &frame);
        let lights = self.passes.light.record(self.encoder, &frame);
        self.encoder.end_render_pass();

        FrameDraws {
            shadow,
            geometry,
            lights,
        }
    }
}

/// Color then depth clear of the main pass.
pub fn main_clear_values(clear_color: [f32; 4]) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color,
            },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ]
}

/// Per-frame GPU operations, indexed by frame slot.
pub trait FrameBackend {
    /// Extent of the current presentation surface.
    fn surface_extent(&self) -> vk::Extent2D;

    /// Waits until `slot` is free, then acquires the next image.
    fn acquire(&mut self, slot: usize) -> RhiResult<AcquireOutcome>;

    fn begin_commands(&mut self, slot: usize) -> RhiResult<()>;

    fn write_uniforms(&mut self, slot: usize, object: &ObjectUbo, scene: &SceneUbo)
    -> RhiResult<()>;

    fn recording(&mut self, slot: usize, image_index: u32) -> RhiResult<FrameRecording<'_>>;

    fn end_commands(&mut self, slot: usize) -> RhiResult<()>;

    fn submit(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome>;

    /// Replaces the presentation surface with one of `extent`. The new
    /// surface must keep the formats of the old one.
    fn rebuild(&mut self, extent: vk::Extent2D) -> RhiResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{EncodedCommand, RecordingEncoder};
    use crate::passes::test_support::FixedMeshes;
    use crate::passes::{DepthBias, PassPipeline};
    use lumen_scene::{IdAllocator, MeshHandle, PointLight, Transform};

    fn passes() -> PassRecorders {
        let extent = vk::Extent2D {
            width: 64,
            height: 64,
        };
        PassRecorders {
            shadow: ShadowRecorder {
                pipeline: PassPipeline::default(),
                render_pass: vk::RenderPass::null(),
                framebuffer: vk::Framebuffer::null(),
                extent,
                bias: DepthBias {
                    constant: 1.25,
                    clamp: 0.0,
                    slope: 3.75,
                },
            },
            geometry: GeometryRecorder {
                pipeline: PassPipeline::default(),
            },
            light: LightRecorder {
                pipeline: PassPipeline::default(),
            },
        }
    }

    #[test]
    fn test_main_clear_values() {
        let values = main_clear_values([0.01, 0.01, 0.01, 1.0]);
        unsafe {
            assert_eq!(values[0].color.float32, [0.01, 0.01, 0.01, 1.0]);
            assert_eq!(values[1].depth_stencil.depth, 1.0);
        }
    }

    #[test]
    fn test_record_orders_passes() {
        let mut scene = SceneGraph::new();
        let mut ids = IdAllocator::new();
        scene.spawn_mesh(&mut ids, "cube", MeshHandle(0), Transform::default()).unwrap();
        scene.spawn_point_light(&mut ids, Vec3::X, Vec3::ONE, PointLight::default()).unwrap();

        let mut encoder = RecordingEncoder::new();
        let meshes = FixedMeshes(1);
        let target = MainTarget {
            render_pass: vk::RenderPass::null(),
            framebuffer: vk::Framebuffer::null(),
            extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
        };
        let mut recording = FrameRecording {
            encoder: &mut encoder,
            meshes: &meshes,
            passes: passes(),
            target,
            descriptor_sets: [vk::DescriptorSet::null(); 2],
        };

        let draws = recording.record(&scene, Vec3::ZERO, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(
            draws,
            FrameDraws {
                shadow: 1,
                geometry: 1,
                lights: 1
            }
        );

        let groups = encoder.render_passes();
        assert_eq!(groups.len(), 2);
        // The shadow pass comes first and only draws meshes.
        assert!(groups[0].iter().all(|c| !matches!(c, EncodedCommand::Draw { .. })));
        assert!(groups[1].contains(&EncodedCommand::Draw { vertex_count: 6 }));
        assert!(groups[1].contains(&EncodedCommand::SetViewportAndScissor(target.extent)));

        let begins: Vec<&EncodedCommand> = encoder
            .commands()
            .iter()
            .filter(|c| matches!(c, EncodedCommand::BeginRenderPass { .. }))
            .collect();
        assert!(matches!(
            begins[1],
            EncodedCommand::BeginRenderPass { clear_values: 2, .. }
        ));
    }
}
