//! Lit, shadowed mesh rendering inside the main render pass.

use std::sync::Arc;

use ash::vk;
use tracing::info;

use lumen_core::ShaderConfig;
use lumen_rhi::RhiResult;
use lumen_rhi::device::Device;
use lumen_rhi::pipeline::{CullMode, GraphicsPipelineBuilder, Pipeline, PipelineLayout};
use lumen_rhi::vertex::Vertex;

use super::{FrameContext, MeshPushConstants, PassPipeline, load_shaders, pass_layout, record_meshes};
use crate::encoder::CommandEncoder;

pub struct GeometryPass {
    pipeline: Pipeline,
    layout: PipelineLayout,
}

impl GeometryPass {
    /// Builds the pipeline for subpass 0 of `render_pass`. Any render pass
    /// with the same formats can be used with it later.
    pub fn new(
        device: Arc<Device>,
        render_pass: vk::RenderPass,
        shaders: &ShaderConfig,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Self> {
        let layout = pass_layout::<MeshPushConstants>(device.clone(), set_layouts)?;
        let (vertex, fragment) =
            load_shaders(&device, shaders, "simple_shader.vert.spv", "simple_shader.frag.spv")?;

        let pipeline = GraphicsPipelineBuilder::new(render_pass)
            .vertex_shader(&vertex)
            .fragment_shader(&fragment)
            .vertex_binding(Vertex::binding_description())
            .vertex_attributes(&Vertex::attribute_descriptions())
            .cull_mode(CullMode::None)
            .build(device, &layout)?;

        info!("Geometry pass created");
        Ok(Self { pipeline, layout })
    }

    pub fn recorder(&self) -> GeometryRecorder {
        GeometryRecorder {
            pipeline: PassPipeline {
                pipeline: self.pipeline.handle(),
                layout: self.layout.handle(),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GeometryRecorder {
    pub pipeline: PassPipeline,
}

impl GeometryRecorder {
    /// Records mesh draws into the already begun main pass.
    pub fn record(&self, encoder: &mut dyn CommandEncoder, frame: &FrameContext<'_>) -> usize {
        encoder.bind_pipeline(self.pipeline.pipeline);
        encoder.bind_descriptor_sets(self.pipeline.layout, frame.descriptor_sets);
        record_meshes(encoder, self.pipeline, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{EncodedCommand, RecordingEncoder};
    use crate::passes::test_support::FixedMeshes;
    use glam::Vec3;
    use lumen_scene::{IdAllocator, MeshHandle, SceneGraph, Transform};

    #[test]
    fn test_binds_once_and_draws_each_mesh() {
        let mut scene = SceneGraph::new();
        let mut ids = IdAllocator::new();
        scene.spawn_mesh(&mut ids, "floor", MeshHandle(0), Transform::default()).unwrap();
        scene.spawn_mesh(&mut ids, "cube", MeshHandle(1), Transform::default()).unwrap();
        scene.add_node(&mut ids, "empty", None).unwrap();

        let sets = [vk::DescriptorSet::null(); 2];
        let frame = FrameContext {
            scene: &scene,
            meshes: &FixedMeshes(2),
            descriptor_sets: &sets,
            camera_position: Vec3::ZERO,
        };

        let mut encoder = RecordingEncoder::new();
        let recorder = GeometryRecorder {
            pipeline: PassPipeline::default(),
        };
        assert_eq!(recorder.record(&mut encoder, &frame), 2);

        let commands = encoder.commands();
        assert!(matches!(commands[0], EncodedCommand::BindPipeline(_)));
        assert!(matches!(
            commands[1],
            EncodedCommand::BindDescriptorSets { count: 2, .. }
        ));
        let binds = commands
            .iter()
            .filter(|c| matches!(c, EncodedCommand::BindPipeline(_)))
            .count();
        assert_eq!(binds, 1);
        assert_eq!(encoder.draw_count(), 2);
    }
}
