//! Point light billboards, alpha blended over the lit scene.

use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use tracing::info;

use lumen_core::ShaderConfig;
use lumen_rhi::RhiResult;
use lumen_rhi::device::Device;
use lumen_rhi::pipeline::{ColorBlend, CullMode, GraphicsPipelineBuilder, Pipeline, PipelineLayout};

use super::{FrameContext, PUSH_CONSTANT_STAGES, PassPipeline, load_shaders, pass_layout};
use crate::encoder::CommandEncoder;
use crate::lights::{PointLightInstance, collect_point_lights, sort_back_to_front};

/// Two triangles generated in the vertex shader.
pub const BILLBOARD_VERTEX_COUNT: u32 = 6;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PointLightPushConstants {
    pub position: Vec4,
    /// RGB color, intensity in `w`.
    pub color: Vec4,
    pub radius: f32,
    pub _padding: [f32; 3],
}

impl From<&PointLightInstance> for PointLightPushConstants {
    fn from(light: &PointLightInstance) -> Self {
        Self {
            position: light.position.extend(1.0),
            color: light.color.extend(light.intensity),
            radius: light.radius,
            _padding: [0.0; 3],
        }
    }
}

pub struct LightPass {
    pipeline: Pipeline,
    layout: PipelineLayout,
}

impl LightPass {
    pub fn new(
        device: Arc<Device>,
        render_pass: vk::RenderPass,
        shaders: &ShaderConfig,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Self> {
        let layout = pass_layout::<PointLightPushConstants>(device.clone(), set_layouts)?;
        let (vertex, fragment) =
            load_shaders(&device, shaders, "point_light.vert.spv", "point_light.frag.spv")?;

        // No vertex input: the billboard corners come from gl_VertexIndex.
        let pipeline = GraphicsPipelineBuilder::new(render_pass)
            .vertex_shader(&vertex)
            .fragment_shader(&fragment)
            .cull_mode(CullMode::None)
            .color_blend(ColorBlend::AlphaBlend)
            .depth_write_enable(false)
            .build(device, &layout)?;

        info!("Point light pass created");
        Ok(Self { pipeline, layout })
    }

    pub fn recorder(&self) -> LightRecorder {
        LightRecorder {
            pipeline: PassPipeline {
                pipeline: self.pipeline.handle(),
                layout: self.layout.handle(),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LightRecorder {
    pub pipeline: PassPipeline,
}

impl LightRecorder {
    /// Draws every point light, farthest from the camera first. Returns the
    /// number of lights drawn.
    pub fn record(&self, encoder: &mut dyn CommandEncoder, frame: &FrameContext<'_>) -> usize {
        let mut lights = collect_point_lights(frame.scene);
        sort_back_to_front(&mut lights, frame.camera_position);

        encoder.bind_pipeline(self.pipeline.pipeline);
        encoder.bind_descriptor_sets(self.pipeline.layout, frame.descriptor_sets);

        for light in &lights {
            let push = PointLightPushConstants::from(light);
            encoder.push_constants(
                self.pipeline.layout,
                PUSH_CONSTANT_STAGES,
                bytemuck::bytes_of(&push),
            );
            encoder.draw(BILLBOARD_VERTEX_COUNT);
        }
        lights.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{EncodedCommand, RecordingEncoder};
    use crate::passes::test_support::FixedMeshes;
    use glam::Vec3;
    use lumen_scene::{IdAllocator, PointLight, SceneGraph};

    #[test]
    fn test_push_constant_size() {
        assert_eq!(std::mem::size_of::<PointLightPushConstants>(), 48);
    }

    #[test]
    fn test_draws_lights_back_to_front() {
        let mut scene = SceneGraph::new();
        let mut ids = IdAllocator::new();
        // Squared distances from the origin: 4, 1, 9.
        for x in [2.0, 1.0, 3.0] {
            scene.spawn_point_light(
                &mut ids,
                Vec3::new(x, 0.0, 0.0),
                Vec3::ONE,
                PointLight::new(0.9, x / 10.0),
            ).unwrap();
        }

        let frame = FrameContext {
            scene: &scene,
            meshes: &FixedMeshes(0),
            descriptor_sets: &[],
            camera_position: Vec3::ZERO,
        };
        let mut encoder = RecordingEncoder::new();
        let recorder = LightRecorder {
            pipeline: PassPipeline::default(),
        };
        assert_eq!(recorder.record(&mut encoder, &frame), 3);

        let drawn: Vec<f32> = encoder
            .commands()
            .iter()
            .filter_map(|c| match c {
                EncodedCommand::PushConstants { data, .. } => {
                    let push: PointLightPushConstants = bytemuck::pod_read_unaligned(data);
                    Some(push.position.x)
                }
                _ => None,
            })
            .collect();
        assert_eq!(drawn, vec![3.0, 2.0, 1.0]);

        let draws: Vec<&EncodedCommand> =
            encoder.commands().iter().filter(|c| c.is_draw()).collect();
        assert!(draws.iter().all(|c| **c == EncodedCommand::Draw { vertex_count: 6 }));
    }

    #[test]
    fn test_push_constants_from_light() {
        let light = PointLightInstance {
            id: lumen_scene::ObjectId::from_raw(0),
            position: Vec3::new(1.0, 2.0, 3.0),
            color: Vec3::new(0.1, 0.1, 1.0),
            intensity: 0.9,
            radius: 0.1,
        };
        let push = PointLightPushConstants::from(&light);
        assert_eq!(push.position, Vec4::new(1.0, 2.0, 3.0, 1.0));
        assert_eq!(push.color, Vec4::new(0.1, 0.1, 1.0, 0.9));
        assert_eq!(push.radius, 0.1);
    }
}
