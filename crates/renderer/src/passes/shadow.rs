//! Offscreen depth pass rendering the scene from the directional light.
//!
//! The depth target is sampled by the geometry pass through set 1, so this
//! pass must be recorded before the main render pass of the same frame.
//! The ordering is carried by the target's subpass dependencies.

use std::sync::Arc;

use ash::vk;
use tracing::info;

use lumen_core::{RendererConfig, ShadowConfig};
use lumen_rhi::RhiResult;
use lumen_rhi::device::Device;
use lumen_rhi::frame_buffer::{AttachmentCreateInfo, FrameBufferTarget};
use lumen_rhi::pipeline::{CompareOp, CullMode, GraphicsPipelineBuilder, Pipeline, PipelineLayout};
use lumen_rhi::vertex::Vertex;

use super::{FrameContext, MeshPushConstants, PassPipeline, load_shaders, pass_layout, record_meshes};
use crate::encoder::CommandEncoder;

/// Depth format of the shadow map.
pub const SHADOW_MAP_FORMAT: vk::Format = vk::Format::D16_UNORM;

/// Index of the depth attachment inside the shadow target.
const DEPTH_ATTACHMENT: u32 = 0;

/// Dynamic depth bias applied while rendering the shadow map.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthBias {
    pub constant: f32,
    pub clamp: f32,
    pub slope: f32,
}

impl From<&ShadowConfig> for DepthBias {
    fn from(config: &ShadowConfig) -> Self {
        Self {
            constant: config.depth_bias_constant,
            clamp: config.depth_bias_clamp,
            slope: config.depth_bias_slope,
        }
    }
}

/// The single depth attachment of a `size` x `size` shadow map.
pub fn shadow_attachment(size: u32) -> AttachmentCreateInfo {
    AttachmentCreateInfo {
        width: size,
        height: size,
        layer_count: 1,
        format: SHADOW_MAP_FORMAT,
        usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        samples: vk::SampleCountFlags::TYPE_1,
    }
}

/// Linear filtering when the device supports it for the shadow format.
pub fn shadow_filter(filterable: bool) -> vk::Filter {
    if filterable {
        vk::Filter::LINEAR
    } else {
        vk::Filter::NEAREST
    }
}

pub struct ShadowPass {
    pipeline: Pipeline,
    layout: PipelineLayout,
    target: FrameBufferTarget,
    bias: DepthBias,
}

impl ShadowPass {
    pub fn new(
        device: Arc<Device>,
        config: &RendererConfig,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Self> {
        let size = config.shadow.map_size;
        let filter = shadow_filter(device.is_format_filterable(SHADOW_MAP_FORMAT));

        let mut target = FrameBufferTarget::new(device.clone(), size, size);
        target.create_sampler(filter, filter, vk::SamplerAddressMode::CLAMP_TO_EDGE)?;
        target.add_attachment(shadow_attachment(size))?;
        target.finalize()?;

        let layout = pass_layout::<MeshPushConstants>(device.clone(), set_layouts)?;
        let (vertex, fragment) =
            load_shaders(&device, &config.shaders, "shadow.vert.spv", "blank.frag.spv")?;

        let pipeline = GraphicsPipelineBuilder::new(target.render_pass())
            .vertex_shader(&vertex)
            .fragment_shader(&fragment)
            .vertex_binding(Vertex::binding_description())
            .vertex_attributes(&Vertex::attribute_descriptions())
            .cull_mode(CullMode::None)
            .color_attachment_count(0)
            .depth_compare_op(CompareOp::LessOrEqual)
            .dynamic_depth_bias()
            .build(device, &layout)?;

        info!("Shadow pass created: {}x{} {:?}, {:?} filtering", size, size, SHADOW_MAP_FORMAT, filter);

        Ok(Self {
            pipeline,
            layout,
            target,
            bias: DepthBias::from(&config.shadow),
        })
    }

    /// Sampler, view and layout for binding the shadow map in set 1.
    pub fn image_info(&self) -> RhiResult<vk::DescriptorImageInfo> {
        self.target.descriptor_image_info(DEPTH_ATTACHMENT)
    }

    pub fn recorder(&self) -> ShadowRecorder {
        ShadowRecorder {
            pipeline: PassPipeline {
                pipeline: self.pipeline.handle(),
                layout: self.layout.handle(),
            },
            render_pass: self.target.render_pass(),
            framebuffer: self.target.framebuffer(),
            extent: self.target.extent(),
            bias: self.bias,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadowRecorder {
    pub pipeline: PassPipeline,
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub bias: DepthBias,
}

impl ShadowRecorder {
    /// Records the whole shadow render pass. Returns the number of meshes
    /// drawn.
    pub fn record(&self, encoder: &mut dyn CommandEncoder, frame: &FrameContext<'_>) -> usize {
        let clear_values = [vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        }];

        encoder.begin_render_pass(self.render_pass, self.framebuffer, self.extent, &clear_values);
        encoder.set_viewport_and_scissor(self.extent);
        encoder.set_depth_bias(self.bias.constant, self.bias.clamp, self.bias.slope);

        encoder.bind_descriptor_sets(self.pipeline.layout, frame.descriptor_sets);
        encoder.bind_pipeline(self.pipeline.pipeline);
        let draws = record_meshes(encoder, self.pipeline, frame);

        encoder.end_render_pass();
        draws
    }
}
