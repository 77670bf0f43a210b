//! Command recording seam.
//!
//! Render passes record through [`CommandEncoder`] rather than a raw
//! command buffer. The Vulkan command buffer implements it directly, and
//! [`RecordingEncoder`] logs every call so recording logic can be checked
//! without a device.

use ash::vk;
use lumen_rhi::command::{CommandBuffer, full_scissor, full_viewport};

/// Graphics commands used by the render passes.
pub trait CommandEncoder {
    fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    );
    fn end_render_pass(&mut self);
    fn bind_pipeline(&mut self, pipeline: vk::Pipeline);
    fn bind_descriptor_sets(&mut self, layout: vk::PipelineLayout, sets: &[vk::DescriptorSet]);
    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer);
    fn bind_index_buffer(&mut self, buffer: vk::Buffer);
    fn push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, data: &[u8]);
    /// Viewport and scissor covering `extent`.
    fn set_viewport_and_scissor(&mut self, extent: vk::Extent2D);
    fn set_depth_bias(&mut self, constant: f32, clamp: f32, slope: f32);
    fn draw(&mut self, vertex_count: u32);
    fn draw_indexed(&mut self, index_count: u32);
}

impl CommandEncoder for CommandBuffer {
    fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        CommandBuffer::begin_render_pass(
            self,
            render_pass,
            framebuffer,
            full_scissor(extent),
            clear_values,
        );
    }

    fn end_render_pass(&mut self) {
        CommandBuffer::end_render_pass(self);
    }

    fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        self.bind_graphics_pipeline(pipeline);
    }

    fn bind_descriptor_sets(&mut self, layout: vk::PipelineLayout, sets: &[vk::DescriptorSet]) {
        CommandBuffer::bind_descriptor_sets(self, layout, 0, sets);
    }

    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
        self.bind_vertex_buffers(0, &[buffer], &[0]);
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
        CommandBuffer::bind_index_buffer(self, buffer, 0, vk::IndexType::UINT32);
    }

    fn push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, data: &[u8]) {
        CommandBuffer::push_constants(self, layout, stages, 0, data);
    }

    fn set_viewport_and_scissor(&mut self, extent: vk::Extent2D) {
        self.set_viewport(&full_viewport(extent));
        self.set_scissor(&full_scissor(extent));
    }

    fn set_depth_bias(&mut self, constant: f32, clamp: f32, slope: f32) {
        CommandBuffer::set_depth_bias(self, constant, clamp, slope);
    }

    fn draw(&mut self, vertex_count: u32) {
        CommandBuffer::draw(self, vertex_count, 1, 0, 0);
    }

    fn draw_indexed(&mut self, index_count: u32) {
        CommandBuffer::draw_indexed(self, index_count, 1, 0, 0, 0);
    }
}

/// A command captured by [`RecordingEncoder`].
#[derive(Clone, Debug, PartialEq)]
pub enum EncodedCommand {
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: usize,
    },
    EndRenderPass,
    BindPipeline(vk::Pipeline),
    BindDescriptorSets { layout: vk::PipelineLayout, count: usize },
    BindVertexBuffer(vk::Buffer),
    BindIndexBuffer(vk::Buffer),
    PushConstants { stages: vk::ShaderStageFlags, data: Vec<u8> },
    SetViewportAndScissor(vk::Extent2D),
    SetDepthBias { constant: f32, clamp: f32, slope: f32 },
    Draw { vertex_count: u32 },
    DrawIndexed { index_count: u32 },
}

impl EncodedCommand {
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            EncodedCommand::Draw { .. } | EncodedCommand::DrawIndexed { .. }
        )
    }
}

/// Encoder that records commands into a list instead of a command buffer.
#[derive(Debug, Default)]
pub struct RecordingEncoder {
    commands: Vec<EncodedCommand>,
}

impl RecordingEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[EncodedCommand] {
        &self.commands
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn take(&mut self) -> Vec<EncodedCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn draw_count(&self) -> usize {
        self.commands.iter().filter(|c| c.is_draw()).count()
    }

    /// Commands between each `BeginRenderPass` and its `EndRenderPass`,
    /// one group per render pass.
    pub fn render_passes(&self) -> Vec<&[EncodedCommand]> {
        let mut passes = Vec::new();
        let mut start = None;
        for (i, command) in self.commands.iter().enumerate() {
            match command {
                EncodedCommand::BeginRenderPass { .. } => start = Some(i),
                EncodedCommand::EndRenderPass => {
                    if let Some(begin) = start.take() {
                        passes.push(&self.commands[begin..=i]);
                    }
                }
                _ => {}
            }
        }
        passes
    }
}

impl CommandEncoder for RecordingEncoder {
    fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        self.commands.push(EncodedCommand::BeginRenderPass {
            render_pass,
            framebuffer,
            extent,
            clear_values: clear_values.len(),
        });
    }

    fn end_render_pass(&mut self) {
        self.commands.push(EncodedCommand::EndRenderPass);
    }

    fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        self.commands.push(EncodedCommand::BindPipeline(pipeline));
    }

    fn bind_descriptor_sets(&mut self, layout: vk::PipelineLayout, sets: &[vk::DescriptorSet]) {
        self.commands.push(EncodedCommand::BindDescriptorSets {
            layout,
            count: sets.len(),
        });
    }

    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
        self.commands.push(EncodedCommand::BindVertexBuffer(buffer));
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
        self.commands.push(EncodedCommand::BindIndexBuffer(buffer));
    }

    fn push_constants(&mut self, _layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, data: &[u8]) {
        self.commands.push(EncodedCommand::PushConstants {
            stages,
            data: data.to_vec(),
        });
    }

    fn set_viewport_and_scissor(&mut self, extent: vk::Extent2D) {
        self.commands.push(EncodedCommand::SetViewportAndScissor(extent));
    }

    fn set_depth_bias(&mut self, constant: f32, clamp: f32, slope: f32) {
        self.commands.push(EncodedCommand::SetDepthBias {
            constant,
            clamp,
            slope,
        });
    }

    fn draw(&mut self, vertex_count: u32) {
        self.commands.push(EncodedCommand::Draw { vertex_count });
    }

    fn draw_indexed(&mut self, index_count: u32) {
        self.commands.push(EncodedCommand::DrawIndexed { index_count });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_encoder_counts_draws() {
        let mut encoder = RecordingEncoder::new();
        encoder.bind_pipeline(vk::Pipeline::null());
        encoder.draw(6);
        encoder.draw_indexed(36);
        assert_eq!(encoder.draw_count(), 2);
        assert_eq!(encoder.commands().len(), 3);
    }

    #[test]
    fn test_render_passes_groups_commands() {
        let mut encoder = RecordingEncoder::new();
        let extent = vk::Extent2D {
            width: 4,
            height: 4,
        };
        encoder.begin_render_pass(vk::RenderPass::null(), vk::Framebuffer::null(), extent, &[]);
        encoder.draw(3);
        encoder.end_render_pass();
        encoder.draw(1);
        encoder.begin_render_pass(vk::RenderPass::null(), vk::Framebuffer::null(), extent, &[]);
        encoder.end_render_pass();

        let passes = encoder.render_passes();
        assert_eq!(passes.len(), 2);
        assert_eq!(passes[0].len(), 3);
        assert_eq!(passes[1].len(), 2);
    }

    #[test]
    fn test_take_empties_encoder() {
        let mut encoder = RecordingEncoder::new();
        encoder.draw(6);
        assert_eq!(encoder.take().len(), 1);
        assert!(encoder.commands().is_empty());
    }
}
