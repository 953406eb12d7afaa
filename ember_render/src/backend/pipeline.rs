use std::sync::Arc;

use ash::vk;
use tracing::debug;

use super::render_pass::RenderPass;
use super::vulkan::{Device, Error, Shader};

/// A color blend attachment with blending disabled and the full RGBA write
/// mask, the renderer's default.
pub fn disabled_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(false)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .src_color_blend_factor(vk::BlendFactor::ONE)
        .dst_color_blend_factor(vk::BlendFactor::ZERO)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD)
}

/// A viewport with a negated height, flipping clip-space y so that matrices
/// built for a bottom-left-origin convention render upright.
pub fn flipped_viewport(width: u32, height: u32) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: height as f32,
        width: width as f32,
        height: -(height as f32),
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Fixed-function state for a graphics pipeline, in plain-data form so it can
/// be adjusted freely before [`Pipeline::build`] assembles the create infos.
#[derive(Clone, Debug)]
pub struct FixedFunctionState {
    pub topology: vk::PrimitiveTopology,
    pub viewport: vk::Viewport,
    pub scissor: vk::Rect2D,
    pub polygon_mode: vk::PolygonMode,
    pub line_width: f32,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub samples: vk::SampleCountFlags,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    pub blend_attachments: Vec<vk::PipelineColorBlendAttachmentState>,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl Default for FixedFunctionState {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            viewport: vk::Viewport::default(),
            scissor: vk::Rect2D::default(),
            polygon_mode: vk::PolygonMode::FILL,
            line_width: 1.0,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            samples: vk::SampleCountFlags::TYPE_1,
            // Depth testing defaults on with less-or-equal comparison.
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS_OR_EQUAL,
            blend_attachments: vec![disabled_blend_attachment()],
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
        }
    }
}

/// A graphics pipeline plus its layout.
///
/// The pipeline references its render pass by compatibility; rebuilding in
/// place (after swapchain recreation) destroys the previous native objects
/// first.
pub struct Pipeline {
    device: Device,
    render_pass: Arc<RenderPass>,
    pub state: FixedFunctionState,
    shaders: Vec<Arc<Shader>>,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    push_constant_ranges: Vec<vk::PushConstantRange>,
    pipeline: Option<vk::Pipeline>,
    layout: Option<vk::PipelineLayout>,
}

impl Pipeline {
    pub fn new(device: &Device, render_pass: Arc<RenderPass>) -> Self {
        Self {
            device: device.clone(),
            render_pass,
            state: FixedFunctionState::default(),
            shaders: Vec::new(),
            set_layouts: Vec::new(),
            push_constant_ranges: Vec::new(),
            pipeline: None,
            layout: None,
        }
    }

    /// The ordered shader stage list (vertex first, then fragment).
    pub fn set_shaders(&mut self, shaders: Vec<Arc<Shader>>) {
        self.shaders = shaders;
    }

    pub fn set_descriptor_layouts(&mut self, layouts: Vec<vk::DescriptorSetLayout>) {
        self.set_layouts = layouts;
    }

    pub fn set_push_constant_ranges(&mut self, ranges: Vec<vk::PushConstantRange>) {
        self.push_constant_ranges = ranges;
    }

    /// Assembles the pipeline layout and graphics pipeline, destroying any
    /// previously built objects first.
    pub fn build(&mut self) -> Result<(), Error> {
        assert!(!self.shaders.is_empty(), "pipeline built without shaders");

        self.destroy();

        let stages: Vec<vk::PipelineShaderStageCreateInfo<'_>> = self
            .shaders
            .iter()
            .map(|shader| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(shader.stage())
                    .module(shader.module())
                    .name(shader.entry())
            })
            .collect();

        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&self.set_layouts)
            .push_constant_ranges(&self.push_constant_ranges);
        let layout = unsafe { self.device.raw().create_pipeline_layout(&layout_info, None)? };
        // Stored immediately so a failed pipeline creation below cannot leak
        // the layout.
        self.layout = Some(layout);

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.state.vertex_bindings)
            .vertex_attribute_descriptions(&self.state.vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.state.topology)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(std::slice::from_ref(&self.state.viewport))
            .scissors(std::slice::from_ref(&self.state.scissor));

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.state.polygon_mode)
            .line_width(self.state.line_width)
            .cull_mode(self.state.cull_mode)
            .front_face(self.state.front_face)
            .depth_bias_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(self.state.samples)
            .min_sample_shading(1.0)
            .alpha_to_coverage_enable(false)
            .alpha_to_one_enable(false);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.state.depth_test)
            .depth_write_enable(self.state.depth_write)
            .depth_compare_op(self.state.depth_compare)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);

        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&self.state.blend_attachments)
            .blend_constants([0.0, 0.0, 0.0, 0.0]);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .layout(layout)
            .render_pass(self.render_pass.raw())
            .subpass(0)
            .base_pipeline_handle(vk::Pipeline::null())
            .base_pipeline_index(-1);

        let pipelines = unsafe {
            self.device
                .raw()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
                .map_err(|(_, err)| err)?
        };

        self.pipeline = Some(pipelines[0]);
        debug!("built graphics pipeline ({} stages)", stages.len());
        Ok(())
    }

    pub fn raw(&self) -> vk::Pipeline {
        self.pipeline.expect("pipeline was not built")
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.expect("pipeline was not built")
    }

    fn destroy(&mut self) {
        unsafe {
            if let Some(pipeline) = self.pipeline.take() {
                self.device.raw().destroy_pipeline(pipeline, None);
            }
            if let Some(layout) = self.layout.take() {
                self.device.raw().destroy_pipeline_layout(layout, None);
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;

    use super::{disabled_blend_attachment, flipped_viewport, FixedFunctionState};

    #[test]
    fn flipped_viewport_negates_height() {
        let viewport = flipped_viewport(800, 600);
        assert_eq!(viewport.y, 600.0);
        assert_eq!(viewport.height, -600.0);
        assert_eq!(viewport.width, 800.0);
    }

    #[test]
    fn defaults_enable_depth_testing() {
        let state = FixedFunctionState::default();
        assert!(state.depth_test);
        assert!(state.depth_write);
        assert_eq!(state.depth_compare, vk::CompareOp::LESS_OR_EQUAL);
    }

    #[test]
    fn defaults_disable_blending_with_full_write_mask() {
        let attachment = disabled_blend_attachment();
        assert_eq!(attachment.blend_enable, vk::FALSE);
        assert_eq!(attachment.color_write_mask, vk::ColorComponentFlags::RGBA);

        let state = FixedFunctionState::default();
        assert_eq!(state.blend_attachments.len(), 1);
    }
}
