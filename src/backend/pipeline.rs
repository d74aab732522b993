// Graphics pipeline for the scene pass
//
// One fixed pipeline: a fullscreen triangle generated in the vertex shader, so
// there is no vertex input and the layout is empty. Viewport and scissor are
// dynamic, which lets the pipeline survive resizes as long as the format holds.

use ash::vk;
use std::sync::Arc;

use super::shader::{create_shader_module, load_spirv};
use super::DeviceContext;
use crate::config::ShaderConfig;
use crate::error::{RenderError, RenderResult, ResultExt};

/// Viewport and scissor are set per command buffer
pub const DYNAMIC_STATES: [vk::DynamicState; 2] =
    [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];

pub fn input_assembly_state() -> vk::PipelineInputAssemblyStateCreateInfo<'static> {
    vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false)
}

pub fn rasterization_state() -> vk::PipelineRasterizationStateCreateInfo<'static> {
    vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false)
}

/// Opaque writes to every channel
pub fn color_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
}

/// The scene pipeline and its layout
pub struct ScenePipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    context: Arc<DeviceContext>,
}

impl ScenePipeline {
    /// Build the pipeline for subpass 0 of `render_pass`.
    ///
    /// Shader modules only live for the duration of this call.
    pub fn new(
        context: Arc<DeviceContext>,
        render_pass: vk::RenderPass,
        shaders: &ShaderConfig,
    ) -> RenderResult<Self> {
        let vert_code = load_spirv(&shaders.vertex)?;
        let frag_code = load_spirv(&shaders.fragment)?;

        let device = &context.device;
        let vert_module = create_shader_module(device, &vert_code)?;
        let frag_module = match create_shader_module(device, &frag_code) {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.destroy_shader_module(vert_module, None) };
                return Err(e);
            }
        };

        let built = Self::build(device, render_pass, vert_module, frag_module);

        unsafe {
            device.destroy_shader_module(vert_module, None);
            device.destroy_shader_module(frag_module, None);
        }

        let (pipeline, layout) = built?;
        log::debug!("Created scene pipeline");

        Ok(Self {
            pipeline,
            layout,
            context,
        })
    }

    fn build(
        device: &ash::Device,
        render_pass: vk::RenderPass,
        vert_module: vk::ShaderModule,
        frag_module: vk::ShaderModule,
    ) -> RenderResult<(vk::Pipeline, vk::PipelineLayout)> {
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_module)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_module)
                .name(c"main"),
        ];

        // Vertices come from gl_VertexIndex
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly = input_assembly_state();

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = rasterization_state();

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments = [color_blend_attachment()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&DYNAMIC_STATES);

        // No descriptor sets, no push constants
        let layout_info = vk::PipelineLayoutCreateInfo::default();
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .resource("Failed to create pipeline layout")?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };

        match pipelines {
            Ok(pipelines) if !pipelines.is_empty() => Ok((pipelines[0], layout)),
            Ok(_) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                Err(RenderError::ResourceBuild(
                    "Driver returned no graphics pipeline".into(),
                ))
            }
            Err((_, e)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                Err(e).resource("Failed to create graphics pipeline")
            }
        }
    }
}

impl Drop for ScenePipeline {
    fn drop(&mut self) {
        unsafe {
            self.context.device.destroy_pipeline(self.pipeline, None);
            self.context.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}
