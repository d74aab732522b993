// Vulkan frame backend
//
// Owns every GPU object the frame loop touches and implements FrameGpu on top
// of them. Field order is drop order: per-frame objects first, the device
// context last, the window after that.

use ash::vk;
use glam::Vec4;
use std::sync::Arc;

use super::pipeline::ScenePipeline;
use super::render_pass::RenderPasses;
use super::swapchain::{Swapchain, SwapchainManager};
use super::sync::FrameSlots;
use super::targets::FrameTargets;
use super::DeviceContext;
use crate::config::{Config, ShaderConfig};
use crate::driver::{Acquire, FrameGpu, Present};
use crate::error::{RenderError, RenderResult, ResultExt};
use crate::overlay::{OverlayFrame, OverlayProducer};
use crate::window::SurfaceProvider;

pub struct VulkanBackend {
    slots: FrameSlots,
    targets: Option<FrameTargets>,
    pipeline: ScenePipeline,
    passes: RenderPasses,
    swapchain: SwapchainManager,
    context: Arc<DeviceContext>,
    surfaces: Box<dyn SurfaceProvider>,
    shaders: ShaderConfig,
    clear_color: Vec4,
}

impl VulkanBackend {
    /// Bootstrap the device and build everything up to the first frame
    pub fn new(surfaces: Box<dyn SurfaceProvider>, config: &Config) -> RenderResult<Self> {
        log::info!("Initializing Vulkan...");

        let context =
            DeviceContext::bootstrap(surfaces.as_ref(), &config.window.title, &config.device)?;

        let mut swapchain = SwapchainManager::new(Arc::clone(&context), config.present_mode());
        let chain = swapchain.create_swapchain(surfaces.framebuffer_extent())?;

        let passes = RenderPasses::new(Arc::clone(&context), chain.format)?;
        let pipeline = ScenePipeline::new(Arc::clone(&context), passes.scene, &config.shaders)?;
        let targets = FrameTargets::new(Arc::clone(&context), &passes, chain)?;
        let slots = FrameSlots::new(Arc::clone(&context))?;

        log::info!("Vulkan initialized successfully!");

        Ok(Self {
            slots,
            targets: Some(targets),
            pipeline,
            passes,
            swapchain,
            context,
            surfaces,
            shaders: config.shaders.clone(),
            clear_color: config.clear_color(),
        })
    }

    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.context
    }

    pub fn overlay_render_pass(&self) -> vk::RenderPass {
        self.passes.overlay
    }

    /// Presentable image at `index` in the live chain
    pub fn image(&self, index: usize) -> Option<vk::Image> {
        self.swapchain
            .chain()
            .and_then(|chain| chain.images.get(index).copied())
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.swapchain.chain().map(|chain| chain.extent)
    }

    fn chain(&self) -> RenderResult<&Swapchain> {
        self.swapchain
            .chain()
            .ok_or_else(|| RenderError::Presentation("No live swapchain".into()))
    }

    fn targets(&self) -> RenderResult<&FrameTargets> {
        self.targets
            .as_ref()
            .ok_or_else(|| RenderError::Presentation("Render targets not built".into()))
    }

    fn record_scene(
        &self,
        command_buffer: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    ) -> RenderResult<()> {
        let device = &self.context.device;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color.to_array(),
            },
        }];
        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.passes.scene)
            .framebuffer(framebuffer)
            .render_area(full_rect(extent))
            .clear_values(&clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            begin_commands(device, command_buffer)?;
            device.cmd_begin_render_pass(command_buffer, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            device.cmd_set_scissor(command_buffer, 0, &[full_rect(extent)]);
            device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.pipeline,
            );
            // Fullscreen triangle
            device.cmd_draw(command_buffer, 3, 1, 0, 0);
            device.cmd_end_render_pass(command_buffer);
            device
                .end_command_buffer(command_buffer)
                .presentation("Failed to end scene command buffer")
        }
    }

    fn record_overlay(
        &self,
        command_buffer: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        image: usize,
        overlay: &mut dyn OverlayProducer,
    ) -> RenderResult<()> {
        let device = &self.context.device;
        let chain = self.chain()?;

        // Load op preserves the scene, nothing to clear
        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.passes.overlay)
            .framebuffer(framebuffer)
            .render_area(full_rect(chain.extent));

        unsafe {
            begin_commands(device, command_buffer)?;
            device.cmd_begin_render_pass(command_buffer, &render_pass_info, vk::SubpassContents::INLINE);
        }

        let frame = OverlayFrame::new(
            device,
            command_buffer,
            self.passes.overlay,
            chain.images[image],
            image,
            chain.extent,
        );
        overlay.draw(&frame)?;

        unsafe {
            device.cmd_end_render_pass(command_buffer);
            device
                .end_command_buffer(command_buffer)
                .presentation("Failed to end overlay command buffer")
        }
    }
}

fn full_rect(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

unsafe fn begin_commands(device: &ash::Device, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
    device
        .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
        .presentation("Failed to reset command buffer")?;

    let begin_info = vk::CommandBufferBeginInfo::default()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    device
        .begin_command_buffer(command_buffer, &begin_info)
        .presentation("Failed to begin command buffer")
}

impl FrameGpu for VulkanBackend {
    fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()> {
        self.slots.wait(slot)
    }

    fn acquire_image(&mut self, slot: usize) -> RenderResult<Acquire> {
        self.chain()?
            .acquire_next_image(self.slots.slot(slot).image_available)
    }

    fn record(&mut self, image: usize, overlay: &mut dyn OverlayProducer) -> RenderResult<()> {
        let targets = self.targets()?;
        let extent = self.chain()?.extent;

        self.record_scene(
            targets.scene_commands[image],
            targets.scene_framebuffers[image],
            extent,
        )?;
        self.record_overlay(
            targets.overlay_commands[image],
            targets.overlay_framebuffers[image],
            image,
            overlay,
        )
    }

    fn reset_slot(&mut self, slot: usize) -> RenderResult<()> {
        self.slots.reset(slot)
    }

    fn submit(&mut self, slot: usize, image: usize) -> RenderResult<()> {
        let targets = self.targets()?;
        let sync = self.slots.slot(slot);

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [targets.scene_commands[image], targets.overlay_commands[image]];
        let signal_semaphores = [sync.render_finished];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.context.device.queue_submit(
                self.context.graphics_queue,
                &[submit_info],
                sync.in_flight,
            )
        }
        .presentation("Failed to submit frame")
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        self.context.wait_idle()
    }

    fn present(&mut self, slot: usize, image: usize) -> RenderResult<Present> {
        self.chain()?.present(
            self.context.present_queue,
            image,
            self.slots.slot(slot).render_finished,
        )
    }

    fn recreate(&mut self) -> RenderResult<usize> {
        self.context.wait_idle()?;

        // Framebuffers reference the old views
        self.targets = None;

        let extent = self.surfaces.framebuffer_extent();
        let chain = self.swapchain.create_swapchain(extent)?;

        if chain.format != self.passes.format {
            log::info!(
                "Swapchain format changed {:?} -> {:?}, rebuilding passes",
                self.passes.format,
                chain.format
            );
            self.passes = RenderPasses::new(Arc::clone(&self.context), chain.format)?;
            self.pipeline =
                ScenePipeline::new(Arc::clone(&self.context), self.passes.scene, &self.shaders)?;
        }

        let actual = chain.extent;
        let image_count = chain.image_count();
        self.targets = Some(FrameTargets::new(
            Arc::clone(&self.context),
            &self.passes,
            chain,
        )?);

        log::info!(
            "Swapchain recreated: {}x{}, {} images",
            actual.width,
            actual.height,
            image_count
        );
        Ok(image_count)
    }

    fn image_count(&self) -> usize {
        self.swapchain.chain().map_or(0, Swapchain::image_count)
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        // Nothing may be destroyed while the GPU still uses it
        let _ = self.context.wait_idle();
    }
}
