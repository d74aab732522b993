// Per-image render targets
//
// Two framebuffers and two primary command buffers per swapchain image (one
// of each for the scene pass and the overlay pass), allocated from one pool.
// Everything here is rebuilt with the swapchain.

use ash::vk;
use std::sync::Arc;

use super::render_pass::RenderPasses;
use super::swapchain::Swapchain;
use super::DeviceContext;
use crate::error::{RenderResult, ResultExt};

pub struct FrameTargets {
    pub scene_framebuffers: Vec<vk::Framebuffer>,
    pub overlay_framebuffers: Vec<vk::Framebuffer>,
    pub command_pool: vk::CommandPool,
    pub scene_commands: Vec<vk::CommandBuffer>,
    pub overlay_commands: Vec<vk::CommandBuffer>,
    context: Arc<DeviceContext>,
}

impl FrameTargets {
    /// Build framebuffers, then the pool, then the command buffers.
    ///
    /// A failure part way drops whatever was already created.
    pub fn new(
        context: Arc<DeviceContext>,
        passes: &RenderPasses,
        chain: &Swapchain,
    ) -> RenderResult<Self> {
        let mut targets = Self {
            scene_framebuffers: Vec::with_capacity(chain.image_count()),
            overlay_framebuffers: Vec::with_capacity(chain.image_count()),
            command_pool: vk::CommandPool::null(),
            scene_commands: Vec::new(),
            overlay_commands: Vec::new(),
            context,
        };
        let device = &targets.context.device;

        let [scene_plan, overlay_plan] =
            framebuffer_plan([passes.scene, passes.overlay], &chain.image_views);
        for (pass, view) in scene_plan {
            let framebuffer = create_framebuffer(device, pass, view, chain.extent)?;
            targets.scene_framebuffers.push(framebuffer);
        }
        for (pass, view) in overlay_plan {
            let framebuffer = create_framebuffer(device, pass, view, chain.extent)?;
            targets.overlay_framebuffers.push(framebuffer);
        }

        // Buffers are re-recorded every time their image comes around
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(targets.context.queue_families.graphics);
        targets.command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .resource("Failed to create command pool")?;

        let alloc_info = command_buffer_info(targets.command_pool, chain.image_count());

        targets.scene_commands = unsafe { device.allocate_command_buffers(&alloc_info) }
            .resource("Failed to allocate scene command buffers")?;
        targets.overlay_commands = unsafe { device.allocate_command_buffers(&alloc_info) }
            .resource("Failed to allocate overlay command buffers")?;

        log::debug!(
            "Created render targets for {} swapchain images",
            chain.image_count()
        );

        Ok(targets)
    }
}

/// Which pass each framebuffer is built for, one per image view and pass.
///
/// The first list is for the scene pass, the second for the overlay pass, both
/// in swapchain image order.
pub fn framebuffer_plan(
    [scene, overlay]: [vk::RenderPass; 2],
    views: &[vk::ImageView],
) -> [Vec<(vk::RenderPass, vk::ImageView)>; 2] {
    [
        views.iter().map(|&view| (scene, view)).collect(),
        views.iter().map(|&view| (overlay, view)).collect(),
    ]
}

/// One primary buffer per swapchain image
pub fn command_buffer_info(
    pool: vk::CommandPool,
    image_count: usize,
) -> vk::CommandBufferAllocateInfo<'static> {
    vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(image_count as u32)
}

fn create_framebuffer(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    view: vk::ImageView,
    extent: vk::Extent2D,
) -> RenderResult<vk::Framebuffer> {
    let attachments = [view];
    let framebuffer_info = vk::FramebufferCreateInfo::default()
        .render_pass(render_pass)
        .attachments(&attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);

    unsafe { device.create_framebuffer(&framebuffer_info, None) }
        .resource("Failed to create framebuffer")
}

impl Drop for FrameTargets {
    fn drop(&mut self) {
        let device = &self.context.device;
        unsafe {
            // Destroying the pool frees its command buffers
            if self.command_pool != vk::CommandPool::null() {
                device.destroy_command_pool(self.command_pool, None);
            }
            for &framebuffer in self
                .overlay_framebuffers
                .iter()
                .chain(&self.scene_framebuffers)
            {
                device.destroy_framebuffer(framebuffer, None);
            }
        }
    }
}
