// Render passes - scene + overlay compositing
//
// Both passes target the swapchain image. The scene pass clears and leaves the
// image in COLOR_ATTACHMENT_OPTIMAL; the overlay pass loads that content, draws
// on top, and hands the image over for presentation.

use ash::vk;
use std::sync::Arc;

use super::DeviceContext;
use crate::error::{RenderResult, ResultExt};

/// Color attachment of the scene pass
pub fn scene_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
}

/// Color attachment of the overlay pass, keeps what the scene drew
pub fn overlay_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::LOAD)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
}

// The scene dependency also covers reads so the layout transition on the
// image's first use each frame waits for the presentation engine.
pub fn scene_dependency() -> vk::SubpassDependency {
    external_dependency(
        vk::AccessFlags::empty(),
        vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
    )
}

// LOAD reads what the scene pass wrote earlier in the same submission, so those
// writes must be available before the overlay touches the attachment.
pub fn overlay_dependency() -> vk::SubpassDependency {
    external_dependency(
        vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
    )
}

fn external_dependency(
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) -> vk::SubpassDependency {
    vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(src_access)
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(dst_access)
}

fn create_render_pass(
    device: &ash::Device,
    attachment: vk::AttachmentDescription,
    dependency: vk::SubpassDependency,
) -> RenderResult<vk::RenderPass> {
    let color_attachment_refs = [vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachment_refs)];

    let attachments = [attachment];
    let dependencies = [dependency];

    let render_pass_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.create_render_pass(&render_pass_info, None) }
        .resource("Failed to create render pass")
}

/// The scene and overlay passes for one swapchain format
pub struct RenderPasses {
    pub scene: vk::RenderPass,
    pub overlay: vk::RenderPass,
    pub format: vk::Format,
    context: Arc<DeviceContext>,
}

impl RenderPasses {
    pub fn new(context: Arc<DeviceContext>, format: vk::Format) -> RenderResult<Self> {
        let device = &context.device;

        let scene = create_render_pass(device, scene_attachment(format), scene_dependency())?;
        let overlay =
            match create_render_pass(device, overlay_attachment(format), overlay_dependency()) {
                Ok(pass) => pass,
                Err(e) => {
                    unsafe { device.destroy_render_pass(scene, None) };
                    return Err(e);
                }
            };

        log::debug!("Created scene and overlay render passes for {:?}", format);

        Ok(Self {
            scene,
            overlay,
            format,
            context,
        })
    }
}

impl Drop for RenderPasses {
    fn drop(&mut self) {
        unsafe {
            self.context.device.destroy_render_pass(self.overlay, None);
            self.context.device.destroy_render_pass(self.scene, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;

    #[test]
    fn scene_clears_and_overlay_preserves() {
        assert_eq!(scene_attachment(FORMAT).load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(overlay_attachment(FORMAT).load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(scene_attachment(FORMAT).store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(overlay_attachment(FORMAT).store_op, vk::AttachmentStoreOp::STORE);
    }

    #[test]
    fn layouts_chain_from_scene_into_overlay() {
        let scene = scene_attachment(FORMAT);
        let overlay = overlay_attachment(FORMAT);

        assert_eq!(scene.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(scene.final_layout, overlay.initial_layout);
        assert_eq!(overlay.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn both_passes_share_the_format() {
        assert_eq!(scene_attachment(FORMAT).format, FORMAT);
        assert_eq!(overlay_attachment(FORMAT).format, FORMAT);
        assert_eq!(scene_attachment(FORMAT).samples, vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn dependencies_wait_on_color_output() {
        for dependency in [scene_dependency(), overlay_dependency()] {
            assert_eq!(dependency.src_subpass, vk::SUBPASS_EXTERNAL);
            assert_eq!(dependency.dst_subpass, 0);
            assert_eq!(
                dependency.src_stage_mask,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            );
            assert_eq!(
                dependency.dst_stage_mask,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            );
        }

        assert!(scene_dependency()
            .dst_access_mask
            .contains(vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
    }

    #[test]
    fn overlay_load_sees_scene_writes() {
        let overlay = overlay_dependency();
        assert_eq!(overlay_attachment(FORMAT).load_op, vk::AttachmentLoadOp::LOAD);

        // Scene writes are made available, and the load is a read of them
        assert_eq!(overlay.src_access_mask, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(
            overlay.dst_access_mask,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
    }
}
