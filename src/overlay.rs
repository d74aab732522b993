// Overlay injection point
//
// The backend begins the overlay pass, hands an OverlayFrame to the producer,
// and ends the pass once the producer returns. The producer only ever records
// draw commands; it never begins, ends, or submits anything itself.

use ash::vk;
use glam::Vec4;

use crate::config::OverlayConfig;
use crate::error::RenderResult;

/// Everything a producer may use while the overlay pass is open
pub struct OverlayFrame<'a> {
    device: &'a ash::Device,
    command_buffer: vk::CommandBuffer,
    render_pass: vk::RenderPass,
    image: vk::Image,
    image_index: usize,
    extent: vk::Extent2D,
}

impl<'a> OverlayFrame<'a> {
    pub(crate) fn new(
        device: &'a ash::Device,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        image: vk::Image,
        image_index: usize,
        extent: vk::Extent2D,
    ) -> Self {
        Self {
            device,
            command_buffer,
            render_pass,
            image,
            image_index,
            extent,
        }
    }

    pub fn device(&self) -> &ash::Device {
        self.device
    }

    /// Command buffer with the overlay pass already begun
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// The presentable image being composed this tick
    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn image_index(&self) -> usize {
        self.image_index
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

/// Content drawn on top of the scene every frame
pub trait OverlayProducer {
    fn draw(&mut self, frame: &OverlayFrame<'_>) -> RenderResult<()>;
}

/// Leaves the overlay pass empty
pub struct NoOverlay;

impl OverlayProducer for NoOverlay {
    fn draw(&mut self, _frame: &OverlayFrame<'_>) -> RenderResult<()> {
        Ok(())
    }
}

/// Solid bar across the top of the frame
pub struct BannerOverlay {
    pub color: Vec4,
    pub height: u32,
}

impl BannerOverlay {
    pub fn from_config(config: &OverlayConfig) -> Self {
        Self {
            color: Vec4::from_array(config.color),
            height: config.height,
        }
    }

    /// Area covered by the banner, `None` when nothing would be visible
    pub fn rect(&self, extent: vk::Extent2D) -> Option<vk::Rect2D> {
        let height = self.height.min(extent.height);
        if height == 0 || extent.width == 0 {
            return None;
        }
        Some(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: extent.width,
                height,
            },
        })
    }
}

impl OverlayProducer for BannerOverlay {
    fn draw(&mut self, frame: &OverlayFrame<'_>) -> RenderResult<()> {
        let Some(rect) = self.rect(frame.extent()) else {
            return Ok(());
        };

        let attachments = [vk::ClearAttachment {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            color_attachment: 0,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.color.to_array(),
                },
            },
        }];
        let rects = [vk::ClearRect {
            rect,
            base_array_layer: 0,
            layer_count: 1,
        }];

        unsafe {
            frame
                .device()
                .cmd_clear_attachments(frame.command_buffer(), &attachments, &rects);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn banner_spans_the_top_edge() {
        let banner = BannerOverlay {
            color: Vec4::ONE,
            height: 48,
        };
        let rect = banner.rect(extent(1920, 1080)).unwrap();
        assert_eq!((rect.offset.x, rect.offset.y), (0, 0));
        assert_eq!((rect.extent.width, rect.extent.height), (1920, 48));
    }

    #[test]
    fn banner_is_clamped_to_the_frame() {
        let banner = BannerOverlay {
            color: Vec4::ONE,
            height: 500,
        };
        let rect = banner.rect(extent(640, 200)).unwrap();
        assert_eq!(rect.extent.height, 200);
    }

    #[test]
    fn empty_banner_draws_nothing() {
        let banner = BannerOverlay {
            color: Vec4::ONE,
            height: 0,
        };
        assert!(banner.rect(extent(640, 480)).is_none());

        let banner = BannerOverlay::from_config(&OverlayConfig::default());
        assert!(banner.rect(extent(0, 480)).is_none());
        assert_eq!(banner.height, 48);
    }
}
