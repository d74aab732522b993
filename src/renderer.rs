// Renderer - the backend plus the frame driver that sequences it

use ash::vk;
use std::sync::Arc;

use crate::backend::{DeviceContext, VulkanBackend};
use crate::config::Config;
use crate::driver::{FrameDriver, FrameGpu, TickOutcome};
use crate::error::RenderResult;
use crate::overlay::OverlayProducer;
use crate::window::SurfaceProvider;

pub struct Renderer {
    driver: FrameDriver,
    backend: VulkanBackend,
}

impl Renderer {
    pub fn new(surfaces: Box<dyn SurfaceProvider>, config: &Config) -> RenderResult<Self> {
        let backend = VulkanBackend::new(surfaces, config)?;
        let driver = FrameDriver::new(backend.image_count());
        Ok(Self { driver, backend })
    }

    /// Draw and present one frame with `overlay` composed over the scene
    pub fn render_frame(&mut self, overlay: &mut dyn OverlayProducer) -> RenderResult<TickOutcome> {
        self.driver.tick(&mut self.backend, overlay)
    }

    /// The window changed size; the chain is rebuilt on the next frame
    pub fn resized(&mut self) {
        self.driver.request_recreate();
    }

    /// The image most recently acquired for composition
    pub fn current_image(&self) -> Option<vk::Image> {
        self.driver
            .acquired_image()
            .and_then(|index| self.backend.image(index))
    }

    pub fn current_frame(&self) -> usize {
        self.driver.current_frame()
    }

    pub fn overlay_render_pass(&self) -> vk::RenderPass {
        self.backend.overlay_render_pass()
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.backend.extent()
    }

    pub fn context(&self) -> &Arc<DeviceContext> {
        self.backend.context()
    }

    /// Let in-flight frames finish
    pub fn wait_idle(&mut self) -> RenderResult<()> {
        self.driver.shutdown(&mut self.backend)
    }
}
