// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// A chain is replaced wholesale on resize; the previous chain is handed to the
// driver as the old_swapchain hint and destroyed once its successor exists.

use ash::khr::swapchain;
use ash::vk;
use std::sync::Arc;

use super::device::QueueFamilies;
use super::DeviceContext;
use crate::driver::{Acquire, Present};
use crate::error::{RenderError, RenderResult, ResultExt};

/// Prefer an sRGB BGRA format, otherwise take whatever the surface lists first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// The requested mode if the surface supports it, FIFO otherwise
pub fn choose_present_mode(
    requested: vk::PresentModeKHR,
    available: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    if available.contains(&requested) {
        requested
    } else {
        // FIFO is always supported
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's own extent when it has one, else `desired` clamped to its limits
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, desired: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: desired
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: desired
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One image more than the minimum, capped when the surface has a maximum
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

/// Images are shared between the graphics and present families when they differ
pub fn image_sharing(families: &QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.graphics == families.present {
        (vk::SharingMode::EXCLUSIVE, vec![])
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    }
}

/// One presentable image chain and its views
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    loader: swapchain::Device,
    context: Arc<DeviceContext>,
}

impl Swapchain {
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire next image, signaling `semaphore` when it is ready to be written
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> RenderResult<Acquire> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.handle, u64::MAX, semaphore, vk::Fence::null())
        };

        match result {
            Ok((index, suboptimal)) => Ok(Acquire::Image {
                index: index as usize,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
            Err(e) => Err(e).presentation("Failed to acquire swapchain image"),
        }
    }

    /// Present rendered image to screen once `wait_semaphore` signals
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: usize,
        wait_semaphore: vk::Semaphore,
    ) -> RenderResult<Present> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.handle];
        let image_indices = [image_index as u32];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.loader.queue_present(queue, &present_info) };

        match result {
            Ok(false) => Ok(Present::Done),
            // Suboptimal counts as stale here
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Present::Stale),
            Err(e) => Err(e).presentation("Failed to present swapchain image"),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.context.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

/// Creates chains and keeps the live one
pub struct SwapchainManager {
    chain: Option<Swapchain>,
    requested_present_mode: vk::PresentModeKHR,
    loader: swapchain::Device,
    context: Arc<DeviceContext>,
}

impl SwapchainManager {
    pub fn new(context: Arc<DeviceContext>, requested_present_mode: vk::PresentModeKHR) -> Self {
        let loader = swapchain::Device::new(&context.instance, &context.device);
        Self {
            chain: None,
            requested_present_mode,
            loader,
            context,
        }
    }

    pub fn chain(&self) -> Option<&Swapchain> {
        self.chain.as_ref()
    }

    /// Build a new chain for the surface, sized to `desired` when the surface
    /// leaves the choice to us.
    ///
    /// The previous chain stays live until the new one is complete; on error it
    /// is kept untouched.
    pub fn create_swapchain(&mut self, desired: vk::Extent2D) -> RenderResult<&Swapchain> {
        let context = &self.context;
        let physical_device = context.physical_device;
        let surface = context.surface;
        let surface_loader = &context.surface_loader;

        // Query surface capabilities
        let caps = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)
        }
        .swapchain("Failed to query surface capabilities")?;

        // Query supported formats
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)
        }
        .swapchain("Failed to query surface formats")?;

        // Query supported present modes
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)
        }
        .swapchain("Failed to query present modes")?;

        let surface_format = choose_surface_format(&formats)
            .ok_or_else(|| RenderError::Swapchain("Surface reports no formats".into()))?;

        let present_mode = choose_present_mode(self.requested_present_mode, &present_modes);
        if present_mode != self.requested_present_mode {
            log::warn!(
                "Present mode {:?} unsupported, using {:?}",
                self.requested_present_mode,
                present_mode
            );
        }

        let extent = choose_extent(&caps, desired);
        if extent.width == 0 || extent.height == 0 {
            return Err(RenderError::Swapchain(format!(
                "Surface has zero area ({}x{})",
                extent.width, extent.height
            )));
        }

        let image_count = choose_image_count(&caps);
        let (sharing_mode, queue_family_indices) = image_sharing(&context.queue_families);
        let old_swapchain = self
            .chain
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |chain| chain.handle);

        log::info!(
            "Creating swapchain: {}x{}, {:?}, {:?}",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode
        );

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&queue_family_indices)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let handle = unsafe { self.loader.create_swapchain(&create_info, None) }
            .swapchain("Failed to create swapchain")?;

        // From here on the chain owns the handle and cleans up whatever exists
        let mut chain = Swapchain {
            handle,
            images: Vec::new(),
            image_views: Vec::new(),
            format: surface_format.format,
            extent,
            loader: self.loader.clone(),
            context: Arc::clone(context),
        };

        chain.images = unsafe { self.loader.get_swapchain_images(handle) }
            .swapchain("Failed to get swapchain images")?;

        for &image in &chain.images {
            let view = create_image_view(&context.device, image, chain.format)?;
            chain.image_views.push(view);
        }

        log::info!("Created swapchain with {} images", chain.images.len());

        // Dropping the previous chain destroys it
        Ok(&*self.chain.insert(chain))
    }
}

fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> RenderResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&create_info, None) }
        .swapchain("Failed to create image view")
}
