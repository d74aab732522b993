// Windowing capability consumed by the backend
//
// The backend never talks to a window toolkit directly. It asks a
// SurfaceProvider for the instance extensions, the surface, and the current
// framebuffer size.

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::c_char;
use std::sync::Arc;
use winit::window::Window;

use crate::error::{RenderResult, ResultExt};

/// What the presentation engine needs from a window.
pub trait SurfaceProvider {
    /// Instance extensions needed to create a surface for this window
    fn required_extensions(&self) -> RenderResult<Vec<*const c_char>>;

    /// Create a presentable surface for `instance` from the native window handle
    fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> RenderResult<vk::SurfaceKHR>;

    /// Current framebuffer size in pixels
    fn framebuffer_extent(&self) -> vk::Extent2D;
}

/// winit-backed surface provider
///
/// Keeps the window alive for as long as the surface can be used.
pub struct WinitSurface {
    window: Arc<Window>,
}

impl WinitSurface {
    pub fn new(window: Arc<Window>) -> Self {
        Self { window }
    }
}

impl SurfaceProvider for WinitSurface {
    fn required_extensions(&self) -> RenderResult<Vec<*const c_char>> {
        let display = self
            .window
            .display_handle()
            .initialization("Failed to get display handle")?
            .as_raw();

        let extensions = ash_window::enumerate_required_extensions(display)
            .initialization("Failed to query surface extensions")?;

        Ok(extensions.to_vec())
    }

    fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> RenderResult<vk::SurfaceKHR> {
        let display = self
            .window
            .display_handle()
            .initialization("Failed to get display handle")?
            .as_raw();
        let window = self
            .window
            .window_handle()
            .initialization("Failed to get window handle")?
            .as_raw();

        // Safety: both handles come from a window we keep alive through the Arc
        unsafe { ash_window::create_surface(entry, instance, display, window, None) }
            .initialization("Failed to create window surface")
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }
}
