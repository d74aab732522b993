// Backend module - Vulkan presentation layer
//
// Thin wrappers around ash. Each wrapper owns its handles and destroys them in
// Drop; everything holds an Arc<DeviceContext> so the device goes last.

pub mod device;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod targets;
pub mod vulkan;

pub use device::DeviceContext;
pub use swapchain::Swapchain;
pub use vulkan::VulkanBackend;
