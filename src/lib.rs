//! Fresnel - two-pass Vulkan presentation with frames in flight.
//!
//! Each frame clears and draws a scene pass, then composes an overlay pass on
//! top without clearing, and presents. Up to
//! [`MAX_FRAMES_IN_FLIGHT`](backend::sync::MAX_FRAMES_IN_FLIGHT) frames are
//! recorded ahead of the GPU.
//!
//! - [`backend`] owns the Vulkan objects (device, swapchain, passes, pipeline,
//!   per-image targets, frame slots).
//! - [`driver`] sequences one frame at a time against any [`driver::FrameGpu`].
//! - [`renderer`] pairs the two behind a small API.
//! - [`registry`] builds and wires modules by name.

pub mod backend;
pub mod config;
pub mod driver;
pub mod error;
pub mod overlay;
pub mod registry;
pub mod renderer;
pub mod window;

pub use config::Config;
pub use driver::{SkipReason, TickOutcome};
pub use error::{RenderError, RenderResult};
pub use overlay::{BannerOverlay, NoOverlay, OverlayFrame, OverlayProducer};
pub use renderer::Renderer;
pub use window::{SurfaceProvider, WinitSurface};
