//! Error taxonomy for the presentation engine.
//!
//! Every failure the backend can report falls into one of four categories that
//! decide how the caller reacts, plus registry errors raised while wiring
//! modules:
//!
//! | Category         | Raised by                         | Reaction                    |
//! |------------------|-----------------------------------|-----------------------------|
//! | `Initialization` | device bootstrap                  | fatal, no retry             |
//! | `Swapchain`      | chain builds, stale acquire/present | recreate, skip the tick   |
//! | `ResourceBuild`  | passes, pipeline, framebuffers    | caller may abort setup      |
//! | `Presentation`   | acquire/submit/present failures   | fatal, ends the frame loop  |
//! | `Registry`       | module lookup and wiring          | fatal at startup            |

use std::fmt::Display;

use thiserror::Error;

/// Error type for the render backend.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Device, queue or descriptor-pool creation failed
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// Swapchain build failed or the chain went stale
    #[error("Swapchain error: {0}")]
    Swapchain(String),

    /// Render pass, pipeline, framebuffer or shader-module creation failed
    #[error("Resource build failed: {0}")]
    ResourceBuild(String),

    /// Acquire, submit or present failed for a reason other than staleness
    #[error("Presentation failed: {0}")]
    Presentation(String),

    /// Module registry lookup or wiring failed
    #[error("Registry error: {0}")]
    Registry(String),
}

impl RenderError {
    /// Whether the error must terminate the frame loop.
    ///
    /// Only swapchain errors are recoverable; the driver retries the
    /// recreation on the next tick.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RenderError::Swapchain(_))
    }
}

/// Result type alias for backend operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;

/// Attach an error category and a context message to a foreign error.
///
/// Reads like `anyhow::Context` at call sites:
///
/// ```
/// use fresnel::error::{RenderError, ResultExt};
///
/// let parsed: Result<u32, std::num::ParseIntError> = "x".parse();
/// let err = parsed.resource("Failed to parse count").unwrap_err();
/// assert!(matches!(err, RenderError::ResourceBuild(_)));
/// ```
pub trait ResultExt<T> {
    fn initialization(self, context: &str) -> RenderResult<T>;
    fn swapchain(self, context: &str) -> RenderResult<T>;
    fn resource(self, context: &str) -> RenderResult<T>;
    fn presentation(self, context: &str) -> RenderResult<T>;
}

impl<T, E: Display> ResultExt<T> for Result<T, E> {
    fn initialization(self, context: &str) -> RenderResult<T> {
        self.map_err(|e| RenderError::Initialization(format!("{}: {}", context, e)))
    }

    fn swapchain(self, context: &str) -> RenderResult<T> {
        self.map_err(|e| RenderError::Swapchain(format!("{}: {}", context, e)))
    }

    fn resource(self, context: &str) -> RenderResult<T> {
        self.map_err(|e| RenderError::ResourceBuild(format!("{}: {}", context, e)))
    }

    fn presentation(self, context: &str) -> RenderResult<T> {
        self.map_err(|e| RenderError::Presentation(format!("{}: {}", context, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn only_swapchain_errors_are_recoverable() {
        assert!(!RenderError::Swapchain("stale".into()).is_fatal());
        assert!(RenderError::Presentation("lost".into()).is_fatal());
        assert!(RenderError::Initialization("no gpu".into()).is_fatal());
        assert!(RenderError::ResourceBuild("no shader".into()).is_fatal());
    }

    #[test]
    fn context_carries_vulkan_result() {
        let result: Result<(), vk::Result> = Err(vk::Result::ERROR_DEVICE_LOST);
        let err = result.presentation("Failed to submit").unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("Presentation failed: Failed to submit"));
        assert!(message.to_lowercase().contains("lost"));
    }
}
