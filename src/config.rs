// =============================================================================
// CONFIGURATION - Load settings from fresnel.toml
// =============================================================================
//
// Every field has a default, so a missing file or a partial file both work.

use anyhow::{Context, Result};
use ash::vk;
use glam::Vec4;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_PATH: &str = "fresnel.toml";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub device: DeviceConfig,
    pub shaders: ShaderConfig,
    pub overlay: OverlayConfig,
}

/// Window settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
    pub fullscreen: bool,
    /// Show FPS and frame time in the title bar
    pub show_fps: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Fresnel".to_string(),
            width: 1920,
            height: 1080,
            resizable: true,
            fullscreen: false,
            show_fps: true,
        }
    }
}

/// Graphics settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            clear_color: [0.2, 0.2, 0.2, 1.0],
        }
    }
}

/// GPU selection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub validation_layers: bool,
    /// Reject GPUs without a transfer-only queue family
    pub require_dedicated_transfer: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            require_dedicated_transfer: true,
        }
    }
}

/// SPIR-V module locations for the fixed pipeline
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("vert.spv"),
            fragment: PathBuf::from("frag.spv"),
        }
    }
}

/// Built-in banner overlay
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub enabled: bool,
    pub color: [f32; 4],
    /// Banner height in pixels
    pub height: u32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            color: [0.45, 0.55, 0.60, 1.0],
            height: 48,
        }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults on any error
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        Self::load_from_path(path).unwrap_or_else(|e| {
            log::warn!("Failed to load {:?}: {:#}. Using defaults.", path, e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get present mode as Vulkan enum
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::FIFO
            }
        }
    }

    pub fn clear_color(&self) -> Vec4 {
        Vec4::from_array(self.graphics.clear_color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.window.title, "Fresnel");
        assert_eq!((config.window.width, config.window.height), (1920, 1080));
        assert_eq!(config.shaders.vertex, PathBuf::from("vert.spv"));
        assert_eq!(config.shaders.fragment, PathBuf::from("frag.spv"));
        assert!(config.device.require_dedicated_transfer);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [graphics]
            present_mode = "Mailbox"
            clear_color = [1.0, 0.0, 0.0, 1.0]

            [device]
            require_dedicated_transfer = false
            "#,
        )
        .unwrap();

        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.clear_color(), Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert!(!config.device.require_dedicated_transfer);
        assert_eq!(config.window.title, "Fresnel");
        assert!(config.overlay.enabled);
    }

    #[test]
    fn unknown_present_mode_falls_back_to_fifo() {
        let config = Config::from_toml_str("[graphics]\npresent_mode = \"vsync-ish\"").unwrap();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::from_toml_str("[window\nwidth = ").is_err());
    }

    #[test]
    fn missing_file_loads_defaults() {
        let config = Config::load_or_default("definitely/not/here/fresnel.toml");
        assert_eq!(config.graphics.clear_color, [0.2, 0.2, 0.2, 1.0]);
    }
}
