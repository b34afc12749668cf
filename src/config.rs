// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::renderer::RendererOptions;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Renderer".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub frames_in_flight: usize,
    /// Upper bound on any single GPU wait, in milliseconds. A wait that
    /// exceeds this fails the frame instead of hanging the loop.
    pub gpu_timeout_ms: u64,
    pub vertex_shader: String,
    pub fragment_shader: String,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "immediate".to_string(),
            clear_color: [0.05, 0.05, 0.1, 1.0],
            frames_in_flight: 2,
            gpu_timeout_ms: 2000,
            vertex_shader: "shaders/simple.vert.spv".to_string(),
            fragment_shader: "shaders/simple.frag.spv".to_string(),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {}. Using defaults.", e);
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

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Get present mode as Vulkan enum
    pub fn get_present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to IMMEDIATE",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::IMMEDIATE
            }
        }
    }

    /// Renderer knobs derived from the graphics section
    pub fn renderer_options(&self) -> RendererOptions {
        RendererOptions {
            frames_in_flight: self.graphics.frames_in_flight,
            gpu_timeout: Duration::from_millis(self.graphics.gpu_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.graphics.frames_in_flight, 2);
        assert_eq!(config.graphics.gpu_timeout_ms, 2000);
        assert!(config.debug.validation_layers);
    }

    #[test]
    fn partial_toml_keeps_defaults_elsewhere() {
        let config: Config = toml::from_str(
            r#"
            [graphics]
            frames_in_flight = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.graphics.frames_in_flight, 3);
        assert_eq!(config.graphics.gpu_timeout_ms, 2000);
        assert_eq!(config.window.width, 1280);
    }
}
