//! Configuration file management
//!
//! Loads TOML configuration files and provides render defaults.
//! Default config path: ~/.config/cellpix/config.toml

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{DEFAULT_COMPRESSION, DEFAULT_JPEG_QUALITY, QUERY_TIMEOUT_MS};
use crate::graphics::{RenderMethod, RenderOptions};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capability detection settings
    pub detection: DetectionConfig,
    /// Render defaults
    pub render: RenderConfig,
    /// Cell geometry settings
    pub geometry: GeometryConfig,
}

/// Capability detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// How long to wait for the terminal to answer a query (milliseconds)
    pub timeout_ms: u64,
}

/// Render defaults (overridden per request by style strings)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Render method: "lines" (default) or "whole"
    pub method: String,
    /// Deflate level 0-9 (0 = no compression)
    pub compress: u8,
    /// Keep text under transparent image areas
    pub mix: bool,
    /// JPEG quality 1-100 for opaque iTerm2 images (0 = always PNG)
    pub jpeg_quality: u8,
}

/// Cell geometry settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// Cell width in pixels (0 = ask the terminal)
    pub cell_width: u32,
    /// Cell height in pixels (0 = ask the terminal)
    pub cell_height: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: QUERY_TIMEOUT_MS,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            method: "lines".to_string(),
            compress: DEFAULT_COMPRESSION,
            mix: false,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl DetectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl RenderConfig {
    /// Render method, falling back to lines on unknown names
    pub fn method(&self) -> RenderMethod {
        match self.method.parse() {
            Ok(method) => method,
            Err(_) => {
                warn!("Unknown render method {:?}, using lines", self.method);
                RenderMethod::Lines
            }
        }
    }

    /// Base options that style strings refine
    pub fn options(&self) -> RenderOptions {
        RenderOptions {
            method: self.method(),
            mix: self.mix,
            compress: self.compress.min(9),
            ..RenderOptions::default()
        }
    }

    pub fn jpeg_quality(&self) -> Option<u8> {
        match self.jpeg_quality {
            0 => None,
            q => Some(q.min(100)),
        }
    }
}

impl GeometryConfig {
    /// Configured cell size, if both dimensions are set
    pub fn cell_size(&self) -> Option<(u32, u32)> {
        if self.cell_width > 0 && self.cell_height > 0 {
            Some((self.cell_width, self.cell_height))
        } else {
            None
        }
    }
}

impl Config {
    /// Get the path that would be used for loading config
    /// Returns None if using built-in defaults
    pub fn config_path() -> Option<PathBuf> {
        // 1. CELLPIX_CONFIG environment variable
        if let Ok(path) = std::env::var("CELLPIX_CONFIG") {
            let p = Path::new(&path);
            if p.exists() {
                return Some(p.to_path_buf());
            }
        }

        // 2. User config: ~/.config/cellpix/config.toml
        let config_path = default_config_path()?;
        if config_path.exists() {
            return Some(config_path);
        }

        None
    }

    /// Load configuration with priority:
    /// 1. CELLPIX_CONFIG environment variable
    /// 2. ~/.config/cellpix/config.toml (user config)
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            match Self::load_from_file(&path) {
                Ok(config) => {
                    info!("Loaded config: {}", path.display());
                    return config;
                }
                Err(e) => {
                    warn!("Failed to load config {}: {:#}", path.display(), e);
                }
            }
        }
        info!("Using built-in default config");
        Self::default()
    }

    /// Load settings from specified path
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }
}

/// Get default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cellpix").join("config.toml"))
}
