//! Renderer configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working setup:
//!
//! ```toml
//! [window]
//! width = 1280
//! height = 720
//!
//! [shadow]
//! map_size = 4096
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub window: WindowConfig,
    pub renderer: RendererSection,
    pub shadow: ShadowConfig,
    pub shaders: ShaderConfig,
}

/// Initial window parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            title: "Lumen".to_string(),
        }
    }
}

/// Device and presentation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSection {
    /// Enable the Khronos validation layer.
    pub validation: bool,
    /// Prefer the non-blocking mailbox present mode when available.
    pub prefer_mailbox: bool,
    /// Clear color of the main pass.
    pub clear_color: [f32; 4],
}

impl Default for RendererSection {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            prefer_mailbox: true,
            clear_color: [0.01, 0.01, 0.01, 1.0],
        }
    }
}

/// Shadow map parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Width and height of the square depth target.
    pub map_size: u32,
    pub depth_bias_constant: f32,
    pub depth_bias_clamp: f32,
    pub depth_bias_slope: f32,
    /// Near plane of the directional light's projection.
    pub light_near: f32,
    /// Far plane of the directional light's projection.
    pub light_far: f32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            map_size: 2048,
            depth_bias_constant: 1.25,
            depth_bias_clamp: 0.0,
            depth_bias_slope: 3.75,
            light_near: 1.0,
            light_far: 94.0,
        }
    }
}

/// Location of the precompiled SPIR-V modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub directory: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("shaders/spirv"),
        }
    }
}

impl ShaderConfig {
    /// Full path of a shader module inside the configured directory.
    pub fn path(&self, file_name: &str) -> PathBuf {
        self.directory.join(file_name)
    }
}

impl RendererConfig {
    /// Parse configuration from a TOML document and validate it.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would only fail later, deep inside the GPU setup.
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        if self.shadow.map_size == 0 {
            return Err(Error::Config("shadow.map_size must be non-zero".to_string()));
        }
        let (near, far) = (self.shadow.light_near, self.shadow.light_far);
        if !(near > 0.0 && far > near && far.is_finite()) {
            return Err(Error::Config(format!(
                "shadow light planes must satisfy 0 < near < far, got near {} far {}",
                near, far
            )));
        }
        Ok(())
    }

    /// Load configuration from a TOML file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            return Err(Error::Config(format!(
                "unsupported config format: {}",
                path.display()
            )));
        }
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load and validate `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load_from_file(path)
        } else {
            debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Serialize to a pretty-printed TOML document.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = RendererConfig::from_toml_str("").unwrap();
        assert_eq!(config, RendererConfig::default());
        assert_eq!(config.shadow.map_size, 2048);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = RendererConfig::from_toml_str(
            r#"
            [shadow]
            map_size = 4096

            [window]
            title = "demo"
            "#,
        )
        .unwrap();

        assert_eq!(config.shadow.map_size, 4096);
        assert_eq!(config.shadow.depth_bias_slope, 3.75);
        assert_eq!(config.window.title, "demo");
        assert_eq!(config.window.width, 800);
    }

    #[test]
    fn test_invalid_document_is_config_error() {
        let err = RendererConfig::from_toml_str("[shadow]\nmap_size = \"big\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_sizes_are_rejected() {
        for document in [
            "[shadow]\nmap_size = 0",
            "[window]\nwidth = 0",
            "[window]\nheight = 0",
        ] {
            let err = RendererConfig::from_toml_str(document).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{}", document);
        }
    }

    #[test]
    fn test_inverted_light_planes_are_rejected() {
        let err = RendererConfig::from_toml_str("[shadow]\nlight_near = 10.0\nlight_far = 5.0")
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(RendererConfig::default().validate().is_ok());
    }

    #[test]
    fn test_load_or_default_validates_file() {
        let path = std::env::temp_dir().join(format!("lumen-invalid-{}.toml", std::process::id()));
        std::fs::write(&path, "[shadow]\nmap_size = 0\n").unwrap();
        let result = RendererConfig::load_or_default(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_unsupported_extension_rejected() {
        let err = RendererConfig::load_from_file("lumen.json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = RendererConfig::load_or_default("does/not/exist.toml").unwrap();
        assert_eq!(config, RendererConfig::default());
    }

    #[test]
    fn test_serialized_config_parses_back() {
        let mut config = RendererConfig::default();
        config.renderer.prefer_mailbox = false;
        let text = config.to_toml_string().unwrap();
        assert_eq!(RendererConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_shader_path_joins_directory() {
        let shaders = ShaderConfig::default();
        assert_eq!(
            shaders.path("shadow.vert.spv"),
            PathBuf::from("shaders/spirv/shadow.vert.spv")
        );
    }
}
