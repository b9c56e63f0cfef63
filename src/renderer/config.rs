use std::path::Path;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use serde::Deserialize;
use crate::renderer::error::RenderError;

/// Default number of frames the CPU may record ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Capacity of the light array in the per-frame uniform block.
pub const MAX_LIGHTS: usize = 10;

/// Contains configuration options for the renderer like frames in flight, vsync, and other settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub application_name: String,
    pub frames_in_flight: usize,
    pub vsync: bool,
    pub validation: bool,
    pub clear_color: [f32; 4],
    pub max_anisotropy: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            application_name: "tessera".to_string(),
            frames_in_flight: FRAMES_IN_FLIGHT,
            vsync: false,
            validation: cfg!(debug_assertions),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_anisotropy: 4.0,
        }
    }
}

impl RenderConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: RenderConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read render config: {:?}", path))?;
        let config = Self::from_toml_str(&source)
            .wrap_err_with(|| format!("Failed to parse render config: {:?}", path))?;
        log::info!("Loaded render configuration from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(RenderError::invalid("frames_in_flight must be at least 1"));
        }
        if !(self.max_anisotropy >= 1.0) {
            return Err(RenderError::invalid(format!(
                "max_anisotropy must be at least 1.0, got {}",
                self.max_anisotropy
            )));
        }
        Ok(())
    }
}
