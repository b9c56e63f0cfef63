use std::path::{Path, PathBuf};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use serde::Deserialize;
use tessera::renderer::config::RenderConfig;
use tessera::renderer::contexts::pipeline_ctx::raster::{CullMode, FrontFace};

pub const CONFIG_FILE: &str = "tessera.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub window: WindowConfig,
    pub render: RenderConfig,
    pub scene: SceneConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "tessera".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    // A checkerboard is generated when unset
    pub texture: Option<PathBuf>,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub orbit_speed: f32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            vertex_shader: PathBuf::from("shaders-built/scene.vert.spv"),
            fragment_shader: PathBuf::from("shaders-built/scene.frag.spv"),
            texture: None,
            cull_mode: CullMode::None,
            front_face: FrontFace::CounterClockwise,
            orbit_speed: 0.5,
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(source)?;
        config.render.validate()?;
        Ok(config)
    }

    /// Reads `path` if it exists, otherwise returns the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("No {:?} found, using default configuration", path);
            return Ok(Self::default());
        }
        let source = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config: {:?}", path))?;
        let config = Self::from_toml_str(&source)
            .wrap_err_with(|| format!("Failed to parse config: {:?}", path))?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }
}
