use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration for the poster service
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Font and image directories
    #[serde(default)]
    pub assets: AssetConfig,

    /// External render tool invocation
    #[serde(default)]
    pub render: RenderConfig,

    /// Caption composition
    #[serde(default)]
    pub caption: CaptionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// HTTP port (default: 8080)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_listen_port(),
            bind: default_bind_address(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssetConfig {
    /// Directory holding the fonts; every regular file is a candidate
    #[serde(default = "default_fonts_dir")]
    pub fonts_dir: PathBuf,

    /// Directory holding the background images
    #[serde(default = "default_images_dir")]
    pub images_dir: PathBuf,

    /// Only images with this extension are picked (case-insensitive, no dot)
    #[serde(default = "default_image_extension")]
    pub image_extension: String,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            fonts_dir: default_fonts_dir(),
            images_dir: default_images_dir(),
            image_extension: default_image_extension(),
        }
    }
}

/// How to launch the render tool
///
/// # Security Warning
///
/// `command` and `args` are executed directly with the permissions of the
/// service. Configuration files must be protected accordingly.
#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    /// Executable to run (default: java)
    #[serde(default = "default_render_command")]
    pub command: String,

    /// Arguments placed before the render flags
    #[serde(default = "default_render_args")]
    pub args: Vec<String>,

    /// Working directory for the render tool
    pub working_dir: Option<PathBuf>,

    /// Output width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Output height in pixels
    #[serde(default = "default_height")]
    pub height: u32,

    /// JPEG quality factor in (0, 1]
    #[serde(default = "default_quality")]
    pub quality: f32,

    /// Maximum time a single render may take
    #[serde(default = "default_render_timeout")]
    pub timeout_secs: u64,

    /// Grace period between SIGTERM and SIGKILL once the timeout expires
    #[serde(default = "default_kill_grace_period")]
    pub kill_grace_period_secs: u64,
}

impl RenderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn kill_grace_period(&self) -> Duration {
        Duration::from_secs(self.kill_grace_period_secs)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            command: default_render_command(),
            args: default_render_args(),
            working_dir: None,
            width: default_width(),
            height: default_height(),
            quality: default_quality(),
            timeout_secs: default_render_timeout(),
            kill_grace_period_secs: default_kill_grace_period(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaptionConfig {
    /// Fixed last line of every caption
    #[serde(default = "default_trailer")]
    pub trailer: String,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            trailer: default_trailer(),
        }
    }
}

fn default_listen_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_fonts_dir() -> PathBuf {
    PathBuf::from("fonts")
}

fn default_images_dir() -> PathBuf {
    PathBuf::from("images")
}

fn default_image_extension() -> String {
    "jpg".to_string()
}

fn default_render_command() -> String {
    "java".to_string()
}

fn default_render_args() -> Vec<String> {
    vec!["-jar".to_string(), "inspirational-1.0.jar".to_string()]
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

fn default_quality() -> f32 {
    0.75
}

fn default_render_timeout() -> u64 {
    30
}

fn default_kill_grace_period() -> u64 {
    2
}

fn default_trailer() -> String {
    "SALOPE".to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be greater than 0".to_string());
        }
        if self.assets.image_extension.trim_start_matches('.').is_empty() {
            errors.push("assets.image_extension must not be empty".to_string());
        }
        if self.render.command.trim().is_empty() {
            errors.push("render.command must not be empty".to_string());
        }
        if self.render.width == 0 || self.render.height == 0 {
            errors.push(format!(
                "render dimensions must be non-zero (got {}x{})",
                self.render.width, self.render.height
            ));
        }
        if !(self.render.quality > 0.0 && self.render.quality <= 1.0) {
            errors.push(format!(
                "render.quality must be in (0, 1] (got {})",
                self.render.quality
            ));
        }
        if self.render.timeout_secs == 0 {
            errors.push("render.timeout_secs must be greater than 0".to_string());
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}
