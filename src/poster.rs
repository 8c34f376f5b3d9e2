use crate::assets::AssetPicker;
use crate::caption::Caption;
use crate::config::Config;
use crate::error::PosterError;
use crate::render::{RenderInvoker, RenderSettings};
use hyper::body::Bytes;
use tracing::debug;

/// Turns a host into a rendered poster: caption, then assets, then the render tool.
///
/// Holds no mutable state; share it behind an `Arc` across connections.
#[derive(Debug, Clone)]
pub struct PosterService {
    picker: AssetPicker,
    renderer: RenderInvoker,
    trailer: String,
}

impl PosterService {
    pub fn new(picker: AssetPicker, renderer: RenderInvoker, trailer: impl Into<String>) -> Self {
        Self {
            picker,
            renderer,
            trailer: trailer.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            AssetPicker::from_config(&config.assets),
            RenderInvoker::new(RenderSettings::from(&config.render)),
            config.caption.trailer.clone(),
        )
    }

    pub fn picker(&self) -> &AssetPicker {
        &self.picker
    }

    pub fn renderer(&self) -> &RenderInvoker {
        &self.renderer
    }

    pub fn caption_for(&self, host: &str) -> Caption {
        Caption::resolve(host, &self.trailer)
    }

    /// Produce the JPEG bytes for `host`
    pub async fn generate(&self, host: &str) -> Result<Bytes, PosterError> {
        let caption = self.caption_for(host);
        debug!(host, lines = caption.lines().len(), "Caption resolved");

        let assets = self.picker.pick().await?;
        self.renderer.render(&assets, &caption).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn service(root: &Path, script: &str) -> PosterService {
        let renderer = RenderInvoker::new(RenderSettings {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "render".to_string()],
            working_dir: Some(root.to_path_buf()),
            width: 1920,
            height: 1080,
            quality: 0.75,
            timeout: Duration::from_secs(5),
            kill_grace_period: Duration::from_millis(200),
        });
        PosterService::new(
            AssetPicker::new(root.join("fonts"), root.join("images"), "jpg"),
            renderer,
            "SALOPE",
        )
    }

    fn populated() -> TempDir {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("fonts")).unwrap();
        std::fs::create_dir(root.path().join("images")).unwrap();
        std::fs::write(root.path().join("fonts/Impact.ttf"), b"font").unwrap();
        std::fs::write(root.path().join("images/sunset.jpg"), b"image").unwrap();
        root
    }

    #[tokio::test]
    async fn test_generate_passes_caption_to_renderer() {
        let root = populated();
        let service = service(root.path(), r#"printf '%s' "${12}""#);

        let bytes = service.generate("xn--caf-dma.example.com").await.unwrap();
        assert_eq!(std::str::from_utf8(&bytes).unwrap(), "CAFÉ\nSALOPE");
    }

    #[tokio::test]
    async fn test_empty_fonts_never_spawns_renderer() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("fonts")).unwrap();
        std::fs::create_dir(root.path().join("images")).unwrap();
        std::fs::write(root.path().join("images/sunset.jpg"), b"image").unwrap();
        let service = service(root.path(), "touch spawned; printf 'jpeg'");

        let err = service.generate("dream.example.com").await.unwrap_err();
        assert!(matches!(err, PosterError::NoAssetsAvailable { .. }));
        assert!(!root.path().join("spawned").exists());
    }

    #[tokio::test]
    async fn test_failed_render_is_an_error() {
        let root = populated();
        let service = service(root.path(), "exit 1");

        let err = service.generate("dream.example.com").await.unwrap_err();
        assert!(matches!(err, PosterError::RenderFailure { .. }));
    }

    #[test]
    fn test_caption_for_uses_trailer() {
        let root = populated();
        let service = service(root.path(), "true");
        assert_eq!(service.caption_for("example.com").text(), "SALOPE");
    }
}
