//! Random font and background image selection

use crate::config::AssetConfig;
use crate::error::{AssetKind, PosterError};
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One font and one image to render a poster with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSelection {
    pub font: PathBuf,
    pub image: PathBuf,
}

/// Picks assets uniformly at random from two directories.
///
/// Directories are listed on every call, so assets can be added or removed
/// while the service runs.
#[derive(Debug, Clone)]
pub struct AssetPicker {
    fonts_dir: PathBuf,
    images_dir: PathBuf,
    image_extension: String,
}

impl AssetPicker {
    pub fn new(
        fonts_dir: impl Into<PathBuf>,
        images_dir: impl Into<PathBuf>,
        image_extension: &str,
    ) -> Self {
        Self {
            fonts_dir: fonts_dir.into(),
            images_dir: images_dir.into(),
            image_extension: image_extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn from_config(config: &AssetConfig) -> Self {
        Self::new(
            &config.fonts_dir,
            &config.images_dir,
            &config.image_extension,
        )
    }

    pub fn fonts_dir(&self) -> &Path {
        &self.fonts_dir
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Choose one font and one image.
    ///
    /// Fonts are listed first; an empty font directory fails before the
    /// image directory is touched.
    pub async fn pick(&self) -> Result<AssetSelection, PosterError> {
        let fonts = list_files(&self.fonts_dir, |_| true).await;
        let font = choose(&fonts, AssetKind::Font, &self.fonts_dir)?;

        let images = list_files(&self.images_dir, |path| {
            has_extension(path, &self.image_extension)
        })
        .await;
        let image = choose(&images, AssetKind::Image, &self.images_dir)?;

        debug!(
            font = %font.display(),
            image = %image.display(),
            fonts = fonts.len(),
            images = images.len(),
            "Assets selected"
        );

        Ok(AssetSelection { font, image })
    }
}

fn choose(candidates: &[PathBuf], kind: AssetKind, dir: &Path) -> Result<PathBuf, PosterError> {
    candidates
        .choose(&mut rand::thread_rng())
        .cloned()
        .ok_or_else(|| PosterError::NoAssetsAvailable {
            kind,
            dir: dir.to_path_buf(),
        })
}

/// Regular files in `dir` accepted by `filter`. A missing directory lists as empty.
async fn list_files<F>(dir: &Path, filter: F) -> Vec<PathBuf>
where
    F: Fn(&Path) -> bool,
{
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "Cannot list asset directory");
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let path = entry.path();
                let is_file = tokio::fs::metadata(&path)
                    .await
                    .map(|m| m.is_file())
                    .unwrap_or(false);
                if is_file && filter(&path) {
                    files.push(path);
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "Error while listing asset directory");
                break;
            }
        }
    }
    files
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}
