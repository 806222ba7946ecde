use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::imageops::FilterType;
use tracing::{debug, warn};

use crate::types::{DecodedImage, MediaId};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "gif"];

/// A source of photos for the texture cache.
///
/// `enumerate` lists every available entry; `decode` produces RGBA pixels at
/// (roughly) the requested size. Both run on the decode worker thread, never
/// on the GPU command thread, and are allowed to block on I/O.
pub trait MediaSource: Send {
    fn enumerate(&mut self) -> Result<Vec<MediaId>>;
    fn decode(&mut self, id: &MediaId, target: (u32, u32)) -> Result<DecodedImage>;
}

/// Media source backed by one or more photo directories on disk.
pub struct DiskMediaSource {
    roots: Vec<PathBuf>,
}

impl DiskMediaSource {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }
}

impl MediaSource for DiskMediaSource {
    fn enumerate(&mut self) -> Result<Vec<MediaId>> {
        let mut entries = Vec::new();
        for root in &self.roots {
            if let Err(err) = walk_directory(root, &mut entries) {
                warn!(root = %root.display(), error = %err, "skipping unreadable media root");
            }
        }
        debug!(count = entries.len(), "enumerated media entries");
        Ok(entries)
    }

    fn decode(&mut self, id: &MediaId, target: (u32, u32)) -> Result<DecodedImage> {
        let path = Path::new(&id.0);
        let image = image::open(path)
            .with_context(|| format!("failed to decode photo at {}", path.display()))?;
        Ok(scale_to_fill(image, target))
    }
}

fn walk_directory(dir: &Path, out: &mut Vec<MediaId>) -> Result<()> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read media directory {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        if path.is_dir() {
            // Errors below the root are logged but do not abort the scan.
            if let Err(err) = walk_directory(&path, out) {
                warn!(dir = %path.display(), error = %err, "skipping unreadable subdirectory");
            }
        } else if has_image_extension(&path) {
            out.push(MediaId::new(path.to_string_lossy().into_owned()));
        }
    }
    Ok(())
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let lower = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

/// Scales an image so it covers the target rectangle, then center-crops the
/// overflow. The result always has exactly the target dimensions.
fn scale_to_fill(image: image::DynamicImage, target: (u32, u32)) -> DecodedImage {
    let target_w = target.0.max(1);
    let target_h = target.1.max(1);
    let scaled = image.resize_to_fill(target_w, target_h, FilterType::Triangle);
    let rgba = scaled.to_rgba8();
    DecodedImage::new(rgba.width(), rgba.height(), rgba.into_raw())
}
