//! WebP thumbnails for rendered stills.

use std::path::{Path, PathBuf};

use tracing::warn;

use muvi_storage::names;

/// Longest edge of a thumbnail.
const THUMB_MAX_EDGE: u32 = 512;

/// Write a `*_thumb.webp` next to a rendered still. Thumbnail failures
/// never fail a render; the full image is the artifact that matters.
pub fn write_thumbnail(image_path: &Path) -> Option<PathBuf> {
    let file_name = image_path.file_name()?.to_string_lossy();
    let thumb_path = image_path.with_file_name(names::thumbnail_for(&file_name));

    match image::open(image_path) {
        Ok(img) => {
            let thumb = img.thumbnail(THUMB_MAX_EDGE, THUMB_MAX_EDGE);
            if let Err(e) = thumb.save_with_format(&thumb_path, image::ImageFormat::WebP) {
                warn!("thumbnail write failed for {}: {}", image_path.display(), e);
                return None;
            }
            Some(thumb_path)
        }
        Err(e) => {
            warn!("thumbnail decode failed for {}: {}", image_path.display(), e);
            None
        }
    }
}
