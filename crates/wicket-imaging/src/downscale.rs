//! Single-image nearest-neighbour thumbnail generation.

use std::path::Path;

use image::GenericImageView;
use image::imageops::FilterType;

use crate::DownscaleError;

/// JPEG quality used for the written thumbnail.
const THUMBNAIL_QUALITY: u8 = 70;

/// Downscales the image at `path` to fit within `box_size` on its longest
/// side, writing the result to `{path}.thumb.jpg`.
///
/// No-ops (returns `Ok(())` without writing anything) when `path` is a GIF,
/// the thumbnail already exists, or the source image already fits inside
/// `box_size`.
///
/// # Errors
///
/// Returns [`DownscaleError`] if `path` cannot be decoded as an image, or
/// if the thumbnail cannot be written.
pub fn downscale(path: &Path, box_size: u32) -> Result<(), DownscaleError> {
    if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("gif")) {
        return Ok(());
    }

    let thumb_path = thumbnail_path(path);
    if thumb_path.exists() {
        return Ok(());
    }

    let img = image::open(path)?;
    let (w, h) = img.dimensions();
    if w <= box_size && h <= box_size {
        return Ok(());
    }

    let k = f64::from(w.max(h)) / f64::from(box_size);
    let target_w = (f64::from(w) / k).round().max(1.0) as u32;
    let target_h = (f64::from(h) / k).round().max(1.0) as u32;

    let thumbnail = img.resize_exact(target_w, target_h, FilterType::Nearest);
    let mut out = std::fs::File::create(&thumb_path)?;
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, THUMBNAIL_QUALITY);
    thumbnail.write_with_encoder(encoder)?;
    Ok(())
}

fn thumbnail_path(path: &Path) -> std::path::PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".thumb.jpg");
    std::path::PathBuf::from(s)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{Rgba, RgbaImage};
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn skips_images_already_within_box() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("small.png");
        RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255])).save(&path).unwrap();

        downscale(&path, 64).unwrap();
        assert!(!thumbnail_path(&path).exists());
    }

    #[test]
    fn writes_thumbnail_for_oversized_images() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.png");
        RgbaImage::from_pixel(200, 100, Rgba([10, 20, 30, 255])).save(&path).unwrap();

        downscale(&path, 64).unwrap();
        let thumb = thumbnail_path(&path);
        assert!(thumb.exists());

        let decoded = image::open(&thumb).unwrap();
        let (w, h) = decoded.dimensions();
        assert!(w <= 64 && h <= 64);
    }

    #[test]
    fn skips_gifs_entirely() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("anim.gif");
        std::fs::write(&path, b"not a real gif").unwrap();

        downscale(&path, 64).unwrap();
        assert!(!thumbnail_path(&path).exists());
    }
}
