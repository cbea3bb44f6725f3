//! I/O helpers for debugging and tooling.
//!
//! - `load_grayscale`: read a PNG/JPEG into a [`RasterImage`].
//! - `save_grayscale`: write a [`RasterImage`] to a grayscale PNG.
//! - `write_json_file`: pretty-print a serializable report to disk.
//!
//! The pipeline itself never touches the filesystem; these helpers exist for
//! inspecting intermediate masks and dumping conversion reports.

use super::RasterImage;
use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Load an image from disk and convert to 8-bit grayscale.
pub fn load_grayscale(path: &Path) -> Result<RasterImage, String> {
    let img = image::open(path)
        .map_err(|e| format!("Failed to open {}: {e}", path.display()))?
        .into_luma8();
    let width = img.width() as usize;
    let height = img.height() as usize;
    Ok(RasterImage::from_gray(width, height, img.into_raw()))
}

/// Save an 8-bit grayscale buffer to a PNG.
pub fn save_grayscale(img: &RasterImage, path: &Path) -> Result<(), String> {
    ensure_parent_dir(path)?;
    let buffer: ImageBuffer<Luma<u8>, Vec<u8>> =
        ImageBuffer::from_raw(img.width as u32, img.height as u32, img.data.clone())
            .ok_or_else(|| "Failed to create image buffer".to_string())?;
    DynamicImage::ImageLuma8(GrayImage::from(buffer))
        .save(path)
        .map_err(|e| format!("Failed to save {}: {e}", path.display()))
}

/// Serialize a value as pretty JSON to `path`, creating parent directories.
pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    ensure_parent_dir(path)?;
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize JSON for {}: {e}", path.display()))?;
    fs::write(path, json).map_err(|e| format!("Failed to write JSON {}: {e}", path.display()))
}

fn ensure_parent_dir(path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create {}: {e}", parent.display()))?;
        }
    }
    Ok(())
}
