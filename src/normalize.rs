//! Image normalization: decode, force RGB8, mirror to a temporary PNG.
//!
//! OCR engines read from a path, so every request gets its own uniquely named
//! file. The file lives exactly as long as the returned [`NormalizedImage`].

use anyhow::Context;
use image::ImageFormat;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::ReceiptError;

/// A decoded RGB image backed by a temporary PNG file.
#[derive(Debug)]
pub struct NormalizedImage {
    pub width: u32,
    pub height: u32,
    file: NamedTempFile,
}

impl NormalizedImage {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    tmp_dir: Option<PathBuf>,
}

impl Normalizer {
    pub fn new(tmp_dir: Option<PathBuf>) -> Self {
        Self { tmp_dir }
    }

    pub async fn normalize(&self, bytes: Vec<u8>) -> Result<NormalizedImage, ReceiptError> {
        let tmp_dir = self.tmp_dir.clone();
        tokio::task::spawn_blocking(move || normalize_blocking(&bytes, tmp_dir.as_deref()))
            .await
            .context("image normalization task failed")?
    }
}

fn normalize_blocking(bytes: &[u8], tmp_dir: Option<&Path>) -> Result<NormalizedImage, ReceiptError> {
    let decoded =
        image::load_from_memory(bytes).map_err(|e| ReceiptError::DecodeFailed(e.to_string()))?;
    debug!(
        "Decoded {}x{} image ({:?})",
        decoded.width(),
        decoded.height(),
        decoded.color()
    );

    let rgb = decoded.to_rgb8();

    let mut builder = tempfile::Builder::new();
    builder.prefix("receipt-").suffix(".png");
    let file = match tmp_dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .context("failed to create temporary image file")?;

    rgb.save_with_format(file.path(), ImageFormat::Png)
        .context("failed to write temporary image file")?;

    Ok(NormalizedImage {
        width: rgb.width(),
        height: rgb.height(),
        file,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use image::{DynamicImage, GrayAlphaImage, LumaA, Rgba, RgbaImage};
    use std::io::Cursor;

    /// Encode a small image as PNG bytes.
    pub(crate) fn png_bytes(image: DynamicImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn test_normalize_rgba_to_rgb_png() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = png_bytes(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            8,
            4,
            Rgba([10, 20, 30, 128]),
        )));

        let normalized = Normalizer::new(Some(dir.path().to_path_buf()))
            .normalize(bytes)
            .await
            .unwrap();

        assert_eq!((normalized.width, normalized.height), (8, 4));
        assert!(normalized.path().starts_with(dir.path()));
        let name = normalized.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("receipt-") && name.ends_with(".png"));

        let reloaded = image::open(normalized.path()).unwrap();
        assert_eq!(reloaded.color(), image::ColorType::Rgb8);
    }

    #[tokio::test]
    async fn test_grayscale_alpha_is_converted() {
        let bytes = png_bytes(DynamicImage::ImageLumaA8(GrayAlphaImage::from_pixel(
            3,
            3,
            LumaA([200, 255]),
        )));
        let normalized = Normalizer::default().normalize(bytes).await.unwrap();
        let reloaded = image::open(normalized.path()).unwrap();
        assert_eq!(reloaded.color(), image::ColorType::Rgb8);
    }

    #[tokio::test]
    async fn test_temp_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let normalizer = Normalizer::new(Some(dir.path().to_path_buf()));
        let bytes = png_bytes(DynamicImage::ImageRgba8(RgbaImage::new(2, 2)));

        let first = normalizer.normalize(bytes.clone()).await.unwrap();
        let second = normalizer.normalize(bytes).await.unwrap();
        assert_ne!(first.path(), second.path());

        let path = first.path().to_path_buf();
        drop(first);
        assert!(!path.exists());
        assert!(second.path().exists());
    }

    #[tokio::test]
    async fn test_random_bytes_fail_to_decode() {
        let err = Normalizer::default()
            .normalize(vec![0x13, 0x37, 0x00, 0xff, 0x42, 0x42])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecodeFailed);
    }
}
