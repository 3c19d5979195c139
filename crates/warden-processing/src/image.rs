//! Image header guard.
//!
//! Only the header is parsed; pixel data is never decoded.

use image::ImageReader;
use std::path::Path;
use warden_core::RejectReason;

#[derive(Debug, Clone, Copy)]
pub struct ImageGuard {
    max_pixels: u64,
}

impl ImageGuard {
    pub fn new(max_pixels: u64) -> Self {
        Self { max_pixels }
    }

    /// Read `(width, height)` from the header and reject zero or oversized images.
    pub fn validate(&self, path: &Path) -> Result<(u32, u32), RejectReason> {
        let reader = ImageReader::open(path)
            .and_then(|r| r.with_guessed_format())
            .map_err(|_| RejectReason::ImageUndecodable)?;
        let (width, height) = reader
            .into_dimensions()
            .map_err(|_| RejectReason::ImageUndecodable)?;

        if width == 0 || height == 0 {
            return Err(RejectReason::ImageDimensions(format!("{}x{}", width, height)));
        }

        let pixels = u64::from(width) * u64::from(height);
        if pixels > self.max_pixels {
            tracing::debug!(width, height, max_pixels = self.max_pixels, "Image exceeds pixel limit");
            return Err(RejectReason::ImageDimensions(format!(
                "{}x{} exceeds {} pixels",
                width, height, self.max_pixels
            )));
        }

        Ok((width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn write_png(dir: &Path, width: u32, height: u32) -> std::path::PathBuf {
        let img = RgbaImage::from_pixel(width, height, Rgba([255, 0, 0, 255]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        let path = dir.join("img.png");
        std::fs::write(&path, buffer).unwrap();
        path
    }

    #[test]
    fn test_reads_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), 100, 40);
        assert_eq!(ImageGuard::new(10_000).validate(&path), Ok((100, 40)));
    }

    #[test]
    fn test_pixel_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), 100, 101);
        assert!(matches!(
            ImageGuard::new(10_000).validate(&path),
            Err(RejectReason::ImageDimensions(_))
        ));
    }

    #[test]
    fn test_truncated_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0]).unwrap();
        assert_eq!(
            ImageGuard::new(10_000).validate(&path),
            Err(RejectReason::ImageUndecodable)
        );
    }
}
