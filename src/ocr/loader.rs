use image::imageops::{self, FilterType};
use image::RgbaImage;
use tracing::debug;

use crate::error::{ExtractError, Result};

/// Decodes any supported image format into an RGBA8 buffer.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage> {
    let img = image::load_from_memory(bytes)?.to_rgba8();
    if img.width() == 0 || img.height() == 0 {
        return Err(ExtractError::Decode("image has no pixels".to_string()));
    }
    Ok(img)
}

/// Upscales so the longest side reaches `target`. Larger images are
/// returned unchanged; OCR only benefits from more pixels.
pub fn scale_to_working_resolution(img: RgbaImage, target: u32) -> RgbaImage {
    let (w, h) = img.dimensions();
    let longest = w.max(h);
    if longest == 0 || longest >= target {
        return img;
    }

    let scale = target as f64 / longest as f64;
    let new_w = ((w as f64 * scale).round() as u32).max(1);
    let new_h = ((h as f64 * scale).round() as u32).max(1);
    debug!("Scaling {}x{} -> {}x{}", w, h, new_w, new_h);

    imageops::resize(&img, new_w, new_h, FilterType::Lanczos3)
}

/// Decode + scale in one step.
pub fn load_image(bytes: &[u8], target: u32) -> Result<RgbaImage> {
    let img = decode_image(bytes)?;
    Ok(scale_to_working_resolution(img, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba};
    use std::io::Cursor;

    fn encode_png(img: &RgbaImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_decode_png() {
        let img = RgbaImage::from_pixel(40, 20, Rgba([10, 20, 30, 255]));
        let decoded = decode_image(&encode_png(&img)).unwrap();
        assert_eq!(decoded.dimensions(), (40, 20));
        assert_eq!(decoded.get_pixel(0, 0), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = decode_image(b"definitely not an image");
        assert!(matches!(result, Err(ExtractError::Decode(_))));
    }

    #[test]
    fn test_decode_truncated_png_fails() {
        let img = RgbaImage::from_pixel(64, 64, Rgba([200, 200, 200, 255]));
        let bytes = encode_png(&img);
        assert!(decode_image(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn test_small_image_upscaled() {
        let img = RgbaImage::new(200, 100);
        let scaled = scale_to_working_resolution(img, 800);
        assert_eq!(scaled.dimensions(), (800, 400));
    }

    #[test]
    fn test_large_image_unchanged() {
        let img = RgbaImage::new(1600, 900);
        let scaled = scale_to_working_resolution(img, 800);
        assert_eq!(scaled.dimensions(), (1600, 900));
    }
}
