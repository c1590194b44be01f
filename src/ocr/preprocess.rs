use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma, Rgba, RgbaImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{dilate, erode};
use tracing::debug;

/// Black/white image ready for recognition.
///
/// Every pixel has R = G = B, each either 0 (ink) or 255 (background).
/// Alpha is carried over from the source untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct BinaryImage {
    pixels: RgbaImage,
}

impl BinaryImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn as_rgba(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn is_ink(&self, x: u32, y: u32) -> bool {
        self.pixels.get_pixel(x, y)[0] == 0
    }

    /// Fraction of pixels that are ink.
    pub fn ink_ratio(&self) -> f32 {
        let total = self.pixels.width() as usize * self.pixels.height() as usize;
        if total == 0 {
            return 0.0;
        }
        let ink = self.pixels.pixels().filter(|p| p[0] == 0).count();
        ink as f32 / total as f32
    }
}

/// Luma conversion with rounding: gray = round(0.299R + 0.587G + 0.114B).
pub fn to_grayscale(img: &RgbaImage) -> GrayImage {
    let (width, height) = img.dimensions();
    ImageBuffer::from_fn(width, height, |x, y| {
        let p = img.get_pixel(x, y);
        Luma([luma(p)])
    })
}

fn luma(p: &Rgba<u8>) -> u8 {
    let gray = 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
    gray.round().clamp(0.0, 255.0) as u8
}

/// 256-bin histogram of gray values.
pub fn histogram(gray: &GrayImage) -> [u32; 256] {
    let mut hist = [0u32; 256];
    for p in gray.pixels() {
        hist[p[0] as usize] += 1;
    }
    hist
}

/// Between-class variance wB·wF·(mB−mF)² for threshold `t`, where the
/// background class is every value <= t.
pub fn between_class_variance(hist: &[u32; 256], t: u8) -> f64 {
    let mut weight_bg = 0.0f64;
    let mut sum_bg = 0.0f64;
    let mut total = 0.0f64;
    let mut sum_all = 0.0f64;
    for (i, &count) in hist.iter().enumerate() {
        let c = count as f64;
        total += c;
        sum_all += i as f64 * c;
        if i <= t as usize {
            weight_bg += c;
            sum_bg += i as f64 * c;
        }
    }
    let weight_fg = total - weight_bg;
    if weight_bg == 0.0 || weight_fg == 0.0 {
        return 0.0;
    }
    let mean_bg = sum_bg / weight_bg;
    let mean_fg = (sum_all - sum_bg) / weight_fg;
    weight_bg * weight_fg * (mean_bg - mean_fg) * (mean_bg - mean_fg)
}

/// Otsu's threshold over all 256 candidates. Ties keep the first maximum.
pub fn otsu_threshold(hist: &[u32; 256]) -> u8 {
    let total: f64 = hist.iter().map(|&c| c as f64).sum();
    let sum_all: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * c as f64)
        .sum();

    let mut best_threshold = 0u8;
    let mut best_variance = 0.0f64;
    let mut weight_bg = 0.0f64;
    let mut sum_bg = 0.0f64;

    for t in 0..256usize {
        weight_bg += hist[t] as f64;
        sum_bg += t as f64 * hist[t] as f64;

        let weight_fg = total - weight_bg;
        if weight_bg == 0.0 || weight_fg == 0.0 {
            continue;
        }

        let mean_bg = sum_bg / weight_bg;
        let mean_fg = (sum_all - sum_bg) / weight_fg;
        let variance = weight_bg * weight_fg * (mean_bg - mean_fg) * (mean_bg - mean_fg);
        if variance > best_variance {
            best_variance = variance;
            best_threshold = t as u8;
        }
    }

    best_threshold
}

/// Grayscale, Otsu threshold, then optionally close small gaps in strokes.
///
/// Pixels brighter than the threshold become white (255), the rest black.
pub fn binarize(img: &RgbaImage, repair_gaps: bool) -> BinaryImage {
    let gray = to_grayscale(img);
    let threshold = otsu_threshold(&histogram(&gray));

    let mut mask: GrayImage = ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] > threshold {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });

    if repair_gaps {
        mask = close_strokes(&mask);
    }

    debug!(
        "Binarized {}x{} at threshold {} (gap repair: {})",
        img.width(),
        img.height(),
        threshold,
        repair_gaps
    );

    let pixels = ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        let v = mask.get_pixel(x, y)[0];
        Rgba([v, v, v, img.get_pixel(x, y)[3]])
    });
    BinaryImage { pixels }
}

/// Morphological closing of the black strokes with a 3×3 square: black
/// dilation followed by black erosion. On a white-foreground mask that is
/// white erosion followed by white dilation.
pub fn close_strokes(mask: &GrayImage) -> GrayImage {
    let grown = erode(mask, Norm::LInf, 1);
    dilate(&grown, Norm::LInf, 1)
}

/// Integer upscale factor that brings the smaller side of a region up to
/// `min_dimension`, between 2 and `max_scale`. Returns 1 for regions that
/// are already large enough.
pub fn region_upscale_factor(width: u32, height: u32, min_dimension: u32, max_scale: u32) -> u32 {
    if width == 0 || height == 0 {
        return 1;
    }
    if width >= min_dimension && height >= min_dimension {
        return 1;
    }
    let height_scale = min_dimension.div_ceil(height);
    let width_scale = min_dimension.div_ceil(width);
    height_scale.max(width_scale).max(2).min(max_scale.max(1))
}

/// Upscales small regions so glyphs are tall enough for recognition.
pub fn upscale_region(img: &RgbaImage, min_dimension: u32, max_scale: u32) -> RgbaImage {
    let (w, h) = img.dimensions();
    let scale = region_upscale_factor(w, h, min_dimension, max_scale);
    if scale <= 1 {
        return img.clone();
    }
    debug!("Upscaling region {}x{} by {}x", w, h, scale);
    imageops::resize(img, w * scale, h * scale, FilterType::Lanczos3)
}
