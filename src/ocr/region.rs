//! Heuristic location of the printed code on a card.
//!
//! Codes sit on a single dense line of dark glyphs, usually in the lower
//! half of the card. The locator finds the darkest row in that band, grows
//! it into a text line, then bounds the line horizontally.

use image::{GrayImage, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RegionConfig;

/// Rectangle in pixel coordinates, always inside the image it was made for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    /// ROI covering a whole `width` x `height` image.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn center_y(&self) -> u32 {
        self.y + self.height / 2
    }

    pub fn covers(&self, width: u32, height: u32) -> bool {
        *self == Roi::full(width, height)
    }
}

/// Counts ink pixels (gray below `threshold`) in every row.
pub fn row_profile(gray: &GrayImage, threshold: u8) -> Vec<u32> {
    let (w, h) = gray.dimensions();
    (0..h)
        .map(|y| (0..w).filter(|&x| gray.get_pixel(x, y)[0] < threshold).count() as u32)
        .collect()
}

/// Finds the sub-rectangle most likely to contain the code line.
///
/// Never fails: any degenerate outcome yields the full-image ROI.
pub fn locate_region(gray: &GrayImage, config: &RegionConfig) -> Roi {
    let (w, h) = gray.dimensions();
    let full = Roi::full(w, h);
    if w == 0 || h == 0 {
        return full;
    }

    let profile = row_profile(gray, config.darkness_threshold);
    let peak = profile.iter().copied().max().unwrap_or(0);
    if peak == 0 {
        debug!("No ink found, using full image");
        return full;
    }

    let band_start = ((h as f32 * config.band_start) as u32).min(h - 1);
    let band_end = ((h as f32 * config.band_end) as u32).clamp(band_start + 1, h);

    // First row with the maximal count wins ties
    let mut seed = band_start;
    for y in band_start..band_end {
        if profile[y as usize] > profile[seed as usize] {
            seed = y;
        }
    }
    if profile[seed as usize] == 0 {
        debug!("Search band {}..{} is empty, using full image", band_start, band_end);
        return full;
    }

    let floor = peak as f32 * config.expand_ratio;
    let dense = |y: u32| profile[y as usize] as f32 > floor;

    let mut top = seed;
    while top > 0 && seed - (top - 1) <= config.max_drift && dense(top - 1) {
        top -= 1;
    }
    let mut bottom = seed;
    while bottom + 1 < h && (bottom + 1) - seed <= config.max_drift && dense(bottom + 1) {
        bottom += 1;
    }

    let Some((left, right)) = ink_columns(gray, top, bottom, config.darkness_threshold) else {
        return full;
    };

    let x0 = left.saturating_sub(config.padding);
    let y0 = top.saturating_sub(config.padding);
    let x1 = (right + config.padding).min(w - 1);
    let y1 = (bottom + config.padding).min(h - 1);

    let roi = Roi {
        x: x0,
        y: y0,
        width: x1 - x0 + 1,
        height: y1 - y0 + 1,
    };

    if !roi.is_valid() {
        return full;
    }

    debug!(
        "Code region: seed row {}, rows {}..={}, cols {}..={} -> {:?}",
        seed, top, bottom, left, right, roi
    );
    roi
}

/// Leftmost and rightmost ink columns within rows `top..=bottom`.
fn ink_columns(gray: &GrayImage, top: u32, bottom: u32, threshold: u8) -> Option<(u32, u32)> {
    let w = gray.width();
    let has_ink = |x: u32| (top..=bottom).any(|y| gray.get_pixel(x, y)[0] < threshold);

    let left = (0..w).find(|&x| has_ink(x))?;
    let right = (left..w).rev().find(|&x| has_ink(x))?;
    Some((left, right))
}

/// Crops `roi` out of `img`, clamping to the image bounds.
pub fn crop_region(img: &RgbaImage, roi: &Roi) -> RgbaImage {
    let (w, h) = img.dimensions();

    let x0 = roi.x.min(w);
    let y0 = roi.y.min(h);
    let rw = roi.width.min(w - x0);
    let rh = roi.height.min(h - y0);

    image::imageops::crop_imm(img, x0, y0, rw, rh).to_image()
}
