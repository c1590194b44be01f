//! Configuration types for code extraction.
//!
//! Loads settings from config.json. Every field has a default, so a partial
//! file only overrides what it names.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::ocr::engine::LayoutHint;
use crate::ocr::extract::CodeGrammar;

/// Which pixels an OCR attempt reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptSource {
    /// The located code region, upscaled when small.
    Region,
    /// The whole scaled image.
    FullImage,
}

/// One entry in the ordered attempt plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptPlan {
    pub source: AttemptSource,
    pub layout: LayoutHint,
}

/// Parameters for locating the code region.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// Gray values below this count as ink
    pub darkness_threshold: u8,
    /// Start of the row search band, relative to image height
    pub band_start: f32,
    /// End (exclusive) of the row search band, relative to image height
    pub band_end: f32,
    /// Rows keep expanding while their ink count exceeds this fraction of the peak
    pub expand_ratio: f32,
    /// Maximum rows the band may grow in each direction from the seed row
    pub max_drift: u32,
    /// Margin added around the detected rectangle
    pub padding: u32,
    /// Regions smaller than this (either side) are upscaled before OCR
    pub min_dimension: u32,
    /// Upper bound for that upscale factor
    pub max_upscale: u32,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            darkness_threshold: 180,
            band_start: 0.5,
            band_end: 0.9,
            expand_ratio: 0.2,
            max_drift: 30,
            padding: 15,
            min_dimension: 80,
            max_upscale: 4,
        }
    }
}

/// Settings for the Tesseract command-line backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseractConfig {
    /// Explicit path to the tesseract executable
    pub executable: Option<PathBuf>,
    /// Explicit tessdata directory
    pub tessdata_dir: Option<PathBuf>,
    pub language: String,
    /// Passed as `tessedit_char_whitelist`; empty disables the whitelist
    pub char_whitelist: String,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            executable: None,
            tessdata_dir: None,
            language: "eng".to_string(),
            char_whitelist: "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789- ".to_string(),
        }
    }
}

/// Complete extractor configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Images whose longest side is below this are upscaled to it
    pub working_resolution: u32,
    pub region: RegionConfig,
    /// Repair broken strokes with a morphological closing after thresholding
    pub repair_gaps: bool,
    /// Attempts scoring below this confidence (0-100) fall through to the next plan entry
    pub confidence_floor: f32,
    pub attempts: Vec<AttemptPlan>,
    pub grammar: CodeGrammar,
    pub tesseract: TesseractConfig,
    /// When set, every attempt's binary image is written here
    pub debug_dir: Option<PathBuf>,
}

fn default_attempts() -> Vec<AttemptPlan> {
    vec![
        AttemptPlan {
            source: AttemptSource::Region,
            layout: LayoutHint::SingleLine,
        },
        AttemptPlan {
            source: AttemptSource::FullImage,
            layout: LayoutHint::Block,
        },
    ]
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            working_resolution: 800,
            region: RegionConfig::default(),
            repair_gaps: true,
            confidence_floor: 30.0,
            attempts: default_attempts(),
            grammar: CodeGrammar::default(),
            tesseract: TesseractConfig::default(),
            debug_dir: None,
        }
    }
}

/// Loads configuration from `path`, or from the default config location
/// when `path` is `None`. Falls back to defaults if the file is missing or
/// cannot be parsed.
pub fn load_config(path: Option<&Path>) -> ExtractorConfig {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => crate::paths::get_config_file(),
    };

    info!("Looking for config at: {}", config_path.display());

    if !config_path.exists() {
        info!("config.json not found. Using default config.");
        return ExtractorConfig::default();
    }

    match read_config(&config_path) {
        Ok(config) => {
            info!("Config loaded from {}", config_path.display());
            config
        }
        Err(e) => {
            warn!("{:#}. Using defaults.", e);
            ExtractorConfig::default()
        }
    }
}

/// Reads and parses a config file, reporting any failure.
pub fn read_config(path: &Path) -> anyhow::Result<ExtractorConfig> {
    use anyhow::Context;

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(config)
}
