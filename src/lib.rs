//! Redemption code extraction from gift card photos.
//!
//! Decodes a photo, finds the printed code line, binarizes it, runs OCR
//! through a [`RecognitionEngine`] and matches the result against a code
//! grammar, falling back to a whole-image pass when the first read is weak.

pub mod config;
pub mod error;
pub mod ocr;
pub mod paths;

pub use config::{ExtractorConfig, load_config};
pub use error::ExtractError;
pub use ocr::{
    CodeExtractor, CodeGrammar, ExtractionResult, LayoutHint, Recognition, RecognitionEngine,
    TesseractEngine,
};

use std::sync::OnceLock;
use tracing::error;

static SHARED_EXTRACTOR: OnceLock<Option<CodeExtractor<TesseractEngine>>> = OnceLock::new();

/// Process-wide extractor over Tesseract, built from the per-user config on
/// first use. `None` if that config holds an unusable grammar.
pub fn shared_extractor() -> Option<&'static CodeExtractor<TesseractEngine>> {
    SHARED_EXTRACTOR
        .get_or_init(|| {
            let config = load_config(None);
            let engine = TesseractEngine::new(config.tesseract.clone());
            CodeExtractor::new(engine, config)
                .map_err(|e| error!("{:#}", e))
                .ok()
        })
        .as_ref()
}

/// Extracts a code with the shared Tesseract extractor.
///
/// The engine handle is created on the first call and reused by every
/// later one. It lives until the process exits.
pub fn extract_code(image: &[u8]) -> ExtractionResult {
    match shared_extractor() {
        Some(extractor) => extractor.extract_code(image),
        None => ExtractionResult::Failed {
            best_raw_text: String::new(),
        },
    }
}
