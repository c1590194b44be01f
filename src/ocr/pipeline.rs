//! Drives one extraction from image bytes to an [`ExtractionResult`].
//!
//! Attempts follow [`ExtractorConfig::attempts`] in order. The first attempt
//! always runs; each later one only runs when the previous attempt matched
//! nothing and scored below the confidence floor.

use anyhow::Context;
use chrono::Local;
use image::RgbaImage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use super::engine::{Recognition, RecognitionEngine};
use super::extract::{CodeMatcher, mask_code};
use super::loader::load_image;
use super::normalize::normalize;
use super::preprocess::{BinaryImage, binarize, to_grayscale, upscale_region};
use super::region::{crop_region, locate_region};
use crate::config::{AttemptPlan, AttemptSource, ExtractorConfig};
use crate::error::{ExtractError, Result};

/// Outcome of one extraction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExtractionResult {
    /// A code in canonical form.
    Success { code: String },
    /// No code found. Carries the highest-confidence text seen, for display.
    Failed { best_raw_text: String },
}

impl ExtractionResult {
    pub fn code(&self) -> Option<&str> {
        match self {
            ExtractionResult::Success { code } => Some(code),
            ExtractionResult::Failed { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExtractionResult::Success { .. })
    }
}

/// Highest-confidence non-empty text seen so far.
#[derive(Default)]
struct BestText {
    text: String,
    confidence: f32,
}

impl BestText {
    fn offer(&mut self, recognition: &Recognition) {
        let text = recognition.text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            return;
        }
        if self.text.is_empty() || recognition.confidence > self.confidence {
            self.text = text;
            self.confidence = recognition.confidence;
        }
    }
}

/// Owns a recognition engine and its handle, and runs extractions on them.
///
/// The handle is created on first use and reused afterwards. Calls from
/// several threads are serialized around the engine.
pub struct CodeExtractor<E: RecognitionEngine> {
    engine: E,
    handle: Mutex<Option<E::Handle>>,
    matcher: CodeMatcher,
    config: ExtractorConfig,
}

impl<E: RecognitionEngine> CodeExtractor<E> {
    pub fn new(engine: E, config: ExtractorConfig) -> anyhow::Result<Self> {
        let matcher = CodeMatcher::new(config.grammar.clone()).context("Invalid code grammar")?;
        Ok(Self {
            engine,
            handle: Mutex::new(None),
            matcher,
            config,
        })
    }

    /// Starts the engine now instead of on the first extraction.
    pub fn initialize(&self) -> Result<()> {
        let mut guard = self.handle.lock();
        if guard.is_none() {
            *guard = Some(self.engine.initialize()?);
            info!("Recognition engine initialized");
        }
        Ok(())
    }

    /// Terminates the engine handle, if one is open. A later extraction
    /// starts a fresh one.
    pub fn shutdown(&self) -> Result<()> {
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => {
                self.engine.terminate(handle)?;
                info!("Recognition engine terminated");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Extracts a redemption code from encoded image bytes.
    ///
    /// Never fails: decode, engine and recognition errors all end in
    /// [`ExtractionResult::Failed`].
    pub fn extract_code(&self, bytes: &[u8]) -> ExtractionResult {
        let image = match load_image(bytes, self.config.working_resolution) {
            Ok(image) => image,
            Err(e) => {
                warn!("{}", e);
                return ExtractionResult::Failed {
                    best_raw_text: String::new(),
                };
            }
        };

        let mut best = BestText::default();

        for (index, plan) in self.config.attempts.iter().enumerate() {
            let binary = self.prepare(&image, plan.source);
            self.dump_debug_image(&binary, index, plan);

            let confidence = match self.recognize(&binary, plan) {
                Ok(recognition) => {
                    best.offer(&recognition);
                    let normalized = normalize(&recognition.text);
                    debug!(
                        "Attempt {} ({:?}/{:?}): confidence {:.1}, text {:?}",
                        index + 1,
                        plan.source,
                        plan.layout,
                        recognition.confidence,
                        normalized
                    );
                    match self.match_normalized(&normalized) {
                        Ok(code) => {
                            info!(
                                "Found code {} on attempt {} ({:?}/{:?}, confidence {:.1})",
                                mask_code(&code),
                                index + 1,
                                plan.source,
                                plan.layout,
                                recognition.confidence
                            );
                            return ExtractionResult::Success { code };
                        }
                        Err(e) => {
                            debug!("Attempt {}: {}", index + 1, e);
                            recognition.confidence
                        }
                    }
                }
                Err(e @ ExtractError::EngineUnavailable(_)) => {
                    warn!("{}", e);
                    break;
                }
                Err(e) => {
                    warn!("Attempt {}: {}", index + 1, e);
                    0.0
                }
            };

            if confidence >= self.config.confidence_floor {
                debug!(
                    "Confidence {:.1} meets floor {:.1}, not retrying",
                    confidence, self.config.confidence_floor
                );
                break;
            }
        }

        info!("No code found");
        ExtractionResult::Failed {
            best_raw_text: best.text,
        }
    }

    /// Normalizes recognized text and matches it against the grammar.
    pub fn match_text(&self, raw: &str) -> Result<String> {
        self.match_normalized(&normalize(raw))
    }

    fn match_normalized(&self, normalized: &str) -> Result<String> {
        self.matcher.match_code(normalized).ok_or(ExtractError::NoMatch)
    }

    fn prepare(&self, image: &RgbaImage, source: AttemptSource) -> BinaryImage {
        match source {
            AttemptSource::Region => {
                let roi = locate_region(&to_grayscale(image), &self.config.region);
                let region = crop_region(image, &roi);
                let region = upscale_region(
                    &region,
                    self.config.region.min_dimension,
                    self.config.region.max_upscale,
                );
                binarize(&region, self.config.repair_gaps)
            }
            AttemptSource::FullImage => binarize(image, self.config.repair_gaps),
        }
    }

    fn recognize(&self, image: &BinaryImage, plan: &AttemptPlan) -> Result<Recognition> {
        let mut guard = self.handle.lock();
        if guard.is_none() {
            *guard = Some(self.engine.initialize()?);
            info!("Recognition engine initialized");
        }
        let Some(handle) = guard.as_mut() else {
            return Err(ExtractError::EngineUnavailable(
                "engine handle missing after initialization".to_string(),
            ));
        };
        self.engine.recognize(handle, image, plan.layout)
    }

    fn dump_debug_image(&self, image: &BinaryImage, index: usize, plan: &AttemptPlan) {
        let Some(dir) = &self.config.debug_dir else {
            return;
        };
        if let Err(e) = save_debug_image(dir, image, index, plan) {
            warn!("Failed to save debug image: {:#}", e);
        }
    }
}

impl<E: RecognitionEngine> Drop for CodeExtractor<E> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            if let Err(e) = self.engine.terminate(handle) {
                warn!("{}", e);
            }
        }
    }
}

fn save_debug_image(
    dir: &Path,
    image: &BinaryImage,
    index: usize,
    plan: &AttemptPlan,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let timestamp = Local::now().format("%Y%m%d_%H%M%S%.3f");
    let source = match plan.source {
        AttemptSource::Region => "region",
        AttemptSource::FullImage => "full",
    };
    let path = dir.join(format!("{}_attempt{}_{}.png", timestamp, index + 1, source));

    image.as_rgba().save(&path)?;
    debug!("Saved debug image: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::engine::LayoutHint;
    use image::{DynamicImage, ImageFormat, Rgba};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::io::Cursor;
    use std::sync::Arc;

    #[derive(Default)]
    struct EngineLog {
        inits: usize,
        terminations: usize,
        calls: Vec<LayoutHint>,
    }

    /// Engine answering from a fixed script keyed by layout hint.
    /// `None` as a reply makes that call fail.
    struct ScriptedEngine {
        fail_init: bool,
        replies: Vec<(LayoutHint, Option<(&'static str, f32)>)>,
        log: Arc<parking_lot::Mutex<EngineLog>>,
    }

    impl ScriptedEngine {
        fn new(replies: Vec<(LayoutHint, Option<(&'static str, f32)>)>) -> Self {
            Self {
                fail_init: false,
                replies,
                log: Arc::default(),
            }
        }

        fn failing_init() -> Self {
            Self {
                fail_init: true,
                ..Self::new(Vec::new())
            }
        }
    }

    impl RecognitionEngine for ScriptedEngine {
        type Handle = ();

        fn initialize(&self) -> Result<()> {
            self.log.lock().inits += 1;
            if self.fail_init {
                return Err(ExtractError::EngineUnavailable("no engine".to_string()));
            }
            Ok(())
        }

        fn recognize(&self, _: &mut (), _: &BinaryImage, layout: LayoutHint) -> Result<Recognition> {
            self.log.lock().calls.push(layout);
            match self.replies.iter().find(|(hint, _)| *hint == layout) {
                Some((_, Some((text, confidence)))) => Ok(Recognition {
                    text: text.to_string(),
                    confidence: *confidence,
                }),
                Some((_, None)) => Err(ExtractError::Recognition("scripted failure".to_string())),
                None => Ok(Recognition {
                    text: String::new(),
                    confidence: 0.0,
                }),
            }
        }

        fn terminate(&self, _: ()) -> Result<()> {
            self.log.lock().terminations += 1;
            Ok(())
        }
    }

    fn encode_png(img: RgbaImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    /// Light card with one dark text band in its lower half.
    fn card_png() -> Vec<u8> {
        let img = RgbaImage::from_fn(400, 250, |x, y| {
            if (180..196).contains(&y) && (60..340).contains(&x) && x % 7 != 0 {
                Rgba([25, 25, 30, 255])
            } else {
                Rgba([235, 232, 228, 255])
            }
        });
        encode_png(img)
    }

    fn extractor(engine: ScriptedEngine) -> CodeExtractor<ScriptedEngine> {
        CodeExtractor::new(engine, ExtractorConfig::default()).unwrap()
    }

    #[test]
    fn test_region_attempt_success() {
        let engine = ScriptedEngine::new(vec![(LayoutHint::SingleLine, Some(("NEEXT-GC-AB12CD34-5", 90.0)))]);
        let log = engine.log.clone();
        let extractor = extractor(engine);

        let result = extractor.extract_code(&card_png());
        assert_eq!(result.code(), Some("NEEXT-GC-AB12CD34-5"));
        assert_eq!(log.lock().calls, vec![LayoutHint::SingleLine]);
    }

    #[test]
    fn test_low_confidence_falls_back_to_full_image() {
        let engine = ScriptedEngine::new(vec![
            (LayoutHint::SingleLine, Some(("N?", 12.0))),
            (LayoutHint::Block, Some(("Gift card\nCode: NEEXT GC AB12CD34 5", 70.0))),
        ]);
        let log = engine.log.clone();
        let extractor = extractor(engine);

        let result = extractor.extract_code(&card_png());
        assert_eq!(
            result,
            ExtractionResult::Success {
                code: "NEEXT-GC-AB12CD34-5".to_string()
            }
        );
        assert_eq!(log.lock().calls, vec![LayoutHint::SingleLine, LayoutHint::Block]);
    }

    #[test]
    fn test_adequate_confidence_skips_fallback() {
        let engine = ScriptedEngine::new(vec![
            (LayoutHint::SingleLine, Some(("HELLO   WORLD", 80.0))),
            (LayoutHint::Block, Some(("NEEXT-GC-AB12CD34-5", 90.0))),
        ]);
        let log = engine.log.clone();
        let extractor = extractor(engine);

        let result = extractor.extract_code(&card_png());
        assert_eq!(
            result,
            ExtractionResult::Failed {
                best_raw_text: "HELLO WORLD".to_string()
            }
        );
        assert_eq!(log.lock().calls, vec![LayoutHint::SingleLine]);
    }

    #[test]
    fn test_failed_region_recognition_falls_back() {
        let engine = ScriptedEngine::new(vec![
            (LayoutHint::SingleLine, None),
            (LayoutHint::Block, Some(("NEEXT-GC-AB12CD34-5", 60.0))),
        ]);
        let extractor = extractor(engine);

        assert_eq!(extractor.extract_code(&card_png()).code(), Some("NEEXT-GC-AB12CD34-5"));
    }

    #[test]
    fn test_best_raw_text_is_most_confident() {
        let engine = ScriptedEngine::new(vec![
            (LayoutHint::SingleLine, Some(("ABC \n DEF", 20.0))),
            (LayoutHint::Block, Some(("XYZ", 10.0))),
        ]);
        let extractor = extractor(engine);

        assert_eq!(
            extractor.extract_code(&card_png()),
            ExtractionResult::Failed {
                best_raw_text: "ABC DEF".to_string()
            }
        );
    }

    #[test]
    fn test_undecodable_input_fails_without_engine() {
        let engine = ScriptedEngine::new(Vec::new());
        let log = engine.log.clone();
        let extractor = extractor(engine);

        assert_eq!(
            extractor.extract_code(b"definitely not an image"),
            ExtractionResult::Failed {
                best_raw_text: String::new()
            }
        );
        assert_eq!(log.lock().inits, 0);
    }

    #[test]
    fn test_init_failure_is_failed_and_retried() {
        let engine = ScriptedEngine::failing_init();
        let log = engine.log.clone();
        let extractor = extractor(engine);

        assert!(!extractor.extract_code(&card_png()).is_success());
        assert!(!extractor.extract_code(&card_png()).is_success());
        assert_eq!(log.lock().inits, 2);
        assert!(log.lock().calls.is_empty());
    }

    #[test]
    fn test_idempotent_and_handle_reused() {
        let engine = ScriptedEngine::new(vec![(LayoutHint::SingleLine, Some(("NEEXT-GC-AB12CD34-5", 90.0)))]);
        let log = engine.log.clone();
        let extractor = extractor(engine);
        let png = card_png();

        let first = extractor.extract_code(&png);
        let second = extractor.extract_code(&png);
        assert_eq!(first, second);
        assert_eq!(log.lock().inits, 1);
    }

    #[test]
    fn test_shutdown_and_drop_terminate() {
        let engine = ScriptedEngine::new(Vec::new());
        let log = engine.log.clone();
        let extractor = extractor(engine);

        extractor.initialize().unwrap();
        extractor.shutdown().unwrap();
        assert_eq!(log.lock().terminations, 1);

        // Shutting down twice is a no-op
        extractor.shutdown().unwrap();
        assert_eq!(log.lock().terminations, 1);

        extractor.extract_code(&card_png());
        assert_eq!(log.lock().inits, 2);
        drop(extractor);
        assert_eq!(log.lock().terminations, 2);
    }

    #[test]
    fn test_match_text() {
        let extractor = extractor(ScriptedEngine::new(Vec::new()));
        assert_eq!(
            extractor.match_text("neext – gc – ab12cd34 – 5").unwrap(),
            "NEEXT-GC-AB12CD34-5"
        );
        assert!(matches!(extractor.match_text("nothing here"), Err(ExtractError::NoMatch)));
    }

    #[test]
    fn test_empty_plan_fails() {
        let config = ExtractorConfig {
            attempts: Vec::new(),
            ..ExtractorConfig::default()
        };
        let extractor = CodeExtractor::new(ScriptedEngine::new(Vec::new()), config).unwrap();
        assert!(!extractor.extract_code(&card_png()).is_success());
    }

    #[test]
    fn test_debug_images_written() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExtractorConfig {
            debug_dir: Some(dir.path().join("debug")),
            ..ExtractorConfig::default()
        };
        let extractor = CodeExtractor::new(ScriptedEngine::new(Vec::new()), config).unwrap();

        extractor.extract_code(&card_png());

        let written = std::fs::read_dir(dir.path().join("debug")).unwrap().count();
        assert_eq!(written, 2);
    }

    /// Random bytes, truncated PNGs and random-pixel PNGs.
    fn fuzz_inputs(count: usize) -> Vec<Vec<u8>> {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        (0..count)
            .map(|i| match i % 3 {
                0 => {
                    let mut bytes = vec![0u8; rng.gen_range(0..512)];
                    rng.fill(&mut bytes[..]);
                    bytes
                }
                1 => {
                    let png = card_png();
                    let cut = rng.gen_range(0..png.len());
                    png[..cut].to_vec()
                }
                _ => {
                    let (w, h) = (rng.gen_range(1..48), rng.gen_range(1..48));
                    let img = RgbaImage::from_fn(w, h, |_, _| Rgba([rng.r#gen(), rng.r#gen(), rng.r#gen(), 255]));
                    encode_png(img)
                }
            })
            .collect()
    }

    #[test]
    fn test_no_panic_with_failing_engine() {
        let config = ExtractorConfig {
            working_resolution: 64,
            ..ExtractorConfig::default()
        };
        let failing_init = CodeExtractor::new(ScriptedEngine::failing_init(), config.clone()).unwrap();
        let failing_recognize = CodeExtractor::new(
            ScriptedEngine::new(vec![(LayoutHint::SingleLine, None), (LayoutHint::Block, None)]),
            config,
        )
        .unwrap();

        for input in fuzz_inputs(120) {
            assert!(matches!(
                failing_init.extract_code(&input),
                ExtractionResult::Failed { .. }
            ));
            assert!(matches!(
                failing_recognize.extract_code(&input),
                ExtractionResult::Failed { .. }
            ));
        }
    }
}
