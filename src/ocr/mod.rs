pub mod engine;
pub mod extract;
pub mod loader;
pub mod normalize;
pub mod pipeline;
pub mod preprocess;
pub mod region;
pub mod setup;

pub use engine::{LayoutHint, Recognition, RecognitionEngine, TesseractEngine};
pub use extract::{CodeGrammar, CodeMatcher, sanitize_manual_code};
pub use normalize::normalize;
pub use pipeline::{CodeExtractor, ExtractionResult};
pub use preprocess::{BinaryImage, binarize};
pub use region::{Roi, locate_region};
