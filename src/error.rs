//! Error taxonomy for the extraction pipeline.
//!
//! Every variant is caught inside the pipeline and folded into
//! [`ExtractionResult::Failed`](crate::ExtractionResult::Failed); callers of
//! `extract_code` never see these directly.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    /// The input bytes could not be decoded into an image.
    #[error("failed to decode image: {0}")]
    Decode(String),

    /// The recognition backend could not be started or shut down.
    #[error("recognition engine unavailable: {0}")]
    EngineUnavailable(String),

    /// A single recognize call failed.
    #[error("recognition failed: {0}")]
    Recognition(String),

    /// Text was recognized but did not match the code grammar.
    #[error("no redemption code found in recognized text")]
    NoMatch,
}

impl From<image::ImageError> for ExtractError {
    fn from(e: image::ImageError) -> Self {
        ExtractError::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
