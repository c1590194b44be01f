use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Command;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::preprocess::BinaryImage;
use super::setup::{find_tessdata_dir, find_tesseract_executable, tesseract_version};
use crate::config::TesseractConfig;
use crate::error::{ExtractError, Result};

/// Expected arrangement of the text, passed to the engine per call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutHint {
    SingleWord,
    SingleLine,
    Block,
}

impl LayoutHint {
    /// Tesseract page segmentation mode for this hint.
    pub fn page_seg_mode(self) -> u8 {
        match self {
            LayoutHint::SingleWord => 8,
            LayoutHint::SingleLine => 7,
            LayoutHint::Block => 6,
        }
    }
}

/// Text and overall confidence (0-100) from one recognize call.
#[derive(Clone, Debug, PartialEq)]
pub struct Recognition {
    pub text: String,
    pub confidence: f32,
}

/// A recognition backend with an explicit handle lifecycle.
///
/// The handle is created once and reused for any number of `recognize`
/// calls with different layout hints. Callers must not run two
/// `recognize` calls against the same handle at once; taking `&mut` to the
/// handle enforces that.
pub trait RecognitionEngine {
    type Handle;

    fn initialize(&self) -> Result<Self::Handle>;

    fn recognize(
        &self,
        handle: &mut Self::Handle,
        image: &BinaryImage,
        layout: LayoutHint,
    ) -> Result<Recognition>;

    fn terminate(&self, handle: Self::Handle) -> Result<()>;
}

/// Represents a line of OCR text with confidence score
#[derive(Debug, Clone)]
pub struct OcrLine {
    pub text: String,
    pub words: Vec<OcrWord>,
    pub confidence: f32,
}

/// Represents a single word from OCR with confidence score
#[derive(Debug, Clone)]
pub struct OcrWord {
    pub text: String,
    pub confidence: f32,
}

/// Resolved Tesseract installation.
#[derive(Debug, Clone)]
pub struct TesseractHandle {
    pub executable: PathBuf,
    pub tessdata: Option<PathBuf>,
    pub version: String,
}

/// Recognition through the `tesseract` command-line program.
#[derive(Debug, Clone, Default)]
pub struct TesseractEngine {
    config: TesseractConfig,
}

impl TesseractEngine {
    pub fn new(config: TesseractConfig) -> Self {
        Self { config }
    }

    fn run(&self, handle: &TesseractHandle, image: &BinaryImage, layout: LayoutHint) -> anyhow::Result<Vec<OcrLine>> {
        // Save image to temporary file
        let temp_input = NamedTempFile::with_suffix(".png")?;
        image
            .as_rgba()
            .save(temp_input.path())
            .context("Failed to write OCR input image")?;

        // Tesseract appends .tsv to the output base
        let temp_output = NamedTempFile::new()?;
        let output_base = temp_output.path().to_string_lossy().to_string();

        let mut cmd = Command::new(&handle.executable);
        cmd.arg(temp_input.path()).arg(&output_base);
        if let Some(tessdata) = &handle.tessdata {
            cmd.arg("--tessdata-dir").arg(tessdata);
        }
        cmd.arg("-l")
            .arg(&self.config.language)
            .arg("--psm")
            .arg(layout.page_seg_mode().to_string());
        if !self.config.char_whitelist.is_empty() {
            cmd.arg("-c")
                .arg(format!("tessedit_char_whitelist={}", self.config.char_whitelist));
        }
        cmd.arg("tsv");

        let output = cmd.output().context("Failed to run tesseract")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Tesseract failed: {}", stderr.trim()));
        }

        let tsv_path = format!("{}.tsv", output_base);
        let tsv_content = std::fs::read_to_string(&tsv_path)
            .with_context(|| format!("Failed to read Tesseract output {}", tsv_path))?;
        let _ = std::fs::remove_file(&tsv_path);

        Ok(parse_tsv_output(&tsv_content))
    }
}

impl RecognitionEngine for TesseractEngine {
    type Handle = TesseractHandle;

    fn initialize(&self) -> Result<TesseractHandle> {
        let executable = find_tesseract_executable(self.config.executable.as_deref())
            .map_err(|e| ExtractError::EngineUnavailable(format!("{:#}", e)))?;
        let version = tesseract_version(&executable)
            .map_err(|e| ExtractError::EngineUnavailable(format!("{:#}", e)))?;
        let tessdata = find_tessdata_dir(self.config.tessdata_dir.as_deref(), &self.config.language);

        info!(
            "Tesseract {} at {} (tessdata: {})",
            version,
            executable.display(),
            tessdata
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "system default".to_string())
        );

        Ok(TesseractHandle {
            executable,
            tessdata,
            version,
        })
    }

    fn recognize(
        &self,
        handle: &mut TesseractHandle,
        image: &BinaryImage,
        layout: LayoutHint,
    ) -> Result<Recognition> {
        let lines = self
            .run(handle, image, layout)
            .map_err(|e| ExtractError::Recognition(format!("{:#}", e)))?;

        let recognition = summarize_lines(&lines);
        debug!(
            "Tesseract ({:?}): {} lines, confidence {:.1}",
            layout,
            lines.len(),
            recognition.confidence
        );
        Ok(recognition)
    }

    fn terminate(&self, handle: TesseractHandle) -> Result<()> {
        // Each call runs a fresh process; nothing stays resident
        debug!("Releasing Tesseract handle ({})", handle.executable.display());
        Ok(())
    }
}

/// Joins lines into one text. The confidence is the mean over all words,
/// so each line's mean is weighted by its word count.
pub fn summarize_lines(lines: &[OcrLine]) -> Recognition {
    let text = lines
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let (sum, count) = lines.iter().fold((0.0f32, 0usize), |(s, n), l| {
        (s + l.confidence * l.words.len() as f32, n + l.words.len())
    });
    let confidence = if count > 0 { sum / count as f32 } else { 0.0 };

    Recognition {
        text,
        confidence: confidence.clamp(0.0, 100.0),
    }
}

/// Parses Tesseract TSV output into structured OcrLine data
pub fn parse_tsv_output(tsv: &str) -> Vec<OcrLine> {
    let mut lines: Vec<OcrLine> = Vec::new();
    let mut current_key: Option<(i32, i32, i32)> = None;
    let mut current_words: Vec<OcrWord> = Vec::new();

    for line in tsv.lines().skip(1) {
        // Skip header
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        // TSV fields: level, page_num, block_num, par_num, line_num, word_num,
        //             left, top, width, height, conf, text
        let level: i32 = fields[0].parse().unwrap_or(-1);
        let block_num: i32 = fields[2].parse().unwrap_or(-1);
        let par_num: i32 = fields[3].parse().unwrap_or(-1);
        let line_num: i32 = fields[4].parse().unwrap_or(-1);
        let conf: f32 = fields[10].trim().parse().unwrap_or(-1.0);
        let text = fields[11].trim();

        // Level 5 = word
        if level != 5 || text.is_empty() || conf < 0.0 {
            continue;
        }

        let key = (block_num, par_num, line_num);
        if current_key.is_some_and(|k| k != key) {
            push_line(&mut lines, std::mem::take(&mut current_words));
        }
        current_key = Some(key);

        current_words.push(OcrWord {
            text: text.to_string(),
            confidence: conf,
        });
    }

    // Don't forget the last line
    push_line(&mut lines, current_words);

    lines
}

fn push_line(lines: &mut Vec<OcrLine>, words: Vec<OcrWord>) {
    if words.is_empty() {
        return;
    }
    let confidence = words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32;
    let text = words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    lines.push(OcrLine {
        text,
        words,
        confidence,
    });
}
