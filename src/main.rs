//! giftcard-ocr - read redemption codes from gift card photos.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use giftcard_ocr::ocr::sanitize_manual_code;
use giftcard_ocr::{CodeExtractor, ExtractionResult, TesseractEngine, load_config};

#[derive(Parser, Debug)]
#[command(name = "giftcard-ocr")]
#[command(version, about = "Extracts redemption codes from gift card photos")]
struct Args {
    /// Config file (defaults to the per-user config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Save every binarized attempt image into this directory
    #[arg(long)]
    debug_dir: Option<PathBuf>,

    /// Print one JSON object per image instead of plain text
    #[arg(long)]
    json: bool,

    /// Validate a code typed by hand instead of reading images
    #[arg(long, value_name = "CODE", conflicts_with = "images")]
    manual: Option<String>,

    /// Card photos to read
    #[arg(required_unless_present = "manual")]
    images: Vec<PathBuf>,
}

#[derive(Serialize)]
struct ImageReport<'a> {
    path: &'a Path,
    #[serde(flatten)]
    result: &'a ExtractionResult,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every input produced a code.
fn run(args: &Args) -> Result<bool> {
    let mut config = load_config(args.config.as_deref());
    if let Some(dir) = &args.debug_dir {
        config.debug_dir = Some(dir.clone());
    }

    if let Some(code) = &args.manual {
        return Ok(match sanitize_manual_code(code, &config.grammar) {
            Some(code) => {
                println!("{}", code);
                true
            }
            None => {
                error!("Not a valid code: {:?}", code.trim());
                false
            }
        });
    }

    let engine = TesseractEngine::new(config.tesseract.clone());
    let extractor = CodeExtractor::new(engine, config)?;

    let mut all_found = true;
    for path in &args.images {
        let result = match std::fs::read(path) {
            Ok(bytes) => {
                info!("Reading {}", path.display());
                extractor.extract_code(&bytes)
            }
            Err(e) => {
                error!("Failed to read {}: {}", path.display(), e);
                ExtractionResult::Failed {
                    best_raw_text: String::new(),
                }
            }
        };
        all_found &= result.is_success();
        print_result(path, &result, args.json)?;
    }

    extractor.shutdown()?;
    Ok(all_found)
}

fn print_result(path: &Path, result: &ExtractionResult, json: bool) -> Result<()> {
    if json {
        let line = serde_json::to_string(&ImageReport { path, result })
            .context("Failed to serialize result")?;
        println!("{}", line);
        return Ok(());
    }

    match result {
        ExtractionResult::Success { code } => println!("{}: {}", path.display(), code),
        ExtractionResult::Failed { best_raw_text } if best_raw_text.is_empty() => {
            println!("{}: no code found", path.display())
        }
        ExtractionResult::Failed { best_raw_text } => {
            println!("{}: no code found (read {:?})", path.display(), best_raw_text)
        }
    }
    Ok(())
}
