//! Locating a Tesseract installation.
//!
//! Search order: explicit config, the directory bundled next to the
//! executable, the per-user data directory, `PATH`, then common install
//! locations.

use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::paths::{get_bundled_tesseract_dir, get_local_tesseract_dir};

#[cfg(windows)]
const EXECUTABLE_NAME: &str = "tesseract.exe";
#[cfg(not(windows))]
const EXECUTABLE_NAME: &str = "tesseract";

#[cfg(windows)]
const COMMON_INSTALL_DIRS: &[&str] = &[
    r"C:\Program Files\Tesseract-OCR",
    r"C:\Program Files (x86)\Tesseract-OCR",
];
#[cfg(not(windows))]
const COMMON_INSTALL_DIRS: &[&str] = &["/usr/bin", "/usr/local/bin", "/opt/homebrew/bin"];

#[cfg(windows)]
const SYSTEM_TESSDATA_DIRS: &[&str] = &[
    r"C:\Program Files\Tesseract-OCR\tessdata",
    r"C:\Program Files (x86)\Tesseract-OCR\tessdata",
];
#[cfg(not(windows))]
const SYSTEM_TESSDATA_DIRS: &[&str] = &[
    "/usr/share/tesseract-ocr/5/tessdata",
    "/usr/share/tesseract-ocr/4.00/tessdata",
    "/usr/share/tessdata",
    "/usr/local/share/tessdata",
    "/opt/homebrew/share/tessdata",
];

/// Finds the Tesseract executable.
///
/// A configured path must exist; it is never silently replaced by a
/// different installation.
pub fn find_tesseract_executable(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(anyhow!(
            "Configured Tesseract executable not found: {}",
            path.display()
        ));
    }

    for dir in [get_bundled_tesseract_dir(), get_local_tesseract_dir()] {
        let exe = dir.join(EXECUTABLE_NAME);
        if exe.exists() {
            return Ok(exe);
        }
    }

    // Check PATH
    if let Ok(output) = Command::new("tesseract").arg("--version").output() {
        if output.status.success() {
            return Ok(PathBuf::from("tesseract"));
        }
    }

    for dir in COMMON_INSTALL_DIRS {
        let p = Path::new(dir).join(EXECUTABLE_NAME);
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!("Tesseract not found. Please install Tesseract-OCR."))
}

/// Runs `tesseract --version` and returns the first line.
pub fn tesseract_version(executable: &Path) -> Result<String> {
    let output = Command::new(executable)
        .arg("--version")
        .output()
        .with_context(|| format!("Failed to run {}", executable.display()))?;

    if !output.status.success() {
        return Err(anyhow!(
            "{} --version exited with {}",
            executable.display(),
            output.status
        ));
    }

    // Older releases print the banner on stderr
    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).to_string()
    } else {
        String::from_utf8_lossy(&output.stdout).to_string()
    };

    Ok(text.lines().next().unwrap_or("tesseract").trim().to_string())
}

/// Finds a tessdata directory holding `<language>.traineddata`.
///
/// `None` means Tesseract's own compiled-in default is used.
pub fn find_tessdata_dir(configured: Option<&Path>, language: &str) -> Option<PathBuf> {
    let traineddata = format!("{}.traineddata", language);
    let holds_language = |dir: &Path| dir.join(&traineddata).exists();

    if let Some(dir) = configured {
        if holds_language(dir) {
            return Some(dir.to_path_buf());
        }
    }

    for base in [get_bundled_tesseract_dir(), get_local_tesseract_dir()] {
        let dir = base.join("tessdata");
        if holds_language(&dir) {
            return Some(dir);
        }
    }

    // Check TESSDATA_PREFIX environment variable
    if let Ok(prefix) = std::env::var("TESSDATA_PREFIX") {
        let p = PathBuf::from(&prefix);
        if holds_language(&p) {
            return Some(p);
        }
        let p = p.join("tessdata");
        if holds_language(&p) {
            return Some(p);
        }
    }

    SYSTEM_TESSDATA_DIRS
        .iter()
        .map(PathBuf::from)
        .find(|p| holds_language(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_configured_missing_executable_is_error() {
        let result = find_tesseract_executable(Some(Path::new("/nonexistent/tesseract")));
        assert!(result.is_err());
    }

    #[test]
    fn test_configured_executable_is_used() {
        let dir = tempdir().unwrap();
        let exe = dir.path().join(EXECUTABLE_NAME);
        std::fs::write(&exe, b"").unwrap();

        assert_eq!(find_tesseract_executable(Some(&exe)).unwrap(), exe);
    }

    #[test]
    fn test_configured_tessdata_needs_language_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("eng.traineddata"), b"").unwrap();

        assert_eq!(
            find_tessdata_dir(Some(dir.path()), "eng"),
            Some(dir.path().to_path_buf())
        );
        assert_ne!(
            find_tessdata_dir(Some(dir.path()), "xyz"),
            Some(dir.path().to_path_buf())
        );
    }
}
