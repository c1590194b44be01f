use std::path::PathBuf;
use std::sync::OnceLock;

static EXE_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the directory containing the executable.
pub fn get_exe_dir() -> &'static PathBuf {
    EXE_DIR.get_or_init(|| {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

/// Returns the per-user config directory: `<config_dir>/giftcard-ocr/`
pub fn get_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("giftcard-ocr")
}

/// Returns the default config file: `<config_dir>/giftcard-ocr/config.json`
pub fn get_config_file() -> PathBuf {
    get_config_dir().join("config.json")
}

/// Returns the bundled tesseract directory: `<exe_dir>/tesseract/`
pub fn get_bundled_tesseract_dir() -> PathBuf {
    get_exe_dir().join("tesseract")
}

/// Returns the per-user tesseract directory: `<data_local_dir>/giftcard-ocr/tesseract/`
pub fn get_local_tesseract_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("giftcard-ocr")
        .join("tesseract")
}
