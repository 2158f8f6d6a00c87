//! Offline inspection snapshots for irrecoverable navigation failures.

use crate::error::{FetchError, Result};
use headless_chrome::Tab;
use headless_chrome::protocol::cdp::Page;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Persist the current page as `<label>.html` and `<label>.png` inside
/// `dir`, creating the directory if needed. Returns both paths.
pub fn dump_page(tab: &Arc<Tab>, dir: &Path, label: &str) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)?;

    let html_path = dir.join(format!("{}.html", label));
    let html = tab
        .get_content()
        .map_err(|e| FetchError::TabOperationFailed(format!("Failed to read page content: {}", e)))?;
    std::fs::write(&html_path, html)?;

    let png_path = dir.join(format!("{}.png", label));
    let screenshot = tab
        .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true)
        .map_err(|e| FetchError::TabOperationFailed(format!("Failed to capture screenshot: {}", e)))?;
    std::fs::write(&png_path, screenshot)?;

    log::info!("Diagnostics saved: {} and {}", html_path.display(), png_path.display());
    Ok((html_path, png_path))
}
