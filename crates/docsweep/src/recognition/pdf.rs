//! PDF page counting with lopdf and rendering through poppler-utils
//! (`pdfinfo`, `pdftoppm`).

use std::path::{Path, PathBuf};
use std::process::Command;

use super::UnitSource;
use crate::error::ProcessError;
use crate::sanitize::redact_path;

/// Page count of a PDF. `pdfinfo` answers for files lopdf cannot parse,
/// such as those with a broken cross-reference table.
pub fn page_count(path: &Path) -> Result<u32, ProcessError> {
    match lopdf::Document::load(path) {
        Ok(doc) => Ok(u32::try_from(doc.get_pages().len()).unwrap_or(u32::MAX)),
        Err(e) => {
            log::debug!(
                "lopdf failed to parse {}: {}. Asking pdfinfo.",
                redact_path(path),
                e
            );
            pdfinfo_page_count(path)
        }
    }
}

fn pdfinfo_page_count(path: &Path) -> Result<u32, ProcessError> {
    let output = Command::new("pdfinfo")
        .arg(path)
        .output()
        .map_err(|e| ProcessError::PdfProcessing(format!("Failed to run pdfinfo: {}", e)))?;

    if !output.status.success() {
        return Err(ProcessError::PdfProcessing(format!(
            "pdfinfo failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_page_count(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
        ProcessError::PdfProcessing("Could not find page count in pdfinfo output".to_string())
    })
}

fn parse_page_count(info: &str) -> Option<u32> {
    info.lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|rest| rest.trim().parse().ok())
}

/// Renders one page (1-based) to PNG bytes at `dpi`.
pub fn render_page(path: &Path, page: u32, dpi: u32) -> Result<Vec<u8>, ProcessError> {
    let prefix = std::env::temp_dir().join(format!("docsweep_page_{}", uuid::Uuid::new_v4()));
    let png_path = PathBuf::from(format!("{}.png", prefix.display()));

    let output = Command::new("pdftoppm")
        .arg("-png")
        .arg("-singlefile")
        .arg("-r")
        .arg(dpi.to_string())
        .arg("-f")
        .arg(page.to_string())
        .arg("-l")
        .arg(page.to_string())
        .arg(path)
        .arg(&prefix)
        .output()
        .map_err(|e| ProcessError::PdfProcessing(format!("Failed to run pdftoppm: {}", e)))?;

    if !output.status.success() {
        let _ = std::fs::remove_file(&png_path);
        return Err(ProcessError::PdfProcessing(format!(
            "pdftoppm failed on page {}: {}",
            page,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let bytes = std::fs::read(&png_path).map_err(|e| {
        ProcessError::PdfProcessing(format!("Failed to read rendered page {}: {}", page, e))
    });
    let _ = std::fs::remove_file(&png_path);
    bytes
}

/// One unit per page, limited to the first `max_pages` when set.
pub fn render_pages(
    path: &Path,
    dpi: u32,
    max_pages: Option<u32>,
) -> Result<Vec<UnitSource>, ProcessError> {
    let pages = page_count(path)?;
    let pages = max_pages.map_or(pages, |limit| pages.min(limit));
    Ok((1..=pages)
        .map(|page| UnitSource::PdfPage {
            path: path.to_path_buf(),
            page,
            dpi,
        })
        .collect())
}
