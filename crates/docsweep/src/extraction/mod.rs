//! Text extraction from documents.

mod tika;

use std::path::Path;

use serde_json::{Map, Value};

use crate::error::ProcessError;

pub use tika::TikaExtractor;

/// Below this many non-whitespace characters a PDF is treated as scanned.
pub const MIN_PDF_TEXT_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    Tika,
    Ocr,
    /// Tika first, recognition when the text layer is missing.
    TikaOrOcr,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Tika => "tika",
            ExtractionMethod::Ocr => "ocr",
            ExtractionMethod::TikaOrOcr => "tika_with_ocr_fallback",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Extracted {
    pub text: String,
    pub metadata: Map<String, Value>,
}

pub trait Extractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Extracted, ProcessError>;
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tiff", "tif", "bmp", "gif", "webp"];

const TIKA_EXTENSIONS: &[&str] = &[
    "txt", "docx", "doc", "rtf", "xlsx", "xls", "csv", "tsv", "pptx", "ppt", "json", "xml",
    "html", "htm", "eml", "msg", "md", "markdown", "odt", "ods",
];

/// Lowercase extension without the dot.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// How text is obtained for a file, or `None` for unsupported formats.
pub fn method_for(path: &Path) -> Option<ExtractionMethod> {
    let ext = extension_of(path)?;
    if ext == "pdf" {
        Some(ExtractionMethod::TikaOrOcr)
    } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(ExtractionMethod::Ocr)
    } else if TIKA_EXTENSIONS.contains(&ext.as_str()) {
        Some(ExtractionMethod::Tika)
    } else {
        None
    }
}

pub fn is_image(path: &Path) -> bool {
    extension_of(path).is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
}

/// Whether a PDF's extracted text is too thin to be its real content.
pub fn needs_ocr(text: &str) -> bool {
    text.chars().filter(|c| !c.is_whitespace()).count() < MIN_PDF_TEXT_CHARS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_for_extensions() {
        assert_eq!(method_for(Path::new("a/report.PDF")), Some(ExtractionMethod::TikaOrOcr));
        assert_eq!(method_for(Path::new("scan.jpeg")), Some(ExtractionMethod::Ocr));
        assert_eq!(method_for(Path::new("scan.tif")), Some(ExtractionMethod::Ocr));
        assert_eq!(method_for(Path::new("notes.docx")), Some(ExtractionMethod::Tika));
        assert_eq!(method_for(Path::new("data.csv")), Some(ExtractionMethod::Tika));
        assert_eq!(method_for(Path::new("archive.zip")), None);
        assert_eq!(method_for(Path::new("README")), None);
    }

    #[test]
    fn test_needs_ocr_threshold() {
        assert!(needs_ocr(""));
        assert!(needs_ocr(&"a ".repeat(49)));
        assert!(!needs_ocr(&"a".repeat(50)));
    }

    #[test]
    fn test_is_image() {
        assert!(is_image(Path::new("x.PNG")));
        assert!(!is_image(Path::new("x.pdf")));
    }
}
