//! Recognition (OCR) of images and rendered PDF pages.
//!
//! The engine itself is not reentrant; [`BoundedRecognizer`] prepares
//! units in parallel and feeds them to the engine one at a time.

mod executor;
pub mod pdf;
mod tesseract;
pub mod threads;

use std::io::Cursor;
use std::path::PathBuf;

pub use executor::{BoundedRecognizer, RecognitionOutput, UnitOutcome};
#[cfg(feature = "leptess")]
pub use tesseract::LeptessEngine;
pub use tesseract::TesseractCli;

use crate::config::RecognitionConfig;
use crate::error::ProcessError;

/// A prepared unit: grayscale PNG bytes plus its position in the item.
#[derive(Debug, Clone)]
pub struct RecognitionUnit {
    pub index: usize,
    pub png: Vec<u8>,
}

/// An OCR engine. `&mut self` because engine handles must not be shared
/// between concurrent calls.
pub trait RecognitionEngine: Send {
    fn recognize(&mut self, unit: &RecognitionUnit) -> Result<String, ProcessError>;
}

/// Where a unit's raw image comes from. Loading happens on the
/// preparation threads.
#[derive(Debug, Clone)]
pub enum UnitSource {
    Image(Vec<u8>),
    ImageFile(PathBuf),
    PdfPage { path: PathBuf, page: u32, dpi: u32 },
}

impl UnitSource {
    pub fn load(&self) -> Result<Vec<u8>, ProcessError> {
        match self {
            UnitSource::Image(bytes) => Ok(bytes.clone()),
            UnitSource::ImageFile(path) => {
                std::fs::read(path).map_err(|e| ProcessError::ReadDocument {
                    path: path.clone(),
                    source: e,
                })
            }
            UnitSource::PdfPage { path, page, dpi } => pdf::render_page(path, *page, *dpi),
        }
    }
}

/// Decodes any supported image and re-encodes it as grayscale PNG.
pub fn normalize_image(bytes: &[u8]) -> Result<Vec<u8>, ProcessError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| ProcessError::RecognitionFailed(format!("Failed to load image: {}", e)))?;

    let mut png = Vec::new();
    img.grayscale()
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| ProcessError::RecognitionFailed(format!("Failed to convert image: {}", e)))?;
    Ok(png)
}

/// The engine compiled into this build: leptess when the feature is on,
/// the tesseract binary otherwise.
pub fn default_engine(config: &RecognitionConfig) -> Box<dyn RecognitionEngine> {
    #[cfg(feature = "leptess")]
    {
        Box::new(LeptessEngine::new(config))
    }
    #[cfg(not(feature = "leptess"))]
    {
        Box::new(TesseractCli::new(config))
    }
}
