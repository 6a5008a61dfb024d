//! Sensitive-entity detection over extracted text.

mod presidio;

use serde::{Deserialize, Serialize};

use crate::config::ProcessingSettings;
use crate::error::ProcessError;

pub use presidio::PresidioDetector;

/// One detected span. Offsets are character positions in the analyzed text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedEntity {
    pub entity_type: String,
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub score: f64,
}

pub trait Detector: Send + Sync {
    fn detect(
        &self,
        text: &str,
        settings: &ProcessingSettings,
    ) -> Result<Vec<DetectedEntity>, ProcessError>;
}

/// Drops entities below the threshold or outside the requested types.
pub fn filter_entities(
    entities: Vec<DetectedEntity>,
    settings: &ProcessingSettings,
) -> Vec<DetectedEntity> {
    entities
        .into_iter()
        .filter(|e| e.score >= settings.threshold)
        .filter(|e| match &settings.entities {
            Some(wanted) => wanted.iter().any(|w| w == &e.entity_type),
            None => true,
        })
        .collect()
}

/// The characters `start..end` of `text`, clamped to its length.
pub(crate) fn span_text(text: &str, start: usize, end: usize) -> String {
    if end <= start {
        return String::new();
    }
    text.chars().skip(start).take(end - start).collect()
}
