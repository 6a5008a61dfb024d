//! Per-file analysis: extraction or recognition, then detection.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::balancer::{HttpHealthProbe, LoadBalancer};
use crate::config::{ProcessingSettings, ServiceConfig};
use crate::detection::{filter_entities, DetectedEntity, Detector, PresidioDetector};
use crate::error::ProcessError;
use crate::extraction::{
    extension_of, is_image, method_for, needs_ocr, ExtractionMethod, Extractor, TikaExtractor,
};
use crate::recognition::{default_engine, pdf, BoundedRecognizer, UnitSource};
use crate::resources::HostResources;
use crate::sanitize::{hash_path, redact_path};

/// What a successful run over one file produced.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    pub entities: Vec<DetectedEntity>,
    pub metadata: Map<String, Value>,
}

pub trait FileProcessor: Send + Sync {
    fn process(&self, path: &Path, settings: &ProcessingSettings)
        -> Result<Analysis, ProcessError>;
}

pub struct AnalysisProcessor {
    extractor: Arc<dyn Extractor>,
    recognizer: Arc<BoundedRecognizer>,
    detector: Arc<dyn Detector>,
}

struct TextSource {
    text: String,
    method: &'static str,
    metadata: Map<String, Value>,
}

impl AnalysisProcessor {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        recognizer: Arc<BoundedRecognizer>,
        detector: Arc<dyn Detector>,
    ) -> Self {
        Self {
            extractor,
            recognizer,
            detector,
        }
    }

    /// Wires the HTTP backends and the local recognition engine.
    pub fn from_services(config: &ServiceConfig) -> Result<Self, ProcessError> {
        let extraction = &config.extraction;
        let probe = HttpHealthProbe::new(Duration::from_secs(extraction.probe_timeout_secs))
            .map_err(|e| ProcessError::HttpClient(e.to_string()))?;
        let balancer = Arc::new(LoadBalancer::new(
            extraction.endpoints.clone(),
            Duration::from_secs(extraction.health_check_interval_secs),
            Arc::new(probe),
        ));
        let extractor = TikaExtractor::new(
            balancer,
            Duration::from_secs(extraction.request_timeout_secs),
        )?;
        let detector = PresidioDetector::new(&config.detection)?;
        let recognizer = BoundedRecognizer::new(
            default_engine(&config.recognition),
            config.recognition.clone(),
            HostResources::detect(),
        );

        Ok(Self::new(
            Arc::new(extractor),
            Arc::new(recognizer),
            Arc::new(detector),
        ))
    }

    fn recognize(
        &self,
        path: &Path,
        size: u64,
        settings: &ProcessingSettings,
    ) -> Result<TextSource, ProcessError> {
        let sources = if is_image(path) {
            vec![UnitSource::ImageFile(path.to_path_buf())]
        } else {
            pdf::render_pages(path, settings.ocr_dpi, settings.max_pages)?
        };

        let output = self.recognizer.recognize(sources, size, settings.ocr_threads)?;
        let mut metadata = Map::new();
        metadata.insert("pages".to_string(), json!(output.units.len()));
        metadata.insert("failed_units".to_string(), json!(output.failed_units));
        metadata.insert("ocr_threads".to_string(), json!(output.threads));

        Ok(TextSource {
            text: output.text,
            method: ExtractionMethod::Ocr.as_str(),
            metadata,
        })
    }

    fn extract(&self, path: &Path) -> Result<TextSource, ProcessError> {
        let extracted = self.extractor.extract(path)?;
        let mut metadata = Map::new();
        if !extracted.metadata.is_empty() {
            metadata.insert("document".to_string(), Value::Object(extracted.metadata));
        }
        Ok(TextSource {
            text: extracted.text,
            method: ExtractionMethod::Tika.as_str(),
            metadata,
        })
    }

    fn text_for(
        &self,
        path: &Path,
        method: ExtractionMethod,
        size: u64,
        settings: &ProcessingSettings,
    ) -> Result<TextSource, ProcessError> {
        match method {
            ExtractionMethod::Tika => self.extract(path),
            ExtractionMethod::Ocr => self.recognize(path, size, settings),
            ExtractionMethod::TikaOrOcr if settings.force_ocr => {
                self.recognize(path, size, settings)
            }
            ExtractionMethod::TikaOrOcr => {
                let extracted = match self.extract(path) {
                    Ok(source) if !needs_ocr(&source.text) => return Ok(source),
                    Ok(source) => {
                        tracing::debug!("Text layer too thin, falling back to recognition");
                        Some(source)
                    }
                    Err(ProcessError::Backend(e)) => {
                        tracing::warn!("Extraction unavailable ({}), falling back to recognition", e);
                        None
                    }
                    Err(e) => return Err(e),
                };

                let _span = tracing::info_span!("processor.ocr_fallback").entered();
                match (self.recognize(path, size, settings), extracted) {
                    (Ok(mut source), _) => {
                        source.method = method.as_str();
                        Ok(source)
                    }
                    (Err(e), Some(mut thin)) => {
                        tracing::warn!("Recognition failed, keeping extracted text: {}", e);
                        thin.metadata
                            .insert("ocr_error".to_string(), Value::String(e.to_string()));
                        Ok(thin)
                    }
                    (Err(e), None) => Err(e),
                }
            }
        }
    }
}

impl FileProcessor for AnalysisProcessor {
    fn process(
        &self,
        path: &Path,
        settings: &ProcessingSettings,
    ) -> Result<Analysis, ProcessError> {
        let _span = tracing::info_span!(
            "processor.file",
            file = %redact_path(path),
            path_hash = %hash_path(path)
        )
        .entered();

        let method = method_for(path).ok_or_else(|| {
            ProcessError::UnsupportedFormat(extension_of(path).unwrap_or_else(|| redact_path(path)))
        })?;

        let size = std::fs::metadata(path)
            .map_err(|e| ProcessError::ReadDocument {
                path: path.to_path_buf(),
                source: e,
            })?
            .len();
        if let Some(limit) = settings.max_file_size {
            if size > limit {
                return Err(ProcessError::FileTooLarge { size, limit });
            }
        }

        let source = self.text_for(path, method, size, settings)?;
        let entities = filter_entities(self.detector.detect(&source.text, settings)?, settings);

        let mut metadata = source.metadata;
        metadata.insert(
            "extraction_method".to_string(),
            Value::String(source.method.to_string()),
        );
        metadata.insert(
            "text_length".to_string(),
            json!(source.text.chars().count()),
        );

        tracing::debug!(entities = entities.len(), "File analyzed");
        Ok(Analysis { entities, metadata })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::BalancerError;
    use crate::config::RecognitionConfig;
    use crate::extraction::Extracted;
    use crate::recognition::test_support::sample_png;
    use crate::recognition::{RecognitionEngine, RecognitionUnit};
    use crate::resources::GIB;

    struct FakeExtractor {
        text: Option<String>,
    }

    impl Extractor for FakeExtractor {
        fn extract(&self, _path: &Path) -> Result<Extracted, ProcessError> {
            match &self.text {
                Some(text) => Ok(Extracted {
                    text: text.clone(),
                    metadata: Map::new(),
                }),
                None => Err(ProcessError::Backend(BalancerError::NoHealthyEndpoint)),
            }
        }
    }

    /// Reports every capitalized word as a PERSON with a fixed score.
    struct FakeDetector {
        score: f64,
    }

    impl Detector for FakeDetector {
        fn detect(
            &self,
            text: &str,
            _settings: &ProcessingSettings,
        ) -> Result<Vec<DetectedEntity>, ProcessError> {
            Ok(text
                .split_whitespace()
                .filter(|w| w.chars().next().is_some_and(char::is_uppercase))
                .map(|w| DetectedEntity {
                    entity_type: "PERSON".to_string(),
                    text: w.to_string(),
                    start: 0,
                    end: w.chars().count(),
                    score: self.score,
                })
                .collect())
        }
    }

    struct EchoEngine;

    impl RecognitionEngine for EchoEngine {
        fn recognize(&mut self, _unit: &RecognitionUnit) -> Result<String, ProcessError> {
            Ok("Scanned Alice".to_string())
        }
    }

    fn processor(text: Option<&str>, score: f64) -> AnalysisProcessor {
        let recognizer = BoundedRecognizer::new(
            Box::new(EchoEngine),
            RecognitionConfig::default(),
            HostResources::new(4, 16 * GIB, 8 * GIB),
        );
        AnalysisProcessor::new(
            Arc::new(FakeExtractor {
                text: text.map(str::to_string),
            }),
            Arc::new(recognizer),
            Arc::new(FakeDetector { score }),
        )
    }

    #[test]
    fn test_text_document_goes_through_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memo.txt");
        std::fs::write(&path, "ignored").unwrap();

        let analysis = processor(Some("call Bob and Carol"), 0.9)
            .process(&path, &ProcessingSettings::default())
            .unwrap();
        assert_eq!(analysis.entities.len(), 2);
        assert_eq!(analysis.metadata["extraction_method"], "tika");
        assert_eq!(analysis.metadata["text_length"], 18);
    }

    #[test]
    fn test_low_scores_are_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memo.txt");
        std::fs::write(&path, "ignored").unwrap();

        let analysis = processor(Some("Bob"), 0.5)
            .process(&path, &ProcessingSettings::default())
            .unwrap();
        assert!(analysis.entities.is_empty());
    }

    #[test]
    fn test_image_goes_through_recognition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        std::fs::write(&path, sample_png()).unwrap();

        let analysis = processor(None, 0.9)
            .process(&path, &ProcessingSettings::default())
            .unwrap();
        assert_eq!(analysis.metadata["extraction_method"], "ocr");
        assert_eq!(analysis.metadata["pages"], 1);
        assert_eq!(analysis.entities.len(), 2);
    }

    #[test]
    fn test_unsupported_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.zip");
        std::fs::write(&path, "PK").unwrap();

        let result = processor(Some("x"), 0.9).process(&path, &ProcessingSettings::default());
        assert!(matches!(result, Err(ProcessError::UnsupportedFormat(ext)) if ext == "zip"));
    }

    #[test]
    fn test_file_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        std::fs::write(&path, "0123456789").unwrap();

        let settings = ProcessingSettings {
            max_file_size: Some(4),
            ..Default::default()
        };
        let result = processor(Some("x"), 0.9).process(&path, &settings);
        assert!(matches!(
            result,
            Err(ProcessError::FileTooLarge { size: 10, limit: 4 })
        ));
    }

    #[test]
    fn test_backend_failure_on_text_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memo.docx");
        std::fs::write(&path, "x").unwrap();

        let result = processor(None, 0.9).process(&path, &ProcessingSettings::default());
        assert!(matches!(result, Err(ProcessError::Backend(_))));
    }

    #[test]
    fn test_pdf_with_text_layer_skips_recognition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, "%PDF-1.4").unwrap();

        let text = format!("Quarterly report for Dana {}", "lorem ipsum ".repeat(10));
        let analysis = processor(Some(&text), 0.9)
            .process(&path, &ProcessingSettings::default())
            .unwrap();
        assert_eq!(analysis.metadata["extraction_method"], "tika");
        assert!(analysis.metadata.get("pages").is_none());
    }

    #[test]
    fn test_missing_file() {
        let result = processor(Some("x"), 0.9).process(
            Path::new("/nonexistent/memo.txt"),
            &ProcessingSettings::default(),
        );
        assert!(matches!(result, Err(ProcessError::ReadDocument { .. })));
    }
}
