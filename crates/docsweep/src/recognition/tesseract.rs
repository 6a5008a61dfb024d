use std::path::PathBuf;
use std::process::Command;

use super::{RecognitionEngine, RecognitionUnit};
use crate::config::RecognitionConfig;
use crate::error::ProcessError;

fn language_arg(languages: &[String]) -> String {
    if languages.is_empty() {
        "eng".to_string()
    } else {
        languages.join("+")
    }
}

/// Runs the `tesseract` binary once per unit.
pub struct TesseractCli {
    program: PathBuf,
    languages: String,
}

impl TesseractCli {
    pub fn new(config: &RecognitionConfig) -> Self {
        Self {
            program: config.tesseract_program.clone(),
            languages: language_arg(&config.languages),
        }
    }
}

impl RecognitionEngine for TesseractCli {
    fn recognize(&mut self, unit: &RecognitionUnit) -> Result<String, ProcessError> {
        let input = std::env::temp_dir().join(format!("docsweep_ocr_{}.png", uuid::Uuid::new_v4()));
        std::fs::write(&input, &unit.png).map_err(|e| {
            ProcessError::RecognitionFailed(format!("Failed to write temp image: {}", e))
        })?;

        let output = Command::new(&self.program)
            .arg(&input)
            .arg("stdout")
            .arg("-l")
            .arg(&self.languages)
            .output();
        let _ = std::fs::remove_file(&input);

        let output = output.map_err(|e| {
            ProcessError::RecognitionFailed(format!(
                "Failed to run {}: {}",
                self.program.display(),
                e
            ))
        })?;
        if !output.status.success() {
            return Err(ProcessError::RecognitionFailed(format!(
                "tesseract failed on unit {}: {}",
                unit.index,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// In-process Tesseract through leptess.
#[cfg(feature = "leptess")]
pub struct LeptessEngine {
    languages: String,
}

#[cfg(feature = "leptess")]
impl LeptessEngine {
    pub fn new(config: &RecognitionConfig) -> Self {
        Self {
            languages: language_arg(&config.languages),
        }
    }
}

#[cfg(feature = "leptess")]
impl RecognitionEngine for LeptessEngine {
    fn recognize(&mut self, unit: &RecognitionUnit) -> Result<String, ProcessError> {
        let mut lt = leptess::LepTess::new(None, &self.languages).map_err(|e| {
            ProcessError::RecognitionFailed(format!("Failed to initialize Tesseract: {}", e))
        })?;

        lt.set_image_from_mem(&unit.png).map_err(|e| {
            ProcessError::RecognitionFailed(format!("Failed to set image: {}", e))
        })?;

        lt.get_utf8_text()
            .map_err(|e| ProcessError::RecognitionFailed(format!("OCR failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_arg() {
        assert_eq!(language_arg(&[]), "eng");
        assert_eq!(
            language_arg(&["eng".to_string(), "deu".to_string()]),
            "eng+deu"
        );
    }

    #[test]
    fn test_missing_program_is_a_unit_failure() {
        let mut engine = TesseractCli::new(&RecognitionConfig {
            tesseract_program: PathBuf::from("/nonexistent/tesseract"),
            ..Default::default()
        });
        let unit = RecognitionUnit {
            index: 0,
            png: vec![0u8; 4],
        };
        assert!(matches!(
            engine.recognize(&unit),
            Err(ProcessError::RecognitionFailed(_))
        ));
    }
}
