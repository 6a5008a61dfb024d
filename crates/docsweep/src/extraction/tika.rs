use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::ACCEPT;
use serde_json::{Map, Value};

use super::{Extracted, Extractor};
use crate::balancer::{EndpointFailure, LoadBalancer};
use crate::error::ProcessError;
use crate::sanitize::redact_url;

/// Apache Tika server client. Requests go through the shared balancer
/// with one failover attempt.
pub struct TikaExtractor {
    balancer: Arc<LoadBalancer>,
    client: reqwest::blocking::Client,
}

impl TikaExtractor {
    pub fn new(balancer: Arc<LoadBalancer>, timeout: Duration) -> Result<Self, ProcessError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProcessError::HttpClient(e.to_string()))?;
        Ok(Self { balancer, client })
    }

    fn put(
        &self,
        endpoint: &str,
        resource: &str,
        accept: &str,
        body: &[u8],
    ) -> Result<reqwest::blocking::Response, EndpointFailure> {
        let url = format!("{}/{}", endpoint, resource);
        let response = self
            .client
            .put(&url)
            .header(ACCEPT, accept)
            .body(body.to_vec())
            .send()
            .map_err(|e| EndpointFailure::Unavailable(e.without_url().to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = format!("{} returned {}", redact_url(&url), status.as_u16());
        // 415/422 and friends: the document, not the server, is the problem.
        if status.is_client_error() {
            Err(EndpointFailure::Rejected(detail))
        } else {
            Err(EndpointFailure::Unavailable(detail))
        }
    }

    fn extract_from(&self, endpoint: &str, body: &[u8]) -> Result<Extracted, EndpointFailure> {
        let text = self
            .put(endpoint, "tika", "text/plain", body)?
            .text()
            .map_err(|e| EndpointFailure::Unavailable(e.to_string()))?;

        let metadata = match self.put(endpoint, "meta", "application/json", body) {
            Ok(response) => response
                .json::<Map<String, Value>>()
                .unwrap_or_else(|e| {
                    log::debug!("Ignoring unreadable metadata from {}: {}", endpoint, e);
                    Map::new()
                }),
            Err(EndpointFailure::Rejected(detail)) => {
                log::debug!("No metadata: {}", detail);
                Map::new()
            }
            Err(e) => return Err(e),
        };

        Ok(Extracted {
            text: text.trim().to_string(),
            metadata,
        })
    }
}

impl Extractor for TikaExtractor {
    fn extract(&self, path: &Path) -> Result<Extracted, ProcessError> {
        let body = std::fs::read(path).map_err(|e| ProcessError::ReadDocument {
            path: path.to_path_buf(),
            source: e,
        })?;
        let extracted = self
            .balancer
            .with_failover(|endpoint| self.extract_from(endpoint, &body))?;
        log::debug!(
            "Extracted {} characters from {}",
            extracted.text.len(),
            crate::sanitize::redact_path(path)
        );
        Ok(extracted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::HealthProbe;

    struct NeverHealthy;

    impl HealthProbe for NeverHealthy {
        fn check(&self, _endpoint: &str) -> bool {
            false
        }
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        let balancer = Arc::new(LoadBalancer::new(
            vec!["http://127.0.0.1:9".to_string()],
            Duration::from_secs(30),
            Arc::new(NeverHealthy),
        ));
        let extractor = TikaExtractor::new(balancer, Duration::from_secs(1)).unwrap();
        let result = extractor.extract(Path::new("/nonexistent/file.docx"));
        assert!(matches!(result, Err(ProcessError::ReadDocument { .. })));
    }

    #[test]
    fn test_unreachable_backends_fail_over_then_surface() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello").unwrap();

        let balancer = Arc::new(LoadBalancer::new(
            vec!["http://127.0.0.1:9".to_string(), "http://127.0.0.1:7".to_string()],
            Duration::from_secs(30),
            Arc::new(NeverHealthy),
        ));
        let extractor = TikaExtractor::new(Arc::clone(&balancer), Duration::from_secs(1)).unwrap();

        let result = extractor.extract(&path);
        assert!(matches!(result, Err(ProcessError::Backend(_))));
        assert_eq!(balancer.stats().healthy_endpoints, 0);
    }
}
