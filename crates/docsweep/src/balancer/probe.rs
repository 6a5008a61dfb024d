use std::time::Duration;

use crate::sanitize::redact_url;

/// Reachability check for one backend endpoint.
pub trait HealthProbe: Send + Sync {
    fn check(&self, endpoint: &str) -> bool;
}

/// `GET {endpoint}/tika`, healthy iff the server answers 200.
pub struct HttpHealthProbe {
    client: reqwest::blocking::Client,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl HealthProbe for HttpHealthProbe {
    fn check(&self, endpoint: &str) -> bool {
        let url = format!("{}/tika", endpoint.trim_end_matches('/'));
        match self.client.get(&url).send() {
            Ok(response) if response.status() == reqwest::StatusCode::OK => true,
            Ok(response) => {
                log::warn!(
                    "Endpoint {} is unhealthy: status code {}",
                    redact_url(endpoint),
                    response.status()
                );
                false
            }
            Err(e) => {
                log::warn!(
                    "Endpoint {} is unhealthy: {}",
                    redact_url(endpoint),
                    e.without_url()
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_endpoint_is_unhealthy() {
        let probe = HttpHealthProbe::new(Duration::from_millis(500)).unwrap();
        // Port 9 (discard) is closed on test hosts.
        assert!(!probe.check("http://127.0.0.1:9"));
    }
}
