use std::path::Path;

use crate::config::schema::RunConfig;
use crate::error::ConfigError;

pub const ENV_DB_PATH: &str = "DOCSWEEP_DB_PATH";
pub const ENV_TIKA_ENDPOINTS: &str = "TIKA_SERVER_ENDPOINTS";
pub const ENV_WORKERS: &str = "DOCSWEEP_WORKERS";
pub const ENV_BATCH_SIZE: &str = "DOCSWEEP_BATCH_SIZE";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RunConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<RunConfig, ConfigError> {
    let mut config: RunConfig = serde_json::from_str(content)?;
    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Defaults plus environment overrides, for runs without a config file.
pub fn default_config() -> Result<RunConfig, ConfigError> {
    let mut config = RunConfig::default();
    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

pub fn apply_env_overrides(config: &mut RunConfig) -> Result<(), ConfigError> {
    if let Ok(path) = std::env::var(ENV_DB_PATH) {
        if !path.trim().is_empty() {
            config.database_path = Some(path.into());
        }
    }

    if let Ok(raw) = std::env::var(ENV_TIKA_ENDPOINTS) {
        let endpoints: Vec<String> = raw
            .split(',')
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !endpoints.is_empty() {
            log::info!("Using extraction endpoints from {}: {:?}", ENV_TIKA_ENDPOINTS, endpoints);
            config.extraction.endpoints = endpoints;
        }
    }

    if let Some(workers) = env_usize(ENV_WORKERS)? {
        config.workers = Some(workers);
    }
    if let Some(batch_size) = env_usize(ENV_BATCH_SIZE)? {
        config.batch_size = batch_size;
        config.min_batch_size = config.min_batch_size.min(batch_size);
    }

    Ok(())
}

fn env_usize(name: &str) -> Result<Option<usize>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                name: name.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for name in [ENV_DB_PATH, ENV_TIKA_ENDPOINTS, ENV_WORKERS, ENV_BATCH_SIZE] {
            std::env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_load_minimal_config() {
        clear_env();
        let config = load_config_from_str("{}").unwrap();
        assert_eq!(config.batch_size, 10);
        assert!(config.workers.is_none());
    }

    #[test]
    #[serial]
    fn test_load_valid_config() {
        clear_env();
        let json = r#"{
            "workers": 4,
            "batch_size": 20,
            "max_files": 100,
            "worker_mode": "in_process",
            "settings": { "threshold": 0.5, "ocr_dpi": 200 },
            "extraction": { "endpoints": ["http://tika:9998"] }
        }"#;

        let config = load_config_from_str(json).unwrap();
        assert_eq!(config.workers, Some(4));
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.max_files, Some(100));
        assert_eq!(config.settings.threshold, 0.5);
        assert_eq!(config.settings.ocr_dpi, 200);
        assert_eq!(config.extraction.endpoints, vec!["http://tika:9998"]);
        assert_eq!(config.extraction.health_check_interval_secs, 30);
    }

    #[test]
    #[serial]
    fn test_invalid_json() {
        clear_env();
        assert!(matches!(
            load_config_from_str("{ not json"),
            Err(ConfigError::ParseJson(_))
        ));
    }

    #[test]
    #[serial]
    fn test_validation_runs_after_parse() {
        clear_env();
        assert!(matches!(
            load_config_from_str(r#"{"batch_size": 0}"#),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var(ENV_TIKA_ENDPOINTS, "http://a:1/, http://b:2 ,");
        std::env::set_var(ENV_WORKERS, "3");
        std::env::set_var(ENV_BATCH_SIZE, "1");
        std::env::set_var(ENV_DB_PATH, "/tmp/scan.db");

        let config = load_config_from_str("{}").unwrap();
        clear_env();

        assert_eq!(config.extraction.endpoints, vec!["http://a:1", "http://b:2"]);
        assert_eq!(config.workers, Some(3));
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.min_batch_size, 1);
        assert_eq!(config.database_path, Some("/tmp/scan.db".into()));
    }

    #[test]
    #[serial]
    fn test_invalid_env_value() {
        clear_env();
        std::env::set_var(ENV_WORKERS, "many");
        let result = default_config();
        clear_env();
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    #[serial]
    fn test_load_missing_file() {
        clear_env();
        let result = load_config("/nonexistent/docsweep.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docsweep.json");
        std::fs::write(&path, r#"{"resume": true}"#).unwrap();
        assert!(load_config(&path).unwrap().resume);
    }
}
