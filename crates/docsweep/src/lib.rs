pub mod balancer;
pub mod config;
pub mod db;
pub mod detection;
pub mod error;
pub mod extraction;
pub mod logging;
pub mod orchestrator;
pub mod processor;
pub mod recognition;
pub mod resources;
pub mod sanitize;
pub mod worker;

pub use balancer::{BalancerError, HealthProbe, HttpHealthProbe, LoadBalancer};
pub use config::{load_config, ProcessingSettings, RunConfig, ServiceConfig};
pub use db::{Database, DatabaseError};
pub use detection::{DetectedEntity, Detector};
pub use error::{ConfigError, DocsweepError, ProcessError, Result, WorkerError};
pub use orchestrator::{CancellationToken, Orchestrator, RunSummary};
pub use processor::{Analysis, AnalysisProcessor, FileProcessor};
pub use recognition::{BoundedRecognizer, RecognitionEngine};
pub use resources::HostResources;
pub use worker::{FileTask, TaskOutcome, WorkerMode, WorkerPool};
