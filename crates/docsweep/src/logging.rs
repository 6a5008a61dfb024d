//! Process-wide logging setup.
//!
//! Library code logs through the `log` facade and `tracing` spans; both end
//! up in one `tracing-subscriber` registry writing to stderr. Stdout stays
//! free for command output and the worker protocol.

use std::io;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Global subscriber already set: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("Failed to bridge log records: {0}")]
    Bridge(#[from] tracing_log::log_tracer::SetLoggerError),
}

/// Default filter directive when `RUST_LOG` is not set.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "docsweep=debug,info"
    } else {
        "info"
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_logging(verbose: bool, json: bool) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(verbose);

    if json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.json());
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }

    tracing_log::LogTracer::init()?;
    Ok(())
}
