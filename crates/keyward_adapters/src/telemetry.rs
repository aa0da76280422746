use std::path::PathBuf;

use keyward_core::Error;
use tracing::subscriber::set_global_default;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use crate::configuration::project_dirs;

pub fn log_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.data_local_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// Human-readable output on stderr plus daily JSON files under `log_dir`.
/// `RUST_LOG` wins over `env_filter` when set.
pub fn init_subscriber(name: &str, env_filter: &str, log_dir: PathBuf) -> Result<WorkerGuard, Error> {
    LogTracer::init().map_err(|e| Error::Other(format!("failed to bridge log records: {}", e)))?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));

    let formatting_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let file_appender = tracing_appender::rolling::daily(log_dir, format!("{}.log", name));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(non_blocking);

    let subscriber = Registry::default()
        .with(env_filter)
        .with(formatting_layer)
        .with(file_layer);

    set_global_default(subscriber)
        .map_err(|e| Error::Other(format!("failed to set tracing subscriber: {}", e)))?;

    Ok(guard)
}
