// ── Tracing setup ──

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::{ConfigError, LogConfig};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber. `RUST_LOG` overrides `config.level`.
///
/// With `config.file` set, the returned guard must be held for the life of
/// the process; dropping it stops the background writer.
pub fn init_tracing(config: &LogConfig) -> Result<Option<WorkerGuard>, ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    let (layer, guard) = match &config.file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            let name = path.file_name().ok_or_else(|| {
                ConfigError::Logging(format!("log file has no name: {}", path.display()))
            })?;
            if let Some(dir) = dir {
                std::fs::create_dir_all(dir)?;
            }
            let appender = tracing_appender::rolling::never(dir.unwrap_or(Path::new(".")), name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let base = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true);
            let layer: BoxedLayer = if config.json {
                Box::new(base.json())
            } else {
                Box::new(base)
            };
            (layer, Some(guard))
        }
        None => {
            let base = fmt::layer().with_writer(std::io::stderr).with_target(true);
            let layer: BoxedLayer = if config.json {
                Box::new(base.json())
            } else {
                Box::new(base)
            };
            (layer, None)
        }
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    Ok(guard)
}
