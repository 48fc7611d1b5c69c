use crate::error::ConfigError;
use crate::settings::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `logging.level`. When `logging.directory`
/// is set, a second, non-ANSI layer writes to a daily rolling file; the
/// returned guard must be kept alive for the lifetime of the process so the
/// background writer flushes on exit.
pub fn init_tracing(logging: &LoggingConfig) -> Result<Option<WorkerGuard>, ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .map_err(|e| ConfigError::Logging(format!("invalid log filter '{}': {}", logging.level, e)))?;

    let console = fmt::layer().with_target(true);

    match &logging.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, &logging.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .try_init()
                .map_err(|e| ConfigError::Logging(e.to_string()))?;

            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .try_init()
                .map_err(|e| ConfigError::Logging(e.to_string()))?;

            Ok(None)
        }
    }
}
