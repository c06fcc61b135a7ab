use color_eyre::eyre::Result;
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Log filename written under [`LogConfig::log_dir`].
pub const LOG_FILENAME: &str = "softdelete.log";

/// Configuration for the logging system.
pub struct LogConfig {
    /// Directory where log files will be written.
    pub log_dir: PathBuf,
    /// Default log level when `RUST_LOG` is not set.
    pub log_level: Level,
    /// Whether to use JSON format for logs.
    pub json_format: bool,
    /// Log rotation period.
    pub rotation: Rotation,
}

impl Default for LogConfig {
    fn default() -> Self {
        let log_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".softdelete")
            .join("logs");

        Self {
            log_dir,
            log_level: Level::INFO,
            json_format: false,
            rotation: Rotation::DAILY,
        }
    }
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("softdelete={level}")))
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize logging to a rotating file and to stderr.
///
/// Stdout is left to command output. The level defaults to
/// `config.log_level` and can be overridden through `RUST_LOG`. Keep the
/// returned guard alive for as long as file logs should be flushed.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or a global
/// subscriber is already installed.
pub fn init_logging(config: LogConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.log_dir)?;

    let file_appender = RollingFileAppender::new(config.rotation, &config.log_dir, LOG_FILENAME);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let layers: Vec<BoxedLayer> = if config.json_format {
        vec![
            fmt::layer()
                .json()
                .with_writer(file_writer)
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_target(true)
                .with_filter(env_filter(config.log_level))
                .boxed(),
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_target(true)
                .with_filter(env_filter(config.log_level))
                .boxed(),
        ]
    } else {
        vec![
            fmt::layer()
                .with_writer(file_writer)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_ansi(false)
                .with_filter(env_filter(config.log_level))
                .boxed(),
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(env_filter(config.log_level))
                .boxed(),
        ]
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(ErrorLayer::default())
        .try_init()?;

    Ok(guard)
}

/// Parse rotation period from string.
#[must_use]
pub fn parse_rotation(s: &str) -> Rotation {
    match s.to_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

#[cfg(test)]
#[path = "logging_tests.rs"]
mod tests;
