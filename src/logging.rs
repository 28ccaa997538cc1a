//! Logging configuration and initialization.
//!
//! The subscriber is installed once at startup with its filter switched
//! off. The console turns it on (verbose mode) or leaves it off (default and
//! quiet modes) through the returned [`LogHandle`].

use crate::config::{LogFormat, LoggingConfig};
use crate::console::{LogSwitch, OutputMode};
use std::fs::OpenOptions;
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

/// Reload handle for the active log filter.
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
    level: String,
}

impl LogSwitch for LogHandle {
    fn apply(&self, mode: OutputMode) {
        let filter = match mode {
            OutputMode::Verbose => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(verbose_directive(&self.level))),
            OutputMode::Default | OutputMode::Quiet => EnvFilter::new("off"),
        };

        if let Err(e) = self.handle.reload(filter) {
            eprintln!("Failed to apply log filter: {}", e);
        }
    }
}

/// Filter directive used in verbose mode.
pub fn verbose_directive(level: &str) -> String {
    let level = match level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => "debug",
    };

    // hyper is chatty at debug and below
    format!("{},hyper=warn,hyper_util=warn", level)
}

/// Initializes the logging system based on configuration.
///
/// Returns the appender guard, which must be kept alive for the duration of
/// the program so buffered lines are flushed, and the handle the console
/// uses to enable logging.
pub fn init_logging(config: &LoggingConfig) -> io::Result<(WorkerGuard, LogHandle)> {
    let (filter, handle) = reload::Layer::new(EnvFilter::new("off"));

    let (writer, guard) = match config.output.to_lowercase().as_str() {
        "stdout" => tracing_appender::non_blocking(io::stdout()),
        "stderr" => tracing_appender::non_blocking(io::stderr()),
        path => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_appender::non_blocking(file)
        }
    };

    match config.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .with_target(config.include_target)
                .with_writer(writer);

            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .init();
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_target(config.include_target)
                .with_writer(writer);

            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .init();
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_target(config.include_target)
                .with_writer(writer);

            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .init();
        }
    }

    Ok((
        guard,
        LogHandle {
            handle,
            level: config.level.clone(),
        },
    ))
}
