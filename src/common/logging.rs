//! Logging and tracing configuration
//!
//! The CLI logs compactly to stderr. A debug session additionally writes a
//! detailed log file, including the raw MI traffic at trace level.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use super::paths;

/// File name of the session log inside the log directory
const SESSION_LOG: &str = "session.log";

/// Initialize tracing for one-shot commands (stderr logging)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate, WARN for dependencies.
pub fn init_cli() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gdbmi=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Initialize tracing for a debug session (file + stderr logging)
///
/// The file at `<data dir>/gdbmi/logs/session.log` receives everything down
/// to trace level unless `RUST_LOG` says otherwise; stderr only shows
/// warnings. The returned guard flushes the file writer when dropped.
pub fn init_session() -> (Option<PathBuf>, Option<WorkerGuard>) {
    let Some(log_dir) = paths::log_dir().filter(|dir| std::fs::create_dir_all(dir).is_ok()) else {
        tracing_subscriber::registry().with(stderr_warnings()).init();
        return (None, None);
    };

    let file_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gdbmi=trace,info"));
    let appender = tracing_appender::rolling::never(&log_dir, SESSION_LOG);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(file_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_warnings())
        .init();

    (Some(log_dir.join(SESSION_LOG)), Some(guard))
}

/// Compact stderr layer showing warnings and errors only
fn stderr_warnings<S>() -> impl Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(EnvFilter::new("gdbmi=warn,error"))
}
