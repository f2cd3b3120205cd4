//! Tracing bootstrap.

use std::env;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::settings::LoggingSettings;

const DEFAULT_FILTER: &str = "info,courier_core=info,courier=debug";

/// Install the global subscriber: stdout always, plus a daily rolling file
/// when `logging.directory` is set. Keep the returned guard alive for the
/// lifetime of the process so buffered file output gets flushed.
///
/// Filter precedence:
/// 1) `RUST_LOG`
/// 2) `COURIER_LOG`
/// 3) `logging.filter`
/// 4) internal default filter
pub fn init(settings: &LoggingSettings) -> Option<WorkerGuard> {
    let filter = filter_from(settings);

    let (file_layer, guard) = match &settings.directory {
        Some(dir) => match std::fs::create_dir_all(dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(dir, "courier.log");
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true);
                (Some(layer), Some(guard))
            }
            Err(e) => {
                eprintln!(
                    "warning: cannot create log directory {} ({e}), file logging disabled",
                    dir.display()
                );
                (None, None)
            }
        },
        None => (None, None),
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();
    guard
}

fn filter_from(settings: &LoggingSettings) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    if let Some(value) = env::var("COURIER_LOG")
        .ok()
        .filter(|v| !v.trim().is_empty())
        && let Ok(filter) = EnvFilter::try_new(value)
    {
        return filter;
    }

    if let Some(value) = settings.filter.as_deref().filter(|v| !v.trim().is_empty())
        && let Ok(filter) = EnvFilter::try_new(value)
    {
        return filter;
    }

    EnvFilter::new(DEFAULT_FILTER)
}
