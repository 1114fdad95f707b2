// In: src/observability.rs

//! Logging hooks for the redim pipeline.
//!
//! Stages report progress through the `log` facade. Counters that are useful when
//! tuning the memory budget (tuples read, chunks written, runs spilled) go through
//! `log_metric!`, which emits a single structured line per event under the
//! `redim::metrics` target so they can be filtered independently.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Once;

use log::LevelFilter;

use crate::error::RedimError;

/// Target used by `log_metric!`.
pub const METRICS_TARGET: &str = "redim::metrics";

/// Logs a structured key-value metric line at debug level.
///
/// # Example
/// ```
/// use redim_core::log_metric;
/// let tuples = 42;
/// log_metric!("event"="reader_done", "tuples"=&tuples);
/// ```
#[macro_export]
macro_rules! log_metric {
    ($($key:literal = $value:expr),+ $(,)?) => {
        if $crate::log::log_enabled!(target: $crate::observability::METRICS_TARGET, $crate::log::Level::Debug) {
            let mut parts = Vec::new();
            $(
                parts.push(format!("\"{}\": \"{}\"", $key, $value));
            )+
            $crate::log::debug!(
                target: $crate::observability::METRICS_TARGET,
                "REDIM_METRIC: {{ {} }}",
                parts.join(", ")
            );
        }
    };
}

static INIT_LOGGER: Once = Once::new();

/// Installs an env_logger backend at info level (debug for metrics), optionally
/// appending to `log_file`. Only the first call has any effect.
pub fn enable_verbose_logging(log_file: Option<PathBuf>) -> Result<(), RedimError> {
    let pipe = match log_file {
        Some(path) => Some(OpenOptions::new().append(true).create(true).open(path)?),
        None => None,
    };

    INIT_LOGGER.call_once(move || {
        let mut builder = env_logger::Builder::new();
        builder.is_test(false);
        builder.filter_level(LevelFilter::Info);
        builder.filter_module(METRICS_TARGET, LevelFilter::Debug);

        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(buf, "[{}] {}", record.level(), record.args())?;
            buf.flush()?;
            Ok(())
        });

        if let Some(file) = pipe {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }

        let _ = builder.try_init();
    });
    Ok(())
}
