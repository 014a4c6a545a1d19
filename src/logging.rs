//! Logging setup for the controller
//!
//! Logs go to a daily rotating file and, in compact form, to stderr (the
//! serial console on a device build).

use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_FILE_PREFIX: &str = "spotify-controller";

/// Initialize the logging system.
///
/// Logs are written to `<dir>/spotify-controller.YYYY-MM-DD.log` with daily
/// rotation. The level can be controlled via the `RUST_LOG` environment
/// variable.
///
/// Default log levels:
/// - `spotify_controller` modules: DEBUG
/// - `reqwest`: INFO
/// - Other crates: WARN
pub fn init_logging(dir: &Path) -> anyhow::Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The guard flushes on drop; the process lives until power-off
    Box::leak(Box::new(guard));

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("spotify_controller=debug,reqwest=info,warn"));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);

    let console_layer = fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    tracing::info!("Logging initialized - logs written to {}/", dir.display());

    Ok(())
}

/// Shorten a secret for log output.
pub fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(8).collect();
    if prefix.len() < secret.len() {
        format!("{}...", prefix)
    } else {
        prefix
    }
}

/// Log a Web API request and its result
#[macro_export]
macro_rules! log_api_result {
    ($operation:expr, $result:expr) => {
        match &$result {
            Ok(_) => tracing::debug!(operation = $operation, "API request successful"),
            Err(e) => tracing::warn!(operation = $operation, error = %e, "API request failed"),
        }
    };
}

/// Log a Web API request with additional context
#[macro_export]
macro_rules! log_api_request {
    ($operation:expr) => {
        tracing::debug!(operation = $operation, "API request started");
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::debug!(operation = $operation, $($field)*, "API request started");
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_keeps_only_a_prefix() {
        assert_eq!(redact("BQDx1234567890"), "BQDx1234...");
        assert_eq!(redact("short"), "short");
        assert_eq!(redact(""), "");
    }
}
