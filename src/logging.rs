//! # Structured Logging Module
//!
//! Environment-aware console logging using the tracing ecosystem. Logs go to
//! stdout; `LOG_FORMAT=json` switches to one JSON object per line for log
//! shippers.
//!
//! Library components never install a subscriber themselves. The process's
//! composition root calls [`init_structured_logging`] once; repeated calls and
//! an already-installed global subscriber are tolerated.

use chrono::Utc;
use std::fmt::Display;
use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json = use_json_format();
        let use_ansi = !json && IsTerminal::is_terminal(&std::io::stdout());

        let console_layer = if json {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(use_ansi)
                .with_filter(filter)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(console_layer);

        // Use try_init to avoid panic if global subscriber already set
        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        } else {
            tracing::info!(
                environment = %environment,
                json_format = json,
                ansi_colors = use_ansi,
                "Structured logging initialized"
            );
        }
    });
}

/// Get current environment from environment variables
pub(crate) fn get_environment() -> String {
    std::env::var("RESILIENCE_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

fn use_json_format() -> bool {
    std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Log a store failure on a fail-open or fail-closed path
///
/// Every such path logs at error level with the operation and key so an outage
/// that is being absorbed silently still shows up in the logs.
pub fn log_store_failure(component: &str, operation: &str, key: &str, error: &dyn Display) {
    tracing::error!(
        component = component,
        operation = operation,
        key = key,
        error = %error,
        timestamp = %Utc::now().to_rfc3339(),
        "Store operation failed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_by_environment() {
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("staging"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
        log_store_failure("cache", "GET", "app:key", &"connection refused");
    }
}
