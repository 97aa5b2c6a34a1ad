//! Structured Logging Configuration
//!
//! JSON output for production (LOG_FORMAT=json), human-readable text for
//! development. Correlation ids and proxy ids travel as structured fields,
//! e.g. `tracing::info!(correlation_id = %id, "Completed pending request")`.
//!
//! # Environment Variables
//!
//! - `LOG_FORMAT`: "json" for JSON output, anything else for text
//! - `RUST_LOG`: level filter (default: info), e.g.
//!   `RUST_LOG=cr_proxy=trace,lapin=info`

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Initialize logging for the given service.
///
/// The service name is currently informational only; filtering is driven
/// entirely by RUST_LOG.
pub fn init_logging(_service_name: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_ansi(true))
            .init();
    }
}

/// Initialize logging with defaults (uses "certrelay" as service name).
pub fn init_default_logging() {
    init_logging("certrelay");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_parsing() {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info"));
        drop(filter);
    }
}
