//! Logging initialization
//!
//! Installs a JSON `tracing` subscriber filtered by `RUST_LOG`, falling back
//! to `info,carver=debug`.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or invalid
pub const DEFAULT_FILTER: &str = "info,carver=debug";

/// Errors that can occur during telemetry initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The log filter directive could not be parsed
    #[error("invalid log filter: {0}")]
    InvalidFilter(String),

    /// Failed to install the tracing subscriber
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Configuration for telemetry initialization
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Name attached to the startup log line (e.g., "carver-synth")
    pub service_name: String,

    /// Explicit filter directive; `RUST_LOG` and then [`DEFAULT_FILTER`] apply when `None`
    pub filter: Option<String>,

    /// Include file and line number in every event
    pub with_source_location: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "carver".to_string(),
            filter: None,
            with_source_location: false,
        }
    }
}

/// Initialize the global tracing subscriber
///
/// # Example
///
/// ```ignore
/// use carver_common::telemetry::{init_telemetry, TelemetryConfig};
///
/// init_telemetry(TelemetryConfig::default())?;
/// ```
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = build_filter(config.filter.as_deref())?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true)
        .with_file(config.with_source_location)
        .with_line_number(config.with_source_location);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::SubscriberInit(e.to_string())
        })?;

    tracing::debug!(service = %config.service_name, "telemetry initialized");
    Ok(())
}

fn build_filter(explicit: Option<&str>) -> Result<EnvFilter, TelemetryError> {
    match explicit {
        Some(directive) => EnvFilter::try_new(directive)
            .map_err(|e| TelemetryError::InvalidFilter(e.to_string())),
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "carver");
        assert!(config.filter.is_none());
    }

    #[test]
    fn test_explicit_filter_parses() {
        assert!(build_filter(Some("warn,carver_service=trace")).is_ok());
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let err = build_filter(Some("carver=notalevel")).unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidFilter(_)));
    }

    #[test]
    fn test_second_init_fails() {
        let config = TelemetryConfig {
            filter: Some("off".to_string()),
            ..Default::default()
        };
        // Another test binary may have installed a subscriber first; either
        // way, the second call here must fail.
        let _ = init_telemetry(config.clone());
        assert!(matches!(
            init_telemetry(config),
            Err(TelemetryError::SubscriberInit(_))
        ));
    }
}
