//! Tracing subscriber setup for applications embedding the session.

use crate::errors::SignalingError;
use common::config::ObservabilityConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `config.log_level` is used as the
/// filter directive. JSON output is selected by `config.json_logs`.
///
/// # Errors
///
/// Returns `SignalingError::Config` if the filter directive is invalid or a
/// global subscriber is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), SignalingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .map_err(|e| SignalingError::Config(format!("invalid log filter: {e}")))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| SignalingError::Config(format!("failed to install subscriber: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_reports_error_instead_of_panicking() {
        let config = ObservabilityConfig::default();

        // Another test in this binary may have installed a subscriber first,
        // so only the second call's result is deterministic.
        let _ = init_logging(&config);
        let second = init_logging(&config);

        assert!(matches!(second, Err(SignalingError::Config(_))));
    }
}
