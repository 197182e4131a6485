//! Tracing subscriber initialization.

use recall_core::{ConfigError, RecallResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub default_directive: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_directive: "recall_engine=info,recall_storage=info,warn".to_string(),
            json: true,
        }
    }
}

impl TelemetryConfig {
    /// Read `RECALL_LOG_DEFAULT` and `RECALL_LOG_FORMAT` (`json` or `text`).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_directive: std::env::var("RECALL_LOG_DEFAULT")
                .unwrap_or(defaults.default_directive),
            json: std::env::var("RECALL_LOG_FORMAT")
                .map(|s| !s.eq_ignore_ascii_case("text"))
                .unwrap_or(defaults.json),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Fails (without panicking) if a subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> RecallResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_directive));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| ConfigError::InvalidValue {
        field: "tracing".to_string(),
        value: config.default_directive.clone(),
        reason: format!("Failed to init subscriber: {}", e),
    })?;

    tracing::info!(json = config.json, "Telemetry initialized");
    Ok(())
}
