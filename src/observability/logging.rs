//! Structured logging.
//!
//! # Responsibilities
//! - Initialize logging subsystem
//! - Configure log level from config, overridable via `RUST_LOG`
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).try_init(),
    }
}

fn default_filter(level: &str) -> EnvFilter {
    let level = match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" | "off" => level.to_lowercase(),
        _ => "info".to_string(),
    };
    EnvFilter::new(format!("{level},hyper=warn,hyper_util=warn"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_level_falls_back_to_info() {
        let fallback = default_filter("loud").to_string();
        assert!(fallback.contains("info"));
        assert!(!fallback.contains("loud"));
        assert!(default_filter("DEBUG").to_string().contains("debug"));
    }
}
