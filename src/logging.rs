//! Tracing initialization for hosted applications.
//!
//! Filter priority: CLI override > RUST_LOG > built-in default. The format
//! (text or json) comes from the logging section of the configuration.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LoggingConfig, DEFAULT_LOG_FILTER};

/// Initialize the global tracing subscriber. Call once, before `Host::run`.
pub fn init(config: &LoggingConfig, cli_filter: Option<&str>) {
    let filter = cli_filter
        .map(str::to_owned)
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    let registry =
        tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(&filter));
    if config.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
