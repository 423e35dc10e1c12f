//! Tracing subscriber setup for the binary.
//!
//! The library only emits `tracing` events; installing a subscriber is left to
//! the caller. `RUST_LOG` takes precedence over the level passed in.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::domain::error::TradeSimError;

pub const DEFAULT_LEVEL: &str = "info";

/// Filter from `RUST_LOG` if set, otherwise `tradesim=<level>`.
pub fn build_filter(level: &str) -> Result<EnvFilter, TradeSimError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(format!("tradesim={level}")).map_err(|e| TradeSimError::ConfigInvalid {
        section: "logging".into(),
        key: "level".into(),
        reason: e.to_string(),
    })
}

/// Install a compact stderr subscriber. Stdout stays free for results.
pub fn init_logging(level: &str) -> Result<(), TradeSimError> {
    let filter = build_filter(level)?;
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .try_init()
        .map_err(|e| TradeSimError::ConfigInvalid {
            section: "logging".into(),
            key: "subscriber".into(),
            reason: e.to_string(),
        })
}
