//! Port traits the domain consumes.

pub mod candle_port;
pub mod config_port;
pub mod override_port;
