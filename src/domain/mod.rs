//! Core domain types and trade-lifecycle logic.

pub mod action;
pub mod candle;
pub mod config;
pub mod config_validation;
pub mod error;
pub mod evaluator;
pub mod pivots;
pub mod position;
pub mod price_reference;
pub mod setup;
pub mod summary;
pub mod trade_loop;
pub mod trade_status;
