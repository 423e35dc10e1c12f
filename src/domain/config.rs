//! Evaluation parameters.

use super::config_validation::validate_evaluation_config;
use super::error::TradeSimError;
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_COMMISSION_PCT: f64 = 0.1;
pub const DEFAULT_PIVOT_STRENGTH: usize = 2;
pub const DEFAULT_LOOKAHEAD_BARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationConfig {
    /// Round-trip commission in percent of the running balance.
    pub commission_pct: f64,
    /// Bars on each side a pivot must dominate.
    pub pivot_strength: usize,
    /// Bar budget for an open-ended replay.
    pub lookahead_bars: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        EvaluationConfig {
            commission_pct: DEFAULT_COMMISSION_PCT,
            pivot_strength: DEFAULT_PIVOT_STRENGTH,
            lookahead_bars: DEFAULT_LOOKAHEAD_BARS,
        }
    }
}

impl EvaluationConfig {
    /// Reads the `[evaluation]` section, validating before building.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, TradeSimError> {
        validate_evaluation_config(config)?;
        Ok(EvaluationConfig {
            commission_pct: config.get_double("evaluation", "commission_pct", DEFAULT_COMMISSION_PCT),
            pivot_strength: config.get_int("evaluation", "pivot_strength", DEFAULT_PIVOT_STRENGTH as i64)
                as usize,
            lookahead_bars: config.get_int("evaluation", "lookahead_bars", DEFAULT_LOOKAHEAD_BARS as i64)
                as usize,
        })
    }
}
