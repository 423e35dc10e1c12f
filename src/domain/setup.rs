//! Entry/exit setup candidates supplied by the upstream signal layer.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::action::ActionConfig;
use super::error::TradeSimError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

impl FromStr for Side {
    type Err = TradeSimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" | "long" => Ok(Side::Buy),
            "sell" | "short" => Ok(Side::Sell),
            other => Err(TradeSimError::Data {
                reason: format!("unknown side '{other}'"),
            }),
        }
    }
}

/// A candidate trade produced upstream. The core only ever reads it.
///
/// The same type serves as entry setup and as exit setup: an exit is simply the
/// next setup on the opposite side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setup {
    pub id: u64,
    pub symbol: String,
    pub side: Side,
    pub timestamp: NaiveDateTime,
    /// Entry trigger price.
    pub price: f64,
    pub target: f64,
    pub stop: f64,
    /// Proportional size, `0 < size <= MAX_SIZE`.
    pub size: f64,
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
}
