//! OHLCV candle representation.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// low <= price <= high
    pub fn contains(&self, price: f64) -> bool {
        self.low <= price && price <= self.high
    }
}

/// Highest high and lowest low across a run of candles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Excursion {
    pub high: f64,
    pub low: f64,
}

impl Excursion {
    pub fn over(candles: &[Candle]) -> Option<Self> {
        let first = candles.first()?;
        let init = Excursion {
            high: first.high,
            low: first.low,
        };
        Some(candles.iter().skip(1).fold(init, |acc, c| Excursion {
            high: acc.high.max(c.high),
            low: acc.low.min(c.low),
        }))
    }
}
