//! Pivot high/low detection.

use chrono::NaiveDateTime;
use serde::Serialize;

use super::candle::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PivotPoint {
    pub timestamp: NaiveDateTime,
    pub price: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Pivots {
    pub highs: Vec<PivotPoint>,
    pub lows: Vec<PivotPoint>,
}

/// A bar is a pivot high when its high is strictly above the highs of the
/// `strength` bars on each side (pivot lows mirror this). Bars without a full
/// window on both sides are never pivots.
pub fn find_pivots(candles: &[Candle], strength: usize) -> Pivots {
    let mut pivots = Pivots::default();
    if strength == 0 || candles.len() < 2 * strength + 1 {
        return pivots;
    }

    for i in strength..candles.len() - strength {
        let window = candles[i - strength..=i + strength]
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != strength);
        let c = &candles[i];

        let mut is_high = true;
        let mut is_low = true;
        for (_, other) in window {
            is_high &= c.high > other.high;
            is_low &= c.low < other.low;
        }
        if is_high {
            pivots.highs.push(PivotPoint {
                timestamp: c.timestamp,
                price: c.high,
            });
        }
        if is_low {
            pivots.lows.push(PivotPoint {
                timestamp: c.timestamp,
                price: c.low,
            });
        }
    }
    pivots
}
