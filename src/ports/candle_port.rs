//! Historical candle access.

use chrono::NaiveDateTime;

use crate::domain::candle::Candle;
use crate::domain::error::TradeSimError;
use crate::domain::pivots::{Pivots, find_pivots};

/// Ordered OHLCV bars for a single symbol.
///
/// Implementations return bars sorted by timestamp, oldest first. The replay
/// treats the source as synchronous and pre-fetched.
pub trait CandleSource {
    fn symbol(&self) -> &str;

    /// Bars with `start <= timestamp <= end`.
    fn range(&self, start: NaiveDateTime, end: NaiveDateTime)
    -> Result<Vec<Candle>, TradeSimError>;

    /// Up to `limit` bars with `timestamp >= start`.
    fn since(&self, start: NaiveDateTime, limit: usize) -> Result<Vec<Candle>, TradeSimError>;

    /// The first bar strictly after `ts`.
    fn next_after(&self, ts: NaiveDateTime) -> Result<Option<Candle>, TradeSimError>;

    fn pivots(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        strength: usize,
    ) -> Result<Pivots, TradeSimError> {
        Ok(find_pivots(&self.range(start, end)?, strength))
    }
}
