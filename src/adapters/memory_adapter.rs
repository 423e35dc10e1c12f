//! In-memory candle and override sources.
//!
//! Used once data has been loaded from CSV, and as the fixture backend in
//! tests.

use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashMap};

use crate::domain::candle::Candle;
use crate::domain::error::TradeSimError;
use crate::ports::candle_port::CandleSource;
use crate::ports::override_port::{OverrideField, OverrideSource};

#[derive(Debug, Clone)]
pub struct MemoryCandles {
    symbol: String,
    candles: Vec<Candle>,
}

impl MemoryCandles {
    /// Bars are sorted by timestamp; later duplicates replace earlier ones.
    pub fn new(symbol: impl Into<String>, mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.timestamp);
        candles.dedup_by(|later, earlier| {
            if later.timestamp == earlier.timestamp {
                std::mem::swap(later, earlier);
                true
            } else {
                false
            }
        });
        MemoryCandles {
            symbol: symbol.into(),
            candles,
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    fn first_at_or_after(&self, ts: NaiveDateTime) -> usize {
        self.candles.partition_point(|c| c.timestamp < ts)
    }
}

impl CandleSource for MemoryCandles {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Candle>, TradeSimError> {
        let from = self.first_at_or_after(start);
        let to = self.candles.partition_point(|c| c.timestamp <= end);
        Ok(self.candles.get(from..to).map(<[Candle]>::to_vec).unwrap_or_default())
    }

    fn since(&self, start: NaiveDateTime, limit: usize) -> Result<Vec<Candle>, TradeSimError> {
        let from = self.first_at_or_after(start);
        Ok(self.candles[from..].iter().take(limit).cloned().collect())
    }

    fn next_after(&self, ts: NaiveDateTime) -> Result<Option<Candle>, TradeSimError> {
        let idx = self.candles.partition_point(|c| c.timestamp <= ts);
        Ok(self.candles.get(idx).cloned())
    }
}

/// Recorded values keyed by setup and field, ordered by time.
#[derive(Debug, Clone, Default)]
pub struct MemoryOverrides {
    values: HashMap<(u64, OverrideField), BTreeMap<NaiveDateTime, f64>>,
}

impl MemoryOverrides {
    pub fn insert(&mut self, setup_id: u64, field: OverrideField, ts: NaiveDateTime, value: f64) {
        self.values
            .entry((setup_id, field))
            .or_default()
            .insert(ts, value);
    }

    pub fn len(&self) -> usize {
        self.values.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OverrideSource for MemoryOverrides {
    fn value_at(
        &self,
        setup_id: u64,
        field: OverrideField,
        ts: NaiveDateTime,
    ) -> Result<Option<f64>, TradeSimError> {
        Ok(self
            .values
            .get(&(setup_id, field))
            .and_then(|series| series.range(..=ts).next_back())
            .map(|(_, v)| *v))
    }
}
