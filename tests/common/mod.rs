#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::cell::Cell;
use tradesim::adapters::memory_adapter::MemoryCandles;
use tradesim::domain::action::ActionConfig;
use tradesim::domain::candle::Candle;
use tradesim::domain::error::TradeSimError;
use tradesim::domain::setup::{Setup, Side};
use tradesim::ports::candle_port::CandleSource;

pub const SYMBOL: &str = "BTCUSDT";

/// Candle source wrapper that counts queries and can be told to fail.
pub struct MockCandleSource {
    pub inner: MemoryCandles,
    pub fail_with: Option<String>,
    pub queries: Cell<usize>,
}

impl MockCandleSource {
    pub fn new(bars: Vec<Candle>) -> Self {
        Self {
            inner: MemoryCandles::new(SYMBOL, bars),
            fail_with: None,
            queries: Cell::new(0),
        }
    }

    pub fn with_error(mut self, reason: &str) -> Self {
        self.fail_with = Some(reason.to_string());
        self
    }

    fn check(&self) -> Result<(), TradeSimError> {
        self.queries.set(self.queries.get() + 1);
        match &self.fail_with {
            Some(reason) => Err(TradeSimError::Database {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl CandleSource for MockCandleSource {
    fn symbol(&self) -> &str {
        self.inner.symbol()
    }

    fn range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Candle>, TradeSimError> {
        self.check()?;
        self.inner.range(start, end)
    }

    fn since(&self, start: NaiveDateTime, limit: usize) -> Result<Vec<Candle>, TradeSimError> {
        self.check()?;
        self.inner.since(start, limit)
    }

    fn next_after(&self, ts: NaiveDateTime) -> Result<Option<Candle>, TradeSimError> {
        self.check()?;
        self.inner.next_after(ts)
    }
}

pub fn ts(h: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + Duration::hours(h)
}

pub fn bar(h: i64, low: f64, high: f64) -> Candle {
    Candle {
        timestamp: ts(h),
        open: low,
        high,
        low,
        close: (low + high) / 2.0,
        volume: 1000.0,
    }
}

/// Hourly bars whose range is `mid ± 0.5`.
pub fn bars_around(start_h: i64, mids: &[f64]) -> Vec<Candle> {
    mids.iter()
        .enumerate()
        .map(|(i, m)| bar(start_h + i as i64, m - 0.5, m + 0.5))
        .collect()
}

pub fn setup(id: u64, side: Side, h: i64, price: f64, target: f64, stop: f64) -> Setup {
    Setup {
        id,
        symbol: SYMBOL.to_string(),
        side,
        timestamp: ts(h),
        price,
        target,
        stop,
        size: 100.0,
        actions: Vec::new(),
    }
}

pub fn with_actions(mut setup: Setup, actions: &[&str]) -> Setup {
    setup.actions = actions
        .iter()
        .map(|a| a.parse::<ActionConfig>().unwrap())
        .collect();
    setup
}
