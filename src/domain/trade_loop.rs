//! Bar-by-bar replay of a single setup.
//!
//! A [`TradeLoop`] feeds historical candles through a [`TradeStatus`] in
//! timestamp order. While awaiting entry it tests the entry trigger; once
//! entered it checks stop and target and runs the setup's actions. Recorded
//! overrides pin prices to the value they had at each bar, so a replay sees the
//! same derived prices the live system saw.

use chrono::NaiveDateTime;
use tracing::debug;

use super::action::ActionRegistry;
use super::candle::Candle;
use super::config::EvaluationConfig;
use super::error::TradeSimError;
use super::pivots::Pivots;
use super::position::Position;
use super::setup::Setup;
use super::trade_status::TradeStatus;
use crate::ports::candle_port::CandleSource;
use crate::ports::override_port::{OverrideField, OverrideSource};

pub struct TradeLoop<'a> {
    status: TradeStatus,
    candles: &'a dyn CandleSource,
    overrides: Option<&'a dyn OverrideSource>,
    config: EvaluationConfig,
    first_bar: Option<NaiveDateTime>,
    last_bar: Option<NaiveDateTime>,
    bars_replayed: usize,
    pivots: Pivots,
}

impl<'a> TradeLoop<'a> {
    pub fn new(
        setup: &Setup,
        registry: &ActionRegistry,
        candles: &'a dyn CandleSource,
        overrides: Option<&'a dyn OverrideSource>,
        config: EvaluationConfig,
    ) -> Result<Self, TradeSimError> {
        if setup.symbol != candles.symbol() {
            return Err(TradeSimError::SymbolMismatch {
                setup: setup.symbol.clone(),
                source_symbol: candles.symbol().to_string(),
            });
        }
        Ok(TradeLoop {
            status: TradeStatus::new(setup, registry)?,
            candles,
            overrides,
            config,
            first_bar: None,
            last_bar: None,
            bars_replayed: 0,
            pivots: Pivots::default(),
        })
    }

    pub fn status(&self) -> &TradeStatus {
        &self.status
    }

    pub fn into_status(self) -> TradeStatus {
        self.status
    }

    pub fn pivots(&self) -> &Pivots {
        &self.pivots
    }

    pub fn bars_replayed(&self) -> usize {
        self.bars_replayed
    }

    pub fn last_bar(&self) -> Option<NaiveDateTime> {
        self.last_bar
    }

    /// Open-ended replay from the setup timestamp, bounded by the configured
    /// lookahead. The trade may still be open afterwards.
    pub fn run(&mut self) -> Result<Option<&Position>, TradeSimError> {
        let start = self.status.setup().timestamp;
        let bars = self.candles.since(start, self.config.lookahead_bars)?;
        if bars.is_empty() {
            return Err(TradeSimError::EmptyBarRange { start, end: start });
        }
        self.replay(&bars)?;
        Ok(self.status.position())
    }

    /// Replay up to and including `exit_time`. A position still open at that
    /// point is closed at `exit_price`.
    pub fn run_to_exit(
        &mut self,
        exit_time: NaiveDateTime,
        exit_price: f64,
    ) -> Result<Option<&Position>, TradeSimError> {
        let entry = self.status.setup().timestamp;
        if exit_time <= entry {
            return Err(TradeSimError::NonMonotonicExit {
                entry,
                exit: exit_time,
            });
        }
        let bars = self.candles.range(entry, exit_time)?;
        if bars.is_empty() {
            return Err(TradeSimError::EmptyBarRange {
                start: entry,
                end: exit_time,
            });
        }
        self.replay(&bars)?;

        if self.status.is_entered() && !self.status.is_resolved() {
            self.status.close_at(exit_price, exit_time, "exit setup")?;
        }
        Ok(self.status.position())
    }

    /// Resume with the bars after the last one replayed.
    ///
    /// Does nothing once the trade is resolved or when no newer bar exists.
    pub fn continue_run(&mut self) -> Result<Option<&Position>, TradeSimError> {
        let Some(last) = self.last_bar else {
            return self.run();
        };
        if self.status.is_resolved() {
            return Ok(self.status.position());
        }
        let Some(next) = self.candles.next_after(last)? else {
            debug!(setup = self.status.setup().id, %last, "no bars after last replayed bar");
            return Ok(self.status.position());
        };
        let bars = self.candles.since(next.timestamp, self.config.lookahead_bars)?;
        self.replay(&bars)?;
        Ok(self.status.position())
    }

    fn replay(&mut self, bars: &[Candle]) -> Result<(), TradeSimError> {
        for candle in bars {
            if self.status.is_resolved() {
                break;
            }
            self.step(candle)?;
            self.first_bar.get_or_insert(candle.timestamp);
            self.last_bar = Some(candle.timestamp);
            self.bars_replayed += 1;
        }

        if let (Some(first), Some(last)) = (self.first_bar, self.last_bar) {
            self.pivots = self
                .candles
                .pivots(first, last, self.config.pivot_strength)?;
        }
        Ok(())
    }

    fn step(&mut self, candle: &Candle) -> Result<(), TradeSimError> {
        if !self.status.is_entered() {
            self.apply_override(OverrideField::Entry, candle)?;
            self.status.track_awaiting_entry(candle);
            if self.status.check_entry(candle) {
                self.status.enter_position(candle.timestamp)?;
                self.status.log_risk_reward(candle)?;
            }
            return Ok(());
        }
        if self.status.sync_exit() {
            return Ok(());
        }

        self.apply_override(OverrideField::Target, candle)?;
        self.apply_override(OverrideField::Stop, candle)?;
        self.status.log_risk_reward(candle)?;

        let stopped = self.status.check_is_stopped(candle)?;
        let closed = self.status.check_is_closed(candle)?;
        match (stopped, closed) {
            (true, true) => self.status.mark_ambiguous(candle),
            (true, false) => self.status.stop(candle.timestamp)?,
            (false, true) => self.status.close(candle.timestamp)?,
            (false, false) => self.status.run_trade_actions(candle)?,
        }
        Ok(())
    }

    fn apply_override(&mut self, field: OverrideField, candle: &Candle) -> Result<(), TradeSimError> {
        let Some(source) = self.overrides else {
            return Ok(());
        };
        let setup_id = self.status.setup().id;
        if let Some(value) = source.value_at(setup_id, field, candle.timestamp)? {
            if self.status.apply_override(field, value, candle.timestamp)? {
                debug!(setup = setup_id, %field, value, timestamp = %candle.timestamp, "override applied");
            }
        }
        Ok(())
    }
}
