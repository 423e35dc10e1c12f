//! Per-setup trade lifecycle.
//!
//! A [`TradeStatus`] starts out awaiting entry and holds the setup's entry,
//! target and stop prices as pending references. On entry those references
//! move into a freshly built [`Position`]. From then on every bar is checked
//! for stop and target, and the setup's action handlers run until they
//! complete. A bar that reaches both stop and target marks the trade ambiguous
//! and leaves the position open.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

use super::action::{ActionHandler, ActionRegistry, ActionReport};
use super::candle::Candle;
use super::error::TradeSimError;
use super::position::{Position, price_roi};
use super::price_reference::{LockOwner, ModifierRole, PriceReference};
use super::setup::{Setup, Side};
use crate::ports::override_port::OverrideField;

/// Overrides closer than this to the current value are ignored.
const PRICE_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeState {
    AwaitingEntry,
    Entered,
    Exited,
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeState::AwaitingEntry => write!(f, "awaiting_entry"),
            TradeState::Entered => write!(f, "entered"),
            TradeState::Exited => write!(f, "exited"),
        }
    }
}

/// Snapshot taken whenever the trade makes a new high or low after entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskReward {
    /// ROI to the favourable extreme.
    pub reward: f64,
    /// ROI to the adverse extreme.
    pub risk: f64,
    pub ratio: f64,
}

impl RiskReward {
    pub fn new(reward: f64, risk: f64) -> Self {
        let ratio = if risk == 0.0 {
            0.0
        } else {
            (reward / risk).abs()
        };
        RiskReward {
            reward,
            risk,
            ratio,
        }
    }
}

#[derive(Debug)]
struct PendingPrices {
    entry: PriceReference,
    target: PriceReference,
    stop: PriceReference,
}

/// Running high and low over a stretch of bars.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub high: f64,
    pub low: f64,
}

impl Range {
    fn extend(slot: &mut Option<Range>, candle: &Candle) -> bool {
        match slot {
            None => {
                *slot = Some(Range {
                    high: candle.high,
                    low: candle.low,
                });
                true
            }
            Some(range) => {
                let mut moved = false;
                if candle.high > range.high {
                    range.high = candle.high;
                    moved = true;
                }
                if candle.low < range.low {
                    range.low = candle.low;
                    moved = true;
                }
                moved
            }
        }
    }
}

pub struct TradeStatus {
    setup: Setup,
    owner: LockOwner,
    state: TradeState,
    ambiguous: bool,
    pending: Option<PendingPrices>,
    position: Option<Position>,
    handlers: Vec<Box<dyn ActionHandler>>,
    actions_log: Vec<ActionReport>,
    since_entry: Option<Range>,
    awaiting_entry: Option<Range>,
    risk_reward: Option<RiskReward>,
}

impl fmt::Debug for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TradeStatus")
            .field("setup", &self.setup.id)
            .field("state", &self.state)
            .field("ambiguous", &self.ambiguous)
            .field("position", &self.position)
            .field("handlers", &self.handlers.len())
            .field("actions_log", &self.actions_log)
            .finish()
    }
}

impl TradeStatus {
    /// Resolves the setup's action configs up front so that an unknown or
    /// misconfigured action fails before any bar is replayed.
    pub fn new(setup: &Setup, registry: &ActionRegistry) -> Result<Self, TradeSimError> {
        let handlers = setup
            .actions
            .iter()
            .map(|config| registry.build(config))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TradeStatus {
            owner: LockOwner::new(ModifierRole::Position, setup.id),
            state: TradeState::AwaitingEntry,
            ambiguous: false,
            pending: Some(PendingPrices {
                entry: PriceReference::new(setup.price),
                target: PriceReference::new(setup.target),
                stop: PriceReference::new(setup.stop),
            }),
            position: None,
            handlers,
            actions_log: Vec::new(),
            since_entry: None,
            awaiting_entry: None,
            risk_reward: None,
            setup: setup.clone(),
        })
    }

    pub fn setup(&self) -> &Setup {
        &self.setup
    }

    pub fn side(&self) -> Side {
        self.setup.side
    }

    pub fn state(&self) -> TradeState {
        self.state
    }

    pub fn is_entered(&self) -> bool {
        self.position.is_some()
    }

    pub fn is_exited(&self) -> bool {
        self.state == TradeState::Exited
    }

    pub fn is_ambiguous(&self) -> bool {
        self.ambiguous
    }

    /// The replay has nothing left to do for this trade.
    pub fn is_resolved(&self) -> bool {
        self.is_exited() || self.ambiguous
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn actions_log(&self) -> &[ActionReport] {
        &self.actions_log
    }

    pub fn pending_actions(&self) -> usize {
        self.handlers.len()
    }

    pub fn since_entry(&self) -> Option<Range> {
        self.since_entry
    }

    pub fn awaiting_entry(&self) -> Option<Range> {
        self.awaiting_entry
    }

    pub fn risk_reward(&self) -> Option<RiskReward> {
        self.risk_reward
    }

    /// Current value of a price, wherever it lives right now.
    pub fn price(&self, field: OverrideField) -> f64 {
        match (&self.pending, &self.position) {
            (Some(p), _) => match field {
                OverrideField::Entry => p.entry.get(),
                OverrideField::Target => p.target.get(),
                OverrideField::Stop => p.stop.get(),
            },
            (None, Some(pos)) => match field {
                OverrideField::Entry => pos.entry_price().get(),
                OverrideField::Target => pos.exit_price().get(),
                OverrideField::Stop => pos.stop_price().get(),
            },
            (None, None) => match field {
                OverrideField::Entry => self.setup.price,
                OverrideField::Target => self.setup.target,
                OverrideField::Stop => self.setup.stop,
            },
        }
    }

    fn price_mut(&mut self, field: OverrideField) -> Option<&mut PriceReference> {
        if let Some(p) = self.pending.as_mut() {
            return Some(match field {
                OverrideField::Entry => &mut p.entry,
                OverrideField::Target => &mut p.target,
                OverrideField::Stop => &mut p.stop,
            });
        }
        let pos = self.position.as_mut()?;
        match field {
            OverrideField::Entry => None,
            OverrideField::Target => Some(pos.exit_price_mut()),
            OverrideField::Stop => Some(pos.stop_price_mut()),
        }
    }

    /// Pin a price to a recorded historical value.
    ///
    /// Returns `true` if the value changed. Entry can only be overridden while
    /// awaiting entry; locked references are left alone.
    pub fn apply_override(
        &mut self,
        field: OverrideField,
        value: f64,
        timestamp: NaiveDateTime,
    ) -> Result<bool, TradeSimError> {
        let Some(price) = self.price_mut(field) else {
            return Ok(false);
        };
        if price.is_locked() || (price.get() - value).abs() <= PRICE_EPSILON {
            return Ok(false);
        }
        price.set(value, timestamp, "override", false)?;
        Ok(true)
    }

    pub fn track_awaiting_entry(&mut self, candle: &Candle) {
        Range::extend(&mut self.awaiting_entry, candle);
    }

    /// Whether this bar trades through the pending entry price.
    pub fn check_entry(&self, candle: &Candle) -> bool {
        !self.is_entered() && candle.contains(self.price(OverrideField::Entry))
    }

    pub fn enter_position(&mut self, timestamp: NaiveDateTime) -> Result<&Position, TradeSimError> {
        if self.position.is_some() {
            return Err(TradeSimError::AlreadyEntered);
        }
        let pending = self.pending.take().ok_or(TradeSimError::AlreadyEntered)?;
        let position = Position::new(
            self.setup.side,
            self.setup.size,
            timestamp,
            pending.entry,
            pending.target,
            pending.stop,
            self.owner,
        )?;
        debug!(
            setup = self.setup.id,
            side = %self.setup.side,
            price = position.entry_price().get(),
            %timestamp,
            "entered position"
        );
        self.state = TradeState::Entered;
        Ok(self.position.insert(position))
    }

    fn entered(&self) -> Result<&Position, TradeSimError> {
        self.position.as_ref().ok_or(TradeSimError::NotEntered)
    }

    /// True if the bar reaches the stop, or the position was already stopped.
    pub fn check_is_stopped(&self, candle: &Candle) -> Result<bool, TradeSimError> {
        let position = self.entered()?;
        if position.is_stopped() {
            return Ok(true);
        }
        let stop = position.stop_price().get();
        Ok(match position.side() {
            Side::Buy => candle.low <= stop,
            Side::Sell => candle.high >= stop,
        })
    }

    /// True if the bar reaches the target, or the position was already closed.
    pub fn check_is_closed(&self, candle: &Candle) -> Result<bool, TradeSimError> {
        let position = self.entered()?;
        if position.is_closed() {
            return Ok(true);
        }
        let target = position.exit_price().get();
        Ok(match position.side() {
            Side::Buy => candle.high >= target,
            Side::Sell => candle.low <= target,
        })
    }

    pub fn mark_ambiguous(&mut self, candle: &Candle) {
        warn!(
            setup = self.setup.id,
            timestamp = %candle.timestamp,
            "bar reaches both stop and target, trade is ambiguous"
        );
        self.ambiguous = true;
    }

    pub fn stop(&mut self, timestamp: NaiveDateTime) -> Result<(), TradeSimError> {
        let position = self.position.as_mut().ok_or(TradeSimError::NotEntered)?;
        position.stop(timestamp)?;
        debug!(setup = self.setup.id, roi = ?position.exit_roi(), %timestamp, "stopped");
        self.state = TradeState::Exited;
        Ok(())
    }

    pub fn close(&mut self, timestamp: NaiveDateTime) -> Result<(), TradeSimError> {
        let position = self.position.as_mut().ok_or(TradeSimError::NotEntered)?;
        position.close(timestamp)?;
        debug!(setup = self.setup.id, roi = ?position.exit_roi(), %timestamp, "closed");
        self.state = TradeState::Exited;
        Ok(())
    }

    /// Close at an explicit price, used when the replay reaches the exit setup
    /// with the position still open.
    pub fn close_at(
        &mut self,
        price: f64,
        timestamp: NaiveDateTime,
        reason: &str,
    ) -> Result<(), TradeSimError> {
        let position = self.position.as_mut().ok_or(TradeSimError::NotEntered)?;
        position.exit_price_mut().set(price, timestamp, reason, false)?;
        self.close(timestamp)
    }

    /// Moves to `Exited` when the position was stopped or closed without
    /// going through [`stop`](Self::stop) or [`close`](Self::close).
    pub fn sync_exit(&mut self) -> bool {
        let exited = self.position.as_ref().is_some_and(Position::is_exited);
        if exited && self.state != TradeState::Exited {
            debug!(setup = self.setup.id, "position exited outside the trade loop");
            self.state = TradeState::Exited;
        }
        exited
    }

    /// Runs every pending handler once; completed handlers are dropped.
    /// A handler that exits the position ends the pass.
    pub fn run_trade_actions(&mut self, candle: &Candle) -> Result<(), TradeSimError> {
        if self.sync_exit() {
            return Ok(());
        }
        let Some(position) = self.position.as_mut() else {
            return Err(TradeSimError::NotEntered);
        };
        let mut i = 0;
        while i < self.handlers.len() && position.is_open() {
            match self.handlers[i].run(candle, position)? {
                Some(report) => {
                    debug!(
                        setup = self.setup.id,
                        action = %report.kind,
                        detail = %report.detail,
                        "action completed"
                    );
                    self.handlers.remove(i);
                    self.actions_log.push(report);
                }
                None => i += 1,
            }
        }
        self.sync_exit();
        Ok(())
    }

    /// Tracks the high/low since entry and re-derives risk and reward whenever
    /// either extreme moves.
    pub fn log_risk_reward(&mut self, candle: &Candle) -> Result<(), TradeSimError> {
        let position = self.position.as_ref().ok_or(TradeSimError::NotEntered)?;
        let side = position.side();
        let entry = position.entry_price().get();
        if !Range::extend(&mut self.since_entry, candle) {
            return Ok(());
        }
        let Some(range) = self.since_entry else {
            return Ok(());
        };
        let (favourable, adverse) = match side {
            Side::Buy => (range.high, range.low),
            Side::Sell => (range.low, range.high),
        };
        self.risk_reward = Some(RiskReward::new(
            price_roi(side, entry, favourable),
            price_roi(side, entry, adverse),
        ));
        Ok(())
    }
}
