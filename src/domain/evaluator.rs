//! Setup pairing and per-trade evaluation.
//!
//! Each entry setup is paired with the chronologically next setup on the
//! opposite side, which acts as its exit. The pair is replayed through a
//! [`TradeLoop`] and the outcome is captured once in an [`EvaluationResult`].

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::action::{ActionRegistry, ActionReport};
use super::candle::Excursion;
use super::config::EvaluationConfig;
use super::error::TradeSimError;
use super::position::{Transaction, price_roi};
use super::price_reference::PriceChange;
use super::setup::{Setup, Side};
use super::trade_loop::TradeLoop;
use crate::ports::candle_port::CandleSource;
use crate::ports::override_port::{OverrideField, OverrideSource};

/// Outcome of one entry/exit pair. Built once and never mutated.
///
/// Derived fields are `None` when no position formed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResult {
    pub entry_id: u64,
    pub exit_id: u64,
    pub symbol: String,
    pub side: Side,
    pub entry_setup_time: NaiveDateTime,
    pub exit_setup_time: NaiveDateTime,
    pub entry_price: f64,
    pub target_price: f64,
    pub stop_price: f64,
    pub valid_entry_price: bool,
    pub ambiguous: bool,
    pub stopped: bool,
    pub closed: bool,
    pub entry_time: Option<NaiveDateTime>,
    pub exit_time: Option<NaiveDateTime>,
    pub roi: Option<f64>,
    pub relative_roi: Option<f64>,
    pub high_price: Option<f64>,
    pub low_price: Option<f64>,
    /// Best single-lot ROI reachable between entry and the exit setup.
    pub high_roi: Option<f64>,
    /// Worst single-lot ROI reachable between entry and the exit setup.
    pub low_roi: Option<f64>,
    pub risk_reward: Option<f64>,
    pub pivot_highs: usize,
    pub pivot_lows: usize,
    pub bars_replayed: usize,
    /// JSON log of transactions, price audit trails and completed actions.
    pub history: String,
}

impl EvaluationResult {
    /// A pair with no position: setup prices, no derived fields.
    pub fn not_entered(entry: &Setup, exit: &Setup) -> Self {
        EvaluationResult {
            entry_id: entry.id,
            exit_id: exit.id,
            symbol: entry.symbol.clone(),
            side: entry.side,
            entry_setup_time: entry.timestamp,
            exit_setup_time: exit.timestamp,
            entry_price: entry.price,
            target_price: entry.target,
            stop_price: entry.stop,
            valid_entry_price: false,
            ambiguous: false,
            stopped: false,
            closed: false,
            entry_time: None,
            exit_time: None,
            roi: None,
            relative_roi: None,
            high_price: None,
            low_price: None,
            high_roi: None,
            low_roi: None,
            risk_reward: None,
            pivot_highs: 0,
            pivot_lows: 0,
            bars_replayed: 0,
            history: "{}".to_string(),
        }
    }

    /// Entered, resolved without ambiguity, with a realised ROI.
    pub fn is_countable(&self) -> bool {
        self.valid_entry_price && !self.ambiguous && self.roi.is_some()
    }
}

#[derive(Serialize)]
struct TradeHistory<'a> {
    transactions: &'a [Transaction],
    entry: &'a [PriceChange],
    target: &'a [PriceChange],
    stop: &'a [PriceChange],
    actions: &'a [ActionReport],
}

/// Pairs every setup with the next opposite-side setup as its exit.
///
/// Setups are taken in timestamp order. A pair whose exit is not strictly
/// later than its entry is rejected; setups with no opposite-side successor
/// are left unpaired.
pub fn pair_setups(setups: &[Setup]) -> Vec<(&Setup, &Setup)> {
    let mut ordered: Vec<&Setup> = setups.iter().collect();
    ordered.sort_by_key(|s| s.timestamp);

    let mut pairs = Vec::new();
    for (i, entry) in ordered.iter().enumerate() {
        let exit = ordered[i + 1..]
            .iter()
            .find(|s| s.side == entry.side.opposite() && s.symbol == entry.symbol);
        match exit {
            Some(exit) if exit.timestamp > entry.timestamp => pairs.push((*entry, *exit)),
            Some(exit) => debug!(
                entry = entry.id,
                exit = exit.id,
                "rejecting pair, exit is not after entry"
            ),
            None => debug!(entry = entry.id, "no exit setup"),
        }
    }
    pairs
}

pub struct Evaluator<'a> {
    candles: &'a dyn CandleSource,
    overrides: Option<&'a dyn OverrideSource>,
    registry: &'a ActionRegistry,
    config: EvaluationConfig,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        candles: &'a dyn CandleSource,
        overrides: Option<&'a dyn OverrideSource>,
        registry: &'a ActionRegistry,
        config: EvaluationConfig,
    ) -> Self {
        Evaluator {
            candles,
            overrides,
            registry,
            config,
        }
    }

    pub fn evaluate(&self, entry: &Setup, exit: &Setup) -> Result<EvaluationResult, TradeSimError> {
        if exit.timestamp <= entry.timestamp {
            return Err(TradeSimError::NonMonotonicExit {
                entry: entry.timestamp,
                exit: exit.timestamp,
            });
        }

        let mut trade = TradeLoop::new(entry, self.registry, self.candles, self.overrides, self.config)?;
        trade.run_to_exit(exit.timestamp, exit.price)?;

        let pivots = trade.pivots().clone();
        let bars_replayed = trade.bars_replayed();
        let status = trade.into_status();

        let mut result = EvaluationResult {
            entry_price: status.price(OverrideField::Entry),
            target_price: status.price(OverrideField::Target),
            stop_price: status.price(OverrideField::Stop),
            ambiguous: status.is_ambiguous(),
            risk_reward: status.risk_reward().map(|rr| rr.ratio),
            pivot_highs: pivots.highs.len(),
            pivot_lows: pivots.lows.len(),
            bars_replayed,
            ..EvaluationResult::not_entered(entry, exit)
        };

        let Some(position) = status.position() else {
            debug!(entry = entry.id, "entry never triggered");
            return Ok(result);
        };

        result.valid_entry_price = true;
        result.stopped = position.is_stopped();
        result.closed = position.is_closed();
        result.entry_time = Some(position.entry_time());
        result.exit_time = position.exit_time();
        result.roi = position.exit_roi();
        result.relative_roi = position.relative_exit_roi();

        let window = self.candles.range(position.entry_time(), exit.timestamp)?;
        if let Some(excursion) = Excursion::over(&window) {
            let entry_price = position.entry_price().get();
            let at_high = price_roi(entry.side, entry_price, excursion.high);
            let at_low = price_roi(entry.side, entry_price, excursion.low);
            result.high_price = Some(excursion.high);
            result.low_price = Some(excursion.low);
            result.high_roi = Some(at_high.max(at_low));
            result.low_roi = Some(at_high.min(at_low));
        }

        let history = TradeHistory {
            transactions: position.transactions(),
            entry: position.entry_price().history(),
            target: position.exit_price().history(),
            stop: position.stop_price().history(),
            actions: status.actions_log(),
        };
        result.history = serde_json::to_string(&history).map_err(|e| TradeSimError::Data {
            reason: format!("cannot serialise trade history: {e}"),
        })?;

        Ok(result)
    }

    /// Evaluate every accepted pair in entry order.
    ///
    /// A pair rejected by a precondition (a gap in the bars, an oversized
    /// setup) is recorded as not entered and the batch carries on. Source,
    /// config and invariant errors still abort.
    pub fn evaluate_all(&self, setups: &[Setup]) -> Result<Vec<EvaluationResult>, TradeSimError> {
        let pairs = pair_setups(setups);
        info!(setups = setups.len(), pairs = pairs.len(), "evaluating setup pairs");
        let mut results = Vec::with_capacity(pairs.len());
        for (entry, exit) in pairs {
            match self.evaluate(entry, exit) {
                Ok(result) => results.push(result),
                Err(e) if e.is_precondition_violation() => {
                    warn!(entry = entry.id, exit = exit.id, error = %e, "pair skipped");
                    results.push(EvaluationResult::not_entered(entry, exit));
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            evaluated = results.len(),
            entered = results.iter().filter(|r| r.valid_entry_price).count(),
            "evaluation finished"
        );
        Ok(results)
    }
}
