//! Post-entry trade actions.
//!
//! A setup may carry action configs (move stop to break-even, take partial
//! profit, trail the stop). Each config is resolved through an
//! [`ActionRegistry`] keyed by a stable [`ActionKind`] tag into an
//! [`ActionHandler`] that runs once per bar while the trade is open. A handler
//! that returns `Some(report)` is finished and gets dropped.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;

use super::candle::Candle;
use super::error::TradeSimError;
use super::position::Position;
use super::setup::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    BreakEven,
    PartialTakeProfit,
    TrailingStop,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::BreakEven => "break_even",
            ActionKind::PartialTakeProfit => "partial_take_profit",
            ActionKind::TrailingStop => "trailing_stop",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = TradeSimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "break_even" => Ok(ActionKind::BreakEven),
            "partial_take_profit" => Ok(ActionKind::PartialTakeProfit),
            "trailing_stop" => Ok(ActionKind::TrailingStop),
            other => Err(TradeSimError::UnknownAction {
                name: other.to_string(),
            }),
        }
    }
}

/// Persisted action parameters.
///
/// `trigger` is an ROI threshold in percent; `value` is kind-specific (lot
/// size for partial take-profit, trail distance in percent for the trailing
/// stop, unused for break-even).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    pub kind: ActionKind,
    pub trigger: f64,
    #[serde(default)]
    pub value: f64,
}

impl FromStr for ActionConfig {
    type Err = TradeSimError;

    /// Parses `kind:trigger[:value]`, e.g. `partial_take_profit:20:50`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':').map(str::trim);
        let kind: ActionKind = parts.next().unwrap_or_default().parse()?;
        let trigger = parse_param(parts.next(), kind, "trigger")?;
        let value = parse_param(parts.next(), kind, "value")?;
        if parts.next().is_some() {
            return Err(TradeSimError::UnknownAction {
                name: s.to_string(),
            });
        }
        Ok(ActionConfig {
            kind,
            trigger,
            value,
        })
    }
}

fn parse_param(raw: Option<&str>, kind: ActionKind, name: &str) -> Result<f64, TradeSimError> {
    match raw {
        None | Some("") => Ok(0.0),
        Some(v) => v.parse().map_err(|_| TradeSimError::ConfigInvalid {
            section: "actions".into(),
            key: kind.to_string(),
            reason: format!("{name} '{v}' is not a number"),
        }),
    }
}

/// Completion signal returned by a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionReport {
    pub kind: ActionKind,
    pub timestamp: NaiveDateTime,
    pub detail: String,
}

pub trait ActionHandler {
    fn kind(&self) -> ActionKind;

    /// Runs once per bar. `Some` means the handler is done.
    fn run(
        &mut self,
        candle: &Candle,
        position: &mut Position,
    ) -> Result<Option<ActionReport>, TradeSimError>;
}

pub type HandlerFactory = fn(&ActionConfig) -> Result<Box<dyn ActionHandler>, TradeSimError>;

/// Resolves action configs into handlers.
pub struct ActionRegistry {
    factories: HashMap<ActionKind, HandlerFactory>,
}

impl ActionRegistry {
    pub fn empty() -> Self {
        ActionRegistry {
            factories: HashMap::new(),
        }
    }

    /// Registers (or replaces) the factory for `kind`.
    pub fn register(&mut self, kind: ActionKind, factory: HandlerFactory) {
        self.factories.insert(kind, factory);
    }

    pub fn build(&self, config: &ActionConfig) -> Result<Box<dyn ActionHandler>, TradeSimError> {
        let factory =
            self.factories
                .get(&config.kind)
                .ok_or_else(|| TradeSimError::UnregisteredAction {
                    kind: config.kind.to_string(),
                })?;
        factory(config)
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        let mut registry = ActionRegistry::empty();
        registry.register(ActionKind::BreakEven, BreakEvenStop::factory);
        registry.register(ActionKind::PartialTakeProfit, PartialTakeProfit::factory);
        registry.register(ActionKind::TrailingStop, TrailingStop::factory);
        registry
    }
}

fn invalid(kind: ActionKind, reason: &str) -> TradeSimError {
    TradeSimError::ConfigInvalid {
        section: "actions".into(),
        key: kind.to_string(),
        reason: reason.to_string(),
    }
}

/// Best price reached in the trade's favour during this bar.
fn favourable_extreme(side: Side, candle: &Candle) -> f64 {
    match side {
        Side::Buy => candle.high,
        Side::Sell => candle.low,
    }
}

/// Moves the stop to the break-even price once ROI reaches the trigger.
#[derive(Debug, Clone)]
pub struct BreakEvenStop {
    pub trigger_roi: f64,
}

impl BreakEvenStop {
    fn factory(config: &ActionConfig) -> Result<Box<dyn ActionHandler>, TradeSimError> {
        if config.trigger < 0.0 {
            return Err(invalid(config.kind, "trigger must be non-negative"));
        }
        Ok(Box::new(BreakEvenStop {
            trigger_roi: config.trigger,
        }))
    }
}

impl ActionHandler for BreakEvenStop {
    fn kind(&self) -> ActionKind {
        ActionKind::BreakEven
    }

    fn run(
        &mut self,
        candle: &Candle,
        position: &mut Position,
    ) -> Result<Option<ActionReport>, TradeSimError> {
        let extreme = favourable_extreme(position.side(), candle);
        if position.roi(extreme)? < self.trigger_roi {
            return Ok(None);
        }
        let break_even = position.break_even_price()?;
        position
            .stop_price_mut()
            .set(break_even, candle.timestamp, "break_even", false)?;
        Ok(Some(ActionReport {
            kind: self.kind(),
            timestamp: candle.timestamp,
            detail: format!("stop moved to {break_even}"),
        }))
    }
}

/// Sells (or covers) part of the position at the trigger ROI.
#[derive(Debug, Clone)]
pub struct PartialTakeProfit {
    pub trigger_roi: f64,
    pub size: f64,
}

impl PartialTakeProfit {
    fn factory(config: &ActionConfig) -> Result<Box<dyn ActionHandler>, TradeSimError> {
        if config.trigger <= 0.0 {
            return Err(invalid(config.kind, "trigger must be positive"));
        }
        if config.value <= 0.0 {
            return Err(invalid(config.kind, "lot size must be positive"));
        }
        Ok(Box::new(PartialTakeProfit {
            trigger_roi: config.trigger,
            size: config.value,
        }))
    }
}

impl ActionHandler for PartialTakeProfit {
    fn kind(&self) -> ActionKind {
        ActionKind::PartialTakeProfit
    }

    fn run(
        &mut self,
        candle: &Candle,
        position: &mut Position,
    ) -> Result<Option<ActionReport>, TradeSimError> {
        let extreme = favourable_extreme(position.side(), candle);
        if position.roi(extreme)? < self.trigger_roi {
            return Ok(None);
        }
        // Exits of the whole lot go through close()/stop().
        if self.size >= position.used_size() {
            return Ok(Some(ActionReport {
                kind: self.kind(),
                timestamp: candle.timestamp,
                detail: format!(
                    "skipped: lot {} would empty position of {}",
                    self.size,
                    position.used_size()
                ),
            }));
        }
        let price = position.price_for_roi(self.trigger_roi)?;
        position.decrease_size(self.size, price)?;
        Ok(Some(ActionReport {
            kind: self.kind(),
            timestamp: candle.timestamp,
            detail: format!("decreased {} at {price}", self.size),
        }))
    }
}

/// Ratchets the stop a fixed distance behind the favourable extreme.
///
/// Activates once ROI reaches the trigger and never completes.
#[derive(Debug, Clone)]
pub struct TrailingStop {
    pub trigger_roi: f64,
    pub distance_pct: f64,
    active: bool,
}

impl TrailingStop {
    pub fn new(trigger_roi: f64, distance_pct: f64) -> Self {
        TrailingStop {
            trigger_roi,
            distance_pct,
            active: false,
        }
    }

    fn factory(config: &ActionConfig) -> Result<Box<dyn ActionHandler>, TradeSimError> {
        if config.value <= 0.0 || config.value >= 100.0 {
            return Err(invalid(config.kind, "trail distance must be in (0, 100)"));
        }
        Ok(Box::new(TrailingStop::new(config.trigger, config.value)))
    }
}

impl ActionHandler for TrailingStop {
    fn kind(&self) -> ActionKind {
        ActionKind::TrailingStop
    }

    fn run(
        &mut self,
        candle: &Candle,
        position: &mut Position,
    ) -> Result<Option<ActionReport>, TradeSimError> {
        let side = position.side();
        let extreme = favourable_extreme(side, candle);
        if !self.active {
            if position.roi(extreme)? < self.trigger_roi {
                return Ok(None);
            }
            self.active = true;
        }

        let current = position.stop_price().get();
        let candidate = match side {
            Side::Buy => extreme * (1.0 - self.distance_pct / 100.0),
            Side::Sell => extreme * (1.0 + self.distance_pct / 100.0),
        };
        let tighter = match side {
            Side::Buy => candidate > current,
            Side::Sell => candidate < current,
        };
        if tighter {
            position
                .stop_price_mut()
                .set(candidate, candle.timestamp, "trailing_stop", false)?;
        }
        Ok(None)
    }
}
