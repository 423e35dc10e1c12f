//! Domain error types.

use chrono::NaiveDateTime;

/// Top-level error type for tradesim.
///
/// Precondition and invariant variants are fatal: they are returned to the
/// caller and never retried. Data-quality outcomes (ambiguous bars, setups that
/// never trigger) are not errors and never appear here.
#[derive(Debug, thiserror::Error)]
pub enum TradeSimError {
    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("no candles in range {start} to {end}")]
    EmptyBarRange {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },

    #[error("exit time {exit} is not after entry time {entry}")]
    NonMonotonicExit {
        entry: NaiveDateTime,
        exit: NaiveDateTime,
    },

    #[error("setup symbol {setup} does not match candle source symbol {source_symbol}")]
    SymbolMismatch {
        setup: String,
        source_symbol: String,
    },

    #[error("invalid size {size}: {reason}")]
    InvalidSize { size: f64, reason: String },

    #[error("increase of {requested} exceeds remaining size {remaining}")]
    IncreaseExceedsRemaining { requested: f64, remaining: f64 },

    #[error("decrease of {requested} exceeds used size {used}")]
    DecreaseExceedsUsed { requested: f64, used: f64 },

    #[error("invalid price {price}: {reason}")]
    InvalidPrice { price: f64, reason: String },

    #[error("price is locked by {owner}, refusing change to {attempted} ({reason})")]
    PriceLocked {
        owner: String,
        attempted: f64,
        reason: String,
    },

    #[error("lock error: {reason}")]
    Lock { reason: String },

    #[error("invariant violated: open position holds no asset")]
    EmptyOpenPosition,

    #[error("position already {state}")]
    PositionAlreadyExited { state: &'static str },

    #[error("position is not open")]
    PositionNotOpen,

    #[error("trade already entered")]
    AlreadyEntered,

    #[error("trade has not been entered")]
    NotEntered,

    #[error("unknown action: {name}")]
    UnknownAction { name: String },

    #[error("no handler registered for action {kind}")]
    UnregisteredAction { kind: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TradeSimError {
    /// True for errors raised by input that one trade cannot be replayed
    /// against: missing bars, bad sizes or prices, refused price changes.
    pub fn is_precondition_violation(&self) -> bool {
        matches!(
            self,
            TradeSimError::EmptyBarRange { .. }
                | TradeSimError::NonMonotonicExit { .. }
                | TradeSimError::SymbolMismatch { .. }
                | TradeSimError::InvalidSize { .. }
                | TradeSimError::IncreaseExceedsRemaining { .. }
                | TradeSimError::DecreaseExceedsUsed { .. }
                | TradeSimError::InvalidPrice { .. }
                | TradeSimError::PriceLocked { .. }
        )
    }

    /// True for errors raised by broken internal state rather than bad input.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            TradeSimError::EmptyOpenPosition
                | TradeSimError::PositionAlreadyExited { .. }
                | TradeSimError::PositionNotOpen
                | TradeSimError::Lock { .. }
                | TradeSimError::AlreadyEntered
                | TradeSimError::NotEntered
        )
    }
}

impl From<&TradeSimError> for std::process::ExitCode {
    fn from(err: &TradeSimError) -> Self {
        let code: u8 = match err {
            TradeSimError::Io(_) => 1,
            TradeSimError::ConfigParse { .. }
            | TradeSimError::ConfigMissing { .. }
            | TradeSimError::ConfigInvalid { .. }
            | TradeSimError::UnknownAction { .. }
            | TradeSimError::UnregisteredAction { .. } => 2,
            TradeSimError::Data { .. } | TradeSimError::Database { .. } => 3,
            TradeSimError::EmptyBarRange { .. }
            | TradeSimError::NonMonotonicExit { .. }
            | TradeSimError::SymbolMismatch { .. }
            | TradeSimError::InvalidSize { .. }
            | TradeSimError::IncreaseExceedsRemaining { .. }
            | TradeSimError::DecreaseExceedsUsed { .. }
            | TradeSimError::InvalidPrice { .. }
            | TradeSimError::PriceLocked { .. } => 4,
            TradeSimError::Lock { .. }
            | TradeSimError::EmptyOpenPosition
            | TradeSimError::PositionAlreadyExited { .. }
            | TradeSimError::PositionNotOpen
            | TradeSimError::AlreadyEntered
            | TradeSimError::NotEntered => 5,
        };
        std::process::ExitCode::from(code)
    }
}
