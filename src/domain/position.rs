//! Lot-level position accounting.
//!
//! Sizes are proportional: a position can use at most [`MAX_SIZE`] units, split
//! between `used_size` (committed) and `remaining_size` (available). The asset
//! amount is what the committed size bought. Realised profit is folded into a
//! running `pnl` accumulator, which also shifts the break-even price.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::error::TradeSimError;
use super::price_reference::{LockOwner, PriceReference};
use super::setup::Side;

pub const MAX_SIZE: f64 = 100.0;

/// Sizes closer than this are treated as equal.
const SIZE_DUST: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Increase,
    Decrease,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub kind: TransactionKind,
    pub price: f64,
    pub size: f64,
}

#[derive(Debug)]
pub struct Position {
    side: Side,
    owner: LockOwner,
    used_size: f64,
    remaining_size: f64,
    asset_amount: f64,
    pnl: f64,
    transactions: Vec<Transaction>,
    entry_price: PriceReference,
    exit_price: PriceReference,
    stop_price: PriceReference,
    is_open: bool,
    is_closed: bool,
    is_stopped: bool,
    entry_time: NaiveDateTime,
    exit_time: Option<NaiveDateTime>,
    exit_roi: Option<f64>,
    relative_exit_roi: Option<f64>,
}

impl Position {
    /// Open a position with its first lot at the entry price.
    ///
    /// The entry price is locked to `owner` for the lifetime of the position.
    pub fn new(
        side: Side,
        size: f64,
        entry_time: NaiveDateTime,
        mut entry_price: PriceReference,
        exit_price: PriceReference,
        stop_price: PriceReference,
        owner: LockOwner,
    ) -> Result<Self, TradeSimError> {
        validate_size(size)?;
        let entry = entry_price.get();
        validate_price(entry, "entry price must be positive")?;
        entry_price.lock(owner)?;

        let mut position = Position {
            side,
            owner,
            used_size: 0.0,
            remaining_size: MAX_SIZE,
            asset_amount: 0.0,
            pnl: 0.0,
            transactions: Vec::new(),
            entry_price,
            exit_price,
            stop_price,
            is_open: true,
            is_closed: false,
            is_stopped: false,
            entry_time,
            exit_time: None,
            exit_roi: None,
            relative_exit_roi: None,
        };
        position.increase_size(size, entry)?;
        Ok(position)
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn owner(&self) -> LockOwner {
        self.owner
    }

    pub fn used_size(&self) -> f64 {
        self.used_size
    }

    pub fn remaining_size(&self) -> f64 {
        self.remaining_size
    }

    pub fn asset_amount(&self) -> f64 {
        self.asset_amount
    }

    pub fn pnl(&self) -> f64 {
        self.pnl
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn entry_price(&self) -> &PriceReference {
        &self.entry_price
    }

    pub fn exit_price(&self) -> &PriceReference {
        &self.exit_price
    }

    pub fn stop_price(&self) -> &PriceReference {
        &self.stop_price
    }

    pub fn exit_price_mut(&mut self) -> &mut PriceReference {
        &mut self.exit_price
    }

    pub fn stop_price_mut(&mut self) -> &mut PriceReference {
        &mut self.stop_price
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed
    }

    pub fn is_stopped(&self) -> bool {
        self.is_stopped
    }

    pub fn is_exited(&self) -> bool {
        self.is_closed || self.is_stopped
    }

    pub fn entry_time(&self) -> NaiveDateTime {
        self.entry_time
    }

    pub fn exit_time(&self) -> Option<NaiveDateTime> {
        self.exit_time
    }

    /// ROI frozen at the closing price, set once by `close` or `stop`.
    pub fn exit_roi(&self) -> Option<f64> {
        self.exit_roi
    }

    pub fn relative_exit_roi(&self) -> Option<f64> {
        self.relative_exit_roi
    }

    /// The price the position left at: the exit price when closed, the stop
    /// price when stopped.
    pub fn closing_price(&self) -> Option<f64> {
        if self.is_stopped {
            Some(self.stop_price.get())
        } else if self.is_closed {
            Some(self.exit_price.get())
        } else {
            None
        }
    }

    pub fn increase_size(&mut self, size: f64, price: f64) -> Result<(), TradeSimError> {
        if !self.is_open {
            return Err(TradeSimError::PositionNotOpen);
        }
        validate_size(size)?;
        validate_price(price, "increase price must be positive")?;
        if size > self.remaining_size + SIZE_DUST {
            return Err(TradeSimError::IncreaseExceedsRemaining {
                requested: size,
                remaining: self.remaining_size,
            });
        }

        if self.used_size > 0.0 {
            // Mirror of decrease_size: pick the accumulator value from which a
            // decrease of the same lot at the same price would land back on
            // the current one.
            let ratio = self.asset_amount / self.used_size;
            let used_after = self.used_size + size;
            let sign = self.side.sign();
            self.pnl = (self.pnl - sign * size * (ratio * price - 1.0)) * used_after
                / (used_after + size);
        }

        self.asset_amount += size / price;
        self.used_size += size;
        self.remaining_size -= size;
        self.transactions.push(Transaction {
            kind: TransactionKind::Increase,
            price,
            size,
        });
        self.check_invariants()
    }

    pub fn decrease_size(&mut self, size: f64, price: f64) -> Result<(), TradeSimError> {
        if !self.is_open {
            return Err(TradeSimError::PositionNotOpen);
        }
        self.apply_decrease(size, price)
    }

    fn apply_decrease(&mut self, size: f64, price: f64) -> Result<(), TradeSimError> {
        validate_size(size)?;
        validate_fill_price(price, "decrease price must be non-negative")?;
        if size > self.used_size + SIZE_DUST {
            return Err(TradeSimError::DecreaseExceedsUsed {
                requested: size,
                used: self.used_size,
            });
        }

        let full = (self.used_size - size).abs() <= SIZE_DUST;
        let reduce = if full {
            self.asset_amount
        } else {
            self.asset_amount / self.used_size * size
        };
        let asset_after = self.asset_amount - reduce;
        if self.is_open && asset_after <= SIZE_DUST {
            return Err(TradeSimError::EmptyOpenPosition);
        }

        let break_even = self.break_even_price()?;
        self.pnl += self.side.sign() * (reduce * price - reduce * break_even);
        self.asset_amount = if full { 0.0 } else { asset_after };
        if full {
            self.used_size = 0.0;
            self.remaining_size = MAX_SIZE;
        } else {
            self.used_size -= size;
            self.remaining_size += size;
        }
        self.transactions.push(Transaction {
            kind: TransactionKind::Decrease,
            price,
            size,
        });
        self.check_invariants()
    }

    fn check_invariants(&self) -> Result<(), TradeSimError> {
        if self.is_open && self.asset_amount <= 0.0 {
            return Err(TradeSimError::EmptyOpenPosition);
        }
        Ok(())
    }

    /// Price at which closing everything leaves zero net P&L.
    pub fn break_even_price(&self) -> Result<f64, TradeSimError> {
        if self.used_size <= 0.0 || self.asset_amount <= 0.0 {
            return Err(TradeSimError::PositionNotOpen);
        }
        let break_even_roi =
            (self.used_size - (self.used_size + self.pnl)) * 100.0 / self.used_size;
        let base = self.used_size / self.asset_amount;
        Ok(match self.side {
            Side::Buy => base * (1.0 + break_even_roi / 100.0),
            Side::Sell => base * (1.0 - break_even_roi / 100.0),
        })
    }

    fn marked_pnl(&self, last_price: f64) -> f64 {
        // A zero price is a real quote: only the asset-value term vanishes.
        match self.side {
            Side::Buy if last_price == 0.0 => self.pnl - self.used_size,
            Side::Buy => self.asset_amount * last_price - self.used_size + self.pnl,
            Side::Sell if last_price == 0.0 => self.used_size + self.pnl,
            Side::Sell => self.used_size - self.asset_amount * last_price + self.pnl,
        }
    }

    /// Return on the committed size, in percent.
    pub fn roi(&self, last_price: f64) -> Result<f64, TradeSimError> {
        if !self.is_open {
            return Err(TradeSimError::PositionNotOpen);
        }
        Ok(self.marked_pnl(last_price) / self.used_size * 100.0)
    }

    /// Return on [`MAX_SIZE`], in percent.
    pub fn relative_roi(&self, last_price: f64) -> Result<f64, TradeSimError> {
        if !self.is_open {
            return Err(TradeSimError::PositionNotOpen);
        }
        Ok(self.marked_pnl(last_price) / MAX_SIZE * 100.0)
    }

    /// Inverse of [`Position::roi`]: the price at which `roi` equals `target_roi`.
    pub fn price_for_roi(&self, target_roi: f64) -> Result<f64, TradeSimError> {
        if !self.is_open {
            return Err(TradeSimError::PositionNotOpen);
        }
        let wanted = target_roi / 100.0 * self.used_size;
        Ok(match self.side {
            Side::Buy => (wanted + self.used_size - self.pnl) / self.asset_amount,
            Side::Sell => (self.used_size + self.pnl - wanted) / self.asset_amount,
        })
    }

    pub fn close(&mut self, exit_time: NaiveDateTime) -> Result<(), TradeSimError> {
        self.ensure_not_exited()?;
        let price = self.exit_price.get();
        validate_fill_price(price, "exit price must be non-negative")?;
        self.exit_price.lock(self.owner)?;
        self.finish(price, exit_time)?;
        self.is_closed = true;
        Ok(())
    }

    pub fn stop(&mut self, exit_time: NaiveDateTime) -> Result<(), TradeSimError> {
        self.ensure_not_exited()?;
        let price = self.stop_price.get();
        validate_fill_price(price, "stop price must be non-negative")?;
        self.stop_price.lock(self.owner)?;
        self.finish(price, exit_time)?;
        self.is_stopped = true;
        Ok(())
    }

    fn ensure_not_exited(&self) -> Result<(), TradeSimError> {
        if self.is_closed {
            return Err(TradeSimError::PositionAlreadyExited { state: "closed" });
        }
        if self.is_stopped {
            return Err(TradeSimError::PositionAlreadyExited { state: "stopped" });
        }
        if !self.is_open {
            return Err(TradeSimError::PositionNotOpen);
        }
        Ok(())
    }

    fn finish(&mut self, price: f64, exit_time: NaiveDateTime) -> Result<(), TradeSimError> {
        self.exit_roi = Some(self.roi(price)?);
        self.relative_exit_roi = Some(self.relative_roi(price)?);
        self.exit_time = Some(exit_time);
        self.is_open = false;
        let size = self.used_size;
        self.apply_decrease(size, price)
    }
}

/// Single-lot ROI of moving from `entry` to `price`, in percent.
pub fn price_roi(side: Side, entry: f64, price: f64) -> f64 {
    side.sign() * (price / entry - 1.0) * 100.0
}

fn validate_size(size: f64) -> Result<(), TradeSimError> {
    if !size.is_finite() || size <= 0.0 {
        return Err(TradeSimError::InvalidSize {
            size,
            reason: "size must be positive".into(),
        });
    }
    if size > MAX_SIZE + SIZE_DUST {
        return Err(TradeSimError::InvalidSize {
            size,
            reason: format!("size exceeds maximum of {MAX_SIZE}"),
        });
    }
    Ok(())
}

fn validate_price(price: f64, reason: &str) -> Result<(), TradeSimError> {
    if !price.is_finite() || price <= 0.0 {
        return Err(TradeSimError::InvalidPrice {
            price,
            reason: reason.to_string(),
        });
    }
    Ok(())
}

/// Zero is a valid fill; only entries and increases need a positive price.
fn validate_fill_price(price: f64, reason: &str) -> Result<(), TradeSimError> {
    if !price.is_finite() || price < 0.0 {
        return Err(TradeSimError::InvalidPrice {
            price,
            reason: reason.to_string(),
        });
    }
    Ok(())
}
