//! Lockable, audited price values.
//!
//! A [`PriceReference`] holds one mutable price (entry, target or stop). Every
//! successful change is appended to an audit trail. While locked, only a
//! forced change may move the value, and forced changes are tagged as such.
//! The live-order collaborator locks a reference while an order is in flight
//! and registers a [`PriceListener`] to resend orders when a price moves; the
//! backtest never installs a listener.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::TradeSimError;

/// Who is modifying a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifierRole {
    Position,
    TradeAction,
    LiveOrder,
    /// Historical override replay. Replay writes are never allowed to lock.
    Replay,
}

/// Roles permitted to take a lock.
pub const LOCK_WHITELIST: [ModifierRole; 3] = [
    ModifierRole::Position,
    ModifierRole::TradeAction,
    ModifierRole::LiveOrder,
];

impl ModifierRole {
    pub fn may_lock(self) -> bool {
        LOCK_WHITELIST.contains(&self)
    }
}

impl fmt::Display for ModifierRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModifierRole::Position => "position",
            ModifierRole::TradeAction => "trade_action",
            ModifierRole::LiveOrder => "live_order",
            ModifierRole::Replay => "replay",
        };
        f.write_str(name)
    }
}

/// Opaque lock identity: a role plus an id unique within that role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockOwner {
    pub role: ModifierRole,
    pub id: u64,
}

impl LockOwner {
    pub fn new(role: ModifierRole, id: u64) -> Self {
        Self { role, id }
    }
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.role, self.id)
    }
}

/// One audit-trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChange {
    pub timestamp: NaiveDateTime,
    pub previous: f64,
    pub new: f64,
    pub reason: String,
    pub forced: bool,
}

/// Change notification hook.
pub trait PriceListener {
    fn on_change(&mut self, change: &PriceChange);
}

/// Single-use permission to skip the next listener notification.
///
/// Held inside the reference and consumed by the next successful `set`,
/// whichever caller makes it.
#[derive(Debug, PartialEq, Eq)]
pub struct NotifyBypass(());

pub struct PriceReference {
    value: f64,
    owner: Option<LockOwner>,
    history: Vec<PriceChange>,
    listener: Option<Box<dyn PriceListener>>,
    bypass: Option<NotifyBypass>,
}

impl fmt::Debug for PriceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriceReference")
            .field("value", &self.value)
            .field("owner", &self.owner)
            .field("history", &self.history.len())
            .field("listener", &self.listener.is_some())
            .field("bypass", &self.bypass.is_some())
            .finish()
    }
}

impl PriceReference {
    pub fn new(value: f64) -> Self {
        PriceReference {
            value,
            owner: None,
            history: Vec::new(),
            listener: None,
            bypass: None,
        }
    }

    pub fn with_listener(value: f64, listener: Box<dyn PriceListener>) -> Self {
        PriceReference {
            listener: Some(listener),
            ..PriceReference::new(value)
        }
    }

    pub fn set_listener(&mut self, listener: Box<dyn PriceListener>) {
        self.listener = Some(listener);
    }

    pub fn get(&self) -> f64 {
        self.value
    }

    pub fn owner(&self) -> Option<LockOwner> {
        self.owner
    }

    pub fn is_locked(&self) -> bool {
        self.owner.is_some()
    }

    pub fn history(&self) -> &[PriceChange] {
        &self.history
    }

    /// Arm the one-shot bypass: the next successful `set` will not notify.
    pub fn skip_next_notification(&mut self) {
        self.bypass = Some(NotifyBypass(()));
    }

    pub fn set(
        &mut self,
        value: f64,
        timestamp: NaiveDateTime,
        reason: &str,
        force: bool,
    ) -> Result<(), TradeSimError> {
        if !value.is_finite() {
            return Err(TradeSimError::InvalidPrice {
                price: value,
                reason: format!("non-finite value ({reason})"),
            });
        }
        if let Some(owner) = self.owner {
            if !force {
                return Err(TradeSimError::PriceLocked {
                    owner: owner.to_string(),
                    attempted: value,
                    reason: reason.to_string(),
                });
            }
        }

        let change = PriceChange {
            timestamp,
            previous: self.value,
            new: value,
            reason: reason.to_string(),
            forced: force && self.owner.is_some(),
        };
        self.value = value;

        let bypassed = self.bypass.take().is_some();
        if !bypassed {
            if let Some(listener) = self.listener.as_mut() {
                listener.on_change(&change);
            }
        }
        self.history.push(change);
        Ok(())
    }

    pub fn lock(&mut self, owner: LockOwner) -> Result<(), TradeSimError> {
        if !owner.role.may_lock() {
            return Err(TradeSimError::Lock {
                reason: format!("{} may not lock prices", owner.role),
            });
        }
        match self.owner {
            Some(current) if current != owner => Err(TradeSimError::Lock {
                reason: format!("already locked by {current}, {owner} cannot lock"),
            }),
            _ => {
                self.owner = Some(owner);
                Ok(())
            }
        }
    }

    pub fn unlock(&mut self, owner: LockOwner) -> Result<(), TradeSimError> {
        if !owner.role.may_lock() {
            return Err(TradeSimError::Lock {
                reason: format!("{} may not unlock prices", owner.role),
            });
        }
        match self.owner {
            Some(current) if current == owner => {
                self.owner = None;
                Ok(())
            }
            Some(current) => Err(TradeSimError::Lock {
                reason: format!("locked by {current}, {owner} cannot unlock"),
            }),
            None => Err(TradeSimError::Lock {
                reason: format!("{owner} cannot unlock an unlocked price"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn position_owner() -> LockOwner {
        LockOwner::new(ModifierRole::Position, 1)
    }

    struct Recorder(Rc<RefCell<Vec<f64>>>);

    impl PriceListener for Recorder {
        fn on_change(&mut self, change: &PriceChange) {
            self.0.borrow_mut().push(change.new);
        }
    }

    #[test]
    fn set_updates_value_and_history() {
        let mut price = PriceReference::new(100.0);
        price.set(101.5, ts(), "adjust", false).unwrap();

        assert_eq!(price.get(), 101.5);
        assert_eq!(price.history().len(), 1);
        let change = &price.history()[0];
        assert_eq!(change.previous, 100.0);
        assert_eq!(change.new, 101.5);
        assert_eq!(change.reason, "adjust");
        assert!(!change.forced);
    }

    #[test]
    fn set_on_locked_reference_without_force_fails() {
        let mut price = PriceReference::new(100.0);
        price.lock(position_owner()).unwrap();

        let err = price.set(90.0, ts(), "move", false).unwrap_err();
        assert!(matches!(err, TradeSimError::PriceLocked { .. }));
        assert_eq!(price.get(), 100.0);
        assert!(price.history().is_empty());
    }

    #[test]
    fn forced_set_on_locked_reference_is_tagged() {
        let mut price = PriceReference::new(100.0);
        price.lock(position_owner()).unwrap();

        price.set(90.0, ts(), "correction", true).unwrap();
        assert_eq!(price.get(), 90.0);
        assert!(price.history()[0].forced);
        assert!(price.is_locked());
    }

    #[test]
    fn non_finite_value_is_rejected() {
        let mut price = PriceReference::new(100.0);
        assert!(price.set(f64::NAN, ts(), "bad", false).is_err());
        assert!(price.set(f64::INFINITY, ts(), "bad", true).is_err());
        assert_eq!(price.get(), 100.0);
    }

    #[test]
    fn lock_by_other_owner_fails() {
        let mut price = PriceReference::new(1.0);
        price.lock(position_owner()).unwrap();
        let other = LockOwner::new(ModifierRole::LiveOrder, 7);
        assert!(price.lock(other).is_err());
        assert_eq!(price.owner(), Some(position_owner()));
    }

    #[test]
    fn relock_by_same_owner_is_idempotent() {
        let mut price = PriceReference::new(1.0);
        price.lock(position_owner()).unwrap();
        price.lock(position_owner()).unwrap();
        assert!(price.is_locked());
    }

    #[test]
    fn only_locking_owner_may_unlock() {
        let mut price = PriceReference::new(1.0);
        price.lock(position_owner()).unwrap();

        let other = LockOwner::new(ModifierRole::Position, 2);
        assert!(price.unlock(other).is_err());
        assert!(price.is_locked());

        price.unlock(position_owner()).unwrap();
        assert!(!price.is_locked());
    }

    #[test]
    fn unlocking_unlocked_price_fails() {
        let mut price = PriceReference::new(1.0);
        assert!(price.unlock(position_owner()).is_err());
    }

    #[test]
    fn replay_role_is_not_whitelisted() {
        let mut price = PriceReference::new(1.0);
        let replay = LockOwner::new(ModifierRole::Replay, 0);
        assert!(price.lock(replay).is_err());
        assert!(!price.is_locked());
    }

    #[test]
    fn listener_sees_every_change() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut price = PriceReference::with_listener(10.0, Box::new(Recorder(seen.clone())));

        price.set(11.0, ts(), "a", false).unwrap();
        price.set(12.0, ts(), "b", false).unwrap();
        assert_eq!(*seen.borrow(), vec![11.0, 12.0]);
    }

    #[test]
    fn bypass_token_skips_exactly_one_notification() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut price = PriceReference::new(10.0);
        price.set_listener(Box::new(Recorder(seen.clone())));

        price.skip_next_notification();
        price.set(11.0, ts(), "confirmed fill", false).unwrap();
        price.set(12.0, ts(), "user move", false).unwrap();

        assert_eq!(*seen.borrow(), vec![12.0]);
        assert_eq!(price.history().len(), 2);
    }

    #[test]
    fn failed_set_does_not_consume_bypass() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut price = PriceReference::with_listener(10.0, Box::new(Recorder(seen.clone())));
        price.lock(position_owner()).unwrap();
        price.skip_next_notification();

        assert!(price.set(11.0, ts(), "blocked", false).is_err());
        price.set(11.0, ts(), "forced", true).unwrap();
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn owner_display() {
        assert_eq!(position_owner().to_string(), "position#1");
    }
}
