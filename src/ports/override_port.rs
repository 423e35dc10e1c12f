//! Historical price overrides ("save points").

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::error::TradeSimError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideField {
    Entry,
    Target,
    Stop,
}

impl fmt::Display for OverrideField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideField::Entry => write!(f, "entry"),
            OverrideField::Target => write!(f, "target"),
            OverrideField::Stop => write!(f, "stop"),
        }
    }
}

impl FromStr for OverrideField {
    type Err = TradeSimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "entry" | "price" => Ok(OverrideField::Entry),
            "target" | "exit" => Ok(OverrideField::Target),
            "stop" => Ok(OverrideField::Stop),
            other => Err(TradeSimError::Data {
                reason: format!("unknown override field '{other}'"),
            }),
        }
    }
}

pub trait OverrideSource {
    /// Most recent recorded value for `field` of `setup_id` at or before `ts`.
    fn value_at(
        &self,
        setup_id: u64,
        field: OverrideField,
        ts: NaiveDateTime,
    ) -> Result<Option<f64>, TradeSimError>;
}
