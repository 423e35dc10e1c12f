//! CSV file adapter: candles, setups, overrides and result export.
//!
//! Candle files come from different exchanges with different header names, so
//! columns are resolved once from the header into a [`CandleColumns`] mapping.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::StringRecord;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::adapters::memory_adapter::{MemoryCandles, MemoryOverrides};
use crate::domain::action::ActionConfig;
use crate::domain::candle::Candle;
use crate::domain::error::TradeSimError;
use crate::domain::evaluator::EvaluationResult;
use crate::domain::setup::{Setup, Side};
use crate::ports::override_port::OverrideField;

const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Epoch values above this are taken as milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, TradeSimError> {
    let raw = raw.trim();
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        let n: i64 = raw.parse().map_err(|_| invalid_timestamp(raw))?;
        let dt = if n > EPOCH_MILLIS_THRESHOLD {
            DateTime::from_timestamp_millis(n)
        } else {
            DateTime::from_timestamp(n, 0)
        };
        return dt.map(|d| d.naive_utc()).ok_or_else(|| invalid_timestamp(raw));
    }
    for fmt in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(ts);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| invalid_timestamp(raw))
}

fn invalid_timestamp(raw: &str) -> TradeSimError {
    TradeSimError::Data {
        reason: format!("invalid timestamp '{raw}'"),
    }
}

fn csv_error(path: &Path, e: csv::Error) -> TradeSimError {
    let reason = format!("{}: {e}", path.display());
    match e.kind() {
        csv::ErrorKind::Io(io) => TradeSimError::Io(std::io::Error::new(io.kind(), reason)),
        _ => TradeSimError::Data { reason },
    }
}

/// Column positions of the candle fields in one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandleColumns {
    pub timestamp: usize,
    pub open: usize,
    pub high: usize,
    pub low: usize,
    pub close: usize,
    pub volume: Option<usize>,
}

impl CandleColumns {
    pub fn from_headers(headers: &StringRecord) -> Result<Self, TradeSimError> {
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.contains(&h.trim().to_lowercase().as_str()))
        };
        let require = |names: &[&str]| {
            find(names).ok_or_else(|| TradeSimError::Data {
                reason: format!("missing {} column", names[0]),
            })
        };
        Ok(CandleColumns {
            timestamp: require(&["timestamp", "date", "time", "datetime", "open_time"])?,
            open: require(&["open", "o"])?,
            high: require(&["high", "h"])?,
            low: require(&["low", "l"])?,
            close: require(&["close", "c"])?,
            volume: find(&["volume", "v", "vol"]),
        })
    }

    pub fn read(&self, record: &StringRecord) -> Result<Candle, TradeSimError> {
        let field = |idx: usize, name: &str| {
            record.get(idx).ok_or_else(|| TradeSimError::Data {
                reason: format!("missing {name} value"),
            })
        };
        let number = |idx: usize, name: &str| -> Result<f64, TradeSimError> {
            let raw = field(idx, name)?;
            raw.trim().parse().map_err(|e| TradeSimError::Data {
                reason: format!("invalid {name} value '{raw}': {e}"),
            })
        };
        let candle = Candle {
            timestamp: parse_timestamp(field(self.timestamp, "timestamp")?)?,
            open: number(self.open, "open")?,
            high: number(self.high, "high")?,
            low: number(self.low, "low")?,
            close: number(self.close, "close")?,
            volume: match self.volume {
                Some(idx) => number(idx, "volume")?,
                None => 0.0,
            },
        };
        if candle.low > candle.high {
            return Err(TradeSimError::Data {
                reason: format!("low above high at {}", candle.timestamp),
            });
        }
        Ok(candle)
    }
}

#[derive(Debug, Deserialize)]
struct SetupRow {
    id: u64,
    symbol: String,
    side: String,
    timestamp: String,
    price: f64,
    target: f64,
    stop: f64,
    size: f64,
    #[serde(default)]
    actions: String,
}

impl SetupRow {
    fn into_setup(self) -> Result<Setup, TradeSimError> {
        let actions = self
            .actions
            .split(';')
            .filter(|a| !a.trim().is_empty())
            .map(str::parse::<ActionConfig>)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Setup {
            id: self.id,
            symbol: self.symbol.trim().to_string(),
            side: self.side.parse::<Side>()?,
            timestamp: parse_timestamp(&self.timestamp)?,
            price: self.price,
            target: self.target,
            stop: self.stop,
            size: self.size,
            actions,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OverrideRow {
    setup_id: u64,
    field: String,
    timestamp: String,
    value: f64,
}

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn resolve(&self, file: impl AsRef<Path>) -> PathBuf {
        self.base_path.join(file)
    }

    fn reader(&self, file: &str) -> Result<(PathBuf, csv::Reader<std::fs::File>), TradeSimError> {
        let path = self.resolve(file);
        let rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&path)
            .map_err(|e| csv_error(&path, e))?;
        Ok((path, rdr))
    }

    pub fn load_candles(&self, file: &str, symbol: &str) -> Result<MemoryCandles, TradeSimError> {
        let (path, mut rdr) = self.reader(file)?;
        let headers = rdr.headers().map_err(|e| csv_error(&path, e))?.clone();
        let columns = CandleColumns::from_headers(&headers)?;

        let mut candles = Vec::new();
        for result in rdr.records() {
            let record = result.map_err(|e| csv_error(&path, e))?;
            candles.push(columns.read(&record)?);
        }
        Ok(MemoryCandles::new(symbol, candles))
    }

    pub fn load_setups(&self, file: &str) -> Result<Vec<Setup>, TradeSimError> {
        let (path, mut rdr) = self.reader(file)?;
        let mut setups = Vec::new();
        for row in rdr.deserialize::<SetupRow>() {
            setups.push(row.map_err(|e| csv_error(&path, e))?.into_setup()?);
        }
        Ok(setups)
    }

    pub fn load_overrides(&self, file: &str) -> Result<MemoryOverrides, TradeSimError> {
        let (path, mut rdr) = self.reader(file)?;
        let mut overrides = MemoryOverrides::default();
        for row in rdr.deserialize::<OverrideRow>() {
            let row = row.map_err(|e| csv_error(&path, e))?;
            overrides.insert(
                row.setup_id,
                row.field.parse::<OverrideField>()?,
                parse_timestamp(&row.timestamp)?,
                row.value,
            );
        }
        Ok(overrides)
    }

    pub fn write_results(
        &self,
        file: impl AsRef<Path>,
        results: &[EvaluationResult],
    ) -> Result<(), TradeSimError> {
        let path = self.resolve(file);
        let mut wtr = csv::Writer::from_path(&path).map_err(|e| csv_error(&path, e))?;
        for result in results {
            wtr.serialize(result).map_err(|e| csv_error(&path, e))?;
        }
        wtr.flush()?;
        Ok(())
    }
}
