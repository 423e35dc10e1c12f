//! SQLite candle and override store.
//!
//! Timestamps are stored as `%Y-%m-%d %H:%M:%S` text so that lexical order is
//! time order.

use crate::domain::candle::Candle;
use crate::domain::error::TradeSimError;
use crate::ports::candle_port::CandleSource;
use crate::ports::config_port::ConfigPort;
use crate::ports::override_port::{OverrideField, OverrideSource};
use chrono::NaiveDateTime;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, params};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn fmt_ts(ts: NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn db_err(e: impl std::fmt::Display) -> TradeSimError {
    TradeSimError::Database {
        reason: e.to_string(),
    }
}

fn candle_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Candle> {
    let ts_str: String = row.get(0)?;
    let timestamp = NaiveDateTime::parse_from_str(&ts_str, TS_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Candle {
        timestamp,
        open: row.get(1)?,
        high: row.get(2)?,
        low: row.get(3)?,
        close: row.get(4)?,
        volume: row.get(5)?,
    })
}

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, TradeSimError> {
        let db_path =
            config
                .get_string("sqlite", "path")
                .ok_or_else(|| TradeSimError::ConfigMissing {
                    section: "sqlite".into(),
                    key: "path".into(),
                })?;

        let pool_size = config.get_int("sqlite", "pool_size", 4).max(1) as u32;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(db_err)?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, TradeSimError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(db_err)?;
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, TradeSimError> {
        self.pool.get().map_err(db_err)
    }

    pub fn initialize_schema(&self) -> Result<(), TradeSimError> {
        self.conn()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS candles (
                    symbol TEXT NOT NULL,
                    ts TEXT NOT NULL,
                    open REAL NOT NULL,
                    high REAL NOT NULL,
                    low REAL NOT NULL,
                    close REAL NOT NULL,
                    volume REAL NOT NULL,
                    PRIMARY KEY (symbol, ts)
                );
                CREATE TABLE IF NOT EXISTS overrides (
                    setup_id INTEGER NOT NULL,
                    field TEXT NOT NULL,
                    ts TEXT NOT NULL,
                    value REAL NOT NULL,
                    PRIMARY KEY (setup_id, field, ts)
                );",
            )
            .map_err(db_err)
    }

    pub fn insert_candles(&self, symbol: &str, candles: &[Candle]) -> Result<(), TradeSimError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        for c in candles {
            tx.execute(
                "INSERT OR REPLACE INTO candles (symbol, ts, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    symbol,
                    fmt_ts(c.timestamp),
                    c.open,
                    c.high,
                    c.low,
                    c.close,
                    c.volume
                ],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)
    }

    pub fn insert_override(
        &self,
        setup_id: u64,
        field: OverrideField,
        ts: NaiveDateTime,
        value: f64,
    ) -> Result<(), TradeSimError> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO overrides (setup_id, field, ts, value)
                 VALUES (?1, ?2, ?3, ?4)",
                params![setup_id as i64, field.to_string(), fmt_ts(ts), value],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Candle view for one symbol.
    pub fn candles(&self, symbol: impl Into<String>) -> SqliteCandles<'_> {
        SqliteCandles {
            adapter: self,
            symbol: symbol.into(),
        }
    }

    fn query_candles(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Candle>, TradeSimError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt.query_map(params, candle_from_row).map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }
}

impl OverrideSource for SqliteAdapter {
    fn value_at(
        &self,
        setup_id: u64,
        field: OverrideField,
        ts: NaiveDateTime,
    ) -> Result<Option<f64>, TradeSimError> {
        self.conn()?
            .query_row(
                "SELECT value FROM overrides
                 WHERE setup_id = ?1 AND field = ?2 AND ts <= ?3
                 ORDER BY ts DESC LIMIT 1",
                params![setup_id as i64, field.to_string(), fmt_ts(ts)],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)
    }
}

pub struct SqliteCandles<'a> {
    adapter: &'a SqliteAdapter,
    symbol: String,
}

impl CandleSource for SqliteCandles<'_> {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Candle>, TradeSimError> {
        self.adapter.query_candles(
            "SELECT ts, open, high, low, close, volume FROM candles
             WHERE symbol = ?1 AND ts >= ?2 AND ts <= ?3
             ORDER BY ts ASC",
            params![self.symbol, fmt_ts(start), fmt_ts(end)],
        )
    }

    fn since(&self, start: NaiveDateTime, limit: usize) -> Result<Vec<Candle>, TradeSimError> {
        self.adapter.query_candles(
            "SELECT ts, open, high, low, close, volume FROM candles
             WHERE symbol = ?1 AND ts >= ?2
             ORDER BY ts ASC LIMIT ?3",
            params![self.symbol, fmt_ts(start), limit as i64],
        )
    }

    fn next_after(&self, ts: NaiveDateTime) -> Result<Option<Candle>, TradeSimError> {
        let mut found = self.adapter.query_candles(
            "SELECT ts, open, high, low, close, volume FROM candles
             WHERE symbol = ?1 AND ts > ?2
             ORDER BY ts ASC LIMIT 1",
            params![self.symbol, fmt_ts(ts)],
        )?;
        Ok(found.pop())
    }
}
