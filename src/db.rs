use crate::errors::{EngineError, EngineResult};
use crate::feeds::yahoo::MarketBar;
use crate::state::{PricePoint, PriceSeries, RiskResult};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub type DbPool = Arc<Mutex<Connection>>;

pub fn init_db(data_dir: &Path) -> EngineResult<DbPool> {
    std::fs::create_dir_all(data_dir).map_err(|e| EngineError::Database(format!("create dir: {e}")))?;
    let db_path = data_dir.join("financial_risk.db");
    let conn = Connection::open(&db_path)?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA cache_size=-64000;")?;

    let pool = open_connection(conn)?;
    tracing::info!("database initialized at {}", db_path.display());
    Ok(pool)
}

/// Apply the schema to an already-open connection (file or in-memory).
pub fn open_connection(conn: Connection) -> EngineResult<DbPool> {
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    let schema = include_str!("../migrations/001_init.sql");
    conn.execute_batch(schema)?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn lock(db: &DbPool) -> EngineResult<MutexGuard<'_, Connection>> {
    db.lock().map_err(|e| EngineError::Database(format!("lock poisoned: {e}")))
}

fn parse_timestamp(raw: &str) -> EngineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::Database(format!("bad timestamp {raw:?}: {e}")))
}

// ── Assets ──

/// Register `symbol` if new and return its id. A known name is never erased.
pub fn upsert_asset(db: &DbPool, symbol: &str, name: Option<&str>) -> EngineResult<i64> {
    let conn = lock(db)?;
    conn.execute(
        "INSERT INTO assets (symbol, name) VALUES (?1, ?2)
         ON CONFLICT(symbol) DO UPDATE SET name = COALESCE(excluded.name, assets.name)",
        rusqlite::params![symbol, name],
    )?;
    let id = conn.query_row(
        "SELECT id FROM assets WHERE symbol = ?1",
        rusqlite::params![symbol],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn find_asset(db: &DbPool, symbol: &str) -> EngineResult<Option<AssetRow>> {
    let conn = lock(db)?;
    let row = conn
        .query_row(
            "SELECT a.id, a.symbol, a.name, COUNT(m.id)
             FROM assets a LEFT JOIN market_data m ON m.asset_id = a.id
             WHERE a.symbol = ?1
             GROUP BY a.id",
            rusqlite::params![symbol],
            asset_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn list_assets(db: &DbPool) -> EngineResult<Vec<AssetRow>> {
    let conn = lock(db)?;
    let mut stmt = conn.prepare(
        "SELECT a.id, a.symbol, a.name, COUNT(m.id)
         FROM assets a LEFT JOIN market_data m ON m.asset_id = a.id
         GROUP BY a.id
         ORDER BY a.symbol",
    )?;
    let rows = stmt.query_map([], asset_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn asset_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AssetRow> {
    Ok(AssetRow {
        id: row.get(0)?,
        symbol: row.get(1)?,
        name: row.get(2)?,
        price_count: row.get(3)?,
    })
}

// ── Market data ──

/// Replace the whole price history of an asset in one transaction.
pub fn replace_market_data(db: &DbPool, asset_id: i64, bars: &[MarketBar]) -> EngineResult<usize> {
    let mut conn = lock(db)?;
    let tx = conn.transaction()?;

    let removed = tx.execute("DELETE FROM market_data WHERE asset_id = ?1", rusqlite::params![asset_id])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO market_data (asset_id, date, close, volume) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for bar in bars {
            stmt.execute(rusqlite::params![asset_id, bar.date.to_rfc3339(), bar.close, bar.volume])?;
        }
    }
    tx.commit()?;

    tracing::debug!(asset_id, removed, inserted = bars.len(), "market data replaced");
    Ok(bars.len())
}

/// Full ascending closing-price history for `symbol`, ready for the risk engine.
pub fn load_price_series(db: &DbPool, symbol: &str) -> EngineResult<(i64, PriceSeries)> {
    let conn = lock(db)?;
    let asset_id: i64 = conn
        .query_row(
            "SELECT id FROM assets WHERE symbol = ?1",
            rusqlite::params![symbol],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| EngineError::UnknownInstrument(symbol.to_string()))?;

    let mut stmt = conn.prepare("SELECT date, close FROM market_data WHERE asset_id = ?1 ORDER BY date")?;
    let raw = stmt
        .query_map(rusqlite::params![asset_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let points = raw
        .iter()
        .map(|(date, close)| Ok(PricePoint::new(parse_timestamp(date)?, *close)))
        .collect::<EngineResult<Vec<_>>>()?;

    Ok((asset_id, PriceSeries::new(symbol, points)?))
}

/// Most recent `limit` bars, returned oldest first (chart order).
pub fn get_price_history(db: &DbPool, symbol: &str, limit: usize) -> EngineResult<Vec<PriceRow>> {
    let conn = lock(db)?;
    let mut stmt = conn.prepare(
        "SELECT m.date, m.close, m.volume
         FROM market_data m JOIN assets a ON a.id = m.asset_id
         WHERE a.symbol = ?1
         ORDER BY m.date DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(rusqlite::params![symbol, limit as i64], |row| {
        Ok(PriceRow {
            date: row.get(0)?,
            close: row.get(1)?,
            volume: row.get(2)?,
        })
    })?;
    let mut history = rows.collect::<Result<Vec<_>, _>>()?;
    history.reverse();
    Ok(history)
}

// ── Simulation results ──

pub fn insert_simulation_result(db: &DbPool, asset_id: i64, result: &RiskResult) -> EngineResult<i64> {
    let conn = lock(db)?;
    conn.execute(
        "INSERT INTO simulation_results (asset_id, run_date, days_ahead, path_count, var_95, var_99, expected_shortfall)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            asset_id,
            result.run_timestamp.to_rfc3339(),
            result.days_ahead as i64,
            result.path_count as i64,
            result.var_95,
            result.var_99,
            result.expected_shortfall_95,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn latest_simulation_result(db: &DbPool, symbol: &str) -> EngineResult<Option<SimulationRow>> {
    Ok(recent_simulation_results(db, symbol, 1)?.into_iter().next())
}

/// Newest first.
pub fn recent_simulation_results(db: &DbPool, symbol: &str, limit: usize) -> EngineResult<Vec<SimulationRow>> {
    let conn = lock(db)?;
    let mut stmt = conn.prepare(
        "SELECT s.id, a.symbol, s.run_date, s.days_ahead, s.path_count, s.var_95, s.var_99, s.expected_shortfall
         FROM simulation_results s JOIN assets a ON a.id = s.asset_id
         WHERE a.symbol = ?1
         ORDER BY s.run_date DESC, s.id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(rusqlite::params![symbol, limit as i64], |row| {
        Ok(SimulationRow {
            id: row.get(0)?,
            symbol: row.get(1)?,
            run_date: row.get(2)?,
            days_ahead: row.get(3)?,
            path_count: row.get(4)?,
            var_95: row.get(5)?,
            var_99: row.get(6)?,
            expected_shortfall: row.get(7)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

// ── Row types ──

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AssetRow {
    pub id: i64,
    pub symbol: String,
    pub name: Option<String>,
    pub price_count: i64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PriceRow {
    pub date: String,
    pub close: f64,
    pub volume: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SimulationRow {
    pub id: i64,
    pub symbol: String,
    pub run_date: String,
    pub days_ahead: i64,
    pub path_count: i64,
    pub var_95: f64,
    pub var_99: f64,
    pub expected_shortfall: f64,
}
