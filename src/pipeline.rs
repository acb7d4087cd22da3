use crate::db::{self, DbPool};
use crate::errors::{EngineError, EngineResult};
use crate::feeds::yahoo::{MarketBar, MarketDataClient};
use crate::risk;
use crate::state::{RiskResult, SimulationRun};
use chrono::NaiveDate;
use rand::Rng;

/// Canonical ticker form: trimmed, upper-case, limited to characters tickers use.
pub fn normalize_symbol(raw: &str) -> EngineResult<String> {
    let symbol = raw.trim().to_ascii_uppercase();
    let valid = !symbol.is_empty()
        && symbol.len() <= 16
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='));
    if !valid {
        return Err(EngineError::InvalidInput(format!("bad ticker symbol {raw:?}")));
    }
    Ok(symbol)
}

/// Download daily history for `ticker` and store it, replacing any previous copy.
pub async fn ingest_ticker(
    db: &DbPool,
    client: &MarketDataClient,
    ticker: &str,
    start: NaiveDate,
) -> EngineResult<usize> {
    tracing::info!(symbol = %ticker, %start, "downloading market data");
    let data = client.fetch_daily(ticker, start).await?;
    store_market_data(db, ticker, data.name.as_deref(), &data.bars)
}

/// Register the asset if needed and swap in `bars` as its full history.
pub fn store_market_data(
    db: &DbPool,
    ticker: &str,
    name: Option<&str>,
    bars: &[MarketBar],
) -> EngineResult<usize> {
    if bars.is_empty() {
        return Err(EngineError::Feed(format!("no data for {ticker}")));
    }

    let existing = db::find_asset(db, ticker)?;
    let asset_id = db::upsert_asset(db, ticker, name)?;
    match existing {
        Some(_) => tracing::info!(symbol = %ticker, asset_id, "asset exists, refreshing prices"),
        None => tracing::info!(symbol = %ticker, asset_id, "registered new asset"),
    }

    let rows = db::replace_market_data(db, asset_id, bars)?;
    tracing::info!(symbol = %ticker, rows, "market data saved");
    Ok(rows)
}

/// A persisted risk result and its row id.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoredRun {
    pub id: i64,
    pub result: RiskResult,
}

/// Load the stored history, run the Monte Carlo engine and persist the result.
pub fn run_simulation<R: Rng + ?Sized>(
    db: &DbPool,
    symbol: &str,
    run: &SimulationRun,
    rng: &mut R,
) -> EngineResult<StoredRun> {
    tracing::info!(
        symbol = %symbol,
        days_ahead = run.days_ahead,
        paths = run.path_count,
        "starting monte carlo simulation"
    );

    let (asset_id, series) = db::load_price_series(db, symbol)?;
    if series.is_empty() {
        return Err(EngineError::InsufficientData(format!(
            "{symbol}: no stored prices, ingest market data first"
        )));
    }

    let result = risk::simulate(&series, run, rng)?;
    tracing::info!(
        symbol = %symbol,
        days_ahead = run.days_ahead,
        var_95 = result.var_95,
        var_99 = result.var_99,
        es_95 = result.expected_shortfall_95,
        "risk results"
    );

    let id = db::insert_simulation_result(db, asset_id, &result)?;
    Ok(StoredRun { id, result })
}
