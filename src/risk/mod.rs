pub mod aggregate;
pub mod estimator;
pub mod paths;

use crate::errors::EngineResult;
use crate::state::{PriceSeries, RiskResult, SimulationRun};
use chrono::{DateTime, Utc};
use rand::Rng;

/// Run the full estimate -> simulate -> aggregate pipeline for one instrument.
///
/// Pure over its arguments: the caller owns the RNG, so concurrent runs never
/// share random state and a fixed seed reproduces the result exactly.
pub fn simulate<R: Rng + ?Sized>(
    series: &PriceSeries,
    run: &SimulationRun,
    rng: &mut R,
) -> EngineResult<RiskResult> {
    simulate_at(series, run, rng, Utc::now())
}

/// Same as [`simulate`] with a caller-supplied run timestamp.
pub fn simulate_at<R: Rng + ?Sized>(
    series: &PriceSeries,
    run: &SimulationRun,
    rng: &mut R,
    run_timestamp: DateTime<Utc>,
) -> EngineResult<RiskResult> {
    run.validate()?;

    let stats = estimator::estimate(series)?;
    tracing::info!(
        symbol = %series.instrument(),
        mu = stats.mu,
        sigma = stats.sigma,
        last_price = stats.last_price,
        "return statistics estimated"
    );

    let terminal = paths::simulate_terminal_prices(&stats, run, rng)?;
    let tail = aggregate::aggregate(terminal, stats.last_price)?;

    Ok(RiskResult {
        instrument: series.instrument().to_string(),
        run_timestamp,
        days_ahead: run.days_ahead,
        path_count: run.path_count,
        var_95: tail.var_95,
        var_99: tail.var_99,
        expected_shortfall_95: tail.expected_shortfall_95,
    })
}
