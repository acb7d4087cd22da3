use crate::errors::{EngineError, EngineResult};
use crate::state::PriceSeries;
use statrs::statistics::Statistics;

/// Drift and dispersion of daily log returns, plus the anchor price for simulation.
/// Recomputed on every run, never stored.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ReturnStatistics {
    pub mu: f64,
    pub sigma: f64,
    pub last_price: f64,
}

/// Estimate (mu, sigma, last_price) from an ordered price series.
///
/// `sigma` is the sample standard deviation of the log returns (divisor `n - 2`
/// for `n` prices). Every entry counts as one time step regardless of calendar gaps.
pub fn estimate(series: &PriceSeries) -> EngineResult<ReturnStatistics> {
    if let Some(bad) = series.closes().find(|p| !(p.is_finite() && *p > 0.0)) {
        return Err(EngineError::InvalidInput(format!(
            "{}: price must be positive and finite, got {bad}",
            series.instrument()
        )));
    }

    let returns = log_returns(series);
    if returns.len() < 2 {
        return Err(EngineError::InsufficientData(format!(
            "{}: {} prices yield {} log returns, need at least 2",
            series.instrument(),
            series.len(),
            returns.len()
        )));
    }

    let last_price = series
        .points()
        .last()
        .map(|p| p.close)
        .ok_or_else(|| EngineError::InsufficientData(series.instrument().to_string()))?;

    // Identical returns: report an exact zero sigma so the simulator collapses cleanly.
    let first = returns[0];
    if returns.iter().all(|&r| r == first) {
        return Ok(ReturnStatistics { mu: first, sigma: 0.0, last_price });
    }

    let mu = returns.iter().mean();
    let sigma = returns.iter().std_dev();

    if !mu.is_finite() || !sigma.is_finite() {
        return Err(EngineError::InvalidInput(format!(
            "{}: non-finite return statistics (mu={mu}, sigma={sigma})",
            series.instrument()
        )));
    }

    Ok(ReturnStatistics { mu, sigma, last_price })
}

/// `ln(p_i / p_{i-1})` for consecutive closes.
pub fn log_returns(series: &PriceSeries) -> Vec<f64> {
    series
        .points()
        .windows(2)
        .map(|w| (w[1].close / w[0].close).ln())
        .collect()
}
