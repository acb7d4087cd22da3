use crate::errors::{EngineError, EngineResult};
use crate::risk::estimator::ReturnStatistics;
use crate::state::SimulationRun;
use rand::distributions::Distribution;
use rand::Rng;
use statrs::distribution::Normal;

/// Discrete-time GBM terminal prices.
///
/// Every path sums `days_ahead` i.i.d. `Normal(mu, sigma)` daily log returns and
/// the terminal price is `last_price * exp(sum)`. mu and sigma stay constant
/// over the whole horizon.
///
/// With `sigma == 0` there is nothing to sample: every path lands on
/// `last_price * exp(mu * days_ahead)` and the RNG is left untouched.
pub fn simulate_terminal_prices<R: Rng + ?Sized>(
    stats: &ReturnStatistics,
    run: &SimulationRun,
    rng: &mut R,
) -> EngineResult<Vec<f64>> {
    run.validate()?;
    check_stats(stats)?;

    if stats.sigma == 0.0 {
        let terminal = stats.last_price * (stats.mu * run.days_ahead as f64).exp();
        return Ok(vec![terminal; run.path_count]);
    }

    let shock = Normal::new(stats.mu, stats.sigma)
        .map_err(|e| EngineError::InvalidInput(format!("normal({}, {}): {e}", stats.mu, stats.sigma)))?;

    let mut terminal = Vec::with_capacity(run.path_count);
    for _ in 0..run.path_count {
        let mut cumulative = 0.0;
        for _ in 0..run.days_ahead {
            cumulative += shock.sample(rng);
        }
        terminal.push(stats.last_price * cumulative.exp());
    }

    Ok(terminal)
}

fn check_stats(stats: &ReturnStatistics) -> EngineResult<()> {
    if !stats.mu.is_finite() {
        return Err(EngineError::InvalidInput(format!("mu must be finite, got {}", stats.mu)));
    }
    if !(stats.sigma.is_finite() && stats.sigma >= 0.0) {
        return Err(EngineError::InvalidInput(format!(
            "sigma must be finite and non-negative, got {}",
            stats.sigma
        )));
    }
    if !(stats.last_price.is_finite() && stats.last_price > 0.0) {
        return Err(EngineError::InvalidInput(format!(
            "last price must be positive, got {}",
            stats.last_price
        )));
    }
    Ok(())
}
