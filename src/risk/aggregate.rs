use crate::errors::{EngineError, EngineResult};

/// Percentile of the terminal distribution used for VaR95 and the ES tail.
pub const PERCENTILE_95: f64 = 5.0;
/// Percentile of the terminal distribution used for VaR99.
pub const PERCENTILE_99: f64 = 1.0;

/// Tail-risk figures in currency units, measured against the last observed price.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct TailRisk {
    pub var_95: f64,
    pub var_99: f64,
    pub expected_shortfall_95: f64,
}

/// Reduce a terminal-price distribution to VaR95, VaR99 and ES95.
///
/// ES95 averages every terminal price at or below the 5th percentile
/// (boundary ties included). If floating-point effects leave that tail empty
/// it falls back to VaR95, so `expected_shortfall_95 >= var_95` always holds.
pub fn aggregate(mut terminal: Vec<f64>, last_price: f64) -> EngineResult<TailRisk> {
    if terminal.len() < 2 {
        return Err(EngineError::InvalidInput(format!(
            "need at least 2 terminal prices for percentiles, got {}",
            terminal.len()
        )));
    }
    if let Some(bad) = terminal.iter().find(|p| !p.is_finite()) {
        return Err(EngineError::InvalidInput(format!("non-finite terminal price {bad}")));
    }

    terminal.sort_unstable_by(f64::total_cmp);

    let p5 = percentile_sorted(&terminal, PERCENTILE_95);
    let p1 = percentile_sorted(&terminal, PERCENTILE_99);

    let var_95 = last_price - p5;
    let var_99 = last_price - p1;

    // Sorted, so the tail is a prefix.
    let tail_len = terminal.partition_point(|&p| p <= p5);
    let expected_shortfall_95 = if tail_len == 0 {
        var_95
    } else {
        let tail_mean = terminal[..tail_len].iter().sum::<f64>() / tail_len as f64;
        last_price - tail_mean
    };

    Ok(TailRisk { var_95, var_99, expected_shortfall_95 })
}

/// Linear-interpolation percentile over ascending data.
/// Rank `k = q/100 * (n - 1)`, interpolated between `floor(k)` and `ceil(k)`.
pub fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    let rank = (q / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = (rank.ceil() as usize).min(n - 1);
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
