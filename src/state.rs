use crate::config::AppConfig;
use crate::db::DbPool;
use crate::errors::{EngineError, EngineResult};
use crate::feeds::yahoo::MarketDataClient;
use chrono::{DateTime, Utc};
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

// ── Core domain types ──

/// One closing price observation. Stack-allocated, Copy.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
}

impl PricePoint {
    pub fn new(timestamp: DateTime<Utc>, close: f64) -> Self {
        Self { timestamp, close }
    }
}

/// Chronologically ordered closing prices for a single instrument.
/// Timestamps are strictly increasing; the constructor rejects anything else.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PriceSeries {
    instrument: String,
    points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new(instrument: impl Into<String>, points: Vec<PricePoint>) -> EngineResult<Self> {
        let instrument = instrument.into();
        for pair in points.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(EngineError::InvalidInput(format!(
                    "{instrument}: price timestamps not strictly increasing at {}",
                    pair[1].timestamp.to_rfc3339()
                )));
            }
        }
        Ok(Self { instrument, points })
    }

    #[inline]
    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    #[inline]
    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn closes(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.close)
    }
}

/// Invocation parameters for one Monte Carlo run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SimulationRun {
    pub days_ahead: usize,
    pub path_count: usize,
}

impl SimulationRun {
    pub fn new(days_ahead: usize, path_count: usize) -> EngineResult<Self> {
        let run = Self { days_ahead, path_count };
        run.validate()?;
        Ok(run)
    }

    /// Percentiles need at least two samples; a horizon needs at least one step.
    pub fn validate(&self) -> EngineResult<()> {
        if self.days_ahead == 0 {
            return Err(EngineError::InvalidInput("days_ahead must be positive".into()));
        }
        if self.path_count < 2 {
            return Err(EngineError::InvalidInput(format!(
                "path_count must be at least 2, got {}",
                self.path_count
            )));
        }
        Ok(())
    }
}

/// Output of one simulation. Loss figures are in the price series' currency units.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RiskResult {
    pub instrument: String,
    pub run_timestamp: DateTime<Utc>,
    pub days_ahead: usize,
    pub path_count: usize,
    pub var_95: f64,
    pub var_99: f64,
    pub expected_shortfall_95: f64,
}

impl RiskResult {
    /// Human-readable reading of VaR95, as shown next to the figures in the dashboard.
    pub fn interpretation(&self) -> String {
        format!(
            "With 95% confidence, the loss over {} days will not exceed ${:.2} per share.",
            self.days_ahead, self.var_95
        )
    }
}

// ── Messages OUT of the service (dashboard notifications) ──

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    #[serde(rename = "ingest_completed")]
    IngestCompleted {
        symbol: String,
        rows: usize,
        timestamp: String,
    },

    #[serde(rename = "simulation_completed")]
    SimulationCompleted {
        symbol: String,
        days_ahead: usize,
        path_count: usize,
        var_95: f64,
        var_99: f64,
        expected_shortfall: f64,
        interpretation: String,
        timestamp: String,
    },
}

// ── Performance Counters (lock-free) ──

pub struct PerfCounters {
    pub ingests_completed: AtomicU64,
    pub simulations_run: AtomicU64,
    pub requests_failed: AtomicU64,
    pub ws_messages_sent: AtomicU64,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self {
            ingests_completed: AtomicU64::new(0),
            simulations_run: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            ws_messages_sent: AtomicU64::new(0),
        }
    }
}

impl Default for PerfCounters {
    fn default() -> Self {
        Self::new()
    }
}

// ── Application shared state ──

pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub feed: MarketDataClient,

    // Service -> Dashboard: event stream (broadcast for WS clients)
    pub ws_tx: broadcast::Sender<WsMessage>,

    pub counters: PerfCounters,
}

impl AppState {
    pub fn new(config: AppConfig, db: DbPool, feed: MarketDataClient) -> Arc<Self> {
        let (ws_tx, _) = broadcast::channel(256);

        Arc::new(Self {
            config,
            db,
            feed,
            ws_tx,
            counters: PerfCounters::new(),
        })
    }

    #[inline]
    pub fn broadcast(&self, msg: WsMessage) {
        self.counters.ws_messages_sent.fetch_add(1, Ordering::Relaxed);
        let _ = self.ws_tx.send(msg);
    }
}
