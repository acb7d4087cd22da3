use crate::config;
use crate::db;
use crate::errors::{EngineError, EngineResult};
use crate::pipeline::{self, StoredRun};
use crate::state::{AppState, WsMessage};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use portable_atomic::Ordering;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

type ApiResponse = (StatusCode, Json<serde_json::Value>);

#[derive(serde::Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct IngestRequest {
    /// `YYYY-MM-DD`; defaults to the configured history start.
    pub start_date: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct SimulationRequest {
    pub days_ahead: Option<usize>,
    pub path_count: Option<usize>,
    pub seed: Option<u64>,
}

fn status_for(e: &EngineError) -> StatusCode {
    match e {
        EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        EngineError::InsufficientData(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::UnknownInstrument(_) => StatusCode::NOT_FOUND,
        EngineError::Feed(_) | EngineError::Network(_) | EngineError::Parse(_) => StatusCode::BAD_GATEWAY,
        EngineError::Database(_) | EngineError::Config(_) | EngineError::Task(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Request bodies are optional: no body means all defaults. A malformed body
/// is reported through the usual error envelope.
fn body_or_default<T: Default>(body: Result<Option<Json<T>>, JsonRejection>) -> EngineResult<T> {
    match body {
        Ok(Some(Json(req))) => Ok(req),
        Ok(None) => Ok(T::default()),
        Err(rejection) => Err(EngineError::InvalidInput(rejection.body_text())),
    }
}

fn respond(state: &AppState, result: EngineResult<serde_json::Value>) -> ApiResponse {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(e) => {
            state.counters.requests_failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, "request failed");
            (status_for(&e), Json(serde_json::json!({ "error": e.to_string() })))
        }
    }
}

/// GET /api/assets
pub async fn get_assets(State(state): State<Arc<AppState>>) -> ApiResponse {
    let result = db::list_assets(&state.db).map(|assets| serde_json::json!({ "assets": assets }));
    respond(&state, result)
}

/// GET /api/assets/{symbol}/prices -- closing-price history for the chart
pub async fn get_prices(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(params): Query<LimitQuery>,
) -> ApiResponse {
    let limit = params.limit.unwrap_or(5000).min(20_000);
    let result = pipeline::normalize_symbol(&symbol).and_then(|symbol| {
        let prices = db::get_price_history(&state.db, &symbol, limit)?;
        Ok(serde_json::json!({ "symbol": symbol, "prices": prices }))
    });
    respond(&state, result)
}

/// POST /api/assets/{symbol}/ingest -- download (or refresh) daily history
pub async fn post_ingest(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    body: Result<Option<Json<IngestRequest>>, JsonRejection>,
) -> ApiResponse {
    let result = match body_or_default(body) {
        Ok(req) => ingest(&state, &symbol, req).await,
        Err(e) => Err(e),
    };
    respond(&state, result)
}

async fn ingest(state: &Arc<AppState>, raw_symbol: &str, req: IngestRequest) -> EngineResult<serde_json::Value> {
    let symbol = pipeline::normalize_symbol(raw_symbol)?;
    let start = match req.start_date.as_deref() {
        Some(raw) => config::parse_date(raw).map_err(|e| EngineError::InvalidInput(e.to_string()))?,
        None => state.config.history_start_date,
    };

    let rows = pipeline::ingest_ticker(&state.db, &state.feed, &symbol, start).await?;
    state.counters.ingests_completed.fetch_add(1, Ordering::Relaxed);
    state.broadcast(WsMessage::IngestCompleted {
        symbol: symbol.clone(),
        rows,
        timestamp: chrono::Utc::now().to_rfc3339(),
    });

    Ok(serde_json::json!({ "symbol": symbol, "rows": rows }))
}

/// POST /api/assets/{symbol}/simulations -- run and store a Monte Carlo simulation
pub async fn post_simulation(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    body: Result<Option<Json<SimulationRequest>>, JsonRejection>,
) -> ApiResponse {
    let result = match body_or_default(body) {
        Ok(req) => simulate(&state, &symbol, req).await,
        Err(e) => Err(e),
    };
    respond(&state, result)
}

async fn simulate(state: &Arc<AppState>, raw_symbol: &str, req: SimulationRequest) -> EngineResult<serde_json::Value> {
    let symbol = pipeline::normalize_symbol(raw_symbol)?;
    let run = state.config.validate_run(req.days_ahead, req.path_count)?;
    let seed = req.seed.or(state.config.rng_seed);

    // CPU-bound: keep it off the async workers. Each run owns its RNG.
    let db = state.db.clone();
    let task_symbol = symbol.clone();
    let StoredRun { id, result } = tokio::task::spawn_blocking(move || {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        pipeline::run_simulation(&db, &task_symbol, &run, &mut rng)
    })
    .await??;

    state.counters.simulations_run.fetch_add(1, Ordering::Relaxed);
    let interpretation = result.interpretation();
    state.broadcast(WsMessage::SimulationCompleted {
        symbol,
        days_ahead: result.days_ahead,
        path_count: result.path_count,
        var_95: result.var_95,
        var_99: result.var_99,
        expected_shortfall: result.expected_shortfall_95,
        interpretation: interpretation.clone(),
        timestamp: result.run_timestamp.to_rfc3339(),
    });

    Ok(serde_json::json!({
        "id": id,
        "result": result,
        "interpretation": interpretation,
    }))
}

/// GET /api/assets/{symbol}/simulations -- stored runs, newest first
pub async fn get_simulations(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(params): Query<LimitQuery>,
) -> ApiResponse {
    let limit = params.limit.unwrap_or(50).min(500);
    let result = pipeline::normalize_symbol(&symbol).and_then(|symbol| {
        let runs = db::recent_simulation_results(&state.db, &symbol, limit)?;
        Ok(serde_json::json!({ "symbol": symbol, "simulations": runs }))
    });
    respond(&state, result)
}

/// GET /api/assets/{symbol}/simulations/latest
pub async fn get_latest_simulation(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> ApiResponse {
    let result = pipeline::normalize_symbol(&symbol).and_then(|symbol| {
        db::latest_simulation_result(&state.db, &symbol)?
            .map(|row| serde_json::json!({ "simulation": row }))
            .ok_or_else(|| EngineError::UnknownInstrument(format!("{symbol}: no simulation results")))
    });
    respond(&state, result)
}

/// GET /api/counters -- performance counters (lock-free reads)
pub async fn get_counters(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    use portable_atomic::Ordering::Relaxed;
    Json(serde_json::json!({
        "ingests_completed": state.counters.ingests_completed.load(Relaxed),
        "simulations_run": state.counters.simulations_run.load(Relaxed),
        "requests_failed": state.counters.requests_failed.load(Relaxed),
        "ws_messages_sent": state.counters.ws_messages_sent.load(Relaxed),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::feeds::yahoo::{MarketBar, MarketDataClient};
    use chrono::{Duration, TimeZone, Utc};
    use rusqlite::Connection;
    use serde_json::Value;

    /// Serve the full router over an in-memory database on an ephemeral port.
    /// The feed points at a closed local port so downloads fail fast.
    async fn spawn_app(prices: &[(&str, &[f64])]) -> String {
        let db = db::open_connection(Connection::open_in_memory().unwrap()).unwrap();
        let start = Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap();
        for (symbol, closes) in prices {
            let bars: Vec<MarketBar> = closes
                .iter()
                .enumerate()
                .map(|(i, &close)| MarketBar { date: start + Duration::days(i as i64), close, volume: None })
                .collect();
            pipeline::store_market_data(&db, symbol, None, &bars).unwrap();
        }

        let config = AppConfig {
            default_days_ahead: 30,
            default_path_count: 200,
            rng_seed: Some(7),
            ..AppConfig::default()
        };
        let state = AppState::new(config, db, MarketDataClient::new("http://127.0.0.1:1"));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, crate::server::router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn read(resp: reqwest::Response) -> (u16, Value) {
        let status = resp.status().as_u16();
        let body = resp.json::<Value>().await.unwrap();
        (status, body)
    }

    const HISTORY: &[f64] = &[100.0, 102.0, 101.0, 105.0, 103.0, 104.0, 99.0, 101.5];

    #[tokio::test]
    async fn test_simulation_without_body_uses_config_defaults() {
        let base = spawn_app(&[("TEST", HISTORY)]).await;
        let client = reqwest::Client::new();
        let url = format!("{base}/api/assets/test/simulations");

        let (status, first) = read(client.post(&url).send().await.unwrap()).await;
        assert_eq!(status, 200, "{first}");
        assert_eq!(first["result"]["instrument"], "TEST");
        assert_eq!(first["result"]["days_ahead"], 30);
        assert_eq!(first["result"]["path_count"], 200);
        assert!(first["interpretation"].as_str().unwrap().contains("30 days"));

        // Configured seed makes bodyless runs reproducible.
        let (_, second) = read(client.post(&url).send().await.unwrap()).await;
        assert_eq!(first["result"]["var_95"], second["result"]["var_95"]);
        assert_ne!(first["id"], second["id"]);

        let (status, latest) =
            read(client.get(format!("{url}/latest")).send().await.unwrap()).await;
        assert_eq!(status, 200);
        assert_eq!(latest["simulation"]["id"], second["id"]);
    }

    #[tokio::test]
    async fn test_simulation_body_overrides_and_bounds() {
        let base = spawn_app(&[("TEST", HISTORY)]).await;
        let client = reqwest::Client::new();
        let url = format!("{base}/api/assets/TEST/simulations");

        let resp = client
            .post(&url)
            .json(&serde_json::json!({ "days_ahead": 60, "path_count": 500, "seed": 3 }))
            .send()
            .await
            .unwrap();
        let (status, body) = read(resp).await;
        assert_eq!(status, 200, "{body}");
        assert_eq!(body["result"]["days_ahead"], 60);
        assert_eq!(body["result"]["path_count"], 500);

        let resp = client.post(&url).json(&serde_json::json!({ "days_ahead": 5 })).send().await.unwrap();
        let (status, body) = read(resp).await;
        assert_eq!(status, 400);
        assert!(body["error"].as_str().unwrap().contains("days_ahead"), "{body}");
    }

    #[tokio::test]
    async fn test_malformed_body_reported_as_json_error() {
        let base = spawn_app(&[("TEST", HISTORY)]).await;
        let client = reqwest::Client::new();
        let url = format!("{base}/api/assets/TEST/simulations");

        let resp = client
            .post(&url)
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        let (status, body) = read(resp).await;
        assert_eq!(status, 400);
        assert!(body["error"].is_string(), "{body}");

        let resp = client.post(&url).header("content-type", "text/plain").body("x").send().await.unwrap();
        let (status, body) = read(resp).await;
        assert_eq!(status, 400);
        assert!(body["error"].is_string(), "{body}");
    }

    #[tokio::test]
    async fn test_error_envelope_statuses() {
        let base = spawn_app(&[("ONE", &[42.0])]).await;
        let client = reqwest::Client::new();

        let (status, body) =
            read(client.post(format!("{base}/api/assets/NOPE/simulations")).send().await.unwrap()).await;
        assert_eq!(status, 404);
        assert!(body["error"].as_str().unwrap().contains("NOPE"), "{body}");

        let (status, body) =
            read(client.post(format!("{base}/api/assets/ONE/simulations")).send().await.unwrap()).await;
        assert_eq!(status, 422);
        assert!(body["error"].is_string(), "{body}");

        let (status, body) =
            read(client.get(format!("{base}/api/assets/ONE/simulations/latest")).send().await.unwrap()).await;
        assert_eq!(status, 404);
        assert!(body["error"].is_string(), "{body}");

        let (status, body) =
            read(client.get(format!("{base}/api/assets/bad%20sym/prices")).send().await.unwrap()).await;
        assert_eq!(status, 400);
        assert!(body["error"].is_string(), "{body}");
    }

    #[tokio::test]
    async fn test_ingest_without_body_reaches_feed() {
        let base = spawn_app(&[]).await;
        let client = reqwest::Client::new();

        // No body: the configured start date is used and the (unreachable) feed is called.
        let (status, body) =
            read(client.post(format!("{base}/api/assets/AAPL/ingest")).send().await.unwrap()).await;
        assert_eq!(status, 502, "{body}");
        assert!(body["error"].is_string(), "{body}");

        let resp = client
            .post(format!("{base}/api/assets/AAPL/ingest"))
            .json(&serde_json::json!({ "start_date": "yesterday" }))
            .send()
            .await
            .unwrap();
        let (status, body) = read(resp).await;
        assert_eq!(status, 400);
        assert!(body["error"].is_string(), "{body}");

        let (status, counters) = read(client.get(format!("{base}/api/counters")).send().await.unwrap()).await;
        assert_eq!(status, 200);
        assert_eq!(counters["requests_failed"], 2);
        assert_eq!(counters["ingests_completed"], 0);
    }

    #[tokio::test]
    async fn test_assets_and_prices_listing() {
        let base = spawn_app(&[("TEST", HISTORY)]).await;
        let client = reqwest::Client::new();

        let (status, body) = read(client.get(format!("{base}/api/assets")).send().await.unwrap()).await;
        assert_eq!(status, 200);
        assert_eq!(body["assets"][0]["symbol"], "TEST");
        assert_eq!(body["assets"][0]["price_count"], HISTORY.len());

        let (status, body) =
            read(client.get(format!("{base}/api/assets/TEST/prices?limit=3")).send().await.unwrap()).await;
        assert_eq!(status, 200);
        assert_eq!(body["prices"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&EngineError::InvalidInput("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&EngineError::InsufficientData("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_for(&EngineError::UnknownInstrument("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&EngineError::Feed("x".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(&EngineError::Database("x".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_simulation_request_fields_optional() {
        let req: SimulationRequest = serde_json::from_str("{}").unwrap();
        assert!(req.days_ahead.is_none() && req.path_count.is_none() && req.seed.is_none());

        let req: SimulationRequest =
            serde_json::from_str(r#"{"days_ahead": 30, "path_count": 500, "seed": 7}"#).unwrap();
        assert_eq!(req.days_ahead, Some(30));
        assert_eq!(req.path_count, Some(500));
        assert_eq!(req.seed, Some(7));
    }
}
