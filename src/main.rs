use risk_sim::config::AppConfig;
use risk_sim::feeds::yahoo::MarketDataClient;
use risk_sim::server;
use risk_sim::state::{AppState, WsMessage};
use risk_sim::{db, pipeline};
use portable_atomic::Ordering;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("risk simulator starting");

    let cfg = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };

    let db_pool = match db::init_db(&cfg.data_dir) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("database init error: {e}");
            std::process::exit(1);
        }
    };

    let feed = MarketDataClient::new(&cfg.market_data_base_url);
    let app_state = AppState::new(cfg.clone(), db_pool, feed);

    // Background ingestion of configured tickers
    if !cfg.startup_tickers.is_empty() {
        let ingest_state = app_state.clone();
        tokio::spawn(async move {
            ingest_startup_tickers(ingest_state).await;
        });
    }

    let app = server::router(app_state);

    let addr = format!("0.0.0.0:{}", cfg.server_port);
    tracing::info!("server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("bind error: {e}");
            std::process::exit(1);
        });

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {e}");
    }
}

/// Download each configured ticker once. Failures are logged and skipped.
async fn ingest_startup_tickers(state: Arc<AppState>) {
    for raw in &state.config.startup_tickers {
        let symbol = match pipeline::normalize_symbol(raw) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "skipping startup ticker");
                continue;
            }
        };

        match pipeline::ingest_ticker(&state.db, &state.feed, &symbol, state.config.history_start_date).await {
            Ok(rows) => {
                state.counters.ingests_completed.fetch_add(1, Ordering::Relaxed);
                state.broadcast(WsMessage::IngestCompleted {
                    symbol,
                    rows,
                    timestamp: chrono::Utc::now().to_rfc3339(),
                });
            }
            Err(e) => {
                state.counters.requests_failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(symbol = %symbol, error = %e, "startup ingest failed");
            }
        }
    }
}
