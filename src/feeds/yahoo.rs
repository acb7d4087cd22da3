use crate::errors::{EngineError, EngineResult};
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;

/// One normalized daily bar.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct MarketBar {
    /// Trading day, at UTC midnight.
    pub date: DateTime<Utc>,
    pub close: f64,
    pub volume: Option<i64>,
}

/// Download result: display name (if the feed has one) plus ascending bars.
#[derive(Debug, Clone)]
pub struct ChartData {
    pub name: Option<String>,
    pub bars: Vec<MarketBar>,
}

/// Yahoo Finance v8 chart client for daily closing prices.
#[derive(Clone)]
pub struct MarketDataClient {
    client: Client,
    base_url: String,
}

impl MarketDataClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(std::time::Duration::from_secs(5))
                .timeout(std::time::Duration::from_secs(15))
                .user_agent("Mozilla/5.0 (compatible; risk_sim/0.1)")
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Daily bars for `ticker` from `start` up to now.
    pub async fn fetch_daily(&self, ticker: &str, start: NaiveDate) -> EngineResult<ChartData> {
        let period1 = start
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(0);
        let period2 = Utc::now().timestamp();
        let url = format!(
            "{}/v8/finance/chart/{ticker}?period1={period1}&period2={period2}&interval=1d&events=history",
            self.base_url
        );

        tracing::debug!(%url, "requesting daily chart");
        let resp = self.client.get(&url).send().await?;

        let status = resp.status();
        let body = resp.text().await?;
        check_status(ticker, status, &body)?;

        let data = parse_chart(&body)?;
        if data.bars.is_empty() {
            return Err(EngineError::Feed(format!("no data for {ticker}")));
        }
        Ok(data)
    }
}

/// Map a non-success response to a feed error.
///
/// Yahoo reports unknown symbols as 404 with a JSON error body; that message
/// is preferred over the bare status line.
pub fn check_status(ticker: &str, status: reqwest::StatusCode, body: &str) -> EngineResult<()> {
    if status.is_success() {
        return Ok(());
    }
    if let Err(e @ EngineError::Feed(_)) = parse_chart(body) {
        return Err(e);
    }
    Err(EngineError::Feed(format!("{ticker}: HTTP {status}")))
}

// Response shape (fields we use):
// {
//   "chart": {
//     "result": [{
//       "meta": { "symbol": "AAPL", "longName": "Apple Inc.", "shortName": "Apple Inc." },
//       "timestamp": [1514903400, ...],
//       "indicators": { "quote": [{ "close": [43.06, null, ...], "volume": [102223600, ...] }] }
//     }],
//     "error": null
//   }
// }

#[derive(serde::Deserialize)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(serde::Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(serde::Deserialize)]
struct ChartError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(serde::Deserialize)]
struct ChartResult {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Option<Indicators>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    long_name: Option<String>,
    short_name: Option<String>,
}

#[derive(serde::Deserialize)]
struct Indicators {
    quote: Option<Vec<Quote>>,
}

#[derive(serde::Deserialize)]
struct Quote {
    close: Option<Vec<Option<f64>>>,
    volume: Option<Vec<Option<i64>>>,
}

/// Parse and normalize a chart response body.
///
/// Rows with a missing or non-positive close are skipped. Output is sorted by
/// date with one bar per trading day (the later row wins).
pub fn parse_chart(body: &str) -> EngineResult<ChartData> {
    let resp: ChartResponse = serde_json::from_str(body)?;

    if let Some(err) = resp.chart.error {
        return Err(EngineError::Feed(format!(
            "{}: {}",
            err.code.unwrap_or_else(|| "error".into()),
            err.description.unwrap_or_default()
        )));
    }

    let result = resp
        .chart
        .result
        .and_then(|mut r| if r.is_empty() { None } else { Some(r.swap_remove(0)) })
        .ok_or_else(|| EngineError::Feed("empty chart result".into()))?;

    let name = result.meta.and_then(|m| m.long_name.or(m.short_name));
    let timestamps = result.timestamp.unwrap_or_default();
    let quote = result
        .indicators
        .and_then(|i| i.quote)
        .and_then(|mut q| if q.is_empty() { None } else { Some(q.swap_remove(0)) });
    let (closes, volumes) = match quote {
        Some(q) => (q.close.unwrap_or_default(), q.volume.unwrap_or_default()),
        None => (Vec::new(), Vec::new()),
    };

    let mut bars: Vec<MarketBar> = timestamps
        .iter()
        .enumerate()
        .filter_map(|(i, &ts)| {
            let close = closes.get(i).copied().flatten()?;
            if !(close.is_finite() && close > 0.0) {
                return None;
            }
            let date = DateTime::from_timestamp(ts, 0)?
                .date_naive()
                .and_hms_opt(0, 0, 0)?
                .and_utc();
            let volume = volumes.get(i).copied().flatten();
            Some(MarketBar { date, close, volume })
        })
        .collect();

    bars.sort_by_key(|b| b.date);
    // Keep the last row for each day.
    bars.reverse();
    bars.dedup_by_key(|b| b.date);
    bars.reverse();

    Ok(ChartData { name, bars })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE: &str = r#"{
        "chart": {
            "result": [{
                "meta": { "symbol": "AAPL", "longName": "Apple Inc.", "shortName": "Apple" },
                "timestamp": [1704292200, 1704205800, 1704378600, 1704465000],
                "indicators": { "quote": [{
                    "close": [184.25, 185.64, null, 181.18],
                    "volume": [58414500, 82488700, 71983600, null]
                }] }
            }],
            "error": null
        }
    }"#;

    #[test]
    fn test_parse_sorts_and_skips_nulls() {
        let data = parse_chart(SAMPLE).unwrap();
        assert_eq!(data.name.as_deref(), Some("Apple Inc."));
        assert_eq!(data.bars.len(), 3);

        assert_eq!(data.bars[0].date, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        assert_eq!(data.bars[0].close, 185.64);
        assert_eq!(data.bars[1].close, 184.25);
        assert_eq!(data.bars[2].close, 181.18);
        assert_eq!(data.bars[2].volume, None);
        assert!(data.bars.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn test_duplicate_days_keep_latest_row() {
        let body = r#"{"chart":{"result":[{
            "timestamp":[1704205800, 1704225600],
            "indicators":{"quote":[{"close":[100.0, 101.5],"volume":[10, 20]}]}
        }],"error":null}}"#;
        let data = parse_chart(body).unwrap();
        assert_eq!(data.bars.len(), 1);
        assert_eq!(data.bars[0].close, 101.5);
        assert_eq!(data.name, None);
    }

    #[test]
    fn test_non_positive_close_skipped() {
        let body = r#"{"chart":{"result":[{
            "timestamp":[1704205800, 1704292200],
            "indicators":{"quote":[{"close":[0.0, 12.0]}]}
        }],"error":null}}"#;
        let data = parse_chart(body).unwrap();
        assert_eq!(data.bars.len(), 1);
        assert_eq!(data.bars[0].close, 12.0);
    }

    #[test]
    fn test_api_error_reported() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        match parse_chart(body) {
            Err(EngineError::Feed(msg)) => assert!(msg.contains("Not Found"), "{msg}"),
            other => panic!("expected feed error, got {other:?}"),
        }
    }

    #[test]
    fn test_garbage_is_parse_error() {
        assert!(matches!(parse_chart("<html>"), Err(EngineError::Parse(_))));
    }

    #[test]
    fn test_error_status_uses_json_error_body() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        match check_status("ZZZZ", reqwest::StatusCode::NOT_FOUND, body) {
            Err(EngineError::Feed(msg)) => {
                assert!(msg.contains("No data found"), "{msg}");
                assert!(!msg.contains("HTTP"), "{msg}");
            }
            other => panic!("expected feed error, got {other:?}"),
        }
    }

    #[test]
    fn test_error_status_without_json_body() {
        match check_status("AAPL", reqwest::StatusCode::TOO_MANY_REQUESTS, "Too Many Requests") {
            Err(EngineError::Feed(msg)) => {
                assert!(msg.starts_with("AAPL: HTTP 429"), "{msg}");
            }
            other => panic!("expected feed error, got {other:?}"),
        }
        // A JSON body without an error object still falls back to the status.
        assert!(matches!(
            check_status("AAPL", reqwest::StatusCode::BAD_GATEWAY, SAMPLE),
            Err(EngineError::Feed(msg)) if msg.contains("HTTP 502")
        ));
    }

    #[test]
    fn test_success_status_passes() {
        assert!(check_status("AAPL", reqwest::StatusCode::OK, SAMPLE).is_ok());
    }
}
