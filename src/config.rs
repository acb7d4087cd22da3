use crate::errors::{EngineError, EngineResult};
use crate::state::SimulationRun;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub server_port: u16,
    pub market_data_base_url: String,
    pub history_start_date: chrono::NaiveDate,
    pub default_days_ahead: usize,
    pub default_path_count: usize,
    pub min_days_ahead: usize,
    pub max_days_ahead: usize,
    pub min_path_count: usize,
    pub max_path_count: usize,
    /// Fixed seed for every run that does not bring its own. `None` = entropy.
    pub rng_seed: Option<u64>,
    /// Tickers downloaded once at startup.
    pub startup_tickers: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            server_port: 3001,
            market_data_base_url: "https://query1.finance.yahoo.com".to_string(),
            history_start_date: chrono::NaiveDate::from_ymd_opt(2018, 1, 1)
                .unwrap_or(chrono::NaiveDate::MIN),
            default_days_ahead: 252,
            default_path_count: 1000,
            min_days_ahead: 30,
            max_days_ahead: 2520,
            min_path_count: 100,
            max_path_count: 20_000,
            rng_seed: None,
            startup_tickers: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> EngineResult<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let history_start_date = match std::env::var("HISTORY_START_DATE") {
            Ok(raw) => parse_date(&raw)?,
            Err(_) => defaults.history_start_date,
        };

        let rng_seed = match std::env::var("RNG_SEED") {
            Ok(raw) => Some(
                raw.parse::<u64>()
                    .map_err(|e| EngineError::Config(format!("RNG_SEED: {e}")))?,
            ),
            Err(_) => None,
        };

        let cfg = Self {
            data_dir: PathBuf::from(env_var_or("DATA_DIR", "data")),
            server_port: parse_env("SERVER_PORT", "3001")?,
            market_data_base_url: env_var_or(
                "MARKET_DATA_BASE_URL",
                &defaults.market_data_base_url,
            ),
            history_start_date,
            default_days_ahead: parse_env("DEFAULT_DAYS_AHEAD", "252")?,
            default_path_count: parse_env("DEFAULT_PATH_COUNT", "1000")?,
            min_days_ahead: parse_env("MIN_DAYS_AHEAD", "30")?,
            max_days_ahead: parse_env("MAX_DAYS_AHEAD", "2520")?,
            min_path_count: parse_env("MIN_PATH_COUNT", "100")?,
            max_path_count: parse_env("MAX_PATH_COUNT", "20000")?,
            rng_seed,
            startup_tickers: parse_list(&env_var_or("STARTUP_TICKERS", "")),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Run bounds must be non-empty ranges that contain the defaults.
    pub fn validate(&self) -> EngineResult<()> {
        if self.min_days_ahead == 0 || self.min_days_ahead > self.max_days_ahead {
            return Err(EngineError::Config(format!(
                "MIN_DAYS_AHEAD/MAX_DAYS_AHEAD: bad range {}..={}",
                self.min_days_ahead, self.max_days_ahead
            )));
        }
        if self.min_path_count < 2 || self.min_path_count > self.max_path_count {
            return Err(EngineError::Config(format!(
                "MIN_PATH_COUNT/MAX_PATH_COUNT: bad range {}..={}",
                self.min_path_count, self.max_path_count
            )));
        }
        if !(self.min_days_ahead..=self.max_days_ahead).contains(&self.default_days_ahead) {
            return Err(EngineError::Config(format!(
                "DEFAULT_DAYS_AHEAD {} outside {}..={}",
                self.default_days_ahead, self.min_days_ahead, self.max_days_ahead
            )));
        }
        if !(self.min_path_count..=self.max_path_count).contains(&self.default_path_count) {
            return Err(EngineError::Config(format!(
                "DEFAULT_PATH_COUNT {} outside {}..={}",
                self.default_path_count, self.min_path_count, self.max_path_count
            )));
        }
        Ok(())
    }

    /// Resolve request overrides against the defaults and enforce the service bounds.
    pub fn validate_run(
        &self,
        days_ahead: Option<usize>,
        path_count: Option<usize>,
    ) -> EngineResult<SimulationRun> {
        let days = days_ahead.unwrap_or(self.default_days_ahead);
        let paths = path_count.unwrap_or(self.default_path_count);

        if !(self.min_days_ahead..=self.max_days_ahead).contains(&days) {
            return Err(EngineError::InvalidInput(format!(
                "days_ahead {days} outside {}..={}",
                self.min_days_ahead, self.max_days_ahead
            )));
        }
        if !(self.min_path_count..=self.max_path_count).contains(&paths) {
            return Err(EngineError::InvalidInput(format!(
                "path_count {paths} outside {}..={}",
                self.min_path_count, self.max_path_count
            )));
        }

        SimulationRun::new(days, paths)
    }
}

pub fn parse_date(raw: &str) -> EngineResult<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| EngineError::Config(format!("bad date {raw:?}: {e}")))
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_env<T>(key: &str, default: &str) -> EngineResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_var_or(key, default)
        .parse::<T>()
        .map_err(|e| EngineError::Config(format!("{key}: {e}")))
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
