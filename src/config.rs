use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    /// Base URL of the exchange trade feed; the sync loop is off when unset.
    pub trade_source_url: Option<String>,
    pub sync_accounts: Vec<String>,
    pub sync_interval_ms: u64,
    pub lookback_ms: i64,
    pub pnl_scale: u32,
    pub max_warnings: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or(&env_map, "PORT", 8080u16, "must be a valid u16")?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let trade_source_url = env_map
            .get("TRADE_SOURCE_URL")
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty());

        let sync_accounts = env_map
            .get("SYNC_ACCOUNTS")
            .map(|s| {
                s.split(',')
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let sync_interval_ms = parse_or(
            &env_map,
            "SYNC_INTERVAL_MS",
            60_000u64,
            "must be a valid u64",
        )?;
        if sync_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "SYNC_INTERVAL_MS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let lookback_ms = parse_or(&env_map, "LOOKBACK_MS", 0i64, "must be a valid i64")?;
        if lookback_ms < 0 {
            return Err(ConfigError::InvalidValue(
                "LOOKBACK_MS".to_string(),
                "must not be negative".to_string(),
            ));
        }

        let pnl_scale = parse_or(&env_map, "PNL_SCALE", 10u32, "must be a valid u32")?;
        if pnl_scale > 28 {
            return Err(ConfigError::InvalidValue(
                "PNL_SCALE".to_string(),
                "must be at most 28".to_string(),
            ));
        }

        let max_warnings = parse_or(&env_map, "MAX_WARNINGS", 100usize, "must be a valid usize")?;

        Ok(Config {
            port,
            database_path,
            trade_source_url,
            sync_accounts,
            sync_interval_ms,
            lookback_ms,
            pnl_scale,
            max_warnings,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
    hint: &str,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), hint.to_string())),
    }
}
