use crate::error::{EngineError, EngineResult};
use crate::models::PairSpec;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::path::Path;

pub const SUPPORTED_INTERVALS: [&str; 8] = ["1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h"];
pub const DEFAULT_KLINES_LIMIT: u32 = 1500;

/// Duration of one bar for a supported kline interval.
pub fn step_of(interval: &str) -> EngineResult<Duration> {
    let step = match interval {
        "1m" => Duration::minutes(1),
        "3m" => Duration::minutes(3),
        "5m" => Duration::minutes(5),
        "15m" => Duration::minutes(15),
        "30m" => Duration::minutes(30),
        "1h" => Duration::hours(1),
        "2h" => Duration::hours(2),
        "4h" => Duration::hours(4),
        other => return Err(EngineError::UnsupportedInterval(other.to_string())),
    };
    Ok(step)
}

/// Parse `SYMBOL/interval` or `SYMBOL-interval`. The symbol is uppercased and
/// the interval must be supported.
pub fn parse_pair(raw: &str) -> EngineResult<PairSpec> {
    let trimmed = raw.trim();
    let (symbol, interval) = trimmed
        .split_once('/')
        .or_else(|| trimmed.split_once('-'))
        .ok_or_else(|| EngineError::InvalidPair(raw.to_string()))?;
    pair_spec(symbol, interval, raw)
}

fn pair_spec(symbol: &str, interval: &str, raw: &str) -> EngineResult<PairSpec> {
    let symbol = symbol.trim().to_ascii_uppercase();
    let interval = interval.trim().to_string();
    if symbol.is_empty() || interval.is_empty() {
        return Err(EngineError::InvalidPair(raw.to_string()));
    }
    step_of(&interval)?;
    Ok(PairSpec { symbol, interval })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PairEntry {
    Text(String),
    Object { symbol: String, interval: String },
}

impl PairEntry {
    fn to_spec(&self) -> EngineResult<PairSpec> {
        match self {
            PairEntry::Text(raw) => parse_pair(raw),
            PairEntry::Object { symbol, interval } => {
                pair_spec(symbol, interval, &format!("{}/{}", symbol, interval))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestConfig {
    pub endpoint: String,
    #[serde(default = "default_klines_limit")]
    pub klines_limit: u32,
}

fn default_klines_limit() -> u32 {
    DEFAULT_KLINES_LIMIT
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DbConfig {
    #[serde(default)]
    pub dsn: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackfillConfig {
    pub start_date: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawIngestorConfig {
    pairs: Vec<PairEntry>,
    rest: RestConfig,
    #[serde(default)]
    db: DbConfig,
    backfill: BackfillConfig,
}

/// Validated ingestor configuration.
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    pub pairs: Vec<PairSpec>,
    pub rest: RestConfig,
    pub db: DbConfig,
    pub backfill_start: DateTime<Utc>,
}

impl IngestorConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let parsed: RawIngestorConfig =
            serde_json::from_str(raw).context("Config is not valid JSON")?;
        Self::validate(parsed)
    }

    fn validate(raw: RawIngestorConfig) -> Result<Self> {
        if raw.pairs.is_empty() {
            return Err(anyhow!("config.pairs must be a non-empty list"));
        }
        let pairs = raw
            .pairs
            .iter()
            .map(PairEntry::to_spec)
            .collect::<EngineResult<Vec<_>>>()?;

        let rest = RestConfig {
            endpoint: raw.rest.endpoint.trim().trim_end_matches('/').to_string(),
            klines_limit: raw.rest.klines_limit,
        };
        if rest.endpoint.is_empty() {
            return Err(anyhow!("config.rest.endpoint must be set"));
        }
        if rest.klines_limit == 0 {
            return Err(anyhow!("config.rest.klines_limit must be > 0"));
        }

        let dsn = raw.db.dsn.map(|d| d.trim().to_string());
        if matches!(dsn.as_deref(), Some("")) {
            return Err(anyhow!("config.db.dsn must be a non-empty string when present"));
        }

        let start = raw.backfill.start_date.trim();
        if start.is_empty() {
            return Err(anyhow!("config.backfill.start_date must be set"));
        }
        let backfill_start = DateTime::parse_from_rfc3339(start)
            .with_context(|| format!("config.backfill.start_date is not RFC 3339: {}", start))?
            .with_timezone(&Utc);

        Ok(Self {
            pairs,
            rest,
            db: DbConfig { dsn },
            backfill_start,
        })
    }

    /// DSN from the config, falling back to the given environment value.
    pub fn database_url(&self, env_url: Option<&str>) -> Option<String> {
        env_url
            .map(str::to_string)
            .or_else(|| self.db.dsn.clone())
            .filter(|url| !url.trim().is_empty())
    }
}
