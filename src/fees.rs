use crate::binance::build_http_client;
use crate::trading_rules::BPS_DENOMINATOR;
use anyhow::{Context, Result};
use dashmap::DashMap;
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_MAKER_BPS: f64 = 2.0;
pub const DEFAULT_TAKER_BPS: f64 = 4.0;
pub const DEFAULT_FEE_TTL: Duration = Duration::from_secs(3600);
const MIN_FEE_TTL: Duration = Duration::from_secs(60);
const COMMISSION_PATH: &str = "/fapi/v1/commissionRate";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeRates {
    pub maker_bps: f64,
    pub taker_bps: f64,
}

impl FeeRates {
    pub const FALLBACK: FeeRates = FeeRates {
        maker_bps: DEFAULT_MAKER_BPS,
        taker_bps: DEFAULT_TAKER_BPS,
    };
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommissionRate {
    maker_commission_rate: Option<String>,
    taker_commission_rate: Option<String>,
}

impl CommissionRate {
    fn to_rates(&self) -> Result<FeeRates> {
        let parse = |raw: &Option<String>, default: f64| -> Result<f64> {
            match raw {
                Some(value) => value
                    .parse::<f64>()
                    .with_context(|| format!("invalid commission rate {}", value)),
                None => Ok(default),
            }
        };
        Ok(FeeRates {
            maker_bps: parse(&self.maker_commission_rate, 0.0002)? * BPS_DENOMINATOR,
            taker_bps: parse(&self.taker_commission_rate, 0.0004)? * BPS_DENOMINATOR,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedRates {
    rates: FeeRates,
    expires_at: Instant,
}

/// Maker/taker commission lookup with a per-symbol TTL cache. Lookups never
/// fail: any fetch error yields the base-tier fallback, which is not cached.
#[derive(Clone)]
pub struct FeeLookup {
    http: Client,
    base_url: String,
    ttl: Duration,
    cache: Arc<DashMap<String, CachedRates>>,
}

impl FeeLookup {
    pub fn new<S: AsRef<str>>(base_url: S, ttl: Duration) -> Result<Self> {
        Ok(Self {
            http: build_http_client(Some(REQUEST_TIMEOUT))?,
            base_url: base_url.as_ref().trim_end_matches('/').to_string(),
            ttl: ttl.max(MIN_FEE_TTL),
            cache: Arc::new(DashMap::new()),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn cached(&self, symbol: &str) -> Option<FeeRates> {
        let key = symbol.to_ascii_uppercase();
        let entry = self.cache.get(&key)?;
        (entry.expires_at > Instant::now()).then_some(entry.rates)
    }

    pub fn store(&self, symbol: &str, rates: FeeRates) {
        self.cache.insert(
            symbol.to_ascii_uppercase(),
            CachedRates {
                rates,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub async fn fee_bps(&self, symbol: &str) -> FeeRates {
        if let Some(rates) = self.cached(symbol) {
            return rates;
        }
        match self.fetch(symbol).await {
            Ok(rates) => {
                debug!(
                    "Fetched {} fees: maker={:.4}bps taker={:.4}bps",
                    symbol, rates.maker_bps, rates.taker_bps
                );
                self.store(symbol, rates);
                rates
            }
            Err(err) => {
                warn!(
                    "Fee lookup for {} failed, using fallback {}/{} bps: {:#}",
                    symbol, DEFAULT_MAKER_BPS, DEFAULT_TAKER_BPS, err
                );
                FeeRates::FALLBACK
            }
        }
    }

    async fn fetch(&self, symbol: &str) -> Result<FeeRates> {
        let url = format!("{}{}", self.base_url, COMMISSION_PATH);
        let payload: CommissionRate = self
            .http
            .get(&url)
            .query(&[("symbol", symbol.to_ascii_uppercase())])
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()
            .with_context(|| format!("GET {} returned error", url))?
            .json()
            .await
            .context("failed to parse commission rate response")?;
        payload.to_rates()
    }
}
