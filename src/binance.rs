use crate::models::KlineRow;
use crate::retry::{retry_with_backoff, Backoff};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_REST_ENDPOINT: &str = "https://fapi.binance.com";
const KLINES_PATH: &str = "/fapi/v1/klines";
const TIME_PATH: &str = "/fapi/v1/time";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn build_http_client(timeout: Option<Duration>) -> Result<Client> {
    let mut builder = Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().context("failed to build HTTP client")
}

/// Binance USD-M futures REST client for the public market data endpoints.
#[derive(Clone)]
pub struct BinanceClient {
    http: Client,
    base_url: String,
    backoff: Backoff,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerTime {
    server_time: i64,
}

impl BinanceClient {
    pub fn new<S: AsRef<str>>(base_url: S) -> Result<Self> {
        Ok(Self {
            http: build_http_client(Some(REQUEST_TIMEOUT))?,
            base_url: base_url.as_ref().trim_end_matches('/').to_string(),
            backoff: Backoff::default(),
        })
    }

    fn endpoint_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn server_time_ms(&self) -> Result<i64> {
        let time: ServerTime = self.get_with_query(TIME_PATH, &[]).await?;
        Ok(time.server_time)
    }

    /// Raw kline arrays for one page, oldest first.
    pub async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Vec<Value>>> {
        let mut query = vec![
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(start) = start_ms {
            query.push(("startTime", start.to_string()));
        }
        if let Some(end) = end_ms {
            query.push(("endTime", end.to_string()));
        }
        let query: Vec<(&str, &str)> = query.iter().map(|(k, v)| (*k, v.as_str())).collect();
        self.get_with_query(KLINES_PATH, &query).await
    }

    pub(crate) async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let url = self.endpoint_url(path);
        let url = url.as_str();
        let http = &self.http;
        retry_with_backoff(&format!("GET {}", path), self.backoff, || async move {
            let response = http
                .get(url)
                .query(query)
                .send()
                .await
                .with_context(|| format!("GET {} failed", url))?
                .error_for_status()
                .with_context(|| format!("GET {} returned error", url))?;
            response
                .json::<T>()
                .await
                .context("failed to parse Binance response")
        })
        .await
    }
}

pub fn ms_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}

fn field_f64(arr: &[Value], idx: usize) -> Result<f64> {
    let value = arr
        .get(idx)
        .ok_or_else(|| anyhow!("kline missing field {}", idx))?;
    match value {
        Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("kline field {} is not numeric: {}", idx, s)),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| anyhow!("kline field {} is not numeric", idx)),
        other => Err(anyhow!("kline field {} has unexpected type: {}", idx, other)),
    }
}

fn field_i64(arr: &[Value], idx: usize) -> Result<i64> {
    let value = arr
        .get(idx)
        .ok_or_else(|| anyhow!("kline missing field {}", idx))?;
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| anyhow!("kline field {} is not an integer", idx)),
        Value::String(s) => s
            .parse::<i64>()
            .with_context(|| format!("kline field {} is not an integer: {}", idx, s)),
        other => Err(anyhow!("kline field {} has unexpected type: {}", idx, other)),
    }
}

/// Decode a REST kline array: open time, OHLCV, close time, quote volume,
/// trade count, taker buy base and taker buy quote (indices 0 to 10).
pub fn parse_kline(symbol: &str, interval: &str, arr: &[Value]) -> Result<KlineRow> {
    Ok(KlineRow {
        symbol: symbol.to_string(),
        interval: interval.to_string(),
        ts: ms_to_datetime(field_i64(arr, 0)?)?,
        open: field_f64(arr, 1)?,
        high: field_f64(arr, 2)?,
        low: field_f64(arr, 3)?,
        close: field_f64(arr, 4)?,
        volume: field_f64(arr, 5)?,
        close_ts: ms_to_datetime(field_i64(arr, 6)?)?,
        quote_volume: field_f64(arr, 7)?,
        trades: field_i64(arr, 8)?,
        taker_buy_base: field_f64(arr, 9)?,
        taker_buy_quote: field_f64(arr, 10)?,
    })
}
