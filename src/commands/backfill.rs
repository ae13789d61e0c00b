use crate::binance::{ms_to_datetime, parse_kline, BinanceClient};
use crate::config::{step_of, IngestorConfig};
use crate::context::AppContext;
use crate::models::PairSpec;
use crate::retry::retry_db_operation;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use log::{error, info, warn};

struct BackfillJob<'a> {
    app: &'a AppContext,
    client: &'a BinanceClient,
    min_start: DateTime<Utc>,
    page_limit: u32,
    now: DateTime<Utc>,
}

/// First open time to request: one millisecond after the stored close time,
/// never before the configured start.
pub fn resume_start(min_start: DateTime<Utc>, last_closed: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match last_closed {
        Some(last) => std::cmp::max(min_start, last + chrono::Duration::milliseconds(1)),
        None => min_start,
    }
}

async fn backfill_pair(job: &BackfillJob<'_>, pair: &PairSpec) -> Result<u64> {
    let mut db = job.app.database().await?;
    let step = step_of(&pair.interval)?;
    let (symbol, interval) = (pair.symbol.as_str(), pair.interval.as_str());

    let last = retry_db_operation!(
        format!("resume pointer for {}", pair),
        db.get_last_closed_ts(symbol, interval)
    )?;
    let start = resume_start(job.min_start, last);
    let mut start_ms = start.timestamp_millis();
    info!(
        "Backfill {} from {} (limit={})",
        pair,
        start.to_rfc3339(),
        job.page_limit
    );

    let mut total = 0;
    loop {
        let batch = job
            .client
            .klines(symbol, interval, Some(start_ms), None, job.page_limit)
            .await?;
        if batch.is_empty() {
            info!("Backfill {} complete (no more data)", pair);
            break;
        }

        let rows = batch
            .iter()
            .map(|arr| parse_kline(symbol, interval, arr))
            .collect::<Result<Vec<_>>>()?;
        let Some(last_row) = rows.last() else {
            break;
        };
        let last_close = last_row.close_ts;

        let inserted = retry_db_operation!(format!("upsert klines for {}", pair), db.upsert_klines(&rows))?;
        retry_db_operation!(
            format!("advance resume pointer for {}", pair),
            db.set_last_closed_ts(symbol, interval, last_close)
        )?;
        total += inserted;
        info!(
            "Backfill {}: inserted={} last_close={}",
            pair,
            inserted,
            last_close.to_rfc3339()
        );

        if job.now - last_close < step {
            info!("Backfill {} up to date through {}", pair, last_close.to_rfc3339());
            break;
        }
        let next_ms = last_close.timestamp_millis() + 1;
        if next_ms <= start_ms {
            warn!("Backfill {} made no progress at {}; stopping", pair, start_ms);
            break;
        }
        start_ms = next_ms;
    }

    Ok(total)
}

pub async fn run(
    app: &AppContext,
    config_path: &std::path::Path,
    pair_override: Option<Vec<PairSpec>>,
    concurrency: usize,
) -> Result<()> {
    let cfg = IngestorConfig::load(config_path)?;
    let pairs = pair_override.unwrap_or_else(|| cfg.pairs.clone());

    let app = if app.has_database() {
        app.clone()
    } else {
        AppContext::initialize(cfg.database_url(None)).await?
    };
    app.database().await?.ensure_schema().await?;

    let client = BinanceClient::new(&cfg.rest.endpoint)?;
    let now = match client.server_time_ms().await.and_then(ms_to_datetime) {
        Ok(server_now) => server_now,
        Err(err) => {
            warn!("Server time unavailable, using local clock: {:#}", err);
            Utc::now()
        }
    };

    let job = BackfillJob {
        app: &app,
        client: &client,
        min_start: cfg.backfill_start,
        page_limit: cfg.rest.klines_limit,
        now,
    };

    let results: Vec<(PairSpec, Result<u64>)> = stream::iter(pairs)
        .map(|pair| {
            let job = &job;
            async move {
                let result = backfill_pair(job, &pair).await;
                (pair, result)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut failed = 0;
    for (pair, result) in results {
        match result {
            Ok(inserted) => info!("Backfill {} finished: {} new bars", pair, inserted),
            Err(err) => {
                failed += 1;
                error!("Backfill {} failed: {:#}", pair, err);
            }
        }
    }

    if failed > 0 {
        return Err(anyhow!("{} pair(s) failed to backfill", failed));
    }
    Ok(())
}
