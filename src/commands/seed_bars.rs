use crate::context::AppContext;
use crate::data_context::synthetic_klines;
use crate::models::PairSpec;
use anyhow::{anyhow, Result};
use chrono::Utc;
use log::info;

const MIN_SEED_ROWS: usize = 10;
const MAX_SEED_ROWS: usize = 1_000_000;

pub async fn run(app: &AppContext, pair: &PairSpec, rows: usize, seed: u64) -> Result<()> {
    if rows > MAX_SEED_ROWS {
        return Err(anyhow!(
            "--rows {} exceeds the limit of {} synthetic bars",
            rows,
            MAX_SEED_ROWS
        ));
    }
    let mut db = app.database().await?;
    db.ensure_schema().await?;

    let klines = synthetic_klines(pair, rows.max(MIN_SEED_ROWS), seed, Utc::now())?;
    let last_close = klines
        .last()
        .map(|k| k.close_ts)
        .ok_or_else(|| anyhow!("no synthetic bars generated"))?;

    let inserted = db.upsert_klines(&klines).await?;
    db.set_last_closed_ts(&pair.symbol, &pair.interval, last_close)
        .await?;
    info!(
        "Seeded {} rows for {} up to {}",
        inserted,
        pair,
        last_close.to_rfc3339()
    );
    Ok(())
}
