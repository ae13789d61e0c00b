use crate::binance::DEFAULT_REST_ENDPOINT;
use crate::context::AppContext;
use crate::fees::{FeeLookup, DEFAULT_FEE_TTL};
use crate::models::{ExchangeFee, PairSpec};
use anyhow::Result;
use chrono::Utc;
use log::info;
use std::collections::BTreeSet;

const FEE_SOURCE: &str = "binance_fapi";

/// Fetch current maker/taker rates for each distinct symbol and, unless
/// `dry_run`, store them as one snapshot timestamp.
pub async fn run(app: &AppContext, pairs: &[PairSpec], endpoint: Option<&str>, dry_run: bool) -> Result<()> {
    let symbols: BTreeSet<&str> = pairs.iter().map(|p| p.symbol.as_str()).collect();
    let lookup = FeeLookup::new(endpoint.unwrap_or(DEFAULT_REST_ENDPOINT), DEFAULT_FEE_TTL)?;

    let now = Utc::now();
    let mut rows = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let rates = lookup.fee_bps(symbol).await;
        rows.push(ExchangeFee {
            ts: now,
            symbol: symbol.to_string(),
            maker_bps: rates.maker_bps,
            taker_bps: rates.taker_bps,
            source: FEE_SOURCE.to_string(),
        });
    }

    for row in &rows {
        info!(
            "Fee snapshot ts={} symbol={} maker_bps={:.4} taker_bps={:.4} source={}",
            row.ts.to_rfc3339(),
            row.symbol,
            row.maker_bps,
            row.taker_bps,
            row.source
        );
    }
    if dry_run {
        info!("Dry run: not writing fee snapshots");
        return Ok(());
    }

    let mut db = app.database().await?;
    db.ensure_schema().await?;
    let written = db.upsert_exchange_fees(&rows).await?;
    info!("Stored {} fee snapshots at {}", written, now.to_rfc3339());
    Ok(())
}
