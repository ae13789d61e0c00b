use crate::config::step_of;
use crate::database::Database;
use crate::models::{Bar, KlineRow, PairSpec};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

const BAR_SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct BarSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    symbol: String,
    interval: String,
    bars: Vec<Bar>,
}

/// Bars for one pair, shared read-only between backtests.
#[derive(Debug, Clone)]
pub struct MarketData {
    pair: PairSpec,
    bars: Arc<[Bar]>,
}

impl MarketData {
    pub fn new(pair: PairSpec, bars: Vec<Bar>) -> Self {
        Self {
            pair,
            bars: bars.into(),
        }
    }

    pub fn pair(&self) -> &PairSpec {
        &self.pair
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn shared_bars(&self) -> Arc<[Bar]> {
        Arc::clone(&self.bars)
    }

    /// Load bars from the store: the latest `lookback` bars when given,
    /// otherwise everything in the optional range.
    pub async fn load(
        db: &Database,
        pair: &PairSpec,
        lookback: Option<usize>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let rows = match lookback {
            Some(n) if start.is_none() && end.is_none() => {
                db.fetch_latest_n(&pair.symbol, &pair.interval, n as i64).await?
            }
            _ => {
                let rows = db
                    .fetch_ohlcv(&pair.symbol, &pair.interval, start, end, None)
                    .await?;
                tail(rows, lookback)
            }
        };
        info!("Loaded {} bars for {} from database", rows.len(), pair);
        Ok(Self::new(
            pair.clone(),
            rows.iter().map(KlineRow::to_bar).collect(),
        ))
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open bar snapshot at {}", path.display()))?;
        let reader = BufReader::new(file);
        let snapshot: BarSnapshot =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;

        if snapshot.version != BAR_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Bar snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                BAR_SNAPSHOT_VERSION
            ));
        }

        info!(
            "Loaded {} bars for {}/{} from snapshot generated at {}",
            snapshot.bars.len(),
            snapshot.symbol,
            snapshot.interval,
            snapshot.generated_at
        );
        Ok(Self::new(
            PairSpec {
                symbol: snapshot.symbol,
                interval: snapshot.interval,
            },
            snapshot.bars,
        ))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path)
            .with_context(|| format!("Unable to create bar snapshot at {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        let snapshot = BarSnapshot {
            version: BAR_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            symbol: self.pair.symbol.clone(),
            interval: self.pair.interval.clone(),
            bars: self.bars.to_vec(),
        };
        bincode::serialize_into(&mut writer, &snapshot)
            .context("Failed to serialize bar snapshot")?;
        writer
            .flush()
            .context("Failed to flush bar snapshot to disk")?;
        Ok(())
    }

    /// Keep bars inside `[start, end]`, then the last `lookback` of those.
    pub fn restrict(
        self,
        lookback: Option<usize>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        let filtered: Vec<Bar> = self
            .bars
            .iter()
            .filter(|b| start.map_or(true, |s| b.ts >= s) && end.map_or(true, |e| b.ts <= e))
            .copied()
            .collect();
        Self::new(self.pair, tail(filtered, lookback))
    }
}

fn tail<T>(mut items: Vec<T>, lookback: Option<usize>) -> Vec<T> {
    if let Some(n) = lookback {
        if items.len() > n {
            items.drain(..items.len() - n);
        }
    }
    items
}

/// Synthetic klines for local testing: a random walk of sine, drift and noise
/// ending before `end`. The same seed gives the same prices.
pub fn synthetic_klines(pair: &PairSpec, rows: usize, seed: u64, end: DateTime<Utc>) -> Result<Vec<KlineRow>> {
    let step = step_of(&pair.interval)?;
    let count = i32::try_from(rows)
        .map_err(|_| anyhow!("Too many synthetic rows requested: {}", rows))?;
    let start = count
        .checked_add(5)
        .and_then(|n| step.checked_mul(n))
        .and_then(|span| end.checked_sub_signed(span))
        .ok_or_else(|| {
            anyhow!("{} bars of {} do not fit before {}", rows, pair.interval, end)
        })?;
    let mut rng = StdRng::seed_from_u64(seed);
    let trend = 0.01;
    let mut last_close = 100.0_f64;

    let mut out = Vec::with_capacity(rows);
    for i in 0..count {
        let ts = start + step * i;
        let noise = rng.gen_range(-0.05..=0.05);
        let delta = (i as f64 / 25.0).sin() * 0.1 + trend + noise;
        let open = last_close;
        let close = (open + delta).max(0.01);
        let high = open.max(close) + rng.gen_range(0.02..=0.12);
        let low = (open.min(close) - rng.gen_range(0.02..=0.12)).max(0.001);
        let volume = 1.0 + rng.gen_range(0.0..=0.5);
        let mid = (open + close) / 2.0;
        out.push(KlineRow {
            symbol: pair.symbol.clone(),
            interval: pair.interval.clone(),
            ts,
            open,
            high,
            low,
            close,
            volume,
            close_ts: ts + step,
            quote_volume: volume * mid,
            trades: 10 + (i % 5) as i64,
            taker_buy_base: volume * 0.4,
            taker_buy_quote: volume * 0.4 * mid,
        });
        last_close = close;
    }
    Ok(out)
}
