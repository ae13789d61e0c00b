use crate::context::{AppContext, BarQuery};
use crate::models::PairSpec;
use crate::optimizer::{choose_best, pareto_frontier, run_sweep, SweepGrid, SweepResult};
use crate::report::{sweep_markdown, sweep_markdown_section, SweepSection};
use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub struct OptimizeArgs {
    pub pairs: Vec<PairSpec>,
    pub grid: SweepGrid,
    pub bars: BarQuery,
    /// Drawdown cap in quote currency; `None` disables the filter.
    pub dd_cap: Option<f64>,
    pub lambda: f64,
    pub top_k: usize,
    pub out_dir: PathBuf,
    pub show_progress: bool,
}

#[derive(Serialize)]
struct PairBest<'a> {
    pair: String,
    best: &'a SweepResult,
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

fn file_stem(pair: &PairSpec) -> String {
    format!("{}_{}", pair.symbol, pair.interval)
}

pub async fn run(app: &AppContext, args: OptimizeArgs) -> Result<()> {
    let OptimizeArgs {
        pairs,
        grid,
        bars,
        dd_cap,
        lambda,
        top_k,
        out_dir,
        show_progress,
    } = args;

    fs::create_dir_all(&out_dir)
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;

    let candidates = grid.candidates();
    info!(
        "Sweeping {} parameter sets per pair across {} pair(s)",
        candidates.len(),
        pairs.len()
    );

    let mut sections = Vec::with_capacity(pairs.len());
    let mut best_rows = Vec::with_capacity(pairs.len());

    for pair in &pairs {
        let data = match app.market_data(pair, &bars).await {
            Ok(data) => data,
            Err(err) => {
                warn!("Skipping {}: {:#}", pair, err);
                continue;
            }
        };

        let shared = data.shared_bars();
        let (symbol, interval) = (pair.symbol.clone(), pair.interval.clone());
        let pair_candidates = candidates.clone();
        let results = tokio::task::spawn_blocking(move || {
            run_sweep(&symbol, &interval, shared, pair_candidates, show_progress)
        })
        .await
        .context("sweep task failed to complete")??;

        let Some((best, ranked)) = choose_best(&results, dd_cap, lambda) else {
            warn!("No sweep results for {}", pair);
            continue;
        };
        let frontier = pareto_frontier(&results);
        info!(
            "{} best: {} [{}] risk={} atr_mult={} pnl={:.2} dd={:.2} trades={}",
            pair,
            best.strategy,
            best.params_label(),
            best.risk,
            best.atr_mult,
            best.pnl,
            best.dd,
            best.trades
        );

        let stem = file_stem(pair);
        write_json(&out_dir.join(format!("{}_grid.json", stem)), &ranked)?;
        write_json(&out_dir.join(format!("{}_pareto.json", stem)), &frontier)?;

        sections.push(sweep_markdown_section(&SweepSection {
            pair,
            lookback: bars.lookback,
            base_risk: &grid.base_risk,
            lambda,
            top_k,
            best: &best,
            ranked: &ranked,
        }));
        best_rows.push((pair.to_string(), best));
    }

    let best_payload: Vec<PairBest> = best_rows
        .iter()
        .map(|(pair, best)| PairBest {
            pair: pair.clone(),
            best,
        })
        .collect();
    write_json(&out_dir.join("best.json"), &best_payload)?;

    let summary_path = out_dir.join("summary.md");
    fs::write(&summary_path, sweep_markdown(&sections))
        .with_context(|| format!("Failed to write {}", summary_path.display()))?;
    info!("Sweep summary written to {}", summary_path.display());

    Ok(())
}
