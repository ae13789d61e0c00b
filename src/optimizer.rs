use crate::engine::backtest;
use crate::models::{Bar, RiskParams};
use crate::param_utils::{format_params, params_from, StrategyParams};
use crate::strategy::create_strategy;
use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Parameter grid for a sweep. Every strategy family is crossed with every
/// risk fraction and ATR stop multiple.
#[derive(Debug, Clone)]
pub struct SweepGrid {
    pub strategies: Vec<String>,
    pub fast: Vec<usize>,
    pub slow: Vec<usize>,
    pub bb_periods: Vec<usize>,
    pub bb_mults: Vec<f64>,
    pub rsi_periods: Vec<usize>,
    pub rsi_entries: Vec<f64>,
    pub rsi_exits: Vec<f64>,
    pub rsi_emas: Vec<usize>,
    pub risks: Vec<f64>,
    pub atr_mults: Vec<f64>,
    /// Template for every run; `risk_per_trade` and `atr_mult_stop` are
    /// overwritten per candidate.
    pub base_risk: RiskParams,
}

impl Default for SweepGrid {
    fn default() -> Self {
        Self {
            strategies: vec!["ema".into(), "bollinger".into(), "rsi".into()],
            fast: vec![10, 20, 30, 50],
            slow: vec![50, 100, 200],
            bb_periods: vec![20, 50],
            bb_mults: vec![2.0, 2.5, 3.0],
            rsi_periods: vec![8, 14],
            rsi_entries: vec![25.0, 30.0],
            rsi_exits: vec![50.0, 55.0],
            rsi_emas: vec![0, 200],
            risks: vec![0.003, 0.005, 0.01],
            atr_mults: vec![2.0, 2.5, 3.0],
            base_risk: RiskParams::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SweepCandidate {
    pub strategy: String,
    pub params: StrategyParams,
    pub risk: RiskParams,
}

impl SweepGrid {
    fn strategy_params(&self, strategy: &str) -> Vec<StrategyParams> {
        let mut out = Vec::new();
        match strategy {
            "ema" | "ema_ls" => {
                for &fast in &self.fast {
                    for &slow in &self.slow {
                        if fast >= slow {
                            continue;
                        }
                        out.push(params_from([("fast", fast as f64), ("slow", slow as f64)]));
                    }
                }
            }
            "bollinger" | "bollinger_ls" => {
                for &period in &self.bb_periods {
                    for &mult in &self.bb_mults {
                        out.push(params_from([("period", period as f64), ("mult", mult)]));
                    }
                }
            }
            "rsi" | "rsi_ls" => {
                for &period in &self.rsi_periods {
                    for &entry in &self.rsi_entries {
                        for &exit in &self.rsi_exits {
                            for &ema in &self.rsi_emas {
                                out.push(params_from([
                                    ("period", period as f64),
                                    ("entry", entry),
                                    ("exit", exit),
                                    ("ema", ema as f64),
                                ]));
                            }
                        }
                    }
                }
            }
            other => warn!("Sweep grid has no parameters for strategy {}", other),
        }
        out
    }

    /// Expand the grid, dropping combinations the strategy constructors reject.
    pub fn candidates(&self) -> Vec<SweepCandidate> {
        let mut out = Vec::new();
        for &risk_per_trade in &self.risks {
            for &atr_mult in &self.atr_mults {
                let risk = RiskParams {
                    risk_per_trade,
                    atr_mult_stop: atr_mult,
                    ..self.base_risk.clone()
                };
                for strategy in &self.strategies {
                    for params in self.strategy_params(strategy) {
                        if let Err(err) = create_strategy(strategy, &params) {
                            debug!("Skipping {} [{}]: {}", strategy, format_params(&params), err);
                            continue;
                        }
                        out.push(SweepCandidate {
                            strategy: strategy.clone(),
                            params,
                            risk: risk.clone(),
                        });
                    }
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    pub strategy: String,
    pub params: StrategyParams,
    pub risk: f64,
    pub atr_mult: f64,
    pub pnl: f64,
    pub dd: f64,
    pub trades: usize,
    pub cagr: Option<f64>,
    pub equity_end: f64,
}

impl SweepResult {
    pub fn score(&self, lambda: f64) -> f64 {
        self.pnl - lambda * self.dd
    }

    pub fn params_label(&self) -> String {
        format_params(&self.params)
    }
}

struct SweepTask {
    index: usize,
    candidate: SweepCandidate,
}

struct SweepTaskResult {
    index: usize,
    result: Result<SweepResult, String>,
}

fn run_candidate(
    symbol: &str,
    interval: &str,
    bars: &[Bar],
    candidate: &SweepCandidate,
) -> Result<SweepResult, String> {
    let mut strategy =
        create_strategy(&candidate.strategy, &candidate.params).map_err(|e| e.to_string())?;
    let (report, _) = backtest(symbol, interval, bars, strategy.as_mut(), &candidate.risk)
        .map_err(|e| e.to_string())?;
    Ok(SweepResult {
        strategy: candidate.strategy.clone(),
        params: candidate.params.clone(),
        risk: candidate.risk.risk_per_trade,
        atr_mult: candidate.risk.atr_mult_stop,
        pnl: report.pnl,
        dd: report.max_dd,
        trades: report.trades,
        cagr: report.cagr,
        equity_end: report.equity_end,
    })
}

/// Evaluate every candidate on a pool of worker threads. Results come back in
/// candidate order regardless of completion order.
pub fn run_sweep(
    symbol: &str,
    interval: &str,
    bars: Arc<[Bar]>,
    candidates: Vec<SweepCandidate>,
    show_progress: bool,
) -> Result<Vec<SweepResult>> {
    let task_count = candidates.len();
    if task_count == 0 {
        return Ok(Vec::new());
    }
    info!("Running {} backtests for {}/{}...", task_count, symbol, interval);

    let num_workers = std::cmp::min(task_count, std::cmp::max(1, num_cpus::get()));
    debug!("Using {} worker threads", num_workers);

    let (tx, rx): (Sender<SweepTask>, Receiver<SweepTask>) = bounded(task_count);
    let (result_tx, result_rx): (Sender<SweepTaskResult>, Receiver<SweepTaskResult>) =
        bounded(task_count);

    let mut handles = Vec::with_capacity(num_workers);
    for _ in 0..num_workers {
        let rx = rx.clone();
        let result_tx = result_tx.clone();
        let bars = Arc::clone(&bars);
        let symbol = symbol.to_string();
        let interval = interval.to_string();

        handles.push(thread::spawn(move || {
            while let Ok(task) = rx.recv() {
                let start_time = Instant::now();
                let result = run_candidate(&symbol, &interval, &bars, &task.candidate);
                debug!(
                    "Task {} ({} [{}]) finished in {:.2}s",
                    task.index,
                    task.candidate.strategy,
                    format_params(&task.candidate.params),
                    start_time.elapsed().as_secs_f64()
                );
                if result_tx
                    .send(SweepTaskResult {
                        index: task.index,
                        result,
                    })
                    .is_err()
                {
                    break;
                }
            }
        }));
    }
    drop(result_tx);

    for (index, candidate) in candidates.into_iter().enumerate() {
        tx.send(SweepTask { index, candidate })?;
    }
    drop(tx);

    let pb = if show_progress {
        ProgressBar::new(task_count as u64)
    } else {
        ProgressBar::hidden()
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );

    let mut slots: Vec<Option<SweepResult>> = vec![None; task_count];
    let mut failed = 0usize;
    for (completed, task_result) in result_rx.iter().enumerate() {
        pb.set_position(completed as u64 + 1);
        match task_result.result {
            Ok(result) => slots[task_result.index] = Some(result),
            Err(err) => {
                failed += 1;
                warn!("Sweep task {} failed: {}", task_result.index, err);
            }
        }
    }

    if failed > 0 {
        pb.finish_with_message("Sweep completed with errors");
        warn!("Sweep completed with {} failed tasks", failed);
    } else {
        pb.finish_with_message("Sweep completed");
    }

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow!("sweep worker thread panicked"))?;
    }

    Ok(slots.into_iter().flatten().collect())
}

fn descending(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}

/// Rank by `pnl - lambda * dd` (ties broken by pnl), best first. Results over
/// the drawdown cap are dropped unless nothing passes it.
pub fn choose_best(
    results: &[SweepResult],
    dd_cap: Option<f64>,
    lambda: f64,
) -> Option<(SweepResult, Vec<SweepResult>)> {
    let capped: Vec<SweepResult> = results
        .iter()
        .filter(|r| dd_cap.map_or(true, |cap| r.dd <= cap))
        .cloned()
        .collect();
    let mut ranked = if capped.is_empty() {
        results.to_vec()
    } else {
        capped
    };

    ranked.sort_by(|a, b| {
        descending(a.score(lambda), b.score(lambda)).then_with(|| descending(a.pnl, b.pnl))
    });
    let best = ranked.first()?.clone();
    Some((best, ranked))
}

/// Non-dominated results for (maximize pnl, minimize dd), ordered by dd.
pub fn pareto_frontier(results: &[SweepResult]) -> Vec<SweepResult> {
    let mut sorted = results.to_vec();
    sorted.sort_by(|a, b| a.dd.total_cmp(&b.dd).then_with(|| descending(a.pnl, b.pnl)));

    let mut frontier = Vec::new();
    let mut best_pnl = f64::NEG_INFINITY;
    for r in sorted {
        if r.pnl > best_pnl {
            best_pnl = r.pnl;
            frontier.push(r);
        }
    }
    frontier
}
