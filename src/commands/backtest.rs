use crate::context::{AppContext, BarQuery};
use crate::engine::backtest;
use crate::models::{PairSpec, RiskParams};
use crate::param_utils::{format_params, StrategyParams};
use crate::report::{backtest_summary, format_trade};
use crate::retry::retry_db_operation;
use crate::strategy::create_strategy;
use anyhow::{Context, Result};
use clap::ValueEnum;
use log::{info, warn};
use serde_json::json;
use std::fs;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum FeeModel {
    /// One fee rate for every fill
    #[default]
    Fixed,
    /// Stored taker fee history for the symbol
    Schedule,
}

pub struct BacktestArgs {
    pub pair: PairSpec,
    pub strategy: String,
    pub params: StrategyParams,
    pub risk: RiskParams,
    pub bars: BarQuery,
    pub fee_model: FeeModel,
    pub show_trades: usize,
    pub trades_out: Option<PathBuf>,
}

pub async fn run(app: &AppContext, args: BacktestArgs) -> Result<()> {
    let BacktestArgs {
        pair,
        strategy: strategy_name,
        params,
        mut risk,
        bars,
        fee_model,
        show_trades,
        trades_out,
    } = args;

    let mut strategy = create_strategy(&strategy_name, &params)?;
    info!(
        "Backtesting {} on {} [{}]",
        strategy.id(),
        pair,
        format_params(&params)
    );

    if fee_model == FeeModel::Schedule {
        let db = app.database().await?;
        let symbol = pair.symbol.clone();
        let schedule = retry_db_operation!(format!("fee schedule for {}", symbol), db.fetch_fee_schedule(&symbol))?;
        if schedule.is_empty() {
            warn!(
                "No stored fees for {}; falling back to fixed {} bps",
                symbol, risk.fee_bps
            );
        } else {
            info!("Using {} stored fee points for {}", schedule.points().len(), symbol);
            risk.fee_schedule = Some(schedule);
        }
    }

    let data = app.market_data(&pair, &bars).await?;
    let (report, trades) = backtest(
        &pair.symbol,
        &pair.interval,
        data.bars(),
        strategy.as_mut(),
        &risk,
    )?;

    println!("{}", backtest_summary(&report));
    if show_trades > 0 && !trades.is_empty() {
        let skip = trades.len().saturating_sub(show_trades);
        println!("Last {} trades:", trades.len() - skip);
        for trade in &trades[skip..] {
            println!("  {}", format_trade(trade));
        }
    }

    if let Some(path) = trades_out {
        let payload = json!({
            "report": report,
            "strategy": strategy.id(),
            "params": params,
            "trades": trades,
        });
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        fs::write(&path, serde_json::to_string_pretty(&payload)?)
            .with_context(|| format!("Failed to write trades to {}", path.display()))?;
        info!("Wrote {} trades to {}", trades.len(), path.display());
    }

    Ok(())
}
