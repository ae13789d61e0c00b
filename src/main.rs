use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use log::info;
use qryptify::{
    commands::{
        backfill,
        backtest::{self, BacktestArgs, FeeModel},
        export_bars,
        optimize::{self, OptimizeArgs},
        seed_bars, snapshot_fees,
    },
    config::{parse_pair, IngestorConfig},
    context::{AppContext, BarQuery},
    models::{PairSpec, RiskParams},
    optimizer::SweepGrid,
    param_utils::StrategyParams,
};
use std::env;
use std::path::PathBuf;

const DEFAULT_INGESTOR_CONFIG: &str = "config/ingestor.json";
const DEFAULT_OPTIMIZER_OUT_DIR: &str = "reports/optimizer";
const DEFAULT_SWEEP_LOOKBACK: usize = 32_132;

#[derive(Parser)]
#[command(name = "qryptify")]
#[command(about = "Candlestick backtesting, parameter sweeps and Binance futures data ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Risk settings shared by backtests and sweeps.
#[derive(Args, Clone, Debug)]
struct BaseRiskArgs {
    /// Starting equity in quote currency
    #[arg(long, default_value_t = 10_000.0)]
    equity: f64,
    /// ATR period used for stops and sizing
    #[arg(long, default_value_t = 14)]
    atr: usize,
    /// Fee per fill in basis points of notional
    #[arg(long = "fee-bps", default_value_t = 4.0)]
    fee_bps: f64,
    /// Slippage per fill in basis points of price
    #[arg(long = "slip-bps", default_value_t = 1.0)]
    slip_bps: f64,
    /// Quantity step (0 disables rounding)
    #[arg(long = "qty-step", default_value_t = 0.0)]
    qty_step: f64,
    /// Minimum order quantity
    #[arg(long = "min-qty", default_value_t = 0.0)]
    min_qty: f64,
    /// Minimum order notional
    #[arg(long = "min-notional", default_value_t = 0.0)]
    min_notional: f64,
    /// Price tick used to round stops (0 disables rounding)
    #[arg(long = "price-tick", default_value_t = 0.0)]
    price_tick: f64,
    /// ATR multiple for the trailing stop (0 disables trailing)
    #[arg(long = "atr-trail", default_value_t = 0.0)]
    atr_trail: f64,
    /// Favorable move in ATRs required before trailing starts
    #[arg(long = "atr-trail-trigger", default_value_t = 0.0)]
    atr_trail_trigger: f64,
}

impl BaseRiskArgs {
    fn to_risk_params(&self, risk_per_trade: f64, atr_mult_stop: f64) -> RiskParams {
        RiskParams {
            start_equity: self.equity,
            risk_per_trade,
            atr_period: self.atr,
            atr_mult_stop,
            fee_bps: self.fee_bps,
            slippage_bps: self.slip_bps,
            qty_step: self.qty_step,
            min_qty: self.min_qty,
            min_notional: self.min_notional,
            price_tick: self.price_tick,
            atr_mult_trail: self.atr_trail,
            atr_trail_trigger_mult: self.atr_trail_trigger,
            fee_schedule: None,
        }
    }
}

/// Which bars to load.
#[derive(Args, Clone, Debug)]
struct BarArgs {
    /// Only the most recent N bars
    #[arg(long)]
    lookback: Option<usize>,
    /// Earliest bar open time (RFC 3339)
    #[arg(long, value_parser = parse_timestamp)]
    start: Option<DateTime<Utc>>,
    /// Latest bar open time (RFC 3339)
    #[arg(long, value_parser = parse_timestamp)]
    end: Option<DateTime<Utc>>,
    /// Read bars from a snapshot written by `export-bars` instead of the database
    #[arg(long = "data-file", value_name = "PATH")]
    data_file: Option<PathBuf>,
}

impl BarArgs {
    fn to_query(&self, default_lookback: Option<usize>) -> BarQuery {
        BarQuery {
            lookback: self.lookback.or(default_lookback),
            start: self.start,
            end: self.end,
            data_file: self.data_file.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest one strategy on one pair
    Backtest {
        /// Pair as SYMBOL/interval, e.g. BTCUSDT/1h
        #[arg(long, value_parser = parse_pair)]
        pair: PairSpec,
        /// Strategy name (ema, ema_ls, bollinger, bollinger_ls, rsi, rsi_ls)
        #[arg(long)]
        strategy: String,
        /// Strategy parameter as key=value; repeatable
        #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, f64)>,
        /// Fraction of equity risked per trade
        #[arg(long, default_value_t = 0.01)]
        risk: f64,
        /// Stop distance in ATRs
        #[arg(long = "atr-mult", default_value_t = 2.0)]
        atr_mult: f64,
        #[command(flatten)]
        base: BaseRiskArgs,
        #[command(flatten)]
        bars: BarArgs,
        /// Fee model for fills
        #[arg(long = "fee-model", value_enum, default_value_t = FeeModel::Fixed)]
        fee_model: FeeModel,
        /// Number of trailing trades to print
        #[arg(long = "show-trades", default_value_t = 10)]
        show_trades: usize,
        /// Write the report and all trades as JSON
        #[arg(long = "trades-out", value_name = "PATH")]
        trades_out: Option<PathBuf>,
    },
    /// Sweep strategy parameters and risk settings over one or more pairs
    Optimize {
        /// Comma-separated SYMBOL/interval list
        #[arg(long, value_delimiter = ',', required = true, value_parser = parse_pair)]
        pairs: Vec<PairSpec>,
        /// Strategy families to sweep
        #[arg(long, value_delimiter = ',', default_values_t = ["ema".to_string(), "bollinger".to_string(), "rsi".to_string()])]
        strategies: Vec<String>,
        /// Fast EMA periods
        #[arg(long, value_delimiter = ',', default_values_t = [10, 20, 30, 50])]
        fast: Vec<usize>,
        /// Slow EMA periods
        #[arg(long, value_delimiter = ',', default_values_t = [50, 100, 200])]
        slow: Vec<usize>,
        /// Risk fractions per trade
        #[arg(long, value_delimiter = ',', default_values_t = [0.003, 0.005, 0.01])]
        risk: Vec<f64>,
        /// ATR stop multiples
        #[arg(long = "atr-mult", value_delimiter = ',', default_values_t = [2.0, 2.5, 3.0])]
        atr_mult: Vec<f64>,
        #[command(flatten)]
        base: BaseRiskArgs,
        #[command(flatten)]
        bars: BarArgs,
        /// Drawdown cap in quote currency (<= 0 disables)
        #[arg(long = "dd-cap", default_value_t = 3_000.0)]
        dd_cap: f64,
        /// Drawdown penalty in the ranking score pnl - lambda * dd
        #[arg(long, default_value_t = 0.5)]
        lambda: f64,
        /// Rows in the markdown top-results table
        #[arg(long = "top-k", default_value_t = 10)]
        top_k: usize,
        /// Directory for the summary and JSON exports
        #[arg(long = "out-dir", default_value = DEFAULT_OPTIMIZER_OUT_DIR)]
        out_dir: PathBuf,
        /// Hide the progress bar
        #[arg(long = "no-progress")]
        no_progress: bool,
    },
    /// Backfill historical klines from Binance futures into the database
    Backfill {
        /// Ingestor config (JSON)
        #[arg(long, default_value = DEFAULT_INGESTOR_CONFIG)]
        config: PathBuf,
        /// Override the configured pairs
        #[arg(long, value_delimiter = ',', value_parser = parse_pair)]
        pairs: Option<Vec<PairSpec>>,
        /// Pairs backfilled at the same time
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },
    /// Store current Binance futures maker/taker fees per symbol
    SnapshotFees {
        /// Ingestor config (JSON) supplying pairs and endpoint
        #[arg(long, default_value = DEFAULT_INGESTOR_CONFIG)]
        config: PathBuf,
        /// Override the configured pairs
        #[arg(long, value_delimiter = ',', value_parser = parse_pair)]
        pairs: Option<Vec<PairSpec>>,
        /// Print the rates without writing them
        #[arg(long = "dry-run")]
        dry_run: bool,
    },
    /// Export one pair's bars to a snapshot file for offline runs
    ExportBars {
        #[arg(long, value_parser = parse_pair)]
        pair: PairSpec,
        #[command(flatten)]
        bars: BarArgs,
        /// Destination file for the snapshot
        #[arg(short, long = "output", value_name = "PATH")]
        output: PathBuf,
    },
    /// Insert a synthetic bar series for local testing
    SeedBars {
        #[arg(long, value_parser = parse_pair)]
        pair: PairSpec,
        /// Number of bars (10 to 1 000 000)
        #[arg(long, default_value_t = 500)]
        rows: usize,
        /// Random seed for the price walk
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

fn parse_param(raw: &str) -> Result<(String, f64), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing parameter name in '{}'", raw));
    }
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|err| format!("invalid value for {}: {}", key, err))?;
    Ok((key.to_string(), value))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| format!("invalid RFC 3339 timestamp '{}': {}", raw, err))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let Cli { command } = cli;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let database_url = env::var("DATABASE_URL").ok();
    if database_url.is_none() && command_requires_database(&command) {
        return Err(anyhow!(
            "DATABASE_URL must be set for this command. For offline runs, pass --data-file with a bar snapshot."
        ));
    }
    let app_context = AppContext::initialize(database_url).await?;

    info!("Starting qryptify. Not financial advice. Backtests do not predict live results.");

    match command {
        Commands::Backtest {
            pair,
            strategy,
            params,
            risk,
            atr_mult,
            base,
            bars,
            fee_model,
            show_trades,
            trades_out,
        } => {
            let args = BacktestArgs {
                pair,
                strategy,
                params: params.into_iter().collect::<StrategyParams>(),
                risk: base.to_risk_params(risk, atr_mult),
                bars: bars.to_query(None),
                fee_model,
                show_trades,
                trades_out,
            };
            backtest::run(&app_context, args).await?;
        }
        Commands::Optimize {
            pairs,
            strategies,
            fast,
            slow,
            risk,
            atr_mult,
            base,
            bars,
            dd_cap,
            lambda,
            top_k,
            out_dir,
            no_progress,
        } => {
            let grid = SweepGrid {
                strategies,
                fast,
                slow,
                risks: risk,
                atr_mults: atr_mult,
                base_risk: base.to_risk_params(0.0, 0.0),
                ..SweepGrid::default()
            };
            let args = OptimizeArgs {
                pairs,
                grid,
                bars: bars.to_query(Some(DEFAULT_SWEEP_LOOKBACK)),
                dd_cap: (dd_cap > 0.0).then_some(dd_cap),
                lambda,
                top_k,
                out_dir,
                show_progress: !no_progress,
            };
            optimize::run(&app_context, args).await?;
        }
        Commands::Backfill {
            config,
            pairs,
            concurrency,
        } => {
            backfill::run(&app_context, &config, pairs, concurrency).await?;
        }
        Commands::SnapshotFees {
            config,
            pairs,
            dry_run,
        } => {
            let (pairs, endpoint) = match pairs {
                Some(pairs) => (pairs, None),
                None => {
                    let cfg = IngestorConfig::load(&config)?;
                    (cfg.pairs, Some(cfg.rest.endpoint))
                }
            };
            snapshot_fees::run(&app_context, &pairs, endpoint.as_deref(), dry_run).await?;
        }
        Commands::ExportBars { pair, bars, output } => {
            export_bars::run(&app_context, &pair, &bars.to_query(None), &output).await?;
        }
        Commands::SeedBars { pair, rows, seed } => {
            seed_bars::run(&app_context, &pair, rows, seed).await?;
        }
    }

    Ok(())
}

fn command_requires_database(command: &Commands) -> bool {
    match command {
        Commands::Backtest {
            bars, fee_model, ..
        } => bars.data_file.is_none() || *fee_model == FeeModel::Schedule,
        Commands::Optimize { bars, .. } => bars.data_file.is_none(),
        Commands::SnapshotFees { dry_run, .. } => !dry_run,
        Commands::ExportBars { .. } | Commands::SeedBars { .. } => true,
        // The ingestor config may carry its own DSN.
        Commands::Backfill { .. } => false,
    }
}
