use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use qryptify::commands::backtest::{self, BacktestArgs, FeeModel};
use qryptify::commands::optimize::{self, OptimizeArgs};
use qryptify::config::parse_pair;
use qryptify::context::{AppContext, BarQuery};
use qryptify::data_context::{synthetic_klines, MarketData};
use qryptify::database::Database;
use qryptify::models::{ExchangeFee, KlineRow, RiskParams};
use qryptify::optimizer::{SweepGrid, SweepResult};
use qryptify::param_utils::params_from;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = dotenvy::dotenv();
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("qryptify-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

fn write_snapshot(dir: &Path, pair: &str, rows: usize) -> Result<PathBuf> {
    let pair = parse_pair(pair)?;
    let end = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let bars = synthetic_klines(&pair, rows, 99, end)?
        .iter()
        .map(KlineRow::to_bar)
        .collect();
    let path = dir.join("bars.bin");
    MarketData::new(pair, bars).save_to_file(&path)?;
    Ok(path)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn offline_backtest_writes_trades_json() -> Result<()> {
    ensure_test_env();
    let dir = scratch_dir("backtest");
    let snapshot = write_snapshot(&dir, "BTCUSDT/1h", 1_200)?;
    let trades_path = dir.join("out").join("trades.json");

    let app = AppContext::initialize(None).await?;
    backtest::run(
        &app,
        BacktestArgs {
            pair: parse_pair("BTCUSDT/1h")?,
            strategy: "ema".to_string(),
            params: params_from([("fast", 10.0), ("slow", 50.0)]),
            risk: RiskParams::default(),
            bars: BarQuery {
                lookback: Some(1_000),
                data_file: Some(snapshot),
                ..BarQuery::default()
            },
            fee_model: FeeModel::Fixed,
            show_trades: 3,
            trades_out: Some(trades_path.clone()),
        },
    )
    .await?;

    let payload: Value = serde_json::from_str(&fs::read_to_string(&trades_path)?)?;
    assert_eq!(payload["strategy"], "ema_cross");
    assert_eq!(payload["report"]["bars"], 1_000);
    assert_eq!(payload["report"]["fee_model"], "fixed_bps");
    let trades = payload["trades"].as_array().expect("trades array");
    assert_eq!(payload["report"]["trades"].as_u64(), Some(trades.len() as u64));

    fs::remove_dir_all(&dir)?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn offline_snapshot_rejects_other_pair() -> Result<()> {
    ensure_test_env();
    let dir = scratch_dir("mismatch");
    let snapshot = write_snapshot(&dir, "BTCUSDT/1h", 100)?;
    let app = AppContext::initialize(None).await?;
    let query = BarQuery {
        data_file: Some(snapshot),
        ..BarQuery::default()
    };
    let err = app
        .market_data(&parse_pair("ETHUSDT/1h")?, &query)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("ETHUSDT/1h"));
    fs::remove_dir_all(&dir)?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn offline_optimize_writes_summary_and_exports() -> Result<()> {
    ensure_test_env();
    let dir = scratch_dir("optimize");
    let snapshot = write_snapshot(&dir, "BTCUSDT/1h", 800)?;
    let out_dir = dir.join("report");

    let grid = SweepGrid {
        strategies: vec!["ema".into(), "bollinger".into()],
        fast: vec![5, 10],
        slow: vec![30],
        bb_periods: vec![20],
        bb_mults: vec![2.0],
        risks: vec![0.005, 0.01],
        atr_mults: vec![2.0],
        ..SweepGrid::default()
    };
    let app = AppContext::initialize(None).await?;
    optimize::run(
        &app,
        OptimizeArgs {
            pairs: vec![parse_pair("BTCUSDT/1h")?],
            grid,
            bars: BarQuery {
                data_file: Some(snapshot),
                ..BarQuery::default()
            },
            dd_cap: None,
            lambda: 0.5,
            top_k: 5,
            out_dir: out_dir.clone(),
            show_progress: false,
        },
    )
    .await?;

    let summary = fs::read_to_string(out_dir.join("summary.md"))?;
    assert!(summary.starts_with("# Optimizer Summary"));
    assert!(summary.contains("## BTCUSDT 1h"));
    assert!(summary.contains("qryptify backtest --pair BTCUSDT/1h"));

    let grid_rows: Vec<SweepResult> =
        serde_json::from_str(&fs::read_to_string(out_dir.join("BTCUSDT_1h_grid.json"))?)?;
    // (2 ema + 1 bollinger) x 2 risks
    assert_eq!(grid_rows.len(), 6);
    for pair in grid_rows.windows(2) {
        assert!(pair[0].score(0.5) >= pair[1].score(0.5));
    }

    let pareto: Vec<SweepResult> =
        serde_json::from_str(&fs::read_to_string(out_dir.join("BTCUSDT_1h_pareto.json"))?)?;
    assert!(!pareto.is_empty());
    for pair in pareto.windows(2) {
        assert!(pair[0].dd <= pair[1].dd);
        assert!(pair[0].pnl < pair[1].pnl);
    }

    let best: Value = serde_json::from_str(&fs::read_to_string(out_dir.join("best.json"))?)?;
    assert_eq!(best[0]["pair"], "BTCUSDT/1h");

    fs::remove_dir_all(&dir)?;
    Ok(())
}

/// Runs against a disposable database named by `TEST_DATABASE_URL`; skipped
/// when the variable is unset.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn database_round_trip() -> Result<()> {
    ensure_test_env();
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping database round trip");
        return Ok(());
    };

    let mut db = Database::new(&url).await?;
    db.ensure_schema().await?;

    let pair = parse_pair(&format!("T{}USDT/1h", std::process::id()))?;
    let end = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let rows = synthetic_klines(&pair, 50, 5, end)?;

    assert_eq!(db.upsert_klines(&rows).await?, 50);
    // idempotent
    assert_eq!(db.upsert_klines(&rows).await?, 0);

    let all = db
        .fetch_ohlcv(&pair.symbol, &pair.interval, None, None, None)
        .await?;
    assert_eq!(all, rows);

    let bounded = db
        .fetch_ohlcv(
            &pair.symbol,
            &pair.interval,
            Some(rows[10].ts),
            Some(rows[19].ts),
            Some(5),
        )
        .await?;
    assert_eq!(bounded, rows[10..15].to_vec());

    let latest = db.fetch_latest_n(&pair.symbol, &pair.interval, 3).await?;
    assert_eq!(latest, rows[47..].to_vec());

    assert_eq!(db.get_last_closed_ts(&pair.symbol, &pair.interval).await?, None);
    db.set_last_closed_ts(&pair.symbol, &pair.interval, rows[20].close_ts)
        .await?;
    db.set_last_closed_ts(&pair.symbol, &pair.interval, rows[49].close_ts)
        .await?;
    assert_eq!(
        db.get_last_closed_ts(&pair.symbol, &pair.interval).await?,
        Some(rows[49].close_ts)
    );

    let fee = |days: i64, taker: f64| ExchangeFee {
        ts: end - Duration::days(days),
        symbol: pair.symbol.clone(),
        maker_bps: taker / 2.0,
        taker_bps: taker,
        source: "test".to_string(),
    };
    db.upsert_exchange_fees(&[fee(10, 5.0), fee(2, 4.5)]).await?;
    db.upsert_exchange_fees(&[fee(2, 4.0)]).await?;
    let schedule = db.fetch_fee_schedule(&pair.symbol).await?;
    assert_eq!(schedule.points().len(), 2);
    assert_eq!(schedule.bps_at(end), Some(4.0));
    assert_eq!(schedule.bps_at(end - Duration::days(5)), Some(5.0));

    Ok(())
}
