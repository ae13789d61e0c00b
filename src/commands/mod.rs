pub mod backfill;
pub mod backtest;
pub mod export_bars;
pub mod optimize;
pub mod seed_bars;
pub mod snapshot_fees;
