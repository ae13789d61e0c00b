use crate::models::Trade;
use chrono::{DateTime, Utc};

const SECONDS_PER_YEAR: f64 = 365.25 * 24.0 * 60.0 * 60.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TradeStats {
    pub total_pnl: f64,
    pub total_fees: f64,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
}

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    /// Trade-level aggregates. A trade wins only with strictly positive PnL.
    pub fn trade_stats(trades: &[Trade]) -> TradeStats {
        let mut wins = Vec::new();
        let mut losses = Vec::new();
        for trade in trades {
            if trade.pnl > 0.0 {
                wins.push(trade.pnl);
            } else {
                losses.push(trade.pnl);
            }
        }

        let win_rate = if trades.is_empty() {
            0.0
        } else {
            wins.len() as f64 / trades.len() as f64
        };

        TradeStats {
            total_pnl: trades.iter().map(|t| t.pnl).sum(),
            total_fees: trades.iter().map(|t| t.fees).sum(),
            win_rate,
            avg_win: Self::average(&wins),
            avg_loss: Self::average(&losses),
        }
    }

    /// Compound annual growth over the bar span, with the span floored at one
    /// second. `None` when the span is negative or the result is not finite.
    pub fn calculate_cagr(
        start_equity: f64,
        end_equity: f64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Option<f64> {
        if start_equity <= 0.0 || end < start {
            return None;
        }

        let span_secs = ((end - start).num_milliseconds() as f64 / 1000.0).max(1.0);
        let years = span_secs / SECONDS_PER_YEAR;
        if years <= 0.0 {
            return None;
        }

        let ratio = end_equity / start_equity;
        if ratio <= 0.0 {
            return Some(-1.0);
        }

        let cagr = ratio.powf(1.0 / years) - 1.0;
        cagr.is_finite().then_some(cagr)
    }

    /// Largest peak-to-current drop, with the peak seeded from the first point.
    pub fn calculate_max_drawdown(equity_series: &[f64]) -> f64 {
        let Some(&first) = equity_series.first() else {
            return 0.0;
        };

        let mut peak = first;
        let mut max_drawdown = 0.0;
        for &value in equity_series {
            if value > peak {
                peak = value;
            }
            let drawdown = peak - value;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
        }
        max_drawdown
    }

    fn average(values: &[f64]) -> f64 {
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }
}
