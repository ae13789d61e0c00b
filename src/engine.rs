use crate::error::{EngineError, EngineResult};
use crate::indicators::{true_range, WilderAtr};
use crate::models::{BacktestReport, Bar, RiskParams, Signal, Trade};
use crate::performance::PerformanceCalculator;
use crate::strategy::Strategy;
use crate::trading_rules::{
    apply_fee, evaluate_stop, initial_stop, price_with_slippage, size_position, trail_stop, Side,
    SizingOutcome, SizingParams, TrailingStopParams, BPS_DENOMINATOR,
};
use chrono::{DateTime, Utc};
use log::debug;

#[derive(Debug, Clone, Copy)]
struct Position {
    /// Positive for long, negative for short.
    qty: f64,
    entry_price: f64,
    entry_ts: DateTime<Utc>,
    stop: f64,
    open_fees: f64,
    /// Highest high since entry for longs, lowest low for shorts.
    extreme: f64,
}

impl Position {
    fn is_short(&self) -> bool {
        self.qty < 0.0
    }

    fn direction(&self) -> i32 {
        if self.is_short() {
            -1
        } else {
            1
        }
    }
}

struct BacktestState<'a> {
    risk: &'a RiskParams,
    equity: f64,
    max_equity: f64,
    position: Option<Position>,
    trades: Vec<Trade>,
    equity_series: Vec<f64>,
    traded_notional: f64,
}

impl<'a> BacktestState<'a> {
    fn new(risk: &'a RiskParams, bar_count: usize) -> Self {
        Self {
            risk,
            equity: risk.start_equity,
            max_equity: risk.start_equity,
            position: None,
            trades: Vec::new(),
            equity_series: Vec::with_capacity(bar_count),
            traded_notional: 0.0,
        }
    }

    fn direction(&self) -> i32 {
        self.position.map_or(0, |p| p.direction())
    }

    /// `price` is the final fill price, slippage included.
    fn close_position(&mut self, price: f64, ts: DateTime<Utc>, reason: &str) {
        let Some(pos) = self.position.take() else {
            return;
        };
        let exit_fees = apply_fee(pos.qty * price, self.risk.fee_bps_at(ts));
        let pnl = (price - pos.entry_price) * pos.qty - exit_fees - pos.open_fees;
        self.equity += pnl;
        self.traded_notional += pos.qty.abs() * (pos.entry_price + price);
        self.trades.push(Trade {
            entry_ts: pos.entry_ts,
            entry_price: pos.entry_price,
            exit_ts: ts,
            exit_price: price,
            qty: pos.qty,
            pnl,
            fees: exit_fees + pos.open_fees,
            reason: reason.to_string(),
        });
    }

    fn update_trailing(&mut self, bar: &Bar, atr: Option<f64>) {
        let risk = self.risk;
        let Some(pos) = self.position.as_mut() else {
            return;
        };
        pos.extreme = if pos.is_short() {
            pos.extreme.min(bar.low)
        } else {
            pos.extreme.max(bar.high)
        };

        let Some(atr) = atr else {
            return;
        };
        if let Some(stop) = trail_stop(TrailingStopParams {
            entry_price: pos.entry_price,
            extreme: pos.extreme,
            current_stop: pos.stop,
            atr,
            trail_mult: risk.atr_mult_trail,
            trigger_mult: risk.atr_trail_trigger_mult,
            price_tick: risk.price_tick,
            is_short: pos.is_short(),
        }) {
            pos.stop = stop;
        }
    }

    fn check_stop(&mut self, bar: &Bar) {
        let Some(pos) = self.position else {
            return;
        };
        if let Some(fill) = evaluate_stop(bar, pos.stop, pos.is_short(), self.risk.slippage_bps) {
            debug!(
                "{} at {} (stop {:.6}, fill {:.6})",
                fill.reason, bar.ts, pos.stop, fill.price
            );
            self.close_position(fill.price, bar.ts, fill.reason);
        }
    }

    /// Act on a signal raised at the close of the current bar, filling at the
    /// open of `next`.
    fn apply_signal(&mut self, signal: &Signal, next: &Bar, atr: Option<f64>) {
        let desired = signal.target.clamp(-1, 1);
        let current = self.direction();
        if desired == current {
            return;
        }

        if let Some(pos) = self.position {
            let price = price_with_slippage(
                next.open,
                self.risk.slippage_bps,
                Side::closing(pos.qty),
            );
            let reason = if signal.reason.is_empty() {
                "signal_exit"
            } else {
                signal.reason.as_str()
            };
            self.close_position(price, next.ts, reason);
        }

        if desired != 0 {
            self.open_position(desired, next, atr);
        }
    }

    fn open_position(&mut self, direction: i32, next: &Bar, atr: Option<f64>) {
        let Some(atr) = atr else {
            debug!("entry at {} skipped: ATR warming up", next.ts);
            return;
        };
        let risk = self.risk;
        let price = price_with_slippage(next.open, risk.slippage_bps, Side::opening(direction));

        let (qty, stop_distance) = match size_position(SizingParams {
            equity: self.equity,
            risk_per_trade: risk.risk_per_trade,
            atr,
            atr_mult_stop: risk.atr_mult_stop,
            entry_price: price,
            qty_step: risk.qty_step,
            min_qty: risk.min_qty,
            min_notional: risk.min_notional,
        }) {
            SizingOutcome::Sized { qty, stop_distance } => (qty, stop_distance),
            rejected => {
                debug!("entry at {} rejected: {:?}", next.ts, rejected);
                return;
            }
        };

        let is_short = direction < 0;
        self.position = Some(Position {
            qty: if is_short { -qty } else { qty },
            entry_price: price,
            entry_ts: next.ts,
            stop: initial_stop(price, stop_distance, is_short, risk.price_tick),
            open_fees: apply_fee(qty * price, risk.fee_bps_at(next.ts)),
            extreme: price,
        });
    }

    fn mark_to_market(&mut self, close: f64) {
        let mtm = match self.position {
            Some(pos) => self.equity + (close - pos.entry_price) * pos.qty,
            None => self.equity,
        };
        if mtm > self.max_equity {
            self.max_equity = mtm;
        }
        self.equity_series.push(mtm);
    }
}

/// Replay `strategy` over `bars` with a single position. Signals raised on a
/// bar's close fill at the next bar's open; stops are checked against each
/// bar's open and range before the signal of that bar is acted on.
pub fn backtest(
    symbol: &str,
    interval: &str,
    bars: &[Bar],
    strategy: &mut dyn Strategy,
    risk: &RiskParams,
) -> EngineResult<(BacktestReport, Vec<Trade>)> {
    let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
        return Err(EngineError::EmptyBars);
    };
    risk.validate()?;

    let mut atr_calc = WilderAtr::new(risk.atr_period)?;
    let mut state = BacktestState::new(risk, bars.len());
    let mut prev_close: Option<f64> = None;

    strategy.on_start();

    for (i, bar) in bars.iter().enumerate() {
        let atr = atr_calc.update(true_range(bar.high, bar.low, prev_close));
        let signal = strategy.on_bar(i, bar);

        if risk.atr_mult_trail > 0.0 {
            state.update_trailing(bar, atr);
        }
        state.check_stop(bar);

        if let (Some(signal), Some(next)) = (signal.as_ref(), bars.get(i + 1)) {
            state.apply_signal(signal, next, atr);
        }

        state.mark_to_market(bar.close);
        prev_close = Some(bar.close);
    }

    if let Some(pos) = state.position {
        let price = price_with_slippage(last.close, risk.slippage_bps, Side::closing(pos.qty));
        state.close_position(price, last.ts, "final_close");
    }

    strategy.on_finish();

    let stats = PerformanceCalculator::trade_stats(&state.trades);
    let avg_fee_bps = if state.traded_notional > 0.0 {
        stats.total_fees / state.traded_notional * BPS_DENOMINATOR
    } else {
        0.0
    };

    let report = BacktestReport {
        symbol: symbol.to_string(),
        interval: interval.to_string(),
        bars: bars.len(),
        trades: state.trades.len(),
        pnl: stats.total_pnl,
        fees: stats.total_fees,
        equity_end: state.equity,
        max_dd: PerformanceCalculator::calculate_max_drawdown(&state.equity_series),
        win_rate: stats.win_rate,
        avg_win: stats.avg_win,
        avg_loss: stats.avg_loss,
        cagr: PerformanceCalculator::calculate_cagr(
            risk.start_equity,
            state.equity,
            first.ts,
            last.ts,
        ),
        avg_fee_bps,
        fee_model: risk.fee_model().to_string(),
    };

    Ok((report, state.trades))
}
