use crate::models::{BacktestReport, PairSpec, RiskParams, Trade};
use crate::optimizer::SweepResult;
use std::fmt::Write;

fn fmt_cagr(cagr: Option<f64>) -> String {
    match cagr {
        Some(value) => format!("{:.2}%", value * 100.0),
        None => "n/a".to_string(),
    }
}

/// Multi-line human summary of one backtest run.
pub fn backtest_summary(report: &BacktestReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}/{} over {} bars", report.symbol, report.interval, report.bars);
    let _ = writeln!(
        out,
        "  trades={} win_rate={:.1}% avg_win={:.2} avg_loss={:.2}",
        report.trades,
        report.win_rate * 100.0,
        report.avg_win,
        report.avg_loss
    );
    let _ = writeln!(
        out,
        "  pnl={:.2} fees={:.2} equity_end={:.2} max_dd={:.2} cagr={}",
        report.pnl,
        report.fees,
        report.equity_end,
        report.max_dd,
        fmt_cagr(report.cagr)
    );
    let _ = write!(
        out,
        "  fee_model={} avg_fee_bps={:.3}",
        report.fee_model, report.avg_fee_bps
    );
    out
}

pub fn format_trade(trade: &Trade) -> String {
    format!(
        "{} {} {:.6} @ {:.4} -> {} @ {:.4} pnl={:.2} fees={:.2} ({})",
        if trade.is_long() { "LONG " } else { "SHORT" },
        trade.entry_ts.format("%Y-%m-%d %H:%M"),
        trade.qty.abs(),
        trade.entry_price,
        trade.exit_ts.format("%Y-%m-%d %H:%M"),
        trade.exit_price,
        trade.pnl,
        trade.fees,
        trade.reason
    )
}

fn fmt_num(value: f64) -> String {
    let text = format!("{:.6}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text.is_empty() || text == "-" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

/// CLI invocation that replays one sweep row as a single backtest.
pub fn reproduce_command(pair: &PairSpec, lookback: Option<usize>, base: &RiskParams, row: &SweepResult) -> String {
    let mut cmd = format!("qryptify backtest --pair {} --strategy {}", pair, row.strategy);
    if let Some(n) = lookback {
        let _ = write!(cmd, " --lookback {}", n);
    }
    let _ = write!(
        cmd,
        " --equity {} --risk {} --atr {} --atr-mult {} --fee-bps {} --slip-bps {}",
        fmt_num(base.start_equity),
        fmt_num(row.risk),
        base.atr_period,
        fmt_num(row.atr_mult),
        fmt_num(base.fee_bps),
        fmt_num(base.slippage_bps)
    );
    let extras = [
        ("--qty-step", base.qty_step),
        ("--min-qty", base.min_qty),
        ("--min-notional", base.min_notional),
        ("--price-tick", base.price_tick),
        ("--atr-trail", base.atr_mult_trail),
        ("--atr-trail-trigger", base.atr_trail_trigger_mult),
    ];
    for (flag, value) in extras {
        if value > 0.0 {
            let _ = write!(cmd, " {} {}", flag, fmt_num(value));
        }
    }
    for (key, value) in &row.params {
        let _ = write!(cmd, " --param {}={}", key, fmt_num(*value));
    }
    cmd
}

pub struct SweepSection<'a> {
    pub pair: &'a PairSpec,
    pub lookback: Option<usize>,
    pub base_risk: &'a RiskParams,
    pub lambda: f64,
    pub top_k: usize,
    pub best: &'a SweepResult,
    pub ranked: &'a [SweepResult],
}

fn fmt_row_cagr(cagr: Option<f64>) -> String {
    match cagr {
        Some(value) => format!("{:.2}%", value * 100.0),
        None => "".to_string(),
    }
}

/// Markdown section for one pair: best row, reproduce command and top-K table.
pub fn sweep_markdown_section(section: &SweepSection) -> String {
    let SweepSection {
        pair,
        lookback,
        base_risk,
        lambda,
        top_k,
        best,
        ranked,
    } = section;

    let mut out = String::new();
    let _ = writeln!(out, "## {} {}\n", pair.symbol, pair.interval);
    let _ = writeln!(
        out,
        "Best (score=pnl-{}*dd): {} | {} | risk={} | atr={} | pnl={:.2} | dd={:.2} | trades={} | eq={:.2} | cagr={}\n",
        fmt_num(*lambda),
        best.strategy,
        best.params_label(),
        fmt_num(best.risk),
        fmt_num(best.atr_mult),
        best.pnl,
        best.dd,
        best.trades,
        best.equity_end,
        fmt_row_cagr(best.cagr)
    );
    let _ = writeln!(out, "Reproduce:\n");
    let _ = writeln!(out, "```bash");
    let _ = writeln!(out, "{}", reproduce_command(pair, *lookback, base_risk, best));
    let _ = writeln!(out, "```\n");
    let _ = writeln!(out, "Top Results\n");
    let _ = writeln!(out, "| Strategy | Params | Risk | ATR | PnL | DD | Trades | Equity | CAGR |");
    let _ = writeln!(out, "|---|---|---:|---:|---:|---:|---:|---:|---:|");
    for row in ranked.iter().take(*top_k) {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {:.2} | {:.2} | {} | {:.2} | {} |",
            row.strategy,
            row.params_label(),
            fmt_num(row.risk),
            fmt_num(row.atr_mult),
            row.pnl,
            row.dd,
            row.trades,
            row.equity_end,
            fmt_row_cagr(row.cagr)
        );
    }
    out
}

pub fn sweep_markdown(sections: &[String]) -> String {
    let mut out = String::from("# Optimizer Summary\n\n");
    for section in sections {
        out.push_str(section);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param_utils::params_from;
    use chrono::{TimeZone, Utc};

    fn pair() -> PairSpec {
        PairSpec {
            symbol: "BTCUSDT".into(),
            interval: "1h".into(),
        }
    }

    fn row() -> SweepResult {
        SweepResult {
            strategy: "ema".into(),
            params: params_from([("fast", 20.0), ("slow", 100.0)]),
            risk: 0.005,
            atr_mult: 2.5,
            pnl: 1234.5,
            dd: 321.0,
            trades: 42,
            cagr: Some(0.125),
            equity_end: 11_234.5,
        }
    }

    #[test]
    fn reproduce_command_replays_best_row() {
        let cmd = reproduce_command(&pair(), Some(5000), &RiskParams::default(), &row());
        assert_eq!(
            cmd,
            "qryptify backtest --pair BTCUSDT/1h --strategy ema --lookback 5000 --equity 10000 \
             --risk 0.005 --atr 14 --atr-mult 2.5 --fee-bps 4 --slip-bps 1 --param fast=20 --param slow=100"
        );
    }

    #[test]
    fn markdown_section_has_best_and_table() {
        let best = row();
        let ranked = vec![row(), SweepResult { pnl: 10.0, cagr: None, ..row() }];
        let base = RiskParams::default();
        let pair = pair();
        let text = sweep_markdown_section(&SweepSection {
            pair: &pair,
            lookback: None,
            base_risk: &base,
            lambda: 0.5,
            top_k: 1,
            best: &best,
            ranked: &ranked,
        });
        assert!(text.starts_with("## BTCUSDT 1h"));
        assert!(text.contains("Best (score=pnl-0.5*dd): ema | fast=20, slow=100 | risk=0.005"));
        assert!(text.contains("cagr=12.50%"));
        assert!(text.contains("```bash\nqryptify backtest --pair BTCUSDT/1h"));
        // top_k limits the table to one row
        assert_eq!(text.matches("| ema |").count(), 1);

        let doc = sweep_markdown(&[text]);
        assert!(doc.starts_with("# Optimizer Summary\n\n## BTCUSDT 1h"));
    }

    #[test]
    fn summary_and_trade_lines() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let trade = Trade {
            entry_ts: ts,
            entry_price: 100.0,
            exit_ts: ts,
            exit_price: 101.0,
            qty: -2.0,
            pnl: 2.0,
            fees: 0.1,
            reason: "stop".into(),
        };
        let line = format_trade(&trade);
        assert!(line.starts_with("SHORT 2024-03-01 12:00 2.000000 @ 100.0000"));
        assert!(line.ends_with("(stop)"));

        let report = BacktestReport {
            symbol: "BTCUSDT".into(),
            interval: "1h".into(),
            bars: 10,
            trades: 1,
            pnl: 2.0,
            fees: 0.1,
            equity_end: 10_002.0,
            max_dd: 0.0,
            win_rate: 1.0,
            avg_win: 2.0,
            avg_loss: 0.0,
            cagr: None,
            avg_fee_bps: 4.0,
            fee_model: "fixed_bps".into(),
        };
        let summary = backtest_summary(&report);
        assert!(summary.contains("win_rate=100.0%"));
        assert!(summary.contains("cagr=n/a"));
        assert!(summary.ends_with("fee_model=fixed_bps avg_fee_bps=4.000"));
    }
}
