use super::TradeMode;
use crate::error::{EngineError, EngineResult};
use crate::models::{Bar, Signal};
use crate::param_utils::{
    check_known_params, get_param_f64, get_param_f64_any, get_param_usize, StrategyParams,
};
use crate::strategy_utils::{check_rsi_threshold, crossed_above, crossed_below, RsiCore};

const PARAM_KEYS: &[&str] = &[
    "period",
    "entry",
    "entry_low",
    "exit",
    "exit_low",
    "entry_high",
    "exit_high",
    "ema",
];

/// RSI mean reversion with an optional EMA regime filter.
///
/// Long side: enter when RSI crosses up through `entry`, take profit when it
/// crosses up through `exit`. Short side mirrors it with `entry_high` (cross
/// down to enter) and `exit_high` (cross down to cover). When the filter is
/// on, entries require the close on the matching side of the EMA and a close
/// crossing the EMA against the position exits it.
pub struct RsiStrategy {
    id: &'static str,
    mode: TradeMode,
    entry_low: f64,
    exit_low: f64,
    entry_high: f64,
    exit_high: f64,
    core: RsiCore,
}

impl RsiStrategy {
    pub fn new(parameters: &StrategyParams, mode: TradeMode) -> EngineResult<Self> {
        check_known_params(parameters, PARAM_KEYS)?;
        let period = get_param_usize(parameters, "period", 14)?;
        let entry_low = get_param_f64_any(parameters, &["entry", "entry_low"], 30.0)?;
        let exit_low = get_param_f64_any(parameters, &["exit", "exit_low"], 55.0)?;
        let entry_high = get_param_f64(parameters, "entry_high", 70.0)?;
        let exit_high = get_param_f64(parameters, "exit_high", 45.0)?;
        let default_filter = match mode {
            TradeMode::LongOnly => 200,
            TradeMode::LongShort => 0,
        };
        let ema_filter = get_param_usize(parameters, "ema", default_filter)?;

        check_rsi_threshold("entry", entry_low)?;
        check_rsi_threshold("exit", exit_low)?;
        if exit_low <= entry_low {
            return Err(EngineError::invalid("exit", "exit must be > entry"));
        }
        if mode.allows_short() {
            check_rsi_threshold("entry_high", entry_high)?;
            check_rsi_threshold("exit_high", exit_high)?;
            if exit_high >= entry_high {
                return Err(EngineError::invalid(
                    "exit_high",
                    "exit_high must be < entry_high",
                ));
            }
        }

        Ok(Self {
            id: match mode {
                TradeMode::LongOnly => "rsi_scalp",
                TradeMode::LongShort => "rsi_ls",
            },
            mode,
            entry_low,
            exit_low,
            entry_high,
            exit_high,
            core: RsiCore::new(period, ema_filter)?,
        })
    }
}

impl super::Strategy for RsiStrategy {
    fn id(&self) -> &str {
        self.id
    }

    fn on_start(&mut self) {
        self.core.reset();
    }

    fn on_bar(&mut self, _index: usize, bar: &Bar) -> Option<Signal> {
        let r = self.core.update(bar.close)?;
        let up_through = |level: f64| crossed_above(r.prev_rsi, level, r.rsi, level);
        let down_through = |level: f64| crossed_below(r.prev_rsi, level, r.rsi, level);

        match self.mode {
            TradeMode::LongOnly => {
                if up_through(self.exit_low) {
                    Some(Signal::flat("rsi_tp"))
                } else if r.ema_cross_down {
                    Some(Signal::flat("ema_filter_exit"))
                } else if up_through(self.entry_low) && r.ema_ok_long {
                    Some(Signal::long("rsi_rebound"))
                } else {
                    None
                }
            }
            TradeMode::LongShort => {
                if up_through(self.exit_low) || r.ema_cross_down {
                    Some(Signal::flat("rsi_long_exit"))
                } else if down_through(self.exit_high) || r.ema_cross_up {
                    Some(Signal::flat("rsi_short_exit"))
                } else if up_through(self.entry_low) && r.ema_ok_long {
                    Some(Signal::long("rsi_long_entry"))
                } else if down_through(self.entry_high) && r.ema_ok_short {
                    Some(Signal::short("rsi_short_entry"))
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param_utils::params_from;
    use crate::strategy::Strategy;
    use chrono::{Duration, TimeZone, Utc};

    fn bar(i: i64, close: f64) -> Bar {
        Bar {
            ts: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(15 * i),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    fn run(strategy: &mut RsiStrategy, closes: &[f64]) -> Vec<Option<Signal>> {
        strategy.on_start();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| strategy.on_bar(i, &bar(i as i64, c)))
            .collect()
    }

    #[test]
    fn scalp_rebound_then_take_profit() {
        let params = params_from([("period", 2.0), ("ema", 0.0)]);
        let mut strategy = RsiStrategy::new(&params, TradeMode::LongOnly).unwrap();
        let signals = run(&mut strategy, &[10.0, 9.0, 8.0, 9.0, 10.0]);
        assert_eq!(signals[..3], [None, None, None]);
        assert_eq!(signals[3], Some(Signal::long("rsi_rebound")));
        assert_eq!(signals[4], Some(Signal::flat("rsi_tp")));
    }

    #[test]
    fn scalp_exits_when_close_drops_through_filter_ema() {
        let params = params_from([("period", 2.0), ("ema", 3.0)]);
        let mut strategy = RsiStrategy::new(&params, TradeMode::LongOnly).unwrap();
        let signals = run(&mut strategy, &[10.0, 11.0, 12.0, 13.0, 9.0]);
        assert_eq!(signals[3], None);
        assert_eq!(signals[4], Some(Signal::flat("ema_filter_exit")));
    }

    #[test]
    fn two_sided_short_entry_and_cover() {
        let params = params_from([("period", 2.0)]);
        let mut strategy = RsiStrategy::new(&params, TradeMode::LongShort).unwrap();
        let signals = run(&mut strategy, &[10.0, 11.0, 12.0, 11.0, 10.0]);
        assert_eq!(signals[3], Some(Signal::short("rsi_short_entry")));
        assert_eq!(signals[4], Some(Signal::flat("rsi_short_exit")));
    }

    #[test]
    fn rejects_inverted_or_out_of_range_thresholds() {
        let inverted = params_from([("entry", 60.0), ("exit", 55.0)]);
        assert!(RsiStrategy::new(&inverted, TradeMode::LongOnly).is_err());

        let out_of_range = params_from([("entry", 0.0)]);
        assert!(RsiStrategy::new(&out_of_range, TradeMode::LongOnly).is_err());

        let short_inverted = params_from([("entry_high", 40.0), ("exit_high", 45.0)]);
        assert!(RsiStrategy::new(&short_inverted, TradeMode::LongShort).is_err());
        // short thresholds are ignored for long-only runs
        assert!(RsiStrategy::new(&short_inverted, TradeMode::LongOnly).is_ok());

        let short_period = params_from([("period", 1.0)]);
        assert!(RsiStrategy::new(&short_period, TradeMode::LongShort).is_err());
    }
}
