use super::TradeMode;
use crate::error::EngineResult;
use crate::models::{Bar, Signal};
use crate::param_utils::{check_known_params, get_param_usize, StrategyParams};
use crate::strategy_utils::EmaCrossCore;

const PARAM_KEYS: &[&str] = &["fast", "slow"];

pub struct EmaCrossStrategy {
    id: &'static str,
    mode: TradeMode,
    core: EmaCrossCore,
}

impl EmaCrossStrategy {
    pub fn new(parameters: &StrategyParams, mode: TradeMode) -> EngineResult<Self> {
        check_known_params(parameters, PARAM_KEYS)?;
        let fast = get_param_usize(parameters, "fast", 50)?;
        let slow = get_param_usize(parameters, "slow", 200)?;
        Ok(Self {
            id: match mode {
                TradeMode::LongOnly => "ema_cross",
                TradeMode::LongShort => "ema_cross_long_short",
            },
            mode,
            core: EmaCrossCore::new(fast, slow)?,
        })
    }
}

impl super::Strategy for EmaCrossStrategy {
    fn id(&self) -> &str {
        self.id
    }

    fn on_start(&mut self) {
        self.core.reset();
    }

    fn on_bar(&mut self, _index: usize, bar: &Bar) -> Option<Signal> {
        let events = self.core.update(bar.close)?;
        if events.crossed_dn {
            let target = if self.mode.allows_short() { -1 } else { 0 };
            return Some(Signal::new(target, "fast_cross_below_slow"));
        }
        if events.crossed_up {
            return Some(Signal::long("fast_cross_above_slow"));
        }
        None
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
            ts: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(i),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    fn run(strategy: &mut EmaCrossStrategy, closes: &[f64]) -> Vec<Option<Signal>> {
        strategy.on_start();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| strategy.on_bar(i, &bar(i as i64, c)))
            .collect()
    }

    #[test]
    fn long_only_flattens_on_cross_down() {
        let params = params_from([("fast", 2.0), ("slow", 4.0)]);
        let mut strategy = EmaCrossStrategy::new(&params, TradeMode::LongOnly).unwrap();
        let signals = run(&mut strategy, &[10.0, 11.0, 12.0, 9.0, 8.0]);
        assert_eq!(signals[0], None);
        assert_eq!(signals[1], Some(Signal::long("fast_cross_above_slow")));
        let exit = signals.iter().flatten().find(|s| s.target == 0).unwrap();
        assert_eq!(exit.reason, "fast_cross_below_slow");
        assert!(signals.iter().flatten().all(|s| s.target >= 0));
    }

    #[test]
    fn long_short_reverses_on_cross_down() {
        let params = params_from([("fast", 2.0), ("slow", 4.0)]);
        let mut strategy = EmaCrossStrategy::new(&params, TradeMode::LongShort).unwrap();
        let signals = run(&mut strategy, &[10.0, 9.0, 8.0]);
        assert_eq!(signals[1], Some(Signal::short("fast_cross_below_slow")));
        assert_eq!(strategy.id(), "ema_cross_long_short");
    }
}
