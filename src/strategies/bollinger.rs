use super::TradeMode;
use crate::error::EngineResult;
use crate::models::{Bar, Signal};
use crate::param_utils::{check_known_params, get_param_f64, get_param_usize, StrategyParams};
use crate::strategy_utils::BollingerCore;

const PARAM_KEYS: &[&str] = &["period", "mult"];

/// Bollinger breakout: enter on a close through the outer band, exit when the
/// close crosses back through the mid band.
pub struct BollingerStrategy {
    id: &'static str,
    mode: TradeMode,
    core: BollingerCore,
}

impl BollingerStrategy {
    pub fn new(parameters: &StrategyParams, mode: TradeMode) -> EngineResult<Self> {
        check_known_params(parameters, PARAM_KEYS)?;
        let period = get_param_usize(parameters, "period", 20)?;
        let mult = get_param_f64(parameters, "mult", 2.0)?;
        Ok(Self {
            id: match mode {
                TradeMode::LongOnly => "bollinger",
                TradeMode::LongShort => "bollinger_ls",
            },
            mode,
            core: BollingerCore::new(period, mult)?,
        })
    }
}

impl super::Strategy for BollingerStrategy {
    fn id(&self) -> &str {
        self.id
    }

    fn on_start(&mut self) {
        self.core.reset();
    }

    fn on_bar(&mut self, _index: usize, bar: &Bar) -> Option<Signal> {
        let (events, _) = self.core.update(bar.close);
        match self.mode {
            TradeMode::LongOnly => {
                if events.cross_below_mid {
                    Some(Signal::flat("bb_cross_below_mid"))
                } else if events.cross_up_upper {
                    Some(Signal::long("bb_breakout_up"))
                } else {
                    None
                }
            }
            TradeMode::LongShort => {
                if events.cross_below_mid {
                    Some(Signal::flat("bb_long_exit"))
                } else if events.cross_above_mid {
                    Some(Signal::flat("bb_short_exit"))
                } else if events.cross_up_upper {
                    Some(Signal::long("bb_breakout_up"))
                } else if events.cross_down_lower {
                    Some(Signal::short("bb_breakout_down"))
                } else {
                    None
                }
            }
        }
    }
}
