use crate::error::{EngineError, EngineResult};
use crate::models::{Bar, Signal};
use crate::param_utils::StrategyParams;

/// Bar-close strategy. Implementations see one closed bar at a time and return
/// a target exposure; sizing and risk belong to the engine.
pub trait Strategy {
    fn id(&self) -> &str;
    /// Reset all accumulated state before a run.
    fn on_start(&mut self);
    fn on_bar(&mut self, index: usize, bar: &Bar) -> Option<Signal>;
    fn on_finish(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeMode {
    LongOnly,
    LongShort,
}

impl TradeMode {
    pub fn allows_short(self) -> bool {
        matches!(self, TradeMode::LongShort)
    }
}

#[path = "strategies/ema_cross.rs"]
pub mod ema_cross;

pub use ema_cross::EmaCrossStrategy;

#[path = "strategies/bollinger.rs"]
pub mod bollinger;

pub use bollinger::BollingerStrategy;

#[path = "strategies/rsi.rs"]
pub mod rsi;

pub use rsi::RsiStrategy;

/// Registry names accepted by `create_strategy`.
pub const STRATEGY_NAMES: &[&str] = &[
    "ema",
    "ema_cross",
    "ema_ls",
    "ema_cross_long_short",
    "bollinger",
    "boll",
    "bb",
    "bollinger_ls",
    "bb_ls",
    "rsi",
    "rsi_mr",
    "rsi_scalp",
    "rsi_ls",
];

pub fn create_strategy(
    name: &str,
    parameters: &StrategyParams,
) -> EngineResult<Box<dyn Strategy + Send + Sync>> {
    match name {
        "ema" | "ema_cross" => Ok(Box::new(EmaCrossStrategy::new(
            parameters,
            TradeMode::LongOnly,
        )?)),
        "ema_ls" | "ema_cross_long_short" => Ok(Box::new(EmaCrossStrategy::new(
            parameters,
            TradeMode::LongShort,
        )?)),
        "bollinger" | "boll" | "bb" => Ok(Box::new(BollingerStrategy::new(
            parameters,
            TradeMode::LongOnly,
        )?)),
        "bollinger_ls" | "bb_ls" => Ok(Box::new(BollingerStrategy::new(
            parameters,
            TradeMode::LongShort,
        )?)),
        "rsi" | "rsi_mr" | "rsi_scalp" => Ok(Box::new(RsiStrategy::new(
            parameters,
            TradeMode::LongOnly,
        )?)),
        "rsi_ls" => Ok(Box::new(RsiStrategy::new(
            parameters,
            TradeMode::LongShort,
        )?)),
        _ => Err(EngineError::UnknownStrategy(name.to_string())),
    }
}
