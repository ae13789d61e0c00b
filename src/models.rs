use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One closed OHLCV candle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Target exposure emitted by a strategy: -1 short, 0 flat, +1 long.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub target: i32,
    pub reason: String,
}

impl Signal {
    pub fn new(target: i32, reason: impl Into<String>) -> Self {
        Self {
            target,
            reason: reason.into(),
        }
    }

    pub fn long(reason: impl Into<String>) -> Self {
        Self::new(1, reason)
    }

    pub fn flat(reason: impl Into<String>) -> Self {
        Self::new(0, reason)
    }

    pub fn short(reason: impl Into<String>) -> Self {
        Self::new(-1, reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeePoint {
    pub effective_from: DateTime<Utc>,
    pub bps: f64,
}

/// Step function of fee rates over time. The last point at or before a fill
/// timestamp decides the rate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    points: Vec<FeePoint>,
}

impl FeeSchedule {
    pub fn new(mut points: Vec<FeePoint>) -> Self {
        points.sort_by_key(|p| p.effective_from);
        Self { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[FeePoint] {
        &self.points
    }

    pub fn bps_at(&self, ts: DateTime<Utc>) -> Option<f64> {
        let idx = self.points.partition_point(|p| p.effective_from <= ts);
        if idx == 0 {
            None
        } else {
            Some(self.points[idx - 1].bps)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskParams {
    pub start_equity: f64,
    pub risk_per_trade: f64,
    pub atr_period: usize,
    pub atr_mult_stop: f64,
    pub fee_bps: f64,
    pub slippage_bps: f64,
    /// Exchange rounding constraints; 0 disables each one.
    pub qty_step: f64,
    pub min_qty: f64,
    pub min_notional: f64,
    pub price_tick: f64,
    /// ATR trailing stop; disabled while `atr_mult_trail` is 0.
    pub atr_mult_trail: f64,
    pub atr_trail_trigger_mult: f64,
    #[serde(default)]
    pub fee_schedule: Option<FeeSchedule>,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            start_equity: 10_000.0,
            risk_per_trade: 0.01,
            atr_period: 14,
            atr_mult_stop: 2.0,
            fee_bps: 4.0,
            slippage_bps: 1.0,
            qty_step: 0.0,
            min_qty: 0.0,
            min_notional: 0.0,
            price_tick: 0.0,
            atr_mult_trail: 0.0,
            atr_trail_trigger_mult: 0.0,
            fee_schedule: None,
        }
    }
}

impl RiskParams {
    pub fn validate(&self) -> EngineResult<()> {
        if !(self.start_equity.is_finite() && self.start_equity > 0.0) {
            return Err(EngineError::invalid("start_equity", "must be positive"));
        }
        if self.atr_period == 0 {
            return Err(EngineError::invalid("atr_period", "must be at least 1"));
        }
        let non_negative = [
            ("risk_per_trade", self.risk_per_trade),
            ("atr_mult_stop", self.atr_mult_stop),
            ("fee_bps", self.fee_bps),
            ("slippage_bps", self.slippage_bps),
            ("qty_step", self.qty_step),
            ("min_qty", self.min_qty),
            ("min_notional", self.min_notional),
            ("price_tick", self.price_tick),
            ("atr_mult_trail", self.atr_mult_trail),
            ("atr_trail_trigger_mult", self.atr_trail_trigger_mult),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::invalid(name, "must be a non-negative number"));
            }
        }
        Ok(())
    }

    /// Fee rate in basis points for a fill at `ts`.
    pub fn fee_bps_at(&self, ts: DateTime<Utc>) -> f64 {
        self.fee_schedule
            .as_ref()
            .and_then(|schedule| schedule.bps_at(ts))
            .unwrap_or(self.fee_bps)
    }

    pub fn fee_model(&self) -> &'static str {
        match &self.fee_schedule {
            Some(schedule) if !schedule.is_empty() => "schedule",
            _ => "fixed_bps",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_ts: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_ts: DateTime<Utc>,
    pub exit_price: f64,
    /// Positive for long, negative for short.
    pub qty: f64,
    pub pnl: f64,
    pub fees: f64,
    pub reason: String,
}

impl Trade {
    pub fn is_long(&self) -> bool {
        self.qty > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub symbol: String,
    pub interval: String,
    pub bars: usize,
    pub trades: usize,
    pub pnl: f64,
    pub fees: f64,
    pub equity_end: f64,
    pub max_dd: f64,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub cagr: Option<f64>,
    pub avg_fee_bps: f64,
    pub fee_model: String,
}

/// Exchange kline as stored in the `candlesticks` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KlineRow {
    pub symbol: String,
    pub interval: String,
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_ts: DateTime<Utc>,
    pub quote_volume: f64,
    pub trades: i64,
    pub taker_buy_base: f64,
    pub taker_buy_quote: f64,
}

impl KlineRow {
    pub fn to_bar(&self) -> Bar {
        Bar {
            ts: self.ts,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeFee {
    pub ts: DateTime<Utc>,
    pub symbol: String,
    pub maker_bps: f64,
    pub taker_bps: f64,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairSpec {
    pub symbol: String,
    pub interval: String,
}

impl std::fmt::Display for PairSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.symbol, self.interval)
    }
}
