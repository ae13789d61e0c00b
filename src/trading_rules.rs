use crate::models::Bar;

pub const BPS_DENOMINATOR: f64 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Side that opens a position with this sign.
    pub fn opening(direction: i32) -> Self {
        if direction > 0 {
            Side::Buy
        } else {
            Side::Sell
        }
    }

    /// Side that closes a position with this signed quantity.
    pub fn closing(signed_qty: f64) -> Self {
        if signed_qty > 0.0 {
            Side::Sell
        } else {
            Side::Buy
        }
    }
}

pub fn apply_fee(notional: f64, fee_bps: f64) -> f64 {
    notional.abs() * fee_bps / BPS_DENOMINATOR
}

/// Shift a fill price against the trader: up for buys, down for sells.
pub fn price_with_slippage(price: f64, slippage_bps: f64, side: Side) -> f64 {
    let adj = price * slippage_bps / BPS_DENOMINATOR;
    match side {
        Side::Buy => price + adj,
        Side::Sell => price - adj,
    }
}

/// Floor to a multiple of `step`; a step of 0 leaves the value untouched.
pub fn floor_to_step(value: f64, step: f64) -> f64 {
    if step > 0.0 {
        ((value / step).floor() * step).max(0.0)
    } else {
        value
    }
}

pub fn floor_to_tick(price: f64, tick: f64) -> f64 {
    floor_to_step(price, tick)
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopFill {
    pub price: f64,
    pub reason: &'static str,
}

/// Check a resting stop against one bar. A bar that opens through the stop
/// fills at the open; otherwise a touch fills at the stop. Slippage is applied
/// on the closing side.
pub fn evaluate_stop(bar: &Bar, stop: f64, is_short: bool, slippage_bps: f64) -> Option<StopFill> {
    let (gapped, touched, side) = if is_short {
        (bar.open >= stop, bar.high >= stop, Side::Buy)
    } else {
        (bar.open <= stop, bar.low <= stop, Side::Sell)
    };

    if gapped {
        Some(StopFill {
            price: price_with_slippage(bar.open, slippage_bps, side),
            reason: "stop_gap",
        })
    } else if touched {
        Some(StopFill {
            price: price_with_slippage(stop, slippage_bps, side),
            reason: "stop",
        })
    } else {
        None
    }
}

/// Initial protective stop `stop_distance` away from the entry, floored to the
/// tick. Long stops never go below zero.
pub fn initial_stop(entry_price: f64, stop_distance: f64, is_short: bool, tick: f64) -> f64 {
    let raw = if is_short {
        entry_price + stop_distance
    } else {
        (entry_price - stop_distance).max(0.0)
    };
    floor_to_tick(raw, tick)
}

pub struct TrailingStopParams {
    pub entry_price: f64,
    /// Highest high (long) or lowest low (short) since entry.
    pub extreme: f64,
    pub current_stop: f64,
    pub atr: f64,
    pub trail_mult: f64,
    pub trigger_mult: f64,
    pub price_tick: f64,
    pub is_short: bool,
}

/// Ratcheted ATR trailing stop. Returns the new stop only when it tightens the
/// current one and the favorable excursion has reached the trigger.
pub fn trail_stop(params: TrailingStopParams) -> Option<f64> {
    let TrailingStopParams {
        entry_price,
        extreme,
        current_stop,
        atr,
        trail_mult,
        trigger_mult,
        price_tick,
        is_short,
    } = params;

    if trail_mult <= 0.0 || !atr.is_finite() || atr <= 0.0 {
        return None;
    }

    let excursion = if is_short {
        entry_price - extreme
    } else {
        extreme - entry_price
    };
    if excursion < atr * trigger_mult {
        return None;
    }

    let candidate = if is_short {
        floor_to_tick(extreme + atr * trail_mult, price_tick)
    } else {
        floor_to_tick(extreme - atr * trail_mult, price_tick)
    };

    if (!is_short && candidate > current_stop) || (is_short && candidate < current_stop) {
        Some(candidate)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizingParams {
    pub equity: f64,
    pub risk_per_trade: f64,
    pub atr: f64,
    pub atr_mult_stop: f64,
    pub entry_price: f64,
    pub qty_step: f64,
    pub min_qty: f64,
    pub min_notional: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SizingOutcome {
    Sized { qty: f64, stop_distance: f64 },
    NoStopDistance,
    TooSmall { qty: f64 },
    BelowMinNotional { notional: f64 },
}

/// Risk-based sizing: risk `equity * risk_per_trade` over an ATR stop distance.
pub fn size_position(params: SizingParams) -> SizingOutcome {
    let SizingParams {
        equity,
        risk_per_trade,
        atr,
        atr_mult_stop,
        entry_price,
        qty_step,
        min_qty,
        min_notional,
    } = params;

    let stop_distance = atr * atr_mult_stop;
    if !(stop_distance.is_finite() && stop_distance > 0.0) {
        return SizingOutcome::NoStopDistance;
    }

    let risk_cash = equity * risk_per_trade;
    let qty = floor_to_step((risk_cash / stop_distance).max(0.0), qty_step);
    if qty <= 0.0 || qty < min_qty {
        return SizingOutcome::TooSmall { qty };
    }

    let notional = qty * entry_price;
    if notional < min_notional {
        return SizingOutcome::BelowMinNotional { notional };
    }

    SizingOutcome::Sized { qty, stop_distance }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            ts: Utc::now(),
            open,
            high,
            low,
            close,
            volume: 0.0,
        }
    }

    #[test]
    fn fees_and_slippage_are_adverse() {
        assert!((apply_fee(10_000.0, 4.0) - 4.0).abs() < 1e-12);
        assert!((apply_fee(-10_000.0, 4.0) - 4.0).abs() < 1e-12);
        assert!((price_with_slippage(100.0, 10.0, Side::Buy) - 100.1).abs() < 1e-12);
        assert!((price_with_slippage(100.0, 10.0, Side::Sell) - 99.9).abs() < 1e-12);
        assert_eq!(Side::closing(2.0), Side::Sell);
        assert_eq!(Side::closing(-2.0), Side::Buy);
        assert_eq!(Side::opening(-1), Side::Sell);
    }

    #[test]
    fn floors_never_round_up() {
        assert!((floor_to_step(1.2399, 0.01) - 1.23).abs() < 1e-12);
        assert_eq!(floor_to_step(7.9, 0.0), 7.9);
        assert_eq!(floor_to_step(-3.0, 1.0), 0.0);
        assert!((floor_to_tick(101.37, 0.25) - 101.25).abs() < 1e-12);
    }

    #[test]
    fn long_stop_prefers_open_gap() {
        let gap = evaluate_stop(&bar(9.0, 12.0, 8.5, 10.0), 9.5, false, 0.0).unwrap();
        assert_eq!(gap.price, 9.0);
        assert_eq!(gap.reason, "stop_gap");

        let touch = evaluate_stop(&bar(10.0, 12.0, 9.0, 10.0), 9.5, false, 0.0).unwrap();
        assert_eq!(touch.price, 9.5);
        assert_eq!(touch.reason, "stop");

        assert!(evaluate_stop(&bar(10.0, 12.0, 9.6, 10.0), 9.5, false, 0.0).is_none());
    }

    #[test]
    fn short_stop_mirrors_long() {
        let gap = evaluate_stop(&bar(12.5, 12.5, 9.0, 10.0), 12.0, true, 0.0).unwrap();
        assert_eq!((gap.price, gap.reason), (12.5, "stop_gap"));

        let touch = evaluate_stop(&bar(11.5, 12.5, 9.0, 10.0), 12.0, true, 0.0).unwrap();
        assert_eq!((touch.price, touch.reason), (12.0, "stop"));

        assert!(evaluate_stop(&bar(11.5, 12.5, 9.0, 10.0), 13.0, true, 0.0).is_none());

        let slipped = evaluate_stop(&bar(11.5, 12.5, 9.0, 10.0), 12.0, true, 100.0).unwrap();
        assert!((slipped.price - 12.12).abs() < 1e-9);
    }

    #[test]
    fn initial_stop_floors_and_clamps() {
        assert_eq!(initial_stop(100.0, 2.5, false, 1.0), 97.0);
        assert_eq!(initial_stop(100.0, 2.5, true, 1.0), 102.0);
        assert_eq!(initial_stop(1.0, 5.0, false, 0.0), 0.0);
    }

    #[test]
    fn trailing_stop_ratchets_after_trigger() {
        let base = || TrailingStopParams {
            entry_price: 100.0,
            extreme: 104.0,
            current_stop: 98.0,
            atr: 1.0,
            trail_mult: 2.0,
            trigger_mult: 3.0,
            price_tick: 0.0,
            is_short: false,
        };
        assert_eq!(trail_stop(base()), Some(102.0));

        let not_triggered = TrailingStopParams {
            extreme: 102.0,
            ..base()
        };
        assert_eq!(trail_stop(not_triggered), None);

        let looser = TrailingStopParams {
            current_stop: 103.0,
            ..base()
        };
        assert_eq!(trail_stop(looser), None);

        let disabled = TrailingStopParams {
            trail_mult: 0.0,
            ..base()
        };
        assert_eq!(trail_stop(disabled), None);

        let short = TrailingStopParams {
            entry_price: 100.0,
            extreme: 95.0,
            current_stop: 102.0,
            is_short: true,
            ..base()
        };
        assert_eq!(trail_stop(short), Some(97.0));
    }

    #[test]
    fn sizing_applies_step_and_minimums() {
        let params = SizingParams {
            equity: 10_000.0,
            risk_per_trade: 0.01,
            atr: 0.5,
            atr_mult_stop: 1.0,
            entry_price: 100.0,
            qty_step: 0.0,
            min_qty: 0.0,
            min_notional: 0.0,
        };
        assert_eq!(
            size_position(params.clone()),
            SizingOutcome::Sized {
                qty: 200.0,
                stop_distance: 0.5
            }
        );

        let stepped = SizingParams {
            atr: 0.3,
            qty_step: 100.0,
            ..params.clone()
        };
        assert!(matches!(
            size_position(stepped),
            SizingOutcome::Sized { qty, .. } if (qty - 300.0).abs() < 1e-9
        ));

        let too_small = SizingParams {
            min_qty: 500.0,
            ..params.clone()
        };
        assert_eq!(
            size_position(too_small),
            SizingOutcome::TooSmall { qty: 200.0 }
        );

        let floored_to_zero = SizingParams {
            qty_step: 1_000.0,
            ..params.clone()
        };
        assert_eq!(
            size_position(floored_to_zero),
            SizingOutcome::TooSmall { qty: 0.0 }
        );

        let small_notional = SizingParams {
            min_notional: 50_000.0,
            ..params.clone()
        };
        assert!(matches!(
            size_position(small_notional),
            SizingOutcome::BelowMinNotional { .. }
        ));

        let zero_atr = SizingParams { atr: 0.0, ..params };
        assert_eq!(size_position(zero_atr), SizingOutcome::NoStopDistance);
    }
}
