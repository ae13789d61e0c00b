use crate::error::{EngineError, EngineResult};
use crate::indicators::{ema_alpha, ema_update, RollingMeanStd, WilderRsi};

/// True when a series moves from at-or-below a level to strictly above it
pub fn crossed_above(prev: f64, prev_level: f64, current: f64, level: f64) -> bool {
    prev <= prev_level && current > level
}

/// True when a series moves from at-or-above a level to strictly below it
pub fn crossed_below(prev: f64, prev_level: f64, current: f64, level: f64) -> bool {
    prev >= prev_level && current < level
}

/// Ensure an RSI threshold lies strictly inside (0, 100)
pub fn check_rsi_threshold(name: &str, value: f64) -> EngineResult<f64> {
    if value.is_finite() && value > 0.0 && value < 100.0 {
        Ok(value)
    } else {
        Err(EngineError::invalid(name, "RSI thresholds must be in (0, 100)"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossEvents {
    pub crossed_up: bool,
    pub crossed_dn: bool,
}

/// Fast/slow EMA pair reporting crossovers between consecutive updates.
#[derive(Debug, Clone)]
pub struct EmaCrossCore {
    alpha_fast: f64,
    alpha_slow: f64,
    fast_ema: Option<f64>,
    slow_ema: Option<f64>,
}

impl EmaCrossCore {
    pub fn new(fast: usize, slow: usize) -> EngineResult<Self> {
        if fast == 0 {
            return Err(EngineError::invalid("fast", "must be > 0"));
        }
        if fast >= slow {
            return Err(EngineError::invalid(
                "fast",
                format!("fast period ({fast}) must be < slow period ({slow})"),
            ));
        }
        Ok(Self {
            alpha_fast: ema_alpha(fast),
            alpha_slow: ema_alpha(slow),
            fast_ema: None,
            slow_ema: None,
        })
    }

    pub fn reset(&mut self) {
        self.fast_ema = None;
        self.slow_ema = None;
    }

    pub fn update(&mut self, price: f64) -> Option<CrossEvents> {
        let prev_fast = self.fast_ema;
        let prev_slow = self.slow_ema;
        let fast = ema_update(self.alpha_fast, prev_fast, price);
        let slow = ema_update(self.alpha_slow, prev_slow, price);
        self.fast_ema = Some(fast);
        self.slow_ema = Some(slow);

        let (pf, ps) = (prev_fast?, prev_slow?);
        Some(CrossEvents {
            crossed_up: crossed_above(pf, ps, fast, slow),
            crossed_dn: crossed_below(pf, ps, fast, slow),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub lower: f64,
    pub mid: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BollingerEvents {
    pub cross_up_upper: bool,
    pub cross_down_lower: bool,
    pub cross_below_mid: bool,
    pub cross_above_mid: bool,
}

impl BollingerEvents {
    pub fn any(&self) -> bool {
        self.cross_up_upper || self.cross_down_lower || self.cross_below_mid || self.cross_above_mid
    }
}

/// Bollinger bands over closes. Crossings compare the current close with the
/// bands computed on the previous bar.
#[derive(Debug, Clone)]
pub struct BollingerCore {
    mult: f64,
    stats: RollingMeanStd,
    prev_close: Option<f64>,
    prev_bands: Option<Bands>,
}

impl BollingerCore {
    pub fn new(period: usize, mult: f64) -> EngineResult<Self> {
        if !(mult.is_finite() && mult > 0.0) {
            return Err(EngineError::invalid("mult", "must be > 0"));
        }
        Ok(Self {
            mult,
            stats: RollingMeanStd::new(period)?,
            prev_close: None,
            prev_bands: None,
        })
    }

    pub fn reset(&mut self) {
        self.stats.reset();
        self.prev_close = None;
        self.prev_bands = None;
    }

    pub fn update(&mut self, close: f64) -> (BollingerEvents, Option<Bands>) {
        let mut events = BollingerEvents::default();
        if let (Some(pc), Some(prev)) = (self.prev_close, self.prev_bands) {
            events.cross_up_upper = crossed_above(pc, prev.upper, close, prev.upper);
            events.cross_down_lower = crossed_below(pc, prev.lower, close, prev.lower);
            events.cross_below_mid = crossed_below(pc, prev.mid, close, prev.mid);
            events.cross_above_mid = crossed_above(pc, prev.mid, close, prev.mid);
        }

        let bands = self.stats.update(close).map(|(mean, std)| Bands {
            lower: mean - self.mult * std,
            mid: mean,
            upper: mean + self.mult * std,
        });
        self.prev_bands = bands;
        self.prev_close = Some(close);
        (events, bands)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RsiReading {
    pub prev_rsi: f64,
    pub rsi: f64,
    pub ema_ok_long: bool,
    pub ema_ok_short: bool,
    pub ema_cross_down: bool,
    pub ema_cross_up: bool,
}

/// Wilder RSI with an optional EMA-of-close regime filter (`ema_filter == 0`
/// disables it).
#[derive(Debug, Clone)]
pub struct RsiCore {
    rsi_calc: WilderRsi,
    ema_filter: usize,
    alpha_ema: f64,
    rsi: Option<f64>,
    ema: Option<f64>,
    last_close: Option<f64>,
}

impl RsiCore {
    pub fn new(period: usize, ema_filter: usize) -> EngineResult<Self> {
        Ok(Self {
            rsi_calc: WilderRsi::new(period)?,
            ema_filter,
            alpha_ema: if ema_filter > 0 {
                ema_alpha(ema_filter)
            } else {
                0.0
            },
            rsi: None,
            ema: None,
            last_close: None,
        })
    }

    pub fn reset(&mut self) {
        self.rsi_calc.reset();
        self.rsi = None;
        self.ema = None;
        self.last_close = None;
    }

    pub fn filter_enabled(&self) -> bool {
        self.ema_filter > 0
    }

    /// Returns a reading once two consecutive RSI values exist.
    pub fn update(&mut self, close: f64) -> Option<RsiReading> {
        let prev_rsi = self.rsi;
        let prev_ema = self.ema;
        let prev_close = self.last_close.unwrap_or(close);

        let rsi = self.rsi_calc.update(close);
        self.rsi = rsi;
        if self.filter_enabled() {
            self.ema = Some(ema_update(self.alpha_ema, self.ema, close));
        }
        self.last_close = Some(close);

        let (prev_rsi, rsi) = (prev_rsi?, rsi?);

        let (ema_ok_long, ema_ok_short, ema_cross_down, ema_cross_up) =
            match (self.filter_enabled(), prev_ema, self.ema) {
                (false, _, _) => (true, true, false, false),
                (true, prev_ema, Some(ema)) => {
                    let cross_down =
                        prev_ema.is_some_and(|pe| crossed_below(prev_close, pe, close, ema));
                    let cross_up =
                        prev_ema.is_some_and(|pe| crossed_above(prev_close, pe, close, ema));
                    (close > ema, close < ema, cross_down, cross_up)
                }
                (true, _, None) => (false, false, false, false),
            };

        Some(RsiReading {
            prev_rsi,
            rsi,
            ema_ok_long,
            ema_ok_short,
            ema_cross_down,
            ema_cross_up,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_cross_requires_fast_below_slow() {
        assert!(EmaCrossCore::new(5, 5).is_err());
        assert!(EmaCrossCore::new(8, 5).is_err());
        assert!(EmaCrossCore::new(3, 5).is_ok());
    }

    #[test]
    fn ema_cross_reports_up_and_down_crossings() {
        let mut core = EmaCrossCore::new(3, 5).unwrap();
        assert!(core.update(1.0).is_none());

        let mut ups = 0;
        let mut downs = 0;
        for price in [2.0, 3.0, 2.0, 1.0, 0.5, 2.0, 3.0, 4.0] {
            let events = core.update(price).unwrap();
            assert!(!(events.crossed_up && events.crossed_dn));
            ups += events.crossed_up as usize;
            downs += events.crossed_dn as usize;
        }
        assert!(ups >= 1);
        assert!(downs >= 1);

        core.reset();
        assert!(core.update(10.0).is_none());
    }

    #[test]
    fn ema_cross_first_move_from_equal_emas_counts_as_cross() {
        let mut core = EmaCrossCore::new(2, 4).unwrap();
        core.update(10.0);
        let events = core.update(11.0).unwrap();
        assert!(events.crossed_up);
        assert!(!events.crossed_dn);
    }

    #[test]
    fn bollinger_events_use_previous_bands() {
        let mut core = BollingerCore::new(3, 1.0).unwrap();
        let (events, bands) = core.update(10.0);
        assert!(!events.any() && bands.is_none());
        core.update(10.0);
        let (events, bands) = core.update(10.0);
        assert!(!events.any());
        let flat = bands.unwrap();
        assert_eq!((flat.lower, flat.mid, flat.upper), (10.0, 10.0, 10.0));

        let (events, _) = core.update(11.0);
        assert!(events.cross_up_upper);
        assert!(events.cross_above_mid);
        assert!(!events.cross_below_mid);
        assert!(!events.cross_down_lower);
    }

    #[test]
    fn bollinger_detects_drop_through_mid_and_lower() {
        let mut core = BollingerCore::new(3, 1.0).unwrap();
        for c in [10.0, 10.0, 10.0] {
            core.update(c);
        }
        let (events, _) = core.update(9.0);
        assert!(events.cross_below_mid);
        assert!(events.cross_down_lower);
        assert!(!events.cross_up_upper);
    }

    #[test]
    fn bollinger_rejects_bad_parameters() {
        assert!(BollingerCore::new(1, 2.0).is_err());
        assert!(BollingerCore::new(20, 0.0).is_err());
    }

    #[test]
    fn rsi_core_waits_for_two_readings() {
        let mut core = RsiCore::new(2, 0).unwrap();
        assert!(core.update(1.0).is_none());
        assert!(core.update(1.1).is_none());
        // first RSI value, no previous yet
        assert!(core.update(1.2).is_none());
        let reading = core.update(1.1).unwrap();
        assert_eq!(reading.prev_rsi, 100.0);
        assert!(reading.rsi < 100.0);
        assert!(reading.ema_ok_long && reading.ema_ok_short);
        assert!(!reading.ema_cross_down && !reading.ema_cross_up);
    }

    #[test]
    fn rsi_core_ema_filter_tracks_regime() {
        let mut core = RsiCore::new(5, 3).unwrap();
        let mut last = None;
        for c in [1.0, 1.1, 1.2, 1.15, 1.25, 1.3, 1.35] {
            last = core.update(c);
        }
        let reading = last.unwrap();
        assert!(reading.ema_ok_long);
        assert!(!reading.ema_ok_short);

        let reading = core.update(0.5).unwrap();
        assert!(reading.ema_cross_down);
        assert!(!reading.ema_ok_long);
        assert!(reading.ema_ok_short);
    }

    #[test]
    fn rsi_thresholds_must_be_inside_open_interval() {
        assert!(check_rsi_threshold("entry", 0.0).is_err());
        assert!(check_rsi_threshold("entry", 100.0).is_err());
        assert_eq!(check_rsi_threshold("entry", 30.0).unwrap(), 30.0);
    }
}
