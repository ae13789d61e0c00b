use crate::error::{EngineError, EngineResult};
use std::collections::VecDeque;

/// Smoothing factor for an EMA of `period` samples.
pub fn ema_alpha(period: usize) -> f64 {
    2.0 / (period as f64 + 1.0)
}

pub fn ema_update(alpha: f64, prev: Option<f64>, value: f64) -> f64 {
    match prev {
        Some(prev) => alpha * value + (1.0 - alpha) * prev,
        None => value,
    }
}

pub fn true_range(high: f64, low: f64, prev_close: Option<f64>) -> f64 {
    match prev_close {
        Some(pc) => (high - low).max((high - pc).abs()).max((low - pc).abs()),
        None => high - low,
    }
}

fn wilder_smooth(avg: f64, value: f64, period: usize) -> f64 {
    (avg * (period as f64 - 1.0) + value) / period as f64
}

#[derive(Debug, Clone)]
pub struct WilderRsi {
    period: usize,
    prev_close: Option<f64>,
    sum_gain: f64,
    sum_loss: f64,
    count: usize,
    averages: Option<(f64, f64)>,
}

impl WilderRsi {
    pub fn new(period: usize) -> EngineResult<Self> {
        if period <= 1 {
            return Err(EngineError::invalid("rsi_period", "must be > 1"));
        }
        Ok(Self {
            period,
            prev_close: None,
            sum_gain: 0.0,
            sum_loss: 0.0,
            count: 0,
            averages: None,
        })
    }

    pub fn reset(&mut self) {
        self.prev_close = None;
        self.sum_gain = 0.0;
        self.sum_loss = 0.0;
        self.count = 0;
        self.averages = None;
    }

    pub fn update(&mut self, close: f64) -> Option<f64> {
        let prev = self.prev_close.replace(close)?;

        let change = close - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);

        let (avg_gain, avg_loss) = match self.averages {
            Some((avg_gain, avg_loss)) => (
                wilder_smooth(avg_gain, gain, self.period),
                wilder_smooth(avg_loss, loss, self.period),
            ),
            None => {
                self.sum_gain += gain;
                self.sum_loss += loss;
                self.count += 1;
                if self.count < self.period {
                    return None;
                }
                (
                    self.sum_gain / self.period as f64,
                    self.sum_loss / self.period as f64,
                )
            }
        };
        self.averages = Some((avg_gain, avg_loss));

        let rsi = if avg_gain == 0.0 && avg_loss == 0.0 {
            50.0
        } else if avg_loss == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
        };
        Some(rsi)
    }
}

#[derive(Debug, Clone)]
pub struct WilderAtr {
    period: usize,
    count: usize,
    sum_tr: f64,
    atr: Option<f64>,
}

impl WilderAtr {
    pub fn new(period: usize) -> EngineResult<Self> {
        if period == 0 {
            return Err(EngineError::invalid("atr_period", "must be > 0"));
        }
        Ok(Self {
            period,
            count: 0,
            sum_tr: 0.0,
            atr: None,
        })
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.sum_tr = 0.0;
        self.atr = None;
    }

    pub fn update(&mut self, tr: f64) -> Option<f64> {
        self.count += 1;
        if self.count <= self.period {
            self.sum_tr += tr;
            if self.count == self.period {
                self.atr = Some(self.sum_tr / self.period as f64);
            }
            return self.atr;
        }
        let prev = self.atr.unwrap_or(tr);
        self.atr = Some(wilder_smooth(prev, tr, self.period));
        self.atr
    }
}

/// Population mean/std over a fixed trailing window.
#[derive(Debug, Clone)]
pub struct RollingMeanStd {
    period: usize,
    window: VecDeque<f64>,
    sum: f64,
    sumsq: f64,
}

impl RollingMeanStd {
    pub fn new(period: usize) -> EngineResult<Self> {
        if period <= 1 {
            return Err(EngineError::invalid("period", "must be > 1"));
        }
        Ok(Self {
            period,
            window: VecDeque::with_capacity(period + 1),
            sum: 0.0,
            sumsq: 0.0,
        })
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.sum = 0.0;
        self.sumsq = 0.0;
    }

    pub fn update(&mut self, value: f64) -> Option<(f64, f64)> {
        self.window.push_back(value);
        self.sum += value;
        self.sumsq += value * value;
        if self.window.len() > self.period {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old;
                self.sumsq -= old * old;
            }
        }
        if self.window.len() < self.period {
            return None;
        }
        let n = self.period as f64;
        let mean = self.sum / n;
        // clamp float drift
        let var = (self.sumsq / n - mean * mean).max(0.0);
        Some((mean, var.sqrt()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statrs::statistics::Statistics;

    #[test]
    fn ema_seeds_then_smooths() {
        let alpha = ema_alpha(3);
        assert!((alpha - 0.5).abs() < 1e-12);
        let first = ema_update(alpha, None, 10.0);
        assert_eq!(first, 10.0);
        let second = ema_update(alpha, Some(first), 20.0);
        assert!((second - 15.0).abs() < 1e-12);
    }

    #[test]
    fn true_range_uses_previous_close_gaps() {
        assert_eq!(true_range(11.0, 9.0, None), 2.0);
        assert_eq!(true_range(11.0, 9.0, Some(10.0)), 2.0);
        assert_eq!(true_range(11.0, 10.5, Some(8.0)), 3.0);
        assert_eq!(true_range(9.0, 8.5, Some(12.0)), 3.5);
    }

    #[test]
    fn rsi_rejects_short_periods() {
        assert!(WilderRsi::new(1).is_err());
        assert!(WilderRsi::new(2).is_ok());
    }

    #[test]
    fn rsi_warms_up_over_period_changes() {
        let mut rsi = WilderRsi::new(3).unwrap();
        assert_eq!(rsi.update(10.0), None);
        assert_eq!(rsi.update(11.0), None);
        assert_eq!(rsi.update(12.0), None);
        // three gains, no losses
        assert_eq!(rsi.update(13.0), Some(100.0));
    }

    #[test]
    fn rsi_flat_series_is_neutral() {
        let mut rsi = WilderRsi::new(2).unwrap();
        let values: Vec<_> = [5.0, 5.0, 5.0, 5.0]
            .iter()
            .map(|&c| rsi.update(c))
            .collect();
        assert_eq!(values, vec![None, None, Some(50.0), Some(50.0)]);
    }

    #[test]
    fn rsi_wilder_smoothing_matches_hand_calculation() {
        let mut rsi = WilderRsi::new(2).unwrap();
        rsi.update(10.0);
        rsi.update(12.0); // +2
        let seeded = rsi.update(11.0).unwrap(); // -1 -> avg gain 1.0, avg loss 0.5
        assert!((seeded - (100.0 - 100.0 / 3.0)).abs() < 1e-9);

        // +1 -> avg gain 1.0, avg loss 0.25
        let smoothed = rsi.update(12.0).unwrap();
        assert!((smoothed - 80.0).abs() < 1e-9);

        rsi.reset();
        assert_eq!(rsi.update(12.0), None);
    }

    #[test]
    fn atr_returns_none_until_period_samples() {
        for period in 1..6 {
            let mut atr = WilderAtr::new(period).unwrap();
            for call in 1..=period + 3 {
                let value = atr.update(1.0 + call as f64 * 0.1);
                if call < period {
                    assert!(value.is_none(), "period {period} call {call}");
                } else {
                    assert!(value.is_some(), "period {period} call {call}");
                }
            }
        }
    }

    #[test]
    fn atr_seeds_with_mean_then_wilder_smooths() {
        let mut atr = WilderAtr::new(3).unwrap();
        atr.update(1.0);
        atr.update(2.0);
        assert_eq!(atr.update(3.0), Some(2.0));
        let next = atr.update(5.0).unwrap();
        assert!((next - 3.0).abs() < 1e-12);
        assert!(WilderAtr::new(0).is_err());
    }

    #[test]
    fn rolling_mean_std_matches_population_statistics() {
        let values = [3.0, 7.0, 1.0, 9.0, 4.0, 6.0, 2.0];
        let period = 4;
        let mut stats = RollingMeanStd::new(period).unwrap();
        for (i, &v) in values.iter().enumerate() {
            let out = stats.update(v);
            if i + 1 < period {
                assert!(out.is_none());
                continue;
            }
            let window = &values[i + 1 - period..=i];
            let (mean, std) = out.unwrap();
            assert!((mean - window.mean()).abs() < 1e-9);
            assert!((std - window.population_std_dev()).abs() < 1e-9);
        }
    }

    #[test]
    fn rolling_std_never_negative_on_constant_input() {
        let mut stats = RollingMeanStd::new(3).unwrap();
        let mut last = None;
        for _ in 0..10 {
            last = stats.update(0.1 + 0.2);
        }
        let (_, std) = last.unwrap();
        assert!(std >= 0.0);
        assert!(std < 1e-6);
        assert!(RollingMeanStd::new(1).is_err());
    }
}
