//! Technical indicators computed from candle series.
//!
//! All functions expect candles ordered oldest to newest and return `None`
//! when there is not enough history.

use rust_decimal::prelude::ToPrimitive;

use crate::domain::{Candle, Indicators};

pub const SMA_PERIOD: usize = 20;
pub const RSI_PERIOD: usize = 14;
pub const ATR_PERIOD: usize = 14;
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_STD_DEV: f64 = 2.0;

fn closes(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .filter_map(|c| c.close.to_f64())
        .collect()
}

/// Simple moving average of the last `period` closes
pub fn sma(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let prices = closes(&candles[candles.len() - period..]);
    if prices.len() < period {
        return None;
    }
    Some(prices.iter().sum::<f64>() / period as f64)
}

/// RSI using Wilder's smoothing
pub fn rsi(candles: &[Candle], period: usize) -> Option<f64> {
    let prices = closes(candles);
    if period == 0 || prices.len() < period + 1 {
        return None;
    }

    let changes: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();

    let (mut avg_gain, mut avg_loss) =
        changes
            .iter()
            .take(period)
            .fold((0.0, 0.0), |(g, l), &change| {
                if change > 0.0 {
                    (g + change, l)
                } else {
                    (g, l - change)
                }
            });
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    for &change in changes.iter().skip(period) {
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        Some(100.0)
    } else {
        let rs = avg_gain / avg_loss;
        Some(100.0 - (100.0 / (1.0 + rs)))
    }
}

/// Average true range, Wilder-smoothed
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let true_ranges: Vec<f64> = candles
        .windows(2)
        .filter_map(|w| {
            let prev_close = w[0].close.to_f64()?;
            let high = w[1].high.to_f64()?;
            let low = w[1].low.to_f64()?;
            Some(
                (high - low)
                    .max((high - prev_close).abs())
                    .max((low - prev_close).abs()),
            )
        })
        .collect();

    if true_ranges.len() < period {
        return None;
    }

    let mut value = true_ranges.iter().take(period).sum::<f64>() / period as f64;
    for tr in true_ranges.iter().skip(period) {
        value = (value * (period as f64 - 1.0) + tr) / period as f64;
    }
    Some(value)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// (upper - lower) / middle * 100
    pub width_percent: f64,
}

pub fn bollinger(candles: &[Candle], period: usize, std_dev_multiplier: f64) -> Option<BollingerBands> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let prices = closes(&candles[candles.len() - period..]);
    if prices.len() < period {
        return None;
    }

    let mean = prices.iter().sum::<f64>() / period as f64;
    let variance = prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();

    let upper = mean + std_dev * std_dev_multiplier;
    let lower = mean - std_dev * std_dev_multiplier;
    let width_percent = if mean != 0.0 {
        (upper - lower) / mean * 100.0
    } else {
        0.0
    };

    Some(BollingerBands {
        upper,
        middle: mean,
        lower,
        width_percent,
    })
}

/// Compute the standard indicator set for one candle series
pub fn compute(candles: &[Candle]) -> Indicators {
    let bands = bollinger(candles, BOLLINGER_PERIOD, BOLLINGER_STD_DEV);
    Indicators {
        sma_20: sma(candles, SMA_PERIOD),
        rsi_14: rsi(candles, RSI_PERIOD),
        atr_14: atr(candles, ATR_PERIOD),
        bollinger_upper: bands.map(|b| b.upper),
        bollinger_lower: bands.map(|b| b.lower),
        bollinger_width_percent: bands.map(|b| b.width_percent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn series(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .map(|&c| {
                let close = Decimal::try_from(c).unwrap();
                Candle {
                    open_time: Utc::now(),
                    open: close,
                    high: close + Decimal::ONE,
                    low: close - Decimal::ONE,
                    close,
                    volume: Decimal::ONE,
                }
            })
            .collect()
    }

    #[test]
    fn sma_of_constant_series() {
        let candles = series(&[10.0; 25]);
        assert_eq!(sma(&candles, 20), Some(10.0));
        assert_eq!(sma(&candles[..5], 20), None);
    }

    #[test]
    fn rsi_is_max_without_losses() {
        let candles = series(&(1..=20).map(|i| i as f64).collect::<Vec<_>>());
        assert_eq!(rsi(&candles, 14), Some(100.0));
    }

    #[test]
    fn flat_series_has_zero_band_width() {
        let candles = series(&[50.0; 20]);
        let bands = bollinger(&candles, 20, 2.0).unwrap();
        assert_eq!(bands.width_percent, 0.0);
        assert_eq!(bands.middle, 50.0);
    }

    #[test]
    fn atr_reflects_range() {
        // high - low is always 2 and closes are flat
        let candles = series(&[100.0; 16]);
        let value = atr(&candles, 14).unwrap();
        assert!((value - 2.0).abs() < 1e-9);
    }

    #[test]
    fn compute_handles_short_history() {
        let indicators = compute(&series(&[1.0, 2.0, 3.0]));
        assert!(indicators.sma_20.is_none());
        assert!(indicators.bollinger_width_percent.is_none());
    }
}
