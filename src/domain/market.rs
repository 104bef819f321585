use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Latest ticker for a symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last: Decimal,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub high_24h: Option<Decimal>,
    pub low_24h: Option<Decimal>,
    pub volume_24h: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl Ticker {
    /// Bid/ask spread as a percentage of last price
    pub fn spread_percent(&self) -> Option<Decimal> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) if self.last > Decimal::ZERO => {
                Some((ask - bid) / self.last * Decimal::ONE_HUNDRED)
            }
            _ => None,
        }
    }
}

/// OHLCV candle, oldest-first within a series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    /// Best first
    pub bids: Vec<BookLevel>,
    /// Best first
    pub asks: Vec<BookLevel>,
    pub timestamp: DateTime<Utc>,
}

impl OrderBook {
    pub fn is_two_sided(&self) -> bool {
        !self.bids.is_empty() && !self.asks.is_empty()
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRate {
    pub rate: Decimal,
    pub next_funding_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenInterest {
    pub amount: Decimal,
    pub value: Option<Decimal>,
}

/// Computed technical indicators for one timeframe
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Indicators {
    pub sma_20: Option<f64>,
    pub rsi_14: Option<f64>,
    pub atr_14: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_lower: Option<f64>,
    /// (upper - lower) / middle * 100
    pub bollinger_width_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsSummary {
    pub headline_count: usize,
    pub sentiment: Option<f64>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnChainSummary {
    pub exchange_net_flow: Option<Decimal>,
    pub whale_transactions: Option<u32>,
    pub summary: String,
}

/// Everything collected for one trading cycle.
///
/// Only `ticker` is mandatory. Other fields are omitted when their
/// fetch failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub ticker: Ticker,
    /// Keyed by timeframe ("1h", "4h", ...)
    pub candles: BTreeMap<String, Vec<Candle>>,
    pub order_book: Option<OrderBook>,
    pub funding_rate: Option<FundingRate>,
    pub open_interest: Option<OpenInterest>,
    /// Keyed by timeframe
    pub indicators: BTreeMap<String, Indicators>,
    pub news: Option<NewsSummary>,
    pub on_chain: Option<OnChainSummary>,
    pub collected_at: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn new(symbol: impl Into<String>, ticker: Ticker) -> Self {
        Self {
            symbol: symbol.into(),
            ticker,
            candles: BTreeMap::new(),
            order_book: None,
            funding_rate: None,
            open_interest: None,
            indicators: BTreeMap::new(),
            news: None,
            on_chain: None,
            collected_at: Utc::now(),
        }
    }

    pub fn current_price(&self) -> Decimal {
        self.ticker.last
    }

    /// Widest Bollinger band width across timeframes
    pub fn max_band_width_percent(&self) -> Option<f64> {
        self.indicators
            .values()
            .filter_map(|i| i.bollinger_width_percent)
            .fold(None, |acc, w| Some(acc.map_or(w, |a: f64| a.max(w))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ticker(last: Decimal, bid: Decimal, ask: Decimal) -> Ticker {
        Ticker {
            symbol: "BTC/USDT".into(),
            last,
            bid: Some(bid),
            ask: Some(ask),
            high_24h: None,
            low_24h: None,
            volume_24h: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn spread_percent_relative_to_last() {
        let t = ticker(dec!(100), dec!(99.9), dec!(100.1));
        assert_eq!(t.spread_percent(), Some(dec!(0.2)));
    }

    #[test]
    fn max_band_width_picks_widest_timeframe() {
        let mut snap = MarketSnapshot::new("BTC/USDT", ticker(dec!(100), dec!(99), dec!(101)));
        assert_eq!(snap.max_band_width_percent(), None);

        snap.indicators.insert(
            "1h".into(),
            Indicators {
                bollinger_width_percent: Some(4.0),
                ..Default::default()
            },
        );
        snap.indicators.insert(
            "4h".into(),
            Indicators {
                bollinger_width_percent: Some(7.5),
                ..Default::default()
            },
        );
        assert_eq!(snap.max_band_width_percent(), Some(7.5));
    }
}
