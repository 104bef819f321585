use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::{MarketSnapshot, NewsSummary, OnChainSummary};
use crate::error::{AegisError, Result};
use crate::exchange::Exchange;
use crate::indicators;

/// Optional off-exchange context (news, on-chain flows)
#[async_trait]
pub trait MarketIntel: Send + Sync {
    async fn news(&self, _symbol: &str) -> Result<Option<NewsSummary>> {
        Ok(None)
    }

    async fn on_chain(&self, _symbol: &str) -> Result<Option<OnChainSummary>> {
        Ok(None)
    }
}

/// Builds the per-cycle [`MarketSnapshot`].
///
/// The ticker is mandatory. Every other read degrades to an absent field.
pub struct MarketDataCollector {
    exchange: Arc<dyn Exchange>,
    intel: Option<Arc<dyn MarketIntel>>,
    timeframes: Vec<String>,
    candle_limit: usize,
    book_depth: usize,
}

impl MarketDataCollector {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        timeframes: Vec<String>,
        candle_limit: usize,
        book_depth: usize,
    ) -> Self {
        Self {
            exchange,
            intel: None,
            timeframes,
            candle_limit,
            book_depth,
        }
    }

    pub fn with_intel(mut self, intel: Arc<dyn MarketIntel>) -> Self {
        self.intel = Some(intel);
        self
    }

    pub async fn collect(&self, symbol: &str) -> Result<MarketSnapshot> {
        let ticker = self.exchange.fetch_ticker(symbol).await.map_err(|e| {
            AegisError::MarketDataUnavailable(format!("ticker for {}: {}", symbol, e))
        })?;
        let mut snapshot = MarketSnapshot::new(symbol, ticker);

        let (book, funding, open_interest) = tokio::join!(
            self.exchange.fetch_order_book(symbol, self.book_depth),
            self.exchange.fetch_funding_rate(symbol),
            self.exchange.fetch_open_interest(symbol),
        );
        snapshot.order_book = optional(symbol, "order book", book);
        snapshot.funding_rate = optional(symbol, "funding rate", funding);
        snapshot.open_interest = optional(symbol, "open interest", open_interest);

        let series = futures::future::join_all(self.timeframes.iter().map(|tf| async move {
            (
                tf.clone(),
                self.exchange.fetch_ohlcv(symbol, tf, self.candle_limit).await,
            )
        }))
        .await;
        for (timeframe, result) in series {
            if let Some(candles) = optional(symbol, "candles", result) {
                snapshot
                    .indicators
                    .insert(timeframe.clone(), indicators::compute(&candles));
                snapshot.candles.insert(timeframe, candles);
            }
        }

        if let Some(intel) = &self.intel {
            snapshot.news = intel
                .news(symbol)
                .await
                .unwrap_or_else(|e| {
                    warn!(symbol, "news unavailable: {}", e);
                    None
                });
            snapshot.on_chain = intel
                .on_chain(symbol)
                .await
                .unwrap_or_else(|e| {
                    warn!(symbol, "on-chain data unavailable: {}", e);
                    None
                });
        }

        debug!(
            symbol,
            price = %snapshot.current_price(),
            timeframes = snapshot.candles.len(),
            has_book = snapshot.order_book.is_some(),
            "market snapshot collected"
        );
        Ok(snapshot)
    }
}

fn optional<T>(symbol: &str, what: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(AegisError::Unsupported(e)) => {
            debug!(symbol, "{} not available: {}", what, e);
            None
        }
        Err(e) => {
            warn!(symbol, "{} fetch failed, omitting: {}", what, e);
            None
        }
    }
}
