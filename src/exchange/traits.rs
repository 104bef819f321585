use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::{
    Balance, Candle, FundingRate, MarginMode, OpenInterest, Order, OrderBook, OrderRequest,
    Position, Ticker,
};
use crate::error::{AegisError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    #[default]
    Paper,
    Binance,
    Bybit,
    Okx,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paper => "paper",
            Self::Binance => "binance",
            Self::Bybit => "bybit",
            Self::Okx => "okx",
        }
    }
}

impl std::fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "paper" | "sim" | "simulated" => Ok(Self::Paper),
            "binance" | "binanceusdm" => Ok(Self::Binance),
            "bybit" => Ok(Self::Bybit),
            "okx" | "okex" => Ok(Self::Okx),
            _ => Err("invalid exchange; expected paper|binance|bybit|okx"),
        }
    }
}

pub fn parse_exchange_kind(raw: &str) -> Result<ExchangeKind> {
    ExchangeKind::from_str(raw).map_err(|e| AegisError::InvalidConfig(e.to_string()))
}

pub(crate) fn unsupported(feature: &str, exchange: ExchangeKind) -> AegisError {
    AegisError::Unsupported(format!(
        "{} is not implemented for exchange '{}'",
        feature,
        exchange.as_str()
    ))
}

/// Derivatives venue used by the trading engine.
///
/// Implementations do not retry; the engine decides what a failure means.
#[async_trait]
pub trait Exchange: Send + Sync {
    fn kind(&self) -> ExchangeKind;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker>;

    async fn fetch_ohlcv(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Candle>>;

    async fn fetch_order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook>;

    async fn fetch_funding_rate(&self, _symbol: &str) -> Result<FundingRate> {
        Err(unsupported("fetch_funding_rate", self.kind()))
    }

    async fn fetch_open_interest(&self, _symbol: &str) -> Result<OpenInterest> {
        Err(unsupported("fetch_open_interest", self.kind()))
    }

    async fn fetch_balance(&self) -> Result<Balance>;

    async fn fetch_open_positions(&self) -> Result<Vec<Position>>;

    async fn fetch_position(&self, symbol: &str) -> Result<Option<Position>> {
        Ok(self
            .fetch_open_positions()
            .await?
            .into_iter()
            .find(|p| p.symbol == symbol && p.is_open()))
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<Order>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;

    async fn fetch_order(&self, symbol: &str, order_id: &str) -> Result<Order>;

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<Order>>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()>;

    async fn set_margin_mode(&self, _symbol: &str, _mode: MarginMode) -> Result<()> {
        Err(unsupported("set_margin_mode", self.kind()))
    }

    /// Release connections. Called once on shutdown.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
