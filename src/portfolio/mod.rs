//! Account bookkeeping
//!
//! The engine reads balance, equity, daily PnL and peak equity once per
//! cycle through [`Portfolio`], and reports closed trades back.

mod tracker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::PositionSide;
use crate::error::Result;

pub use tracker::{PortfolioConfig, PortfolioTracker};

/// A closed (or partially closed) trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub realized_pnl: Decimal,
    pub reason: String,
    pub closed_at: DateTime<Utc>,
}

impl TradeRecord {
    pub fn is_loss(&self) -> bool {
        self.realized_pnl < Decimal::ZERO
    }
}

#[async_trait]
pub trait Portfolio: Send + Sync {
    async fn get_balance(&self) -> Decimal;

    async fn get_equity(&self) -> Decimal;

    async fn get_daily_pnl(&self) -> Decimal;

    async fn get_peak_equity(&self) -> Decimal;

    /// Refresh balance and equity from the venue
    async fn update_from_exchange(&self) -> Result<()>;

    async fn record_trade(&self, trade: TradeRecord) -> Result<()>;

    /// Whether profits above the threshold can be withdrawn, and how much
    async fn check_profit_withdrawal(&self) -> (bool, Decimal);
}
