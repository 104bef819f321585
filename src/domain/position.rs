use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::OrderSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
    None,
}

impl PositionSide {
    /// Order side that increases exposure on this side
    pub fn entry_order_side(&self) -> Option<OrderSide> {
        match self {
            PositionSide::Long => Some(OrderSide::Buy),
            PositionSide::Short => Some(OrderSide::Sell),
            PositionSide::None => None,
        }
    }

    /// Order side that reduces exposure on this side
    pub fn exit_order_side(&self) -> Option<OrderSide> {
        self.entry_order_side().map(|s| s.opposite())
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
            PositionSide::None => write!(f, "none"),
        }
    }
}

/// Snapshot of current exposure on one symbol, owned by the exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub leverage: u32,
    pub unrealized_pnl: Decimal,
    pub liquidation_price: Option<Decimal>,
    pub margin: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.side != PositionSide::None && self.size > Decimal::ZERO
    }

    /// Unrealized PnL as a percentage of margin
    pub fn pnl_percent(&self) -> Option<Decimal> {
        if self.margin > Decimal::ZERO {
            Some(self.unrealized_pnl / self.margin * Decimal::ONE_HUNDRED)
        } else {
            None
        }
    }
}

/// Account balance in quote currency
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Balance {
    pub total: Decimal,
    pub free: Decimal,
    pub used: Decimal,
}
