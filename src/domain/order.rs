use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Market => write!(f, "MARKET"),
        }
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    /// Resting on the book
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// Margin mode for derivatives accounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    Isolated,
    Cross,
}

impl Default for MarginMode {
    fn default() -> Self {
        Self::Isolated
    }
}

/// Order request (what we want to do)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub amount: Decimal,
    /// Required for limit orders
    pub price: Option<Decimal>,
    pub reduce_only: bool,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: OrderSide, amount: Decimal) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            order_type: OrderType::Market,
            side,
            amount,
            price: None,
            reduce_only: false,
        }
    }

    pub fn limit(symbol: &str, side: OrderSide, amount: Decimal, price: Decimal) -> Self {
        Self {
            price: Some(price),
            order_type: OrderType::Limit,
            ..Self::market(symbol, side, amount)
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }
}

/// Order as reported by the exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub amount: Decimal,
    pub filled: Decimal,
    pub price: Option<Decimal>,
    pub average_price: Option<Decimal>,
    pub status: OrderStatus,
    pub reduce_only: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn limit_request_carries_price() {
        let req = OrderRequest::limit("ETH/USDT", OrderSide::Sell, dec!(2), dec!(3000)).reduce_only();
        assert_eq!(req.order_type, OrderType::Limit);
        assert_eq!(req.price, Some(dec!(3000)));
        assert!(req.reduce_only);
        assert!(!req.client_order_id.is_empty());
    }

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(!OrderStatus::Open.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
    }
}
