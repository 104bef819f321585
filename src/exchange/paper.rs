//! In-memory simulated venue
//!
//! Market orders fill immediately at the last price, limit orders rest
//! until cancelled. One net position is kept per symbol. Prices are fixed
//! unless `volatility_percent` is set, in which case every ticker fetch
//! moves the price by a uniform random step.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Exchange, ExchangeKind};
use crate::domain::{
    Balance, BookLevel, Candle, FundingRate, MarginMode, OpenInterest, Order, OrderBook,
    OrderRequest, OrderSide, OrderStatus, OrderType, Position, PositionSide, Ticker,
};
use crate::error::{AegisError, Result};

const BOOK_DEPTH_STEP: Decimal = dec!(0.0005);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    pub initial_balance: Decimal,
    /// Starting price for any symbol not seeded explicitly
    pub initial_price: Decimal,
    /// Full bid/ask spread as a percentage of price
    pub spread_percent: Decimal,
    /// Max random step per ticker fetch, 0 keeps prices fixed
    pub volatility_percent: f64,
    pub funding_rate: Decimal,
    pub open_interest: Decimal,
    pub max_leverage: u32,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_balance: dec!(10000),
            initial_price: dec!(100),
            spread_percent: dec!(0.02),
            volatility_percent: 0.0,
            funding_rate: dec!(0.0001),
            open_interest: dec!(1000000),
            max_leverage: 125,
        }
    }
}

/// Operations that can be forced to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaperOp {
    Ticker,
    Ohlcv,
    OrderBook,
    FundingRate,
    OpenInterest,
    Balance,
    Positions,
    CreateOrder,
    CancelOrder,
    FetchOrder,
    SetLeverage,
    SetMarginMode,
}

#[derive(Debug, Default)]
struct PaperState {
    prices: HashMap<String, Decimal>,
    cash: Decimal,
    positions: HashMap<String, Position>,
    leverage: HashMap<String, u32>,
    margin_modes: HashMap<String, MarginMode>,
    orders: Vec<Order>,
    failing: HashSet<PaperOp>,
    realized_pnl: Decimal,
}

impl PaperState {
    fn price(&self, symbol: &str, default: Decimal) -> Decimal {
        self.prices.get(symbol).copied().unwrap_or(default)
    }

    fn check(&self, op: PaperOp) -> Result<()> {
        if self.failing.contains(&op) {
            return Err(AegisError::Exchange(format!("paper: injected {:?} failure", op)));
        }
        Ok(())
    }

    fn mark_to_market(&mut self, symbol: &str, price: Decimal) {
        if let Some(pos) = self.positions.get_mut(symbol) {
            pos.current_price = price;
            pos.unrealized_pnl = unrealized(pos.side, pos.entry_price, price, pos.size);
            pos.updated_at = Utc::now();
        }
    }
}

fn direction(side: PositionSide) -> Decimal {
    match side {
        PositionSide::Long => Decimal::ONE,
        PositionSide::Short => Decimal::NEGATIVE_ONE,
        PositionSide::None => Decimal::ZERO,
    }
}

fn unrealized(side: PositionSide, entry: Decimal, price: Decimal, size: Decimal) -> Decimal {
    (price - entry) * size * direction(side)
}

fn liquidation_price(side: PositionSide, entry: Decimal, leverage: u32) -> Option<Decimal> {
    if leverage == 0 {
        return None;
    }
    let step = entry / Decimal::from(leverage);
    match side {
        PositionSide::Long => Some((entry - step).max(Decimal::ZERO)),
        PositionSide::Short => Some(entry + step),
        PositionSide::None => None,
    }
}

fn side_for(order_side: OrderSide) -> PositionSide {
    match order_side {
        OrderSide::Buy => PositionSide::Long,
        OrderSide::Sell => PositionSide::Short,
    }
}

fn timeframe_minutes(timeframe: &str) -> i64 {
    let (digits, unit) = timeframe.split_at(timeframe.len().saturating_sub(1));
    let n: i64 = digits.parse().unwrap_or(1);
    match unit {
        "m" => n,
        "h" => n * 60,
        "d" => n * 60 * 24,
        "w" => n * 60 * 24 * 7,
        _ => 60,
    }
}

pub struct PaperExchange {
    config: PaperConfig,
    state: RwLock<PaperState>,
}

impl PaperExchange {
    pub fn new(config: PaperConfig) -> Self {
        let state = PaperState {
            cash: config.initial_balance,
            ..PaperState::default()
        };
        Self {
            config,
            state: RwLock::new(state),
        }
    }

    pub fn config(&self) -> &PaperConfig {
        &self.config
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        let mut state = self.state.write().await;
        state.prices.insert(symbol.to_string(), price);
        state.mark_to_market(symbol, price);
    }

    /// Make `op` fail until `recover` is called
    pub async fn fail(&self, op: PaperOp) {
        self.state.write().await.failing.insert(op);
    }

    pub async fn recover(&self, op: PaperOp) {
        self.state.write().await.failing.remove(&op);
    }

    /// Every order accepted so far, oldest first
    pub async fn orders(&self) -> Vec<Order> {
        self.state.read().await.orders.clone()
    }

    pub async fn realized_pnl(&self) -> Decimal {
        self.state.read().await.realized_pnl
    }

    pub async fn leverage(&self, symbol: &str) -> Option<u32> {
        self.state.read().await.leverage.get(symbol).copied()
    }

    pub async fn margin_mode(&self, symbol: &str) -> Option<MarginMode> {
        self.state.read().await.margin_modes.get(symbol).copied()
    }

    fn book_around(&self, price: Decimal, depth: usize) -> OrderBook {
        let half_spread = price * self.config.spread_percent / dec!(200);
        let step = price * BOOK_DEPTH_STEP;
        let levels = |sign: Decimal| {
            (0..depth.max(1))
                .map(|i| BookLevel {
                    price: price + sign * (half_spread + step * Decimal::from(i)),
                    size: Decimal::from(i + 1) * dec!(10),
                })
                .collect::<Vec<_>>()
        };
        OrderBook {
            bids: levels(Decimal::NEGATIVE_ONE),
            asks: levels(Decimal::ONE),
            timestamp: Utc::now(),
        }
    }

    fn fill_market(
        &self,
        state: &mut PaperState,
        request: &OrderRequest,
        price: Decimal,
    ) -> Result<Decimal> {
        let symbol = request.symbol.as_str();
        let leverage = state.leverage.get(symbol).copied().unwrap_or(1);
        let incoming = side_for(request.side);
        let existing = state.positions.get(symbol).cloned();

        let (mut remaining, mut filled) = (request.amount, Decimal::ZERO);

        if let Some(pos) = existing.as_ref().filter(|p| p.is_open() && p.side != incoming) {
            let closing = remaining.min(pos.size);
            let pnl = unrealized(pos.side, pos.entry_price, price, closing);
            state.cash += pnl;
            state.realized_pnl += pnl;
            remaining -= closing;
            filled += closing;

            let left = pos.size - closing;
            if left.is_zero() {
                state.positions.remove(symbol);
            } else if let Some(p) = state.positions.get_mut(symbol) {
                p.size = left;
                p.margin = left * p.entry_price / Decimal::from(p.leverage.max(1));
            }
            debug!(symbol, %closing, %pnl, "paper position reduced");
        } else if request.reduce_only {
            return Err(AegisError::OrderRejected(format!(
                "reduce-only {} order on {} would not reduce a position",
                request.side, symbol
            )));
        }

        if request.reduce_only || remaining.is_zero() {
            return Ok(filled);
        }

        let pos = state
            .positions
            .entry(symbol.to_string())
            .or_insert_with(|| Position {
                symbol: symbol.to_string(),
                side: incoming,
                size: Decimal::ZERO,
                entry_price: price,
                current_price: price,
                leverage,
                unrealized_pnl: Decimal::ZERO,
                liquidation_price: None,
                margin: Decimal::ZERO,
                updated_at: Utc::now(),
            });
        let new_size = pos.size + remaining;
        pos.entry_price = (pos.entry_price * pos.size + price * remaining) / new_size;
        pos.size = new_size;
        pos.side = incoming;
        pos.leverage = leverage;
        pos.margin = new_size * pos.entry_price / Decimal::from(leverage.max(1));
        pos.liquidation_price = liquidation_price(incoming, pos.entry_price, leverage);
        pos.current_price = price;
        pos.unrealized_pnl = unrealized(incoming, pos.entry_price, price, new_size);
        pos.updated_at = Utc::now();
        filled += remaining;

        Ok(filled)
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Paper
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        let step = if self.config.volatility_percent > 0.0 {
            let v = self.config.volatility_percent;
            rand::thread_rng().gen_range(-v..=v)
        } else {
            0.0
        };

        let mut state = self.state.write().await;
        state.check(PaperOp::Ticker)?;
        let mut price = state.price(symbol, self.config.initial_price);
        if step != 0.0 {
            let factor = Decimal::try_from(1.0 + step / 100.0).unwrap_or(Decimal::ONE);
            price = (price * factor).round_dp(8);
            state.prices.insert(symbol.to_string(), price);
            state.mark_to_market(symbol, price);
        }

        let book = self.book_around(price, 1);
        Ok(Ticker {
            symbol: symbol.to_string(),
            last: price,
            bid: book.best_bid(),
            ask: book.best_ask(),
            high_24h: Some(price * dec!(1.02)),
            low_24h: Some(price * dec!(0.98)),
            volume_24h: Some(dec!(100000)),
            timestamp: Utc::now(),
        })
    }

    async fn fetch_ohlcv(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Candle>> {
        let state = self.state.read().await;
        state.check(PaperOp::Ohlcv)?;
        let price = state.price(symbol, self.config.initial_price);
        drop(state);

        let minutes = timeframe_minutes(timeframe);
        let now = Utc::now();
        // Gentle saw-tooth ending exactly at the current price
        let close_at = |i: usize| {
            let offset = ((limit - 1 - i) % 10) as i64 - 5;
            price * (Decimal::ONE + Decimal::new(offset, 3))
        };

        let mut candles = Vec::with_capacity(limit);
        for i in 0..limit {
            let close = if i + 1 == limit { price } else { close_at(i) };
            let open = if i == 0 { close } else { candles_close(&candles, close) };
            let high = open.max(close) * dec!(1.001);
            let low = open.min(close) * dec!(0.999);
            candles.push(Candle {
                open_time: now - Duration::minutes(minutes * (limit - i) as i64),
                open,
                high,
                low,
                close,
                volume: dec!(100),
            });
        }
        Ok(candles)
    }

    async fn fetch_order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook> {
        let state = self.state.read().await;
        state.check(PaperOp::OrderBook)?;
        Ok(self.book_around(state.price(symbol, self.config.initial_price), depth))
    }

    async fn fetch_funding_rate(&self, _symbol: &str) -> Result<FundingRate> {
        self.state.read().await.check(PaperOp::FundingRate)?;
        Ok(FundingRate {
            rate: self.config.funding_rate,
            next_funding_time: Some(Utc::now() + Duration::hours(8)),
        })
    }

    async fn fetch_open_interest(&self, symbol: &str) -> Result<OpenInterest> {
        let state = self.state.read().await;
        state.check(PaperOp::OpenInterest)?;
        let price = state.price(symbol, self.config.initial_price);
        Ok(OpenInterest {
            amount: self.config.open_interest,
            value: Some(self.config.open_interest * price),
        })
    }

    async fn fetch_balance(&self) -> Result<Balance> {
        let state = self.state.read().await;
        state.check(PaperOp::Balance)?;
        let unrealized: Decimal = state.positions.values().map(|p| p.unrealized_pnl).sum();
        let used: Decimal = state.positions.values().map(|p| p.margin).sum();
        let total = state.cash + unrealized;
        Ok(Balance {
            total,
            free: (total - used).max(Decimal::ZERO),
            used,
        })
    }

    async fn fetch_open_positions(&self) -> Result<Vec<Position>> {
        let state = self.state.read().await;
        state.check(PaperOp::Positions)?;
        Ok(state
            .positions
            .values()
            .filter(|p| p.is_open())
            .cloned()
            .collect())
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<Order> {
        if request.amount <= Decimal::ZERO {
            return Err(AegisError::OrderRejected(format!(
                "order amount must be positive, got {}",
                request.amount
            )));
        }

        let mut state = self.state.write().await;
        state.check(PaperOp::CreateOrder)?;
        let price = state.price(&request.symbol, self.config.initial_price);

        let (status, filled, average_price) = match request.order_type {
            OrderType::Market => {
                let filled = self.fill_market(&mut state, request, price)?;
                state.mark_to_market(&request.symbol, price);
                (OrderStatus::Filled, filled, Some(price))
            }
            OrderType::Limit => {
                if request.price.is_none() {
                    return Err(AegisError::OrderRejected(
                        "limit order without price".to_string(),
                    ));
                }
                (OrderStatus::Open, Decimal::ZERO, None)
            }
        };

        let order = Order {
            id: Uuid::new_v4().to_string(),
            client_order_id: request.client_order_id.clone(),
            symbol: request.symbol.clone(),
            order_type: request.order_type,
            side: request.side,
            amount: request.amount,
            filled,
            price: request.price,
            average_price,
            status,
            reduce_only: request.reduce_only,
            created_at: Utc::now(),
        };
        info!(
            symbol = %order.symbol,
            side = %order.side,
            amount = %order.amount,
            filled = %order.filled,
            "paper order {}",
            order.id
        );
        state.orders.push(order.clone());
        Ok(order)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.check(PaperOp::CancelOrder)?;
        let order = state
            .orders
            .iter_mut()
            .find(|o| o.id == order_id && o.symbol == symbol)
            .ok_or_else(|| AegisError::Exchange(format!("order not found: {}", order_id)))?;
        if order.status.is_terminal() {
            return Err(AegisError::OrderRejected(format!(
                "order {} already {:?}",
                order_id, order.status
            )));
        }
        order.status = OrderStatus::Cancelled;
        Ok(())
    }

    async fn fetch_order(&self, symbol: &str, order_id: &str) -> Result<Order> {
        let state = self.state.read().await;
        state.check(PaperOp::FetchOrder)?;
        state
            .orders
            .iter()
            .find(|o| o.id == order_id && o.symbol == symbol)
            .cloned()
            .ok_or_else(|| AegisError::Exchange(format!("order not found: {}", order_id)))
    }

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        state.check(PaperOp::FetchOrder)?;
        Ok(state
            .orders
            .iter()
            .filter(|o| o.symbol == symbol && !o.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        if leverage == 0 || leverage > self.config.max_leverage {
            return Err(AegisError::OrderRejected(format!(
                "leverage {} outside 1..={}",
                leverage, self.config.max_leverage
            )));
        }
        let mut state = self.state.write().await;
        state.check(PaperOp::SetLeverage)?;
        state.leverage.insert(symbol.to_string(), leverage);
        Ok(())
    }

    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> Result<()> {
        let mut state = self.state.write().await;
        state.check(PaperOp::SetMarginMode)?;
        state.margin_modes.insert(symbol.to_string(), mode);
        Ok(())
    }
}

fn candles_close(candles: &[Candle], fallback: Decimal) -> Decimal {
    candles.last().map(|c| c.close).unwrap_or(fallback)
}
