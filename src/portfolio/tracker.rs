use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{Portfolio, TradeRecord};
use crate::exchange::Exchange;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConfig {
    /// Capital the account started with. Taken from the first refresh when unset.
    pub initial_capital: Option<Decimal>,
    /// Profit over initial capital that triggers a withdrawal, 0 disables
    pub profit_withdrawal_threshold: Decimal,
    pub max_trade_history: usize,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            initial_capital: None,
            profit_withdrawal_threshold: Decimal::ZERO,
            max_trade_history: 1000,
        }
    }
}

#[derive(Debug, Default)]
struct DailyStats {
    date: Option<NaiveDate>,
    start_equity: Decimal,
    realized_pnl: Decimal,
    trade_count: u32,
}

#[derive(Debug, Default)]
struct TrackerState {
    balance: Decimal,
    equity: Decimal,
    peak_equity: Decimal,
    initial_capital: Option<Decimal>,
    daily: DailyStats,
    trades: VecDeque<TradeRecord>,
}

impl TrackerState {
    fn ensure_daily_reset(&mut self) {
        let today = Utc::now().date_naive();
        if self.daily.date != Some(today) {
            if self.daily.date.is_some() {
                debug!(
                    previous = ?self.daily.date,
                    pnl = %(self.equity - self.daily.start_equity),
                    "daily PnL rolled over"
                );
            }
            self.daily = DailyStats {
                date: Some(today),
                start_equity: self.equity,
                ..Default::default()
            };
        }
    }
}

/// In-memory portfolio fed from the exchange balance
pub struct PortfolioTracker {
    exchange: Arc<dyn Exchange>,
    config: PortfolioConfig,
    state: RwLock<TrackerState>,
}

impl PortfolioTracker {
    pub fn new(exchange: Arc<dyn Exchange>, config: PortfolioConfig) -> Self {
        let state = TrackerState {
            initial_capital: config.initial_capital,
            peak_equity: config.initial_capital.unwrap_or_default(),
            ..Default::default()
        };
        Self {
            exchange,
            config,
            state: RwLock::new(state),
        }
    }

    /// Most recent trades, oldest first
    pub async fn trades(&self) -> Vec<TradeRecord> {
        self.state.read().await.trades.iter().cloned().collect()
    }

    pub async fn daily_trade_count(&self) -> u32 {
        self.state.read().await.daily.trade_count
    }

    pub async fn daily_realized_pnl(&self) -> Decimal {
        self.state.read().await.daily.realized_pnl
    }
}

#[async_trait]
impl Portfolio for PortfolioTracker {
    async fn get_balance(&self) -> Decimal {
        self.state.read().await.balance
    }

    async fn get_equity(&self) -> Decimal {
        self.state.read().await.equity
    }

    async fn get_daily_pnl(&self) -> Decimal {
        let mut state = self.state.write().await;
        state.ensure_daily_reset();
        state.equity - state.daily.start_equity
    }

    async fn get_peak_equity(&self) -> Decimal {
        self.state.read().await.peak_equity
    }

    async fn update_from_exchange(&self) -> Result<()> {
        let balance = self.exchange.fetch_balance().await?;

        let mut state = self.state.write().await;
        state.balance = balance.free;
        state.equity = balance.total;
        if state.initial_capital.is_none() {
            info!(capital = %balance.total, "initial capital taken from exchange");
            state.initial_capital = Some(balance.total);
        }
        if balance.total > state.peak_equity {
            state.peak_equity = balance.total;
        }
        state.ensure_daily_reset();
        debug!(
            balance = %state.balance,
            equity = %state.equity,
            peak = %state.peak_equity,
            "portfolio refreshed"
        );
        Ok(())
    }

    async fn record_trade(&self, trade: TradeRecord) -> Result<()> {
        let mut state = self.state.write().await;
        state.ensure_daily_reset();
        state.daily.realized_pnl += trade.realized_pnl;
        state.daily.trade_count += 1;
        info!(
            symbol = %trade.symbol,
            side = %trade.side,
            pnl = %trade.realized_pnl,
            "trade recorded"
        );
        state.trades.push_back(trade);
        while state.trades.len() > self.config.max_trade_history.max(1) {
            state.trades.pop_front();
        }
        Ok(())
    }

    async fn check_profit_withdrawal(&self) -> (bool, Decimal) {
        let threshold = self.config.profit_withdrawal_threshold;
        if threshold <= Decimal::ZERO {
            return (false, Decimal::ZERO);
        }
        let state = self.state.read().await;
        let Some(initial) = state.initial_capital else {
            return (false, Decimal::ZERO);
        };
        let profit = state.equity - initial;
        if profit >= threshold {
            (true, profit)
        } else {
            (false, Decimal::ZERO)
        }
    }
}
