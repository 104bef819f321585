use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{Action, Decision, MarginMode, Order, OrderRequest, Position, PositionSide};
use crate::error::{AegisError, Result};
use crate::exchange::Exchange;
use crate::portfolio::TradeRecord;
use crate::risk::PositionSizer;

/// What one execution did on the exchange
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub orders: Vec<Order>,
    /// Trades closed (fully or partly) by this execution
    pub closed: Vec<TradeRecord>,
    /// Set when the action turned into a no-op
    pub note: Option<String>,
}

impl ExecutionReport {
    fn mark_noop(&mut self, note: impl Into<String>) {
        self.note = Some(note.into());
    }

    pub fn is_noop(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.closed.iter().map(|t| t.realized_pnl).sum()
    }
}

/// Turns a validated decision into exchange orders
pub struct DecisionExecutor {
    exchange: Arc<dyn Exchange>,
    sizer: Arc<PositionSizer>,
    margin_mode: MarginMode,
}

impl DecisionExecutor {
    pub fn new(exchange: Arc<dyn Exchange>, sizer: Arc<PositionSizer>, margin_mode: MarginMode) -> Self {
        Self {
            exchange,
            sizer,
            margin_mode,
        }
    }

    pub async fn execute(
        &self,
        symbol: &str,
        decision: &Decision,
        position: Option<&Position>,
        balance: Decimal,
        price: Decimal,
    ) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::default();
        self.execute_into(symbol, decision, position, balance, price, &mut report)
            .await?;
        Ok(report)
    }

    /// Like [`execute`](Self::execute), but fills `report` as orders go out.
    ///
    /// On error the report still holds every order placed and every trade
    /// closed before the failure, e.g. the close leg of a failed reversal.
    pub async fn execute_into(
        &self,
        symbol: &str,
        decision: &Decision,
        position: Option<&Position>,
        balance: Decimal,
        price: Decimal,
        report: &mut ExecutionReport,
    ) -> Result<()> {
        let position = position.filter(|p| p.is_open());

        match decision.action {
            Action::Hold => report.mark_noop("hold"),
            Action::Close => match position {
                Some(pos) => {
                    self.close(symbol, pos, pos.size, &decision.reason, report)
                        .await?
                }
                None => report.mark_noop("no position to close"),
            },
            Action::OpenLong => {
                self.open(symbol, decision, PositionSide::Long, position, balance, price, report)
                    .await?
            }
            Action::OpenShort => {
                self.open(symbol, decision, PositionSide::Short, position, balance, price, report)
                    .await?
            }
            Action::ScaleIn => {
                let Some(pos) = position else {
                    report.mark_noop("no position to scale into");
                    return Ok(());
                };
                let size = required_size(decision)?;
                self.check_notional((pos.size + size) * price, balance, pos.leverage)?;
                let side = entry_side(pos.side)?;
                let order = self
                    .exchange
                    .create_order(&OrderRequest::market(symbol, side, size))
                    .await?;
                info!(symbol, %size, "scaled into {} position", pos.side);
                report.orders.push(order);
            }
            Action::ScaleOut => {
                let Some(pos) = position else {
                    report.mark_noop("no position to scale out of");
                    return Ok(());
                };
                let size = required_size(decision)?.min(pos.size);
                self.close(symbol, pos, size, &decision.reason, report)
                    .await?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn open(
        &self,
        symbol: &str,
        decision: &Decision,
        side: PositionSide,
        position: Option<&Position>,
        balance: Decimal,
        price: Decimal,
        report: &mut ExecutionReport,
    ) -> Result<()> {
        if let Some(pos) = position.filter(|p| p.side == side) {
            info!(symbol, size = %pos.size, "already {} - open is a no-op", side);
            report.mark_noop(format!("already {}", side));
            return Ok(());
        }

        let size = required_size(decision)?;
        let leverage = self.sizer.clamp_leverage(self.sizer.config().default_leverage);
        self.check_notional(size * price, balance, leverage)?;

        if let Some(pos) = position {
            info!(symbol, "closing {} position before opening {}", pos.side, side);
            self.close(symbol, pos, pos.size, "reversal", report).await?;
        }

        match self.exchange.set_margin_mode(symbol, self.margin_mode).await {
            Ok(()) => {}
            Err(AegisError::Unsupported(e)) => warn!(symbol, "margin mode not set: {}", e),
            Err(e) => return Err(e),
        }
        self.exchange.set_leverage(symbol, leverage).await?;

        let order = self
            .exchange
            .create_order(&OrderRequest::market(symbol, entry_side(side)?, size))
            .await?;
        info!(
            symbol,
            %size,
            leverage,
            stop_loss = ?decision.stop_loss,
            take_profit = ?decision.take_profit,
            "opened {} position",
            side
        );
        report.orders.push(order);
        Ok(())
    }

    async fn close(
        &self,
        symbol: &str,
        position: &Position,
        size: Decimal,
        reason: &str,
        report: &mut ExecutionReport,
    ) -> Result<()> {
        let side = position.side.exit_order_side().ok_or_else(|| {
            AegisError::Internal(format!("cannot close {} position", position.side))
        })?;
        let order = self
            .exchange
            .create_order(&OrderRequest::market(symbol, side, size).reduce_only())
            .await?;

        let exit_price = order.average_price.unwrap_or(position.current_price);
        let closed = if order.filled.is_zero() { size } else { order.filled };
        let direction = if position.side == PositionSide::Long {
            Decimal::ONE
        } else {
            Decimal::NEGATIVE_ONE
        };
        let realized_pnl = (exit_price - position.entry_price) * closed * direction;

        info!(symbol, %closed, %exit_price, %realized_pnl, "closed {} position", position.side);
        report.closed.push(TradeRecord {
            symbol: symbol.to_string(),
            side: position.side,
            size: closed,
            entry_price: position.entry_price,
            exit_price,
            realized_pnl,
            reason: reason.to_string(),
            closed_at: Utc::now(),
        });
        report.orders.push(order);
        Ok(())
    }

    fn check_notional(&self, notional: Decimal, balance: Decimal, leverage: u32) -> Result<()> {
        self.sizer
            .validate_position_size(notional, balance, leverage)
            .map_err(|rejection| AegisError::RiskLimitExceeded(rejection.to_string()))
    }
}

fn required_size(decision: &Decision) -> Result<Decimal> {
    decision.positive_size().ok_or_else(|| {
        AegisError::Validation(format!("{} requires a positive size", decision.action))
    })
}

fn entry_side(side: PositionSide) -> Result<crate::domain::OrderSide> {
    side.entry_order_side()
        .ok_or_else(|| AegisError::Internal("position has no side".to_string()))
}
