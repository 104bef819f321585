use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::validator::{RiskRejection, RiskVerdict};
use crate::domain::PositionSide;

/// Sizing policy limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Margin committed to one position, percent of balance
    pub max_position_percent: Decimal,
    /// Hard leverage cap
    pub max_leverage: u32,
    /// Leverage used when sizing new positions
    pub default_leverage: u32,
    /// Balance lost if the stop is hit, percent
    pub risk_per_trade_percent: Decimal,
    pub default_stop_percent: Decimal,
    pub default_target_percent: Decimal,
    /// Decimal places of the traded contract
    pub size_precision: u32,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            max_position_percent: dec!(20),
            max_leverage: 10,
            default_leverage: 3,
            risk_per_trade_percent: dec!(1),
            default_stop_percent: dec!(2),
            default_target_percent: dec!(4),
            size_precision: 4,
        }
    }
}

/// Concrete order parameters for a new position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingPlan {
    pub side: PositionSide,
    pub size: Decimal,
    pub leverage: u32,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub notional: Decimal,
    pub margin: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct PositionSizer {
    config: SizingConfig,
}

impl PositionSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    pub fn max_leverage(&self) -> u32 {
        self.config.max_leverage
    }

    /// Clamp a requested leverage into `1..=max_leverage`
    pub fn clamp_leverage(&self, requested: u32) -> u32 {
        requested.clamp(1, self.config.max_leverage.max(1))
    }

    /// Largest notional a single position may carry at `leverage`.
    ///
    /// The committed margin (notional / leverage) stays within
    /// `max_position_percent` of the balance.
    pub fn max_notional(&self, balance: Decimal, leverage: u32) -> Decimal {
        balance * self.config.max_position_percent / Decimal::ONE_HUNDRED
            * Decimal::from(self.clamp_leverage(leverage))
    }

    /// Size a new position.
    ///
    /// The size is the smaller of the margin cap (balance x max position
    /// percent x leverage) and the risk budget (balance x risk per trade
    /// divided by the stop distance).
    pub fn calculate(
        &self,
        balance: Decimal,
        price: Decimal,
        side: PositionSide,
    ) -> std::result::Result<SizingPlan, RiskRejection> {
        if price <= Decimal::ZERO {
            return Err(RiskRejection::InvalidPrice { price });
        }
        if balance <= Decimal::ZERO || side == PositionSide::None {
            return Err(RiskRejection::InvalidSize { size: Decimal::ZERO });
        }

        let leverage = self.clamp_leverage(self.config.default_leverage);
        let margin_cap = balance * self.config.max_position_percent / Decimal::ONE_HUNDRED;
        let size_by_margin = margin_cap * Decimal::from(leverage) / price;

        let stop_fraction = self.config.default_stop_percent / Decimal::ONE_HUNDRED;
        let target_fraction = self.config.default_target_percent / Decimal::ONE_HUNDRED;
        let risk_budget = balance * self.config.risk_per_trade_percent / Decimal::ONE_HUNDRED;
        let size_by_risk = if stop_fraction > Decimal::ZERO {
            risk_budget / (price * stop_fraction)
        } else {
            size_by_margin
        };

        let size = size_by_margin
            .min(size_by_risk)
            .round_dp_with_strategy(self.config.size_precision, RoundingStrategy::ToZero);
        if size <= Decimal::ZERO {
            return Err(RiskRejection::InvalidSize { size });
        }

        let (stop_loss, take_profit) = match side {
            PositionSide::Long => (
                price * (Decimal::ONE - stop_fraction),
                price * (Decimal::ONE + target_fraction),
            ),
            _ => (
                price * (Decimal::ONE + stop_fraction),
                price * (Decimal::ONE - target_fraction),
            ),
        };
        let notional = size * price;

        Ok(SizingPlan {
            side,
            size,
            leverage,
            stop_loss,
            take_profit,
            notional,
            margin: notional / Decimal::from(leverage),
        })
    }

    /// Guard run right before order placement, with the leverage the
    /// position will actually carry
    pub fn validate_position_size(
        &self,
        notional: Decimal,
        balance: Decimal,
        leverage: u32,
    ) -> RiskVerdict {
        if notional <= Decimal::ZERO {
            return Err(RiskRejection::InvalidSize { size: notional });
        }
        let limit = self.max_notional(balance, leverage);
        if notional > limit {
            return Err(RiskRejection::ExcessPositionSize { notional, limit });
        }
        Ok(())
    }
}
