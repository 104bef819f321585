//! Decision validator
//!
//! Stateless checks run by the orchestrator before anything reaches the
//! exchange. Every check returns a `RiskVerdict`: `Ok(())` to proceed or a
//! typed `RiskRejection` explaining why the cycle should be skipped.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Action, Decision, EnsembleDecision, MarketSnapshot};

/// Thresholds for the decision validator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Minimum decision confidence (0-100)
    pub min_confidence: u8,
    /// Minimum stop-loss distance from price, percent
    pub min_stop_loss_percent: Decimal,
    /// Minimum take-profit distance from price, percent
    pub min_take_profit_percent: Decimal,
    /// Minimum take-profit distance / stop-loss distance
    pub min_risk_reward: Decimal,
    /// Maximum bid/ask spread relative to last price, percent
    pub max_spread_percent: Decimal,
    /// Bollinger band width above which the market is too volatile, percent
    pub max_band_width_percent: f64,
    /// Drawdown from peak equity that halts trading, percent
    pub max_drawdown_percent: Decimal,
    /// Stop/target further than this from price is implausible, percent
    pub sanity_max_distance_percent: Decimal,
    /// Sizes above this are implausible
    pub sanity_max_size: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_confidence: 70,
            min_stop_loss_percent: dec!(0.5),
            min_take_profit_percent: dec!(1.0),
            min_risk_reward: dec!(1.5),
            max_spread_percent: dec!(0.5),
            max_band_width_percent: 10.0,
            max_drawdown_percent: dec!(20),
            sanity_max_distance_percent: dec!(50),
            sanity_max_size: dec!(100),
        }
    }
}

/// Why a risk check declined
#[derive(Debug, Clone, PartialEq)]
pub enum RiskRejection {
    LowConfidence { confidence: u8, min: u8 },
    MissingField { action: Action, field: &'static str },
    InvalidPrice { price: Decimal },
    StopLossWrongSide { action: Action, stop_loss: Decimal, price: Decimal },
    TakeProfitWrongSide { action: Action, take_profit: Decimal, price: Decimal },
    StopLossTooClose { distance_percent: Decimal, min_percent: Decimal },
    TakeProfitTooClose { distance_percent: Decimal, min_percent: Decimal },
    PoorRiskReward { ratio: Decimal, min: Decimal },
    SpreadTooWide { spread_percent: Decimal, max_percent: Decimal },
    EmptyOrderBook,
    ExtremeVolatility { band_width_percent: f64, max_percent: f64 },
    NoAgreement,
    NoConsensus,
    ExcessDrawdown { drawdown_percent: Decimal, max_percent: Decimal },
    ImplausibleStop { distance_percent: Decimal, max_percent: Decimal },
    ImplausibleTarget { distance_percent: Decimal, max_percent: Decimal },
    ExcessSize { size: Decimal, max: Decimal },
    InvalidSize { size: Decimal },
    ExcessPositionSize { notional: Decimal, limit: Decimal },
}

impl RiskRejection {
    /// Short machine-readable code for logs and metrics
    pub fn code(&self) -> &'static str {
        match self {
            RiskRejection::LowConfidence { .. } => "low_confidence",
            RiskRejection::MissingField { .. } => "missing_field",
            RiskRejection::InvalidPrice { .. } => "invalid_price",
            RiskRejection::StopLossWrongSide { .. } => "stop_loss_wrong_side",
            RiskRejection::TakeProfitWrongSide { .. } => "take_profit_wrong_side",
            RiskRejection::StopLossTooClose { .. } => "stop_loss_too_close",
            RiskRejection::TakeProfitTooClose { .. } => "take_profit_too_close",
            RiskRejection::PoorRiskReward { .. } => "poor_risk_reward",
            RiskRejection::SpreadTooWide { .. } => "spread_too_wide",
            RiskRejection::EmptyOrderBook => "empty_order_book",
            RiskRejection::ExtremeVolatility { .. } => "extreme_volatility",
            RiskRejection::NoAgreement => "no_agreement",
            RiskRejection::NoConsensus => "no_consensus",
            RiskRejection::ExcessDrawdown { .. } => "excess_drawdown",
            RiskRejection::ImplausibleStop { .. } => "implausible_stop",
            RiskRejection::ImplausibleTarget { .. } => "implausible_target",
            RiskRejection::ExcessSize { .. } => "excess_size",
            RiskRejection::InvalidSize { .. } => "invalid_size",
            RiskRejection::ExcessPositionSize { .. } => "excess_position_size",
        }
    }
}

impl std::fmt::Display for RiskRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskRejection::LowConfidence { confidence, min } => {
                write!(f, "confidence {} below minimum {}", confidence, min)
            }
            RiskRejection::MissingField { action, field } => {
                write!(f, "{} requires a positive {}", action, field)
            }
            RiskRejection::InvalidPrice { price } => write!(f, "invalid current price {}", price),
            RiskRejection::StopLossWrongSide {
                action,
                stop_loss,
                price,
            } => write!(
                f,
                "stop loss {} on wrong side of price {} for {}",
                stop_loss, price, action
            ),
            RiskRejection::TakeProfitWrongSide {
                action,
                take_profit,
                price,
            } => write!(
                f,
                "take profit {} on wrong side of price {} for {}",
                take_profit, price, action
            ),
            RiskRejection::StopLossTooClose {
                distance_percent,
                min_percent,
            } => write!(
                f,
                "stop loss too close: {:.2}% < {}%",
                distance_percent, min_percent
            ),
            RiskRejection::TakeProfitTooClose {
                distance_percent,
                min_percent,
            } => write!(
                f,
                "take profit too close: {:.2}% < {}%",
                distance_percent, min_percent
            ),
            RiskRejection::PoorRiskReward { ratio, min } => {
                write!(f, "risk/reward {:.2} below minimum {}", ratio, min)
            }
            RiskRejection::SpreadTooWide {
                spread_percent,
                max_percent,
            } => write!(f, "spread {:.3}% exceeds {}%", spread_percent, max_percent),
            RiskRejection::EmptyOrderBook => write!(f, "order book missing or one-sided"),
            RiskRejection::ExtremeVolatility {
                band_width_percent,
                max_percent,
            } => write!(
                f,
                "extreme volatility: band width {:.2}% exceeds {}%",
                band_width_percent, max_percent
            ),
            RiskRejection::NoAgreement => write!(f, "ensemble models do not agree"),
            RiskRejection::NoConsensus => write!(f, "ensemble produced no consensus decision"),
            RiskRejection::ExcessDrawdown {
                drawdown_percent,
                max_percent,
            } => write!(
                f,
                "drawdown {:.2}% reached limit {}%",
                drawdown_percent, max_percent
            ),
            RiskRejection::ImplausibleStop {
                distance_percent,
                max_percent,
            } => write!(
                f,
                "stop loss {:.2}% from price exceeds sanity bound {}%",
                distance_percent, max_percent
            ),
            RiskRejection::ImplausibleTarget {
                distance_percent,
                max_percent,
            } => write!(
                f,
                "take profit {:.2}% from price exceeds sanity bound {}%",
                distance_percent, max_percent
            ),
            RiskRejection::ExcessSize { size, max } => {
                write!(f, "size {} exceeds sanity bound {}", size, max)
            }
            RiskRejection::InvalidSize { size } => write!(f, "invalid size {}", size),
            RiskRejection::ExcessPositionSize { notional, limit } => {
                write!(f, "position notional {} exceeds limit {}", notional, limit)
            }
        }
    }
}

/// Outcome of a risk check
pub type RiskVerdict = std::result::Result<(), RiskRejection>;

fn distance_percent(level: Decimal, price: Decimal) -> Decimal {
    (level - price).abs() / price * Decimal::ONE_HUNDRED
}

/// Stateless decision and market checks
#[derive(Debug, Clone, Default)]
pub struct DecisionValidator {
    config: RiskConfig,
}

impl DecisionValidator {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Validate a decision against the current market
    pub fn validate_decision(&self, decision: &Decision, snapshot: &MarketSnapshot) -> RiskVerdict {
        if decision.confidence < self.config.min_confidence {
            return Err(RiskRejection::LowConfidence {
                confidence: decision.confidence,
                min: self.config.min_confidence,
            });
        }

        match decision.action {
            Action::Hold | Action::Close => Ok(()),
            Action::ScaleIn | Action::ScaleOut => {
                decision.positive_size().map(|_| ()).ok_or(RiskRejection::MissingField {
                    action: decision.action,
                    field: "size",
                })
            }
            Action::OpenLong | Action::OpenShort => {
                self.validate_open(decision, snapshot.current_price())
            }
        }
    }

    fn validate_open(&self, decision: &Decision, price: Decimal) -> RiskVerdict {
        let action = decision.action;
        let positive = |value: Option<Decimal>, field: &'static str| {
            value
                .filter(|v| *v > Decimal::ZERO)
                .ok_or(RiskRejection::MissingField { action, field })
        };
        positive(decision.size, "size")?;
        let stop_loss = positive(decision.stop_loss, "stop loss")?;
        let take_profit = positive(decision.take_profit, "take profit")?;

        if price <= Decimal::ZERO {
            return Err(RiskRejection::InvalidPrice { price });
        }

        let is_long = action == Action::OpenLong;
        let stop_ok = if is_long { stop_loss < price } else { stop_loss > price };
        if !stop_ok {
            return Err(RiskRejection::StopLossWrongSide {
                action,
                stop_loss,
                price,
            });
        }
        let target_ok = if is_long {
            take_profit > price
        } else {
            take_profit < price
        };
        if !target_ok {
            return Err(RiskRejection::TakeProfitWrongSide {
                action,
                take_profit,
                price,
            });
        }

        let stop_distance = distance_percent(stop_loss, price);
        if stop_distance < self.config.min_stop_loss_percent {
            return Err(RiskRejection::StopLossTooClose {
                distance_percent: stop_distance,
                min_percent: self.config.min_stop_loss_percent,
            });
        }

        let target_distance = distance_percent(take_profit, price);
        if target_distance < self.config.min_take_profit_percent {
            return Err(RiskRejection::TakeProfitTooClose {
                distance_percent: target_distance,
                min_percent: self.config.min_take_profit_percent,
            });
        }

        let ratio = target_distance / stop_distance;
        if ratio < self.config.min_risk_reward {
            return Err(RiskRejection::PoorRiskReward {
                ratio,
                min: self.config.min_risk_reward,
            });
        }

        debug!(
            %action,
            stop_distance = %stop_distance.round_dp(3),
            target_distance = %target_distance.round_dp(3),
            ratio = %ratio.round_dp(2),
            "decision passed validation"
        );
        Ok(())
    }

    /// Reject markets that are too illiquid or too volatile to trade
    pub fn validate_market_conditions(&self, snapshot: &MarketSnapshot) -> RiskVerdict {
        let book = match &snapshot.order_book {
            Some(book) if book.is_two_sided() => book,
            _ => return Err(RiskRejection::EmptyOrderBook),
        };

        let price = snapshot.current_price();
        if price <= Decimal::ZERO {
            return Err(RiskRejection::InvalidPrice { price });
        }

        let spread = snapshot.ticker.spread_percent().or_else(|| {
            match (book.best_bid(), book.best_ask()) {
                (Some(bid), Some(ask)) => Some((ask - bid) / price * Decimal::ONE_HUNDRED),
                _ => None,
            }
        });
        if let Some(spread) = spread {
            if spread > self.config.max_spread_percent {
                return Err(RiskRejection::SpreadTooWide {
                    spread_percent: spread,
                    max_percent: self.config.max_spread_percent,
                });
            }
        }

        if let Some(width) = snapshot.max_band_width_percent() {
            if width > self.config.max_band_width_percent {
                return Err(RiskRejection::ExtremeVolatility {
                    band_width_percent: width,
                    max_percent: self.config.max_band_width_percent,
                });
            }
        }

        Ok(())
    }

    /// Require internal agreement and a confident consensus from the ensemble
    pub fn validate_ensemble_decision(&self, ensemble: &EnsembleDecision) -> RiskVerdict {
        if !ensemble.agreement {
            return Err(RiskRejection::NoAgreement);
        }
        let consensus = ensemble.consensus.as_ref().ok_or(RiskRejection::NoConsensus)?;
        if consensus.confidence < self.config.min_confidence {
            return Err(RiskRejection::LowConfidence {
                confidence: consensus.confidence,
                min: self.config.min_confidence,
            });
        }
        Ok(())
    }

    /// Reject once equity has fallen `max_drawdown_percent` or more below its peak
    pub fn check_drawdown(
        current_equity: Decimal,
        peak_equity: Decimal,
        max_drawdown_percent: Decimal,
    ) -> RiskVerdict {
        if peak_equity <= Decimal::ZERO {
            return Ok(());
        }
        let drawdown = (peak_equity - current_equity) / peak_equity * Decimal::ONE_HUNDRED;
        if drawdown >= max_drawdown_percent {
            return Err(RiskRejection::ExcessDrawdown {
                drawdown_percent: drawdown,
                max_percent: max_drawdown_percent,
            });
        }
        Ok(())
    }

    /// Coarse bounds against unit or scaling bugs upstream
    pub fn sanity_check(&self, decision: &Decision, current_price: Decimal) -> RiskVerdict {
        if current_price <= Decimal::ZERO {
            return Err(RiskRejection::InvalidPrice {
                price: current_price,
            });
        }
        let max_distance = self.config.sanity_max_distance_percent;

        if let Some(stop_loss) = decision.stop_loss {
            let distance = distance_percent(stop_loss, current_price);
            if distance > max_distance {
                return Err(RiskRejection::ImplausibleStop {
                    distance_percent: distance,
                    max_percent: max_distance,
                });
            }
        }
        if let Some(take_profit) = decision.take_profit {
            let distance = distance_percent(take_profit, current_price);
            if distance > max_distance {
                return Err(RiskRejection::ImplausibleTarget {
                    distance_percent: distance,
                    max_percent: max_distance,
                });
            }
        }
        if let Some(size) = decision.size {
            if size < Decimal::ZERO {
                return Err(RiskRejection::InvalidSize { size });
            }
            if size > self.config.sanity_max_size {
                return Err(RiskRejection::ExcessSize {
                    size,
                    max: self.config.sanity_max_size,
                });
            }
        }
        Ok(())
    }
}
