//! Trading cycle orchestration
//!
//! One [`TradingEngine`] per symbol runs the risk-gated pipeline on a fixed
//! interval: market data, market-condition gate, portfolio and drawdown,
//! AI ensemble, decision validation, council review, execution and
//! bookkeeping.

pub mod collector;
pub mod executor;
pub mod trading;

use serde::{Deserialize, Serialize};

use crate::council::ConsensusResult;
use crate::domain::{Decision, MarginMode};

pub use collector::{MarketDataCollector, MarketIntel};
pub use executor::{DecisionExecutor, ExecutionReport};
pub use trading::{EngineComponents, TradingEngine};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub symbols: Vec<String>,
    pub decision_interval_secs: u64,
    /// Candle timeframes collected every cycle
    pub timeframes: Vec<String>,
    pub candle_limit: usize,
    pub order_book_depth: usize,
    pub margin_mode: MarginMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTC/USDT".to_string()],
            decision_interval_secs: 300,
            timeframes: vec!["15m".to_string(), "1h".to_string(), "4h".to_string()],
            candle_limit: 100,
            order_book_depth: 20,
            margin_mode: MarginMode::Isolated,
        }
    }
}

/// Pipeline stage, used to tag every skip and abort
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStage {
    CircuitBreaker,
    MarketData,
    MarketConditions,
    Portfolio,
    Drawdown,
    Ensemble,
    Agreement,
    RiskValidation,
    SanityCheck,
    Council,
    Execution,
    PostTrade,
}

impl CycleStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStage::CircuitBreaker => "circuit_breaker",
            CycleStage::MarketData => "market_data",
            CycleStage::MarketConditions => "market_conditions",
            CycleStage::Portfolio => "portfolio",
            CycleStage::Drawdown => "drawdown",
            CycleStage::Ensemble => "ensemble",
            CycleStage::Agreement => "agreement",
            CycleStage::RiskValidation => "risk_validation",
            CycleStage::SanityCheck => "sanity_check",
            CycleStage::Council => "council",
            CycleStage::Execution => "execution",
            CycleStage::PostTrade => "post_trade",
        }
    }
}

impl std::fmt::Display for CycleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a cycle ended when it did not abort with an error
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// A gate declined; nothing was sent to the exchange
    Skipped { stage: CycleStage, reason: String },
    /// The decision passed every gate and was HOLD
    Held { decision: Decision },
    Executed {
        decision: Decision,
        report: ExecutionReport,
        consensus: Option<ConsensusResult>,
    },
}

impl CycleOutcome {
    pub fn skipped(stage: CycleStage, reason: impl Into<String>) -> Self {
        CycleOutcome::Skipped {
            stage,
            reason: reason.into(),
        }
    }

    pub fn stage(&self) -> Option<CycleStage> {
        match self {
            CycleOutcome::Skipped { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn is_executed(&self) -> bool {
        matches!(self, CycleOutcome::Executed { .. })
    }
}
