//! Aegis: a risk-gated AI trading bot for perpetual futures.
//!
//! Each symbol gets a [`engine::TradingEngine`] that collects market data,
//! asks an ensemble of AI providers for a decision, runs it through hard
//! risk checks and an optional validator council, and only then trades.

pub mod ai;
pub mod config;
pub mod council;
pub mod domain;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod indicators;
pub mod portfolio;
pub mod risk;
pub mod supervisor;

pub use config::AppConfig;
pub use council::{ConsensusResult, ValidatorCouncil};
pub use engine::{CycleOutcome, CycleStage, EngineComponents, TradingEngine};
pub use error::{AegisError, Result};
pub use exchange::{Exchange, PaperExchange};
pub use risk::{CircuitBreaker, DecisionValidator, PositionSizer};
pub use supervisor::{AlertLevel, AlertManager, AlertManagerConfig};
