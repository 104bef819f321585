use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::AegisError;

/// Trading action proposed by a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Hold,
    Close,
    OpenLong,
    OpenShort,
    ScaleIn,
    ScaleOut,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::Hold,
        Action::Close,
        Action::OpenLong,
        Action::OpenShort,
        Action::ScaleIn,
        Action::ScaleOut,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Hold => "HOLD",
            Action::Close => "CLOSE",
            Action::OpenLong => "OPEN_LONG",
            Action::OpenShort => "OPEN_SHORT",
            Action::ScaleIn => "SCALE_IN",
            Action::ScaleOut => "SCALE_OUT",
        }
    }

    /// Opens a new directional position
    pub fn is_open(&self) -> bool {
        matches!(self, Action::OpenLong | Action::OpenShort)
    }

    pub fn is_scale(&self) -> bool {
        matches!(self, Action::ScaleIn | Action::ScaleOut)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Action {
    type Err = AegisError;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "HOLD" | "WAIT" | "NONE" => Ok(Action::Hold),
            "CLOSE" | "EXIT" => Ok(Action::Close),
            // BUY/SELL are ambiguous while a position is open
            "OPEN_LONG" | "LONG" => Ok(Action::OpenLong),
            "OPEN_SHORT" | "SHORT" => Ok(Action::OpenShort),
            "SCALE_IN" => Ok(Action::ScaleIn),
            "SCALE_OUT" => Ok(Action::ScaleOut),
            _ => Err(AegisError::Validation(format!("unknown action '{}'", raw))),
        }
    }
}

/// A single model's proposed action for one symbol.
///
/// Produced fresh each cycle and only read by the pipeline afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    /// 0-100
    pub confidence: u8,
    #[serde(default)]
    pub size: Option<Decimal>,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    #[serde(default)]
    pub reason: String,
    /// Name of the provider that produced it
    #[serde(default)]
    pub provider: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Decision {
    pub fn new(action: Action, confidence: u8, provider: impl Into<String>) -> Self {
        Self {
            action,
            confidence: confidence.min(100),
            size: None,
            stop_loss: None,
            take_profit: None,
            reason: String::new(),
            provider: provider.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn hold(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(Action::Hold, 0, provider).with_reason(reason)
    }

    pub fn with_size(mut self, size: Decimal) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_stops(mut self, stop_loss: Decimal, take_profit: Decimal) -> Self {
        self.stop_loss = Some(stop_loss);
        self.take_profit = Some(take_profit);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Size if present and strictly positive
    pub fn positive_size(&self) -> Option<Decimal> {
        self.size.filter(|s| *s > Decimal::ZERO)
    }
}

/// Merged recommendation from several independent models.
///
/// `consensus` is only present when the providers converged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleDecision {
    pub decisions: Vec<Decision>,
    pub consensus: Option<Decision>,
    pub agreement: bool,
    /// Aggregate confidence, 0-100
    pub confidence: u8,
}

impl EnsembleDecision {
    /// Ensemble with a single agreeing member, mostly useful for tests and single-model setups
    pub fn unanimous(decision: Decision) -> Self {
        let confidence = decision.confidence;
        Self {
            decisions: vec![decision.clone()],
            consensus: Some(decision),
            agreement: true,
            confidence,
        }
    }

    pub fn disagreement(decisions: Vec<Decision>) -> Self {
        Self {
            decisions,
            consensus: None,
            agreement: false,
            confidence: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parses_model_spellings() {
        assert_eq!("open_long".parse::<Action>().unwrap(), Action::OpenLong);
        assert_eq!("OPEN-SHORT".parse::<Action>().unwrap(), Action::OpenShort);
        assert_eq!(" scale in ".parse::<Action>().unwrap(), Action::ScaleIn);
        assert_eq!("wait".parse::<Action>().unwrap(), Action::Hold);
        assert!("moon".parse::<Action>().is_err());
    }

    #[test]
    fn buy_and_sell_are_not_actions() {
        assert!("BUY".parse::<Action>().is_err());
        assert!("sell".parse::<Action>().is_err());
    }

    #[test]
    fn action_serializes_screaming_snake() {
        let json = serde_json::to_string(&Action::ScaleOut).unwrap();
        assert_eq!(json, "\"SCALE_OUT\"");
    }

    #[test]
    fn confidence_is_capped() {
        let d = Decision::new(Action::OpenLong, 250, "test");
        assert_eq!(d.confidence, 100);
    }
}
