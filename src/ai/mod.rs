//! AI provider abstractions
//!
//! - `DecisionProvider`: one model proposing a `Decision` for a prompt
//! - `EnsembleAnalyzer`: merges several providers into an `EnsembleDecision`
//! - `ValidationProvider`: a model reviewing someone else's decision
//!
//! `ClaudeCliProvider` implements both provider traits on top of the
//! `claude` CLI.

pub mod claude;
pub mod ensemble;
pub mod request;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::council::ValidatorRole;
use crate::domain::{Decision, EnsembleDecision, MarketSnapshot, Position};
use crate::error::Result;

pub use claude::{ClaudeCliProvider, ProviderConfig};
pub use ensemble::{AgentEnsemble, EnsembleConfig};
pub use request::DecisionRequest;

/// Review request sent to one council member
#[derive(Debug, Clone, Serialize)]
pub struct ValidationRequest {
    pub role: ValidatorRole,
    pub symbol: String,
    pub decision: Decision,
    pub snapshot: MarketSnapshot,
    pub position: Option<Position>,
    /// Rendered role-specific prompt
    pub prompt: String,
}

/// A council member's raw answer, before verdict normalisation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResponse {
    /// Free-form verdict string ("APPROVE", "reject", ...), may be absent
    pub verdict: Option<String>,
    /// 0-100
    pub confidence: u8,
    pub reasoning: String,
    pub key_risks: Vec<String>,
    pub recommended_changes: Vec<String>,
}

#[async_trait]
pub trait DecisionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn decide(&self, prompt: &str) -> Result<Decision>;
}

#[async_trait]
pub trait EnsembleAnalyzer: Send + Sync {
    async fn analyze(&self, prompt: &str) -> Result<EnsembleDecision>;
}

#[async_trait]
pub trait ValidationProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn validate_decision(&self, request: &ValidationRequest) -> Result<ValidationResponse>;
}
