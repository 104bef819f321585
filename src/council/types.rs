use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::ai::ValidationProvider;
use crate::domain::Action;
use crate::error::AegisError;

/// Perspective a council member reviews from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorRole {
    RiskManager,
    TechnicalExpert,
    MarketPsychologist,
}

impl ValidatorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidatorRole::RiskManager => "risk_manager",
            ValidatorRole::TechnicalExpert => "technical_expert",
            ValidatorRole::MarketPsychologist => "market_psychologist",
        }
    }

    /// Template looked up in the prompt engine for this role
    pub fn template_name(&self) -> &'static str {
        match self {
            ValidatorRole::RiskManager => "validator_risk_manager",
            ValidatorRole::TechnicalExpert => "validator_technical_expert",
            ValidatorRole::MarketPsychologist => "validator_market_psychologist",
        }
    }

    /// Name-based role assignment for setups that only list providers
    pub fn for_provider_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name.contains("claude") || name.contains("anthropic") {
            ValidatorRole::RiskManager
        } else if name.contains("gemini") || name.contains("grok") {
            ValidatorRole::MarketPsychologist
        } else {
            ValidatorRole::TechnicalExpert
        }
    }
}

impl fmt::Display for ValidatorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ValidatorRole {
    type Err = AegisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "risk_manager" | "risk" => Ok(ValidatorRole::RiskManager),
            "technical_expert" | "technical" => Ok(ValidatorRole::TechnicalExpert),
            "market_psychologist" | "sentiment" | "psychologist" => {
                Ok(ValidatorRole::MarketPsychologist)
            }
            other => Err(AegisError::InvalidConfig(format!(
                "unknown validator role: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Approve,
    Reject,
    Abstain,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Approve => "APPROVE",
            Verdict::Reject => "REJECT",
            Verdict::Abstain => "ABSTAIN",
        }
    }

    /// Map a free-form verdict string, `None` when unrecognised
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "APPROVE" | "APPROVED" | "YES" | "ACCEPT" | "PASS" => Some(Verdict::Approve),
            "REJECT" | "REJECTED" | "NO" | "DENY" | "VETO" => Some(Verdict::Reject),
            "ABSTAIN" | "NEUTRAL" | "UNSURE" => Some(Verdict::Abstain),
            _ => None,
        }
    }

    pub fn from_confidence(confidence: u8) -> Self {
        if confidence >= 70 {
            Verdict::Approve
        } else if confidence < 50 {
            Verdict::Reject
        } else {
            Verdict::Abstain
        }
    }

    /// Parsed verdict, or one inferred from confidence
    pub fn resolve(raw: Option<&str>, confidence: u8) -> Self {
        raw.and_then(Verdict::parse)
            .unwrap_or_else(|| Verdict::from_confidence(confidence))
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One council member's vote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorVerdict {
    pub role: ValidatorRole,
    pub provider_name: String,
    pub verdict: Verdict,
    pub confidence: u8,
    pub reasoning: String,
    pub risk_concerns: Vec<String>,
    pub recommended_changes: Vec<String>,
    pub weight: f64,
    pub duration_ms: u64,
}

impl ValidatorVerdict {
    /// Vote recorded for a member that failed to answer
    pub fn abstain(role: ValidatorRole, provider_name: &str, weight: f64, reason: String) -> Self {
        Self {
            role,
            provider_name: provider_name.to_string(),
            verdict: Verdict::Abstain,
            confidence: 0,
            reasoning: reason,
            risk_concerns: Vec::new(),
            recommended_changes: Vec::new(),
            weight,
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub final_verdict: Verdict,
    pub approval_rate: f64,
    pub rejection_rate: f64,
    pub abstain_rate: f64,
    /// 0 when evenly split, 1 when one-sided
    pub consensus_score: f64,
    pub execution_allowed: bool,
    pub votes: Vec<ValidatorVerdict>,
    pub summary: String,
}

/// A configured member: provider name, optional explicit role, vote weight
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilMemberConfig {
    pub provider: String,
    #[serde(default)]
    pub role: Option<ValidatorRole>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl CouncilMemberConfig {
    pub fn resolved_role(&self) -> ValidatorRole {
        self.role
            .unwrap_or_else(|| ValidatorRole::for_provider_name(&self.provider))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CouncilConfig {
    pub enabled: bool,
    pub min_confidence: u8,
    pub reviewable_actions: Vec<Action>,
    pub consensus_threshold: f64,
    pub require_unanimous: bool,
    pub validator_timeout_secs: u64,
    pub members: Vec<CouncilMemberConfig>,
}

impl Default for CouncilConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_confidence: 70,
            reviewable_actions: vec![Action::OpenLong, Action::OpenShort],
            consensus_threshold: 0.66,
            require_unanimous: false,
            validator_timeout_secs: 60,
            members: Vec::new(),
        }
    }
}

/// A wired council member
#[derive(Clone)]
pub struct ValidatorSetup {
    pub role: ValidatorRole,
    pub provider: Arc<dyn ValidationProvider>,
    pub provider_name: String,
    pub weight: f64,
}

impl ValidatorSetup {
    pub fn new(role: ValidatorRole, provider: Arc<dyn ValidationProvider>, weight: f64) -> Self {
        let provider_name = provider.name().to_string();
        Self {
            role,
            provider,
            provider_name,
            weight,
        }
    }
}

impl fmt::Debug for ValidatorSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorSetup")
            .field("role", &self.role)
            .field("provider_name", &self.provider_name)
            .field("weight", &self.weight)
            .finish()
    }
}
