use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::prompts::{fallback_prompt, template_data, TemplateEngine};
use super::{
    ConsensusResult, CouncilConfig, ValidatorRole, ValidatorSetup, ValidatorVerdict, Verdict,
};
use crate::ai::ValidationRequest;
use crate::domain::{Action, Decision, MarketSnapshot, Position};
use crate::error::{AegisError, Result};

/// Weighted multi-agent review of high-stakes decisions
pub struct ValidatorCouncil {
    config: CouncilConfig,
    validators: Vec<ValidatorSetup>,
    templates: Option<Arc<dyn TemplateEngine>>,
}

impl ValidatorCouncil {
    pub fn new(config: CouncilConfig, validators: Vec<ValidatorSetup>) -> Result<Self> {
        if config.consensus_threshold <= 0.0 || config.consensus_threshold > 1.0 {
            return Err(AegisError::InvalidConfig(format!(
                "council consensus_threshold must be in (0, 1], got {}",
                config.consensus_threshold
            )));
        }
        if let Some(action) = config
            .reviewable_actions
            .iter()
            .find(|a| matches!(a, Action::Hold))
        {
            return Err(AegisError::InvalidConfig(format!(
                "{} is not a reviewable action",
                action
            )));
        }
        if let Some(v) = validators.iter().find(|v| v.weight.is_nan() || v.weight <= 0.0) {
            return Err(AegisError::InvalidConfig(format!(
                "validator {} has non-positive weight {}",
                v.provider_name, v.weight
            )));
        }
        if config.enabled && validators.is_empty() {
            return Err(AegisError::InvalidConfig(
                "council is enabled but has no validators".to_string(),
            ));
        }

        Ok(Self {
            config,
            validators,
            templates: None,
        })
    }

    pub fn with_templates(mut self, engine: Arc<dyn TemplateEngine>) -> Self {
        self.templates = Some(engine);
        self
    }

    pub fn config(&self) -> &CouncilConfig {
        &self.config
    }

    pub fn validators(&self) -> &[ValidatorSetup] {
        &self.validators
    }

    pub fn should_validate(&self, decision: &Decision) -> bool {
        self.config.enabled
            && decision.confidence >= self.config.min_confidence
            && self.config.reviewable_actions.contains(&decision.action)
    }

    fn build_prompt(
        &self,
        role: ValidatorRole,
        decision: &Decision,
        snapshot: &MarketSnapshot,
        position: Option<&Position>,
    ) -> String {
        if let Some(engine) = &self.templates {
            let data: Value = template_data(role, decision, snapshot, position);
            match engine.execute_template(role.template_name(), &data) {
                Ok(prompt) => return prompt,
                Err(e) => {
                    warn!(role = %role, "template rendering failed, using fallback prompt: {}", e)
                }
            }
        }
        fallback_prompt(role, decision, snapshot, position)
    }

    /// Ask every validator concurrently and aggregate their votes.
    ///
    /// Every member is awaited. Errors, timeouts and panics become ABSTAIN
    /// votes with zero confidence, so one failing provider never fails the
    /// whole review.
    pub async fn validate_decision(
        &self,
        decision: &Decision,
        snapshot: &MarketSnapshot,
        position: Option<&Position>,
    ) -> ConsensusResult {
        let member_timeout = Duration::from_secs(self.config.validator_timeout_secs.max(1));

        let tasks: Vec<_> = self
            .validators
            .iter()
            .map(|setup| {
                let setup = setup.clone();
                let request = ValidationRequest {
                    role: setup.role,
                    symbol: snapshot.symbol.clone(),
                    decision: decision.clone(),
                    snapshot: snapshot.clone(),
                    position: position.cloned(),
                    prompt: self.build_prompt(setup.role, decision, snapshot, position),
                };
                tokio::spawn(async move {
                    let started = Instant::now();
                    let result =
                        timeout(member_timeout, setup.provider.validate_decision(&request)).await;
                    let elapsed = started.elapsed().as_millis() as u64;
                    let vote = match result {
                        Ok(Ok(response)) => {
                            let confidence = response.confidence.min(100);
                            ValidatorVerdict {
                                role: setup.role,
                                provider_name: setup.provider_name.clone(),
                                verdict: Verdict::resolve(response.verdict.as_deref(), confidence),
                                confidence,
                                reasoning: response.reasoning,
                                risk_concerns: response.key_risks,
                                recommended_changes: response.recommended_changes,
                                weight: setup.weight,
                                duration_ms: elapsed,
                            }
                        }
                        Ok(Err(e)) => {
                            warn!(provider = %setup.provider_name, role = %setup.role, "validator failed: {}", e);
                            ValidatorVerdict::abstain(
                                setup.role,
                                &setup.provider_name,
                                setup.weight,
                                format!("validation error: {}", e),
                            )
                        }
                        Err(_) => {
                            warn!(provider = %setup.provider_name, role = %setup.role, "validator timed out after {:?}", member_timeout);
                            ValidatorVerdict::abstain(
                                setup.role,
                                &setup.provider_name,
                                setup.weight,
                                format!("timed out after {}s", member_timeout.as_secs()),
                            )
                        }
                    };
                    ValidatorVerdict {
                        duration_ms: elapsed,
                        ..vote
                    }
                })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;

        let votes: Vec<ValidatorVerdict> = results
            .into_iter()
            .zip(self.validators.iter())
            .map(|(result, setup)| match result {
                Ok(vote) => {
                    debug!(
                        provider = %vote.provider_name,
                        role = %vote.role,
                        verdict = %vote.verdict,
                        confidence = vote.confidence,
                        "validator voted"
                    );
                    vote
                }
                Err(e) => {
                    error!(provider = %setup.provider_name, "validator task panicked: {}", e);
                    ValidatorVerdict::abstain(
                        setup.role,
                        &setup.provider_name,
                        setup.weight,
                        format!("validator task failed: {}", e),
                    )
                }
            })
            .collect();

        let result = self.calculate_consensus(votes);
        info!(
            symbol = %snapshot.symbol,
            action = %decision.action,
            verdict = %result.final_verdict,
            approval_rate = result.approval_rate,
            execution_allowed = result.execution_allowed,
            "council review complete"
        );
        result
    }

    pub fn calculate_consensus(&self, votes: Vec<ValidatorVerdict>) -> ConsensusResult {
        let mut approve = 0.0;
        let mut reject = 0.0;
        let mut abstain = 0.0;
        for vote in &votes {
            match vote.verdict {
                Verdict::Approve => approve += vote.weight,
                Verdict::Reject => reject += vote.weight,
                Verdict::Abstain => abstain += vote.weight,
            }
        }
        let total = approve + reject + abstain;

        let (approval_rate, rejection_rate, abstain_rate, consensus_score) = if total > 0.0 {
            (
                approve / total,
                reject / total,
                abstain / total,
                (approve - reject).abs() / total,
            )
        } else {
            (0.0, 0.0, 0.0, 0.0)
        };

        let final_verdict = if votes.is_empty() {
            Verdict::Abstain
        } else if self.config.require_unanimous {
            if votes.iter().all(|v| v.verdict == Verdict::Approve) {
                Verdict::Approve
            } else {
                Verdict::Reject
            }
        } else if approval_rate >= self.config.consensus_threshold {
            Verdict::Approve
        } else if rejection_rate >= self.config.consensus_threshold {
            Verdict::Reject
        } else {
            Verdict::Abstain
        };

        let mut result = ConsensusResult {
            final_verdict,
            approval_rate,
            rejection_rate,
            abstain_rate,
            consensus_score,
            execution_allowed: final_verdict == Verdict::Approve,
            votes,
            summary: String::new(),
        };
        result.summary = self.format_summary(&result);
        result
    }

    fn format_summary(&self, result: &ConsensusResult) -> String {
        let mode = if self.config.require_unanimous {
            "unanimous".to_string()
        } else {
            format!("threshold {:.0}%", self.config.consensus_threshold * 100.0)
        };
        let mut lines = vec![format!(
            "Council {} ({}): approve {:.1}% / reject {:.1}% / abstain {:.1}%, score {:.2}, execution {}",
            result.final_verdict,
            mode,
            result.approval_rate * 100.0,
            result.rejection_rate * 100.0,
            result.abstain_rate * 100.0,
            result.consensus_score,
            if result.execution_allowed { "allowed" } else { "blocked" },
        )];
        for vote in &result.votes {
            let mut line = format!(
                "- {} [{}] {} ({}%, w={}): {}",
                vote.provider_name,
                vote.role,
                vote.verdict,
                vote.confidence,
                vote.weight,
                vote.reasoning
            );
            if !vote.risk_concerns.is_empty() {
                line.push_str(&format!(" | risks: {}", vote.risk_concerns.join("; ")));
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{ValidationProvider, ValidationResponse};
    use async_trait::async_trait;

    struct Fixed(&'static str, Option<&'static str>, u8);

    #[async_trait]
    impl ValidationProvider for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        async fn validate_decision(&self, _request: &ValidationRequest) -> Result<ValidationResponse> {
            Ok(ValidationResponse {
                verdict: self.1.map(str::to_string),
                confidence: self.2,
                reasoning: "ok".into(),
                ..Default::default()
            })
        }
    }

    fn vote(verdict: Verdict, weight: f64) -> ValidatorVerdict {
        let mut v = ValidatorVerdict::abstain(ValidatorRole::TechnicalExpert, "p", weight, String::new());
        v.verdict = verdict;
        v
    }

    fn council(config: CouncilConfig) -> ValidatorCouncil {
        let setup = ValidatorSetup::new(
            ValidatorRole::RiskManager,
            Arc::new(Fixed("claude", Some("APPROVE"), 90)),
            1.0,
        );
        ValidatorCouncil::new(config, vec![setup]).unwrap()
    }

    #[test]
    fn two_approvals_of_three_pass_the_threshold() {
        let c = council(CouncilConfig::default());
        let result = c.calculate_consensus(vec![
            vote(Verdict::Approve, 1.0),
            vote(Verdict::Approve, 1.0),
            vote(Verdict::Reject, 1.0),
        ]);
        assert_eq!(result.final_verdict, Verdict::Approve);
        assert!(result.execution_allowed);
        assert!((result.approval_rate - 0.667).abs() < 0.001);
        assert!((result.consensus_score - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn split_vote_is_no_consensus() {
        let c = council(CouncilConfig::default());
        let result = c.calculate_consensus(vec![
            vote(Verdict::Approve, 1.0),
            vote(Verdict::Reject, 1.0),
            vote(Verdict::Abstain, 1.0),
        ]);
        assert_eq!(result.final_verdict, Verdict::Abstain);
        assert!(!result.execution_allowed);
        assert_eq!(result.consensus_score, 0.0);
    }

    #[test]
    fn weights_shift_the_outcome() {
        let c = council(CouncilConfig::default());
        let result = c.calculate_consensus(vec![
            vote(Verdict::Approve, 1.0),
            vote(Verdict::Reject, 3.0),
        ]);
        assert_eq!(result.final_verdict, Verdict::Reject);
        assert_eq!(result.rejection_rate, 0.75);
    }

    #[test]
    fn unanimous_mode_rejects_on_any_dissent() {
        let c = council(CouncilConfig {
            require_unanimous: true,
            ..CouncilConfig::default()
        });
        let result = c.calculate_consensus(vec![
            vote(Verdict::Approve, 1.0),
            vote(Verdict::Approve, 1.0),
            vote(Verdict::Approve, 1.0),
            vote(Verdict::Reject, 1.0),
        ]);
        assert_eq!(result.final_verdict, Verdict::Reject);
        assert!(!result.execution_allowed);

        let result = c.calculate_consensus(vec![vote(Verdict::Approve, 1.0), vote(Verdict::Abstain, 1.0)]);
        assert_eq!(result.final_verdict, Verdict::Reject);
    }

    #[test]
    fn should_validate_only_confident_openings() {
        let c = council(CouncilConfig::default());
        assert!(c.should_validate(&Decision::new(Action::OpenLong, 70, "x")));
        assert!(!c.should_validate(&Decision::new(Action::OpenLong, 69, "x")));
        assert!(!c.should_validate(&Decision::new(Action::Close, 95, "x")));

        let disabled = council(CouncilConfig {
            enabled: false,
            ..CouncilConfig::default()
        });
        assert!(!disabled.should_validate(&Decision::new(Action::OpenShort, 95, "x")));
    }

    #[test]
    fn construction_rejects_bad_config() {
        let bad_threshold = CouncilConfig {
            consensus_threshold: 1.5,
            ..CouncilConfig::default()
        };
        assert!(ValidatorCouncil::new(bad_threshold, vec![]).is_err());

        let hold = CouncilConfig {
            reviewable_actions: vec![Action::Hold],
            ..CouncilConfig::default()
        };
        assert!(ValidatorCouncil::new(hold, vec![]).is_err());
        assert!(ValidatorCouncil::new(CouncilConfig::default(), vec![]).is_err());
    }

    #[test]
    fn summary_lists_every_vote() {
        let c = council(CouncilConfig::default());
        let result = c.calculate_consensus(vec![vote(Verdict::Approve, 1.0), vote(Verdict::Reject, 1.0)]);
        assert!(result.summary.starts_with("Council ABSTAIN"));
        assert_eq!(result.summary.lines().count(), 3);
    }
}
