//! Multi-model ensemble
//!
//! Every member answers the same prompt in parallel. The ensemble agrees
//! when the most popular action holds at least `min_agreement` of the
//! answers that came back; its members are merged into the consensus.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{DecisionProvider, EnsembleAnalyzer};
use crate::domain::{Action, Decision, EnsembleDecision};
use crate::error::{AegisError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Names of the providers taking part
    pub members: Vec<String>,
    /// Share of answers that must pick the same action
    pub min_agreement: f64,
    /// Answers required before agreement is considered at all
    pub min_responses: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            members: vec!["claude".to_string()],
            min_agreement: 0.66,
            min_responses: 1,
        }
    }
}

pub struct AgentEnsemble {
    members: Vec<Arc<dyn DecisionProvider>>,
    config: EnsembleConfig,
}

impl AgentEnsemble {
    pub fn new(members: Vec<Arc<dyn DecisionProvider>>, config: EnsembleConfig) -> Result<Self> {
        if members.is_empty() {
            return Err(AegisError::InvalidConfig(
                "ensemble needs at least one member".to_string(),
            ));
        }
        Ok(Self { members, config })
    }

    pub fn member_names(&self) -> Vec<String> {
        self.members.iter().map(|m| m.name().to_string()).collect()
    }

    /// Merge the answers of several members
    pub fn combine(&self, decisions: Vec<Decision>) -> EnsembleDecision {
        if decisions.len() < self.config.min_responses.max(1) {
            return EnsembleDecision::disagreement(decisions);
        }

        // Largest group wins, then summed confidence; exact ties go to the
        // action listed first in `Action::ALL` (HOLD before CLOSE before opens)
        let mut best: Option<(Action, Vec<&Decision>, (usize, u32))> = None;
        for action in Action::ALL {
            let group: Vec<&Decision> = decisions.iter().filter(|d| d.action == action).collect();
            if group.is_empty() {
                continue;
            }
            let key = (
                group.len(),
                group.iter().map(|d| d.confidence as u32).sum::<u32>(),
            );
            if best.as_ref().map_or(true, |(_, _, top)| key > *top) {
                best = Some((action, group, key));
            }
        }
        let Some((action, group, _)) = best else {
            return EnsembleDecision::disagreement(decisions);
        };

        let share = group.len() as f64 / decisions.len() as f64;
        if share < self.config.min_agreement {
            debug!(%action, share, "ensemble below agreement threshold");
            let mut result = EnsembleDecision::disagreement(decisions.clone());
            result.confidence = average_confidence(decisions.iter());
            return result;
        }

        let consensus = merge(action, &group);
        let confidence = consensus.confidence;
        EnsembleDecision {
            decisions,
            consensus: Some(consensus),
            agreement: true,
            confidence,
        }
    }
}

fn average_confidence<'a>(decisions: impl Iterator<Item = &'a Decision>) -> u8 {
    let (sum, count) = decisions.fold((0u32, 0u32), |(s, c), d| (s + d.confidence as u32, c + 1));
    if count == 0 {
        0
    } else {
        (sum / count) as u8
    }
}

fn average_decimal<'a>(values: impl Iterator<Item = &'a Option<Decimal>>) -> Option<Decimal> {
    let present: Vec<Decimal> = values.filter_map(|v| *v).collect();
    if present.is_empty() {
        None
    } else {
        Some(present.iter().sum::<Decimal>() / Decimal::from(present.len()))
    }
}

fn merge(action: Action, group: &[&Decision]) -> Decision {
    let providers: Vec<&str> = group.iter().map(|d| d.provider.as_str()).collect();
    let reason = group
        .iter()
        .filter(|d| !d.reason.is_empty())
        .map(|d| format!("[{}] {}", d.provider, d.reason))
        .collect::<Vec<_>>()
        .join(" ");

    let mut consensus = Decision::new(
        action,
        average_confidence(group.iter().copied()),
        format!("ensemble({})", providers.join(",")),
    )
    .with_reason(reason);
    consensus.size = average_decimal(group.iter().map(|d| &d.size));
    consensus.stop_loss = average_decimal(group.iter().map(|d| &d.stop_loss));
    consensus.take_profit = average_decimal(group.iter().map(|d| &d.take_profit));
    consensus
}

#[async_trait]
impl EnsembleAnalyzer for AgentEnsemble {
    async fn analyze(&self, prompt: &str) -> Result<EnsembleDecision> {
        let tasks: Vec<_> = self
            .members
            .iter()
            .map(|member| {
                let member = Arc::clone(member);
                let prompt = prompt.to_string();
                tokio::spawn(async move {
                    let name = member.name().to_string();
                    (name, member.decide(&prompt).await)
                })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;

        let mut decisions = Vec::new();
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok((name, Ok(decision))) => {
                    debug!(provider = %name, action = %decision.action, confidence = decision.confidence, "ensemble member answered");
                    decisions.push(decision);
                }
                Ok((name, Err(e))) => {
                    warn!(provider = %name, "ensemble member failed: {}", e);
                    failures.push(format!("{}: {}", name, e));
                }
                Err(e) => {
                    error!("ensemble member task panicked: {}", e);
                    failures.push(e.to_string());
                }
            }
        }

        if decisions.is_empty() {
            return Err(AegisError::provider(
                "ensemble",
                format!("all members failed ({})", failures.join("; ")),
            ));
        }

        let ensemble = self.combine(decisions);
        info!(
            agreement = ensemble.agreement,
            confidence = ensemble.confidence,
            action = ensemble.consensus.as_ref().map(|d| d.action.as_str()).unwrap_or("-"),
            "ensemble analysis complete"
        );
        Ok(ensemble)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct Scripted {
        name: String,
        answer: Option<Decision>,
    }

    #[async_trait]
    impl DecisionProvider for Scripted {
        fn name(&self) -> &str {
            &self.name
        }

        async fn decide(&self, _prompt: &str) -> Result<Decision> {
            self.answer
                .clone()
                .ok_or_else(|| AegisError::provider(&self.name, "offline"))
        }
    }

    fn member(name: &str, answer: Option<Decision>) -> Arc<dyn DecisionProvider> {
        Arc::new(Scripted {
            name: name.to_string(),
            answer,
        })
    }

    fn long(provider: &str, confidence: u8, stop: Decimal) -> Decision {
        Decision::new(Action::OpenLong, confidence, provider)
            .with_size(dec!(1))
            .with_stops(stop, dec!(110))
    }

    #[tokio::test]
    async fn two_of_three_agree() {
        let ensemble = AgentEnsemble::new(
            vec![
                member("a", Some(long("a", 80, dec!(96)))),
                member("b", Some(long("b", 90, dec!(98)))),
                member("c", Some(Decision::new(Action::Hold, 60, "c"))),
            ],
            EnsembleConfig::default(),
        )
        .unwrap();

        let result = ensemble.analyze("prompt").await.unwrap();
        assert!(result.agreement);
        let consensus = result.consensus.unwrap();
        assert_eq!(consensus.action, Action::OpenLong);
        assert_eq!(consensus.confidence, 85);
        assert_eq!(consensus.stop_loss, Some(dec!(97)));
        assert_eq!(result.decisions.len(), 3);
    }

    #[tokio::test]
    async fn split_vote_has_no_consensus() {
        let ensemble = AgentEnsemble::new(
            vec![
                member("a", Some(long("a", 80, dec!(96)))),
                member("b", Some(Decision::new(Action::OpenShort, 80, "b"))),
            ],
            EnsembleConfig::default(),
        )
        .unwrap();

        let result = ensemble.analyze("prompt").await.unwrap();
        assert!(!result.agreement);
        assert!(result.consensus.is_none());
    }

    #[test]
    fn exact_tie_resolves_to_the_more_conservative_action() {
        let ensemble = AgentEnsemble::new(
            vec![member("a", None)],
            EnsembleConfig {
                min_agreement: 0.5,
                ..Default::default()
            },
        )
        .unwrap();

        for _ in 0..20 {
            let result = ensemble.combine(vec![
                long("a", 80, dec!(96)),
                Decision::new(Action::Hold, 80, "b"),
            ]);
            assert_eq!(result.consensus.unwrap().action, Action::Hold);

            let result = ensemble.combine(vec![
                Decision::new(Action::OpenShort, 70, "a"),
                long("b", 70, dec!(96)),
            ]);
            assert_eq!(result.consensus.unwrap().action, Action::OpenLong);
        }
    }

    #[tokio::test]
    async fn failed_members_are_skipped() {
        let ensemble = AgentEnsemble::new(
            vec![member("a", Some(long("a", 80, dec!(96)))), member("b", None)],
            EnsembleConfig::default(),
        )
        .unwrap();

        let result = ensemble.analyze("prompt").await.unwrap();
        assert!(result.agreement);
        assert_eq!(result.decisions.len(), 1);
    }

    #[tokio::test]
    async fn all_members_failing_is_an_error() {
        let ensemble =
            AgentEnsemble::new(vec![member("a", None), member("b", None)], EnsembleConfig::default())
                .unwrap();
        assert!(ensemble.analyze("prompt").await.is_err());
    }

    #[test]
    fn empty_ensemble_is_a_config_error() {
        assert!(AgentEnsemble::new(vec![], EnsembleConfig::default()).is_err());
    }
}
