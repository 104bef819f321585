//! Validator council review with misbehaving members.

use aegis::ai::{ValidationProvider, ValidationRequest, ValidationResponse};
use aegis::council::{
    CouncilConfig, PromptTemplates, ValidatorCouncil, ValidatorRole, ValidatorSetup, Verdict,
};
use aegis::domain::{Action, Decision, MarketSnapshot};
use aegis::error::{AegisError, Result};
use aegis::exchange::{Exchange, PaperConfig, PaperExchange};
use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

enum Behaviour {
    Vote(&'static str, u8),
    Fail,
    Hang,
    Panic,
}

struct Member {
    name: &'static str,
    behaviour: Behaviour,
    prompts: Mutex<Vec<String>>,
}

impl Member {
    fn new(name: &'static str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            name,
            behaviour,
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ValidationProvider for Member {
    fn name(&self) -> &str {
        self.name
    }

    async fn validate_decision(&self, request: &ValidationRequest) -> Result<ValidationResponse> {
        self.prompts.lock().await.push(request.prompt.clone());
        match self.behaviour {
            Behaviour::Vote(verdict, confidence) => Ok(ValidationResponse {
                verdict: Some(verdict.to_string()),
                confidence,
                reasoning: format!("{} says {}", self.name, verdict),
                ..Default::default()
            }),
            Behaviour::Fail => Err(AegisError::provider(self.name, "rate limited")),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(ValidationResponse::default())
            }
            Behaviour::Panic => panic!("validator crashed"),
        }
    }
}

fn setup(role: ValidatorRole, member: &Arc<Member>) -> ValidatorSetup {
    ValidatorSetup::new(role, member.clone(), 1.0)
}

fn config() -> CouncilConfig {
    CouncilConfig {
        validator_timeout_secs: 1,
        ..Default::default()
    }
}

fn decision() -> Decision {
    Decision::new(Action::OpenShort, 85, "ensemble")
        .with_size(dec!(0.5))
        .with_stops(dec!(103), dec!(94))
        .with_reason("rejection at resistance")
}

async fn snapshot() -> MarketSnapshot {
    let exchange = PaperExchange::new(PaperConfig::default());
    let ticker = exchange.fetch_ticker("ETH/USDT").await.unwrap();
    MarketSnapshot::new("ETH/USDT", ticker)
}

#[tokio::test]
async fn failing_member_abstains_without_failing_the_review() {
    let risk = Member::new("claude", Behaviour::Vote("APPROVE", 90));
    let tech = Member::new("gpt", Behaviour::Vote("APPROVE", 80));
    let psych = Member::new("grok", Behaviour::Fail);
    let council = ValidatorCouncil::new(
        config(),
        vec![
            setup(ValidatorRole::RiskManager, &risk),
            setup(ValidatorRole::TechnicalExpert, &tech),
            setup(ValidatorRole::MarketPsychologist, &psych),
        ],
    )
    .unwrap();

    let result = council
        .validate_decision(&decision(), &snapshot().await, None)
        .await;

    assert_eq!(result.votes.len(), 3);
    let failed = result
        .votes
        .iter()
        .find(|v| v.provider_name == "grok")
        .unwrap();
    assert_eq!(failed.verdict, Verdict::Abstain);
    assert_eq!(failed.confidence, 0);
    // 2 of 3 approve: 66.7% clears the 0.66 threshold
    assert_eq!(result.final_verdict, Verdict::Approve);
    assert!(result.execution_allowed);
}

#[tokio::test]
async fn hung_member_is_cut_off_at_the_timeout() {
    let fast = Member::new("claude", Behaviour::Vote("REJECT", 95));
    let slow = Member::new("gemini", Behaviour::Hang);
    let council = ValidatorCouncil::new(
        config(),
        vec![
            setup(ValidatorRole::RiskManager, &fast),
            setup(ValidatorRole::MarketPsychologist, &slow),
        ],
    )
    .unwrap();

    let started = Instant::now();
    let result = council
        .validate_decision(&decision(), &snapshot().await, None)
        .await;

    assert!(started.elapsed() < Duration::from_secs(10));
    let timed_out = &result.votes[1];
    assert_eq!(timed_out.verdict, Verdict::Abstain);
    assert!(timed_out.reasoning.contains("timed out"));
    // 1 reject of 2 votes is below threshold
    assert_eq!(result.final_verdict, Verdict::Abstain);
    assert!(!result.execution_allowed);
}

#[tokio::test]
async fn panicking_member_abstains() {
    let ok = Member::new("claude", Behaviour::Vote("APPROVE", 90));
    let bad = Member::new("gpt", Behaviour::Panic);
    let council = ValidatorCouncil::new(
        config(),
        vec![
            setup(ValidatorRole::RiskManager, &ok),
            setup(ValidatorRole::TechnicalExpert, &bad),
        ],
    )
    .unwrap();

    let result = council
        .validate_decision(&decision(), &snapshot().await, None)
        .await;

    assert_eq!(result.votes[1].verdict, Verdict::Abstain);
    assert_eq!(result.votes[1].confidence, 0);
    assert!(!result.execution_allowed);
}

#[tokio::test]
async fn unanimous_mode_blocks_on_a_single_dissent() {
    let a = Member::new("claude", Behaviour::Vote("APPROVE", 90));
    let b = Member::new("gpt", Behaviour::Vote("APPROVE", 90));
    let c = Member::new("grok", Behaviour::Vote("REJECT", 60));
    let council = ValidatorCouncil::new(
        CouncilConfig {
            require_unanimous: true,
            ..config()
        },
        vec![
            setup(ValidatorRole::RiskManager, &a),
            setup(ValidatorRole::TechnicalExpert, &b),
            setup(ValidatorRole::MarketPsychologist, &c),
        ],
    )
    .unwrap();

    let result = council
        .validate_decision(&decision(), &snapshot().await, None)
        .await;

    assert_eq!(result.final_verdict, Verdict::Reject);
    assert!(!result.execution_allowed);
    assert!(result.summary.contains("unanimous"));
}

#[tokio::test]
async fn verdict_falls_back_to_confidence_when_missing() {
    let vague = Member::new("claude", Behaviour::Vote("looks fine I guess", 75));
    let council =
        ValidatorCouncil::new(config(), vec![setup(ValidatorRole::RiskManager, &vague)]).unwrap();

    let result = council
        .validate_decision(&decision(), &snapshot().await, None)
        .await;

    assert_eq!(result.votes[0].verdict, Verdict::Approve);
    assert!(result.execution_allowed);
}

#[tokio::test]
async fn each_role_receives_its_own_prompt() {
    let risk = Member::new("claude", Behaviour::Vote("APPROVE", 90));
    let psych = Member::new("grok", Behaviour::Vote("APPROVE", 90));
    let council = ValidatorCouncil::new(
        config(),
        vec![
            setup(ValidatorRole::RiskManager, &risk),
            setup(ValidatorRole::MarketPsychologist, &psych),
        ],
    )
    .unwrap()
    .with_templates(Arc::new(PromptTemplates::with_defaults()));

    council
        .validate_decision(&decision(), &snapshot().await, None)
        .await;

    let risk_prompt = risk.prompts.lock().await[0].clone();
    let psych_prompt = psych.prompts.lock().await[0].clone();
    assert_ne!(risk_prompt, psych_prompt);
    assert!(risk_prompt.contains("ETH/USDT"));
    assert!(risk_prompt.contains("OPEN_SHORT"));
}
