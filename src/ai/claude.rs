//! Claude provider using subprocess communication
//!
//! Talks to Claude through the `claude` CLI (`--print` mode). One client can
//! serve both as an ensemble member and as a council validator.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{DecisionProvider, ValidationProvider, ValidationRequest, ValidationResponse};
use crate::domain::{Action, Decision};
use crate::error::{AegisError, Result};

/// Configuration for one CLI-backed provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Name used in logs, votes and council role assignment
    pub name: String,
    /// Path to the claude CLI executable
    pub cli_path: String,
    pub model: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u8,
    pub system_prompt: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "claude".to_string(),
            cli_path: "claude".to_string(),
            model: None,
            timeout_secs: 120,
            max_retries: 2,
            system_prompt: Some(DEFAULT_TRADING_SYSTEM_PROMPT.to_string()),
        }
    }
}

const DEFAULT_TRADING_SYSTEM_PROMPT: &str = r#"You are a disciplined derivatives trader.

Capital preservation comes first. Only propose opening a position when the setup is clear,
the stop loss sits beyond nearby noise, and the reward is at least 1.5x the risk.

Always answer with a single JSON object and nothing else."#;

const VALIDATION_RESPONSE_SCHEMA: &str = r#"

Respond ONLY with JSON:
{"verdict": "APPROVE" | "REJECT" | "ABSTAIN", "confidence": 0-100, "reasoning": "...", "key_risks": ["..."], "recommended_changes": ["..."]}"#;

pub struct ClaudeCliProvider {
    config: ProviderConfig,
}

impl ClaudeCliProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Send a prompt, retrying on failure
    pub async fn query(&self, prompt: &str) -> Result<String> {
        let attempts = self.config.max_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.execute_query(prompt).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    warn!(provider = %self.config.name, "query attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AegisError::provider(&self.config.name, "query failed with unknown error")
        }))
    }

    async fn execute_query(&self, prompt: &str) -> Result<String> {
        let mut cmd = Command::new(&self.config.cli_path);
        cmd.arg("--print")
            .arg("--output-format")
            .arg("text")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref model) = self.config.model {
            cmd.arg("--model").arg(model);
        }
        if let Some(ref system_prompt) = self.config.system_prompt {
            cmd.arg("--system-prompt").arg(system_prompt);
        }

        let name = &self.config.name;
        let mut child = cmd
            .spawn()
            .map_err(|e| AegisError::provider(name, format!("failed to spawn CLI: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| AegisError::provider(name, format!("failed to write prompt: {}", e)))?;
        }

        let output = timeout(
            Duration::from_secs(self.config.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| AegisError::provider(name, "timed out"))?
        .map_err(|e| AegisError::provider(name, format!("failed to read output: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AegisError::provider(name, format!("CLI failed: {}", stderr.trim())));
        }

        let text = String::from_utf8_lossy(&output.stdout).to_string();
        debug!(provider = %name, "raw response: {}", text);
        Ok(text)
    }
}

#[async_trait]
impl DecisionProvider for ClaudeCliProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn decide(&self, prompt: &str) -> Result<Decision> {
        let text = self.query(prompt).await?;
        parse_decision(&text, &self.config.name)
    }
}

#[async_trait]
impl ValidationProvider for ClaudeCliProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn validate_decision(&self, request: &ValidationRequest) -> Result<ValidationResponse> {
        let prompt = format!("{}{}", request.prompt, VALIDATION_RESPONSE_SCHEMA);
        let text = self.query(&prompt).await?;
        parse_validation(&text)
    }
}

/// Extract JSON from a response that may contain markdown code blocks
pub(crate) fn extract_json(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        if let Some(end) = text[start + 7..].find("```") {
            return text[start + 7..start + 7 + end].trim();
        }
    }

    if let Some(start) = text.find("```") {
        if let Some(end) = text[start + 3..].find("```") {
            let content = text[start + 3..start + 3 + end].trim();
            // Skip language identifier if present
            if let Some(newline) = content.find('\n') {
                return content[newline + 1..].trim();
            }
            return content;
        }
    }

    if let Some(start) = text.find('{') {
        if let Some(end) = text.rfind('}') {
            if end > start {
                return &text[start..=end];
            }
        }
    }

    text.trim()
}

/// Models answer confidence either as a fraction below 1 or on 0-100.
/// Exactly 1 is read on the 0-100 scale.
fn normalize_confidence(raw: f64) -> u8 {
    if !raw.is_finite() || raw <= 0.0 {
        return 0;
    }
    let scaled = if raw < 1.0 { raw * 100.0 } else { raw };
    scaled.round().min(100.0) as u8
}

fn to_decimal(value: Option<f64>) -> Option<Decimal> {
    value
        .filter(|v| v.is_finite())
        .and_then(|v| Decimal::try_from(v).ok())
        .map(|d| d.round_dp(8))
}

#[derive(Debug, Deserialize)]
struct FlexibleDecision {
    action: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    size: Option<f64>,
    #[serde(default, alias = "stopLoss")]
    stop_loss: Option<f64>,
    #[serde(default, alias = "takeProfit")]
    take_profit: Option<f64>,
    #[serde(default, alias = "reasoning")]
    reason: String,
}

/// Parse a model's trading answer into a `Decision`
pub fn parse_decision(text: &str, provider: &str) -> Result<Decision> {
    let json = extract_json(text);
    let raw: FlexibleDecision = serde_json::from_str(json)
        .map_err(|e| AegisError::ModelOutput(format!("{}: {}", provider, e)))?;
    let action: Action = raw.action.parse()?;

    let mut decision = Decision::new(action, normalize_confidence(raw.confidence), provider)
        .with_reason(raw.reason);
    decision.size = to_decimal(raw.size);
    decision.stop_loss = to_decimal(raw.stop_loss);
    decision.take_profit = to_decimal(raw.take_profit);
    Ok(decision)
}

#[derive(Debug, Deserialize)]
struct FlexibleValidation {
    #[serde(default, alias = "decision", alias = "vote")]
    verdict: Option<String>,
    #[serde(default)]
    confidence: f64,
    #[serde(default, alias = "reason")]
    reasoning: String,
    #[serde(default, alias = "keyRisks", alias = "risk_concerns", alias = "risks")]
    key_risks: Vec<String>,
    #[serde(default, alias = "recommendedChanges")]
    recommended_changes: Vec<String>,
}

/// Parse a council member's answer. The verdict string is kept raw.
pub fn parse_validation(text: &str) -> Result<ValidationResponse> {
    let json = extract_json(text);
    let raw: FlexibleValidation = serde_json::from_str(json)
        .map_err(|e| AegisError::ModelOutput(format!("validation response: {}", e)))?;

    Ok(ValidationResponse {
        verdict: raw.verdict.filter(|v| !v.trim().is_empty()),
        confidence: normalize_confidence(raw.confidence),
        reasoning: raw.reasoning,
        key_risks: raw.key_risks,
        recommended_changes: raw.recommended_changes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_extract_json_from_code_block() {
        let text = r#"Here's my analysis:

```json
{"action": "HOLD", "confidence": 40}
```

That's my recommendation."#;

        let json = extract_json(text);
        assert!(json.starts_with('{'));
        assert!(json.contains("HOLD"));
    }

    #[test]
    fn test_extract_json_raw() {
        let text = r#"{"verdict": "APPROVE", "confidence": 90}"#;
        assert_eq!(extract_json(text), text);
    }

    #[test]
    fn parses_decision_with_camel_case_fields() {
        let text = r#"{"action": "open_long", "confidence": 0.82, "size": 0.5,
            "stopLoss": 97, "takeProfit": 106.5, "reasoning": "breakout"}"#;
        let d = parse_decision(text, "claude").unwrap();
        assert_eq!(d.action, Action::OpenLong);
        assert_eq!(d.confidence, 82);
        assert_eq!(d.size, Some(dec!(0.5)));
        assert_eq!(d.stop_loss, Some(dec!(97)));
        assert_eq!(d.take_profit, Some(dec!(106.5)));
        assert_eq!(d.reason, "breakout");
        assert_eq!(d.provider, "claude");
    }

    #[test]
    fn rejects_unknown_action() {
        assert!(parse_decision(r#"{"action": "YOLO", "confidence": 99}"#, "x").is_err());
        assert!(parse_decision("no json here", "x").is_err());
    }

    #[test]
    fn parses_validation_without_verdict() {
        let v = parse_validation(r#"{"confidence": 75, "reasoning": "fine", "risks": ["funding"]}"#)
            .unwrap();
        assert_eq!(v.verdict, None);
        assert_eq!(v.confidence, 75);
        assert_eq!(v.key_risks, vec!["funding".to_string()]);
    }

    #[test]
    fn confidence_normalisation() {
        assert_eq!(normalize_confidence(0.7), 70);
        assert_eq!(normalize_confidence(0.999), 100);
        assert_eq!(normalize_confidence(1.0), 1);
        assert_eq!(normalize_confidence(85.0), 85);
        assert_eq!(normalize_confidence(250.0), 100);
        assert_eq!(normalize_confidence(-3.0), 0);
        assert_eq!(normalize_confidence(f64::NAN), 0);
    }

    #[test]
    fn test_default_config() {
        let config = ProviderConfig::default();
        assert_eq!(config.cli_path, "claude");
        assert_eq!(config.max_retries, 2);
    }
}
