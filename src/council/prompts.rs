//! Council review prompts
//!
//! Role prompts are rendered through a [`TemplateEngine`]. When no engine is
//! wired, or rendering fails, the embedded fallback for the role is used so
//! that review always goes ahead.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write as _;

use super::ValidatorRole;
use crate::domain::{Decision, MarketSnapshot, Position};
use crate::error::{AegisError, Result};

pub trait TemplateEngine: Send + Sync {
    fn execute_template(&self, name: &str, data: &Value) -> Result<String>;
}

/// Minimal `{{path.to.value}}` substitution engine
#[derive(Debug, Clone, Default)]
pub struct PromptTemplates {
    templates: HashMap<String, String>,
}

impl PromptTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine preloaded with one template per validator role
    pub fn with_defaults() -> Self {
        let mut engine = Self::new();
        for role in [
            ValidatorRole::RiskManager,
            ValidatorRole::TechnicalExpert,
            ValidatorRole::MarketPsychologist,
        ] {
            engine.register(role.template_name(), role_template(role));
        }
        engine
    }

    pub fn register(&mut self, name: impl Into<String>, template: impl Into<String>) {
        self.templates.insert(name.into(), template.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }
}

impl TemplateEngine for PromptTemplates {
    fn execute_template(&self, name: &str, data: &Value) -> Result<String> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| AegisError::Template(format!("template not found: {}", name)))?;

        let mut out = String::with_capacity(template.len());
        let mut rest = template.as_str();
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| AegisError::Template(format!("{}: unclosed placeholder", name)))?;
            let path = after[..end].trim();
            let value = lookup(data, path).ok_or_else(|| {
                AegisError::Template(format!("{}: missing value for '{}'", name, path))
            })?;
            out.push_str(&render_value(value));
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(data, |current, key| match current {
            Value::Object(map) => map.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "n/a".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Data handed to templates
pub fn template_data(
    role: ValidatorRole,
    decision: &Decision,
    snapshot: &MarketSnapshot,
    position: Option<&Position>,
) -> Value {
    serde_json::json!({
        "role": role.as_str(),
        "symbol": snapshot.symbol,
        "price": snapshot.current_price().to_string(),
        "decision": decision,
        "position": position,
        "indicators": snapshot.indicators,
        "funding_rate": snapshot.funding_rate.as_ref().map(|f| f.rate.to_string()),
        "open_interest": snapshot.open_interest.as_ref().map(|o| o.amount.to_string()),
        "news": snapshot.news.as_ref().map(|n| n.summary.clone()),
    })
}

fn role_focus(role: ValidatorRole) -> &'static str {
    match role {
        ValidatorRole::RiskManager => {
            "You are the RISK MANAGER. Judge stop placement, position size, leverage and the \
             worst case if the trade goes wrong. Protecting capital matters more than profit."
        }
        ValidatorRole::TechnicalExpert => {
            "You are the TECHNICAL EXPERT. Judge whether trend, momentum and volatility \
             indicators support the direction, entry and target of the trade."
        }
        ValidatorRole::MarketPsychologist => {
            "You are the MARKET PSYCHOLOGIST. Judge crowd positioning, funding, open interest \
             and news flow. Look for signs that the trade is late or crowded."
        }
    }
}

fn role_template(role: ValidatorRole) -> String {
    format!(
        "{}\n\n\
         Proposed trade on {{{{symbol}}}} at {{{{price}}}}:\n\
         action={{{{decision.action}}}} confidence={{{{decision.confidence}}}} \
         size={{{{decision.size}}}} stop_loss={{{{decision.stop_loss}}}} \
         take_profit={{{{decision.take_profit}}}}\n\
         Reason given: {{{{decision.reason}}}}\n\n\
         Funding rate: {{{{funding_rate}}}} | Open interest: {{{{open_interest}}}}\n\
         Indicators: {{{{indicators}}}}\n\n\
         Vote APPROVE, REJECT or ABSTAIN.",
        role_focus(role)
    )
}

/// Prompt used when no template engine is available
pub fn fallback_prompt(
    role: ValidatorRole,
    decision: &Decision,
    snapshot: &MarketSnapshot,
    position: Option<&Position>,
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "{}\n", role_focus(role));
    let _ = writeln!(
        prompt,
        "Proposed trade on {} at {}:",
        snapshot.symbol,
        snapshot.current_price()
    );
    let _ = writeln!(
        prompt,
        "action={} confidence={} size={} stop_loss={} take_profit={}",
        decision.action,
        decision.confidence,
        fmt_decimal(decision.size),
        fmt_decimal(decision.stop_loss),
        fmt_decimal(decision.take_profit),
    );
    let _ = writeln!(prompt, "Reason given: {}", decision.reason);

    if let Some(pos) = position.filter(|p| p.is_open()) {
        let _ = writeln!(
            prompt,
            "Current position: {} {} @ {} ({}x)",
            pos.side, pos.size, pos.entry_price, pos.leverage
        );
    }
    if let Some(funding) = &snapshot.funding_rate {
        let _ = writeln!(prompt, "Funding rate: {}", funding.rate);
    }
    for (timeframe, ind) in &snapshot.indicators {
        let _ = writeln!(
            prompt,
            "[{}] RSI14={:?} ATR14={:?} BBwidth={:?}%",
            timeframe, ind.rsi_14, ind.atr_14, ind.bollinger_width_percent
        );
    }
    let _ = write!(prompt, "\nVote APPROVE, REJECT or ABSTAIN.");
    prompt
}

fn fmt_decimal(value: Option<rust_decimal::Decimal>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "n/a".to_string())
}
