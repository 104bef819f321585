use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::ai::{EnsembleConfig, ProviderConfig};
use crate::council::CouncilConfig;
use crate::domain::Action;
use crate::engine::EngineConfig;
use crate::exchange::{parse_exchange_kind, PaperConfig};
use crate::portfolio::PortfolioConfig;
use crate::risk::{CircuitBreakerConfig, RiskConfig, SizingConfig};
use crate::supervisor::AlertManagerConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub risk: RiskConfig,
    pub sizing: SizingConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub council: CouncilConfig,
    pub ai: AiConfig,
    pub exchange: ExchangeConfig,
    pub portfolio: PortfolioConfig,
    pub alerts: AlertManagerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Named CLI providers usable by the ensemble and the council
    pub providers: Vec<ProviderConfig>,
    pub ensemble: EnsembleConfig,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            providers: vec![ProviderConfig::default()],
            ensemble: EnsembleConfig::default(),
        }
    }
}

impl AiConfig {
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// paper | binance | bybit | okx
    pub kind: String,
    pub paper: PaperConfig,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            kind: "paper".to_string(),
            paper: PaperConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific overrides (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("AEGIS_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // AEGIS_RISK__MIN_CONFIDENCE=80, AEGIS_ENGINE__DECISION_INTERVAL_SECS=60, ...
            .add_source(
                Environment::with_prefix("AEGIS")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values, reporting every problem at once
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Engine
        if self.engine.symbols.is_empty() {
            errors.push("engine.symbols must list at least one symbol".to_string());
        }
        if self.engine.decision_interval_secs == 0 {
            errors.push("engine.decision_interval_secs must be positive".to_string());
        }
        if self.engine.candle_limit == 0 {
            errors.push("engine.candle_limit must be positive".to_string());
        }

        // Risk
        if self.risk.min_confidence > 100 {
            errors.push("risk.min_confidence must be at most 100".to_string());
        }
        if self.risk.min_stop_loss_percent <= Decimal::ZERO {
            errors.push("risk.min_stop_loss_percent must be positive".to_string());
        }
        if self.risk.min_risk_reward <= Decimal::ZERO {
            errors.push("risk.min_risk_reward must be positive".to_string());
        }
        if self.risk.max_drawdown_percent <= Decimal::ZERO
            || self.risk.max_drawdown_percent > Decimal::ONE_HUNDRED
        {
            errors.push("risk.max_drawdown_percent must be in (0, 100]".to_string());
        }

        // Sizing
        if self.sizing.max_leverage == 0 {
            errors.push("sizing.max_leverage must be at least 1".to_string());
        }
        if self.sizing.default_leverage > self.sizing.max_leverage {
            errors.push(format!(
                "sizing.default_leverage {} exceeds max_leverage {}",
                self.sizing.default_leverage, self.sizing.max_leverage
            ));
        }
        if self.sizing.max_position_percent <= Decimal::ZERO
            || self.sizing.max_position_percent > Decimal::ONE_HUNDRED
        {
            errors.push("sizing.max_position_percent must be in (0, 100]".to_string());
        }

        // Circuit breaker
        if self.circuit_breaker.max_rolling_loss_fraction < Decimal::ZERO
            || self.circuit_breaker.max_rolling_loss_fraction > Decimal::ONE
        {
            errors.push("circuit_breaker.max_rolling_loss_fraction must be in [0, 1]".to_string());
        }

        // AI providers and ensemble
        let mut names = HashSet::new();
        for provider in &self.ai.providers {
            if !names.insert(provider.name.as_str()) {
                errors.push(format!("ai.providers: duplicate name '{}'", provider.name));
            }
        }
        if self.ai.ensemble.members.is_empty() {
            errors.push("ai.ensemble.members must not be empty".to_string());
        }
        for member in &self.ai.ensemble.members {
            if self.ai.provider(member).is_none() {
                errors.push(format!("ai.ensemble.members: unknown provider '{}'", member));
            }
        }
        if self.ai.ensemble.min_agreement <= 0.0 || self.ai.ensemble.min_agreement > 1.0 {
            errors.push("ai.ensemble.min_agreement must be in (0, 1]".to_string());
        }

        // Council
        if self.council.consensus_threshold <= 0.0 || self.council.consensus_threshold > 1.0 {
            errors.push("council.consensus_threshold must be in (0, 1]".to_string());
        }
        if self.council.reviewable_actions.contains(&Action::Hold) {
            errors.push("council.reviewable_actions cannot include HOLD".to_string());
        }
        if self.council.enabled {
            if self.council.members.is_empty() {
                errors.push("council is enabled but council.members is empty".to_string());
            }
            for member in &self.council.members {
                if self.ai.provider(&member.provider).is_none() {
                    errors.push(format!("council.members: unknown provider '{}'", member.provider));
                }
                if member.weight.is_nan() || member.weight <= 0.0 {
                    errors.push(format!(
                        "council.members: weight of '{}' must be positive",
                        member.provider
                    ));
                }
            }
        }

        // Exchange
        if let Err(e) = parse_exchange_kind(&self.exchange.kind) {
            errors.push(format!("exchange.kind: {}", e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::council::{CouncilMemberConfig, ValidatorRole};
    use std::io::Write;

    fn valid() -> AppConfig {
        let mut config = AppConfig::default();
        config.council.members = vec![CouncilMemberConfig {
            provider: "claude".to_string(),
            role: None,
            weight: 1.0,
        }];
        config
    }

    #[test]
    fn defaults_plus_one_member_validate() {
        assert_eq!(valid().validate(), Ok(()));
    }

    #[test]
    fn validate_reports_every_problem() {
        let mut config = valid();
        config.engine.symbols.clear();
        config.council.consensus_threshold = 0.0;
        config.exchange.kind = "mtgox".to_string();
        config.ai.ensemble.members = vec!["gpt".to_string()];

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4, "{:?}", errors);
    }

    #[test]
    fn load_from_directory_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("default.toml")).unwrap();
        writeln!(
            file,
            r#"
[engine]
symbols = ["ETH/USDT"]
decision_interval_secs = 60

[risk]
min_confidence = 80

[council]
consensus_threshold = 0.75

[[council.members]]
provider = "claude"
role = "market_psychologist"
weight = 2.0
"#
        )
        .unwrap();

        let config = AppConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.engine.symbols, vec!["ETH/USDT".to_string()]);
        assert_eq!(config.engine.decision_interval_secs, 60);
        assert_eq!(config.risk.min_confidence, 80);
        assert_eq!(config.risk.min_risk_reward, rust_decimal_macros::dec!(1.5));
        assert_eq!(config.council.members[0].role, Some(ValidatorRole::MarketPsychologist));
        assert_eq!(config.council.members[0].weight, 2.0);
        assert_eq!(config.exchange.kind, "paper");
    }
}
