//! Alert manager
//!
//! Routes alerts by severity: every alert is logged and broadcast to local
//! subscribers, warnings and above go to the webhook when one is wired.
//! Duplicate alerts are rate limited per `component:level:title`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use super::webhook::WebhookNotifier;

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    pub fn emoji(&self) -> &'static str {
        match self {
            AlertLevel::Info => "\u{2139}\u{fe0f}",
            AlertLevel::Warning => "\u{26a0}\u{fe0f}",
            AlertLevel::Error => "\u{274c}",
            AlertLevel::Critical => "\u{1f6a8}",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub component: String,
    pub title: String,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(level: AlertLevel, component: &str, title: &str, message: &str) -> Self {
        Self {
            level,
            component: component.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// A trading cycle aborted on a collaborator failure
    pub fn cycle_error(symbol: &str, stage: &str, error: &str) -> Self {
        Self::new(
            AlertLevel::Error,
            &format!("engine:{}", symbol),
            "Trading Cycle Failed",
            &format!("{} failed at {}: {}", symbol, stage, error),
        )
        .with_metadata(serde_json::json!({ "symbol": symbol, "stage": stage }))
    }

    pub fn circuit_breaker_tripped(symbol: &str, reason: &str) -> Self {
        Self::new(
            AlertLevel::Critical,
            "circuit_breaker",
            "Circuit Breaker Tripped",
            &format!("{}: trading paused ({})", symbol, reason),
        )
        .with_metadata(serde_json::json!({
            "symbol": symbol,
            "action": "trading_paused",
            "reason": reason
        }))
    }

    pub fn trade_executed(symbol: &str, summary: &str) -> Self {
        Self::new(
            AlertLevel::Info,
            &format!("engine:{}", symbol),
            "Trade Executed",
            summary,
        )
    }

    pub fn format_text(&self) -> String {
        format!(
            "{} {}\n\nComponent: {}\nTime: {}\n\n{}",
            self.level.emoji(),
            self.title,
            self.component,
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.message
        )
    }
}

/// Fire-and-forget alert sink. Delivery failures stay inside the notifier.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: Alert);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertManagerConfig {
    /// Webhook receiving warnings and above
    pub webhook_url: Option<String>,
    /// Minimum interval between duplicate alerts
    pub rate_limit_secs: u64,
    /// Send info level alerts to the webhook too
    pub notify_info: bool,
    pub max_alerts_per_minute: u32,
}

impl Default for AlertManagerConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            rate_limit_secs: 60,
            notify_info: false,
            max_alerts_per_minute: 10,
        }
    }
}

#[derive(Debug)]
struct RateLimitState {
    last_sent: DateTime<Utc>,
    suppressed_count: u32,
}

pub struct AlertManager {
    config: AlertManagerConfig,
    webhook: Option<Arc<WebhookNotifier>>,
    rate_limits: RwLock<HashMap<String, RateLimitState>>,
    alerts_this_minute: RwLock<Vec<DateTime<Utc>>>,
    event_tx: broadcast::Sender<Alert>,
}

impl AlertManager {
    pub fn new(config: AlertManagerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        let webhook = config
            .webhook_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .map(|url| {
                info!("webhook alerts enabled");
                WebhookNotifier::new(url.to_string())
            });
        Self {
            config,
            webhook,
            rate_limits: RwLock::new(HashMap::new()),
            alerts_this_minute: RwLock::new(Vec::new()),
            event_tx,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(AlertManagerConfig::default())
    }

    pub fn with_webhook(mut self, webhook: Arc<WebhookNotifier>) -> Self {
        self.webhook = Some(webhook);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.event_tx.subscribe()
    }

    fn rate_limit_key(alert: &Alert) -> String {
        format!("{}:{}:{}", alert.component, alert.level, alert.title)
    }

    async fn should_rate_limit(&self, alert: &Alert) -> bool {
        let key = Self::rate_limit_key(alert);
        let now = Utc::now();

        let mut limits = self.rate_limits.write().await;

        if let Some(state) = limits.get_mut(&key) {
            let elapsed = now.signed_duration_since(state.last_sent).num_seconds().max(0) as u64;
            if elapsed < self.config.rate_limit_secs {
                state.suppressed_count += 1;
                debug!(
                    "rate limiting alert '{}' ({} suppressed)",
                    alert.title, state.suppressed_count
                );
                return true;
            }

            state.last_sent = now;
            state.suppressed_count = 0;
        } else {
            limits.insert(
                key,
                RateLimitState {
                    last_sent: now,
                    suppressed_count: 0,
                },
            );
        }

        false
    }

    async fn is_throttled(&self) -> bool {
        let now = Utc::now();
        let minute_ago = now - chrono::Duration::minutes(1);

        let mut alerts = self.alerts_this_minute.write().await;
        alerts.retain(|t| *t > minute_ago);

        if alerts.len() >= self.config.max_alerts_per_minute as usize {
            warn!(
                "alert throttling: {} alerts in last minute (max: {})",
                alerts.len(),
                self.config.max_alerts_per_minute
            );
            return true;
        }

        alerts.push(now);
        false
    }

    pub async fn alert(&self, alert: Alert) {
        match alert.level {
            AlertLevel::Info => info!("[{}] {}: {}", alert.component, alert.title, alert.message),
            AlertLevel::Warning => {
                warn!("[{}] {}: {}", alert.component, alert.title, alert.message)
            }
            AlertLevel::Error => {
                error!("[{}] {}: {}", alert.component, alert.title, alert.message)
            }
            AlertLevel::Critical => {
                error!(
                    "CRITICAL [{}] {}: {}",
                    alert.component, alert.title, alert.message
                )
            }
        }

        if self.should_rate_limit(&alert).await {
            return;
        }

        // No subscribers is fine
        let _ = self.event_tx.send(alert.clone());

        let forward = match alert.level {
            AlertLevel::Info => self.config.notify_info,
            AlertLevel::Warning | AlertLevel::Error | AlertLevel::Critical => true,
        };
        if !forward || self.is_throttled().await {
            return;
        }

        if let Some(webhook) = &self.webhook {
            let webhook = Arc::clone(webhook);
            let text = alert.format_text();
            tokio::spawn(async move {
                if let Err(e) = webhook.send_message(&text).await {
                    error!("failed to deliver webhook alert: {}", e);
                }
            });
        }
    }

    pub async fn get_suppressed_counts(&self) -> HashMap<String, u32> {
        let limits = self.rate_limits.read().await;
        limits
            .iter()
            .filter(|(_, state)| state.suppressed_count > 0)
            .map(|(key, state)| (key.clone(), state.suppressed_count))
            .collect()
    }

    pub async fn reset_rate_limits(&self) {
        self.rate_limits.write().await.clear();
        debug!("alert rate limits reset");
    }
}

#[async_trait]
impl Notifier for AlertManager {
    async fn notify(&self, alert: Alert) {
        self.alert(alert).await;
    }
}
