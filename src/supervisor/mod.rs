//! Supervision and alerting
//!
//! - Alert manager with severity routing, rate limiting and subscriptions
//! - Webhook delivery for operator notifications

pub mod alert_manager;
pub mod webhook;

pub use alert_manager::{Alert, AlertLevel, AlertManager, AlertManagerConfig, Notifier};
pub use webhook::WebhookNotifier;
