//! Trading circuit breaker
//!
//! Tracks realized trade outcomes and halts trading for a cooldown once
//! losses pile up. Trips when either limit is reached:
//! - `max_consecutive_losses` losing trades in a row
//! - losses inside the rolling window summing to at least
//!   `max_rolling_loss_fraction` of the balance passed to `record_trade`
//!
//! A zero limit disables that rule. While open, `is_open()` keeps returning
//! true until the cooldown has elapsed; the first check after that closes the
//! breaker and clears the loss history.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{AegisError, Result};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakerState {
    /// Normal operation
    Closed,
    /// Tripped, trading halted until cooldown expiry
    Open,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Losing trades in a row that trip the breaker (0 = disabled)
    pub max_consecutive_losses: u32,
    /// Rolling loss as a fraction of balance that trips the breaker (0 = disabled)
    pub max_rolling_loss_fraction: Decimal,
    /// Window for the rolling loss sum
    pub rolling_window_secs: u64,
    /// How long the breaker stays open once tripped
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_losses: 3,
            max_rolling_loss_fraction: dec!(0.05),
            rolling_window_secs: 86_400,
            cooldown_secs: 3_600,
        }
    }
}

/// Trip reasons for the circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TripReason {
    ConsecutiveLosses(u32),
    RollingLoss { loss: Decimal, limit: Decimal },
    Manual(String),
}

impl std::fmt::Display for TripReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TripReason::ConsecutiveLosses(n) => write!(f, "{} consecutive losses", n),
            TripReason::RollingLoss { loss, limit } => {
                write!(f, "rolling loss {} reached limit {}", loss, limit)
            }
            TripReason::Manual(reason) => write!(f, "manual: {}", reason),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_losses: u32,
    /// (time, loss magnitude)
    losses: VecDeque<(DateTime<Utc>, Decimal)>,
    opened_at: Option<DateTime<Utc>>,
    last_trip_reason: Option<TripReason>,
    total_trips: u64,
    trades_recorded: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_losses: 0,
            losses: VecDeque::new(),
            opened_at: None,
            last_trip_reason: None,
            total_trips: 0,
            trades_recorded: 0,
        }
    }

    fn cooldown_elapsed(&self, cooldown: Duration, now: DateTime<Utc>) -> bool {
        self.opened_at
            .map(|opened| now.signed_duration_since(opened) >= cooldown)
            .unwrap_or(true)
    }

    fn rolling_loss(&self) -> Decimal {
        self.losses.iter().map(|(_, loss)| *loss).sum()
    }

    fn reset(&mut self) {
        self.state = BreakerState::Closed;
        self.consecutive_losses = 0;
        self.losses.clear();
        self.opened_at = None;
    }

    fn open(&mut self, reason: TripReason, now: DateTime<Utc>) {
        self.state = BreakerState::Open;
        self.opened_at = Some(now);
        self.last_trip_reason = Some(reason);
        self.total_trips += 1;
    }
}

/// Point-in-time view for health checks
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStatus {
    pub state: BreakerState,
    pub consecutive_losses: u32,
    pub rolling_loss: Decimal,
    pub opened_at: Option<DateTime<Utc>>,
    pub reopens_at: Option<DateTime<Utc>>,
    pub last_trip_reason: Option<TripReason>,
    pub total_trips: u64,
    pub trades_recorded: u64,
}

/// Circuit breaker shared by every engine trading the same account.
///
/// All mutable state sits behind one lock so trip and reset transitions are
/// atomic with respect to concurrent `is_open` polling.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(BreakerInner::new()),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn cooldown(&self) -> Duration {
        Duration::seconds(i64::try_from(self.config.cooldown_secs).unwrap_or(i64::MAX / 1_000))
    }

    fn window(&self) -> Duration {
        Duration::seconds(i64::try_from(self.config.rolling_window_secs).unwrap_or(i64::MAX / 1_000))
    }

    /// True while trading is halted. Closes the breaker once the cooldown has elapsed.
    pub async fn is_open(&self) -> bool {
        {
            let inner = self.inner.read().await;
            if inner.state == BreakerState::Closed {
                return false;
            }
            if !inner.cooldown_elapsed(self.cooldown(), Utc::now()) {
                return true;
            }
        }

        let mut inner = self.inner.write().await;
        // Another caller may have reset it between the two locks
        if inner.state == BreakerState::Open && inner.cooldown_elapsed(self.cooldown(), Utc::now()) {
            inner.reset();
            info!("Circuit breaker cooldown elapsed, CLOSED");
        }
        inner.state == BreakerState::Open
    }

    pub async fn state(&self) -> BreakerState {
        self.inner.read().await.state
    }

    /// Record a realized trade.
    ///
    /// Returns `Err(CircuitBreakerTriggered)` exactly when this trade newly
    /// trips the breaker.
    pub async fn record_trade(&self, pnl: Decimal, balance: Decimal) -> Result<()> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        inner.trades_recorded += 1;

        let window_start = now - self.window();
        while inner
            .losses
            .front()
            .map(|(at, _)| *at < window_start)
            .unwrap_or(false)
        {
            inner.losses.pop_front();
        }

        if pnl < Decimal::ZERO {
            inner.consecutive_losses += 1;
            inner.losses.push_back((now, pnl.abs()));
        } else {
            inner.consecutive_losses = 0;
        }

        debug!(
            %pnl,
            consecutive_losses = inner.consecutive_losses,
            rolling_loss = %inner.rolling_loss(),
            "trade recorded"
        );

        if inner.state == BreakerState::Open {
            return Ok(());
        }

        let reason = self.trip_reason(&inner, balance);
        match reason {
            Some(reason) => {
                warn!("Circuit breaker TRIPPED: {}", reason);
                let message = reason.to_string();
                inner.open(reason, now);
                Err(AegisError::CircuitBreakerTriggered(message))
            }
            None => Ok(()),
        }
    }

    fn trip_reason(&self, inner: &BreakerInner, balance: Decimal) -> Option<TripReason> {
        if self.config.max_consecutive_losses > 0
            && inner.consecutive_losses >= self.config.max_consecutive_losses
        {
            return Some(TripReason::ConsecutiveLosses(inner.consecutive_losses));
        }

        if self.config.max_rolling_loss_fraction > Decimal::ZERO && balance > Decimal::ZERO {
            let limit = balance * self.config.max_rolling_loss_fraction;
            let loss = inner.rolling_loss();
            if loss >= limit {
                return Some(TripReason::RollingLoss { loss, limit });
            }
        }

        None
    }

    /// Manually halt trading for one cooldown period
    pub async fn trip(&self, reason: &str) {
        let mut inner = self.inner.write().await;
        if inner.state != BreakerState::Open {
            inner.open(TripReason::Manual(reason.to_string()), Utc::now());
            warn!("Circuit breaker manually tripped: {}", reason);
        }
    }

    pub async fn status(&self) -> CircuitBreakerStatus {
        let inner = self.inner.read().await;
        CircuitBreakerStatus {
            state: inner.state,
            consecutive_losses: inner.consecutive_losses,
            rolling_loss: inner.rolling_loss(),
            opened_at: inner.opened_at,
            reopens_at: inner.opened_at.map(|at| at + self.cooldown()),
            last_trip_reason: inner.last_trip_reason.clone(),
            total_trips: inner.total_trips,
            trades_recorded: inner.trades_recorded,
        }
    }
}
