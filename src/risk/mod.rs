//! Risk gate
//!
//! Hard safety checks applied independently of what the models say:
//! - `DecisionValidator`: sanity rules on decisions and market conditions
//! - `PositionSizer`: sizing and leverage caps
//! - `CircuitBreaker`: trips after losses and halts trading for a cooldown

pub mod circuit_breaker;
pub mod sizer;
pub mod validator;

pub use circuit_breaker::{
    BreakerState, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStatus, TripReason,
};
pub use sizer::{PositionSizer, SizingConfig, SizingPlan};
pub use validator::{DecisionValidator, RiskConfig, RiskRejection, RiskVerdict};
