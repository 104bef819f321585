use thiserror::Error;

/// Main error type for the trading bot
#[derive(Error, Debug)]
pub enum AegisError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Exchange errors
    #[error("Exchange error: {0}")]
    Exchange(String),

    #[error("Unsupported exchange operation: {0}")]
    Unsupported(String),

    // Market data errors
    #[error("Market data unavailable: {0}")]
    MarketDataUnavailable(String),

    // Order execution errors
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    // AI provider errors
    #[error("AI provider {provider} failed: {reason}")]
    Provider { provider: String, reason: String },

    #[error("Unparseable model output: {0}")]
    ModelOutput(String),

    #[error("Template error: {0}")]
    Template(String),

    // Risk management errors
    #[error("Circuit breaker triggered: {0}")]
    CircuitBreakerTriggered(String),

    #[error("Drawdown limit breached: {0}")]
    DrawdownBreached(String),

    #[error("Risk limit exceeded: {0}")]
    RiskLimitExceeded(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Error raised inside a trading-cycle stage, tagged with the stage name
    #[error("{stage}: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<AegisError>,
    },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl AegisError {
    /// Attach trading-cycle stage context to an error
    pub fn at_stage(self, stage: &'static str) -> Self {
        match self {
            already @ AegisError::Stage { .. } => already,
            other => AegisError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Stage name if the error carries one
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            AegisError::Stage { stage, .. } => Some(stage),
            _ => None,
        }
    }

    /// Unwrap stage context to the underlying error
    pub fn root(&self) -> &AegisError {
        match self {
            AegisError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn provider(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        AegisError::Provider {
            provider: provider.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for AegisError
pub type Result<T> = std::result::Result<T, AegisError>;
