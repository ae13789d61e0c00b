use thiserror::Error;

/// Precondition failures raised by the simulation core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("backtest requires at least one bar")]
    EmptyBars,

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("invalid pair {0:?}, expected SYMBOL/interval")]
    InvalidPair(String),

    #[error("unsupported interval: {0}")]
    UnsupportedInterval(String),
}

impl EngineError {
    pub fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
