//! Error taxonomy for the engine.
//!
//! Risk rejections and "not enough history" are normal outcomes and never
//! show up here; they are returned as values by the components that produce them.

use thiserror::Error;

/// Errors surfaced by the engine library.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A market observation failed validation (non-positive price, negative volume, ...).
    #[error("invalid observation for {symbol}: {reason}")]
    InvalidObservation { symbol: String, reason: String },

    /// A strategy configuration failed validation at construction time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A scenario name that the generator does not know.
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    /// A strategy panicked while being driven through a scenario.
    #[error("strategy {strategy} panicked in scenario {scenario}: {message}")]
    StrategyPanic {
        strategy: String,
        scenario: String,
        message: String,
    },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn invalid_observation(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidObservation {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
