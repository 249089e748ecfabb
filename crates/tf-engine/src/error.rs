//! Engine errors

use thiserror::Error;

/// Errors from rule-set lifecycle and introspection calls
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Rule-set not found: {0}")]
    RuleSetNotFound(String),

    #[error("Rule '{name}' not found in group '{group}'")]
    RuleNotFound { name: String, group: String },

    #[error("No rule with key {key} in group '{group}'")]
    KeyNotFound { group: String, key: i64 },
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
