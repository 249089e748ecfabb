//! Rule resolution errors and warnings

use tf_selector::SelectorError;
use thiserror::Error;

/// A rule that could not be resolved
///
/// Resolution errors are scoped to one rule: the rule is dropped and the
/// rest of its batch is unaffected.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Rule '{rule}' in group '{group}': invalid selector in {field} '{text}': {error}")]
    Selector {
        rule: String,
        group: String,
        field: &'static str,
        text: String,
        #[source]
        error: SelectorError,
    },

    #[error("Rule '{rule}' in group '{group}' has neither matches nor anyMatches")]
    NoMatches { rule: String, group: String },

    #[error("Invalid subscription document: {0}")]
    Document(#[from] json5::Error),
}

impl ResolveError {
    /// `(rule, group)` the error belongs to, if any
    pub fn rule(&self) -> Option<(&str, &str)> {
        match self {
            ResolveError::Selector { rule, group, .. } | ResolveError::NoMatches { rule, group } => {
                Some((rule.as_str(), group.as_str()))
            }
            ResolveError::Document(_) => None,
        }
    }
}

/// Result type for rule resolution
pub type ResolveResult<T> = Result<T, ResolveError>;

/// A non-fatal problem found while resolving rules
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveWarning {
    #[error("Rule '{rule}' in group '{group}' waits for key {key}, which no rule in the group defines; it can never fire")]
    UnknownPreKey { rule: String, group: String, key: i64 },

    #[error("Rule '{rule}' in group '{group}' both allows and excludes activity '{activity}'")]
    ContradictoryScope {
        rule: String,
        group: String,
        activity: String,
    },

    #[error("Duplicate rule '{rule}' in group '{group}'; later definition dropped")]
    DuplicateRule { rule: String, group: String },

    #[error("Rule '{rule}' in group '{group}' has unknown resetMatch '{value}'; ignored")]
    UnknownResetMatch {
        rule: String,
        group: String,
        value: String,
    },
}
