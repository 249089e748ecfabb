//! Selector compile errors

use thiserror::Error;

/// What went wrong while compiling a selector
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorErrorKind {
    #[error("Empty selector")]
    Empty,

    #[error("Unexpected end of selector")]
    UnexpectedEnd,

    #[error("Unexpected character {0:?}")]
    UnexpectedChar(char),

    #[error("Expected {0}")]
    Expected(&'static str),

    #[error("Term has neither a name nor a predicate")]
    EmptyTerm,

    #[error("More than one target term marked with '@'")]
    DuplicateTarget,

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Unterminated string")]
    UnterminatedString,

    #[error("Invalid escape sequence")]
    InvalidEscape,

    #[error("Invalid regex: {0}")]
    InvalidRegex(String),

    #[error("Operator {op} cannot compare against {value}")]
    IncompatibleValue { op: &'static str, value: String },
}

/// A selector compile error and the byte offset where it was detected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at index {index}")]
pub struct SelectorError {
    pub kind: SelectorErrorKind,
    pub index: usize,
}

impl SelectorError {
    pub(crate) fn new(kind: SelectorErrorKind, index: usize) -> Self {
        Self { kind, index }
    }
}

/// Result type for selector operations
pub type SelectorResult<T> = Result<T, SelectorError>;
