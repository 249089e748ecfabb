//! Selector language for tapflow
//!
//! A selector describes a UI element by its class, its attributes and its
//! position relative to other elements:
//!
//! ```text
//! @TextView[text^='Skip'][clickable=true] < FrameLayout[vid='ad_root']
//! ```
//!
//! Selectors compile once into an immutable [`Selector`] and are then
//! matched against any number of snapshots.

mod ast;
mod error;
mod matcher;
mod parser;

pub use ast::{Expr, NameMatch, Op, Relation, Selector, Term, Value};
pub use error::{SelectorError, SelectorErrorKind, SelectorResult};
pub use matcher::QueryOptions;
