//! Rules for tapflow
//!
//! Raw rule documents (single ad-hoc rules or grouped subscriptions) are
//! resolved into immutable [`ResolvedRule`]s. Each resolved rule gets one
//! mutable [`RuleExecutionState`] whose [`TriggerStatus`] decides when the
//! rule may fire.

mod definition;
mod error;
mod resolver;
mod rule;
mod state;

pub use definition::{
    AdhocRuleDef, AppDef, DocumentId, GroupDef, RuleDef, RuleDefaults, RuleEntry, StringList,
    SubscriptionDocument,
};
pub use error::{ResolveError, ResolveResult, ResolveWarning};
pub use resolver::{resolve, resolve_adhoc, ResolveReport, RuleResolver};
pub use rule::{
    MatchedKeys, MatchedNodes, ResetMatch, ResolvedRule, RuleId, RuleMatch, DEFAULT_ACTION_CD,
};
pub use state::{get_status, PendingAction, RuleExecutionState, TriggerStatus};
