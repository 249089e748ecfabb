//! Trigger engine for tapflow
//!
//! A [`TriggerCoordinator`] owns the resolved rules of one active rule-set
//! and evaluates them against every incoming snapshot. Fires are handed to
//! a [`Dispatcher`]; the [`RuleSetManager`] keeps the coordinators of all
//! active rule-sets.

mod clock;
mod coordinator;
mod dispatch;
mod error;
mod event;
mod manager;

pub use clock::MonotonicClock;
pub use coordinator::{ResetScope, RuleStatusReport, TriggerCoordinator};
pub use dispatch::{Dispatcher, FnDispatcher, RuleSetReceiver, SharedTriggerBus, TriggerBus};
pub use error::{EngineError, EngineResult};
pub use event::{RuleSetId, TriggerEvent};
pub use manager::RuleSetManager;
