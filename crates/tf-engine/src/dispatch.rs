//! Dispatch boundary
//!
//! A [`Dispatcher`] receives every trigger event after the evaluation pass
//! that produced it has released the rule-set lock. Dispatch is
//! fire-and-forget: rule state is already updated and is never rolled back,
//! whatever the dispatcher does.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, trace, warn};

use crate::event::{RuleSetId, TriggerEvent};

/// Default channel capacity for trigger subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Receiver of trigger events
///
/// Implementations must not block; hand slow work to a task.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, event: TriggerEvent);
}

impl<D: Dispatcher + ?Sized> Dispatcher for Arc<D> {
    fn dispatch(&self, event: TriggerEvent) {
        (**self).dispatch(event)
    }
}

/// Dispatcher calling a closure
///
/// A panicking closure is logged and swallowed.
pub struct FnDispatcher<F> {
    f: F,
}

impl<F> FnDispatcher<F>
where
    F: Fn(TriggerEvent) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Dispatcher for FnDispatcher<F>
where
    F: Fn(TriggerEvent) + Send + Sync,
{
    fn dispatch(&self, event: TriggerEvent) {
        let rule_set = event.rule_set_id.clone();
        let rule = event.rule_name.clone();
        if catch_unwind(AssertUnwindSafe(|| (self.f)(event))).is_err() {
            error!(rule_set = %rule_set, rule = %rule, "Trigger dispatch panicked");
        }
    }
}

/// Broadcast channel of trigger events
///
/// Sending never blocks; with no subscribers the event is dropped, and a
/// subscriber that falls behind by more than the capacity loses the oldest
/// events.
pub struct TriggerBus {
    sender: broadcast::Sender<TriggerEvent>,
    capacity: usize,
}

impl TriggerBus {
    /// Create a new trigger bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new trigger bus with specified channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, capacity }
    }

    /// Subscribe to events from every rule-set
    pub fn subscribe(&self) -> broadcast::Receiver<TriggerEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to the events of one rule-set
    pub fn subscribe_rule_set(&self, rule_set_id: impl Into<RuleSetId>) -> RuleSetReceiver {
        let rule_set_id = rule_set_id.into();
        trace!(rule_set = %rule_set_id, "Subscribing to rule-set triggers");
        RuleSetReceiver {
            rx: self.sender.subscribe(),
            rule_set_id,
        }
    }

    /// Number of live subscriptions
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for TriggerBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for TriggerBus {
    fn dispatch(&self, event: TriggerEvent) {
        trace!(rule_set = %event.rule_set_id, rule = %event.rule_name, "Publishing trigger");
        // No receivers is not an error
        let _ = self.sender.send(event);
    }
}

/// Thread-safe wrapper for TriggerBus
pub type SharedTriggerBus = Arc<TriggerBus>;

/// A receiver for the triggers of one rule-set
pub struct RuleSetReceiver {
    rx: broadcast::Receiver<TriggerEvent>,
    rule_set_id: RuleSetId,
}

impl RuleSetReceiver {
    /// Receive the next event of this rule-set
    ///
    /// Returns `None` once the bus is gone. Lagging is logged and skipped.
    pub async fn recv(&mut self) -> Option<TriggerEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.rule_set_id == self.rule_set_id => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(rule_set = %self.rule_set_id, "Trigger receiver lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn rule_set_id(&self) -> &RuleSetId {
        &self.rule_set_id
    }
}
