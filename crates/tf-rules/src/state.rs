//! Per-rule execution state and the trigger status machine

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use tf_core::{StableId, Timestamp};

use crate::rule::{MatchedNodes, ResolvedRule};

/// Whether a rule may fire right now, and if not, what holds it back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    Ready,
    Cooling,
    WaitingDelay,
    InDelay,
    MatchDelay,
    Expired,
    MaxReached,
    ForcedWaiting,
}

impl TriggerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerStatus::Ready => "ready",
            TriggerStatus::Cooling => "cooling",
            TriggerStatus::WaitingDelay => "waiting_delay",
            TriggerStatus::InDelay => "in_delay",
            TriggerStatus::MatchDelay => "match_delay",
            TriggerStatus::Expired => "expired",
            TriggerStatus::MaxReached => "max_reached",
            TriggerStatus::ForcedWaiting => "forced_waiting",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, TriggerStatus::Ready)
    }
}

impl fmt::Display for TriggerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute a rule's status
///
/// Gates are checked in a fixed order and the first one that holds wins.
/// This is a pure function of its arguments.
pub fn get_status(
    rule: &ResolvedRule,
    state: &RuleExecutionState,
    now: Timestamp,
) -> TriggerStatus {
    if rule.forced_time > 0 {
        if let Some(changed) = state.match_changed_at {
            let until = changed
                .add_millis(rule.match_delay)
                .add_millis(rule.forced_time);
            if now < until {
                return TriggerStatus::ForcedWaiting;
            }
        }
    }

    if let Some(maximum) = rule.action_maximum {
        if state.action_count >= maximum {
            return TriggerStatus::MaxReached;
        }
    }

    if let Some(triggered) = state.action_triggered_at {
        if now.millis_since(triggered) < rule.action_cd {
            return TriggerStatus::Cooling;
        }
    }

    if rule.action_delay > 0 {
        match state.action_delay_triggered_at {
            None => return TriggerStatus::WaitingDelay,
            Some(armed) if now.millis_since(armed) < rule.action_delay => {
                return TriggerStatus::InDelay;
            }
            Some(_) => {}
        }
    }

    if rule.match_delay > 0 {
        if let Some(changed) = state.match_changed_at {
            if now.millis_since(changed) < rule.match_delay {
                return TriggerStatus::MatchDelay;
            }
        }
    }

    if rule.match_time.is_some() && window_expired(rule, state.match_changed_at, now) {
        return TriggerStatus::Expired;
    }

    TriggerStatus::Ready
}

/// Whether a match window opened at `changed` has run past `match_time`
///
/// Without `match_time` a window never expires; with it, a window that was
/// never opened counts as expired.
fn window_expired(rule: &ResolvedRule, changed: Option<Timestamp>, now: Timestamp) -> bool {
    let Some(match_time) = rule.match_time else {
        return false;
    };
    match changed {
        None => true,
        Some(changed) => now.millis_since(changed) > match_time.saturating_add(rule.match_delay),
    }
}

/// A delayed action waiting on its timer
///
/// Dropping or replacing the owning state cancels the token, so a timer can
/// never fire for state it no longer belongs to.
#[derive(Debug)]
pub struct PendingAction {
    token: CancellationToken,
    generation: u64,
    due_at: Timestamp,
    matched: MatchedNodes,
}

impl PendingAction {
    pub fn new(
        token: CancellationToken,
        generation: u64,
        due_at: Timestamp,
        matched: MatchedNodes,
    ) -> Self {
        Self {
            token,
            generation,
            due_at,
            matched,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Distinguishes this action from earlier ones of the same rule
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn due_at(&self) -> Timestamp {
        self.due_at
    }

    pub fn matched(&self) -> &MatchedNodes {
        &self.matched
    }

    /// Update the nodes the action will report when it fires
    pub fn set_matched(&mut self, matched: MatchedNodes) {
        self.matched = matched;
    }

    pub fn into_matched(mut self) -> MatchedNodes {
        std::mem::take(&mut self.matched)
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for PendingAction {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Mutable timing bookkeeping for one rule
///
/// Dropping the state cancels its pending action.
#[derive(Debug, Default)]
pub struct RuleExecutionState {
    /// Start of the current match window
    pub match_changed_at: Option<Timestamp>,
    pub action_triggered_at: Option<Timestamp>,
    pub action_count: u32,
    /// When the action delay was armed; `None` while not armed
    pub action_delay_triggered_at: Option<Timestamp>,
    /// Element matched on the previous evaluation, for de-duplication
    pub last_matched: Option<StableId>,
    pending: Option<PendingAction>,
}

impl RuleExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, rule: &ResolvedRule, now: Timestamp) -> TriggerStatus {
        get_status(rule, self, now)
    }

    pub fn should_trigger(&self, rule: &ResolvedRule, now: Timestamp) -> bool {
        self.status(rule, now).is_ready()
    }

    /// Note a positive match of `element`
    ///
    /// Returns `true` when this starts a new match window, `false` when the
    /// same element is still matched from the previous evaluation. The same
    /// element opens a new window once the previous one has expired, or when
    /// none was ever opened.
    pub fn record_match(
        &mut self,
        rule: &ResolvedRule,
        element: StableId,
        now: Timestamp,
    ) -> bool {
        let continuing = self.last_matched == Some(element)
            && self.match_changed_at.is_some()
            && !window_expired(rule, self.match_changed_at, now);
        if continuing {
            return false;
        }
        self.cancel_pending();
        self.last_matched = Some(element);
        self.match_changed_at = Some(now);
        self.action_delay_triggered_at = None;
        true
    }

    /// Note that the rule fired
    pub fn record_trigger(&mut self, now: Timestamp) {
        self.pending = None;
        self.action_triggered_at = Some(now);
        self.action_count = self.action_count.saturating_add(1);
        self.action_delay_triggered_at = None;
    }

    /// Arm the action delay and hold its pending action
    pub fn start_action_delay(&mut self, now: Timestamp, pending: PendingAction) {
        self.action_delay_triggered_at = Some(now);
        self.set_pending(pending);
    }

    /// Hold a pending action, cancelling any previous one
    pub fn set_pending(&mut self, pending: PendingAction) {
        self.cancel_pending();
        self.pending = Some(pending);
    }

    pub fn pending(&self) -> Option<&PendingAction> {
        self.pending.as_ref()
    }

    pub fn pending_mut(&mut self) -> Option<&mut PendingAction> {
        self.pending.as_mut()
    }

    /// Take the pending action if it is the given generation and still live
    pub fn take_pending(&mut self, generation: u64) -> Option<PendingAction> {
        let live = self
            .pending
            .as_ref()
            .map_or(false, |p| p.generation == generation && !p.token.is_cancelled());
        if live {
            self.pending.take()
        } else {
            None
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            trace!(generation = pending.generation, "Cancelling pending action");
            pending.cancel();
        }
    }

    /// Forget the current match: cancels any pending action and clears the
    /// armed delay. Returns whether a match was held.
    pub fn clear_match(&mut self) -> bool {
        self.cancel_pending();
        self.action_delay_triggered_at = None;
        self.last_matched.take().is_some()
    }

    /// Return to the freshly created state
    pub fn reset(&mut self) {
        self.cancel_pending();
        self.match_changed_at = None;
        self.action_triggered_at = None;
        self.action_count = 0;
        self.action_delay_triggered_at = None;
        self.last_matched = None;
    }

    pub fn is_pristine(&self) -> bool {
        self.match_changed_at.is_none()
            && self.action_triggered_at.is_none()
            && self.action_count == 0
            && self.action_delay_triggered_at.is_none()
            && self.last_matched.is_none()
            && self.pending.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tf_core::Node;
    use tf_selector::Selector;

    fn ts(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn rule() -> ResolvedRule {
        ResolvedRule::new("r", "g", vec![Selector::parse("Button").unwrap()])
    }

    fn matched() -> MatchedNodes {
        MatchedNodes {
            node: Node::with_class("Button"),
            all_nodes: Vec::new(),
        }
    }

    fn pending(generation: u64) -> PendingAction {
        PendingAction::new(CancellationToken::new(), generation, ts(0), matched())
    }

    #[test]
    fn test_fresh_state_is_ready() {
        assert_eq!(get_status(&rule(), &RuleExecutionState::new(), ts(0)), TriggerStatus::Ready);
    }

    #[test]
    fn test_status_is_pure() {
        let mut r = rule();
        r.action_delay = 300;
        r.match_time = Some(1000);
        let mut state = RuleExecutionState::new();
        state.record_match(&r, StableId(1), ts(100));
        state.action_delay_triggered_at = Some(ts(150));

        for now in [0, 100, 200, 449, 450, 1099, 1101, 5000] {
            let first = get_status(&r, &state, ts(now));
            let second = get_status(&r, &state, ts(now));
            assert_eq!(first, second);
        }
        assert_eq!(state.match_changed_at, Some(ts(100)));
        assert_eq!(state.action_delay_triggered_at, Some(ts(150)));
    }

    #[test]
    fn test_cooling_for_whole_cooldown() {
        let r = rule();
        let mut state = RuleExecutionState::new();
        state.record_match(&r, StableId(1), ts(0));
        state.record_trigger(ts(500));

        for now in (500..1500).step_by(50) {
            assert_eq!(state.status(&r, ts(now)), TriggerStatus::Cooling);
            assert!(!state.should_trigger(&r, ts(now)));
        }
        assert!(state.should_trigger(&r, ts(1500)));
    }

    #[test]
    fn test_max_reached_beats_everything_but_forced_wait() {
        let mut r = rule();
        r.action_maximum = Some(2);
        r.action_delay = 100;
        let mut state = RuleExecutionState::new();
        state.record_trigger(ts(0));
        state.record_trigger(ts(10));

        for now in [10, 100, 1_000_000] {
            assert_eq!(state.status(&r, ts(now)), TriggerStatus::MaxReached);
        }

        state.reset();
        assert_eq!(state.status(&r, ts(0)), TriggerStatus::WaitingDelay);
    }

    #[test]
    fn test_action_delay_gates() {
        let mut r = rule();
        r.action_delay = 500;
        let mut state = RuleExecutionState::new();
        state.record_match(&r, StableId(1), ts(0));
        assert_eq!(state.status(&r, ts(0)), TriggerStatus::WaitingDelay);

        state.start_action_delay(ts(0), pending(1));
        assert_eq!(state.status(&r, ts(499)), TriggerStatus::InDelay);
        assert_eq!(state.status(&r, ts(500)), TriggerStatus::Ready);
    }

    #[test]
    fn test_match_delay_and_forced_wait() {
        let mut r = rule();
        r.match_delay = 200;
        let mut state = RuleExecutionState::new();
        assert_eq!(state.status(&r, ts(0)), TriggerStatus::Ready);

        state.record_match(&r, StableId(1), ts(1000));
        assert_eq!(state.status(&r, ts(1199)), TriggerStatus::MatchDelay);
        assert_eq!(state.status(&r, ts(1200)), TriggerStatus::Ready);

        r.forced_time = 300;
        assert_eq!(state.status(&r, ts(1200)), TriggerStatus::ForcedWaiting);
        assert_eq!(state.status(&r, ts(1499)), TriggerStatus::ForcedWaiting);
        assert_eq!(state.status(&r, ts(1500)), TriggerStatus::Ready);
    }

    #[test]
    fn test_match_time_expiry() {
        let mut r = rule();
        r.match_time = Some(1000);
        r.match_delay = 100;
        let mut state = RuleExecutionState::new();
        assert_eq!(state.status(&r, ts(0)), TriggerStatus::Expired);

        state.record_match(&r, StableId(1), ts(0));
        assert_eq!(state.status(&r, ts(50)), TriggerStatus::MatchDelay);
        assert_eq!(state.status(&r, ts(1100)), TriggerStatus::Ready);
        assert_eq!(state.status(&r, ts(1101)), TriggerStatus::Expired);
    }

    #[test]
    fn test_record_match_dedups_same_element() {
        let r = rule();
        let mut state = RuleExecutionState::new();
        assert!(state.record_match(&r, StableId(7), ts(0)));
        assert!(!state.record_match(&r, StableId(7), ts(300)));
        assert_eq!(state.match_changed_at, Some(ts(0)));

        assert!(state.record_match(&r, StableId(8), ts(400)));
        assert_eq!(state.match_changed_at, Some(ts(400)));

        assert!(state.clear_match());
        assert!(state.record_match(&r, StableId(8), ts(900)));
        assert_eq!(state.match_changed_at, Some(ts(900)));
    }

    #[test]
    fn test_same_element_reopens_expired_window() {
        let mut r = rule();
        r.match_time = Some(100);
        let mut state = RuleExecutionState::new();
        assert!(state.record_match(&r, StableId(7), ts(0)));
        state.record_trigger(ts(0));

        // still inside the window
        assert!(!state.record_match(&r, StableId(7), ts(100)));
        assert_eq!(state.status(&r, ts(1500)), TriggerStatus::Expired);

        assert!(state.record_match(&r, StableId(7), ts(1500)));
        assert_eq!(state.match_changed_at, Some(ts(1500)));
        assert_eq!(state.action_delay_triggered_at, None);
        assert_eq!(state.status(&r, ts(1500)), TriggerStatus::Ready);
        assert_eq!(state.action_count, 1);
    }

    #[test]
    fn test_reset_cancels_pending_first() {
        let mut state = RuleExecutionState::new();
        state.record_match(&rule(), StableId(1), ts(0));
        state.start_action_delay(ts(0), pending(3));
        let token = state.pending().unwrap().token().clone();

        state.reset();
        assert!(token.is_cancelled());
        assert!(state.is_pristine());
    }

    #[test]
    fn test_take_pending_checks_generation() {
        let mut state = RuleExecutionState::new();
        state.set_pending(pending(1));
        let first = state.pending().unwrap().token().clone();
        state.set_pending(pending(2));
        assert!(first.is_cancelled());

        assert!(state.take_pending(1).is_none());
        let taken = state.take_pending(2).unwrap();
        assert_eq!(taken.generation(), 2);
        assert!(!state.has_pending());
    }

    #[test]
    fn test_drop_cancels_pending() {
        let token = {
            let mut state = RuleExecutionState::new();
            state.set_pending(pending(1));
            state.pending().unwrap().token().clone()
        };
        assert!(token.is_cancelled());
    }
}
