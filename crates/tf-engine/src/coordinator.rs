//! Trigger coordination for one rule-set
//!
//! All state of a rule-set sits behind one async mutex. The evaluation pass
//! and delay timers are the only writers and both take that lock, so rule
//! state is never touched by two writers at once. Events produced while
//! holding the lock are dispatched after it is released.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use tf_core::{Snapshot, StableId, Timestamp};
use tf_rules::{
    MatchedKeys, MatchedNodes, PendingAction, ResetMatch, ResolvedRule, RuleExecutionState,
    RuleId, TriggerStatus,
};

use crate::clock::MonotonicClock;
use crate::dispatch::Dispatcher;
use crate::error::{EngineError, EngineResult};
use crate::event::{RuleSetId, TriggerEvent};

/// What to reset in a rule-set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetScope {
    /// Every rule, every fired key and the last fired rule
    All,
    /// Rules carrying `key` in `group`; the key is forgotten
    Key { group: String, key: i64 },
    /// One rule
    Rule { name: String, group: String },
}

/// Point-in-time view of one rule's execution state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleStatusReport {
    pub rule: RuleId,
    pub status: TriggerStatus,
    pub action_count: u32,
    pub match_changed_at: Option<Timestamp>,
    pub action_triggered_at: Option<Timestamp>,
    pub last_matched: Option<StableId>,
    /// A delay timer is armed
    pub pending: bool,
}

/// Mutable state of a rule-set
#[derive(Debug, Default)]
struct CoordinatorState {
    /// Created on first evaluation, keyed by rule index
    rule_states: HashMap<usize, RuleExecutionState>,
    matched_keys: MatchedKeys,
    current_package: Option<String>,
    current_activity: Option<String>,
    /// Last foreground package or activity change
    scope_changed_at: Option<Timestamp>,
    last_trigger_rule: Option<RuleId>,
    next_generation: u64,
}

struct Inner {
    rule_set_id: RuleSetId,
    rules: Vec<ResolvedRule>,
    state: Mutex<CoordinatorState>,
    dispatcher: Arc<dyn Dispatcher>,
    clock: MonotonicClock,
    shutdown: CancellationToken,
}

/// Evaluates the rules of one active rule-set
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct TriggerCoordinator {
    inner: Arc<Inner>,
}

impl TriggerCoordinator {
    pub fn new(
        rule_set_id: RuleSetId,
        rules: Vec<ResolvedRule>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                rule_set_id,
                rules,
                state: Mutex::new(CoordinatorState::default()),
                dispatcher,
                clock: MonotonicClock::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn rule_set_id(&self) -> &RuleSetId {
        &self.inner.rule_set_id
    }

    pub fn rules(&self) -> &[ResolvedRule] {
        &self.inner.rules
    }

    pub fn clock(&self) -> &MonotonicClock {
        &self.inner.clock
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Stop the rule-set: every pending delay timer is cancelled and later
    /// snapshots are ignored
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!(rule_set = %self.inner.rule_set_id, "Shutting down rule-set");
            self.inner.shutdown.cancel();
        }
    }

    /// Run one evaluation pass over a snapshot
    ///
    /// Returns the events fired by this pass; they have also been handed to
    /// the dispatcher.
    pub async fn process(&self, snapshot: &Snapshot) -> Vec<TriggerEvent> {
        if self.is_shut_down() {
            debug!(rule_set = %self.inner.rule_set_id, "Ignoring snapshot for stopped rule-set");
            return Vec::new();
        }

        let events = {
            let mut state = self.inner.state.lock().await;
            let now = self.inner.clock.now();
            self.inner.observe_foreground(&mut state, snapshot, now);

            let mut events = Vec::new();
            for index in self.inner.evaluation_order(&state, now) {
                if let Some(event) = self.inner.evaluate_rule(&mut state, index, snapshot, now) {
                    events.push(event);
                }
            }
            events
        };

        self.inner.dispatch(&events);
        events
    }

    /// Handle a cycle with no resolvable foreground app
    ///
    /// Every rule counts as not matching.
    pub async fn process_absent(&self) {
        if self.is_shut_down() {
            return;
        }
        let mut state = self.inner.state.lock().await;
        trace!(rule_set = %self.inner.rule_set_id, "No foreground app");
        for (index, rule_state) in state.rule_states.iter_mut() {
            lose_match(&self.inner.rules[*index], rule_state);
        }
    }

    pub async fn reset(&self, scope: ResetScope) -> EngineResult<()> {
        let mut state = self.inner.state.lock().await;
        let state = &mut *state;
        let rule_set = &self.inner.rule_set_id;

        match scope {
            ResetScope::All => {
                for rule_state in state.rule_states.values_mut() {
                    rule_state.reset();
                }
                state.rule_states.clear();
                state.matched_keys.clear();
                state.last_trigger_rule = None;
                info!(rule_set = %rule_set, "Reset all rules");
            }
            ResetScope::Key { group, key } => {
                let indices: Vec<usize> = self
                    .inner
                    .rules
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| r.group_name == group && r.key == Some(key))
                    .map(|(i, _)| i)
                    .collect();
                if indices.is_empty() {
                    return Err(EngineError::KeyNotFound { group, key });
                }
                for index in indices {
                    if let Some(rule_state) = state.rule_states.get_mut(&index) {
                        rule_state.reset();
                    }
                }
                state.matched_keys.remove(&group, key);
                info!(rule_set = %rule_set, group = %group, key, "Reset rule key");
            }
            ResetScope::Rule { name, group } => {
                let index = self
                    .inner
                    .rule_index(&name, &group)
                    .ok_or_else(|| EngineError::RuleNotFound {
                        name: name.clone(),
                        group: group.clone(),
                    })?;
                if let Some(rule_state) = state.rule_states.get_mut(&index) {
                    rule_state.reset();
                }
                if let Some(key) = self.inner.rules[index].key {
                    state.matched_keys.remove(&group, key);
                }
                info!(rule_set = %rule_set, rule = %name, group = %group, "Reset rule");
            }
        }
        Ok(())
    }

    /// Current status of one rule
    pub async fn status(&self, name: &str, group: &str) -> EngineResult<RuleStatusReport> {
        let index = self
            .inner
            .rule_index(name, group)
            .ok_or_else(|| EngineError::RuleNotFound {
                name: name.to_string(),
                group: group.to_string(),
            })?;
        let rule = &self.inner.rules[index];
        let state = self.inner.state.lock().await;
        let now = self.inner.clock.now();

        let report = match state.rule_states.get(&index) {
            Some(rule_state) => report(rule, rule_state, now),
            None => report(rule, &RuleExecutionState::new(), now),
        };
        Ok(report)
    }

    /// Keys fired so far in this session
    pub async fn matched_keys(&self) -> MatchedKeys {
        self.inner.state.lock().await.matched_keys.clone()
    }

    pub async fn last_trigger_rule(&self) -> Option<RuleId> {
        self.inner.state.lock().await.last_trigger_rule.clone()
    }
}

impl std::fmt::Debug for TriggerCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerCoordinator")
            .field("rule_set_id", &self.inner.rule_set_id)
            .field("rules", &self.inner.rules.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn report(rule: &ResolvedRule, state: &RuleExecutionState, now: Timestamp) -> RuleStatusReport {
    RuleStatusReport {
        rule: rule.id(),
        status: state.status(rule, now),
        action_count: state.action_count,
        match_changed_at: state.match_changed_at,
        action_triggered_at: state.action_triggered_at,
        last_matched: state.last_matched,
        pending: state.has_pending(),
    }
}

/// The rule no longer matches: drop its pending action and de-dup memory
fn lose_match(rule: &ResolvedRule, state: &mut RuleExecutionState) {
    let held = state.clear_match();
    if held && rule.reset_match == Some(ResetMatch::Match) {
        trace!(rule = %rule.name, group = %rule.group_name, "Match lost, resetting");
        state.reset();
    }
}

/// When the gate behind `status` opens, for gates that open by themselves
fn gate_end(
    rule: &ResolvedRule,
    state: &RuleExecutionState,
    status: TriggerStatus,
) -> Option<Timestamp> {
    match status {
        TriggerStatus::ForcedWaiting => state
            .match_changed_at
            .map(|changed| changed.add_millis(rule.match_delay).add_millis(rule.forced_time)),
        TriggerStatus::InDelay => state
            .action_delay_triggered_at
            .map(|armed| armed.add_millis(rule.action_delay)),
        TriggerStatus::MatchDelay => state
            .match_changed_at
            .map(|changed| changed.add_millis(rule.match_delay)),
        _ => None,
    }
}

impl Inner {
    fn rule_index(&self, name: &str, group: &str) -> Option<usize> {
        self.rules
            .iter()
            .position(|r| r.name == name && r.group_name == group)
    }

    fn dispatch(&self, events: &[TriggerEvent]) {
        for event in events {
            self.dispatcher.dispatch(event.clone());
        }
    }

    /// Track the foreground app and reset rules on navigation
    fn observe_foreground(
        &self,
        state: &mut CoordinatorState,
        snapshot: &Snapshot,
        now: Timestamp,
    ) {
        let package = snapshot.foreground_package();
        let activity = snapshot.foreground_activity();
        let package_changed = state.current_package.as_deref() != Some(package);
        let activity_changed = state.current_activity.as_deref() != activity;
        if !package_changed && !activity_changed {
            return;
        }

        debug!(
            rule_set = %self.rule_set_id,
            package,
            activity = ?activity,
            package_changed,
            "Foreground changed"
        );
        state.scope_changed_at = Some(now);
        for (index, rule) in self.rules.iter().enumerate() {
            if !rule.should_reset(package_changed, activity_changed) {
                continue;
            }
            if let Some(rule_state) = state.rule_states.get_mut(&index) {
                rule_state.reset();
                debug!(rule = %rule.name, group = %rule.group_name, "Rule reset on navigation");
            }
        }
        state.current_package = Some(package.to_string());
        state.current_activity = activity.map(String::from);
    }

    /// Rules in an active priority window first, then definition order
    fn evaluation_order(&self, state: &CoordinatorState, now: Timestamp) -> Vec<usize> {
        let in_window = |index: usize| {
            let rule = &self.rules[index];
            let count = state
                .rule_states
                .get(&index)
                .map_or(0, |s| s.action_count);
            match (rule.priority_time, state.scope_changed_at) {
                (Some(time), Some(changed)) => {
                    rule.is_priority(count) && now.millis_since(changed) < time
                }
                _ => false,
            }
        };
        let mut order: Vec<usize> = (0..self.rules.len()).collect();
        order.sort_by_key(|&index| !in_window(index));
        order
    }

    fn evaluate_rule(
        self: &Arc<Self>,
        state: &mut CoordinatorState,
        index: usize,
        snapshot: &Snapshot,
        now: Timestamp,
    ) -> Option<TriggerEvent> {
        let rule = &self.rules[index];
        let eligible = rule
            .in_scope(snapshot.foreground_package(), snapshot.foreground_activity())
            && rule.pre_keys_satisfied(&state.matched_keys);
        let found = if eligible { rule.evaluate(snapshot) } else { None };

        let Some(found) = found else {
            if let Some(rule_state) = state.rule_states.get_mut(&index) {
                lose_match(rule, rule_state);
            }
            return None;
        };

        let rule_state = state.rule_states.entry(index).or_default();
        let new_window = rule_state.record_match(rule, found.stable_id(), now);
        let status = rule_state.status(rule, now);
        trace!(
            rule_set = %self.rule_set_id,
            rule = %rule.name,
            group = %rule.group_name,
            status = %status,
            new_window,
            "Rule matched"
        );

        match status {
            TriggerStatus::Ready => {
                return Some(self.fire(state, index, found.to_owned(), now, false));
            }
            TriggerStatus::WaitingDelay => {
                self.arm_delay(state, index, now, found.to_owned());
            }
            TriggerStatus::ForcedWaiting | TriggerStatus::InDelay | TriggerStatus::MatchDelay => {
                let gate = gate_end(rule, rule_state, status);
                match rule_state.pending_mut() {
                    Some(pending) => pending.set_matched(found.to_owned()),
                    None => {
                        if let Some(due) = gate {
                            let generation = state.next_generation();
                            self.schedule(state, index, generation, due, found.to_owned());
                        }
                    }
                }
            }
            _ => {}
        }
        None
    }

    /// Arm the action delay of `index` and start its timer
    fn arm_delay(
        self: &Arc<Self>,
        state: &mut CoordinatorState,
        index: usize,
        now: Timestamp,
        matched: MatchedNodes,
    ) {
        let rule = &self.rules[index];
        let due = now.add_millis(rule.action_delay);
        let generation = state.next_generation();
        let token = self.shutdown.child_token();
        let pending = PendingAction::new(token.clone(), generation, due, matched);
        if let Some(rule_state) = state.rule_states.get_mut(&index) {
            rule_state.start_action_delay(now, pending);
            debug!(
                rule = %rule.name,
                group = %rule.group_name,
                due = %due,
                "Action delay armed"
            );
            self.spawn_timer(index, generation, due, token);
        }
    }

    /// Hold a pending recheck for `index` and start its timer
    fn schedule(
        self: &Arc<Self>,
        state: &mut CoordinatorState,
        index: usize,
        generation: u64,
        due: Timestamp,
        matched: MatchedNodes,
    ) {
        let token = self.shutdown.child_token();
        let pending = PendingAction::new(token.clone(), generation, due, matched);
        if let Some(rule_state) = state.rule_states.get_mut(&index) {
            rule_state.set_pending(pending);
            trace!(rule = %self.rules[index].name, due = %due, "Recheck scheduled");
            self.spawn_timer(index, generation, due, token);
        }
    }

    /// Record a fire and build its event
    fn fire(
        &self,
        state: &mut CoordinatorState,
        index: usize,
        matched: MatchedNodes,
        now: Timestamp,
        via_delay: bool,
    ) -> TriggerEvent {
        let rule = &self.rules[index];
        let rule_state = state.rule_states.entry(index).or_default();
        rule_state.record_trigger(now);
        let count = rule_state.action_count;

        if let Some(key) = rule.key {
            state.matched_keys.insert(&rule.group_name, key);
        }
        state.last_trigger_rule = Some(rule.id());

        info!(
            rule_set = %self.rule_set_id,
            rule = %rule.name,
            group = %rule.group_name,
            count,
            via_delay,
            "Rule fired"
        );
        TriggerEvent::new(
            self.rule_set_id.clone(),
            rule,
            matched,
            state.current_package.clone(),
            state.current_activity.clone(),
            via_delay,
        )
    }

    fn spawn_timer(
        self: &Arc<Self>,
        index: usize,
        generation: u64,
        due: Timestamp,
        token: CancellationToken,
    ) {
        let weak: Weak<Inner> = Arc::downgrade(self);
        let deadline = self.clock.instant_at(due);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    trace!(generation, "Delay timer cancelled");
                    return;
                }
                _ = tokio::time::sleep_until(deadline) => {}
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if let Some(event) = inner.on_timer(index, generation).await {
                inner.dispatch(std::slice::from_ref(&event));
            }
        });
    }

    /// A delay timer woke: fire if the rule is ready, wait again if a
    /// self-expiring gate still holds
    async fn on_timer(self: &Arc<Self>, index: usize, generation: u64) -> Option<TriggerEvent> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if self.shutdown.is_cancelled() {
            return None;
        }

        let rule = &self.rules[index];
        let now = self.clock.now();
        let rule_state = state.rule_states.get_mut(&index)?;
        let Some(pending) = rule_state.take_pending(generation) else {
            trace!(rule = %rule.name, generation, "Stale delay timer");
            return None;
        };

        let status = rule_state.status(rule, now);
        match status {
            TriggerStatus::Ready => {
                let matched = pending.into_matched();
                Some(self.fire(state, index, matched, now, true))
            }
            TriggerStatus::WaitingDelay => {
                self.arm_delay(state, index, now, pending.into_matched());
                None
            }
            TriggerStatus::ForcedWaiting | TriggerStatus::InDelay | TriggerStatus::MatchDelay => {
                let due = gate_end(rule, rule_state, status)?;
                let matched = pending.into_matched();
                let generation = state.next_generation();
                self.schedule(state, index, generation, due, matched);
                None
            }
            other => {
                debug!(
                    rule = %rule.name,
                    group = %rule.group_name,
                    status = %other,
                    "Delayed action dropped"
                );
                None
            }
        }
    }
}

impl CoordinatorState {
    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::TriggerBus;
    use tf_core::{ElementTree, Node};
    use tf_selector::Selector;

    fn rule(name: &str, selector: &str) -> ResolvedRule {
        ResolvedRule::new(name, "g", vec![Selector::parse(selector).unwrap()])
    }

    fn screen(package: &str, activity: &str, texts: &[&str]) -> Snapshot {
        let mut tree = ElementTree::leaf(Node::with_class("android.widget.FrameLayout"));
        for (i, text) in texts.iter().enumerate() {
            tree = tree.child(
                Node::with_class("android.widget.Button")
                    .text(*text)
                    .stable_id(i as u64 + 1),
            );
        }
        Snapshot::new(package, Some(activity.to_string()), tree).unwrap()
    }

    fn coordinator(rules: Vec<ResolvedRule>) -> TriggerCoordinator {
        TriggerCoordinator::new("test".into(), rules, Arc::new(TriggerBus::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_and_records_key() {
        let mut r = rule("ok", "Button[text='确定']");
        r.key = Some(1);
        let c = coordinator(vec![r]);

        let events = c.process(&screen("app", "Main", &["确定"])).await;
        assert_eq!(events.len(), 1);
        assert!(!events[0].via_delay);
        assert_eq!(events[0].package.as_deref(), Some("app"));
        assert!(c.matched_keys().await.contains("g", 1));
        assert_eq!(c.last_trigger_rule().await, Some(RuleId::new("g", "ok")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_scopes() {
        let mut a = rule("a", "Button[text='A']");
        a.key = Some(1);
        let b = rule("b", "Button[text='B']");
        let c = coordinator(vec![a, b]);
        c.process(&screen("app", "Main", &["A", "B"])).await;

        c.reset(ResetScope::Key {
            group: "g".into(),
            key: 1,
        })
        .await
        .unwrap();
        assert!(c.matched_keys().await.is_empty());
        assert_eq!(c.status("a", "g").await.unwrap().action_count, 0);
        assert_eq!(c.status("b", "g").await.unwrap().action_count, 1);

        c.reset(ResetScope::Rule {
            name: "b".into(),
            group: "g".into(),
        })
        .await
        .unwrap();
        assert_eq!(c.status("b", "g").await.unwrap().status, TriggerStatus::Ready);

        assert!(matches!(
            c.reset(ResetScope::Key { group: "g".into(), key: 9 }).await,
            Err(EngineError::KeyNotFound { .. })
        ));
        assert!(matches!(
            c.status("missing", "g").await,
            Err(EngineError::RuleNotFound { .. })
        ));

        c.process(&screen("app", "Main", &["A", "B"])).await;
        c.reset(ResetScope::All).await.unwrap();
        assert!(c.matched_keys().await.is_empty());
        assert_eq!(c.last_trigger_rule().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_match_on_lost_match() {
        let mut r = rule("r", "Button[text='A']");
        r.action_cd = 60_000;
        r.reset_match = Some(ResetMatch::Match);
        let c = coordinator(vec![r]);

        assert_eq!(c.process(&screen("app", "Main", &["A"])).await.len(), 1);
        assert!(c.process(&screen("app", "Main", &["A"])).await.is_empty());
        c.process(&screen("app", "Main", &["B"])).await;
        // cooldown forgotten with the rest of the state
        assert_eq!(c.process(&screen("app", "Main", &["A"])).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_ignores_snapshots() {
        let c = coordinator(vec![rule("r", "Button")]);
        c.shutdown();
        assert!(c.is_shut_down());
        assert!(c.process(&screen("app", "Main", &["A"])).await.is_empty());
    }
}
