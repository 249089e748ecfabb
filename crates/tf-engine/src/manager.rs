//! Rule-set lifecycle
//!
//! The RuleSetManager keeps one [`TriggerCoordinator`] per active rule-set.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

use tf_core::Snapshot;
use tf_rules::ResolvedRule;

use crate::coordinator::{ResetScope, RuleStatusReport, TriggerCoordinator};
use crate::dispatch::Dispatcher;
use crate::error::{EngineError, EngineResult};
use crate::event::{RuleSetId, TriggerEvent};

/// Registry of active rule-sets
pub struct RuleSetManager {
    rule_sets: DashMap<RuleSetId, TriggerCoordinator>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl RuleSetManager {
    /// Create a manager handing every trigger to `dispatcher`
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            rule_sets: DashMap::new(),
            dispatcher,
        }
    }

    /// Activate a rule-set, replacing (and stopping) any set with the same id
    pub fn activate(
        &self,
        id: impl Into<RuleSetId>,
        rules: Vec<ResolvedRule>,
    ) -> TriggerCoordinator {
        let id = id.into();
        info!(rule_set = %id, rules = rules.len(), "Activating rule-set");
        let coordinator = TriggerCoordinator::new(id.clone(), rules, self.dispatcher.clone());
        if let Some(previous) = self.rule_sets.insert(id, coordinator.clone()) {
            debug!(rule_set = %previous.rule_set_id(), "Replacing active rule-set");
            previous.shutdown();
        }
        coordinator
    }

    /// Deactivate a rule-set, cancelling all of its pending timers
    pub fn deactivate(&self, id: &str) -> EngineResult<()> {
        let (_, coordinator) = self
            .rule_sets
            .remove(&RuleSetId::new(id))
            .ok_or_else(|| EngineError::RuleSetNotFound(id.to_string()))?;
        coordinator.shutdown();
        info!(rule_set = %id, "Deactivated rule-set");
        Ok(())
    }

    /// Deactivate every rule-set
    pub fn deactivate_all(&self) {
        for id in self.rule_set_ids() {
            let _ = self.deactivate(id.as_str());
        }
    }

    pub fn get(&self, id: &str) -> Option<TriggerCoordinator> {
        self.rule_sets.get(&RuleSetId::new(id)).map(|c| c.clone())
    }

    fn coordinator(&self, id: &str) -> EngineResult<TriggerCoordinator> {
        self.get(id)
            .ok_or_else(|| EngineError::RuleSetNotFound(id.to_string()))
    }

    pub async fn reset(&self, id: &str, scope: ResetScope) -> EngineResult<()> {
        self.coordinator(id)?.reset(scope).await
    }

    /// Evaluate one rule-set against a snapshot
    pub async fn process(
        &self,
        id: &str,
        snapshot: &Snapshot,
    ) -> EngineResult<Vec<TriggerEvent>> {
        Ok(self.coordinator(id)?.process(snapshot).await)
    }

    /// Evaluate every active rule-set against a snapshot, one after another
    pub async fn process_all(&self, snapshot: &Snapshot) -> Vec<TriggerEvent> {
        let mut events = Vec::new();
        for coordinator in self.coordinators() {
            events.extend(coordinator.process(snapshot).await);
        }
        events
    }

    /// Signal every rule-set that no foreground app could be resolved
    pub async fn process_absent_all(&self) {
        for coordinator in self.coordinators() {
            coordinator.process_absent().await;
        }
    }

    pub async fn status(
        &self,
        id: &str,
        name: &str,
        group: &str,
    ) -> EngineResult<RuleStatusReport> {
        self.coordinator(id)?.status(name, group).await
    }

    /// Ids of all active rule-sets, sorted
    pub fn rule_set_ids(&self) -> Vec<RuleSetId> {
        let mut ids: Vec<RuleSetId> = self.rule_sets.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.rule_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rule_sets.is_empty()
    }

    /// Clones of the active coordinators in id order, so no map guard is
    /// held across an await
    fn coordinators(&self) -> Vec<TriggerCoordinator> {
        self.rule_set_ids()
            .iter()
            .filter_map(|id| self.rule_sets.get(id).map(|c| c.clone()))
            .collect()
    }
}

impl std::fmt::Debug for RuleSetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleSetManager")
            .field("rule_sets", &self.rule_set_ids())
            .finish()
    }
}
