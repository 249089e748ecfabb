//! Trigger events handed to the workflow side

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use tf_core::Node;
use tf_rules::{MatchedNodes, ResolvedRule, RuleId};

/// Identifier of an active rule-set (one workflow)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSetId(String);

impl RuleSetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RuleSetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RuleSetId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A rule fired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Unique event id (ULID)
    pub id: String,
    pub rule_set_id: RuleSetId,
    pub rule_name: String,
    pub rule_group: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_key: Option<i64>,
    /// The node the action targets
    pub matched_node: Node,
    pub all_matched_nodes: Vec<Node>,
    /// Foreground app when the rule fired
    pub package: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    pub fired_at: DateTime<Utc>,
    /// Fired from a delay timer rather than directly from a snapshot
    pub via_delay: bool,
}

impl TriggerEvent {
    pub fn new(
        rule_set_id: RuleSetId,
        rule: &ResolvedRule,
        matched: MatchedNodes,
        package: Option<String>,
        activity: Option<String>,
        via_delay: bool,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            rule_set_id,
            rule_name: rule.name.clone(),
            rule_group: rule.group_name.clone(),
            rule_key: rule.key,
            matched_node: matched.node,
            all_matched_nodes: matched.all_nodes,
            package,
            activity,
            fired_at: Utc::now(),
            via_delay,
        }
    }

    pub fn rule_id(&self) -> RuleId {
        RuleId::new(&self.rule_group, &self.rule_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tf_selector::Selector;

    #[test]
    fn test_event_carries_rule_identity() {
        let mut rule = ResolvedRule::new("skip", "ads", vec![Selector::parse("Button").unwrap()]);
        rule.key = Some(3);
        let matched = MatchedNodes {
            node: Node::with_class("Button").text("跳过"),
            all_nodes: vec![Node::with_class("Button").text("跳过")],
        };
        let event = TriggerEvent::new(
            "workflow-1".into(),
            &rule,
            matched,
            Some("com.example".into()),
            None,
            false,
        );

        assert_eq!(event.rule_id(), RuleId::new("ads", "skip"));
        assert_eq!(event.rule_key, Some(3));
        assert_eq!(event.id.len(), 26);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["rule_set_id"], "workflow-1");
        assert_eq!(json["matched_node"]["text"], "跳过");
        assert!(json.get("activity").is_none());
    }
}
