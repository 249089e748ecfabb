//! Resolved rules
//!
//! A [`ResolvedRule`] is immutable once built: compiled selectors plus
//! fully-defaulted scoping and timing values.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use tf_core::{Node, NodeId, NodeRef, Snapshot, StableId};
use tf_selector::{QueryOptions, Selector};

/// Cooldown applied when none is configured, in milliseconds
pub const DEFAULT_ACTION_CD: u64 = 1000;

/// Identity of a rule within a rule-set
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleId {
    pub group: String,
    pub name: String,
}

impl RuleId {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.group, self.name)
    }
}

/// When a rule's execution state is reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetMatch {
    /// On any foreground package change
    App,
    /// On any activity or package change
    Activity,
    /// When a previously holding match is lost
    Match,
}

impl ResetMatch {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "app" => Some(ResetMatch::App),
            "activity" => Some(ResetMatch::Activity),
            "match" => Some(ResetMatch::Match),
            _ => None,
        }
    }
}

/// A fully resolved rule
///
/// Two rules are equal when their name and group are equal.
#[derive(Debug, Clone)]
pub struct ResolvedRule {
    pub name: String,
    pub group_name: String,
    pub key: Option<i64>,

    /// Package the rule applies to; any package when `None`
    pub app_id: Option<String>,
    pub activity_ids: Vec<String>,
    pub exclude_activity_ids: Vec<String>,

    pub matches: Vec<Selector>,
    pub any_matches: Vec<Selector>,
    pub exclude_matches: Vec<Selector>,
    pub exclude_all_matches: Vec<Selector>,
    pub match_root: bool,

    pub pre_keys: Vec<i64>,

    pub action_cd: u64,
    pub action_delay: u64,
    pub match_delay: u64,
    pub match_time: Option<u64>,
    pub action_maximum: Option<u32>,
    pub forced_time: u64,
    pub priority_time: Option<u64>,
    pub priority_action_maximum: Option<u32>,
    pub reset_match: Option<ResetMatch>,
}

impl PartialEq for ResolvedRule {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.group_name == other.group_name
    }
}

impl Eq for ResolvedRule {}

impl Hash for ResolvedRule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.group_name.hash(state);
    }
}

impl ResolvedRule {
    /// A rule with one `matches` selector and built-in defaults
    pub fn new(
        name: impl Into<String>,
        group_name: impl Into<String>,
        matches: Vec<Selector>,
    ) -> Self {
        Self {
            name: name.into(),
            group_name: group_name.into(),
            key: None,
            app_id: None,
            activity_ids: Vec::new(),
            exclude_activity_ids: Vec::new(),
            matches,
            any_matches: Vec::new(),
            exclude_matches: Vec::new(),
            exclude_all_matches: Vec::new(),
            match_root: false,
            pre_keys: Vec::new(),
            action_cd: DEFAULT_ACTION_CD,
            action_delay: 0,
            match_delay: 0,
            match_time: None,
            action_maximum: None,
            forced_time: 0,
            priority_time: None,
            priority_action_maximum: None,
            reset_match: None,
        }
    }

    pub fn id(&self) -> RuleId {
        RuleId::new(&self.group_name, &self.name)
    }

    /// Whether the rule applies to the given foreground app and activity
    pub fn in_scope(&self, package: &str, activity: Option<&str>) -> bool {
        if let Some(app_id) = &self.app_id {
            if app_id != package {
                return false;
            }
        }

        if let Some(activity) = activity {
            if self
                .exclude_activity_ids
                .iter()
                .any(|id| activity_matches(id, activity))
            {
                return false;
            }
        }

        if self.activity_ids.is_empty() {
            return true;
        }
        match activity {
            Some(activity) => self
                .activity_ids
                .iter()
                .any(|id| activity_matches(id, activity)),
            None => self.activity_ids.iter().any(|id| id == "*"),
        }
    }

    /// Whether every dependency key has fired in this rule's group
    pub fn pre_keys_satisfied(&self, keys: &MatchedKeys) -> bool {
        self.pre_keys
            .iter()
            .all(|key| keys.contains(&self.group_name, *key))
    }

    /// Whether a foreground change resets this rule's state
    pub fn should_reset(&self, package_changed: bool, activity_changed: bool) -> bool {
        match self.reset_match {
            Some(ResetMatch::App) => package_changed,
            Some(ResetMatch::Activity) => package_changed || activity_changed,
            _ => false,
        }
    }

    /// Whether the rule is still eligible for priority evaluation after
    /// `action_count` fires
    pub fn is_priority(&self, action_count: u32) -> bool {
        let Some(time) = self.priority_time else {
            return false;
        };
        time > 0
            && self
                .priority_action_maximum
                .map_or(true, |max| action_count < max)
    }

    /// Run the selector set against a snapshot
    ///
    /// Every `matches` selector must match and, when `any_matches` is
    /// non-empty, at least one of it. No `exclude_matches` selector may match,
    /// and the `exclude_all_matches` selectors may not all match at once.
    pub fn evaluate<'a>(&self, snapshot: &'a Snapshot) -> Option<RuleMatch<'a>> {
        let options = QueryOptions {
            match_root: self.match_root,
        };

        let mut node = None;
        for selector in &self.matches {
            node = Some(selector.query_first_with(snapshot, options)?);
        }
        if !self.any_matches.is_empty() {
            let hit = self
                .any_matches
                .iter()
                .find_map(|selector| selector.query_first_with(snapshot, options))?;
            node = node.or(Some(hit));
        }
        let node = node?;

        if self
            .exclude_matches
            .iter()
            .any(|selector| selector.query_first_with(snapshot, options).is_some())
        {
            return None;
        }
        if !self.exclude_all_matches.is_empty()
            && self
                .exclude_all_matches
                .iter()
                .all(|selector| selector.query_first_with(snapshot, options).is_some())
        {
            return None;
        }

        let mut seen: HashSet<NodeId> = HashSet::new();
        let all_nodes = self
            .any_matches
            .iter()
            .chain(&self.matches)
            .flat_map(|selector| selector.query_all_with(snapshot, options))
            .filter(|found| seen.insert(found.id()))
            .collect();

        Some(RuleMatch { node, all_nodes })
    }
}

/// `id` matches when equal to, or contained in, the activity name; `*`
/// matches every activity
fn activity_matches(id: &str, activity: &str) -> bool {
    id == "*" || id == activity || activity.contains(id)
}

/// Nodes a rule matched in one snapshot
#[derive(Debug, Clone)]
pub struct RuleMatch<'a> {
    /// The node an action would target
    pub node: NodeRef<'a>,
    /// Every node matched by `matches` and `any_matches`
    pub all_nodes: Vec<NodeRef<'a>>,
}

impl RuleMatch<'_> {
    pub fn stable_id(&self) -> StableId {
        self.node
            .stable_id
            .unwrap_or_else(|| StableId::derive(self.node.node(), self.node.index()))
    }

    /// Detach the matched nodes from the snapshot
    pub fn to_owned(&self) -> MatchedNodes {
        MatchedNodes {
            node: self.node.node().clone(),
            all_nodes: self.all_nodes.iter().map(|n| n.node().clone()).collect(),
        }
    }
}

/// Owned copy of a [`RuleMatch`], kept past the snapshot's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedNodes {
    pub node: Node,
    pub all_nodes: Vec<Node>,
}

/// Dependency keys that have fired, scoped per group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedKeys {
    groups: HashMap<String, HashSet<i64>>,
}

impl MatchedKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fired key; returns whether it was new
    pub fn insert(&mut self, group: &str, key: i64) -> bool {
        self.groups.entry(group.to_string()).or_default().insert(key)
    }

    pub fn contains(&self, group: &str, key: i64) -> bool {
        self.groups.get(group).map_or(false, |keys| keys.contains(&key))
    }

    pub fn remove(&mut self, group: &str, key: i64) -> bool {
        let Some(keys) = self.groups.get_mut(group) else {
            return false;
        };
        let removed = keys.remove(&key);
        if keys.is_empty() {
            self.groups.remove(group);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
