//! Raw rule documents
//!
//! These mirror the subscription format rules are authored in. Field names
//! are snake_case; the camelCase spelling of each field is accepted as an
//! alias. Absent and explicit `null` values both mean "use the default".

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ResolveResult;

/// One string or a list of strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringList {
    Single(String),
    List(Vec<String>),
}

impl StringList {
    /// Get all values as a vector
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            StringList::Single(s) => vec![s.clone()],
            StringList::List(v) => v.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            StringList::Single(_) => false,
            StringList::List(v) => v.is_empty(),
        }
    }
}

impl Default for StringList {
    fn default() -> Self {
        StringList::List(Vec::new())
    }
}

impl From<&str> for StringList {
    fn from(s: &str) -> Self {
        StringList::Single(s.to_string())
    }
}

impl From<Vec<&str>> for StringList {
    fn from(v: Vec<&str>) -> Self {
        StringList::List(v.into_iter().map(String::from).collect())
    }
}

fn list(value: &Option<StringList>) -> Vec<String> {
    value.as_ref().map(StringList::to_vec).unwrap_or_default()
}

/// Timing and scoping values applied beneath explicit rule values
///
/// Precedence is rule, then group, then subscription defaults, then the
/// built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDefaults {
    #[serde(default, alias = "activityIds", skip_serializing_if = "Option::is_none")]
    pub activity_ids: Option<StringList>,

    #[serde(default, alias = "excludeActivityIds", skip_serializing_if = "Option::is_none")]
    pub exclude_activity_ids: Option<StringList>,

    /// Cooldown in milliseconds
    #[serde(default, alias = "actionCd", skip_serializing_if = "Option::is_none")]
    pub action_cd: Option<u64>,

    #[serde(default, alias = "actionDelay", skip_serializing_if = "Option::is_none")]
    pub action_delay: Option<u64>,

    #[serde(default, alias = "matchDelay", skip_serializing_if = "Option::is_none")]
    pub match_delay: Option<u64>,

    #[serde(default, alias = "matchTime", skip_serializing_if = "Option::is_none")]
    pub match_time: Option<u64>,

    #[serde(default, alias = "actionMaximum", skip_serializing_if = "Option::is_none")]
    pub action_maximum: Option<u32>,

    #[serde(default, alias = "forcedTime", skip_serializing_if = "Option::is_none")]
    pub forced_time: Option<u64>,

    #[serde(default, alias = "priorityTime", skip_serializing_if = "Option::is_none")]
    pub priority_time: Option<u64>,

    #[serde(default, alias = "priorityActionMaximum", skip_serializing_if = "Option::is_none")]
    pub priority_action_maximum: Option<u32>,

    #[serde(default, alias = "resetMatch", skip_serializing_if = "Option::is_none")]
    pub reset_match: Option<String>,

    #[serde(default, alias = "matchRoot", skip_serializing_if = "Option::is_none")]
    pub match_root: Option<bool>,
}

impl RuleDefaults {
    /// Fill every unset value from `fallback`
    pub fn or(self, fallback: &RuleDefaults) -> RuleDefaults {
        RuleDefaults {
            activity_ids: self.activity_ids.or_else(|| fallback.activity_ids.clone()),
            exclude_activity_ids: self
                .exclude_activity_ids
                .or_else(|| fallback.exclude_activity_ids.clone()),
            action_cd: self.action_cd.or(fallback.action_cd),
            action_delay: self.action_delay.or(fallback.action_delay),
            match_delay: self.match_delay.or(fallback.match_delay),
            match_time: self.match_time.or(fallback.match_time),
            action_maximum: self.action_maximum.or(fallback.action_maximum),
            forced_time: self.forced_time.or(fallback.forced_time),
            priority_time: self.priority_time.or(fallback.priority_time),
            priority_action_maximum: self
                .priority_action_maximum
                .or(fallback.priority_action_maximum),
            reset_match: self.reset_match.or_else(|| fallback.reset_match.clone()),
            match_root: self.match_root.or(fallback.match_root),
        }
    }

    pub fn activity_id_list(&self) -> Vec<String> {
        list(&self.activity_ids)
    }

    pub fn exclude_activity_id_list(&self) -> Vec<String> {
        list(&self.exclude_activity_ids)
    }
}

/// Subscription identifier, numeric or textual
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentId {
    Number(i64),
    Text(String),
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentId::Number(n) => write!(f, "{}", n),
            DocumentId::Text(s) => f.write_str(s),
        }
    }
}

/// A subscription: named rule groups, per app or global
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DocumentId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,

    #[serde(default)]
    pub apps: Vec<AppDef>,

    #[serde(default, alias = "globalGroups")]
    pub global_groups: Vec<GroupDef>,
}

impl SubscriptionDocument {
    /// Parse subscription text
    ///
    /// Subscriptions are commonly written as JSON5, so comments, single
    /// quotes, unquoted keys and trailing commas are accepted. Plain JSON is
    /// a subset.
    pub fn parse(text: &str) -> ResolveResult<Self> {
        Ok(json5::from_str(text.trim())?)
    }
}

/// Rule groups that apply to one app
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppDef {
    /// Package name
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,

    #[serde(default)]
    pub groups: Vec<GroupDef>,
}

impl AppDef {
    pub fn is_enabled(&self) -> bool {
        self.enable.unwrap_or(true)
    }
}

/// A named group of rules sharing defaults and a key namespace
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,

    #[serde(default, alias = "activityIds", skip_serializing_if = "Option::is_none")]
    pub activity_ids: Option<StringList>,

    #[serde(default, alias = "excludeActivityIds", skip_serializing_if = "Option::is_none")]
    pub exclude_activity_ids: Option<StringList>,

    #[serde(default, alias = "actionCd", skip_serializing_if = "Option::is_none")]
    pub action_cd: Option<u64>,

    #[serde(default, alias = "actionDelay", skip_serializing_if = "Option::is_none")]
    pub action_delay: Option<u64>,

    #[serde(default, alias = "matchDelay", skip_serializing_if = "Option::is_none")]
    pub match_delay: Option<u64>,

    #[serde(default, alias = "matchTime", skip_serializing_if = "Option::is_none")]
    pub match_time: Option<u64>,

    #[serde(default, alias = "actionMaximum", skip_serializing_if = "Option::is_none")]
    pub action_maximum: Option<u32>,

    #[serde(default, alias = "forcedTime", skip_serializing_if = "Option::is_none")]
    pub forced_time: Option<u64>,

    #[serde(default, alias = "priorityTime", skip_serializing_if = "Option::is_none")]
    pub priority_time: Option<u64>,

    #[serde(default, alias = "priorityActionMaximum", skip_serializing_if = "Option::is_none")]
    pub priority_action_maximum: Option<u32>,

    #[serde(default, alias = "resetMatch", skip_serializing_if = "Option::is_none")]
    pub reset_match: Option<String>,

    #[serde(default, alias = "matchRoot", skip_serializing_if = "Option::is_none")]
    pub match_root: Option<bool>,

    #[serde(default)]
    pub rules: Vec<RuleEntry>,
}

impl GroupDef {
    pub fn is_enabled(&self) -> bool {
        self.enable.unwrap_or(true)
    }

    /// Group-level values as defaults for its rules
    pub fn defaults(&self) -> RuleDefaults {
        RuleDefaults {
            activity_ids: self.activity_ids.clone(),
            exclude_activity_ids: self.exclude_activity_ids.clone(),
            action_cd: self.action_cd,
            action_delay: self.action_delay,
            match_delay: self.match_delay,
            match_time: self.match_time,
            action_maximum: self.action_maximum,
            forced_time: self.forced_time,
            priority_time: self.priority_time,
            priority_action_maximum: self.priority_action_maximum,
            reset_match: self.reset_match.clone(),
            match_root: self.match_root,
        }
    }
}

/// A rule inside a group: a bare selector or a full definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleEntry {
    Shorthand(String),
    Full(Box<RuleDef>),
}

impl RuleEntry {
    /// Expand the shorthand form into a full definition
    pub fn into_def(self) -> RuleDef {
        match self {
            RuleEntry::Shorthand(selector) => RuleDef {
                matches: Some(StringList::Single(selector)),
                ..Default::default()
            },
            RuleEntry::Full(def) => *def,
        }
    }
}

/// A single rule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Dependency key other rules in the group may list in `pre_keys`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,

    #[serde(default, alias = "preKeys")]
    pub pre_keys: Vec<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<StringList>,

    #[serde(default, alias = "anyMatches", skip_serializing_if = "Option::is_none")]
    pub any_matches: Option<StringList>,

    #[serde(default, alias = "excludeMatches", skip_serializing_if = "Option::is_none")]
    pub exclude_matches: Option<StringList>,

    #[serde(default, alias = "excludeAllMatches", skip_serializing_if = "Option::is_none")]
    pub exclude_all_matches: Option<StringList>,

    #[serde(default, alias = "activityIds", skip_serializing_if = "Option::is_none")]
    pub activity_ids: Option<StringList>,

    #[serde(default, alias = "excludeActivityIds", skip_serializing_if = "Option::is_none")]
    pub exclude_activity_ids: Option<StringList>,

    #[serde(default, alias = "actionCd", skip_serializing_if = "Option::is_none")]
    pub action_cd: Option<u64>,

    #[serde(default, alias = "actionDelay", skip_serializing_if = "Option::is_none")]
    pub action_delay: Option<u64>,

    #[serde(default, alias = "matchDelay", skip_serializing_if = "Option::is_none")]
    pub match_delay: Option<u64>,

    #[serde(default, alias = "matchTime", skip_serializing_if = "Option::is_none")]
    pub match_time: Option<u64>,

    #[serde(default, alias = "actionMaximum", skip_serializing_if = "Option::is_none")]
    pub action_maximum: Option<u32>,

    #[serde(default, alias = "forcedTime", skip_serializing_if = "Option::is_none")]
    pub forced_time: Option<u64>,

    #[serde(default, alias = "priorityTime", skip_serializing_if = "Option::is_none")]
    pub priority_time: Option<u64>,

    #[serde(default, alias = "priorityActionMaximum", skip_serializing_if = "Option::is_none")]
    pub priority_action_maximum: Option<u32>,

    #[serde(default, alias = "resetMatch", skip_serializing_if = "Option::is_none")]
    pub reset_match: Option<String>,

    #[serde(default, alias = "matchRoot", skip_serializing_if = "Option::is_none")]
    pub match_root: Option<bool>,
}

impl RuleDef {
    pub fn is_enabled(&self) -> bool {
        self.enable.unwrap_or(true)
    }

    /// The rule's own timing and scoping values
    pub fn overrides(&self) -> RuleDefaults {
        RuleDefaults {
            activity_ids: self.activity_ids.clone(),
            exclude_activity_ids: self.exclude_activity_ids.clone(),
            action_cd: self.action_cd,
            action_delay: self.action_delay,
            match_delay: self.match_delay,
            match_time: self.match_time,
            action_maximum: self.action_maximum,
            forced_time: self.forced_time,
            priority_time: self.priority_time,
            priority_action_maximum: self.priority_action_maximum,
            reset_match: self.reset_match.clone(),
            match_root: self.match_root,
        }
    }

    pub fn match_list(&self) -> Vec<String> {
        list(&self.matches)
    }

    pub fn any_match_list(&self) -> Vec<String> {
        list(&self.any_matches)
    }

    pub fn exclude_match_list(&self) -> Vec<String> {
        list(&self.exclude_matches)
    }

    pub fn exclude_all_match_list(&self) -> Vec<String> {
        list(&self.exclude_all_matches)
    }
}

/// A one-off rule outside any subscription
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdhocRuleDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Package the rule is restricted to; any package when unset
    #[serde(default, alias = "appId", skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,

    /// Selector text, all of which must match
    #[serde(alias = "matches")]
    pub selector: StringList,

    #[serde(default, alias = "activityIds", skip_serializing_if = "Option::is_none")]
    pub activity_ids: Option<StringList>,

    #[serde(default, alias = "excludeActivityIds", skip_serializing_if = "Option::is_none")]
    pub exclude_activity_ids: Option<StringList>,

    #[serde(default, alias = "actionCd", skip_serializing_if = "Option::is_none")]
    pub action_cd: Option<u64>,

    #[serde(default, alias = "actionDelay", skip_serializing_if = "Option::is_none")]
    pub action_delay: Option<u64>,

    #[serde(default, alias = "matchDelay", skip_serializing_if = "Option::is_none")]
    pub match_delay: Option<u64>,

    #[serde(default, alias = "matchTime", skip_serializing_if = "Option::is_none")]
    pub match_time: Option<u64>,

    #[serde(default, alias = "actionMaximum", skip_serializing_if = "Option::is_none")]
    pub action_maximum: Option<u32>,

    #[serde(default, alias = "forcedTime", skip_serializing_if = "Option::is_none")]
    pub forced_time: Option<u64>,

    #[serde(default, alias = "resetMatch", skip_serializing_if = "Option::is_none")]
    pub reset_match: Option<String>,
}

impl AdhocRuleDef {
    /// Shorthand for a rule with a single selector and default timing
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: StringList::Single(selector.into()),
            ..Default::default()
        }
    }

    /// Expand into a regular rule definition
    pub fn to_rule_def(&self) -> RuleDef {
        RuleDef {
            name: self.name.clone(),
            matches: Some(self.selector.clone()),
            activity_ids: self.activity_ids.clone(),
            exclude_activity_ids: self.exclude_activity_ids.clone(),
            action_cd: self.action_cd,
            action_delay: self.action_delay,
            match_delay: self.match_delay,
            match_time: self.match_time,
            action_maximum: self.action_maximum,
            forced_time: self.forced_time,
            reset_match: self.reset_match.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_list_single_or_list() {
        let single: StringList = serde_json::from_str(r#""Button""#).unwrap();
        assert_eq!(single.to_vec(), vec!["Button"]);

        let many: StringList = serde_json::from_str(r#"["A", "B"]"#).unwrap();
        assert_eq!(many.to_vec(), vec!["A", "B"]);
        assert!(StringList::default().is_empty());
    }

    #[test]
    fn test_rule_entry_shorthand() {
        let entries: Vec<RuleEntry> =
            serde_json::from_str(r#"["[text='跳过']", {"key": 1, "matches": "Button"}]"#).unwrap();
        let defs: Vec<RuleDef> = entries.into_iter().map(RuleEntry::into_def).collect();
        assert_eq!(defs[0].match_list(), vec!["[text='跳过']"]);
        assert_eq!(defs[1].key, Some(1));
        assert_eq!(defs[1].match_list(), vec!["Button"]);
    }

    #[test]
    fn test_camel_case_aliases() {
        let def: RuleDef = serde_json::from_str(
            r#"{"anyMatches": ["A"], "actionCd": 3000, "preKeys": [0], "resetMatch": "app", "actionMaximum": null}"#,
        )
        .unwrap();
        assert_eq!(def.any_match_list(), vec!["A"]);
        assert_eq!(def.action_cd, Some(3000));
        assert_eq!(def.pre_keys, vec![0]);
        assert_eq!(def.reset_match.as_deref(), Some("app"));
        assert_eq!(def.action_maximum, None);
    }

    #[test]
    fn test_defaults_precedence() {
        let rule = RuleDefaults {
            action_cd: Some(200),
            ..Default::default()
        };
        let group = RuleDefaults {
            action_cd: Some(5000),
            match_delay: Some(100),
            ..Default::default()
        };
        let merged = rule.or(&group);
        assert_eq!(merged.action_cd, Some(200));
        assert_eq!(merged.match_delay, Some(100));
        assert_eq!(merged.action_delay, None);
    }

    #[test]
    fn test_adhoc_accepts_matches_alias() {
        let def: AdhocRuleDef =
            serde_json::from_str(r#"{"matches": "@Button[text='确定']", "actionMaximum": 1}"#).unwrap();
        let rule = def.to_rule_def();
        assert_eq!(rule.match_list(), vec!["@Button[text='确定']"]);
        assert_eq!(rule.action_maximum, Some(1));
    }
}
