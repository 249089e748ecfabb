//! Rule resolution
//!
//! Turns raw rule documents into [`ResolvedRule`]s. Failures are scoped to
//! one rule: the rule is dropped and reported, the rest of the batch is
//! resolved normally.

use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use tf_selector::Selector;

use crate::definition::{AdhocRuleDef, AppDef, GroupDef, RuleDef, RuleDefaults, SubscriptionDocument};
use crate::error::{ResolveError, ResolveResult, ResolveWarning};
use crate::rule::{ResetMatch, ResolvedRule, DEFAULT_ACTION_CD};

/// Group name given to ad-hoc rules without one
const ADHOC_GROUP: &str = "adhoc";

/// Group name given to unnamed global groups
const GLOBAL_GROUP: &str = "global";

/// Outcome of resolving a batch of rule documents
#[derive(Debug, Default)]
pub struct ResolveReport {
    pub rules: Vec<ResolvedRule>,
    pub errors: Vec<ResolveError>,
    pub warnings: Vec<ResolveWarning>,
}

impl ResolveReport {
    /// Whether every rule resolved without errors or warnings
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

/// Where a group's rules come from
struct GroupScope<'a> {
    app_id: Option<&'a str>,
    raw_name: String,
    group_name: String,
    defaults: RuleDefaults,
}

/// Incremental resolver over several documents
///
/// Rule identity (`name`, `group`) is unique across everything fed to one
/// resolver; later duplicates are dropped with a warning.
#[derive(Debug, Default)]
pub struct RuleResolver {
    defaults: RuleDefaults,
    report: ResolveReport,
    seen: HashSet<(String, String)>,
    adhoc_counts: HashMap<String, usize>,
}

impl RuleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver applying `defaults` beneath group and rule values
    pub fn with_defaults(defaults: RuleDefaults) -> Self {
        Self {
            defaults,
            ..Default::default()
        }
    }

    /// Resolve every enabled group of a subscription
    pub fn subscription(&mut self, doc: &SubscriptionDocument) -> &mut Self {
        debug!(
            id = ?doc.id,
            name = ?doc.name,
            apps = doc.apps.len(),
            global_groups = doc.global_groups.len(),
            "Resolving subscription"
        );

        for (index, group) in doc.global_groups.iter().enumerate() {
            if !group.is_enabled() {
                continue;
            }
            let raw_name = group.name.clone().unwrap_or_else(|| {
                if index == 0 {
                    GLOBAL_GROUP.to_string()
                } else {
                    format!("{}#{}", GLOBAL_GROUP, index)
                }
            });
            let scope = GroupScope {
                app_id: None,
                group_name: raw_name.clone(),
                raw_name,
                defaults: group.defaults().or(&self.defaults),
            };
            self.group(&scope, group);
        }

        for app in doc.apps.iter().filter(|app| app.is_enabled()) {
            self.app(app);
        }
        self
    }

    /// Parse a subscription from JSON or JSON5 text and resolve it
    pub fn subscription_text(&mut self, text: &str) -> ResolveResult<&mut Self> {
        let doc = SubscriptionDocument::parse(text)?;
        Ok(self.subscription(&doc))
    }

    /// Resolve a one-off rule
    pub fn adhoc(&mut self, def: &AdhocRuleDef) -> &mut Self {
        let group = def.group.clone().unwrap_or_else(|| ADHOC_GROUP.to_string());
        let index = {
            let count = self.adhoc_counts.entry(group.clone()).or_default();
            *count += 1;
            *count - 1
        };
        let scope = GroupScope {
            app_id: def.app_id.as_deref(),
            raw_name: group.clone(),
            group_name: group,
            defaults: self.defaults.clone(),
        };
        self.rule(&scope, def.to_rule_def(), index);
        self
    }

    /// Finish the batch: validate dependency keys and return the report
    pub fn finish(mut self) -> ResolveReport {
        let mut keys: HashMap<&str, HashSet<i64>> = HashMap::new();
        for rule in &self.report.rules {
            if let Some(key) = rule.key {
                keys.entry(rule.group_name.as_str()).or_default().insert(key);
            }
        }

        let mut warnings = Vec::new();
        for rule in &self.report.rules {
            for key in &rule.pre_keys {
                let known = keys
                    .get(rule.group_name.as_str())
                    .map_or(false, |group| group.contains(key));
                if !known {
                    warnings.push(ResolveWarning::UnknownPreKey {
                        rule: rule.name.clone(),
                        group: rule.group_name.clone(),
                        key: *key,
                    });
                }
            }
        }
        for warning in &warnings {
            warn!("{}", warning);
        }
        self.report.warnings.extend(warnings);

        info!(
            rules = self.report.rules.len(),
            errors = self.report.errors.len(),
            warnings = self.report.warnings.len(),
            "Resolved rules"
        );
        self.report
    }

    fn app(&mut self, app: &AppDef) {
        for (index, group) in app.groups.iter().enumerate() {
            if !group.is_enabled() {
                continue;
            }
            let raw_name = group
                .name
                .clone()
                .unwrap_or_else(|| format!("group#{}", group.key.unwrap_or(index as i64)));
            let scope = GroupScope {
                app_id: Some(app.id.as_str()),
                group_name: format!("{}/{}", app.id, raw_name),
                raw_name,
                defaults: group.defaults().or(&self.defaults),
            };
            self.group(&scope, group);
        }
    }

    fn group(&mut self, scope: &GroupScope<'_>, group: &GroupDef) {
        for (index, entry) in group.rules.iter().enumerate() {
            self.rule(scope, entry.clone().into_def(), index);
        }
    }

    fn rule(&mut self, scope: &GroupScope<'_>, def: RuleDef, index: usize) {
        if !def.is_enabled() {
            return;
        }
        let name = def
            .name
            .clone()
            .unwrap_or_else(|| format!("{}#{}", scope.raw_name, index));

        match self.build(scope, &def, name) {
            Ok(Some(rule)) => {
                debug!(rule = %rule.name, group = %rule.group_name, "Resolved rule");
                self.report.rules.push(rule);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Dropping rule: {}", e);
                self.report.errors.push(e);
            }
        }
    }

    fn build(
        &mut self,
        scope: &GroupScope<'_>,
        def: &RuleDef,
        name: String,
    ) -> ResolveResult<Option<ResolvedRule>> {
        let group = &scope.group_name;
        let compile = |field: &'static str, texts: Vec<String>| -> ResolveResult<Vec<Selector>> {
            texts
                .into_iter()
                .map(|text| {
                    Selector::parse(&text).map_err(|error| ResolveError::Selector {
                        rule: name.clone(),
                        group: group.clone(),
                        field,
                        text,
                        error,
                    })
                })
                .collect()
        };

        let matches = compile("matches", def.match_list())?;
        let any_matches = compile("any_matches", def.any_match_list())?;
        let exclude_matches = compile("exclude_matches", def.exclude_match_list())?;
        let exclude_all_matches = compile("exclude_all_matches", def.exclude_all_match_list())?;

        if matches.is_empty() && any_matches.is_empty() {
            return Err(ResolveError::NoMatches {
                rule: name,
                group: group.clone(),
            });
        }

        if !self.seen.insert((group.clone(), name.clone())) {
            self.warn(ResolveWarning::DuplicateRule {
                rule: name,
                group: group.clone(),
            });
            return Ok(None);
        }

        let values = def.overrides().or(&scope.defaults);

        let reset_match = match values.reset_match.as_deref() {
            None => None,
            Some(text) => {
                let parsed = ResetMatch::parse(text);
                if parsed.is_none() {
                    self.warn(ResolveWarning::UnknownResetMatch {
                        rule: name.clone(),
                        group: group.clone(),
                        value: text.to_string(),
                    });
                }
                parsed
            }
        };

        let expand = |ids: Vec<String>| -> Vec<String> {
            ids.into_iter()
                .map(|id| match scope.app_id {
                    Some(app_id) if id.starts_with('.') => format!("{}{}", app_id, id),
                    _ => id,
                })
                .collect()
        };
        let activity_ids = expand(values.activity_id_list());
        let exclude_activity_ids = expand(values.exclude_activity_id_list());

        for activity in activity_ids
            .iter()
            .filter(|id| exclude_activity_ids.contains(id))
        {
            self.warn(ResolveWarning::ContradictoryScope {
                rule: name.clone(),
                group: group.clone(),
                activity: activity.clone(),
            });
        }

        Ok(Some(ResolvedRule {
            name,
            group_name: group.clone(),
            key: def.key,
            app_id: scope.app_id.map(String::from),
            activity_ids,
            exclude_activity_ids,
            matches,
            any_matches,
            exclude_matches,
            exclude_all_matches,
            match_root: values.match_root.unwrap_or(false),
            pre_keys: def.pre_keys.clone(),
            action_cd: values.action_cd.unwrap_or(DEFAULT_ACTION_CD),
            action_delay: values.action_delay.unwrap_or(0),
            match_delay: values.match_delay.unwrap_or(0),
            match_time: values.match_time,
            action_maximum: values.action_maximum,
            forced_time: values.forced_time.unwrap_or(0),
            priority_time: values.priority_time,
            priority_action_maximum: values.priority_action_maximum,
            reset_match,
        }))
    }

    fn warn(&mut self, warning: ResolveWarning) {
        warn!("{}", warning);
        self.report.warnings.push(warning);
    }
}

/// Resolve one subscription document
pub fn resolve(doc: &SubscriptionDocument, defaults: &RuleDefaults) -> ResolveReport {
    let mut resolver = RuleResolver::with_defaults(defaults.clone());
    resolver.subscription(doc);
    resolver.finish()
}

/// Resolve a batch of one-off rules
pub fn resolve_adhoc(defs: &[AdhocRuleDef], defaults: &RuleDefaults) -> ResolveReport {
    let mut resolver = RuleResolver::with_defaults(defaults.clone());
    for def in defs {
        resolver.adhoc(def);
    }
    resolver.finish()
}
