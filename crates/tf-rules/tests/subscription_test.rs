//! Resolving subscription documents in the authoring format and evaluating
//! them against snapshots

use tf_core::{ElementTree, Node, Snapshot, StableId, Timestamp};
use tf_rules::{
    resolve, MatchedKeys, ResetMatch, RuleDefaults, RuleExecutionState, RuleResolver,
    SubscriptionDocument, TriggerStatus,
};

const SUBSCRIPTION: &str = r#"{
    "id": 42,
    "name": "example-subscription",
    "version": 7,
    "globalGroups": [
        {
            "key": 0,
            "name": "开屏广告",
            "matchTime": 10000,
            "actionMaximum": 1,
            "resetMatch": "app",
            "rules": [
                {"key": 0, "matches": "[text*='跳过'][text.length<10][clickable=true]"},
                {"key": 1, "anyMatches": ["[vid='skip']", "[desc*='跳过']"]}
            ]
        }
    ],
    "apps": [
        {
            "id": "com.example.shop",
            "name": "Shop",
            "groups": [
                {
                    "key": 1,
                    "name": "更新提示",
                    "desc": "Dismiss the update dialog",
                    "actionCd": 3000,
                    "activityIds": ".MainActivity",
                    "rules": [
                        {
                            "key": 0,
                            "name": "open",
                            "matches": "TextView[text*='新版本']"
                        },
                        {
                            "key": 1,
                            "name": "dismiss",
                            "preKeys": [0],
                            "matches": ["TextView[text*='新版本']", "@Button[text='取消'] + Button"],
                            "excludeMatches": "[text='强制更新']",
                            "actionDelay": 300
                        }
                    ]
                },
                {
                    "key": 2,
                    "name": "disabled group",
                    "enable": false,
                    "rules": ["Button"]
                }
            ]
        }
    ]
}"#;

fn update_dialog(forced: bool) -> Snapshot {
    let mut dialog = ElementTree::leaf(Node::with_class("android.widget.LinearLayout"))
        .child(Node::with_class("android.widget.TextView").text("发现新版本 2.0"))
        .child(
            Node::with_class("android.widget.Button")
                .text("取消")
                .clickable(true)
                .stable_id(11),
        )
        .child(
            Node::with_class("android.widget.Button")
                .text("更新")
                .clickable(true),
        );
    if forced {
        dialog = dialog.child(Node::with_class("android.widget.TextView").text("强制更新"));
    }
    let tree = ElementTree::leaf(Node::with_class("android.widget.FrameLayout")).child(dialog);
    Snapshot::new(
        "com.example.shop",
        Some("com.example.shop.MainActivity".into()),
        tree,
    )
    .unwrap()
}

fn splash() -> Snapshot {
    let tree = ElementTree::leaf(Node::with_class("android.widget.FrameLayout"))
        .child(Node::with_class("android.widget.ImageView").desc("广告"))
        .child(
            Node::with_class("android.widget.TextView")
                .text("跳过 3")
                .clickable(true),
        );
    Snapshot::new("com.example.news", Some("com.example.news.Splash".into()), tree).unwrap()
}

fn resolved() -> tf_rules::ResolveReport {
    let doc = SubscriptionDocument::parse(SUBSCRIPTION).unwrap();
    resolve(&doc, &RuleDefaults::default())
}

#[test]
fn test_subscription_resolves_cleanly() {
    let report = resolved();
    assert!(report.is_clean(), "{:?} {:?}", report.errors, report.warnings);

    let names: Vec<_> = report
        .rules
        .iter()
        .map(|r| (r.group_name.as_str(), r.name.as_str()))
        .collect();
    assert_eq!(
        names,
        vec![
            ("开屏广告", "开屏广告#0"),
            ("开屏广告", "开屏广告#1"),
            ("com.example.shop/更新提示", "open"),
            ("com.example.shop/更新提示", "dismiss"),
        ]
    );

    let skip = &report.rules[0];
    assert_eq!(skip.app_id, None);
    assert_eq!(skip.match_time, Some(10000));
    assert_eq!(skip.action_maximum, Some(1));
    assert_eq!(skip.reset_match, Some(ResetMatch::App));

    let dismiss = &report.rules[3];
    assert_eq!(dismiss.action_cd, 3000);
    assert_eq!(dismiss.action_delay, 300);
    assert_eq!(dismiss.activity_ids, vec!["com.example.shop.MainActivity"]);
    assert_eq!(dismiss.pre_keys, vec![0]);
}

#[test]
fn test_global_rule_matches_splash() {
    let report = resolved();
    let snap = splash();
    let skip = &report.rules[0];
    assert!(skip.in_scope(snap.foreground_package(), snap.foreground_activity()));
    let found = skip.evaluate(&snap).unwrap();
    assert_eq!(found.node.text.as_deref(), Some("跳过 3"));

    // anyMatches rule: neither the vid nor a desc containing 跳过 is present
    assert!(report.rules[1].evaluate(&snap).is_none());
}

#[test]
fn test_app_rules_scope_dependency_and_exclusion() {
    let report = resolved();
    let open = &report.rules[2];
    let dismiss = &report.rules[3];
    let snap = update_dialog(false);

    assert!(dismiss.in_scope(snap.foreground_package(), snap.foreground_activity()));
    assert!(!dismiss.in_scope("com.example.news", snap.foreground_activity()));

    let mut keys = MatchedKeys::new();
    assert!(!dismiss.pre_keys_satisfied(&keys));
    assert!(open.evaluate(&snap).is_some());
    keys.insert(&open.group_name, open.key.unwrap());
    assert!(dismiss.pre_keys_satisfied(&keys));

    let found = dismiss.evaluate(&snap).unwrap();
    assert_eq!(found.node.text.as_deref(), Some("取消"));
    assert_eq!(found.stable_id(), StableId(11));

    assert!(dismiss.evaluate(&update_dialog(true)).is_none());
}

#[test]
fn test_state_walks_through_delay_and_cooldown() {
    let report = resolved();
    let dismiss = &report.rules[3];
    let snap = update_dialog(false);
    let found = dismiss.evaluate(&snap).unwrap();

    let mut state = RuleExecutionState::new();
    let t = Timestamp::from_millis;
    assert!(state.record_match(dismiss, found.stable_id(), t(0)));
    assert_eq!(state.status(dismiss, t(0)), TriggerStatus::WaitingDelay);

    state.action_delay_triggered_at = Some(t(0));
    assert_eq!(state.status(dismiss, t(299)), TriggerStatus::InDelay);
    assert_eq!(state.status(dismiss, t(300)), TriggerStatus::Ready);

    state.record_trigger(t(300));
    assert_eq!(state.status(dismiss, t(301)), TriggerStatus::Cooling);
    assert_eq!(state.status(dismiss, t(3300)), TriggerStatus::WaitingDelay);
}

#[test]
fn test_resolver_combines_documents_and_adhoc_rules() {
    let mut resolver = RuleResolver::new();
    resolver.subscription_text(SUBSCRIPTION).unwrap();
    resolver.adhoc(&tf_rules::AdhocRuleDef::new("@Button[text='确定']"));
    let report = resolver.finish();
    assert_eq!(report.rules.len(), 5);
    assert_eq!(report.rules[4].group_name, "adhoc");
}
