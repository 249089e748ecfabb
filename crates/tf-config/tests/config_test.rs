//! Loading a configuration tree from disk and resolving its rule-sets

use std::fs;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;
use tf_config::{ConfigError, EngineConfig, SubscriptionFetcher};
use tf_rules::ResetMatch;

fn write_file(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

const SUBSCRIPTION: &str = r#"{
  "id": 1,
  "name": "shop",
  "apps": [{
    "id": "com.example.shop",
    "groups": [{
      "key": 1,
      "name": "更新提示",
      "actionCd": 3000,
      "rules": [{"key": 0, "matches": "@Button[text='稍后']"}]
    }]
  }]
}"#;

fn config_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "subs/shop.json", SUBSCRIPTION);
    write_file(
        dir.path(),
        "adhoc/10-splash.yaml",
        "- name: splash\n  selector: \"Button[text='跳过']\"\n  resetMatch: app\n",
    );
    write_file(
        dir.path(),
        "adhoc/20-broken.yaml",
        "- name: broken\n  selector: \"Button[text=\"\n",
    );
    write_file(
        dir.path(),
        "tapflow.yaml",
        r#"
log_level: debug
bus_capacity: 32
defaults:
  actionCd: 1500
rule_sets:
  - id: shopping
    subscriptions: [subs/shop.json]
    adhoc: !include_dir_merge_list adhoc
  - id: paused
    enabled: false
    adhoc:
      - selector: Button
"#,
    );
    dir
}

#[tokio::test]
async fn test_load_and_resolve_tree() {
    let dir = config_tree();
    let config = EngineConfig::load(dir.path().join("tapflow.yaml")).unwrap();
    assert_eq!(config.bus_capacity, 32);
    assert_eq!(config.rule_sets.len(), 2);

    let loaded = config.load_rule_sets().await.unwrap();
    assert_eq!(loaded.len(), 1);
    let shopping = &loaded[0];
    assert_eq!(shopping.id, "shopping");

    let names: Vec<&str> = shopping
        .report
        .rules
        .iter()
        .map(|r| r.name.as_str())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"splash"));

    let app_rule = shopping
        .report
        .rules
        .iter()
        .find(|r| r.app_id.as_deref() == Some("com.example.shop"))
        .unwrap();
    // group value beats the configured default
    assert_eq!(app_rule.action_cd, 3000);

    let splash = shopping
        .report
        .rules
        .iter()
        .find(|r| r.name == "splash")
        .unwrap();
    assert_eq!(splash.action_cd, 1500);
    assert_eq!(splash.reset_match, Some(ResetMatch::App));

    // The broken selector is reported, not fatal
    assert_eq!(shopping.report.errors.len(), 1);
    assert_eq!(
        shopping.report.errors[0].rule(),
        Some(("broken", "adhoc"))
    );
}

#[tokio::test]
async fn test_missing_subscription_file() {
    let dir = TempDir::new().unwrap();
    write_file(
        dir.path(),
        "tapflow.yaml",
        "rule_sets:\n  - id: a\n    subscriptions: [missing.json]\n",
    );
    let config = EngineConfig::load(dir.path().join("tapflow.yaml")).unwrap();
    assert!(matches!(
        config.load_rule_sets().await,
        Err(ConfigError::ReadFile { .. })
    ));
}

#[tokio::test]
async fn test_subscription_of_wrong_shape() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "sub.json", r#"{"apps": "not a list"}"#);
    write_file(
        dir.path(),
        "tapflow.yaml",
        "rule_sets:\n  - id: a\n    subscriptions: [sub.json]\n",
    );
    let config = EngineConfig::load(dir.path().join("tapflow.yaml")).unwrap();
    assert!(matches!(
        config.load_rule_sets().await,
        Err(ConfigError::Subscription { .. })
    ));
}

#[test]
fn test_load_rejects_duplicate_ids() {
    let dir = TempDir::new().unwrap();
    write_file(
        dir.path(),
        "tapflow.yaml",
        "rule_sets:\n  - id: a\n    adhoc: [{selector: A}]\n  - id: a\n    adhoc: [{selector: B}]\n",
    );
    assert!(matches!(
        EngineConfig::load(dir.path().join("tapflow.yaml")),
        Err(ConfigError::ValidationFailed { .. })
    ));
}

#[tokio::test]
async fn test_json5_and_yaml_subscription_files() {
    let dir = TempDir::new().unwrap();
    write_file(
        dir.path(),
        "subs/a.json5",
        "// hand edited\n{globalGroups: [{name: 'a', rules: ['Button',],},],}\n",
    );
    write_file(
        dir.path(),
        "subs/b.yaml",
        "globalGroups:\n  - name: b\n    rules: [Image]\n",
    );
    write_file(
        dir.path(),
        "tapflow.yaml",
        "rule_sets:\n  - id: a\n    subscriptions: [subs/a.json5, subs/b.yaml]\n",
    );
    let config = EngineConfig::load(dir.path().join("tapflow.yaml")).unwrap();
    let loaded = config.load_rule_sets().await.unwrap();
    let groups: Vec<&str> = loaded[0]
        .report
        .rules
        .iter()
        .map(|r| r.group_name.as_str())
        .collect();
    assert_eq!(groups, vec!["a", "b"]);
}

#[tokio::test]
async fn test_remote_subscription_from_cache() {
    let dir = TempDir::new().unwrap();
    // Nothing listens here; the rule-set loads from the cached copy alone
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let url = format!("http://127.0.0.1:{}/shop.json", port);
    write_file(
        dir.path(),
        "tapflow.yaml",
        &format!("rule_sets:\n  - id: shopping\n    subscription_urls: [\"{}\"]\n", url),
    );
    let config = EngineConfig::load(dir.path().join("tapflow.yaml")).unwrap();

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let fetcher = SubscriptionFetcher::with_client(
        client,
        config.subscription_cache_dir(),
        Duration::ZERO,
    );
    let cache_file = fetcher.cache_path(&url);
    fs::create_dir_all(cache_file.parent().unwrap()).unwrap();
    fs::write(&cache_file, SUBSCRIPTION).unwrap();

    let loaded = config.load_rule_sets_with(&fetcher).await.unwrap();
    assert_eq!(loaded[0].report.rules.len(), 1);
    assert_eq!(
        loaded[0].report.rules[0].app_id.as_deref(),
        Some("com.example.shop")
    );

    fs::remove_file(&cache_file).unwrap();
    assert!(matches!(
        config.load_rule_sets_with(&fetcher).await,
        Err(ConfigError::Fetch { .. })
    ));
}
