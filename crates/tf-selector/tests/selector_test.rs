//! Selector behaviour over realistic snapshot trees

use tf_core::{ElementTree, Node, Snapshot};
use tf_selector::{Selector, SelectorErrorKind};

fn splash_snapshot() -> Snapshot {
    let json = r#"{
        "class_name": "android.widget.FrameLayout",
        "children": [
            {
                "class_name": "android.widget.RelativeLayout",
                "view_id": "com.example:id/splash",
                "children": [
                    {"class_name": "android.widget.ImageView", "content_description": "ad"},
                    {"class_name": "android.widget.TextView", "text": "跳过", "clickable": true}
                ]
            },
            {
                "class_name": "android.widget.LinearLayout",
                "children": [
                    {"class_name": "android.widget.Button", "text": "确定", "clickable": true},
                    {"class_name": "android.widget.Button", "text": "取消", "clickable": true}
                ]
            }
        ]
    }"#;
    let tree: ElementTree = serde_json::from_str(json).unwrap();
    Snapshot::new("com.example", Some("com.example.SplashActivity".into()), tree).unwrap()
}

#[test]
fn test_class_term_ignores_other_attributes() {
    // Same class, every attribute different: a class-only term matches both
    let tree = ElementTree::leaf(Node::with_class("Root"))
        .child(Node::with_class("android.widget.Button").text("a").clickable(true))
        .child(Node::with_class("android.widget.Button").desc("b"))
        .child(Node::with_class("android.widget.TextView").text("a"));
    let snap = Snapshot::new("p", None, tree).unwrap();

    let selector = Selector::parse("@android.widget.Button").unwrap();
    let found = selector.query_all(&snap);
    assert_eq!(found.len(), 2);
    for node in snap.iter() {
        let expected = node.class_name.as_deref() == Some("android.widget.Button");
        assert_eq!(selector.match_node(node).is_some(), expected);
    }
}

#[test]
fn test_descendant_requires_matching_proper_ancestor() {
    let snap = splash_snapshot();
    let selector = Selector::parse("RelativeLayout TextView").unwrap();
    let leaf = Selector::parse("TextView").unwrap();
    let ancestor = Selector::parse("RelativeLayout").unwrap();

    for node in snap.iter() {
        let b_matches = leaf.match_node(node).is_some();
        let a_above = node.ancestors().any(|a| ancestor.match_node(a).is_some());
        assert_eq!(selector.match_node(node).is_some(), b_matches && a_above);
    }

    // A node is not its own ancestor
    let self_only = Selector::parse("TextView TextView").unwrap();
    assert!(self_only.query_first(&snap).is_none());
}

#[test]
fn test_compiling_twice_matches_identically() {
    let snap = splash_snapshot();
    let text = "[vid='splash'] > TextView[text='跳过'][clickable=true]";
    let a: Selector = text.parse().unwrap();
    let b: Selector = text.parse().unwrap();

    assert_eq!(a, b);
    let ids_a: Vec<_> = a.query_all(&snap).iter().map(|n| n.id()).collect();
    let ids_b: Vec<_> = b.query_all(&snap).iter().map(|n| n.id()).collect();
    assert_eq!(ids_a, ids_b);
    assert_eq!(ids_a.len(), 1);
}

#[test]
fn test_selector_serde_roundtrip_uses_canonical_text() {
    let selector: Selector = serde_json::from_str(r#""Button[ text = '确定' ]""#).unwrap();
    assert_eq!(
        serde_json::to_string(&selector).unwrap(),
        r#""Button[text='确定']""#
    );

    let err = serde_json::from_str::<Selector>(r#""Button[text=""#).unwrap_err();
    assert!(err.to_string().contains("index"));
}

#[test]
fn test_error_reports_offset() {
    let err = Selector::parse("TextView[text='跳过'] >> Button").unwrap_err();
    assert_eq!(err.kind, SelectorErrorKind::EmptyTerm);
    assert_eq!(err.index, "TextView[text='跳过'] >".len());
}

#[test]
fn test_selector_is_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync + Clone>() {}
    assert_send_sync::<Selector>();

    let selector = Selector::parse("Button[text='确定']").unwrap();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let selector = selector.clone();
            std::thread::spawn(move || {
                let snap = splash_snapshot();
                selector.query_first(&snap).map(|n| n.text.clone())
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), Some(Some("确定".to_string())));
    }
}
