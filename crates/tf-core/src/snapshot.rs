//! Snapshot of the foreground UI
//!
//! A [`Snapshot`] stores its elements in a flat arena in pre-order, so a
//! node's descendants always occupy the contiguous id range right after it.
//! [`NodeRef`] is the borrowed handle selectors walk the tree with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use thiserror::Error;

use crate::node::{AttrValue, Node, StableId};

/// Deepest element tree accepted from a producer
pub const MAX_TREE_DEPTH: usize = 256;

/// Snapshot construction errors
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Element tree exceeds maximum depth of {0}")]
    TooDeep(usize),

    #[error("Snapshot record has no element tree")]
    EmptyTree,

    #[error("Snapshot record has no foreground package")]
    MissingPackage,
}

/// Result type for snapshot operations
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Index of a node within its snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// The root of every snapshot
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

/// Nested element tree as delivered by a snapshot producer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementTree {
    #[serde(flatten)]
    pub node: Node,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ElementTree>,
}

impl ElementTree {
    /// A tree consisting of a single element
    pub fn leaf(node: Node) -> Self {
        Self {
            node,
            children: Vec::new(),
        }
    }

    /// Append a child subtree
    pub fn child(mut self, child: impl Into<ElementTree>) -> Self {
        self.children.push(child.into());
        self
    }
}

impl From<Node> for ElementTree {
    fn from(node: Node) -> Self {
        Self::leaf(node)
    }
}

/// One line of a recorded snapshot stream
///
/// A record without a package is the producer's "no foreground app" signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    #[serde(default, alias = "foreground_package")]
    pub package: Option<String>,

    #[serde(default, alias = "foreground_activity")]
    pub activity: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub root: Option<ElementTree>,
}

impl SnapshotRecord {
    /// Whether this record signals that no foreground app is resolvable
    pub fn is_absent(&self) -> bool {
        self.package.as_deref().map_or(true, str::is_empty)
    }

    /// Build the snapshot this record describes
    pub fn into_snapshot(self) -> SnapshotResult<Snapshot> {
        let package = self
            .package
            .filter(|p| !p.is_empty())
            .ok_or(SnapshotError::MissingPackage)?;
        let root = self.root.ok_or(SnapshotError::EmptyTree)?;
        let snapshot = Snapshot::new(package, self.activity, root)?;
        Ok(match self.captured_at {
            Some(at) => snapshot.with_captured_at(at),
            None => snapshot,
        })
    }
}

#[derive(Debug, Clone)]
struct Entry {
    node: Node,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    index: usize,
    /// Exclusive end of this node's pre-order subtree range
    end: usize,
}

/// One observed state of the foreground UI
#[derive(Debug, Clone)]
pub struct Snapshot {
    foreground_package: String,
    foreground_activity: Option<String>,
    captured_at: DateTime<Utc>,
    entries: Vec<Entry>,
}

impl Snapshot {
    /// Flatten an element tree into a snapshot
    ///
    /// `depth` and `child_count` are recomputed from the tree shape, and
    /// missing stable ids are derived from each element's attributes.
    pub fn new(
        package: impl Into<String>,
        activity: Option<String>,
        tree: ElementTree,
    ) -> SnapshotResult<Self> {
        let mut entries: Vec<Entry> = Vec::new();
        let mut stack: Vec<(ElementTree, Option<NodeId>, usize, usize)> = vec![(tree, None, 0, 0)];

        while let Some((subtree, parent, index, depth)) = stack.pop() {
            if depth > MAX_TREE_DEPTH {
                return Err(SnapshotError::TooDeep(MAX_TREE_DEPTH));
            }

            let id = NodeId(entries.len());
            let ElementTree { mut node, children } = subtree;
            node.depth = depth;
            node.child_count = children.len();
            if node.stable_id.is_none() {
                node.stable_id = Some(StableId::derive(&node, index));
            }

            if let Some(parent) = parent {
                entries[parent.0].children.push(id);
            }
            entries.push(Entry {
                node,
                parent,
                children: Vec::with_capacity(children.len()),
                index,
                end: id.0 + 1,
            });

            // Reverse push so children pop, and therefore number, in order
            for (i, child) in children.into_iter().enumerate().rev() {
                stack.push((child, Some(id), i, depth + 1));
            }
        }

        for i in (0..entries.len()).rev() {
            if let Some(&last) = entries[i].children.last() {
                entries[i].end = entries[last.0].end;
            }
        }

        Ok(Self {
            foreground_package: package.into(),
            foreground_activity: activity,
            captured_at: Utc::now(),
            entries,
        })
    }

    /// Override the capture time
    pub fn with_captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }

    pub fn foreground_package(&self) -> &str {
        &self.foreground_package
    }

    pub fn foreground_activity(&self) -> Option<&str> {
        self.foreground_activity.as_deref()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// The root element
    pub fn root(&self) -> NodeRef<'_> {
        NodeRef {
            snapshot: self,
            id: NodeId::ROOT,
        }
    }

    /// Handle for a node id, if it belongs to this snapshot
    pub fn get(&self, id: NodeId) -> Option<NodeRef<'_>> {
        (id.0 < self.entries.len()).then_some(NodeRef { snapshot: self, id })
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All elements in pre-order, root first
    pub fn iter(&self) -> impl Iterator<Item = NodeRef<'_>> + '_ {
        (0..self.entries.len()).map(move |i| NodeRef {
            snapshot: self,
            id: NodeId(i),
        })
    }

    /// Find the element with the given stable id
    pub fn find_stable(&self, stable_id: StableId) -> Option<NodeRef<'_>> {
        self.iter().find(|n| n.stable_id == Some(stable_id))
    }

    fn entry(&self, id: NodeId) -> &Entry {
        &self.entries[id.0]
    }
}

/// Borrowed handle to a node and its position in a snapshot
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    snapshot: &'a Snapshot,
    id: NodeId,
}

impl<'a> NodeRef<'a> {
    fn at(&self, id: NodeId) -> NodeRef<'a> {
        NodeRef {
            snapshot: self.snapshot,
            id,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The underlying node with the snapshot's lifetime
    pub fn node(&self) -> &'a Node {
        &self.snapshot.entry(self.id).node
    }

    pub fn snapshot(&self) -> &'a Snapshot {
        self.snapshot
    }

    pub fn parent(&self) -> Option<NodeRef<'a>> {
        self.snapshot.entry(self.id).parent.map(|p| self.at(p))
    }

    /// Direct children, in order
    pub fn children(&self) -> impl DoubleEndedIterator<Item = NodeRef<'a>> + 'a {
        let snapshot = self.snapshot;
        snapshot
            .entry(self.id)
            .children
            .iter()
            .map(move |&id| NodeRef { snapshot, id })
    }

    /// The `i`-th child (0-based)
    pub fn child(&self, i: usize) -> Option<NodeRef<'a>> {
        self.snapshot
            .entry(self.id)
            .children
            .get(i)
            .map(|&c| self.at(c))
    }

    /// Position among the parent's children (0 for the root)
    pub fn index(&self) -> usize {
        self.snapshot.entry(self.id).index
    }

    /// Sibling immediately before this node
    pub fn prev_sibling(&self) -> Option<NodeRef<'a>> {
        self.sibling_at(self.index().checked_sub(1)?)
    }

    /// Sibling immediately after this node
    pub fn next_sibling(&self) -> Option<NodeRef<'a>> {
        self.sibling_at(self.index() + 1)
    }

    /// The parent's `i`-th child
    pub fn sibling_at(&self, i: usize) -> Option<NodeRef<'a>> {
        self.parent()?.child(i)
    }

    /// Proper ancestors, nearest first
    pub fn ancestors(&self) -> Ancestors<'a> {
        Ancestors {
            next: self.parent(),
        }
    }

    /// Proper descendants in pre-order
    pub fn descendants(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        let snapshot = self.snapshot;
        let end = snapshot.entry(self.id).end;
        (self.id.0 + 1..end).map(move |i| NodeRef {
            snapshot,
            id: NodeId(i),
        })
    }

    /// Whether `self` is a proper ancestor of `other`
    pub fn is_ancestor_of(&self, other: &NodeRef<'_>) -> bool {
        other.id.0 > self.id.0 && other.id.0 < self.snapshot.entry(self.id).end
    }

    /// Attribute lookup including position-dependent attributes
    pub fn attr(&self, name: &str) -> Option<AttrValue<'a>> {
        match name {
            "index" => Some(AttrValue::Int(self.index() as i64)),
            _ => self.node().attribute(name),
        }
    }
}

impl Deref for NodeRef<'_> {
    type Target = Node;

    fn deref(&self) -> &Node {
        self.node()
    }
}

impl PartialEq for NodeRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.snapshot, other.snapshot) && self.id == other.id
    }
}

impl Eq for NodeRef<'_> {}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("id", &self.id.0)
            .field("node", &self.label())
            .finish()
    }
}

/// Iterator over a node's ancestors
pub struct Ancestors<'a> {
    next: Option<NodeRef<'a>>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = NodeRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent();
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        // FrameLayout
        // ├── LinearLayout
        // │   ├── TextView "title"
        // │   └── Button "OK"
        // └── ImageView
        let tree = ElementTree::leaf(Node::with_class("android.widget.FrameLayout"))
            .child(
                ElementTree::leaf(Node::with_class("android.widget.LinearLayout"))
                    .child(Node::with_class("android.widget.TextView").text("title"))
                    .child(Node::with_class("android.widget.Button").text("OK")),
            )
            .child(Node::with_class("android.widget.ImageView"));
        Snapshot::new("com.example", Some(".MainActivity".into()), tree).unwrap()
    }

    #[test]
    fn test_flatten_preorder() {
        let snap = sample();
        let names: Vec<_> = snap
            .iter()
            .map(|n| n.simple_class_name().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            ["FrameLayout", "LinearLayout", "TextView", "Button", "ImageView"]
        );
        assert_eq!(snap.len(), 5);
        assert_eq!(snap.foreground_package(), "com.example");
    }

    #[test]
    fn test_depth_and_child_count_recomputed() {
        let mut lying = Node::with_class("Root");
        lying.depth = 42;
        lying.child_count = 9;
        let snap = Snapshot::new("p", None, ElementTree::leaf(lying).child(Node::with_class("A")))
            .unwrap();

        assert_eq!(snap.root().depth, 0);
        assert_eq!(snap.root().child_count, 1);
        assert_eq!(snap.root().child(0).unwrap().depth, 1);
    }

    #[test]
    fn test_navigation() {
        let snap = sample();
        let button = snap.iter().find(|n| n.text.as_deref() == Some("OK")).unwrap();

        assert_eq!(button.index(), 1);
        assert_eq!(button.prev_sibling().unwrap().text.as_deref(), Some("title"));
        assert!(button.next_sibling().is_none());

        let ancestors: Vec<_> = button
            .ancestors()
            .map(|n| n.simple_class_name().unwrap().to_string())
            .collect();
        assert_eq!(ancestors, ["LinearLayout", "FrameLayout"]);

        let root = snap.root();
        assert_eq!(root.descendants().count(), 4);
        assert!(root.is_ancestor_of(&button));
        assert!(!button.is_ancestor_of(&root));

        let layout = root.child(0).unwrap();
        assert_eq!(layout.descendants().count(), 2);
        assert_eq!(layout.children().count(), 2);
    }

    #[test]
    fn test_stable_id_derived_and_kept() {
        let tree = ElementTree::leaf(Node::with_class("Root"))
            .child(Node::with_class("A").stable_id(7))
            .child(Node::with_class("B"));
        let a = Snapshot::new("p", None, tree.clone()).unwrap();
        let b = Snapshot::new("p", None, tree).unwrap();

        assert_eq!(a.root().child(0).unwrap().stable_id, Some(StableId(7)));
        assert!(a.root().child(1).unwrap().stable_id.is_some());
        assert_eq!(
            a.root().child(1).unwrap().stable_id,
            b.root().child(1).unwrap().stable_id
        );
        assert!(a.find_stable(StableId(7)).is_some());
    }

    #[test]
    fn test_too_deep() {
        let mut tree = ElementTree::leaf(Node::with_class("Leaf"));
        for _ in 0..=MAX_TREE_DEPTH {
            tree = ElementTree::leaf(Node::with_class("Wrap")).child(tree);
        }
        assert!(matches!(
            Snapshot::new("p", None, tree),
            Err(SnapshotError::TooDeep(_))
        ));
    }

    #[test]
    fn test_index_attribute() {
        let snap = sample();
        let image = snap.root().child(1).unwrap();
        assert_eq!(image.attr("index"), Some(AttrValue::Int(1)));
        assert_eq!(image.attr("depth"), Some(AttrValue::Int(1)));
    }

    #[test]
    fn test_record_deserialize() {
        let json = r#"{
            "package": "com.example",
            "activity": ".SplashActivity",
            "root": {
                "class_name": "android.widget.FrameLayout",
                "children": [
                    {"class_name": "android.widget.TextView", "text": "跳过", "clickable": true}
                ]
            }
        }"#;

        let record: SnapshotRecord = serde_json::from_str(json).unwrap();
        assert!(!record.is_absent());
        let snap = record.into_snapshot().unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.foreground_activity(), Some(".SplashActivity"));
        let text = snap.root().child(0).unwrap();
        assert!(text.clickable);
        assert_eq!(text.text.as_deref(), Some("跳过"));

        let absent: SnapshotRecord = serde_json::from_str(r#"{"package": null}"#).unwrap();
        assert!(absent.is_absent());
        assert!(matches!(
            absent.into_snapshot(),
            Err(SnapshotError::MissingPackage)
        ));
    }
}
