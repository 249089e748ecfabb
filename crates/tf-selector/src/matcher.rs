//! Selector evaluation against snapshot trees
//!
//! Matching starts by testing the rightmost term against an anchor node and
//! then walks leftwards through the relations, trying candidates nearest
//! first and backtracking when a later term fails.

use std::cmp::Ordering;
use std::collections::HashSet;

use tf_core::{AttrValue, NodeRef, Snapshot};

use crate::ast::{Expr, Op, Relation, Selector, Term, Value};

/// Options for querying a whole snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Only try the snapshot root as anchor
    pub match_root: bool,
}

impl Selector {
    /// Match with `anchor` as the node tested against the rightmost term
    ///
    /// Returns the node matched by the target term (the `@` term, or the
    /// anchor itself when no term is marked).
    pub fn match_node<'a>(&self, anchor: NodeRef<'a>) -> Option<NodeRef<'a>> {
        let last = self.terms.len().checked_sub(1)?;
        let mut chain = vec![None; self.terms.len()];
        if self.match_from(last, anchor, &mut chain) {
            chain[self.target]
        } else {
            None
        }
    }

    /// Whether any node of the snapshot matches
    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        self.query_first(snapshot).is_some()
    }

    /// First match, trying anchors in pre-order
    pub fn query_first<'a>(&self, snapshot: &'a Snapshot) -> Option<NodeRef<'a>> {
        self.query_first_with(snapshot, QueryOptions::default())
    }

    pub fn query_first_with<'a>(
        &self,
        snapshot: &'a Snapshot,
        options: QueryOptions,
    ) -> Option<NodeRef<'a>> {
        if options.match_root {
            return self.match_node(snapshot.root());
        }
        snapshot.iter().find_map(|anchor| self.match_node(anchor))
    }

    /// All distinct matches, in anchor pre-order
    pub fn query_all<'a>(&self, snapshot: &'a Snapshot) -> Vec<NodeRef<'a>> {
        self.query_all_with(snapshot, QueryOptions::default())
    }

    pub fn query_all_with<'a>(
        &self,
        snapshot: &'a Snapshot,
        options: QueryOptions,
    ) -> Vec<NodeRef<'a>> {
        if options.match_root {
            return self.match_node(snapshot.root()).into_iter().collect();
        }
        let mut seen = HashSet::new();
        snapshot
            .iter()
            .filter_map(|anchor| self.match_node(anchor))
            .filter(|found| seen.insert(found.id()))
            .collect()
    }

    fn match_from<'a>(
        &self,
        index: usize,
        node: NodeRef<'a>,
        chain: &mut [Option<NodeRef<'a>>],
    ) -> bool {
        if !self.terms[index].matches(&node) {
            return false;
        }
        chain[index] = Some(node);
        if index == 0 {
            return true;
        }

        candidates(self.relations[index - 1], node)
            .into_iter()
            .any(|candidate| self.match_from(index - 1, candidate, chain))
    }
}

/// Nodes that may satisfy the term left of `relation`, nearest first
fn candidates(relation: Relation, node: NodeRef<'_>) -> Vec<NodeRef<'_>> {
    match relation {
        Relation::Descendant => node.ancestors().collect(),
        Relation::Parent(n) => node.ancestors().nth(n - 1).into_iter().collect(),
        Relation::Child(None) => node.children().collect(),
        Relation::Child(Some(n)) => node.child(n - 1).into_iter().collect(),
        Relation::Preceding(n) => node
            .index()
            .checked_sub(n)
            .and_then(|i| node.sibling_at(i))
            .into_iter()
            .collect(),
        Relation::Following(n) => node.sibling_at(node.index() + n).into_iter().collect(),
        Relation::AnyPreceding => (0..node.index())
            .rev()
            .filter_map(|i| node.sibling_at(i))
            .collect(),
    }
}

impl Term {
    /// Whether `node` satisfies this term on its own
    pub fn matches(&self, node: &NodeRef<'_>) -> bool {
        self.name.matches(node.class_name.as_deref())
            && self.predicates.iter().all(|p| p.eval(node))
    }
}

impl Expr {
    pub fn eval(&self, node: &NodeRef<'_>) -> bool {
        match self {
            Expr::Exists(attr) => node.attr(attr).map_or(false, |v| v.is_present()),
            Expr::Compare { attr, op, value } => compare(node.attr(attr), *op, value),
            Expr::And(items) => items.iter().all(|e| e.eval(node)),
            Expr::Or(items) => items.iter().any(|e| e.eval(node)),
        }
    }
}

fn compare(actual: Option<AttrValue<'_>>, op: Op, value: &Value) -> bool {
    if let Some(positive) = op.positive() {
        return !compare(actual, positive, value);
    }

    let actual = match (actual, value) {
        (None, Value::Null) => return op == Op::Eq,
        (None, _) | (Some(_), Value::Null) => return false,
        (Some(actual), _) => actual,
    };
    let Some(expected) = value.canonical() else {
        return false;
    };
    let text = actual.canonical();

    match op {
        Op::Eq => text == expected,
        Op::StartsWith => text.starts_with(expected.as_ref()),
        Op::Contains => text.contains(expected.as_ref()),
        Op::EndsWith => text.ends_with(expected.as_ref()),
        Op::Matches => match value {
            Value::Regex { regex, .. } => regex.is_match(&text),
            _ => false,
        },
        Op::Lt | Op::Le | Op::Gt | Op::Ge => {
            let ordering = match (actual.as_int(), value_int(value)) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => text.as_ref().cmp(expected.as_ref()),
            };
            match op {
                Op::Lt => ordering == Ordering::Less,
                Op::Le => ordering != Ordering::Greater,
                Op::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }
        }
        // Negated operators were reduced to their positive form above
        Op::NotEq | Op::NotStartsWith | Op::NotContains | Op::NotEndsWith | Op::NotMatches => {
            false
        }
    }
}

fn value_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(n) => Some(*n),
        Value::Str(s) => s.parse().ok(),
        _ => None,
    }
}
