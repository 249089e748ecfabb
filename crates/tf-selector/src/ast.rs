//! Compiled selector representation

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::SelectorError;

/// A compiled selector
///
/// Terms are stored left to right; `relations[i]` links `terms[i]` to
/// `terms[i + 1]`. Matching starts at the rightmost term.
#[derive(Debug, Clone)]
pub struct Selector {
    pub(crate) terms: Vec<Term>,
    pub(crate) relations: Vec<Relation>,
    pub(crate) target: usize,
    pub(crate) explicit_target: bool,
    pub(crate) source: String,
}

impl Selector {
    /// Compile a selector from its text form
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        crate::parser::parse(input)
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Index of the term whose node a match returns
    pub fn target_index(&self) -> usize {
        self.target
    }

    /// Canonical source text
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub(crate) fn build(
        terms: Vec<Term>,
        relations: Vec<Relation>,
        target: Option<usize>,
    ) -> Self {
        let explicit_target = target.is_some();
        let target = target.unwrap_or(terms.len().saturating_sub(1));
        let mut selector = Self {
            terms,
            relations,
            target,
            explicit_target,
            source: String::new(),
        };
        selector.source = selector.render();
        selector
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                match &self.relations[i - 1] {
                    Relation::Descendant => out.push(' '),
                    relation => {
                        out.push(' ');
                        out.push_str(&relation.to_string());
                        out.push(' ');
                    }
                }
            }
            if self.explicit_target && i == self.target {
                out.push('@');
            }
            out.push_str(&term.to_string());
        }
        out
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Selector {}

impl std::hash::Hash for Selector {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Selector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Selector::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Tree relation between two adjacent terms
///
/// Read `A <relation> B` with `B` already matched; the relation says where
/// to look for `A`. Numbered forms count from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// `A B`: `A` is any ancestor of `B`
    Descendant,
    /// `A > B` / `A >n B`: `A` is the parent (n-th ancestor) of `B`
    Parent(usize),
    /// `A < B`: `A` is any child of `B`; `A <n B`: `A` is the n-th child
    Child(Option<usize>),
    /// `A + B` / `A +n B`: `A` is the n-th sibling before `B`
    Preceding(usize),
    /// `A - B` / `A -n B`: `A` is the n-th sibling after `B`
    Following(usize),
    /// `A ~ B`: `A` is any sibling before `B`
    AnyPreceding,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::Descendant => f.write_str(" "),
            Relation::Parent(1) => f.write_str(">"),
            Relation::Parent(n) => write!(f, ">{}", n),
            Relation::Child(None) => f.write_str("<"),
            Relation::Child(Some(n)) => write!(f, "<{}", n),
            Relation::Preceding(1) => f.write_str("+"),
            Relation::Preceding(n) => write!(f, "+{}", n),
            Relation::Following(1) => f.write_str("-"),
            Relation::Following(n) => write!(f, "-{}", n),
            Relation::AnyPreceding => f.write_str("~"),
        }
    }
}

/// Class name part of a term
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameMatch {
    /// `*` or no name at all
    Any,
    /// A class name; without a `.` it also matches the simple class name
    Class(String),
}

impl NameMatch {
    pub fn matches(&self, class_name: Option<&str>) -> bool {
        match self {
            NameMatch::Any => true,
            NameMatch::Class(name) => match class_name {
                Some(class) if class == name => true,
                Some(class) if !name.contains('.') => {
                    class.rsplit('.').next().map_or(false, |simple| simple == name)
                }
                _ => false,
            },
        }
    }
}

/// One element description: a class name plus bracketed predicates
#[derive(Debug, Clone)]
pub struct Term {
    pub name: NameMatch,
    pub predicates: Vec<Expr>,
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            NameMatch::Class(name) => f.write_str(name)?,
            NameMatch::Any if self.predicates.is_empty() => f.write_str("*")?,
            NameMatch::Any => {}
        }
        for predicate in &self.predicates {
            write!(f, "[{}]", predicate)?;
        }
        Ok(())
    }
}

/// Predicate expression inside `[...]`
#[derive(Debug, Clone)]
pub enum Expr {
    /// `[attr]`
    Exists(String),
    /// `[attr op value]`
    Compare { attr: String, op: Op, value: Value },
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>, in_and: bool) -> fmt::Result {
        match self {
            Expr::Exists(attr) => f.write_str(attr),
            Expr::Compare { attr, op, value } => write!(f, "{}{}{}", attr, op, value),
            Expr::And(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" && ")?;
                    }
                    item.fmt_nested(f, true)?;
                }
                Ok(())
            }
            Expr::Or(items) => {
                if in_and {
                    f.write_str("(")?;
                }
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" || ")?;
                    }
                    item.fmt_nested(f, false)?;
                }
                if in_and {
                    f.write_str(")")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_nested(f, false)
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    NotEq,
    StartsWith,
    NotStartsWith,
    Contains,
    NotContains,
    EndsWith,
    NotEndsWith,
    Matches,
    NotMatches,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Op {
    /// Every operator, longest token first so prefix scanning is greedy
    pub(crate) const ALL: [Op; 14] = [
        Op::NotStartsWith,
        Op::NotContains,
        Op::NotEndsWith,
        Op::NotMatches,
        Op::NotEq,
        Op::StartsWith,
        Op::Contains,
        Op::EndsWith,
        Op::Matches,
        Op::Le,
        Op::Ge,
        Op::Eq,
        Op::Lt,
        Op::Gt,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::NotEq => "!=",
            Op::StartsWith => "^=",
            Op::NotStartsWith => "!^=",
            Op::Contains => "*=",
            Op::NotContains => "!*=",
            Op::EndsWith => "$=",
            Op::NotEndsWith => "!$=",
            Op::Matches => "~=",
            Op::NotMatches => "!~=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
        }
    }

    /// The positive form of a negated operator
    pub fn positive(self) -> Option<Op> {
        match self {
            Op::NotEq => Some(Op::Eq),
            Op::NotStartsWith => Some(Op::StartsWith),
            Op::NotContains => Some(Op::Contains),
            Op::NotEndsWith => Some(Op::EndsWith),
            Op::NotMatches => Some(Op::Matches),
            _ => None,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Right-hand side of a comparison
#[derive(Debug, Clone)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    Null,
    /// Pattern for `~=`; compiled anchored so it must match the whole value
    Regex { source: String, regex: Regex },
}

impl Value {
    /// Canonical string form used for equality
    pub fn canonical(&self) -> Option<std::borrow::Cow<'_, str>> {
        use std::borrow::Cow;
        match self {
            Value::Str(s) => Some(Cow::Borrowed(s.as_str())),
            Value::Int(n) => Some(Cow::Owned(n.to_string())),
            Value::Bool(b) => Some(Cow::Borrowed(if *b { "true" } else { "false" })),
            Value::Null => None,
            Value::Regex { source, .. } => Some(Cow::Borrowed(source.as_str())),
        }
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("'")?;
    for c in s.chars() {
        match c {
            '\'' => f.write_str("\\'")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            c => write!(f, "{}", c)?,
        }
    }
    f.write_str("'")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write_quoted(f, s),
            Value::Regex { source, .. } => write_quoted(f, source),
            Value::Int(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Null => f.write_str("null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_match() {
        let simple = NameMatch::Class("Button".into());
        assert!(simple.matches(Some("android.widget.Button")));
        assert!(simple.matches(Some("Button")));
        assert!(!simple.matches(Some("android.widget.ImageButton")));
        assert!(!simple.matches(None));

        let qualified = NameMatch::Class("android.widget.Button".into());
        assert!(qualified.matches(Some("android.widget.Button")));
        assert!(!qualified.matches(Some("Button")));

        assert!(NameMatch::Any.matches(None));
    }

    #[test]
    fn test_relation_display() {
        assert_eq!(Relation::Parent(1).to_string(), ">");
        assert_eq!(Relation::Parent(3).to_string(), ">3");
        assert_eq!(Relation::Child(None).to_string(), "<");
        assert_eq!(Relation::Child(Some(2)).to_string(), "<2");
        assert_eq!(Relation::Following(1).to_string(), "-");
    }

    #[test]
    fn test_op_positive() {
        assert_eq!(Op::NotContains.positive(), Some(Op::Contains));
        assert_eq!(Op::Eq.positive(), None);
        assert_eq!(Op::Ge.positive(), None);
    }
}
