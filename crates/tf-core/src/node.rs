//! UI element node type

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::VIEW_ID_SEPARATOR;

/// Identifier of a physical UI element, stable across snapshots
///
/// The snapshot producer normally supplies it (e.g. the accessibility node's
/// unique id). When it does not, [`StableId::derive`] builds one from the
/// element's identifying attributes and tree position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StableId(pub u64);

impl StableId {
    /// Derive an id from the attributes that identify an element on screen
    ///
    /// Derived ids use the std hasher, whose output is only guaranteed within
    /// one process: they de-duplicate matches across the snapshots of a run
    /// but must not be persisted or compared across builds.
    pub fn derive(node: &Node, index_in_parent: usize) -> Self {
        let mut hasher = DefaultHasher::new();
        node.class_name.hash(&mut hasher);
        node.view_id.hash(&mut hasher);
        node.bounds.hash(&mut hasher);
        node.depth.hash(&mut hasher);
        index_in_parent.hash(&mut hasher);
        Self(hasher.finish())
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Screen rectangle of an element
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    /// Create bounds from edges
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> i32 {
        self.bottom.saturating_sub(self.top)
    }

    /// Center point `(x, y)`
    pub fn center(&self) -> (i32, i32) {
        (
            self.left.saturating_add(self.width() / 2),
            self.top.saturating_add(self.height() / 2),
        )
    }
}

/// One UI element within a snapshot
///
/// `depth` and `child_count` describe the element's position in its
/// snapshot and are computed when the snapshot is built. Missing flags
/// default to `false`, except `enabled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Node {
    /// Widget class (e.g. `android.widget.Button`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_description: Option<String>,

    /// Full resource id (e.g. `com.example:id/confirm`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_id: Option<String>,

    /// Package owning the element, used to shorten `view_id` into `vid`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,

    pub bounds: Bounds,

    pub clickable: bool,
    pub enabled: bool,
    pub checkable: bool,
    pub checked: bool,
    pub focusable: bool,
    pub focused: bool,
    pub scrollable: bool,
    pub long_clickable: bool,
    pub selected: bool,
    pub editable: bool,

    pub depth: usize,
    pub child_count: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stable_id: Option<StableId>,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            class_name: None,
            text: None,
            content_description: None,
            view_id: None,
            package_name: None,
            bounds: Bounds::default(),
            clickable: false,
            enabled: true,
            checkable: false,
            checked: false,
            focusable: false,
            focused: false,
            scrollable: false,
            long_clickable: false,
            selected: false,
            editable: false,
            depth: 0,
            child_count: 0,
            stable_id: None,
        }
    }
}

impl Node {
    /// Create a node with just a class name
    pub fn with_class(class_name: impl Into<String>) -> Self {
        Self {
            class_name: Some(class_name.into()),
            ..Default::default()
        }
    }

    /// Set the text
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Set the content description
    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.content_description = Some(desc.into());
        self
    }

    /// Set the full view id
    pub fn view_id(mut self, view_id: impl Into<String>) -> Self {
        self.view_id = Some(view_id.into());
        self
    }

    /// Set the bounds
    pub fn bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Set the clickable flag
    pub fn clickable(mut self, clickable: bool) -> Self {
        self.clickable = clickable;
        self
    }

    /// Set the stable id
    pub fn stable_id(mut self, id: u64) -> Self {
        self.stable_id = Some(StableId(id));
        self
    }

    /// Simple class name (the part after the last `.`)
    pub fn simple_class_name(&self) -> Option<&str> {
        self.class_name
            .as_deref()
            .map(|name| name.rsplit('.').next().unwrap_or(name))
    }

    /// Short view id: the part after `:id/` when it belongs to the node's package
    pub fn vid(&self) -> Option<&str> {
        let id = self.view_id.as_deref()?;
        match id.find(VIEW_ID_SEPARATOR) {
            Some(pos) => {
                let owner = &id[..pos];
                match self.package_name.as_deref() {
                    Some(pkg) if pkg != owner => Some(id),
                    _ => Some(&id[pos + VIEW_ID_SEPARATOR.len()..]),
                }
            }
            None => Some(id),
        }
    }

    /// Look up an attribute by the name selectors use for it
    ///
    /// Returns `None` for unknown names and for absent optional attributes.
    /// Position-dependent attributes (`index`) are answered by
    /// [`NodeRef::attr`](crate::NodeRef::attr).
    pub fn attribute(&self, name: &str) -> Option<AttrValue<'_>> {
        fn string(value: &Option<String>) -> Option<AttrValue<'_>> {
            value.as_deref().map(|s| AttrValue::Str(Cow::Borrowed(s)))
        }
        fn length(value: &Option<String>) -> Option<AttrValue<'static>> {
            value
                .as_deref()
                .map(|s| AttrValue::Int(s.chars().count() as i64))
        }

        let value = match name {
            "text" => string(&self.text)?,
            "text.length" => length(&self.text)?,
            "desc" | "contentDescription" | "content_description" => {
                string(&self.content_description)?
            }
            "desc.length" => length(&self.content_description)?,
            "id" | "viewId" | "view_id" => string(&self.view_id)?,
            "vid" => AttrValue::Str(Cow::Borrowed(self.vid()?)),
            "name" | "class" | "className" | "class_name" => string(&self.class_name)?,
            "packageName" | "package_name" => string(&self.package_name)?,

            "clickable" => AttrValue::Bool(self.clickable),
            "enabled" => AttrValue::Bool(self.enabled),
            "checkable" => AttrValue::Bool(self.checkable),
            "checked" => AttrValue::Bool(self.checked),
            "focusable" => AttrValue::Bool(self.focusable),
            "focused" => AttrValue::Bool(self.focused),
            "scrollable" => AttrValue::Bool(self.scrollable),
            "longClickable" | "long_clickable" => AttrValue::Bool(self.long_clickable),
            "selected" => AttrValue::Bool(self.selected),
            "editable" => AttrValue::Bool(self.editable),

            "childCount" | "child_count" => AttrValue::Int(self.child_count as i64),
            "depth" => AttrValue::Int(self.depth as i64),
            "left" => AttrValue::Int(self.bounds.left.into()),
            "top" => AttrValue::Int(self.bounds.top.into()),
            "right" => AttrValue::Int(self.bounds.right.into()),
            "bottom" => AttrValue::Int(self.bounds.bottom.into()),
            "width" => AttrValue::Int(self.bounds.width().into()),
            "height" => AttrValue::Int(self.bounds.height().into()),

            "_id" => AttrValue::Str(Cow::Owned(self.stable_id?.0.to_string())),
            _ => return None,
        };
        Some(value)
    }

    /// Human readable label used in logs
    pub fn label(&self) -> String {
        let text = self.text.as_deref().unwrap_or("-");
        match (&self.view_id, &self.class_name) {
            (Some(id), _) if !id.is_empty() => format!("{} ({})", id, text),
            (_, Some(class)) if !class.is_empty() => format!("{} ({})", class, text),
            _ => text.to_string(),
        }
    }
}

/// An attribute value as seen by selectors
///
/// Equality between attribute values is defined on their canonical string
/// form, so `[clickable=true]` and `[clickable='true']` are equivalent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue<'a> {
    Str(Cow<'a, str>),
    Int(i64),
    Bool(bool),
}

impl AttrValue<'_> {
    /// Canonical string form
    pub fn canonical(&self) -> Cow<'_, str> {
        match self {
            AttrValue::Str(s) => Cow::Borrowed(s.as_ref()),
            AttrValue::Int(n) => Cow::Owned(n.to_string()),
            AttrValue::Bool(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
        }
    }

    /// Integer view of this value, if it has one
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(n) => Some(*n),
            AttrValue::Str(s) => s.parse().ok(),
            AttrValue::Bool(_) => None,
        }
    }

    /// Whether the value counts as present for `[attr]` existence tests
    pub fn is_present(&self) -> bool {
        match self {
            AttrValue::Str(s) => !s.is_empty(),
            AttrValue::Int(_) | AttrValue::Bool(_) => true,
        }
    }
}

impl fmt::Display for AttrValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}
