//! Scheduling rules: the conflict and containment predicates that decide
//! which jobs may run side by side.
//!
//! A rule is a pure capability. Two jobs whose rules conflict never run at
//! the same time; a thread holding a rule may begin any rule it contains
//! without further waiting.
//!
//! The engine never calls [`SchedulingRule::is_conflicting`] or
//! [`SchedulingRule::contains`] directly. It goes through [`conflicts`] and
//! [`contains`], which unfold [`MultiRule`] composites on either side so
//! primitive rules only ever compare against other primitive rules.
//!
//! ```
//! use std::sync::Arc;
//! use prometheus_jobs::core::rule::{self, PathRule, RuleRef};
//!
//! let project: RuleRef = Arc::new(PathRule::new("/project"));
//! let file: RuleRef = Arc::new(PathRule::new("/project/src/lib.rs"));
//!
//! assert!(rule::contains(project.as_ref(), file.as_ref()));
//! assert!(rule::conflicts(file.as_ref(), project.as_ref()));
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Shared handle to a scheduling rule.
pub type RuleRef = Arc<dyn SchedulingRule>;

/// Conflict and containment predicates over scheduling rules.
///
/// Implementations must be symmetric and reflexive in `is_conflicting`, and
/// reflexive and transitive in `contains`. Both methods must be cheap and side
/// effect free: they are evaluated while the scheduler holds its queue lock.
pub trait SchedulingRule: Send + Sync + fmt::Debug + 'static {
    /// True if holding `self` is sufficient cover for also holding `other`.
    fn contains(&self, other: &dyn SchedulingRule) -> bool;

    /// True if jobs holding `self` and `other` must not run concurrently.
    fn is_conflicting(&self, other: &dyn SchedulingRule) -> bool;

    /// Upcast used by implementations to inspect the concrete type of `other`.
    fn as_any(&self) -> &dyn Any;

    /// Children of a composite rule; `None` for primitive rules.
    fn children(&self) -> Option<&[RuleRef]> {
        None
    }
}

fn same_rule(a: &dyn SchedulingRule, b: &dyn SchedulingRule) -> bool {
    std::ptr::addr_eq(a, b)
}

/// Conflict check that unfolds composite rules on either side.
#[must_use]
pub fn conflicts(a: &dyn SchedulingRule, b: &dyn SchedulingRule) -> bool {
    if same_rule(a, b) {
        return true;
    }
    match (a.children(), b.children()) {
        (Some(children), _) => children.iter().any(|c| conflicts(c.as_ref(), b)),
        (None, Some(children)) => children.iter().any(|c| conflicts(a, c.as_ref())),
        (None, None) => a.is_conflicting(b) || b.is_conflicting(a),
    }
}

/// Containment check that unfolds composite rules on either side.
///
/// A composite `b` is contained when every child is contained; a composite
/// `a` contains a primitive `b` when any of its children does.
#[must_use]
pub fn contains(a: &dyn SchedulingRule, b: &dyn SchedulingRule) -> bool {
    if same_rule(a, b) {
        return true;
    }
    if let Some(children) = b.children() {
        return children.iter().all(|c| contains(a, c.as_ref()));
    }
    match a.children() {
        Some(children) => children.iter().any(|c| contains(c.as_ref(), b)),
        None => a.contains(b),
    }
}

/// Short human-readable description used in errors and logs.
#[must_use]
pub fn describe(rule: &dyn SchedulingRule) -> String {
    format!("{rule:?}")
}

/// A rule that conflicts with, and contains, only itself.
///
/// Two `IdentityRule`s built from the same name are still distinct rules:
/// identity is the shared `Arc`, the name is only for diagnostics.
#[derive(Debug, Clone)]
pub struct IdentityRule {
    name: String,
}

impl IdentityRule {
    /// Create a rule with a diagnostic name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Convenience constructor returning a shared handle.
    pub fn shared(name: impl Into<String>) -> RuleRef {
        Arc::new(Self::new(name))
    }

    /// Diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl SchedulingRule for IdentityRule {
    fn contains(&self, other: &dyn SchedulingRule) -> bool {
        same_rule(self, other)
    }

    fn is_conflicting(&self, other: &dyn SchedulingRule) -> bool {
        same_rule(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Hierarchical rule over `/`-separated paths, in the style of workspace
/// resource rules.
///
/// `/a` contains `/a/b`; two path rules conflict when either contains the
/// other. Rules over different types never conflict.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathRule {
    segments: Vec<String>,
}

impl PathRule {
    /// Build a rule from a path such as `"/project/src"`. Empty segments are
    /// ignored, so `"/"` is the root that contains every path.
    #[must_use]
    pub fn new(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    /// Convenience constructor returning a shared handle.
    #[must_use]
    pub fn shared(path: &str) -> RuleRef {
        Arc::new(Self::new(path))
    }

    /// Canonical path string.
    #[must_use]
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    fn is_prefix_of(&self, other: &Self) -> bool {
        other.segments.len() >= self.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }
}

impl SchedulingRule for PathRule {
    fn contains(&self, other: &dyn SchedulingRule) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|other| self.is_prefix_of(other))
    }

    fn is_conflicting(&self, other: &dyn SchedulingRule) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|other| self.is_prefix_of(other) || other.is_prefix_of(self))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Composite rule aggregating several child rules.
///
/// Conflicts with a rule if any child does; contains a rule if the children
/// collectively cover it.
#[derive(Debug, Clone)]
pub struct MultiRule {
    children: Vec<RuleRef>,
}

impl MultiRule {
    /// Build a composite from explicit children. Nested composites are
    /// flattened.
    #[must_use]
    pub fn new(rules: impl IntoIterator<Item = RuleRef>) -> Self {
        let mut children = Vec::new();
        for rule in rules {
            Self::flatten_into(&rule, &mut children);
        }
        Self { children }
    }

    fn flatten_into(rule: &RuleRef, out: &mut Vec<RuleRef>) {
        match rule.children() {
            Some(children) => {
                for child in children {
                    Self::flatten_into(child, out);
                }
            }
            None => out.push(Arc::clone(rule)),
        }
    }

    /// Combine two optional rules into the smallest rule covering both.
    ///
    /// A missing side yields the other; if one side contains the other the
    /// container is returned unchanged; otherwise a flattened composite.
    #[must_use]
    pub fn combine(a: Option<RuleRef>, b: Option<RuleRef>) -> Option<RuleRef> {
        match (a, b) {
            (None, b) => b,
            (a, None) => a,
            (Some(a), Some(b)) => {
                if contains(a.as_ref(), b.as_ref()) {
                    Some(a)
                } else if contains(b.as_ref(), a.as_ref()) {
                    Some(b)
                } else {
                    Some(Arc::new(Self::new([a, b])))
                }
            }
        }
    }

    /// Flattened child rules.
    #[must_use]
    pub fn rules(&self) -> &[RuleRef] {
        &self.children
    }
}

impl SchedulingRule for MultiRule {
    fn contains(&self, other: &dyn SchedulingRule) -> bool {
        contains(self, other)
    }

    fn is_conflicting(&self, other: &dyn SchedulingRule) -> bool {
        conflicts(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn children(&self) -> Option<&[RuleRef]> {
        Some(&self.children)
    }
}
