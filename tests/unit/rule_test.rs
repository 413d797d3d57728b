//! Tests for scheduling rules

use std::sync::Arc;

use prometheus_jobs::core::rule::{conflicts, contains};
use prometheus_jobs::{IdentityRule, MultiRule, PathRule, RuleRef};

#[test]
fn test_path_rule_hierarchy() {
    let root = PathRule::shared("/");
    let project = PathRule::shared("/project");
    let src = PathRule::shared("/project/src");
    let other = PathRule::shared("/other");

    assert!(contains(root.as_ref(), src.as_ref()));
    assert!(contains(project.as_ref(), src.as_ref()));
    assert!(!contains(src.as_ref(), project.as_ref()));
    assert!(conflicts(src.as_ref(), project.as_ref()));
    assert!(conflicts(project.as_ref(), src.as_ref()));
    assert!(!conflicts(project.as_ref(), other.as_ref()));
}

#[test]
fn test_identity_rule_conflicts_only_with_itself() {
    let a = IdentityRule::shared("a");
    let twin = IdentityRule::shared("a");
    assert!(conflicts(a.as_ref(), a.as_ref()));
    assert!(!conflicts(a.as_ref(), twin.as_ref()));
    assert!(!conflicts(a.as_ref(), PathRule::shared("/a").as_ref()));
}

#[test]
fn test_multi_rule_conflicts_through_children() {
    let multi: RuleRef = Arc::new(MultiRule::new([
        PathRule::shared("/a"),
        PathRule::shared("/b"),
    ]));
    assert!(conflicts(multi.as_ref(), PathRule::shared("/b/c").as_ref()));
    assert!(conflicts(PathRule::shared("/a").as_ref(), multi.as_ref()));
    assert!(!conflicts(multi.as_ref(), PathRule::shared("/c").as_ref()));
}

#[test]
fn test_combine_optional_rules() {
    let a = PathRule::shared("/a");
    let sub = PathRule::shared("/a/x");
    let b = PathRule::shared("/b");

    assert!(MultiRule::combine(None, None).is_none());
    let only = MultiRule::combine(Some(Arc::clone(&a)), None).unwrap();
    assert!(Arc::ptr_eq(&only, &a));
    let container = MultiRule::combine(Some(Arc::clone(&sub)), Some(Arc::clone(&a))).unwrap();
    assert!(Arc::ptr_eq(&container, &a));

    let both = MultiRule::combine(Some(Arc::clone(&a)), Some(Arc::clone(&b))).unwrap();
    assert!(contains(both.as_ref(), a.as_ref()));
    assert!(contains(both.as_ref(), b.as_ref()));
}

