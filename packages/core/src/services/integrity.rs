//! Integrity checking and rebuild planning for nested-set forests
//!
//! Both functions are pure: they take a full namespace snapshot (as returned
//! by `TreeTransaction::load_all`) and never touch storage. The engine runs
//! them inside its own transaction.

use crate::models::{ordering_key, NodeId, TreeNode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// One broken invariant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum IntegrityViolation {
    /// `left >= right`, or a span of even width
    #[serde(rename_all = "camelCase")]
    InvalidSpan { id: NodeId, left: u64, right: u64 },

    /// The same boundary value is used twice
    #[serde(rename_all = "camelCase")]
    DuplicateBoundary { value: u64, first: NodeId, second: NodeId },

    /// Boundaries are not exactly `1..=2n`
    #[serde(rename_all = "camelCase")]
    NonContiguousNumbering { node_count: u64, max_boundary: u64 },

    /// Two spans partially overlap
    #[serde(rename_all = "camelCase")]
    OverlappingSpans { first: NodeId, second: NodeId },

    /// The child's span does not lie strictly inside its parent's
    #[serde(rename_all = "camelCase")]
    SpanNotNested { id: NodeId, parent_id: NodeId },

    /// The innermost enclosing span is not the node's `parent_id`
    #[serde(rename_all = "camelCase")]
    ParentMismatch {
        id: NodeId,
        parent_id: Option<NodeId>,
        enclosing_id: Option<NodeId>,
    },

    /// Stored depth differs from the `parent_id` chain length
    #[serde(rename_all = "camelCase")]
    DepthMismatch { id: NodeId, stored: u32, expected: u32 },

    /// Siblings are numbered against their `ordering`
    #[serde(rename_all = "camelCase")]
    SiblingOrder { id: NodeId, previous_id: NodeId },

    /// `parent_id` references a node that does not exist
    #[serde(rename_all = "camelCase")]
    DanglingParent { id: NodeId, parent_id: NodeId },

    /// Following `parent_id` from this node never reaches a root
    #[serde(rename_all = "camelCase")]
    ParentCycle { id: NodeId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub namespace: String,
    pub total_nodes: u64,
    pub violations: Vec<IntegrityViolation>,
}

impl IntegrityReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Outcome of `RebuildIntegrity`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub namespace: String,
    pub total_nodes: u64,

    /// Nodes whose numbers or parent reference were rewritten
    pub corrected: u64,

    /// Nodes with a dangling `parent_id` that became roots
    pub orphans_promoted: u64,

    /// `parent_id` cycles broken by promoting one member to a root
    pub cycles_broken: u64,
}

/// Target numbering for one node whose stored state differs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanAssignment {
    pub id: NodeId,
    pub left: u64,
    pub right: u64,
    pub depth: u32,
    pub parent_id: Option<NodeId>,
    pub parent_changed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildPlan {
    pub total_nodes: u64,
    pub assignments: Vec<SpanAssignment>,
    pub orphans_promoted: u64,
    pub cycles_broken: u64,
}

/// Check every structural invariant over a namespace snapshot
pub fn check_invariants(namespace: &str, nodes: &[TreeNode]) -> IntegrityReport {
    let mut violations = Vec::new();
    let by_id: HashMap<&str, &TreeNode> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    let mut ordered: Vec<&TreeNode> = nodes.iter().collect();
    ordered.sort_by(|a, b| a.left.cmp(&b.left).then_with(|| a.id.cmp(&b.id)));

    check_boundaries(&ordered, &mut violations);
    check_nesting(&ordered, &by_id, &mut violations);
    check_parent_chains(&ordered, &by_id, &mut violations);
    check_sibling_order(&ordered, &mut violations);

    IntegrityReport {
        namespace: namespace.to_string(),
        total_nodes: nodes.len() as u64,
        violations,
    }
}

fn check_boundaries(ordered: &[&TreeNode], violations: &mut Vec<IntegrityViolation>) {
    let mut owners: HashMap<u64, &str> = HashMap::new();

    for node in ordered {
        if node.left >= node.right || (node.right - node.left) % 2 == 0 {
            violations.push(IntegrityViolation::InvalidSpan {
                id: node.id.clone(),
                left: node.left,
                right: node.right,
            });
        }

        for value in [node.left, node.right] {
            if let Some(first) = owners.insert(value, &node.id) {
                violations.push(IntegrityViolation::DuplicateBoundary {
                    value,
                    first: first.to_string(),
                    second: node.id.clone(),
                });
            }
        }
    }

    let n = ordered.len() as u64;
    let boundaries: BTreeSet<u64> = owners.keys().copied().collect();
    let contiguous = boundaries.len() as u64 == 2 * n
        && boundaries.first().map_or(true, |&min| min == 1)
        && boundaries.last().map_or(true, |&max| max == 2 * n);

    if !contiguous {
        violations.push(IntegrityViolation::NonContiguousNumbering {
            node_count: n,
            max_boundary: boundaries.last().copied().unwrap_or(0),
        });
    }
}

fn check_nesting(
    ordered: &[&TreeNode],
    by_id: &HashMap<&str, &TreeNode>,
    violations: &mut Vec<IntegrityViolation>,
) {
    let mut open: Vec<&TreeNode> = Vec::new();

    for &node in ordered {
        while open.last().is_some_and(|top| top.right < node.left) {
            open.pop();
        }

        let enclosing = match open.last() {
            Some(top) if node.right > top.right => {
                violations.push(IntegrityViolation::OverlappingSpans {
                    first: top.id.clone(),
                    second: node.id.clone(),
                });
                None
            }
            Some(top) => Some(top.id.as_str()),
            None => None,
        };

        if enclosing != node.parent_id.as_deref() {
            violations.push(IntegrityViolation::ParentMismatch {
                id: node.id.clone(),
                parent_id: node.parent_id.clone(),
                enclosing_id: enclosing.map(str::to_string),
            });
        }

        if let Some(parent) = node.parent_id.as_deref().and_then(|p| by_id.get(p)) {
            if !(parent.left < node.left && node.right < parent.right) {
                violations.push(IntegrityViolation::SpanNotNested {
                    id: node.id.clone(),
                    parent_id: parent.id.clone(),
                });
            }
        }

        open.push(node);
    }
}

enum ChainEnd {
    Root(u32),
    Dangling,
    Cycle,
}

/// Follow `parent_id` references up to a root, giving up after `limit` hops
fn walk_to_root(node: &TreeNode, by_id: &HashMap<&str, &TreeNode>, limit: usize) -> ChainEnd {
    let mut hops: usize = 0;
    let mut current = node;

    while let Some(parent_id) = current.parent_id.as_deref() {
        let Some(&parent) = by_id.get(parent_id) else {
            return ChainEnd::Dangling;
        };
        hops += 1;
        if hops > limit {
            return ChainEnd::Cycle;
        }
        current = parent;
    }

    ChainEnd::Root(hops as u32)
}

fn check_parent_chains(
    ordered: &[&TreeNode],
    by_id: &HashMap<&str, &TreeNode>,
    violations: &mut Vec<IntegrityViolation>,
) {
    for node in ordered {
        match walk_to_root(node, by_id, ordered.len()) {
            ChainEnd::Root(expected) if node.depth != expected => {
                violations.push(IntegrityViolation::DepthMismatch {
                    id: node.id.clone(),
                    stored: node.depth,
                    expected,
                });
            }
            ChainEnd::Root(_) => {}
            ChainEnd::Dangling => {
                // Reported once, at the node holding the broken reference
                if let Some(parent_id) = node.parent_id.as_deref() {
                    if !by_id.contains_key(parent_id) {
                        violations.push(IntegrityViolation::DanglingParent {
                            id: node.id.clone(),
                            parent_id: parent_id.to_string(),
                        });
                    }
                }
            }
            ChainEnd::Cycle => violations.push(IntegrityViolation::ParentCycle {
                id: node.id.clone(),
            }),
        }
    }
}

fn check_sibling_order(ordered: &[&TreeNode], violations: &mut Vec<IntegrityViolation>) {
    let mut last_by_parent: HashMap<Option<&str>, &TreeNode> = HashMap::new();

    for &node in ordered {
        let parent = node.parent_id.as_deref();
        if let Some(previous) = last_by_parent.insert(parent, node) {
            if ordering_key(previous.ordering) > ordering_key(node.ordering) {
                violations.push(IntegrityViolation::SiblingOrder {
                    id: node.id.clone(),
                    previous_id: previous.id.clone(),
                });
            }
        }
    }
}

enum Visit<'a> {
    Enter(&'a str, u32),
    Exit(&'a str),
}

/// Recompute numbering from `parent_id` references with a depth-first walk.
///
/// Siblings are numbered by `(ordering, current left, id)`, so a tree that
/// already satisfies the invariants maps onto itself. Dangling parents are
/// promoted to roots; a `parent_id` cycle is broken by promoting its member
/// with the lowest current left.
pub fn plan_rebuild(nodes: &[TreeNode]) -> RebuildPlan {
    let by_id: HashMap<&str, &TreeNode> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    let mut orphans_promoted = 0;
    let mut effective_parent: HashMap<&str, Option<&str>> = HashMap::new();
    let mut children: HashMap<Option<&str>, Vec<&TreeNode>> = HashMap::new();

    for node in nodes {
        let parent = match node.parent_id.as_deref() {
            Some(p) if by_id.contains_key(p) => Some(p),
            Some(_) => {
                orphans_promoted += 1;
                None
            }
            None => None,
        };
        effective_parent.insert(&node.id, parent);
        children.entry(parent).or_default().push(node);
    }

    for siblings in children.values_mut() {
        siblings.sort_by(|a, b| {
            ordering_key(a.ordering)
                .cmp(&ordering_key(b.ordering))
                .then_with(|| a.left.cmp(&b.left))
                .then_with(|| a.id.cmp(&b.id))
        });
    }

    let mut spans: HashMap<&str, (u64, u64, u32)> = HashMap::new();
    let mut counter: u64 = 1;

    let roots: Vec<&str> = children
        .get(&None)
        .map(|r| r.iter().map(|n| n.id.as_str()).collect())
        .unwrap_or_default();
    for root in roots {
        number_subtree(root, &children, &mut spans, &mut counter);
    }

    // Anything not reached sits on a parent_id cycle
    let mut cycles_broken = 0;
    let mut unvisited: Vec<&TreeNode> = nodes
        .iter()
        .filter(|n| !spans.contains_key(n.id.as_str()))
        .collect();
    unvisited.sort_by(|a, b| a.left.cmp(&b.left).then_with(|| a.id.cmp(&b.id)));

    for node in unvisited {
        if spans.contains_key(node.id.as_str()) {
            continue;
        }
        effective_parent.insert(&node.id, None);
        cycles_broken += 1;
        number_subtree(&node.id, &children, &mut spans, &mut counter);
    }

    let mut assignments = Vec::new();
    for node in nodes {
        let Some(&(left, right, depth)) = spans.get(node.id.as_str()) else {
            continue;
        };
        let parent_id = effective_parent
            .get(node.id.as_str())
            .copied()
            .flatten()
            .map(str::to_string);
        let parent_changed = parent_id != node.parent_id;

        if parent_changed || (left, right, depth) != (node.left, node.right, node.depth) {
            assignments.push(SpanAssignment {
                id: node.id.clone(),
                left,
                right,
                depth,
                parent_id,
                parent_changed,
            });
        }
    }
    assignments.sort_by_key(|a| a.left);

    RebuildPlan {
        total_nodes: nodes.len() as u64,
        assignments,
        orphans_promoted,
        cycles_broken,
    }
}

fn number_subtree<'a>(
    root: &'a str,
    children: &HashMap<Option<&'a str>, Vec<&'a TreeNode>>,
    spans: &mut HashMap<&'a str, (u64, u64, u32)>,
    counter: &mut u64,
) {
    let mut stack = vec![Visit::Enter(root, 0)];

    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Enter(id, depth) => {
                if spans.contains_key(id) {
                    continue;
                }
                spans.insert(id, (*counter, 0, depth));
                *counter += 1;
                stack.push(Visit::Exit(id));

                if let Some(kids) = children.get(&Some(id)) {
                    for &child in kids.iter().rev() {
                        if !spans.contains_key(child.id.as_str()) {
                            stack.push(Visit::Enter(&child.id, depth + 1));
                        }
                    }
                }
            }
            Visit::Exit(id) => {
                if let Some(span) = spans.get_mut(id) {
                    span.1 = *counter;
                }
                *counter += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn node(id: &str, parent: Option<&str>, left: u64, right: u64, depth: u32) -> TreeNode {
        let now = Utc::now();
        TreeNode {
            id: id.to_string(),
            parent_id: parent.map(str::to_string),
            left,
            right,
            depth,
            ordering: None,
            payload: json!({}),
            created_at: now,
            modified_at: now,
        }
    }

    fn valid_forest() -> Vec<TreeNode> {
        vec![
            node("root", None, 1, 6, 0),
            node("b", Some("root"), 2, 5, 1),
            node("a", Some("b"), 3, 4, 2),
            node("other", None, 7, 8, 0),
        ]
    }

    #[test]
    fn test_valid_forest_has_no_violations() {
        let report = check_invariants("taxonomy", &valid_forest());
        assert!(report.is_valid(), "{:?}", report.violations);
        assert_eq!(report.total_nodes, 4);
    }

    #[test]
    fn test_detects_depth_and_gap() {
        let mut nodes = valid_forest();
        nodes[2].depth = 5;
        nodes[3].left = 9;
        nodes[3].right = 10;

        let report = check_invariants("taxonomy", &nodes);
        assert!(report.violations.contains(&IntegrityViolation::DepthMismatch {
            id: "a".to_string(),
            stored: 5,
            expected: 2,
        }));
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, IntegrityViolation::NonContiguousNumbering { .. })));
    }

    #[test]
    fn test_detects_overlap_and_parent_mismatch() {
        let nodes = vec![
            node("x", None, 1, 4, 0),
            node("y", None, 2, 5, 0),
            node("z", Some("x"), 3, 6, 1),
        ];

        let report = check_invariants("menu", &nodes);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, IntegrityViolation::OverlappingSpans { .. })));
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, IntegrityViolation::SpanNotNested { id, .. } if id == "z")));
    }

    #[test]
    fn test_detects_sibling_order() {
        let mut nodes = vec![
            node("p", None, 1, 6, 0),
            node("c1", Some("p"), 2, 3, 1),
            node("c2", Some("p"), 4, 5, 1),
        ];
        nodes[1].ordering = Some(9);
        nodes[2].ordering = Some(1);

        let report = check_invariants("menu", &nodes);
        assert_eq!(
            report.violations,
            vec![IntegrityViolation::SiblingOrder {
                id: "c2".to_string(),
                previous_id: "c1".to_string(),
            }]
        );
    }

    #[test]
    fn test_rebuild_of_valid_forest_is_noop() {
        let plan = plan_rebuild(&valid_forest());
        assert_eq!(plan.total_nodes, 4);
        assert!(plan.assignments.is_empty());
        assert_eq!((plan.orphans_promoted, plan.cycles_broken), (0, 0));
    }

    #[test]
    fn test_rebuild_numbers_unnumbered_rows() {
        let nodes = vec![
            node("root", None, 0, 0, 0),
            node("child", Some("root"), 0, 0, 0),
            node("grandchild", Some("child"), 0, 0, 0),
        ];

        let plan = plan_rebuild(&nodes);
        let spans: Vec<_> = plan
            .assignments
            .iter()
            .map(|a| (a.id.as_str(), a.left, a.right, a.depth))
            .collect();
        assert_eq!(
            spans,
            vec![
                ("root", 1, 6, 0),
                ("child", 2, 5, 1),
                ("grandchild", 3, 4, 2)
            ]
        );
    }

    #[test]
    fn test_rebuild_promotes_orphans_and_breaks_cycles() {
        let nodes = vec![
            node("root", None, 1, 2, 0),
            node("orphan", Some("gone"), 3, 4, 1),
            node("c1", Some("c2"), 5, 6, 0),
            node("c2", Some("c1"), 7, 8, 0),
        ];

        let plan = plan_rebuild(&nodes);
        assert_eq!(plan.orphans_promoted, 1);
        assert_eq!(plan.cycles_broken, 1);

        let c1 = plan.assignments.iter().find(|a| a.id == "c1").unwrap();
        assert_eq!(c1.parent_id, None);
        assert!(c1.parent_changed);
        let c2 = plan.assignments.iter().find(|a| a.id == "c2").unwrap();
        assert_eq!(c2.parent_id.as_deref(), Some("c1"));
        assert_eq!(c2.depth, 1);

        let orphan = plan.assignments.iter().find(|a| a.id == "orphan").unwrap();
        assert_eq!((orphan.left, orphan.right, orphan.depth), (3, 4, 0));
    }

    #[test]
    fn test_cycle_detected_by_check() {
        let nodes = vec![node("c1", Some("c2"), 1, 2, 0), node("c2", Some("c1"), 3, 4, 0)];
        let report = check_invariants("org", &nodes);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, IntegrityViolation::ParentCycle { .. })));
    }
}
