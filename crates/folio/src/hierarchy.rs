//! Tree assembly over flat parent-referencing records.
//!
//! Records whose parent resolves become children of that parent; everything
//! else (no parent, or a parent that is not in the input) is a root. Siblings
//! and roots are ordered by their `order` value, ties keeping input order.
//!
//! All traversals use explicit stacks or queues, so arbitrarily deep trees
//! are fine. Parent references that loop back on themselves are rejected
//! with [`StoreError::CycleDetected`].

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use folio_api::{Hierarchical, Record, StoreError, StoreResult as Result};

/// A record that can be placed in a tree.
pub trait HierarchyNode {
    fn node_id(&self) -> &str;
    fn parent_node_id(&self) -> Option<&str>;
    fn sort_order(&self) -> i64;
    /// Label counted by [`calculate_stats`].
    fn node_kind(&self) -> &str;
}

impl<T: Hierarchical> HierarchyNode for Record<T> {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn parent_node_id(&self) -> Option<&str> {
        self.data.parent_id()
    }

    fn sort_order(&self) -> i64 {
        self.data.order()
    }

    fn node_kind(&self) -> &str {
        self.data.kind()
    }
}

/// One node of a built tree.
///
/// `Drop`, `Clone`, `PartialEq` and `Debug` walk the subtree with explicit
/// stacks, so they are safe on trees of any depth.
pub struct TreeNode<T> {
    pub item: T,
    pub children: Vec<TreeNode<T>>,
}

impl<T> TreeNode<T> {
    pub fn leaf(item: T) -> Self {
        Self {
            item,
            children: Vec::new(),
        }
    }
}

impl<T> Drop for TreeNode<T> {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.children);
        while let Some(mut node) = stack.pop() {
            stack.append(&mut node.children);
        }
    }
}

impl<T: Clone> Clone for TreeNode<T> {
    fn clone(&self) -> Self {
        // Pre-order with the last child first; replayed in reverse, every
        // node's clones of its children sit on top of `built`, in order.
        let mut order: Vec<&TreeNode<T>> = Vec::new();
        let mut stack: Vec<&TreeNode<T>> = self.children.iter().collect();
        while let Some(node) = stack.pop() {
            order.push(node);
            stack.extend(node.children.iter());
        }

        let mut built: Vec<TreeNode<T>> = Vec::with_capacity(order.len());
        for node in order.into_iter().rev() {
            let children = built.split_off(built.len() - node.children.len());
            built.push(TreeNode {
                item: node.item.clone(),
                children,
            });
        }
        TreeNode {
            item: self.item.clone(),
            children: built,
        }
    }
}

impl<T: PartialEq> PartialEq for TreeNode<T> {
    fn eq(&self, other: &Self) -> bool {
        let mut stack = vec![(self, other)];
        while let Some((a, b)) = stack.pop() {
            if a.item != b.item || a.children.len() != b.children.len() {
                return false;
            }
            stack.extend(a.children.iter().zip(&b.children));
        }
        true
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for TreeNode<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeNode")
            .field("item", &self.item)
            .field("descendants", &flatten(&self.children))
            .finish()
    }
}

/// Node counts per kind plus the grand total.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HierarchyStats {
    pub by_type: BTreeMap<String, usize>,
    pub total: usize,
}

impl HierarchyStats {
    pub fn count(&self, kind: &str) -> usize {
        self.by_type.get(kind).copied().unwrap_or(0)
    }
}

/// Assemble a forest from flat records.
///
/// When ids repeat, parent references resolve to the first record carrying
/// the id. Fails with `CycleDetected` naming the first record (in input
/// order) that cannot be reached from any root.
pub fn build_hierarchy<T: HierarchyNode>(items: Vec<T>) -> Result<Vec<TreeNode<T>>> {
    let n = items.len();

    let mut index: HashMap<&str, usize> = HashMap::with_capacity(n);
    for (i, item) in items.iter().enumerate() {
        index.entry(item.node_id()).or_insert(i);
    }

    let mut roots: Vec<usize> = Vec::new();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, item) in items.iter().enumerate() {
        match item.parent_node_id().and_then(|p| index.get(p)) {
            Some(&parent) => children[parent].push(i),
            None => roots.push(i),
        }
    }

    // Stable: equal orders keep input order.
    roots.sort_by_key(|&i| items[i].sort_order());
    for siblings in &mut children {
        siblings.sort_by_key(|&i| items[i].sort_order());
    }

    // Breadth-first from the roots; every reachable node appears once.
    let mut reached = vec![false; n];
    let mut visit_order = Vec::with_capacity(n);
    let mut queue: VecDeque<usize> = roots.iter().copied().collect();
    while let Some(i) = queue.pop_front() {
        if reached[i] {
            continue;
        }
        reached[i] = true;
        visit_order.push(i);
        queue.extend(children[i].iter().copied());
    }

    if let Some(stuck) = reached.iter().position(|&r| !r) {
        let id = items[stuck].node_id().to_string();
        tracing::warn!("[hierarchy] parent references loop through {}", id);
        return Err(StoreError::CycleDetected { id });
    }
    drop(index);

    // Children come after their parent in BFS order, so building in reverse
    // always finds them finished.
    let mut pending: Vec<Option<T>> = items.into_iter().map(Some).collect();
    let mut built: Vec<Option<TreeNode<T>>> = (0..n).map(|_| None).collect();
    for &i in visit_order.iter().rev() {
        let kids = children[i]
            .iter()
            .filter_map(|&c| built[c].take())
            .collect();
        if let Some(item) = pending[i].take() {
            built[i] = Some(TreeNode {
                item,
                children: kids,
            });
        }
    }

    Ok(roots.iter().filter_map(|&r| built[r].take()).collect())
}

/// Count every node by kind, pre-order, each node exactly once.
pub fn calculate_stats<T: HierarchyNode>(roots: &[TreeNode<T>]) -> HierarchyStats {
    let mut stats = HierarchyStats::default();
    let mut stack: Vec<&TreeNode<T>> = roots.iter().rev().collect();
    while let Some(node) = stack.pop() {
        *stats
            .by_type
            .entry(node.item.node_kind().to_string())
            .or_insert(0) += 1;
        stats.total += 1;
        stack.extend(node.children.iter().rev());
    }
    stats
}

/// Pre-order rows of `(depth, item)`; roots have depth 0.
pub fn flatten<T>(roots: &[TreeNode<T>]) -> Vec<(usize, &T)> {
    let mut rows = Vec::new();
    let mut stack: Vec<(usize, &TreeNode<T>)> = roots.iter().rev().map(|r| (0, r)).collect();
    while let Some((depth, node)) = stack.pop() {
        rows.push((depth, &node.item));
        stack.extend(node.children.iter().rev().map(|c| (depth + 1, c)));
    }
    rows
}

/// `root_id` followed by every record below it, breadth-first. Empty if
/// `root_id` is not among `items`. Terminates even when parent references loop.
pub fn descendant_ids<T: HierarchyNode>(items: &[T], root_id: &str) -> Vec<String> {
    if !items.iter().any(|item| item.node_id() == root_id) {
        return Vec::new();
    }

    let mut by_parent: HashMap<&str, Vec<&str>> = HashMap::new();
    for item in items {
        if let Some(parent) = item.parent_node_id() {
            by_parent.entry(parent).or_default().push(item.node_id());
        }
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut ids = Vec::new();
    let mut queue = VecDeque::from([root_id]);
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        ids.push(id.to_string());
        if let Some(kids) = by_parent.get(id) {
            queue.extend(kids.iter().copied());
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Node {
        id: &'static str,
        parent: Option<&'static str>,
        order: i64,
        kind: &'static str,
    }

    impl HierarchyNode for Node {
        fn node_id(&self) -> &str {
            self.id
        }
        fn parent_node_id(&self) -> Option<&str> {
            self.parent
        }
        fn sort_order(&self) -> i64 {
            self.order
        }
        fn node_kind(&self) -> &str {
            self.kind
        }
    }

    fn node(id: &'static str, parent: Option<&'static str>, order: i64) -> Node {
        Node {
            id,
            parent,
            order,
            kind: if parent.is_some() { "project" } else { "company" },
        }
    }

    fn ids<T: HierarchyNode>(nodes: &[TreeNode<T>]) -> Vec<&str> {
        nodes.iter().map(|n| n.item.node_id()).collect()
    }

    #[test]
    fn test_children_are_nested_and_sorted() {
        let tree = build_hierarchy(vec![
            node("C", Some("A"), 1),
            node("A", None, 1),
            node("B", Some("A"), 0),
        ])
        .unwrap();

        assert_eq!(ids(&tree), vec!["A"]);
        assert_eq!(ids(&tree[0].children), vec!["B", "C"]);
    }

    #[test]
    fn test_dangling_parent_becomes_root() {
        let tree = build_hierarchy(vec![node("X", Some("gone"), 0), node("A", None, 1)]).unwrap();
        assert_eq!(ids(&tree), vec!["X", "A"]);
    }

    #[test]
    fn test_equal_orders_keep_input_order() {
        let tree = build_hierarchy(vec![
            node("b", None, 0),
            node("a", None, 0),
            node("c", None, -1),
        ])
        .unwrap();
        assert_eq!(ids(&tree), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_two_node_cycle_is_rejected() {
        let err = build_hierarchy(vec![
            node("root", None, 0),
            node("x", Some("y"), 0),
            node("y", Some("x"), 0),
        ])
        .unwrap_err();
        assert_eq!(err, StoreError::CycleDetected { id: "x".into() });
    }

    #[test]
    fn test_self_parent_is_rejected() {
        let err = build_hierarchy(vec![node("loop", Some("loop"), 0)]).unwrap_err();
        assert!(matches!(err, StoreError::CycleDetected { .. }));
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let names: Vec<&'static str> = (0..100_000)
            .map(|i| Box::leak(format!("n{i}").into_boxed_str()) as &'static str)
            .collect();
        let items: Vec<Node> = names
            .iter()
            .enumerate()
            .map(|(i, id)| node(*id, if i == 0 { None } else { Some(names[i - 1]) }, 0))
            .collect();

        let tree = build_hierarchy(items).unwrap();
        let stats = calculate_stats(&tree);
        assert_eq!(stats.total, 100_000);
        assert_eq!(flatten(&tree).last().map(|(depth, _)| *depth), Some(99_999));

        let copy = tree.clone();
        assert_eq!(copy, tree);
        drop(copy);
        drop(tree);
    }

    #[test]
    fn test_clone_keeps_shape_and_sibling_order() {
        let tree = build_hierarchy(vec![
            node("A", None, 0),
            node("B", Some("A"), 0),
            node("B1", Some("B"), 0),
            node("B2", Some("B"), 1),
            node("C", Some("A"), 1),
            node("D", None, 1),
        ])
        .unwrap();
        let copy = tree.clone();
        assert_eq!(copy, tree);

        let rows = |t: &[TreeNode<Node>]| -> Vec<(usize, &'static str)> {
            flatten(t).into_iter().map(|(d, n)| (d, n.id)).collect()
        };
        assert_eq!(rows(&copy), rows(&tree));
        assert_eq!(
            rows(&copy),
            vec![(0, "A"), (1, "B"), (2, "B1"), (2, "B2"), (1, "C"), (0, "D")]
        );
    }

    #[test]
    fn test_trees_with_different_children_are_unequal() {
        let one = build_hierarchy(vec![node("A", None, 0), node("B", Some("A"), 0)]).unwrap();
        let other = build_hierarchy(vec![node("A", None, 0), node("C", Some("A"), 0)]).unwrap();
        let bare = build_hierarchy(vec![node("A", None, 0)]).unwrap();
        assert_ne!(one, other);
        assert_ne!(one, bare);
    }

    #[test]
    fn test_stats_count_by_kind() {
        let tree = build_hierarchy(vec![
            node("A", None, 0),
            node("B", Some("A"), 0),
            node("C", Some("A"), 1),
            node("D", None, 1),
        ])
        .unwrap();
        let stats = calculate_stats(&tree);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.count("company"), 2);
        assert_eq!(stats.count("project"), 2);
        assert_eq!(stats.count("education"), 0);
    }

    #[test]
    fn test_flatten_is_pre_order_with_depth() {
        let tree = build_hierarchy(vec![
            node("A", None, 0),
            node("B", Some("A"), 0),
            node("B1", Some("B"), 0),
            node("C", Some("A"), 1),
        ])
        .unwrap();
        let rows: Vec<(usize, &str)> = flatten(&tree).into_iter().map(|(d, n)| (d, n.id)).collect();
        assert_eq!(rows, vec![(0, "A"), (1, "B"), (2, "B1"), (1, "C")]);
    }

    #[test]
    fn test_descendant_ids_survive_cycles() {
        let items = vec![
            node("A", None, 0),
            node("B", Some("A"), 0),
            node("x", Some("y"), 0),
            node("y", Some("x"), 0),
        ];
        assert_eq!(descendant_ids(&items, "A"), vec!["A", "B"]);
        assert_eq!(descendant_ids(&items, "x"), vec!["x", "y"]);
        assert!(descendant_ids(&items, "missing").is_empty());
    }
}
