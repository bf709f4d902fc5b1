use cl_sched::dom::DomTree;

/// ```text
///     0
///    / \
///   1   2
///    \ /
///     3 -> 4      5 -> 3
/// ```
const EDGES: &[(usize, usize)] = &[(0, 1), (0, 2), (1, 3), (2, 3), (3, 4), (5, 3)];

fn succs(v: usize) -> Vec<usize> {
    EDGES.iter().filter(|&&(a, _)| a == v).map(|&(_, b)| b).collect()
}

fn preds(v: usize) -> Vec<usize> {
    EDGES.iter().filter(|&&(_, b)| b == v).map(|&(a, _)| a).collect()
}

#[test]
fn diamond_dominators() {
    let tree = DomTree::new(6, 0, succs);

    assert_eq!(tree.root(), 0);
    assert_eq!(tree.idom(0), None);
    assert_eq!(tree.idom(1), Some(0));
    assert_eq!(tree.idom(3), Some(0));
    assert_eq!(tree.idom(4), Some(3));

    let mut children = tree.children(0).to_vec();
    children.sort();
    assert_eq!(children, vec![1, 2, 3]);

    assert!(tree.dominates(0, 4, true));
    assert!(tree.dominates(3, 4, true));
    assert!(!tree.dominates(1, 3, false));
    assert!(!tree.dominates(4, 3, false));

    assert!(tree.dominates(3, 3, false));
    assert!(!tree.dominates(3, 3, true));
}

#[test]
fn unreachable_nodes() {
    let tree = DomTree::new(6, 0, succs);

    // 5 only has an edge into the graph, nothing reaches it
    assert!(!tree.is_reachable(5));
    assert_eq!(tree.idom(5), None);
    assert!(!tree.dominates(0, 5, false));
    assert!(!tree.dominates(5, 3, false));
}

#[test]
fn post_dominators() {
    let tree = DomTree::new(6, 4, preds);

    assert_eq!(tree.idom(3), Some(4));
    assert_eq!(tree.idom(1), Some(3));
    assert_eq!(tree.idom(0), Some(3));
    assert_eq!(tree.idom(5), Some(3));

    assert!(tree.dominates(3, 0, true));
    assert!(tree.dominates(4, 5, true));
    assert!(!tree.dominates(1, 0, false));
}
