//! Dominator trees, built with the iterative algorithm of Cooper, Harvey and Kennedy.

/// The dominator tree of a graph with nodes `0..len`, rooted at a single entry node.
///
/// Node `a` dominates node `b` if every path from the root to `b` passes through `a`.
/// Building the tree over the reversed graph from an exit node gives the post-dominator tree.
/// Nodes unreachable from the root are not part of the tree and dominate nothing.
#[derive(Debug, Clone)]
pub struct DomTree {
    root: usize,
    idom: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    // pre- and post-order numbers in the tree, for constant time dominance queries
    enter: Vec<u32>,
    exit: Vec<u32>,
    reachable: Vec<bool>,
}

impl DomTree {
    /// Build the tree for the graph where `succs(v)` lists the successors of node `v`.
    pub fn new<I: IntoIterator<Item = usize>>(len: usize, root: usize, succs: impl Fn(usize) -> I) -> Self {
        assert!(root < len, "Root {} out of bounds for {} nodes", root, len);

        let succs: Vec<Vec<usize>> = (0..len).map(|v| succs(v).into_iter().collect()).collect();
        let order = post_order(root, &succs);

        // position in reverse post-order
        let mut rpo_index = vec![usize::MAX; len];
        for (i, &v) in order.iter().rev().enumerate() {
            rpo_index[v] = i;
        }

        let mut preds = vec![vec![]; len];
        for &v in &order {
            for &s in &succs[v] {
                preds[s].push(v);
            }
        }

        let mut idom: Vec<Option<usize>> = vec![None; len];
        idom[root] = Some(root);

        let mut changed = true;
        while changed {
            changed = false;
            for &v in order.iter().rev().skip(1) {
                let mut new_idom = None;
                for &p in &preds[v] {
                    if idom[p].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(current) => intersect(&idom, &rpo_index, p, current),
                    });
                }

                if new_idom.is_some() && idom[v] != new_idom {
                    idom[v] = new_idom;
                    changed = true;
                }
            }
        }
        idom[root] = None;

        let mut children = vec![vec![]; len];
        for v in 0..len {
            if let Some(parent) = idom[v] {
                children[parent].push(v);
            }
        }

        let mut reachable = vec![false; len];
        for &v in &order {
            reachable[v] = true;
        }

        let mut tree = DomTree {
            root,
            idom,
            children,
            enter: vec![0; len],
            exit: vec![0; len],
            reachable,
        };
        tree.number();
        tree
    }

    fn number(&mut self) {
        let mut counter = 0;
        let mut stack = vec![(self.root, false)];

        while let Some((v, done)) = stack.pop() {
            if done {
                self.exit[v] = counter;
            } else {
                self.enter[v] = counter;
                stack.push((v, true));
                for &child in self.children[v].iter().rev() {
                    stack.push((child, false));
                }
            }
            counter += 1;
        }
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn is_reachable(&self, v: usize) -> bool {
        self.reachable[v]
    }

    /// The immediate dominator of `v`, `None` for the root and unreachable nodes.
    pub fn idom(&self, v: usize) -> Option<usize> {
        self.idom[v]
    }

    pub fn children(&self, v: usize) -> &[usize] {
        &self.children[v]
    }

    /// Whether `a` dominates `b`. Every node dominates itself unless `strict` is set.
    pub fn dominates(&self, a: usize, b: usize, strict: bool) -> bool {
        if !self.reachable[a] || !self.reachable[b] {
            return false;
        }
        if a == b {
            return !strict;
        }
        self.enter[a] <= self.enter[b] && self.exit[b] <= self.exit[a]
    }
}

fn intersect(idom: &[Option<usize>], rpo_index: &[usize], mut a: usize, mut b: usize) -> usize {
    while a != b {
        while rpo_index[a] > rpo_index[b] {
            a = idom[a].expect("processed node has a dominator");
        }
        while rpo_index[b] > rpo_index[a] {
            b = idom[b].expect("processed node has a dominator");
        }
    }
    a
}

/// The nodes reachable from `root` in depth-first post-order.
fn post_order(root: usize, succs: &[Vec<usize>]) -> Vec<usize> {
    let mut visited = vec![false; succs.len()];
    let mut order = vec![];
    // (node, index of the next successor to visit)
    let mut stack = vec![(root, 0)];
    visited[root] = true;

    while let Some((v, next)) = stack.last_mut() {
        let v = *v;
        if let Some(&s) = succs[v].get(*next) {
            *next += 1;
            if !visited[s] {
                visited[s] = true;
                stack.push((s, 0));
            }
        } else {
            order.push(v);
            stack.pop();
        }
    }

    order
}
