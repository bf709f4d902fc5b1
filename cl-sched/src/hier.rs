use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::ops::Index;

use itertools::Itertools;

use crate::dom::DomTree;
use crate::graph::{OpGraph, OpId, ValueId};

/// A vertex in a [HierGraph].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct VertId(usize);

#[derive(Debug, Clone)]
pub enum VertexKind {
    /// A graph input.
    Input(ValueId),
    /// A graph output.
    Output(ValueId),
    Sequence(Sequence),
    Group(Group),
}

/// Ops that are always scheduled back to back.
///
/// Every op except the first only consumes values produced by the ops in front of it,
/// and every op except the last only produces values consumed by the ops behind it.
#[derive(Debug, Clone)]
pub struct Sequence {
    pub ops: Vec<OpId>,
    /// The non-param operands consumed by the first op.
    pub inputs: Vec<ValueId>,
    /// The values produced by the last op.
    pub outputs: Vec<ValueId>,
    /// The group this sequence is hidden in.
    pub group: Option<VertId>,
}

/// A subgraph of sequences that is scheduled as a whole.
///
/// Only the group vertex is connected to the rest of the graph,
/// the edges between the sequences inside it are kept as they are.
#[derive(Debug, Clone, Default)]
pub struct Group {
    pub seqs: Vec<VertId>,
    /// Sequences whose predecessors are all outside the group.
    pub entrances: Vec<VertId>,
    /// Sequences whose successors are all outside the group.
    pub exits: Vec<VertId>,
    /// Sequences with at least one predecessor outside the group.
    pub in_front: Vec<VertId>,
    /// Sequences with at least one successor outside the group.
    pub out_front: Vec<VertId>,
    /// Values from outside the group and how many of their uses happen inside it.
    pub consumed: Vec<(ValueId, u32)>,
    /// Values produced inside the group and how many of their uses happen outside it.
    pub produced: Vec<(ValueId, u32)>,
}

#[derive(Debug, Clone)]
pub struct HierVertex {
    pub kind: VertexKind,
    pub preds: Vec<VertId>,
    pub succs: Vec<VertId>,
    prev_preds: Vec<VertId>,
    prev_succs: Vec<VertId>,
    removed: bool,
}

/// A hierarchical view on an [OpGraph]: ops are joined into sequences and sequences into groups,
/// so the scheduler can work on a much smaller graph.
///
/// Vertices are stored in an append-only arena. Merged sequences and dissolved groups are marked
/// as removed and disconnected, but their ids stay valid.
pub struct HierGraph<'g> {
    graph: &'g OpGraph,
    vertices: Vec<HierVertex>,
    inputs: Vec<VertId>,
    outputs: Vec<VertId>,
    op_to_seq: Vec<VertId>,
    dom: Option<DomTree>,
    post_dom: Option<DomTree>,
}

impl<'g> HierGraph<'g> {
    /// Wrap every op in its own sequence.
    pub fn new(graph: &'g OpGraph) -> Self {
        let mut hier = HierGraph {
            graph,
            vertices: vec![],
            inputs: vec![],
            outputs: vec![],
            op_to_seq: vec![],
            dom: None,
            post_dom: None,
        };

        let mut value_to_input = HashMap::new();
        for &value in graph.inputs() {
            let vert = hier.push(VertexKind::Input(value));
            hier.inputs.push(vert);
            value_to_input.insert(value, vert);
        }

        for op in graph.ops() {
            let seq = Sequence {
                ops: vec![op],
                inputs: graph.value_inputs(op).collect(),
                outputs: graph[op].outputs.clone(),
                group: None,
            };
            let vert = hier.push(VertexKind::Sequence(seq));
            hier.op_to_seq.push(vert);
        }

        let source = |hier: &HierGraph, value: ValueId| match graph[value].def {
            Some(def) => Some(hier.op_to_seq[def.index()]),
            None => value_to_input.get(&value).copied(),
        };

        for op in graph.ops() {
            let seq = hier.op_to_seq[op.index()];
            for value in graph.value_inputs(op) {
                if let Some(pred) = source(&hier, value) {
                    hier.connect(pred, seq);
                }
            }
        }

        for &value in graph.outputs() {
            let vert = hier.push(VertexKind::Output(value));
            hier.outputs.push(vert);
            if let Some(pred) = source(&hier, value) {
                hier.connect(pred, vert);
            }
        }

        hier
    }

    pub(crate) fn push(&mut self, kind: VertexKind) -> VertId {
        let id = VertId(self.vertices.len());
        self.vertices.push(HierVertex {
            kind,
            preds: vec![],
            succs: vec![],
            prev_preds: vec![],
            prev_succs: vec![],
            removed: false,
        });
        id
    }

    pub fn graph(&self) -> &'g OpGraph {
        self.graph
    }

    pub fn inputs(&self) -> &[VertId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[VertId] {
        &self.outputs
    }

    /// The number of vertices in the arena, including removed ones.
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn vertices(&self) -> impl Iterator<Item = VertId> + '_ {
        (0..self.vertices.len()).map(VertId).filter(|&v| !self[v].removed)
    }

    pub fn is_removed(&self, vert: VertId) -> bool {
        self[vert].removed
    }

    pub(crate) fn vertex_mut(&mut self, vert: VertId) -> &mut HierVertex {
        &mut self.vertices[vert.0]
    }

    /// The sequence that currently contains `op`.
    pub fn seq_of(&self, op: OpId) -> VertId {
        self.op_to_seq[op.index()]
    }

    pub fn as_seq(&self, vert: VertId) -> Option<&Sequence> {
        match &self[vert].kind {
            VertexKind::Sequence(seq) => Some(seq),
            _ => None,
        }
    }

    pub fn as_group(&self, vert: VertId) -> Option<&Group> {
        match &self[vert].kind {
            VertexKind::Group(group) => Some(group),
            _ => None,
        }
    }

    pub fn is_input(&self, vert: VertId) -> bool {
        matches!(self[vert].kind, VertexKind::Input(_))
    }

    pub fn is_output(&self, vert: VertId) -> bool {
        matches!(self[vert].kind, VertexKind::Output(_))
    }

    pub fn seq(&self, vert: VertId) -> &Sequence {
        self.as_seq(vert)
            .unwrap_or_else(|| panic!("Vertex {:?} is not a sequence", vert))
    }

    pub fn group(&self, vert: VertId) -> &Group {
        self.as_group(vert)
            .unwrap_or_else(|| panic!("Vertex {:?} is not a group", vert))
    }

    pub(crate) fn seq_mut(&mut self, vert: VertId) -> &mut Sequence {
        match &mut self.vertices[vert.0].kind {
            VertexKind::Sequence(seq) => seq,
            _ => panic!("Vertex {:?} is not a sequence", vert),
        }
    }

    /// The group `vert` is hidden in, if it is a grouped sequence.
    pub fn group_of(&self, vert: VertId) -> Option<VertId> {
        self.as_seq(vert).and_then(|seq| seq.group)
    }

    /// The vertices the scheduler works on: live groups and the sequences that are not in any group.
    pub fn top_level(&self) -> Vec<VertId> {
        self.vertices()
            .filter(|&v| match &self[v].kind {
                VertexKind::Sequence(seq) => seq.group.is_none(),
                VertexKind::Group(_) => true,
                VertexKind::Input(_) | VertexKind::Output(_) => false,
            })
            .collect()
    }

    pub fn sequence_count(&self) -> usize {
        self.vertices().filter(|&v| self.as_seq(v).is_some()).count()
    }

    pub fn group_count(&self) -> usize {
        self.vertices().filter(|&v| self.as_group(v).is_some()).count()
    }

    /// The top level vertices in reverse post-order, found by walking backwards from the outputs
    /// and from the vertices nothing depends on.
    pub fn reverse_post_order(&self) -> Vec<VertId> {
        let roots = self
            .outputs
            .iter()
            .copied()
            .chain(self.vertices().filter(|&v| self[v].succs.is_empty() && !self.is_output(v)));

        let mut visited = vec![false; self.len()];
        let mut order = vec![];
        let mut stack = vec![];

        for root in roots {
            stack.push((root, false));
            while let Some((vert, expanded)) = stack.pop() {
                if visited[vert.0] {
                    continue;
                }
                if expanded {
                    visited[vert.0] = true;
                    order.push(vert);
                } else {
                    stack.push((vert, true));
                    for &pred in self[vert].preds.iter().rev() {
                        if !visited[pred.0] {
                            stack.push((pred, false));
                        }
                    }
                }
            }
        }

        order
    }

    pub(crate) fn connect(&mut self, tail: VertId, head: VertId) {
        add_unique(&mut self.vertices[tail.0].succs, head);
        add_unique(&mut self.vertices[head.0].preds, tail);
    }

    /// Replace `old` by `new` in the successors of `pred`, without creating duplicate edges.
    pub(crate) fn replace_succ_of_pred(&mut self, pred: VertId, old: VertId, new: VertId) {
        replace_unique(&mut self.vertices[pred.0].succs, old, new);
    }

    /// Replace `old` by `new` in the predecessors of `succ`, without creating duplicate edges.
    pub(crate) fn replace_pred_of_succ(&mut self, succ: VertId, old: VertId, new: VertId) {
        replace_unique(&mut self.vertices[succ.0].preds, old, new);
    }

    /// Append the ops of `next` to `prev` and remove `next`. `next` must be the only successor of `prev`.
    pub(crate) fn join(&mut self, prev: VertId, next: VertId) {
        debug_assert_eq!(self[prev].succs, [next]);

        let next_seq = self.seq(next).clone();
        for &op in &next_seq.ops {
            self.op_to_seq[op.index()] = prev;
        }
        let seq = self.seq_mut(prev);
        seq.ops.extend(next_seq.ops);
        seq.outputs = next_seq.outputs;

        let succs = std::mem::take(&mut self.vertex_mut(next).succs);
        for &succ in &succs {
            self.replace_pred_of_succ(succ, next, prev);
        }
        self.vertex_mut(prev).succs = succs;

        let next = self.vertex_mut(next);
        next.preds.clear();
        next.removed = true;
    }

    pub(crate) fn remove(&mut self, vert: VertId) {
        let vertex = self.vertex_mut(vert);
        vertex.preds.clear();
        vertex.succs.clear();
        vertex.removed = true;
    }

    /// Remember the current edges of every vertex, so they can be restored when a group is dissolved.
    pub fn backup_edges(&mut self) {
        for vertex in &mut self.vertices {
            vertex.prev_preds = vertex.preds.clone();
            vertex.prev_succs = vertex.succs.clone();
        }
    }

    pub fn prev_preds(&self, vert: VertId) -> &[VertId] {
        &self[vert].prev_preds
    }

    pub fn prev_succs(&self, vert: VertId) -> &[VertId] {
        &self[vert].prev_succs
    }

    /// Build the dominator and post-dominator trees of the current graph.
    ///
    /// A virtual entry in front of all inputs and sources and a virtual exit behind all outputs and sinks
    /// are used as roots, so graphs with multiple inputs and outputs work too.
    pub fn build_dominators(&mut self) {
        let len = self.len();
        let root = len;

        let sources = self
            .vertices()
            .filter(|&v| self[v].preds.is_empty())
            .map(|v| v.0)
            .collect_vec();
        let sinks = self
            .vertices()
            .filter(|&v| self[v].succs.is_empty())
            .map(|v| v.0)
            .collect_vec();

        let dom = DomTree::new(len + 1, root, |v| {
            if v == root {
                sources.clone()
            } else {
                self.vertices[v].succs.iter().map(|s| s.0).collect_vec()
            }
        });
        let post_dom = DomTree::new(len + 1, root, |v| {
            if v == root {
                sinks.clone()
            } else {
                self.vertices[v].preds.iter().map(|p| p.0).collect_vec()
            }
        });

        self.dom = Some(dom);
        self.post_dom = Some(post_dom);
    }

    /// Whether every path from the inputs to `b` passes through `a`.
    ///
    /// Panics if [HierGraph::build_dominators] has not been called. Vertices created after that never dominate.
    pub fn dominates(&self, a: VertId, b: VertId) -> bool {
        let dom = self.dom.as_ref().expect("dominator tree has not been built");
        tree_query(dom, a, b)
    }

    /// Whether every path from `b` to the outputs passes through `a`.
    pub fn post_dominates(&self, a: VertId, b: VertId) -> bool {
        let post_dom = self.post_dom.as_ref().expect("post-dominator tree has not been built");
        tree_query(post_dom, a, b)
    }

    /// A short description of a vertex for logging.
    pub fn label(&self, vert: VertId) -> String {
        let graph = self.graph;
        match &self[vert].kind {
            VertexKind::Input(value) | VertexKind::Output(value) => graph[*value].name.clone(),
            VertexKind::Sequence(seq) => seq.ops.iter().map(|&op| &graph[op].op_type).join(" "),
            VertexKind::Group(group) => {
                let first = |&seq: &VertId| self.seq(seq).ops.first().map(|&op| graph[op].op_type.as_str());
                let last = |&seq: &VertId| self.seq(seq).ops.last().map(|&op| graph[op].op_type.as_str());
                format!(
                    "[{} ... {}]",
                    group.in_front.iter().filter_map(first).join(" "),
                    group.out_front.iter().filter_map(last).join(" ")
                )
            }
        }
    }
}

fn tree_query(tree: &DomTree, a: VertId, b: VertId) -> bool {
    let len = tree.root();
    a.0 < len && b.0 < len && tree.dominates(a.0, b.0, false)
}

fn add_unique(list: &mut Vec<VertId>, vert: VertId) {
    if !list.contains(&vert) {
        list.push(vert);
    }
}

fn replace_unique(list: &mut Vec<VertId>, old: VertId, new: VertId) {
    if list.contains(&new) {
        list.retain(|&v| v != old);
    } else {
        for v in list.iter_mut() {
            if *v == old {
                *v = new;
            }
        }
    }
}

impl Index<VertId> for HierGraph<'_> {
    type Output = HierVertex;

    fn index(&self, vert: VertId) -> &Self::Output {
        &self.vertices[vert.0]
    }
}

impl VertId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl Debug for VertId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "VertId({})", self.0)
    }
}

impl Debug for HierGraph<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierGraph")
            .field("graph", &self.graph.name())
            .field("sequences", &self.sequence_count())
            .field("groups", &self.group_count())
            .finish()
    }
}
