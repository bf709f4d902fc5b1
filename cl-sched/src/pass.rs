use std::collections::{BTreeMap, HashMap, HashSet};

use indexmap::IndexMap;
use itertools::Itertools;

use crate::graph::{OpGraph, OpId, ValueId};
use crate::hier::{Group, HierGraph, VertId, VertexKind};
use crate::mem::{compute_inc_dec, MemStateVec};

#[derive(Debug, Clone)]
pub struct GroupSettings {
    /// The op type that ends a cell, typically the concatenation of the intermediate nodes.
    pub cell_output: String,
    /// Also group the ops directly behind a cell output that can be scheduled right after it.
    pub intrusion: bool,
    /// The maximum number of sequences considered for an intrusion group.
    pub max_intrusion: usize,
}

impl Default for GroupSettings {
    fn default() -> Self {
        GroupSettings {
            cell_output: "Concat".to_owned(),
            intrusion: true,
            max_intrusion: 8,
        }
    }
}

/// The distinct non-param operands of `op` that are not used anywhere else.
pub fn killed_by_op(graph: &OpGraph, op: OpId) -> Vec<ValueId> {
    let counts = graph.value_inputs(op).counts();
    graph
        .value_inputs(op)
        .unique()
        .filter(|&v| graph.use_count(v) as usize == counts[&v])
        .collect()
}

/// Greedily merge each sequence with its successor while that successor is its only successor,
/// has no other predecessor and appending it does not raise the memory usage.
pub fn join_sequences(hier: &mut HierGraph) {
    assert_eq!(hier.group_count(), 0, "Sequences must be joined before grouping");

    let roots = hier
        .inputs()
        .iter()
        .copied()
        .chain(hier.vertices().filter(|&v| hier[v].preds.is_empty() && !hier.is_input(v)))
        .collect_vec();

    let mut visited = vec![false; hier.len()];
    let mut stack = roots.into_iter().rev().collect_vec();

    while let Some(vert) = stack.pop() {
        if visited[vert.index()] {
            continue;
        }
        visited[vert.index()] = true;

        if hier.as_seq(vert).is_some() {
            join_from(hier, vert);
        }
        for &succ in hier[vert].succs.iter().rev() {
            if !visited[succ.index()] {
                stack.push(succ);
            }
        }
    }
}

fn join_from(hier: &mut HierGraph, seq: VertId) {
    let graph = hier.graph();
    let first = hier.seq(seq).ops[0];

    let mut states = MemStateVec::new();
    let (inc, dec) = compute_inc_dec(graph, first, &killed_by_op(graph, first));
    states.append(inc, dec);

    loop {
        let &[next] = hier[seq].succs.as_slice() else {
            break;
        };
        if hier.as_seq(next).is_none() || hier[next].preds.len() != 1 {
            break;
        }

        let op = hier.seq(next).ops[0];
        let (inc, dec) = compute_inc_dec(graph, op, &killed_by_op(graph, op));
        let (up, down) = states.compute_state(inc, dec);
        if up > states.max_stable() || down > states.latest() {
            break;
        }

        states.append(inc, dec);
        hier.join(seq, next);
    }
}

/// Hide every cell of the network in a group.
///
/// A cell ends at a sequence starting with [GroupSettings::cell_output] and contains every sequence
/// post-dominated by it. With intrusion enabled the successors dominated by the cell output
/// that minimise the total size of their outputs are grouped as well.
pub fn make_groups(hier: &mut HierGraph, settings: &GroupSettings) {
    hier.build_dominators();
    hier.backup_edges();

    let graph = hier.graph();
    let cell_outputs = hier
        .reverse_post_order()
        .into_iter()
        .filter(|&v| {
            hier.as_seq(v)
                .map_or(false, |seq| graph[seq.ops[0]].op_type == settings.cell_output)
        })
        .collect_vec();

    for cell_out in cell_outputs {
        if hier.group_of(cell_out).is_some() {
            continue;
        }
        group_cell(hier, cell_out, settings);
    }
}

fn group_cell(hier: &mut HierGraph, cell_out: VertId, settings: &GroupSettings) {
    let cell = SequenceDetector::detect(hier, cell_out, false, |v| hier.post_dominates(cell_out, v));
    let dominated = SequenceDetector::detect(hier, cell_out, true, |v| hier.dominates(cell_out, v));

    // the cell output leads straight out of the dominated region, nothing to intrude
    if !settings.intrusion || dominated.frontier.contains(&cell_out) {
        create_group(hier, cell.set);
        return;
    }

    let candidates = dominated.set.iter().copied().take(settings.max_intrusion).collect_vec();
    let chosen = OutputSizeSearch::new(hier, &candidates, cell_out).run();
    if chosen.len() <= 2 {
        create_group(hier, cell.set);
        return;
    }

    let intruded = SequenceDetector::detect(hier, cell_out, true, |v| chosen.contains(&v));
    let seqs = intruded.set.into_iter().filter(|&v| v != cell_out).collect_vec();

    create_group(hier, cell.set);
    create_group(hier, seqs);
}

/// Move `seqs` into a new group vertex, rewiring the edges that cross the group boundary to it.
pub fn create_group(hier: &mut HierGraph, seqs: Vec<VertId>) -> VertId {
    assert!(!seqs.is_empty(), "Cannot create an empty group");

    let has_outside = |verts: &[VertId]| verts.iter().any(|v| !seqs.contains(v));
    let has_inside = |verts: &[VertId]| verts.iter().any(|v| seqs.contains(v));

    let in_front = seqs.iter().copied().filter(|&s| has_outside(&hier[s].preds)).collect_vec();
    let out_front = seqs.iter().copied().filter(|&s| has_outside(&hier[s].succs)).collect_vec();
    let entrances = seqs.iter().copied().filter(|&s| !has_inside(&hier[s].preds)).collect_vec();
    let exits = seqs.iter().copied().filter(|&s| !has_inside(&hier[s].succs)).collect_vec();

    let consumed = count_consumed(hier, &seqs, &in_front);
    let produced = count_produced(hier, &seqs, &out_front);

    let group = hier.push(VertexKind::Group(Group {
        seqs: seqs.clone(),
        entrances,
        exits,
        in_front: in_front.clone(),
        out_front: out_front.clone(),
        consumed,
        produced,
    }));
    for &seq in &seqs {
        hier.seq_mut(seq).group = Some(group);
    }

    for &front in &in_front {
        let preds = std::mem::take(&mut hier.vertex_mut(front).preds);
        let mut inner = vec![];
        for pred in preds {
            if hier.group_of(pred) == Some(group) {
                inner.push(pred);
            } else {
                hier.replace_succ_of_pred(pred, front, group);
                if !hier[group].preds.contains(&pred) {
                    hier.vertex_mut(group).preds.push(pred);
                }
            }
        }
        hier.vertex_mut(front).preds = inner;
    }

    for &front in &out_front {
        let succs = std::mem::take(&mut hier.vertex_mut(front).succs);
        let mut inner = vec![];
        for succ in succs {
            if hier.group_of(succ) == Some(group) {
                inner.push(succ);
            } else {
                hier.replace_pred_of_succ(succ, front, group);
                if !hier[group].succs.contains(&succ) {
                    hier.vertex_mut(group).succs.push(succ);
                }
            }
        }
        hier.vertex_mut(front).succs = inner;
    }

    group
}

fn count_consumed(hier: &HierGraph, seqs: &[VertId], in_front: &[VertId]) -> Vec<(ValueId, u32)> {
    let graph = hier.graph();
    let mut consumed: IndexMap<ValueId, u32> = IndexMap::new();
    for &front in in_front {
        for &value in &hier.seq(front).inputs {
            let inside = graph[value]
                .def
                .map_or(false, |def| seqs.contains(&hier.seq_of(def)));
            if !inside {
                *consumed.entry(value).or_default() += 1;
            }
        }
    }
    consumed.into_iter().collect()
}

fn count_produced(hier: &HierGraph, seqs: &[VertId], out_front: &[VertId]) -> Vec<(ValueId, u32)> {
    let graph = hier.graph();
    let mut produced: IndexMap<ValueId, u32> = IndexMap::new();
    for &front in out_front {
        for &value in &hier.seq(front).outputs {
            produced.insert(value, graph.use_count(value));
        }
    }
    for &seq in seqs {
        for value in &hier.seq(seq).inputs {
            if let Some(count) = produced.get_mut(value) {
                *count -= 1;
            }
        }
    }
    produced.into_iter().filter(|&(_, count)| count != 0).collect()
}

/// The result of a [SequenceDetector] run.
#[derive(Debug, Default)]
struct Detected {
    /// The sequences in the set, in visiting order.
    set: Vec<VertId>,
    /// Sequences in the set with at least one neighbour outside it.
    frontier: Vec<VertId>,
}

/// Collects the sequences satisfying a predicate that are reachable from a root through other such sequences,
/// walking forwards along successors or backwards along predecessors.
struct SequenceDetector<'a, 'g, F> {
    hier: &'a HierGraph<'g>,
    in_set: F,
    forward: bool,
    memo: HashMap<VertId, bool>,
    result: Detected,
}

impl<'a, 'g, F: Fn(VertId) -> bool> SequenceDetector<'a, 'g, F> {
    fn detect(hier: &'a HierGraph<'g>, root: VertId, forward: bool, in_set: F) -> Detected {
        let mut detector = SequenceDetector {
            hier,
            in_set,
            forward,
            memo: HashMap::new(),
            result: Detected::default(),
        };
        detector.visit(root);
        detector.result
    }

    fn visit(&mut self, vert: VertId) -> bool {
        if let Some(&inside) = self.memo.get(&vert) {
            return inside;
        }

        let inside = self.hier.as_seq(vert).map_or(false, |seq| seq.group.is_none()) && (self.in_set)(vert);
        self.memo.insert(vert, inside);
        if !inside {
            return false;
        }
        self.result.set.push(vert);

        let hier = self.hier;
        let next = if self.forward { &hier[vert].succs } else { &hier[vert].preds };
        let mut is_frontier = false;
        for &n in next {
            is_frontier |= !self.visit(n);
        }

        if is_frontier {
            self.result.frontier.push(vert);
        }
        true
    }
}

/// Searches the subsets of the candidates that are closed under predecessors and contain the root,
/// for the one whose sequences with outside successors produce the least memory.
/// Ties are broken in favour of larger subsets.
struct OutputSizeSearch<'a, 'g> {
    hier: &'a HierGraph<'g>,
    candidates: &'a [VertId],
    root: VertId,
    memo: HashSet<Vec<VertId>>,
    best: Vec<VertId>,
    min_size: u64,
}

impl<'a, 'g> OutputSizeSearch<'a, 'g> {
    fn new(hier: &'a HierGraph<'g>, candidates: &'a [VertId], root: VertId) -> Self {
        OutputSizeSearch {
            hier,
            candidates,
            root,
            memo: HashSet::new(),
            best: vec![],
            min_size: u64::MAX,
        }
    }

    fn run(mut self) -> Vec<VertId> {
        // the number of predecessors that are not chosen yet, only for unchosen candidates
        let mut pred_count: BTreeMap<VertId, usize> = self
            .candidates
            .iter()
            .map(|&v| (v, if v == self.root { 0 } else { self.hier[v].preds.len() }))
            .collect();
        // the number of successors outside the current subset, only for chosen candidates
        let mut succ_count: HashMap<VertId, usize> = HashMap::new();

        self.search(&mut vec![], &mut pred_count, &mut succ_count);
        self.best
    }

    fn search(
        &mut self,
        chosen: &mut Vec<VertId>,
        pred_count: &mut BTreeMap<VertId, usize>,
        succ_count: &mut HashMap<VertId, usize>,
    ) {
        if !self.memo.insert(chosen.clone()) {
            return;
        }

        let graph = self.hier.graph();
        let size: u64 = chosen
            .iter()
            .filter(|v| succ_count[v] != 0)
            .flat_map(|&v| &self.hier.seq(v).outputs)
            .map(|&value| graph.size(value))
            .sum();
        if size != 0 && (size < self.min_size || (size == self.min_size && chosen.len() > self.best.len())) {
            self.min_size = size;
            self.best = chosen.clone();
        }

        let ready = pred_count
            .iter()
            .filter(|&(_, &count)| count == 0)
            .map(|(&v, _)| v)
            .collect_vec();
        for seq in ready {
            let succs = self.candidate_neighbours(&self.hier[seq].succs);
            let preds = self.candidate_neighbours(&self.hier[seq].preds);

            let index = chosen.binary_search(&seq).unwrap_err();
            chosen.insert(index, seq);
            pred_count.remove(&seq);
            for s in &succs {
                if let Some(count) = pred_count.get_mut(s) {
                    *count -= 1;
                }
            }
            succ_count.insert(seq, self.hier[seq].succs.len());
            for p in &preds {
                if let Some(count) = succ_count.get_mut(p) {
                    *count -= 1;
                }
            }

            self.search(chosen, pred_count, succ_count);

            for p in &preds {
                if let Some(count) = succ_count.get_mut(p) {
                    *count += 1;
                }
            }
            succ_count.remove(&seq);
            for s in &succs {
                if let Some(count) = pred_count.get_mut(s) {
                    *count += 1;
                }
            }
            pred_count.insert(seq, 0);
            chosen.remove(index);
        }
    }

    fn candidate_neighbours(&self, verts: &[VertId]) -> Vec<VertId> {
        verts.iter().copied().filter(|v| self.candidates.contains(v)).collect()
    }
}
