use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use itertools::Itertools;

use crate::graph::{OpGraph, OpId, ValueId};
use crate::hier::{HierGraph, VertId, VertexKind};
use crate::life::{compute_lifetime, estimate_peak};
use crate::mem::{compute_inc_dec, MemStateVec};
use crate::order::reverse_post_order;
use crate::pass::{join_sequences, make_groups, GroupSettings};

#[derive(Debug, Clone)]
pub struct SchedSettings {
    /// Merge chains of ops into sequences before scheduling.
    pub join_sequences: bool,
    /// Group the sequences of every cell, `None` to schedule the sequences directly.
    pub groups: Option<GroupSettings>,
    /// The maximum number of partial schedules kept after every step of the dynamic programming.
    /// The ones with the lowest peak are kept.
    pub max_states: usize,
    /// The maximum number of times groups around the peak are dissolved and the graph rescheduled.
    pub max_iterations: usize,
}

impl Default for SchedSettings {
    fn default() -> Self {
        SchedSettings {
            join_sequences: true,
            groups: Some(GroupSettings::default()),
            max_states: 64,
            max_iterations: 64,
        }
    }
}

/// A complete schedule of an [OpGraph].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Schedule {
    pub ops: Vec<OpId>,
    /// The peak memory usage in bytes, as computed by [estimate_peak].
    pub peak: u64,
}

/// Find a schedule of `graph` with a low peak memory usage.
///
/// The graph is first coarsened into sequences and groups, which are scheduled with dynamic programming
/// over the sets of ready vertices. Groups that hold values alive at the peak are then dissolved and the graph
/// is scheduled again, until the peak stops improving.
///
/// The result is never worse than [reverse_post_order].
pub fn hierarchical_schedule(graph: &OpGraph, settings: &SchedSettings) -> Schedule {
    let rpo = reverse_post_order(graph);
    let rpo_peak = estimate_peak(graph, &rpo);
    let mut best = Schedule { ops: rpo, peak: rpo_peak };

    let mut hier = HierGraph::new(graph);
    if settings.join_sequences {
        join_sequences(&mut hier);
    }
    if let Some(groups) = &settings.groups {
        make_groups(&mut hier, groups);
    }
    tracing::debug!(
        "{:?}: {} ops in {} sequences and {} groups",
        graph.name(),
        graph.op_count(),
        hier.sequence_count(),
        hier.group_count()
    );

    // groups are never modified, only dissolved, so their schedules stay valid across iterations
    let mut memo = GroupMemo::default();
    let mut last_peak = u64::MAX;
    for iteration in 0..settings.max_iterations {
        let mut scheduler = Scheduler::new(&hier, settings, &mut memo);
        let Some(ops) = scheduler.schedule_top_level(best.peak) else {
            tracing::info!("iteration {}: no schedule within {} bytes", iteration, best.peak);
            break;
        };
        let peak = estimate_peak(graph, &ops);

        let ungrouped = ungroup_around_peak(&mut hier, &ops);
        tracing::info!(
            "iteration {}: peak {} (rpo {}), ungrouped {} groups, {} left",
            iteration,
            peak,
            rpo_peak,
            ungrouped,
            hier.group_count()
        );

        if peak < best.peak {
            best = Schedule { ops, peak };
        }
        if ungrouped == 0 || peak > last_peak {
            break;
        }
        last_peak = peak;
    }

    best
}

/// Dissolve the groups around the values alive at the peak of `ops`, together with the groups right behind them.
///
/// Returns the number of dissolved groups.
pub fn ungroup_around_peak(hier: &mut HierGraph, ops: &[OpId]) -> usize {
    let graph = hier.graph();
    let stat = compute_lifetime(graph, ops);

    let mut values = HashSet::new();
    for time in stat.peak_times() {
        values.extend(stat.alive_at(time));
    }

    let mut groups = vec![];
    let mut add_group_of = |hier: &HierGraph, op: OpId| {
        if let Some(group) = hier.group_of(hier.seq_of(op)) {
            if !groups.contains(&group) {
                groups.push(group);
            }
        }
    };
    for value in values.into_iter().sorted() {
        let info = &graph[value];
        for &op in info.def.iter().chain(&info.uses) {
            add_group_of(hier, op);
        }
    }

    let succ_groups = groups
        .iter()
        .flat_map(|&group| hier[group].succs.iter().copied())
        .filter(|&succ| hier.as_group(succ).is_some())
        .collect_vec();
    for group in succ_groups {
        if !groups.contains(&group) {
            groups.push(group);
        }
    }

    for &group in &groups {
        tracing::debug!("ungrouping {}", hier.label(group));
        ungroup(hier, group);
    }
    groups.len()
}

/// Put the sequences of `group` back on the top level, restoring their edges from the backup
/// taken before grouping.
pub fn ungroup(hier: &mut HierGraph, group: VertId) {
    let seqs = hier.group(group).seqs.clone();
    for &seq in &seqs {
        hier.seq_mut(seq).group = None;
    }

    // a backed up neighbour might be hidden in another group by now
    let visible = |hier: &HierGraph, vert: VertId| hier.group_of(vert).unwrap_or(vert);

    for &seq in &seqs {
        let preds = hier.prev_preds(seq).iter().map(|&p| visible(hier, p)).unique().collect_vec();
        let succs = hier.prev_succs(seq).iter().map(|&s| visible(hier, s)).unique().collect_vec();
        let vertex = hier.vertex_mut(seq);
        vertex.preds = preds;
        vertex.succs = succs;
    }

    let outside = hier[group].preds.iter().chain(&hier[group].succs).copied().collect_vec();
    for vert in outside {
        let vertex = hier.vertex_mut(vert);
        vertex.preds.retain(|&v| v != group);
        vertex.succs.retain(|&v| v != group);
    }
    hier.remove(group);

    for &seq in &seqs {
        for pred in hier[seq].preds.clone() {
            if !seqs.contains(&pred) && !hier[pred].succs.contains(&seq) {
                hier.vertex_mut(pred).succs.push(seq);
            }
        }
        for succ in hier[seq].succs.clone() {
            if !seqs.contains(&succ) && !hier[succ].preds.contains(&seq) {
                hier.vertex_mut(succ).preds.push(seq);
            }
        }
    }
}

/// A schedule under construction.
#[derive(Debug, Clone)]
struct Partial {
    ops: Vec<OpId>,
    states: MemStateVec,
    /// The uses left for every value.
    remaining: Vec<u32>,
    /// The unscheduled predecessors left for every vertex.
    indegree: Vec<u32>,
}

/// The schedule of a group on its own, starting from zero memory.
#[derive(Debug, Clone)]
struct GroupOrder {
    ops: Vec<OpId>,
    peak: i64,
}

/// The group and, for each of its consumed values, whether that value dies inside the group.
type GroupKey = (VertId, Vec<bool>);

#[derive(Debug, Default)]
struct GroupMemo {
    rpo: HashMap<GroupKey, GroupOrder>,
    dp: HashMap<GroupKey, Option<GroupOrder>>,
}

struct Scheduler<'h, 'g, 'm> {
    hier: &'h HierGraph<'g>,
    graph: &'g OpGraph,
    max_states: usize,
    memo: &'m mut GroupMemo,
}

impl<'h, 'g, 'm> Scheduler<'h, 'g, 'm> {
    fn new(hier: &'h HierGraph<'g>, settings: &SchedSettings, memo: &'m mut GroupMemo) -> Self {
        Scheduler {
            hier,
            graph: hier.graph(),
            max_states: settings.max_states.max(1),
            memo,
        }
    }

    fn schedule_top_level(&mut self, budget: u64) -> Option<Vec<OpId>> {
        let hier = self.hier;
        let graph = self.graph;

        let verts = hier.top_level();
        let dead_inputs: u64 = graph
            .inputs()
            .iter()
            .filter(|&&v| graph.use_count(v) == 0)
            .map(|&v| graph.size(v))
            .sum();
        let states = MemStateVec::with_initial(graph.input_size() - dead_inputs);

        let remaining = graph.values().map(|v| graph.use_count(v)).collect_vec();
        let preds = |v: VertId| hier[v].preds.iter().filter(|&&p| !hier.is_input(p)).count();
        let succs = |v: VertId| hier[v].succs.iter().copied().filter(|&s| !hier.is_output(s)).collect_vec();

        self.run_dp(&verts, preds, succs, states, remaining, Some(budget as i64))
            .map(|partial| partial.ops)
    }

    /// Dynamic programming over the sets of ready vertices.
    ///
    /// Partial schedules that reach the same ready set have scheduled the same vertices,
    /// so only the one with the lowest peak is kept for every set.
    fn run_dp(
        &mut self,
        verts: &[VertId],
        preds: impl Fn(VertId) -> usize,
        succs: impl Fn(VertId) -> Vec<VertId>,
        states: MemStateVec,
        remaining: Vec<u32>,
        budget: Option<i64>,
    ) -> Option<Partial> {
        let mut indegree = vec![0; self.hier.len()];
        for &v in verts {
            indegree[v.index()] = preds(v) as u32;
        }
        let ready = verts.iter().copied().filter(|&v| indegree[v.index()] == 0).sorted().collect_vec();

        let mut frontier: IndexMap<Vec<VertId>, Partial> = IndexMap::new();
        frontier.insert(
            ready,
            Partial {
                ops: vec![],
                states,
                remaining,
                indegree,
            },
        );

        for _ in 0..verts.len() {
            let mut next: IndexMap<Vec<VertId>, Partial> = IndexMap::new();

            for (ready, partial) in &frontier {
                for &vert in ready {
                    let mut partial = partial.clone();
                    self.append_vertex(&mut partial, vert, budget);
                    if budget.map_or(false, |budget| partial.states.peak() > budget) {
                        continue;
                    }

                    let mut next_ready = ready.iter().copied().filter(|&v| v != vert).collect_vec();
                    for succ in succs(vert) {
                        let count = &mut partial.indegree[succ.index()];
                        *count -= 1;
                        if *count == 0 {
                            next_ready.push(succ);
                        }
                    }
                    next_ready.sort();

                    match next.get(&next_ready) {
                        Some(prev) if prev.states.peak() <= partial.states.peak() => {}
                        _ => {
                            next.insert(next_ready, partial);
                        }
                    }
                }
            }

            if next.is_empty() {
                return None;
            }
            if next.len() > self.max_states {
                next.sort_by(|_, a, _, b| {
                    (a.states.peak(), a.states.latest()).cmp(&(b.states.peak(), b.states.latest()))
                });
                next.truncate(self.max_states);
            }
            frontier = next;
        }

        let (ready, partial) = frontier.pop()?;
        debug_assert!(ready.is_empty() && frontier.is_empty());
        Some(partial)
    }

    fn append_vertex(&mut self, partial: &mut Partial, vert: VertId, budget: Option<i64>) {
        let hier = self.hier;
        match &hier[vert].kind {
            VertexKind::Sequence(seq) => {
                for &op in &seq.ops {
                    append_op(self.graph, partial, op);
                }
            }
            VertexKind::Group(group) => {
                let killed = group
                    .consumed
                    .iter()
                    .map(|&(value, count)| partial.remaining[value.index()] == count)
                    .collect_vec();
                let slack = budget.map_or(i64::MAX, |budget| budget - partial.states.latest());
                let order = self.schedule_group((vert, killed), slack);
                for op in order {
                    append_op(self.graph, partial, op);
                }
            }
            VertexKind::Input(_) | VertexKind::Output(_) => {
                unreachable!("Only sequences and groups are scheduled, got {:?}", vert)
            }
        }
    }

    /// Schedule a group in reverse post-order if that fits in `slack`, otherwise with dynamic programming.
    fn schedule_group(&mut self, key: GroupKey, slack: i64) -> Vec<OpId> {
        if !self.memo.rpo.contains_key(&key) {
            let order = self.group_rpo(&key);
            self.memo.rpo.insert(key.clone(), order);
        }
        let rpo = &self.memo.rpo[&key];
        if rpo.peak <= slack {
            return rpo.ops.clone();
        }

        if !self.memo.dp.contains_key(&key) {
            let order = self.group_dp(&key);
            self.memo.dp.insert(key.clone(), order);
        }
        let rpo = &self.memo.rpo[&key];
        match &self.memo.dp[&key] {
            Some(dp) if dp.peak < rpo.peak => dp.ops.clone(),
            _ => rpo.ops.clone(),
        }
    }

    /// The use counts at the start of a group: values consumed by the group that do not die
    /// inside it keep one extra use.
    fn group_remaining(&self, key: &GroupKey) -> Vec<u32> {
        let graph = self.graph;
        let (group, killed) = key;

        let mut remaining = graph.values().map(|v| graph.use_count(v)).collect_vec();
        for (&(value, count), &killed) in self.hier.group(*group).consumed.iter().zip_eq(killed) {
            remaining[value.index()] = if killed { count } else { count + 1 };
        }
        remaining
    }

    fn group_rpo(&self, key: &GroupKey) -> GroupOrder {
        let hier = self.hier;
        let group = hier.group(key.0);

        let mut visited = HashSet::new();
        let mut seqs = vec![];
        for &exit in &group.exits {
            let mut stack = vec![(exit, false)];
            while let Some((seq, expanded)) = stack.pop() {
                if expanded {
                    seqs.push(seq);
                    continue;
                }
                if !visited.insert(seq) {
                    continue;
                }
                stack.push((seq, true));
                for &pred in hier[seq].preds.iter().rev() {
                    if hier.group_of(pred) == Some(key.0) && !visited.contains(&pred) {
                        stack.push((pred, false));
                    }
                }
            }
        }
        debug_assert_eq!(seqs.len(), group.seqs.len());

        let mut partial = Partial {
            ops: vec![],
            states: MemStateVec::new(),
            remaining: self.group_remaining(key),
            indegree: vec![],
        };
        for seq in seqs {
            for &op in &hier.seq(seq).ops {
                append_op(self.graph, &mut partial, op);
            }
        }

        GroupOrder {
            peak: partial.states.peak(),
            ops: partial.ops,
        }
    }

    fn group_dp(&mut self, key: &GroupKey) -> Option<GroupOrder> {
        let hier = self.hier;
        let group_id = key.0;
        let group = hier.group(group_id);

        let preds = |v: VertId| hier[v].preds.len();
        let succs = |v: VertId| {
            hier[v]
                .succs
                .iter()
                .copied()
                .filter(|&s| hier.group_of(s) == Some(group_id))
                .collect_vec()
        };

        let remaining = self.group_remaining(key);
        let partial = self.run_dp(&group.seqs, preds, succs, MemStateVec::new(), remaining, None)?;
        Some(GroupOrder {
            peak: partial.states.peak(),
            ops: partial.ops,
        })
    }
}

fn append_op(graph: &OpGraph, partial: &mut Partial, op: OpId) {
    let mut killed: Vec<ValueId> = vec![];
    for value in graph.value_inputs(op) {
        let remaining = &mut partial.remaining[value.index()];
        *remaining -= 1;
        if *remaining == 0 {
            killed.push(value);
        }
    }

    let (inc, dec) = compute_inc_dec(graph, op, &killed);
    partial.states.append(inc, dec);
    partial.ops.push(op);
}
