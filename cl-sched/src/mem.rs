use itertools::Itertools;

use crate::graph::{OpGraph, OpId, ValueId};
use crate::life::overlapped_value;

/// The memory footprint after each op of a (partial) schedule.
///
/// Every op has two states: the transient one while it runs, with its outputs allocated
/// but its dying inputs not yet freed, and the stable one after it finished.
/// A vector created with [MemStateVec::new] holds states relative to whatever was allocated before it.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct MemStateVec {
    initial: i64,
    latest: i64,
    peak: i64,
    transients: Vec<i64>,
    stables: Vec<i64>,
}

impl MemStateVec {
    pub fn new() -> Self {
        Self::with_initial(0)
    }

    /// Start from `initial` bytes that are already allocated, typically the model inputs.
    pub fn with_initial(initial: u64) -> Self {
        let initial = initial as i64;
        MemStateVec {
            initial,
            latest: initial,
            peak: initial,
            transients: vec![],
            stables: vec![],
        }
    }

    /// The `(transient, stable)` pair that appending an op with these changes would result in.
    pub fn compute_state(&self, inc: u64, dec: u64) -> (i64, i64) {
        let up = self.latest + inc as i64;
        let down = up - dec as i64;
        (up, down)
    }

    pub fn append(&mut self, inc: u64, dec: u64) {
        let (up, down) = self.compute_state(inc, dec);
        self.push(up, down);
    }

    /// Append all states of `other`, shifted so it starts from the current footprint.
    pub fn extend(&mut self, other: &MemStateVec) {
        let offset = self.latest - other.initial;
        for (&up, &down) in other.transients.iter().zip_eq(&other.stables) {
            self.push(up + offset, down + offset);
        }
    }

    fn push(&mut self, up: i64, down: i64) {
        self.transients.push(up);
        self.stables.push(down);
        self.latest = down;
        self.peak = self.peak.max(up);
    }

    /// The footprint after the last op.
    pub fn latest(&self) -> i64 {
        self.latest
    }

    /// The highest footprint reached, including the initial one.
    pub fn peak(&self) -> i64 {
        self.peak
    }

    /// The highest stable state of the appended ops, the initial footprint if there are none.
    pub fn max_stable(&self) -> i64 {
        self.stables.iter().copied().max().unwrap_or(self.initial)
    }

    pub fn transients(&self) -> &[i64] {
        &self.transients
    }

    pub fn stables(&self) -> &[i64] {
        &self.stables
    }

    pub fn len(&self) -> usize {
        self.transients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transients.is_empty()
    }
}

/// Compute how much memory `op` allocates when it starts and frees when it finishes,
/// given the values in `killed` that are not needed any more after it.
///
/// If the output can be written over a killed input nothing is allocated and that input is not freed.
/// Outputs that nothing uses are freed right away.
pub fn compute_inc_dec(graph: &OpGraph, op: OpId, killed: &[ValueId]) -> (u64, u64) {
    let info = &graph[op];
    let overlapped = overlapped_value(graph, op, killed);

    let inc = if overlapped.is_some() {
        0
    } else {
        info.outputs.iter().map(|&v| graph.size(v)).sum()
    };

    let freed_inputs: u64 = graph
        .value_inputs(op)
        .unique()
        .filter(|v| killed.contains(v) && Some(*v) != overlapped)
        .map(|v| graph.size(v))
        .sum();
    let dead_outputs: u64 = info
        .outputs
        .iter()
        .filter(|&&v| graph.use_count(v) == 0)
        .map(|&v| graph.size(v))
        .sum();

    (inc, freed_inputs + dead_outputs)
}
