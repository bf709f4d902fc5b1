use itertools::Itertools;

use crate::graph::{OpGraph, OpId, ValueId, ValueKind};

/// Onnx ops that compute every output element from the input elements at the same position.
const ELEMENT_WISE_OPS: &[&str] = &[
    "Abs",
    "Acos",
    "Add",
    "And",
    "Asin",
    "Atan",
    "Ceil",
    "Cos",
    "Div",
    "Elu",
    "Equal",
    "Erf",
    "Exp",
    "Floor",
    "Greater",
    "HardSigmoid",
    "LeakyRelu",
    "Less",
    "Log",
    "Max",
    "Mean",
    "Min",
    "Mul",
    "Neg",
    "Not",
    "Or",
    "PRelu",
    "Pow",
    "Reciprocal",
    "Relu",
    "Selu",
    "Sigmoid",
    "Sign",
    "Sin",
    "Softplus",
    "Softsign",
    "Sqrt",
    "Sub",
    "Sum",
    "Tan",
    "Tanh",
    "ThresholdedRelu",
    "Xor",
];

pub fn is_element_wise(op_type: &str) -> bool {
    ELEMENT_WISE_OPS.contains(&op_type)
}

/// The operand index whose memory the single output of `op` may be written over.
///
/// Only element-wise ops qualify. A single-input op can always reuse its input,
/// otherwise the first non-param input with the same shape and type as the output is picked.
/// The operand must additionally die at this op for the overlap to actually happen.
pub fn overlap_input(graph: &OpGraph, op: OpId) -> Option<usize> {
    let info = &graph[op];
    let &[output] = info.outputs.as_slice() else {
        return None;
    };
    if !is_element_wise(&info.op_type) {
        return None;
    }
    if info.inputs.len() == 1 {
        return Some(0);
    }

    let output = &graph[output];
    info.inputs.iter().position(|&v| {
        let input = &graph[v];
        input.kind != ValueKind::Param && input.shape == output.shape && input.dtype == output.dtype
    })
}

/// The lifetime `[gen, kill)` of a value, in op indices of a schedule.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Lifetime {
    pub value: ValueId,
    pub gen: i32,
    pub kill: i32,
    /// The size of the value in bytes.
    pub size: u64,
}

impl Lifetime {
    /// The time at which the graph inputs are generated, before any op runs.
    pub const INPUT: i32 = -1;

    pub fn length(&self) -> i32 {
        self.kill - self.gen
    }

    pub fn is_alive_at(&self, time: i32) -> bool {
        self.gen <= time && time < self.kill
    }
}

/// The lifetimes of all non-param values under a schedule, sorted by `(gen, kill)`.
#[derive(Debug, Clone)]
pub struct LifetimeStat {
    /// The first time step, [Lifetime::INPUT].
    pub begin: i32,
    /// One past the last time step, the length of the schedule.
    pub end: i32,
    pub values: Vec<Lifetime>,
}

impl LifetimeStat {
    /// The total size of the values alive at each time step in `begin..end`.
    pub fn histogram(&self) -> Vec<u64> {
        let len = (self.end - self.begin) as usize;
        let mut delta = vec![0i64; len + 1];
        for life in &self.values {
            delta[(life.gen - self.begin) as usize] += life.size as i64;
            delta[(life.kill - self.begin) as usize] -= life.size as i64;
        }

        let mut total = 0;
        delta[..len]
            .iter()
            .map(|d| {
                total += d;
                total as u64
            })
            .collect()
    }

    pub fn peak(&self) -> u64 {
        self.histogram().into_iter().max().unwrap_or(0)
    }

    /// The values alive at `time`.
    pub fn alive_at(&self, time: i32) -> Vec<ValueId> {
        self.values
            .iter()
            .filter(|life| life.is_alive_at(time))
            .map(|life| life.value)
            .collect()
    }

    /// The time steps at which the memory usage is at its peak.
    pub fn peak_times(&self) -> Vec<i32> {
        let histogram = self.histogram();
        let peak = histogram.iter().copied().max().unwrap_or(0);
        histogram
            .iter()
            .positions(|&total| total == peak)
            .map(|i| self.begin + i as i32)
            .collect()
    }
}

/// Tracks the remaining uses of every value while walking through a schedule.
struct UseTracker {
    remaining: Vec<u32>,
}

impl UseTracker {
    fn new(graph: &OpGraph) -> Self {
        UseTracker {
            remaining: graph.values().map(|v| graph.use_count(v)).collect(),
        }
    }

    /// Consume the operands of `op` and return the distinct values that are not needed afterwards.
    fn consume(&mut self, graph: &OpGraph, op: OpId) -> Vec<ValueId> {
        let mut killed = vec![];
        for value in graph.value_inputs(op) {
            let remaining = &mut self.remaining[value.index()];
            assert!(
                *remaining > 0,
                "Value {:?} used more often than it has uses",
                graph[value].name
            );
            *remaining -= 1;
            if *remaining == 0 {
                killed.push(value);
            }
        }
        killed
    }
}

/// The input the output of `op` is actually written over, if any.
pub(crate) fn overlapped_value(graph: &OpGraph, op: OpId, killed: &[ValueId]) -> Option<ValueId> {
    overlap_input(graph, op)
        .map(|i| graph[op].inputs[i])
        .filter(|v| killed.contains(v))
}

/// Compute the lifetime of every non-param value when running the ops in `order`.
///
/// Inputs are generated at [Lifetime::INPUT] and outputs live until the end. A value dies at the op
/// that overwrites it, otherwise one step after its last use. Values that are never used die one step
/// after they are generated.
pub fn compute_lifetime(graph: &OpGraph, order: &[OpId]) -> LifetimeStat {
    assert_eq!(
        order.len(),
        graph.op_count(),
        "Schedule must contain every op of {:?} exactly once",
        graph.name()
    );

    let end = order.len() as i32;
    let mut gen = vec![None; graph.values().count()];
    let mut kill = vec![None; gen.len()];

    for &input in graph.inputs() {
        gen[input.index()] = Some(Lifetime::INPUT);
        if graph.use_count(input) == 0 {
            kill[input.index()] = Some(Lifetime::INPUT + 1);
        }
    }

    let mut tracker = UseTracker::new(graph);
    for (i, &op) in order.iter().enumerate() {
        let i = i as i32;
        for &output in &graph[op].outputs {
            gen[output.index()] = Some(i);
            if graph.use_count(output) == 0 {
                kill[output.index()] = Some(i + 1);
            }
        }

        let killed = tracker.consume(graph, op);
        let overlapped = overlapped_value(graph, op, &killed);
        for value in killed {
            kill[value.index()] = Some(if Some(value) == overlapped { i } else { i + 1 });
        }
    }

    let mut values = graph
        .values()
        .filter_map(|value| {
            let gen = gen[value.index()]?;
            Some(Lifetime {
                value,
                gen,
                kill: kill[value.index()].unwrap_or(end),
                size: graph.size(value),
            })
        })
        .collect_vec();
    values.sort_by_key(|life| (life.gen, life.kill, life.value));

    LifetimeStat {
        begin: Lifetime::INPUT,
        end,
        values,
    }
}

/// Compute the peak memory usage of running the ops in `order` in a single pass,
/// without building the lifetimes. Agrees with [LifetimeStat::peak].
pub fn estimate_peak(graph: &OpGraph, order: &[OpId]) -> u64 {
    let mut total = graph.input_size();
    let mut peak = total;

    // values to be freed before the next op runs
    let mut next_kill = graph
        .inputs()
        .iter()
        .copied()
        .filter(|&v| graph.use_count(v) == 0)
        .collect_vec();

    let mut tracker = UseTracker::new(graph);
    for &op in order {
        for &output in &graph[op].outputs {
            total += graph.size(output);
        }
        for value in next_kill.drain(..) {
            total -= graph.size(value);
        }

        let killed = tracker.consume(graph, op);
        let overlapped = overlapped_value(graph, op, &killed);
        for value in killed {
            if Some(value) == overlapped {
                total -= graph.size(value);
            } else {
                next_kill.push(value);
            }
        }
        next_kill.extend(graph[op].outputs.iter().filter(|&&v| graph.use_count(v) == 0));

        peak = peak.max(total);
    }

    peak
}
