use rand::Rng;

use crate::graph::{OpGraph, OpId};

/// Order the ops depth-first from the graph outputs, every op right after its last missing operand.
///
/// Ops that no output depends on are visited afterwards, so the result is always a full permutation.
pub fn reverse_post_order(graph: &OpGraph) -> Vec<OpId> {
    let roots = graph
        .outputs()
        .iter()
        .filter_map(|&v| graph[v].def)
        .chain(graph.ops().filter(|&op| graph[op].succs.is_empty()));

    let mut visited = vec![false; graph.op_count()];
    let mut order = Vec::with_capacity(graph.op_count());
    // (op, whether its predecessors have been pushed already)
    let mut stack = vec![];

    for root in roots {
        stack.push((root, false));

        while let Some((op, expanded)) = stack.pop() {
            if visited[op.index()] {
                continue;
            }

            if expanded {
                visited[op.index()] = true;
                order.push(op);
            } else {
                stack.push((op, true));
                for &pred in graph[op].preds.iter().rev() {
                    if !visited[pred.index()] {
                        stack.push((pred, false));
                    }
                }
            }
        }
    }

    order
}

/// Sample a topological order by repeatedly picking a uniformly random op among the ready ones.
pub fn random_sample(graph: &OpGraph, rng: &mut impl Rng) -> Vec<OpId> {
    let mut pred_count = graph.ops().map(|op| graph[op].preds.len()).collect::<Vec<_>>();
    let mut ready = graph.ops().filter(|op| pred_count[op.index()] == 0).collect::<Vec<_>>();
    let mut order = Vec::with_capacity(graph.op_count());

    while !ready.is_empty() {
        let op = ready.swap_remove(rng.gen_range(0..ready.len()));
        order.push(op);

        for &succ in &graph[op].succs {
            pred_count[succ.index()] -= 1;
            if pred_count[succ.index()] == 0 {
                ready.push(succ);
            }
        }
    }

    order
}

/// Whether `order` contains every op exactly once, each after all of its predecessors.
pub fn is_valid_order(graph: &OpGraph, order: &[OpId]) -> bool {
    if order.len() != graph.op_count() {
        return false;
    }

    let mut position = vec![None; graph.op_count()];
    for (i, &op) in order.iter().enumerate() {
        if op.index() >= graph.op_count() || position[op.index()].is_some() {
            return false;
        }
        position[op.index()] = Some(i);
    }

    order.iter().enumerate().all(|(i, &op)| {
        graph[op]
            .preds
            .iter()
            .all(|pred| position[pred.index()].map_or(false, |p| p < i))
    })
}
