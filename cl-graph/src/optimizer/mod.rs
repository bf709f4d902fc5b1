//! Graph-level rewrites applied before export.

use crate::graph::Graph;
use crate::optimizer::core::Optimizer;

mod core;

#[derive(Debug, Copy, Clone)]
pub struct OptimizerSettings {
    /// When `false` the graph is returned unchanged.
    pub optimize: bool,
    /// Fold a batchnorm into the conv producing its input, if both only have constant parameters.
    pub fuse_bn_into_conv: bool,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        OptimizerSettings {
            optimize: true,
            fuse_bn_into_conv: true,
        }
    }
}

/// Build an optimized copy of `graph` with the same inputs and outputs, in the same order.
pub fn optimize_graph(graph: &Graph, settings: OptimizerSettings) -> Graph {
    if !settings.optimize {
        return graph.clone();
    }

    let mut optimizer = Optimizer::new(settings, graph);
    for &input in graph.inputs() {
        optimizer.copy_input(input);
    }
    for &output in graph.outputs() {
        optimizer.copy_output(output);
    }

    let (optimized, fused_bn) = optimizer.finish();
    tracing::debug!(
        "Optimized graph from {} to {} values, fused {} batchnorms",
        graph.len(),
        optimized.len(),
        fused_bn
    );
    optimized
}
