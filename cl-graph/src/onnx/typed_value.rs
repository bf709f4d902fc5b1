use itertools::Itertools;

use crate::graph::{Graph, Value};
use crate::onnx::result::{Node, OnnxError, OnnxResult};

/// A value as it appears in the onnx graph.
///
/// Integer tensors only ever show up as constant operands (shapes, pads, slice bounds),
/// so they are kept outside of the graph as plain data.
#[derive(Debug, Clone)]
pub enum OnnxValue {
    Value(Value),
    Ints { dims: Vec<usize>, data: Vec<i64> },
}

impl OnnxValue {
    pub fn unwrap_value(&self) -> Option<Value> {
        match *self {
            OnnxValue::Value(value) => Some(value),
            OnnxValue::Ints { .. } => None,
        }
    }

    /// The value as a flat list of integers, float constants are accepted if they are integral.
    pub fn as_ints(&self, graph: &Graph) -> Option<Vec<i64>> {
        match self {
            OnnxValue::Ints { data, .. } => Some(data.clone()),
            &OnnxValue::Value(value) => {
                let data = graph.as_const(value)?;
                data.iter()
                    .map(|&f| {
                        let i = f as i64;
                        (i as f32 == f).then_some(i)
                    })
                    .collect()
            }
        }
    }

    pub fn unwrap_ints(&self, node: Node<&str>, graph: &Graph) -> OnnxResult<Vec<i64>> {
        self.as_ints(graph)
            .ok_or_else(|| OnnxError::ExpectedIntOperand(node.to_owned(), self.describe(graph)))
    }

    fn describe(&self, graph: &Graph) -> String {
        match self {
            OnnxValue::Value(value) => format!("{:?} {}", value, graph[*value].shape),
            OnnxValue::Ints { dims, .. } => format!("ints [{}]", dims.iter().join(", ")),
        }
    }
}
