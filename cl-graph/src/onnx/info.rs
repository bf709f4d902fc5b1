use std::fmt::Write;

use itertools::Itertools;

use crate::onnx::edit::short_name;
use crate::onnx::proto::attribute_proto::AttributeType;
use crate::onnx::proto::tensor_proto::DataType;
use crate::onnx::proto::{AttributeProto, ModelProto, TensorProto};
use crate::onnx::result::{OnnxResult, UnwrapProto};

/// Render a human-readable listing of the nodes and initializers of `model`.
///
/// Names are shortened with `prefix`, see [short_name].
pub fn format_model_info(model: &ModelProto, prefix: &str) -> OnnxResult<String> {
    let graph = model.graph.as_ref().unwrap_proto("model.graph")?;
    let mut f = String::new();

    let names = |names: &[String]| names.iter().map(|n| short_name(n, prefix)).join(", ");

    // writing into a string cannot fail
    let _ = writeln!(f, "inputs: ({})", names(&graph.input.iter().map(|i| i.name.clone()).collect_vec()));
    let _ = writeln!(f, "outputs: ({})", names(&graph.output.iter().map(|i| i.name.clone()).collect_vec()));

    let _ = writeln!(f, "nodes:");
    for node in &graph.node {
        let attrs = node.attribute.iter().map(format_attribute).join(", ");
        let _ = writeln!(
            f,
            "  {} ({}) {{{}}} -> ({})",
            node.op_type,
            names(&node.input),
            attrs,
            names(&node.output)
        );
    }

    let _ = writeln!(f, "initializers:");
    for tensor in &graph.initializer {
        let _ = writeln!(f, "  {}: {}", short_name(&tensor.name, prefix), format_tensor_type(tensor));
    }

    Ok(f)
}

fn format_attribute(attr: &AttributeProto) -> String {
    let value = match attr.r#type() {
        AttributeType::Float => format!("{}", attr.f),
        AttributeType::Int => format!("{}", attr.i),
        AttributeType::String => format!("{:?}", String::from_utf8_lossy(&attr.s)),
        AttributeType::Tensor => attr.t.as_ref().map_or_else(|| "?".to_owned(), format_tensor_type),
        AttributeType::Floats => format!("{:?}", attr.floats),
        AttributeType::Ints => format!("{:?}", attr.ints),
        other => other.as_str_name().to_lowercase(),
    };
    format!("{}={}", attr.name, value)
}

fn format_tensor_type(tensor: &TensorProto) -> String {
    let dtype = DataType::try_from(tensor.data_type).map_or_else(
        |_| format!("type{}", tensor.data_type),
        |ty| ty.as_str_name().to_lowercase(),
    );
    format!("{}[{}]", dtype, tensor.dims.iter().join(", "))
}
