//! In-place patches on onnx models that were exported elsewhere.

use std::collections::HashSet;

use tracing::debug;

use crate::onnx::load::load_graph;
use crate::onnx::proto::tensor_shape_proto::dimension;
use crate::onnx::proto::type_proto::Value as ProtoTypeValue;
use crate::onnx::proto::{ModelProto, TensorShapeProto, ValueInfoProto};
use crate::onnx::result::{OnnxError, OnnxResult, UnwrapProto};
use crate::onnx::save::{value_info, DEFAULT_BATCH_PARAM};

/// Fix the batch dimension of every graph input and output to `batch`.
///
/// This drops all intermediate `value_info` since it may no longer be correct,
/// use [infer_shapes] to recompute it.
pub fn change_batch_size(model: &mut ModelProto, batch: usize) -> OnnxResult<()> {
    let graph = model.graph.as_mut().unwrap_proto("model.graph")?;
    graph.value_info.clear();

    let initializers: HashSet<String> = graph.initializer.iter().map(|t| t.name.clone()).collect();

    for info in graph.input.iter_mut().chain(graph.output.iter_mut()) {
        if initializers.contains(&info.name) {
            continue;
        }

        let shape = tensor_shape_mut(info)?;
        if let Some(dim) = shape.dim.first_mut() {
            dim.value = Some(dimension::Value::DimValue(batch as i64));
        }
    }

    Ok(())
}

/// Recompute the `value_info` of every intermediate node output by loading the model.
pub fn infer_shapes(model: &mut ModelProto) -> OnnxResult<()> {
    let loaded = load_graph(model, None)?;
    let batch_param = loaded.batch_param.as_deref().unwrap_or(DEFAULT_BATCH_PARAM);

    let graph = model.graph.as_mut().unwrap_proto("model.graph")?;
    let external: HashSet<&str> = graph
        .input
        .iter()
        .chain(&graph.output)
        .map(|info| info.name.as_str())
        .collect();

    let mut infos = vec![];
    for (name, value) in &loaded.named_values {
        if external.contains(name.as_str()) {
            continue;
        }
        let shape = &loaded.graph[*value].shape;
        infos.push(value_info(name, shape, None, batch_param)?);
    }

    debug!("Inferred {} intermediate shapes", infos.len());
    graph.value_info = infos;
    Ok(())
}

/// The part of `name` after the first occurrence of `prefix`, or `name` itself if `prefix` does not occur.
pub fn short_name<'a>(name: &'a str, prefix: &str) -> &'a str {
    if prefix.is_empty() {
        return name;
    }
    match name.find(prefix) {
        Some(index) => &name[index + prefix.len()..],
        None => name,
    }
}

/// Apply [short_name] to every name in the graph.
pub fn shorten_names(model: &mut ModelProto, prefix: &str) -> OnnxResult<()> {
    let graph = model.graph.as_mut().unwrap_proto("model.graph")?;
    let shorten = |name: &mut String| {
        let short = short_name(name, prefix);
        if short.len() != name.len() {
            *name = short.to_owned();
        }
    };

    for info in graph
        .input
        .iter_mut()
        .chain(graph.output.iter_mut())
        .chain(graph.value_info.iter_mut())
    {
        shorten(&mut info.name);
    }
    for tensor in &mut graph.initializer {
        shorten(&mut tensor.name);
    }
    for node in &mut graph.node {
        shorten(&mut node.name);
        node.input.iter_mut().for_each(shorten);
        node.output.iter_mut().for_each(shorten);
    }

    Ok(())
}

/// Remove the image preprocessing that precedes the network proper.
///
/// The first graph input is switched from `NHWC` to `NCHW`, every node up to and including the first
/// `Transpose` is deleted, and the nodes that used the transposed value now read the input directly.
pub fn remove_cnn_preproc(model: &mut ModelProto) -> OnnxResult<()> {
    let graph = model.graph.as_mut().unwrap_proto("model.graph")?;

    let transpose_index = graph
        .node
        .iter()
        .position(|node| node.op_type == "Transpose")
        .ok_or(OnnxError::NoTransposeFound)?;

    let input = graph.input.first_mut().ok_or(OnnxError::NoInputs)?;
    let input_name = input.name.clone();
    let shape = tensor_shape_mut(input)?;
    if shape.dim.len() != 4 {
        return Err(OnnxError::UnsupportedValueShape(
            input_name,
            format!("rank {}", shape.dim.len()),
        ));
    }
    shape.dim = [0, 3, 1, 2].iter().map(|&i| shape.dim[i].clone()).collect();

    let removed = graph.node.drain(..=transpose_index).collect::<Vec<_>>();
    let transposed = removed.last().and_then(|node| node.output.first()).cloned();
    debug!("Removed {} preprocessing nodes", removed.len());

    let mut rewired = false;
    for node in &mut graph.node {
        for node_input in &mut node.input {
            if Some(&*node_input) == transposed.as_ref() {
                *node_input = input_name.clone();
                rewired = true;
            }
        }
    }

    if !rewired {
        if let Some(first_input) = graph.node.first_mut().and_then(|node| node.input.first_mut()) {
            *first_input = input_name;
        }
    }

    Ok(())
}

/// Drop initializers (and their graph input entries) that no node or output references.
/// Returns the number of removed initializers.
pub fn prune_unused_initializers(model: &mut ModelProto) -> OnnxResult<usize> {
    let graph = model.graph.as_mut().unwrap_proto("model.graph")?;

    let used: HashSet<String> = graph
        .node
        .iter()
        .flat_map(|node| node.input.iter().cloned())
        .chain(graph.output.iter().map(|info| info.name.clone()))
        .collect();

    let before = graph.initializer.len();
    let mut removed = HashSet::new();
    graph.initializer.retain(|tensor| {
        let keep = used.contains(&tensor.name);
        if !keep {
            removed.insert(tensor.name.clone());
        }
        keep
    });
    graph.input.retain(|info| !removed.contains(&info.name));

    Ok(before - graph.initializer.len())
}

fn tensor_shape_mut(info: &mut ValueInfoProto) -> OnnxResult<&mut TensorShapeProto> {
    let ty = info.r#type.as_mut().unwrap_proto("value_info.type")?;
    let ProtoTypeValue::TensorType(tensor) = ty.value.as_mut().unwrap_proto("type.value")?;
    tensor.shape.as_mut().unwrap_proto("tensor_type.shape")
}
