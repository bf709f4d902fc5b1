use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};
use itertools::{zip_eq, Itertools};
use prost::Message;

use crate::graph::{
    same_padding, try_broadcast_shape_symmetric, BinaryOp, ConvParams, Graph, Padding2d, PaddingMode, PoolOp, ReduceOp, SliceRange, UnaryOp,
    Value,
};
use crate::onnx::inputs::{Attributes, Inputs};
use crate::onnx::proto::tensor_proto::{DataLocation, DataType};
use crate::onnx::proto::tensor_shape_proto::dimension;
use crate::onnx::proto::type_proto::Value as ProtoTypeValue;
use crate::onnx::proto::{ModelProto, TensorProto, ValueInfoProto};
use crate::onnx::result::{Node, OnnxError, OnnxResult, UnwrapProto};
use crate::onnx::typed_value::OnnxValue;
use crate::shape;
use crate::shape::{Shape, Size};

/// A loaded graph together with the onnx names of its values.
#[derive(Debug)]
pub struct LoadedGraph {
    pub graph: Graph,
    /// Every node output that maps to a float value, in node order.
    pub named_values: Vec<(String, Value)>,
    /// The first symbolic dimension name found in the graph inputs.
    pub batch_param: Option<String>,
}

pub fn load_model_proto(buf: &[u8]) -> OnnxResult<ModelProto> {
    Ok(ModelProto::decode(buf)?)
}

/// Convert an onnx model into a [Graph].
///
/// Symbolic input dimensions become [Size::BATCH], or `batch` if it is given.
pub fn graph_from_model(model: &ModelProto, batch: Option<usize>) -> OnnxResult<Graph> {
    Ok(load_graph(model, batch)?.graph)
}

pub fn load_graph(model: &ModelProto, batch: Option<usize>) -> OnnxResult<LoadedGraph> {
    let model_graph = model.graph.as_ref().unwrap_proto("model.graph")?;

    let mut graph = Graph::new();
    let mut nodes: HashMap<&str, OnnxValue> = HashMap::new();
    let mut named_values = vec![];
    let mut batch_param = None;

    // load initializer values (similar to constants but defined separately)
    for tensor in &model_graph.initializer {
        let value = define_tensor_data(&mut graph, &tensor.name, tensor)?;
        if let OnnxValue::Value(value) = value {
            graph.set_debug_id(value, tensor.name.clone());
        }
        nodes.insert(&tensor.name, value);
    }

    // load inputs
    for input in &model_graph.input {
        // initializers are allowed to re-appear in the inputs, so we skip them the second time
        if nodes.contains_key(input.name.as_str()) {
            continue;
        }

        let shape = resolve_value_shape(input, batch, &mut batch_param)?;
        let value = graph.input(shape);
        graph.set_debug_id(value, input.name.clone());
        nodes.insert(&input.name, OnnxValue::Value(value));
    }

    // clear newly defined values so we don't attribute them to the first node
    let _ = graph.take_new_values();

    for node_proto in &model_graph.node {
        let node = Node {
            name: node_proto.name.as_str(),
            op_type: node_proto.op_type.as_str(),
        };

        let mut attrs = Attributes::from(node, &node_proto.attribute);
        let mut inputs = Inputs::from(node, &node_proto.input, &nodes)?;

        let values = visit_node(&mut graph, node, &mut inputs, &mut attrs)?;

        // set debug id for all newly created nodes to the current node name
        for value in graph.take_new_values() {
            graph.set_debug_id(value, node.name.to_owned())
        }

        let leftover_attributes = attrs.leftover();
        if !leftover_attributes.is_empty() {
            return Err(OnnxError::LeftoverAttributes(node.to_owned(), leftover_attributes));
        }
        let leftover_inputs = inputs.leftover();
        if !leftover_inputs.is_empty() {
            return Err(OnnxError::LeftoverInputs(node.to_owned(), leftover_inputs));
        }

        let output_names = &node_proto.output;
        if output_names.len() != values.len() {
            let message = format!("expected {} outputs, got {:?}", values.len(), output_names);
            return Err(OnnxError::InvalidOperationArgs(node.to_owned(), message));
        }
        for (name, value) in zip_eq(output_names, values) {
            if let OnnxValue::Value(inner) = value {
                named_values.push((name.clone(), inner));
            }
            // later definitions shadow earlier ones
            nodes.insert(name, value);
        }
    }

    for output in &model_graph.output {
        let value = nodes
            .get(output.name.as_str())
            .and_then(|v| v.unwrap_value())
            .ok_or_else(|| OnnxError::UnsupportedNonFloatOutput(output.name.clone()))?;
        graph.output(value);
    }

    Ok(LoadedGraph {
        graph,
        named_values,
        batch_param,
    })
}

fn visit_node(
    graph: &mut Graph,
    node: Node<&str>,
    inputs: &mut Inputs,
    attrs: &mut Attributes,
) -> OnnxResult<Vec<OnnxValue>> {
    let result = match node.op_type {
        "Conv" => {
            let input = inputs.value(0)?;
            let filter = inputs.value(1)?;
            let bias = inputs.optional_value(2)?;

            let filter_shape = graph[filter].shape.clone();
            if filter_shape.rank() != 4 || graph[input].shape.rank() != 4 {
                return Err(OnnxError::UnsupportedShape(node.to_owned(), filter_shape.to_string()));
            }
            let [_, _, kernel_h, kernel_w] = filter_shape.unwrap_fixed("Conv filter shape").unwrap_4();

            let groups = attrs.maybe_take_int("group")?.unwrap_or(1) as usize;
            if let Some(kernel_shape) = attrs.maybe_take_ints("kernel_shape")? {
                if unwrap_2(node, kernel_shape)? != [kernel_h, kernel_w] {
                    let message = format!("kernel_shape {:?} does not match filter {}", kernel_shape, filter_shape);
                    return Err(OnnxError::InvalidOperationArgs(node.to_owned(), message));
                }
            }
            let [stride_y, stride_x] = maybe_unwrap_2(node, attrs.maybe_take_ints("strides")?)?;
            let [dilation_y, dilation_x] = maybe_unwrap_2(node, attrs.maybe_take_ints("dilations")?)?;

            let padding = window_padding(
                graph,
                node,
                attrs,
                input,
                (kernel_h, kernel_w),
                (stride_y, stride_x),
                (dilation_y, dilation_x),
            )?;

            let params = ConvParams {
                stride: (stride_y, stride_x),
                dilation: (dilation_y, dilation_x),
                groups,
                padding: PaddingMode::Explicit(padding),
            };
            OnnxValue::Value(graph.conv(input, filter, bias, params))
        }
        "BatchNormalization" => {
            let input = inputs.value(0)?;
            let scale = inputs.value(1)?;
            let bias = inputs.value(2)?;
            let mean = inputs.value(3)?;
            let variance = inputs.value(4)?;

            let epsilon = attrs.maybe_take_float("epsilon")?.unwrap_or(1e-5);
            let _ = attrs.maybe_take_float("momentum")?;
            let spatial = attrs.maybe_take_int("spatial")?;
            if !matches!(spatial, None | Some(1)) {
                let message = "non-spatial batchnorm is not supported".to_owned();
                return Err(OnnxError::InvalidOperationArgs(node.to_owned(), message));
            }

            OnnxValue::Value(graph.batch_norm(input, scale, bias, mean, variance, epsilon))
        }
        "Relu" | "Sigmoid" | "Abs" | "Neg" | "Exp" | "Sqrt" | "Tanh" => {
            let op = match node.op_type {
                "Relu" => UnaryOp::Relu,
                "Sigmoid" => UnaryOp::Sigmoid,
                "Abs" => UnaryOp::Abs,
                "Neg" => UnaryOp::Neg,
                "Exp" => UnaryOp::Exp,
                "Sqrt" => UnaryOp::Sqrt,
                "Tanh" => UnaryOp::Tanh,
                _ => unreachable!(),
            };

            let input = inputs.value(0)?;
            OnnxValue::Value(graph.unary(op, input))
        }
        "Clip" => {
            let input = inputs.value(0)?;

            // older versions use attributes instead of inputs
            let min = match inputs.optional_value(1)? {
                Some(min) => graph.as_single_const(min),
                None => attrs.maybe_take_float("min")?,
            }
            .unwrap_or(f32::NEG_INFINITY);
            let max = match inputs.optional_value(2)? {
                Some(max) => graph.as_single_const(max),
                None => attrs.maybe_take_float("max")?,
            }
            .unwrap_or(f32::INFINITY);

            let result = if min == 0.0 && max == f32::INFINITY {
                graph.relu(input)
            } else {
                let max_value = graph.scalar(max);
                let min_value = graph.scalar(min);
                let mid = graph.binary(BinaryOp::Min, input, max_value);
                graph.binary(BinaryOp::Max, mid, min_value)
            };
            OnnxValue::Value(result)
        }
        "Add" | "Sub" | "Mul" | "Div" | "Min" | "Max" => {
            let op = match node.op_type {
                "Add" => BinaryOp::Add,
                "Sub" => BinaryOp::Sub,
                "Mul" => BinaryOp::Mul,
                "Div" => BinaryOp::Div,
                "Min" => BinaryOp::Min,
                "Max" => BinaryOp::Max,
                _ => unreachable!(),
            };

            let left = inputs.value(0)?;
            let right = inputs.value(1)?;

            let (left_shape, right_shape) = (&graph[left].shape, &graph[right].shape);
            if try_broadcast_shape_symmetric(left_shape, right_shape).is_none() {
                let message = format!("cannot broadcast {} and {}", left_shape, right_shape);
                return Err(OnnxError::InvalidOperationArgs(node.to_owned(), message));
            }
            OnnxValue::Value(graph.binary(op, left, right))
        }
        "MatMul" => {
            let left = inputs.value(0)?;
            let right = inputs.value(1)?;

            for value in [left, right] {
                if graph[value].shape.rank() != 2 {
                    return Err(OnnxError::UnsupportedShape(node.to_owned(), graph[value].shape.to_string()));
                }
            }
            OnnxValue::Value(graph.mat_mul(left, right))
        }
        "Gemm" => {
            let input = inputs.value(0)?;
            let weight = inputs.value(1)?;
            let bias = inputs.optional_value(2)?;

            let alpha = attrs.maybe_take_float("alpha")?.unwrap_or(1.0);
            let beta = attrs.maybe_take_float("beta")?.unwrap_or(1.0);
            let trans_a = attrs.maybe_take_bool("transA")?.unwrap_or(false);
            let trans_b = attrs.maybe_take_bool("transB")?.unwrap_or(false);

            if alpha != 1.0 || beta != 1.0 || trans_a {
                let message = format!("alpha={}, beta={}, transA={} not supported", alpha, beta, trans_a);
                return Err(OnnxError::InvalidOperationArgs(node.to_owned(), message));
            }

            let weight = if trans_b {
                transpose_const(graph, node, weight)?
            } else {
                weight
            };

            OnnxValue::Value(graph.linear(input, weight, bias))
        }
        "MaxPool" | "AveragePool" => {
            let op = match node.op_type {
                "MaxPool" => PoolOp::Max,
                "AveragePool" => PoolOp::Avg,
                _ => unreachable!(),
            };

            let input = inputs.value(0)?;

            let kernel = unwrap_2(node, attrs.take_ints("kernel_shape")?)?;
            let [stride_y, stride_x] = maybe_unwrap_2(node, attrs.maybe_take_ints("strides")?)?;
            let ceil_mode = attrs.maybe_take_bool("ceil_mode")?.unwrap_or(false);
            let count_include_pad = attrs.maybe_take_bool("count_include_pad")?.unwrap_or(false);
            let dilations = maybe_unwrap_2(node, attrs.maybe_take_ints("dilations")?)?;
            let _ = attrs.maybe_take_int("storage_order")?;

            if ceil_mode || dilations != [1, 1] {
                let message = "ceil_mode and dilation are not supported for pooling".to_owned();
                return Err(OnnxError::InvalidOperationArgs(node.to_owned(), message));
            }

            let padding = window_padding(
                graph,
                node,
                attrs,
                input,
                (kernel[0], kernel[1]),
                (stride_y, stride_x),
                (1, 1),
            )?;

            if count_include_pad && !padding.is_zero() {
                let message = "count_include_pad with nonzero padding is not supported".to_owned();
                return Err(OnnxError::InvalidOperationArgs(node.to_owned(), message));
            }

            let result = graph.pool(
                input,
                op,
                (kernel[0], kernel[1]),
                (stride_y, stride_x),
                PaddingMode::Explicit(padding),
            );
            OnnxValue::Value(result)
        }
        "GlobalAveragePool" => {
            let input = inputs.value(0)?;

            let shape = graph[input].shape.clone();
            if shape.rank() != 4 {
                return Err(OnnxError::UnsupportedShape(node.to_owned(), shape.to_string()));
            }

            let pooled = graph.global_avg_pool(input);
            OnnxValue::Value(graph.view(pooled, shape.replace_all(&[2, 3], shape![1])))
        }
        "Pad" => {
            let input = inputs.value(0)?;
            let rank = graph[input].shape.rank();

            let mode = attrs.maybe_take_string("mode")?.unwrap_or("constant");
            if mode != "constant" {
                let message = format!("only constant padding is supported, got {:?}", mode);
                return Err(OnnxError::InvalidOperationArgs(node.to_owned(), message));
            }

            // older versions use attributes instead of inputs
            let pads = match inputs.optional(1)? {
                Some(pads) => pads.unwrap_ints(node, graph)?,
                None => attrs.take_ints("pads")?.to_vec(),
            };
            let constant = match inputs.optional_value(2)? {
                Some(value) => graph.as_single_const(value),
                None => attrs.maybe_take_float("value")?,
            }
            .unwrap_or(0.0);

            if pads.len() != 2 * rank || pads.iter().any(|&p| p < 0) || constant != 0.0 {
                let message = format!("unsupported pads {:?} with value {}", pads, constant);
                return Err(OnnxError::InvalidOperationArgs(node.to_owned(), message));
            }

            let pads = (0..rank)
                .map(|axis| (pads[axis] as usize, pads[rank + axis] as usize))
                .collect_vec();
            OnnxValue::Value(graph.pad(input, pads))
        }
        "Slice" => {
            let input = inputs.value(0)?;
            let input_shape = graph[input].shape.clone();

            let mut get = |index: usize, name: &str| -> OnnxResult<Option<Vec<i64>>> {
                match inputs.optional(index)? {
                    Some(value) => Ok(Some(value.unwrap_ints(node, graph)?)),
                    None => Ok(attrs.maybe_take_ints(name)?.map(|v| v.to_vec())),
                }
            };

            let starts = get(1, "starts")?.unwrap_proto("Slice starts")?;
            let ends = get(2, "ends")?.unwrap_proto("Slice ends")?;
            let slice_rank = starts.len();
            let axes = get(3, "axes")?.unwrap_or_else(|| (0..slice_rank as i64).collect_vec());
            let steps = get(4, "steps")?.unwrap_or_else(|| vec![1; slice_rank]);

            if ends.len() != slice_rank || axes.len() != slice_rank || steps.len() != slice_rank {
                let message = format!("inconsistent slice operands {:?} {:?} {:?} {:?}", starts, ends, axes, steps);
                return Err(OnnxError::InvalidOperationArgs(node.to_owned(), message));
            }

            let mut result = input;
            for i in 0..slice_rank {
                let axis = abs_axis(node, axes[i], input_shape.rank())?;
                let size = input_shape[axis].try_unwrap_fixed().ok_or_else(|| {
                    let message = format!("cannot slice batch-dependent axis {} of {}", axis, input_shape);
                    OnnxError::InvalidOperationArgs(node.to_owned(), message)
                })?;
                if steps[i] <= 0 {
                    let message = format!("only positive slice steps are supported, got {}", steps[i]);
                    return Err(OnnxError::InvalidOperationArgs(node.to_owned(), message));
                }
                let step = steps[i] as usize;

                let start = clamp_index(starts[i], size);
                let end = clamp_index(ends[i], size).max(start);
                // round the end up to a multiple of step, the last selected index stays below `end`
                let end = start + (end - start).div_ceil(step) * step;

                result = graph.slice(result, axis, SliceRange::new(start, end, step));
            }

            OnnxValue::Value(result)
        }
        "Concat" => {
            let values = inputs.take_all_variadic()?;
            let values: Vec<Value> = values
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    v.unwrap_value()
                        .ok_or_else(|| OnnxError::ExpectedFloatOperand(node.to_owned(), i))
                })
                .try_collect()?;
            if values.is_empty() {
                let message = "must concatenate at least one value".to_owned();
                return Err(OnnxError::InvalidOperationArgs(node.to_owned(), message));
            }

            let rank = graph[values[0]].shape.rank();
            let axis = abs_axis(node, attrs.take_int("axis")?, rank)?;

            let base_shape = graph[values[0]].shape.replace(axis, shape![0]);
            let mut total = Some(Size::ZERO);
            for &value in &values {
                let shape = &graph[value].shape;
                total = total.and_then(|t| t + shape.dims.get(axis).copied()?);
                if shape.rank() != rank || shape.replace(axis, shape![0]) != base_shape || total.is_none() {
                    let message = format!("cannot concatenate {} onto {} along axis {}", shape, base_shape, axis);
                    return Err(OnnxError::InvalidOperationArgs(node.to_owned(), message));
                }
            }
            OnnxValue::Value(graph.concat(values, axis))
        }
        "Reshape" => {
            let input = inputs.value(0)?;
            let new_shape = inputs.required(1)?.unwrap_ints(node, graph)?;
            let allow_zero = attrs.maybe_take_bool("allowzero")?.unwrap_or(false);

            let old_shape = graph[input].shape.clone();
            let output_shape = calculate_reshape_output_shape(node, &old_shape, &new_shape, allow_zero)?;
            OnnxValue::Value(graph.view(input, output_shape))
        }
        "Flatten" => {
            let input = inputs.value(0)?;
            let shape = graph[input].shape.clone();
            // `axis == rank` is allowed and flattens everything into the first axis
            let axis = match attrs.maybe_take_int("axis")?.unwrap_or(1) {
                axis if axis == shape.rank() as i64 => shape.rank(),
                axis => abs_axis(node, axis, shape.rank())?,
            };

            let kept: Size = shape.dims[..axis].iter().copied().product();
            let flat: Size = shape.dims[axis..].iter().copied().product();
            OnnxValue::Value(graph.view(input, shape![kept, flat]))
        }
        "Transpose" => {
            let input = inputs.value(0)?;
            let rank = graph[input].shape.rank();
            let perm = attrs
                .maybe_take_ints("perm")?
                .map_or_else(|| (0..rank as i64).rev().collect_vec(), |p| p.to_vec());

            // only the identity permutation can be expressed without a permute operation
            if perm != (0..rank as i64).collect_vec() {
                return Err(OnnxError::UnsupportedOperation(node.to_owned()));
            }
            OnnxValue::Value(input)
        }
        "ReduceSum" | "ReduceMean" | "ReduceMax" => {
            let op = match node.op_type {
                "ReduceSum" => ReduceOp::Sum,
                "ReduceMean" => ReduceOp::Mean,
                "ReduceMax" => ReduceOp::Max,
                _ => unreachable!(),
            };

            let input = inputs.value(0)?;
            let input_shape = graph[input].shape.clone();

            let axes = match inputs.optional(1)? {
                Some(axes) => Some(axes.unwrap_ints(node, graph)?),
                None => attrs.maybe_take_ints("axes")?.map(|a| a.to_vec()),
            };
            let axes = match axes {
                None => (0..input_shape.rank()).collect_vec(),
                Some(axes) => axes
                    .iter()
                    .map(|&a| abs_axis(node, a, input_shape.rank()))
                    .collect::<OnnxResult<Vec<_>>>()?,
            };
            if !axes.iter().all_unique() {
                let message = format!("duplicate reduction axes {:?}", axes);
                return Err(OnnxError::InvalidOperationArgs(node.to_owned(), message));
            }
            let keep_dims = attrs.maybe_take_bool("keepdims")?.unwrap_or(true);

            let result = graph.reduce(input, axes.clone(), op);
            let result = if keep_dims {
                graph.view(result, input_shape.replace_all(&axes, shape![1]))
            } else {
                result
            };
            OnnxValue::Value(result)
        }
        "Identity" => inputs.required(0)?.clone(),
        "Constant" => {
            let tensor = attrs.take_tensor("value")?;
            define_tensor_data(graph, node.name, tensor)?
        }
        _ => return Err(OnnxError::UnsupportedOperation(node.to_owned())),
    };

    Ok(vec![result])
}

/// Resolve the padding of a conv or pool window from the `pads` or `auto_pad` attribute.
fn window_padding(
    graph: &Graph,
    node: Node<&str>,
    attrs: &mut Attributes,
    input: Value,
    kernel: (usize, usize),
    stride: (usize, usize),
    dilation: (usize, usize),
) -> OnnxResult<Padding2d> {
    let auto_pad = attrs.maybe_take_string("auto_pad")?;
    let pads = attrs.maybe_take_ints("pads")?;

    let (input_h, input_w) = graph[input].shape.spatial();

    let padding = match auto_pad {
        None | Some("NOTSET") => match pads {
            None => Padding2d::ZERO,
            Some(pads) => {
                let [top, left, bottom, right] = unwrap_4(node, pads)?;
                Padding2d {
                    top,
                    bottom,
                    left,
                    right,
                }
            }
        },
        Some("VALID") => Padding2d::ZERO,
        Some(mode @ ("SAME_UPPER" | "SAME_LOWER")) => {
            let (mut top, mut bottom) = same_padding(input_h, kernel.0, stride.0, dilation.0);
            let (mut left, mut right) = same_padding(input_w, kernel.1, stride.1, dilation.1);
            if mode == "SAME_LOWER" {
                std::mem::swap(&mut top, &mut bottom);
                std::mem::swap(&mut left, &mut right);
            }
            Padding2d {
                top,
                bottom,
                left,
                right,
            }
        }
        Some(other) => return Err(OnnxError::InvalidAutoPadValue(node.to_owned(), other.to_owned())),
    };

    Ok(padding)
}

fn transpose_const(graph: &mut Graph, node: Node<&str>, value: Value) -> OnnxResult<Value> {
    let shape = graph[value].shape.clone();
    let data = graph
        .as_const(value)
        .ok_or_else(|| OnnxError::InvalidOperationArgs(node.to_owned(), "transB needs a constant weight".to_owned()))?;
    let [rows, cols] = shape.unwrap_fixed("Gemm weight").dims[..]
        .try_into()
        .map_err(|_| OnnxError::UnsupportedShape(node.to_owned(), shape.to_string()))?;

    let mut transposed = vec![0.0; data.len()];
    for r in 0..rows {
        for c in 0..cols {
            transposed[c * rows + r] = data[r * cols + c];
        }
    }
    Ok(graph.constant(shape![cols, rows], transposed))
}

fn define_tensor_data(graph: &mut Graph, name: &str, tensor: &TensorProto) -> OnnxResult<OnnxValue> {
    let data_location = DataLocation::try_from(tensor.data_location)
        .map_err(|_| OnnxError::UnsupportedType(name.to_owned(), format!("data_location {}", tensor.data_location)))?;
    if data_location != DataLocation::Default {
        return Err(OnnxError::UnsupportedType(name.to_owned(), "external data".to_owned()));
    }

    let dims: Vec<usize> = tensor.dims.iter().map(|&d| d as usize).collect_vec();
    let size: usize = dims.iter().product();
    let raw_data = &tensor.raw_data;

    let data_type = DataType::try_from(tensor.data_type)
        .map_err(|_| OnnxError::UnsupportedType(name.to_owned(), format!("data_type {}", tensor.data_type)))?;

    // careful, this stuff is pretty weirdly mapped, see the TensorProto docs
    let value = match data_type {
        DataType::Float => {
            let data = if raw_data.is_empty() {
                tensor.float_data.clone()
            } else {
                let mut data = vec![0.0; size];
                LittleEndian::read_f32_into(raw_data, &mut data);
                data
            };
            OnnxValue::Value(graph.constant(Shape::fixed(&dims), data))
        }
        DataType::Double => {
            let data = if raw_data.is_empty() {
                tensor.double_data.iter().map(|&x| x as f32).collect_vec()
            } else {
                let mut data = vec![0.0; size];
                LittleEndian::read_f64_into(raw_data, &mut data);
                data.iter().map(|&x| x as f32).collect_vec()
            };
            OnnxValue::Value(graph.constant(Shape::fixed(&dims), data))
        }
        DataType::Int64 => {
            let data = if raw_data.is_empty() {
                tensor.int64_data.clone()
            } else {
                let mut data = vec![0; size];
                LittleEndian::read_i64_into(raw_data, &mut data);
                data
            };
            OnnxValue::Ints { dims, data }
        }
        DataType::Int32 => {
            let data = if raw_data.is_empty() {
                tensor.int32_data.iter().map(|&x| x as i64).collect_vec()
            } else {
                let mut data = vec![0; size];
                LittleEndian::read_i32_into(raw_data, &mut data);
                data.iter().map(|&x| x as i64).collect_vec()
            };
            OnnxValue::Ints { dims, data }
        }
        other => return Err(OnnxError::UnsupportedType(name.to_owned(), other.as_str_name().to_owned())),
    };

    Ok(value)
}

fn resolve_value_shape(
    info: &ValueInfoProto,
    batch: Option<usize>,
    batch_param: &mut Option<String>,
) -> OnnxResult<Shape> {
    let ty = info.r#type.as_ref().unwrap_proto("value_info.type")?;
    let ProtoTypeValue::TensorType(tensor) = ty.value.as_ref().unwrap_proto("type.value")?;

    if tensor.elem_type != DataType::Float as i32 {
        return Err(OnnxError::UnsupportedType(
            info.name.clone(),
            format!("elem_type {}", tensor.elem_type),
        ));
    }

    let symbolic = || batch.map_or(Size::BATCH, Size::fixed);

    let dims = tensor
        .shape
        .as_ref()
        .unwrap_proto("tensor_type.shape")?
        .dim
        .iter()
        .map(|d| match &d.value {
            Some(dimension::Value::DimValue(value)) if *value > 0 => Size::fixed(*value as usize),
            Some(dimension::Value::DimParam(param)) => {
                batch_param.get_or_insert_with(|| param.clone());
                symbolic()
            }
            _ => symbolic(),
        })
        .collect_vec();

    Ok(Shape::new(dims))
}

/// Normalize a possibly negative axis into `0..rank`.
fn abs_axis(node: Node<&str>, axis: i64, rank: usize) -> OnnxResult<usize> {
    let abs = if axis < 0 { axis + rank as i64 } else { axis };
    if (0..rank as i64).contains(&abs) {
        Ok(abs as usize)
    } else {
        let message = format!("axis {} out of range for rank {}", axis, rank);
        Err(OnnxError::InvalidOperationArgs(node.to_owned(), message))
    }
}

/// Normalize a possibly negative or out-of-range slice bound into `0..=size`.
fn clamp_index(index: i64, size: usize) -> usize {
    let size = size as i64;
    let index = if index < 0 { index + size } else { index };
    index.clamp(0, size) as usize
}

fn maybe_unwrap_2(node: Node<&str>, slice: Option<&[i64]>) -> OnnxResult<[usize; 2]> {
    slice.map_or(Ok([1, 1]), |s| unwrap_2(node, s))
}

fn unwrap_2(node: Node<&str>, slice: &[i64]) -> OnnxResult<[usize; 2]> {
    match *slice {
        [a, b] => Ok([a as usize, b as usize]),
        _ => Err(OnnxError::UnsupportedShape(node.to_owned(), format!("{:?}", slice))),
    }
}

fn unwrap_4(node: Node<&str>, slice: &[i64]) -> OnnxResult<[usize; 4]> {
    match *slice {
        [a, b, c, d] => Ok([a as usize, b as usize, c as usize, d as usize]),
        _ => Err(OnnxError::UnsupportedShape(node.to_owned(), format!("{:?}", slice))),
    }
}

fn calculate_reshape_output_shape(
    node: Node<&str>,
    old_shape: &Shape,
    new_shape_raw: &[i64],
    allow_zero: bool,
) -> OnnxResult<Shape> {
    let error = || OnnxError::UnsupportedShape(node.to_owned(), format!("reshape {} into {:?}", old_shape, new_shape_raw));

    let old_size = old_shape.size();

    let mut new_shape = vec![];
    let mut leftover_index = None;
    let mut leftover_size = old_size;

    for (i, &raw) in new_shape_raw.iter().enumerate() {
        let size = match raw {
            0 if !allow_zero => *old_shape.dims.get(i).ok_or_else(error)?,
            -1 => {
                if leftover_index.is_some() {
                    return Err(error());
                }
                leftover_index = Some(i);
                new_shape.push(Size::ZERO);
                continue;
            }
            raw if raw >= 0 => Size::fixed(raw as usize),
            _ => return Err(error()),
        };

        leftover_size = (leftover_size / size).ok_or_else(error)?;
        new_shape.push(size);
    }

    if let Some(leftover_index) = leftover_index {
        new_shape[leftover_index] = leftover_size;
    }

    let shape = Shape::new(new_shape);
    if shape.size() != old_size {
        return Err(error());
    }
    Ok(shape)
}
