use std::collections::{HashMap, HashSet};

use itertools::Itertools;

use crate::graph::{BinaryOp, ConvDetails, Graph, Operation, Padding2d, PoolOp, ReduceOp, UnaryOp, Value};
use crate::onnx::proto::attribute_proto::AttributeType;
use crate::onnx::proto::tensor_proto::DataType;
use crate::onnx::proto::tensor_shape_proto::{dimension, Dimension};
use crate::onnx::proto::type_proto::Tensor as ProtoTensorType;
use crate::onnx::proto::type_proto::Value as ProtoTypeValue;
use crate::onnx::proto::{
    AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto, TensorProto, TensorShapeProto, TypeProto,
    ValueInfoProto,
};
use crate::onnx::result::{OnnxError, OnnxResult};
use crate::shape::{Shape, Size};

pub const IR_VERSION: i64 = 6;
pub const OPSET_VERSION: i64 = 11;
pub const PRODUCER_NAME: &str = "celestine";
pub const DEFAULT_BATCH_PARAM: &str = "N";

/// Settings for [graph_to_model].
#[derive(Debug, Clone)]
pub struct SaveSettings {
    pub model_name: String,
    pub graph_name: String,
    /// Evaluate batch-dependent sizes with this batch size instead of writing a symbolic dimension.
    pub batch: Option<usize>,
}

impl Default for SaveSettings {
    fn default() -> Self {
        SaveSettings {
            model_name: "model".to_owned(),
            graph_name: "graph".to_owned(),
            batch: None,
        }
    }
}

/// Convert a [Graph] into an onnx model.
///
/// Only values that the outputs depend on are written. Constants become initializers,
/// every other value gets a `value_info` entry so the shapes survive the round trip.
pub fn graph_to_model(graph: &Graph, settings: &SaveSettings) -> OnnxResult<ModelProto> {
    let mut writer = Writer::new(graph, settings);
    let graph_proto = writer.write()?;

    Ok(ModelProto {
        ir_version: IR_VERSION,
        opset_import: vec![OperatorSetIdProto {
            domain: String::new(),
            version: OPSET_VERSION,
        }],
        producer_name: PRODUCER_NAME.to_owned(),
        producer_version: env!("CARGO_PKG_VERSION").to_owned(),
        doc_string: settings.model_name.clone(),
        graph: Some(graph_proto),
        ..Default::default()
    })
}

struct Writer<'a> {
    graph: &'a Graph,
    settings: &'a SaveSettings,
    names: HashMap<Value, String>,
    proto: GraphProto,
}

impl<'a> Writer<'a> {
    fn new(graph: &'a Graph, settings: &'a SaveSettings) -> Self {
        Writer {
            graph,
            settings,
            names: HashMap::new(),
            proto: GraphProto {
                name: settings.graph_name.clone(),
                ..Default::default()
            },
        }
    }

    fn write(&mut self) -> OnnxResult<GraphProto> {
        let graph = self.graph;
        if graph.inputs().is_empty() {
            return Err(OnnxError::NoInputs);
        }

        let used = reachable_values(graph);
        self.assign_names(&used);

        for value in graph.values() {
            let is_input = graph.inputs().contains(&value);
            if !used.contains(&value) && !is_input {
                continue;
            }

            let name = self.name(value);
            let shape = &graph[value].shape;

            match &graph[value].operation {
                Operation::Input { .. } => {
                    let info = self.value_info(&name, shape)?;
                    self.proto.input.push(info);
                }
                Operation::Constant { data } => {
                    let dims = self.dims(&name, shape)?;
                    self.proto.initializer.push(float_tensor(&name, dims, data));
                }
                operation => {
                    self.write_operation(value, &name, operation)?;
                    if !graph.outputs().contains(&value) {
                        let info = self.value_info(&name, shape)?;
                        self.proto.value_info.push(info);
                    }
                }
            }
        }

        // outputs that could not simply be named after their value need an identity node
        let mut output_names = HashSet::new();
        for (i, &output) in graph.outputs().iter().enumerate() {
            let value_name = self.name(output);
            let name = if output_names.contains(&value_name) || !self.has_node(output) {
                let name = format!("{}_{}", output_name(graph, i), output.index());
                self.node("Identity", &name, vec![value_name], vec![]);
                name
            } else {
                value_name
            };

            let info = self.value_info(&name, &graph[output].shape)?;
            self.proto.output.push(info);
            output_names.insert(name);
        }

        Ok(std::mem::take(&mut self.proto))
    }

    fn assign_names(&mut self, used: &HashSet<Value>) {
        let graph = self.graph;

        for (i, &input) in graph.inputs().iter().enumerate() {
            let name = if graph.inputs().len() == 1 {
                "input".to_owned()
            } else {
                format!("input_{}", i)
            };
            self.names.insert(input, name);
        }

        for (i, &output) in graph.outputs().iter().enumerate() {
            if !self.names.contains_key(&output) && self.has_node(output) {
                self.names.insert(output, output_name(graph, i));
            }
        }

        for value in graph.values() {
            if used.contains(&value) && !self.names.contains_key(&value) {
                let info = &graph[value];
                let name = if info.debug_id.is_empty() {
                    format!("{}_{}", info.operation.kind().to_lowercase(), value.index())
                } else {
                    format!("{}_{}", info.debug_id, value.index())
                };
                self.names.insert(value, name);
            }
        }
    }

    fn has_node(&self, value: Value) -> bool {
        !matches!(
            self.graph[value].operation,
            Operation::Input { .. } | Operation::Constant { .. }
        )
    }

    fn name(&self, value: Value) -> String {
        self.names[&value].clone()
    }

    fn write_operation(&mut self, value: Value, name: &str, operation: &Operation) -> OnnxResult<()> {
        let graph = self.graph;
        let output = vec![name.to_owned()];

        match *operation {
            Operation::Input { .. } | Operation::Constant { .. } => unreachable!(),
            Operation::View { input } => {
                let new_shape = self.reshape_target(name, &graph[value].shape)?;
                let shape_name = format!("{}_shape", name);
                self.proto.initializer.push(int_tensor(&shape_name, &new_shape));
                self.node_full("Reshape", name, vec![self.name(input), shape_name], output, vec![]);
            }
            Operation::Slice { input, axis, range } => {
                let mut inputs = vec![self.name(input)];
                let operands = [
                    ("starts", range.start as i64),
                    ("ends", range.end as i64),
                    ("axes", axis as i64),
                    ("steps", range.step as i64),
                ];
                for (suffix, operand) in operands {
                    let operand_name = format!("{}_{}", name, suffix);
                    self.proto.initializer.push(int_tensor(&operand_name, &[operand]));
                    inputs.push(operand_name);
                }
                self.node_full("Slice", name, inputs, output, vec![]);
            }
            Operation::Pad { input, ref pads } => {
                let befores = pads.iter().map(|&(before, _)| before as i64);
                let afters = pads.iter().map(|&(_, after)| after as i64);
                let pads = befores.chain(afters).collect_vec();

                let pads_name = format!("{}_pads", name);
                self.proto.initializer.push(int_tensor(&pads_name, &pads));
                let attrs = vec![attr_string("mode", "constant")];
                self.node_full("Pad", name, vec![self.name(input), pads_name], output, attrs);
            }
            Operation::Concat { ref inputs, axis } => {
                let inputs = inputs.iter().map(|&v| self.name(v)).collect_vec();
                self.node_full("Concat", name, inputs, output, vec![attr_int("axis", axis as i64)]);
            }
            Operation::Conv {
                input,
                filter,
                bias,
                ref details,
            } => {
                let mut inputs = vec![self.name(input), self.name(filter)];
                inputs.extend(bias.map(|b| self.name(b)));
                self.node_full("Conv", name, inputs, output, conv_attributes(details));
            }
            Operation::Pool { input, op, ref details } => {
                let mut attrs = vec![
                    attr_ints("kernel_shape", &[details.kernel_h as i64, details.kernel_w as i64]),
                    attr_ints("strides", &[details.stride_y as i64, details.stride_x as i64]),
                    attr_ints("pads", &padding_to_pads(details.padding)),
                ];
                let op_type = match op {
                    PoolOp::Max => "MaxPool",
                    PoolOp::Avg => {
                        attrs.push(attr_int("count_include_pad", 0));
                        "AveragePool"
                    }
                };
                self.node_full(op_type, name, vec![self.name(input)], output, attrs);
            }
            Operation::MatMul { left, right } => {
                self.node_full("MatMul", name, vec![self.name(left), self.name(right)], output, vec![]);
            }
            Operation::Unary { input, op } => {
                let op_type = match op {
                    UnaryOp::Relu => "Relu",
                    UnaryOp::Sigmoid => "Sigmoid",
                    UnaryOp::Abs => "Abs",
                    UnaryOp::Neg => "Neg",
                    UnaryOp::Exp => "Exp",
                    UnaryOp::Sqrt => "Sqrt",
                    UnaryOp::Tanh => "Tanh",
                };
                self.node_full(op_type, name, vec![self.name(input)], output, vec![]);
            }
            Operation::Binary { left, right, op } => {
                let op_type = match op {
                    BinaryOp::Add => "Add",
                    BinaryOp::Sub => "Sub",
                    BinaryOp::Mul => "Mul",
                    BinaryOp::Div => "Div",
                    BinaryOp::Min => "Min",
                    BinaryOp::Max => "Max",
                };
                self.node_full(op_type, name, vec![self.name(left), self.name(right)], output, vec![]);
            }
            Operation::BatchNorm {
                input,
                scale,
                bias,
                mean,
                variance,
                eps,
            } => {
                let inputs = [input, scale, bias, mean, variance].iter().map(|&v| self.name(v)).collect_vec();
                let attrs = vec![attr_float("epsilon", eps.into_inner())];
                self.node_full("BatchNormalization", name, inputs, output, attrs);
            }
            Operation::Reduce { input, ref axes, op } => {
                let op_type = match op {
                    ReduceOp::Sum => "ReduceSum",
                    ReduceOp::Mean => "ReduceMean",
                    ReduceOp::Max => "ReduceMax",
                };
                let axes = axes.iter().map(|&a| a as i64).collect_vec();
                let attrs = vec![attr_ints("axes", &axes), attr_int("keepdims", 0)];
                self.node_full(op_type, name, vec![self.name(input)], output, attrs);
            }
        }

        Ok(())
    }

    fn node(&mut self, op_type: &str, name: &str, inputs: Vec<String>, attrs: Vec<AttributeProto>) {
        self.node_full(op_type, name, inputs, vec![name.to_owned()], attrs)
    }

    fn node_full(
        &mut self,
        op_type: &str,
        name: &str,
        input: Vec<String>,
        output: Vec<String>,
        attribute: Vec<AttributeProto>,
    ) {
        self.proto.node.push(NodeProto {
            input,
            output,
            name: name.to_owned(),
            op_type: op_type.to_owned(),
            attribute,
            ..Default::default()
        });
    }

    /// The target shape of a reshape, with the batch-dependent dimension (if any) replaced by `-1`.
    fn reshape_target(&self, name: &str, shape: &Shape) -> OnnxResult<Vec<i64>> {
        if let Some(batch) = self.settings.batch {
            return Ok(shape.eval(batch).dims.iter().map(|&d| d as i64).collect_vec());
        }

        if shape.dims.iter().filter(|d| d.try_unwrap_fixed().is_none()).count() > 1 {
            return Err(OnnxError::UnsupportedValueShape(name.to_owned(), shape.to_string()));
        }

        let dims = shape
            .dims
            .iter()
            .map(|d| d.try_unwrap_fixed().map_or(-1, |d| d as i64))
            .collect_vec();
        Ok(dims)
    }

    fn dims(&self, name: &str, shape: &Shape) -> OnnxResult<Vec<i64>> {
        match self.settings.batch {
            Some(batch) => Ok(shape.eval(batch).dims.iter().map(|&d| d as i64).collect_vec()),
            None => shape
                .as_fixed()
                .map(|s| s.dims.iter().map(|&d| d as i64).collect_vec())
                .ok_or_else(|| OnnxError::UnsupportedValueShape(name.to_owned(), shape.to_string())),
        }
    }

    fn value_info(&self, name: &str, shape: &Shape) -> OnnxResult<ValueInfoProto> {
        value_info(name, shape, self.settings.batch, DEFAULT_BATCH_PARAM)
    }
}

fn output_name(graph: &Graph, index: usize) -> String {
    if graph.outputs().len() == 1 {
        "output".to_owned()
    } else {
        format!("output_{}", index)
    }
}

/// All values the graph outputs depend on.
fn reachable_values(graph: &Graph) -> HashSet<Value> {
    let mut used = HashSet::new();
    let mut todo = graph.outputs().to_vec();

    while let Some(value) = todo.pop() {
        if used.insert(value) {
            todo.extend(graph[value].operation.inputs());
        }
    }

    used
}

/// Build a float tensor `ValueInfoProto`.
///
/// Batch-dependent sizes are evaluated with `batch` if given, otherwise a plain batch dimension
/// is written as the symbolic dimension `batch_param`.
pub(crate) fn value_info(name: &str, shape: &Shape, batch: Option<usize>, batch_param: &str) -> OnnxResult<ValueInfoProto> {
    let dim = shape
        .dims
        .iter()
        .map(|&d| {
            let value = match (d.try_unwrap_fixed(), batch) {
                (Some(d), _) => dimension::Value::DimValue(d as i64),
                (None, Some(batch)) => dimension::Value::DimValue(d.eval(batch) as i64),
                (None, None) if d == Size::BATCH => dimension::Value::DimParam(batch_param.to_owned()),
                (None, None) => return Err(OnnxError::UnsupportedValueShape(name.to_owned(), shape.to_string())),
            };
            Ok(Dimension {
                value: Some(value),
                ..Default::default()
            })
        })
        .try_collect()?;

    Ok(ValueInfoProto {
        name: name.to_owned(),
        r#type: Some(TypeProto {
            value: Some(ProtoTypeValue::TensorType(ProtoTensorType {
                elem_type: DataType::Float as i32,
                shape: Some(TensorShapeProto { dim }),
            })),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn float_tensor(name: &str, dims: Vec<i64>, data: &[f32]) -> TensorProto {
    TensorProto {
        name: name.to_owned(),
        dims,
        data_type: DataType::Float as i32,
        raw_data: bytemuck::cast_slice::<f32, u8>(data).to_vec(),
        ..Default::default()
    }
}

fn int_tensor(name: &str, data: &[i64]) -> TensorProto {
    TensorProto {
        name: name.to_owned(),
        dims: vec![data.len() as i64],
        data_type: DataType::Int64 as i32,
        raw_data: bytemuck::cast_slice::<i64, u8>(data).to_vec(),
        ..Default::default()
    }
}

fn conv_attributes(details: &ConvDetails) -> Vec<AttributeProto> {
    vec![
        attr_ints("kernel_shape", &[details.kernel_h as i64, details.kernel_w as i64]),
        attr_ints("strides", &[details.stride_y as i64, details.stride_x as i64]),
        attr_ints("dilations", &[details.dilation_y as i64, details.dilation_x as i64]),
        attr_ints("pads", &padding_to_pads(details.padding)),
        attr_int("group", details.groups as i64),
    ]
}

fn padding_to_pads(padding: Padding2d) -> [i64; 4] {
    [
        padding.top as i64,
        padding.left as i64,
        padding.bottom as i64,
        padding.right as i64,
    ]
}

fn attr_int(name: &str, i: i64) -> AttributeProto {
    AttributeProto {
        name: name.to_owned(),
        r#type: AttributeType::Int as i32,
        i,
        ..Default::default()
    }
}

fn attr_ints(name: &str, ints: &[i64]) -> AttributeProto {
    AttributeProto {
        name: name.to_owned(),
        r#type: AttributeType::Ints as i32,
        ints: ints.to_vec(),
        ..Default::default()
    }
}

fn attr_float(name: &str, f: f32) -> AttributeProto {
    AttributeProto {
        name: name.to_owned(),
        r#type: AttributeType::Float as i32,
        f,
        ..Default::default()
    }
}

fn attr_string(name: &str, s: &str) -> AttributeProto {
    AttributeProto {
        name: name.to_owned(),
        r#type: AttributeType::String as i32,
        s: s.as_bytes().to_vec(),
        ..Default::default()
    }
}
