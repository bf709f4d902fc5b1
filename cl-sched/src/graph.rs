use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::ops::Index;

use itertools::Itertools;

use cl_graph::onnx::proto::tensor_proto::DataType;
use cl_graph::onnx::proto::tensor_shape_proto::dimension;
use cl_graph::onnx::proto::type_proto::Value as ProtoTypeValue;
use cl_graph::onnx::proto::{ModelProto, TensorProto, ValueInfoProto};

use crate::result::{SchedError, SchedResult};

/// The operator graph of an onnx model, reduced to what matters for scheduling:
/// which op produces and consumes which value, and how large every value is.
///
/// Ops and values live in arenas and are referred to by [OpId] and [ValueId].
/// This type implements `Index` for both, so `graph[op]` and `graph[value]` work.
#[derive(Clone)]
pub struct OpGraph {
    name: String,
    values: Vec<ValueInfo>,
    ops: Vec<OpInfo>,
    inputs: Vec<ValueId>,
    outputs: Vec<ValueId>,
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ValueId(usize);

#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct OpId(usize);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ValueKind {
    /// A runtime input of the model.
    Input,
    /// A weight stored in the model. Params never take part in memory planning.
    Param,
    /// An intermediate or final result of an op.
    Result,
}

#[derive(Debug, Clone)]
pub struct ValueInfo {
    pub name: String,
    pub kind: ValueKind,
    pub shape: Vec<usize>,
    pub dtype: DataType,
    /// The op producing this value, only set for [ValueKind::Result].
    pub def: Option<OpId>,
    /// Every op consuming this value, once for each operand it is used as.
    pub uses: Vec<OpId>,
}

#[derive(Debug, Clone)]
pub struct OpInfo {
    pub name: String,
    pub op_type: String,
    pub inputs: Vec<ValueId>,
    pub outputs: Vec<ValueId>,
    /// The distinct ops producing the non-param inputs of this op.
    pub preds: Vec<OpId>,
    /// The distinct ops consuming any output of this op.
    pub succs: Vec<OpId>,
}

impl OpGraph {
    /// Build the operator graph of a model. All non-param values must have a concrete shape.
    pub fn from_model(model: &ModelProto) -> SchedResult<OpGraph> {
        OpGraph::from_model_with_batch(model, None)
    }

    /// Like [OpGraph::from_model], but symbolic dimensions are fixed to `batch` if it is given.
    pub fn from_model_with_batch(model: &ModelProto, batch: Option<usize>) -> SchedResult<OpGraph> {
        let proto = model.graph.as_ref().ok_or(SchedError::MissingProtoField("model.graph"))?;

        let mut infos: HashMap<&str, &ValueInfoProto> = HashMap::new();
        for info in proto.input.iter().chain(&proto.output).chain(&proto.value_info) {
            infos.entry(info.name.as_str()).or_insert(info);
        }

        let mut graph = OpGraph {
            name: proto.name.clone(),
            values: vec![],
            ops: vec![],
            inputs: vec![],
            outputs: vec![],
        };
        let mut names: HashMap<String, ValueId> = HashMap::new();

        // initializers are allowed to re-appear in the inputs, they are params either way
        for tensor in &proto.initializer {
            let value = graph.push_value(param_info(tensor)?);
            names.insert(tensor.name.clone(), value);
        }

        for input in &proto.input {
            if names.contains_key(&input.name) {
                continue;
            }
            let (shape, dtype) = resolve_type(input, batch)?;
            let value = graph.push_value(ValueInfo {
                name: input.name.clone(),
                kind: ValueKind::Input,
                shape,
                dtype,
                def: None,
                uses: vec![],
            });
            names.insert(input.name.clone(), value);
            graph.inputs.push(value);
        }

        for node in &proto.node {
            let op = OpId(graph.ops.len());

            let mut outputs = vec![];
            for name in &node.output {
                // optional outputs can be skipped with an empty name
                if name.is_empty() {
                    continue;
                }
                if names.contains_key(name) {
                    return Err(SchedError::DuplicateDefinition(name.clone()));
                }

                let info = infos
                    .get(name.as_str())
                    .ok_or_else(|| SchedError::MissingValueInfo(name.clone()))?;
                let (shape, dtype) = resolve_type(info, batch)?;
                let value = graph.push_value(ValueInfo {
                    name: name.clone(),
                    kind: ValueKind::Result,
                    shape,
                    dtype,
                    def: Some(op),
                    uses: vec![],
                });
                names.insert(name.clone(), value);
                outputs.push(value);
            }

            graph.ops.push(OpInfo {
                name: node.name.clone(),
                op_type: node.op_type.clone(),
                inputs: vec![],
                outputs,
                preds: vec![],
                succs: vec![],
            });
        }

        // inputs are resolved in a second pass, so nodes don't need to be sorted
        for (index, node) in proto.node.iter().enumerate() {
            let op = OpId(index);
            for name in &node.input {
                if name.is_empty() {
                    continue;
                }
                let &value = names.get(name).ok_or_else(|| SchedError::UndefinedValue {
                    node: node.name.clone(),
                    value: name.clone(),
                })?;
                graph.ops[op.0].inputs.push(value);
                graph.values[value.0].uses.push(op);
            }
        }

        for output in &proto.output {
            let &value = names
                .get(&output.name)
                .ok_or_else(|| SchedError::UndefinedOutput(output.name.clone()))?;
            graph.outputs.push(value);
        }

        graph.connect_ops();
        if !graph.is_acyclic() {
            return Err(SchedError::Cycle);
        }

        Ok(graph)
    }

    fn push_value(&mut self, info: ValueInfo) -> ValueId {
        let id = ValueId(self.values.len());
        self.values.push(info);
        id
    }

    fn connect_ops(&mut self) {
        for index in 0..self.ops.len() {
            let preds = self.ops[index]
                .inputs
                .iter()
                .filter_map(|&v| self.values[v.0].def)
                .unique()
                .collect_vec();

            for &pred in &preds {
                let succs = &mut self.ops[pred.0].succs;
                if !succs.contains(&OpId(index)) {
                    succs.push(OpId(index));
                }
            }
            self.ops[index].preds = preds;
        }
    }

    fn is_acyclic(&self) -> bool {
        let mut pred_count = self.ops.iter().map(|op| op.preds.len()).collect_vec();
        let mut todo = self.ops().filter(|&op| pred_count[op.0] == 0).collect_vec();
        let mut visited = 0;

        while let Some(op) = todo.pop() {
            visited += 1;
            for &succ in &self[op].succs {
                pred_count[succ.0] -= 1;
                if pred_count[succ.0] == 0 {
                    todo.push(succ);
                }
            }
        }

        visited == self.ops.len()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ValueId] {
        &self.outputs
    }

    /// Iterate over all ops, in the order they appear in the model.
    pub fn ops(&self) -> impl Iterator<Item = OpId> {
        (0..self.ops.len()).map(OpId)
    }

    pub fn values(&self) -> impl Iterator<Item = ValueId> {
        (0..self.values.len()).map(ValueId)
    }

    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    pub fn is_output(&self, value: ValueId) -> bool {
        self.outputs.contains(&value)
    }

    /// The number of times `value` is used as an operand, plus one if it is a graph output.
    /// A value stays alive until all of these uses have happened.
    pub fn use_count(&self, value: ValueId) -> u32 {
        (self[value].uses.len() + self.is_output(value) as usize) as u32
    }

    /// The size in bytes of `value`.
    pub fn size(&self, value: ValueId) -> u64 {
        self[value].size()
    }

    /// The total size of the model inputs.
    pub fn input_size(&self) -> u64 {
        self.inputs.iter().map(|&v| self.size(v)).sum()
    }

    /// The non-param operands of `op`.
    pub fn value_inputs(&self, op: OpId) -> impl Iterator<Item = ValueId> + '_ {
        self[op]
            .inputs
            .iter()
            .copied()
            .filter(|&v| self[v].kind != ValueKind::Param)
    }
}

impl ValueInfo {
    pub fn size(&self) -> u64 {
        let elements: u64 = self.shape.iter().map(|&d| d as u64).product();
        elements * dtype_size(self.dtype)
    }
}

impl Index<ValueId> for OpGraph {
    type Output = ValueInfo;

    fn index(&self, value: ValueId) -> &Self::Output {
        &self.values[value.0]
    }
}

impl Index<OpId> for OpGraph {
    type Output = OpInfo;

    fn index(&self, op: OpId) -> &Self::Output {
        &self.ops[op.0]
    }
}

impl ValueId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl OpId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl Debug for ValueId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ValueId({})", self.0)
    }
}

impl Debug for OpId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "OpId({})", self.0)
    }
}

impl Debug for OpGraph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpGraph")
            .field("name", &self.name)
            .field("ops", &self.ops.len())
            .field("values", &self.values.len())
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish()
    }
}

fn param_info(tensor: &TensorProto) -> SchedResult<ValueInfo> {
    let dtype = DataType::try_from(tensor.data_type)
        .map_err(|_| SchedError::UnsupportedType(tensor.name.clone(), tensor.data_type))?;

    Ok(ValueInfo {
        name: tensor.name.clone(),
        kind: ValueKind::Param,
        shape: tensor.dims.iter().map(|&d| d.max(0) as usize).collect(),
        dtype,
        def: None,
        uses: vec![],
    })
}

fn resolve_type(info: &ValueInfoProto, batch: Option<usize>) -> SchedResult<(Vec<usize>, DataType)> {
    let missing = || SchedError::MissingValueInfo(info.name.clone());

    let ty = info.r#type.as_ref().ok_or_else(missing)?;
    let Some(ProtoTypeValue::TensorType(tensor)) = &ty.value else {
        return Err(missing());
    };
    let dtype = DataType::try_from(tensor.elem_type)
        .ok()
        .filter(|&d| dtype_size(d) != 0)
        .ok_or_else(|| SchedError::UnsupportedType(info.name.clone(), tensor.elem_type))?;

    let dims = &tensor.shape.as_ref().ok_or_else(missing)?.dim;
    let shape = dims
        .iter()
        .map(|d| match (&d.value, batch) {
            (Some(dimension::Value::DimValue(value)), _) if *value >= 0 => Ok(*value as usize),
            (Some(dimension::Value::DimParam(_)), Some(batch)) => Ok(batch),
            (Some(dimension::Value::DimParam(param)), None) => {
                Err(SchedError::SymbolicDimension(info.name.clone(), param.clone()))
            }
            _ => Err(SchedError::UnknownDimension(info.name.clone())),
        })
        .try_collect()?;

    Ok((shape, dtype))
}

/// The size of a single element in bytes, zero for types without a fixed size.
pub fn dtype_size(dtype: DataType) -> u64 {
    match dtype {
        DataType::Undefined | DataType::String => 0,
        DataType::Uint8 | DataType::Int8 | DataType::Bool => 1,
        DataType::Uint16 | DataType::Int16 | DataType::Float16 | DataType::Bfloat16 => 2,
        DataType::Float | DataType::Int32 | DataType::Uint32 => 4,
        DataType::Int64 | DataType::Uint64 | DataType::Double | DataType::Complex64 => 8,
        DataType::Complex128 => 16,
    }
}
